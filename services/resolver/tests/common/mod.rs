//! Shared test fixtures: an in-memory image store with scripted pulls.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use imgres_resolver::image::{
    ImageAvailabilityCache, ImageMetadata, ImageResolver, ImageTransport, PullProgress,
    PullStream, ResolverConfig, TransportError, TransportErrorKind,
};
use imgres_resolver::ImageReference;

/// What the next pull does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// Report progress at once, then after the pull delay the image appears
    /// in the store.
    Succeed,
    /// `pull` itself returns an error of this kind.
    Fail(TransportErrorKind),
    /// The stream yields one progress event, then an error of this kind.
    FailMidStream(TransportErrorKind),
    /// The stream never yields anything.
    Hang,
}

/// What the next inspection does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectOutcome {
    /// Answer from the store.
    FromStore,
    /// Fail with an error of this kind.
    Fail(TransportErrorKind),
    /// Wait this long, then answer from the store.
    Slow(Duration),
}

type Store = Arc<Mutex<HashMap<String, ImageMetadata>>>;

/// In-memory stand-in for the Docker daemon.
pub struct ScriptedTransport {
    store: Store,
    pull_script: Mutex<VecDeque<PullOutcome>>,
    default_outcome: PullOutcome,
    inspect_script: Mutex<VecDeque<InspectOutcome>>,
    pull_delay: Duration,
    pulled_serial: Arc<AtomicU64>,
    inspect_calls: AtomicUsize,
    pull_calls: AtomicUsize,
}

impl ScriptedTransport {
    /// A transport whose pulls succeed by default.
    pub fn new() -> Self {
        Self::with_default(PullOutcome::Succeed)
    }

    /// A transport where every unscripted pull behaves like `outcome`.
    pub fn with_default(outcome: PullOutcome) -> Self {
        Self {
            store: Arc::new(Mutex::new(HashMap::new())),
            pull_script: Mutex::new(VecDeque::new()),
            default_outcome: outcome,
            inspect_script: Mutex::new(VecDeque::new()),
            pull_delay: Duration::from_millis(5),
            pulled_serial: Arc::new(AtomicU64::new(0)),
            inspect_calls: AtomicUsize::new(0),
            pull_calls: AtomicUsize::new(0),
        }
    }

    /// Time each pull takes before producing its outcome.
    pub fn pull_delay(mut self, delay: Duration) -> Self {
        self.pull_delay = delay;
        self
    }

    /// Queue outcomes for the next pulls, in order.
    pub fn script(self, outcomes: &[PullOutcome]) -> Self {
        self.pull_script.lock().unwrap().extend(outcomes.iter().copied());
        self
    }

    /// Queue outcomes for the next inspections, in order. Unscripted
    /// inspections answer from the store.
    pub fn script_inspections(self, outcomes: &[InspectOutcome]) -> Self {
        self.inspect_script.lock().unwrap().extend(outcomes.iter().copied());
        self
    }

    /// Make the next inspections fail with these kinds, in order.
    pub fn fail_inspections(self, kinds: &[TransportErrorKind]) -> Self {
        let outcomes: Vec<_> = kinds.iter().copied().map(InspectOutcome::Fail).collect();
        self.script_inspections(&outcomes)
    }

    /// Put an image in the local store.
    pub fn with_local_image(self, reference: &str, metadata: ImageMetadata) -> Self {
        let key = ImageReference::parse(reference).unwrap().canonical();
        self.store.lock().unwrap().insert(key, metadata);
        self
    }

    pub fn inspect_calls(&self) -> usize {
        self.inspect_calls.load(Ordering::SeqCst)
    }

    pub fn pull_calls(&self) -> usize {
        self.pull_calls.load(Ordering::SeqCst)
    }

    pub fn local_image(&self, reference: &str) -> Option<ImageMetadata> {
        let key = ImageReference::parse(reference).unwrap().canonical();
        self.store.lock().unwrap().get(&key).cloned()
    }
}

#[async_trait]
impl ImageTransport for ScriptedTransport {
    async fn inspect(&self, reference: &ImageReference) -> Result<ImageMetadata, TransportError> {
        self.inspect_calls.fetch_add(1, Ordering::SeqCst);

        let outcome = self
            .inspect_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(InspectOutcome::FromStore);
        match outcome {
            InspectOutcome::FromStore => {}
            InspectOutcome::Fail(kind) => {
                return Err(TransportError::new(kind, "scripted inspect failure"));
            }
            InspectOutcome::Slow(delay) => tokio::time::sleep(delay).await,
        }

        self.store
            .lock()
            .unwrap()
            .get(&reference.canonical())
            .cloned()
            .ok_or_else(|| TransportError::not_found(format!("No such image: {reference}")))
    }

    async fn pull(
        &self,
        repository: &str,
        tag_or_digest: &str,
    ) -> Result<PullStream, TransportError> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);

        let outcome = self
            .pull_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default_outcome);
        let key = ImageReference::from_parts(repository, tag_or_digest)
            .unwrap()
            .canonical();
        let delay = self.pull_delay;

        match outcome {
            PullOutcome::Fail(kind) => {
                tokio::time::sleep(delay).await;
                Err(TransportError::new(kind, "scripted pull failure"))
            }
            PullOutcome::FailMidStream(kind) => Ok(Box::pin(futures_util::stream::iter(vec![
                Ok(PullProgress::new("Pulling fs layer")),
                Err(TransportError::new(kind, "scripted stream failure")),
            ]))),
            PullOutcome::Hang => Ok(Box::pin(futures_util::stream::pending::<
                Result<PullProgress, TransportError>,
            >())),
            PullOutcome::Succeed => {
                let store = Arc::clone(&self.store);
                let serial = self.pulled_serial.fetch_add(1, Ordering::SeqCst);
                let started = futures_util::stream::iter(vec![Ok::<_, TransportError>(
                    PullProgress::new("Pulling fs layer"),
                )]);
                let finished = futures_util::stream::once(async move {
                    tokio::time::sleep(delay).await;
                    store
                        .lock()
                        .unwrap()
                        .insert(key, pulled_metadata(serial));
                    Ok::<_, TransportError>(PullProgress::new("Download complete"))
                });
                Ok(Box::pin(started.chain(finished)))
            }
        }
    }
}

/// Metadata the scripted store records for the `serial`-th successful pull.
pub fn pulled_metadata(serial: u64) -> ImageMetadata {
    ImageMetadata::new(format!("sha256:pulled{serial:04}"), fixed_time())
}

pub fn fixed_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-01-15T08:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn test_config(budget: Duration) -> ResolverConfig {
    ResolverConfig {
        pull_retry_budget: budget,
        pull_stall_timeout: Duration::from_millis(100),
    }
}

/// Like `test_config`, with a stall timeout that tolerates slow pulls.
pub fn patient_config(budget: Duration, stall: Duration) -> ResolverConfig {
    ResolverConfig {
        pull_retry_budget: budget,
        pull_stall_timeout: stall,
    }
}

/// Build a resolver over `transport` with a fresh cache.
pub fn resolver_for(
    transport: &Arc<ScriptedTransport>,
    config: ResolverConfig,
) -> (ImageResolver, Arc<ImageAvailabilityCache>) {
    let cache = Arc::new(ImageAvailabilityCache::new());
    let resolver = ImageResolver::new(transport.clone(), Arc::clone(&cache), config);
    (resolver, cache)
}
