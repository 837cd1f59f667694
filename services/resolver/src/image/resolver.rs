//! Image resolver: turns a reference into a locally available image.
//!
//! A resolution walks through these steps:
//!
//! 1. Availability cache hit: done, without consulting the policy.
//! 2. Inspect the local store; record the image in the cache if present.
//! 3. Ask the pull policy whether the local state is good enough.
//! 4. Otherwise pull with retries until the time budget runs out,
//!    re-inspect, and record the result in the cache.
//!
//! Concurrent resolutions of the same new image are not collapsed: each may
//! pull on its own, and the cache keeps whichever insert lands first.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use imgres_ref::{ImageReference, ReferenceError};
use thiserror::Error;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, trace, warn};

use super::cache::ImageAvailabilityCache;
use super::metadata::ImageMetadata;
use super::policy::PullPolicy;
use super::transport::{
    DefaultFaultClassifier, FaultClass, FaultClassifier, ImageTransport, TransportError,
};

/// Errors from image resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid image reference: {0}")]
    InvalidReference(#[from] ReferenceError),

    /// Every pull attempt failed transiently until the time budget ran out.
    #[error(
        "failed to pull image {reference} after {attempts} attempt(s): {}",
        describe_last_failure(.last_failure)
    )]
    PullExhausted {
        reference: String,
        attempts: u32,
        #[source]
        last_failure: Option<TransportError>,
    },

    /// A fatal transport failure; not retried.
    #[error("failed to fetch image {reference}: {source}")]
    Fetch {
        reference: String,
        #[source]
        source: TransportError,
    },
}

fn describe_last_failure(last_failure: &Option<TransportError>) -> String {
    match last_failure {
        Some(failure) => failure.to_string(),
        None => "no failure was recorded".to_string(),
    }
}

impl ResolveError {
    /// Returns true if the image could not be made available (as opposed to
    /// the reference being malformed).
    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            ResolveError::PullExhausted { .. } | ResolveError::Fetch { .. }
        )
    }

    /// The transport failure behind this error, if any.
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            ResolveError::InvalidReference(_) => None,
            ResolveError::PullExhausted { last_failure, .. } => last_failure.as_ref(),
            ResolveError::Fetch { source, .. } => Some(source),
        }
    }
}

/// Why a single pull attempt did not produce an image.
enum AttemptFailure {
    /// The transport failed; subject to classification.
    Failed(TransportError),
    /// The retry budget ran out while the attempt was in flight.
    OutOfTime(TransportError),
}

/// Configuration for the image resolver.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Wall-clock budget for all pull attempts of one resolution.
    pub pull_retry_budget: Duration,

    /// A pull attempt with no progress for this long counts as interrupted.
    pub pull_stall_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            pull_retry_budget: Duration::from_secs(120),
            pull_stall_timeout: Duration::from_secs(30),
        }
    }
}

/// Resolves image references against the local store, pulling on demand.
///
/// Cheap to share: clone the `Arc`s, or wrap the resolver itself in one.
pub struct ImageResolver {
    transport: Arc<dyn ImageTransport>,
    cache: Arc<ImageAvailabilityCache>,
    classifier: Arc<dyn FaultClassifier>,
    config: ResolverConfig,
}

impl ImageResolver {
    /// Create a resolver with the default fault classifier.
    pub fn new(
        transport: Arc<dyn ImageTransport>,
        cache: Arc<ImageAvailabilityCache>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            transport,
            cache,
            classifier: Arc::new(DefaultFaultClassifier),
            config,
        }
    }

    /// Replace the fault classifier.
    pub fn with_classifier(mut self, classifier: Arc<dyn FaultClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// The availability cache this resolver reads and fills.
    pub fn cache(&self) -> &Arc<ImageAvailabilityCache> {
        &self.cache
    }

    /// Parse `reference` and resolve it.
    pub async fn resolve_str(
        &self,
        reference: &str,
        policy: &dyn PullPolicy,
    ) -> Result<String, ResolveError> {
        let reference = ImageReference::parse(reference)?;
        self.resolve(&reference, policy).await
    }

    /// Ensure `reference` is available locally according to `policy`.
    ///
    /// Returns the canonical reference string.
    pub async fn resolve(
        &self,
        reference: &ImageReference,
        policy: &dyn PullPolicy,
    ) -> Result<String, ResolveError> {
        let canonical = reference.canonical();

        if self.cache.lookup(reference).await.is_some() {
            trace!(image = %canonical, "Image is already in availability cache");
            return Ok(canonical);
        }

        let metadata = self.inspect_local(reference).await?;

        if !policy.should_pull(metadata.as_ref()) {
            debug!(image = %canonical, ?policy, "Local image satisfies pull policy");
            return Ok(canonical);
        }

        info!(
            image = %canonical,
            "Pulling image. This may take some time but only needs to be done once"
        );

        let start = Instant::now();
        let metadata = self.pull_with_retry(reference).await?;
        self.cache.insert_if_absent(reference, metadata).await;

        info!(
            image = %canonical,
            duration_ms = start.elapsed().as_millis() as u64,
            "Image pull completed"
        );

        Ok(canonical)
    }

    /// Inspect the local store. `None` means the store does not have it; any
    /// other inspection failure ends the resolution.
    async fn inspect_local(
        &self,
        reference: &ImageReference,
    ) -> Result<Option<ImageMetadata>, ResolveError> {
        match self.transport.inspect(reference).await {
            Ok(metadata) => {
                self.cache
                    .insert_if_absent(reference, metadata.clone())
                    .await;
                Ok(Some(metadata))
            }
            Err(err) if err.is_not_found() => {
                trace!(image = %reference, "Image not found locally");
                Ok(None)
            }
            Err(err) => {
                error!(image = %reference, error = %err, "Local inspection failed");
                Err(ResolveError::Fetch {
                    reference: reference.canonical(),
                    source: err,
                })
            }
        }
    }

    /// Pull until an attempt succeeds, a fatal failure occurs, or the retry
    /// budget is spent. Retries are immediate.
    async fn pull_with_retry(
        &self,
        reference: &ImageReference,
    ) -> Result<ImageMetadata, ResolveError> {
        let deadline = Instant::now() + self.config.pull_retry_budget;
        let mut last_failure: Option<TransportError> = None;
        let mut attempts: u32 = 0;

        while Instant::now() < deadline {
            attempts += 1;

            let err = match self.pull_once(reference, deadline).await {
                Ok(metadata) => return Ok(metadata),
                Err(AttemptFailure::OutOfTime(err)) => {
                    // Keep the cause of the previous attempt; it says more
                    // than the deadline itself.
                    debug!(
                        image = %reference,
                        attempt = attempts,
                        "Pull attempt cut short by retry budget"
                    );
                    last_failure.get_or_insert(err);
                    continue;
                }
                Err(AttemptFailure::Failed(err)) => err,
            };

            match self.classifier.classify(&err) {
                FaultClass::Transient => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    warn!(
                        image = %reference,
                        attempt = attempts,
                        remaining_secs = remaining.as_secs(),
                        error = %err,
                        "Retrying pull for image"
                    );
                    last_failure = Some(err);
                }
                FaultClass::Fatal => {
                    error!(
                        image = %reference,
                        attempt = attempts,
                        error = %err,
                        "Pull failed with non-retryable error"
                    );
                    return Err(ResolveError::Fetch {
                        reference: reference.canonical(),
                        source: err,
                    });
                }
            }
        }

        error!(
            image = %reference,
            attempts,
            last_failure = %describe_last_failure(&last_failure),
            "Failed to pull image. Please check output of `docker pull {}`",
            reference
        );

        Err(ResolveError::PullExhausted {
            reference: reference.canonical(),
            attempts,
            last_failure,
        })
    }

    /// One attempt: start the pull, drain its progress, re-inspect.
    ///
    /// The attempt never outlives `deadline`, and a stream that goes quiet for
    /// longer than the stall timeout is abandoned as interrupted.
    async fn pull_once(
        &self,
        reference: &ImageReference,
        deadline: Instant,
    ) -> Result<ImageMetadata, AttemptFailure> {
        let started = timeout_at(
            deadline,
            self.transport
                .pull(reference.unversioned(), reference.version_part()),
        )
        .await
        .map_err(|_| {
            AttemptFailure::OutOfTime(TransportError::interrupted(
                "pull retry budget ran out while starting the pull",
            ))
        })?;
        let mut progress = started.map_err(AttemptFailure::Failed)?;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let stall = self.config.pull_stall_timeout;

            match timeout(remaining.min(stall), progress.next()).await {
                Err(_) if remaining < stall => {
                    return Err(AttemptFailure::OutOfTime(TransportError::interrupted(
                        "pull retry budget ran out mid-pull",
                    )));
                }
                Err(_) => {
                    return Err(AttemptFailure::Failed(TransportError::interrupted(format!(
                        "no pull progress within {}ms",
                        stall.as_millis()
                    ))));
                }
                Ok(None) => break,
                Ok(Some(Ok(event))) => {
                    debug!(
                        image = %reference,
                        status = %event.status,
                        layer = event.id.as_deref().unwrap_or(""),
                        current = event.current,
                        total = event.total,
                        "Pull progress"
                    );
                }
                Ok(Some(Err(err))) => return Err(AttemptFailure::Failed(err)),
            }
        }

        timeout_at(deadline, self.transport.inspect(reference))
            .await
            .map_err(|_| {
                AttemptFailure::OutOfTime(TransportError::interrupted(
                    "pull retry budget ran out while inspecting the pulled image",
                ))
            })?
            .map_err(AttemptFailure::Failed)
    }
}
