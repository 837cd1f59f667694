//! The local image store / registry client as seen by the resolver.
//!
//! The resolver only needs two operations, inspect and pull, plus a way to
//! tell transient failures from fatal ones. Failures carry an explicit
//! [`TransportErrorKind`] so classification is a pure mapping rather than a
//! matter of which concrete error type was raised.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use imgres_ref::ImageReference;
use thiserror::Error;

use super::metadata::ImageMetadata;

/// What went wrong talking to the image store or registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The image (or repository) does not exist.
    NotFound,
    /// The operation was cut short: connection dropped, stream stalled,
    /// or the caller's wait was interrupted.
    Interrupted,
    /// The daemon or registry reported an internal/server-side error.
    ServerError,
    /// Credentials were missing or rejected.
    Unauthorized,
    /// The request itself was rejected as malformed.
    ClientConfig,
    /// No daemon is listening where we expected one.
    DaemonUnavailable,
    /// The pull reported a failure in its progress stream.
    PullFailed,
    /// Anything else, such as an undecodable response.
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportErrorKind::NotFound => "not found",
            TransportErrorKind::Interrupted => "interrupted",
            TransportErrorKind::ServerError => "server error",
            TransportErrorKind::Unauthorized => "unauthorized",
            TransportErrorKind::ClientConfig => "client configuration error",
            TransportErrorKind::DaemonUnavailable => "daemon unavailable",
            TransportErrorKind::PullFailed => "pull failed",
            TransportErrorKind::Other => "transport error",
        };
        f.write_str(s)
    }
}

/// A classified failure from the transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::NotFound, message)
    }

    pub fn interrupted(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Interrupted, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::ServerError, message)
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if the store reported the image as missing.
    pub fn is_not_found(&self) -> bool {
        self.kind == TransportErrorKind::NotFound
    }
}

/// One progress event from a pull.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PullProgress {
    /// Human-readable status, e.g. "Downloading" or "Pull complete".
    pub status: String,
    /// Layer id the event refers to, if any.
    pub id: Option<String>,
    pub current: Option<u64>,
    pub total: Option<u64>,
}

impl PullProgress {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Default::default()
        }
    }
}

/// Progress events of an in-flight pull. The pull has succeeded once the
/// stream ends without yielding an error.
pub type PullStream = Pin<Box<dyn Stream<Item = Result<PullProgress, TransportError>> + Send>>;

/// Client for the local image store and its registry pulls.
///
/// Implementations must be safe to share across concurrent resolutions.
#[async_trait]
pub trait ImageTransport: Send + Sync {
    /// Inspect an image in the local store.
    ///
    /// Returns an error of kind [`TransportErrorKind::NotFound`] if the store
    /// does not have it.
    async fn inspect(&self, reference: &ImageReference) -> Result<ImageMetadata, TransportError>;

    /// Start pulling `repository` at `tag_or_digest` into the local store.
    async fn pull(&self, repository: &str, tag_or_digest: &str)
        -> Result<PullStream, TransportError>;
}

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    Transient,
    Fatal,
}

/// Maps transport failures to [`FaultClass`].
pub trait FaultClassifier: Send + Sync {
    fn classify(&self, error: &TransportError) -> FaultClass;
}

/// Interruptions and server-side errors are transient; everything else,
/// including a missing image or daemon, is fatal.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFaultClassifier;

impl FaultClassifier for DefaultFaultClassifier {
    fn classify(&self, error: &TransportError) -> FaultClass {
        match error.kind() {
            TransportErrorKind::Interrupted | TransportErrorKind::ServerError => {
                FaultClass::Transient
            }
            TransportErrorKind::NotFound
            | TransportErrorKind::Unauthorized
            | TransportErrorKind::ClientConfig
            | TransportErrorKind::DaemonUnavailable
            | TransportErrorKind::PullFailed
            | TransportErrorKind::Other => FaultClass::Fatal,
        }
    }
}
