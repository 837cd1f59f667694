//! Image resolution against the local image store.
//!
//! This module handles:
//! - Tracking which images are known to be available locally
//! - Deciding, per request, whether a local image is fresh enough
//! - Pulling missing or stale images with a bounded retry budget
//! - Talking to the Docker Engine over its Unix socket
//!
//! ## Flow
//!
//! ```text
//! resolve(ref, policy)
//!   ├── availability cache hit      -> done
//!   ├── inspect local store         -> cache insert if present
//!   ├── policy.should_pull(meta)?   -> done if not
//!   └── pull with retry + inspect   -> cache insert, done
//! ```

mod cache;
mod docker;
mod metadata;
mod policy;
mod resolver;
mod transport;

pub use cache::{CacheStatsSnapshot, ImageAvailabilityCache};
pub use docker::{DockerEngineTransport, DEFAULT_DOCKER_SOCKET};
pub use metadata::ImageMetadata;
pub use policy::{AlwaysPull, IfAbsent, InvalidPullPolicy, MaxAge, PullPolicy, PullPolicyKind};
pub use resolver::{ImageResolver, ResolveError, ResolverConfig};
pub use transport::{
    DefaultFaultClassifier, FaultClass, FaultClassifier, ImageTransport, PullProgress,
    PullStream, TransportError, TransportErrorKind,
};
