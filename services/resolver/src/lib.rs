//! imgres Image Resolver Library
//!
//! Resolves symbolic container image references to images available in the
//! local image store, pulling them only when a caller-supplied pull policy
//! says the local copy is missing or stale.
//!
//! ## Architecture
//!
//! ```text
//! ImageResolver
//! ├── ImageAvailabilityCache   (images seen present in this process)
//! ├── PullPolicy               (per-request freshness decision)
//! ├── FaultClassifier          (transient vs fatal failures)
//! └── ImageTransport           (inspect + pull; Docker Engine in production)
//! ```
//!
//! ## Modules
//!
//! - `config`: environment-driven configuration
//! - `image`: resolution, caching, policies and the Docker transport

pub mod config;
pub mod image;

// Re-export commonly used types
pub use image::{
    ImageAvailabilityCache, ImageMetadata, ImageResolver, ImageTransport, PullPolicy,
    PullPolicyKind, ResolveError, ResolverConfig,
};
pub use imgres_ref::{ImageReference, ReferenceError};
