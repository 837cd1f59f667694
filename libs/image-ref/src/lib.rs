//! # imgres-ref
//!
//! Container image reference parsing and normalization.
//!
//! ## Reference Format
//!
//! A reference is written `repository[:tag][@digest]`, where the repository
//! may be prefixed with a registry host (and port):
//!
//! - `redis` -> repository `redis`, tag `latest`
//! - `library/redis:7` -> repository `library/redis`, tag `7`
//! - `localhost:5000/app:test` -> repository `localhost:5000/app`, tag `test`
//! - `ghcr.io/org/app@sha256:...` -> repository `ghcr.io/org/app`, digest
//!
//! Registry hosts are never inferred: `library/redis:7` stays exactly that.
//! The canonical string form is what callers get back from resolution and
//! what equality and hashing are defined over.

mod error;
mod reference;

pub use error::ReferenceError;
pub use reference::{ImageReference, Version, DEFAULT_TAG};
