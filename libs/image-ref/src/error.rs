//! Error types for image reference parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating an image reference.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    /// The reference string is empty.
    #[error("image reference cannot be empty")]
    Empty,

    /// The reference contains whitespace or control characters.
    #[error("image reference '{0}' contains whitespace")]
    Whitespace(String),

    /// The registry host portion is malformed.
    #[error("invalid registry in '{reference}': {reason}")]
    InvalidRegistry { reference: String, reason: String },

    /// A repository path component is malformed.
    #[error("invalid repository in '{reference}': {reason}")]
    InvalidRepository { reference: String, reason: String },

    /// The tag is malformed.
    #[error("invalid tag '{0}'")]
    InvalidTag(String),

    /// The digest is malformed.
    #[error("invalid digest '{0}': expected <algorithm>:<hex>")]
    InvalidDigest(String),
}

