//! Pull policies: decide whether a locally known image must be re-pulled.
//!
//! Policies only look at the metadata snapshot they are handed. They never
//! query the local store or a registry themselves.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::metadata::ImageMetadata;

/// Decides whether an image must be pulled given what the local store knows.
pub trait PullPolicy: Send + Sync + fmt::Debug {
    /// `metadata` is `None` when the local store does not have the image.
    fn should_pull(&self, metadata: Option<&ImageMetadata>) -> bool;
}

/// Always pull, even if the image is present locally.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysPull;

impl PullPolicy for AlwaysPull {
    fn should_pull(&self, _metadata: Option<&ImageMetadata>) -> bool {
        true
    }
}

/// Pull only when the image is absent locally. This is the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct IfAbsent;

impl PullPolicy for IfAbsent {
    fn should_pull(&self, metadata: Option<&ImageMetadata>) -> bool {
        metadata.is_none()
    }
}

/// Pull when the local image was created longer ago than `max_age`.
#[derive(Debug, Clone, Copy)]
pub struct MaxAge {
    max_age: Duration,
}

impl MaxAge {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Same as [`PullPolicy::should_pull`] with an explicit clock.
    pub fn should_pull_at(&self, metadata: Option<&ImageMetadata>, now: DateTime<Utc>) -> bool {
        match metadata {
            None => true,
            // A negative age (clock skew) can't exceed the threshold.
            Some(metadata) => match metadata.age_at(now).to_std() {
                Ok(age) => age > self.max_age,
                Err(_) => false,
            },
        }
    }
}

impl PullPolicy for MaxAge {
    fn should_pull(&self, metadata: Option<&ImageMetadata>) -> bool {
        self.should_pull_at(metadata, Utc::now())
    }
}

/// Error returned when a pull policy string cannot be parsed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid pull policy '{0}': expected 'always', 'if-absent' or 'max-age:<seconds>'")]
pub struct InvalidPullPolicy(pub String);

/// The built-in policies, selectable from configuration or the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullPolicyKind {
    Always,
    #[default]
    IfAbsent,
    MaxAge(Duration),
}

impl PullPolicy for PullPolicyKind {
    fn should_pull(&self, metadata: Option<&ImageMetadata>) -> bool {
        match self {
            PullPolicyKind::Always => AlwaysPull.should_pull(metadata),
            PullPolicyKind::IfAbsent => IfAbsent.should_pull(metadata),
            PullPolicyKind::MaxAge(max_age) => MaxAge::new(*max_age).should_pull(metadata),
        }
    }
}

impl FromStr for PullPolicyKind {
    type Err = InvalidPullPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "always" => Ok(PullPolicyKind::Always),
            "if-absent" | "default" => Ok(PullPolicyKind::IfAbsent),
            other => other
                .strip_prefix("max-age:")
                .and_then(|secs| secs.parse::<u64>().ok())
                .map(|secs| PullPolicyKind::MaxAge(Duration::from_secs(secs)))
                .ok_or_else(|| InvalidPullPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for PullPolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PullPolicyKind::Always => write!(f, "always"),
            PullPolicyKind::IfAbsent => write!(f, "if-absent"),
            PullPolicyKind::MaxAge(max_age) => write!(f, "max-age:{}", max_age.as_secs()),
        }
    }
}
