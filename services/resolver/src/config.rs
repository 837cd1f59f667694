//! Configuration for the image resolver.

use std::time::Duration;

use anyhow::Result;

use crate::image::{PullPolicyKind, ResolverConfig};

/// Image resolver configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Docker daemon socket.
    pub docker_socket: String,

    /// Wall-clock budget for pulling one image, across all retries.
    pub pull_retry_budget: Duration,

    /// How long a pull may go without progress before it is retried.
    pub pull_stall_timeout: Duration,

    /// Pull policy applied when none is given explicitly.
    pub pull_policy: PullPolicyKind,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let resolver = ResolverConfig::default();
        Self {
            docker_socket: crate::image::DEFAULT_DOCKER_SOCKET.to_string(),
            pull_retry_budget: resolver.pull_retry_budget,
            pull_stall_timeout: resolver.pull_stall_timeout,
            pull_policy: PullPolicyKind::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let docker_socket = lookup("IMGRES_DOCKER_SOCKET").unwrap_or(defaults.docker_socket);

        let pull_retry_budget = lookup("IMGRES_PULL_RETRY_SECS")
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.pull_retry_budget);

        let pull_stall_timeout = lookup("IMGRES_PULL_STALL_SECS")
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.pull_stall_timeout);

        // A policy typo should not silently fall back to a different policy
        let pull_policy = match lookup("IMGRES_PULL_POLICY") {
            Some(s) => s.parse()?,
            None => defaults.pull_policy,
        };

        let log_level = lookup("IMGRES_LOG_LEVEL").unwrap_or(defaults.log_level);

        Ok(Self {
            docker_socket,
            pull_retry_budget,
            pull_stall_timeout,
            pull_policy,
            log_level,
        })
    }

    /// Resolver settings derived from this configuration.
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            pull_retry_budget: self.pull_retry_budget,
            pull_stall_timeout: self.pull_stall_timeout,
        }
    }
}
