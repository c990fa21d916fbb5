//! Tailer configuration and the fluent builder over it.
//!
//! # Example
//!
//! ```rust,no_run
//! use evmindex_tailer::{CheckpointPolicy, TailerBuilder};
//!
//! let config = TailerBuilder::new()
//!     .idle_timeout_ms(2_000)
//!     .fetch_timeout_ms(5_000)
//!     .checkpoint_policy(CheckpointPolicy::AdvanceAlways)
//!     .build_config();
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use evmindex_core::EvmTxIndexer;

use crate::client::ChainClient;
use crate::tailer::LiveTailer;

/// What happens to the tailer's checkpoint when a height fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckpointPolicy {
    /// Advance only after a height is indexed; a failed height is retried.
    #[default]
    AdvanceOnSuccess,
    /// Advance past every attempted height, failed or not. Failed heights are
    /// logged and left for the catch-up command.
    AdvanceAlways,
}

impl std::fmt::Display for CheckpointPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AdvanceOnSuccess => write!(f, "advance-on-success"),
            Self::AdvanceAlways => write!(f, "advance-always"),
        }
    }
}

impl std::str::FromStr for CheckpointPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "advance-on-success" => Ok(Self::AdvanceOnSuccess),
            "advance-always" => Ok(Self::AdvanceAlways),
            other => Err(format!(
                "unknown checkpoint policy '{other}', expected advance-on-success or advance-always"
            )),
        }
    }
}

/// Configuration for a [`LiveTailer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TailerConfig {
    /// How long to wait idle for a new-header notification before
    /// re-querying chain status (milliseconds). Also the delay before a
    /// failed height is retried.
    pub idle_timeout_ms: u64,
    /// Upper bound on each status, block and block-results fetch (milliseconds).
    pub fetch_timeout_ms: u64,
    pub checkpoint_policy: CheckpointPolicy,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 5_000,
            fetch_timeout_ms: 10_000,
            checkpoint_policy: CheckpointPolicy::AdvanceOnSuccess,
        }
    }
}

impl TailerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Fluent builder for `TailerConfig` and [`LiveTailer`].
#[derive(Default)]
pub struct TailerBuilder {
    config: TailerConfig,
}

impl TailerBuilder {
    pub fn new() -> Self {
        Self {
            config: TailerConfig::default(),
        }
    }

    /// Set the idle wait before chain status is re-queried.
    pub fn idle_timeout_ms(mut self, ms: u64) -> Self {
        self.config.idle_timeout_ms = ms;
        self
    }

    /// Set the per-request fetch timeout.
    pub fn fetch_timeout_ms(mut self, ms: u64) -> Self {
        self.config.fetch_timeout_ms = ms;
        self
    }

    /// Set how the checkpoint moves past failed heights.
    pub fn checkpoint_policy(mut self, policy: CheckpointPolicy) -> Self {
        self.config.checkpoint_policy = policy;
        self
    }

    /// Build the `TailerConfig`.
    pub fn build_config(self) -> TailerConfig {
        self.config
    }

    /// Build a tailer over `client` writing into `indexer`.
    pub fn build<C: ChainClient + 'static>(
        self,
        client: Arc<C>,
        indexer: Arc<EvmTxIndexer>,
    ) -> LiveTailer<C> {
        LiveTailer::new(self.config, client, indexer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let cfg = TailerBuilder::new().build_config();
        assert_eq!(cfg.idle_timeout_ms, 5_000);
        assert_eq!(cfg.fetch_timeout_ms, 10_000);
        assert_eq!(cfg.checkpoint_policy, CheckpointPolicy::AdvanceOnSuccess);
    }

    #[test]
    fn builder_custom() {
        let cfg = TailerBuilder::new()
            .idle_timeout_ms(100)
            .fetch_timeout_ms(250)
            .checkpoint_policy(CheckpointPolicy::AdvanceAlways)
            .build_config();

        assert_eq!(cfg.idle_timeout(), Duration::from_millis(100));
        assert_eq!(cfg.fetch_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.checkpoint_policy, CheckpointPolicy::AdvanceAlways);
    }

    #[test]
    fn config_fills_missing_fields_with_defaults() {
        let cfg: TailerConfig =
            serde_json::from_str(r#"{"checkpoint_policy":"advance-always"}"#).unwrap();
        assert_eq!(cfg.checkpoint_policy, CheckpointPolicy::AdvanceAlways);
        assert_eq!(cfg.idle_timeout_ms, 5_000);
    }

    #[test]
    fn policy_parses_from_cli_form() {
        assert_eq!(
            "advance-on-success".parse::<CheckpointPolicy>().unwrap(),
            CheckpointPolicy::AdvanceOnSuccess
        );
        assert!("sometimes".parse::<CheckpointPolicy>().is_err());
        assert_eq!(CheckpointPolicy::AdvanceAlways.to_string(), "advance-always");
    }
}
