//! Pipeline configuration loaded from environment variables.

use std::time::Duration;

use store::IsolationLevel;

/// When events drained during a flush reach their handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishPolicy {
    /// Handlers run inside the flush, before the transaction commits.
    ///
    /// A failing handler rolls the request back, but side effects performed
    /// by handlers that already ran are not undone.
    #[default]
    BeforeCommit,

    /// Events are held on the ambient transaction and delivered once it has
    /// committed. A failing handler no longer rolls anything back.
    AfterCommit,
}

impl std::str::FromStr for PublishPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "beforecommit" => Ok(PublishPolicy::BeforeCommit),
            "aftercommit" => Ok(PublishPolicy::AfterCommit),
            other => Err(format!("unknown publish policy: {other}")),
        }
    }
}

/// Pipeline configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `PIPELINE_TRANSACTION_TIMEOUT_SECS` (default: `30`)
/// - `PIPELINE_ISOLATION_LEVEL` (default: `read_committed`)
/// - `PIPELINE_PUBLISH_POLICY` (default: `before_commit`)
/// - `PIPELINE_MAX_NESTING_DEPTH` (default: `8`)
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub transaction_timeout: Duration,
    pub isolation: IsolationLevel,
    pub publish_policy: PublishPolicy,
    pub max_nesting_depth: usize,
}

impl PipelineConfig {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
    pub const DEFAULT_MAX_NESTING_DEPTH: usize = 8;

    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            transaction_timeout: Duration::from_secs(
                lookup("PIPELINE_TRANSACTION_TIMEOUT_SECS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(Self::DEFAULT_TIMEOUT_SECS),
            ),
            isolation: lookup("PIPELINE_ISOLATION_LEVEL")
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            publish_policy: lookup("PIPELINE_PUBLISH_POLICY")
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            max_nesting_depth: lookup("PIPELINE_MAX_NESTING_DEPTH")
                .and_then(|v| v.parse().ok())
                .unwrap_or(Self::DEFAULT_MAX_NESTING_DEPTH),
        }
    }

    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_publish_policy(mut self, policy: PublishPolicy) -> Self {
        self.publish_policy = policy;
        self
    }

    pub fn with_max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            transaction_timeout: Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
            isolation: IsolationLevel::ReadCommitted,
            publish_policy: PublishPolicy::BeforeCommit,
            max_nesting_depth: Self::DEFAULT_MAX_NESTING_DEPTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.transaction_timeout, Duration::from_secs(30));
        assert_eq!(config.isolation, IsolationLevel::ReadCommitted);
        assert_eq!(config.publish_policy, PublishPolicy::BeforeCommit);
        assert_eq!(config.max_nesting_depth, 8);
    }

    #[test]
    fn test_values_from_environment() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("PIPELINE_TRANSACTION_TIMEOUT_SECS", "5"),
            ("PIPELINE_ISOLATION_LEVEL", "serializable"),
            ("PIPELINE_PUBLISH_POLICY", "after-commit"),
            ("PIPELINE_MAX_NESTING_DEPTH", "3"),
        ]));

        assert_eq!(config.transaction_timeout, Duration::from_secs(5));
        assert_eq!(config.isolation, IsolationLevel::Serializable);
        assert_eq!(config.publish_policy, PublishPolicy::AfterCommit);
        assert_eq!(config.max_nesting_depth, 3);
    }

    #[test]
    fn test_unparsable_values_fall_back_to_defaults() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("PIPELINE_TRANSACTION_TIMEOUT_SECS", "soon"),
            ("PIPELINE_ISOLATION_LEVEL", "snapshot"),
            ("PIPELINE_PUBLISH_POLICY", "whenever"),
        ]));

        assert_eq!(config.transaction_timeout, Duration::from_secs(30));
        assert_eq!(config.isolation, IsolationLevel::ReadCommitted);
        assert_eq!(config.publish_policy, PublishPolicy::BeforeCommit);
    }

    #[test]
    fn test_builder_methods() {
        let config = PipelineConfig::default()
            .with_transaction_timeout(Duration::from_millis(250))
            .with_publish_policy(PublishPolicy::AfterCommit)
            .with_max_nesting_depth(2);

        assert_eq!(config.transaction_timeout, Duration::from_millis(250));
        assert_eq!(config.publish_policy, PublishPolicy::AfterCommit);
        assert_eq!(config.max_nesting_depth, 2);
    }
}
