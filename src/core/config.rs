use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::errors::{FlowError, Result};

/// Configuration for flow execution behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Reject graphs with dependency cycles before any node runs
    #[serde(default = "default_validate_acyclic")]
    pub validate_acyclic: bool,
    /// Per-node timeout for a behavior invocation (None = no timeout)
    #[serde(default)]
    pub node_timeout_secs: Option<u64>,
    /// Maximum behaviors running at once (None = unbounded)
    #[serde(default)]
    pub max_concurrent_behaviors: Option<usize>,
}

fn default_validate_acyclic() -> bool {
    true
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            validate_acyclic: true,
            node_timeout_secs: None,
            max_concurrent_behaviors: None,
        }
    }
}

impl FlowConfig {
    /// Validates configuration values
    pub fn validate(&self) -> Result<()> {
        if let Some(timeout) = self.node_timeout_secs {
            if timeout == 0 {
                return Err(FlowError::configuration_field(
                    "node_timeout_secs must be greater than 0",
                    "node_timeout_secs",
                ));
            }
            if timeout > 86400 {
                return Err(FlowError::configuration_field(
                    "node_timeout_secs cannot exceed 24 hours",
                    "node_timeout_secs",
                ));
            }
        }

        if self.max_concurrent_behaviors == Some(0) {
            return Err(FlowError::configuration_field(
                "max_concurrent_behaviors must be greater than 0",
                "max_concurrent_behaviors",
            ));
        }

        Ok(())
    }

    /// Merges two configurations, with override_with taking precedence
    pub fn merge(base: &Self, override_with: &Self) -> Result<Self> {
        let merged = Self {
            validate_acyclic: override_with.validate_acyclic,
            node_timeout_secs: override_with.node_timeout_secs.or(base.node_timeout_secs),
            max_concurrent_behaviors: override_with
                .max_concurrent_behaviors
                .or(base.max_concurrent_behaviors),
        };

        merged.validate()?;
        Ok(merged)
    }

    /// Load configuration from a YAML or JSON file, chosen by extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| FlowError::io(format!("read config {}", path.display()), e))?;

        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&raw)?,
            _ => serde_yaml::from_str(&raw)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `NODEFLOW_*` environment variables.
    ///
    /// - `NODEFLOW_VALIDATE_ACYCLIC`: `true` / `false`
    /// - `NODEFLOW_NODE_TIMEOUT_SECS`: per-node timeout in seconds
    /// - `NODEFLOW_MAX_CONCURRENT_BEHAVIORS`: behavior concurrency limit
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(raw) = std::env::var("NODEFLOW_VALIDATE_ACYCLIC") {
            self.validate_acyclic = parse_env("NODEFLOW_VALIDATE_ACYCLIC", &raw)?;
        }
        if let Ok(raw) = std::env::var("NODEFLOW_NODE_TIMEOUT_SECS") {
            self.node_timeout_secs = Some(parse_env("NODEFLOW_NODE_TIMEOUT_SECS", &raw)?);
        }
        if let Ok(raw) = std::env::var("NODEFLOW_MAX_CONCURRENT_BEHAVIORS") {
            self.max_concurrent_behaviors =
                Some(parse_env("NODEFLOW_MAX_CONCURRENT_BEHAVIORS", &raw)?);
        }

        self.validate()?;
        Ok(self)
    }

    pub fn node_timeout(&self) -> Option<Duration> {
        self.node_timeout_secs.map(Duration::from_secs)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        FlowError::configuration_field(format!("cannot parse {}='{}'", name, raw), name)
    })
}
