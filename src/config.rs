//! Node Configuration
//!
//! Every tunable of a replica in one serde struct. Missing keys take the
//! component defaults, so an empty YAML file is a valid configuration.
//!
//! ```yaml
//! replicas: 3
//! renewal_window_secs: 3600
//! sweep_sample_size: 10
//! rewarm_top_n: 10
//! rewarm_interval_secs: 3600
//! sweep_interval_secs: 3600
//! submit_timeout_ms: 500
//! snapshot_threshold: 1024
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coordinator::{CoordinatorConfig, DEFAULT_REWARM_TOP_N};
use crate::error::{Error, Result};
use crate::replication::{ReplicationConfig, DEFAULT_SNAPSHOT_THRESHOLD, DEFAULT_SUBMIT_TIMEOUT};
use crate::scheduler::{SchedulerConfig, DEFAULT_REWARM_INTERVAL, DEFAULT_SWEEP_INTERVAL};
use crate::volatile::{VolatileConfig, DEFAULT_RENEWAL_WINDOW, DEFAULT_SWEEP_SAMPLE_SIZE};

/// Configuration for one process hosting one or more replicas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node identifier; generated when empty
    pub node_id: String,

    /// Replicas sharing the in-process log
    pub replicas: usize,

    /// Sliding TTL extension on read, in seconds
    pub renewal_window_secs: u64,

    /// Expiring keys inspected per sweep
    pub sweep_sample_size: usize,

    /// Students loaded into the cache by a rewarm
    pub rewarm_top_n: usize,

    /// Seconds between cache rewarms
    pub rewarm_interval_secs: u64,

    /// Seconds between volatile sweeps
    pub sweep_interval_secs: u64,

    /// Milliseconds a submit waits to be ordered
    pub submit_timeout_ms: u64,

    /// Retained log entries before compaction
    pub snapshot_threshold: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            replicas: 1,
            renewal_window_secs: DEFAULT_RENEWAL_WINDOW.as_secs(),
            sweep_sample_size: DEFAULT_SWEEP_SAMPLE_SIZE,
            rewarm_top_n: DEFAULT_REWARM_TOP_N,
            rewarm_interval_secs: DEFAULT_REWARM_INTERVAL.as_secs(),
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL.as_secs(),
            submit_timeout_ms: DEFAULT_SUBMIT_TIMEOUT.as_millis() as u64,
            snapshot_threshold: DEFAULT_SNAPSHOT_THRESHOLD,
        }
    }
}

impl NodeConfig {
    /// Load and validate a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: NodeConfig = if raw.trim().is_empty() {
            NodeConfig::default()
        } else {
            serde_yaml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Fill in a random node id when none was configured.
    pub fn ensure_node_id(&mut self) -> &str {
        if self.node_id.is_empty() {
            self.node_id = uuid::Uuid::new_v4().to_string();
        }
        &self.node_id
    }

    /// Reject values that would disable a component.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("replicas", self.replicas as u64),
            ("renewal_window_secs", self.renewal_window_secs),
            ("sweep_sample_size", self.sweep_sample_size as u64),
            ("rewarm_interval_secs", self.rewarm_interval_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("submit_timeout_ms", self.submit_timeout_ms),
            ("snapshot_threshold", self.snapshot_threshold as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than zero", name)));
            }
        }
        Ok(())
    }

    pub fn volatile(&self) -> VolatileConfig {
        VolatileConfig {
            renewal_window: Duration::from_secs(self.renewal_window_secs),
            sweep_sample_size: self.sweep_sample_size,
        }
    }

    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            rewarm_top_n: self.rewarm_top_n,
        }
    }

    pub fn replication(&self) -> ReplicationConfig {
        ReplicationConfig {
            submit_timeout: Duration::from_millis(self.submit_timeout_ms),
            snapshot_threshold: self.snapshot_threshold,
        }
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            rewarm_interval: Duration::from_secs(self.rewarm_interval_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }
}
