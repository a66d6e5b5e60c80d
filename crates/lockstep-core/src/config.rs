use std::collections::BTreeMap;
use std::path::Path;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

pub const DEFAULT_CONFIG_PATH: &str = "lockstep.toml";
pub const DEFAULT_THREADS: usize = 4;
pub const DEFAULT_YIELD_POLL_MS: u64 = 100;
pub const DEFAULT_CLUSTER_WAIT_MS: u64 = 3_000;

/// Top-level config (lockstep.toml + LOCKSTEP_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockstepConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub lock: LockConfig,
    /// Job and group definitions keyed by name.
    #[serde(default)]
    pub jobs: BTreeMap<String, JobNodeConfig>,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Size of the bounded worker pool.
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Delay before a yielded group continuation runs again.
    #[serde(default = "default_yield_poll_ms")]
    pub yield_poll_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            yield_poll_ms: DEFAULT_YIELD_POLL_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Prefix for lock names, keeps applications sharing a cluster apart.
    pub namespace: Option<String>,
    /// Upper bound on waiting for a cluster lock; expiry means "not acquired".
    #[serde(default = "default_cluster_wait_ms")]
    pub cluster_wait_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            cluster_wait_ms: DEFAULT_CLUSTER_WAIT_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    #[default]
    Job,
    Group,
}

/// Raw job or group entry as written in config.
///
/// `depends_on` stays an `Option` so an omitted list (inherit) can be told
/// apart from an explicit `[]` (clear inherited dependencies).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobNodeConfig {
    #[serde(rename = "type", default)]
    pub node_type: NodeType,
    #[serde(default, deserialize_with = "scalar_map")]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub depends_on: Option<Vec<String>>,
    /// Children of a group, keyed by job or group name.
    #[serde(default)]
    pub jobs: BTreeMap<String, JobNodeConfig>,
}

/// A schedule bound to a job. Exactly one of `cron`, `fixed_delay_ms` and
/// `fixed_rate_ms` must be set; the scheduler validates this on start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub job: String,
    #[serde(default)]
    pub trigger: String,
    pub cron: Option<String>,
    pub fixed_delay_ms: Option<u64>,
    pub fixed_rate_ms: Option<u64>,
    pub initial_delay_ms: Option<u64>,
}

/// Accept numbers and booleans in `params` tables, keeping them as strings
/// for conversion through the job's parameter schema.
fn scalar_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(k, v)| match v {
            serde_json::Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect())
}

fn default_threads() -> usize {
    DEFAULT_THREADS
}

fn default_yield_poll_ms() -> u64 {
    DEFAULT_YIELD_POLL_MS
}

fn default_cluster_wait_ms() -> u64 {
    DEFAULT_CLUSTER_WAIT_MS
}

impl LockstepConfig {
    /// Load from a TOML file, then apply `LOCKSTEP_*` env overrides
    /// (`__` separates nested keys, e.g. `LOCKSTEP_SCHEDULER__THREADS=8`).
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path.unwrap_or(DEFAULT_CONFIG_PATH);
        if !Path::new(path).exists() {
            warn!(path, "config file not found, using defaults and environment");
        }

        let config: Self = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("LOCKSTEP_").split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;
        debug!(
            path,
            jobs = config.jobs.len(),
            triggers = config.triggers.len(),
            "config loaded"
        );
        Ok(config)
    }

    pub fn from_toml_str(toml: &str) -> crate::error::Result<Self> {
        Figment::from(Toml::string(toml))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))
    }
}
