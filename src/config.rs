use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fjall::TransactionalKeyspace;
use serde::Deserialize;

#[derive(Clone, Default, Debug, Deserialize)]
#[serde(default)]
pub(crate) struct Config {
    pub(crate) inbox: InboxConfig,
    pub(crate) storage: StorageConfig,
    pub(crate) worker: WorkerConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub(crate) struct InboxConfig {
    /// Public origin of this instance, e.g. `https://kiosk.example`
    pub(crate) base_url: String,
    /// Domains whose actors and objects are never processed. Subdomains are
    /// banned along with their parent.
    pub(crate) banned_instances: Vec<String>,
    /// Local catch-all magazine. Follows are rejected and new content is
    /// never re-announced.
    pub(crate) random_magazine: String,
    pub(crate) origin_refresh_cooldown_secs: u64,
    pub(crate) key_refresh_cooldown_secs: u64,
    pub(crate) max_chain_depth: usize,
    pub(crate) report_patterns: ReportPatterns,
}

/// Path shapes of local content URLs. Each pattern must have a named `id`
/// capture holding the entity key.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub(crate) struct ReportPatterns {
    pub(crate) entry: String,
    pub(crate) entry_comment: String,
    pub(crate) post: String,
    pub(crate) post_comment: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub(crate) struct StorageConfig {
    pub(crate) data_dir: PathBuf,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub(crate) struct WorkerConfig {
    pub(crate) concurrency: usize,
    pub(crate) visibility_timeout_secs: u64,
    pub(crate) max_attempts: u64,
    pub(crate) idle_poll_ms: u64,
    pub(crate) fetch_timeout_secs: u64,
}

#[derive(Clone)]
pub(crate) struct RuntimeConfig {
    pub(crate) init: Config,
    pub(crate) keyspace: TransactionalKeyspace,
}

impl Config {
    pub(crate) fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        toml::from_str(&text).context("unable to parse config file")
    }
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            banned_instances: vec![],
            random_magazine: "random".to_string(),
            origin_refresh_cooldown_secs: 3 * 60 * 60,
            key_refresh_cooldown_secs: 5 * 60,
            max_chain_depth: 32,
            report_patterns: ReportPatterns::default(),
        }
    }
}

impl Default for ReportPatterns {
    fn default() -> Self {
        Self {
            entry: r"^/m/[^/]+/t/(?P<id>[0-9a-f]{32})(/[^/]*)?$".to_string(),
            entry_comment: r"^/m/[^/]+/t/[0-9a-f]{32}(/[^/]*)?/comment/(?P<id>[0-9a-f]{32})$"
                .to_string(),
            post: r"^/m/[^/]+/p/(?P<id>[0-9a-f]{32})(/[^/]*)?$".to_string(),
            post_comment: r"^/m/[^/]+/p/[0-9a-f]{32}(/[^/]*)?/reply/(?P<id>[0-9a-f]{32})$"
                .to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            visibility_timeout_secs: 60,
            max_attempts: 8,
            idle_poll_ms: 1000,
            fetch_timeout_secs: 10,
        }
    }
}
