use std::time::Duration;

use clap::{Parser, ValueEnum};
use eosin_common::args::PostgresArgs;

/// Startup decision rule for whether a full resync runs before watches
/// start (spec §4.7, §6 `SYNC_ON_STARTUP`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
#[value(rename_all = "lowercase")]
pub enum SyncOnStartup {
    #[default]
    Auto,
    Always,
    Never,
}

/// Every environment/flag this crate recognizes (spec §6 "Configuration
/// surface"), plus the connection parameters for the document store, the
/// sync-state store, and the Kubernetes client.
#[derive(Parser, Debug, Clone)]
pub struct SyncConfig {
    #[arg(long, env = "SYNC_ON_STARTUP", value_enum, default_value_t = SyncOnStartup::Auto)]
    pub sync_on_startup: SyncOnStartup,

    #[arg(long, env = "AUTO_SYNC_ON_INFORMER_FAILURE", default_value_t = true)]
    pub auto_sync_on_informer_failure: bool,

    #[arg(long, env = "PERIODIC_SYNC_INTERVAL_HOURS", default_value_t = 0)]
    pub periodic_sync_interval_hours: u64,

    #[arg(long, env = "DATA_STALE_THRESHOLD_SECONDS", default_value_t = 86_400)]
    pub data_stale_threshold_seconds: u64,

    #[arg(long, env = "SYNC_MAX_CONCURRENT_RESOURCES", default_value_t = 3)]
    pub sync_max_concurrent_resources: usize,

    #[arg(long, env = "ENABLE_CONCURRENT_SYNC", default_value_t = true)]
    pub enable_concurrent_sync: bool,

    #[arg(long, env = "BULK_WRITE_BATCH_SIZE", default_value_t = 100)]
    pub bulk_write_batch_size: usize,

    #[arg(long, env = "BULK_WRITE_BATCH_DELAY_MS", default_value_t = 100)]
    pub bulk_write_batch_delay_ms: u64,

    #[arg(long, env = "ENABLE_CHUNKED_BULK_WRITE", default_value_t = true)]
    pub enable_chunked_bulk_write: bool,

    #[arg(long, env = "RETRY_MAX_ATTEMPTS", default_value_t = 5)]
    pub retry_max_attempts: u32,

    #[arg(long, env = "RETRY_INITIAL_DELAY_MS", default_value_t = 1_000)]
    pub retry_initial_delay_ms: u64,

    #[arg(long, env = "RETRY_MAX_DELAY_MS", default_value_t = 30_000)]
    pub retry_max_delay_ms: u64,

    #[arg(long, env = "RETRY_BACKOFF_MULTIPLIER", default_value_t = 2.0)]
    pub retry_backoff_multiplier: f64,

    #[arg(long, env = "K8S_REQUEST_TIMEOUT_MS", default_value_t = 30_000)]
    pub k8s_request_timeout_ms: u64,

    #[arg(long, env = "K8S_LARGE_RESOURCE_TIMEOUT_MS", default_value_t = 120_000)]
    pub k8s_large_resource_timeout_ms: u64,

    #[arg(long, env = "K8S_WATCH_TIMEOUT_MS", default_value_t = 60_000)]
    pub k8s_watch_timeout_ms: u64,

    #[arg(long, env = "ENABLE_K8S_WATCH_RECONNECT", default_value_t = true)]
    pub enable_k8s_watch_reconnect: bool,

    /// Event Apply Pipeline's bound on in-flight Store operations (spec §4.6).
    #[arg(long, env = "EVENT_APPLY_CONCURRENCY", default_value_t = 10)]
    pub event_apply_concurrency: usize,

    /// Pause between drained batches in the Event Apply Pipeline.
    #[arg(long, env = "EVENT_APPLY_BATCH_DELAY_MS", default_value_t = 10)]
    pub event_apply_batch_delay_ms: u64,

    /// How long to wait for the pipeline to drain on shutdown.
    #[arg(long, env = "EVENT_APPLY_DRAIN_TIMEOUT_SECONDS", default_value_t = 30)]
    pub event_apply_drain_timeout_seconds: u64,

    #[arg(long, env = "MONGO_URI", default_value = "mongodb://localhost:27017")]
    pub mongo_uri: String,

    #[arg(long, env = "MONGO_DATABASE", default_value = "k8s_mirror")]
    pub mongo_database: String,

    #[clap(flatten)]
    pub sync_state_postgres: PostgresArgs,

    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<String>,

    #[arg(long, env = "STATUS_PORT", default_value_t = 8080)]
    pub status_port: u16,
}

impl SyncConfig {
    pub fn backoff_policy(&self) -> crate::backoff::BackoffPolicy {
        crate::backoff::BackoffPolicy {
            initial: Duration::from_millis(self.retry_initial_delay_ms),
            max: Duration::from_millis(self.retry_max_delay_ms),
            multiplier: self.retry_backoff_multiplier,
            max_attempts: self.retry_max_attempts,
        }
    }

    pub fn bulk_write_config(&self) -> crate::store::BulkWriteConfig {
        crate::store::BulkWriteConfig {
            chunk_size: if self.enable_chunked_bulk_write {
                self.bulk_write_batch_size
            } else {
                usize::MAX
            },
            inter_chunk_delay: Duration::from_millis(self.bulk_write_batch_delay_ms),
        }
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.data_stale_threshold_seconds)
    }

    pub fn periodic_sync_interval(&self) -> Option<Duration> {
        if self.periodic_sync_interval_hours == 0 {
            None
        } else {
            Some(Duration::from_secs(self.periodic_sync_interval_hours * 3_600))
        }
    }

    pub fn request_timeout(&self, class: crate::registry::TimeoutClass) -> Duration {
        match class {
            crate::registry::TimeoutClass::Normal => {
                Duration::from_millis(self.k8s_request_timeout_ms)
            }
            crate::registry::TimeoutClass::Extended => {
                Duration::from_millis(self.k8s_large_resource_timeout_ms)
            }
        }
    }

    pub fn watch_timeout(&self) -> Duration {
        Duration::from_millis(self.k8s_watch_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn defaults_match_spec() {
        let cfg = SyncConfig::parse_from(["sync-core"]);
        assert_eq!(cfg.sync_on_startup, SyncOnStartup::Auto);
        assert!(cfg.auto_sync_on_informer_failure);
        assert_eq!(cfg.periodic_sync_interval_hours, 0);
        assert_eq!(cfg.data_stale_threshold_seconds, 86_400);
        assert_eq!(cfg.sync_max_concurrent_resources, 3);
        assert!(cfg.enable_concurrent_sync);
        assert_eq!(cfg.bulk_write_batch_size, 100);
        assert_eq!(cfg.bulk_write_batch_delay_ms, 100);
        assert_eq!(cfg.retry_max_attempts, 5);
        assert_eq!(cfg.retry_initial_delay_ms, 1_000);
        assert_eq!(cfg.retry_max_delay_ms, 30_000);
        assert_eq!(cfg.event_apply_concurrency, 10);
        assert!(cfg.periodic_sync_interval().is_none());
    }

    #[test]
    fn cli_definition_is_well_formed() {
        SyncConfig::command().debug_assert();
    }
}
