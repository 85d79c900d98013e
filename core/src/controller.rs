use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{SyncConfig, SyncOnStartup};
use crate::error::Result;
use crate::full_sync::{self, FullSyncOutcome, FullSyncPhase, ProgressCallback};
use crate::k8s;
use crate::kinds;
use crate::pipeline::EventApplyPipeline;
use crate::progress::SyncProgress;
use crate::registry::Registry;
use crate::status::{self, StatusState};
use crate::store::{MongoStore, Store};
use crate::sync_state::{self, PostgresSyncStateLog, SyncStateLog};
use crate::watch::{ResyncFn, WatchEngine};

/// Ties every component together into the startup/shutdown sequence (spec
/// §4.7, §4.8). Owned by `main`; `run` blocks until shutdown completes.
pub struct Controller {
    cancel: CancellationToken,
    ready: Arc<AtomicBool>,
    watch_handles: Vec<JoinHandle<()>>,
    periodic_handle: Option<JoinHandle<()>>,
    status_handle: JoinHandle<std::io::Result<()>>,
    pipeline: Arc<EventApplyPipeline>,
    drain_timeout: std::time::Duration,
}

/// Wraps a `SyncProgress` into the `ProgressCallback` contract the Full Sync
/// Engine invokes mid-kind (spec §4.7 step 4).
fn progress_callback(progress: Arc<SyncProgress>) -> ProgressCallback {
    Arc::new(move |event| {
        if event.phase != FullSyncPhase::Done {
            progress.report_kind_progress(&event.kind, event.items_seen);
        }
    })
}

fn record_outcomes(progress: &SyncProgress, outcomes: &[FullSyncOutcome]) {
    for outcome in outcomes {
        progress.finish_kind(&outcome.kind, outcome.count, outcome.error.as_deref());
    }
}

impl Controller {
    /// Runs the full startup sequence: build registry, connect Store, purge
    /// invalid records, consult the Sync State Log plus the startup
    /// decision rule, run whatever full syncs are needed, start watches
    /// from their cursors, flip readiness, and schedule periodic resync.
    pub async fn start(config: SyncConfig) -> Result<Self> {
        let config = Arc::new(config);
        crate::metrics::install();

        let progress = Arc::new(SyncProgress::new());

        let registry = Arc::new(Registry::build(kinds::default_descriptors())?);
        let client = k8s::build_client(config.kubeconfig.as_deref()).await?;

        let store: Arc<dyn Store> =
            Arc::new(MongoStore::connect(&config.mongo_uri, &config.mongo_database).await?);
        for descriptor in registry.all() {
            store
                .ensure_indexes(descriptor.store_binding, descriptor.namespaced)
                .await?;
            store.delete_where_invalid(descriptor.store_binding).await?;
        }

        let pg_pool = sync_state::pool_from_args(&config.sync_state_postgres)?;
        let pg_log = PostgresSyncStateLog::new(pg_pool);
        pg_log.init_schema().await?;
        let sync_state: Arc<dyn SyncStateLog> = Arc::new(pg_log);

        let backoff = config.backoff_policy();
        let bulk_write = config.bulk_write_config();

        let entries = sync_state.get_all().await.unwrap_or_default();
        let now = Utc::now();
        let threshold = config.staleness_threshold();
        let to_sync: Vec<_> = match config.sync_on_startup {
            SyncOnStartup::Always => registry.iterate_sorted(),
            SyncOnStartup::Never => Vec::new(),
            SyncOnStartup::Auto => registry
                .iterate_sorted()
                .into_iter()
                .filter(|d| {
                    entries
                        .iter()
                        .find(|e| e.kind == d.plural)
                        .map(|e| e.needs_full_sync(threshold, now))
                        .unwrap_or(true)
                })
                .collect(),
        };

        tracing::info!(kinds = to_sync.len(), "running startup full sync");
        let concurrency = if config.enable_concurrent_sync {
            config.sync_max_concurrent_resources
        } else {
            1
        };

        let plurals: Vec<&str> = to_sync.iter().map(|d| d.plural).collect();
        progress.begin_sync(&plurals);
        let outcomes = full_sync::sync_selected(
            &client,
            store.as_ref(),
            sync_state.as_ref(),
            to_sync,
            concurrency,
            &bulk_write,
            &backoff,
            &config,
            Some(progress_callback(progress.clone())),
        )
        .await;
        record_outcomes(&progress, &outcomes);

        let mut cursors: HashMap<&'static str, Option<String>> = HashMap::new();
        for outcome in &outcomes {
            if let Some(descriptor) = registry.lookup_by_plural(&outcome.kind) {
                cursors.insert(descriptor.plural, outcome.cursor.clone());
            }
        }
        for descriptor in registry.iterate_sorted() {
            cursors.entry(descriptor.plural).or_insert_with(|| {
                entries
                    .iter()
                    .find(|e| e.kind == descriptor.plural)
                    .and_then(|e| e.resource_version_cursor.clone())
            });
        }

        let pipeline = Arc::new(EventApplyPipeline::spawn(
            store.clone(),
            config.event_apply_concurrency,
            std::time::Duration::from_millis(config.event_apply_batch_delay_ms),
        ));

        let resync: ResyncFn = build_resync_fn(
            client.clone(),
            store.clone(),
            sync_state.clone(),
            registry.clone(),
            bulk_write.clone(),
            backoff,
            config.clone(),
        );
        let watch_engine = Arc::new(WatchEngine::new(
            client.clone(),
            config.clone(),
            backoff,
            pipeline.clone(),
            sync_state.clone(),
            resync,
        ));

        let cancel = CancellationToken::new();
        progress.set_informer();
        let mut watch_handles = Vec::new();
        for descriptor in registry.all() {
            let engine = watch_engine.clone();
            let descriptor = descriptor.clone();
            let cursor = cursors.get(descriptor.plural).cloned().flatten();
            let cancel = cancel.clone();
            watch_handles.push(tokio::spawn(async move {
                engine.run_watch_for_kind(&descriptor, cursor, cancel).await;
            }));
        }

        progress.mark_completed();
        let ready = Arc::new(AtomicBool::new(true));

        let periodic_handle = config.periodic_sync_interval().map(|interval| {
            let client = client.clone();
            let store = store.clone();
            let sync_state = sync_state.clone();
            let registry = registry.clone();
            let bulk_write = bulk_write.clone();
            let cancel = cancel.clone();
            let config = config.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(interval);
                tick.tick().await; // first tick fires immediately; skip it
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tick.tick() => {}
                    }
                    tracing::info!("running periodic full resync");
                    full_sync::sync_all(
                        &client,
                        store.as_ref(),
                        sync_state.as_ref(),
                        &registry,
                        3,
                        &bulk_write,
                        &backoff,
                        &config,
                        None,
                    )
                    .await;
                }
            })
        });

        let trigger_client = client.clone();
        let trigger_store = store.clone();
        let trigger_sync_state = sync_state.clone();
        let trigger_registry = registry.clone();
        let trigger_bulk_write = bulk_write.clone();
        let trigger_config = config.clone();
        let trigger_progress = progress.clone();
        let trigger_sync: status::TriggerSyncFn = Arc::new(move |kind: Option<String>| {
            let client = trigger_client.clone();
            let store = trigger_store.clone();
            let sync_state = trigger_sync_state.clone();
            let registry = trigger_registry.clone();
            let bulk_write = trigger_bulk_write.clone();
            let config = trigger_config.clone();
            let progress = trigger_progress.clone();
            Box::pin(async move {
                let descriptors = match &kind {
                    Some(k) => registry
                        .lookup_by_plural(k)
                        .into_iter()
                        .collect::<Vec<_>>(),
                    None => registry.iterate_sorted(),
                };
                let plurals: Vec<&str> = descriptors.iter().map(|d| d.plural).collect();
                progress.begin_sync(&plurals);
                let outcomes = full_sync::sync_selected(
                    &client,
                    store.as_ref(),
                    sync_state.as_ref(),
                    descriptors,
                    3,
                    &bulk_write,
                    &backoff,
                    &config,
                    Some(progress_callback(progress.clone())),
                )
                .await;
                record_outcomes(&progress, &outcomes);
                progress.mark_completed();
            }) as BoxFuture<'static, ()>
        });

        let status_state = StatusState {
            progress: progress.clone(),
            registry: registry.clone(),
            ready: ready.clone(),
            trigger_sync,
        };
        let status_cancel = cancel.clone();
        let status_port = config.status_port;
        let status_handle =
            tokio::spawn(async move { status::run_status_server(status_port, status_state, status_cancel).await });

        Ok(Self {
            cancel,
            ready,
            watch_handles,
            periodic_handle,
            status_handle,
            pipeline,
            drain_timeout: std::time::Duration::from_secs(config.event_apply_drain_timeout_seconds),
        })
    }

    /// Blocks until a shutdown signal arrives, then runs the shutdown
    /// sequence (spec §4.8): stop the scheduler, abort watches, drain the
    /// pipeline, and flip readiness off.
    pub async fn run_until_shutdown(self) {
        crate::shutdown::wait_for_signal().await;
        self.shutdown().await;
    }

    pub async fn shutdown(self) {
        tracing::info!("shutting down");
        self.ready.store(false, Ordering::SeqCst);
        self.cancel.cancel();

        if let Some(handle) = self.periodic_handle {
            handle.abort();
        }
        for handle in self.watch_handles {
            handle.abort();
            let _ = handle.await;
        }
        self.pipeline.shutdown(self.drain_timeout).await;
        self.status_handle.abort();
        tracing::info!("shutdown complete");
    }
}

fn build_resync_fn(
    client: kube::Client,
    store: Arc<dyn Store>,
    sync_state: Arc<dyn SyncStateLog>,
    registry: Arc<Registry>,
    bulk_write: crate::store::BulkWriteConfig,
    backoff: crate::backoff::BackoffPolicy,
    config: Arc<SyncConfig>,
) -> ResyncFn {
    Arc::new(move |kind: &'static str| {
        let client = client.clone();
        let store = store.clone();
        let sync_state = sync_state.clone();
        let registry = registry.clone();
        let bulk_write = bulk_write.clone();
        let config = config.clone();
        Box::pin(async move {
            let descriptor = registry.lookup_by_plural(kind)?;
            let request_timeout = config.request_timeout(descriptor.timeout_class);
            let outcome = full_sync::sync_kind(
                &client,
                store.as_ref(),
                sync_state.as_ref(),
                descriptor,
                &bulk_write,
                &backoff,
                request_timeout,
                None,
            )
            .await;
            outcome.cursor
        }) as BoxFuture<'static, Option<String>>
    })
}
