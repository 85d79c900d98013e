use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::registry::IdentityField;
use crate::store::{Store, StoredResource};

/// What kind of change a watch observed (spec §4.5 event phases, mapped
/// 1:1 onto `ADDED`/`MODIFIED`/`DELETED`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPhase {
    Added,
    Modified,
    Deleted,
}

/// One unit of work queued by a watch and consumed by the pipeline (spec
/// §4.6 "Event Apply Pipeline"). `record` is always the freshly projected
/// object, even for deletes — deletion only needs its identity field, but
/// carrying the whole record keeps this type uniform across phases.
#[derive(Debug, Clone)]
pub struct ApplyJob {
    pub store_binding: &'static str,
    pub identity_field: IdentityField,
    pub phase: EventPhase,
    pub record: StoredResource,
}

/// FIFO queue in front of the Store, with a bound on in-flight Store
/// operations (spec §4.6): watches never block on Store latency, and a
/// burst of events never opens unbounded concurrent writes.
///
/// `sender`/`handle` sit behind a plain `Mutex` rather than being owned
/// outright so `shutdown` can run through a shared `Arc<EventApplyPipeline>`
/// (the Watch Engine holds one clone, the controller holds another) instead
/// of requiring the caller to be the sole owner.
pub struct EventApplyPipeline {
    sender: Mutex<Option<mpsc::Sender<ApplyJob>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventApplyPipeline {
    pub fn spawn(store: Arc<dyn Store>, concurrency: usize, batch_delay: Duration) -> Self {
        let (tx, rx) = mpsc::channel(4096);
        let handle = tokio::spawn(run(store, rx, concurrency.max(1), batch_delay));
        Self {
            sender: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Enqueues a job. Returns `false` if the pipeline has already started
    /// shutting down and is no longer accepting work.
    pub async fn submit(&self, job: ApplyJob) -> bool {
        let tx = self.sender.lock().unwrap().clone();
        match tx {
            Some(tx) => tx.send(job).await.is_ok(),
            None => false,
        }
    }

    /// Stops accepting new jobs and waits for everything already queued to
    /// finish, up to `timeout` (spec §4.6 "drain on shutdown"). Aborts the
    /// worker loop if the drain doesn't finish in time. A no-op if called
    /// more than once.
    pub async fn shutdown(&self, timeout: Duration) {
        self.sender.lock().unwrap().take();
        let Some(handle) = self.handle.lock().unwrap().take() else {
            return;
        };
        let abort = handle.abort_handle();
        if tokio::time::timeout(timeout, handle).await.is_err() {
            tracing::warn!("event apply pipeline drain timed out; aborting in-flight jobs");
            abort.abort();
        }
    }
}

async fn run(store: Arc<dyn Store>, mut rx: mpsc::Receiver<ApplyJob>, concurrency: usize, batch_delay: Duration) {
    loop {
        let first = match rx.recv().await {
            Some(job) => job,
            None => break,
        };
        let mut batch = vec![first];
        while batch.len() < concurrency * 4 {
            match rx.try_recv() {
                Ok(job) => batch.push(job),
                Err(_) => break,
            }
        }

        stream::iter(batch)
            .for_each_concurrent(concurrency, |job| {
                let store = store.clone();
                async move {
                    if let Err(err) = apply_job(store.as_ref(), &job).await {
                        tracing::warn!(
                            store_binding = job.store_binding,
                            phase = ?job.phase,
                            error = %err,
                            "event apply job failed; will be corrected by the next resync"
                        );
                    }
                }
            })
            .await;

        tokio::time::sleep(batch_delay).await;
    }
}

async fn apply_job(store: &dyn Store, job: &ApplyJob) -> crate::error::Result<()> {
    match job.phase {
        EventPhase::Added | EventPhase::Modified => {
            store
                .upsert_by_identity(job.store_binding, job.identity_field, job.record.clone())
                .await
        }
        EventPhase::Deleted => match job.record.identity(job.identity_field) {
            Some(id) => {
                store
                    .delete_by_identity(job.store_binding, job.identity_field, id)
                    .await
            }
            None => Ok(()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BulkWriteConfig, ListFilter, ListOptions};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        upserts: Mutex<Vec<String>>,
        deletes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Store for RecordingStore {
        async fn find_by_identity(
            &self,
            _kind: &str,
            _id_key: IdentityField,
            _id_value: &str,
        ) -> crate::error::Result<Option<StoredResource>> {
            Ok(None)
        }

        async fn list(&self, _kind: &str, _options: ListOptions) -> crate::error::Result<Vec<StoredResource>> {
            Ok(vec![])
        }

        async fn count(&self, _kind: &str, _filter: &ListFilter) -> crate::error::Result<u64> {
            Ok(0)
        }

        async fn upsert_by_identity(
            &self,
            _kind: &str,
            _id_key: IdentityField,
            record: StoredResource,
        ) -> crate::error::Result<()> {
            self.upserts.lock().unwrap().push(record.uid.unwrap_or_default());
            Ok(())
        }

        async fn delete_by_identity(
            &self,
            _kind: &str,
            _id_key: IdentityField,
            id_value: &str,
        ) -> crate::error::Result<()> {
            self.deletes.lock().unwrap().push(id_value.to_string());
            Ok(())
        }

        async fn bulk_upsert(
            &self,
            _kind: &str,
            _id_key: IdentityField,
            items: Vec<StoredResource>,
            _config: &BulkWriteConfig,
            _backoff: &crate::backoff::BackoffPolicy,
        ) -> crate::error::Result<usize> {
            Ok(items.len())
        }

        async fn delete_where_invalid(&self, _kind: &str) -> crate::error::Result<u64> {
            Ok(0)
        }

        async fn ensure_indexes(&self, _kind: &str, _namespaced: bool) -> crate::error::Result<()> {
            Ok(())
        }
    }

    fn record(uid: &str) -> StoredResource {
        StoredResource {
            uid: Some(uid.to_string()),
            name: Some(uid.to_string()),
            namespace: Some("default".into()),
            kind: "Pod".into(),
            api_version: "v1".into(),
            resource_version: Some("1".into()),
            labels: Default::default(),
            annotations: Default::default(),
            created_at: bson::DateTime::now(),
            updated_at: bson::DateTime::now(),
            fields: bson::Document::new(),
            raw: bson::Document::new(),
        }
    }

    #[tokio::test]
    async fn applies_upserts_and_deletes() {
        let store = Arc::new(RecordingStore::default());
        let pipeline = EventApplyPipeline::spawn(store.clone(), 4, Duration::from_millis(0));

        assert!(
            pipeline
                .submit(ApplyJob {
                    store_binding: "pods",
                    identity_field: IdentityField::Uid,
                    phase: EventPhase::Added,
                    record: record("uid-1"),
                })
                .await
        );
        assert!(
            pipeline
                .submit(ApplyJob {
                    store_binding: "pods",
                    identity_field: IdentityField::Uid,
                    phase: EventPhase::Deleted,
                    record: record("uid-2"),
                })
                .await
        );

        pipeline.shutdown(Duration::from_secs(5)).await;

        assert_eq!(store.upserts.lock().unwrap().as_slice(), ["uid-1"]);
        assert_eq!(store.deletes.lock().unwrap().as_slice(), ["uid-2"]);
    }
}
