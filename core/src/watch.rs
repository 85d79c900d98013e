use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use kube::api::{Api, WatchEvent, WatchParams};
use kube::core::DynamicObject;
use kube::Client;
use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffPolicy;
use crate::config::SyncConfig;
use crate::error::Error;
use crate::pipeline::{ApplyJob, EventApplyPipeline, EventPhase};
use crate::registry::ResourceDescriptor;
use crate::sync_state::SyncStateLog;

/// Per-kind watch lifecycle (spec §4.5). `Resync` is a terminal state for
/// one iteration of the loop: it triggers a fresh full sync for this kind
/// and feeds straight back into `Opening` with the new cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Opening,
    Running,
    Backoff,
    Reconnecting,
    Resync,
    Stopped,
}

/// What a watch cycle should do next, decided by `run_watch_cycle` and
/// acted on by the outer loop in `run_watch_for_kind`.
enum CycleOutcome {
    /// The cursor the stream ended on; reconnect immediately with it.
    Reconnect(Option<String>),
    /// The cursor has expired (HTTP 410) or too many reconnects happened;
    /// a full resync is needed before watching can resume.
    NeedsResync,
    Stopped,
}

/// Function that turns a full sync of exactly this one kind into a new
/// cursor, so the watch engine doesn't need to know about the full sync
/// engine's concurrency/registry machinery.
pub type ResyncFn = Arc<
    dyn Fn(&'static str) -> futures::future::BoxFuture<'static, Option<String>> + Send + Sync,
>;

pub struct WatchEngine {
    client: Client,
    config: Arc<SyncConfig>,
    backoff: BackoffPolicy,
    pipeline: Arc<EventApplyPipeline>,
    sync_state: Arc<dyn SyncStateLog>,
    resync: ResyncFn,
    states: Mutex<HashMap<&'static str, WatchState>>,
}

impl WatchEngine {
    pub fn new(
        client: Client,
        config: Arc<SyncConfig>,
        backoff: BackoffPolicy,
        pipeline: Arc<EventApplyPipeline>,
        sync_state: Arc<dyn SyncStateLog>,
        resync: ResyncFn,
    ) -> Self {
        Self {
            client,
            config,
            backoff,
            pipeline,
            sync_state,
            resync,
            states: Mutex::new(HashMap::new()),
        }
    }

    fn set_state(&self, kind: &'static str, state: WatchState) {
        self.states.lock().unwrap().insert(kind, state);
    }

    /// Current lifecycle state of every kind this engine has ever started
    /// watching (spec §6 `/sync/status` per-kind `watchState`).
    pub fn states_snapshot(&self) -> Vec<(&'static str, WatchState)> {
        self.states
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (*k, *v))
            .collect()
    }

    /// Runs the watch loop for one kind until `cancel` fires (spec §4.5).
    /// `initial_cursor` is the resourceVersion the preceding full sync left
    /// off at.
    pub async fn run_watch_for_kind(
        &self,
        descriptor: &ResourceDescriptor,
        initial_cursor: Option<String>,
        cancel: CancellationToken,
    ) {
        let mut cursor = initial_cursor;
        let mut reconnects: u32 = 0;
        self.set_state(descriptor.plural, WatchState::Opening);

        loop {
            if cancel.is_cancelled() {
                self.set_state(descriptor.plural, WatchState::Stopped);
                return;
            }

            self.set_state(descriptor.plural, WatchState::Opening);
            let outcome = self.run_watch_cycle(descriptor, cursor.clone(), &cancel).await;

            match outcome {
                CycleOutcome::Stopped => {
                    self.set_state(descriptor.plural, WatchState::Stopped);
                    return;
                }
                CycleOutcome::Reconnect(new_cursor) => {
                    if new_cursor.is_some() {
                        cursor = new_cursor;
                    }
                    reconnects += 1;
                    crate::metrics::record_watch_reconnect(descriptor.plural);
                    self.sync_state
                        .increment_reconnect_count(descriptor.plural)
                        .await
                        .ok();

                    if !self.config.enable_k8s_watch_reconnect
                        || reconnects > self.config.retry_max_attempts
                    {
                        if self.config.auto_sync_on_informer_failure {
                            tracing::warn!(
                                kind = descriptor.plural,
                                reconnects,
                                "watch reconnect budget exhausted; forcing full resync"
                            );
                            self.set_state(descriptor.plural, WatchState::Resync);
                            cursor = (self.resync)(descriptor.plural).await;
                            self.sync_state
                                .reset_reconnect_count(descriptor.plural)
                                .await
                                .ok();
                            reconnects = 0;
                        } else {
                            tracing::error!(
                                kind = descriptor.plural,
                                "watch reconnect budget exhausted; stopping watch"
                            );
                            self.set_state(descriptor.plural, WatchState::Stopped);
                            return;
                        }
                    } else {
                        self.set_state(descriptor.plural, WatchState::Backoff);
                        tokio::time::sleep(self.backoff.delay_for_attempt(reconnects)).await;
                        self.set_state(descriptor.plural, WatchState::Reconnecting);
                    }
                }
                CycleOutcome::NeedsResync => {
                    tracing::info!(kind = descriptor.plural, "watch cursor expired; resyncing");
                    self.set_state(descriptor.plural, WatchState::Resync);
                    cursor = (self.resync)(descriptor.plural).await;
                    self.sync_state
                        .reset_reconnect_count(descriptor.plural)
                        .await
                        .ok();
                    reconnects = 0;
                }
            }
        }
    }

    async fn run_watch_cycle(
        &self,
        descriptor: &ResourceDescriptor,
        cursor: Option<String>,
        cancel: &CancellationToken,
    ) -> CycleOutcome {
        let api_resource = descriptor.api_resource();
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &api_resource);
        let wp = WatchParams::default().timeout(self.config.watch_timeout().as_secs() as u32);

        let resource_version = cursor.clone().unwrap_or_default();
        let stream = match api.watch(&wp, &resource_version).await {
            Ok(s) => s,
            Err(err) => return self.classify_open_error(Error::from(err)),
        };
        futures::pin_mut!(stream);
        self.set_state(descriptor.plural, WatchState::Running);

        let mut latest_cursor = cursor;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return CycleOutcome::Stopped,
                next = stream.next() => {
                    match next {
                        None => return CycleOutcome::Reconnect(latest_cursor),
                        Some(Ok(event)) => {
                            match self.handle_event(descriptor, event).await {
                                Ok(Some(rv)) => latest_cursor = Some(rv),
                                Ok(None) => {}
                                Err(outcome) => return outcome,
                            }
                        }
                        Some(Err(err)) => {
                            let error = Error::from(err);
                            return self.classify_stream_error(error, latest_cursor);
                        }
                    }
                }
            }
        }
    }

    fn classify_open_error(&self, err: Error) -> CycleOutcome {
        classify_watch_error(&err).unwrap_or(CycleOutcome::Reconnect(None))
    }

    fn classify_stream_error(&self, err: Error, cursor: Option<String>) -> CycleOutcome {
        classify_watch_error(&err).unwrap_or(CycleOutcome::Reconnect(cursor))
    }

    /// Projects the watched object and enqueues it on the Event Apply
    /// Pipeline (spec §4.5, §4.6). Returns the resourceVersion to advance
    /// the cursor to, if any, or the `CycleOutcome` a `WatchEvent::Error`
    /// forces the surrounding cycle into (cursor expired/auth fatal).
    async fn handle_event(
        &self,
        descriptor: &ResourceDescriptor,
        event: WatchEvent<DynamicObject>,
    ) -> Result<Option<String>, CycleOutcome> {
        let (phase, obj) = match event {
            WatchEvent::Added(obj) => (EventPhase::Added, obj),
            WatchEvent::Modified(obj) => (EventPhase::Modified, obj),
            WatchEvent::Deleted(obj) => (EventPhase::Deleted, obj),
            WatchEvent::Bookmark(bm) => {
                return Ok(Some(bm.metadata.resource_version));
            }
            WatchEvent::Error(resp) => {
                // The API server reports an expired watch cursor (410) and
                // auth failures (401/403) in-band as an Error event, not as
                // a transport-level Err on the stream.
                let err = Error::Kube {
                    source: kube::Error::Api(resp),
                };
                tracing::warn!(kind = descriptor.plural, error = %err, "watch stream error event");
                return match classify_watch_error(&err) {
                    Some(outcome) => Err(outcome),
                    None => Ok(None),
                };
            }
        };

        let record = (descriptor.projector)(&obj);
        if !record.is_valid() {
            tracing::warn!(
                kind = descriptor.plural,
                name = ?obj.metadata.name,
                "skipping watched object with missing identity"
            );
            return Ok(None);
        }
        let resource_version = record.resource_version.clone();
        let phase_label = match phase {
            EventPhase::Added => "added",
            EventPhase::Modified => "modified",
            EventPhase::Deleted => "deleted",
        };
        crate::metrics::record_watch_event(descriptor.plural, phase_label);
        self.pipeline
            .submit(ApplyJob {
                store_binding: descriptor.store_binding,
                identity_field: descriptor.identity_field,
                phase,
                record,
            })
            .await;
        Ok(resource_version)
    }
}

/// Maps a watch-related error onto the cycle outcome it forces, if any:
/// `Some(NeedsResync)` for an expired cursor (410), `Some(Stopped)` for
/// auth failures (401/403), `None` for everything else (caller decides how
/// to reconnect).
fn classify_watch_error(err: &Error) -> Option<CycleOutcome> {
    if err.is_cursor_expired() {
        Some(CycleOutcome::NeedsResync)
    } else if err.is_auth_fatal() {
        Some(CycleOutcome::Stopped)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn kube_api_error(code: u16) -> Error {
        Error::Kube {
            source: kube::Error::Api(ErrorResponse {
                status: "Failure".into(),
                message: "boom".into(),
                reason: "".into(),
                code,
            }),
        }
    }

    #[test]
    fn gone_forces_resync() {
        assert!(matches!(
            classify_watch_error(&kube_api_error(410)),
            Some(CycleOutcome::NeedsResync)
        ));
    }

    #[test]
    fn auth_errors_force_stop() {
        assert!(matches!(classify_watch_error(&kube_api_error(401)), Some(CycleOutcome::Stopped)));
        assert!(matches!(classify_watch_error(&kube_api_error(403)), Some(CycleOutcome::Stopped)));
    }

    #[test]
    fn other_errors_are_not_classified() {
        assert!(classify_watch_error(&kube_api_error(500)).is_none());
    }
}
