use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Overall lifecycle status of a sync pass (spec §3 "SyncProgress", §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

impl OverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::NotStarted => "not_started",
            OverallStatus::InProgress => "in_progress",
            OverallStatus::Completed => "completed",
            OverallStatus::Failed => "failed",
        }
    }
}

/// Which stage of the startup sequence is currently running (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStep {
    Cleanup,
    Sync,
    Informer,
    Done,
}

impl SyncStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStep::Cleanup => "cleanup",
            SyncStep::Sync => "sync",
            SyncStep::Informer => "informer",
            SyncStep::Done => "done",
        }
    }
}

/// Per-kind status within a sync pass, distinct from `OverallStatus` (spec
/// §4.8 "per-kind `{name, icon, status, count?, error?}`").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KindProgressStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

fn icon_for(status: KindProgressStatus) -> &'static str {
    match status {
        KindProgressStatus::Pending => "⬜",
        KindProgressStatus::InProgress => "⏳",
        KindProgressStatus::Completed => "✅",
        KindProgressStatus::Failed => "❌",
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceStatusEntry {
    pub name: String,
    pub icon: &'static str,
    pub status: KindProgressStatus,
    pub count: Option<i64>,
    pub error: Option<String>,
}

/// Immutable snapshot of `SyncProgress`, the wire body for `GET /sync/status`
/// (spec §6 "Wire format for the status snapshot").
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgressSnapshot {
    pub status: OverallStatus,
    pub step: SyncStep,
    pub total_resources: usize,
    pub synced_resources: usize,
    pub current_resource: Option<String>,
    pub current_resources: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub resource_status: Vec<ResourceStatusEntry>,
}

struct State {
    status: OverallStatus,
    step: SyncStep,
    total_resources: usize,
    synced_resources: usize,
    current_resources: Vec<String>,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    error: Option<String>,
    resource_status: BTreeMap<String, ResourceStatusEntry>,
}

/// Process-global sync progress (spec §3 "SyncProgress (in-memory,
/// process-global)"). Exclusively owned and written by the Hybrid
/// Controller; the Full Sync Engine updates it only through the callback
/// methods here (`report_kind_progress`/`finish_kind`), never directly.
pub struct SyncProgress {
    state: Mutex<State>,
}

impl SyncProgress {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                status: OverallStatus::NotStarted,
                step: SyncStep::Cleanup,
                total_resources: 0,
                synced_resources: 0,
                current_resources: Vec::new(),
                start_time: Utc::now(),
                end_time: None,
                error: None,
                resource_status: BTreeMap::new(),
            }),
        }
    }

    pub fn set_step(&self, step: SyncStep) {
        let mut s = self.state.lock().unwrap();
        s.step = step;
        if s.status == OverallStatus::NotStarted {
            s.status = OverallStatus::InProgress;
        }
    }

    /// Begins a full-sync pass over `kinds` (spec §4.7 step 4): seeds a
    /// pending entry for each kind and resets the per-run counters.
    pub fn begin_sync(&self, kinds: &[&str]) {
        let mut s = self.state.lock().unwrap();
        s.step = SyncStep::Sync;
        s.status = OverallStatus::InProgress;
        s.total_resources = kinds.len();
        s.synced_resources = 0;
        for &kind in kinds {
            s.resource_status.insert(
                kind.to_string(),
                ResourceStatusEntry {
                    name: kind.to_string(),
                    icon: icon_for(KindProgressStatus::Pending),
                    status: KindProgressStatus::Pending,
                    count: None,
                    error: None,
                },
            );
        }
        drop(s);
        self.publish_ratio();
    }

    /// Called from the Full Sync Engine's progress callback as a kind makes
    /// progress (spec §4.7 step 4).
    pub fn report_kind_progress(&self, kind: &str, items_seen: i64) {
        let mut s = self.state.lock().unwrap();
        if !s.current_resources.iter().any(|k| k == kind) {
            s.current_resources.push(kind.to_string());
        }
        s.resource_status.insert(
            kind.to_string(),
            ResourceStatusEntry {
                name: kind.to_string(),
                icon: icon_for(KindProgressStatus::InProgress),
                status: KindProgressStatus::InProgress,
                count: Some(items_seen),
                error: None,
            },
        );
    }

    /// Records a kind's final outcome and advances `syncedResources` (spec
    /// §8 "SyncProgress monotonically increases syncedResources ... never
    /// exceeds totalResources" — only successful kinds increment it).
    pub fn finish_kind(&self, kind: &str, count: i64, error: Option<&str>) {
        let mut s = self.state.lock().unwrap();
        s.current_resources.retain(|k| k != kind);
        let status = if error.is_some() {
            KindProgressStatus::Failed
        } else {
            KindProgressStatus::Completed
        };
        if status == KindProgressStatus::Completed {
            s.synced_resources += 1;
        }
        s.resource_status.insert(
            kind.to_string(),
            ResourceStatusEntry {
                name: kind.to_string(),
                icon: icon_for(status),
                status,
                count: Some(count),
                error: error.map(String::from),
            },
        );
        drop(s);
        self.publish_ratio();
    }

    pub fn set_informer(&self) {
        self.state.lock().unwrap().step = SyncStep::Informer;
    }

    /// Marks the startup (or periodic/triggered) sync pass complete (spec
    /// §4.8 "Ready: `SyncProgress.status == completed` AND `ready` flag is
    /// set" — per-kind failures do not block this).
    pub fn mark_completed(&self) {
        let mut s = self.state.lock().unwrap();
        s.step = SyncStep::Done;
        s.status = OverallStatus::Completed;
        s.end_time = Some(Utc::now());
    }

    pub fn mark_failed(&self, error: impl Into<String>) {
        let mut s = self.state.lock().unwrap();
        s.status = OverallStatus::Failed;
        s.end_time = Some(Utc::now());
        s.error = Some(error.into());
    }

    pub fn is_completed(&self) -> bool {
        self.state.lock().unwrap().status == OverallStatus::Completed
    }

    pub fn snapshot(&self) -> SyncProgressSnapshot {
        let s = self.state.lock().unwrap();
        SyncProgressSnapshot {
            status: s.status,
            step: s.step,
            total_resources: s.total_resources,
            synced_resources: s.synced_resources,
            current_resource: s.current_resources.last().cloned(),
            current_resources: s.current_resources.clone(),
            start_time: s.start_time,
            end_time: s.end_time,
            error: s.error.clone(),
            resource_status: s.resource_status.values().cloned().collect(),
        }
    }

    fn publish_ratio(&self) {
        let s = self.state.lock().unwrap();
        let ratio = if s.total_resources == 0 {
            1.0
        } else {
            s.synced_resources as f64 / s.total_resources as f64
        };
        drop(s);
        crate::metrics::set_sync_progress_ratio(ratio);
    }
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synced_resources_never_exceeds_total_and_is_monotonic() {
        let progress = SyncProgress::new();
        progress.begin_sync(&["pods", "nodes", "services"]);
        let mut last = 0;
        for kind in ["pods", "nodes", "services"] {
            progress.finish_kind(kind, 10, None);
            let snap = progress.snapshot();
            assert!(snap.synced_resources >= last);
            assert!(snap.synced_resources <= snap.total_resources);
            last = snap.synced_resources;
        }
        assert_eq!(last, 3);
    }

    #[test]
    fn failed_kind_does_not_increment_synced_resources() {
        let progress = SyncProgress::new();
        progress.begin_sync(&["pods"]);
        progress.finish_kind("pods", 0, Some("boom"));
        let snap = progress.snapshot();
        assert_eq!(snap.synced_resources, 0);
        assert_eq!(snap.resource_status[0].status, KindProgressStatus::Failed);
        assert_eq!(snap.resource_status[0].error.as_deref(), Some("boom"));
    }

    #[test]
    fn mark_completed_sets_status_and_end_time() {
        let progress = SyncProgress::new();
        progress.begin_sync(&[]);
        progress.set_informer();
        progress.mark_completed();
        let snap = progress.snapshot();
        assert_eq!(snap.status, OverallStatus::Completed);
        assert_eq!(snap.step, SyncStep::Done);
        assert!(snap.end_time.is_some());
    }
}
