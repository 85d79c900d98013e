use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config as PgConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;

use crate::error::Result;
use eosin_common::args::PostgresArgs;

/// Builds the connection pool for the sync state log from the same
/// `PostgresArgs` shape the rest of the platform uses, minus TLS (the sync
/// state log is expected to run alongside the core, not across a public
/// network).
pub fn pool_from_args(args: &PostgresArgs) -> Result<Pool> {
    let mut cfg = PgConfig::new();
    cfg.host = Some(args.postgres_host.clone());
    cfg.port = Some(args.postgres_port);
    cfg.dbname = Some(args.postgres_database.clone());
    cfg.user = Some(args.postgres_username.clone());
    cfg.password = args.postgres_password.clone();
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| crate::error::Error::Config(format!("failed to create postgres pool: {e}")))
}

/// spec §3 `SyncStateEntry.status`: transitions form
/// `{never|completed|failed} -> in_progress -> {completed, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Never,
    InProgress,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Never => "never",
            SyncStatus::InProgress => "in_progress",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "in_progress" => SyncStatus::InProgress,
            "completed" => SyncStatus::Completed,
            "failed" => SyncStatus::Failed,
            _ => SyncStatus::Never,
        }
    }
}

/// spec §3 `SyncStateEntry`: one row per registered kind, in the small
/// relational datastore kept separate from the document Store so the
/// "is data fresh enough to skip resync?" decision survives a document
/// store outage (spec §4.3).
#[derive(Debug, Clone)]
pub struct SyncStateEntry {
    pub kind: String,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_sync_duration_ms: Option<i64>,
    pub last_sync_count: Option<i64>,
    pub resource_version_cursor: Option<String>,
    pub status: SyncStatus,
    pub last_error: Option<String>,
    pub reconnect_count: i64,
}

impl SyncStateEntry {
    /// spec §4.7 startup decision rule, "auto" branch: is this entry stale
    /// enough to force a full resync?
    pub fn is_stale(&self, threshold: std::time::Duration, now: DateTime<Utc>) -> bool {
        match self.last_sync_time {
            None => true,
            Some(t) => (now - t).to_std().map(|age| age > threshold).unwrap_or(true),
        }
    }

    pub fn needs_full_sync(&self, threshold: std::time::Duration, now: DateTime<Utc>) -> bool {
        matches!(self.status, SyncStatus::Failed) || self.is_stale(threshold, now)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncStatePatch {
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_sync_duration_ms: Option<i64>,
    pub last_sync_count: Option<i64>,
    pub resource_version_cursor: Option<String>,
    pub status: Option<SyncStatus>,
}

#[async_trait]
pub trait SyncStateLog: Send + Sync {
    async fn get_all(&self) -> Result<Vec<SyncStateEntry>>;
    async fn upsert(&self, kind: &str, patch: SyncStatePatch) -> Result<()>;
    async fn mark_in_progress(&self, kind: &str) -> Result<()>;
    async fn mark_completed(
        &self,
        kind: &str,
        duration_ms: i64,
        count: i64,
        cursor: Option<String>,
    ) -> Result<()>;
    async fn mark_failed(&self, kind: &str, error: String) -> Result<()>;
    async fn increment_reconnect_count(&self, kind: &str) -> Result<()>;
    async fn reset_reconnect_count(&self, kind: &str) -> Result<()>;
}

pub struct PostgresSyncStateLog {
    pool: Pool,
}

impl PostgresSyncStateLog {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                CREATE TABLE IF NOT EXISTS sync_state (
                    kind TEXT PRIMARY KEY,
                    last_sync_time TIMESTAMPTZ,
                    last_sync_duration_ms BIGINT,
                    last_sync_count BIGINT,
                    resource_version_cursor TEXT,
                    status TEXT NOT NULL DEFAULT 'never',
                    last_error TEXT,
                    reconnect_count BIGINT NOT NULL DEFAULT 0
                )
                "#,
                &[],
            )
            .await?;
        tracing::info!("sync_state schema initialized");
        Ok(())
    }
}

#[async_trait]
impl SyncStateLog for PostgresSyncStateLog {
    async fn get_all(&self) -> Result<Vec<SyncStateEntry>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"SELECT kind, last_sync_time, last_sync_duration_ms, last_sync_count,
                          resource_version_cursor, status, last_error, reconnect_count
                   FROM sync_state"#,
                &[],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| SyncStateEntry {
                kind: row.get("kind"),
                last_sync_time: row.get("last_sync_time"),
                last_sync_duration_ms: row.get("last_sync_duration_ms"),
                last_sync_count: row.get("last_sync_count"),
                resource_version_cursor: row.get("resource_version_cursor"),
                status: SyncStatus::from_str(row.get::<_, &str>("status")),
                last_error: row.get("last_error"),
                reconnect_count: row.get("reconnect_count"),
            })
            .collect())
    }

    async fn upsert(&self, kind: &str, patch: SyncStatePatch) -> Result<()> {
        let client = self.pool.get().await?;
        let status = patch.status.map(|s| s.as_str().to_string());
        client
            .execute(
                r#"
                INSERT INTO sync_state (kind, last_sync_time, last_sync_duration_ms, last_sync_count, resource_version_cursor, status)
                VALUES ($1, $2, $3, $4, $5, COALESCE($6, 'never'))
                ON CONFLICT (kind) DO UPDATE SET
                    last_sync_time = COALESCE($2, sync_state.last_sync_time),
                    last_sync_duration_ms = COALESCE($3, sync_state.last_sync_duration_ms),
                    last_sync_count = COALESCE($4, sync_state.last_sync_count),
                    resource_version_cursor = COALESCE($5, sync_state.resource_version_cursor),
                    status = COALESCE($6, sync_state.status)
                "#,
                &[
                    &kind,
                    &patch.last_sync_time,
                    &patch.last_sync_duration_ms,
                    &patch.last_sync_count,
                    &patch.resource_version_cursor,
                    &status,
                ],
            )
            .await?;
        Ok(())
    }

    async fn mark_in_progress(&self, kind: &str) -> Result<()> {
        self.upsert(
            kind,
            SyncStatePatch {
                status: Some(SyncStatus::InProgress),
                ..Default::default()
            },
        )
        .await
    }

    async fn mark_completed(
        &self,
        kind: &str,
        duration_ms: i64,
        count: i64,
        cursor: Option<String>,
    ) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO sync_state (kind, last_sync_time, last_sync_duration_ms, last_sync_count, resource_version_cursor, status, last_error)
                VALUES ($1, now(), $2, $3, $4, 'completed', NULL)
                ON CONFLICT (kind) DO UPDATE SET
                    last_sync_time = now(),
                    last_sync_duration_ms = $2,
                    last_sync_count = $3,
                    resource_version_cursor = COALESCE($4, sync_state.resource_version_cursor),
                    status = 'completed',
                    last_error = NULL
                "#,
                &[&kind, &duration_ms, &count, &cursor],
            )
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, kind: &str, error: String) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO sync_state (kind, status, last_error)
                VALUES ($1, 'failed', $2)
                ON CONFLICT (kind) DO UPDATE SET status = 'failed', last_error = $2
                "#,
                &[&kind, &error],
            )
            .await?;
        Ok(())
    }

    async fn increment_reconnect_count(&self, kind: &str) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO sync_state (kind, reconnect_count)
                VALUES ($1, 1)
                ON CONFLICT (kind) DO UPDATE SET reconnect_count = sync_state.reconnect_count + 1
                "#,
                &[&kind],
            )
            .await?;
        Ok(())
    }

    async fn reset_reconnect_count(&self, kind: &str) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO sync_state (kind, reconnect_count)
                VALUES ($1, 0)
                ON CONFLICT (kind) DO UPDATE SET reconnect_count = 0
                "#,
                &[&kind],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn entry(status: SyncStatus, last_sync_time: Option<DateTime<Utc>>) -> SyncStateEntry {
        SyncStateEntry {
            kind: "pods".into(),
            last_sync_time,
            last_sync_duration_ms: Some(100),
            last_sync_count: Some(5),
            resource_version_cursor: Some("10".into()),
            status,
            last_error: None,
            reconnect_count: 0,
        }
    }

    #[test]
    fn never_synced_is_always_stale() {
        let e = entry(SyncStatus::Never, None);
        assert!(e.needs_full_sync(std::time::Duration::from_secs(86_400), Utc::now()));
    }

    #[test]
    fn failed_status_always_needs_sync_even_if_recent() {
        let e = entry(SyncStatus::Failed, Some(Utc::now()));
        assert!(e.needs_full_sync(std::time::Duration::from_secs(86_400), Utc::now()));
    }

    #[test]
    fn fresh_completed_entry_skips_sync() {
        let now = Utc::now();
        let e = entry(SyncStatus::Completed, Some(now - ChronoDuration::minutes(10)));
        assert!(!e.needs_full_sync(std::time::Duration::from_secs(86_400), now));
    }

    #[test]
    fn stale_completed_entry_needs_sync() {
        let now = Utc::now();
        let e = entry(SyncStatus::Completed, Some(now - ChronoDuration::days(2)));
        assert!(e.needs_full_sync(std::time::Duration::from_secs(86_400), now));
    }
}
