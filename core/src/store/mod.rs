pub mod document;

pub use document::{to_raw_document, StoredResource};

use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, Bson};
use futures::stream::TryStreamExt;
use mongodb::options::{FindOptions, IndexOptions};
use mongodb::{Client, Collection, Database, IndexModel};

use crate::backoff::BackoffPolicy;
use crate::error::{Error, Result};
use crate::registry::IdentityField;

/// spec §4.2: equality on `namespace`, regex on `name`.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub namespace: Option<String>,
    pub name_regex: Option<String>,
}

impl ListFilter {
    fn to_document(&self) -> bson::Document {
        let mut doc = bson::Document::new();
        if let Some(ns) = &self.namespace {
            doc.insert("namespace", ns);
        }
        if let Some(pattern) = &self.name_regex {
            doc.insert(
                "name",
                Bson::RegularExpression(bson::Regex {
                    pattern: pattern.clone(),
                    options: String::new(),
                }),
            );
        }
        doc
    }
}

#[derive(Debug, Clone)]
pub struct ListOptions {
    pub filter: ListFilter,
    pub offset: u64,
    pub limit: i64,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            filter: ListFilter::default(),
            offset: 0,
            limit: 100,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BulkWriteConfig {
    pub chunk_size: usize,
    pub inter_chunk_delay: Duration,
}

impl Default for BulkWriteConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            inter_chunk_delay: Duration::from_millis(100),
        }
    }
}

/// Per-kind persistence contract (spec §4.2). Hides the document database
/// from every other component; a different driver only needs a new impl
/// of this trait (spec §9 "Chunked bulk write across heterogeneous
/// drivers").
#[async_trait]
pub trait Store: Send + Sync {
    async fn find_by_identity(
        &self,
        kind: &str,
        id_key: IdentityField,
        id_value: &str,
    ) -> Result<Option<StoredResource>>;

    async fn list(&self, kind: &str, options: ListOptions) -> Result<Vec<StoredResource>>;

    async fn count(&self, kind: &str, filter: &ListFilter) -> Result<u64>;

    async fn upsert_by_identity(
        &self,
        kind: &str,
        id_key: IdentityField,
        record: StoredResource,
    ) -> Result<()>;

    async fn delete_by_identity(
        &self,
        kind: &str,
        id_key: IdentityField,
        id_value: &str,
    ) -> Result<()>;

    /// Splits `items` into chunks of `config.chunk_size`, writes each
    /// sequentially with `config.inter_chunk_delay` between them, and
    /// retries a failing chunk once on a recoverable error (spec §4.2).
    /// Returns the number of items actually written.
    async fn bulk_upsert(
        &self,
        kind: &str,
        id_key: IdentityField,
        items: Vec<StoredResource>,
        config: &BulkWriteConfig,
        backoff: &BackoffPolicy,
    ) -> Result<usize>;

    /// Removes records with null `uid` or null `name`; run once before each
    /// full sync (spec §4.2, §4.7 step 2).
    async fn delete_where_invalid(&self, kind: &str) -> Result<u64>;

    /// Unique index on `uid`, compound `(namespace, createdAt desc)` for
    /// namespaced kinds, plus a `name` index (spec §3, §6).
    async fn ensure_indexes(&self, kind: &str, namespaced: bool) -> Result<()>;
}

pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        Ok(Self {
            db: client.database(database),
        })
    }

    fn collection(&self, kind: &str) -> Collection<StoredResource> {
        self.db.collection(kind)
    }

    async fn write_chunk(
        &self,
        collection: &Collection<StoredResource>,
        id_key: IdentityField,
        chunk: &[StoredResource],
    ) -> mongodb::error::Result<()> {
        for item in chunk {
            let Some(id_value) = item.identity(id_key) else {
                continue;
            };
            let filter = doc! { id_key.as_str(): id_value };
            collection.replace_one(filter, item).upsert(true).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MongoStore {
    async fn find_by_identity(
        &self,
        kind: &str,
        id_key: IdentityField,
        id_value: &str,
    ) -> Result<Option<StoredResource>> {
        let collection = self.collection(kind);
        let filter = doc! { id_key.as_str(): id_value };
        Ok(collection.find_one(filter).await?)
    }

    async fn list(&self, kind: &str, options: ListOptions) -> Result<Vec<StoredResource>> {
        let collection = self.collection(kind);
        let find_options = FindOptions::builder()
            .sort(doc! { "createdAt": -1 })
            .skip(options.offset)
            .limit(options.limit)
            .build();
        let cursor = collection
            .find(options.filter.to_document())
            .with_options(find_options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn count(&self, kind: &str, filter: &ListFilter) -> Result<u64> {
        let collection = self.collection(kind);
        Ok(collection.count_documents(filter.to_document()).await?)
    }

    async fn upsert_by_identity(
        &self,
        kind: &str,
        id_key: IdentityField,
        record: StoredResource,
    ) -> Result<()> {
        let collection = self.collection(kind);
        let Some(id_value) = record.identity(id_key).map(str::to_owned) else {
            return Err(Error::Registry(format!(
                "record for kind {kind} is missing its identity field"
            )));
        };
        let filter = doc! { id_key.as_str(): &id_value };
        collection.replace_one(filter, record).upsert(true).await?;
        Ok(())
    }

    async fn delete_by_identity(
        &self,
        kind: &str,
        id_key: IdentityField,
        id_value: &str,
    ) -> Result<()> {
        let collection = self.collection(kind);
        let filter = doc! { id_key.as_str(): id_value };
        collection.delete_one(filter).await?;
        Ok(())
    }

    async fn bulk_upsert(
        &self,
        kind: &str,
        id_key: IdentityField,
        items: Vec<StoredResource>,
        config: &BulkWriteConfig,
        backoff: &BackoffPolicy,
    ) -> Result<usize> {
        let collection = self.collection(kind);
        let kind_owned = kind.to_string();
        chunked_bulk_write(
            &items,
            config,
            backoff,
            move |e| {
                let recoverable = is_recoverable(e);
                if recoverable {
                    crate::metrics::record_bulk_write_retry(&kind_owned);
                }
                recoverable
            },
            |chunk| self.write_chunk(&collection, id_key, chunk),
        )
        .await
        .map_err(Error::from)
    }

    async fn delete_where_invalid(&self, kind: &str) -> Result<u64> {
        let collection = self.collection(kind);
        let filter = doc! {
            "$or": [
                { "uid": Bson::Null },
                { "uid": "" },
                { "name": Bson::Null },
                { "name": "" },
            ]
        };
        let result = collection.delete_many(filter).await?;
        Ok(result.deleted_count)
    }

    async fn ensure_indexes(&self, kind: &str, namespaced: bool) -> Result<()> {
        let collection = self.collection(kind);
        collection
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "uid": 1 })
                    .options(IndexOptions::builder().unique(true).sparse(true).build())
                    .build(),
            )
            .await?;
        collection
            .create_index(IndexModel::builder().keys(doc! { "name": 1 }).build())
            .await?;
        if namespaced {
            collection
                .create_index(
                    IndexModel::builder()
                        .keys(doc! { "namespace": 1, "createdAt": -1 })
                        .build(),
                )
                .await?;
        }
        Ok(())
    }
}

/// Driver-agnostic chunking algorithm behind `bulk_upsert` (spec §4.2,
/// §8 boundary behaviors): splits `items` into chunks of `config.chunk_size`,
/// writes each sequentially with `config.inter_chunk_delay` between them,
/// and retries a failing chunk exactly once on a recoverable error before
/// aborting the whole write. Kept free of any particular driver type so it
/// can be exercised directly in tests.
async fn chunked_bulk_write<E, F, Fut>(
    items: &[StoredResource],
    config: &BulkWriteConfig,
    backoff: &BackoffPolicy,
    is_recoverable: impl Fn(&E) -> bool,
    mut write_chunk: F,
) -> std::result::Result<usize, E>
where
    F: FnMut(&[StoredResource]) -> Fut,
    Fut: std::future::Future<Output = std::result::Result<(), E>>,
{
    if items.is_empty() {
        return Ok(0);
    }
    let mut written = 0usize;
    let chunk_size = config.chunk_size.max(1);
    for (index, chunk) in items.chunks(chunk_size).enumerate() {
        if index > 0 {
            tokio::time::sleep(config.inter_chunk_delay).await;
        }
        match write_chunk(chunk).await {
            Ok(()) => written += chunk.len(),
            Err(e) if is_recoverable(&e) => {
                tokio::time::sleep(backoff.delay_for_attempt(1)).await;
                write_chunk(chunk).await?;
                written += chunk.len();
            }
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}

/// spec §4.2 "recoverable errors (broken pipe, socket reset, operation
/// timeout, database network timeout)".
fn is_recoverable(err: &mongodb::error::Error) -> bool {
    use mongodb::error::ErrorKind;
    matches!(
        &*err.kind,
        ErrorKind::Io(_) | ErrorKind::ServerSelection { .. } | ErrorKind::ConnectionPoolCleared { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_filter_builds_namespace_and_regex() {
        let filter = ListFilter {
            namespace: Some("kube-system".into()),
            name_regex: Some("^coredns".into()),
        };
        let doc = filter.to_document();
        assert_eq!(doc.get_str("namespace").unwrap(), "kube-system");
        assert!(doc.contains_key("name"));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = ListFilter::default();
        assert!(filter.to_document().is_empty());
    }

    #[test]
    fn bulk_write_config_defaults_match_spec() {
        let config = BulkWriteConfig::default();
        assert_eq!(config.chunk_size, 100);
        assert_eq!(config.inter_chunk_delay, Duration::from_millis(100));
    }

    fn items(n: usize) -> Vec<StoredResource> {
        (0..n)
            .map(|i| StoredResource {
                uid: Some(format!("uid-{i}")),
                name: Some(format!("name-{i}")),
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
            })
            .collect()
    }

    fn fast_backoff() -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(0),
            max: Duration::from_millis(0),
            multiplier: 1.0,
            max_attempts: 5,
        }
    }

    #[tokio::test]
    async fn bulk_write_of_zero_items_is_noop() {
        let calls = std::sync::Arc::new(std::sync::Mutex::new(0));
        let config = BulkWriteConfig {
            chunk_size: 100,
            inter_chunk_delay: Duration::from_millis(0),
        };
        let written = chunked_bulk_write(
            &[],
            &config,
            &fast_backoff(),
            |_: &&str| true,
            |_chunk| {
                *calls.lock().unwrap() += 1;
                async { Ok::<(), &str>(()) }
            },
        )
        .await
        .unwrap();
        assert_eq!(written, 0);
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn bulk_write_issues_ceil_n_over_b_calls() {
        let calls = std::sync::Arc::new(std::sync::Mutex::new(0));
        let config = BulkWriteConfig {
            chunk_size: 100,
            inter_chunk_delay: Duration::from_millis(0),
        };
        let data = items(250);
        let calls_clone = calls.clone();
        let written = chunked_bulk_write(
            &data,
            &config,
            &fast_backoff(),
            |_: &&str| true,
            move |_chunk| {
                *calls_clone.lock().unwrap() += 1;
                async { Ok::<(), &str>(()) }
            },
        )
        .await
        .unwrap();
        assert_eq!(written, 250);
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn failing_chunk_is_retried_once_then_continues() {
        let attempts = std::sync::Arc::new(std::sync::Mutex::new(Vec::<usize>::new()));
        let config = BulkWriteConfig {
            chunk_size: 100,
            inter_chunk_delay: Duration::from_millis(0),
        };
        let data = items(250);
        let attempts_clone = attempts.clone();
        let written = chunked_bulk_write(
            &data,
            &config,
            &fast_backoff(),
            |_: &&str| true,
            move |chunk| {
                let mut log = attempts_clone.lock().unwrap();
                log.push(chunk.len());
                let call_count = log.len();
                drop(log);
                async move {
                    // Fail the first attempt at the second chunk only.
                    if call_count == 2 {
                        Err("broken pipe")
                    } else {
                        Ok(())
                    }
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(written, 250);
        // chunk 1, chunk 2 (fails), chunk 2 retried, chunk 3 = 4 calls.
        assert_eq!(attempts.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn non_recoverable_error_aborts_remaining_chunks() {
        let calls = std::sync::Arc::new(std::sync::Mutex::new(0));
        let config = BulkWriteConfig {
            chunk_size: 100,
            inter_chunk_delay: Duration::from_millis(0),
        };
        let data = items(250);
        let calls_clone = calls.clone();
        let result = chunked_bulk_write(
            &data,
            &config,
            &fast_backoff(),
            |_: &&str| false,
            move |_chunk| {
                *calls_clone.lock().unwrap() += 1;
                async { Err::<(), &str>("auth failure") }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
