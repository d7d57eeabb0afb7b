pub mod http;
pub mod memory;
pub mod sqlite;

use std::cmp::Ordering;
use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Collection, Snapshot, UserId};

pub use http::{HttpStore, HttpStoreConfig};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

const FEED_BUFFER: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionQuery {
    pub collection: Collection,
    pub order_by: Option<String>,
}

impl CollectionQuery {
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            order_by: None,
        }
    }

    pub fn order_by(mut self, field: Option<&str>) -> Self {
        self.order_by = field.map(str::to_string);
        self
    }
}

/// The realtime document store the app is built on.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Hands out the id for a new document without a round trip.
    fn allocate_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }

    async fn fetch(&self, user: &UserId, query: &CollectionQuery) -> Result<Snapshot, AppError>;

    /// Initial snapshot first, then a full snapshot after every change.
    async fn subscribe(&self, user: &UserId, query: CollectionQuery) -> Result<SnapshotFeed, AppError>;

    async fn create(&self, user: &UserId, collection: Collection, id: &str, data: Value) -> Result<(), AppError>;

    /// Full-document replace; creates the document when missing.
    async fn replace(&self, user: &UserId, collection: Collection, id: &str, data: Value) -> Result<(), AppError>;

    /// Deleting a missing document is not an error.
    async fn delete(&self, user: &UserId, collection: Collection, id: &str) -> Result<(), AppError>;
}

/// Receiving end of a collection subscription. Dropping it unsubscribes.
pub struct SnapshotFeed {
    rx: mpsc::Receiver<Result<Snapshot, AppError>>,
    producer: Option<JoinHandle<()>>,
}

impl SnapshotFeed {
    pub fn channel() -> (mpsc::Sender<Result<Snapshot, AppError>>, Self) {
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        (tx, Self { rx, producer: None })
    }

    pub fn with_producer(mut self, producer: JoinHandle<()>) -> Self {
        self.producer = Some(producer);
        self
    }

    pub async fn next(&mut self) -> Option<Result<Snapshot, AppError>> {
        self.rx.recv().await
    }
}

impl Drop for SnapshotFeed {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}

/// Change notice fanned out by the local stores after each write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    pub user: UserId,
    pub collection: Collection,
}

/// Feeds a subscription from a local store: one snapshot up front, then a
/// fresh one whenever a matching change notice arrives.
pub(crate) fn spawn_local_feed<F, Fut>(
    user: UserId,
    collection: Collection,
    mut changes: broadcast::Receiver<ChangeNotice>,
    load: F,
) -> SnapshotFeed
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Snapshot, AppError>> + Send,
{
    let (tx, feed) = SnapshotFeed::channel();

    let producer = tokio::spawn(async move {
        let initial = load().await.map_err(|e| AppError::subscription(collection, e));
        if tx.send(initial).await.is_err() {
            return;
        }

        loop {
            match changes.recv().await {
                Ok(notice) if notice.user == user && notice.collection == collection => {}
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("{} feed lagged by {} notices, reloading", collection, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }

            let snapshot = load().await.map_err(|e| AppError::subscription(collection, e));
            if tx.send(snapshot).await.is_err() {
                break;
            }
        }
    });

    feed.with_producer(producer)
}

/// Sorts by a top-level field, ascending. Timestamps compare chronologically;
/// documents missing the field go last.
pub fn sort_snapshot(snapshot: &mut Snapshot, field: &str) {
    snapshot.sort_by(|a, b| compare_fields(a.data.get(field), b.data.get(field)));
}

fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => compare_values(a, b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => match (parse_timestamp(x), parse_timestamp(y)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x.cmp(y),
        },
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Server-side `createdAt`, only if the writer did not supply one.
pub fn stamp_created_at(data: &mut Value, now: DateTime<Utc>) {
    if let Value::Object(map) = data {
        map.entry("createdAt")
            .or_insert_with(|| Value::String(now.to_rfc3339()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Document;
    use serde_json::json;

    fn doc(id: &str, due: Value) -> Document {
        Document {
            id: id.to_string(),
            data: json!({ "dueDate": due }),
        }
    }

    #[test]
    fn test_sort_timestamps_chronologically() {
        let mut snapshot = vec![
            doc("late", json!("2026-03-14T10:00:00Z")),
            doc("frac", json!("2026-03-14T09:00:00.500Z")),
            doc("early", json!("2026-03-14T09:00:00Z")),
            Document { id: "none".to_string(), data: json!({}) },
            doc("offset", json!("2026-03-14T09:30:00+01:00")),
        ];
        sort_snapshot(&mut snapshot, "dueDate");

        let ids: Vec<&str> = snapshot.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["offset", "early", "frac", "late", "none"]);
    }

    #[test]
    fn test_stamp_keeps_existing_created_at() {
        let now = Utc::now();
        let mut fresh = json!({ "name": "Gym" });
        stamp_created_at(&mut fresh, now);
        assert_eq!(fresh["createdAt"], json!(now.to_rfc3339()));

        let mut existing = json!({ "createdAt": "2025-09-01T00:00:00Z" });
        stamp_created_at(&mut existing, now);
        assert_eq!(existing["createdAt"], "2025-09-01T00:00:00Z");
    }
}
