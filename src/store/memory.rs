use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{broadcast, watch};

use crate::error::AppError;
use crate::models::{Collection, Document, Snapshot, UserId};
use crate::store::{
    ChangeNotice, CollectionQuery, DocumentStore, SnapshotFeed, sort_snapshot, spawn_local_feed,
    stamp_created_at,
};

type Partition = HashMap<(UserId, Collection), Vec<Document>>;

/// In-process store. Keeps insertion order, fans out change notices, and can
/// be told to fail or stall so callers' error paths can be exercised.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    documents: Mutex<Partition>,
    changes: broadcast::Sender<ChangeNotice>,
    fail_writes: AtomicBool,
    fail_subscriptions: AtomicBool,
    writes_paused: watch::Sender<bool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        let (writes_paused, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                documents: Mutex::new(HashMap::new()),
                changes,
                fail_writes: AtomicBool::new(false),
                fail_subscriptions: AtomicBool::new(false),
                writes_paused,
            }),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_subscriptions(&self, fail: bool) {
        self.inner.fail_subscriptions.store(fail, Ordering::SeqCst);
    }

    /// Writes issued while paused wait until `resume_writes`.
    pub fn pause_writes(&self) {
        self.inner.writes_paused.send_replace(true);
    }

    pub fn resume_writes(&self) {
        self.inner.writes_paused.send_replace(false);
    }

    pub fn documents(&self, user: &UserId, collection: Collection) -> Snapshot {
        self.inner.load(user, collection, None)
    }

    async fn write<F>(&self, user: &UserId, collection: Collection, apply: F) -> Result<(), AppError>
    where
        F: FnOnce(&mut Vec<Document>),
    {
        let mut paused = self.inner.writes_paused.subscribe();
        // the sender lives in `inner`, so this only fails if the store is gone
        let _ = paused.wait_for(|paused| !*paused).await;

        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::BadRequest("write rejected by store".to_string()));
        }

        {
            let mut documents = self.inner.documents.lock().unwrap_or_else(PoisonError::into_inner);
            apply(documents.entry((user.clone(), collection)).or_default());
        }

        let _ = self.inner.changes.send(ChangeNotice {
            user: user.clone(),
            collection,
        });
        Ok(())
    }
}

impl Inner {
    fn load(&self, user: &UserId, collection: Collection, order_by: Option<&str>) -> Snapshot {
        let documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        let mut snapshot = documents
            .get(&(user.clone(), collection))
            .cloned()
            .unwrap_or_default();
        if let Some(field) = order_by {
            sort_snapshot(&mut snapshot, field);
        }
        snapshot
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn fetch(&self, user: &UserId, query: &CollectionQuery) -> Result<Snapshot, AppError> {
        Ok(self.inner.load(user, query.collection, query.order_by.as_deref()))
    }

    async fn subscribe(&self, user: &UserId, query: CollectionQuery) -> Result<SnapshotFeed, AppError> {
        if self.inner.fail_subscriptions.load(Ordering::SeqCst) {
            return Err(AppError::subscription(query.collection, "permission denied"));
        }

        let changes = self.inner.changes.subscribe();
        let inner = self.inner.clone();
        let owner = user.clone();
        let collection = query.collection;
        Ok(spawn_local_feed(user.clone(), collection, changes, move || {
            let snapshot = inner.load(&owner, collection, query.order_by.as_deref());
            async move { Ok(snapshot) }
        }))
    }

    async fn create(&self, user: &UserId, collection: Collection, id: &str, mut data: Value) -> Result<(), AppError> {
        stamp_created_at(&mut data, Utc::now());
        let id = id.to_string();
        self.write(user, collection, move |docs| match docs.iter_mut().find(|d| d.id == id) {
            Some(existing) => existing.data = data,
            None => docs.push(Document { id, data }),
        })
        .await
    }

    async fn replace(&self, user: &UserId, collection: Collection, id: &str, data: Value) -> Result<(), AppError> {
        let id = id.to_string();
        self.write(user, collection, move |docs| match docs.iter_mut().find(|d| d.id == id) {
            Some(existing) => existing.data = data,
            None => docs.push(Document { id, data }),
        })
        .await
    }

    async fn delete(&self, user: &UserId, collection: Collection, id: &str) -> Result<(), AppError> {
        self.write(user, collection, |docs| docs.retain(|d| d.id != id))
            .await
    }
}
