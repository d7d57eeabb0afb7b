use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{FromRow, SqlitePool};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::AppError;
use crate::models::{Collection, Document, Snapshot, UserId};
use crate::store::{
    ChangeNotice, CollectionQuery, DocumentStore, SnapshotFeed, sort_snapshot, spawn_local_feed,
    stamp_created_at,
};

#[derive(Debug, Clone, FromRow)]
struct DocumentRow {
    id: String,
    data: String,
}

impl DocumentRow {
    fn into_document(self) -> Result<Document, AppError> {
        Ok(Document {
            id: self.id,
            data: serde_json::from_str(&self.data)?,
        })
    }
}

/// SQLite-backed document store. One `documents` table partitioned by user
/// and collection; bodies are stored as JSON text.
#[derive(Clone)]
pub struct SqliteStore {
    db: SqlitePool,
    changes: broadcast::Sender<ChangeNotice>,
}

impl SqliteStore {
    pub fn new(db: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self { db, changes }
    }

    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Self::migrate(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Single-connection in-memory database, migrated.
    pub async fn in_memory() -> Result<Self, AppError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::migrate(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(pool: &SqlitePool) -> Result<(), AppError> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(|e| AppError::Database(e.into()))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    fn notify(&self, user: &UserId, collection: Collection) {
        let _ = self.changes.send(ChangeNotice {
            user: user.clone(),
            collection,
        });
    }
}

pub async fn fetch_documents(
    db: &SqlitePool,
    user: &UserId,
    collection: Collection,
) -> Result<Snapshot, AppError> {
    let rows = sqlx::query_as::<_, DocumentRow>(
        r#"
        SELECT id, data
        FROM documents
        WHERE user_id = ?1 AND collection = ?2
        ORDER BY rowid
        "#,
    )
    .bind(user.as_str())
    .bind(collection.as_str())
    .fetch_all(db)
    .await?;

    rows.into_iter().map(DocumentRow::into_document).collect()
}

pub async fn find_document(
    db: &SqlitePool,
    user: &UserId,
    collection: Collection,
    id: &str,
) -> Result<Option<Document>, AppError> {
    sqlx::query_as::<_, DocumentRow>(
        "SELECT id, data FROM documents WHERE user_id = ?1 AND collection = ?2 AND id = ?3",
    )
    .bind(user.as_str())
    .bind(collection.as_str())
    .bind(id)
    .fetch_optional(db)
    .await?
    .map(DocumentRow::into_document)
    .transpose()
}

pub async fn upsert_document(
    db: &SqlitePool,
    user: &UserId,
    collection: Collection,
    id: &str,
    data: &Value,
) -> Result<(), AppError> {
    let now = Utc::now().to_rfc3339();
    let body = serde_json::to_string(data)?;

    sqlx::query(
        r#"
        INSERT INTO documents (user_id, collection, id, data, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?5)
        ON CONFLICT (user_id, collection, id)
        DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at
        "#,
    )
    .bind(user.as_str())
    .bind(collection.as_str())
    .bind(id)
    .bind(body)
    .bind(now)
    .execute(db)
    .await?;

    Ok(())
}

pub async fn delete_document(
    db: &SqlitePool,
    user: &UserId,
    collection: Collection,
    id: &str,
) -> Result<bool, AppError> {
    let result = sqlx::query("DELETE FROM documents WHERE user_id = ?1 AND collection = ?2 AND id = ?3")
        .bind(user.as_str())
        .bind(collection.as_str())
        .bind(id)
        .execute(db)
        .await?
        .rows_affected();

    Ok(result > 0)
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn fetch(&self, user: &UserId, query: &CollectionQuery) -> Result<Snapshot, AppError> {
        let mut snapshot = fetch_documents(&self.db, user, query.collection).await?;
        if let Some(field) = &query.order_by {
            sort_snapshot(&mut snapshot, field);
        }
        Ok(snapshot)
    }

    async fn subscribe(&self, user: &UserId, query: CollectionQuery) -> Result<SnapshotFeed, AppError> {
        let changes = self.changes.subscribe();
        let db = self.db.clone();
        let owner = user.clone();
        let collection = query.collection;
        let order_by = query.order_by;

        Ok(spawn_local_feed(user.clone(), collection, changes, move || {
            let db = db.clone();
            let owner = owner.clone();
            let order_by = order_by.clone();
            async move {
                let mut snapshot = fetch_documents(&db, &owner, collection).await?;
                if let Some(field) = &order_by {
                    sort_snapshot(&mut snapshot, field);
                }
                Ok(snapshot)
            }
        }))
    }

    async fn create(&self, user: &UserId, collection: Collection, id: &str, mut data: Value) -> Result<(), AppError> {
        stamp_created_at(&mut data, Utc::now());
        upsert_document(&self.db, user, collection, id, &data).await?;
        debug!("created {}/{} for {}", collection, id, user);
        self.notify(user, collection);
        Ok(())
    }

    async fn replace(&self, user: &UserId, collection: Collection, id: &str, data: Value) -> Result<(), AppError> {
        upsert_document(&self.db, user, collection, id, &data).await?;
        debug!("replaced {}/{} for {}", collection, id, user);
        self.notify(user, collection);
        Ok(())
    }

    async fn delete(&self, user: &UserId, collection: Collection, id: &str) -> Result<(), AppError> {
        if delete_document(&self.db, user, collection, id).await? {
            debug!("deleted {}/{} for {}", collection, id, user);
            self.notify(user, collection);
        }
        Ok(())
    }
}
