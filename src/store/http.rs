use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::models::{Collection, Document, Snapshot, UserId};
use crate::store::{CollectionQuery, DocumentStore, SnapshotFeed};

pub const USER_HEADER: &str = "x-user-id";

#[derive(Clone, Debug)]
pub struct HttpStoreConfig {
    pub base_url: String,
    pub poll_interval: Duration,
}

impl HttpStoreConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NewDocumentRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub data: Value,
}

/// Client for the document service exposed by the `scholarix` binary.
/// Subscriptions poll the collection and emit only changed snapshots.
#[derive(Clone)]
pub struct HttpStore {
    client: Client,
    config: HttpStoreConfig,
}

impl HttpStore {
    pub fn new(config: HttpStoreConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build http client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn collection_url(&self, collection: Collection) -> String {
        format!("{}/collections/{}", self.config.base_url, collection)
    }

    fn document_url(&self, collection: Collection, id: &str) -> String {
        format!("{}/collections/{}/{}", self.config.base_url, collection, id)
    }

    async fn query_collection(
        client: &Client,
        url: &str,
        user: &UserId,
        order_by: Option<&str>,
    ) -> Result<Snapshot, AppError> {
        let url = match order_by {
            Some(field) => format!("{}?order_by={}", url, field),
            None => url.to_string(),
        };
        let response = client
            .get(&url)
            .header(USER_HEADER, user.as_str())
            .send()
            .await?;

        let response = check_status(response).await?;
        Ok(response.json::<Vec<Document>>().await?)
    }
}

async fn check_status(response: Response) -> Result<Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(AppError::AuthenticationRequired);
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(AppError::NotFound);
    }
    let body = response.text().await.unwrap_or_default();
    if status.is_server_error() {
        return Err(AppError::Upstream(format!("{}: {}", status, body)));
    }
    Err(AppError::BadRequest(format!("Document service error {}: {}", status, body)))
}

#[async_trait]
impl DocumentStore for HttpStore {
    async fn fetch(&self, user: &UserId, query: &CollectionQuery) -> Result<Snapshot, AppError> {
        let url = self.collection_url(query.collection);
        Self::query_collection(&self.client, &url, user, query.order_by.as_deref()).await
    }

    async fn subscribe(&self, user: &UserId, query: CollectionQuery) -> Result<SnapshotFeed, AppError> {
        let (tx, feed) = SnapshotFeed::channel();
        let client = self.client.clone();
        let url = self.collection_url(query.collection);
        let interval = self.config.poll_interval;
        let user = user.clone();

        let producer = tokio::spawn(async move {
            let collection = query.collection;
            let mut last: Option<Snapshot> = None;
            let mut failing = false;

            loop {
                match Self::query_collection(&client, &url, &user, query.order_by.as_deref()).await {
                    Ok(snapshot) => {
                        failing = false;
                        if last.as_ref() != Some(&snapshot) {
                            debug!("{} changed upstream ({} documents)", collection, snapshot.len());
                            last = Some(snapshot.clone());
                            if tx.send(Ok(snapshot)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        // one report per run of failures
                        if !failing {
                            failing = true;
                            warn!("polling {} failed: {}", collection, e);
                            if tx.send(Err(AppError::subscription(collection, e))).await.is_err() {
                                break;
                            }
                        }
                    }
                }

                tokio::time::sleep(interval).await;
            }
        });

        Ok(feed.with_producer(producer))
    }

    async fn create(&self, user: &UserId, collection: Collection, id: &str, data: Value) -> Result<(), AppError> {
        let request_body = NewDocumentRequest {
            id: Some(id.to_string()),
            data,
        };
        let response = self
            .client
            .post(self.collection_url(collection))
            .header(USER_HEADER, user.as_str())
            .json(&request_body)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn replace(&self, user: &UserId, collection: Collection, id: &str, data: Value) -> Result<(), AppError> {
        let response = self
            .client
            .put(self.document_url(collection, id))
            .header(USER_HEADER, user.as_str())
            .json(&data)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn delete(&self, user: &UserId, collection: Collection, id: &str) -> Result<(), AppError> {
        let response = self
            .client
            .delete(self.document_url(collection, id))
            .header(USER_HEADER, user.as_str())
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}
