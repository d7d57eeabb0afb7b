use axum::Json;
use axum::extract::{FromRequestParts, Path, Query};
use axum::http::request::Parts;
use axum::routing::put;
use axum::{Router, extract::State, http::StatusCode, routing::get};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::models::*;
use crate::services::gpa::{self, GpaSummary};
use crate::state::AppState;
use crate::store::http::{NewDocumentRequest, USER_HEADER};
use crate::store::sqlite::find_document;
use crate::store::{CollectionQuery, DocumentStore};

#[derive(Deserialize)]
struct ListParams {
    #[serde(default)]
    order_by: Option<String>,
}

/// The calling user, taken from the `x-user-id` header.
pub struct Caller(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(AppError::AuthenticationRequired)?;
        Ok(Caller(UserId::new(id)))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/gpa", get(current_gpa))
        .route("/collections/{collection}", get(list_documents).post(create_document))
        .route(
            "/collections/{collection}/{id}",
            put(replace_document).delete(delete_document),
        )
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    sqlx::query("select 1").execute(state.store.pool()).await?;
    Ok(StatusCode::OK)
}

/// Rejects bodies that do not decode into a valid record for the collection.
fn validate_body(collection: Collection, data: &Value) -> Result<(), AppError> {
    match collection {
        Collection::Courses => serde_json::from_value::<Course>(data.clone())?.validate()?,
        Collection::Deadlines => serde_json::from_value::<Deadline>(data.clone())?.validate()?,
    }
    Ok(())
}

async fn list_documents(
    State(state): State<AppState>,
    Caller(user): Caller,
    Path(collection): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Snapshot>, AppError> {
    let collection: Collection = collection.parse()?;
    let query = CollectionQuery::new(collection).order_by(params.order_by.as_deref());
    let documents = state.store.fetch(&user, &query).await?;
    Ok(Json(documents))
}

async fn create_document(
    State(state): State<AppState>,
    Caller(user): Caller,
    Path(collection): Path<String>,
    Json(req): Json<NewDocumentRequest>,
) -> Result<(StatusCode, Json<Document>), AppError> {
    let collection: Collection = collection.parse()?;
    validate_body(collection, &req.data)?;

    let id = match req.id {
        Some(id) if !id.trim().is_empty() => id,
        _ => state.store.allocate_id(),
    };
    state.store.create(&user, collection, &id, req.data).await?;

    let document = find_document(state.store.pool(), &user, collection, &id)
        .await?
        .ok_or(AppError::InternalServerError)?;
    debug!("{} created {}/{}", user, collection, id);
    Ok((StatusCode::CREATED, Json(document)))
}

async fn replace_document(
    State(state): State<AppState>,
    Caller(user): Caller,
    Path((collection, id)): Path<(String, String)>,
    Json(data): Json<Value>,
) -> Result<StatusCode, AppError> {
    let collection: Collection = collection.parse()?;
    validate_body(collection, &data)?;
    state.store.replace(&user, collection, &id, data).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_document(
    State(state): State<AppState>,
    Caller(user): Caller,
    Path((collection, id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let collection: Collection = collection.parse()?;
    state.store.delete(&user, collection, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn current_gpa(
    State(state): State<AppState>,
    Caller(user): Caller,
) -> Result<Json<GpaSummary>, AppError> {
    let documents = state
        .store
        .fetch(&user, &CollectionQuery::new(Collection::Courses))
        .await?;

    let courses: Vec<Course> = documents
        .iter()
        .filter_map(|doc| match Course::from_document(doc) {
            Ok(course) => Some(course),
            Err(e) => {
                warn!("skipping course {} in gpa: {}", doc.id, e);
                None
            }
        })
        .collect();

    Ok(Json(gpa::calculate(&courses)))
}
