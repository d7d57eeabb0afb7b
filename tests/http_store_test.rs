use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use scholarix::api::router;
use scholarix::auth::AuthSession;
use scholarix::error::AppError;
use scholarix::models::*;
use scholarix::services::{MirrorEvent, Reconciler};
use scholarix::state::AppState;
use scholarix::store::{CollectionQuery, DocumentStore, HttpStore, HttpStoreConfig, SqliteStore};

async fn spawn_server() -> String {
    let store = SqliteStore::in_memory()
        .await
        .expect("Failed to create test db");
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router(AppState::new(store)))
            .await
            .unwrap();
    });

    format!("http://{}/", addr)
}

async fn client() -> HttpStore {
    let base_url = spawn_server().await;
    HttpStore::new(HttpStoreConfig::new(base_url).with_poll_interval(Duration::from_millis(25))).unwrap()
}

#[tokio::test]
async fn test_crud_over_http() {
    let store = client().await;
    let user = UserId::new("u1");
    let data = json!({ "title": "Essay draft", "type": "Essay", "dueDate": "2026-04-01T23:59:00Z" });

    store
        .create(&user, Collection::Deadlines, "essay", data)
        .await
        .unwrap();

    let docs = store
        .fetch(&user, &CollectionQuery::new(Collection::Deadlines))
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id, "essay");
    assert!(docs[0].data["createdAt"].is_string());

    let done = json!({
        "title": "Essay draft",
        "type": "Essay",
        "dueDate": "2026-04-01T23:59:00Z",
        "isCompleted": true
    });
    store
        .replace(&user, Collection::Deadlines, "essay", done)
        .await
        .unwrap();
    let docs = store
        .fetch(&user, &CollectionQuery::new(Collection::Deadlines))
        .await
        .unwrap();
    assert_eq!(docs[0].data["isCompleted"], true);

    store.delete(&user, Collection::Deadlines, "essay").await.unwrap();
    store.delete(&user, Collection::Deadlines, "essay").await.unwrap();
    let docs = store
        .fetch(&user, &CollectionQuery::new(Collection::Deadlines))
        .await
        .unwrap();
    assert!(docs.is_empty());
}

#[tokio::test]
async fn test_errors_map_to_app_errors() {
    let store = client().await;

    let result = store
        .fetch(&UserId::new(""), &CollectionQuery::new(Collection::Courses))
        .await;
    assert!(matches!(result, Err(AppError::AuthenticationRequired)));

    let invalid = json!({ "name": "", "gradeLevel": 9, "courseLevel": "Regular", "credits": 1.0 });
    let result = store
        .create(&UserId::new("u1"), Collection::Courses, "bad", invalid)
        .await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));
}

#[tokio::test]
async fn test_polling_subscription_emits_changes() {
    let store = client().await;
    let user = UserId::new("u1");

    let mut feed = store
        .subscribe(&user, CollectionQuery::new(Collection::Courses))
        .await
        .unwrap();
    let initial = feed.next().await.unwrap().unwrap();
    assert!(initial.is_empty());

    let data = json!({ "name": "Gym", "gradeLevel": 9, "courseLevel": "Regular", "credits": 1.0 });
    store.create(&user, Collection::Courses, "gym", data).await.unwrap();

    let next = tokio::time::timeout(Duration::from_secs(2), feed.next())
        .await
        .expect("no snapshot after change")
        .unwrap()
        .unwrap();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].id, "gym");
}

#[tokio::test]
async fn test_reconciler_over_http() {
    let store = client().await;
    let reconciler = Reconciler::new(AuthSession::signed_in(UserId::new("u1")), Arc::new(store));

    let mut attachment = reconciler.attach_courses().await.unwrap();
    let course = Course {
        id: None,
        name: "AP Chemistry".to_string(),
        grade_level: 11,
        course_level: CourseLevel::Ap,
        credits: 1.0,
        grade_percent: Some(93.0),
        created_at: None,
    };
    reconciler.create_course(course).unwrap().outcome().await.unwrap();
    assert_eq!(reconciler.gpa().weighted, "5.00");

    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), attachment.events.recv())
            .await
            .expect("no snapshot from server")
            .unwrap();
        if matches!(event, MirrorEvent::Replaced { records: 1, .. }) {
            break;
        }
    }

    let courses = reconciler.courses();
    assert_eq!(courses.len(), 1);
    assert!(courses[0].created_at.is_some());
    assert_eq!(reconciler.gpa().unweighted, "4.00");

    reconciler.detach_courses();
}

#[tokio::test]
async fn test_server_faults_are_upstream_errors() {
    let failing = axum::Router::new().fallback(|| async {
        (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "database offline")
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, failing).await.unwrap();
    });

    let store = HttpStore::new(HttpStoreConfig::new(format!("http://{}", addr))).unwrap();
    let user = UserId::new("u1");

    let result = store
        .fetch(&user, &CollectionQuery::new(Collection::Courses))
        .await;
    assert!(matches!(result, Err(AppError::Upstream(ref msg)) if msg.contains("database offline")));

    let result = store.delete(&user, Collection::Courses, "gym").await;
    assert!(matches!(result, Err(AppError::Upstream(_))));

    let reconciler = Reconciler::new(AuthSession::signed_in(user), Arc::new(store));
    let course = Course {
        id: None,
        name: "Gym".to_string(),
        grade_level: 9,
        course_level: CourseLevel::Regular,
        credits: 1.0,
        grade_percent: None,
        created_at: None,
    };
    let outcome = reconciler.create_course(course).unwrap().outcome().await;
    assert!(matches!(outcome, Err(AppError::RemoteWrite { ref message, .. }) if message.starts_with("Upstream")));
}
