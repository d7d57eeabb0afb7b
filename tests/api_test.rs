use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use scholarix::api::router;
use scholarix::state::AppState;
use scholarix::store::SqliteStore;

async fn setup_app() -> Router {
    let store = SqliteStore::in_memory()
        .await
        .expect("Failed to create test db");
    router(AppState::new(store))
}

fn request(method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn algebra() -> Value {
    json!({
        "name": "Algebra II",
        "gradeLevel": 10,
        "courseLevel": "Honors",
        "credits": 4.0,
        "gradePercent": 95.0
    })
}

#[tokio::test]
async fn test_health() {
    let app = setup_app().await;
    let (status, _) = send(&app, request("GET", "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_missing_user_is_unauthorized() {
    let app = setup_app().await;

    let (status, body) = send(&app, request("GET", "/collections/courses", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Authentication required");

    let (status, _) = send(&app, request("GET", "/gpa", Some("  "), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_list_and_gpa() {
    let app = setup_app().await;

    let (status, created) = send(
        &app,
        request(
            "POST",
            "/collections/courses",
            Some("u1"),
            Some(json!({ "data": algebra() })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(!created["id"].as_str().unwrap().is_empty());
    assert!(created["data"]["createdAt"].is_string());

    let gym = json!({
        "name": "Gym",
        "gradeLevel": 10,
        "courseLevel": "Regular",
        "credits": 1.0,
        "gradePercent": 85.0
    });
    let (status, created) = send(
        &app,
        request(
            "POST",
            "/collections/courses",
            Some("u1"),
            Some(json!({ "id": "gym", "data": gym })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["id"], "gym");

    let (status, listed) = send(&app, request("GET", "/collections/courses", Some("u1"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 2);

    let (_, other) = send(&app, request("GET", "/collections/courses", Some("u2"), None)).await;
    assert!(other.as_array().unwrap().is_empty());

    let (status, gpa) = send(&app, request("GET", "/gpa", Some("u1"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(gpa, json!({ "unweighted": "3.80", "weighted": "4.20" }));
}

#[tokio::test]
async fn test_invalid_records_are_rejected() {
    let app = setup_app().await;

    let mut too_many_credits = algebra();
    too_many_credits["credits"] = json!(11.0);
    let (status, body) = send(
        &app,
        request(
            "POST",
            "/collections/courses",
            Some("u1"),
            Some(json!({ "data": too_many_credits })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("credits"));

    let concert = json!({
        "title": "Spring concert",
        "type": "Event",
        "dueDate": "2026-04-10T19:00:00Z",
        "endDate": "2026-04-10T18:00:00Z"
    });
    let (status, _) = send(
        &app,
        request(
            "POST",
            "/collections/deadlines",
            Some("u1"),
            Some(json!({ "data": concert })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, request("GET", "/collections/grades", Some("u1"), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, listed) = send(&app, request("GET", "/collections/deadlines", Some("u1"), None)).await;
    assert!(listed.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_replace_delete_and_ordering() {
    let app = setup_app().await;

    for (id, due) in [("late", "2026-04-12T09:00:00Z"), ("early", "2026-04-11T09:00:00Z")] {
        let deadline = json!({ "title": id, "type": "Homework", "dueDate": due });
        let (status, _) = send(
            &app,
            request(
                "POST",
                "/collections/deadlines",
                Some("u1"),
                Some(json!({ "id": id, "data": deadline })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (_, listed) = send(
        &app,
        request("GET", "/collections/deadlines?order_by=dueDate", Some("u1"), None),
    )
    .await;
    let ids: Vec<&str> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["early", "late"]);

    let completed = json!({
        "title": "late",
        "type": "Homework",
        "dueDate": "2026-04-12T09:00:00Z",
        "isCompleted": true
    });
    let (status, _) = send(
        &app,
        request("PUT", "/collections/deadlines/late", Some("u1"), Some(completed)),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    for _ in 0..2 {
        let (status, _) = send(&app, request("DELETE", "/collections/deadlines/early", Some("u1"), None)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    let (_, listed) = send(&app, request("GET", "/collections/deadlines", Some("u1"), None)).await;
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["data"]["isCompleted"], true);
}

#[tokio::test]
async fn test_unknown_deadline_type_is_stored_verbatim() {
    let app = setup_app().await;

    let workshop = json!({
        "title": "Robotics workshop",
        "type": "Workshop",
        "dueDate": "2026-04-10T10:00:00Z",
        "endDate": "2026-04-10T12:00:00Z"
    });
    let (status, created) = send(
        &app,
        request(
            "POST",
            "/collections/deadlines",
            Some("u1"),
            Some(json!({ "id": "w", "data": workshop })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["data"]["type"], "Workshop");
}
