mod common;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use course_sync::api::router;
use course_sync::identity::{Identity, Role, StaticIdentityResolver};

use common::{harness_with, test_config};

async fn app() -> (common::Harness, axum::Router) {
    let identity = StaticIdentityResolver::default()
        .with_token("teacher-token", Identity::new("t1", Role::Teacher))
        .with_token("other-token", Identity::new("t2", Role::Teacher))
        .with_token("student-token", Identity::new("s1", Role::Student))
        .with_token("admin-token", Identity::new("root", Role::Admin));
    let h = harness_with(test_config(), identity).await;
    let app = router(h.state.clone());
    (h, app)
}

fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let (_h, app) = app().await;
    let response = app.oneshot(request("GET", "/health", None, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_create_course_requires_credentials() {
    let (_h, app) = app().await;
    let body = json!({ "title": "Matematyka" });

    let response = app
        .clone()
        .oneshot(request("POST", "/courses", None, Some(body.clone())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(request("POST", "/courses", Some("bogus"), Some(body.clone())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(request("POST", "/courses", Some("student-token"), Some(body)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_teacher_creates_and_reads_course() {
    let (_h, app) = app().await;
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/courses",
            Some("teacher-token"),
            Some(json!({ "title": "Matematyka", "links": ["https://wiki/a"] })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let created = json_body(response).await;
    assert_eq!(created["slug"], "matematyka");
    assert_eq!(created["owner_id"], "t1");
    let id = created["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(request("GET", &format!("/courses/{}", id), Some("teacher-token"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // an unassigned student may not read it
    let response = app
        .clone()
        .oneshot(request("GET", &format!("/courses/{}", id), Some("student-token"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/courses/{}/assignments", id),
            Some("teacher-token"),
            Some(json!({ "subject_ids": ["s1"] })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["changed"], 1);

    let response = app
        .oneshot(request("GET", &format!("/courses/{}", id), Some("student-token"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_only_owner_updates_and_deletes() {
    let (_h, app) = app().await;
    let response = app
        .clone()
        .oneshot(request("POST", "/courses", Some("teacher-token"), Some(json!({ "title": "Chemia" }))))
        .await
        .unwrap();
    let id = json_body(response).await["id"].as_str().unwrap().to_string();

    let update = json!({ "title": "Chemia II", "regenerate_slug": true });
    let response = app
        .clone()
        .oneshot(request("PUT", &format!("/courses/{}", id), Some("other-token"), Some(update.clone())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .clone()
        .oneshot(request("PUT", &format!("/courses/{}", id), Some("teacher-token"), Some(update)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let updated = json_body(response).await;
    assert_eq!(updated["title"], "Chemia II");
    assert_eq!(updated["slug"], "chemia-ii");

    let response = app
        .clone()
        .oneshot(request("DELETE", &format!("/courses/{}", id), Some("teacher-token"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(request("GET", &format!("/courses/{}", id), Some("teacher-token"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_class_fan_out_over_http() {
    let (_h, app) = app().await;
    let response = app
        .clone()
        .oneshot(request("POST", "/courses", Some("teacher-token"), Some(json!({ "title": "Fizyka" }))))
        .await
        .unwrap();
    let course_id = json_body(response).await["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/classes",
            Some("teacher-token"),
            Some(json!({ "id": "g1", "name": "2B", "students": ["s1", "s2"] })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/courses/{}/classes/g1", course_id),
            Some("teacher-token"),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["students_added"], 2);

    // a linked class cannot be deleted
    let response = app
        .oneshot(request("DELETE", "/classes/g1", Some("teacher-token"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_projection_outage_maps_to_generic_retry() {
    let (h, app) = app().await;
    h.projection.set_failing(true);

    let response = app
        .clone()
        .oneshot(request("POST", "/courses", Some("teacher-token"), Some(json!({ "title": "Biologia" }))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["message"], "Temporarily unavailable, try again");
    assert!(!body.to_string().contains("projection"));

    h.projection.set_failing(false);
    let response = app
        .clone()
        .oneshot(request("POST", "/sync", Some("teacher-token"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .oneshot(request("POST", "/sync", Some("admin-token"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["reconciled"], 1);
}
