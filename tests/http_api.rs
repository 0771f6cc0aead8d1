use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use murmur::application::fanout::{
    ChannelBroker, FanoutContext, FanoutError, FanoutProducer, TaskBroker, TaskEnvelope,
    TaskHandle, TaskRegistry, WorkerOptions,
};
use murmur::application::repos::Repository;
use murmur::application::timeline::TimelineService;
use murmur::infra::http::{HttpState, USER_ID_HEADER, build_router};
use murmur::infra::memory::MemoryRepository;
use serde_json::{Value, json};
use tower::ServiceExt;

struct TestApp {
    router: Router,
    broker: ChannelBroker,
}

fn test_app() -> TestApp {
    let repo: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
    let (broker, queue) = ChannelBroker::channel();
    queue
        .into_worker(
            TaskRegistry::with_default_handlers(),
            FanoutContext::new(repo.clone(), Duration::from_secs(5)),
            WorkerOptions::default(),
        )
        .spawn();
    let timeline = TimelineService::new(
        repo,
        FanoutProducer::new(Arc::new(broker.clone())),
        Duration::from_secs(5),
    );
    TestApp {
        router: build_router(HttpState::new(timeline)),
        broker,
    }
}

struct UnreachableBroker;

#[async_trait]
impl TaskBroker for UnreachableBroker {
    async fn submit(&self, _task: TaskEnvelope) -> Result<TaskHandle, FanoutError> {
        Err(FanoutError::submission("broker unreachable"))
    }
}

fn app_with_unreachable_broker() -> TestApp {
    let repo: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
    // Never drained; only present to fill `TestApp`.
    let (broker, _queue) = ChannelBroker::channel();
    let timeline = TimelineService::new(
        repo,
        FanoutProducer::new(Arc::new(UnreachableBroker)),
        Duration::from_secs(5),
    );
    TestApp {
        router: build_router(HttpState::new(timeline)),
        broker,
    }
}

async fn send(
    app: &TestApp,
    method: Method,
    uri: &str,
    user: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(USER_ID_HEADER, user);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    };

    let response = app
        .router
        .clone()
        .oneshot(request)
        .await
        .expect("response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn ping_is_ok() {
    let app = test_app();
    let (status, _) = send(&app, Method::GET, "/maintenance/ping", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn create_requires_identity_header() {
    let app = test_app();
    let body = json!({ "text": "hi" });

    let (status, _) = send(&app, Method::POST, "/api/v1/posts", None, Some(body.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, Method::POST, "/api/v1/posts", Some("XYZ"), Some(body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_get_and_edit_post() {
    let app = test_app();
    let (status, created) = send(
        &app,
        Method::POST,
        "/api/v1/posts",
        Some("a1"),
        Some(json!({ "text": "first" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["text"], "first");
    assert_eq!(created["authorId"], "a1");
    assert!(created.get("orderingKey").is_none());
    let id = created["id"].as_str().expect("id").to_string();

    let (status, fetched) = send(&app, Method::GET, &format!("/api/v1/posts/{id}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], id.as_str());

    let (status, _) = send(
        &app,
        Method::PATCH,
        &format!("/api/v1/posts/{id}"),
        Some("b2"),
        Some(json!({ "text": "hijacked" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, edited) = send(
        &app,
        Method::PATCH,
        &format!("/api/v1/posts/{id}"),
        Some("a1"),
        Some(json!({ "text": "second" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(edited["text"], "second");
    assert_eq!(edited["createdAt"], created["createdAt"]);
}

#[tokio::test]
async fn missing_post_is_404() {
    let app = test_app();
    let (status, body) = send(&app, Method::GET, "/api/v1/posts/nothing", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = send(
        &app,
        Method::PATCH,
        "/api/v1/posts/nothing",
        Some("a1"),
        Some(json!({ "text": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn user_posts_page_with_next_page_token() {
    let app = test_app();
    for i in 0..11 {
        send(
            &app,
            Method::POST,
            "/api/v1/posts",
            Some("a1"),
            Some(json!({ "text": format!("post {i}") })),
        )
        .await;
    }

    let (status, first) = send(&app, Method::GET, "/api/v1/users/a1/posts", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["posts"].as_array().expect("posts").len(), 10);
    assert_eq!(first["posts"][0]["text"], "post 10");
    let next = first["nextPage"].as_str().expect("next page").to_string();

    let (status, last) = send(
        &app,
        Method::GET,
        &format!("/api/v1/users/a1/posts?page={next}&size=10"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(last["posts"].as_array().expect("posts").len(), 1);
    assert_eq!(last["posts"][0]["text"], "post 0");
    assert!(last.get("nextPage").is_none());
}

#[tokio::test]
async fn bad_paging_parameters_are_400() {
    let app = test_app();
    for uri in [
        "/api/v1/users/a1/posts?size=0",
        "/api/v1/users/a1/posts?size=101",
        "/api/v1/users/a1/posts?size=abc",
        "/api/v1/users/a1/posts?page=unknown_token",
    ] {
        let (status, _) = send(&app, Method::GET, uri, None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
    }
}

#[tokio::test]
async fn subscribe_and_read_feed() {
    let app = test_app();
    let (_, post) = send(
        &app,
        Method::POST,
        "/api/v1/posts",
        Some("a1"),
        Some(json!({ "text": "hello followers" })),
    )
    .await;

    let (status, _) = send(&app, Method::POST, "/api/v1/users/a1/subscribe", Some("b2"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, Method::POST, "/api/v1/users/a1/subscribe", Some("b2"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, Method::POST, "/api/v1/users/b2/subscribe", Some("b2"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, subscriptions) = send(&app, Method::GET, "/api/v1/subscriptions", Some("b2"), None).await;
    assert_eq!(subscriptions, json!({ "users": ["a1"] }));
    let (_, subscribers) = send(&app, Method::GET, "/api/v1/subscribers", Some("a1"), None).await;
    assert_eq!(subscribers, json!({ "users": ["b2"] }));

    app.broker.wait_idle().await;

    let (status, feed) = send(&app, Method::GET, "/api/v1/feed", Some("b2"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(feed["posts"].as_array().expect("posts").len(), 1);
    assert_eq!(feed["posts"][0]["id"], post["id"]);
    assert!(feed.get("nextPage").is_none());

    let (status, _) = send(&app, Method::GET, "/api/v1/feed", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn failed_submission_is_500_but_post_is_stored() {
    let app = app_with_unreachable_broker();
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/posts",
        Some("a1"),
        Some(json!({ "text": "stored anyway" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].is_string());

    let (status, page) = send(&app, Method::GET, "/api/v1/users/a1/posts", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["posts"].as_array().expect("posts").len(), 1);
    assert_eq!(page["posts"][0]["text"], "stored anyway");
}
