//! End-to-end pipeline integration tests.
//!
//! These tests run requests through the full six-stage chain built by
//! `Pipeline::standard`, with a stub handler standing in for the
//! application.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use serde_json::json;
use vmruntime_core::{
    environment, Environ, EnvironmentSnapshotter, RequestContextStore, RequestLifecycle,
};
use vmruntime_middleware::{
    admission::OVERLOADED_BODY, AdmissionGate, BoxFuture, HandlerError, HandlerResult,
    MiddlewareContext, Pipeline, Request, Response, ResponseExt, Stage,
};

struct Harness {
    pipeline: Pipeline,
    lifecycle: Arc<RequestLifecycle>,
}

fn harness(serving: usize, queue: usize) -> Harness {
    let user: Environ = [
        ("FOO".to_string(), "bar".to_string()),
        ("USER_IS_ADMIN".to_string(), "1".to_string()),
    ]
    .into();
    let config: Environ = [("CURRENT_MODULE_ID".to_string(), "default".to_string())].into();
    let snapshotter = EnvironmentSnapshotter::new(Arc::new(Environ::new()))
        .with_user_vars(user)
        .with_config_vars(config);

    let lifecycle = Arc::new(RequestLifecycle::new(Arc::new(RequestContextStore::new())));
    let pipeline = Pipeline::standard(
        Arc::new(snapshotter),
        AdmissionGate::new(serving, queue),
        Arc::clone(&lifecycle),
    );
    Harness {
        pipeline,
        lifecycle,
    }
}

fn request(path: &str, headers: &[(&str, &str)]) -> Request {
    let mut builder = http::Request::builder().uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Full::new(Bytes::new())).unwrap()
}

async fn body_string(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn echo_env(
    key: &'static str,
) -> impl FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, HandlerResult> + Send + 'static
{
    move |_ctx, _req| {
        Box::pin(async move {
            let value = environment::var(key).unwrap_or_default();
            Ok(Response::text(StatusCode::OK, value))
        })
    }
}

async fn run(
    harness: &Harness,
    req: Request,
    handler: impl FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, HandlerResult>
        + Send
        + 'static,
) -> HandlerResult {
    let ctx = MiddlewareContext::for_request(&req);
    harness.pipeline.process(ctx, req, handler).await
}

#[test]
fn test_standard_pipeline_order() {
    let harness = harness(1, 1);
    let names: Vec<_> = Stage::all().iter().map(|s| s.name()).collect();
    assert_eq!(harness.pipeline.stage_names(), names);
}

#[tokio::test]
async fn test_user_variable_visible() {
    let harness = harness(4, 4);
    let response = run(&harness, request("/", &[]), echo_env("FOO")).await.unwrap();
    assert_eq!(body_string(response).await, "bar");
}

#[tokio::test]
async fn test_reserved_key_beats_user_variable() {
    let harness = harness(4, 4);
    let response = run(&harness, request("/", &[]), echo_env("USER_IS_ADMIN"))
        .await
        .unwrap();
    assert_eq!(body_string(response).await, "0");
}

#[tokio::test]
async fn test_reserved_header_override_is_per_request() {
    let harness = harness(4, 4);

    let first = run(
        &harness,
        request("/", &[("x-appengine-user-is-admin", "1")]),
        echo_env("USER_IS_ADMIN"),
    )
    .await
    .unwrap();
    assert_eq!(body_string(first).await, "1");

    let second = run(&harness, request("/", &[]), echo_env("USER_IS_ADMIN"))
        .await
        .unwrap();
    assert_eq!(body_string(second).await, "0");
}

#[tokio::test]
async fn test_concurrent_requests_see_own_environment() {
    let harness = Arc::new(harness(8, 8));

    let spawn = |email: &'static str| {
        let harness = Arc::clone(&harness);
        tokio::spawn(async move {
            let req = request("/", &[("x-appengine-user-email", email)]);
            let response = run(&harness, req, |_ctx, _req| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    let value = environment::var("USER_EMAIL").unwrap_or_default();
                    Ok(Response::text(StatusCode::OK, value))
                })
            })
            .await
            .unwrap();
            body_string(response).await
        })
    };

    let a = spawn("a@example.com");
    let b = spawn("b@example.com");
    assert_eq!(a.await.unwrap(), "a@example.com");
    assert_eq!(b.await.unwrap(), "b@example.com");
}

#[tokio::test]
async fn test_request_state_reverts_to_global_default() {
    let harness = harness(4, 4);
    let store = Arc::clone(harness.lifecycle.store());
    store.set(None, "greeting", json!("hello")).unwrap();

    let handler_store = Arc::clone(&store);
    let response = run(&harness, request("/", &[]), move |_ctx, _req| {
        Box::pin(async move {
            assert_eq!(handler_store.get_current("greeting"), Some(json!("hello")));
            handler_store.set_current("greeting", json!("bonjour")).unwrap();
            assert_eq!(handler_store.get_current("greeting"), Some(json!("bonjour")));
            Ok(Response::text(StatusCode::OK, "ok"))
        })
    })
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(store.get(None, "greeting"), Some(json!("hello")));
    assert_eq!(store.active_requests(), 0);
    assert_eq!(harness.lifecycle.active_count(), 0);
}

#[tokio::test]
async fn test_handler_error_reraised_and_state_released() {
    let harness = harness(4, 4);
    let result = run(&harness, request("/", &[]), |_ctx, _req| {
        Box::pin(async { Err(HandlerError::failed(anyhow::anyhow!("boom"))) })
    })
    .await;

    let err = result.unwrap_err();
    let response = err.into_response();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_string(response).await,
        "<h1>500 Internal Server Error</h1>\n"
    );
    assert_eq!(harness.lifecycle.active_count(), 0);
}

#[tokio::test]
async fn test_admission_limits_concurrency() {
    const SERVING: usize = 2;
    const QUEUE: usize = 3;
    const REQUESTS: usize = 10;

    let harness = Arc::new(harness(SERVING, QUEUE));
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let release = Arc::new(tokio::sync::Notify::new());

    let mut tasks = Vec::new();
    for _ in 0..REQUESTS {
        let harness = Arc::clone(&harness);
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        let release = Arc::clone(&release);
        tasks.push(tokio::spawn(async move {
            let response = run(&harness, request("/work", &[]), move |_ctx, _req| {
                Box::pin(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    release.notified().await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(Response::text(StatusCode::OK, "done"))
                })
            })
            .await
            .unwrap();
            (response.status(), body_string(response).await)
        }));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Let the queued requests through one serving slot at a time.
    for _ in 0..REQUESTS {
        tokio::time::sleep(Duration::from_millis(10)).await;
        release.notify_waiters();
    }

    let mut served = 0;
    let mut rejected = 0;
    for task in tasks {
        let (status, body) = task.await.unwrap();
        match status {
            StatusCode::OK => served += 1,
            StatusCode::SERVICE_UNAVAILABLE => {
                assert_eq!(body, OVERLOADED_BODY);
                rejected += 1;
            }
            other => panic!("unexpected status {other}"),
        }
    }

    assert!(peak.load(Ordering::SeqCst) <= SERVING);
    assert_eq!(served, SERVING + QUEUE);
    assert_eq!(rejected, REQUESTS - SERVING - QUEUE);
}

#[tokio::test]
async fn test_health_check_bypasses_full_gate() {
    let harness = Arc::new(harness(1, 1));
    let release = Arc::new(tokio::sync::Notify::new());

    let blocker = {
        let harness = Arc::clone(&harness);
        let release = Arc::clone(&release);
        tokio::spawn(async move {
            run(&harness, request("/slow", &[]), move |_ctx, _req| {
                Box::pin(async move {
                    release.notified().await;
                    Ok(Response::text(StatusCode::OK, "slow"))
                })
            })
            .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let response = run(&harness, request("/_ah/health", &[]), |_ctx, _req| {
        Box::pin(async { Ok(Response::text(StatusCode::OK, "ok")) })
    })
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    release.notify_waiters();
    assert!(blocker.await.unwrap().is_ok());
}
