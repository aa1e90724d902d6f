use std::path::PathBuf;
use std::sync::Arc;

use actix_web::{http::StatusCode, test, web, App};
use serde_json::Value;
use uuid::Uuid;

use video_pipeline::api::{self, AppState};
use video_pipeline::config::AppConfig;
use video_pipeline::models::{AlertRule, AlertType, Severity, Video};
use video_pipeline::queue::{Dispatcher, JobQueue, MemoryJobQueue, QueueName};
use video_pipeline::repository::{AlertRepository, MemoryStore, VideoRepository};
use video_pipeline::services::alerts::AlertEngine;
use video_pipeline::services::guard::Guard;
use video_pipeline::services::orchestrator::Orchestrator;
use video_pipeline::test_utils::{FakeTools, FixedProbe, RecordingNotifier};

struct Backend {
    store: Arc<MemoryStore>,
    tools: Arc<FakeTools>,
    queue: Arc<MemoryJobQueue>,
    alerts: Arc<AlertEngine>,
    state: web::Data<AppState>,
}

fn backend() -> Backend {
    let config = AppConfig::default();
    let store = Arc::new(MemoryStore::new());
    let tools = Arc::new(FakeTools::new());
    let guard = Arc::new(Guard::new(
        Arc::new(FixedProbe::free_mb(50_000)),
        tools.clone(),
        0,
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        tools.clone(),
        guard.clone(),
        &config,
    ));
    let queue = Arc::new(MemoryJobQueue::new());
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        queue.clone(),
        orchestrator,
        config.scheduler.clone(),
        config.pipeline.clone(),
    ));
    let alerts = Arc::new(AlertEngine::new(
        store.clone(),
        guard,
        Arc::new(RecordingNotifier::default()),
        PathBuf::from("/media"),
        config.alerts.clone(),
    ));
    let state = web::Data::new(AppState {
        store: store.clone(),
        dispatcher,
        alerts: alerts.clone(),
    });
    Backend {
        store,
        tools,
        queue,
        alerts,
        state,
    }
}

#[actix_web::test]
async fn progress_reports_video_state() {
    let b = backend();
    let mut video = Video::new("clip", "/src.mp4", None);
    video.mark_failed("encode_720p failed");
    b.store.save_video(&video).await.unwrap();

    let app = test::init_service(App::new().app_data(b.state.clone()).configure(api::configure)).await;

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/progress/{}", video.id))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "failed");
    assert_eq!(body["is_failed"], true);
    assert_eq!(body["is_completed"], false);
    assert_eq!(body["error_message"], "encode_720p failed");

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/progress/{}", Uuid::new_v4()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn retry_only_from_failed() {
    let b = backend();
    let mut failed = Video::new("failed", "/src.mp4", None);
    failed.mark_failed("boom");
    b.store.save_video(&failed).await.unwrap();
    let pending = Video::new("pending", "/src.mp4", None);
    b.store.save_video(&pending).await.unwrap();

    let app = test::init_service(App::new().app_data(b.state.clone()).configure(api::configure)).await;

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/retry/{}", failed.id))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["priority"], 5);
    assert_eq!(b.queue.depth(QueueName::VideoProcessing).await, 1);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/retry/{}", pending.id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Video is not in failed state");

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/retry/{}", Uuid::new_v4()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn alerts_list_and_acknowledge() {
    let b = backend();
    let rule = AlertRule::new("High queue size", AlertType::QueueSize, 1.0, Severity::Warning);
    b.store.save_rule(&rule).await.unwrap();
    b.store
        .save_video(&Video::new("queued", "/src.mp4", None))
        .await
        .unwrap();
    let report = b.alerts.tick().await.unwrap();
    let alert_id = report.created[0].id;

    let app = test::init_service(App::new().app_data(b.state.clone()).configure(api::configure)).await;

    let req = test::TestRequest::get().uri("/api/v1/alerts").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/alerts/{}/acknowledge", alert_id))
        .set_json(serde_json::json!({ "acknowledged_by": "oncall" }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["status"], "acknowledged");
    assert_eq!(body["data"]["acknowledged_by"], "oncall");

    // only active alerts can be acknowledged
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/alerts/{}/acknowledge", alert_id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn health_is_degraded_without_tools() {
    let b = backend();
    let app = test::init_service(App::new().app_data(b.state.clone()).configure(api::configure)).await;

    let req = test::TestRequest::get().uri("/api/v1/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "ok");

    b.tools.set_available(false);
    let req = test::TestRequest::get().uri("/api/v1/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["system"]["tools_available"], false);
}
