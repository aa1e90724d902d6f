use actix_files::Files;
use actix_web::{web, App, HttpServer};
use dotenv::dotenv;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use video_pipeline::api::{self, AppState};
use video_pipeline::config::AppConfig;
use video_pipeline::db::{self, PgStore};
use video_pipeline::queue::{spawn_periodic, Dispatcher, MemoryJobQueue, QueueName, Worker};
use video_pipeline::repository::Store;
use video_pipeline::services::alerts::{AlertEngine, Notifications};
use video_pipeline::services::guard::{Guard, HostProbe};
use video_pipeline::services::orchestrator::Orchestrator;
use video_pipeline::services::streams::StreamGenerator;
use video_pipeline::services::tools::FfmpegTools;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if it exists
    dotenv().ok();

    env_logger::init();

    let config = AppConfig::new().expect("Failed to load configuration");
    let config = Arc::new(config);

    log::info!(
        "Starting server on {}:{}",
        config.server.host,
        config.server.port
    );

    let streams_root = config.storage.streams_root();
    for dir in [&config.storage.media_root, &config.storage.temp_dir, &streams_root] {
        tokio::fs::create_dir_all(dir)
            .await
            .expect("Failed to create media directory");
    }

    let pool = db::create_pool(
        &config.database.url,
        config.database.max_connections as usize,
    )
    .await
    .expect("Failed to create database pool");
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));

    let tools = Arc::new(FfmpegTools::new(config.ffmpeg.clone()));
    let guard = Arc::new(Guard::new(
        Arc::new(HostProbe),
        tools.clone(),
        config.pipeline.min_disk_space_bytes(),
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        tools.clone(),
        guard.clone(),
        &config,
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        Arc::new(MemoryJobQueue::new()),
        orchestrator,
        config.scheduler.clone(),
        config.pipeline.clone(),
    ));
    let streams = Arc::new(StreamGenerator::new(
        store.clone(),
        tools,
        config.storage.media_root.clone(),
        config.streams.clone(),
    ));

    let notifier =
        Notifications::new(config.alerts.clone()).expect("Failed to build notification client");
    let alerts = Arc::new(AlertEngine::new(
        store.clone(),
        guard,
        Arc::new(notifier),
        config.storage.media_root.clone(),
        config.alerts.clone(),
    ));
    if let Err(e) = alerts.seed_default_rules().await {
        log::error!("Failed to seed alert rules: {}", e);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    for id in 0..config.scheduler.worker_count.max(1) {
        let worker = Worker::new(id, QueueName::VideoProcessing, dispatcher.clone(), streams.clone());
        tasks.push(tokio::spawn(worker.run_worker_loop(shutdown_rx.clone())));
    }
    let stream_worker = Worker::new(
        config.scheduler.worker_count.max(1),
        QueueName::Default,
        dispatcher.clone(),
        streams,
    );
    tasks.push(tokio::spawn(stream_worker.run_worker_loop(shutdown_rx.clone())));

    let scanner = dispatcher.clone();
    tasks.push(spawn_periodic(
        "pending-scan",
        Duration::from_secs(config.scheduler.pending_scan_secs),
        shutdown_rx.clone(),
        move || {
            let scanner = scanner.clone();
            async move {
                if let Err(e) = scanner.scan_pending(chrono::Utc::now()).await {
                    log::error!("Pending scan failed: {}", e);
                }
            }
        },
    ));

    let ticker = alerts.clone();
    tasks.push(spawn_periodic(
        "alert-tick",
        Duration::from_secs(config.scheduler.alert_tick_secs),
        shutdown_rx,
        move || {
            let ticker = ticker.clone();
            async move {
                if let Err(e) = ticker.tick().await {
                    log::error!("Alert tick failed: {}", e);
                }
            }
        },
    ));

    let state = web::Data::new(AppState {
        store,
        dispatcher,
        alerts,
    });

    let served = HttpServer::new(move || {
        App::new()
            .service(Files::new("/streams", streams_root.clone()))
            .app_data(state.clone())
            .wrap(actix_cors::Cors::permissive()) // Configure properly in production
            .configure(api::configure)
    })
    .bind((config.server.host.clone(), config.server.port))?
    .run()
    .await;

    log::info!("Server stopped, waiting for workers");
    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }
    served
}
