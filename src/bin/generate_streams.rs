//! Generates HLS/DASH streams for encoded videos.
//!
//! Exits non-zero when any requested video ends without a ready stream.

use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use dotenv::dotenv;
use uuid::Uuid;

use video_pipeline::config::AppConfig;
use video_pipeline::db::{self, PgStore};
use video_pipeline::models::StreamProtocol;
use video_pipeline::services::streams::{BatchReport, StreamGenerator, StreamRequest};
use video_pipeline::services::tools::FfmpegTools;

#[derive(Parser)]
#[command(name = "generate-streams", about = "Generate adaptive streams for encoded videos")]
struct Cli {
    /// Only this video
    #[arg(long)]
    video_id: Option<Uuid>,

    /// Only this protocol; both when omitted
    #[arg(long, value_enum)]
    stream_type: Option<StreamType>,

    /// Maximum videos per run (defaults to streams.default_limit)
    #[arg(long)]
    limit: Option<usize>,

    /// Regenerate streams that are already ready
    #[arg(long)]
    force: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum StreamType {
    Hls,
    Dash,
}

impl From<StreamType> for StreamProtocol {
    fn from(t: StreamType) -> Self {
        match t {
            StreamType::Hls => StreamProtocol::Hls,
            StreamType::Dash => StreamProtocol::Dash,
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<BatchReport> {
    let config = AppConfig::new().context("Failed to load configuration")?;
    let pool = db::create_pool(&config.database.url, config.database.max_connections as usize)
        .await
        .context("Failed to create database pool")?;

    let generator = StreamGenerator::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(FfmpegTools::new(config.ffmpeg.clone())),
        config.storage.media_root.clone(),
        config.streams.clone(),
    );
    let request = StreamRequest {
        video_id: cli.video_id,
        protocol: cli.stream_type.map(StreamProtocol::from),
        limit: cli.limit.unwrap_or(config.streams.default_limit),
        force: cli.force,
    };
    generator
        .run_batch(&request)
        .await
        .context("Stream generation failed")
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();

    let report = match run(Cli::parse()).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("error: {:#}", e);
            process::exit(1);
        }
    };

    for video in &report.videos {
        println!(
            "{}: {} generated, {} skipped, {} failed, {} ready",
            video.video_id, video.generated, video.skipped, video.failed, video.ready
        );
    }
    if report.videos.is_empty() {
        println!("No videos to process");
    }

    let failed = report.failed_videos();
    if !failed.is_empty() {
        eprintln!("{} video(s) without a ready stream", failed.len());
        process::exit(1);
    }
}
