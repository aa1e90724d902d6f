use actix_web::{web, Error, HttpResponse};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use super::shared::{pipeline_error, AppState};
use crate::error::{PipelineError, StoreError};
use crate::models::Video;
use crate::repository::VideoRepository;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/progress/{video_id}", web::get().to(get_progress))
        .route("/retry/{video_id}", web::post().to(retry_processing));
}

/// Polled by the upload page.
#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub progress: i32,
    pub status: String,
    pub is_completed: bool,
    pub is_failed: bool,
    pub error_message: String,
}

impl From<&Video> for ProgressResponse {
    fn from(video: &Video) -> Self {
        Self {
            progress: video.processing_progress,
            status: video.processing_status.to_string(),
            is_completed: video.is_completed(),
            is_failed: video.is_failed(),
            error_message: video.error_message.clone().unwrap_or_default(),
        }
    }
}

async fn get_progress(
    path: web::Path<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let video_id = path.into_inner();
    let video = state.store.load_video(video_id).await.map_err(|e| match e {
        StoreError::NotFound { .. } => pipeline_error(PipelineError::VideoNotFound(video_id)),
        other => pipeline_error(other.into()),
    })?;
    Ok(HttpResponse::Ok().json(ProgressResponse::from(&video)))
}

async fn retry_processing(
    path: web::Path<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let video_id = path.into_inner();
    match state.dispatcher.retry(video_id).await {
        Ok(handle) => {
            log::info!("Retry requested for video {}", video_id);
            Ok(HttpResponse::Ok().json(json!({
                "success": true,
                "priority": handle.priority,
            })))
        }
        Err(PipelineError::InvalidState { .. }) => Ok(HttpResponse::BadRequest().json(json!({
            "success": false,
            "error": "Video is not in failed state",
        }))),
        Err(PipelineError::VideoNotFound(_)) => Ok(HttpResponse::NotFound().json(json!({
            "success": false,
            "error": "Video not found",
        }))),
        Err(e) => Err(pipeline_error(e)),
    }
}
