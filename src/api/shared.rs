use std::sync::Arc;

use actix_web::{http::StatusCode, Error, HttpResponse};
use serde::Serialize;
use serde_json::json;

use crate::error::{PipelineError, StoreError};
use crate::queue::Dispatcher;
use crate::repository::Store;
use crate::services::alerts::AlertEngine;

/// Shared handler state, registered once as `web::Data<AppState>`.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub dispatcher: Arc<Dispatcher>,
    pub alerts: Arc<AlertEngine>,
}

#[derive(Debug, Serialize)]
pub struct APIError {
    pub cause: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ResponseType<T = String> {
    pub data: Option<T>,
    pub error: Option<APIError>,
}

pub fn parse_error(status: StatusCode, cause: &str, message: String) -> Error {
    let body = json!(ResponseType::<String> {
        data: None,
        error: Some(APIError {
            cause: cause.to_string(),
            message,
        })
    });
    actix_web::error::InternalError::from_response(
        message_for_log(&body),
        HttpResponse::build(status).json(body),
    )
    .into()
}

fn message_for_log(body: &serde_json::Value) -> String {
    body["error"]["message"].as_str().unwrap_or_default().to_string()
}

/// Maps pipeline failures onto HTTP statuses. Internal details stay in the log.
pub fn pipeline_error(e: PipelineError) -> Error {
    match e {
        PipelineError::VideoNotFound(_) | PipelineError::Store(StoreError::NotFound { .. }) => {
            parse_error(StatusCode::NOT_FOUND, "not_found", e.to_string())
        }
        PipelineError::InvalidState { .. } | PipelineError::AlreadyProcessing(_) => {
            parse_error(StatusCode::BAD_REQUEST, "invalid_state", e.to_string())
        }
        other => {
            log::error!("Request failed: {}", other);
            parse_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "Internal server error".to_string(),
            )
        }
    }
}

pub fn store_error(e: StoreError) -> Error {
    pipeline_error(e.into())
}
