use actix_web::{web, Error, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use super::shared::{pipeline_error, store_error, AppState, ResponseType};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/alerts")
            .route("", web::get().to(list_active))
            .route("/{alert_id}/acknowledge", web::post().to(acknowledge)),
    );
}

#[derive(Debug, Default, Deserialize)]
pub struct AcknowledgeBody {
    pub acknowledged_by: Option<String>,
}

async fn list_active(state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    let alerts = state.alerts.active_alerts().await.map_err(store_error)?;
    Ok(HttpResponse::Ok().json(ResponseType {
        data: Some(alerts),
        error: None,
    }))
}

async fn acknowledge(
    path: web::Path<Uuid>,
    body: Option<web::Json<AcknowledgeBody>>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let by = body
        .and_then(|b| b.into_inner().acknowledged_by)
        .unwrap_or_else(|| "api".to_string());
    let alert = state
        .alerts
        .acknowledge(path.into_inner(), &by)
        .await
        .map_err(pipeline_error)?;
    Ok(HttpResponse::Ok().json(ResponseType {
        data: Some(alert),
        error: None,
    }))
}
