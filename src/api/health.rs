use actix_web::{web, Error, HttpResponse};
use serde_json::json;

use super::shared::{pipeline_error, AppState};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health_check)));
}

async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    let health = state.alerts.system_health().await.map_err(pipeline_error)?;
    Ok(HttpResponse::Ok().json(json!({
        "status": if health.healthy { "ok" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "system": health,
    })))
}
