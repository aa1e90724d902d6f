pub mod alerts;
pub mod health;
pub mod progress;
pub mod shared;

use actix_web::web;

pub use shared::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .configure(progress::configure)
            .configure(alerts::configure)
            .configure(health::configure),
    );
}
