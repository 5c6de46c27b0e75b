use actix_web::{web, HttpResponse, Result};
use log::{error, info};
use std::sync::Arc;

use crate::config::Config;
use crate::driver::OptimizationDriver;

/// Shared application state for the admin endpoints.
#[derive(Clone)]
pub struct JobState {
    pub driver: Arc<OptimizationDriver>,
}

impl JobState {
    pub fn new(driver: Arc<OptimizationDriver>) -> Self {
        Self { driver }
    }
}

pub async fn run_job(state: web::Data<JobState>) -> Result<HttpResponse> {
    info!("Manual image optimization run requested");
    let driver = Arc::clone(&state.driver);

    match web::block(move || driver.run()).await {
        Ok(outcome) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "outcome": outcome.kind(),
            "message": outcome.to_string(),
            "report": outcome.report(),
        }))),
        Err(e) => {
            error!("Manual optimization run could not be executed: {}", e);
            Ok(HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "run_failed",
                "message": e.to_string()
            })))
        }
    }
}

pub async fn stop_job(state: web::Data<JobState>) -> Result<HttpResponse> {
    state.driver.stop();
    Ok(HttpResponse::Accepted().json(serde_json::json!({
        "stopping": true,
        "running": state.driver.is_running()
    })))
}

pub async fn job_status(state: web::Data<JobState>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "running": state.driver.is_running(),
        "stop_requested": state.driver.stop_requested(),
        "statistics": state.driver.statistics().snapshot(),
    })))
}

pub async fn health_check() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "blob-image-optimizer",
        "version": env!("CARGO_PKG_VERSION")
    })))
}

pub async fn info_endpoint(config: web::Data<Config>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "service": "Blob Image Optimizer",
        "version": env!("CARGO_PKG_VERSION"),
        "config": {
            "root": config.job.root,
            "public_base_url": config.job.public_base_url,
            "interval_secs": config.job.interval_secs,
            "abort_on_error": config.job.abort_on_error,
            "quality": config.compression.quality,
            "jpeg_backend": config.compression.jpeg_backend.as_str(),
            "probe_enabled": config.probe.enabled,
            "probe_timeout_secs": config.probe.timeout_secs,
        },
        "supported_media_types": ["image/jpeg", "image/png"],
        "endpoints": {
            "run": "POST /job/run",
            "stop": "POST /job/stop",
            "status": "GET /job/status"
        }
    })))
}

/// Registers every admin route.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/info", web::get().to(info_endpoint))
        .route("/job/run", web::post().to(run_job))
        .route("/job/stop", web::post().to(stop_job))
        .route("/job/status", web::get().to(job_status));
}
