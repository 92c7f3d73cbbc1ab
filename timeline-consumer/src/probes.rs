use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use timeline_common::TimelineStore;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::pipeline::PipelineState;

#[derive(Clone)]
pub struct ProbeContext {
    pub store: Arc<dyn TimelineStore>,
    /// `None` when the pipeline is disabled.
    pub pipeline: Option<watch::Receiver<PipelineState>>,
    pub shutdown: CancellationToken,
}

#[derive(Debug, Serialize)]
pub struct Readiness {
    pub status: &'static str,
    pub postgres: String,
    pub kafka: &'static str,
}

pub fn router(context: ProbeContext) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/_liveness", get(liveness))
        .route("/_readiness", get(readiness))
        .with_state(context)
}

pub async fn index() -> &'static str {
    "timeline consumer"
}

/// A pipeline that stopped on its own, while the process is not shutting down, is dead.
async fn liveness(State(context): State<ProbeContext>) -> StatusCode {
    let stopped = context
        .pipeline
        .as_ref()
        .is_some_and(|state| *state.borrow() == PipelineState::Stopped);

    if stopped && !context.shutdown.is_cancelled() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn readiness(State(context): State<ProbeContext>) -> (StatusCode, Json<Readiness>) {
    let postgres = match context.store.ping().await {
        Ok(()) => "ok".to_owned(),
        Err(e) => e.to_string(),
    };
    let kafka = match &context.pipeline {
        Some(state) => state.borrow().as_str(),
        None => "disabled",
    };

    let ready = postgres == "ok";
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(Readiness {
            status: if ready { "ok" } else { "degraded" },
            postgres,
            kafka,
        }),
    )
}
