//! Remote processing pipeline: HTTP/WebSocket client, status reconciliation
//! and the analysis job surface.

pub mod client;
pub mod handlers;
pub mod insight;
pub mod jobs;
pub mod push;
pub mod reconcile;
pub mod signing;
pub mod tracker;
pub mod types;

use crate::state::AppState;
use axum::Router;

pub use client::{HttpPipelineClient, PipelineBackend};
pub use jobs::JobRegistry;

pub fn router() -> Router<AppState> {
    handlers::pipeline_routes()
}
