//! Job request handlers
//!
//! Handles job.submit and engine.status by delegating to the engine.

use serde_json::{Value, json};

use crate::daemon::context::DaemonContext;
use crate::domain::Request;
use crate::ipc::messages::{DaemonError, DaemonResponse};
use crate::ipc::server::PeerCredentials;

/// Handle job.submit - bind the caller to the peer, admit the request and
/// enqueue its jobs
pub async fn handle_job_submit(id: u64, peer: PeerCredentials, params: &Value, ctx: &DaemonContext) -> DaemonResponse {
    let mut request: Request = match serde_json::from_value(params.clone()) {
        Ok(request) => request,
        Err(e) => return DaemonResponse::error(id, DaemonError::invalid_params(format!("Invalid request: {}", e))),
    };

    ctx.authenticate(peer, &mut request);

    let command = request.command.clone();
    match ctx.engine.submit(request).await {
        Ok(jobs) => {
            tracing::info!(command = %command, jobs = jobs.len(), "Request accepted");
            DaemonResponse::success(id, json!({"accepted": true, "jobs": jobs}))
        }
        Err(e) => {
            tracing::info!(command = %command, reason = %e, "Request rejected");
            DaemonResponse::error(id, e.into())
        }
    }
}

/// Handle engine.status - report scheduler state and queue contents
pub async fn handle_engine_status(id: u64, ctx: &DaemonContext) -> DaemonResponse {
    match ctx.engine.status().await {
        Ok(status) => match serde_json::to_value(&status) {
            Ok(mut value) => {
                value["backend"] = json!(ctx.backend);
                value["started_at"] = json!(ctx.started_at());
                value["uptime_secs"] = json!(ctx.uptime_secs());
                DaemonResponse::success(id, value)
            }
            Err(e) => DaemonResponse::error(id, DaemonError::internal_error(e.to_string())),
        },
        Err(e) => DaemonResponse::error(id, e.into()),
    }
}

/// Handle ping
pub fn handle_ping(id: u64) -> DaemonResponse {
    DaemonResponse::success(id, json!({"pong": true, "version": env!("CARGO_PKG_VERSION")}))
}
