//! Request handlers for the daemon
//!
//! `DaemonHandler` routes each IPC method to its handler. `subscribe` never
//! reaches it; the server handles that itself.

pub mod jobs;

use async_trait::async_trait;

use crate::daemon::context::DaemonContext;
use crate::ipc::messages::{DaemonError, DaemonRequest, DaemonResponse, Methods};
use crate::ipc::server::{PeerCredentials, RequestHandler};

pub use jobs::{handle_engine_status, handle_job_submit, handle_ping};

pub struct DaemonHandler {
    ctx: DaemonContext,
}

impl DaemonHandler {
    pub fn new(ctx: DaemonContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl RequestHandler for DaemonHandler {
    async fn handle(&self, peer: PeerCredentials, request: DaemonRequest) -> DaemonResponse {
        tracing::debug!(id = request.id, method = %request.method, "Handling request");
        match request.method.as_str() {
            Methods::PING => handle_ping(request.id),
            Methods::JOB_SUBMIT => handle_job_submit(request.id, peer, &request.params, &self.ctx).await,
            Methods::ENGINE_STATUS => handle_engine_status(request.id, &self.ctx).await,
            other => DaemonResponse::error(request.id, DaemonError::method_not_found(other)),
        }
    }
}
