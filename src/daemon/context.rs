//! Daemon context - shared state for request handlers

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::config::Backend;
use crate::domain::{CallerToken, Request};
use crate::engine::Engine;
use crate::ipc::server::PeerCredentials;

/// What every handler can reach
#[derive(Clone)]
pub struct DaemonContext {
    /// Handle to the running scheduler
    pub engine: Engine,
    /// Collaborator backend the engine was built with
    pub backend: Backend,
    /// Creator each trusted socket peer acts as, by uid
    trusted_uids: BTreeMap<u32, String>,
    started_at: DateTime<Utc>,
}

impl DaemonContext {
    pub fn new(engine: Engine, backend: Backend, trusted_uids: BTreeMap<u32, String>) -> Self {
        Self {
            engine,
            backend,
            trusted_uids,
            started_at: Utc::now(),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    /// Replace the request's token with the creator bound to the peer's uid.
    ///
    /// A claimed token is only kept when it names that creator. Unknown peers
    /// and mismatched claims leave the request without a token, which the
    /// admission gate rejects as unauthorized.
    pub fn authenticate(&self, peer: PeerCredentials, request: &mut Request) {
        let bound = peer.uid.and_then(|uid| self.trusted_uids.get(&uid));
        request.token = match (bound, request.token.take()) {
            (Some(creator), None) => Some(CallerToken::new(creator.as_str())),
            (Some(creator), Some(claimed)) if claimed.creator == *creator => Some(claimed),
            (bound, claimed) => {
                tracing::warn!(
                    uid = ?peer.uid,
                    pid = ?peer.pid,
                    bound = ?bound,
                    claimed = ?claimed.map(|t| t.creator),
                    "Peer is not allowed to act as the claimed creator"
                );
                None
            }
        };
    }
}
