//! IPC Server - Unix socket server for client-daemon communication
//!
//! Provides:
//! - Unix stream socket listener, restricted by file mode
//! - Client connection handling with peer credentials
//! - Request routing and response sending
//! - Event broadcasting to subscribers

use std::collections::HashMap;
use std::fs::Permissions;
use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{RwLock, broadcast};

use crate::error::{OverlaydError, Result};
use crate::ipc::messages::{DaemonError, DaemonEvent, DaemonRequest, DaemonResponse, Methods};

/// Configuration for the IPC server
#[derive(Debug, Clone)]
pub struct IpcServerConfig {
    /// Path to the Unix socket
    pub socket_path: PathBuf,
    /// Maximum number of concurrent clients
    pub max_clients: usize,
    /// Channel capacity for events
    pub event_channel_capacity: usize,
    /// File mode applied to the socket after binding
    pub socket_mode: u32,
}

impl Default for IpcServerConfig {
    fn default() -> Self {
        Self {
            socket_path: std::env::temp_dir().join("overlayd.sock"),
            max_clients: 16,
            event_channel_capacity: 256,
            socket_mode: 0o660,
        }
    }
}

impl IpcServerConfig {
    pub fn with_socket_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.socket_path = path.as_ref().to_path_buf();
        self
    }

    pub fn with_max_clients(mut self, max: usize) -> Self {
        self.max_clients = max;
        self
    }

    pub fn with_socket_mode(mut self, mode: u32) -> Self {
        self.socket_mode = mode;
        self
    }
}

/// Identity of the process on the other end of a connection, as reported
/// by the kernel. Fields are `None` when the platform could not tell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerCredentials {
    pub uid: Option<u32>,
    pub pid: Option<i32>,
}

impl PeerCredentials {
    pub fn from_uid(uid: u32) -> Self {
        Self {
            uid: Some(uid),
            pid: None,
        }
    }

    fn of(stream: &UnixStream) -> Self {
        match stream.peer_cred() {
            Ok(cred) => Self {
                uid: Some(cred.uid()),
                pid: cred.pid(),
            },
            Err(e) => {
                tracing::warn!(error = %e, "Could not read peer credentials");
                Self::default()
            }
        }
    }
}

/// Handler trait for processing requests
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, peer: PeerCredentials, request: DaemonRequest) -> DaemonResponse;
}

/// Connected client state
#[derive(Debug)]
struct ClientState {
    /// Whether client is subscribed to events
    subscribed: bool,
}

type Clients = Arc<RwLock<HashMap<u64, ClientState>>>;

/// IPC Server for daemon communication
pub struct IpcServer {
    config: IpcServerConfig,
    clients: Clients,
    event_tx: broadcast::Sender<DaemonEvent>,
    next_client_id: AtomicU64,
}

impl IpcServer {
    pub fn new(config: IpcServerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);
        Self {
            config,
            clients: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            next_client_id: AtomicU64::new(1),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Broadcast an event to all subscribed clients. Returns the number of
    /// connections that will see it.
    pub fn broadcast(&self, event: DaemonEvent) -> usize {
        self.event_tx.send(event).unwrap_or(0)
    }

    /// Sender for tasks that forward events from elsewhere
    pub fn event_sender(&self) -> broadcast::Sender<DaemonEvent> {
        self.event_tx.clone()
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Accept clients until `shutdown` resolves
    pub async fn run<F>(&self, handler: Arc<dyn RequestHandler>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        // Remove a stale socket from a previous run
        if self.config.socket_path.exists() {
            std::fs::remove_file(&self.config.socket_path)?;
        }
        if let Some(parent) = self.config.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.config.socket_path)
            .map_err(|e| OverlaydError::Ipc(format!("Failed to bind socket: {}", e)))?;
        std::fs::set_permissions(&self.config.socket_path, Permissions::from_mode(self.config.socket_mode))?;
        tracing::info!(socket = %self.config.socket_path.display(), "IPC server listening");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accept_result = listener.accept() => match accept_result {
                    Ok((stream, _addr)) => self.accept(stream, Arc::clone(&handler)).await,
                    Err(e) => tracing::warn!(error = %e, "Accept error"),
                },
                _ = &mut shutdown => break,
            }
        }

        let _ = std::fs::remove_file(&self.config.socket_path);
        tracing::info!("IPC server stopped");
        Ok(())
    }

    async fn accept(&self, stream: UnixStream, handler: Arc<dyn RequestHandler>) {
        if self.client_count().await >= self.config.max_clients {
            tracing::warn!(max = self.config.max_clients, "Rejecting client, at capacity");
            return;
        }

        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let peer = PeerCredentials::of(&stream);
        self.clients
            .write()
            .await
            .insert(client_id, ClientState { subscribed: false });
        tracing::debug!(client_id, uid = ?peer.uid, pid = ?peer.pid, "Client connected");

        let clients = Arc::clone(&self.clients);
        let event_rx = self.event_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, client_id, peer, handler, Arc::clone(&clients), event_rx).await {
                tracing::debug!(client_id, error = %e, "Client connection ended with error");
            }
            clients.write().await.remove(&client_id);
            tracing::debug!(client_id, "Client disconnected");
        });
    }
}

async fn write_line<W, T>(writer: &mut W, value: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut bytes = serde_json::to_vec(value).map_err(std::io::Error::other)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await
}

/// Handle a single client connection
async fn handle_client(
    stream: UnixStream,
    client_id: u64,
    peer: PeerCredentials,
    handler: Arc<dyn RequestHandler>,
    clients: Clients,
    mut event_rx: broadcast::Receiver<DaemonEvent>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        tokio::select! {
            read_result = reader.read_line(&mut line) => {
                if read_result? == 0 {
                    break;
                }
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    let response = match serde_json::from_str::<DaemonRequest>(trimmed) {
                        Ok(request) if request.method == Methods::SUBSCRIBE => {
                            if let Some(state) = clients.write().await.get_mut(&client_id) {
                                state.subscribed = true;
                            }
                            DaemonResponse::success(request.id, serde_json::json!({"subscribed": true}))
                        }
                        Ok(request) => handler.handle(peer, request).await,
                        Err(e) => DaemonResponse::error(0, DaemonError::parse_error(format!("Parse error: {}", e))),
                    };
                    write_line(&mut writer, &response).await?;
                }
                line.clear();
            }
            event_result = event_rx.recv() => match event_result {
                Ok(event) => {
                    let subscribed = clients.read().await.get(&client_id).is_some_and(|s| s.subscribed);
                    if subscribed {
                        write_line(&mut writer, &event).await?;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(client_id, skipped, "Client lagged behind event stream");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}
