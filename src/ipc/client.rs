//! IPC client used by the CLI to talk to the daemon.
//!
//! Requests are correlated with responses by id; a background reader task
//! routes responses to the waiting caller and pushes events onto a channel.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::domain::Request;
use crate::error::{OverlaydError, Result};
use crate::ipc::messages::{DaemonEvent, DaemonRequest, DaemonResponse, Methods};

/// Configuration for IPC client.
#[derive(Debug, Clone)]
pub struct IpcClientConfig {
    /// Path to daemon Unix socket.
    pub socket_path: PathBuf,
    /// Request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl IpcClientConfig {
    pub fn with_socket(path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: path.into(),
            request_timeout_ms: 30000,
        }
    }
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<DaemonResponse>>>>;

/// IPC client for communicating with the daemon.
pub struct IpcClient {
    config: IpcClientConfig,
    writer: Mutex<Option<OwnedWriteHalf>>,
    pending: Pending,
    next_id: AtomicU64,
    connected: Arc<AtomicBool>,
    event_sender: mpsc::Sender<DaemonEvent>,
    event_receiver: Mutex<mpsc::Receiver<DaemonEvent>>,
}

impl IpcClient {
    pub fn new(config: IpcClientConfig) -> Self {
        let (event_sender, event_receiver) = mpsc::channel(100);
        Self {
            config,
            writer: Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            connected: Arc::new(AtomicBool::new(false)),
            event_sender,
            event_receiver: Mutex::new(event_receiver),
        }
    }

    pub fn with_socket(path: impl Into<PathBuf>) -> Self {
        Self::new(IpcClientConfig::with_socket(path))
    }

    /// Connect to daemon.
    pub async fn connect(&self) -> Result<()> {
        let stream = UnixStream::connect(&self.config.socket_path).await.map_err(|e| {
            OverlaydError::Ipc(format!(
                "Failed to connect to {}: {}",
                self.config.socket_path.display(),
                e
            ))
        })?;

        let (reader, writer) = stream.into_split();
        *self.writer.lock().await = Some(writer);
        self.connected.store(true, Ordering::SeqCst);

        let pending = Arc::clone(&self.pending);
        let event_sender = self.event_sender.clone();
        let connected = Arc::clone(&self.connected);

        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                // Responses carry an id, events do not
                if let Ok(response) = serde_json::from_str::<DaemonResponse>(line) {
                    if let Some(waiter) = pending.lock().await.remove(&response.id) {
                        let _ = waiter.send(response);
                    }
                } else if let Ok(event) = serde_json::from_str::<DaemonEvent>(line) {
                    let _ = event_sender.send(event).await;
                } else {
                    tracing::debug!(line, "Ignoring unrecognised message");
                }
            }
            connected.store(false, Ordering::SeqCst);
            // Dropping the waiters fails their requests
            pending.lock().await.clear();
        });

        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Send a request and wait for its response.
    pub async fn request(&self, method: &str, params: serde_json::Value) -> Result<DaemonResponse> {
        if !self.is_connected() {
            return Err(OverlaydError::Ipc("Not connected".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = DaemonRequest::new(id, method, params);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.send(&request).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let timeout = tokio::time::Duration::from_millis(self.config.request_timeout_ms);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(OverlaydError::Ipc("Connection closed before response".into())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(OverlaydError::Ipc("Request timeout".into()))
            }
        }
    }

    async fn send(&self, request: &DaemonRequest) -> Result<()> {
        let mut bytes = serde_json::to_vec(request)?;
        bytes.push(b'\n');

        let mut writer = self.writer.lock().await;
        let w = writer
            .as_mut()
            .ok_or_else(|| OverlaydError::Ipc("Writer not available".into()))?;
        w.write_all(&bytes)
            .await
            .map_err(|e| OverlaydError::Ipc(format!("Failed to write: {}", e)))?;
        w.flush()
            .await
            .map_err(|e| OverlaydError::Ipc(format!("Failed to flush: {}", e)))?;
        Ok(())
    }

    /// Receive next event (waits until one is available).
    pub async fn recv_event(&self) -> Option<DaemonEvent> {
        self.event_receiver.lock().await.recv().await
    }

    pub async fn ping(&self) -> Result<bool> {
        let response = self.request(Methods::PING, serde_json::json!({})).await?;
        Ok(response.is_success())
    }

    /// Submit a customization request
    pub async fn submit(&self, request: &Request) -> Result<DaemonResponse> {
        self.request(Methods::JOB_SUBMIT, serde_json::to_value(request)?).await
    }

    pub async fn status(&self) -> Result<DaemonResponse> {
        self.request(Methods::ENGINE_STATUS, serde_json::json!({})).await
    }

    /// Ask the daemon to push events to this connection
    pub async fn subscribe(&self) -> Result<DaemonResponse> {
        self.request(Methods::SUBSCRIBE, serde_json::json!({})).await
    }
}
