//! Daemon - the long-running process that owns the job engine
//!
//! The daemon:
//! - Builds the collaborator backend named in the config
//! - Spawns the scheduler task with a `JobRunner` as its executor
//! - Serves IPC requests and forwards engine events to subscribers
//! - Binds each submission to the creator configured for the peer's uid

pub mod context;
pub mod handlers;

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::broadcast;

use crate::config::{Backend, Config};
use crate::engine::{Engine, EngineEvent};
use crate::error::Result;
use crate::ipc::messages::DaemonEvent;
use crate::ipc::server::{IpcServer, IpcServerConfig};
use crate::jobs::{JobRunner, JobSettings};
use crate::system::{LocalFilesystem, RecordingSystem, ShellSystem, SystemServices};

pub use context::DaemonContext;
pub use handlers::DaemonHandler;

/// Collaborators for the configured backend
pub fn build_services(config: &Config, runtime: Handle) -> SystemServices {
    match config.backend {
        Backend::Shell => {
            let shell = Arc::new(ShellSystem::new(config.commands.clone(), runtime));
            SystemServices {
                packages: shell.clone(),
                processes: shell.clone(),
                configuration: shell,
                filesystem: Arc::new(LocalFilesystem::new()),
            }
        }
        Backend::DryRun => SystemServices::uniform(Arc::new(RecordingSystem::auto())),
    }
}

/// Start the scheduler with the collaborators `config` asks for
pub fn spawn_engine(config: &Config) -> (Engine, tokio::task::JoinHandle<()>) {
    let services = build_services(config, Handle::current());
    let runner = Arc::new(JobRunner::new(services, JobSettings::from(config)));
    Engine::spawn(config.engine_config(), runner)
}

/// Run the daemon until `shutdown` resolves
pub async fn run<F>(config: &Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    tracing::info!(backend = ?config.backend, "Starting daemon");
    let (engine, scheduler) = spawn_engine(config);

    let server = IpcServer::new(
        IpcServerConfig::default()
            .with_socket_path(config.socket_path())
            .with_socket_mode(config.socket_mode),
    );
    let forwarder = tokio::spawn(forward_events(engine.subscribe(), server.event_sender()));
    let ctx = DaemonContext::new(engine.clone(), config.backend, config.trusted_uids.clone());
    let handler = Arc::new(DaemonHandler::new(ctx));

    let result = server.run(handler, shutdown).await;

    engine.shutdown();
    if let Err(e) = scheduler.await {
        tracing::error!(error = %e, "Scheduler task panicked");
    }
    forwarder.abort();
    tracing::info!("Daemon stopped");
    result
}

/// Relay engine notifications to IPC subscribers
async fn forward_events(mut events: broadcast::Receiver<EngineEvent>, sink: broadcast::Sender<DaemonEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let _ = sink.send(DaemonEvent::from(&event));
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event forwarder lagged behind engine");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
