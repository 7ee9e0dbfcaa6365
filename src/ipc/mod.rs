//! IPC Layer - Unix socket transport between the CLI and the daemon
//!
//! This module provides:
//! - Message types for requests, responses and pushed events
//! - Unix socket server for the daemon
//! - Client for the CLI

pub mod client;
pub mod messages;
pub mod server;

pub use client::{IpcClient, IpcClientConfig};
pub use messages::{DaemonError, DaemonEvent, DaemonRequest, DaemonResponse, ErrorCode, Events, Methods};
pub use server::{IpcServer, IpcServerConfig, PeerCredentials, RequestHandler};
