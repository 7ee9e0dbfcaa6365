//! IPC message types for client ↔ daemon communication.
//!
//! Uses JSON Lines (newline-delimited JSON) over a Unix stream socket.
//! Field names follow the familiar id/method/params/result/error shape but
//! this is not JSON-RPC 2.0.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::{EngineEvent, Rejection};
use crate::error::OverlaydError;

/// Request sent from a client to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonRequest {
    /// Unique request ID for correlating responses.
    pub id: u64,
    /// Method name (e.g. "job.submit").
    pub method: String,
    /// Method parameters as JSON value.
    #[serde(default)]
    pub params: Value,
}

impl DaemonRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    /// Create a request with no parameters.
    pub fn no_params(id: u64, method: impl Into<String>) -> Self {
        Self::new(id, method, Value::Object(Default::default()))
    }
}

/// Response sent from the daemon to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<DaemonError>,
}

impl DaemonResponse {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: u64, error: DaemonError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// The admission rejection this response carries, if any
    pub fn rejection(&self) -> Option<Rejection> {
        self.error.as_ref().and_then(|e| Rejection::from_code(e.code))
    }
}

/// Error details in a daemon response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl DaemonError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(code: i32, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Parse error (-32700).
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PARSE_ERROR, message)
    }

    /// Method not found error (-32601).
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(ErrorCode::METHOD_NOT_FOUND, format!("Unknown method: {}", method.into()))
    }

    /// Invalid params error (-32602).
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::INVALID_PARAMS, message)
    }

    /// Internal error (-32603).
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::INTERNAL_ERROR, message)
    }

    /// Admission rejection, one code per reason (1001-1004). `data` names
    /// the reason so clients need not keep a code table.
    pub fn rejected(rejection: Rejection) -> Self {
        Self::with_data(
            rejection.code(),
            rejection.to_string(),
            serde_json::json!({ "rejection": rejection }),
        )
    }
}

impl From<OverlaydError> for DaemonError {
    fn from(err: OverlaydError) -> Self {
        match err {
            OverlaydError::Rejected(rejection) => Self::rejected(rejection),
            OverlaydError::EngineStopped => Self::new(ErrorCode::ENGINE_STOPPED, err.to_string()),
            other => Self::internal_error(other.to_string()),
        }
    }
}

/// Standard error codes.
pub struct ErrorCode;

impl ErrorCode {
    /// Invalid JSON.
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// Unknown method.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal daemon error.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Caller not on the allow-list.
    pub const UNAUTHORIZED: i32 = 1001;
    /// Queue not empty.
    pub const BUSY: i32 = 1002;
    /// Timestamp missing, sentinel or not newer than the last accepted one.
    pub const DUPLICATE_TIMESTAMP: i32 = 1003;
    /// Empty or unknown command tag.
    pub const UNKNOWN_COMMAND: i32 = 1004;
    /// Scheduler task has exited.
    pub const ENGINE_STOPPED: i32 = 1005;
}

/// Push event sent from the daemon to subscribed clients (no request ID).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonEvent {
    /// Event type (e.g. "all_jobs_drained").
    pub event: String,
    pub data: Value,
}

impl DaemonEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

impl From<&EngineEvent> for DaemonEvent {
    fn from(event: &EngineEvent) -> Self {
        // EngineEvent serializes as {"event": .., "data": ..} already
        let data = match serde_json::to_value(event) {
            Ok(Value::Object(mut map)) => map.remove("data").unwrap_or(Value::Null),
            _ => Value::Null,
        };
        Self::new(event.name(), data)
    }
}

/// Known method names as constants.
pub struct Methods;

impl Methods {
    pub const PING: &'static str = "ping";
    pub const JOB_SUBMIT: &'static str = "job.submit";
    pub const ENGINE_STATUS: &'static str = "engine.status";
    pub const SUBSCRIBE: &'static str = "subscribe";
}

/// Known event names as constants.
pub struct Events;

impl Events {
    pub const JOB_STARTED: &'static str = "job_started";
    pub const JOB_FINISHED: &'static str = "job_finished";
    pub const ALL_JOBS_DRAINED: &'static str = "all_jobs_drained";
}
