//! Admission gate
//!
//! Decides whether a request may enqueue jobs at all and, if so, decodes it
//! into jobs. Checks run in a fixed order: caller identity, scheduler busy,
//! timestamp freshness, command tag.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{BootAnimationSource, Command, EMPTY_TIMESTAMP, Job, Payload, Request};

/// Callers trusted when no allow-list is configured
pub const DEFAULT_TRUSTED_CALLERS: [&str; 2] = ["projekt.substratum", "masquerade.substratum"];

/// Why a request was refused. Nothing is enqueued for a rejected request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    #[error("caller is not authorized")]
    Unauthorized,

    #[error("busy processing a previous request")]
    Busy,

    #[error("missing or duplicate request timestamp")]
    DuplicateOrMissingTimestamp,

    #[error("empty or unknown command")]
    UnknownCommand,
}

impl Rejection {
    /// Stable numeric code used on the IPC surface
    pub fn code(&self) -> i32 {
        match self {
            Rejection::Unauthorized => 1001,
            Rejection::Busy => 1002,
            Rejection::DuplicateOrMissingTimestamp => 1003,
            Rejection::UnknownCommand => 1004,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1001 => Some(Rejection::Unauthorized),
            1002 => Some(Rejection::Busy),
            1003 => Some(Rejection::DuplicateOrMissingTimestamp),
            1004 => Some(Rejection::UnknownCommand),
            _ => None,
        }
    }
}

/// Validates and deduplicates requests
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    trusted_callers: Vec<String>,
    last_accepted: Option<u64>,
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new(DEFAULT_TRUSTED_CALLERS)
    }
}

impl AdmissionGate {
    /// Create a gate trusting exactly `trusted_callers`
    pub fn new<I, S>(trusted_callers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            trusted_callers: trusted_callers.into_iter().map(Into::into).collect(),
            last_accepted: None,
        }
    }

    /// Timestamp of the last accepted request
    pub fn last_accepted(&self) -> Option<u64> {
        self.last_accepted
    }

    pub fn is_trusted(&self, creator: &str) -> bool {
        self.trusted_callers.iter().any(|c| c == creator)
    }

    /// Admit `request` given whether the scheduler is currently busy.
    ///
    /// On success the timestamp becomes the new last accepted one and the
    /// decoded jobs are returned in execution order.
    pub fn admit(&mut self, request: &Request, busy: bool) -> Result<Vec<Job>, Rejection> {
        self.check_caller(request)?;

        if busy {
            tracing::warn!(command = %request.command, "Request while still processing, rejecting");
            return Err(Rejection::Busy);
        }

        let timestamp = self.check_timestamp(request)?;

        let command = match request.command.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(error = %e, "Rejecting request");
                return Err(Rejection::UnknownCommand);
            }
        };

        self.last_accepted = Some(timestamp);
        let jobs = decode(command, &request.payload);
        tracing::info!(
            command = %command,
            timestamp = timestamp,
            jobs = jobs.len(),
            "Request admitted"
        );
        Ok(jobs)
    }

    fn check_caller(&self, request: &Request) -> Result<(), Rejection> {
        let Some(token) = &request.token else {
            tracing::warn!("Request without a token, unauthorized");
            return Err(Rejection::Unauthorized);
        };
        if !token.is_well_formed() {
            tracing::warn!("Request with a malformed token, unauthorized");
            return Err(Rejection::Unauthorized);
        }
        if !self.is_trusted(&token.creator) {
            tracing::warn!(caller = %token.creator, "Caller is not in the allow-list");
            return Err(Rejection::Unauthorized);
        }
        tracing::debug!(caller = %token.creator, "Caller authorized");
        Ok(())
    }

    fn check_timestamp(&self, request: &Request) -> Result<u64, Rejection> {
        let timestamp = match request.timestamp {
            None | Some(EMPTY_TIMESTAMP) => {
                tracing::warn!("Request without a timestamp, rejecting");
                return Err(Rejection::DuplicateOrMissingTimestamp);
            }
            Some(ts) => ts,
        };
        if let Some(last) = self.last_accepted {
            if timestamp <= last {
                tracing::warn!(timestamp = timestamp, last = last, "Duplicate or stale timestamp, rejecting");
                return Err(Rejection::DuplicateOrMissingTimestamp);
            }
        }
        Ok(timestamp)
    }
}

/// Decode a recognized command into jobs, in execution order. Pure.
pub fn decode(command: Command, payload: &Payload) -> Vec<Job> {
    match command {
        Command::Install => payload
            .install_list
            .iter()
            .map(|path| Job::InstallPackage { path: path.clone() })
            .collect(),
        Command::Uninstall => {
            let mut jobs: Vec<Job> = payload
                .uninstall_list
                .iter()
                .map(|name| Job::RemovePackage {
                    name: name.clone(),
                    disable_overlay_first: payload.disable_overlays,
                })
                .collect();
            if payload.with_restart_ui {
                jobs.push(Job::RestartUi);
            }
            jobs
        }
        Command::RestartUi => vec![Job::RestartUi],
        Command::ConfigurationShim => vec![Job::LocaleConfigurationShim],
        Command::BootAnimation => {
            let source = payload
                .bootanimation_pid
                .as_deref()
                .filter(|pid| !pid.is_empty())
                .map(|pid| BootAnimationSource {
                    theme_pid: pid.to_string(),
                    file_name: payload.bootanimation_file_name.clone().unwrap_or_default(),
                });
            vec![Job::BootAnimationChange { source }]
        }
        Command::Fonts => vec![Job::FontsChange {
            clear: payload.fonts_reset,
        }],
        Command::Audio => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CallerToken;

    const CALLER: &str = "projekt.substratum";

    fn gate() -> AdmissionGate {
        AdmissionGate::default()
    }

    #[test]
    fn test_default_allow_list() {
        let gate = gate();
        assert!(gate.is_trusted("projekt.substratum"));
        assert!(gate.is_trusted("masquerade.substratum"));
        assert!(!gate.is_trusted("com.evil"));
    }

    #[test]
    fn test_missing_token_unauthorized() {
        let mut gate = gate();
        let request = Request::new("restart_ui", 100);
        assert_eq!(gate.admit(&request, false), Err(Rejection::Unauthorized));
        assert!(gate.last_accepted().is_none());
    }

    #[test]
    fn test_malformed_token_unauthorized() {
        let mut gate = gate();
        let mut request = Request::new("restart_ui", 100);
        request.token = Some(CallerToken::new(""));
        assert_eq!(gate.admit(&request, false), Err(Rejection::Unauthorized));
    }

    #[test]
    fn test_untrusted_caller_unauthorized() {
        let mut gate = gate();
        let request = Request::new("restart_ui", 100).from_caller("com.evil");
        assert_eq!(gate.admit(&request, false), Err(Rejection::Unauthorized));
    }

    #[test]
    fn test_unauthorized_checked_before_busy() {
        let mut gate = gate();
        let request = Request::new("restart_ui", 100).from_caller("com.evil");
        assert_eq!(gate.admit(&request, true), Err(Rejection::Unauthorized));
    }

    #[test]
    fn test_busy_rejected() {
        let mut gate = gate();
        let request = Request::new("restart_ui", 100).from_caller(CALLER);
        assert_eq!(gate.admit(&request, true), Err(Rejection::Busy));
        // A busy rejection does not consume the timestamp
        assert_eq!(gate.admit(&request, false), Ok(vec![Job::RestartUi]));
    }

    #[test]
    fn test_missing_timestamp_rejected() {
        let mut gate = gate();
        let mut request = Request::new("restart_ui", 100).from_caller(CALLER);
        request.timestamp = None;
        assert_eq!(gate.admit(&request, false), Err(Rejection::DuplicateOrMissingTimestamp));
    }

    #[test]
    fn test_sentinel_timestamp_rejected() {
        let mut gate = gate();
        let request = Request::new("restart_ui", EMPTY_TIMESTAMP).from_caller(CALLER);
        assert_eq!(gate.admit(&request, false), Err(Rejection::DuplicateOrMissingTimestamp));
    }

    #[test]
    fn test_duplicate_timestamp_rejected() {
        let mut gate = gate();
        let request = Request::new("restart_ui", 100).from_caller(CALLER);
        assert!(gate.admit(&request, false).is_ok());
        assert_eq!(gate.admit(&request, false), Err(Rejection::DuplicateOrMissingTimestamp));
        assert_eq!(gate.last_accepted(), Some(100));
    }

    #[test]
    fn test_older_timestamp_rejected() {
        let mut gate = gate();
        assert!(gate.admit(&Request::new("restart_ui", 100).from_caller(CALLER), false).is_ok());
        let older = Request::new("restart_ui", 99).from_caller(CALLER);
        assert_eq!(gate.admit(&older, false), Err(Rejection::DuplicateOrMissingTimestamp));
    }

    #[test]
    fn test_unknown_command_rejected() {
        let mut gate = gate();
        let request = Request::new("reboot", 100).from_caller(CALLER);
        assert_eq!(gate.admit(&request, false), Err(Rejection::UnknownCommand));
        // Only accepted requests advance the timestamp
        assert!(gate.last_accepted().is_none());
    }

    #[test]
    fn test_empty_command_rejected() {
        let mut gate = gate();
        let request = Request::new("", 100).from_caller(CALLER);
        assert_eq!(gate.admit(&request, false), Err(Rejection::UnknownCommand));
    }

    #[test]
    fn test_install_decodes_in_order() {
        let mut gate = gate();
        let request = Request::install(["/a.apk", "/b.apk"], 100).from_caller(CALLER);
        assert_eq!(
            gate.admit(&request, false),
            Ok(vec![
                Job::InstallPackage { path: "/a.apk".into() },
                Job::InstallPackage { path: "/b.apk".into() },
            ])
        );
    }

    #[test]
    fn test_uninstall_with_restart_appends_restart_last() {
        let jobs = decode(
            Command::Uninstall,
            &Payload {
                uninstall_list: vec!["pkg.x".into(), "pkg.y".into()],
                with_restart_ui: true,
                ..Default::default()
            },
        );
        assert_eq!(
            jobs,
            vec![
                Job::RemovePackage {
                    name: "pkg.x".into(),
                    disable_overlay_first: false
                },
                Job::RemovePackage {
                    name: "pkg.y".into(),
                    disable_overlay_first: false
                },
                Job::RestartUi,
            ]
        );
    }

    #[test]
    fn test_uninstall_disable_overlays_flag() {
        let jobs = decode(
            Command::Uninstall,
            &Payload {
                uninstall_list: vec!["pkg.x".into()],
                disable_overlays: true,
                ..Default::default()
            },
        );
        assert_eq!(
            jobs,
            vec![Job::RemovePackage {
                name: "pkg.x".into(),
                disable_overlay_first: true
            }]
        );
    }

    #[test]
    fn test_boot_animation_empty_pid_clears() {
        let payload = Payload {
            bootanimation_pid: Some(String::new()),
            bootanimation_file_name: Some("ignored.zip".into()),
            ..Default::default()
        };
        assert_eq!(
            decode(Command::BootAnimation, &payload),
            vec![Job::BootAnimationChange { source: None }]
        );
    }

    #[test]
    fn test_boot_animation_with_pid() {
        let payload = Payload {
            bootanimation_pid: Some("com.theme".into()),
            bootanimation_file_name: Some("bootanimation.zip".into()),
            ..Default::default()
        };
        assert_eq!(
            decode(Command::BootAnimation, &payload),
            vec![Job::BootAnimationChange {
                source: Some(BootAnimationSource {
                    theme_pid: "com.theme".into(),
                    file_name: "bootanimation.zip".into(),
                })
            }]
        );
    }

    #[test]
    fn test_single_job_commands() {
        let payload = Payload::default();
        assert_eq!(decode(Command::RestartUi, &payload), vec![Job::RestartUi]);
        assert_eq!(
            decode(Command::ConfigurationShim, &payload),
            vec![Job::LocaleConfigurationShim]
        );
        assert_eq!(decode(Command::Fonts, &payload), vec![Job::FontsChange { clear: false }]);
    }

    #[test]
    fn test_audio_is_reserved() {
        let mut gate = gate();
        let request = Request::new("audio", 100).from_caller(CALLER);
        assert_eq!(gate.admit(&request, false), Ok(Vec::new()));
        assert_eq!(gate.last_accepted(), Some(100));
    }

    #[test]
    fn test_rejection_codes_round_trip() {
        for r in [
            Rejection::Unauthorized,
            Rejection::Busy,
            Rejection::DuplicateOrMissingTimestamp,
            Rejection::UnknownCommand,
        ] {
            assert_eq!(Rejection::from_code(r.code()), Some(r));
        }
        assert_eq!(Rejection::from_code(-32600), None);
    }
}
