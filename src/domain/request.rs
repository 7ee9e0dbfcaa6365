//! Inbound customization requests
//!
//! A request is what a trusted caller hands to the daemon: who it is, which
//! command to run, when it was issued and the command's payload. The field
//! names mirror the extras the calling app already sends.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Timestamp value that legacy callers send when they have none.
pub const EMPTY_TIMESTAMP: u64 = 1;

/// Authorization token presented by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerToken {
    /// Identity of the package that created the token
    pub creator: String,
}

impl CallerToken {
    pub fn new(creator: impl Into<String>) -> Self {
        Self { creator: creator.into() }
    }

    /// A token is well-formed when it names its creator
    pub fn is_well_formed(&self) -> bool {
        !self.creator.trim().is_empty()
    }
}

/// Known command tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Install,
    Uninstall,
    RestartUi,
    ConfigurationShim,
    #[serde(rename = "bootanimation")]
    BootAnimation,
    Fonts,
    /// Reserved, accepted but produces no jobs
    Audio,
}

impl Command {
    pub const ALL: [Command; 7] = [
        Command::Install,
        Command::Uninstall,
        Command::RestartUi,
        Command::ConfigurationShim,
        Command::BootAnimation,
        Command::Fonts,
        Command::Audio,
    ];

    /// Wire tag for this command
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Install => "install",
            Command::Uninstall => "uninstall",
            Command::RestartUi => "restart_ui",
            Command::ConfigurationShim => "configuration_shim",
            Command::BootAnimation => "bootanimation",
            Command::Fonts => "fonts",
            Command::Audio => "audio",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for a command tag outside the known set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown command tag: {0:?}")]
pub struct UnknownCommandTag(pub String);

impl FromStr for Command {
    type Err = UnknownCommandTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownCommandTag(s.to_string()))
    }
}

/// Command-specific request fields. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Payload {
    /// Package archives to install
    pub install_list: Vec<String>,
    /// Package names to remove
    pub uninstall_list: Vec<String>,
    /// Queue a UI restart after the removals
    pub with_restart_ui: bool,
    /// Disable each overlay before removing its package
    pub disable_overlays: bool,
    /// Theme package providing the boot animation; empty means reset
    pub bootanimation_pid: Option<String>,
    /// Boot animation file inside the theme's assets
    pub bootanimation_file_name: Option<String>,
    /// Reset fonts instead of applying the cached ones
    pub fonts_reset: bool,
}

/// One privileged customization request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Caller authorization token
    #[serde(default)]
    pub token: Option<CallerToken>,
    /// Command tag, validated by the admission gate
    #[serde(default)]
    pub command: String,
    /// Monotonic submission timestamp
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub payload: Payload,
}

impl Request {
    /// Create a request for `command` issued at `timestamp`, without a token
    pub fn new(command: impl Into<String>, timestamp: u64) -> Self {
        Self {
            token: None,
            command: command.into(),
            timestamp: Some(timestamp),
            payload: Payload::default(),
        }
    }

    /// Attach a token created by `creator`
    pub fn from_caller(mut self, creator: impl Into<String>) -> Self {
        self.token = Some(CallerToken::new(creator));
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// `install` request for the given archives
    pub fn install<I, S>(paths: I, timestamp: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Command::Install.as_str(), timestamp).with_payload(Payload {
            install_list: paths.into_iter().map(Into::into).collect(),
            ..Default::default()
        })
    }

    /// `uninstall` request for the given packages
    pub fn uninstall<I, S>(packages: I, with_restart_ui: bool, timestamp: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Command::Uninstall.as_str(), timestamp).with_payload(Payload {
            uninstall_list: packages.into_iter().map(Into::into).collect(),
            with_restart_ui,
            ..Default::default()
        })
    }

    /// `fonts` request; `reset` restores the stock fonts
    pub fn fonts(reset: bool, timestamp: u64) -> Self {
        Self::new(Command::Fonts.as_str(), timestamp).with_payload(Payload {
            fonts_reset: reset,
            ..Default::default()
        })
    }

    /// `bootanimation` request; `None` resets to the stock animation
    pub fn boot_animation(theme: Option<(&str, &str)>, timestamp: u64) -> Self {
        let payload = match theme {
            Some((pid, file_name)) => Payload {
                bootanimation_pid: Some(pid.to_string()),
                bootanimation_file_name: Some(file_name.to_string()),
                ..Default::default()
            },
            None => Payload::default(),
        };
        Self::new(Command::BootAnimation.as_str(), timestamp).with_payload(payload)
    }
}
