//! Job descriptions
//!
//! A `Job` is pure data: what side effect to perform. Running it and
//! reporting its completion live in `jobs` and `engine::completion`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::JobId;

/// How a job reports completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionMode {
    /// Finished when `run` returns
    Sync,
    /// Finished later, when an external callback fires
    Async,
}

/// Source of a themed boot animation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootAnimationSource {
    /// Theme package id
    pub theme_pid: String,
    /// Archive name inside the theme's boot animation assets
    pub file_name: String,
}

/// One unit of queued, sequenced work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    InstallPackage {
        path: String,
    },
    RemovePackage {
        name: String,
        disable_overlay_first: bool,
    },
    RestartUi,
    LocaleConfigurationShim,
    FontsChange {
        clear: bool,
    },
    /// `source == None` restores the stock animation
    BootAnimationChange {
        source: Option<BootAnimationSource>,
    },
}

impl Job {
    pub fn completion_mode(&self) -> CompletionMode {
        match self {
            Job::InstallPackage { .. } | Job::RemovePackage { .. } | Job::LocaleConfigurationShim => {
                CompletionMode::Async
            }
            Job::RestartUi | Job::FontsChange { .. } | Job::BootAnimationChange { .. } => CompletionMode::Sync,
        }
    }

    /// Short variant name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Job::InstallPackage { .. } => "install_package",
            Job::RemovePackage { .. } => "remove_package",
            Job::RestartUi => "restart_ui",
            Job::LocaleConfigurationShim => "locale_configuration_shim",
            Job::FontsChange { .. } => "fonts_change",
            Job::BootAnimationChange { .. } => "boot_animation_change",
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::InstallPackage { path } => write!(f, "install {}", path),
            Job::RemovePackage { name, .. } => write!(f, "remove {}", name),
            Job::RestartUi => f.write_str("restart ui"),
            Job::LocaleConfigurationShim => f.write_str("configuration shim"),
            Job::FontsChange { clear: true } => f.write_str("reset fonts"),
            Job::FontsChange { clear: false } => f.write_str("apply fonts"),
            Job::BootAnimationChange { source: None } => f.write_str("reset boot animation"),
            Job::BootAnimationChange { source: Some(s) } => {
                write!(f, "apply boot animation {} from {}", s.file_name, s.theme_pid)
            }
        }
    }
}

/// A job together with its queue identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: JobId,
    pub job: Job,
}

impl QueuedJob {
    pub fn new(id: JobId, job: Job) -> Self {
        Self { id, job }
    }
}
