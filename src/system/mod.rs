//! Collaborator seams
//!
//! Jobs never touch the platform directly. Everything they need from the
//! outside world goes through one of these traits, so the engine can run
//! against real commands, against the local filesystem, or against a
//! recorder in tests.

pub mod local_fs;
pub mod recording;
pub mod shell;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use local_fs::LocalFilesystem;
pub use recording::{RecordingSystem, SystemCall};
pub use shell::ShellSystem;

/// Result code reported by a package install or delete callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageResult {
    pub code: i32,
    pub message: Option<String>,
}

impl PackageResult {
    /// Code used for success by every backend
    pub const SUCCESS: i32 = 0;

    pub fn success() -> Self {
        Self {
            code: Self::SUCCESS,
            message: None,
        }
    }

    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Self::SUCCESS
    }
}

impl fmt::Display for PackageResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "code {}: {}", self.code, message),
            None => write!(f, "code {}", self.code),
        }
    }
}

/// One-shot result callback for install and delete
pub type PackageCallback = Box<dyn FnOnce(PackageResult) + Send + 'static>;

/// Package installer, remover and overlay manager.
///
/// `install` and `delete` return once the operation is issued. The callback
/// fires later, from any thread. An `Err` means the call was never issued and
/// the callback has been dropped without running.
pub trait PackageService: Send + Sync {
    fn install(&self, path: &str, on_installed: PackageCallback) -> Result<()>;

    fn delete(&self, name: &str, on_deleted: PackageCallback) -> Result<()>;

    fn set_overlay_enabled(&self, name: &str, enabled: bool) -> Result<()>;
}

/// Process manager
pub trait ProcessService: Send + Sync {
    /// Force-stop every process of a package
    fn force_stop(&self, name: &str) -> Result<()>;

    /// Bring the launcher to the foreground
    fn show_home(&self) -> Result<()>;
}

/// The slice of the global device configuration jobs care about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// BCP-47 tag, e.g. `en-US`
    pub locale: String,
    /// Whether the locale was chosen by the user rather than defaulted
    #[serde(default)]
    pub user_set_locale: bool,
}

impl Configuration {
    pub fn with_locale(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            user_set_locale: true,
        }
    }
}

/// Called after every configuration change, from any thread
pub type ConfigurationListener = Box<dyn Fn(&Configuration) + Send + Sync + 'static>;

/// Token returned by `register_listener`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Global configuration, system properties and system settings
pub trait ConfigurationService: Send + Sync {
    fn configuration(&self) -> Result<Configuration>;

    fn update_configuration(&self, configuration: &Configuration) -> Result<()>;

    fn register_listener(&self, listener: ConfigurationListener) -> Result<ListenerId>;

    fn unregister_listener(&self, id: ListenerId) -> Result<()>;

    fn set_system_property(&self, key: &str, value: &str) -> Result<()>;

    fn font_scale(&self) -> Result<f64>;

    fn set_font_scale(&self, scale: f64) -> Result<()>;
}

/// Synchronous filesystem operations on theme resources
pub trait Filesystem: Send + Sync {
    /// Create `path` with `mode` if it does not exist yet
    fn create_dir(&self, path: &Path, mode: u32) -> Result<()>;

    /// Recursively copy the contents of `source` into `dest`. Returns the
    /// number of files copied.
    fn copy_dir(&self, source: &Path, dest: &Path) -> Result<usize>;

    fn copy_file(&self, source: &Path, dest: &Path) -> Result<()>;

    /// Remove a file or directory tree. Missing paths are not an error.
    fn delete_path(&self, path: &Path) -> Result<()>;

    fn set_mode(&self, path: &Path, mode: u32) -> Result<()>;

    /// Extract `archive` into `dest`. Part of the collaborator contract for
    /// theme tooling; no job calls it, so the daemon never extracts archives.
    fn unzip(&self, archive: &Path, dest: &Path) -> Result<()>;
}

/// The full set of collaborators handed to the job runner
#[derive(Clone)]
pub struct SystemServices {
    pub packages: Arc<dyn PackageService>,
    pub processes: Arc<dyn ProcessService>,
    pub configuration: Arc<dyn ConfigurationService>,
    pub filesystem: Arc<dyn Filesystem>,
}

impl SystemServices {
    /// Use one value for every role
    pub fn uniform<S>(system: Arc<S>) -> Self
    where
        S: PackageService + ProcessService + ConfigurationService + Filesystem + 'static,
    {
        Self {
            packages: system.clone(),
            processes: system.clone(),
            configuration: system.clone(),
            filesystem: system,
        }
    }
}

impl fmt::Debug for SystemServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemServices").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_result() {
        assert!(PackageResult::success().is_success());
        let failed = PackageResult::failure(1, "INSTALL_FAILED_INVALID_APK");
        assert!(!failed.is_success());
        assert_eq!(failed.to_string(), "code 1: INSTALL_FAILED_INVALID_APK");
        assert_eq!(PackageResult::success().to_string(), "code 0");
    }

    #[test]
    fn test_configuration_serde_default() {
        let config: Configuration = serde_json::from_str(r#"{"locale":"en-US"}"#).unwrap();
        assert_eq!(config.locale, "en-US");
        assert!(!config.user_set_locale);
        assert!(Configuration::with_locale("ja-JP").user_set_locale);
    }

    #[test]
    fn test_listener_id_display() {
        assert_eq!(ListenerId(3).to_string(), "listener-3");
    }
}
