use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::{DEFAULT_TRUSTED_CALLERS, EngineConfig};
use crate::error::OverlaydError;
use crate::system::shell::CommandTemplates;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub trusted_callers: Vec<String>,
    /// Socket peers allowed to submit, by uid, and the creator each one acts as
    pub trusted_uids: BTreeMap<u32, String>,
    pub socket_path: Option<PathBuf>,
    /// File mode of the daemon socket
    pub socket_mode: u32,
    pub backend: Backend,
    pub ui: UiConfig,
    pub theme: ThemeConfig,
    pub shim: ShimConfig,
    pub commands: CommandTemplates,
}

/// Which collaborator implementation the daemon drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Run the configured platform commands
    #[default]
    Shell,
    /// Record and log every call, complete callbacks immediately
    DryRun,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub process_name: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            process_name: "com.android.systemui".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemeConfig {
    pub root: PathBuf,
    pub fonts_subdir: String,
    pub bootanimation_file: String,
    pub system_fonts_dir: PathBuf,
    pub font_cache_dir: PathBuf,
    pub bootanimation_source_root: PathBuf,
    pub dir_mode: u32,
    pub bootanimation_mode: u32,
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/data/system/theme"),
            fonts_subdir: "fonts".to_string(),
            bootanimation_file: "bootanimation.zip".to_string(),
            system_fonts_dir: PathBuf::from("/system/fonts"),
            font_cache_dir: PathBuf::from("/data/data/projekt.substratum/cache/FontCache/FontCreator"),
            bootanimation_source_root: PathBuf::from("/data/data/projekt.substratum/cache/SubstratumBuilder"),
            dir_mode: 0o775,
            bootanimation_mode: 0o744,
        }
    }
}

impl ThemeConfig {
    pub fn fonts_dir(&self) -> PathBuf {
        self.root.join(&self.fonts_subdir)
    }

    pub fn bootanimation_path(&self) -> PathBuf {
        self.root.join(&self.bootanimation_file)
    }

    /// Where a theme package's built boot animation lives
    pub fn bootanimation_source(&self, theme_pid: &str, file_name: &str) -> PathBuf {
        self.bootanimation_source_root
            .join(theme_pid)
            .join("assets")
            .join("bootanimation")
            .join(file_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShimConfig {
    pub kick_delay_ms: u64,
    pub restore_delay_ms: u64,
    pub marker_locale: String,
    pub fallback_marker_locale: String,
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            kick_delay_ms: 500,
            restore_delay_ms: 500,
            marker_locale: "ja-JP".to_string(),
            fallback_marker_locale: "zh-CN".to_string(),
        }
    }
}

impl ShimConfig {
    pub fn kick_delay(&self) -> Duration {
        Duration::from_millis(self.kick_delay_ms)
    }

    pub fn restore_delay(&self) -> Duration {
        Duration::from_millis(self.restore_delay_ms)
    }

    /// Locale to swap to, given the one currently active
    pub fn marker_for(&self, current: &str) -> &str {
        if current == self.marker_locale {
            &self.fallback_marker_locale
        } else {
            &self.marker_locale
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            trusted_callers: DEFAULT_TRUSTED_CALLERS.iter().map(|c| c.to_string()).collect(),
            trusted_uids: BTreeMap::from([(0, "projekt.substratum".to_string())]),
            socket_path: None,
            socket_mode: 0o660,
            backend: Backend::default(),
            ui: UiConfig::default(),
            theme: ThemeConfig::default(),
            shim: ShimConfig::default(),
            commands: CommandTemplates::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Reject values the daemon cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.trusted_callers.is_empty() {
            return Err(OverlaydError::Config("trusted_callers must not be empty".into()));
        }
        if let Some((uid, _)) = self.trusted_uids.iter().find(|(_, creator)| creator.trim().is_empty()) {
            return Err(OverlaydError::Config(format!("trusted_uids entry {} has an empty creator", uid)));
        }
        if self.socket_mode & 0o007 != 0 {
            return Err(OverlaydError::Config(format!(
                "socket_mode {:o} must not grant access to other users",
                self.socket_mode
            )));
        }
        if self.ui.process_name.trim().is_empty() {
            return Err(OverlaydError::Config("ui.process_name must not be empty".into()));
        }
        if self.shim.marker_locale == self.shim.fallback_marker_locale {
            return Err(OverlaydError::Config(
                "shim.marker_locale and shim.fallback_marker_locale must differ".into(),
            ));
        }
        Ok(())
    }

    /// Socket path, falling back to the per-user runtime directory
    pub fn socket_path(&self) -> PathBuf {
        self.socket_path.clone().unwrap_or_else(|| {
            dirs::runtime_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(format!("{}.sock", env!("CARGO_PKG_NAME")))
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default().with_trusted_callers(self.trusted_callers.iter().cloned())
    }
}
