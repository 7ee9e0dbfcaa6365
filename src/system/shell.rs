//! Collaborators implemented by running platform commands
//!
//! Every operation is an argv template with `{placeholder}` slots. Package
//! install and delete spawn the child and return; the callback runs on the
//! tokio runtime when the child exits, carrying its exit code.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

use crate::error::{OverlaydError, Result};
use crate::system::{
    Configuration, ConfigurationListener, ConfigurationService, ListenerId, PackageCallback, PackageResult,
    PackageService, ProcessService,
};

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Argv templates for each operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandTemplates {
    pub install: Vec<String>,
    pub delete: Vec<String>,
    pub overlay_enable: Vec<String>,
    pub overlay_disable: Vec<String>,
    pub force_stop: Vec<String>,
    pub show_home: Vec<String>,
    pub get_locale: Vec<String>,
    pub set_locale: Vec<String>,
    pub set_property: Vec<String>,
    pub get_font_scale: Vec<String>,
    pub set_font_scale: Vec<String>,
}

impl Default for CommandTemplates {
    fn default() -> Self {
        Self {
            install: argv(&["pm", "install", "-r", "{path}"]),
            delete: argv(&["pm", "uninstall", "{name}"]),
            overlay_enable: argv(&["cmd", "overlay", "enable", "{name}"]),
            overlay_disable: argv(&["cmd", "overlay", "disable", "{name}"]),
            force_stop: argv(&["am", "force-stop", "{name}"]),
            show_home: argv(&[
                "am",
                "start",
                "-a",
                "android.intent.action.MAIN",
                "-c",
                "android.intent.category.HOME",
            ]),
            get_locale: argv(&["getprop", "persist.sys.locale"]),
            set_locale: argv(&["setprop", "persist.sys.locale", "{locale}"]),
            set_property: argv(&["setprop", "{key}", "{value}"]),
            get_font_scale: argv(&["settings", "get", "system", "font_scale"]),
            set_font_scale: argv(&["settings", "put", "system", "font_scale", "{scale}"]),
        }
    }
}

/// Substitute `{name}` slots in every argument
fn render(operation: &str, template: &[String], vars: &[(&str, &str)]) -> Result<Vec<String>> {
    if template.is_empty() {
        return Err(OverlaydError::Config(format!("no command configured for {operation}")));
    }
    Ok(template
        .iter()
        .map(|arg| {
            vars.iter()
                .fold(arg.clone(), |acc, (key, value)| acc.replace(&format!("{{{key}}}"), value))
        })
        .collect())
}

fn failure_message(status: std::process::ExitStatus, stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("exited with {:?}", status.code())
    } else {
        format!("exited with {:?}: {}", status.code(), stderr)
    }
}

type SharedListener = Arc<ConfigurationListener>;

pub struct ShellSystem {
    commands: CommandTemplates,
    runtime: Handle,
    listeners: Mutex<BTreeMap<ListenerId, SharedListener>>,
    next_listener: AtomicU64,
}

impl std::fmt::Debug for ShellSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellSystem")
            .field("commands", &self.commands)
            .finish_non_exhaustive()
    }
}

impl ShellSystem {
    /// `runtime` runs the exit watchers and listener notifications
    pub fn new(commands: CommandTemplates, runtime: Handle) -> Self {
        Self {
            commands,
            runtime,
            listeners: Mutex::new(BTreeMap::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    fn listeners(&self) -> MutexGuard<'_, BTreeMap<ListenerId, SharedListener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run to completion and return trimmed stdout
    fn run(&self, operation: &str, template: &[String], vars: &[(&str, &str)]) -> Result<String> {
        let args = render(operation, template, vars)?;
        tracing::debug!(operation, argv = ?args, "Running command");

        let output = std::process::Command::new(&args[0])
            .args(&args[1..])
            .stdin(Stdio::null())
            .output()?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(OverlaydError::Collaborator(format!(
                "{operation} {}",
                failure_message(output.status, &output.stderr)
            )))
        }
    }

    /// Spawn the child now and report its exit through `callback` later
    fn spawn(
        &self,
        operation: &'static str,
        template: &[String],
        vars: &[(&str, &str)],
        callback: PackageCallback,
    ) -> Result<()> {
        let args = render(operation, template, vars)?;
        tracing::debug!(operation, argv = ?args, "Spawning command");

        let child = {
            let _guard = self.runtime.enter();
            tokio::process::Command::new(&args[0])
                .args(&args[1..])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .spawn()?
        };

        self.runtime.spawn(async move {
            let result = match child.wait_with_output().await {
                Ok(output) if output.status.success() => PackageResult::success(),
                Ok(output) => PackageResult::failure(
                    output.status.code().unwrap_or(-1),
                    failure_message(output.status, &output.stderr),
                ),
                Err(e) => PackageResult::failure(-1, format!("{operation} wait failed: {e}")),
            };
            tracing::debug!(operation, result = %result, "Command exited");
            callback(result);
        });
        Ok(())
    }
}

impl PackageService for ShellSystem {
    fn install(&self, path: &str, on_installed: PackageCallback) -> Result<()> {
        self.spawn("install", &self.commands.install, &[("path", path)], on_installed)
    }

    fn delete(&self, name: &str, on_deleted: PackageCallback) -> Result<()> {
        self.spawn("delete", &self.commands.delete, &[("name", name)], on_deleted)
    }

    fn set_overlay_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let template = if enabled {
            &self.commands.overlay_enable
        } else {
            &self.commands.overlay_disable
        };
        self.run("set_overlay_enabled", template, &[("name", name)])?;
        Ok(())
    }
}

impl ProcessService for ShellSystem {
    fn force_stop(&self, name: &str) -> Result<()> {
        self.run("force_stop", &self.commands.force_stop, &[("name", name)])?;
        Ok(())
    }

    fn show_home(&self) -> Result<()> {
        self.run("show_home", &self.commands.show_home, &[])?;
        Ok(())
    }
}

impl ConfigurationService for ShellSystem {
    fn configuration(&self) -> Result<Configuration> {
        let locale = self.run("configuration", &self.commands.get_locale, &[])?;
        if locale.is_empty() {
            return Err(OverlaydError::Collaborator("configuration returned an empty locale".into()));
        }
        Ok(Configuration {
            locale,
            user_set_locale: true,
        })
    }

    fn update_configuration(&self, configuration: &Configuration) -> Result<()> {
        self.run(
            "update_configuration",
            &self.commands.set_locale,
            &[("locale", &configuration.locale)],
        )?;

        // There is no system broadcast to hook, so deliver the change ourselves
        let listeners: Vec<SharedListener> = self.listeners().values().cloned().collect();
        if !listeners.is_empty() {
            let configuration = configuration.clone();
            self.runtime.spawn(async move {
                for listener in &listeners {
                    listener(&configuration);
                }
            });
        }
        Ok(())
    }

    fn register_listener(&self, listener: ConfigurationListener) -> Result<ListenerId> {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners().insert(id, Arc::new(listener));
        tracing::debug!(listener = %id, "Configuration listener registered");
        Ok(id)
    }

    fn unregister_listener(&self, id: ListenerId) -> Result<()> {
        self.listeners().remove(&id);
        tracing::debug!(listener = %id, "Configuration listener unregistered");
        Ok(())
    }

    fn set_system_property(&self, key: &str, value: &str) -> Result<()> {
        self.run(
            "set_system_property",
            &self.commands.set_property,
            &[("key", key), ("value", value)],
        )?;
        Ok(())
    }

    fn font_scale(&self) -> Result<f64> {
        let raw = self.run("font_scale", &self.commands.get_font_scale, &[])?;
        // An unset setting reads back as "null"
        if raw.is_empty() || raw == "null" {
            return Ok(1.0);
        }
        raw.parse()
            .map_err(|_| OverlaydError::Collaborator(format!("unparseable font scale {raw:?}")))
    }

    fn set_font_scale(&self, scale: f64) -> Result<()> {
        let value = scale.to_string();
        self.run("set_font_scale", &self.commands.set_font_scale, &[("scale", &value)])?;
        Ok(())
    }
}
