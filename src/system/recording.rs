//! In-memory collaborator that records every call
//!
//! Backs the `dry_run` daemon mode and the tests. In `Auto` mode package
//! callbacks and configuration-change notifications fire on their own from a
//! spawned task; in `Manual` mode they are held until the test releases them.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{OverlaydError, Result};
use crate::system::{
    Configuration, ConfigurationListener, ConfigurationService, Filesystem, ListenerId, PackageCallback,
    PackageResult, PackageService, ProcessService,
};

/// One recorded collaborator call
#[derive(Debug, Clone, PartialEq)]
pub enum SystemCall {
    Install(String),
    DeletePackage(String),
    SetOverlayEnabled { name: String, enabled: bool },
    ForceStop(String),
    ShowHome,
    UpdateConfiguration(Configuration),
    RegisterListener(ListenerId),
    UnregisterListener(ListenerId),
    SetSystemProperty { key: String, value: String },
    SetFontScale(f64),
    CreateDir { path: PathBuf, mode: u32 },
    CopyDir { source: PathBuf, dest: PathBuf },
    CopyFile { source: PathBuf, dest: PathBuf },
    DeletePath(PathBuf),
    SetMode { path: PathBuf, mode: u32 },
    Unzip { archive: PathBuf, dest: PathBuf },
}

/// When held callbacks run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackMode {
    Auto,
    Manual,
}

type SharedListener = Arc<ConfigurationListener>;

struct State {
    calls: Vec<SystemCall>,
    pending: VecDeque<(SystemCall, PackageCallback)>,
    listeners: BTreeMap<ListenerId, SharedListener>,
    next_listener: u64,
    configuration: Configuration,
    font_scale: f64,
    failing: HashSet<String>,
}

pub struct RecordingSystem {
    mode: CallbackMode,
    state: Mutex<State>,
}

impl std::fmt::Debug for RecordingSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingSystem").field("mode", &self.mode).finish_non_exhaustive()
    }
}

impl RecordingSystem {
    pub fn new(mode: CallbackMode) -> Self {
        Self {
            mode,
            state: Mutex::new(State {
                calls: Vec::new(),
                pending: VecDeque::new(),
                listeners: BTreeMap::new(),
                next_listener: 1,
                configuration: Configuration::with_locale("en-US"),
                font_scale: 1.0,
                failing: HashSet::new(),
            }),
        }
    }

    /// Callbacks complete by themselves
    pub fn auto() -> Self {
        Self::new(CallbackMode::Auto)
    }

    /// Callbacks wait for `finish_next` / `notify_configuration_changed`
    pub fn manual() -> Self {
        Self::new(CallbackMode::Manual)
    }

    pub fn with_configuration(self, configuration: Configuration) -> Self {
        self.state().configuration = configuration;
        self
    }

    pub fn with_font_scale(self, scale: f64) -> Self {
        self.state().font_scale = scale;
        self
    }

    /// Make every later call to `operation` (a trait method name) fail
    pub fn fail(&self, operation: &str) {
        self.state().failing.insert(operation.to_string());
    }

    pub fn calls(&self) -> Vec<SystemCall> {
        self.state().calls.clone()
    }

    pub fn take_calls(&self) -> Vec<SystemCall> {
        std::mem::take(&mut self.state().calls)
    }

    /// Package callbacks still held in manual mode
    pub fn pending_callbacks(&self) -> usize {
        self.state().pending.len()
    }

    /// Run the oldest held package callback with `result`
    pub fn finish_next(&self, result: PackageResult) -> bool {
        let next = self.state().pending.pop_front();
        match next {
            Some((call, callback)) => {
                tracing::debug!(call = ?call, result = %result, "Releasing held callback");
                callback(result);
                true
            }
            None => false,
        }
    }

    /// Deliver a configuration-changed event to every registered listener.
    /// Returns how many were notified.
    pub fn notify_configuration_changed(&self) -> usize {
        let (configuration, listeners) = self.snapshot_listeners();
        for listener in &listeners {
            listener(&configuration);
        }
        listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        self.state().listeners.len()
    }

    pub fn current_configuration(&self) -> Configuration {
        self.state().configuration.clone()
    }

    pub fn current_font_scale(&self) -> f64 {
        self.state().font_scale
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot_listeners(&self) -> (Configuration, Vec<SharedListener>) {
        let state = self.state();
        (state.configuration.clone(), state.listeners.values().cloned().collect())
    }

    fn check(&self, operation: &str) -> Result<()> {
        if self.state().failing.contains(operation) {
            Err(OverlaydError::Collaborator(format!("{operation} failed")))
        } else {
            Ok(())
        }
    }

    fn record(&self, call: SystemCall) {
        tracing::debug!(call = ?call, "Recorded collaborator call");
        self.state().calls.push(call);
    }

    fn hold_or_run(&self, call: SystemCall, callback: PackageCallback) {
        self.record(call.clone());
        match self.mode {
            CallbackMode::Manual => self.state().pending.push_back((call, callback)),
            CallbackMode::Auto => spawn_detached(move || callback(PackageResult::success())),
        }
    }
}

/// Run `f` off the caller's stack, on the runtime if there is one
fn spawn_detached<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { f() });
        }
        Err(_) => {
            std::thread::spawn(f);
        }
    }
}

impl PackageService for RecordingSystem {
    fn install(&self, path: &str, on_installed: PackageCallback) -> Result<()> {
        self.check("install")?;
        self.hold_or_run(SystemCall::Install(path.to_string()), on_installed);
        Ok(())
    }

    fn delete(&self, name: &str, on_deleted: PackageCallback) -> Result<()> {
        self.check("delete")?;
        self.hold_or_run(SystemCall::DeletePackage(name.to_string()), on_deleted);
        Ok(())
    }

    fn set_overlay_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        self.check("set_overlay_enabled")?;
        self.record(SystemCall::SetOverlayEnabled {
            name: name.to_string(),
            enabled,
        });
        Ok(())
    }
}

impl ProcessService for RecordingSystem {
    fn force_stop(&self, name: &str) -> Result<()> {
        self.check("force_stop")?;
        self.record(SystemCall::ForceStop(name.to_string()));
        Ok(())
    }

    fn show_home(&self) -> Result<()> {
        self.check("show_home")?;
        self.record(SystemCall::ShowHome);
        Ok(())
    }
}

impl ConfigurationService for RecordingSystem {
    fn configuration(&self) -> Result<Configuration> {
        self.check("configuration")?;
        Ok(self.current_configuration())
    }

    fn update_configuration(&self, configuration: &Configuration) -> Result<()> {
        self.check("update_configuration")?;
        self.record(SystemCall::UpdateConfiguration(configuration.clone()));
        self.state().configuration = configuration.clone();

        if self.mode == CallbackMode::Auto {
            let (configuration, listeners) = self.snapshot_listeners();
            spawn_detached(move || {
                for listener in &listeners {
                    listener(&configuration);
                }
            });
        }
        Ok(())
    }

    fn register_listener(&self, listener: ConfigurationListener) -> Result<ListenerId> {
        self.check("register_listener")?;
        let id = {
            let mut state = self.state();
            let id = ListenerId(state.next_listener);
            state.next_listener += 1;
            state.listeners.insert(id, Arc::new(listener));
            id
        };
        self.record(SystemCall::RegisterListener(id));
        Ok(id)
    }

    fn unregister_listener(&self, id: ListenerId) -> Result<()> {
        self.check("unregister_listener")?;
        self.record(SystemCall::UnregisterListener(id));
        self.state().listeners.remove(&id);
        Ok(())
    }

    fn set_system_property(&self, key: &str, value: &str) -> Result<()> {
        self.check("set_system_property")?;
        self.record(SystemCall::SetSystemProperty {
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    fn font_scale(&self) -> Result<f64> {
        self.check("font_scale")?;
        Ok(self.current_font_scale())
    }

    fn set_font_scale(&self, scale: f64) -> Result<()> {
        self.check("set_font_scale")?;
        self.record(SystemCall::SetFontScale(scale));
        self.state().font_scale = scale;
        Ok(())
    }
}

impl Filesystem for RecordingSystem {
    fn create_dir(&self, path: &Path, mode: u32) -> Result<()> {
        self.check("create_dir")?;
        self.record(SystemCall::CreateDir {
            path: path.to_path_buf(),
            mode,
        });
        Ok(())
    }

    fn copy_dir(&self, source: &Path, dest: &Path) -> Result<usize> {
        self.check("copy_dir")?;
        self.record(SystemCall::CopyDir {
            source: source.to_path_buf(),
            dest: dest.to_path_buf(),
        });
        Ok(0)
    }

    fn copy_file(&self, source: &Path, dest: &Path) -> Result<()> {
        self.check("copy_file")?;
        self.record(SystemCall::CopyFile {
            source: source.to_path_buf(),
            dest: dest.to_path_buf(),
        });
        Ok(())
    }

    fn delete_path(&self, path: &Path) -> Result<()> {
        self.check("delete_path")?;
        self.record(SystemCall::DeletePath(path.to_path_buf()));
        Ok(())
    }

    fn set_mode(&self, path: &Path, mode: u32) -> Result<()> {
        self.check("set_mode")?;
        self.record(SystemCall::SetMode {
            path: path.to_path_buf(),
            mode,
        });
        Ok(())
    }

    fn unzip(&self, archive: &Path, dest: &Path) -> Result<()> {
        self.check("unzip")?;
        self.record(SystemCall::Unzip {
            archive: archive.to_path_buf(),
            dest: dest.to_path_buf(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_manual_holds_package_callbacks() {
        let system = RecordingSystem::manual();
        let (tx, rx) = mpsc::channel();

        system
            .install("/a.apk", Box::new(move |result| tx.send(result).unwrap()))
            .unwrap();

        assert_eq!(system.pending_callbacks(), 1);
        assert!(rx.try_recv().is_err());

        assert!(system.finish_next(PackageResult::failure(-2, "bad apk")));
        assert_eq!(rx.try_recv().unwrap().code, -2);
        assert!(!system.finish_next(PackageResult::success()));
        assert_eq!(system.calls(), vec![SystemCall::Install("/a.apk".into())]);
    }

    #[tokio::test]
    async fn test_auto_completes_package_callbacks() {
        let system = RecordingSystem::auto();
        let (tx, rx) = tokio::sync::oneshot::channel();

        system
            .delete("pkg.x", Box::new(move |result| tx.send(result).unwrap()))
            .unwrap();

        assert!(rx.await.unwrap().is_success());
        assert_eq!(system.pending_callbacks(), 0);
    }

    #[test]
    fn test_injected_failure_drops_callback() {
        let system = RecordingSystem::manual();
        system.fail("install");
        let (tx, rx) = mpsc::channel::<PackageResult>();

        let result = system.install("/a.apk", Box::new(move |r| tx.send(r).unwrap()));

        assert!(matches!(result, Err(OverlaydError::Collaborator(_))));
        assert!(rx.recv().is_err());
        assert!(system.calls().is_empty());
    }

    #[test]
    fn test_listener_lifecycle() {
        let system = RecordingSystem::manual().with_configuration(Configuration::with_locale("en-US"));
        let (tx, rx) = mpsc::channel();

        let id = system
            .register_listener(Box::new(move |config| tx.send(config.locale.clone()).unwrap()))
            .unwrap();
        system
            .update_configuration(&Configuration::with_locale("ja-JP"))
            .unwrap();

        // Manual mode: no notification until asked
        assert!(rx.try_recv().is_err());
        assert_eq!(system.notify_configuration_changed(), 1);
        assert_eq!(rx.try_recv().unwrap(), "ja-JP");

        system.unregister_listener(id).unwrap();
        assert_eq!(system.listener_count(), 0);
        assert_eq!(system.notify_configuration_changed(), 0);
    }

    #[tokio::test]
    async fn test_auto_notifies_after_update() {
        let system = RecordingSystem::auto();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        system
            .register_listener(Box::new(move |config| {
                let _ = tx.send(config.clone());
            }))
            .unwrap();

        system
            .update_configuration(&Configuration::with_locale("zh-CN"))
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().locale, "zh-CN");
    }

    #[test]
    fn test_font_scale_round_trip() {
        let system = RecordingSystem::manual().with_font_scale(1.15);
        assert_eq!(system.font_scale().unwrap(), 1.15);
        system.set_font_scale(1.3).unwrap();
        assert_eq!(system.current_font_scale(), 1.3);
        assert_eq!(system.take_calls(), vec![SystemCall::SetFontScale(1.3)]);
        assert!(system.calls().is_empty());
    }
}
