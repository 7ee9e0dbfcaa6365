//! Locale configuration shim
//!
//! Some overlay changes only show up after the global configuration changes.
//! The shim forces one by swapping the locale to a marker and, once the
//! change has been observed, swapping it back:
//!
//! ```text
//! Started -> SpoofingLocale -> Spoofed -> RestoringLocale -> Completed
//!     \___________\______________\____________\__________-> Failed
//! ```
//!
//! The job stays at the head of the queue for the whole saga.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::ShimConfig;
use crate::engine::CompletionHandle;
use crate::error::{OverlaydError, Result};
use crate::id::JobId;
use crate::system::{Configuration, ConfigurationService, ListenerId, ProcessService};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShimPhase {
    Started,
    SpoofingLocale,
    Spoofed,
    RestoringLocale,
    Completed,
    Failed,
}

impl fmt::Display for ShimPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShimPhase::Started => "started",
            ShimPhase::SpoofingLocale => "spoofing_locale",
            ShimPhase::Spoofed => "spoofed",
            ShimPhase::RestoringLocale => "restoring_locale",
            ShimPhase::Completed => "completed",
            ShimPhase::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

pub struct LocaleShim {
    id: JobId,
    configuration: Arc<dyn ConfigurationService>,
    processes: Arc<dyn ProcessService>,
    settings: ShimConfig,
    phase: ShimPhase,
}

impl LocaleShim {
    pub fn new(
        id: JobId,
        configuration: Arc<dyn ConfigurationService>,
        processes: Arc<dyn ProcessService>,
        settings: ShimConfig,
    ) -> Self {
        Self {
            id,
            configuration,
            processes,
            settings,
            phase: ShimPhase::Started,
        }
    }

    pub fn phase(&self) -> ShimPhase {
        self.phase
    }

    /// Drive the saga on the current runtime and signal `completion` at the end
    pub fn start(self, completion: CompletionHandle) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(self.drive(completion));
            }
            Err(_) => completion.fail("locale shim needs a tokio runtime"),
        }
    }

    async fn drive(mut self, completion: CompletionHandle) {
        match self.run().await {
            Ok(()) => {
                self.enter(ShimPhase::Completed);
                completion.succeed();
            }
            Err(e) => {
                tracing::error!(job_id = %self.id, phase = %self.phase, error = %e, "Locale shim failed");
                self.enter(ShimPhase::Failed);
                completion.fail(e.to_string());
            }
        }
    }

    async fn run(&mut self) -> Result<()> {
        self.enter(ShimPhase::Started);
        let processes = Arc::clone(&self.processes);
        if let Err(e) = off_runtime(move || processes.show_home()).await {
            tracing::warn!(job_id = %self.id, error = %e, "Could not bring home screen forward");
        }
        tokio::time::sleep(self.settings.kick_delay()).await;

        self.enter(ShimPhase::SpoofingLocale);
        let (tx, mut changes) = mpsc::unbounded_channel();
        let configuration = Arc::clone(&self.configuration);
        let listener = off_runtime(move || {
            configuration.register_listener(Box::new(move |config: &Configuration| {
                let _ = tx.send(config.clone());
            }))
        })
        .await?;

        let (id, configuration, settings) = (self.id, Arc::clone(&self.configuration), self.settings.clone());
        let original = match off_runtime(move || spoof(id, configuration.as_ref(), &settings)).await {
            Ok(original) => original,
            Err(e) => {
                self.release(listener).await;
                return Err(e);
            }
        };
        self.enter(ShimPhase::Spoofed);

        let Some(changed) = changes.recv().await else {
            self.release(listener).await;
            return Err(OverlaydError::Collaborator(
                "configuration listener dropped before any change".into(),
            ));
        };
        tracing::debug!(job_id = %self.id, locale = %changed.locale, "Configuration change observed");
        tokio::time::sleep(self.settings.restore_delay()).await;

        self.enter(ShimPhase::RestoringLocale);
        let (id, configuration) = (self.id, Arc::clone(&self.configuration));
        off_runtime(move || {
            configuration.unregister_listener(listener)?;
            restore(id, configuration.as_ref(), &original)
        })
        .await
    }

    async fn release(&self, listener: ListenerId) {
        let configuration = Arc::clone(&self.configuration);
        if let Err(e) = off_runtime(move || configuration.unregister_listener(listener)).await {
            tracing::warn!(job_id = %self.id, listener = %listener, error = %e, "Failed to unregister listener");
        }
    }

    fn enter(&mut self, phase: ShimPhase) {
        tracing::debug!(job_id = %self.id, from = %self.phase, to = %phase, "Locale shim phase");
        self.phase = phase;
    }
}

/// Run a synchronous collaborator call on the blocking pool
async fn off_runtime<T, F>(call: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| OverlaydError::Collaborator(format!("collaborator call panicked: {}", e)))?
}

/// Swap to the marker locale. Returns the configuration to restore.
fn spoof(id: JobId, configuration: &dyn ConfigurationService, settings: &ShimConfig) -> Result<Configuration> {
    let original = configuration.configuration()?;
    let marker = settings.marker_for(&original.locale);
    tracing::info!(job_id = %id, from = %original.locale, to = marker, "Spoofing locale");

    let spoofed = Configuration {
        locale: marker.to_string(),
        user_set_locale: true,
    };
    configuration.update_configuration(&spoofed)?;
    Ok(original)
}

fn restore(id: JobId, configuration: &dyn ConfigurationService, original: &Configuration) -> Result<()> {
    let mut current = configuration.configuration()?;
    tracing::info!(job_id = %id, from = %current.locale, to = %original.locale, "Restoring locale");
    current.locale = original.locale.clone();
    current.user_set_locale = true;
    configuration.update_configuration(&current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobOutcome;
    use crate::engine::completion;
    use crate::id::JobIdSequence;
    use crate::system::{RecordingSystem, SystemCall};
    use std::time::Duration;

    fn instant() -> ShimConfig {
        ShimConfig {
            kick_delay_ms: 0,
            restore_delay_ms: 0,
            ..Default::default()
        }
    }

    fn shim(system: &Arc<RecordingSystem>) -> LocaleShim {
        LocaleShim::new(JobIdSequence::new().next_id(), system.clone(), system.clone(), instant())
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition never became true");
    }

    fn has_update(system: &RecordingSystem) -> bool {
        system
            .calls()
            .iter()
            .any(|c| matches!(c, SystemCall::UpdateConfiguration(_)))
    }

    #[tokio::test]
    async fn test_saga_spoofs_then_restores() {
        let system = Arc::new(RecordingSystem::manual().with_configuration(Configuration::with_locale("en-US")));
        let (sender, mut inbox) = completion::channel();
        let shim = shim(&system);
        let id = shim.id;

        shim.start(sender.handle_for(id));
        wait_until(|| has_update(&system)).await;

        // Still waiting for the change event
        assert!(inbox.try_recv().is_none());
        assert_eq!(system.current_configuration().locale, "ja-JP");

        assert_eq!(system.notify_configuration_changed(), 1);
        let event = inbox.recv().await.unwrap();
        assert_eq!(event.id, id);
        assert_eq!(event.outcome, JobOutcome::Completed);

        assert_eq!(
            system.calls(),
            vec![
                SystemCall::ShowHome,
                SystemCall::RegisterListener(ListenerId(1)),
                SystemCall::UpdateConfiguration(Configuration::with_locale("ja-JP")),
                SystemCall::UnregisterListener(ListenerId(1)),
                SystemCall::UpdateConfiguration(Configuration::with_locale("en-US")),
            ]
        );
        assert_eq!(system.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_uses_fallback_marker_when_already_marker() {
        let system = Arc::new(RecordingSystem::manual().with_configuration(Configuration::with_locale("ja-JP")));
        let (sender, mut inbox) = completion::channel();
        let shim = shim(&system);
        let id = shim.id;

        shim.start(sender.handle_for(id));
        wait_until(|| has_update(&system)).await;
        assert_eq!(system.current_configuration().locale, "zh-CN");

        system.notify_configuration_changed();
        assert_eq!(inbox.recv().await.unwrap().outcome, JobOutcome::Completed);
        assert_eq!(system.current_configuration().locale, "ja-JP");
    }

    #[tokio::test]
    async fn test_update_failure_completes_and_unregisters() {
        let system = Arc::new(RecordingSystem::manual());
        system.fail("update_configuration");
        let (sender, mut inbox) = completion::channel();
        let shim = shim(&system);
        let id = shim.id;

        shim.start(sender.handle_for(id));

        let event = inbox.recv().await.unwrap();
        assert!(matches!(event.outcome, JobOutcome::Failed(_)));
        assert_eq!(system.listener_count(), 0);
        assert_eq!(system.current_configuration().locale, "en-US");
    }

    #[tokio::test]
    async fn test_register_failure_completes() {
        let system = Arc::new(RecordingSystem::manual());
        system.fail("register_listener");
        let (sender, mut inbox) = completion::channel();
        let shim = shim(&system);
        let id = shim.id;

        shim.start(sender.handle_for(id));

        assert!(matches!(inbox.recv().await.unwrap().outcome, JobOutcome::Failed(_)));
        assert!(!has_update(&system));
    }

    #[tokio::test]
    async fn test_auto_backend_runs_to_completion() {
        let system = Arc::new(RecordingSystem::auto().with_configuration(Configuration::with_locale("de-DE")));
        let (sender, mut inbox) = completion::channel();
        let shim = shim(&system);
        let id = shim.id;

        shim.start(sender.handle_for(id));

        assert_eq!(inbox.recv().await.unwrap().outcome, JobOutcome::Completed);
        assert_eq!(system.current_configuration().locale, "de-DE");
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let system = Arc::new(RecordingSystem::manual());
        let (sender, mut inbox) = completion::channel();
        let shim = shim(&system);
        let id = shim.id;
        assert_eq!(shim.phase(), ShimPhase::Started);

        shim.start(sender.handle_for(id));

        assert!(matches!(inbox.try_recv().unwrap().outcome, JobOutcome::Failed(_)));
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(ShimPhase::RestoringLocale.to_string(), "restoring_locale");
    }
}
