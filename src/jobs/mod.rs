//! Job side effects
//!
//! `JobRunner` is the engine's `JobExecutor`: it maps each `Job` variant onto
//! the collaborators in `SystemServices` and decides when the job's
//! completion handle is signalled.
//!
//! Collaborator calls are synchronous and may wait on a child process, so job
//! bodies run on the blocking pool when a runtime is present. The scheduler
//! task only starts them; the completion handle reports back as usual.

pub mod locale;
pub mod package;
pub mod theme;
pub mod ui;

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::config::{Config, ShimConfig, ThemeConfig, UiConfig};
use crate::domain::Job;
use crate::engine::{CompletionHandle, JobExecutor};
use crate::error::Result;
use crate::id::JobId;
use crate::system::SystemServices;

pub use locale::{LocaleShim, ShimPhase};
pub use theme::ThemeFiles;

/// The configuration sections jobs read
#[derive(Debug, Clone, Default)]
pub struct JobSettings {
    pub ui: UiConfig,
    pub theme: ThemeConfig,
    pub shim: ShimConfig,
}

impl From<&Config> for JobSettings {
    fn from(config: &Config) -> Self {
        Self {
            ui: config.ui.clone(),
            theme: config.theme.clone(),
            shim: config.shim.clone(),
        }
    }
}

#[derive(Debug)]
struct Context {
    services: SystemServices,
    settings: JobSettings,
}

impl Context {
    fn theme_files(&self, id: JobId) -> ThemeFiles<'_> {
        ThemeFiles {
            id,
            filesystem: self.services.filesystem.as_ref(),
            configuration: self.services.configuration.as_ref(),
            paths: &self.settings.theme,
        }
    }

    fn restart_ui(&self, id: JobId) -> Result<()> {
        ui::restart(self.services.processes.as_ref(), id, &self.settings.ui.process_name)
    }

    /// Run one job body to the point where its completion is signalled or
    /// handed to a collaborator callback
    fn execute(&self, id: JobId, job: &Job, completion: CompletionHandle) {
        match job {
            Job::InstallPackage { path } => package::install(self.services.packages.as_ref(), path, completion),
            Job::RemovePackage {
                name,
                disable_overlay_first,
            } => package::remove(
                self.services.packages.as_ref(),
                name,
                *disable_overlay_first,
                completion,
            ),
            Job::RestartUi => finish(completion, self.restart_ui(id)),
            Job::FontsChange { clear } => {
                let theme = self.theme_files(id);
                if *clear {
                    theme.clear_fonts();
                } else {
                    theme.apply_fonts();
                }
                // The restart is part of this job, not a queued RestartUi
                finish(completion, self.restart_ui(id));
            }
            Job::BootAnimationChange { source } => {
                let theme = self.theme_files(id);
                match source {
                    Some(source) => theme.apply_boot_animation(source),
                    None => theme.clear_boot_animation(),
                }
                completion.succeed();
            }
            Job::LocaleConfigurationShim => LocaleShim::new(
                id,
                self.services.configuration.clone(),
                self.services.processes.clone(),
                self.settings.shim.clone(),
            )
            .start(completion),
        }
    }
}

#[derive(Debug)]
pub struct JobRunner {
    context: Arc<Context>,
}

impl JobRunner {
    pub fn new(services: SystemServices, settings: JobSettings) -> Self {
        Self {
            context: Arc::new(Context { services, settings }),
        }
    }
}

/// Signal a synchronous job's completion from its result
fn finish(completion: CompletionHandle, result: Result<()>) {
    match result {
        Ok(()) => completion.succeed(),
        Err(e) => completion.fail(e.to_string()),
    }
}

impl JobExecutor for JobRunner {
    fn run(&self, id: JobId, job: &Job, completion: CompletionHandle) {
        match (job, Handle::try_current()) {
            // The shim is already async and drives its own blocking calls
            (Job::LocaleConfigurationShim, _) | (_, Err(_)) => self.context.execute(id, job, completion),
            (_, Ok(runtime)) => {
                let context = Arc::clone(&self.context);
                let job = job.clone();
                runtime.spawn_blocking(move || context.execute(id, &job, completion));
            }
        }
    }
}
