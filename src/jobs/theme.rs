//! Theme resources on disk: fonts and the boot animation
//!
//! Filesystem work here is best effort. Each failed step is logged and the
//! rest still runs; none of it fails the job.

use std::fmt::Display;

use crate::config::ThemeConfig;
use crate::domain::BootAnimationSource;
use crate::id::JobId;
use crate::system::{ConfigurationService, Filesystem};

/// Property that tells the UI to reload theme resources
pub const REFRESH_PROPERTY: &str = "sys.refresh_theme";

/// Added to the font scale so the change is seen as a real update
pub const FONT_SCALE_NUDGE: f64 = 0.0000001;

fn best_effort<T, E: Display>(id: JobId, step: &str, result: Result<T, E>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(job_id = %id, step, error = %e, "Theme step failed, continuing");
            None
        }
    }
}

pub struct ThemeFiles<'a> {
    pub id: JobId,
    pub filesystem: &'a dyn Filesystem,
    pub configuration: &'a dyn ConfigurationService,
    pub paths: &'a ThemeConfig,
}

impl ThemeFiles<'_> {
    /// Populate the theme font dir and make the UI pick it up.
    /// The caller restarts the UI afterwards.
    pub fn apply_fonts(&self) {
        let fonts_dir = self.paths.fonts_dir();
        tracing::info!(job_id = %self.id, dest = %fonts_dir.display(), "Applying theme fonts");

        best_effort(self.id, "create font dir", self.filesystem.create_dir(&fonts_dir, self.paths.dir_mode));

        for source in [&self.paths.system_fonts_dir, &self.paths.font_cache_dir] {
            if let Some(copied) = best_effort(self.id, "copy fonts", self.filesystem.copy_dir(source, &fonts_dir)) {
                tracing::debug!(job_id = %self.id, source = %source.display(), copied, "Fonts copied");
            }
        }

        self.refresh();
        self.nudge_font_scale();
    }

    pub fn clear_fonts(&self) {
        let fonts_dir = self.paths.fonts_dir();
        tracing::info!(job_id = %self.id, path = %fonts_dir.display(), "Clearing theme fonts");
        best_effort(self.id, "delete font dir", self.filesystem.delete_path(&fonts_dir));
        self.refresh();
    }

    /// Replace the themed boot animation with the one built for `source`
    pub fn apply_boot_animation(&self, source: &BootAnimationSource) {
        self.clear_boot_animation();

        let from = self.paths.bootanimation_source(&source.theme_pid, &source.file_name);
        let to = self.paths.bootanimation_path();
        tracing::info!(job_id = %self.id, from = %from.display(), to = %to.display(), "Applying boot animation");

        if best_effort(self.id, "copy boot animation", self.filesystem.copy_file(&from, &to)).is_some() {
            best_effort(
                self.id,
                "chmod boot animation",
                self.filesystem.set_mode(&to, self.paths.bootanimation_mode),
            );
        }
    }

    pub fn clear_boot_animation(&self) {
        let path = self.paths.bootanimation_path();
        tracing::info!(job_id = %self.id, path = %path.display(), "Clearing boot animation");
        best_effort(self.id, "delete boot animation", self.filesystem.delete_path(&path));
    }

    fn refresh(&self) {
        best_effort(
            self.id,
            "set refresh property",
            self.configuration.set_system_property(REFRESH_PROPERTY, "1"),
        );
    }

    fn nudge_font_scale(&self) {
        if let Some(scale) = best_effort(self.id, "read font scale", self.configuration.font_scale()) {
            best_effort(
                self.id,
                "write font scale",
                self.configuration.set_font_scale(scale + FONT_SCALE_NUDGE),
            );
        }
    }
}
