//! `Filesystem` backed by `std::fs`

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{OverlaydError, Result};
use crate::system::Filesystem;

/// Operates on the real filesystem.
///
/// Archive extraction shells out to the `unzip` tool and blocks until it
/// exits. Nothing in the job path extracts archives; callers that do must run
/// it off the async runtime.
#[derive(Debug, Clone)]
pub struct LocalFilesystem {
    unzip_program: PathBuf,
}

impl Default for LocalFilesystem {
    fn default() -> Self {
        Self {
            unzip_program: PathBuf::from("unzip"),
        }
    }
}

impl LocalFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unzip_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.unzip_program = program.into();
        self
    }
}

impl Filesystem for LocalFilesystem {
    fn create_dir(&self, path: &Path, mode: u32) -> Result<()> {
        if path.is_dir() {
            return Ok(());
        }
        fs::create_dir(path)?;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    fn copy_dir(&self, source: &Path, dest: &Path) -> Result<usize> {
        if !source.is_dir() {
            return Err(OverlaydError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not a directory", source.display()),
            )));
        }
        fs::create_dir_all(dest)?;

        let mut copied = 0;
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            let target = dest.join(entry.file_name());
            if entry.file_type()?.is_dir() {
                copied += self.copy_dir(&entry.path(), &target)?;
            } else {
                fs::copy(entry.path(), &target)?;
                copied += 1;
            }
        }
        Ok(copied)
    }

    fn copy_file(&self, source: &Path, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, dest)?;
        Ok(())
    }

    fn delete_path(&self, path: &Path) -> Result<()> {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)?,
            Ok(_) => fs::remove_file(path)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn set_mode(&self, path: &Path, mode: u32) -> Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    fn unzip(&self, archive: &Path, dest: &Path) -> Result<()> {
        fs::create_dir_all(dest)?;
        let output = Command::new(&self.unzip_program)
            .arg("-o")
            .arg("-q")
            .arg(archive)
            .arg("-d")
            .arg(dest)
            .stdin(Stdio::null())
            .output()?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(OverlaydError::Collaborator(format!(
                "unzip {} exited with {:?}: {}",
                archive.display(),
                output.status.code(),
                stderr.trim()
            )))
        }
    }
}
