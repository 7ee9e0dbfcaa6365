//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - daemon: run the engine and IPC server in the foreground
//! - submit: send one customization request to the daemon
//! - status: show scheduler state and queue
//! - watch: stream engine notifications

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use overlayd::domain::{Command, Request};

/// overlayd - sequential theme customization daemon
#[derive(Parser, Debug)]
#[command(name = "overlayd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Creator identity presented with submitted requests
    #[arg(long, global = true, default_value = "projekt.substratum")]
    pub caller: String,

    /// Log to stderr instead of the log file
    #[arg(long, global = true)]
    pub log_stderr: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the daemon in the foreground
    Daemon {
        /// Record collaborator calls instead of running platform commands
        #[arg(long)]
        dry_run: bool,
    },

    /// Submit a request to the running daemon
    Submit {
        #[command(subcommand)]
        request: SubmitCommands,
    },

    /// Show scheduler state and queued jobs
    Status,

    /// Print engine notifications as they happen
    Watch {
        /// Exit after the next drained notification
        #[arg(long)]
        once: bool,
    },
}

/// One subcommand per request command tag
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum SubmitCommands {
    /// Install overlay package archives, in order
    Install {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Remove packages, in order
    Uninstall {
        #[arg(required = true)]
        names: Vec<String>,

        /// Restart the system UI after the last removal
        #[arg(long)]
        restart_ui: bool,

        /// Disable each overlay before removing it
        #[arg(long)]
        disable_overlays: bool,
    },

    /// Restart the system UI
    RestartUi,

    /// Force a configuration refresh by flipping the locale
    ConfigurationShim,

    /// Apply a theme's boot animation, or reset it when no theme is given
    Bootanimation {
        /// Theme package id
        #[arg(long, requires = "file")]
        pid: Option<String>,

        /// Boot animation file name in the theme assets
        #[arg(long, requires = "pid")]
        file: Option<String>,
    },

    /// Apply cached theme fonts
    Fonts {
        /// Restore the stock fonts instead
        #[arg(long)]
        reset: bool,
    },

    /// Audio customization (accepted, no effect)
    Audio,
}

impl SubmitCommands {
    /// Build the request this subcommand describes
    pub fn to_request(&self, caller: &str, timestamp: u64) -> Request {
        let request = match self {
            SubmitCommands::Install { paths } => Request::install(paths.iter().cloned(), timestamp),
            SubmitCommands::Uninstall {
                names,
                restart_ui,
                disable_overlays,
            } => {
                let mut request = Request::uninstall(names.iter().cloned(), *restart_ui, timestamp);
                request.payload.disable_overlays = *disable_overlays;
                request
            }
            SubmitCommands::RestartUi => Request::new(Command::RestartUi.as_str(), timestamp),
            SubmitCommands::ConfigurationShim => Request::new(Command::ConfigurationShim.as_str(), timestamp),
            SubmitCommands::Bootanimation { pid, file } => {
                let theme = pid.as_deref().zip(file.as_deref());
                Request::boot_animation(theme, timestamp)
            }
            SubmitCommands::Fonts { reset } => Request::fonts(*reset, timestamp),
            SubmitCommands::Audio => Request::new(Command::Audio.as_str(), timestamp),
        };
        request.from_caller(caller)
    }
}
