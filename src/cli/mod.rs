//! CLI module for overlayd - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for running the daemon,
//! submitting requests and observing the engine.

pub mod commands;

pub use commands::Cli;
