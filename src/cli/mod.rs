//! CLI module for resload - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for fetching resources
//! and inspecting the effective configuration.

pub mod commands;

pub use commands::Cli;
