//! CLI module for eload-ingest.

mod commands;

pub use commands::{Cli, Commands, ConfigCommands};
