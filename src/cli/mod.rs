//! CLI module for the Halldyll stack tool.
//!
//! This module provides the command-line interface for previewing,
//! deploying and destroying a stack.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
