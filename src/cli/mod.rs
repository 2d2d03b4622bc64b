//! CLI command handlers

pub mod commands;

pub use commands::{aggregate, eval, explain, group, pivot, process, validate};
