//! CLI module for the coalesce command-line interface.
//!
//! Commands run in-process against a store loaded from a JSON Lines file.

mod commands;
mod output;
pub mod types;

pub use commands::*;
