//! Subcommand implementations

pub mod answer;
pub mod call;
pub mod config;

mod session;
