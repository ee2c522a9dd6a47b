//! Command implementations for the intellicat CLI.

pub mod check_config;
pub mod init_config;
pub mod run;
