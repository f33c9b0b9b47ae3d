// ABOUTME: Configuration primitives shared across agentbox packages
// ABOUTME: Exposes environment variable names and tolerant env parsing helpers

pub mod constants;
pub mod env;

pub use env::{env_flag, env_string, parse_env_or_default_with_validation};
