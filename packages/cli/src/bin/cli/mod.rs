// ABOUTME: Subcommand modules for the agentbox binary
// ABOUTME: Currently a single sandbox command family

pub mod sandbox;
