// Ambient plumbing
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod humanize;
pub mod ids;

// Storage and secrets
pub mod db;
pub mod vault;

// Event log and fan-out
pub mod eventing;

pub mod favorites;

// AWS SSO-OIDC and portal adapter
pub mod aws_sso;

// Providers, sinks and the plumbing between them
pub mod plumbing;
pub mod providers;
pub mod sinks;

pub mod clipboard;

// Controllers and the command boundary
pub mod auth;
pub mod commands;
pub mod dashboard;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
