//! AWS control-plane access for deploykit.
//!
//! `AwsCli` implements [`deploykit_core::CloudProvider`] by driving the
//! `aws` binary as a subprocess with `--output json`. Assumed-role
//! credentials are injected as per-command environment variables, never
//! into the orchestrator's own environment.

mod classify;
mod invoke;
mod provider;

pub use classify::classify_stderr;
pub use provider::AwsCli;
