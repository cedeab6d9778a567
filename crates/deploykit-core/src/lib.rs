//! Core domain types and traits for the deploykit orchestrator.
//!
//! This crate contains:
//! - Resource references and the naming convention
//! - Stack and stack-instance status models
//! - Retry and polling policies
//! - Step results and run summaries
//! - The `CloudProvider` trait and credential types

pub mod error;
pub mod provider;
pub mod resource;
pub mod retry;
pub mod status;
pub mod step;

pub use error::{Error, Result};
pub use provider::{CallScope, CloudProvider, Credentials};
pub use resource::{ResourceKind, ResourceRef};
pub use retry::{PollPolicy, RetryPolicy};
pub use status::{Probe, StackStatus};
pub use step::{RunSummary, StepResult, StepStatus};
