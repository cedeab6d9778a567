//! Configuration for the deploykit orchestrator.
//!
//! This crate handles:
//! - `.env`-style environment files and required-variable validation
//! - Deployment settings (region, naming, account targets)
//! - Policy knobs (retry counts, polling ceilings, fan-out limits)

pub mod env_file;
pub mod error;
pub mod settings;

pub use env_file::{Environment, load_environment};
pub use error::{ConfigError, ConfigResult};
pub use settings::{DeploySettings, MultiAccount, Policies};
