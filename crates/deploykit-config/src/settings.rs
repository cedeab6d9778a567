//! Deployment settings and policy knobs.
//!
//! The polling ceilings and retry counts here were observed empirically
//! against one account's propagation latency; they are defaults, not
//! contracts, which is why they live in configuration.

use std::time::Duration;

use deploykit_core::resource::Naming;
use deploykit_core::retry::{PollPolicy, RetryPolicy};

use crate::env_file::Environment;
use crate::error::ConfigResult;

/// Retry and polling policy for every call site.
#[derive(Debug, Clone, Copy)]
pub struct Policies {
    /// Bounded retry for eventual-consistency failures (IAM in particular).
    pub transient: RetryPolicy,
    /// Stack create/update/delete monitoring.
    pub stack: PollPolicy,
    /// Stack-set instance status after an update-instances operation.
    pub instances: PollPolicy,
    /// Runtime endpoint removal during stuck-stack repair.
    pub endpoints: PollPolicy,
    /// Max accounts in flight during a fan-out.
    pub fanout_concurrency: usize,
    /// Account failures tolerated before the fan-out is marked failed.
    pub fanout_failure_tolerance: usize,
}

impl Default for Policies {
    fn default() -> Self {
        Self {
            transient: RetryPolicy::eventual_consistency(),
            stack: PollPolicy::new(Duration::from_secs(15), Duration::from_secs(1800)),
            instances: PollPolicy::new(Duration::from_secs(15), Duration::from_secs(600)),
            endpoints: PollPolicy::new(Duration::from_secs(10), Duration::from_secs(300)),
            fanout_concurrency: 10,
            fanout_failure_tolerance: 5,
        }
    }
}

/// Multi-account deployment targets.
#[derive(Debug, Clone)]
pub struct MultiAccount {
    pub ou_id: String,
    pub master_account_id: String,
    /// Role assumed in each member account.
    pub admin_role: String,
}

/// Everything one orchestrator run needs to know.
#[derive(Debug, Clone)]
pub struct DeploySettings {
    pub region: String,
    pub naming: Naming,
    pub policies: Policies,
    /// Skip the container-image phase on destroy for faster re-deploys.
    pub preserve_images: bool,
    pub multi_account: Option<MultiAccount>,
    /// Coveo credentials seeded into Parameter Store after the core layer.
    pub coveo_org_id: String,
    pub coveo_search_api_key: String,
    pub coveo_answer_config_id: String,
}

impl DeploySettings {
    /// Build settings from a validated environment. `validate` must have
    /// been called with the matching `multi_account` flag first.
    pub fn from_environment(
        env: &Environment,
        stack_prefix: &str,
        multi_account: bool,
    ) -> ConfigResult<Self> {
        env.validate(multi_account)?;

        let multi = if multi_account {
            Some(MultiAccount {
                ou_id: env.require("OU_ID")?.to_string(),
                master_account_id: env.require("MASTER_ACCOUNT_ID")?.to_string(),
                admin_role: env
                    .get("WORKSHOP_ADMIN_ROLE")
                    .unwrap_or("OrganizationAccountAccessRole")
                    .to_string(),
            })
        } else {
            None
        };

        let prefix = if stack_prefix.is_empty() {
            env.get("STACK_PREFIX").unwrap_or("workshop")
        } else {
            stack_prefix
        };

        Ok(Self {
            region: env.require("AWS_REGION")?.to_string(),
            naming: Naming::new(prefix),
            policies: Policies::default(),
            preserve_images: false,
            multi_account: multi,
            coveo_org_id: env.require("COVEO_ORG_ID")?.to_string(),
            coveo_search_api_key: env.require("COVEO_SEARCH_API_KEY")?.to_string(),
            coveo_answer_config_id: env.require("COVEO_ANSWER_CONFIG_ID")?.to_string(),
        })
    }
}
