//! The `CloudProvider` trait and credential types.
//!
//! The orchestrator never talks to the control plane directly; everything
//! goes through this trait so the pipeline logic can run against a fake.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::resource::{ResourceKind, ResourceRef};
use crate::status::{Probe, StackInstance};

/// Temporary credentials from an assume-role call.
///
/// Immutable and passed by value into each account-scoped operation; they
/// are never installed into the process environment, which is what makes
/// credential leakage between fan-out iterations unrepresentable.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Region plus optional assumed-role credentials for one provider call.
#[derive(Debug, Clone)]
pub struct CallScope {
    pub region: String,
    pub credentials: Option<Credentials>,
}

impl CallScope {
    /// The ambient account, whatever the process environment resolves to.
    pub fn ambient(region: impl Into<String>) -> Self {
        Self { region: region.into(), credentials: None }
    }

    /// Scoped to an assumed role in a target account.
    pub fn assumed(region: impl Into<String>, credentials: Credentials) -> Self {
        Self { region: region.into(), credentials: Some(credentials) }
    }
}

/// Desired state for a stack create or update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackSpec {
    /// Path to the template file handed to the control plane.
    pub template: String,
    pub parameters: BTreeMap<String, String>,
    pub capabilities: Vec<String>,
}

/// One resource inside a stack, as reported by list-stack-resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackResource {
    pub logical_id: String,
    pub physical_id: Option<String>,
    pub resource_type: String,
    pub status: String,
}

/// One version of one object in a versioned bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectVersion {
    pub key: String,
    pub version_id: String,
}

/// Target of a stack-set instance operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceTarget {
    pub account: String,
    pub region: String,
}

/// Control-plane operations the orchestrator depends on.
///
/// Grouped the way the pipeline consumes them: a read-only probe, stack
/// lifecycle, stack-set fan-out, the teardown-ordering helpers for roles,
/// buckets, agents and runtimes, and a generic kind-dispatched delete for
/// everything whose removal is a single call.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Determine existence and status. Must not error on "not found".
    async fn probe(&self, scope: &CallScope, resource: &ResourceRef) -> Result<Probe>;

    // -- stacks --

    async fn create_stack(&self, scope: &CallScope, name: &str, spec: &StackSpec) -> Result<()>;

    /// Returns `Err(AlreadyExists)` when the control plane reports there is
    /// nothing to update; callers treat that as skipped-already-current.
    async fn update_stack(&self, scope: &CallScope, name: &str, spec: &StackSpec) -> Result<()>;

    async fn delete_stack(&self, scope: &CallScope, name: &str) -> Result<()>;

    /// continue-update-rollback, for stacks wedged in UPDATE_ROLLBACK_FAILED.
    async fn continue_rollback(&self, scope: &CallScope, name: &str) -> Result<()>;

    /// All stacks whose name starts with `prefix`, including nested ones.
    async fn list_stacks(&self, scope: &CallScope, prefix: &str)
    -> Result<Vec<(String, crate::status::StackStatus)>>;

    async fn list_stack_resources(&self, scope: &CallScope, name: &str)
    -> Result<Vec<StackResource>>;

    /// Exported outputs of a completed stack; later layers consume these.
    async fn stack_outputs(&self, scope: &CallScope, name: &str)
    -> Result<BTreeMap<String, String>>;

    // -- stack sets --

    async fn update_stack_instances(
        &self,
        scope: &CallScope,
        stack_set: &str,
        targets: &[InstanceTarget],
    ) -> Result<String>;

    async fn list_stack_instances(&self, scope: &CallScope, stack_set: &str)
    -> Result<Vec<StackInstance>>;

    // -- generic per-kind operations --

    /// Delete a resource whose removal is a single control-plane call.
    /// `force` empties/ignores recovery windows where the kind supports it.
    async fn delete(&self, scope: &CallScope, resource: &ResourceRef, force: bool) -> Result<()>;

    /// Identifiers of `kind` matching the naming-convention prefix.
    async fn list_by_prefix(&self, scope: &CallScope, kind: ResourceKind, prefix: &str)
    -> Result<Vec<String>>;

    // -- role teardown ordering --

    async fn list_role_inline_policies(&self, scope: &CallScope, role: &str)
    -> Result<Vec<String>>;

    async fn delete_role_inline_policy(&self, scope: &CallScope, role: &str, policy: &str)
    -> Result<()>;

    async fn list_attached_role_policies(&self, scope: &CallScope, role: &str)
    -> Result<Vec<String>>;

    async fn detach_role_policy(&self, scope: &CallScope, role: &str, policy_arn: &str)
    -> Result<()>;

    async fn list_instance_profiles_for_role(&self, scope: &CallScope, role: &str)
    -> Result<Vec<String>>;

    async fn remove_role_from_instance_profile(
        &self,
        scope: &CallScope,
        profile: &str,
        role: &str,
    ) -> Result<()>;

    // -- versioned buckets --

    async fn list_object_versions(&self, scope: &CallScope, bucket: &str)
    -> Result<Vec<ObjectVersion>>;

    async fn delete_object_versions(
        &self,
        scope: &CallScope,
        bucket: &str,
        versions: &[ObjectVersion],
    ) -> Result<()>;

    // -- agents and runtimes --

    async fn list_agent_aliases(&self, scope: &CallScope, agent_id: &str) -> Result<Vec<String>>;

    async fn delete_agent_alias(&self, scope: &CallScope, agent_id: &str, alias_id: &str)
    -> Result<()>;

    async fn list_runtime_endpoints(&self, scope: &CallScope, runtime_id: &str)
    -> Result<Vec<String>>;

    async fn delete_runtime_endpoint(&self, scope: &CallScope, runtime_id: &str, endpoint: &str)
    -> Result<()>;

    // -- parameters --

    async fn put_parameter(
        &self,
        scope: &CallScope,
        name: &str,
        value: &str,
        secure: bool,
    ) -> Result<()>;

    // -- organizations --

    /// Member account ids of an organizational unit.
    async fn list_ou_accounts(&self, scope: &CallScope, ou_id: &str) -> Result<Vec<String>>;

    // -- sts --

    /// Assume `role_name` in `account`, returning session credentials the
    /// caller owns. Nothing ambient changes.
    async fn assume_role(
        &self,
        scope: &CallScope,
        account: &str,
        role_name: &str,
        session_name: &str,
    ) -> Result<Credentials>;
}
