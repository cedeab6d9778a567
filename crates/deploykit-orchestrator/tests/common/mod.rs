//! In-memory `CloudProvider` for pipeline tests.
//!
//! State is partitioned by account; the account for a call is derived from
//! the scope's credentials, so the tests can assert exactly which session
//! touched what. Every mutating call is appended to an operation log for
//! ordering assertions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use deploykit_config::{DeploySettings, MultiAccount, Policies};
use deploykit_core::provider::{
    CallScope, CloudProvider, Credentials, InstanceTarget, ObjectVersion, StackResource, StackSpec,
};
use deploykit_core::resource::Naming;
use deploykit_core::retry::{PollPolicy, RetryPolicy};
use deploykit_core::status::{InstanceStatus, Probe, StackInstance, StackStatus};
use deploykit_core::{Error, ResourceKind, ResourceRef, Result};

pub const AMBIENT: &str = "ambient";

/// Settings with millisecond polling so tests never sleep for real.
pub fn test_settings(multi_account: Option<MultiAccount>) -> DeploySettings {
    DeploySettings {
        region: "us-east-1".to_string(),
        naming: Naming::new("workshop"),
        policies: Policies {
            transient: RetryPolicy::new(3, Duration::from_millis(1)),
            stack: PollPolicy::new(Duration::from_millis(1), Duration::from_secs(5)),
            instances: PollPolicy::new(Duration::from_millis(1), Duration::from_secs(5)),
            endpoints: PollPolicy::new(Duration::from_millis(1), Duration::from_secs(5)),
            fanout_concurrency: 4,
            fanout_failure_tolerance: 1,
        },
        preserve_images: false,
        multi_account,
        coveo_org_id: "org123".to_string(),
        coveo_search_api_key: "key456".to_string(),
        coveo_answer_config_id: "cfg789".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpRecord {
    pub account: String,
    pub op: String,
}

#[derive(Debug, Clone)]
struct StackState {
    status: StackStatus,
    spec: StackSpec,
    outputs: BTreeMap<String, String>,
    resources: Vec<StackResource>,
}

#[derive(Debug, Default)]
struct AccountState {
    stacks: BTreeMap<String, StackState>,
    /// Everything whose removal is a single call, keyed by kind.
    resources: BTreeSet<(ResourceKind, String)>,
    parameters: BTreeMap<String, (String, bool)>,
    inline_policies: BTreeMap<String, Vec<String>>,
    attached_policies: BTreeMap<String, Vec<String>>,
    instance_profiles: BTreeMap<String, Vec<String>>,
    bucket_versions: BTreeMap<String, Vec<ObjectVersion>>,
    agent_aliases: BTreeMap<String, Vec<String>>,
    runtime_endpoints: BTreeMap<String, Vec<String>>,
    stack_instances: BTreeMap<String, Vec<StackInstance>>,
}

#[derive(Default)]
struct State {
    accounts: BTreeMap<String, AccountState>,
    ou_accounts: Vec<String>,
    fail_assume: BTreeSet<String>,
    /// Stack names whose next delete lands in DELETE_FAILED.
    stuck_deletes: BTreeSet<String>,
    /// Stack names whose every delete lands in DELETE_FAILED.
    always_stuck_deletes: BTreeSet<String>,
    /// Roles whose instance-profile removal silently does nothing, so the
    /// role delete keeps hitting a conflict.
    sticky_profiles: BTreeSet<String>,
    /// Outputs a stack exports once created, keyed by stack name.
    preset_outputs: BTreeMap<String, BTreeMap<String, String>>,
    ops: Vec<OpRecord>,
}

#[derive(Default)]
pub struct FakeCloud {
    state: Mutex<State>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn account_of(scope: &CallScope) -> String {
        match &scope.credentials {
            None => AMBIENT.to_string(),
            Some(c) => c
                .access_key_id
                .strip_prefix("AKID-")
                .unwrap_or(AMBIENT)
                .to_string(),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    fn with_account<T>(&self, scope: &CallScope, f: impl FnOnce(&mut AccountState) -> T) -> T {
        let account = Self::account_of(scope);
        self.with_state(|s| f(s.accounts.entry(account).or_default()))
    }

    fn record(&self, scope: &CallScope, op: impl Into<String>) {
        let account = Self::account_of(scope);
        self.with_state(|s| s.ops.push(OpRecord { account, op: op.into() }));
    }

    // -- seeding --

    pub fn add_resource(&self, account: &str, kind: ResourceKind, id: &str) {
        self.with_state(|s| {
            s.accounts
                .entry(account.to_string())
                .or_default()
                .resources
                .insert((kind, id.to_string()));
        });
    }

    pub fn add_role(&self, account: &str, role: &str, inline: &[&str], attached: &[&str], profiles: &[&str]) {
        self.add_resource(account, ResourceKind::Role, role);
        self.with_state(|s| {
            let acct = s.accounts.entry(account.to_string()).or_default();
            acct.inline_policies
                .insert(role.to_string(), inline.iter().map(|p| p.to_string()).collect());
            acct.attached_policies
                .insert(role.to_string(), attached.iter().map(|p| p.to_string()).collect());
            acct.instance_profiles
                .insert(role.to_string(), profiles.iter().map(|p| p.to_string()).collect());
        });
    }

    pub fn add_bucket(&self, account: &str, bucket: &str, versions: &[(&str, &str)]) {
        self.add_resource(account, ResourceKind::Bucket, bucket);
        self.with_state(|s| {
            s.accounts.entry(account.to_string()).or_default().bucket_versions.insert(
                bucket.to_string(),
                versions
                    .iter()
                    .map(|(key, version_id)| ObjectVersion {
                        key: key.to_string(),
                        version_id: version_id.to_string(),
                    })
                    .collect(),
            );
        });
    }

    pub fn add_agent(&self, account: &str, agent: &str, aliases: &[&str]) {
        self.add_resource(account, ResourceKind::Agent, agent);
        self.with_state(|s| {
            s.accounts
                .entry(account.to_string())
                .or_default()
                .agent_aliases
                .insert(agent.to_string(), aliases.iter().map(|a| a.to_string()).collect());
        });
    }

    pub fn add_runtime(&self, account: &str, runtime: &str, endpoints: &[&str]) {
        self.add_resource(account, ResourceKind::Runtime, runtime);
        self.with_state(|s| {
            s.accounts
                .entry(account.to_string())
                .or_default()
                .runtime_endpoints
                .insert(runtime.to_string(), endpoints.iter().map(|e| e.to_string()).collect());
        });
    }

    pub fn add_parameter(&self, account: &str, name: &str, value: &str, secure: bool) {
        self.with_state(|s| {
            s.accounts
                .entry(account.to_string())
                .or_default()
                .parameters
                .insert(name.to_string(), (value.to_string(), secure));
        });
    }

    pub fn add_stack(&self, account: &str, name: &str, status: StackStatus, resources: Vec<StackResource>) {
        self.with_state(|s| {
            s.accounts.entry(account.to_string()).or_default().stacks.insert(
                name.to_string(),
                StackState {
                    status,
                    spec: StackSpec::default(),
                    outputs: BTreeMap::new(),
                    resources,
                },
            );
        });
    }

    pub fn preset_outputs(&self, stack: &str, outputs: &[(&str, &str)]) {
        self.with_state(|s| {
            s.preset_outputs.insert(
                stack.to_string(),
                outputs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            );
        });
    }

    pub fn set_ou_accounts(&self, accounts: &[&str]) {
        self.with_state(|s| s.ou_accounts = accounts.iter().map(|a| a.to_string()).collect());
    }

    pub fn fail_assume_role(&self, account: &str) {
        self.with_state(|s| {
            s.fail_assume.insert(account.to_string());
        });
    }

    /// The next delete of `stack` lands in DELETE_FAILED instead.
    pub fn stick_next_delete(&self, stack: &str) {
        self.with_state(|s| {
            s.stuck_deletes.insert(stack.to_string());
        });
    }

    /// Every delete of `stack` lands in DELETE_FAILED, no matter how often
    /// it is repaired and retried.
    pub fn stick_every_delete(&self, stack: &str) {
        self.with_state(|s| {
            s.always_stuck_deletes.insert(stack.to_string());
        });
    }

    /// Instance-profile removal for `role` silently does nothing, so the
    /// role delete never stops conflicting.
    pub fn with_profile_that_never_detaches(&self, role: &str) {
        self.with_state(|s| {
            s.sticky_profiles.insert(role.to_string());
        });
    }

    // -- assertions --

    pub fn ops(&self) -> Vec<OpRecord> {
        self.with_state(|s| s.ops.clone())
    }

    pub fn has_resource(&self, account: &str, kind: ResourceKind, id: &str) -> bool {
        self.with_state(|s| {
            s.accounts
                .get(account)
                .is_some_and(|a| a.resources.contains(&(kind, id.to_string())))
        })
    }

    pub fn stack_status(&self, account: &str, name: &str) -> Option<StackStatus> {
        self.with_state(|s| {
            s.accounts
                .get(account)
                .and_then(|a| a.stacks.get(name))
                .map(|st| st.status.clone())
        })
    }

    pub fn parameter(&self, account: &str, name: &str) -> Option<(String, bool)> {
        self.with_state(|s| {
            s.accounts.get(account).and_then(|a| a.parameters.get(name)).cloned()
        })
    }

    pub fn resource_count(&self, account: &str) -> usize {
        self.with_state(|s| {
            s.accounts.get(account).map_or(0, |a| {
                a.resources.len() + a.parameters.len() + a.stacks.len()
            })
        })
    }
}

#[async_trait]
impl CloudProvider for FakeCloud {
    async fn probe(&self, scope: &CallScope, resource: &ResourceRef) -> Result<Probe> {
        self.with_account(scope, |acct| match resource.kind {
            ResourceKind::Stack => match acct.stacks.get(&resource.identifier) {
                Some(st) => Ok(Probe::present(st.status.clone())),
                None => Ok(Probe::absent()),
            },
            ResourceKind::Parameter => {
                if acct.parameters.contains_key(&resource.identifier) {
                    Ok(Probe::present_plain())
                } else {
                    Ok(Probe::absent())
                }
            }
            kind => {
                if acct.resources.contains(&(kind, resource.identifier.clone())) {
                    Ok(Probe::present_plain())
                } else {
                    Ok(Probe::absent())
                }
            }
        })
    }

    async fn create_stack(&self, scope: &CallScope, name: &str, spec: &StackSpec) -> Result<()> {
        self.record(scope, format!("create-stack {name}"));
        let outputs = self.with_state(|s| s.preset_outputs.get(name).cloned().unwrap_or_default());
        self.with_account(scope, |acct| {
            acct.stacks.insert(
                name.to_string(),
                StackState {
                    status: StackStatus::CreateComplete,
                    spec: spec.clone(),
                    outputs,
                    resources: Vec::new(),
                },
            );
        });
        Ok(())
    }

    async fn update_stack(&self, scope: &CallScope, name: &str, spec: &StackSpec) -> Result<()> {
        self.record(scope, format!("update-stack {name}"));
        self.with_account(scope, |acct| {
            let Some(stack) = acct.stacks.get_mut(name) else {
                return Err(Error::NotFound(format!("stack {name}")));
            };
            if stack.spec.template == spec.template && stack.spec.parameters == spec.parameters {
                return Err(Error::AlreadyExists("No updates are to be performed".into()));
            }
            stack.spec = spec.clone();
            stack.status = StackStatus::UpdateComplete;
            Ok(())
        })
    }

    async fn delete_stack(&self, scope: &CallScope, name: &str) -> Result<()> {
        self.record(scope, format!("delete-stack {name}"));
        let stick = self.with_state(|s| {
            s.stuck_deletes.remove(name) || s.always_stuck_deletes.contains(name)
        });
        self.with_account(scope, |acct| {
            if !acct.stacks.contains_key(name) {
                return Err(Error::NotFound(format!("stack {name}")));
            }
            if stick {
                if let Some(stack) = acct.stacks.get_mut(name) {
                    stack.status = StackStatus::DeleteFailed;
                }
            } else {
                acct.stacks.remove(name);
            }
            Ok(())
        })
    }

    async fn continue_rollback(&self, scope: &CallScope, name: &str) -> Result<()> {
        self.record(scope, format!("continue-rollback {name}"));
        self.with_account(scope, |acct| {
            let Some(stack) = acct.stacks.get_mut(name) else {
                return Err(Error::NotFound(format!("stack {name}")));
            };
            stack.status = StackStatus::UpdateRollbackComplete;
            Ok(())
        })
    }

    async fn list_stacks(&self, scope: &CallScope, prefix: &str) -> Result<Vec<(String, StackStatus)>> {
        self.with_account(scope, |acct| {
            Ok(acct
                .stacks
                .iter()
                .filter(|(name, _)| name.starts_with(prefix))
                .map(|(name, st)| (name.clone(), st.status.clone()))
                .collect())
        })
    }

    async fn list_stack_resources(&self, scope: &CallScope, name: &str) -> Result<Vec<StackResource>> {
        self.with_account(scope, |acct| match acct.stacks.get(name) {
            Some(st) => Ok(st.resources.clone()),
            None => Err(Error::NotFound(format!("stack {name}"))),
        })
    }

    async fn stack_outputs(&self, scope: &CallScope, name: &str) -> Result<BTreeMap<String, String>> {
        self.with_account(scope, |acct| {
            Ok(acct.stacks.get(name).map(|st| st.outputs.clone()).unwrap_or_default())
        })
    }

    async fn update_stack_instances(
        &self,
        scope: &CallScope,
        stack_set: &str,
        targets: &[InstanceTarget],
    ) -> Result<String> {
        self.record(scope, format!("update-stack-instances {stack_set}"));
        self.with_account(scope, |acct| {
            let instances = acct.stack_instances.entry(stack_set.to_string()).or_default();
            for target in targets {
                match instances
                    .iter_mut()
                    .find(|i| i.account == target.account && i.region == target.region)
                {
                    Some(instance) => instance.status = InstanceStatus::Current,
                    None => instances.push(StackInstance {
                        account: target.account.clone(),
                        region: target.region.clone(),
                        status: InstanceStatus::Current,
                    }),
                }
            }
        });
        Ok(format!("op-{stack_set}"))
    }

    async fn list_stack_instances(&self, scope: &CallScope, stack_set: &str) -> Result<Vec<StackInstance>> {
        self.with_account(scope, |acct| {
            Ok(acct.stack_instances.get(stack_set).cloned().unwrap_or_default())
        })
    }

    async fn delete(&self, scope: &CallScope, resource: &ResourceRef, force: bool) -> Result<()> {
        self.record(scope, format!("delete {} {} force={force}", resource.kind, resource.identifier));
        self.with_account(scope, |acct| {
            if resource.kind == ResourceKind::Parameter {
                return match acct.parameters.remove(&resource.identifier) {
                    Some(_) => Ok(()),
                    None => Err(Error::NotFound(resource.to_string())),
                };
            }
            if resource.kind == ResourceKind::Role {
                let attachments_left = acct
                    .inline_policies
                    .get(&resource.identifier)
                    .is_some_and(|v| !v.is_empty())
                    || acct
                        .attached_policies
                        .get(&resource.identifier)
                        .is_some_and(|v| !v.is_empty())
                    || acct
                        .instance_profiles
                        .get(&resource.identifier)
                        .is_some_and(|v| !v.is_empty());
                if attachments_left {
                    return Err(Error::Transient(format!(
                        "DeleteConflict: role {} still has attachments",
                        resource.identifier
                    )));
                }
            }
            if acct.resources.remove(&(resource.kind, resource.identifier.clone())) {
                Ok(())
            } else {
                Err(Error::NotFound(resource.to_string()))
            }
        })
    }

    async fn list_by_prefix(&self, scope: &CallScope, kind: ResourceKind, prefix: &str) -> Result<Vec<String>> {
        self.with_account(scope, |acct| {
            let ids = match kind {
                ResourceKind::Stack => acct.stacks.keys().cloned().collect::<Vec<_>>(),
                ResourceKind::Parameter => acct.parameters.keys().cloned().collect(),
                kind => acct
                    .resources
                    .iter()
                    .filter(|(k, _)| *k == kind)
                    .map(|(_, id)| id.clone())
                    .collect(),
            };
            Ok(ids.into_iter().filter(|id| id.starts_with(prefix)).collect())
        })
    }

    async fn list_role_inline_policies(&self, scope: &CallScope, role: &str) -> Result<Vec<String>> {
        self.with_account(scope, |acct| {
            Ok(acct.inline_policies.get(role).cloned().unwrap_or_default())
        })
    }

    async fn delete_role_inline_policy(&self, scope: &CallScope, role: &str, policy: &str) -> Result<()> {
        self.record(scope, format!("delete-inline-policy {role}/{policy}"));
        self.with_account(scope, |acct| {
            if let Some(policies) = acct.inline_policies.get_mut(role) {
                policies.retain(|p| p != policy);
            }
        });
        Ok(())
    }

    async fn list_attached_role_policies(&self, scope: &CallScope, role: &str) -> Result<Vec<String>> {
        self.with_account(scope, |acct| {
            Ok(acct.attached_policies.get(role).cloned().unwrap_or_default())
        })
    }

    async fn detach_role_policy(&self, scope: &CallScope, role: &str, policy_arn: &str) -> Result<()> {
        self.record(scope, format!("detach-policy {role}/{policy_arn}"));
        self.with_account(scope, |acct| {
            if let Some(policies) = acct.attached_policies.get_mut(role) {
                policies.retain(|p| p != policy_arn);
            }
        });
        Ok(())
    }

    async fn list_instance_profiles_for_role(&self, scope: &CallScope, role: &str) -> Result<Vec<String>> {
        self.with_account(scope, |acct| {
            Ok(acct.instance_profiles.get(role).cloned().unwrap_or_default())
        })
    }

    async fn remove_role_from_instance_profile(
        &self,
        scope: &CallScope,
        profile: &str,
        role: &str,
    ) -> Result<()> {
        self.record(scope, format!("remove-from-profile {role}/{profile}"));
        let sticky = self.with_state(|s| s.sticky_profiles.contains(role));
        if sticky {
            return Ok(());
        }
        self.with_account(scope, |acct| {
            if let Some(profiles) = acct.instance_profiles.get_mut(role) {
                profiles.retain(|p| p != profile);
            }
        });
        Ok(())
    }

    async fn list_object_versions(&self, scope: &CallScope, bucket: &str) -> Result<Vec<ObjectVersion>> {
        self.with_account(scope, |acct| {
            if !acct.resources.contains(&(ResourceKind::Bucket, bucket.to_string())) {
                return Err(Error::NotFound(format!("bucket {bucket}")));
            }
            Ok(acct.bucket_versions.get(bucket).cloned().unwrap_or_default())
        })
    }

    async fn delete_object_versions(
        &self,
        scope: &CallScope,
        bucket: &str,
        versions: &[ObjectVersion],
    ) -> Result<()> {
        self.record(scope, format!("delete-object-versions {bucket} n={}", versions.len()));
        self.with_account(scope, |acct| {
            if let Some(stored) = acct.bucket_versions.get_mut(bucket) {
                stored.retain(|v| !versions.contains(v));
            }
        });
        Ok(())
    }

    async fn list_agent_aliases(&self, scope: &CallScope, agent_id: &str) -> Result<Vec<String>> {
        self.with_account(scope, |acct| {
            if !acct.resources.contains(&(ResourceKind::Agent, agent_id.to_string())) {
                return Err(Error::NotFound(format!("agent {agent_id}")));
            }
            Ok(acct.agent_aliases.get(agent_id).cloned().unwrap_or_default())
        })
    }

    async fn delete_agent_alias(&self, scope: &CallScope, agent_id: &str, alias_id: &str) -> Result<()> {
        self.record(scope, format!("delete-agent-alias {agent_id}/{alias_id}"));
        self.with_account(scope, |acct| {
            if let Some(aliases) = acct.agent_aliases.get_mut(agent_id) {
                aliases.retain(|a| a != alias_id);
            }
        });
        Ok(())
    }

    async fn list_runtime_endpoints(&self, scope: &CallScope, runtime_id: &str) -> Result<Vec<String>> {
        self.with_account(scope, |acct| {
            if !acct.resources.contains(&(ResourceKind::Runtime, runtime_id.to_string())) {
                return Err(Error::NotFound(format!("runtime {runtime_id}")));
            }
            Ok(acct.runtime_endpoints.get(runtime_id).cloned().unwrap_or_default())
        })
    }

    async fn delete_runtime_endpoint(&self, scope: &CallScope, runtime_id: &str, endpoint: &str) -> Result<()> {
        self.record(scope, format!("delete-runtime-endpoint {runtime_id}/{endpoint}"));
        self.with_account(scope, |acct| {
            if let Some(endpoints) = acct.runtime_endpoints.get_mut(runtime_id) {
                endpoints.retain(|e| e != endpoint);
            }
        });
        Ok(())
    }

    async fn put_parameter(&self, scope: &CallScope, name: &str, value: &str, secure: bool) -> Result<()> {
        self.record(scope, format!("put-parameter {name}"));
        self.with_account(scope, |acct| {
            acct.parameters
                .insert(name.to_string(), (value.to_string(), secure));
        });
        Ok(())
    }

    async fn list_ou_accounts(&self, _scope: &CallScope, _ou_id: &str) -> Result<Vec<String>> {
        self.with_state(|s| Ok(s.ou_accounts.clone()))
    }

    async fn assume_role(
        &self,
        scope: &CallScope,
        account: &str,
        role_name: &str,
        session_name: &str,
    ) -> Result<Credentials> {
        self.record(scope, format!("assume-role {account}/{role_name}"));
        let denied = self.with_state(|s| s.fail_assume.contains(account));
        if denied {
            return Err(Error::Provider(format!("AccessDenied assuming {role_name} in {account}")));
        }
        Ok(Credentials {
            access_key_id: format!("AKID-{account}"),
            secret_access_key: format!("secret-{account}"),
            session_token: session_name.to_string(),
            expiration: None,
        })
    }
}
