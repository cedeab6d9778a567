//! Teardown sequencing.
//!
//! Deletes everything the apply path created, in dependency order: anything
//! that can hold a reference to an IAM role goes before the roles, and
//! anything CloudFormation owns goes via stack deletion — except when a
//! direct delete is the only way to unblock a stuck stack. Phases run
//! parallel internally; failures are warnings, because a single stuck
//! resource must not block cleanup of everything else.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use deploykit_config::DeploySettings;
use deploykit_core::provider::{CallScope, CloudProvider};
use deploykit_core::resource::Naming;
use deploykit_core::status::StackStatus;
use deploykit_core::{Error, ResourceKind, ResourceRef, Result, RunSummary, StepResult};
use tracing::{info, warn};

use crate::ensure::Ensurer;
use crate::step_runner::{Mode, StepOutcome, StepRunner};
use crate::sweep::sweep_remaining;

/// Stack resource types whose managed deletion ordering is insufficient:
/// the runtime's endpoint sub-resources must go first, by hand.
const RUNTIME_RESOURCE_TYPES: &[&str] = &["AWS::BedrockAgentCore::Runtime", "Custom::AgentRuntime"];

pub struct TeardownSequencer {
    provider: Arc<dyn CloudProvider>,
    settings: DeploySettings,
    /// Where the deployment-info artifact was written by apply.
    artifacts_dir: PathBuf,
    /// Force-delete every kind that supports it, not just the ones that
    /// need it to succeed at all.
    force: bool,
}

impl TeardownSequencer {
    pub fn new(provider: Arc<dyn CloudProvider>, settings: DeploySettings) -> Self {
        Self {
            provider,
            settings,
            artifacts_dir: PathBuf::from("."),
            force: false,
        }
    }

    pub fn with_artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = dir.into();
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    fn naming(&self) -> &Naming {
        &self.settings.naming
    }

    fn prefix(&self) -> String {
        format!("{}-", self.naming().prefix)
    }

    /// Run the full reverse pipeline. Always returns a summary; teardown is
    /// best-effort and the summary's `remaining` list is the human handoff.
    pub async fn run(&self, scope: &CallScope) -> RunSummary {
        let mut runner =
            StepRunner::new(Mode::Destroy, &self.settings.region, &self.naming().prefix);

        self.phase_runtimes_and_memories(&mut runner, scope).await;
        self.phase_images(&mut runner, scope).await;
        self.phase_simple(&mut runner, scope, "functions", ResourceKind::Function).await;
        self.phase_simple(&mut runner, scope, "build-projects", ResourceKind::BuildProject).await;
        self.phase_agents(&mut runner, scope).await;
        self.phase_roles(&mut runner, scope).await;
        self.phase_buckets(&mut runner, scope).await;
        self.phase_stacks(&mut runner, scope).await;
        self.phase_orphaned_stacks(&mut runner, scope).await;
        self.phase_parameters(&mut runner, scope).await;
        self.phase_secrets(&mut runner, scope).await;
        self.phase_log_groups(&mut runner, scope).await;
        self.phase_simple(&mut runner, scope, "user-pools", ResourceKind::UserPool).await;
        self.phase_local_artifacts(&mut runner).await;

        let mut summary = runner.into_summary();
        match sweep_remaining(&self.provider, scope, self.naming()).await {
            Ok(remaining) => summary.remaining = remaining,
            Err(e) => warn!(error = %e, "final sweep failed"),
        }
        summary
    }

    async fn list(&self, scope: &CallScope, kind: ResourceKind, prefix: &str) -> Vec<String> {
        match self.provider.list_by_prefix(scope, kind, prefix).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(kind = %kind, error = %e, "could not list resources for phase");
                Vec::new()
            }
        }
    }

    /// Delete one resource; absence counts as already done.
    async fn delete_one(
        &self,
        scope: &CallScope,
        kind: ResourceKind,
        id: &str,
        force: bool,
    ) -> Result<StepOutcome> {
        let resource = ResourceRef::new(kind, id, &scope.region);
        match self.provider.delete(scope, &resource, force).await {
            Ok(()) => Ok(StepOutcome::Changed),
            Err(Error::NotFound(_)) => Ok(StepOutcome::Unchanged("already absent".into())),
            Err(e) => Err(e),
        }
    }

    /// Phase 1: externally-reachable runtimes (endpoints first) and
    /// conversation-memory resources.
    async fn phase_runtimes_and_memories(&self, runner: &mut StepRunner, scope: &CallScope) {
        let runtimes = self.list(scope, ResourceKind::Runtime, &self.prefix()).await;
        let members = runtimes
            .into_iter()
            .map(|id| {
                let target = id.clone();
                (id, async move { self.delete_runtime(scope, &target).await })
            })
            .collect();
        runner.run_parallel("runtimes", members).await;

        let memories = self.list(scope, ResourceKind::Memory, &self.prefix()).await;
        let members = memories
            .into_iter()
            .map(|id| {
                let target = id.clone();
                (id, async move {
                    self.delete_one(scope, ResourceKind::Memory, &target, self.force).await
                })
            })
            .collect();
        runner.run_parallel("memories", members).await;
    }

    /// Endpoints hold the runtime open; they go first, then the runtime.
    async fn delete_runtime(&self, scope: &CallScope, runtime_id: &str) -> Result<StepOutcome> {
        let endpoints = match self.provider.list_runtime_endpoints(scope, runtime_id).await {
            Ok(endpoints) => endpoints,
            Err(Error::NotFound(_)) => return Ok(StepOutcome::Unchanged("already absent".into())),
            Err(e) => return Err(e),
        };
        for endpoint in &endpoints {
            match self.provider.delete_runtime_endpoint(scope, runtime_id, endpoint).await {
                Ok(()) | Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if !endpoints.is_empty() {
            self.settings
                .policies
                .endpoints
                .wait_for(&format!("endpoints of runtime {runtime_id}"), || async {
                    let left = self.provider.list_runtime_endpoints(scope, runtime_id).await?;
                    Ok(left.is_empty().then_some(()))
                })
                .await?;
        }
        self.delete_one(scope, ResourceKind::Runtime, runtime_id, self.force).await
    }

    /// Phase 2: container images, optionally preserved for faster re-deploy.
    async fn phase_images(&self, runner: &mut StepRunner, scope: &CallScope) {
        if self.settings.preserve_images {
            runner.record(StepResult::skipped("images", "preserved by request"));
            return;
        }
        let repositories = self.list(scope, ResourceKind::Repository, &self.prefix()).await;
        let members = repositories
            .into_iter()
            .map(|id| {
                let target = id.clone();
                (id, async move {
                    self.delete_one(scope, ResourceKind::Repository, &target, true).await
                })
            })
            .collect();
        runner.run_parallel("images", members).await;
    }

    /// Phases whose members are a plain delete per identifier.
    async fn phase_simple(
        &self,
        runner: &mut StepRunner,
        scope: &CallScope,
        phase: &str,
        kind: ResourceKind,
    ) {
        let ids = self.list(scope, kind, &self.prefix()).await;
        let members = ids
            .into_iter()
            .map(|id| {
                let target = id.clone();
                (id, async move { self.delete_one(scope, kind, &target, self.force).await })
            })
            .collect();
        runner.run_parallel(phase, members).await;
    }

    /// Phase 5: agents go after their aliases.
    async fn phase_agents(&self, runner: &mut StepRunner, scope: &CallScope) {
        let agents = self.list(scope, ResourceKind::Agent, &self.prefix()).await;
        let members = agents
            .into_iter()
            .map(|id| {
                let target = id.clone();
                (id, async move { self.delete_agent(scope, &target).await })
            })
            .collect();
        runner.run_parallel("agents", members).await;
    }

    async fn delete_agent(&self, scope: &CallScope, agent_id: &str) -> Result<StepOutcome> {
        let aliases = match self.provider.list_agent_aliases(scope, agent_id).await {
            Ok(aliases) => aliases,
            Err(Error::NotFound(_)) => return Ok(StepOutcome::Unchanged("already absent".into())),
            Err(e) => return Err(e),
        };
        for alias in aliases {
            match self.provider.delete_agent_alias(scope, agent_id, &alias).await {
                Ok(()) | Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.delete_one(scope, ResourceKind::Agent, agent_id, true).await
    }

    /// Phase 6: IAM roles, with the detach-before-delete ordering.
    async fn phase_roles(&self, runner: &mut StepRunner, scope: &CallScope) {
        let roles = self.list(scope, ResourceKind::Role, &self.prefix()).await;
        let ensurer = self.ensurer();
        let ensurer = &ensurer;
        let members = roles
            .into_iter()
            .map(|id| {
                let target = id.clone();
                (id, async move {
                    ensurer.delete_role(scope, &target).await?;
                    Ok(StepOutcome::Changed)
                })
            })
            .collect();
        runner.run_parallel("roles", members).await;
    }

    /// Phase 7: buckets, emptied version-by-version when versioned.
    async fn phase_buckets(&self, runner: &mut StepRunner, scope: &CallScope) {
        let buckets = self.list(scope, ResourceKind::Bucket, &self.prefix()).await;
        let members = buckets
            .into_iter()
            .map(|id| {
                let target = id.clone();
                (id, async move { self.delete_bucket(scope, &target).await })
            })
            .collect();
        runner.run_parallel("buckets", members).await;
    }

    async fn delete_bucket(&self, scope: &CallScope, bucket: &str) -> Result<StepOutcome> {
        // Deleting a non-empty versioned bucket fails, so drain versions
        // (delete markers included) in batches until the listing is empty.
        loop {
            let versions = match self.provider.list_object_versions(scope, bucket).await {
                Ok(versions) => versions,
                Err(Error::NotFound(_)) => {
                    return Ok(StepOutcome::Unchanged("already absent".into()));
                }
                Err(e) => return Err(e),
            };
            if versions.is_empty() {
                break;
            }
            for batch in versions.chunks(1000) {
                self.provider.delete_object_versions(scope, bucket, batch).await?;
            }
        }
        self.delete_one(scope, ResourceKind::Bucket, bucket, self.force).await
    }

    /// Phase 8: all stacks in parallel, with a bounded-duration monitor
    /// that repairs DELETE_FAILED stacks as they surface.
    async fn phase_stacks(&self, runner: &mut StepRunner, scope: &CallScope) {
        let stacks = match self.provider.list_stacks(scope, &self.prefix()).await {
            Ok(stacks) => stacks,
            Err(e) => {
                warn!(error = %e, "could not list stacks for teardown");
                runner.record(StepResult::failed("stacks", e.to_string()));
                return;
            }
        };

        let mut pending: BTreeMap<String, u32> = BTreeMap::new();
        for (name, status) in stacks {
            if status.is_absent() {
                continue;
            }
            match self.provider.delete_stack(scope, &name).await {
                Ok(()) | Err(Error::NotFound(_)) => {
                    pending.insert(name, 0);
                }
                Err(e) => {
                    runner.record(StepResult::failed(format!("stacks/{name}"), e.to_string()));
                }
            }
        }
        if pending.is_empty() {
            runner.record(StepResult::skipped("stacks", "nothing to delete"));
            return;
        }

        let watched: Vec<String> = pending.keys().cloned().collect();
        let pending = RefCell::new(pending);
        let failed: RefCell<BTreeMap<String, Error>> = RefCell::new(BTreeMap::new());
        let pending_ref = &pending;
        let failed_ref = &failed;
        let monitor = self
            .settings
            .policies
            .stack
            .wait_for("stack teardown", || async move {
                let current = pending_ref.take();
                let mut still_pending = BTreeMap::new();
                for (name, repairs) in current {
                    // A stack that cannot be checked or repaired stops being
                    // watched, but its siblings keep getting monitored.
                    match self.monitor_stack(scope, &name, repairs).await {
                        Ok(Some(repairs)) => {
                            still_pending.insert(name, repairs);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(stack = %name, error = %e, "giving up on stack delete");
                            failed_ref.borrow_mut().insert(name, e);
                        }
                    }
                }
                let finished = still_pending.is_empty();
                pending_ref.replace(still_pending);
                Ok(finished.then_some(()))
            })
            .await;

        let stuck = pending.into_inner();
        let failed = failed.into_inner();
        for name in watched {
            let step = format!("stacks/{name}");
            if let Some(e) = failed.get(&name) {
                runner.record(match e {
                    Error::Timeout(_) => StepResult::timed_out(step, e.to_string()),
                    _ => StepResult::failed(step, e.to_string()),
                });
            } else if stuck.contains_key(&name) {
                match &monitor {
                    Err(e @ Error::Timeout(_)) => {
                        runner.record(StepResult::timed_out(step, e.to_string()))
                    }
                    Err(e) => runner.record(StepResult::failed(step, e.to_string())),
                    // Unreachable by construction; the monitor only returns
                    // Ok once the pending set is empty.
                    Ok(()) => runner.record(StepResult::failed(step, "still pending")),
                }
            } else {
                runner.record(StepResult::succeeded(step));
            }
        }
    }

    /// One monitor tick for one stack. Returns `None` when the stack is
    /// gone, otherwise the updated repair count.
    async fn monitor_stack(
        &self,
        scope: &CallScope,
        name: &str,
        repairs: u32,
    ) -> Result<Option<u32>> {
        let stack_ref = ResourceRef::new(ResourceKind::Stack, name, &scope.region);
        let probe = self.provider.probe(scope, &stack_ref).await?;
        if !probe.present {
            info!(stack = %name, "stack delete complete");
            return Ok(None);
        }
        match probe.status {
            Some(StackStatus::DeleteFailed) => {
                if repairs >= self.settings.policies.transient.max_attempts {
                    return Err(Error::Unrecoverable(format!(
                        "stack {name} still DELETE_FAILED after {repairs} repairs"
                    )));
                }
                warn!(stack = %name, repairs, "stack delete failed, repairing stuck resources");
                self.repair_stuck_stack(scope, name).await?;
                self.provider.delete_stack(scope, name).await?;
                Ok(Some(repairs + 1))
            }
            _ => Ok(Some(repairs)),
        }
    }

    /// The managed deletion ordering is insufficient for runtime resources:
    /// their endpoint sub-resources must be deleted by hand, then the
    /// runtime itself, before the stack delete can be retried.
    async fn repair_stuck_stack(&self, scope: &CallScope, name: &str) -> Result<()> {
        let resources = self.provider.list_stack_resources(scope, name).await?;
        for resource in resources {
            let is_runtime = RUNTIME_RESOURCE_TYPES.contains(&resource.resource_type.as_str());
            if !is_runtime || resource.status != "DELETE_FAILED" {
                continue;
            }
            let Some(runtime_id) = resource.physical_id else {
                continue;
            };
            info!(stack = %name, runtime = %runtime_id, "deleting stuck runtime by hand");
            match self.delete_runtime(scope, &runtime_id).await {
                Ok(_) | Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Phase 9: nested stacks orphaned by a parent that went away without
    /// them. Issue deletes; the final sweep reports whatever survives.
    async fn phase_orphaned_stacks(&self, runner: &mut StepRunner, scope: &CallScope) {
        let stacks = match self.provider.list_stacks(scope, &self.prefix()).await {
            Ok(stacks) => stacks,
            Err(e) => {
                runner.record(StepResult::failed("orphaned-stacks", e.to_string()));
                return;
            }
        };
        let leftovers: Vec<String> = stacks
            .into_iter()
            .filter(|(_, status)| {
                !status.is_absent() && !matches!(status, StackStatus::DeleteInProgress)
            })
            .map(|(name, _)| name)
            .collect();
        if leftovers.is_empty() {
            runner.record(StepResult::skipped("orphaned-stacks", "none found"));
            return;
        }
        let members = leftovers
            .into_iter()
            .map(|name| {
                let target = name.clone();
                (name, async move {
                    match self.provider.delete_stack(scope, &target).await {
                        Ok(()) | Err(Error::NotFound(_)) => Ok(StepOutcome::Changed),
                        Err(e) => Err(e),
                    }
                })
            })
            .collect();
        runner.run_parallel("orphaned-stacks", members).await;
    }

    /// Phase 10: parameters under the `/{prefix}/` path.
    async fn phase_parameters(&self, runner: &mut StepRunner, scope: &CallScope) {
        let path = format!("/{}/", self.naming().prefix);
        let parameters = self.list(scope, ResourceKind::Parameter, &path).await;
        let members = parameters
            .into_iter()
            .map(|name| {
                let target = name.clone();
                (name, async move {
                    self.delete_one(scope, ResourceKind::Parameter, &target, false).await
                })
            })
            .collect();
        runner.run_parallel("parameters", members).await;
    }

    /// Phase 11: secrets, force-deleted with no recovery window.
    async fn phase_secrets(&self, runner: &mut StepRunner, scope: &CallScope) {
        let secrets = self.list(scope, ResourceKind::Secret, &self.prefix()).await;
        let members = secrets
            .into_iter()
            .map(|name| {
                let target = name.clone();
                (name, async move {
                    self.delete_one(scope, ResourceKind::Secret, &target, true).await
                })
            })
            .collect();
        runner.run_parallel("secrets", members).await;
    }

    /// Phase 12: log groups, both the Lambda-prefixed and plain forms.
    async fn phase_log_groups(&self, runner: &mut StepRunner, scope: &CallScope) {
        let mut groups = Vec::new();
        for prefix in [
            format!("/aws/lambda/{}-", self.naming().prefix),
            format!("/{}/", self.naming().prefix),
        ] {
            groups.extend(self.list(scope, ResourceKind::LogGroup, &prefix).await);
        }
        groups.sort();
        groups.dedup();
        let members = groups
            .into_iter()
            .map(|name| {
                let target = name.clone();
                (name, async move {
                    self.delete_one(scope, ResourceKind::LogGroup, &target, false).await
                })
            })
            .collect();
        runner.run_parallel("log-groups", members).await;
    }

    /// Phase 14: the deployment-info artifact apply left on disk.
    async fn phase_local_artifacts(&self, runner: &mut StepRunner) {
        let path = self.artifacts_dir.join("deployment-info.json");
        runner
            .run_step("local-artifacts", || async {
                match std::fs::remove_file(&path) {
                    Ok(()) => Ok(StepOutcome::Changed),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        Ok(StepOutcome::Unchanged("no artifact on disk".into()))
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await;
    }

    fn ensurer(&self) -> Ensurer {
        Ensurer::new(
            self.provider.clone(),
            self.settings.policies.transient,
            self.settings.policies.stack,
        )
    }
}
