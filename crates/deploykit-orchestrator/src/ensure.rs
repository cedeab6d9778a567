//! Idempotent resource operations.
//!
//! `ensure_stack` converges a stack on desired state: create if absent,
//! update if present, repair first if the last operation left it wedged.
//! `delete_role` enforces the one ordering IAM accepts: inline policies,
//! then managed detachments, then instance profiles, then the role.

use std::sync::Arc;

use deploykit_core::provider::{CallScope, CloudProvider, StackSpec};
use deploykit_core::status::StackStatus;
use deploykit_core::{Error, PollPolicy, ResourceKind, ResourceRef, Result, RetryPolicy};
use tracing::{info, warn};

/// What `ensure` actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    Updated,
    /// Present and already matching desired state.
    Unchanged,
    /// Wedged state was repaired before converging.
    Repaired,
}

pub struct Ensurer {
    provider: Arc<dyn CloudProvider>,
    transient: RetryPolicy,
    stack_poll: PollPolicy,
}

impl Ensurer {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        transient: RetryPolicy,
        stack_poll: PollPolicy,
    ) -> Self {
        Self { provider, transient, stack_poll }
    }

    /// Converge a stack on `spec`. Absent stacks are created, current ones
    /// updated ("no updates" reads as unchanged), wedged ones repaired
    /// first. Returns once the stack reaches a terminal current state.
    pub async fn ensure_stack(
        &self,
        scope: &CallScope,
        name: &str,
        spec: &StackSpec,
    ) -> Result<EnsureOutcome> {
        let stack_ref = ResourceRef::new(ResourceKind::Stack, name, &scope.region);
        let probe = self.provider.probe(scope, &stack_ref).await?;

        if !probe.present {
            self.provider.create_stack(scope, name, spec).await?;
            self.wait_until_current(scope, name).await?;
            return Ok(EnsureOutcome::Created);
        }

        let status = probe
            .status
            .ok_or_else(|| Error::Provider(format!("stack {name} present without status")))?;

        if status.needs_repair() {
            warn!(stack = %name, status = %status, "stack wedged, repairing before converge");
            if self.repair_stack(scope, name, &status).await? {
                // Rolled back to a healthy state; converge in place rather
                // than destroying the stack's live resources.
                match self.provider.update_stack(scope, name, spec).await {
                    Ok(()) => self.wait_until_current(scope, name).await?,
                    Err(Error::AlreadyExists(_)) => {}
                    Err(e) => return Err(e),
                }
            } else {
                self.provider.create_stack(scope, name, spec).await?;
                self.wait_until_current(scope, name).await?;
            }
            return Ok(EnsureOutcome::Repaired);
        }

        if !status.is_terminal() {
            // A previous operation is still running; wait for it to settle
            // before deciding between update and skip.
            self.wait_until_current(scope, name).await?;
        }

        match self.provider.update_stack(scope, name, spec).await {
            Ok(()) => {
                self.wait_until_current(scope, name).await?;
                Ok(EnsureOutcome::Updated)
            }
            Err(Error::AlreadyExists(_)) => Ok(EnsureOutcome::Unchanged),
            Err(e) => Err(e),
        }
    }

    /// Repair a wedged stack. Returns `true` when the stack was nursed back
    /// to a healthy state and can be updated in place, `false` when it had
    /// to be deleted and needs a fresh create.
    async fn repair_stack(&self, scope: &CallScope, name: &str, status: &StackStatus) -> Result<bool> {
        if matches!(status, StackStatus::UpdateRollbackFailed) {
            self.provider.continue_rollback(scope, name).await?;
            self.wait_for_stack(scope, name, |s| {
                s.map(|st| st == StackStatus::UpdateRollbackComplete).unwrap_or(false)
            })
            .await?;
            return Ok(true);
        }
        match self.provider.delete_stack(scope, name).await {
            Ok(()) | Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.wait_for_stack(scope, name, |s| s.is_none()).await?;
        Ok(false)
    }

    /// Poll until the stack reaches a healthy terminal state. Failure
    /// states surface as `Stuck` so callers can decide on repair.
    async fn wait_until_current(&self, scope: &CallScope, name: &str) -> Result<()> {
        let stack_ref = ResourceRef::new(ResourceKind::Stack, name, &scope.region);
        let provider = &self.provider;
        self.stack_poll
            .wait_for(&format!("stack {name}"), || {
                let stack_ref = stack_ref.clone();
                async move {
                    let probe = provider.probe(scope, &stack_ref).await?;
                    match probe.status {
                        Some(status) if status.is_current() => Ok(Some(())),
                        Some(status) if status.is_terminal() => Err(Error::Stuck {
                            resource: format!("stack/{name}"),
                            status: status.to_string(),
                        }),
                        _ if !probe.present => Err(Error::Stuck {
                            resource: format!("stack/{name}"),
                            status: "DELETE_COMPLETE".to_string(),
                        }),
                        _ => Ok(None),
                    }
                }
            })
            .await
    }

    /// Poll until `done(status)` holds; `None` means the stack is gone.
    async fn wait_for_stack<F>(&self, scope: &CallScope, name: &str, done: F) -> Result<()>
    where
        F: Fn(Option<StackStatus>) -> bool,
    {
        let stack_ref = ResourceRef::new(ResourceKind::Stack, name, &scope.region);
        let done = &done;
        let provider = &self.provider;
        self.stack_poll
            .wait_for(&format!("stack {name}"), || {
                let stack_ref = stack_ref.clone();
                async move {
                    let probe = provider.probe(scope, &stack_ref).await?;
                    let status = if probe.present { probe.status } else { None };
                    Ok(done(status).then_some(()))
                }
            })
            .await
    }

    /// Seed or refresh a parameter. Put is idempotent with overwrite.
    pub async fn ensure_parameter(
        &self,
        scope: &CallScope,
        name: &str,
        value: &str,
        secure: bool,
    ) -> Result<EnsureOutcome> {
        self.transient
            .run(&format!("put parameter {name}"), || async {
                self.provider.put_parameter(scope, name, value, secure).await
            })
            .await?;
        Ok(EnsureOutcome::Updated)
    }

    /// Delete a role in the only order IAM accepts. The final delete runs
    /// under the bounded transient retry because role deletion lags policy
    /// detachment.
    pub async fn delete_role(&self, scope: &CallScope, role: &str) -> Result<()> {
        for policy in self.provider.list_role_inline_policies(scope, role).await? {
            self.provider.delete_role_inline_policy(scope, role, &policy).await?;
        }
        for policy_arn in self.provider.list_attached_role_policies(scope, role).await? {
            self.provider.detach_role_policy(scope, role, &policy_arn).await?;
        }
        for profile in self.provider.list_instance_profiles_for_role(scope, role).await? {
            self.provider
                .remove_role_from_instance_profile(scope, &profile, role)
                .await?;
        }

        let role_ref = ResourceRef::new(ResourceKind::Role, role, &scope.region);
        let result = self
            .transient
            .run(&format!("delete role {role}"), || {
                let role_ref = role_ref.clone();
                async move { self.provider.delete(scope, &role_ref, false).await }
            })
            .await;
        match result {
            Ok(()) | Err(Error::NotFound(_)) => {
                info!(role, "role deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
