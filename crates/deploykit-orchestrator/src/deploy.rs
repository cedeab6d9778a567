//! The apply pipeline.
//!
//! Four dependency-ordered layers, each gated on the previous layer's
//! terminal completion: prerequisites (buckets, repositories, build
//! projects), core (identity, API lambdas), ai-services (agent, runtime,
//! memory), ui. Between core and ai-services the Coveo configuration is
//! seeded into Parameter Store, fanned out across accounts in
//! multi-account mode. A verification pass and a deployment-info artifact
//! close the run.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use deploykit_config::DeploySettings;
use deploykit_core::provider::{CallScope, CloudProvider, InstanceTarget, StackSpec};
use deploykit_core::status::InstanceStatus;
use deploykit_core::{Error, ResourceKind, ResourceRef, Result, RunSummary};
use serde::Serialize;
use tracing::{info, warn};

use crate::ensure::{EnsureOutcome, Ensurer};
use crate::fanout::FanOut;
use crate::orphan::OrphanReconciler;
use crate::step_runner::{Mode, StepOutcome, StepRunner};

/// Deployment layers in dependency order. Later layers consume earlier
/// layers' exported outputs.
const LAYERS: &[&str] = &["prerequisites", "core", "ai-services", "ui"];

/// What a finished apply hands back to the CLI.
#[derive(Debug)]
pub struct DeployOutcome {
    pub summary: RunSummary,
    /// Parameter names seeded during the run.
    pub seeded_parameters: Vec<String>,
}

#[derive(Serialize)]
struct DeploymentInfo<'a> {
    summary: &'a RunSummary,
    seeded_parameters: &'a [String],
}

pub struct Deployer {
    provider: Arc<dyn CloudProvider>,
    settings: DeploySettings,
    templates_dir: PathBuf,
    artifacts_dir: PathBuf,
}

impl Deployer {
    pub fn new(provider: Arc<dyn CloudProvider>, settings: DeploySettings) -> Self {
        Self {
            provider,
            settings,
            templates_dir: PathBuf::from("templates"),
            artifacts_dir: PathBuf::from("."),
        }
    }

    pub fn with_templates_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.templates_dir = dir.into();
        self
    }

    pub fn with_artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = dir.into();
        self
    }

    /// Run the full apply pipeline. A failed step halts everything after it.
    pub async fn run(&self, scope: &CallScope) -> Result<DeployOutcome> {
        let mut runner = StepRunner::new(
            Mode::Apply,
            &self.settings.region,
            &self.settings.naming.prefix,
        );

        // Outputs exported by completed layers, consumed by later ones.
        let exports_cell: RefCell<BTreeMap<String, String>> = RefCell::new(BTreeMap::new());
        let seeded_cell: RefCell<Vec<String>> = RefCell::new(Vec::new());
        let exports = &exports_cell;
        let seeded = &seeded_cell;

        for layer in LAYERS {
            let step = format!("layer/{layer}");
            runner
                .run_step(&step, || async move {
                    let inputs = exports.borrow().clone();
                    let outcome = self.converge_layer(scope, layer, &inputs).await?;
                    let outputs = self
                        .provider
                        .stack_outputs(scope, &self.settings.naming.name(layer))
                        .await?;
                    exports.borrow_mut().extend(outputs);
                    Ok(outcome)
                })
                .await;

            if *layer == "core" {
                runner
                    .run_step("seed-parameters", || async move {
                        let inputs = exports.borrow().clone();
                        let names = self.seed_parameters(scope, &inputs).await?;
                        seeded.borrow_mut().extend(names);
                        Ok(StepOutcome::Changed)
                    })
                    .await;
            }
        }

        runner
            .run_step("seed-agent-parameters", || async move {
                let inputs = exports.borrow().clone();
                let names = self.seed_agent_parameters(scope, &inputs).await?;
                seeded.borrow_mut().extend(names);
                Ok(StepOutcome::Changed)
            })
            .await;

        runner
            .run_step("verify", || async move { self.verify(scope).await })
            .await;

        let seeded = seeded_cell.into_inner();
        let summary = runner.into_summary();
        if let Err(e) = self.write_deployment_info(&summary, &seeded) {
            warn!(error = %e, "could not write deployment-info artifact");
        }
        Ok(DeployOutcome { summary, seeded_parameters: seeded })
    }

    /// Converge one layer: the stack in the ambient account, plus stack-set
    /// instances across the fleet in multi-account mode.
    async fn converge_layer(
        &self,
        scope: &CallScope,
        layer: &str,
        exports: &BTreeMap<String, String>,
    ) -> Result<StepOutcome> {
        let name = self.settings.naming.name(layer);
        let spec = StackSpec {
            template: self
                .templates_dir
                .join(format!("{layer}.yaml"))
                .to_string_lossy()
                .to_string(),
            parameters: exports.clone(),
            capabilities: vec!["CAPABILITY_NAMED_IAM".to_string()],
        };

        // Orphans are only reconciled on the first-time creation path; a
        // stack that already owns its resources goes through plain update.
        let stack_ref = ResourceRef::new(ResourceKind::Stack, &name, &scope.region);
        if !self.provider.probe(scope, &stack_ref).await?.present {
            let candidates = self.orphan_candidates(layer, scope);
            let cleared = OrphanReconciler::new(self.provider.clone())
                .reconcile(scope, &candidates)
                .await?;
            if !cleared.is_empty() {
                info!(layer, ?cleared, "cleared orphans before managed create");
            }
        }

        let outcome = self.ensurer().ensure_stack(scope, &name, &spec).await?;

        if let Some(multi) = &self.settings.multi_account {
            let accounts = self.provider.list_ou_accounts(scope, &multi.ou_id).await?;
            let targets: Vec<InstanceTarget> = accounts
                .iter()
                .filter(|account| **account != multi.master_account_id)
                .map(|account| InstanceTarget {
                    account: account.clone(),
                    region: scope.region.clone(),
                })
                .collect();
            if !targets.is_empty() {
                self.converge_instances(scope, &name, &targets).await?;
            }
        }

        Ok(match outcome {
            EnsureOutcome::Unchanged => StepOutcome::Unchanged("already current".into()),
            _ => StepOutcome::Changed,
        })
    }

    /// Push the layer's stack set to every target and poll until all
    /// instances report CURRENT. Instances that land OUTDATED get a scoped
    /// re-issue; INOPERABLE ones fail the layer.
    async fn converge_instances(
        &self,
        scope: &CallScope,
        stack_set: &str,
        targets: &[InstanceTarget],
    ) -> Result<()> {
        self.provider.update_stack_instances(scope, stack_set, targets).await?;

        let wanted: BTreeSet<(String, String)> = targets
            .iter()
            .map(|t| (t.account.clone(), t.region.clone()))
            .collect();
        let reissued: RefCell<BTreeSet<(String, String)>> = RefCell::new(BTreeSet::new());
        let wanted = &wanted;
        let reissued = &reissued;

        self.settings
            .policies
            .instances
            .wait_for(&format!("instances of {stack_set}"), || async move {
                let instances = self.provider.list_stack_instances(scope, stack_set).await?;
                let mut outdated: Vec<InstanceTarget> = Vec::new();
                let mut current = 0usize;
                for instance in &instances {
                    let key = (instance.account.clone(), instance.region.clone());
                    if !wanted.contains(&key) {
                        continue;
                    }
                    match instance.status {
                        InstanceStatus::Current => current += 1,
                        InstanceStatus::Outdated => {
                            if !reissued.borrow().contains(&key) {
                                outdated.push(InstanceTarget {
                                    account: instance.account.clone(),
                                    region: instance.region.clone(),
                                });
                            }
                        }
                        InstanceStatus::Inoperable => {
                            return Err(Error::Stuck {
                                resource: format!(
                                    "stack-instance {}/{}",
                                    instance.account, instance.region
                                ),
                                status: "INOPERABLE".to_string(),
                            });
                        }
                    }
                }
                // Re-issue the update scoped to just the outdated triples.
                for target in &outdated {
                    warn!(
                        stack_set,
                        account = %target.account,
                        region = %target.region,
                        "instance outdated, re-issuing scoped update"
                    );
                    self.provider
                        .update_stack_instances(scope, stack_set, std::slice::from_ref(target))
                        .await?;
                    reissued
                        .borrow_mut()
                        .insert((target.account.clone(), target.region.clone()));
                }
                Ok((current == wanted.len()).then_some(()))
            })
            .await
    }

    /// Coveo configuration plus the core layer's identity exports.
    async fn seed_parameters(
        &self,
        scope: &CallScope,
        exports: &BTreeMap<String, String>,
    ) -> Result<Vec<String>> {
        let mut entries: Vec<(String, String, bool)> = vec![
            (
                self.settings.naming.parameter_path("coveo/org-id"),
                self.settings.coveo_org_id.clone(),
                false,
            ),
            (
                self.settings.naming.parameter_path("coveo/search-api-key"),
                self.settings.coveo_search_api_key.clone(),
                true,
            ),
            (
                self.settings.naming.parameter_path("coveo/answering-config-id"),
                self.settings.coveo_answer_config_id.clone(),
                false,
            ),
        ];
        for (output, path) in [
            ("UserPoolId", "coveo/user-pool-id"),
            ("UserPoolClientId", "coveo/client-id"),
            ("CognitoDomain", "cognito/domain"),
            ("ApiBaseUrl", "coveo/api-base-url"),
        ] {
            match exports.get(output) {
                Some(value) => entries.push((
                    self.settings.naming.parameter_path(path),
                    value.clone(),
                    false,
                )),
                None => warn!(output, "core layer did not export a value, parameter not seeded"),
            }
        }
        self.seed(scope, &entries).await
    }

    /// Agent and runtime identifiers exported by the ai-services layer.
    async fn seed_agent_parameters(
        &self,
        scope: &CallScope,
        exports: &BTreeMap<String, String>,
    ) -> Result<Vec<String>> {
        let mut entries = Vec::new();
        for (output, path) in [
            ("AgentId", "coveo/agent-id"),
            ("AgentAliasId", "coveo/agent-alias-id"),
            ("GatewayUrl", "agentcore/gateway-url"),
            ("McpServerUrl", "mcp/server-url"),
        ] {
            match exports.get(output) {
                Some(value) => {
                    entries.push((self.settings.naming.parameter_path(path), value.clone(), false))
                }
                None => warn!(output, "ai-services layer did not export a value, parameter not seeded"),
            }
        }
        self.seed(scope, &entries).await
    }

    /// Seed a set of parameters, fanning out across the fleet when in
    /// multi-account mode.
    async fn seed(
        &self,
        scope: &CallScope,
        entries: &[(String, String, bool)],
    ) -> Result<Vec<String>> {
        let ensurer = self.ensurer();
        for (name, value, secure) in entries {
            ensurer.ensure_parameter(scope, name, value, *secure).await?;
        }

        if let Some(multi) = &self.settings.multi_account {
            let accounts: Vec<String> = self
                .provider
                .list_ou_accounts(scope, &multi.ou_id)
                .await?
                .into_iter()
                .filter(|account| *account != multi.master_account_id)
                .collect();
            let fanout = FanOut::new(
                self.provider.clone(),
                &multi.admin_role,
                self.settings.policies.fanout_concurrency,
                self.settings.policies.fanout_failure_tolerance,
            );
            let report = fanout
                .for_each(scope, &accounts, |_account, member_scope| async move {
                    let ensurer = self.ensurer();
                    for (name, value, secure) in entries {
                        ensurer
                            .ensure_parameter(&member_scope, name, value, *secure)
                            .await?;
                    }
                    Ok(())
                })
                .await;
            if !report.is_success() {
                return Err(Error::Unrecoverable(format!(
                    "parameter seeding failed in accounts: {}",
                    report.failed_accounts().join(", ")
                )));
            }
        }

        Ok(entries.iter().map(|(name, _, _)| name.clone()).collect())
    }

    /// Re-probe every layer stack; the run only counts once each reports a
    /// current terminal status (and, multi-account, every instance CURRENT).
    async fn verify(&self, scope: &CallScope) -> Result<StepOutcome> {
        for layer in LAYERS {
            let name = self.settings.naming.name(layer);
            let stack_ref = ResourceRef::new(ResourceKind::Stack, &name, &scope.region);
            let probe = self.provider.probe(scope, &stack_ref).await?;
            let current = probe.status.as_ref().is_some_and(|s| s.is_current());
            if !probe.present || !current {
                return Err(Error::Unrecoverable(format!(
                    "stack {name} is not current after apply (status {:?})",
                    probe.status
                )));
            }
            if self.settings.multi_account.is_some() {
                let instances = self.provider.list_stack_instances(scope, &name).await?;
                if let Some(bad) = instances.iter().find(|i| i.status != InstanceStatus::Current) {
                    return Err(Error::Unrecoverable(format!(
                        "instance {}/{} of {name} is {} after apply",
                        bad.account, bad.region, bad.status
                    )));
                }
            }
        }
        Ok(StepOutcome::Changed)
    }

    /// Unmanaged resources that would collide with each layer's first
    /// managed create.
    fn orphan_candidates(&self, layer: &str, scope: &CallScope) -> Vec<ResourceRef> {
        let naming = &self.settings.naming;
        let named = |kind, suffix: &str| {
            ResourceRef::new(kind, naming.name(suffix), &scope.region)
        };
        match layer {
            "prerequisites" => vec![
                named(ResourceKind::Repository, "agent"),
                named(ResourceKind::BuildProject, "agent-image"),
                named(ResourceKind::Role, "codebuild-role"),
            ],
            "core" => vec![
                named(ResourceKind::Role, "lambda-role"),
                named(ResourceKind::Function, "search-proxy"),
                named(ResourceKind::Function, "answering-proxy"),
                named(ResourceKind::Function, "passages-proxy"),
                named(ResourceKind::Function, "query-suggest-proxy"),
                named(ResourceKind::Function, "agent-chat"),
            ],
            "ai-services" => vec![
                named(ResourceKind::Role, "agent-role"),
                named(ResourceKind::Role, "runtime-role"),
                named(ResourceKind::Function, "agentcore-runtime"),
                named(ResourceKind::Function, "passage-tool"),
            ],
            "ui" => vec![named(ResourceKind::Function, "html-proxy")],
            _ => Vec::new(),
        }
    }

    fn write_deployment_info(&self, summary: &RunSummary, seeded: &[String]) -> Result<()> {
        let info = DeploymentInfo { summary, seeded_parameters: seeded };
        let path = self.artifacts_dir.join("deployment-info.json");
        let json = serde_json::to_string_pretty(&info)
            .map_err(|e| Error::Parse(e.to_string()))?;
        std::fs::write(&path, json)?;
        info!(path = %path.display(), "wrote deployment-info artifact");
        Ok(())
    }

    fn ensurer(&self) -> Ensurer {
        Ensurer::new(
            self.provider.clone(),
            self.settings.policies.transient,
            self.settings.policies.stack,
        )
    }
}
