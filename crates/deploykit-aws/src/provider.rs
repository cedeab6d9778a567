//! `CloudProvider` implementation over the `aws` CLI.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deploykit_core::provider::{
    CallScope, CloudProvider, Credentials, InstanceTarget, ObjectVersion, StackResource, StackSpec,
};
use deploykit_core::status::{InstanceStatus, Probe, StackInstance, StackStatus};
use deploykit_core::{Error, Result};
use deploykit_core::{ResourceKind, ResourceRef};
use serde_json::Value;
use tracing::info;

use crate::invoke::AwsInvoker;

/// The production provider: every operation is one or more `aws` commands.
pub struct AwsCli {
    invoker: AwsInvoker,
}

impl AwsCli {
    pub fn new() -> Self {
        Self { invoker: AwsInvoker::new() }
    }

    /// Not-found from a probe is absence, not an error.
    fn probe_absent_on_not_found(result: Result<Probe>) -> Result<Probe> {
        match result {
            Err(Error::NotFound(_)) => Ok(Probe::absent()),
            other => other,
        }
    }

    async fn probe_plain(&self, scope: &CallScope, context: &str, args: &[&str]) -> Result<Probe> {
        let result = self
            .invoker
            .run_json(scope, context, args)
            .await
            .map(|_| Probe::present_plain());
        Self::probe_absent_on_not_found(result)
    }

    async fn probe_stack(&self, scope: &CallScope, name: &str) -> Result<Probe> {
        let context = format!("describe stack {name}");
        let result = self
            .invoker
            .run_json(scope, &context, &["cloudformation", "describe-stacks", "--stack-name", name])
            .await
            .map(|v| {
                let status = v["Stacks"][0]["StackStatus"].as_str().map(StackStatus::parse);
                match status {
                    Some(s) if s.is_absent() => Probe::absent(),
                    Some(s) => Probe::present(s),
                    None => Probe::absent(),
                }
            });
        Self::probe_absent_on_not_found(result)
    }

    fn stack_args(verb: &str, name: &str, spec: &StackSpec) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "cloudformation".into(),
            verb.into(),
            "--stack-name".into(),
            name.into(),
            "--template-body".into(),
            format!("file://{}", spec.template),
        ];
        if !spec.parameters.is_empty() {
            args.push("--parameters".into());
            for (key, value) in &spec.parameters {
                args.push(format!("ParameterKey={key},ParameterValue={value}"));
            }
        }
        if !spec.capabilities.is_empty() {
            args.push("--capabilities".into());
            args.extend(spec.capabilities.iter().cloned());
        }
        args
    }

    fn string_array(value: &Value, outer: &str, field: &str) -> Vec<String> {
        value[outer]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        item.as_str()
                            .or_else(|| item[field].as_str())
                            .map(str::to_string)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for AwsCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CloudProvider for AwsCli {
    async fn probe(&self, scope: &CallScope, resource: &ResourceRef) -> Result<Probe> {
        let id = resource.identifier.as_str();
        match resource.kind {
            ResourceKind::Stack => self.probe_stack(scope, id).await,
            ResourceKind::Bucket => {
                let context = format!("head bucket {id}");
                let result = self
                    .invoker
                    .run_unit(scope, &context, &["s3api", "head-bucket", "--bucket", id])
                    .await
                    .map(|_| Probe::present_plain());
                Self::probe_absent_on_not_found(result)
            }
            ResourceKind::Role => {
                self.probe_plain(scope, &format!("get role {id}"), &["iam", "get-role", "--role-name", id])
                    .await
            }
            ResourceKind::Function => {
                self.probe_plain(
                    scope,
                    &format!("get function {id}"),
                    &["lambda", "get-function", "--function-name", id],
                )
                .await
            }
            ResourceKind::Repository => {
                self.probe_plain(
                    scope,
                    &format!("describe repository {id}"),
                    &["ecr", "describe-repositories", "--repository-names", id],
                )
                .await
            }
            ResourceKind::Parameter => {
                self.probe_plain(
                    scope,
                    &format!("get parameter {id}"),
                    &["ssm", "get-parameter", "--name", id],
                )
                .await
            }
            ResourceKind::Secret => {
                self.probe_plain(
                    scope,
                    &format!("describe secret {id}"),
                    &["secretsmanager", "describe-secret", "--secret-id", id],
                )
                .await
            }
            ResourceKind::Agent => {
                self.probe_plain(
                    scope,
                    &format!("get agent {id}"),
                    &["bedrock-agent", "get-agent", "--agent-id", id],
                )
                .await
            }
            ResourceKind::Runtime => {
                self.probe_plain(
                    scope,
                    &format!("get runtime {id}"),
                    &["bedrock-agentcore-control", "get-agent-runtime", "--agent-runtime-id", id],
                )
                .await
            }
            ResourceKind::Memory => {
                self.probe_plain(
                    scope,
                    &format!("get memory {id}"),
                    &["bedrock-agentcore-control", "get-memory", "--memory-id", id],
                )
                .await
            }
            ResourceKind::LogGroup => {
                let context = format!("describe log group {id}");
                let value = self
                    .invoker
                    .run_json(
                        scope,
                        &context,
                        &["logs", "describe-log-groups", "--log-group-name-prefix", id],
                    )
                    .await?;
                let exact = Self::string_array(&value, "logGroups", "logGroupName")
                    .iter()
                    .any(|name| name == id);
                Ok(if exact { Probe::present_plain() } else { Probe::absent() })
            }
            ResourceKind::BuildProject => {
                let context = format!("get build project {id}");
                let value = self
                    .invoker
                    .run_json(scope, &context, &["codebuild", "batch-get-projects", "--names", id])
                    .await?;
                let found = value["projects"].as_array().is_some_and(|p| !p.is_empty());
                Ok(if found { Probe::present_plain() } else { Probe::absent() })
            }
            ResourceKind::UserPool => {
                self.probe_plain(
                    scope,
                    &format!("describe user pool {id}"),
                    &["cognito-idp", "describe-user-pool", "--user-pool-id", id],
                )
                .await
            }
        }
    }

    async fn create_stack(&self, scope: &CallScope, name: &str, spec: &StackSpec) -> Result<()> {
        info!(stack = %name, "creating stack");
        let args = Self::stack_args("create-stack", name, spec);
        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        self.invoker
            .run_unit(scope, &format!("create stack {name}"), &argv)
            .await
    }

    async fn update_stack(&self, scope: &CallScope, name: &str, spec: &StackSpec) -> Result<()> {
        info!(stack = %name, "updating stack");
        let args = Self::stack_args("update-stack", name, spec);
        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        self.invoker
            .run_unit(scope, &format!("update stack {name}"), &argv)
            .await
    }

    async fn delete_stack(&self, scope: &CallScope, name: &str) -> Result<()> {
        info!(stack = %name, "deleting stack");
        self.invoker
            .run_unit(
                scope,
                &format!("delete stack {name}"),
                &["cloudformation", "delete-stack", "--stack-name", name],
            )
            .await
    }

    async fn continue_rollback(&self, scope: &CallScope, name: &str) -> Result<()> {
        self.invoker
            .run_unit(
                scope,
                &format!("continue rollback {name}"),
                &["cloudformation", "continue-update-rollback", "--stack-name", name],
            )
            .await
    }

    async fn list_stacks(
        &self,
        scope: &CallScope,
        prefix: &str,
    ) -> Result<Vec<(String, StackStatus)>> {
        let value = self
            .invoker
            .run_json(scope, "list stacks", &["cloudformation", "describe-stacks"])
            .await?;
        let mut stacks = Vec::new();
        if let Some(items) = value["Stacks"].as_array() {
            for item in items {
                let (Some(name), Some(status)) =
                    (item["StackName"].as_str(), item["StackStatus"].as_str())
                else {
                    continue;
                };
                if name.starts_with(prefix) {
                    stacks.push((name.to_string(), StackStatus::parse(status)));
                }
            }
        }
        Ok(stacks)
    }

    async fn list_stack_resources(
        &self,
        scope: &CallScope,
        name: &str,
    ) -> Result<Vec<StackResource>> {
        let context = format!("list resources of {name}");
        let value = self
            .invoker
            .run_json(
                scope,
                &context,
                &["cloudformation", "list-stack-resources", "--stack-name", name],
            )
            .await?;
        let mut resources = Vec::new();
        if let Some(items) = value["StackResourceSummaries"].as_array() {
            for item in items {
                resources.push(StackResource {
                    logical_id: item["LogicalResourceId"].as_str().unwrap_or_default().to_string(),
                    physical_id: item["PhysicalResourceId"].as_str().map(str::to_string),
                    resource_type: item["ResourceType"].as_str().unwrap_or_default().to_string(),
                    status: item["ResourceStatus"].as_str().unwrap_or_default().to_string(),
                });
            }
        }
        Ok(resources)
    }

    async fn stack_outputs(
        &self,
        scope: &CallScope,
        name: &str,
    ) -> Result<BTreeMap<String, String>> {
        let context = format!("outputs of {name}");
        let value = self
            .invoker
            .run_json(
                scope,
                &context,
                &["cloudformation", "describe-stacks", "--stack-name", name],
            )
            .await?;
        let mut outputs = BTreeMap::new();
        if let Some(items) = value["Stacks"][0]["Outputs"].as_array() {
            for item in items {
                if let (Some(key), Some(val)) =
                    (item["OutputKey"].as_str(), item["OutputValue"].as_str())
                {
                    outputs.insert(key.to_string(), val.to_string());
                }
            }
        }
        Ok(outputs)
    }

    async fn update_stack_instances(
        &self,
        scope: &CallScope,
        stack_set: &str,
        targets: &[InstanceTarget],
    ) -> Result<String> {
        let accounts: Vec<&str> = targets.iter().map(|t| t.account.as_str()).collect();
        let regions: Vec<&str> = targets.iter().map(|t| t.region.as_str()).collect();

        let mut args: Vec<&str> = vec![
            "cloudformation",
            "update-stack-instances",
            "--stack-set-name",
            stack_set,
            "--accounts",
        ];
        args.extend(&accounts);
        args.push("--regions");
        args.extend(&regions);

        let context = format!("update instances of {stack_set}");
        let value = self.invoker.run_json(scope, &context, &args).await?;
        value["OperationId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Parse(format!("{context}: missing OperationId")))
    }

    async fn list_stack_instances(
        &self,
        scope: &CallScope,
        stack_set: &str,
    ) -> Result<Vec<StackInstance>> {
        let context = format!("list instances of {stack_set}");
        let value = self
            .invoker
            .run_json(
                scope,
                &context,
                &["cloudformation", "list-stack-instances", "--stack-set-name", stack_set],
            )
            .await?;
        let mut instances = Vec::new();
        if let Some(items) = value["Summaries"].as_array() {
            for item in items {
                let (Some(account), Some(region), Some(status)) = (
                    item["Account"].as_str(),
                    item["Region"].as_str(),
                    item["Status"].as_str(),
                ) else {
                    continue;
                };
                let Some(status) = InstanceStatus::parse(status) else {
                    continue;
                };
                instances.push(StackInstance {
                    account: account.to_string(),
                    region: region.to_string(),
                    status,
                });
            }
        }
        Ok(instances)
    }

    async fn delete(&self, scope: &CallScope, resource: &ResourceRef, force: bool) -> Result<()> {
        let id = resource.identifier.as_str();
        info!(resource = %resource, force, "deleting resource");
        let context = format!("delete {resource}");
        match resource.kind {
            ResourceKind::Stack => self.delete_stack(scope, id).await,
            ResourceKind::Bucket => {
                self.invoker
                    .run_unit(scope, &context, &["s3api", "delete-bucket", "--bucket", id])
                    .await
            }
            ResourceKind::Role => {
                self.invoker
                    .run_unit(scope, &context, &["iam", "delete-role", "--role-name", id])
                    .await
            }
            ResourceKind::Function => {
                self.invoker
                    .run_unit(scope, &context, &["lambda", "delete-function", "--function-name", id])
                    .await
            }
            ResourceKind::Repository => {
                let mut args = vec!["ecr", "delete-repository", "--repository-name", id];
                if force {
                    args.push("--force");
                }
                self.invoker.run_unit(scope, &context, &args).await
            }
            ResourceKind::Parameter => {
                self.invoker
                    .run_unit(scope, &context, &["ssm", "delete-parameter", "--name", id])
                    .await
            }
            ResourceKind::Secret => {
                let mut args = vec!["secretsmanager", "delete-secret", "--secret-id", id];
                if force {
                    args.push("--force-delete-without-recovery");
                }
                self.invoker.run_unit(scope, &context, &args).await
            }
            ResourceKind::Agent => {
                let mut args = vec!["bedrock-agent", "delete-agent", "--agent-id", id];
                if force {
                    args.push("--skip-resource-in-use-check");
                }
                self.invoker.run_unit(scope, &context, &args).await
            }
            ResourceKind::Runtime => {
                self.invoker
                    .run_unit(
                        scope,
                        &context,
                        &[
                            "bedrock-agentcore-control",
                            "delete-agent-runtime",
                            "--agent-runtime-id",
                            id,
                        ],
                    )
                    .await
            }
            ResourceKind::Memory => {
                self.invoker
                    .run_unit(
                        scope,
                        &context,
                        &["bedrock-agentcore-control", "delete-memory", "--memory-id", id],
                    )
                    .await
            }
            ResourceKind::LogGroup => {
                self.invoker
                    .run_unit(scope, &context, &["logs", "delete-log-group", "--log-group-name", id])
                    .await
            }
            ResourceKind::BuildProject => {
                self.invoker
                    .run_unit(scope, &context, &["codebuild", "delete-project", "--name", id])
                    .await
            }
            ResourceKind::UserPool => {
                self.invoker
                    .run_unit(
                        scope,
                        &context,
                        &["cognito-idp", "delete-user-pool", "--user-pool-id", id],
                    )
                    .await
            }
        }
    }

    async fn list_by_prefix(
        &self,
        scope: &CallScope,
        kind: ResourceKind,
        prefix: &str,
    ) -> Result<Vec<String>> {
        let context = format!("list {kind} by prefix {prefix}");
        let names: Vec<String> = match kind {
            ResourceKind::Stack => {
                return Ok(self
                    .list_stacks(scope, prefix)
                    .await?
                    .into_iter()
                    .filter(|(_, status)| !status.is_absent())
                    .map(|(name, _)| name)
                    .collect());
            }
            ResourceKind::Bucket => {
                let value = self.invoker.run_json(scope, &context, &["s3api", "list-buckets"]).await?;
                Self::string_array(&value, "Buckets", "Name")
            }
            ResourceKind::Role => {
                let value = self.invoker.run_json(scope, &context, &["iam", "list-roles"]).await?;
                Self::string_array(&value, "Roles", "RoleName")
            }
            ResourceKind::Function => {
                let value = self
                    .invoker
                    .run_json(scope, &context, &["lambda", "list-functions"])
                    .await?;
                Self::string_array(&value, "Functions", "FunctionName")
            }
            ResourceKind::Repository => {
                let value = self
                    .invoker
                    .run_json(scope, &context, &["ecr", "describe-repositories"])
                    .await?;
                Self::string_array(&value, "repositories", "repositoryName")
            }
            ResourceKind::Parameter => {
                let path = format!("/{}", prefix.trim_start_matches('/'));
                let value = self
                    .invoker
                    .run_json(
                        scope,
                        &context,
                        &["ssm", "get-parameters-by-path", "--path", &path, "--recursive"],
                    )
                    .await?;
                return Ok(Self::string_array(&value, "Parameters", "Name"));
            }
            ResourceKind::Secret => {
                let value = self
                    .invoker
                    .run_json(scope, &context, &["secretsmanager", "list-secrets"])
                    .await?;
                Self::string_array(&value, "SecretList", "Name")
            }
            ResourceKind::Agent => {
                let value = self
                    .invoker
                    .run_json(scope, &context, &["bedrock-agent", "list-agents"])
                    .await?;
                value["agentSummaries"]
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .filter(|item| {
                                item["agentName"].as_str().is_some_and(|n| n.starts_with(prefix))
                            })
                            .filter_map(|item| item["agentId"].as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default()
            }
            ResourceKind::Runtime => {
                let value = self
                    .invoker
                    .run_json(
                        scope,
                        &context,
                        &["bedrock-agentcore-control", "list-agent-runtimes"],
                    )
                    .await?;
                value["agentRuntimes"]
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .filter(|item| {
                                item["agentRuntimeName"]
                                    .as_str()
                                    .is_some_and(|n| n.starts_with(prefix))
                            })
                            .filter_map(|item| {
                                item["agentRuntimeId"].as_str().map(str::to_string)
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            }
            ResourceKind::Memory => {
                let value = self
                    .invoker
                    .run_json(scope, &context, &["bedrock-agentcore-control", "list-memories"])
                    .await?;
                value["memories"]
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .filter(|item| {
                                item["id"].as_str().is_some_and(|n| n.starts_with(prefix))
                            })
                            .filter_map(|item| item["id"].as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default()
            }
            ResourceKind::LogGroup => {
                let value = self
                    .invoker
                    .run_json(
                        scope,
                        &context,
                        &["logs", "describe-log-groups", "--log-group-name-prefix", prefix],
                    )
                    .await?;
                return Ok(Self::string_array(&value, "logGroups", "logGroupName"));
            }
            ResourceKind::BuildProject => {
                let value = self
                    .invoker
                    .run_json(scope, &context, &["codebuild", "list-projects"])
                    .await?;
                Self::string_array(&value, "projects", "")
            }
            ResourceKind::UserPool => {
                let value = self
                    .invoker
                    .run_json(
                        scope,
                        &context,
                        &["cognito-idp", "list-user-pools", "--max-results", "60"],
                    )
                    .await?;
                value["UserPools"]
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .filter(|item| {
                                item["Name"].as_str().is_some_and(|n| n.starts_with(prefix))
                            })
                            .filter_map(|item| item["Id"].as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default()
            }
        };
        Ok(names.into_iter().filter(|n| n.starts_with(prefix)).collect())
    }

    async fn list_role_inline_policies(
        &self,
        scope: &CallScope,
        role: &str,
    ) -> Result<Vec<String>> {
        let context = format!("list inline policies of {role}");
        let value = self
            .invoker
            .run_json(scope, &context, &["iam", "list-role-policies", "--role-name", role])
            .await?;
        Ok(Self::string_array(&value, "PolicyNames", ""))
    }

    async fn delete_role_inline_policy(
        &self,
        scope: &CallScope,
        role: &str,
        policy: &str,
    ) -> Result<()> {
        self.invoker
            .run_unit(
                scope,
                &format!("delete inline policy {policy} of {role}"),
                &["iam", "delete-role-policy", "--role-name", role, "--policy-name", policy],
            )
            .await
    }

    async fn list_attached_role_policies(
        &self,
        scope: &CallScope,
        role: &str,
    ) -> Result<Vec<String>> {
        let context = format!("list attached policies of {role}");
        let value = self
            .invoker
            .run_json(
                scope,
                &context,
                &["iam", "list-attached-role-policies", "--role-name", role],
            )
            .await?;
        Ok(Self::string_array(&value, "AttachedPolicies", "PolicyArn"))
    }

    async fn detach_role_policy(
        &self,
        scope: &CallScope,
        role: &str,
        policy_arn: &str,
    ) -> Result<()> {
        self.invoker
            .run_unit(
                scope,
                &format!("detach policy {policy_arn} from {role}"),
                &["iam", "detach-role-policy", "--role-name", role, "--policy-arn", policy_arn],
            )
            .await
    }

    async fn list_instance_profiles_for_role(
        &self,
        scope: &CallScope,
        role: &str,
    ) -> Result<Vec<String>> {
        let context = format!("list instance profiles of {role}");
        let value = self
            .invoker
            .run_json(
                scope,
                &context,
                &["iam", "list-instance-profiles-for-role", "--role-name", role],
            )
            .await?;
        Ok(Self::string_array(&value, "InstanceProfiles", "InstanceProfileName"))
    }

    async fn remove_role_from_instance_profile(
        &self,
        scope: &CallScope,
        profile: &str,
        role: &str,
    ) -> Result<()> {
        self.invoker
            .run_unit(
                scope,
                &format!("remove {role} from instance profile {profile}"),
                &[
                    "iam",
                    "remove-role-from-instance-profile",
                    "--instance-profile-name",
                    profile,
                    "--role-name",
                    role,
                ],
            )
            .await
    }

    async fn list_object_versions(
        &self,
        scope: &CallScope,
        bucket: &str,
    ) -> Result<Vec<ObjectVersion>> {
        let context = format!("list object versions in {bucket}");
        let value = self
            .invoker
            .run_json(scope, &context, &["s3api", "list-object-versions", "--bucket", bucket])
            .await?;
        let mut versions = Vec::new();
        for outer in ["Versions", "DeleteMarkers"] {
            if let Some(items) = value[outer].as_array() {
                for item in items {
                    if let (Some(key), Some(version_id)) =
                        (item["Key"].as_str(), item["VersionId"].as_str())
                    {
                        versions.push(ObjectVersion {
                            key: key.to_string(),
                            version_id: version_id.to_string(),
                        });
                    }
                }
            }
        }
        Ok(versions)
    }

    async fn delete_object_versions(
        &self,
        scope: &CallScope,
        bucket: &str,
        versions: &[ObjectVersion],
    ) -> Result<()> {
        if versions.is_empty() {
            return Ok(());
        }
        let objects: Vec<Value> = versions
            .iter()
            .map(|v| serde_json::json!({ "Key": v.key, "VersionId": v.version_id }))
            .collect();
        let delete = serde_json::json!({ "Objects": objects, "Quiet": true }).to_string();
        self.invoker
            .run_unit(
                scope,
                &format!("delete {} object versions from {bucket}", versions.len()),
                &["s3api", "delete-objects", "--bucket", bucket, "--delete", &delete],
            )
            .await
    }

    async fn list_agent_aliases(&self, scope: &CallScope, agent_id: &str) -> Result<Vec<String>> {
        let context = format!("list aliases of agent {agent_id}");
        let value = self
            .invoker
            .run_json(
                scope,
                &context,
                &["bedrock-agent", "list-agent-aliases", "--agent-id", agent_id],
            )
            .await?;
        Ok(Self::string_array(&value, "agentAliasSummaries", "agentAliasId"))
    }

    async fn delete_agent_alias(
        &self,
        scope: &CallScope,
        agent_id: &str,
        alias_id: &str,
    ) -> Result<()> {
        self.invoker
            .run_unit(
                scope,
                &format!("delete alias {alias_id} of agent {agent_id}"),
                &[
                    "bedrock-agent",
                    "delete-agent-alias",
                    "--agent-id",
                    agent_id,
                    "--agent-alias-id",
                    alias_id,
                ],
            )
            .await
    }

    async fn list_runtime_endpoints(
        &self,
        scope: &CallScope,
        runtime_id: &str,
    ) -> Result<Vec<String>> {
        let context = format!("list endpoints of runtime {runtime_id}");
        let value = self
            .invoker
            .run_json(
                scope,
                &context,
                &[
                    "bedrock-agentcore-control",
                    "list-agent-runtime-endpoints",
                    "--agent-runtime-id",
                    runtime_id,
                ],
            )
            .await?;
        Ok(Self::string_array(&value, "runtimeEndpoints", "name"))
    }

    async fn delete_runtime_endpoint(
        &self,
        scope: &CallScope,
        runtime_id: &str,
        endpoint: &str,
    ) -> Result<()> {
        self.invoker
            .run_unit(
                scope,
                &format!("delete endpoint {endpoint} of runtime {runtime_id}"),
                &[
                    "bedrock-agentcore-control",
                    "delete-agent-runtime-endpoint",
                    "--agent-runtime-id",
                    runtime_id,
                    "--endpoint-name",
                    endpoint,
                ],
            )
            .await
    }

    async fn put_parameter(
        &self,
        scope: &CallScope,
        name: &str,
        value: &str,
        secure: bool,
    ) -> Result<()> {
        let kind = if secure { "SecureString" } else { "String" };
        self.invoker
            .run_unit(
                scope,
                &format!("put parameter {name}"),
                &[
                    "ssm",
                    "put-parameter",
                    "--name",
                    name,
                    "--value",
                    value,
                    "--type",
                    kind,
                    "--overwrite",
                ],
            )
            .await
    }

    async fn list_ou_accounts(&self, scope: &CallScope, ou_id: &str) -> Result<Vec<String>> {
        let context = format!("list accounts in {ou_id}");
        let value = self
            .invoker
            .run_json(
                scope,
                &context,
                &["organizations", "list-accounts-for-parent", "--parent-id", ou_id],
            )
            .await?;
        let mut accounts = Vec::new();
        if let Some(items) = value["Accounts"].as_array() {
            for item in items {
                if item["Status"].as_str() != Some("ACTIVE") {
                    continue;
                }
                if let Some(id) = item["Id"].as_str() {
                    accounts.push(id.to_string());
                }
            }
        }
        Ok(accounts)
    }

    async fn assume_role(
        &self,
        scope: &CallScope,
        account: &str,
        role_name: &str,
        session_name: &str,
    ) -> Result<Credentials> {
        let role_arn = format!("arn:aws:iam::{account}:role/{role_name}");
        let context = format!("assume role in {account}");
        let value = self
            .invoker
            .run_json(
                scope,
                &context,
                &[
                    "sts",
                    "assume-role",
                    "--role-arn",
                    &role_arn,
                    "--role-session-name",
                    session_name,
                ],
            )
            .await?;
        let credentials = &value["Credentials"];
        let field = |name: &str| -> Result<String> {
            credentials[name]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| Error::Parse(format!("{context}: missing {name}")))
        };
        let expiration = credentials["Expiration"]
            .as_str()
            .and_then(|s| s.parse::<DateTime<Utc>>().ok());
        Ok(Credentials {
            access_key_id: field("AccessKeyId")?,
            secret_access_key: field("SecretAccessKey")?,
            session_token: field("SessionToken")?,
            expiration,
        })
    }
}
