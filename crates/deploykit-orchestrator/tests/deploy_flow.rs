mod common;

use std::sync::Arc;

use common::{AMBIENT, FakeCloud, test_settings};
use deploykit_config::MultiAccount;
use deploykit_core::StepStatus;
use deploykit_core::provider::{CallScope, CloudProvider};
use deploykit_core::status::StackStatus;
use deploykit_orchestrator::Deployer;

const LAYERS: &[&str] = &["prerequisites", "core", "ai-services", "ui"];

fn preset_layer_outputs(fake: &FakeCloud) {
    fake.preset_outputs(
        "workshop-core",
        &[
            ("UserPoolId", "pool-123"),
            ("UserPoolClientId", "client-456"),
            ("CognitoDomain", "workshop.auth.example.com"),
            ("ApiBaseUrl", "https://api.example.com"),
        ],
    );
    fake.preset_outputs(
        "workshop-ai-services",
        &[
            ("AgentId", "agent-1"),
            ("AgentAliasId", "alias-1"),
            ("GatewayUrl", "https://gateway.example.com"),
            ("McpServerUrl", "https://mcp.example.com"),
        ],
    );
}

#[tokio::test]
async fn fresh_deploy_creates_all_layers_and_seeds_parameters() {
    let fake = Arc::new(FakeCloud::new());
    preset_layer_outputs(&fake);
    let provider: Arc<dyn CloudProvider> = fake.clone();
    let dir = tempfile::tempdir().unwrap();
    let deployer = Deployer::new(provider, test_settings(None)).with_artifacts_dir(dir.path());
    let scope = CallScope::ambient("us-east-1");

    let outcome = deployer.run(&scope).await.unwrap();

    assert!(outcome.summary.success());
    for layer in LAYERS {
        assert_eq!(
            fake.stack_status(AMBIENT, &format!("workshop-{layer}")),
            Some(StackStatus::CreateComplete),
            "layer {layer} must end CREATE_COMPLETE"
        );
    }

    assert_eq!(
        fake.parameter(AMBIENT, "/workshop/coveo/org-id"),
        Some(("org123".to_string(), false))
    );
    assert_eq!(
        fake.parameter(AMBIENT, "/workshop/coveo/search-api-key"),
        Some(("key456".to_string(), true)),
        "the API key must be a secure parameter"
    );
    assert_eq!(
        fake.parameter(AMBIENT, "/workshop/coveo/user-pool-id"),
        Some(("pool-123".to_string(), false))
    );
    assert_eq!(
        fake.parameter(AMBIENT, "/workshop/coveo/agent-id"),
        Some(("agent-1".to_string(), false))
    );
    assert_eq!(outcome.seeded_parameters.len(), 11);

    let artifact = std::fs::read_to_string(dir.path().join("deployment-info.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&artifact).unwrap();
    assert!(value["summary"]["steps"].as_array().unwrap().len() >= 7);
}

#[tokio::test]
async fn second_deploy_changes_nothing() {
    let fake = Arc::new(FakeCloud::new());
    preset_layer_outputs(&fake);
    let provider: Arc<dyn CloudProvider> = fake.clone();
    let dir = tempfile::tempdir().unwrap();
    let deployer = Deployer::new(provider, test_settings(None)).with_artifacts_dir(dir.path());
    let scope = CallScope::ambient("us-east-1");

    let first = deployer.run(&scope).await.unwrap();
    assert!(first.summary.success());

    let second = deployer.run(&scope).await.unwrap();
    assert!(second.summary.success());
    for layer in LAYERS {
        let step = second
            .summary
            .steps
            .iter()
            .find(|s| s.name == format!("layer/{layer}"))
            .unwrap();
        assert_eq!(step.status, StepStatus::Skipped, "layer {layer} must be a no-op");
    }

    let creates = fake
        .ops()
        .iter()
        .filter(|o| o.op.starts_with("create-stack"))
        .count();
    assert_eq!(creates, 4, "the second run must not create anything");
}

#[tokio::test]
async fn rolled_back_stack_is_replaced_on_deploy() {
    let fake = Arc::new(FakeCloud::new());
    preset_layer_outputs(&fake);
    fake.add_stack(AMBIENT, "workshop-prerequisites", StackStatus::RollbackComplete, Vec::new());
    let provider: Arc<dyn CloudProvider> = fake.clone();
    let dir = tempfile::tempdir().unwrap();
    let deployer = Deployer::new(provider, test_settings(None)).with_artifacts_dir(dir.path());
    let scope = CallScope::ambient("us-east-1");

    let outcome = deployer.run(&scope).await.unwrap();

    assert!(outcome.summary.success());
    assert_eq!(
        fake.stack_status(AMBIENT, "workshop-prerequisites"),
        Some(StackStatus::CreateComplete)
    );
    let ops: Vec<String> = fake.ops().into_iter().map(|o| o.op).collect();
    let delete = ops.iter().position(|o| o == "delete-stack workshop-prerequisites").unwrap();
    let create = ops.iter().position(|o| o == "create-stack workshop-prerequisites").unwrap();
    assert!(delete < create, "the wedged stack must be deleted before the fresh create");
}

#[tokio::test]
async fn update_rollback_failed_stack_is_rolled_forward_in_place() {
    let fake = Arc::new(FakeCloud::new());
    preset_layer_outputs(&fake);
    fake.add_stack(
        AMBIENT,
        "workshop-prerequisites",
        StackStatus::UpdateRollbackFailed,
        Vec::new(),
    );
    let provider: Arc<dyn CloudProvider> = fake.clone();
    let dir = tempfile::tempdir().unwrap();
    let deployer = Deployer::new(provider, test_settings(None)).with_artifacts_dir(dir.path());
    let scope = CallScope::ambient("us-east-1");

    let outcome = deployer.run(&scope).await.unwrap();

    assert!(outcome.summary.success());
    assert_eq!(
        fake.stack_status(AMBIENT, "workshop-prerequisites"),
        Some(StackStatus::UpdateComplete)
    );
    let ops: Vec<String> = fake.ops().into_iter().map(|o| o.op).collect();
    assert!(ops.contains(&"continue-rollback workshop-prerequisites".to_string()));
    assert!(
        !ops.contains(&"delete-stack workshop-prerequisites".to_string()),
        "a successfully rolled-back stack keeps its live resources"
    );
}

#[tokio::test]
async fn multi_account_deploy_converges_instances_and_seeds_members() {
    let fake = Arc::new(FakeCloud::new());
    preset_layer_outputs(&fake);
    fake.set_ou_accounts(&["111111111111", "222222222222", "999999999999"]);
    let multi = MultiAccount {
        ou_id: "ou-abcd-12345678".to_string(),
        master_account_id: "999999999999".to_string(),
        admin_role: "OrganizationAccountAccessRole".to_string(),
    };
    let provider: Arc<dyn CloudProvider> = fake.clone();
    let dir = tempfile::tempdir().unwrap();
    let deployer =
        Deployer::new(provider, test_settings(Some(multi))).with_artifacts_dir(dir.path());
    let scope = CallScope::ambient("us-east-1");

    let outcome = deployer.run(&scope).await.unwrap();
    assert!(outcome.summary.success());

    for layer in LAYERS {
        let pushed = fake
            .ops()
            .iter()
            .any(|o| o.op == format!("update-stack-instances workshop-{layer}"));
        assert!(pushed, "layer {layer} must be pushed to the fleet");
    }

    // Members get the parameters through their own assumed-role sessions,
    // never through the master's ambient credentials.
    assert!(fake.parameter("111111111111", "/workshop/coveo/org-id").is_some());
    assert!(fake.parameter("222222222222", "/workshop/coveo/org-id").is_some());
    assert!(fake.parameter("999999999999", "/workshop/coveo/org-id").is_none());
    for op in fake.ops().iter().filter(|o| o.op.starts_with("put-parameter")) {
        assert!(
            [AMBIENT, "111111111111", "222222222222"].contains(&op.account.as_str()),
            "unexpected session for {}: {}",
            op.op,
            op.account
        );
    }
}
