//! CLI command implementations.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use deploykit_aws::AwsCli;
use deploykit_config::{DeploySettings, load_environment};
use deploykit_core::provider::{CallScope, CloudProvider};
use deploykit_core::{ResourceKind, ResourceRef, RunSummary, StepStatus};
use deploykit_orchestrator::{Deployer, TeardownSequencer, sweep_remaining};
use dialoguer::Confirm;

const LAYERS: &[&str] = &["prerequisites", "core", "ai-services", "ui"];

/// Resolve settings from the environment file and flags. Also checks the
/// one binary precondition before anything mutates: the `aws` CLI must be
/// on PATH.
pub fn load_settings(
    env_file: &str,
    region: Option<&str>,
    stack_prefix: &str,
    multi_account: bool,
) -> Result<DeploySettings> {
    which::which("aws").context("`aws` CLI not found on PATH")?;

    let path = Path::new(env_file);
    let env = load_environment(path.exists().then_some(path))
        .with_context(|| format!("loading environment from {env_file}"))?;
    let mut settings = DeploySettings::from_environment(&env, stack_prefix, multi_account)?;
    if let Some(region) = region {
        settings.region = region.to_string();
    }
    Ok(settings)
}

fn provider() -> Arc<dyn CloudProvider> {
    Arc::new(AwsCli::new())
}

pub async fn deploy(settings: DeploySettings) -> Result<bool> {
    let scope = CallScope::ambient(&settings.region);
    let outcome = Deployer::new(provider(), settings).run(&scope).await?;
    print_summary(&outcome.summary);
    if !outcome.seeded_parameters.is_empty() {
        println!("\nSeeded parameters:");
        for name in &outcome.seeded_parameters {
            println!("  {name}");
        }
    }
    Ok(outcome.summary.success())
}

pub async fn destroy(
    mut settings: DeploySettings,
    confirm: bool,
    preserve_images: bool,
    force: bool,
) -> Result<bool> {
    settings.preserve_images = preserve_images;

    if !confirm {
        let prompt = format!(
            "Delete every {}-* resource in {}?",
            settings.naming.prefix, settings.region
        );
        if !Confirm::new().with_prompt(prompt).default(false).interact()? {
            println!("{}", "Aborted.".yellow());
            return Ok(true);
        }
    }

    let scope = CallScope::ambient(&settings.region);
    let summary = TeardownSequencer::new(provider(), settings)
        .with_force(force)
        .run(&scope)
        .await;
    print_summary(&summary);
    if !summary.remaining.is_empty() {
        println!("\n{}", "Still present, clean up manually:".yellow());
        for item in &summary.remaining {
            println!("  {item}");
        }
    }
    Ok(summary.success())
}

pub async fn status(settings: DeploySettings) -> Result<bool> {
    let provider = provider();
    let scope = CallScope::ambient(&settings.region);

    for layer in LAYERS {
        let name = settings.naming.name(layer);
        let stack_ref = ResourceRef::new(ResourceKind::Stack, &name, &scope.region);
        let probe = provider.probe(&scope, &stack_ref).await?;
        match probe.status {
            Some(status) if status.is_current() => {
                println!("{}  {}", status.as_str().green(), name)
            }
            Some(status) => println!("{}  {}", status.as_str().red(), name),
            None if probe.present => println!("{}  {}", "PRESENT".green(), name),
            None => println!("{}  {}", "ABSENT".dimmed(), name),
        }
    }

    let remaining = sweep_remaining(&provider, &scope, &settings.naming).await?;
    println!("\n{} resources match prefix {}", remaining.len(), settings.naming.prefix);
    Ok(true)
}

pub async fn verify(settings: DeploySettings) -> Result<bool> {
    let provider = provider();
    let scope = CallScope::ambient(&settings.region);

    let mut ok = true;
    for layer in LAYERS {
        let name = settings.naming.name(layer);
        let stack_ref = ResourceRef::new(ResourceKind::Stack, &name, &scope.region);
        let probe = provider.probe(&scope, &stack_ref).await?;
        let current = probe.status.as_ref().is_some_and(|s| s.is_current());
        if current {
            println!("{}  {}", "ok".green(), name);
        } else {
            println!("{}  {} ({:?})", "BAD".red(), name, probe.status);
            ok = false;
        }
    }
    Ok(ok)
}

fn print_summary(summary: &RunSummary) {
    println!("\nRun {} ({}):", summary.run_id, summary.region);
    for step in &summary.steps {
        let status = match step.status {
            StepStatus::Succeeded => "succeeded".green(),
            StepStatus::Skipped => "skipped".dimmed(),
            StepStatus::Failed => "failed".red(),
            StepStatus::TimedOut => "timed out".red(),
        };
        match &step.detail {
            Some(detail) => println!("  {status}  {} ({detail})", step.name),
            None => println!("  {status}  {}", step.name),
        }
    }
}
