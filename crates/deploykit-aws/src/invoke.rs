//! Low-level `aws` subprocess invocation.

use std::process::Stdio;

use deploykit_core::provider::CallScope;
use deploykit_core::{Error, Result};
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

/// Runs `aws` commands with a scope's region and credentials.
pub struct AwsInvoker {
    aws_bin: String,
}

impl AwsInvoker {
    pub fn new() -> Self {
        let aws_bin = std::env::var("AWS_BIN").unwrap_or_else(|_| "aws".to_string());
        Self { aws_bin }
    }

    /// Run one command, returning stdout on success and the raw stderr on
    /// failure for the caller to classify.
    pub async fn run(&self, scope: &CallScope, args: &[&str]) -> std::result::Result<String, String> {
        debug!(service = args.first().unwrap_or(&"?"), ?args, "aws invocation");

        let mut command = Command::new(&self.aws_bin);
        command
            .args(args)
            .arg("--region")
            .arg(&scope.region)
            .arg("--output")
            .arg("json")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Credentials live on the child process only; the orchestrator's own
        // environment never changes between fan-out iterations.
        if let Some(credentials) = &scope.credentials {
            command
                .env("AWS_ACCESS_KEY_ID", &credentials.access_key_id)
                .env("AWS_SECRET_ACCESS_KEY", &credentials.secret_access_key)
                .env("AWS_SESSION_TOKEN", &credentials.session_token);
        }

        let output = command
            .output()
            .await
            .map_err(|e| format!("failed to spawn {}: {e}", self.aws_bin))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).to_string())
        }
    }

    /// Run a command whose stdout is a JSON document.
    pub async fn run_json(
        &self,
        scope: &CallScope,
        context: &str,
        args: &[&str],
    ) -> Result<Value> {
        match self.run(scope, args).await {
            Ok(stdout) if stdout.trim().is_empty() => Ok(Value::Null),
            Ok(stdout) => serde_json::from_str(&stdout)
                .map_err(|e| Error::Parse(format!("{context}: {e}"))),
            Err(stderr) => Err(crate::classify::classify_stderr(context, &stderr)),
        }
    }

    /// Run a command where only success matters.
    pub async fn run_unit(&self, scope: &CallScope, context: &str, args: &[&str]) -> Result<()> {
        match self.run(scope, args).await {
            Ok(_) => Ok(()),
            Err(stderr) => Err(crate::classify::classify_stderr(context, &stderr)),
        }
    }
}

impl Default for AwsInvoker {
    fn default() -> Self {
        Self::new()
    }
}
