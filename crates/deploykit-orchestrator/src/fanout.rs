//! Cross-account fan-out.
//!
//! Repeats one parameterized operation across a set of member accounts,
//! assuming a role in each. Credentials are owned by the iteration and
//! dropped with it; they never touch the process environment, so one
//! account's session cannot leak into the next. Concurrency is bounded
//! and failures are aggregated, never fail-fast: partial success across a
//! fleet is the expected common case.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use deploykit_core::provider::{CallScope, CloudProvider};
use deploykit_core::Result;
use futures::StreamExt;
use futures::stream;
use tracing::{info, warn};
use uuid::Uuid;

/// Per-account outcomes plus the overall verdict.
#[derive(Debug)]
pub struct FanOutReport {
    pub outcomes: BTreeMap<String, std::result::Result<(), String>>,
    pub failure_tolerance: usize,
}

impl FanOutReport {
    pub fn failed_accounts(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, r)| r.is_err())
            .map(|(account, _)| account.as_str())
            .collect()
    }

    pub fn succeeded_count(&self) -> usize {
        self.outcomes.values().filter(|r| r.is_ok()).count()
    }

    /// Failed once more accounts failed than the tolerance allows.
    pub fn is_success(&self) -> bool {
        self.failed_accounts().len() <= self.failure_tolerance
    }
}

pub struct FanOut {
    provider: Arc<dyn CloudProvider>,
    /// Role assumed in each member account.
    role_name: String,
    concurrency: usize,
    failure_tolerance: usize,
}

impl FanOut {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        role_name: impl Into<String>,
        concurrency: usize,
        failure_tolerance: usize,
    ) -> Self {
        Self {
            provider,
            role_name: role_name.into(),
            concurrency: concurrency.max(1),
            failure_tolerance,
        }
    }

    /// Run `op` once per account with that account's assumed-role scope.
    /// No more than `concurrency` accounts are in flight at once.
    pub async fn for_each<F, Fut>(
        &self,
        base: &CallScope,
        accounts: &[String],
        op: F,
    ) -> FanOutReport
    where
        F: Fn(String, CallScope) -> Fut + Sync,
        Fut: Future<Output = Result<()>>,
    {
        let op = &op;
        let outcomes: BTreeMap<String, std::result::Result<(), String>> =
            stream::iter(accounts.iter().cloned())
                .map(|account| async move {
                    let result = self.run_one(base, &account, op).await;
                    (account, result.map_err(|e| e.to_string()))
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        let report = FanOutReport {
            outcomes,
            failure_tolerance: self.failure_tolerance,
        };
        let failed = report.failed_accounts();
        if failed.is_empty() {
            info!(accounts = accounts.len(), "fan-out complete");
        } else {
            warn!(
                accounts = accounts.len(),
                failed = failed.len(),
                tolerance = self.failure_tolerance,
                "fan-out complete with failures"
            );
        }
        report
    }

    async fn run_one<F, Fut>(&self, base: &CallScope, account: &str, op: &F) -> Result<()>
    where
        F: Fn(String, CallScope) -> Fut + Sync,
        Fut: Future<Output = Result<()>>,
    {
        let session_name = format!("deploykit-{}", Uuid::new_v4().simple());
        let credentials = self
            .provider
            .assume_role(base, account, &self.role_name, &session_name)
            .await?;

        // The scoped credentials live exactly as long as this iteration.
        let scoped = CallScope::assumed(&base.region, credentials);
        op(account.to_string(), scoped).await
    }
}
