//! Resource references and the naming convention.
//!
//! Everything the orchestrator touches is addressed by a `ResourceRef` built
//! from the `{prefix}-{suffix}` naming convention at orchestration time.
//! Nothing is persisted; refs are re-derived on every run.

use serde::{Deserialize, Serialize};

/// The closed set of resource kinds the orchestrator operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Stack,
    Bucket,
    Role,
    Function,
    Repository,
    Parameter,
    Secret,
    Agent,
    Runtime,
    Memory,
    LogGroup,
    BuildProject,
    UserPool,
}

impl ResourceKind {
    /// Kinds the orphan reconciler is allowed to clear before a managed
    /// create. Stacks are never orphans by definition, and agents/runtimes
    /// are only ever created through a stack.
    pub fn reclaimable(self) -> bool {
        matches!(
            self,
            ResourceKind::Repository
                | ResourceKind::Role
                | ResourceKind::Function
                | ResourceKind::Parameter
                | ResourceKind::LogGroup
                | ResourceKind::BuildProject
        )
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceKind::Stack => "stack",
            ResourceKind::Bucket => "bucket",
            ResourceKind::Role => "role",
            ResourceKind::Function => "function",
            ResourceKind::Repository => "repository",
            ResourceKind::Parameter => "parameter",
            ResourceKind::Secret => "secret",
            ResourceKind::Agent => "agent",
            ResourceKind::Runtime => "runtime",
            ResourceKind::Memory => "memory",
            ResourceKind::LogGroup => "log-group",
            ResourceKind::BuildProject => "build-project",
            ResourceKind::UserPool => "user-pool",
        };
        write!(f, "{}", s)
    }
}

/// Reference to a single cloud resource.
///
/// Identity is the full (kind, identifier, account, region) tuple; no two
/// operations on the same identity may race destructively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub identifier: String,
    pub region: String,
    /// Account id; `None` means the ambient (current) account.
    pub account: Option<String>,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, identifier: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            region: region.into(),
            account: None,
        }
    }

    pub fn in_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.identifier)
    }
}

/// The `{prefix}-{suffix}` naming convention shared by every resource the
/// workshop owns, and the `/{prefix}/...` convention for parameter paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Naming {
    pub prefix: String,
}

impl Naming {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn name(&self, suffix: &str) -> String {
        format!("{}-{}", self.prefix, suffix)
    }

    pub fn parameter_path(&self, path: &str) -> String {
        format!("/{}/{}", self.prefix, path.trim_start_matches('/'))
    }

    /// Whether an identifier belongs to this deployment.
    pub fn owns(&self, identifier: &str) -> bool {
        identifier.starts_with(&format!("{}-", self.prefix))
            || identifier.starts_with(&format!("/{}/", self.prefix))
    }
}
