//! Orphan reconciliation.
//!
//! Before a first-time managed create, same-named resources left behind
//! outside any stack's ownership would collide with "already exists"
//! errors. This clears them. It must only run on create paths: callers
//! invoke it after probing that the owning stack is absent, which is what
//! makes any matching resource an orphan by definition.

use std::sync::Arc;

use deploykit_core::provider::{CallScope, CloudProvider};
use deploykit_core::{Error, ResourceRef, Result};
use tracing::{info, warn};

pub struct OrphanReconciler {
    provider: Arc<dyn CloudProvider>,
}

impl OrphanReconciler {
    pub fn new(provider: Arc<dyn CloudProvider>) -> Self {
        Self { provider }
    }

    /// Delete every listed resource that exists. Returns the identifiers
    /// actually cleared. Non-reclaimable kinds are refused loudly rather
    /// than silently skipped; passing one is a bug in the caller.
    pub async fn reconcile(&self, scope: &CallScope, candidates: &[ResourceRef]) -> Result<Vec<String>> {
        let mut cleared = Vec::new();
        for resource in candidates {
            if !resource.kind.reclaimable() {
                return Err(Error::Precondition(format!(
                    "{resource} is not a kind the orphan reconciler may delete"
                )));
            }
            let probe = self.provider.probe(scope, resource).await?;
            if !probe.present {
                continue;
            }
            warn!(resource = %resource, "unmanaged resource collides with managed create, removing");
            match self.provider.delete(scope, resource, true).await {
                Ok(()) | Err(Error::NotFound(_)) => {
                    info!(resource = %resource, "orphan cleared");
                    cleared.push(resource.identifier.clone());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(cleared)
    }
}
