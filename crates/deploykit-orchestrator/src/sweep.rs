//! Final verification sweep.
//!
//! Read-only pass enumerating everything that still matches the naming
//! convention, so a human can finish manually what the orchestrator could
//! not. Best-effort: a family whose list call fails is reported as such
//! rather than aborting the sweep.

use std::sync::Arc;

use deploykit_core::provider::{CallScope, CloudProvider};
use deploykit_core::resource::Naming;
use deploykit_core::{ResourceKind, Result};
use tracing::warn;

const FAMILIES: &[ResourceKind] = &[
    ResourceKind::Stack,
    ResourceKind::Bucket,
    ResourceKind::Role,
    ResourceKind::Function,
    ResourceKind::Repository,
    ResourceKind::BuildProject,
    ResourceKind::Agent,
    ResourceKind::Runtime,
    ResourceKind::Memory,
    ResourceKind::Secret,
    ResourceKind::Parameter,
    ResourceKind::LogGroup,
    ResourceKind::UserPool,
];

/// Everything still present under the naming convention, as
/// `kind/identifier` strings.
pub async fn sweep_remaining(
    provider: &Arc<dyn CloudProvider>,
    scope: &CallScope,
    naming: &Naming,
) -> Result<Vec<String>> {
    let mut remaining = Vec::new();
    for kind in FAMILIES {
        for prefix in prefixes_for(*kind, naming) {
            match provider.list_by_prefix(scope, *kind, &prefix).await {
                Ok(identifiers) => {
                    remaining.extend(identifiers.into_iter().map(|id| format!("{kind}/{id}")));
                }
                Err(e) => {
                    warn!(kind = %kind, error = %e, "sweep could not list family");
                    remaining.push(format!("{kind}/<list failed: {e}>"));
                }
            }
        }
    }
    remaining.sort();
    remaining.dedup();
    Ok(remaining)
}

/// The naming-convention prefixes each family lives under. Parameters use
/// the `/{prefix}/` path form; Lambda log groups carry the `/aws/lambda/`
/// prefix in front of the function name.
fn prefixes_for(kind: ResourceKind, naming: &Naming) -> Vec<String> {
    match kind {
        ResourceKind::Parameter => vec![format!("/{}/", naming.prefix)],
        ResourceKind::LogGroup => vec![
            format!("/aws/lambda/{}-", naming.prefix),
            format!("/{}/", naming.prefix),
        ],
        _ => vec![format!("{}-", naming.prefix)],
    }
}
