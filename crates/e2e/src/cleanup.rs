//! Best-effort teardown of registered entities

use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use taskdeck_common::{EntityKind, Identifier};
use tracing::{debug, warn};

use crate::client::ResourceApi;
use crate::registry::EntityRegistry;

/// A delete that failed during cleanup. Recorded and logged, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupFailure {
    pub kind: EntityKind,
    pub id: Identifier,
    pub reason: String,
}

impl fmt::Display for CleanupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to cleanup {} {}: {}", self.kind, self.id, self.reason)
    }
}

/// Outcome of a cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Deletes issued
    pub attempted: usize,
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn deleted(&self) -> usize {
        self.attempted - self.failures.len()
    }
}

/// Delete everything in `registry`, then clear it.
///
/// Buckets are drained strictly in the order tasks, labels, statuses, users;
/// each bucket finishes before the next starts. Deletes within a bucket run
/// concurrently. Failures are collected into the report and the loop carries
/// on, so this never fails and always leaves the registry empty.
pub async fn cleanup_registered_entities<A>(registry: &EntityRegistry, api: &A) -> CleanupReport
where
    A: ResourceApi + ?Sized,
{
    let entities = registry.get_all();
    let mut report = CleanupReport::default();

    for kind in EntityKind::CLEANUP_ORDER {
        let ids = entities.ids(kind);
        if ids.is_empty() {
            continue;
        }

        debug!("Cleaning up {} {}", ids.len(), kind);
        report.attempted += ids.len();

        let outcomes = join_all(ids.iter().map(|id| async move {
            api.delete(kind, id).await.map_err(|e| CleanupFailure {
                kind,
                id: id.clone(),
                reason: e.to_string(),
            })
        }))
        .await;

        for failure in outcomes.into_iter().filter_map(Result::err) {
            warn!("{}", failure);
            report.failures.push(failure);
        }
    }

    registry.clear();
    report
}
