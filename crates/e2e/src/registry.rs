//! Registry of entities created during a test, for deterministic teardown

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use taskdeck_common::{EntityKind, EntityRef, Identifier};
use tracing::debug;

/// Owned copy of the registry contents, one bucket per kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegisteredEntities {
    buckets: BTreeMap<EntityKind, Vec<Identifier>>,
}

impl RegisteredEntities {
    fn empty() -> Self {
        Self {
            buckets: EntityKind::ALL.iter().map(|k| (*k, Vec::new())).collect(),
        }
    }

    /// Ids of one kind in registration order
    pub fn ids(&self, kind: EntityKind) -> &[Identifier] {
        self.buckets.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every registered entity, buckets in `kinds` order
    pub fn refs_in(&self, kinds: &[EntityKind]) -> Vec<EntityRef> {
        kinds
            .iter()
            .flat_map(|kind| {
                self.ids(*kind).iter().map(move |id| EntityRef {
                    kind: *kind,
                    id: id.clone(),
                })
            })
            .collect()
    }
}

/// Tracks ids of entities created by the current test.
///
/// Shared between the isolated context and its factories, so mutation goes
/// through `&self`.
#[derive(Debug)]
pub struct EntityRegistry {
    entities: Mutex<RegisteredEntities>,
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self {
            entities: Mutex::new(RegisteredEntities::empty()),
        }
    }

    /// Record `id` under `kind`. Registering the same pair again is a no-op.
    pub fn register(&self, kind: EntityKind, id: Identifier) {
        let mut entities = self.entities.lock();
        let bucket = entities.buckets.entry(kind).or_default();
        if !bucket.contains(&id) {
            debug!("Registered {} {}", kind, id);
            bucket.push(id);
        }
    }

    pub fn register_ref(&self, entity: EntityRef) {
        self.register(entity.kind, entity.id);
    }

    /// Snapshot of every bucket. Mutating the result does not touch the registry.
    pub fn get_all(&self) -> RegisteredEntities {
        self.entities.lock().clone()
    }

    /// Empty every bucket
    pub fn clear(&self) {
        *self.entities.lock() = RegisteredEntities::empty();
    }

    pub fn len(&self) -> usize {
        self.entities.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
