//! Fluent builders that persist test data through the API
//!
//! Every factory is bound to a [`ResourceApi`]. When it also carries an
//! [`EntityRegistry`] (as factories handed out by
//! [`IsolatedContext`](crate::context::IsolatedContext) do), whatever it
//! creates is registered for teardown.
//!
//! Builders are consumed by value: `with_*` returns the builder, lookups
//! that hit the API return `E2eResult<Self>`.

mod label;
mod status;
mod task;
mod user;

pub use label::{create_test_label, LabelFactory};
pub use status::{create_test_status, StatusFactory};
pub use task::{create_test_task, TaskFactory};
pub use user::{create_test_user, UserFactory};

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use taskdeck_common::{EntityKind, Identifier};
use tracing::{debug, warn};

use crate::client::ResourceApi;
use crate::error::{E2eError, E2eResult};
use crate::registry::EntityRegistry;

/// Where a factory sends what it builds
#[derive(Clone)]
pub(crate) struct Binding {
    api: Arc<dyn ResourceApi>,
    registry: Option<Arc<EntityRegistry>>,
}

impl Binding {
    pub(crate) fn new(api: Arc<dyn ResourceApi>) -> Self {
        Self { api, registry: None }
    }

    pub(crate) fn with_registry(mut self, registry: Arc<EntityRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// POST the payload and register the returned id
    pub(crate) async fn persist<B: Serialize>(
        &self,
        kind: EntityKind,
        payload: &B,
    ) -> E2eResult<Value> {
        let created = self.api.create(kind, serde_json::to_value(payload)?).await?;

        if let Some(registry) = &self.registry {
            match Identifier::from_record(&created) {
                Some(id) => registry.register(kind, id),
                None => warn!("Created {} has no id, it will not be cleaned up: {}", kind, created),
            }
        }

        Ok(created)
    }

    /// Fetch every `kind` record once
    pub(crate) async fn listing(&self, kind: EntityKind) -> E2eResult<Listing> {
        Ok(Listing {
            kind,
            records: self.api.list(kind).await?,
        })
    }

    /// Resolve a business key to an id with a fresh listing
    pub(crate) async fn lookup(
        &self,
        kind: EntityKind,
        field: &str,
        key: &str,
    ) -> E2eResult<Identifier> {
        self.listing(kind).await?.find(field, key)
    }
}

/// One fetched collection, scanned linearly
pub(crate) struct Listing {
    kind: EntityKind,
    records: Vec<Value>,
}

impl Listing {
    /// Id of the first record whose `field` equals `key`
    pub(crate) fn find(&self, field: &str, key: &str) -> E2eResult<Identifier> {
        let id = self
            .records
            .iter()
            .find(|record| record.get(field).and_then(Value::as_str) == Some(key))
            .and_then(Identifier::from_record)
            .ok_or_else(|| E2eError::NotFound {
                kind: self.kind,
                key: key.to_string(),
            })?;

        debug!("Resolved {} {}={} to id {}", self.kind, field, key, id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryApi;
    use serde_json::json;

    #[tokio::test]
    async fn test_persist_registers_when_bound() {
        let api = Arc::new(InMemoryApi::new());
        let registry = Arc::new(EntityRegistry::new());
        let binding = Binding::new(api.clone()).with_registry(registry.clone());

        let created = binding
            .persist(EntityKind::Label, &json!({ "name": "bug" }))
            .await
            .unwrap();

        assert_eq!(created["name"], "bug");
        assert_eq!(
            registry.get_all().ids(EntityKind::Label),
            &[Identifier::from_record(&created).unwrap()]
        );
    }

    #[tokio::test]
    async fn test_persist_without_registry_only_creates() {
        let api = Arc::new(InMemoryApi::new());
        Binding::new(api.clone())
            .persist(EntityKind::Label, &json!({ "name": "bug" }))
            .await
            .unwrap();
        assert_eq!(api.records(EntityKind::Label).len(), 1);
    }

    #[tokio::test]
    async fn test_lookup_missing_key_is_not_found() {
        let api = Arc::new(InMemoryApi::new());
        api.seed(EntityKind::Status, json!({ "slug": "new" }));

        let binding = Binding::new(api);
        let found = binding.lookup(EntityKind::Status, "slug", "new").await.unwrap();
        assert_eq!(found, Identifier::Int(1));

        let err = binding
            .lookup(EntityKind::Status, "slug", "archived")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            E2eError::NotFound { kind: EntityKind::Status, ref key } if key == "archived"
        ));
    }
}
