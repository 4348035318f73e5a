use serde_json::Value;
use std::sync::Arc;
use taskdeck_common::{EntityKind, Label, NewLabel};

use super::Binding;
use crate::client::ResourceApi;
use crate::error::E2eResult;
use crate::registry::EntityRegistry;
use crate::unique;

#[derive(Clone)]
pub struct LabelFactory {
    binding: Binding,
    name: Option<String>,
}

impl LabelFactory {
    pub fn new(api: Arc<dyn ResourceApi>) -> Self {
        Self {
            binding: Binding::new(api),
            name: None,
        }
    }

    pub fn registering(mut self, registry: Arc<EntityRegistry>) -> Self {
        self.binding = self.binding.with_registry(registry);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_unique_name(mut self) -> Self {
        self.name = Some(unique_name());
        self
    }

    pub fn build(&self) -> NewLabel {
        NewLabel {
            name: self.name.clone().unwrap_or_else(unique_name),
        }
    }

    pub async fn create(self) -> E2eResult<Value> {
        self.binding.persist(EntityKind::Label, &self.build()).await
    }

    pub async fn create_and_get(self) -> E2eResult<Label> {
        Ok(serde_json::from_value(self.create().await?)?)
    }
}

fn unique_name() -> String {
    format!("Test Label {}", unique::stamp())
}

pub async fn create_test_label(api: Arc<dyn ResourceApi>) -> E2eResult<Label> {
    LabelFactory::new(api).with_unique_name().create_and_get().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryApi;

    #[test]
    fn test_build_generates_name() {
        let factory = LabelFactory::new(Arc::new(InMemoryApi::new()));
        let a = factory.build();
        let b = factory.build();
        assert!(a.name.starts_with("Test Label "));
        assert_ne!(a.name, b.name);
    }

    #[tokio::test]
    async fn test_create_test_label() {
        let api = Arc::new(InMemoryApi::new());
        let label = create_test_label(api.clone()).await.unwrap();
        assert!(label.name.starts_with("Test Label "));
        assert_eq!(api.records(EntityKind::Label)[0]["name"], label.name.as_str());
    }
}
