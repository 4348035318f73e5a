use serde_json::Value;
use std::sync::Arc;
use taskdeck_common::{EntityKind, NewStatus, Status};

use super::Binding;
use crate::client::ResourceApi;
use crate::error::E2eResult;
use crate::registry::EntityRegistry;
use crate::unique;

/// Builds task statuses. A missing slug is derived from the name.
#[derive(Clone)]
pub struct StatusFactory {
    binding: Binding,
    name: Option<String>,
    slug: Option<String>,
}

impl StatusFactory {
    pub fn new(api: Arc<dyn ResourceApi>) -> Self {
        Self {
            binding: Binding::new(api),
            name: None,
            slug: None,
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

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    pub fn with_unique_data(mut self) -> Self {
        let stamp = unique::stamp();
        self.name = Some(format!("Test Status {}", stamp));
        self.slug = Some(format!("test-status-{}", stamp));
        self
    }

    /// Derive the slug from the name unless one is already set
    pub fn with_auto_slug(mut self) -> Self {
        if self.slug.is_none() {
            self.slug = self.name.as_deref().map(unique::slugify);
        }
        self
    }

    /// Fills whichever of name and slug is unset
    pub fn build(&self) -> NewStatus {
        match (&self.name, &self.slug) {
            (Some(name), Some(slug)) => NewStatus {
                name: name.clone(),
                slug: slug.clone(),
            },
            (Some(name), None) => NewStatus {
                name: name.clone(),
                slug: unique::slugify(name),
            },
            (None, slug) => {
                let stamp = unique::stamp();
                NewStatus {
                    name: format!("Test Status {}", stamp),
                    slug: slug.clone().unwrap_or_else(|| format!("test-status-{}", stamp)),
                }
            }
        }
    }

    pub async fn create(self) -> E2eResult<Value> {
        self.binding.persist(EntityKind::Status, &self.build()).await
    }

    pub async fn create_and_get(self) -> E2eResult<Status> {
        Ok(serde_json::from_value(self.create().await?)?)
    }
}

/// A status with unique name and slug
pub async fn create_test_status(api: Arc<dyn ResourceApi>) -> E2eResult<Status> {
    StatusFactory::new(api).with_unique_data().create_and_get().await
}
