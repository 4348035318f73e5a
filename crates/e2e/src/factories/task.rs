use serde_json::Value;
use std::sync::Arc;
use taskdeck_common::{EntityKind, Identifier, NewTask, Task};

use super::Binding;
use crate::client::ResourceApi;
use crate::error::E2eResult;
use crate::registry::EntityRegistry;
use crate::unique;

/// Builds tasks.
///
/// `with_assignee`, `with_status`, `with_label` and `with_labels` resolve
/// human-readable keys against a fresh listing and fail with
/// [`E2eError::NotFound`](crate::error::E2eError::NotFound) when nothing
/// matches. Label ids never repeat.
#[derive(Clone)]
pub struct TaskFactory {
    binding: Binding,
    title: Option<String>,
    content: Option<String>,
    assignee_id: Option<Identifier>,
    status_id: Option<Identifier>,
    label_ids: Vec<Identifier>,
}

impl TaskFactory {
    pub fn new(api: Arc<dyn ResourceApi>) -> Self {
        Self {
            binding: Binding::new(api),
            title: None,
            content: None,
            assignee_id: None,
            status_id: None,
            label_ids: Vec::new(),
        }
    }

    pub fn registering(mut self, registry: Arc<EntityRegistry>) -> Self {
        self.binding = self.binding.with_registry(registry);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_assignee_id(mut self, id: impl Into<Identifier>) -> Self {
        self.assignee_id = Some(id.into());
        self
    }

    pub fn with_status_id(mut self, id: impl Into<Identifier>) -> Self {
        self.status_id = Some(id.into());
        self
    }

    pub fn with_label_id(mut self, id: impl Into<Identifier>) -> Self {
        self.push_label(id.into());
        self
    }

    /// Assign the user whose email matches
    pub async fn with_assignee(mut self, email: &str) -> E2eResult<Self> {
        self.assignee_id = Some(self.binding.lookup(EntityKind::User, "email", email).await?);
        Ok(self)
    }

    /// Use the status whose slug matches
    pub async fn with_status(mut self, slug: &str) -> E2eResult<Self> {
        self.status_id = Some(self.binding.lookup(EntityKind::Status, "slug", slug).await?);
        Ok(self)
    }

    /// Add the label whose name matches
    pub async fn with_label(mut self, name: &str) -> E2eResult<Self> {
        let id = self.binding.lookup(EntityKind::Label, "name", name).await?;
        self.push_label(id);
        Ok(self)
    }

    /// Add several labels by name against a single listing. Nothing is
    /// added if any name is missing.
    pub async fn with_labels<S: AsRef<str>>(mut self, names: &[S]) -> E2eResult<Self> {
        let labels = self.binding.listing(EntityKind::Label).await?;
        let ids = names
            .iter()
            .map(|name| labels.find("name", name.as_ref()))
            .collect::<E2eResult<Vec<_>>>()?;
        for id in ids {
            self.push_label(id);
        }
        Ok(self)
    }

    /// Title and content from one stamp
    pub fn with_unique_data(mut self) -> Self {
        let stamp = unique::stamp();
        self.title = Some(format!("Test Task {}", stamp));
        self.content = Some(format!("Description {}", stamp));
        self
    }

    pub fn build(&self) -> NewTask {
        let stamp = (self.title.is_none() || self.content.is_none()).then(unique::stamp);
        NewTask {
            title: self
                .title
                .clone()
                .unwrap_or_else(|| format!("Test Task {}", stamp.unwrap_or_default())),
            content: self
                .content
                .clone()
                .unwrap_or_else(|| format!("Description {}", stamp.unwrap_or_default())),
            assignee_id: self.assignee_id.clone(),
            status_id: self.status_id.clone(),
            label_ids: self.label_ids.clone(),
        }
    }

    pub async fn create(self) -> E2eResult<Value> {
        self.binding.persist(EntityKind::Task, &self.build()).await
    }

    pub async fn create_and_get(self) -> E2eResult<Task> {
        Ok(serde_json::from_value(self.create().await?)?)
    }

    fn push_label(&mut self, id: Identifier) {
        if !self.label_ids.contains(&id) {
            self.label_ids.push(id);
        }
    }
}

pub async fn create_test_task(api: Arc<dyn ResourceApi>) -> E2eResult<Task> {
    TaskFactory::new(api).with_unique_data().create_and_get().await
}
