use serde_json::Value;
use std::sync::Arc;
use taskdeck_common::{EntityKind, NewUser, User};

use super::Binding;
use crate::client::ResourceApi;
use crate::error::E2eResult;
use crate::registry::EntityRegistry;
use crate::unique;

/// Builds users. First and last name default to `Test` and `User`; the
/// email is generated when not set.
#[derive(Clone)]
pub struct UserFactory {
    binding: Binding,
    email: Option<String>,
    first_name: String,
    last_name: String,
}

impl UserFactory {
    pub fn new(api: Arc<dyn ResourceApi>) -> Self {
        Self {
            binding: Binding::new(api),
            email: None,
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
        }
    }

    /// Register created users in `registry`
    pub fn registering(mut self, registry: Arc<EntityRegistry>) -> Self {
        self.binding = self.binding.with_registry(registry);
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_first_name(mut self, first_name: impl Into<String>) -> Self {
        self.first_name = first_name.into();
        self
    }

    pub fn with_last_name(mut self, last_name: impl Into<String>) -> Self {
        self.last_name = last_name.into();
        self
    }

    pub fn with_unique_email(mut self) -> Self {
        self.email = Some(unique::email());
        self
    }

    /// Email and both names from one stamp
    pub fn with_unique_data(mut self) -> Self {
        let stamp = unique::stamp();
        self.email = Some(unique::email_for(stamp));
        self.first_name = format!("Test{}", stamp);
        self.last_name = format!("User{}", stamp);
        self
    }

    pub fn build(&self) -> NewUser {
        NewUser {
            email: self.email.clone().unwrap_or_else(unique::email),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
        }
    }

    /// Persist and return the server's response as-is
    pub async fn create(self) -> E2eResult<Value> {
        self.binding.persist(EntityKind::User, &self.build()).await
    }

    pub async fn create_and_get(self) -> E2eResult<User> {
        Ok(serde_json::from_value(self.create().await?)?)
    }
}

/// A user with unique email and names
pub async fn create_test_user(api: Arc<dyn ResourceApi>) -> E2eResult<User> {
    UserFactory::new(api).with_unique_data().create_and_get().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryApi;
    use regex::Regex;

    fn factory() -> UserFactory {
        UserFactory::new(Arc::new(InMemoryApi::new()))
    }

    #[test]
    fn test_unique_data_gives_distinct_emails() {
        let pattern = Regex::new(r"^test\d+@example\.com$").unwrap();

        let first = factory().with_unique_data().build();
        let second = factory().with_unique_data().build();

        assert!(pattern.is_match(&first.email), "{}", first.email);
        assert!(pattern.is_match(&second.email), "{}", second.email);
        assert_ne!(first.email, second.email);
        assert!(first.first_name.starts_with("Test"));
        assert!(second.last_name.starts_with("User"));
    }

    #[test]
    fn test_build_fills_email_and_keeps_default_names() {
        let user = factory().build();
        assert!(user.email.ends_with("@example.com"));
        assert_eq!(user.first_name, "Test");
        assert_eq!(user.last_name, "User");
    }

    #[test]
    fn test_explicit_values_win() {
        let user = factory()
            .with_email("ada@example.com")
            .with_first_name("Ada")
            .with_last_name("Lovelace")
            .build();
        assert_eq!(
            user,
            NewUser {
                email: "ada@example.com".into(),
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_create_and_get_registers() {
        let api = Arc::new(InMemoryApi::new());
        let registry = Arc::new(EntityRegistry::new());

        let user = UserFactory::new(api.clone())
            .registering(registry.clone())
            .with_email("grace@example.com")
            .create_and_get()
            .await
            .unwrap();

        assert_eq!(user.email, "grace@example.com");
        assert_eq!(user.first_name, "Test");
        assert_eq!(registry.get_all().ids(EntityKind::User), &[user.id]);
    }
}
