//! Core types for Taskdeck entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Kind of server-side entity the harness can create and delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(rename = "users")]
    User,
    #[serde(rename = "statuses")]
    Status,
    #[serde(rename = "labels")]
    Label,
    #[serde(rename = "tasks")]
    Task,
}

impl EntityKind {
    /// Every kind, in declaration order
    pub const ALL: [EntityKind; 4] = [
        EntityKind::User,
        EntityKind::Status,
        EntityKind::Label,
        EntityKind::Task,
    ];

    /// Dependents first: tasks reference statuses, labels and users.
    pub const CLEANUP_ORDER: [EntityKind; 4] = [
        EntityKind::Task,
        EntityKind::Label,
        EntityKind::Status,
        EntityKind::User,
    ];

    /// Bucket name, e.g. `tasks`
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "users",
            EntityKind::Status => "statuses",
            EntityKind::Label => "labels",
            EntityKind::Task => "tasks",
        }
    }

    /// Collection path below the API base
    pub fn endpoint(&self) -> &'static str {
        match self {
            EntityKind::User => "/users",
            EntityKind::Status => "/task_statuses",
            EntityKind::Label => "/labels",
            EntityKind::Task => "/tasks",
        }
    }

    /// Path of a single record below the API base
    pub fn item_endpoint(&self, id: &Identifier) -> String {
        format!("{}/{}", self.endpoint(), id)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown entity type: {0}")]
pub struct UnknownEntityKind(pub String);

impl FromStr for EntityKind {
    type Err = UnknownEntityKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" | "users" => Ok(EntityKind::User),
            "status" | "statuses" | "task_status" | "task_statuses" => Ok(EntityKind::Status),
            "label" | "labels" => Ok(EntityKind::Label),
            "task" | "tasks" => Ok(EntityKind::Task),
            other => Err(UnknownEntityKind(other.to_string())),
        }
    }
}

/// Server-assigned identifier. The API hands out numbers, but some
/// deployments use string keys, so both are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identifier {
    Int(i64),
    Text(String),
}

impl Identifier {
    /// Read the `id` field of a JSON record
    pub fn from_record(record: &serde_json::Value) -> Option<Self> {
        match record.get("id")? {
            serde_json::Value::Number(n) => n.as_i64().map(Identifier::Int),
            serde_json::Value::String(s) => Some(Identifier::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Int(n) => write!(f, "{}", n),
            Identifier::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Identifier {
    fn from(value: i64) -> Self {
        Identifier::Int(value)
    }
}

impl From<i32> for Identifier {
    fn from(value: i32) -> Self {
        Identifier::Int(value.into())
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Identifier::Text(value.to_string())
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Identifier::Text(value)
    }
}

/// A `(kind, id)` pair that came back from a creation response
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: Identifier,
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// A persisted record with a known kind
pub trait Entity {
    const KIND: EntityKind;

    fn id(&self) -> &Identifier;

    fn entity_ref(&self) -> EntityRef {
        EntityRef {
            kind: Self::KIND,
            id: self.id().clone(),
        }
    }
}

// ==================== Users ====================

/// User as returned by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Identifier,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "firstName", default)]
    pub first_name: String,
    #[serde(rename = "lastName", default)]
    pub last_name: String,
}

/// Payload for `POST /users`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "lastName")]
    pub last_name: String,
}

impl Entity for User {
    const KIND: EntityKind = EntityKind::User;

    fn id(&self) -> &Identifier {
        &self.id
    }
}

// ==================== Statuses ====================

/// Task status as returned by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub id: Identifier,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub slug: String,
}

/// Payload for `POST /task_statuses`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStatus {
    pub name: String,
    pub slug: String,
}

impl Entity for Status {
    const KIND: EntityKind = EntityKind::Status;

    fn id(&self) -> &Identifier {
        &self.id
    }
}

// ==================== Labels ====================

/// Label as returned by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub id: Identifier,
    #[serde(default)]
    pub name: String,
}

/// Payload for `POST /labels`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLabel {
    pub name: String,
}

impl Entity for Label {
    const KIND: EntityKind = EntityKind::Label;

    fn id(&self) -> &Identifier {
        &self.id
    }
}

// ==================== Tasks ====================

/// Task as returned by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Identifier,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub assignee_id: Option<Identifier>,
    #[serde(default)]
    pub status_id: Option<Identifier>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub label_ids: Vec<Identifier>,
}

/// Payload for `POST /tasks`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub content: String,
    pub assignee_id: Option<Identifier>,
    pub status_id: Option<Identifier>,
    #[serde(default)]
    pub label_ids: Vec<Identifier>,
}

impl Entity for Task {
    const KIND: EntityKind = EntityKind::Task;

    fn id(&self) -> &Identifier {
        &self.id
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Identifier>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<Identifier>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test_case("users", EntityKind::User)]
    #[test_case("status", EntityKind::Status)]
    #[test_case("task_statuses", EntityKind::Status)]
    #[test_case("Labels", EntityKind::Label)]
    #[test_case(" task ", EntityKind::Task)]
    fn test_parse_entity_kind(input: &str, expected: EntityKind) {
        assert_eq!(input.parse::<EntityKind>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_entity_kind() {
        let err = "projects".parse::<EntityKind>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown entity type: projects");
    }

    #[test]
    fn test_cleanup_order_puts_dependents_first() {
        assert_eq!(
            EntityKind::CLEANUP_ORDER.map(|k| k.as_str()),
            ["tasks", "labels", "statuses", "users"]
        );
    }

    #[test]
    fn test_item_endpoint() {
        assert_eq!(
            EntityKind::Status.item_endpoint(&Identifier::Int(7)),
            "/task_statuses/7"
        );
        assert_eq!(
            EntityKind::Task.item_endpoint(&Identifier::from("abc")),
            "/tasks/abc"
        );
    }

    #[test]
    fn test_identifier_from_record() {
        assert_eq!(
            Identifier::from_record(&json!({"id": 42})),
            Some(Identifier::Int(42))
        );
        assert_eq!(
            Identifier::from_record(&json!({"id": "u-1"})),
            Some(Identifier::Text("u-1".into()))
        );
        assert_eq!(Identifier::from_record(&json!({"name": "x"})), None);
    }

    #[test]
    fn test_new_user_uses_camel_case_names() {
        let user = NewUser {
            email: "a@example.com".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
        };
        let value = serde_json::to_value(&user).unwrap();
        assert_eq!(value["firstName"], "Ada");
        assert_eq!(value["lastName"], "Lovelace");
    }

    #[test]
    fn test_task_tolerates_null_label_ids() {
        let task: Task = serde_json::from_value(json!({
            "id": 3,
            "title": "T",
            "content": "C",
            "assignee_id": null,
            "status_id": 1,
            "label_ids": null,
        }))
        .unwrap();
        assert!(task.label_ids.is_empty());
        assert_eq!(task.status_id, Some(Identifier::Int(1)));
        assert_eq!(task.entity_ref().to_string(), "tasks 3");
    }
}
