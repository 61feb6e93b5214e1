//! External Integrations
//!
//! Client seams for the two systems of record, plus their adapters.
//!
//! # Clients
//!
//! - **PmClient**: production management entities (find/create/update, schema)
//! - **JiraClient**: Jira issues, projects, create metadata, users
//!
//! # Built-in Adapters
//!
//! - **pm**: `PmClient` over the `pm-api` REST client
//! - **jira**: `JiraClient` over the Jira REST API v2
//! - **memory**: in-memory backends for tests and dry runs
//!
//! Every client call is blocking and runs to completion. Timeouts belong to
//! the adapters; the sync engine never retries a failed call.

pub mod jira;
pub mod memory;
pub mod pm;

pub use jira::JiraAdapter;
pub use memory::{MemoryJira, MemoryPm};

use crate::Result;
use pm_api::{Entity, FieldSchema, Filter};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Production management client
pub trait PmClient: Send + Sync {
    /// Search entities, returning the requested fields plus `type` and `id`
    fn find(&self, entity_type: &str, filters: &[Filter], fields: &[&str]) -> Result<Vec<Entity>>;

    /// Search a single entity
    fn find_one(&self, entity_type: &str, filters: &[Filter], fields: &[&str]) -> Result<Option<Entity>> {
        Ok(self.find(entity_type, filters, fields)?.into_iter().next())
    }

    /// Create an entity
    fn create(&self, entity_type: &str, data: &Entity) -> Result<Entity>;

    /// Update fields on an entity
    fn update(&self, entity_type: &str, id: i64, data: &Entity) -> Result<Entity>;

    /// Field schema of an entity type
    fn schema_field_read(&self, entity_type: &str) -> Result<BTreeMap<String, FieldSchema>>;
}

/// Jira client
pub trait JiraClient: Send + Sync {
    /// Look up a project by key; `None` if it does not exist
    fn project(&self, key: &str) -> Result<Option<JiraProject>>;

    /// Fetch an issue by key; `None` if it does not exist
    fn issue(&self, key: &str) -> Result<Option<JiraIssue>>;

    /// Create an issue from a `fields` payload
    fn create_issue(&self, fields: &Map<String, Value>) -> Result<JiraIssue>;

    /// Update fields on an issue
    fn update_issue(&self, key: &str, fields: &Map<String, Value>) -> Result<()>;

    /// Move an issue to the named status.
    ///
    /// Returns `false` when no transition leads there.
    fn transition_issue(&self, key: &str, status: &str) -> Result<bool>;

    /// Create metadata (field ids to field descriptions) for an issue type
    fn createmeta(&self, project_key: &str, issue_type: &str) -> Result<BTreeMap<String, CreateMetaField>>;

    /// Search issues using JQL
    fn search_issues(&self, jql: &str, max_results: u32) -> Result<Vec<JiraIssue>>;

    /// Find an active user by email address
    fn find_user(&self, email: &str) -> Result<Option<JiraUser>>;

    /// Fetch a user by account id (or user name on server deployments)
    fn user(&self, id: &str) -> Result<Option<JiraUser>>;
}

/// JIRA project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JiraProject {
    pub key: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl JiraProject {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            id: None,
            name: None,
        }
    }
}

/// JIRA user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JiraUser {
    #[serde(rename = "displayName", default)]
    pub display_name: String,
    #[serde(rename = "accountId", default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(rename = "emailAddress", default)]
    pub email: Option<String>,
}

impl JiraUser {
    /// Stable identity used to compare users across events
    pub fn identity(&self) -> Option<&str> {
        self.account_id
            .as_deref()
            .or(self.name.as_deref())
            .or(self.key.as_deref())
    }

    /// Whether this user is the given login (account id, name or key)
    pub fn is(&self, login: &str) -> bool {
        [&self.account_id, &self.name, &self.key]
            .into_iter()
            .any(|candidate| candidate.as_deref() == Some(login))
    }

    /// Payload used to assign an issue to this user
    pub fn assignee_value(&self) -> Value {
        match (&self.account_id, &self.name) {
            (Some(id), _) => serde_json::json!({ "accountId": id }),
            (None, Some(name)) => serde_json::json!({ "name": name }),
            (None, None) => serde_json::json!({ "key": self.key }),
        }
    }
}

/// One field of an issue type's create metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMetaField {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "hasDefaultValue", default)]
    pub has_default_value: bool,
}

impl CreateMetaField {
    pub fn new(name: impl Into<String>, required: bool, has_default_value: bool) -> Self {
        Self {
            name: name.into(),
            required,
            has_default_value,
        }
    }

    /// Required at creation time with nothing to fall back on
    pub fn needs_value(&self) -> bool {
        self.required && !self.has_default_value
    }
}

/// JIRA issue representation.
///
/// Fields stay untyped: custom field ids vary per site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JiraIssue {
    pub key: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl JiraIssue {
    /// A field value, treating JSON null as absent
    pub fn field(&self, id: &str) -> Option<&Value> {
        self.fields.get(id).filter(|v| !v.is_null())
    }

    pub fn summary(&self) -> Option<&str> {
        self.field("summary").and_then(Value::as_str)
    }

    pub fn status_name(&self) -> Option<&str> {
        self.field("status")
            .and_then(|s| s.get("name"))
            .and_then(Value::as_str)
    }

    pub fn project_key(&self) -> Option<&str> {
        self.field("project")
            .and_then(|p| p.get("key"))
            .and_then(Value::as_str)
    }

    pub fn assignee(&self) -> Option<JiraUser> {
        self.field("assignee")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Convert a `customfield_12345` id into the `cf[12345]` JQL form
pub fn jql_field(field_id: &str) -> String {
    match field_id.strip_prefix("customfield_") {
        Some(number) => format!("cf[{}]", number),
        None => field_id.to_string(),
    }
}

/// Sanitize a value for safe use inside a quoted JQL string.
/// Only allows alphanumeric characters, hyphens, underscores, dots and spaces.
pub fn sanitize_jql_value(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ' '))
        .collect()
}
