//! Inbound change events
//!
//! Both payloads are parsed leniently: every key is optional so that
//! acceptance filters, not deserialization, decide what gets rejected.

use crate::integrations::{JiraIssue, JiraUser};
use pm_api::EntityRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Jira webhook events the bridge reacts to
pub const SUPPORTED_WEBHOOK_EVENTS: &[&str] = &["jira:issue_updated", "jira:issue_created"];

/// A change event emitted by the production management site
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PmEvent {
    #[serde(default, deserialize_with = "lenient_ref")]
    pub user: Option<EntityRef>,

    #[serde(default, deserialize_with = "lenient_ref")]
    pub project: Option<EntityRef>,

    #[serde(default)]
    pub meta: Option<PmEventMeta>,
}

/// What changed on the PM entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PmEventMeta {
    #[serde(default)]
    pub attribute_name: Option<String>,

    #[serde(default)]
    pub entity_id: Option<i64>,

    #[serde(default)]
    pub entity_type: Option<String>,

    /// e.g. "status_list", "multi_entity", "text"
    #[serde(default)]
    pub field_data_type: Option<String>,

    #[serde(default)]
    pub old_value: Value,

    #[serde(default)]
    pub new_value: Value,

    #[serde(default, deserialize_with = "lenient_refs")]
    pub added: Vec<EntityRef>,

    #[serde(default, deserialize_with = "lenient_refs")]
    pub removed: Vec<EntityRef>,

    /// e.g. "attribute_change"
    #[serde(rename = "type", default)]
    pub change_type: Option<String>,
}

impl PmEvent {
    pub fn new(project: EntityRef, user: EntityRef) -> Self {
        Self {
            user: Some(user),
            project: Some(project),
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: PmEventMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Name of the changed field, if the event says
    pub fn attribute_name(&self) -> Option<&str> {
        self.meta.as_ref()?.attribute_name.as_deref()
    }
}

impl PmEventMeta {
    /// A scalar attribute change
    pub fn attribute_change(attribute: impl Into<String>, old_value: Value, new_value: Value) -> Self {
        Self {
            attribute_name: Some(attribute.into()),
            old_value,
            new_value,
            change_type: Some("attribute_change".to_string()),
            ..Default::default()
        }
    }

    /// A multi-entity field change
    pub fn multi_entity_change(
        attribute: impl Into<String>,
        added: Vec<EntityRef>,
        removed: Vec<EntityRef>,
    ) -> Self {
        Self {
            attribute_name: Some(attribute.into()),
            field_data_type: Some("multi_entity".to_string()),
            added,
            removed,
            change_type: Some("attribute_change".to_string()),
            ..Default::default()
        }
    }
}

/// A Jira webhook payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JiraEvent {
    #[serde(rename = "webhookEvent", default)]
    pub webhook_event: Option<String>,

    #[serde(default, deserialize_with = "lenient_user")]
    pub user: Option<JiraUser>,

    #[serde(default)]
    pub changelog: Option<Changelog>,

    #[serde(default)]
    pub issue: Option<JiraIssue>,

    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl JiraEvent {
    pub fn is_supported(&self) -> bool {
        self.webhook_event
            .as_deref()
            .is_some_and(|name| SUPPORTED_WEBHOOK_EVENTS.contains(&name))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Changelog {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub items: Vec<ChangelogItem>,
}

/// One changed field in a Jira changelog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangelogItem {
    /// Display name, e.g. "summary" or "Status"
    pub field: String,

    #[serde(rename = "fieldId", default)]
    pub field_id: Option<String>,

    #[serde(rename = "fieldtype", default)]
    pub field_type: Option<String>,

    /// Raw previous value (ids, account ids, ISO dates)
    #[serde(default)]
    pub from: Option<String>,

    #[serde(rename = "fromString", default)]
    pub from_text: Option<String>,

    /// Raw new value
    #[serde(default)]
    pub to: Option<String>,

    #[serde(rename = "toString", default)]
    pub to_text: Option<String>,
}

impl ChangelogItem {
    pub fn new(field: impl Into<String>, from: Option<&str>, to: Option<&str>) -> Self {
        let field = field.into();
        Self {
            field_id: Some(field.clone()),
            field,
            field_type: Some("jira".to_string()),
            from_text: from.map(str::to_string),
            to_text: to.map(str::to_string),
            ..Default::default()
        }
    }
}

/// An entity link, or nothing if the value is not one
fn lenient_ref<'de, D>(deserializer: D) -> Result<Option<EntityRef>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(EntityRef::from_value(&value))
}

/// Entity links, skipping anything that is not one
fn lenient_refs<'de, D>(deserializer: D) -> Result<Vec<EntityRef>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value
        .as_array()
        .map(|items| items.iter().filter_map(EntityRef::from_value).collect())
        .unwrap_or_default())
}

fn lenient_user<'de, D>(deserializer: D) -> Result<Option<JiraUser>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}
