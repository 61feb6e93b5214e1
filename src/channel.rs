//! Sync channels and their field mapping tables
//!
//! A channel binds one production management entity type to one Jira
//! issue type and declares which fields travel between them.

use crate::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Which way a mapped field is synced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Jira to production management only
    Inbound,
    /// Production management to Jira only
    Outbound,
    /// Both ways
    #[default]
    Bidirectional,
}

impl SyncDirection {
    pub fn to_jira(self) -> bool {
        matches!(self, SyncDirection::Outbound | SyncDirection::Bidirectional)
    }

    pub fn to_pm(self) -> bool {
        matches!(self, SyncDirection::Inbound | SyncDirection::Bidirectional)
    }
}

/// Representation of a scalar value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarFormat {
    #[default]
    Text,
    Number,
    Date,
    DateTime,
}

/// Data-type family of a mapped field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    /// Free text, numbers and dates; passed through or normalized
    Scalar {
        #[serde(default)]
        format: ScalarFormat,
    },
    /// Status-like values translated through a table (PM value -> Jira value)
    Enum { values: BTreeMap<String, String> },
    /// A list of entity links on the PM side (e.g. task assignees)
    MultiEntity,
}

impl FieldKind {
    pub fn text() -> Self {
        FieldKind::Scalar {
            format: ScalarFormat::Text,
        }
    }
}

fn default_on_create() -> bool {
    true
}

/// One row of a channel's field table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Production management field name, e.g. `sg_status_list`
    pub pm: String,

    /// Jira field id, e.g. `status` or `customfield_10010`
    pub jira: String,

    #[serde(flatten)]
    pub kind: FieldKind,

    #[serde(default)]
    pub direction: SyncDirection,

    /// Whether the field is filled in when creating the Jira issue
    #[serde(default = "default_on_create")]
    pub on_create: bool,
}

impl FieldMapping {
    pub fn new(pm: impl Into<String>, jira: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            pm: pm.into(),
            jira: jira.into(),
            kind,
            direction: SyncDirection::default(),
            on_create: true,
        }
    }

    pub fn with_direction(mut self, direction: SyncDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_on_create(mut self, on_create: bool) -> Self {
        self.on_create = on_create;
        self
    }
}

/// A named, statically configured sync rule set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncChannel {
    pub name: String,

    /// Production management entity type, e.g. "Task"
    pub pm_entity_type: String,

    /// Jira issue type name, e.g. "Task"
    pub issue_type: String,

    /// PM field used as the issue summary at creation time
    pub name_field: String,

    /// PM field used as the issue description at creation time
    pub description_field: Option<String>,

    pub fields: Vec<FieldMapping>,
}

impl SyncChannel {
    pub fn new(
        name: impl Into<String>,
        pm_entity_type: impl Into<String>,
        issue_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            pm_entity_type: pm_entity_type.into(),
            issue_type: issue_type.into(),
            name_field: "code".to_string(),
            description_field: None,
            fields: Vec::new(),
        }
    }

    /// Task <-> Task field table
    pub fn task_issue(name: impl Into<String>) -> Self {
        let statuses: BTreeMap<String, String> = [
            ("wtg", "Backlog"),
            ("rdy", "To Do"),
            ("ip", "In Progress"),
            ("rev", "In Review"),
            ("fin", "Done"),
        ]
        .into_iter()
        .map(|(pm, jira)| (pm.to_string(), jira.to_string()))
        .collect();

        Self {
            name: name.into(),
            pm_entity_type: "Task".to_string(),
            issue_type: "Task".to_string(),
            name_field: "content".to_string(),
            description_field: Some("sg_description".to_string()),
            fields: vec![
                FieldMapping::new("content", "summary", FieldKind::text()),
                FieldMapping::new("sg_description", "description", FieldKind::text()),
                FieldMapping::new("sg_status_list", "status", FieldKind::Enum { values: statuses })
                    .with_on_create(false),
                FieldMapping::new("task_assignees", "assignee", FieldKind::MultiEntity),
                FieldMapping::new(
                    "due_date",
                    "duedate",
                    FieldKind::Scalar {
                        format: ScalarFormat::Date,
                    },
                ),
            ],
        }
    }

    pub fn with_name_field(mut self, field: impl Into<String>) -> Self {
        self.name_field = field.into();
        self
    }

    pub fn with_description_field(mut self, field: impl Into<String>) -> Self {
        self.description_field = Some(field.into());
        self
    }

    /// Add a mapping, replacing any existing row for the same PM or Jira field
    pub fn with_field(mut self, mapping: FieldMapping) -> Self {
        self.fields
            .retain(|m| m.pm != mapping.pm && m.jira != mapping.jira);
        self.fields.push(mapping);
        self
    }

    /// Whether this channel handles the given PM entity type
    pub fn supports_entity_type(&self, entity_type: &str) -> bool {
        self.pm_entity_type == entity_type
    }

    /// Mapping for a PM field, if it is synced towards Jira
    pub fn outbound_mapping(&self, pm_field: &str) -> Option<&FieldMapping> {
        self.fields
            .iter()
            .find(|m| m.pm == pm_field && m.direction.to_jira())
    }

    /// Mapping for a Jira changelog field, if it is synced towards PM.
    ///
    /// Matches the field id first, then the display name case-insensitively.
    pub fn inbound_mapping(&self, field_id: Option<&str>, field: &str) -> Option<&FieldMapping> {
        let inbound = || self.fields.iter().filter(|m| m.direction.to_pm());
        if let Some(id) = field_id {
            if let Some(mapping) = inbound().find(|m| m.jira == id) {
                return Some(mapping);
            }
        }
        inbound().find(|m| m.jira.eq_ignore_ascii_case(field))
    }

    /// PM fields needed to sync an entity of this channel
    pub fn pm_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.name_field.as_str()];
        if let Some(ref description) = self.description_field {
            fields.push(description.as_str());
        }
        for mapping in &self.fields {
            if !fields.contains(&mapping.pm.as_str()) {
                fields.push(mapping.pm.as_str());
            }
        }
        fields
    }

    /// Check the table is usable; a bad table is a configuration error
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.name.is_empty() {
            problems.push("channel name is empty".to_string());
        }
        if self.pm_entity_type.is_empty() {
            problems.push("PM entity type is empty".to_string());
        }
        if self.issue_type.is_empty() {
            problems.push("Jira issue type is empty".to_string());
        }
        if self.name_field.is_empty() {
            problems.push("name field is empty".to_string());
        }

        let mut seen_pm = HashSet::new();
        let mut seen_jira = HashSet::new();
        for mapping in &self.fields {
            if mapping.pm.is_empty() || mapping.jira.is_empty() {
                problems.push(format!(
                    "field mapping '{}' -> '{}' has an empty side",
                    mapping.pm, mapping.jira
                ));
            }
            if !seen_pm.insert(mapping.pm.as_str()) {
                problems.push(format!("PM field '{}' is mapped twice", mapping.pm));
            }
            if !seen_jira.insert(mapping.jira.as_str()) {
                problems.push(format!("Jira field '{}' is mapped twice", mapping.jira));
            }
            if let FieldKind::Enum { ref values } = mapping.kind {
                if values.is_empty() {
                    problems.push(format!("enum field '{}' has no values", mapping.pm));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::Configuration(format!(
                "Invalid channel '{}': {}",
                self.name,
                problems.join("; ")
            )))
        }
    }
}
