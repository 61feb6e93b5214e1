//! Field value translation
//!
//! Pure value mapping between the two sides, plus assembly and validation
//! of the payload used to create a Jira issue for a PM entity.

use crate::channel::{FieldKind, FieldMapping, ScalarFormat, SyncChannel};
use crate::integrations::{JiraIssue, JiraProject, JiraUser};
use crate::syncer::{LinkFields, SyncContext};
use crate::{BridgeError, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use pm_api::{Entity, EntityRef, Filter};
use serde_json::{Map, Value};
use tracing::debug;

/// Entity type PM users are stored as
pub const PM_USER_TYPE: &str = "HumanUser";

/// Jira fields to set when creating an issue
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreationData {
    fields: Map<String, Value>,
}

impl CreationData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

/// Translate a PM value into its Jira representation
pub fn map_value(mapping: &FieldMapping, value: &Value) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match mapping.kind {
        FieldKind::Scalar { format } => normalize(format, value, &mapping.pm),
        FieldKind::Enum { ref values } => {
            let text = enum_text(value, &mapping.pm)?;
            values
                .get(text)
                .map(|jira| Value::String(jira.clone()))
                .ok_or_else(|| unmapped(text, &mapping.pm))
        }
        FieldKind::MultiEntity => Err(BridgeError::Configuration(format!(
            "Field {} holds entities and cannot be mapped as a value",
            mapping.pm
        ))),
    }
}

/// Translate a Jira value into its PM representation.
///
/// Enum values are looked up in reverse; when several PM values map to the
/// same Jira value the first one in table order is used.
pub fn map_value_to_pm(mapping: &FieldMapping, value: &Value) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match mapping.kind {
        FieldKind::Scalar {
            format: ScalarFormat::Number,
        } => match value {
            Value::String(s) => parse_number(s.trim()).ok_or_else(|| {
                BridgeError::validation(format!("Invalid number '{}'", s), [mapping.jira.clone()])
            }),
            other => Ok(other.clone()),
        },
        FieldKind::Scalar { format } => normalize(format, value, &mapping.jira),
        FieldKind::Enum { ref values } => {
            let text = enum_text(value, &mapping.jira)?;
            values
                .iter()
                .find(|(_, jira)| jira.as_str() == text)
                .map(|(pm, _)| Value::String(pm.clone()))
                .ok_or_else(|| unmapped(text, &mapping.jira))
        }
        FieldKind::MultiEntity => Err(BridgeError::Configuration(format!(
            "Field {} holds users and cannot be mapped as a value",
            mapping.jira
        ))),
    }
}

fn enum_text<'a>(value: &'a Value, field: &str) -> Result<&'a str> {
    value
        .as_str()
        .or_else(|| value.get("name").and_then(Value::as_str))
        .ok_or_else(|| BridgeError::validation(format!("Invalid value {}", value), [field.to_string()]))
}

fn unmapped(value: &str, field: &str) -> BridgeError {
    BridgeError::validation(
        format!("Unable to map value '{}' for field", value),
        [field.to_string()],
    )
}

fn parse_number(s: &str) -> Option<Value> {
    if let Ok(n) = s.parse::<i64>() {
        return Some(Value::from(n));
    }
    s.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

fn normalize(format: ScalarFormat, value: &Value, field: &str) -> Result<Value> {
    match format {
        ScalarFormat::Text | ScalarFormat::Number => Ok(value.clone()),
        ScalarFormat::Date => {
            let text = date_text(value, field)?;
            parse_date(text)
                .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                .ok_or_else(|| invalid_date(text, field))
        }
        ScalarFormat::DateTime => {
            let text = date_text(value, field)?;
            parse_datetime(text)
                .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)))
                .ok_or_else(|| invalid_date(text, field))
        }
    }
}

fn date_text<'a>(value: &'a Value, field: &str) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| BridgeError::validation(format!("Invalid date {}", value), [field.to_string()]))
}

fn invalid_date(text: &str, field: &str) -> BridgeError {
    BridgeError::validation(format!("Invalid date '{}'", text), [field.to_string()])
}

/// Parse a calendar date, accepting full timestamps too
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_datetime(text).map(|dt| dt.date_naive()))
}

/// Parse a timestamp as RFC 3339 or in Jira's `2018-12-18T06:15:05.626-0500` form
pub fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
}

/// The PM entity an issue points back to, read from its custom fields
pub fn linked_entity(links: &LinkFields, issue: &JiraIssue) -> Option<EntityRef> {
    let entity_type = issue.field(&links.entity_type_field)?.as_str()?;
    let id = match issue.field(&links.entity_id_field)? {
        Value::String(s) => s.trim().parse().ok()?,
        other => other.as_i64()?,
    };
    Some(EntityRef::new(entity_type, id))
}

/// Find the Jira account of a PM user, matched by email
pub fn resolve_jira_user(ctx: &SyncContext<'_>, user: &EntityRef) -> Result<Option<JiraUser>> {
    let record = ctx
        .pm
        .find_one(&user.entity_type, &[Filter::is("id", user.id)], &["email"])?;
    let Some(email) = record
        .as_ref()
        .and_then(|r| r.get("email"))
        .and_then(Value::as_str)
        .filter(|e| !e.is_empty())
    else {
        debug!(user = %user, "PM user has no email, cannot match a Jira account");
        return Ok(None);
    };

    let jira_user = ctx.jira.find_user(email)?;
    if jira_user.is_none() {
        debug!(user = %user, email = %email, "No Jira account for PM user");
    }
    Ok(jira_user)
}

/// Find the PM user of a Jira account, matched by email
pub fn resolve_pm_user(ctx: &SyncContext<'_>, user: &JiraUser) -> Result<Option<EntityRef>> {
    let email = match user.email.clone() {
        Some(email) => Some(email),
        None => match user.identity() {
            Some(id) => ctx.jira.user(id)?.and_then(|u| u.email),
            None => None,
        },
    };
    let Some(email) = email.filter(|e| !e.is_empty()) else {
        debug!(user = %user.display_name, "Jira account has no visible email, cannot match a PM user");
        return Ok(None);
    };

    let record = ctx
        .pm
        .find_one(PM_USER_TYPE, &[Filter::is("email", email.as_str())], &["email"])?;
    Ok(record.as_ref().and_then(|r| {
        let id = pm_api::entity_id(r)?;
        Some(EntityRef::new(PM_USER_TYPE, id))
    }))
}

/// Resolve a list of PM users, dropping those without a Jira account
pub fn resolve_jira_users(ctx: &SyncContext<'_>, users: &[EntityRef]) -> Result<Vec<JiraUser>> {
    let mut resolved = Vec::new();
    for user in users {
        if let Some(jira_user) = resolve_jira_user(ctx, user)? {
            resolved.push(jira_user);
        }
    }
    Ok(resolved)
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn entity_text<'a>(entity: &'a Entity, field: &str) -> Option<&'a str> {
    entity
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Assemble the fields for a new issue and check them against the
/// issue type's create metadata.
///
/// Fails with a validation error listing every required field (by display
/// name) that has no value and no server-side default.
pub fn build_creation_data(
    ctx: &SyncContext<'_>,
    channel: &SyncChannel,
    entity: &Entity,
    project: &JiraProject,
) -> Result<CreationData> {
    let link = EntityRef::from_value(&Value::Object(entity.clone())).ok_or_else(|| {
        BridgeError::RemoteState("Entity record is missing its type or id".to_string())
    })?;

    let mut data = CreationData::new();
    data.insert("project", serde_json::json!({ "key": project.key }));
    data.insert("issuetype", serde_json::json!({ "name": channel.issue_type }));

    let summary = entity_text(entity, &channel.name_field)
        .map(str::to_string)
        .unwrap_or_else(|| link.to_string());
    data.insert("summary", Value::String(summary));

    let description = channel
        .description_field
        .as_deref()
        .and_then(|field| entity_text(entity, field))
        .unwrap_or_default();
    data.insert("description", Value::String(description.to_string()));

    data.insert(ctx.links.entity_id_field.clone(), Value::String(link.id.to_string()));
    data.insert(ctx.links.entity_type_field.clone(), Value::String(link.entity_type.clone()));

    for mapping in channel
        .fields
        .iter()
        .filter(|m| m.on_create && m.direction.to_jira())
    {
        if data.contains(&mapping.jira) && !matches!(mapping.jira.as_str(), "summary" | "description") {
            continue;
        }
        let value = entity.get(&mapping.pm).unwrap_or(&Value::Null);
        if is_empty_value(value) {
            continue;
        }
        let mapped = match mapping.kind {
            FieldKind::MultiEntity => {
                let users: Vec<EntityRef> = value
                    .as_array()
                    .map(|items| items.iter().filter_map(EntityRef::from_value).collect())
                    .unwrap_or_default();
                match resolve_jira_users(ctx, &users)?.first() {
                    Some(user) => user.assignee_value(),
                    None => continue,
                }
            }
            _ => map_value(mapping, value)?,
        };
        if !is_empty_value(&mapped) {
            data.insert(mapping.jira.clone(), mapped);
        }
    }

    let meta = ctx.jira.createmeta(&project.key, &channel.issue_type)?;
    let missing: Vec<String> = meta
        .iter()
        .filter(|(id, field)| field.needs_value() && !data.contains(id))
        .map(|(_, field)| field.name.clone())
        .collect();
    if !missing.is_empty() {
        return Err(BridgeError::validation(
            format!(
                "The following data is missing in order to create a Jira {} Issue",
                channel.issue_type
            ),
            missing,
        ));
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::SyncDirection;
    use crate::integrations::{CreateMetaField, MemoryJira, MemoryPm, PmClient};
    use crate::syncer::Identities;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn status_mapping() -> FieldMapping {
        let values: BTreeMap<String, String> = [("wtg", "Backlog"), ("hld", "Backlog"), ("ip", "In Progress")]
            .into_iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        FieldMapping::new("sg_status_list", "status", FieldKind::Enum { values })
    }

    fn scalar(format: ScalarFormat) -> FieldMapping {
        FieldMapping::new("due_date", "duedate", FieldKind::Scalar { format })
    }

    #[test]
    fn test_enum_mapping_both_ways() {
        let mapping = status_mapping();
        assert_eq!(map_value(&mapping, &json!("ip")).unwrap(), json!("In Progress"));
        // Reverse lookup picks the first PM value in table order
        assert_eq!(map_value_to_pm(&mapping, &json!("Backlog")).unwrap(), json!("hld"));
        assert_eq!(map_value_to_pm(&mapping, &json!({"name": "In Progress"})).unwrap(), json!("ip"));
    }

    #[test]
    fn test_unmapped_enum_is_a_validation_error() {
        let err = map_value(&status_mapping(), &json!("omt")).unwrap_err();
        assert_eq!(err.fields(), ["sg_status_list".to_string()]);
        assert!(err.to_string().contains("'omt'"));

        let err = map_value_to_pm(&status_mapping(), &json!("Done")).unwrap_err();
        assert_eq!(err.fields(), ["status".to_string()]);
    }

    #[test]
    fn test_scalars_pass_through() {
        let text = FieldMapping::new("content", "summary", FieldKind::text());
        assert_eq!(map_value(&text, &json!("foo bar")).unwrap(), json!("foo bar"));
        assert_eq!(map_value(&text, &Value::Null).unwrap(), Value::Null);

        let number = FieldMapping::new("est_in_mins", "customfield_1", FieldKind::Scalar {
            format: ScalarFormat::Number,
        });
        assert_eq!(map_value(&number, &json!(42)).unwrap(), json!(42));
        assert_eq!(map_value_to_pm(&number, &json!("42")).unwrap(), json!(42));
        assert_eq!(map_value_to_pm(&number, &json!("1.5")).unwrap(), json!(1.5));
        assert!(map_value_to_pm(&number, &json!("many")).is_err());
    }

    #[test]
    fn test_date_normalization() {
        let date = scalar(ScalarFormat::Date);
        assert_eq!(map_value(&date, &json!("2018-12-18")).unwrap(), json!("2018-12-18"));
        assert_eq!(
            map_value(&date, &json!("2018-12-18T06:15:05.626-0500")).unwrap(),
            json!("2018-12-18")
        );
        assert!(map_value(&date, &json!("18/Dec/18")).is_err());

        let datetime = scalar(ScalarFormat::DateTime);
        assert_eq!(
            map_value_to_pm(&datetime, &json!("2018-12-18T06:15:05.626-0500")).unwrap(),
            json!("2018-12-18T11:15:05.626Z")
        );
        assert_eq!(
            map_value(&datetime, &json!("2018-12-18")).unwrap(),
            json!("2018-12-18T00:00:00.000Z")
        );
    }

    #[test]
    fn test_linked_entity() {
        let links = LinkFields::default();
        let issue: JiraIssue = serde_json::from_value(json!({
            "key": "ST3-4",
            "fields": {"customfield_11501": "11794", "customfield_11502": "Task"}
        }))
        .unwrap();
        assert_eq!(linked_entity(&links, &issue), Some(EntityRef::new("Task", 11794)));

        let numeric: JiraIssue = serde_json::from_value(json!({
            "key": "ST3-5",
            "fields": {"customfield_11501": 7, "customfield_11502": "Shot"}
        }))
        .unwrap();
        assert_eq!(linked_entity(&links, &numeric), Some(EntityRef::new("Shot", 7)));

        let unlinked: JiraIssue = serde_json::from_value(json!({"key": "ST3-6"})).unwrap();
        assert!(linked_entity(&links, &unlinked).is_none());
    }

    fn entity(value: Value) -> Entity {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_creation_data() {
        let pm = MemoryPm::new();
        let jira = MemoryJira::new();
        let identities = Identities::new(EntityRef::new("ApiUser", 1), "shotgun-synch");
        let links = LinkFields::default();
        let ctx = SyncContext::new(&pm, &jira, &identities, &links);

        pm.add(PM_USER_TYPE, entity(json!({"id": 1, "email": "ford@blah.com"})));
        jira.add_user(JiraUser {
            display_name: "Ford Prefect".to_string(),
            account_id: Some("557058:ford".to_string()),
            email: Some("ford@blah.com".to_string()),
            ..Default::default()
        });

        let channel = SyncChannel::task_issue("task_issue")
            .with_field(FieldMapping::new("sg_notes", "customfield_9", FieldKind::text())
                .with_direction(SyncDirection::Inbound));
        let task = entity(json!({
            "type": "Task",
            "id": 11794,
            "content": "",
            "sg_description": "Do it",
            "sg_status_list": "ip",
            "task_assignees": [{"type": "HumanUser", "id": 1}],
            "due_date": "2018-12-20",
            "sg_notes": "inbound only"
        }));

        let data = build_creation_data(&ctx, &channel, &task, &JiraProject::new("ST3")).unwrap();
        assert_eq!(data.get("summary"), Some(&json!("Task (11794)")));
        assert_eq!(data.get("description"), Some(&json!("Do it")));
        assert_eq!(data.get("customfield_11501"), Some(&json!("11794")));
        assert_eq!(data.get("customfield_11502"), Some(&json!("Task")));
        assert_eq!(data.get("assignee"), Some(&json!({"accountId": "557058:ford"})));
        assert_eq!(data.get("duedate"), Some(&json!("2018-12-20")));
        assert!(!data.contains("status"));
        assert!(!data.contains("customfield_9"));
    }

    #[test]
    fn test_creation_data_missing_required_fields() {
        let pm = MemoryPm::new();
        let jira = MemoryJira::new();
        let identities = Identities::new(EntityRef::new("ApiUser", 1), "shotgun-synch");
        let links = LinkFields::default();
        let ctx = SyncContext::new(&pm, &jira, &identities, &links);

        let meta: BTreeMap<String, CreateMetaField> = [
            ("faked", CreateMetaField::new("Faked", true, false)),
            ("other", CreateMetaField::new("Another", true, false)),
            ("reporter", CreateMetaField::new("Reporter", true, true)),
        ]
        .into_iter()
        .map(|(id, f)| (id.to_string(), f))
        .collect();
        jira.set_createmeta(meta);

        let task = entity(json!({"type": "Task", "id": 2, "content": "Task One/2"}));
        let err = build_creation_data(&ctx, &SyncChannel::task_issue("t"), &task, &JiraProject::new("ST3"))
            .unwrap_err();

        assert_eq!(err.fields(), ["Another".to_string(), "Faked".to_string()]);
        assert_eq!(
            err.to_string(),
            r#"The following data is missing in order to create a Jira Task Issue: ["Another", "Faked"]"#
        );
        assert!(jira.issues().is_empty());
        assert!(pm.find("Task", &[], &[]).unwrap().is_empty());
    }
}
