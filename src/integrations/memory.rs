//! In-memory backends
//!
//! `MemoryPm` and `MemoryJira` keep everything in process. They back the
//! test suite and `--dry-run`, and can be mutated from the outside to
//! simulate edits made directly in either system.

use super::{CreateMetaField, JiraClient, JiraIssue, JiraProject, JiraUser};
use crate::integrations::PmClient;
use crate::{BridgeError, Result};
use pm_api::{Entity, EntityRef, FieldSchema, Filter};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Default)]
struct PmState {
    entities: BTreeMap<String, BTreeMap<i64, Entity>>,
    schemas: BTreeMap<String, BTreeMap<String, FieldSchema>>,
    last_id: i64,
    writes: usize,
}

/// In-memory production management site
#[derive(Debug, Default)]
pub struct MemoryPm {
    state: Mutex<PmState>,
}

impl MemoryPm {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, PmState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store an entity, assigning an id when the record has none
    pub fn add(&self, entity_type: &str, mut entity: Entity) -> EntityRef {
        let mut state = self.state();
        let id = match entity.get("id").and_then(Value::as_i64) {
            Some(id) => id,
            None => state.last_id + 1,
        };
        state.last_id = state.last_id.max(id);
        entity.insert("type".to_string(), Value::from(entity_type));
        entity.insert("id".to_string(), Value::from(id));
        state
            .entities
            .entry(entity_type.to_string())
            .or_default()
            .insert(id, entity);
        EntityRef::new(entity_type, id)
    }

    /// Declare a schema field explicitly
    pub fn add_field(&self, entity_type: &str, field: &str, schema: FieldSchema) {
        self.state()
            .schemas
            .entry(entity_type.to_string())
            .or_default()
            .insert(field.to_string(), schema);
    }

    /// Full stored record
    pub fn get(&self, entity_type: &str, id: i64) -> Option<Entity> {
        self.state()
            .entities
            .get(entity_type)
            .and_then(|records| records.get(&id))
            .cloned()
    }

    /// Edit a field directly, bypassing the write counter
    pub fn set(&self, entity_type: &str, id: i64, field: &str, value: Value) {
        if let Some(entity) = self
            .state()
            .entities
            .get_mut(entity_type)
            .and_then(|records| records.get_mut(&id))
        {
            entity.insert(field.to_string(), value);
        }
    }

    /// Number of create/update calls served
    pub fn write_count(&self) -> usize {
        self.state().writes
    }
}

fn project(entity: &Entity, fields: &[&str]) -> Entity {
    let mut record = Map::new();
    for field in fields {
        record.insert(
            field.to_string(),
            entity.get(*field).cloned().unwrap_or(Value::Null),
        );
    }
    for key in ["type", "id"] {
        if let Some(value) = entity.get(key) {
            record.insert(key.to_string(), value.clone());
        }
    }
    record
}

fn inferred_data_type(value: &Value) -> &'static str {
    match value {
        Value::Number(_) => "number",
        Value::Bool(_) => "checkbox",
        Value::Array(_) => "multi_entity",
        Value::Object(_) => "entity",
        Value::String(_) | Value::Null => "text",
    }
}

impl PmClient for MemoryPm {
    fn find(&self, entity_type: &str, filters: &[Filter], fields: &[&str]) -> Result<Vec<Entity>> {
        let state = self.state();
        let Some(records) = state.entities.get(entity_type) else {
            return Ok(Vec::new());
        };
        Ok(records
            .values()
            .filter(|entity| filters.iter().all(|f| f.matches(entity)))
            .map(|entity| project(entity, fields))
            .collect())
    }

    fn create(&self, entity_type: &str, data: &Entity) -> Result<Entity> {
        let mut entity = data.clone();
        entity.remove("id");
        let link = self.add(entity_type, entity);
        self.state().writes += 1;
        self.get(entity_type, link.id)
            .ok_or_else(|| pm_api::Error::NotFound(link.to_string()).into())
    }

    fn update(&self, entity_type: &str, id: i64, data: &Entity) -> Result<Entity> {
        let mut state = self.state();
        let entity = state
            .entities
            .get_mut(entity_type)
            .and_then(|records| records.get_mut(&id))
            .ok_or_else(|| {
                BridgeError::from(pm_api::Error::NotFound(format!("{} ({})", entity_type, id)))
            })?;
        for (field, value) in data {
            if field != "type" && field != "id" {
                entity.insert(field.clone(), value.clone());
            }
        }
        let updated = entity.clone();
        state.writes += 1;
        debug!(entity_type = %entity_type, entity_id = id, fields = ?data.keys().collect::<Vec<_>>(), "Updated in-memory entity");
        Ok(updated)
    }

    fn schema_field_read(&self, entity_type: &str) -> Result<BTreeMap<String, FieldSchema>> {
        let state = self.state();
        let mut schema = BTreeMap::new();
        if let Some(records) = state.entities.get(entity_type) {
            for entity in records.values() {
                for (field, value) in entity {
                    if field == "type" {
                        continue;
                    }
                    schema.entry(field.clone()).or_insert_with(|| FieldSchema {
                        name: field.clone(),
                        data_type: inferred_data_type(value).to_string(),
                        editable: field != "id",
                    });
                }
            }
        }
        if let Some(declared) = state.schemas.get(entity_type) {
            schema.extend(declared.clone());
        }
        Ok(schema)
    }
}

#[derive(Debug, Default)]
struct JiraState {
    projects: BTreeMap<String, JiraProject>,
    issues: BTreeMap<String, JiraIssue>,
    users: Vec<JiraUser>,
    createmeta: Option<BTreeMap<String, CreateMetaField>>,
    counters: BTreeMap<String, u64>,
    last_id: u64,
    writes: usize,
}

impl JiraState {
    /// Expand an `{accountId|name|key}` reference into the full user object
    fn resolve_user(&self, value: &Value) -> Value {
        let login = ["accountId", "name", "key"]
            .iter()
            .find_map(|k| value.get(*k).and_then(Value::as_str));
        match login.and_then(|login| self.users.iter().find(|u| u.is(login))) {
            Some(user) => serde_json::to_value(user).unwrap_or(Value::Null),
            None => value.clone(),
        }
    }

    fn apply(&self, issue: &mut JiraIssue, fields: &Map<String, Value>) {
        for (field, value) in fields {
            let value = if field == "assignee" && !value.is_null() {
                self.resolve_user(value)
            } else {
                value.clone()
            };
            issue.fields.insert(field.clone(), value);
        }
    }
}

/// In-memory Jira site
#[derive(Debug, Default)]
pub struct MemoryJira {
    state: Mutex<JiraState>,
}

impl MemoryJira {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, JiraState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the known projects
    pub fn set_projects<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state();
        state.projects = keys
            .into_iter()
            .map(|key| {
                let project = JiraProject::new(key);
                (project.key.clone(), project)
            })
            .collect();
    }

    pub fn add_user(&self, user: JiraUser) {
        self.state().users.push(user);
    }

    /// Override the create metadata returned for every issue type
    pub fn set_createmeta(&self, fields: BTreeMap<String, CreateMetaField>) {
        self.state().createmeta = Some(fields);
    }

    /// Edit an issue directly, as a person would in the Jira UI
    pub fn set_issue_field(&self, key: &str, field: &str, value: Value) {
        let mut state = self.state();
        let value = if field == "assignee" && !value.is_null() {
            state.resolve_user(&value)
        } else {
            value
        };
        if let Some(issue) = state.issues.get_mut(key) {
            issue.fields.insert(field.to_string(), value);
        }
    }

    pub fn issues(&self) -> Vec<JiraIssue> {
        self.state().issues.values().cloned().collect()
    }

    /// Number of create/update/transition calls served
    pub fn write_count(&self) -> usize {
        self.state().writes
    }
}

/// Create metadata used when no override is set
pub fn default_createmeta() -> BTreeMap<String, CreateMetaField> {
    [
        ("project", CreateMetaField::new("Project", true, false)),
        ("issuetype", CreateMetaField::new("Issue Type", true, false)),
        ("summary", CreateMetaField::new("Summary", true, false)),
        ("reporter", CreateMetaField::new("Reporter", true, true)),
        ("description", CreateMetaField::new("Description", false, false)),
        ("assignee", CreateMetaField::new("Assignee", false, false)),
        ("duedate", CreateMetaField::new("Due Date", false, false)),
    ]
    .into_iter()
    .map(|(id, field)| (id.to_string(), field))
    .collect()
}

/// One `field = value` clause of the JQL subset we understand
#[derive(Debug, PartialEq)]
struct Clause {
    field: String,
    value: String,
}

fn parse_jql(jql: &str) -> Result<Vec<Clause>> {
    let upper = jql.to_ascii_uppercase();
    let query = match upper.find("ORDER BY") {
        Some(pos) => &jql[..pos],
        None => jql,
    };

    let mut clauses = Vec::new();
    for part in query.split(" AND ").map(str::trim).filter(|p| !p.is_empty()) {
        let (field, value) = part
            .split_once('=')
            .ok_or_else(|| BridgeError::RemoteState(format!("Unsupported JQL clause: {}", part)))?;
        clauses.push(Clause {
            field: field.trim().to_string(),
            value: value.trim().trim_matches('"').to_string(),
        });
    }
    Ok(clauses)
}

fn clause_matches(issue: &JiraIssue, clause: &Clause) -> bool {
    let field = clause.field.as_str();
    let actual = match field {
        "key" => Some(issue.key.clone()),
        "project" => issue.project_key().map(str::to_string),
        "issuetype" => issue
            .field("issuetype")
            .and_then(|t| t.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => {
            let id = match field
                .strip_prefix("cf[")
                .and_then(|rest| rest.strip_suffix(']'))
            {
                Some(number) => format!("customfield_{}", number),
                None => field.to_string(),
            };
            issue.field(&id).map(|value| match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        }
    };
    actual.is_some_and(|actual| actual.eq_ignore_ascii_case(&clause.value))
}

impl JiraClient for MemoryJira {
    fn project(&self, key: &str) -> Result<Option<JiraProject>> {
        Ok(self.state().projects.get(key).cloned())
    }

    fn issue(&self, key: &str) -> Result<Option<JiraIssue>> {
        Ok(self.state().issues.get(key).cloned())
    }

    fn create_issue(&self, fields: &Map<String, Value>) -> Result<JiraIssue> {
        let mut state = self.state();

        let project_key = fields
            .get("project")
            .and_then(|p| p.get("key"))
            .and_then(Value::as_str)
            .filter(|key| state.projects.contains_key(*key))
            .map(str::to_string)
            .ok_or_else(|| {
                BridgeError::RemoteState("JIRA rejected creating issue: unknown project".to_string())
            })?;

        let meta = state.createmeta.clone().unwrap_or_else(default_createmeta);
        let missing: Vec<&str> = meta
            .iter()
            .filter(|(id, field)| field.needs_value() && !fields.contains_key(*id))
            .map(|(_, field)| field.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(BridgeError::RemoteState(format!(
                "JIRA rejected creating issue: {} required",
                missing.join(", ")
            )));
        }

        let counter = state.counters.entry(project_key.clone()).or_insert(0);
        *counter += 1;
        let key = format!("{}-{}", project_key, counter);
        state.last_id += 1;

        let mut issue = JiraIssue {
            key: key.clone(),
            id: state.last_id.to_string(),
            fields: Map::new(),
        };
        issue
            .fields
            .insert("status".to_string(), json!({ "name": "Backlog" }));
        issue.fields.insert("assignee".to_string(), Value::Null);
        state.apply(&mut issue, fields);

        state.issues.insert(key, issue.clone());
        state.writes += 1;
        Ok(issue)
    }

    fn update_issue(&self, key: &str, fields: &Map<String, Value>) -> Result<()> {
        let mut state = self.state();
        let mut issue = state
            .issues
            .get(key)
            .cloned()
            .ok_or_else(|| BridgeError::RemoteState(format!("Issue {} does not exist", key)))?;
        state.apply(&mut issue, fields);
        state.issues.insert(key.to_string(), issue);
        state.writes += 1;
        Ok(())
    }

    fn transition_issue(&self, key: &str, status: &str) -> Result<bool> {
        let mut state = self.state();
        let issue = state
            .issues
            .get_mut(key)
            .ok_or_else(|| BridgeError::RemoteState(format!("Issue {} does not exist", key)))?;
        issue
            .fields
            .insert("status".to_string(), json!({ "name": status }));
        state.writes += 1;
        Ok(true)
    }

    fn createmeta(&self, _project_key: &str, _issue_type: &str) -> Result<BTreeMap<String, CreateMetaField>> {
        Ok(self
            .state()
            .createmeta
            .clone()
            .unwrap_or_else(default_createmeta))
    }

    fn search_issues(&self, jql: &str, max_results: u32) -> Result<Vec<JiraIssue>> {
        let clauses = parse_jql(jql)?;
        Ok(self
            .state()
            .issues
            .values()
            .filter(|issue| clauses.iter().all(|c| clause_matches(issue, c)))
            .take(max_results as usize)
            .cloned()
            .collect())
    }

    fn find_user(&self, email: &str) -> Result<Option<JiraUser>> {
        Ok(self
            .state()
            .users
            .iter()
            .find(|u| {
                u.email
                    .as_deref()
                    .is_some_and(|e| e.eq_ignore_ascii_case(email))
            })
            .cloned())
    }

    fn user(&self, id: &str) -> Result<Option<JiraUser>> {
        Ok(self.state().users.iter().find(|u| u.is(id)).cloned())
    }
}
