//! Production management REST API wrapper for Rust
//!
//! A typed, blocking interface to the production management platform's
//! REST API: entity search, creation, updates and field schema reads.
//!
//! # Example
//!
//! ```no_run
//! use pm_api::{Filter, PmApi};
//!
//! let api = PmApi::new("https://studio.example.com", "jira-bridge", "secret")?;
//!
//! // Find a Task and read a couple of fields
//! let task = api.find_one("Task", &[Filter::is("id", 2)], &["content", "project"])?;
//!
//! // Update it
//! if let Some(task) = task {
//!     let mut data = pm_api::Entity::new();
//!     data.insert("sg_jira_key".into(), "ABC-12".into());
//!     api.update("Task", pm_api::entity_id(&task).unwrap_or_default(), &data)?;
//! }
//! # Ok::<(), pm_api::Error>(())
//! ```

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Per-request timeout for reads
const READ_TIMEOUT: Duration = Duration::from_secs(20);
/// Per-request timeout for create/update operations
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when talking to the production management API
#[derive(Error, Debug)]
pub enum Error {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("API error: HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether re-delivering the same request later could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(e) => e.is_connect() || e.is_timeout(),
            Error::RateLimited(_) => true,
            Error::Api { status, .. } => (500..=599).contains(status),
            Error::Auth(_) | Error::NotFound(_) | Error::Json(_) => false,
        }
    }
}

/// Result type for production management operations
pub type Result<T> = std::result::Result<T, Error>;

/// A flattened entity record: field name to value, always carrying
/// `type` and `id` when read back from the server.
pub type Entity = Map<String, Value>;

/// Read the numeric id of an entity record
pub fn entity_id(entity: &Entity) -> Option<i64> {
    entity.get("id").and_then(Value::as_i64)
}

/// A typed `{type, id}` link to an entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: i64,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, id: i64) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
        }
    }

    /// Extract a link from any JSON object carrying `type` and `id`.
    ///
    /// Extra keys (name, status, ...) are ignored.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self {
            entity_type: obj.get("type")?.as_str()?.to_string(),
            id: obj.get("id")?.as_i64()?,
        })
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({ "type": self.entity_type, "id": self.id })
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.entity_type, self.id)
    }
}

/// Filter operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Is,
    IsNot,
    In,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Is => write!(f, "is"),
            Operator::IsNot => write!(f, "is_not"),
            Operator::In => write!(f, "in"),
        }
    }
}

/// A single `[field, operator, value]` search filter
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

impl Filter {
    pub fn is(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator: Operator::Is,
            value: value.into(),
        }
    }

    pub fn is_not(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator: Operator::IsNot,
            value: value.into(),
        }
    }

    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            operator: Operator::In,
            value: Value::Array(values),
        }
    }

    /// Evaluate the filter against a local record.
    ///
    /// Entity links compare on `type` and `id` only; string comparisons
    /// are case-insensitive, like the server does for `is`.
    pub fn matches(&self, entity: &Entity) -> bool {
        let actual = entity.get(&self.field).unwrap_or(&Value::Null);
        match self.operator {
            Operator::Is => values_equal(actual, &self.value),
            Operator::IsNot => !values_equal(actual, &self.value),
            Operator::In => self
                .value
                .as_array()
                .map(|values| values.iter().any(|v| values_equal(actual, v)))
                .unwrap_or(false),
        }
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        (&self.field, self.operator, &self.value).serialize(serializer)
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.eq_ignore_ascii_case(y),
        (Value::Object(_), Value::Object(_)) => {
            match (EntityRef::from_value(a), EntityRef::from_value(b)) {
                (Some(x), Some(y)) => x == y,
                _ => a == b,
            }
        }
        _ => a == b,
    }
}

/// Schema description for one entity field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Display name, e.g. "Jira Key"
    pub name: String,
    /// Data type, e.g. "text", "status_list", "multi_entity"
    pub data_type: String,
    #[serde(default = "default_editable")]
    pub editable: bool,
}

fn default_editable() -> bool {
    true
}

// --- Wire formats ---

#[derive(Debug, Deserialize)]
struct RecordEnvelope {
    #[serde(rename = "type")]
    entity_type: String,
    id: i64,
    #[serde(default)]
    attributes: Map<String, Value>,
    #[serde(default)]
    relationships: Map<String, Value>,
}

impl RecordEnvelope {
    /// Flatten attributes and relationship data into a single record
    fn into_entity(self) -> Entity {
        let mut entity = self.attributes;
        for (field, rel) in self.relationships {
            let data = rel.get("data").cloned().unwrap_or(Value::Null);
            entity.insert(field, data);
        }
        entity.insert("type".to_string(), Value::String(self.entity_type));
        entity.insert("id".to_string(), Value::from(self.id));
        entity
    }
}

#[derive(Debug, Deserialize)]
struct SingleResponse {
    data: RecordEnvelope,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    data: Vec<RecordEnvelope>,
}

#[derive(Debug, Deserialize)]
struct SchemaValue<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct SchemaEntry {
    name: SchemaValue<String>,
    data_type: SchemaValue<String>,
    #[serde(default)]
    editable: Option<SchemaValue<bool>>,
}

#[derive(Debug, Deserialize)]
struct SchemaResponse {
    data: BTreeMap<String, SchemaEntry>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    filters: &'a [Filter],
    fields: String,
}

/// Production management REST client
#[derive(Debug)]
pub struct PmApi {
    client: reqwest::blocking::Client,
    base_url: String,
    script_name: String,
    script_key: String,
    token: Mutex<Option<String>>,
}

impl PmApi {
    /// Create a new client. No request is made until the first call.
    pub fn new(
        url: impl AsRef<str>,
        script_name: impl Into<String>,
        script_key: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(WRITE_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: format!("{}/api/v1", url.as_ref().trim_end_matches('/')),
            script_name: script_name.into(),
            script_key: script_key.into(),
            token: Mutex::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    // --- Entity operations ---

    /// Search entities of the given type
    pub fn find(&self, entity_type: &str, filters: &[Filter], fields: &[&str]) -> Result<Vec<Entity>> {
        let url = format!("{}/entity/{}/_search", self.base_url, entity_type);
        let body = SearchRequest {
            filters,
            fields: fields.join(","),
        };

        debug!(entity_type = %entity_type, filters = filters.len(), "Searching entities");

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.access_token()?)
            .json(&body)
            .timeout(READ_TIMEOUT)
            .send()?;
        let response = check_status(response, entity_type)?;
        let list: ListResponse = response.json()?;
        Ok(list.data.into_iter().map(RecordEnvelope::into_entity).collect())
    }

    /// Search a single entity, returning the first match
    pub fn find_one(&self, entity_type: &str, filters: &[Filter], fields: &[&str]) -> Result<Option<Entity>> {
        Ok(self.find(entity_type, filters, fields)?.into_iter().next())
    }

    /// Create an entity and return the created record
    pub fn create(&self, entity_type: &str, data: &Entity) -> Result<Entity> {
        let url = format!("{}/entity/{}", self.base_url, entity_type);

        debug!(entity_type = %entity_type, "Creating entity");

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.access_token()?)
            .json(data)
            .timeout(WRITE_TIMEOUT)
            .send()?;
        let response = check_status(response, entity_type)?;
        let single: SingleResponse = response.json()?;
        Ok(single.data.into_entity())
    }

    /// Update fields on an existing entity
    pub fn update(&self, entity_type: &str, id: i64, data: &Entity) -> Result<Entity> {
        let url = format!("{}/entity/{}/{}", self.base_url, entity_type, id);

        debug!(entity_type = %entity_type, id = id, fields = data.len(), "Updating entity");

        let response = self
            .client
            .put(&url)
            .bearer_auth(self.access_token()?)
            .json(data)
            .timeout(WRITE_TIMEOUT)
            .send()?;
        let response = check_status(response, &format!("{} ({})", entity_type, id))?;
        let single: SingleResponse = response.json()?;
        Ok(single.data.into_entity())
    }

    /// Read the field schema of an entity type
    pub fn schema_field_read(&self, entity_type: &str) -> Result<BTreeMap<String, FieldSchema>> {
        let url = format!("{}/schema/{}/fields", self.base_url, entity_type);

        let response = self
            .client
            .get(&url)
            .bearer_auth(self.access_token()?)
            .timeout(READ_TIMEOUT)
            .send()?;
        let response = check_status(response, entity_type)?;
        let schema: SchemaResponse = response.json()?;
        Ok(schema
            .data
            .into_iter()
            .map(|(field, entry)| {
                (
                    field,
                    FieldSchema {
                        name: entry.name.value,
                        data_type: entry.data_type.value,
                        editable: entry.editable.map(|e| e.value).unwrap_or(true),
                    },
                )
            })
            .collect())
    }

    // --- Private helpers ---

    /// Return the cached access token, authenticating on first use
    fn access_token(&self) -> Result<String> {
        let mut guard = self
            .token
            .lock()
            .map_err(|_| Error::Auth("token cache poisoned".to_string()))?;
        if let Some(ref token) = *guard {
            return Ok(token.clone());
        }

        let url = format!("{}/auth/access_token", self.base_url);
        let response = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.script_name.as_str()),
                ("client_secret", self.script_key.as_str()),
            ])
            .timeout(READ_TIMEOUT)
            .send()?;

        if !response.status().is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::Auth(body));
        }
        let token: TokenResponse = response.json()?;
        *guard = Some(token.access_token.clone());
        Ok(token.access_token)
    }
}

/// Map non-success HTTP statuses to errors
fn check_status(
    response: reqwest::blocking::Response,
    what: &str,
) -> Result<reqwest::blocking::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status.as_u16() {
        401 | 403 => Err(Error::Auth(format!("access denied to {}", what))),
        404 => Err(Error::NotFound(what.to_string())),
        429 => {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(60);
            Err(Error::RateLimited(retry_after))
        }
        code => Err(Error::Api {
            status: code,
            message: response.text().unwrap_or_default(),
        }),
    }
}
