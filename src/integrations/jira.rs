//! JIRA Integration Adapter
//!
//! `JiraClient` implementation over the JIRA REST API v2.

use super::{CreateMetaField, JiraClient, JiraIssue, JiraProject, JiraUser};
use crate::config::JiraSettings;
use crate::{BridgeError, Result};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-request timeout for search/query operations (large result sets)
const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-request timeout for single resource fetches
const GET_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-request timeout for create/update operations
const WRITE_TIMEOUT: Duration = Duration::from_secs(15);

/// JIRA API client
pub struct JiraAdapter {
    client: Client,
    config: JiraSettings,
    base_url: String,
    auth_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraSearchResponse {
    #[serde(default)]
    total: u32,
    #[serde(default)]
    issues: Vec<JiraIssue>,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraStatus {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraTransition {
    id: String,
    to: JiraStatus,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraTransitionsResponse {
    transitions: Vec<JiraTransition>,
}

#[derive(Debug, Clone, Serialize)]
struct JiraTransitionRequest {
    transition: JiraTransitionId,
}

#[derive(Debug, Clone, Serialize)]
struct JiraTransitionId {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CreatedIssue {
    key: String,
}

/// Create metadata response (`expand=projects.issuetypes.fields`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateMetaResponse {
    #[serde(default)]
    pub projects: Vec<CreateMetaProject>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateMetaProject {
    #[serde(default)]
    pub issuetypes: Vec<CreateMetaIssueType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateMetaIssueType {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, CreateMetaField>,
}

impl CreateMetaResponse {
    /// Field descriptions for an issue type, falling back to the first one listed
    pub fn fields_for(self, issue_type: &str) -> BTreeMap<String, CreateMetaField> {
        let mut issuetypes: Vec<CreateMetaIssueType> = self
            .projects
            .into_iter()
            .flat_map(|p| p.issuetypes)
            .collect();
        let position = issuetypes
            .iter()
            .position(|t| t.name.as_deref() == Some(issue_type))
            .unwrap_or(0);
        if issuetypes.is_empty() {
            BTreeMap::new()
        } else {
            issuetypes.swap_remove(position).fields
        }
    }
}

impl JiraAdapter {
    /// Create a new JIRA adapter
    ///
    /// The API token is read from the environment variable named by
    /// `token_env`, if any.
    pub fn new(config: JiraSettings) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        let base_url = format!("{}/rest/api/2", config.url.trim_end_matches('/'));

        let auth_token = config
            .token_env
            .as_ref()
            .and_then(|env_var| std::env::var(env_var.trim_start_matches('$')).ok());

        Ok(Self {
            client,
            config,
            base_url,
            auth_token,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_token.is_some()
    }

    pub fn username(&self) -> &str {
        &self.config.username
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.auth_token {
            Some(ref token) => request.basic_auth(&self.config.username, Some(token)),
            None => request,
        }
    }

    fn get(&self, url: &str) -> Result<Response> {
        Ok(self
            .authorized(self.client.get(url))
            .timeout(GET_TIMEOUT)
            .send()?)
    }

    /// Transition ids available on an issue, keyed by target status
    fn get_transitions(&self, key: &str) -> Result<Vec<JiraTransition>> {
        let url = format!("{}/issue/{}/transitions", self.base_url, key);
        let response = self.get(&url)?;

        match response.status() {
            StatusCode::OK => {
                let result: JiraTransitionsResponse = response.json()?;
                Ok(result.transitions)
            }
            _ => Err(api_error(response, &format!("listing transitions of {}", key))),
        }
    }

    fn fetch_user(&self, param: &str, id: &str) -> Result<Option<JiraUser>> {
        let url = format!("{}/user", self.base_url);
        let response = self
            .authorized(self.client.get(&url).query(&[(param, id)]))
            .timeout(GET_TIMEOUT)
            .send()?;

        match response.status() {
            StatusCode::OK => Ok(Some(response.json()?)),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(api_error(response, &format!("fetching user {}", id))),
        }
    }
}

impl JiraClient for JiraAdapter {
    fn project(&self, key: &str) -> Result<Option<JiraProject>> {
        let url = format!("{}/project/{}", self.base_url, key);

        debug!(project = %key, "Fetching JIRA project");

        let response = self.get(&url)?;
        match response.status() {
            StatusCode::OK => Ok(Some(response.json()?)),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(api_error(response, &format!("fetching project {}", key))),
        }
    }

    fn issue(&self, key: &str) -> Result<Option<JiraIssue>> {
        let url = format!("{}/issue/{}", self.base_url, key);

        debug!(key = %key, "Fetching JIRA issue");

        let response = self.get(&url)?;
        match response.status() {
            StatusCode::OK => Ok(Some(response.json()?)),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(api_error(response, &format!("fetching issue {}", key))),
        }
    }

    fn create_issue(&self, fields: &Map<String, Value>) -> Result<JiraIssue> {
        let url = format!("{}/issue", self.base_url);
        let body = serde_json::json!({ "fields": fields });

        let response = self
            .authorized(self.client.post(&url).json(&body))
            .timeout(WRITE_TIMEOUT)
            .send()?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => {
                let created: CreatedIssue = response.json()?;
                info!(key = %created.key, "Created JIRA issue");
                self.issue(&created.key)?.ok_or_else(|| {
                    BridgeError::RemoteState(format!(
                        "Unable to retrieve newly created Jira Issue {}",
                        created.key
                    ))
                })
            }
            _ => Err(api_error(response, "creating issue")),
        }
    }

    fn update_issue(&self, key: &str, fields: &Map<String, Value>) -> Result<()> {
        let url = format!("{}/issue/{}", self.base_url, key);
        let body = serde_json::json!({ "fields": fields });

        info!(key = %key, fields = ?fields.keys().collect::<Vec<_>>(), "Updating JIRA issue");

        let response = self
            .authorized(self.client.put(&url).json(&body))
            .timeout(WRITE_TIMEOUT)
            .send()?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::OK => Ok(()),
            _ => Err(api_error(response, &format!("updating issue {}", key))),
        }
    }

    fn transition_issue(&self, key: &str, status: &str) -> Result<bool> {
        let transitions = self.get_transitions(key)?;
        let Some(transition) = transitions
            .iter()
            .find(|t| t.to.name.eq_ignore_ascii_case(status))
        else {
            warn!(
                key = %key,
                target = %status,
                available = ?transitions.iter().map(|t| &t.to.name).collect::<Vec<_>>(),
                "No transition available to target status"
            );
            return Ok(false);
        };

        let url = format!("{}/issue/{}/transitions", self.base_url, key);
        let body = JiraTransitionRequest {
            transition: JiraTransitionId {
                id: transition.id.clone(),
            },
        };

        info!(key = %key, transition_id = %transition.id, status = %status, "Transitioning JIRA issue");

        let response = self
            .authorized(self.client.post(&url).json(&body))
            .timeout(WRITE_TIMEOUT)
            .send()?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::OK => Ok(true),
            _ => Err(api_error(response, &format!("transitioning issue {}", key))),
        }
    }

    fn createmeta(&self, project_key: &str, issue_type: &str) -> Result<BTreeMap<String, CreateMetaField>> {
        let url = format!("{}/issue/createmeta", self.base_url);
        let params = [
            ("projectKeys", project_key),
            ("issuetypeNames", issue_type),
            ("expand", "projects.issuetypes.fields"),
        ];

        let response = self
            .authorized(self.client.get(&url).query(&params))
            .timeout(GET_TIMEOUT)
            .send()?;

        match response.status() {
            StatusCode::OK => {
                let meta: CreateMetaResponse = response.json()?;
                Ok(meta.fields_for(issue_type))
            }
            _ => Err(api_error(
                response,
                &format!("reading create metadata for {} {}", project_key, issue_type),
            )),
        }
    }

    fn search_issues(&self, jql: &str, max_results: u32) -> Result<Vec<JiraIssue>> {
        let url = format!("{}/search", self.base_url);
        let params = [("jql", jql.to_string()), ("maxResults", max_results.to_string())];

        debug!(jql = %jql, max_results = %max_results, "Searching JIRA issues");

        let response = self
            .authorized(self.client.get(&url).query(&params))
            .timeout(SEARCH_TIMEOUT)
            .send()?;

        match response.status() {
            StatusCode::OK => {
                let search_result: JiraSearchResponse = response.json()?;
                debug!(
                    total = search_result.total,
                    returned = search_result.issues.len(),
                    "JIRA search complete"
                );
                Ok(search_result.issues)
            }
            _ => Err(api_error(response, "searching issues")),
        }
    }

    fn find_user(&self, email: &str) -> Result<Option<JiraUser>> {
        let url = format!("{}/user/search", self.base_url);
        let response = self
            .authorized(self.client.get(&url).query(&[("query", email)]))
            .timeout(GET_TIMEOUT)
            .send()?;

        match response.status() {
            StatusCode::OK => {
                let users: Vec<JiraUser> = response.json()?;
                let user = matching_user(users, email);
                if user.is_none() {
                    debug!(email = %email, "No JIRA user with a matching email");
                }
                Ok(user)
            }
            _ => Err(api_error(response, &format!("searching user {}", email))),
        }
    }

    fn user(&self, id: &str) -> Result<Option<JiraUser>> {
        match self.fetch_user("accountId", id)? {
            Some(user) => Ok(Some(user)),
            None => self.fetch_user("username", id),
        }
    }
}

/// Map a failed response to a bridge error
fn api_error(response: Response, action: &str) -> BridgeError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    let body = response.text().unwrap_or_default();
    status_error(status, retry_after, &body, action)
}

/// Classify a failed status.
///
/// Rate limiting and server failures are transport errors. Rejected
/// credentials are authentication errors; other client errors mean Jira
/// refused what we asked for.
fn status_error(status: StatusCode, retry_after: Option<u64>, body: &str, action: &str) -> BridgeError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            BridgeError::Auth(format!("JIRA authentication failed {}: HTTP {}", action, status))
        }
        StatusCode::TOO_MANY_REQUESTS => BridgeError::Transport(format!(
            "Rate limited, retry after {} seconds",
            retry_after.unwrap_or(60)
        )),
        status if status.is_server_error() => BridgeError::Transport(format!(
            "JIRA API error {}: HTTP {}: {}",
            action, status, body
        )),
        status => BridgeError::RemoteState(format!(
            "JIRA rejected {}: HTTP {}: {}",
            action, status, body
        )),
    }
}

/// The user a search for `email` refers to.
///
/// Only an exact (case-insensitive) email match counts. When Jira hides
/// every email, a single result is trusted.
fn matching_user(users: Vec<JiraUser>, email: &str) -> Option<JiraUser> {
    if users.iter().all(|u| u.email.is_none()) {
        return if users.len() == 1 { users.into_iter().next() } else { None };
    }
    users.into_iter().find(|u| {
        u.email
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case(email))
    })
}
