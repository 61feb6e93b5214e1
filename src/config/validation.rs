//! Settings validation
//!
//! Validates bridge settings for correctness:
//! - At least one channel, no duplicate channel names
//! - Valid site URLs and non-empty identities
//! - Field tables without empty sides, duplicates or empty enum tables
//! - Secrets referenced through environment variables are set

use super::settings::{BridgeSettings, ChannelSettings};
use crate::channel::FieldKind;
use crate::BridgeError;
use std::collections::HashSet;

/// One problem found in the settings
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub channel: Option<String>,
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            channel: None,
            field: field.into(),
            message: message.into(),
        }
    }

    fn in_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref channel) = self.channel {
            write!(f, "[{}] {}: {}", channel, self.field, self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ConfigIssue>>;

/// Validate bridge settings, collecting every problem
pub fn validate_settings(settings: &BridgeSettings) -> ValidationResult {
    let mut issues = Vec::new();

    if !is_http_url(&settings.pm.url) {
        issues.push(ConfigIssue::new(
            "pm.url",
            format!("Invalid URL: {}", settings.pm.url),
        ));
    }
    if settings.pm.script_name.is_empty() {
        issues.push(ConfigIssue::new("pm.script_name", "Script name cannot be empty"));
    }
    if settings.pm.identity.entity_type.is_empty() {
        issues.push(ConfigIssue::new("pm.identity", "Identity type cannot be empty"));
    }
    if settings.pm.jira_key_field.is_empty() {
        issues.push(ConfigIssue::new("pm.jira_key_field", "Field name cannot be empty"));
    }
    warn_if_unset("pm.script_key_env", &settings.pm.script_key_env);

    if !is_http_url(&settings.jira.url) {
        issues.push(ConfigIssue::new(
            "jira.url",
            format!("Invalid URL: {}", settings.jira.url),
        ));
    }
    if settings.jira.username.is_empty() {
        issues.push(ConfigIssue::new("jira.username", "Username cannot be empty"));
    }
    for (field, value) in [
        ("jira.entity_id_field", &settings.jira.entity_id_field),
        ("jira.entity_type_field", &settings.jira.entity_type_field),
    ] {
        if value.is_empty() {
            issues.push(ConfigIssue::new(field, "Field id cannot be empty"));
        }
    }
    if let Some(ref token_env) = settings.jira.token_env {
        warn_if_unset("jira.token_env", token_env);
    }

    if settings.channels.is_empty() {
        issues.push(ConfigIssue::new(
            "channels",
            "At least one channel must be defined",
        ));
    }

    let mut seen_names = HashSet::new();
    for channel in &settings.channels {
        if !seen_names.insert(&channel.name) {
            issues.push(ConfigIssue::new(
                "channels",
                format!("Duplicate channel name: {}", channel.name),
            ));
        }
    }

    for channel in &settings.channels {
        if let Err(mut channel_issues) = validate_channel(channel) {
            issues.append(&mut channel_issues);
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

/// Validate a single channel
fn validate_channel(channel: &ChannelSettings) -> ValidationResult {
    let mut issues = Vec::new();

    if channel.name.is_empty() {
        issues.push(ConfigIssue::new("name", "Channel name cannot be empty"));
    }
    if channel.syncer.is_empty() {
        issues.push(ConfigIssue::new("syncer", "Syncer kind cannot be empty").in_channel(&channel.name));
    }

    if channel.syncer == "entity_issue" {
        if channel.pm_entity_type.as_deref().unwrap_or_default().is_empty() {
            issues.push(
                ConfigIssue::new("pm_entity_type", "entity_issue channels need an entity type")
                    .in_channel(&channel.name),
            );
        }
        if channel.issue_type.as_deref().unwrap_or_default().is_empty() {
            issues.push(
                ConfigIssue::new("issue_type", "entity_issue channels need an issue type")
                    .in_channel(&channel.name),
            );
        }
        if channel.fields.is_empty() {
            issues.push(
                ConfigIssue::new("fields", "entity_issue channels need a field table")
                    .in_channel(&channel.name),
            );
        }
    }

    let mut seen_pm = HashSet::new();
    let mut seen_jira = HashSet::new();
    for (index, mapping) in channel.fields.iter().enumerate() {
        let field = format!("fields[{}]", index);
        if mapping.pm.is_empty() || mapping.jira.is_empty() {
            issues.push(
                ConfigIssue::new(&field, "Both pm and jira must be set").in_channel(&channel.name),
            );
        }
        if !seen_pm.insert(mapping.pm.as_str()) {
            issues.push(
                ConfigIssue::new(&field, format!("PM field '{}' is mapped twice", mapping.pm))
                    .in_channel(&channel.name),
            );
        }
        if !seen_jira.insert(mapping.jira.as_str()) {
            issues.push(
                ConfigIssue::new(&field, format!("Jira field '{}' is mapped twice", mapping.jira))
                    .in_channel(&channel.name),
            );
        }
        if let FieldKind::Enum { ref values } = mapping.kind {
            if values.is_empty() {
                issues.push(
                    ConfigIssue::new(&field, format!("Enum field '{}' has no values", mapping.pm))
                        .in_channel(&channel.name),
                );
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

fn warn_if_unset(field: &str, env_var: &str) {
    let env_var = env_var.trim_start_matches('$');
    if std::env::var(env_var).is_err() {
        tracing::warn!(
            field = %field,
            env_var = %env_var,
            "Environment variable not set (this may be intentional if set at runtime)"
        );
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

/// Validate settings and return a Result
pub fn validate_settings_result(settings: &BridgeSettings) -> crate::Result<()> {
    validate_settings(settings).map_err(|issues| {
        let messages: Vec<String> = issues.iter().map(|e| e.to_string()).collect();
        BridgeError::Configuration(format!(
            "Settings validation failed:\n  - {}",
            messages.join("\n  - ")
        ))
    })
}
