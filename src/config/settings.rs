//! Bridge settings file handling
//!
//! Loads and manages the ~/.config/jira-bridge/settings.yaml file.

use crate::channel::FieldMapping;
use crate::syncer::{Identities, LinkFields};
use crate::{BridgeError, Result};
use pm_api::EntityRef;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Production management site settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PmSettings {
    /// Site URL, e.g. https://mysite.example.com
    pub url: String,

    /// Script user the bridge connects as
    pub script_name: String,

    /// Environment variable holding the script key
    #[serde(default = "default_script_key_env")]
    pub script_key_env: String,

    /// Identity the bridge writes as; events from it are echoes
    pub identity: EntityRef,

    /// Entity field storing the linked Jira issue key
    #[serde(default = "default_jira_key_field")]
    pub jira_key_field: String,
}

fn default_script_key_env() -> String {
    "PM_SCRIPT_KEY".to_string()
}

fn default_jira_key_field() -> String {
    "sg_jira_key".to_string()
}

impl PmSettings {
    pub fn new(url: impl Into<String>, script_name: impl Into<String>, identity: EntityRef) -> Self {
        Self {
            url: url.into(),
            script_name: script_name.into(),
            script_key_env: default_script_key_env(),
            identity,
            jira_key_field: default_jira_key_field(),
        }
    }

    /// Read the script key from the environment
    pub fn script_key(&self) -> Result<String> {
        let env_var = self.script_key_env.trim_start_matches('$');
        std::env::var(env_var).map_err(|_| {
            BridgeError::Configuration(format!("Environment variable {} is not set", env_var))
        })
    }
}

/// Jira site settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JiraSettings {
    /// Site URL, e.g. https://mycompany.atlassian.net
    pub url: String,

    /// User the bridge connects as; events from it are echoes
    pub username: String,

    /// Environment variable holding the API token
    #[serde(default)]
    pub token_env: Option<String>,

    /// Custom field holding the linked entity id
    #[serde(default = "default_entity_id_field")]
    pub entity_id_field: String,

    /// Custom field holding the linked entity type
    #[serde(default = "default_entity_type_field")]
    pub entity_type_field: String,
}

fn default_entity_id_field() -> String {
    "customfield_11501".to_string()
}

fn default_entity_type_field() -> String {
    "customfield_11502".to_string()
}

impl JiraSettings {
    pub fn new(url: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: username.into(),
            token_env: None,
            entity_id_field: default_entity_id_field(),
            entity_type_field: default_entity_type_field(),
        }
    }
}

/// One configured sync channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Channel name used by callers, e.g. "task_issue"
    pub name: String,

    /// Syncer kind building this channel
    #[serde(default = "default_syncer")]
    pub syncer: String,

    #[serde(default)]
    pub pm_entity_type: Option<String>,

    #[serde(default)]
    pub issue_type: Option<String>,

    #[serde(default)]
    pub name_field: Option<String>,

    #[serde(default)]
    pub description_field: Option<String>,

    /// Extra or overriding field mappings
    #[serde(default)]
    pub fields: Vec<FieldMapping>,
}

fn default_syncer() -> String {
    "task_issue".to_string()
}

impl ChannelSettings {
    pub fn new(name: impl Into<String>, syncer: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            syncer: syncer.into(),
            pm_entity_type: None,
            issue_type: None,
            name_field: None,
            description_field: None,
            fields: Vec::new(),
        }
    }
}

/// Bridge settings
///
/// Represents the complete settings.yaml file: both sites and the list of
/// channels to serve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeSettings {
    pub pm: PmSettings,

    pub jira: JiraSettings,

    #[serde(default)]
    pub channels: Vec<ChannelSettings>,
}

impl BridgeSettings {
    pub fn new(pm: PmSettings, jira: JiraSettings) -> Self {
        Self {
            pm,
            jira,
            channels: Vec::new(),
        }
    }

    pub fn with_channel(mut self, channel: ChannelSettings) -> Self {
        self.channels.push(channel);
        self
    }

    /// Load settings from the default path (~/.config/jira-bridge/settings.yaml)
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path();
        Self::load(&path)
    }

    /// Load settings from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BridgeError::Configuration(format!(
                "Settings file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading bridge settings");

        let content = fs::read_to_string(path)?;
        let settings: Self = serde_yaml::from_str(&content)?;

        tracing::debug!(
            channels = settings.channels.len(),
            pm = %settings.pm.url,
            jira = %settings.jira.url,
            "Settings loaded successfully"
        );

        Ok(settings)
    }

    /// Save settings to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving bridge settings");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// Get the default settings path (~/.config/jira-bridge/settings.yaml)
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("jira-bridge");
        path.push("settings.yaml");
        path
    }

    /// Identities the bridge writes as on each side
    pub fn identities(&self) -> Identities {
        Identities::new(self.pm.identity.clone(), self.jira.username.clone())
    }

    /// Fields carrying the cross reference on each side
    pub fn links(&self) -> LinkFields {
        LinkFields {
            jira_key_field: self.pm.jira_key_field.clone(),
            entity_id_field: self.jira.entity_id_field.clone(),
            entity_type_field: self.jira.entity_type_field.clone(),
        }
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelSettings> {
        self.channels.iter().find(|c| c.name == name)
    }
}
