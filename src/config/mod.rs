//! Configuration system
//!
//! Loads ~/.config/jira-bridge/settings.yaml with support for:
//! - Production management and Jira connection settings
//! - The identities the bridge writes as (echo suppression)
//! - Cross reference field names on both sides
//! - Sync channels and their field tables

mod settings;
pub mod validation;

pub use settings::{BridgeSettings, ChannelSettings, JiraSettings, PmSettings};
pub use validation::{validate_settings, validate_settings_result, ConfigIssue};
