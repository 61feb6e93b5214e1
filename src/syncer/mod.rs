//! Syncers
//!
//! A syncer serves one channel: it filters inbound events and projects the
//! state of one side onto the other. Concrete syncers are built from
//! channel settings through a [`SyncerRegistry`] keyed by syncer kind.
//!
//! # Built-in kinds
//!
//! - **task_issue**: Task <-> Task with a preset field table, extendable
//! - **entity_issue**: any entity type <-> any issue type, fully table-driven

pub mod acceptance;
mod entity_issue;

pub use entity_issue::EntityIssueSyncer;

use crate::channel::SyncChannel;
use crate::config::ChannelSettings;
use crate::event::{JiraEvent, PmEvent};
use crate::integrations::{JiraClient, PmClient};
use crate::{BridgeError, Result};
use pm_api::EntityRef;
use std::collections::BTreeMap;

/// Identities the bridge writes as; events carrying them are echoes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identities {
    pub pm: EntityRef,
    pub jira_username: String,
}

impl Identities {
    pub fn new(pm: EntityRef, jira_username: impl Into<String>) -> Self {
        Self {
            pm,
            jira_username: jira_username.into(),
        }
    }
}

/// Fields holding the cross reference on each side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFields {
    /// PM field holding the Jira key, on entities and projects
    pub jira_key_field: String,
    /// Jira custom field holding the PM entity id
    pub entity_id_field: String,
    /// Jira custom field holding the PM entity type
    pub entity_type_field: String,
}

impl Default for LinkFields {
    fn default() -> Self {
        Self {
            jira_key_field: "sg_jira_key".to_string(),
            entity_id_field: "customfield_11501".to_string(),
            entity_type_field: "customfield_11502".to_string(),
        }
    }
}

/// Everything a syncer needs for one call
#[derive(Clone, Copy)]
pub struct SyncContext<'a> {
    pub pm: &'a dyn PmClient,
    pub jira: &'a dyn JiraClient,
    pub identities: &'a Identities,
    pub links: &'a LinkFields,
}

impl<'a> SyncContext<'a> {
    pub fn new(
        pm: &'a dyn PmClient,
        jira: &'a dyn JiraClient,
        identities: &'a Identities,
        links: &'a LinkFields,
    ) -> Self {
        Self {
            pm,
            jira,
            identities,
            links,
        }
    }
}

/// Per-channel sync behaviour
///
/// Acceptance defaults to the shared filters in [`acceptance`]; syncers
/// supply the entity types they serve and the two sync directions.
pub trait Syncer: Send + Sync {
    /// Channel name
    fn name(&self) -> &str;

    /// Whether this syncer handles the given PM entity type
    fn supports_entity_type(&self, entity_type: &str) -> bool;

    /// Decide whether a PM event is worth processing.
    ///
    /// Errors reach the caller of the sync unchanged.
    fn accept_pm_event(
        &self,
        ctx: &SyncContext<'_>,
        entity_type: &str,
        entity_id: i64,
        event: &PmEvent,
    ) -> Result<bool> {
        Ok(acceptance::accept_pm_event(
            ctx.identities,
            self.supports_entity_type(entity_type),
            entity_type,
            entity_id,
            event,
        ))
    }

    /// Decide whether a Jira event is worth processing
    fn accept_jira_event(
        &self,
        ctx: &SyncContext<'_>,
        resource_type: &str,
        resource_key: &str,
        event: &JiraEvent,
    ) -> Result<bool> {
        Ok(acceptance::accept_jira_event(
            ctx.identities,
            resource_type,
            resource_key,
            event,
        ))
    }

    /// Project a PM entity onto its Jira issue; true if anything was written
    fn sync_in_jira(
        &self,
        ctx: &SyncContext<'_>,
        entity_type: &str,
        entity_id: i64,
        event: &PmEvent,
    ) -> Result<bool>;

    /// Project a Jira issue change onto its PM entity; true if anything was written
    fn sync_in_pm(
        &self,
        ctx: &SyncContext<'_>,
        resource_type: &str,
        resource_key: &str,
        event: &JiraEvent,
    ) -> Result<bool>;
}

/// Builds a syncer from channel settings
pub type SyncerFactory = Box<dyn Fn(&ChannelSettings) -> Result<Box<dyn Syncer>> + Send + Sync>;

/// Syncer kinds available to channel settings
pub struct SyncerRegistry {
    factories: BTreeMap<String, SyncerFactory>,
}

impl Default for SyncerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("task_issue", build_task_issue);
        registry.register("entity_issue", build_entity_issue);
        registry
    }
}

impl SyncerRegistry {
    /// Registry with the built-in kinds
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with no kinds at all
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Add or replace a syncer kind
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&ChannelSettings) -> Result<Box<dyn Syncer>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build the syncer for a channel.
    ///
    /// Factory errors are returned as-is.
    pub fn build(&self, settings: &ChannelSettings) -> Result<Box<dyn Syncer>> {
        let factory = self.factories.get(&settings.syncer).ok_or_else(|| {
            BridgeError::Configuration(format!(
                "Unknown syncer '{}' for channel '{}'. Available: {}",
                settings.syncer,
                settings.name,
                self.kinds().join(", ")
            ))
        })?;
        factory(settings)
    }
}

/// Apply the optional overrides of channel settings onto a field table
fn customize(mut channel: SyncChannel, settings: &ChannelSettings) -> SyncChannel {
    if let Some(ref entity_type) = settings.pm_entity_type {
        channel.pm_entity_type = entity_type.clone();
    }
    if let Some(ref issue_type) = settings.issue_type {
        channel.issue_type = issue_type.clone();
    }
    if let Some(ref name_field) = settings.name_field {
        channel = channel.with_name_field(name_field);
    }
    if let Some(ref description_field) = settings.description_field {
        channel = channel.with_description_field(description_field);
    }
    for mapping in &settings.fields {
        channel = channel.with_field(mapping.clone());
    }
    channel
}

fn build_task_issue(settings: &ChannelSettings) -> Result<Box<dyn Syncer>> {
    let channel = customize(SyncChannel::task_issue(&settings.name), settings);
    Ok(Box::new(EntityIssueSyncer::new(channel)?))
}

fn build_entity_issue(settings: &ChannelSettings) -> Result<Box<dyn Syncer>> {
    let (Some(entity_type), Some(issue_type)) = (&settings.pm_entity_type, &settings.issue_type) else {
        return Err(BridgeError::Configuration(format!(
            "Channel '{}' needs both pm_entity_type and issue_type",
            settings.name
        )));
    };
    if settings.fields.is_empty() {
        return Err(BridgeError::Configuration(format!(
            "Channel '{}' has an empty field table",
            settings.name
        )));
    }
    let channel = customize(
        SyncChannel::new(&settings.name, entity_type, issue_type),
        settings,
    );
    Ok(Box::new(EntityIssueSyncer::new(channel)?))
}
