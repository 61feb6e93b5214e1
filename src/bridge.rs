//! Bridge
//!
//! Owns the two clients, the identities the bridge writes as, and one
//! syncer per configured channel. Exposes the two entry points used by
//! whatever receives the webhooks.
//!
//! # Sync Flow
//!
//! 1. **Route**: resolve the channel's syncer (unknown channel is an error)
//! 2. **Accept**: run the syncer's acceptance filter; rejections return false,
//!    errors propagate
//! 3. **Sync**: let the syncer project the change onto the other side

use crate::config::{validate_settings_result, BridgeSettings};
use crate::event::{JiraEvent, PmEvent};
use crate::integrations::{self, JiraAdapter, JiraClient, PmClient};
use crate::syncer::{Identities, LinkFields, SyncContext, Syncer, SyncerRegistry};
use crate::{BridgeError, Result};
use pm_api::EntityRef;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

pub struct Bridge {
    pm: Arc<dyn PmClient>,
    jira: Arc<dyn JiraClient>,
    identities: Identities,
    links: LinkFields,
    syncers: BTreeMap<String, Box<dyn Syncer>>,
}

impl Bridge {
    /// Build a bridge with the built-in syncer kinds
    pub fn new(settings: &BridgeSettings, pm: Arc<dyn PmClient>, jira: Arc<dyn JiraClient>) -> Result<Self> {
        Self::with_registry(settings, pm, jira, &SyncerRegistry::new())
    }

    /// Build a bridge, creating every channel's syncer up front.
    ///
    /// Fails on the first channel that cannot be built.
    pub fn with_registry(
        settings: &BridgeSettings,
        pm: Arc<dyn PmClient>,
        jira: Arc<dyn JiraClient>,
        registry: &SyncerRegistry,
    ) -> Result<Self> {
        let mut syncers: BTreeMap<String, Box<dyn Syncer>> = BTreeMap::new();
        for channel in &settings.channels {
            if syncers.contains_key(&channel.name) {
                return Err(BridgeError::Configuration(format!(
                    "Duplicate channel name: {}",
                    channel.name
                )));
            }
            let syncer = registry.build(channel)?;
            debug!(channel = %channel.name, syncer = %channel.syncer, "Registered channel");
            syncers.insert(channel.name.clone(), syncer);
        }

        info!(channels = syncers.len(), "Bridge ready");

        Ok(Self {
            pm,
            jira,
            identities: settings.identities(),
            links: settings.links(),
            syncers,
        })
    }

    /// Validate settings and connect to both sites
    pub fn connect(settings: &BridgeSettings) -> Result<Self> {
        validate_settings_result(settings)?;
        let pm = integrations::pm::connect(&settings.pm)?;
        let jira = JiraAdapter::new(settings.jira.clone())?;
        Self::new(settings, Arc::new(pm), Arc::new(jira))
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.syncers.keys().map(String::as_str).collect()
    }

    pub fn syncer(&self, channel: &str) -> Option<&dyn Syncer> {
        self.syncers.get(channel).map(|s| s.as_ref())
    }

    pub fn current_pm_identity(&self) -> &EntityRef {
        &self.identities.pm
    }

    pub fn current_jira_username(&self) -> &str {
        &self.identities.jira_username
    }

    pub fn identities(&self) -> &Identities {
        &self.identities
    }

    /// Swap the identities used for echo suppression
    pub fn set_identities(&mut self, identities: Identities) {
        self.identities = identities;
    }

    pub fn links(&self) -> &LinkFields {
        &self.links
    }

    pub fn pm(&self) -> &Arc<dyn PmClient> {
        &self.pm
    }

    pub fn jira(&self) -> &Arc<dyn JiraClient> {
        &self.jira
    }

    /// Context handed to syncers for one call
    pub fn context(&self) -> SyncContext<'_> {
        SyncContext::new(self.pm.as_ref(), self.jira.as_ref(), &self.identities, &self.links)
    }

    fn get_syncer(&self, channel: &str) -> Result<&dyn Syncer> {
        self.syncer(channel).ok_or_else(|| {
            BridgeError::Configuration(format!(
                "Unknown channel '{}'. Available: {}",
                channel,
                self.channel_names().join(", ")
            ))
        })
    }

    /// Sync a PM entity change to Jira; true if anything was written
    pub fn sync_in_jira(
        &self,
        channel: &str,
        entity_type: &str,
        entity_id: i64,
        event: &PmEvent,
    ) -> Result<bool> {
        let syncer = self.get_syncer(channel)?;
        let ctx = self.context();
        if !syncer.accept_pm_event(&ctx, entity_type, entity_id, event)? {
            return Ok(false);
        }
        debug!(channel = %channel, entity_type = %entity_type, entity_id, "Syncing PM change to Jira");
        syncer.sync_in_jira(&ctx, entity_type, entity_id, event)
    }

    /// Sync a Jira issue change to PM; true if anything was written
    pub fn sync_in_pm(
        &self,
        channel: &str,
        resource_type: &str,
        resource_key: &str,
        event: &JiraEvent,
    ) -> Result<bool> {
        let syncer = self.get_syncer(channel)?;
        let ctx = self.context();
        if !syncer.accept_jira_event(&ctx, resource_type, resource_key, event)? {
            return Ok(false);
        }
        debug!(channel = %channel, resource_type = %resource_type, key = %resource_key, "Syncing Jira change to PM");
        syncer.sync_in_pm(&ctx, resource_type, resource_key, event)
    }
}
