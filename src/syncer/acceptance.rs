//! Event acceptance filters
//!
//! Cheap checks run before any remote call. A rejected event is not an
//! error: it is logged at debug level and the sync call returns false.

use super::Identities;
use crate::event::{JiraEvent, PmEvent};
use std::fmt;
use tracing::debug;

/// Why an event was not processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// PM event without a project
    NoProject,
    /// Event produced by the bridge's own writes
    OwnEvent,
    /// PM entity type not served by the channel
    UnsupportedEntityType(String),
    /// Jira event without a `webhookEvent` key
    NoWebhookEvent,
    /// Jira webhook event we do not handle
    UnsupportedWebhookEvent(String),
    /// Jira event without a changelog
    NoChangelog,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NoProject => write!(f, "missing project"),
            Rejection::OwnEvent => write!(f, "generated by the bridge itself"),
            Rejection::UnsupportedEntityType(t) => write!(f, "unsupported entity type {}", t),
            Rejection::NoWebhookEvent => write!(f, "missing webhookEvent"),
            Rejection::UnsupportedWebhookEvent(e) => write!(f, "unsupported webhook event {}", e),
            Rejection::NoChangelog => write!(f, "missing changelog"),
        }
    }
}

/// Check a PM event; `supported` says whether the channel serves the entity type
pub fn check_pm_event(
    identities: &Identities,
    supported: bool,
    entity_type: &str,
    event: &PmEvent,
) -> Result<(), Rejection> {
    if event.project.is_none() {
        return Err(Rejection::NoProject);
    }
    if event.user.as_ref() == Some(&identities.pm) {
        return Err(Rejection::OwnEvent);
    }
    if !supported {
        return Err(Rejection::UnsupportedEntityType(entity_type.to_string()));
    }
    Ok(())
}

/// Check a Jira webhook event
pub fn check_jira_event(identities: &Identities, event: &JiraEvent) -> Result<(), Rejection> {
    let Some(ref webhook_event) = event.webhook_event else {
        return Err(Rejection::NoWebhookEvent);
    };
    if !event.is_supported() {
        return Err(Rejection::UnsupportedWebhookEvent(webhook_event.clone()));
    }
    if event.changelog.is_none() {
        return Err(Rejection::NoChangelog);
    }
    if event
        .user
        .as_ref()
        .is_some_and(|user| user.is(&identities.jira_username))
    {
        return Err(Rejection::OwnEvent);
    }
    Ok(())
}

pub fn accept_pm_event(
    identities: &Identities,
    supported: bool,
    entity_type: &str,
    entity_id: i64,
    event: &PmEvent,
) -> bool {
    match check_pm_event(identities, supported, entity_type, event) {
        Ok(()) => true,
        Err(reason) => {
            debug!(entity_type = %entity_type, entity_id, reason = %reason, "Rejected PM event");
            false
        }
    }
}

pub fn accept_jira_event(
    identities: &Identities,
    resource_type: &str,
    resource_key: &str,
    event: &JiraEvent,
) -> bool {
    match check_jira_event(identities, event) {
        Ok(()) => true,
        Err(reason) => {
            debug!(resource_type = %resource_type, key = %resource_key, reason = %reason, "Rejected Jira event");
            false
        }
    }
}
