//! Table-driven entity <-> issue syncer
//!
//! Shared orchestration for every channel pairing one PM entity type with
//! one Jira issue type. Behaviour differs between channels only through
//! their `SyncChannel` field table.

use super::{SyncContext, Syncer};
use crate::channel::{FieldKind, FieldMapping, ScalarFormat, SyncChannel};
use crate::event::{ChangelogItem, JiraEvent, PmEvent, PmEventMeta};
use crate::integrations::{jql_field, sanitize_jql_value, JiraIssue, JiraProject, JiraUser};
use crate::reconciler::{reconcile_multi, reconcile_single, Outcome, SetDiff};
use crate::translator;
use crate::{BridgeError, Result};
use pm_api::{Entity, EntityRef, Filter};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

pub struct EntityIssueSyncer {
    channel: SyncChannel,
}

impl EntityIssueSyncer {
    /// Create a syncer; an invalid field table is a configuration error
    pub fn new(channel: SyncChannel) -> Result<Self> {
        channel.validate()?;
        Ok(Self { channel })
    }

    pub fn channel(&self) -> &SyncChannel {
        &self.channel
    }

    /// PM fields read for every entity of this channel
    fn entity_fields<'a>(&'a self, ctx: &'a SyncContext<'_>) -> Vec<&'a str> {
        let mut fields = self.channel.pm_fields();
        for extra in ["project", ctx.links.jira_key_field.as_str()] {
            if !fields.contains(&extra) {
                fields.push(extra);
            }
        }
        fields
    }

    fn linked_key<'e>(&self, ctx: &SyncContext<'_>, record: &'e Entity) -> Option<&'e str> {
        record
            .get(&ctx.links.jira_key_field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    /// Jira project linked to the entity's PM project.
    ///
    /// `None` when the entity has no project or the project is not linked.
    fn jira_project(&self, ctx: &SyncContext<'_>, entity: &Entity) -> Result<Option<JiraProject>> {
        let Some(project) = entity.get("project").and_then(EntityRef::from_value) else {
            debug!(channel = %self.channel.name, "Entity has no project");
            return Ok(None);
        };

        let record = ctx.pm.find_one(
            &project.entity_type,
            &[Filter::is("id", project.id)],
            &[ctx.links.jira_key_field.as_str()],
        )?;
        let Some(key) = record.as_ref().and_then(|r| self.linked_key(ctx, r)) else {
            debug!(channel = %self.channel.name, project = %project, "Project is not linked to a Jira project");
            return Ok(None);
        };

        match ctx.jira.project(key)? {
            Some(jira_project) => Ok(Some(jira_project)),
            None => Err(BridgeError::RemoteState(format!(
                "Unable to retrieve a Jira Project {}",
                key
            ))),
        }
    }

    fn store_issue_key(&self, ctx: &SyncContext<'_>, link: &EntityRef, key: &str) -> Result<()> {
        let mut data = Map::new();
        data.insert(ctx.links.jira_key_field.clone(), Value::String(key.to_string()));
        ctx.pm.update(&link.entity_type, link.id, &data)?;
        info!(channel = %self.channel.name, entity = %link, issue = %key, "Linked entity to Jira issue");
        Ok(())
    }

    /// Issue pointing back at the entity, re-linked if found, created otherwise.
    ///
    /// Returns the issue and whether anything was written.
    fn find_or_create_issue(
        &self,
        ctx: &SyncContext<'_>,
        link: &EntityRef,
        entity: &Entity,
        project: &JiraProject,
    ) -> Result<JiraIssue> {
        let schema = ctx.pm.schema_field_read(&link.entity_type)?;
        if !schema.contains_key(&ctx.links.jira_key_field) {
            return Err(BridgeError::Configuration(format!(
                "{} entities have no {} field to store the Jira key",
                link.entity_type, ctx.links.jira_key_field
            )));
        }

        let jql = format!(
            r#"project = "{}" AND {} = "{}" AND {} = "{}""#,
            sanitize_jql_value(&project.key),
            jql_field(&ctx.links.entity_id_field),
            link.id,
            jql_field(&ctx.links.entity_type_field),
            sanitize_jql_value(&link.entity_type),
        );
        if let Some(existing) = ctx.jira.search_issues(&jql, 1)?.into_iter().next() {
            info!(channel = %self.channel.name, entity = %link, issue = %existing.key, "Found existing Jira issue for entity");
            self.store_issue_key(ctx, link, &existing.key)?;
            return Ok(existing);
        }

        let data = translator::build_creation_data(ctx, &self.channel, entity, project)?;
        let issue = ctx.jira.create_issue(data.fields())?;
        info!(
            channel = %self.channel.name,
            entity = %link,
            issue = %issue.key,
            issue_type = %self.channel.issue_type,
            "Created Jira issue"
        );
        self.store_issue_key(ctx, link, &issue.key)?;
        Ok(issue)
    }

    /// Push one PM field onto the issue; true if a write was issued
    fn push_field(
        &self,
        ctx: &SyncContext<'_>,
        mapping: &FieldMapping,
        entity: &Entity,
        meta: &PmEventMeta,
        issue: &JiraIssue,
    ) -> Result<bool> {
        if let FieldKind::MultiEntity = mapping.kind {
            return self.push_users(ctx, mapping, meta, issue);
        }

        let source = entity.get(&mapping.pm).unwrap_or(&Value::Null);
        let value = translator::map_value(mapping, source)?;

        if mapping.jira == "status" {
            let Some(target) = value.as_str() else {
                debug!(issue = %issue.key, "No status to transition to");
                return Ok(false);
            };
            if issue.status_name() == Some(target) {
                return Ok(false);
            }
            let moved = ctx.jira.transition_issue(&issue.key, target)?;
            if moved {
                info!(channel = %self.channel.name, issue = %issue.key, status = %target, "Transitioned Jira issue");
            } else {
                warn!(channel = %self.channel.name, issue = %issue.key, status = %target, "Unable to transition Jira issue");
            }
            return Ok(moved);
        }

        let current = issue.fields.get(&mapping.jira).unwrap_or(&Value::Null);
        if same_value(current, &value) {
            debug!(issue = %issue.key, field = %mapping.jira, "Jira value already up to date");
            return Ok(false);
        }

        let mut fields = Map::new();
        fields.insert(mapping.jira.clone(), value);
        ctx.jira.update_issue(&issue.key, &fields)?;
        info!(channel = %self.channel.name, issue = %issue.key, field = %mapping.jira, "Updated Jira issue");
        Ok(true)
    }

    /// Reconcile a PM user list change onto a single-user Jira field
    fn push_users(
        &self,
        ctx: &SyncContext<'_>,
        mapping: &FieldMapping,
        meta: &PmEventMeta,
        issue: &JiraIssue,
    ) -> Result<bool> {
        let added = translator::resolve_jira_users(ctx, &meta.added)?;
        let removed = translator::resolve_jira_users(ctx, &meta.removed)?;
        let diff = SetDiff::new(added.clone(), removed).filter_map(|u| u.identity().map(str::to_string));

        let current = issue
            .field(&mapping.jira)
            .and_then(|v| serde_json::from_value::<JiraUser>(v.clone()).ok());
        let current_id = current.as_ref().and_then(|u| u.identity()).map(str::to_string);

        let value = match reconcile_single(current_id.as_ref(), &diff) {
            Outcome::Unchanged => {
                debug!(issue = %issue.key, field = %mapping.jira, "User field unchanged");
                return Ok(false);
            }
            Outcome::Set(id) => match added.iter().find(|u| u.identity() == Some(id.as_str())) {
                Some(user) => user.assignee_value(),
                None => return Ok(false),
            },
            Outcome::Cleared => Value::Null,
        };

        let mut fields = Map::new();
        fields.insert(mapping.jira.clone(), value);
        ctx.jira.update_issue(&issue.key, &fields)?;
        info!(channel = %self.channel.name, issue = %issue.key, field = %mapping.jira, "Updated Jira user field");
        Ok(true)
    }

    /// New PM value for one changelog item, if it differs from the current one
    fn pull_field(
        &self,
        ctx: &SyncContext<'_>,
        mapping: &FieldMapping,
        item: &ChangelogItem,
        entity: &Entity,
        issue: &JiraIssue,
    ) -> Result<Option<Value>> {
        let current = entity.get(&mapping.pm).cloned().unwrap_or(Value::Null);

        let value = match mapping.kind {
            FieldKind::MultiEntity => {
                let members: Vec<EntityRef> = current
                    .as_array()
                    .map(|items| items.iter().filter_map(EntityRef::from_value).collect())
                    .unwrap_or_default();
                let diff = self.user_diff(ctx, item, issue)?;
                let merged = reconcile_multi(&members, &diff);
                if merged == members {
                    return Ok(None);
                }
                Value::Array(merged.iter().map(EntityRef::to_value).collect())
            }
            FieldKind::Scalar {
                format: ScalarFormat::Date | ScalarFormat::DateTime,
            } => {
                let raw = item.to.clone().or_else(|| item.to_text.clone());
                translator::map_value_to_pm(mapping, &raw.map(Value::String).unwrap_or(Value::Null))?
            }
            _ => {
                let raw = item.to_text.clone();
                translator::map_value_to_pm(mapping, &raw.map(Value::String).unwrap_or(Value::Null))?
            }
        };

        if same_value(&current, &value) {
            return Ok(None);
        }
        Ok(Some(value))
    }

    /// PM users added and removed by a Jira user field change
    fn user_diff(
        &self,
        ctx: &SyncContext<'_>,
        item: &ChangelogItem,
        issue: &JiraIssue,
    ) -> Result<SetDiff<EntityRef>> {
        let mut diff = SetDiff::default();
        if let Some(user) = self.jira_user(ctx, item.from.as_deref(), None)? {
            if let Some(pm_user) = translator::resolve_pm_user(ctx, &user)? {
                diff.removed.push(pm_user);
            }
        }
        if let Some(user) = self.jira_user(ctx, item.to.as_deref(), issue.assignee())? {
            if let Some(pm_user) = translator::resolve_pm_user(ctx, &user)? {
                diff.added.push(pm_user);
            }
        }
        Ok(diff)
    }

    /// Jira user named by a changelog id, preferring a known copy
    fn jira_user(
        &self,
        ctx: &SyncContext<'_>,
        id: Option<&str>,
        known: Option<JiraUser>,
    ) -> Result<Option<JiraUser>> {
        let Some(id) = id.filter(|id| !id.is_empty()) else {
            return Ok(None);
        };
        if let Some(user) = known.filter(|u| u.is(id) && u.email.is_some()) {
            return Ok(Some(user));
        }
        ctx.jira.user(id)
    }
}

/// Loose equality: strings ignore surrounding whitespace, null equals ""
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.trim() == y.trim(),
        (Value::Null, Value::String(s)) | (Value::String(s), Value::Null) => s.trim().is_empty(),
        (Value::Object(x), Value::String(s)) | (Value::String(s), Value::Object(x)) => {
            x.get("name").and_then(Value::as_str) == Some(s.as_str())
        }
        _ => a == b,
    }
}

impl Syncer for EntityIssueSyncer {
    fn name(&self) -> &str {
        &self.channel.name
    }

    fn supports_entity_type(&self, entity_type: &str) -> bool {
        self.channel.supports_entity_type(entity_type)
    }

    fn sync_in_jira(
        &self,
        ctx: &SyncContext<'_>,
        entity_type: &str,
        entity_id: i64,
        event: &PmEvent,
    ) -> Result<bool> {
        let fields = self.entity_fields(ctx);
        let Some(entity) = ctx
            .pm
            .find_one(entity_type, &[Filter::is("id", entity_id)], &fields)?
        else {
            debug!(channel = %self.channel.name, entity_type = %entity_type, entity_id, "Entity not found");
            return Ok(false);
        };
        let link = EntityRef::new(entity_type, entity_id);

        let Some(project) = self.jira_project(ctx, &entity)? else {
            return Ok(false);
        };

        let (issue, linked) = match self.linked_key(ctx, &entity) {
            Some(key) => {
                let issue = ctx.jira.issue(key)?.ok_or_else(|| {
                    BridgeError::RemoteState(format!(
                        "Unable to retrieve Jira Issue {} linked to {}",
                        key, link
                    ))
                })?;
                (issue, false)
            }
            None => (self.find_or_create_issue(ctx, &link, &entity, &project)?, true),
        };

        let Some(meta) = event.meta.as_ref() else {
            return Ok(linked);
        };
        let Some(attribute) = meta.attribute_name.as_deref() else {
            return Ok(linked);
        };
        let Some(mapping) = self.channel.outbound_mapping(attribute) else {
            debug!(channel = %self.channel.name, field = %attribute, "Field is not synced to Jira");
            return Ok(linked);
        };

        let wrote = self.push_field(ctx, mapping, &entity, meta, &issue)?;
        Ok(linked || wrote)
    }

    fn sync_in_pm(
        &self,
        ctx: &SyncContext<'_>,
        resource_type: &str,
        resource_key: &str,
        event: &JiraEvent,
    ) -> Result<bool> {
        if !resource_type.eq_ignore_ascii_case("issue") {
            debug!(channel = %self.channel.name, resource_type = %resource_type, "Not an issue");
            return Ok(false);
        }

        let issue = match event.issue {
            Some(ref issue) => issue.clone(),
            None => match ctx.jira.issue(resource_key)? {
                Some(issue) => issue,
                None => {
                    debug!(channel = %self.channel.name, key = %resource_key, "Issue not found");
                    return Ok(false);
                }
            },
        };

        let Some(link) = translator::linked_entity(ctx.links, &issue) else {
            debug!(channel = %self.channel.name, issue = %issue.key, "Issue is not linked to an entity");
            return Ok(false);
        };
        if !self.channel.supports_entity_type(&link.entity_type) {
            debug!(channel = %self.channel.name, entity = %link, "Linked entity type is not served by this channel");
            return Ok(false);
        }

        let fields = self.entity_fields(ctx);
        let Some(entity) = ctx
            .pm
            .find_one(&link.entity_type, &[Filter::is("id", link.id)], &fields)?
        else {
            debug!(channel = %self.channel.name, entity = %link, "Linked entity not found");
            return Ok(false);
        };
        if let Some(key) = self.linked_key(ctx, &entity) {
            if key != issue.key {
                debug!(channel = %self.channel.name, entity = %link, linked = %key, issue = %issue.key, "Entity is linked to another issue");
                return Ok(false);
            }
        }

        let Some(ref changelog) = event.changelog else {
            return Ok(false);
        };

        let mut update = Map::new();
        for item in &changelog.items {
            let Some(mapping) = self.channel.inbound_mapping(item.field_id.as_deref(), &item.field) else {
                debug!(channel = %self.channel.name, field = %item.field, "Field is not synced from Jira");
                continue;
            };
            if let Some(value) = self.pull_field(ctx, mapping, item, &entity, &issue)? {
                update.insert(mapping.pm.clone(), value);
            }
        }

        if update.is_empty() {
            return Ok(false);
        }
        ctx.pm.update(&link.entity_type, link.id, &update)?;
        info!(
            channel = %self.channel.name,
            entity = %link,
            issue = %issue.key,
            fields = ?update.keys().collect::<Vec<_>>(),
            "Updated entity from Jira"
        );
        Ok(true)
    }
}
