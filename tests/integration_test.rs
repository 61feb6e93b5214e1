//! Integration tests for jira-bridge
//!
//! These tests drive the bridge end to end against the in-memory clients.

use jira_bridge::config::{BridgeSettings, ChannelSettings, JiraSettings, PmSettings};
use jira_bridge::event::{Changelog, ChangelogItem, JiraEvent, PmEvent, PmEventMeta};
use jira_bridge::integrations::memory::default_createmeta;
use jira_bridge::integrations::{CreateMetaField, JiraClient, JiraUser, MemoryJira, MemoryPm, PmClient};
use jira_bridge::syncer::{Identities, SyncContext, Syncer, SyncerRegistry};
use jira_bridge::{Bridge, BridgeError, Result};
use pm_api::{Entity, EntityRef, Filter};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

const JIRA_PROJECT_KEY: &str = "ST3";

fn entity(value: Value) -> Entity {
    value.as_object().cloned().unwrap()
}

fn jira_user() -> JiraUser {
    JiraUser {
        display_name: "Ford Prefect".to_string(),
        account_id: Some("557058:ford".to_string()),
        name: Some("ford.prefect".to_string()),
        key: Some("ford.prefect".to_string()),
        email: Some("ford@heartofgold.com".to_string()),
    }
}

fn jira_user_2() -> JiraUser {
    JiraUser {
        display_name: "Sync Sync".to_string(),
        account_id: Some("557058:syncsync".to_string()),
        name: Some("syncsync".to_string()),
        key: Some("syncsync".to_string()),
        email: Some("syncsync@blah.com".to_string()),
    }
}

fn settings() -> BridgeSettings {
    BridgeSettings::new(
        PmSettings::new("https://mocked.my.com", "jira-bridge", EntityRef::new("ApiUser", 1)),
        JiraSettings::new("https://myjira.atlassian.net", "shotgun-synch"),
    )
    .with_channel(ChannelSettings::new("task_issue", "task_issue"))
}

struct Fixture {
    pm: Arc<MemoryPm>,
    jira: Arc<MemoryJira>,
    bridge: Bridge,
}

impl Fixture {
    fn new() -> Self {
        Self::with(settings(), &SyncerRegistry::new())
    }

    fn with(settings: BridgeSettings, registry: &SyncerRegistry) -> Self {
        jira_bridge::logging::init_test();
        let pm = Arc::new(MemoryPm::new());
        let jira = Arc::new(MemoryJira::new());
        let bridge = Bridge::with_registry(&settings, pm.clone(), jira.clone(), registry).unwrap();
        Self { pm, jira, bridge }
    }

    /// Two projects (only the second linked to Jira), one task in each, two users
    fn seed(&self) {
        self.pm.add("Project", entity(json!({"id": 1, "name": "No Sync"})));
        self.pm.add(
            "Project",
            entity(json!({"id": 2, "name": "Sync", "sg_jira_key": JIRA_PROJECT_KEY})),
        );
        for (id, project) in [(1, 1), (2, 2)] {
            self.pm.add(
                "Task",
                entity(json!({
                    "id": id,
                    "content": format!("Task One/{}", id),
                    "task_assignees": [],
                    "sg_jira_key": null,
                    "project": {"type": "Project", "id": project}
                })),
            );
        }
        self.pm.add(
            "HumanUser",
            entity(json!({"id": 1, "name": "Ford Prefect", "email": "ford@heartofgold.com"})),
        );
        self.pm.add(
            "HumanUser",
            entity(json!({"id": 2, "name": "Sync sync", "email": "syncsync@blah.com"})),
        );
        self.jira.add_user(jira_user());
        self.jira.add_user(jira_user_2());
    }

    fn task_key(&self, id: i64) -> Option<String> {
        self.pm
            .get("Task", id)
            .and_then(|t| t.get("sg_jira_key").and_then(Value::as_str).map(str::to_string))
    }

    fn assignee_id(&self, key: &str) -> Option<String> {
        self.jira
            .issue(key)
            .unwrap()
            .and_then(|issue| issue.assignee())
            .and_then(|user| user.identity().map(str::to_string))
    }
}

fn human(id: i64) -> EntityRef {
    EntityRef::new("HumanUser", id)
}

fn status_event(project: i64) -> PmEvent {
    PmEvent::new(EntityRef::new("Project", project), human(1)).with_meta(PmEventMeta::attribute_change(
        "sg_status_list",
        json!("fin"),
        json!("wtg"),
    ))
}

fn assignee_event(added: &[i64], removed: &[i64]) -> PmEvent {
    PmEvent::new(EntityRef::new("Project", 2), human(1)).with_meta(PmEventMeta::multi_entity_change(
        "task_assignees",
        added.iter().map(|id| human(*id)).collect(),
        removed.iter().map(|id| human(*id)).collect(),
    ))
}

fn jira_event() -> JiraEvent {
    serde_json::from_value(json!({
        "changelog": {
            "id": "123456",
            "items": [{
                "field": "summary",
                "fieldId": "summary",
                "fieldtype": "jira",
                "from": null,
                "fromString": "foo ba",
                "to": null,
                "toString": "foo bar"
            }]
        },
        "issue": {
            "fields": {
                "assignee": {
                    "accountId": "557058:ford",
                    "displayName": "Ford Prefect",
                    "emailAddress": "ford@heartofgold.com",
                    "name": "ford.prefect",
                    "key": "ford.prefect"
                },
                "customfield_11501": "11794",
                "customfield_11502": "Task",
                "description": "Task (11794)",
                "issuetype": {"id": "10000", "name": "Task"},
                "project": {"key": "ST3", "id": "10100"},
                "status": {"id": "10204", "name": "Backlog"},
                "summary": "foo bar",
                "created": "2018-12-18T06:15:05.626-0500"
            },
            "id": "16642",
            "key": "ST3-4"
        },
        "issue_event_type_name": "issue_updated",
        "timestamp": 1545144267596i64,
        "user": {
            "accountId": "5b2be739a85c485354681b3b",
            "active": true,
            "displayName": "Marvin Paranoid",
            "emailAddress": "mparanoid@weefree.com",
            "key": "marvin.paranoid",
            "name": "marvin.paranoid"
        },
        "webhookEvent": "jira:issue_updated"
    }))
    .unwrap()
}

fn with_items(mut event: JiraEvent, items: Vec<ChangelogItem>) -> JiraEvent {
    event.changelog = Some(Changelog {
        id: Some("123457".to_string()),
        items,
    });
    event
}

mod project_match_tests {
    use super::*;

    #[test]
    fn test_unlinked_project_is_a_no_op() {
        let fixture = Fixture::new();
        fixture.seed();

        let wrote = fixture.bridge.sync_in_jira("task_issue", "Task", 1, &status_event(1)).unwrap();
        assert!(!wrote);
        assert!(fixture.jira.project(JIRA_PROJECT_KEY).unwrap().is_none());
        assert_eq!(fixture.jira.write_count(), 0);
        assert_eq!(fixture.pm.write_count(), 0);
    }

    #[test]
    fn test_missing_jira_project() {
        let fixture = Fixture::new();
        fixture.seed();

        let err = fixture
            .bridge
            .sync_in_jira("task_issue", "Task", 2, &status_event(2))
            .unwrap_err();
        assert!(matches!(err, BridgeError::RemoteState(_)));
        assert!(err.to_string().contains("Unable to retrieve a Jira Project"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_missing_required_field() {
        let fixture = Fixture::new();
        fixture.seed();
        fixture.jira.set_projects([JIRA_PROJECT_KEY]);

        let meta: BTreeMap<String, CreateMetaField> =
            [("faked".to_string(), CreateMetaField::new("Faked", true, false))].into();
        fixture.jira.set_createmeta(meta);

        let err = fixture
            .bridge
            .sync_in_jira("task_issue", "Task", 2, &status_event(2))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"The following data is missing in order to create a Jira Task Issue: ["Faked"]"#
        );
        assert_eq!(err.fields(), ["Faked".to_string()]);
        assert!(fixture.jira.issues().is_empty());
        assert!(fixture.task_key(2).is_none());
    }

    #[test]
    fn test_issue_creation() {
        let fixture = Fixture::new();
        fixture.seed();
        fixture.jira.set_projects([JIRA_PROJECT_KEY]);
        fixture.jira.set_createmeta(default_createmeta());

        let wrote = fixture.bridge.sync_in_jira("task_issue", "Task", 2, &status_event(2)).unwrap();
        assert!(wrote);

        let key = fixture.task_key(2).unwrap();
        assert_eq!(key, "ST3-1");
        let issue = fixture.jira.issue(&key).unwrap().unwrap();
        assert_eq!(issue.summary(), Some("Task One/2"));
        assert_eq!(issue.field("customfield_11501"), Some(&json!("2")));
        assert_eq!(issue.field("customfield_11502"), Some(&json!("Task")));
        assert_eq!(issue.field("issuetype"), Some(&json!({"name": "Task"})));
        assert_eq!(issue.project_key(), Some(JIRA_PROJECT_KEY));
    }

    #[test]
    fn test_resubmission_relinks_existing_issue() {
        let fixture = Fixture::new();
        fixture.seed();
        fixture.jira.set_projects([JIRA_PROJECT_KEY]);

        assert!(fixture.bridge.sync_in_jira("task_issue", "Task", 2, &status_event(2)).unwrap());
        // Simulate a lost cross reference write
        fixture.pm.set("Task", 2, "sg_jira_key", Value::Null);

        assert!(fixture.bridge.sync_in_jira("task_issue", "Task", 2, &status_event(2)).unwrap());
        assert_eq!(fixture.jira.issues().len(), 1);
        assert_eq!(fixture.task_key(2).as_deref(), Some("ST3-1"));
    }

    #[test]
    fn test_missing_link_field_in_schema() {
        let fixture = Fixture::new();
        fixture.pm.add(
            "Project",
            entity(json!({"id": 2, "sg_jira_key": JIRA_PROJECT_KEY})),
        );
        fixture.pm.add(
            "Task",
            entity(json!({"id": 5, "content": "No link field", "project": {"type": "Project", "id": 2}})),
        );
        fixture.jira.set_projects([JIRA_PROJECT_KEY]);

        let err = fixture
            .bridge
            .sync_in_jira("task_issue", "Task", 5, &status_event(2))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
        assert!(fixture.jira.issues().is_empty());
    }

    #[test]
    fn test_linked_issue_must_exist() {
        let fixture = Fixture::new();
        fixture.seed();
        fixture.jira.set_projects([JIRA_PROJECT_KEY]);
        fixture.pm.set("Task", 2, "sg_jira_key", json!("ST3-99"));

        let err = fixture
            .bridge
            .sync_in_jira("task_issue", "Task", 2, &status_event(2))
            .unwrap_err();
        assert!(matches!(err, BridgeError::RemoteState(_)));
    }

    #[test]
    fn test_missing_entity_is_a_no_op() {
        let fixture = Fixture::new();
        fixture.seed();
        assert!(!fixture.bridge.sync_in_jira("task_issue", "Task", 404, &status_event(2)).unwrap());
    }
}

mod field_push_tests {
    use super::*;

    fn linked_fixture() -> (Fixture, String) {
        let fixture = Fixture::new();
        fixture.seed();
        fixture.jira.set_projects([JIRA_PROJECT_KEY]);
        fixture.bridge.sync_in_jira("task_issue", "Task", 2, &status_event(2)).unwrap();
        let key = fixture.task_key(2).unwrap();
        (fixture, key)
    }

    #[test]
    fn test_status_transition() {
        let (fixture, key) = linked_fixture();
        fixture.pm.set("Task", 2, "sg_status_list", json!("ip"));

        assert!(fixture.bridge.sync_in_jira("task_issue", "Task", 2, &status_event(2)).unwrap());
        let issue = fixture.jira.issue(&key).unwrap().unwrap();
        assert_eq!(issue.status_name(), Some("In Progress"));

        // Already in the right status: nothing to write
        assert!(!fixture.bridge.sync_in_jira("task_issue", "Task", 2, &status_event(2)).unwrap());
    }

    #[test]
    fn test_unmapped_status_value() {
        let (fixture, _) = linked_fixture();
        fixture.pm.set("Task", 2, "sg_status_list", json!("omt"));

        let err = fixture
            .bridge
            .sync_in_jira("task_issue", "Task", 2, &status_event(2))
            .unwrap_err();
        assert_eq!(err.fields(), ["sg_status_list".to_string()]);
    }

    #[test]
    fn test_summary_update_and_unmapped_field() {
        let (fixture, key) = linked_fixture();
        fixture.pm.set("Task", 2, "content", json!("Renamed"));

        let rename = PmEvent::new(EntityRef::new("Project", 2), human(1)).with_meta(
            PmEventMeta::attribute_change("content", json!("Task One/2"), json!("Renamed")),
        );
        assert!(fixture.bridge.sync_in_jira("task_issue", "Task", 2, &rename).unwrap());
        let issue = fixture.jira.issue(&key).unwrap().unwrap();
        assert_eq!(issue.summary(), Some("Renamed"));

        let writes = fixture.jira.write_count();
        let unmapped = PmEvent::new(EntityRef::new("Project", 2), human(1)).with_meta(
            PmEventMeta::attribute_change("sg_cut_in", json!(1001), json!(1010)),
        );
        assert!(!fixture.bridge.sync_in_jira("task_issue", "Task", 2, &unmapped).unwrap());
        assert_eq!(fixture.jira.write_count(), writes);
    }

    #[test]
    fn test_event_without_meta_is_a_no_op_once_linked() {
        let (fixture, _) = linked_fixture();
        let event = PmEvent::new(EntityRef::new("Project", 2), human(1));
        assert!(!fixture.bridge.sync_in_jira("task_issue", "Task", 2, &event).unwrap());
    }
}

mod assignee_tests {
    use super::*;

    #[test]
    fn test_assignee_life_cycle() {
        let fixture = Fixture::new();
        fixture.seed();
        fixture.jira.set_projects([JIRA_PROJECT_KEY]);

        // Removing an assignee from an unlinked task creates the issue, unassigned
        fixture
            .bridge
            .sync_in_jira("task_issue", "Task", 2, &assignee_event(&[], &[1]))
            .unwrap();
        let key = fixture.task_key(2).unwrap();
        assert_eq!(fixture.assignee_id(&key), None);

        // Add an assignee
        assert!(fixture
            .bridge
            .sync_in_jira("task_issue", "Task", 2, &assignee_event(&[1], &[]))
            .unwrap());
        assert_eq!(fixture.assignee_id(&key).as_deref(), Some("557058:ford"));

        // Replace the current assignee
        assert!(fixture
            .bridge
            .sync_in_jira("task_issue", "Task", 2, &assignee_event(&[2], &[1]))
            .unwrap());
        assert_eq!(fixture.assignee_id(&key).as_deref(), Some("557058:syncsync"));

        // Someone changes the assignee directly in Jira
        fixture
            .jira
            .set_issue_field(&key, "assignee", json!({"accountId": "557058:ford"}));
        assert_eq!(fixture.assignee_id(&key).as_deref(), Some("557058:ford"));

        // Removing a stale assignee keeps the current one
        assert!(!fixture
            .bridge
            .sync_in_jira("task_issue", "Task", 2, &assignee_event(&[], &[2]))
            .unwrap());
        assert_eq!(fixture.assignee_id(&key).as_deref(), Some("557058:ford"));

        // Removing the current assignee clears it
        assert!(fixture
            .bridge
            .sync_in_jira("task_issue", "Task", 2, &assignee_event(&[], &[2, 1]))
            .unwrap());
        assert_eq!(fixture.assignee_id(&key), None);
    }

    #[test]
    fn test_creation_uses_first_assignee() {
        let fixture = Fixture::new();
        fixture.seed();
        fixture.jira.set_projects([JIRA_PROJECT_KEY]);
        fixture.pm.set(
            "Task",
            2,
            "task_assignees",
            json!([{"type": "HumanUser", "id": 2}, {"type": "HumanUser", "id": 1}]),
        );

        fixture.bridge.sync_in_jira("task_issue", "Task", 2, &status_event(2)).unwrap();
        let key = fixture.task_key(2).unwrap();
        assert_eq!(fixture.assignee_id(&key).as_deref(), Some("557058:syncsync"));
    }
}

mod jira_to_pm_tests {
    use super::*;

    fn add_linked_task(fixture: &Fixture) {
        fixture.pm.add("Project", entity(json!({"id": 1, "name": "No Sync"})));
        fixture.pm.add(
            "Task",
            entity(json!({
                "id": 11794,
                "content": "Task (11794)",
                "task_assignees": [],
                "project": {"type": "Project", "id": 1}
            })),
        );
    }

    #[test]
    fn test_missing_entity_creates_nothing() {
        let fixture = Fixture::new();
        let find = || fixture.pm.find("Task", &[Filter::is("id", 11794)], &[]).unwrap();
        assert!(find().is_empty());

        assert!(!fixture.bridge.sync_in_pm("task_issue", "Issue", "FAKED-01", &jira_event()).unwrap());
        assert!(find().is_empty());
        assert_eq!(fixture.pm.write_count(), 0);
    }

    #[test]
    fn test_summary_change() {
        let fixture = Fixture::new();
        add_linked_task(&fixture);

        assert!(fixture.bridge.sync_in_pm("task_issue", "Issue", "FAKED-01", &jira_event()).unwrap());
        assert_eq!(fixture.pm.get("Task", 11794).unwrap()["content"], "foo bar");

        // Re-delivery finds nothing left to do
        assert!(!fixture.bridge.sync_in_pm("task_issue", "Issue", "FAKED-01", &jira_event()).unwrap());
    }

    #[test]
    fn test_own_jira_events_are_ignored() {
        let fixture = Fixture::new();
        add_linked_task(&fixture);

        let mut event = jira_event();
        event.user = Some(JiraUser {
            account_id: Some("5b2be739a85c485354681b3b".to_string()),
            email: Some("foo@blah.com".to_string()),
            key: Some(fixture.bridge.current_jira_username().to_string()),
            name: Some(fixture.bridge.current_jira_username().to_string()),
            ..Default::default()
        });
        assert!(!fixture.bridge.sync_in_pm("task_issue", "Issue", "ST3-4", &event).unwrap());
        assert_eq!(fixture.pm.get("Task", 11794).unwrap()["content"], "Task (11794)");
    }

    #[test]
    fn test_entity_linked_to_another_issue() {
        let fixture = Fixture::new();
        add_linked_task(&fixture);
        fixture.pm.set("Task", 11794, "sg_jira_key", json!("ST3-1"));

        assert!(!fixture.bridge.sync_in_pm("task_issue", "Issue", "ST3-4", &jira_event()).unwrap());
    }

    #[test]
    fn test_status_change() {
        let fixture = Fixture::new();
        add_linked_task(&fixture);

        let event = with_items(
            jira_event(),
            vec![ChangelogItem::new("status", Some("Backlog"), Some("In Progress"))],
        );
        assert!(fixture.bridge.sync_in_pm("task_issue", "Issue", "ST3-4", &event).unwrap());
        assert_eq!(fixture.pm.get("Task", 11794).unwrap()["sg_status_list"], "ip");

        let unknown = with_items(
            jira_event(),
            vec![ChangelogItem::new("status", Some("In Progress"), Some("Won't Do"))],
        );
        let err = fixture.bridge.sync_in_pm("task_issue", "Issue", "ST3-4", &unknown).unwrap_err();
        assert!(matches!(err, BridgeError::Validation { .. }));
    }

    #[test]
    fn test_due_date_change_uses_raw_value() {
        let fixture = Fixture::new();
        add_linked_task(&fixture);

        let mut item = ChangelogItem::new("duedate", None, Some("20/Dec/18"));
        item.to = Some("2018-12-20".to_string());
        let event = with_items(jira_event(), vec![item]);

        assert!(fixture.bridge.sync_in_pm("task_issue", "Issue", "ST3-4", &event).unwrap());
        assert_eq!(fixture.pm.get("Task", 11794).unwrap()["due_date"], "2018-12-20");
    }

    #[test]
    fn test_assignee_change() {
        let fixture = Fixture::new();
        fixture.seed();
        add_linked_task(&fixture);

        let mut assign = ChangelogItem::new("assignee", None, Some("Ford Prefect"));
        assign.to = Some("557058:ford".to_string());
        let event = with_items(jira_event(), vec![assign]);
        assert!(fixture.bridge.sync_in_pm("task_issue", "Issue", "ST3-4", &event).unwrap());
        assert_eq!(
            fixture.pm.get("Task", 11794).unwrap()["task_assignees"],
            json!([{"type": "HumanUser", "id": 1}])
        );

        let mut unassign = ChangelogItem::new("assignee", Some("Ford Prefect"), None);
        unassign.from = Some("557058:ford".to_string());
        let mut event = with_items(jira_event(), vec![unassign]);
        if let Some(ref mut issue) = event.issue {
            issue.fields.insert("assignee".to_string(), Value::Null);
        }
        assert!(fixture.bridge.sync_in_pm("task_issue", "Issue", "ST3-4", &event).unwrap());
        assert_eq!(fixture.pm.get("Task", 11794).unwrap()["task_assignees"], json!([]));
    }

    #[test]
    fn test_issue_fetched_when_payload_has_none() {
        let fixture = Fixture::new();
        fixture.seed();
        fixture.jira.set_projects([JIRA_PROJECT_KEY]);
        fixture.bridge.sync_in_jira("task_issue", "Task", 2, &status_event(2)).unwrap();
        let key = fixture.task_key(2).unwrap();

        let mut event = jira_event();
        event.issue = None;
        assert!(fixture.bridge.sync_in_pm("task_issue", "Issue", &key, &event).unwrap());
        assert_eq!(fixture.pm.get("Task", 2).unwrap()["content"], "foo bar");
    }

    #[test]
    fn test_non_issue_resources_are_ignored() {
        let fixture = Fixture::new();
        add_linked_task(&fixture);
        assert!(!fixture.bridge.sync_in_pm("task_issue", "Project", "ST3", &jira_event()).unwrap());
    }
}

mod acceptance_tests {
    use super::*;

    #[test]
    fn test_events_without_project_are_rejected() {
        let fixture = Fixture::new();
        let syncer = fixture.bridge.syncer("task_issue").unwrap();
        let ctx = fixture.bridge.context();

        for user in [None, Some(human(1)), Some(EntityRef::new("ApiUser", 1))] {
            let event = PmEvent {
                user,
                project: None,
                meta: Some(PmEventMeta::attribute_change("content", json!("a"), json!("b"))),
            };
            assert!(!syncer.accept_pm_event(&ctx, "Task", 123, &event).unwrap());
        }
        assert!(!syncer.accept_pm_event(&ctx, "Task", 123, &PmEvent::default()).unwrap());
    }

    #[test]
    fn test_own_events_are_rejected() {
        let mut fixture = Fixture::new();
        fixture.seed();
        fixture.jira.set_projects([JIRA_PROJECT_KEY]);

        let own = PmEvent::new(
            EntityRef::new("Project", 2),
            fixture.bridge.current_pm_identity().clone(),
        )
        .with_meta(PmEventMeta::attribute_change("content", json!("a"), json!("b")));
        assert!(!fixture.bridge.sync_in_jira("task_issue", "Task", 2, &own).unwrap());
        assert_eq!(fixture.jira.write_count(), 0);

        // Swapping identities changes what counts as an echo
        fixture
            .bridge
            .set_identities(Identities::new(human(1), "shotgun-synch"));
        assert!(!fixture.bridge.sync_in_jira("task_issue", "Task", 2, &status_event(2)).unwrap());
        assert!(fixture.bridge.sync_in_jira("task_issue", "Task", 2, &own).unwrap());
    }

    #[test]
    fn test_unsupported_entity_types_are_rejected() {
        let fixture = Fixture::new();
        let syncer = fixture.bridge.syncer("task_issue").unwrap();
        let ctx = fixture.bridge.context();
        let event = status_event(1);

        assert!(syncer.accept_pm_event(&ctx, "Task", 123, &event).unwrap());
        for entity_type in ["Ticket", "Shot", "task"] {
            assert!(!syncer.accept_pm_event(&ctx, entity_type, 123, &event).unwrap());
        }
    }

    #[test]
    fn test_jira_event_filters() {
        let fixture = Fixture::new();
        let syncer = fixture.bridge.syncer("task_issue").unwrap();
        let ctx = fixture.bridge.context();

        assert!(!syncer.accept_jira_event(&ctx, "Issue", "FAKED-001", &JiraEvent::default()).unwrap());
        assert!(syncer.accept_jira_event(&ctx, "Issue", "FAKED-001", &jira_event()).unwrap());

        for webhook in [None, Some("this is not valid"), Some("jira:issue_deleted")] {
            let mut event = jira_event();
            event.webhook_event = webhook.map(str::to_string);
            assert!(!syncer.accept_jira_event(&ctx, "Issue", "FAKED-001", &event).unwrap());
        }

        let mut event = jira_event();
        event.changelog = None;
        assert!(!syncer.accept_jira_event(&ctx, "Issue", "FAKED-001", &event).unwrap());
    }
}

mod registry_tests {
    use super::*;

    struct BadSync;

    impl Syncer for BadSync {
        fn name(&self) -> &str {
            "bad_sync"
        }

        fn supports_entity_type(&self, _entity_type: &str) -> bool {
            true
        }

        fn sync_in_jira(&self, _: &SyncContext<'_>, _: &str, _: i64, _: &PmEvent) -> Result<bool> {
            Err(BridgeError::RemoteState("Sorry, I'm bad!".to_string()))
        }

        fn sync_in_pm(&self, _: &SyncContext<'_>, _: &str, _: &str, _: &JiraEvent) -> Result<bool> {
            Err(BridgeError::RemoteState("Sorry, I'm bad!".to_string()))
        }
    }

    struct BadAccept;

    impl Syncer for BadAccept {
        fn name(&self) -> &str {
            "bad_accept"
        }

        fn supports_entity_type(&self, _entity_type: &str) -> bool {
            true
        }

        fn accept_pm_event(&self, _: &SyncContext<'_>, _: &str, _: i64, _: &PmEvent) -> Result<bool> {
            Err(BridgeError::RemoteState("Sorry, I'm bad!".to_string()))
        }

        fn accept_jira_event(&self, _: &SyncContext<'_>, _: &str, _: &str, _: &JiraEvent) -> Result<bool> {
            Err(BridgeError::RemoteState("Sorry, I'm bad!".to_string()))
        }

        fn sync_in_jira(&self, _: &SyncContext<'_>, _: &str, _: i64, _: &PmEvent) -> Result<bool> {
            Ok(true)
        }

        fn sync_in_pm(&self, _: &SyncContext<'_>, _: &str, _: &str, _: &JiraEvent) -> Result<bool> {
            Ok(true)
        }
    }

    fn registry() -> SyncerRegistry {
        let mut registry = SyncerRegistry::new();
        registry.register("bad_accept", |_: &ChannelSettings| -> Result<Box<dyn Syncer>> {
            Ok(Box::new(BadAccept))
        });
        registry.register("bad_setup", |_: &ChannelSettings| -> Result<Box<dyn Syncer>> {
            Err(BridgeError::Configuration("Sorry, I'm bad!".to_string()))
        });
        registry.register("bad_sync", |_: &ChannelSettings| -> Result<Box<dyn Syncer>> {
            Ok(Box::new(BadSync))
        });
        registry
    }

    #[test]
    fn test_bad_setup_fails_the_bridge() {
        let settings = settings().with_channel(ChannelSettings::new("bad_setup", "bad_setup"));
        let result = Bridge::with_registry(
            &settings,
            Arc::new(MemoryPm::new()),
            Arc::new(MemoryJira::new()),
            &registry(),
        );
        let err = result.err().unwrap();
        assert!(err.to_string().contains("Sorry, I'm bad!"));
    }

    #[test]
    fn test_acceptance_errors_propagate_unmodified() {
        let settings = settings().with_channel(ChannelSettings::new("bad_accept", "bad_accept"));
        let fixture = Fixture::with(settings, &registry());

        let err = fixture
            .bridge
            .sync_in_jira("bad_accept", "Task", 123, &status_event(1))
            .unwrap_err();
        assert!(matches!(err, BridgeError::RemoteState(_)));
        assert_eq!(err.to_string(), "Sorry, I'm bad!");

        let err = fixture
            .bridge
            .sync_in_pm("bad_accept", "Issue", "ST3-4", &jira_event())
            .unwrap_err();
        assert_eq!(err.to_string(), "Sorry, I'm bad!");
        assert_eq!(fixture.jira.write_count(), 0);
        assert_eq!(fixture.pm.write_count(), 0);
    }

    #[test]
    fn test_sync_errors_propagate_unmodified() {
        let settings = settings().with_channel(ChannelSettings::new("bad_sync", "bad_sync"));
        let fixture = Fixture::with(settings, &registry());

        let err = fixture
            .bridge
            .sync_in_jira("bad_sync", "Task", 123, &status_event(1))
            .unwrap_err();
        assert_eq!(err.to_string(), "Sorry, I'm bad!");

        // Rejected events never reach the syncer
        let own = PmEvent::new(EntityRef::new("Project", 1), EntityRef::new("ApiUser", 1));
        assert!(!fixture.bridge.sync_in_jira("bad_sync", "Task", 123, &own).unwrap());
    }

    #[test]
    fn test_unknown_syncer_kind() {
        let settings = settings().with_channel(ChannelSettings::new("mystery", "mystery"));
        let result = Bridge::new(&settings, Arc::new(MemoryPm::new()), Arc::new(MemoryJira::new()));
        assert!(matches!(result.err(), Some(BridgeError::Configuration(_))));
    }
}

mod settings_tests {
    use super::*;
    use jira_bridge::config::validate_settings;
    use tempfile::TempDir;

    #[test]
    fn test_settings_round_trip_builds_a_bridge() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.yaml");

        settings().save(&path).unwrap();
        let loaded = BridgeSettings::load(&path).unwrap();
        assert!(validate_settings(&loaded).is_ok());

        let bridge = Bridge::new(&loaded, Arc::new(MemoryPm::new()), Arc::new(MemoryJira::new())).unwrap();
        assert_eq!(bridge.channel_names(), vec!["task_issue"]);
        assert_eq!(bridge.current_jira_username(), "shotgun-synch");
    }
}
