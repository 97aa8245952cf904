//! End-to-end engine tests against mock source/target clients.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use super::retry::RetryPolicy;
use super::store::IdentityMap;
use super::testing::{MockSource, MockTarget};
use super::Migrator;
use crate::config::AppConfig;
use crate::model::source::{
    ClassificationNode, SourceComment, SourceIdentity, SourceItem, SourceRelation,
};

fn config(state_dir: &std::path::Path) -> AppConfig {
    let mut cfg: AppConfig = toml::from_str(
        r#"
[source]
org_url = "https://dev.azure.com/acme"
project = "ProjectX"
pat = "secret"

[target]
base_url = "https://gitlab.example.com"
pat = "glpat"
project_id = 42

[types]
map = { "Epic" = "epic" }

[states.map.Done]
labels = ["status::done"]
close = true

[tags]
enabled = true
prefix = "tag::"

[areas]
enabled = true

[milestones]
enabled = true

[comments]
enabled = true
migrate_images = true

[links]
map = { "System.LinkTypes.Related" = "relates_to", "System.LinkTypes.Duplicate" = "" }
"#,
    )
    .unwrap();
    cfg.state.dir = state_dir.to_path_buf();
    cfg
}

fn migrator<'a>(
    cfg: &'a AppConfig,
    source: &'a MockSource,
    target: &'a MockTarget,
) -> Migrator<'a> {
    let store = IdentityMap::load(cfg.map_file_path());
    Migrator::new(cfg, source, target, store)
        .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(1)))
}

fn item(id: i64, item_type: &str, state: &str) -> SourceItem {
    SourceItem {
        id,
        item_type: item_type.to_string(),
        state: state.to_string(),
        title: format!("Item {id}"),
        rich_fields: HashMap::from([(
            "System.Description".to_string(),
            format!("<p>Body of {id}</p>"),
        )]),
        ..Default::default()
    }
}

fn relation(rel: &str, target_id: i64) -> SourceRelation {
    SourceRelation {
        rel: rel.to_string(),
        url: format!("https://dev.azure.com/acme/ProjectX/_apis/wit/workitems/{target_id}"),
        name: None,
    }
}

fn ts(second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, second).unwrap()
}

#[tokio::test]
async fn idempotent_rerun_creates_each_item_once() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let mut epic = item(1, "Epic", "Active");
    let mut issue = item(2, "Bug", "Active");
    // Forward hierarchy: the relation's target is the parent.
    issue.relations = vec![relation("System.LinkTypes.Hierarchy-Forward", 1)];
    epic.relations = vec![];
    let source = MockSource {
        items: vec![epic, issue],
        ..Default::default()
    };
    let target = MockTarget::new();

    let first = migrator(&cfg, &source, &target).run().await.unwrap();
    assert_eq!(first.created, 2);
    assert_eq!(first.skipped_existing, 0);
    assert_eq!(target.epics_created.lock().unwrap().len(), 1);
    assert_eq!(target.issues_created.lock().unwrap().len(), 1);
    assert_eq!(first.links_created, 1);
    assert_eq!(target.epic_issue_links.lock().unwrap().len(), 1);

    // Second run against the persisted map: zero new items, and the
    // relation replay is absorbed as an idempotent no-op.
    let second = migrator(&cfg, &source, &target).run().await.unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.skipped_existing, 2);
    assert_eq!(target.epics_created.lock().unwrap().len(), 1);
    assert_eq!(target.issues_created.lock().unwrap().len(), 1);
    assert_eq!(second.links_created, 0);
    assert_eq!(second.failed, 0);
    assert_eq!(target.epic_issue_links.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn relation_to_unmapped_target_produces_no_target_calls() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let mut issue = item(2, "Bug", "Active");
    issue.relations = vec![relation("System.LinkTypes.Related", 99)];
    let source = MockSource {
        items: vec![issue],
        ..Default::default()
    };
    let target = MockTarget::new();

    let summary = migrator(&cfg, &source, &target).run().await.unwrap();
    assert_eq!(target.link_calls.load(Ordering::SeqCst), 0);
    assert!(target.issue_links.lock().unwrap().is_empty());
    assert_eq!(summary.links_skipped, 1);
}

#[tokio::test]
async fn issue_to_issue_hierarchy_degrades_to_relates_to() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let mut parent = item(2, "Task", "Active");
    // Reverse hierarchy: this item is the parent of the relation's target.
    parent.relations = vec![relation("System.LinkTypes.Hierarchy-Reverse", 3)];
    let child = item(3, "Task", "Active");
    let source = MockSource {
        items: vec![parent, child],
        ..Default::default()
    };
    let target = MockTarget::new();

    let summary = migrator(&cfg, &source, &target).run().await.unwrap();
    assert_eq!(summary.links_created, 1);
    let links = target.issue_links.lock().unwrap();
    assert!(links.iter().any(|(_, _, t)| t == "relates_to"));
}

#[tokio::test]
async fn ignored_and_unmapped_link_types_are_both_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let mut issue = item(2, "Bug", "Active");
    issue.relations = vec![
        relation("System.LinkTypes.Duplicate", 3), // mapped to "" = explicit ignore
        relation("System.LinkTypes.Exotic", 3),    // absent from the table, no default
    ];
    let other = item(3, "Bug", "Active");
    let source = MockSource {
        items: vec![issue, other],
        ..Default::default()
    };
    let target = MockTarget::new();

    let summary = migrator(&cfg, &source, &target).run().await.unwrap();
    assert_eq!(target.link_calls.load(Ordering::SeqCst), 0);
    assert_eq!(summary.links_skipped, 2);
}

#[tokio::test]
async fn generic_links_require_both_endpoints_to_be_issues() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let epic = item(1, "Epic", "Active");
    let mut issue = item(2, "Bug", "Active");
    issue.relations = vec![relation("System.LinkTypes.Related", 1)];
    let source = MockSource {
        items: vec![epic, issue],
        ..Default::default()
    };
    let target = MockTarget::new();

    let summary = migrator(&cfg, &source, &target).run().await.unwrap();
    assert!(target.issue_links.lock().unwrap().is_empty());
    assert_eq!(summary.links_skipped, 1);
}

#[tokio::test]
async fn close_action_state_closes_the_created_issue() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let source = MockSource {
        items: vec![item(4, "Bug", "Done")],
        ..Default::default()
    };
    let target = MockTarget::new();

    migrator(&cfg, &source, &target).run().await.unwrap();
    let issues = target.issues_created.lock().unwrap();
    assert!(issues[0].labels.contains(&"status::done".to_string()));
    assert_eq!(target.closed_issues.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn duplicate_item_create_leaves_item_unmapped() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let source = MockSource {
        items: vec![item(5, "Bug", "Active")],
        ..Default::default()
    };
    let target = MockTarget {
        item_creates_are_duplicates: true,
        ..MockTarget::new()
    };

    let summary = migrator(&cfg, &source, &target).run().await.unwrap();
    assert_eq!(summary.created, 0);
    assert_eq!(summary.failed, 0);
    assert!(IdentityMap::load(cfg.map_file_path()).is_empty());
}

#[tokio::test]
async fn milestone_create_race_is_resolved_by_relisting() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let mut issue = item(6, "Bug", "Active");
    issue.iteration_path = "ProjectX\\Sprint 1".to_string();
    let source = MockSource {
        items: vec![issue],
        nodes: HashMap::from([(
            "ProjectX\\Sprint 1".to_string(),
            ClassificationNode {
                name: "Sprint 1".to_string(),
                start_date: Some("2024-05-01T00:00:00Z".to_string()),
                finish_date: Some("not-a-date".to_string()),
            },
        )]),
        ..Default::default()
    };
    let target = MockTarget {
        milestone_create_races: true,
        ..MockTarget::new()
    };

    migrator(&cfg, &source, &target).run().await.unwrap();
    assert_eq!(target.milestone_create_calls.load(Ordering::SeqCst), 1);
    let issues = target.issues_created.lock().unwrap();
    assert_eq!(issues[0].milestone_id, Some(1));
}

#[tokio::test]
async fn iteration_node_lookups_are_cached_per_path() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let mut a = item(7, "Bug", "Active");
    a.iteration_path = "ProjectX\\Sprint 2".to_string();
    let mut b = item(8, "Bug", "Active");
    b.iteration_path = "ProjectX\\Sprint 2".to_string();
    let source = MockSource {
        items: vec![a, b],
        ..Default::default()
    };
    let target = MockTarget::new();

    migrator(&cfg, &source, &target).run().await.unwrap();
    assert_eq!(source.node_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn epics_do_not_receive_milestones() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let mut epic = item(9, "Epic", "Active");
    epic.iteration_path = "ProjectX\\Sprint 3".to_string();
    let source = MockSource {
        items: vec![epic],
        ..Default::default()
    };
    let target = MockTarget::new();

    migrator(&cfg, &source, &target).run().await.unwrap();
    let epics = target.epics_created.lock().unwrap();
    assert_eq!(epics[0].milestone_id, None);
}

#[tokio::test]
async fn comments_are_replayed_in_ascending_order_with_header() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let issue = item(10, "Bug", "Active");
    let alice = SourceIdentity {
        display_name: "Alice".to_string(),
        unique_name: Some("alice@example.com".to_string()),
    };
    let source = MockSource {
        items: vec![issue],
        comments: HashMap::from([(
            10,
            vec![
                SourceComment {
                    id: 2,
                    text: "<p>second</p>".to_string(),
                    created_by: Some(alice.clone()),
                    created_date: Some(ts(30)),
                },
                SourceComment {
                    id: 1,
                    text: "<p>first</p>".to_string(),
                    created_by: Some(alice),
                    created_date: Some(ts(10)),
                },
            ],
        )]),
        ..Default::default()
    };
    let target = MockTarget::new();

    let summary = migrator(&cfg, &source, &target).run().await.unwrap();
    assert_eq!(summary.comments_migrated, 2);
    let bodies = target.issue_note_bodies();
    assert!(bodies[0].ends_with("first"));
    assert!(bodies[1].ends_with("second"));
    assert!(bodies[0].starts_with(
        "**Comment from ADO by ADO user: Alice [alice@example.com] on 2024-03-01 10:00:10 UTC:**"
    ));
    let notes = target.issue_notes.lock().unwrap();
    assert_eq!(notes[0].1.created_at, Some(ts(10)));
}

#[tokio::test]
async fn comment_without_timestamp_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let issue = item(11, "Bug", "Active");
    let source = MockSource {
        items: vec![issue],
        comments: HashMap::from([(
            11,
            vec![SourceComment {
                id: 1,
                text: "<p>orphan</p>".to_string(),
                created_by: None,
                created_date: None,
            }],
        )]),
        ..Default::default()
    };
    let target = MockTarget::new();

    let summary = migrator(&cfg, &source, &target).run().await.unwrap();
    assert_eq!(summary.comments_migrated, 0);
    assert_eq!(summary.comments_failed, 1);
    assert!(target.issue_notes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn images_are_rehosted_or_replaced_with_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let issue = item(12, "Bug", "Active");
    let source = MockSource {
        items: vec![issue],
        comments: HashMap::from([(
            12,
            vec![SourceComment {
                id: 1,
                text: concat!(
                    r#"<p>ok: <img src="https://dev.azure.com/acme/img/shot.png"> "#,
                    r#"broken: <img src="https://dev.azure.com/acme/img/gone.png"></p>"#
                )
                .to_string(),
                created_by: None,
                created_date: Some(ts(5)),
            }],
        )]),
        images: HashMap::from([(
            "https://dev.azure.com/acme/img/shot.png".to_string(),
            vec![137, 80, 78, 71],
        )]),
        ..Default::default()
    };
    let target = MockTarget::new();

    migrator(&cfg, &source, &target).run().await.unwrap();
    let bodies = target.issue_note_bodies();
    assert!(bodies[0].contains("(/uploads/abc123/shot.png)"));
    assert!(bodies[0]
        .contains("[Image: https://dev.azure.com/acme/img/gone.png - Migration Failed]"));
    assert_eq!(target.uploads.lock().unwrap().as_slice(), &["shot.png"]);
}

#[tokio::test]
async fn each_label_name_is_resolved_at_most_once_per_run() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let mut a = item(13, "Bug", "Active");
    a.tags = "ui;ui; ui".to_string();
    let mut b = item(14, "Bug", "Active");
    b.tags = "ui".to_string();
    let source = MockSource {
        items: vec![a, b],
        ..Default::default()
    };
    let target = MockTarget::new();

    migrator(&cfg, &source, &target).run().await.unwrap();
    // Unique names across both items: ado_state::Active, ado_type::Bug, tag::ui.
    assert_eq!(target.label_get_calls.load(Ordering::SeqCst), 3);
    assert_eq!(target.labels_created.lock().unwrap().len(), 3);
    let issues = target.issues_created.lock().unwrap();
    assert_eq!(
        issues[0].labels.iter().filter(|l| *l == "tag::ui").count(),
        1
    );
}

#[tokio::test]
async fn failed_label_creation_degrades_to_fewer_labels() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let source = MockSource {
        items: vec![item(15, "Bug", "Active")],
        ..Default::default()
    };
    let target = MockTarget {
        fail_label_creates: true,
        ..MockTarget::new()
    };

    let summary = migrator(&cfg, &source, &target).run().await.unwrap();
    // The item is still created and mapped, just without labels.
    assert_eq!(summary.created, 1);
    let issues = target.issues_created.lock().unwrap();
    assert!(issues[0].labels.is_empty());
}

#[tokio::test]
async fn description_carries_converted_markdown_and_footer() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let mut issue = item(16, "Bug", "Active");
    issue.rich_fields.insert(
        "System.Description".to_string(),
        "<p><b>bold</b> body</p>".to_string(),
    );
    issue.tags = "ui".to_string();
    let source = MockSource {
        items: vec![issue],
        ..Default::default()
    };
    let target = MockTarget::new();

    migrator(&cfg, &source, &target).run().await.unwrap();
    let issues = target.issues_created.lock().unwrap();
    let description = &issues[0].description;
    assert!(description.starts_with("**bold** body"));
    assert!(description.contains("Migrated from ADO #16 (Type: Bug, State: Active"));
    assert!(description.contains("Original ADO Tags: ui"));
}

#[tokio::test]
async fn comment_fetch_failure_does_not_fail_the_item() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let source = MockSource {
        items: vec![item(17, "Bug", "Active")],
        fail_comment_fetch: true,
        ..Default::default()
    };
    let target = MockTarget::new();

    let summary = migrator(&cfg, &source, &target).run().await.unwrap();
    assert_eq!(summary.created, 1);
    assert!(IdentityMap::load(cfg.map_file_path()).contains(17));
}
