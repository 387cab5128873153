//! Repository behaviour tests over the in-memory embedded backend

use std::sync::Arc;

use lingomem_core::ids::{OFFLINE_PLATFORM_LOCAL_ID, OFFLINE_PROJECT_LOCAL_ID};
use lingomem_core::repository::{BackendMode, RepositorySet};
use lingomem_core::types::{
    FileFormat, NewAssignment, NewFileRow, NewFolder, NewPlatform, NewProject, NewProjectFile,
    NewTm, NewTmEntry, Pagination, PlatformFilter, RowFilter, RowPatch, RowState, ScopeRef,
    TmEntryPatch, TmFilter,
};
use lingomem_core::viewer::Viewer;
use lingomem_storage::bridge::{record_remote_ids, OfflineScopeIds};
use lingomem_storage::{
    MaintenanceConfig, MaintenanceDaemon, SchemaMode, SqliteBackend, SqliteRepositorySet,
};

fn admin_set() -> Arc<dyn RepositorySet> {
    let backend = SqliteBackend::in_memory(SchemaMode::Authoritative).unwrap();
    Arc::new(SqliteRepositorySet::new(backend, Viewer::admin(1, "token")))
}

fn new_file(project_id: i64, folder_id: Option<i64>) -> NewProjectFile {
    NewProjectFile {
        name: "strings.xlsx".into(),
        original_name: "strings.xlsx".into(),
        format: FileFormat::Xlsx,
        source_lang: "en".into(),
        target_lang: "fr".into(),
        project_id,
        folder_id,
        sync_state: None,
        extra: serde_json::Value::Null,
    }
}

fn new_rows(n: i64) -> Vec<NewFileRow> {
    (0..n)
        .map(|i| NewFileRow {
            row_number: i,
            string_id: Some(format!("key_{i}")),
            source: format!("Source text {i}"),
            target: None,
            memo: None,
            extra: serde_json::Value::Null,
        })
        .collect()
}

#[tokio::test]
async fn test_platform_project_folder_lifecycle() {
    let repos = admin_set();

    let platform = repos
        .platforms()
        .create(NewPlatform {
            name: "Games".into(),
            description: Some("Game titles".into()),
            restricted: false,
        })
        .await
        .unwrap();

    let project = repos
        .projects()
        .create(NewProject {
            name: "RPG".into(),
            description: None,
            platform_id: Some(platform.id),
            restricted: false,
        })
        .await
        .unwrap();
    assert_eq!(project.platform_id, Some(platform.id));

    let root = repos
        .folders()
        .create(NewFolder {
            name: "chapter-1".into(),
            project_id: project.id,
            parent_id: None,
        })
        .await
        .unwrap();
    let child = repos
        .folders()
        .create(NewFolder {
            name: "dialogue".into(),
            project_id: project.id,
            parent_id: Some(root.id),
        })
        .await
        .unwrap();

    // Sibling name collision is a conflict
    let dup = repos
        .folders()
        .create(NewFolder {
            name: "dialogue".into(),
            project_id: project.id,
            parent_id: Some(root.id),
        })
        .await;
    assert!(dup.is_err());

    // Chain walks child -> root
    let chain = repos.folders().ancestors(child.id).await.unwrap();
    let ids: Vec<i64> = chain.iter().map(|f| f.id).collect();
    assert_eq!(ids, vec![child.id, root.id]);
}

#[tokio::test]
async fn test_restricted_platform_hidden_from_others() {
    let backend = SqliteBackend::in_memory(SchemaMode::Authoritative).unwrap();
    let admin = SqliteRepositorySet::new(backend.clone(), Viewer::admin(1, "token"));
    admin
        .platforms()
        .create(NewPlatform {
            name: "Secret".into(),
            description: None,
            restricted: true,
        })
        .await
        .unwrap();

    let stranger = SqliteRepositorySet::new(backend, Viewer::new(2, "other"));
    let listed = stranger
        .platforms()
        .list(&PlatformFilter::default())
        .await
        .unwrap();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn test_file_ingestion_and_row_pagination() {
    let repos = admin_set();
    let project = repos
        .projects()
        .create(NewProject {
            name: "Docs".into(),
            description: None,
            platform_id: None,
            restricted: false,
        })
        .await
        .unwrap();

    let file = repos
        .files()
        .create_with_rows(new_file(project.id, None), new_rows(25))
        .await
        .unwrap();
    assert_eq!(file.row_count, 25);

    let page = repos
        .rows()
        .get_for_file(file.id, Pagination::new(10, 5), None)
        .await
        .unwrap();
    assert_eq!(page.total, 25);
    assert_eq!(page.rows.len(), 5);
    assert_eq!(page.rows[0].row_number, 10);

    // Mutate target and lifecycle tag; the source text is untouchable
    let row = &page.rows[0];
    let updated = repos
        .rows()
        .update(
            row.id,
            RowPatch {
                target: Some("Texte cible".into()),
                state: Some(RowState::Reviewed),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.target.as_deref(), Some("Texte cible"));
    assert_eq!(updated.state, RowState::Reviewed);
    assert_eq!(updated.source, row.source);

    let reviewed = repos
        .rows()
        .get_for_file(
            file.id,
            Pagination::default(),
            Some(&RowFilter {
                state: Some(RowState::Reviewed),
                search: None,
            }),
        )
        .await
        .unwrap();
    assert_eq!(reviewed.total, 1);
}

#[tokio::test]
async fn test_tm_entries_bulk_roundtrip_and_counts() {
    let repos = admin_set();
    let tm = repos
        .tms()
        .create(NewTm {
            name: "Main TM".into(),
            description: None,
            source_lang: "en".into(),
            target_lang: "fr".into(),
            matching_mode: None,
        })
        .await
        .unwrap();

    let entries = vec![
        NewTmEntry::new("Hello, world.", "Bonjour le monde."),
        NewTmEntry::new("Good morning", "Bonjour"),
        NewTmEntry::new("Good night", "Bonne nuit"),
    ];
    let added = repos.tm_entries().bulk_add(tm.id, entries.clone()).await.unwrap();
    assert_eq!(added, 3);

    // get_all returns the same multiset under attribute projection
    let all = repos.tm_entries().get_all(tm.id).await.unwrap();
    let mut stored: Vec<(String, String)> = all
        .iter()
        .map(|e| (e.source.clone(), e.target.clone()))
        .collect();
    let mut expected: Vec<(String, String)> =
        entries.iter().map(|e| (e.source.clone(), e.target.clone())).collect();
    stored.sort();
    expected.sort();
    assert_eq!(stored, expected);

    // The cached count is maintained by the bulk operation
    let tm = repos.tms().get(tm.id).await.unwrap();
    assert_eq!(tm.entry_count, 3);
    assert_eq!(repos.tm_entries().count(tm.id).await.unwrap(), 3);

    // Hash lookup is exact and filters nothing live
    let hit = repos
        .tm_entries()
        .search_hash(tm.id, &all[0].source_hash)
        .await
        .unwrap();
    assert_eq!(hit.len(), 1);
    assert_eq!(hit[0].source, "Hello, world.");

    // Deletion tombstones and decrements the cache
    let deleted = repos
        .tm_entries()
        .delete(tm.id, &[all[0].id])
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    let tm = repos.tms().get(tm.id).await.unwrap();
    assert_eq!(tm.entry_count, 2);
    let ratio = repos.tm_entries().tombstone_ratio(tm.id).await.unwrap();
    assert!((ratio - 1.0 / 3.0).abs() < 1e-9);

    // Audit finds nothing to fix when the cache is right
    assert_eq!(repos.tms().recount_entries().await.unwrap(), 0);
}

#[tokio::test]
async fn test_entry_update_recomputes_hash_and_touches_tm() {
    let repos = admin_set();
    let tm = repos
        .tms()
        .create(NewTm {
            name: "TM".into(),
            description: None,
            source_lang: "en".into(),
            target_lang: "de".into(),
            matching_mode: None,
        })
        .await
        .unwrap();
    repos
        .tm_entries()
        .bulk_add(tm.id, vec![NewTmEntry::new("old source", "alt")])
        .await
        .unwrap();
    let entry = repos.tm_entries().get_all(tm.id).await.unwrap().remove(0);

    let updated = repos
        .tm_entries()
        .update(
            entry.id,
            TmEntryPatch {
                source: Some("new source".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_ne!(updated.source_hash, entry.source_hash);

    // The TM is now stale relative to its (absent) index
    let stale = repos.tms().list_stale().await.unwrap();
    assert!(stale.iter().any(|t| t.id == tm.id));
}

#[tokio::test]
async fn test_assignment_create_revoke_and_scope_deactivation() {
    let repos = admin_set();
    let project = repos
        .projects()
        .create(NewProject {
            name: "P".into(),
            description: None,
            platform_id: None,
            restricted: false,
        })
        .await
        .unwrap();
    let tm = repos
        .tms()
        .create(NewTm {
            name: "TM".into(),
            description: None,
            source_lang: "en".into(),
            target_lang: "fr".into(),
            matching_mode: None,
        })
        .await
        .unwrap();

    let scope = ScopeRef::Project(project.id);
    let before = repos.assignments().list_for_scope(scope).await.unwrap();
    assert!(before.is_empty());

    let assignment = repos
        .assignments()
        .create(NewAssignment {
            tm_id: tm.id,
            scope,
            priority: 3,
        })
        .await
        .unwrap();

    // Duplicate active assignment on the same scope is a conflict
    assert!(repos
        .assignments()
        .create(NewAssignment {
            tm_id: tm.id,
            scope,
            priority: 0,
        })
        .await
        .is_err());

    let active = repos.assignments().list_for_scope(scope).await.unwrap();
    assert_eq!(active.len(), 1);

    // Create-then-revoke leaves the scope as it was
    repos.assignments().revoke(assignment.id).await.unwrap();
    let after = repos.assignments().list_for_scope(scope).await.unwrap();
    assert!(after.is_empty());

    // Trashing the scope deactivates; restoring re-activates
    let assignment = repos
        .assignments()
        .create(NewAssignment {
            tm_id: tm.id,
            scope,
            priority: 3,
        })
        .await
        .unwrap();
    repos.projects().delete(project.id).await.unwrap();
    assert!(repos.assignments().list_for_scope(scope).await.unwrap().is_empty());
    assert!(!repos.assignments().get(assignment.id).await.unwrap().active);

    let trash = repos.trash().list().await.unwrap();
    let entry = trash.iter().find(|t| t.entity_id == project.id).unwrap();
    repos.trash().restore(entry.id).await.unwrap();
    assert_eq!(repos.assignments().list_for_scope(scope).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_trash_purge_hard_deletes() {
    let repos = admin_set();
    let project = repos
        .projects()
        .create(NewProject {
            name: "Doomed".into(),
            description: None,
            platform_id: None,
            restricted: false,
        })
        .await
        .unwrap();
    repos
        .files()
        .create_with_rows(new_file(project.id, None), new_rows(2))
        .await
        .unwrap();
    repos.projects().delete(project.id).await.unwrap();

    // Retention of zero days expires everything already in the trash
    let purged = repos.trash().purge_older_than(0).await.unwrap();
    assert_eq!(purged, 1);
    assert!(repos.trash().list().await.unwrap().is_empty());
    assert!(repos.projects().get(project.id).await.is_err());
}

#[tokio::test]
async fn test_tm_delete_removes_entries_and_assignments() {
    let repos = admin_set();
    let project = repos
        .projects()
        .create(NewProject {
            name: "P".into(),
            description: None,
            platform_id: None,
            restricted: false,
        })
        .await
        .unwrap();
    let tm = repos
        .tms()
        .create(NewTm {
            name: "TM".into(),
            description: None,
            source_lang: "en".into(),
            target_lang: "fr".into(),
            matching_mode: None,
        })
        .await
        .unwrap();
    repos
        .tm_entries()
        .bulk_add(tm.id, vec![NewTmEntry::new("a", "b")])
        .await
        .unwrap();
    repos
        .assignments()
        .create(NewAssignment {
            tm_id: tm.id,
            scope: ScopeRef::Project(project.id),
            priority: 0,
        })
        .await
        .unwrap();

    repos.tms().delete(tm.id).await.unwrap();
    assert!(repos.tms().get(tm.id).await.is_err());
    assert!(repos
        .assignments()
        .list_for_scope(ScopeRef::Project(project.id))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_local_backend_sentinels_and_change_log() {
    let backend = SqliteBackend::in_memory(SchemaMode::Local).unwrap();
    let repos = SqliteRepositorySet::new(backend.clone(), Viewer::offline(7));
    assert_eq!(repos.mode(), BackendMode::Local);

    // The reserved scope exists from the first migration on
    let project = repos.projects().get(OFFLINE_PROJECT_LOCAL_ID).await.unwrap();
    assert_eq!(project.platform_id, Some(OFFLINE_PLATFORM_LOCAL_ID));

    // Local writes land in the change log for later reconciliation
    assert_eq!(backend.pending_local_changes().unwrap(), 0);
    let tm = repos
        .tms()
        .create(NewTm {
            name: "Offline TM".into(),
            description: None,
            source_lang: "en".into(),
            target_lang: "ko".into(),
            matching_mode: None,
        })
        .await
        .unwrap();
    repos
        .tm_entries()
        .bulk_add(tm.id, vec![NewTmEntry::new("hello", "annyeong")])
        .await
        .unwrap();
    assert!(backend.pending_local_changes().unwrap() >= 2);
}

#[tokio::test]
async fn test_scope_bridge_translates_authoritative_ids() {
    let backend = SqliteBackend::in_memory(SchemaMode::Local).unwrap();
    record_remote_ids(
        &backend,
        OfflineScopeIds {
            platform_id: 9000,
            project_id: 9001,
        },
    )
    .unwrap();

    let repos = SqliteRepositorySet::new(backend, Viewer::offline(7));
    let tm = repos
        .tms()
        .create(NewTm {
            name: "Offline TM".into(),
            description: None,
            source_lang: "en".into(),
            target_lang: "ja".into(),
            matching_mode: None,
        })
        .await
        .unwrap();

    // The assignment arrives carrying the authoritative surrogate id
    repos
        .assignments()
        .create(NewAssignment {
            tm_id: tm.id,
            scope: ScopeRef::Project(9001),
            priority: 0,
        })
        .await
        .unwrap();

    // Both identities address the same stored assignment
    let via_remote = repos
        .assignments()
        .list_for_scope(ScopeRef::Project(9001))
        .await
        .unwrap();
    let via_sentinel = repos
        .assignments()
        .list_for_scope(ScopeRef::Project(OFFLINE_PROJECT_LOCAL_ID))
        .await
        .unwrap();
    assert_eq!(via_remote.len(), 1);
    assert_eq!(via_sentinel.len(), 1);
    assert_eq!(via_remote[0].id, via_sentinel[0].id);
    assert_eq!(via_remote[0].scope, ScopeRef::Project(OFFLINE_PROJECT_LOCAL_ID));
}

#[tokio::test]
async fn test_maintenance_cycle_purges_and_flags_compaction() {
    let repos = admin_set();
    let tm = repos
        .tms()
        .create(NewTm {
            name: "TM".into(),
            description: None,
            source_lang: "en".into(),
            target_lang: "fr".into(),
            matching_mode: None,
        })
        .await
        .unwrap();
    repos
        .tm_entries()
        .bulk_add(
            tm.id,
            vec![
                NewTmEntry::new("keep", "garder"),
                NewTmEntry::new("drop", "lâcher"),
            ],
        )
        .await
        .unwrap();
    let victim = repos.tm_entries().get_all(tm.id).await.unwrap()[1].id;
    repos.tm_entries().delete(tm.id, &[victim]).await.unwrap();

    let project = repos
        .projects()
        .create(NewProject {
            name: "Old".into(),
            description: None,
            platform_id: None,
            restricted: false,
        })
        .await
        .unwrap();
    repos.projects().delete(project.id).await.unwrap();

    let flagged = Arc::new(std::sync::Mutex::new(Vec::new()));
    let hook_target = Arc::clone(&flagged);
    let daemon = MaintenanceDaemon::new(
        Arc::clone(&repos),
        MaintenanceConfig {
            interval: std::time::Duration::from_secs(3600),
            trash_retention_days: 0,
            compaction_tombstone_ratio: 0.10,
        },
    )
    .with_compaction_hook(Arc::new(move |tm_id| {
        hook_target.lock().unwrap().push(tm_id);
    }));

    let report = daemon.run_cycle().await.unwrap();
    assert_eq!(report.trash_purged, 1);
    assert_eq!(report.counts_corrected, 0);
    // Half the entries are tombstoned, well over the 10% threshold
    assert_eq!(report.compactions_requested, 1);
    assert_eq!(*flagged.lock().unwrap(), vec![tm.id]);
}

#[tokio::test]
async fn test_sync_meta_and_subscriptions() {
    let backend = SqliteBackend::in_memory(SchemaMode::Local).unwrap();
    assert_eq!(backend.sync_meta("server_url").unwrap(), None);
    backend
        .set_sync_meta("server_url", "https://tm.example.com")
        .unwrap();
    assert_eq!(
        backend.sync_meta("server_url").unwrap().as_deref(),
        Some("https://tm.example.com")
    );

    backend.subscribe("tm", 42).unwrap();
    backend.subscribe("tm", 42).unwrap();
    backend.subscribe("tm", 7).unwrap();
    assert_eq!(backend.subscriptions("tm").unwrap(), vec![7, 42]);
    assert!(backend.subscriptions("file").unwrap().is_empty());
}

#[tokio::test]
async fn test_tm_listing_filters() {
    let repos = admin_set();
    for name in ["Alpha", "Beta", "Alpine"] {
        repos
            .tms()
            .create(NewTm {
                name: name.into(),
                description: None,
                source_lang: "en".into(),
                target_lang: "fr".into(),
                matching_mode: None,
            })
            .await
            .unwrap();
    }
    let filtered = repos
        .tms()
        .list(&TmFilter {
            owner_id: None,
            name_contains: Some("Alp".into()),
        })
        .await
        .unwrap();
    assert_eq!(filtered.len(), 2);
}
