//! Indexer service lifecycle tests against the embedded backend

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use lingomem_core::config::EmbeddingProviderKind;
use lingomem_core::ids::EntityId;
use lingomem_core::repository::RepositorySet;
use lingomem_core::types::{NewTm, NewTmEntry, TmStatus};
use lingomem_core::viewer::Viewer;
use lingomem_index::artifacts::ArtifactProvider;
use lingomem_index::{
    provider_for, ArtifactStore, EmbeddingService, IndexerConfig, IndexerService,
};
use lingomem_storage::{SchemaMode, SqliteBackend, SqliteRepositorySet};

struct World {
    repos: Arc<dyn RepositorySet>,
    indexer: Arc<IndexerService>,
    _tmp: TempDir,
}

fn world_with(kind: EmbeddingProviderKind) -> World {
    let backend = SqliteBackend::in_memory(SchemaMode::Authoritative).unwrap();
    let repos: Arc<dyn RepositorySet> =
        Arc::new(SqliteRepositorySet::new(backend, Viewer::admin(1, "token")));
    let tmp = TempDir::new().unwrap();
    let store = ArtifactStore::new(tmp.path()).unwrap();
    let embeddings = Arc::new(EmbeddingService::new(provider_for(kind)));
    let config = IndexerConfig {
        parallelism: 2,
        batch_size: 64,
        build_timeout: None,
        compaction_tombstone_ratio: 0.10,
    };
    let indexer =
        IndexerService::new(Arc::clone(&repos), embeddings, store, 8, config).unwrap();
    indexer.start().unwrap();
    World {
        repos,
        indexer,
        _tmp: tmp,
    }
}

fn world() -> World {
    world_with(EmbeddingProviderKind::Fast)
}

async fn make_tm(repos: &Arc<dyn RepositorySet>, entries: Vec<NewTmEntry>) -> EntityId {
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
    if !entries.is_empty() {
        repos.tm_entries().bulk_add(tm.id, entries).await.unwrap();
    }
    tm.id
}

async fn wait_ready(repos: &Arc<dyn RepositorySet>, tm_id: EntityId, secs: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
    loop {
        let tm = repos.tms().get(tm_id).await.unwrap();
        if tm.status == TmStatus::Ready {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "TM {tm_id} not ready in time (status {:?}, reason {:?})",
            tm.status,
            tm.error_reason
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn test_full_build_publishes_and_stamps() {
    let world = world();
    let tm_id = make_tm(
        &world.repos,
        vec![
            NewTmEntry::new("Hello, world.", "Bonjour le monde."),
            NewTmEntry::new("Good night\nSleep well", "Bonne nuit\nDors bien"),
            NewTmEntry::new("Thanks", "Merci"),
        ],
    )
    .await;

    world.indexer.schedule_full_build(tm_id).unwrap();
    wait_ready(&world.repos, tm_id, 5).await;

    let tm = world.repos.tms().get(tm_id).await.unwrap();
    let latest = world
        .repos
        .tm_entries()
        .latest_updated_at(tm_id)
        .await
        .unwrap()
        .unwrap();
    assert!(tm.indexed_at.unwrap() >= latest);
    assert!(!tm.is_stale(Some(latest)));

    let artifacts = world.indexer.artifacts(tm_id).await.unwrap();
    assert_eq!(artifacts.whole_mapping.len(), 3);
    // Two lines from the multiline entry plus one each from the others
    assert_eq!(artifacts.line_mapping.len(), 4);
    assert!(artifacts.whole_index.is_some());
}

#[tokio::test]
async fn test_empty_tm_builds_empty_artifacts() {
    let world = world();
    let tm_id = make_tm(&world.repos, Vec::new()).await;

    world.indexer.schedule_full_build(tm_id).unwrap();
    wait_ready(&world.repos, tm_id, 5).await;

    let artifacts = world.indexer.artifacts(tm_id).await.unwrap();
    assert_eq!(artifacts.meta.entry_count, 0);
    assert!(artifacts.whole_mapping.is_empty());
    assert!(artifacts.whole_index.is_none());
}

#[tokio::test]
async fn test_incremental_add_appends() {
    let world = world();
    let tm_id = make_tm(&world.repos, vec![NewTmEntry::new("one", "un")]).await;
    world.indexer.schedule_full_build(tm_id).unwrap();
    wait_ready(&world.repos, tm_id, 5).await;

    world
        .repos
        .tm_entries()
        .bulk_add(tm_id, vec![NewTmEntry::new("two", "deux")])
        .await
        .unwrap();
    world.indexer.on_entries_added(tm_id).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let artifacts = world.indexer.artifacts(tm_id).await;
        if let Ok(artifacts) = artifacts {
            if artifacts.whole_mapping.len() == 2 {
                assert_eq!(artifacts.whole_vectors.len(), 2);
                break;
            }
        }
        assert!(tokio::time::Instant::now() < deadline, "append never published");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn test_staleness_sweep_schedules_rebuild_quickly() {
    let world = world();
    let tm_id = make_tm(&world.repos, vec![NewTmEntry::new("old", "vieux")]).await;
    world.indexer.schedule_full_build(tm_id).unwrap();
    wait_ready(&world.repos, tm_id, 5).await;

    // New entries make the TM stale relative to its index
    world
        .repos
        .tm_entries()
        .bulk_add(tm_id, vec![NewTmEntry::new("new", "nouveau")])
        .await
        .unwrap();
    let stale = world.repos.tms().list_stale().await.unwrap();
    assert!(stale.iter().any(|t| t.id == tm_id));

    let scheduled = world.indexer.sync_staleness().await.unwrap();
    assert_eq!(scheduled, 1);

    // The rebuild lands within the login-time budget
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let tm = world.repos.tms().get(tm_id).await.unwrap();
        let latest = world
            .repos
            .tm_entries()
            .latest_updated_at(tm_id)
            .await
            .unwrap();
        if tm.status == TmStatus::Ready && !tm.is_stale(latest) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "staleness rebuild missed its budget"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_delete_tombstones_then_compacts() {
    let world = world();
    let entries: Vec<NewTmEntry> = (0..4)
        .map(|i| NewTmEntry::new(format!("sentence {i}"), format!("phrase {i}")))
        .collect();
    let tm_id = make_tm(&world.repos, entries).await;
    world.indexer.schedule_full_build(tm_id).unwrap();
    wait_ready(&world.repos, tm_id, 5).await;

    let all = world.repos.tm_entries().get_all(tm_id).await.unwrap();
    let victim = all[0].id;
    world
        .repos
        .tm_entries()
        .delete(tm_id, &[victim])
        .await
        .unwrap();
    world
        .indexer
        .on_entries_deleted(tm_id, vec![victim])
        .unwrap();

    // A quarter tombstoned is over the 10% threshold, so a compaction
    // rebuild follows and the mapping shrinks to the live entries
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(artifacts) = world.indexer.artifacts(tm_id).await {
            if artifacts.whole_mapping.len() == 3 && artifacts.meta.tombstone_count == 0 {
                break;
            }
        }
        assert!(tokio::time::Instant::now() < deadline, "compaction never ran");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn test_provider_change_invalidates_artifacts() {
    let fast_world = world();
    let tm_id = make_tm(&fast_world.repos, vec![NewTmEntry::new("hello", "salut")]).await;
    fast_world.indexer.schedule_full_build(tm_id).unwrap();
    wait_ready(&fast_world.repos, tm_id, 5).await;
    fast_world.indexer.stop().await;

    // Same store, different process-wide provider
    let store = ArtifactStore::new(fast_world._tmp.path()).unwrap();
    let embeddings = Arc::new(EmbeddingService::new(provider_for(
        EmbeddingProviderKind::Deep,
    )));
    let config = IndexerConfig {
        parallelism: 1,
        batch_size: 64,
        build_timeout: None,
        compaction_tombstone_ratio: 0.10,
    };
    let deep_indexer = IndexerService::new(
        Arc::clone(&fast_world.repos),
        embeddings,
        store,
        8,
        config,
    )
    .unwrap();

    let err = deep_indexer.artifacts(tm_id).await.unwrap_err();
    assert!(matches!(
        err,
        lingomem_core::error::TmError::IndexUnavailable(_)
    ));

    // The scheduled rebuild reconciles once workers run
    deep_indexer.start().unwrap();
    deep_indexer.schedule_full_build(tm_id).unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(artifacts) = deep_indexer.artifacts(tm_id).await {
            assert_eq!(artifacts.meta.provider_id, "deep-v1");
            assert_eq!(artifacts.meta.dimensions, 1024);
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "rebuild never landed");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn test_tm_delete_removes_artifacts() {
    let world = world();
    let tm_id = make_tm(&world.repos, vec![NewTmEntry::new("bye", "au revoir")]).await;
    world.indexer.schedule_full_build(tm_id).unwrap();
    wait_ready(&world.repos, tm_id, 5).await;

    world.repos.tms().delete(tm_id).await.unwrap();
    world.indexer.on_tm_deleted(tm_id).unwrap();

    let status = world.indexer.artifacts(tm_id).await;
    assert!(status.is_err());
}

#[tokio::test]
async fn test_stop_is_graceful() {
    let world = world();
    let tm_id = make_tm(&world.repos, vec![NewTmEntry::new("x", "y")]).await;
    world.indexer.schedule_full_build(tm_id).unwrap();
    world.indexer.stop().await;
    // Stopping twice is a no-op
    world.indexer.stop().await;
}
