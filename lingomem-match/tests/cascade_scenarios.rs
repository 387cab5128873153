//! End-to-end cascade and resolver scenarios over the embedded backend

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use lingomem_core::config::{CoreConfig, EmbeddingProviderKind};
use lingomem_core::ids::EntityId;
use lingomem_core::repository::RepositorySet;
use lingomem_core::types::{
    FileFormat, MatchingMode, NewAssignment, NewFolder, NewPlatform, NewProject, NewProjectFile,
    NewTm, NewTmEntry, ScopeRef, TmStatus,
};
use lingomem_core::viewer::Viewer;
use lingomem_index::artifacts::ArtifactProvider;
use lingomem_index::{
    provider_for, ArtifactStore, EmbeddingService, IndexerConfig, IndexerService,
};
use lingomem_match::{
    AssignmentResolver, CascadeMatcher, CascadeQuery, MatchTier, SearchOptions, TmSearchService,
};
use lingomem_storage::{SchemaMode, SqliteBackend, SqliteRepositorySet};

struct World {
    repos: Arc<dyn RepositorySet>,
    indexer: Arc<IndexerService>,
    matcher: CascadeMatcher,
    _tmp: TempDir,
}

fn world() -> World {
    let backend = SqliteBackend::in_memory(SchemaMode::Authoritative).unwrap();
    let repos: Arc<dyn RepositorySet> =
        Arc::new(SqliteRepositorySet::new(backend, Viewer::admin(1, "token")));
    let tmp = TempDir::new().unwrap();
    let store = ArtifactStore::new(tmp.path()).unwrap();
    let embeddings = Arc::new(EmbeddingService::new(provider_for(
        EmbeddingProviderKind::Fast,
    )));
    let config = IndexerConfig {
        parallelism: 1,
        batch_size: 64,
        build_timeout: None,
        compaction_tombstone_ratio: 0.10,
    };
    let indexer = IndexerService::new(
        Arc::clone(&repos),
        Arc::clone(&embeddings),
        store,
        8,
        config,
    )
    .unwrap();
    indexer.start().unwrap();
    let matcher = CascadeMatcher::new(
        Arc::clone(&repos),
        Arc::clone(&indexer) as Arc<dyn ArtifactProvider>,
        embeddings,
    );
    World {
        repos,
        indexer,
        matcher,
        _tmp: tmp,
    }
}

async fn make_tm(
    world: &World,
    mode: MatchingMode,
    entries: Vec<NewTmEntry>,
) -> lingomem_core::types::TranslationMemory {
    let tm = world
        .repos
        .tms()
        .create(NewTm {
            name: "TM".into(),
            description: None,
            source_lang: "en".into(),
            target_lang: "fr".into(),
            matching_mode: Some(mode),
        })
        .await
        .unwrap();
    world
        .repos
        .tm_entries()
        .bulk_add(tm.id, entries)
        .await
        .unwrap();
    tm
}

async fn build_and_wait(world: &World, tm_id: EntityId) {
    world.indexer.schedule_full_build(tm_id).unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let tm = world.repos.tms().get(tm_id).await.unwrap();
        if tm.status == TmStatus::Ready {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "build did not finish (status {:?})",
            tm.status
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn test_exact_hash_hit() {
    let world = world();
    let tm = make_tm(
        &world,
        MatchingMode::Standard,
        vec![NewTmEntry::new("Hello, world.", "Bonjour le monde.")],
    )
    .await;
    build_and_wait(&world, tm.id).await;

    let hits = world
        .matcher
        .search(&tm, &CascadeQuery::new("Hello, world.", 0.7, 10))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source, "Hello, world.");
    assert_eq!(hits[0].target, "Bonjour le monde.");
    assert!((hits[0].score - 1.0).abs() < f32::EPSILON);
    assert_eq!(hits[0].tier, MatchTier::ExactHash);
    assert_eq!(hits[0].tier.number(), 1);
}

#[tokio::test]
async fn test_semantic_whole_string_hit() {
    let world = world();
    let tm = make_tm(
        &world,
        MatchingMode::Standard,
        vec![NewTmEntry::new("Hello, world.", "Bonjour le monde.")],
    )
    .await;
    build_and_wait(&world, tm.id).await;

    // Not byte-identical, so the hash tier misses; the provider places the
    // two variants near-identically and the semantic tier answers
    let hits = world
        .matcher
        .search(&tm, &CascadeQuery::new("Hello World!", 0.7, 10))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].tier, MatchTier::SemanticWhole);
    assert!(hits[0].score >= 0.92, "score was {}", hits[0].score);
    assert_eq!(hits[0].target, "Bonjour le monde.");
}

#[tokio::test]
async fn test_line_level_stitching() {
    let world = world();
    let tm = make_tm(
        &world,
        MatchingMode::Standard,
        vec![
            NewTmEntry::new("A\nB", "α\nβ"),
            NewTmEntry::new("C", "γ"),
        ],
    )
    .await;
    build_and_wait(&world, tm.id).await;

    let hits = world
        .matcher
        .search(&tm, &CascadeQuery::new("A\nC", 0.99, 10))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    let hit = &hits[0];
    assert_eq!(hit.tier, MatchTier::ExactLine);
    assert_eq!(hit.target, "α\nγ");
    assert!((hit.score - 1.0).abs() < f32::EPSILON);
    assert_eq!(hit.segments.len(), 2);
    assert!(hit.segments.iter().all(|s| (s.score - 1.0).abs() < f32::EPSILON));
}

#[tokio::test]
async fn test_ngram_fallback() {
    let world = world();
    let tm = make_tm(
        &world,
        MatchingMode::Standard,
        vec![NewTmEntry::new("quick brown fox", "renard brun rapide")],
    )
    .await;
    build_and_wait(&world, tm.id).await;

    // One dropped vowel: below the semantic threshold with the fast
    // provider, above it on character n-grams
    let hits = world
        .matcher
        .search(&tm, &CascadeQuery::new("quick brwn fox", 0.85, 10))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].tier, MatchTier::Ngram);
    assert!(hits[0].score >= 0.85, "score was {}", hits[0].score);
    assert_eq!(hits[0].target, "renard brun rapide");
}

#[tokio::test]
async fn test_hash_tier_sees_unindexed_entries() {
    let world = world();
    let tm = make_tm(
        &world,
        MatchingMode::Standard,
        vec![NewTmEntry::new("fresh entry", "entrée fraîche")],
    )
    .await;
    // No build has run; the repository-side hash lookup answers tier 1
    let hits = world
        .matcher
        .search(&tm, &CascadeQuery::new("fresh entry", 1.0, 10))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].tier, MatchTier::ExactHash);
    assert!((hits[0].score - 1.0).abs() < f32::EPSILON);
}

#[tokio::test]
async fn test_threshold_one_requires_exact_source() {
    let world = world();
    let tm = make_tm(
        &world,
        MatchingMode::Standard,
        vec![NewTmEntry::new("precise sentence", "phrase précise")],
    )
    .await;
    build_and_wait(&world, tm.id).await;

    let exact = world
        .matcher
        .search(&tm, &CascadeQuery::new("precise sentence", 1.0, 10))
        .await
        .unwrap();
    assert_eq!(exact.len(), 1);

    let near = world
        .matcher
        .search(&tm, &CascadeQuery::new("precise sentences", 1.0, 10))
        .await
        .unwrap();
    assert!(near.is_empty());
}

#[tokio::test]
async fn test_string_id_mode() {
    let world = world();
    let mut entry = NewTmEntry::new("Start game", "Démarrer le jeu");
    entry.string_id = Some("menu.start".into());
    let tm = make_tm(&world, MatchingMode::StringId, vec![entry]).await;
    build_and_wait(&world, tm.id).await;

    // String-id lookup replaces the hash tier
    let hits = world
        .matcher
        .search(
            &tm,
            &CascadeQuery::new("anything at all", 0.7, 10).with_string_id("menu.start"),
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].tier, MatchTier::ExactHash);
    assert_eq!(hits[0].target, "Démarrer le jeu");

    // Without a string id the semantic tiers still run
    let semantic = world
        .matcher
        .search(&tm, &CascadeQuery::new("Start game", 0.7, 10))
        .await
        .unwrap();
    assert_eq!(semantic.len(), 1);
    assert_eq!(semantic[0].tier, MatchTier::SemanticWhole);
}

#[tokio::test]
async fn test_blank_and_oversized_queries() {
    let world = world();
    let tm = make_tm(
        &world,
        MatchingMode::Standard,
        vec![NewTmEntry::new("something", "quelque chose")],
    )
    .await;
    build_and_wait(&world, tm.id).await;

    let blank = world
        .matcher
        .search(&tm, &CascadeQuery::new("   \n  ", 0.7, 10))
        .await
        .unwrap();
    assert!(blank.is_empty());

    // A megabyte of text embeds (truncated) and returns without incident
    let huge = "lorem ipsum ".repeat(90_000);
    let result = world
        .matcher
        .search(&tm, &CascadeQuery::new(huge, 0.9, 10))
        .await
        .unwrap();
    assert!(result.is_empty());
}

#[tokio::test]
async fn test_empty_tm_returns_nothing() {
    let world = world();
    let tm = make_tm(&world, MatchingMode::Standard, Vec::new()).await;
    build_and_wait(&world, tm.id).await;

    let hits = world
        .matcher
        .search(&tm, &CascadeQuery::new("anything", 0.7, 10))
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_assignment_ordering_folder_before_platform() {
    let world = world();
    let platform = world
        .repos
        .platforms()
        .create(NewPlatform {
            name: "Games".into(),
            description: None,
            restricted: false,
        })
        .await
        .unwrap();
    let project = world
        .repos
        .projects()
        .create(NewProject {
            name: "P".into(),
            description: None,
            platform_id: Some(platform.id),
            restricted: false,
        })
        .await
        .unwrap();
    let folder = world
        .repos
        .folders()
        .create(NewFolder {
            name: "F".into(),
            project_id: project.id,
            parent_id: None,
        })
        .await
        .unwrap();
    let file = world
        .repos
        .files()
        .create_with_rows(
            NewProjectFile {
                name: "f.txt".into(),
                original_name: "f.txt".into(),
                format: FileFormat::Txt,
                source_lang: "en".into(),
                target_lang: "fr".into(),
                project_id: project.id,
                folder_id: Some(folder.id),
                sync_state: None,
                extra: serde_json::Value::Null,
            },
            Vec::new(),
        )
        .await
        .unwrap();

    let tm_a = make_tm(&world, MatchingMode::Standard, Vec::new()).await;
    let tm_b = make_tm(&world, MatchingMode::Standard, Vec::new()).await;

    // A at platform scope with the better priority, B at folder scope
    world
        .repos
        .assignments()
        .create(NewAssignment {
            tm_id: tm_a.id,
            scope: ScopeRef::Platform(platform.id),
            priority: 0,
        })
        .await
        .unwrap();
    world
        .repos
        .assignments()
        .create(NewAssignment {
            tm_id: tm_b.id,
            scope: ScopeRef::Folder(folder.id),
            priority: 5,
        })
        .await
        .unwrap();

    // The more specific scope wins regardless of priority
    let resolver = AssignmentResolver::new(Arc::clone(&world.repos));
    let resolved = resolver.resolve_active_tms(file.id).await.unwrap();
    let order: Vec<EntityId> = resolved.iter().map(|r| r.tm.id).collect();
    assert_eq!(order, vec![tm_b.id, tm_a.id]);

    // Each TM appears at most once even when assigned at two levels
    world
        .repos
        .assignments()
        .create(NewAssignment {
            tm_id: tm_b.id,
            scope: ScopeRef::Platform(platform.id),
            priority: 9,
        })
        .await
        .unwrap();
    let resolved = resolver.resolve_active_tms(file.id).await.unwrap();
    let order: Vec<EntityId> = resolved.iter().map(|r| r.tm.id).collect();
    assert_eq!(order, vec![tm_b.id, tm_a.id]);
}

#[tokio::test]
async fn test_create_then_revoke_leaves_resolution_unchanged() {
    let world = world();
    let project = world
        .repos
        .projects()
        .create(NewProject {
            name: "P".into(),
            description: None,
            platform_id: None,
            restricted: false,
        })
        .await
        .unwrap();
    let file = world
        .repos
        .files()
        .create_with_rows(
            NewProjectFile {
                name: "f.txt".into(),
                original_name: "f.txt".into(),
                format: FileFormat::Txt,
                source_lang: "en".into(),
                target_lang: "fr".into(),
                project_id: project.id,
                folder_id: None,
                sync_state: None,
                extra: serde_json::Value::Null,
            },
            Vec::new(),
        )
        .await
        .unwrap();
    let tm = make_tm(&world, MatchingMode::Standard, Vec::new()).await;

    let resolver = AssignmentResolver::new(Arc::clone(&world.repos));
    let before = resolver.resolve_active_tms(file.id).await.unwrap();

    let assignment = world
        .repos
        .assignments()
        .create(NewAssignment {
            tm_id: tm.id,
            scope: ScopeRef::Project(project.id),
            priority: 0,
        })
        .await
        .unwrap();
    world.repos.assignments().revoke(assignment.id).await.unwrap();

    let after = resolver.resolve_active_tms(file.id).await.unwrap();
    assert_eq!(
        before.iter().map(|r| r.tm.id).collect::<Vec<_>>(),
        after.iter().map(|r| r.tm.id).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_rebuild_is_cascade_equivalent() {
    let world = world();
    let tm = make_tm(
        &world,
        MatchingMode::Standard,
        vec![
            NewTmEntry::new("first sentence", "première phrase"),
            NewTmEntry::new("second sentence", "deuxième phrase"),
            NewTmEntry::new("third sentence", "troisième phrase"),
        ],
    )
    .await;
    build_and_wait(&world, tm.id).await;

    let query = CascadeQuery::new("second sentence", 0.7, 10);
    let before = world.matcher.search(&tm, &query).await.unwrap();
    let first_built = world.indexer.artifacts(tm.id).await.unwrap().meta.built_at;

    // A second build with no intervening writes publishes an equivalent set
    world.indexer.schedule_full_build(tm.id).unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(artifacts) = world.indexer.artifacts(tm.id).await {
            if artifacts.meta.built_at > first_built {
                break;
            }
        }
        assert!(tokio::time::Instant::now() < deadline, "rebuild never published");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    let after = world.matcher.search(&tm, &query).await.unwrap();

    let project = |hits: &[lingomem_match::MatchHit]| {
        hits.iter()
            .map(|h| (h.entry_id, h.tier, h.target.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(project(&before), project(&after));
}

#[tokio::test]
async fn test_similarity_capability_absent_on_embedded_backend() {
    let world = world();
    let tm = make_tm(
        &world,
        MatchingMode::Standard,
        vec![NewTmEntry::new("some entry", "une entrée")],
    )
    .await;

    // The embedded backend has no trigram capability; the lookup degrades
    // to "no match" rather than an error
    assert!(world.repos.similarity().is_none());
    let embeddings = Arc::new(EmbeddingService::new(provider_for(
        EmbeddingProviderKind::Fast,
    )));
    let matcher = CascadeMatcher::new(
        Arc::clone(&world.repos),
        Arc::clone(&world.indexer) as Arc<dyn ArtifactProvider>,
        embeddings,
    );
    let service = TmSearchService::new(
        Arc::clone(&world.repos),
        matcher,
        &CoreConfig::default(),
    );
    let similar = service
        .search_similar(tm.id, "some entry", &SearchOptions::default())
        .await
        .unwrap();
    assert!(similar.is_empty());
}

#[tokio::test]
async fn test_search_file_consults_tms_in_order() {
    let world = world();
    let project = world
        .repos
        .projects()
        .create(NewProject {
            name: "P".into(),
            description: None,
            platform_id: None,
            restricted: false,
        })
        .await
        .unwrap();
    let file = world
        .repos
        .files()
        .create_with_rows(
            NewProjectFile {
                name: "f.txt".into(),
                original_name: "f.txt".into(),
                format: FileFormat::Txt,
                source_lang: "en".into(),
                target_lang: "fr".into(),
                project_id: project.id,
                folder_id: None,
                sync_state: None,
                extra: serde_json::Value::Null,
            },
            Vec::new(),
        )
        .await
        .unwrap();

    // Two TMs on the same scope; only the second one knows the phrase
    let empty_tm = make_tm(&world, MatchingMode::Standard, Vec::new()).await;
    let full_tm = make_tm(
        &world,
        MatchingMode::Standard,
        vec![NewTmEntry::new("Save changes", "Enregistrer")],
    )
    .await;
    build_and_wait(&world, empty_tm.id).await;
    build_and_wait(&world, full_tm.id).await;

    for (tm_id, priority) in [(empty_tm.id, 0), (full_tm.id, 1)] {
        world
            .repos
            .assignments()
            .create(NewAssignment {
                tm_id,
                scope: ScopeRef::Project(project.id),
                priority,
            })
            .await
            .unwrap();
    }

    let embeddings = Arc::new(EmbeddingService::new(provider_for(
        EmbeddingProviderKind::Fast,
    )));
    let matcher = CascadeMatcher::new(
        Arc::clone(&world.repos),
        Arc::clone(&world.indexer) as Arc<dyn ArtifactProvider>,
        embeddings,
    );
    let service = TmSearchService::new(
        Arc::clone(&world.repos),
        matcher,
        &CoreConfig::default(),
    );

    let matches = service
        .search_file(file.id, "Save changes", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].tm_id, full_tm.id);
    assert_eq!(matches[0].hit.target, "Enregistrer");
}
