//! End-to-end ranking scenarios over a real temp workspace: scan, log,
//! recommend, and the cross-subsystem invariants (exclusion, score range,
//! determinism).

use anyhow::Result;

use crate::tests::helpers::{path_str, test_engine, workspace, write_file};

#[tokio::test]
async fn semantic_neighbors_rank_by_content_similarity() -> Result<()> {
    let ws = workspace();
    let a = write_file(ws.path(), "a.txt", "alpha pipeline");
    let b = write_file(ws.path(), "b.txt", "beta pipeline");
    let c = write_file(ws.path(), "c.txt", "gamma rocks");

    let engine = test_engine(ws.path());
    engine.scan(ws.path()).await?;

    // With no activity, ordering is purely semantic: B shares vocabulary
    // with A, C does not.
    let recommendations = engine.recommend(&path_str(&a), 2).await?;
    assert_eq!(recommendations.len(), 2);
    assert_eq!(recommendations[0].path, path_str(&b));
    assert_eq!(recommendations[1].path, path_str(&c));

    let first = &recommendations[0];
    let second = &recommendations[1];
    assert!(first.factors.semantic > second.factors.semantic);
    assert!((first.factors.recency - second.factors.recency).abs() < 0.01);
    assert_eq!(first.factors.cooccurrence, 0.0);
    assert_eq!(second.factors.cooccurrence, 0.0);
    Ok(())
}

#[tokio::test]
async fn recent_access_outranks_weak_semantics() -> Result<()> {
    let ws = workspace();
    let a = write_file(ws.path(), "a.txt", "the quick brown fox jumps over a lazy dog");
    let b = write_file(ws.path(), "b.txt", "spreadsheet quarterly revenue numbers for finance");
    write_file(ws.path(), "c.txt", "holiday photos from the mountain cabin trip");

    let engine = test_engine(ws.path());
    engine.scan(ws.path()).await?;

    // Five accesses to B, none to C.
    for _ in 0..5 {
        engine.log_activity(&path_str(&b)).await?;
    }

    let top = engine.recommend(&path_str(&a), 1).await?;
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].path, path_str(&b));
    assert!(top[0].factors.recency > 0.9, "fresh access dominates recency");
    Ok(())
}

#[tokio::test]
async fn coaccess_history_surfaces_in_the_ranking() -> Result<()> {
    let ws = workspace();
    let a = write_file(ws.path(), "a.txt", "first unrelated document body");
    let b = write_file(ws.path(), "b.txt", "second unrelated document body");

    let engine = test_engine(ws.path());
    engine.scan(ws.path()).await?;

    engine.log_activity(&path_str(&a)).await?;
    engine.log_activity(&path_str(&b)).await?;

    let top = engine.recommend(&path_str(&a), 1).await?;
    assert_eq!(top[0].path, path_str(&b));
    assert!(
        top[0].factors.cooccurrence > 0.15,
        "accumulated co-access must show up as a factor, got {}",
        top[0].factors.cooccurrence
    );
    Ok(())
}

#[tokio::test]
async fn query_file_is_never_recommended_to_itself() -> Result<()> {
    let ws = workspace();
    let a = write_file(ws.path(), "a.txt", "alpha pipeline");
    write_file(ws.path(), "b.txt", "beta pipeline");
    write_file(ws.path(), "c.txt", "gamma rocks");

    let engine = test_engine(ws.path());
    engine.scan(ws.path()).await?;

    // Heavy self-access must not leak the query into its own results.
    for _ in 0..3 {
        engine.log_activity(&path_str(&a)).await?;
    }
    let recommendations = engine.recommend(&path_str(&a), 100).await?;
    assert!(!recommendations.is_empty());
    assert!(recommendations.iter().all(|r| r.path != path_str(&a)));
    Ok(())
}

#[tokio::test]
async fn factors_and_final_scores_stay_in_range() -> Result<()> {
    let ws = workspace();
    let a = write_file(ws.path(), "a.txt", "alpha pipeline");
    let b = write_file(ws.path(), "b.txt", "beta pipeline");
    write_file(ws.path(), "c.txt", "gamma rocks");

    let engine = test_engine(ws.path());
    engine.scan(ws.path()).await?;
    engine.log_activity(&path_str(&b)).await?;

    let recommendations = engine.recommend(&path_str(&a), 10).await?;
    for r in &recommendations {
        let w = &r.weights;
        assert!((0.0..=1.0).contains(&r.factors.semantic));
        assert!((0.0..=1.0).contains(&r.factors.recency));
        assert!((0.0..=1.0).contains(&r.factors.cooccurrence));
        assert!(r.final_score >= 0.0);
        assert!(r.final_score <= w.alpha + w.beta + w.gamma + 1e-9);
    }
    Ok(())
}

#[tokio::test]
async fn identical_queries_return_identical_rankings() -> Result<()> {
    let ws = workspace();
    let a = write_file(ws.path(), "a.txt", "alpha pipeline");
    write_file(ws.path(), "b.txt", "beta pipeline");
    write_file(ws.path(), "c.txt", "gamma rocks");
    write_file(ws.path(), "d.txt", "delta pipeline stage");

    let engine = test_engine(ws.path());
    engine.scan(ws.path()).await?;

    let first = engine.recommend(&path_str(&a), 4).await?;
    let second = engine.recommend(&path_str(&a), 4).await?;

    let paths_first: Vec<&str> = first.iter().map(|r| r.path.as_str()).collect();
    let paths_second: Vec<&str> = second.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths_first, paths_second);
    Ok(())
}

#[tokio::test]
async fn deleted_files_drop_out_of_recommendations() -> Result<()> {
    let ws = workspace();
    let a = write_file(ws.path(), "a.txt", "alpha pipeline");
    write_file(ws.path(), "b.txt", "beta pipeline");
    let c = write_file(ws.path(), "c.txt", "gamma rocks");

    let engine = test_engine(ws.path());
    engine.scan(ws.path()).await?;

    std::fs::remove_file(&c)?;
    engine.scan(ws.path()).await?;

    let recommendations = engine.recommend(&path_str(&a), 5).await?;
    assert!(!recommendations.is_empty());
    assert!(recommendations.iter().all(|r| r.path != path_str(&c)));
    Ok(())
}

#[tokio::test]
async fn tombstoned_query_still_ranks_by_history() -> Result<()> {
    let ws = workspace();
    let a = write_file(ws.path(), "a.txt", "alpha pipeline");
    let b = write_file(ws.path(), "b.txt", "beta pipeline");

    let engine = test_engine(ws.path());
    engine.scan(ws.path()).await?;

    // Build co-access history, then lose the query file from disk.
    engine.log_activity(&path_str(&a)).await?;
    engine.log_activity(&path_str(&b)).await?;
    std::fs::remove_file(&a)?;
    engine.scan(ws.path()).await?;

    let recommendations = engine.recommend(&path_str(&a), 5).await?;
    assert_eq!(recommendations.len(), 1);
    assert_eq!(recommendations[0].path, path_str(&b));
    assert_eq!(
        recommendations[0].factors.semantic, 0.0,
        "no embedding for the query file, semantic signal is off"
    );
    assert!(recommendations[0].factors.cooccurrence > 0.0);
    Ok(())
}

#[tokio::test]
async fn unknown_query_path_is_not_found() -> Result<()> {
    let ws = workspace();
    write_file(ws.path(), "a.txt", "alpha pipeline");

    let engine = test_engine(ws.path());
    engine.scan(ws.path()).await?;

    let err = engine.recommend("/nowhere/missing.txt", 5).await.unwrap_err();
    assert_eq!(err.code(), "not_found");
    Ok(())
}

#[tokio::test]
async fn recommendation_is_an_access_event() -> Result<()> {
    let ws = workspace();
    let a = write_file(ws.path(), "a.txt", "alpha pipeline");
    write_file(ws.path(), "b.txt", "beta pipeline");

    let engine = test_engine(ws.path());
    engine.scan(ws.path()).await?;

    engine.recommend(&path_str(&a), 1).await?;

    let store = engine.store();
    let id = store.get_file_by_path(&path_str(&a))?.unwrap().id;
    let activity = store.get_activity(id)?.expect("self-access was logged");
    assert_eq!(activity.access_count, 1);
    Ok(())
}

#[tokio::test]
async fn health_reflects_store_and_index_state() -> Result<()> {
    let ws = workspace();
    let a = write_file(ws.path(), "a.txt", "alpha pipeline");
    write_file(ws.path(), "b.bin", "not text");

    let engine = test_engine(ws.path());
    let before = engine.health()?;
    assert!(before.ok);
    assert_eq!(before.n_files, 0);

    engine.scan(ws.path()).await?;
    let after_scan = engine.health()?;
    assert_eq!(after_scan.n_files, 1);
    assert_eq!(after_scan.n_embedded, 1);
    assert!(after_scan.index_dirty);

    // The first recommendation triggers the lazy rebuild.
    write_file(ws.path(), "c.txt", "gamma rocks");
    engine.scan(ws.path()).await?;
    engine.recommend(&path_str(&a), 1).await?;
    assert!(!engine.health()?.index_dirty);
    Ok(())
}
