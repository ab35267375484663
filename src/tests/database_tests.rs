//! Store-level tests: id stability, upsert semantics, activity counters,
//! and canonical co-occurrence rows.

use anyhow::Result;

use crate::database::FileStore;

fn store() -> FileStore {
    FileStore::open_in_memory().expect("in-memory store")
}

#[test]
fn upsert_assigns_id_once_and_keeps_it() -> Result<()> {
    let store = store();

    let (id, changed) = store.upsert_file("/w/a.txt", 10, 1_000, Some("text/plain"), "h1")?;
    assert!(changed, "first registration counts as changed");

    // Same hash and size: id stable, not changed.
    let (id2, changed) = store.upsert_file("/w/a.txt", 10, 2_000, Some("text/plain"), "h1")?;
    assert_eq!(id, id2);
    assert!(!changed);

    // New hash: id still stable, changed.
    let (id3, changed) = store.upsert_file("/w/a.txt", 12, 3_000, Some("text/plain"), "h2")?;
    assert_eq!(id, id3);
    assert!(changed);

    Ok(())
}

#[test]
fn tombstoned_file_keeps_its_id_on_revival() -> Result<()> {
    let store = store();

    let (id_a, _) = store.upsert_file("/w/a.txt", 10, 1_000, None, "h1")?;
    let (id_b, _) = store.upsert_file("/w/b.txt", 10, 1_000, None, "h1")?;
    assert_ne!(id_a, id_b);

    store.tombstone(id_a)?;
    let live: Vec<i64> = store.list_live_files()?.iter().map(|f| f.id).collect();
    assert_eq!(live, vec![id_b]);

    // The path comes back: same id, revived.
    let (revived, _) = store.upsert_file("/w/a.txt", 10, 1_000, None, "h1")?;
    assert_eq!(revived, id_a);
    let file = store.get_file_by_id(id_a)?.expect("revived file");
    assert!(!file.tombstoned);

    Ok(())
}

#[test]
fn tombstone_is_idempotent_and_purges_content() -> Result<()> {
    let store = store();
    let (id, _) = store.upsert_file("/w/a.txt", 10, 1_000, None, "h1")?;
    store.put_content(id, "alpha", Some(&[0.6, 0.8]))?;
    assert!(store.get_embedding(id)?.is_some());

    store.tombstone(id)?;
    store.tombstone(id)?;

    assert!(store.get_embedding(id)?.is_none());
    assert!(store.get_snippet(id)?.is_none());
    assert!(store.get_file_by_id(id)?.expect("row kept").tombstoned);
    Ok(())
}

#[test]
fn embedding_blob_round_trips() -> Result<()> {
    let store = store();
    let (id, _) = store.upsert_file("/w/a.txt", 10, 1_000, None, "h1")?;

    let vector = vec![0.25f32, -1.5, 3.0, 0.0];
    store.put_content(id, "alpha", Some(&vector))?;
    assert_eq!(store.get_embedding(id)?, Some(vector));
    assert_eq!(store.get_snippet(id)?.as_deref(), Some("alpha"));

    // Replacing with empty content nulls the embedding.
    store.put_content(id, "", None)?;
    assert!(store.get_embedding(id)?.is_none());
    Ok(())
}

#[test]
fn load_embeddings_skips_tombstoned_files() -> Result<()> {
    let store = store();
    let (id_a, _) = store.upsert_file("/w/a.txt", 10, 1_000, None, "ha")?;
    let (id_b, _) = store.upsert_file("/w/b.txt", 10, 1_000, None, "hb")?;
    store.put_content(id_a, "a", Some(&[1.0, 0.0]))?;
    store.put_content(id_b, "b", Some(&[0.0, 1.0]))?;

    store.tombstone(id_a)?;

    let ids: Vec<i64> = store.load_embeddings()?.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![id_b]);
    Ok(())
}

#[test]
fn record_access_is_monotone_and_reports_previous() -> Result<()> {
    let store = store();
    let (id, _) = store.upsert_file("/w/a.txt", 10, 1_000, None, "h1")?;

    let first = store.record_access(id, 5_000)?;
    assert_eq!(first.previous, None);
    assert_eq!(first.access_count, 1);

    let second = store.record_access(id, 9_000)?;
    assert_eq!(second.previous, Some(5_000));
    assert_eq!(second.access_count, 2);

    // An out-of-order timestamp never moves last_accessed backwards.
    let third = store.record_access(id, 1_000)?;
    assert_eq!(third.previous, Some(9_000));
    let activity = store.get_activity(id)?.expect("activity row");
    assert_eq!(activity.last_accessed, 9_000);
    assert_eq!(activity.access_count, 3);
    assert_eq!(activity.first_seen, 5_000);

    Ok(())
}

#[test]
fn copairs_are_canonical_and_unique() -> Result<()> {
    let store = store();
    let (id_a, _) = store.upsert_file("/w/a.txt", 1, 0, None, "ha")?;
    let (id_b, _) = store.upsert_file("/w/b.txt", 1, 0, None, "hb")?;

    // Bump in both orders; both land on the same row.
    store.bump_copair(id_b, id_a)?;
    store.bump_copair(id_a, id_b)?;

    assert_eq!(store.co_count(id_a, id_b)?, 2);
    assert_eq!(store.co_count(id_b, id_a)?, 2);
    assert_eq!(store.copartners(id_a)?, vec![(id_b, 2)]);
    assert_eq!(store.copartners(id_b)?, vec![(id_a, 2)]);

    assert_eq!(store.co_count(id_a, 9_999)?, 0);
    Ok(())
}

#[test]
fn scan_epoch_is_monotone() -> Result<()> {
    let store = store();
    assert_eq!(store.scan_epoch()?, 0);
    assert_eq!(store.bump_scan_epoch()?, 1);
    assert_eq!(store.bump_scan_epoch()?, 2);
    assert_eq!(store.scan_epoch()?, 2);
    Ok(())
}

#[test]
fn stats_count_live_and_embedded() -> Result<()> {
    let store = store();
    let (id_a, _) = store.upsert_file("/w/a.txt", 1, 0, None, "ha")?;
    let (id_b, _) = store.upsert_file("/w/b.txt", 1, 0, None, "hb")?;
    store.put_content(id_a, "a", Some(&[1.0]))?;
    store.put_content(id_b, "", None)?;

    let stats = store.stats()?;
    assert_eq!(stats.n_files, 2);
    assert_eq!(stats.n_embedded, 1);

    store.tombstone(id_a)?;
    let stats = store.stats()?;
    assert_eq!(stats.n_files, 1);
    assert_eq!(stats.n_embedded, 0);
    Ok(())
}
