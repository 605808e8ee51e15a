//! Integration tests for the merge engine
//!
//! Stores are built on disk through the public store API, merged, and the
//! outputs compared as sets of articles and links.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use wiki_mapper::merge::{merge_stores, MergeError, MergeOptions, PARTIAL_SUFFIX};
use wiki_mapper::storage::{SqliteStore, StorageError, Store};
use wiki_mapper::ArticleState;

/// Articles as (title, state, processed, discovered_at) and links as (from, to)
type Snapshot = (
    BTreeSet<(String, String, bool, String)>,
    BTreeSet<(String, String)>,
);

fn build_store(path: &Path, build: impl FnOnce(&mut SqliteStore)) -> PathBuf {
    let mut store = SqliteStore::open(path).unwrap();
    build(&mut store);
    path.to_path_buf()
}

fn snapshot(path: &Path) -> Snapshot {
    let store = SqliteStore::open_source(path).unwrap();

    let mut articles = BTreeSet::new();
    store
        .for_each_article(&mut |a| {
            articles.insert((a.title, a.state.to_string(), a.processed, a.discovered_at));
            Ok(())
        })
        .unwrap();

    let mut links = BTreeSet::new();
    store
        .for_each_link(&mut |l| {
            links.insert((l.from_title, l.to_title));
            Ok(())
        })
        .unwrap();

    (articles, links)
}

/// Staging files left behind in `dir`
fn partial_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.to_string_lossy().ends_with(PARTIAL_SUFFIX))
        .collect()
}

fn merge(inputs: &[PathBuf], output: &Path) -> Snapshot {
    merge_stores(inputs, output, &MergeOptions::default()).unwrap();
    snapshot(output)
}

/// Three overlapping worker stores
fn three_stores(dir: &Path) -> (PathBuf, PathBuf, PathBuf) {
    let a = build_store(&dir.join("a.db"), |s| {
        s.enqueue("Go").unwrap();
        s.insert_link("Go", "Concurrency").unwrap();
        s.insert_link("Go", "Rust").unwrap();
        s.upsert_article("Concurrency").unwrap();
        s.upsert_article("Rust").unwrap();
        s.mark_processed("Go").unwrap();
        s.enqueue("Haskell").unwrap();
    });
    let b = build_store(&dir.join("b.db"), |s| {
        s.enqueue("Rust").unwrap();
        s.insert_link("Rust", "Go").unwrap();
        s.upsert_article("Go").unwrap();
        s.mark_processed("Rust").unwrap();
        s.enqueue("Missing").unwrap();
        s.mark_failed("Missing", "HTTP 404").unwrap();
        s.enqueue("Haskell").unwrap();
        s.next_queued().unwrap();
    });
    let c = build_store(&dir.join("c.db"), |s| {
        s.enqueue("Concurrency").unwrap();
        s.insert_link("Concurrency", "Go").unwrap();
        s.insert_link("Go", "Concurrency").unwrap();
        s.upsert_article("Go").unwrap();
        s.mark_processed("Concurrency").unwrap();
        s.upsert_article("Missing").unwrap();
    });
    (a, b, c)
}

#[test]
fn test_processed_flag_is_ored() {
    let dir = tempfile::tempdir().unwrap();
    let title = "Go (programming language)";

    let done = build_store(&dir.path().join("done.db"), |s| {
        s.enqueue(title).unwrap();
        s.mark_processed(title).unwrap();
    });
    let seen = build_store(&dir.path().join("seen.db"), |s| {
        s.upsert_article(title).unwrap();
    });

    for (name, inputs) in [
        ("ab.db", vec![done.clone(), seen.clone()]),
        ("ba.db", vec![seen.clone(), done.clone()]),
    ] {
        let output = dir.path().join(name);
        merge_stores(&inputs, &output, &MergeOptions::default()).unwrap();

        let store = SqliteStore::open_source(&output).unwrap();
        let article = store.get_article(title).unwrap().unwrap();
        assert!(article.processed);
        assert_eq!(article.state, ArticleState::Processed);
        assert_eq!(store.count_articles().unwrap(), 1);
    }
}

#[test]
fn test_links_are_deduplicated() {
    let dir = tempfile::tempdir().unwrap();

    let a = build_store(&dir.path().join("a.db"), |s| {
        s.insert_link("Go", "Concurrency").unwrap();
    });
    let b = build_store(&dir.path().join("b.db"), |s| {
        s.insert_link("Go", "Concurrency").unwrap();
        s.insert_link("Concurrency", "Go").unwrap();
    });

    let output = dir.path().join("merged.db");
    let report = merge_stores(&[a, b], &output, &MergeOptions::default()).unwrap();

    assert_eq!(report.total_links, 2);
    let (_, links) = snapshot(&output);
    assert_eq!(
        links.iter().filter(|(f, t)| f == "Go" && t == "Concurrency").count(),
        1
    );
}

#[test]
fn test_merge_is_commutative_and_associative() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b, c) = three_stores(dir.path());

    let abc = merge(&[a.clone(), b.clone(), c.clone()], &dir.path().join("abc.db"));
    let cba = merge(&[c.clone(), b.clone(), a.clone()], &dir.path().join("cba.db"));
    let bca = merge(&[b.clone(), c.clone(), a.clone()], &dir.path().join("bca.db"));

    let ab = dir.path().join("ab.db");
    merge(&[a.clone(), b.clone()], &ab);
    let ab_c = merge(&[ab, c.clone()], &dir.path().join("ab_c.db"));

    let bc = dir.path().join("bc.db");
    merge(&[b.clone(), c.clone()], &bc);
    let a_bc = merge(&[a.clone(), bc], &dir.path().join("a_bc.db"));

    assert_eq!(abc, cba);
    assert_eq!(abc, bca);
    assert_eq!(abc, ab_c);
    assert_eq!(abc, a_bc);

    // Merging a store with itself changes nothing
    let twice = merge(&[a.clone(), a.clone()], &dir.path().join("aa.db"));
    let once = merge(&[a.clone()], &dir.path().join("a_only.db"));
    assert_eq!(twice, once);
}

#[test]
fn test_merge_state_rules() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b, c) = three_stores(dir.path());
    let output = dir.path().join("merged.db");
    merge_stores(&[a, b, c], &output, &MergeOptions::default()).unwrap();

    let store = SqliteStore::open_source(&output).unwrap();
    let state = |title: &str| store.get_article(title).unwrap().unwrap().state;

    assert_eq!(state("Go"), ArticleState::Processed);
    assert_eq!(state("Rust"), ArticleState::Processed);
    assert_eq!(state("Concurrency"), ArticleState::Processed);
    assert_eq!(state("Missing"), ArticleState::Failed);
    // Claimed in one store, queued in another: never carried over as claimed
    assert_eq!(state("Haskell"), ArticleState::Queued);
    assert_eq!(store.count_by_state(ArticleState::InProgress).unwrap(), 0);
}

#[test]
fn test_merge_with_empty_store_is_identity() {
    let dir = tempfile::tempdir().unwrap();

    let full = build_store(&dir.path().join("full.db"), |s| {
        s.begin_batch().unwrap();
        for i in 0..100 {
            s.enqueue(&format!("Article {}", i)).unwrap();
        }
        for j in 0..250 {
            let from = format!("Article {}", j % 100);
            let to = format!("Target {}", j);
            s.insert_link(&from, &to).unwrap();
            s.upsert_article(&to).unwrap();
        }
        for i in 0..100 {
            s.mark_processed(&format!("Article {}", i)).unwrap();
        }
        s.commit_batch().unwrap();
    });
    let empty = build_store(&dir.path().join("empty.db"), |_| {});

    let expected = snapshot(&full);
    assert_eq!(expected.1.len(), 250);
    assert_eq!(expected.0.iter().filter(|a| a.2).count(), 100);

    let output = dir.path().join("merged.db");
    let report = merge_stores(&[full, empty], &output, &MergeOptions::default()).unwrap();

    assert_eq!(snapshot(&output), expected);
    assert_eq!(report.processed_articles, 100);
    assert_eq!(report.total_links, 250);
    assert_eq!(report.sources.len(), 2);
    assert_eq!(report.sources[0].articles, 350);
    assert_eq!(report.sources[0].links, 250);
    assert_eq!(report.sources[1].articles, 0);
}

#[test]
fn test_missing_input_fails_without_output() {
    let dir = tempfile::tempdir().unwrap();
    let (a, _, _) = three_stores(dir.path());
    let missing = dir.path().join("missing.db");
    let output = dir.path().join("merged.db");

    let result = merge_stores(&[a, missing.clone()], &output, &MergeOptions::default());

    match result {
        Err(MergeError::Input { path, source }) => {
            assert_eq!(path, missing);
            assert!(matches!(source, StorageError::NotFound(_)));
        }
        other => panic!("expected input error, got {:?}", other),
    }
    assert!(!output.exists());
    assert!(partial_files(dir.path()).is_empty());
}

#[test]
fn test_non_store_input_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let bogus = dir.path().join("notes.db");
    std::fs::write(&bogus, "this file is plain text and not a database at all").unwrap();

    let result = merge_stores(
        &[bogus.clone()],
        &dir.path().join("merged.db"),
        &MergeOptions::default(),
    );

    let err = result.unwrap_err();
    assert_eq!(err.path(), Some(bogus.as_path()));
    assert!(matches!(
        err,
        MergeError::Input {
            source: StorageError::NotAStore(_),
            ..
        }
    ));
}

#[test]
fn test_store_held_by_worker_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("busy.db");
    let mut worker = SqliteStore::open(&path).unwrap();
    worker.enqueue("Go").unwrap();

    let result = merge_stores(
        &[path.clone()],
        &dir.path().join("merged.db"),
        &MergeOptions::default(),
    );

    assert!(matches!(
        result,
        Err(MergeError::Input {
            source: StorageError::Locked(_),
            ..
        })
    ));
}

#[test]
fn test_merge_into_existing_output() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b, c) = three_stores(dir.path());

    let incremental = dir.path().join("incremental.db");
    merge(&[a.clone()], &incremental);
    merge(&[b.clone()], &incremental);
    let report = merge_stores(&[c.clone()], &incremental, &MergeOptions::default()).unwrap();
    assert_eq!(report.sources[0].path, incremental);

    let all_at_once = merge(&[a, b, c], &dir.path().join("all.db"));
    assert_eq!(snapshot(&incremental), all_at_once);
    assert!(partial_files(dir.path()).is_empty());
}

#[test]
fn test_failed_merge_keeps_previous_output() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b, _) = three_stores(dir.path());

    let output = dir.path().join("merged.db");
    let before = merge(&[a], &output);

    let result = merge_stores(
        &[b, dir.path().join("missing.db")],
        &output,
        &MergeOptions::default(),
    );

    assert!(result.is_err());
    assert_eq!(snapshot(&output), before);
    assert!(partial_files(dir.path()).is_empty());
}

#[test]
fn test_checkpoints_record_progress() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b, c) = three_stores(dir.path());
    let output = dir.path().join("merged.db");

    let report = merge_stores(
        &[a, b, c],
        &output,
        &MergeOptions {
            checkpoint_every: 3,
        },
    )
    .unwrap();

    let rows: u64 = report.sources.iter().map(|s| s.articles + s.links).sum();
    assert_eq!(report.rows_applied, rows);

    let store = SqliteStore::open_source(&output).unwrap();
    assert_eq!(
        store.get_progress("merge_rows_applied").unwrap(),
        Some(rows.to_string())
    );
    assert_eq!(
        store.get_progress("merge_sources_done").unwrap(),
        Some("3".to_string())
    );
    assert_eq!(
        store.get_progress("total_articles").unwrap(),
        Some(report.total_articles.to_string())
    );
}

#[test]
fn test_locked_existing_output_is_reported_as_output() {
    let dir = tempfile::tempdir().unwrap();
    let (a, _, _) = three_stores(dir.path());
    let output = dir.path().join("merged.db");

    // A worker still writing into the output path
    let mut holder = SqliteStore::open(&output).unwrap();
    holder.enqueue("Go").unwrap();

    let result = merge_stores(&[a], &output, &MergeOptions::default());

    match result {
        Err(MergeError::Output { path, source }) => {
            assert_eq!(path, output);
            assert!(matches!(source, StorageError::Locked(_)));
        }
        other => panic!("expected output error, got {:?}", other),
    }
    assert!(partial_files(dir.path()).is_empty());
}

#[test]
fn test_successful_merge_leaves_no_staging_files() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b, c) = three_stores(dir.path());
    let output = dir.path().join("merged.db");

    merge(&[a.clone(), b], &output);
    merge(&[c, a], &output);

    assert!(partial_files(dir.path()).is_empty());
    assert!(output.is_file());
}
