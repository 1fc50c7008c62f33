//! Aggregate hash semantics: determinism, caching, error taxonomy.

use std::error::Error;

use proptest::prelude::*;

use fshasher::errors::HashError;
use fshasher::index::{HashIndex, hasher};
use fshasher::key::WatchKey;
use fshasher_test_utils::{init_tracing, tree::TempTree};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn aggregate_is_independent_of_walk_order() -> TestResult {
    init_tracing();

    // Two roots with the same relative layout and contents, created in
    // different orders. Only (relative path, content) pairs may matter.
    let first = TempTree::new()?;
    first.write("a.rs", "alpha")?;
    first.write("sub/b.rs", "beta")?;
    first.write("z.rs", "zeta")?;

    let second = TempTree::new()?;
    second.write("z.rs", "zeta")?;
    second.write("sub/b.rs", "beta")?;
    second.write("a.rs", "alpha")?;

    let index = HashIndex::new();
    let k1 = WatchKey::new(first.root(), ".", "**/*.rs");
    let k2 = WatchKey::new(second.root(), ".", "**/*.rs");

    let r1 = index.get_or_compute(&k1).await?;
    let r2 = index.get_or_compute(&k2).await?;

    assert_eq!(r1.file_count, 3);
    assert_eq!(r1.hash, r2.hash);
    Ok(())
}

#[tokio::test]
async fn repeat_hash_is_idempotent_and_walk_free() -> TestResult {
    init_tracing();

    let tree = TempTree::new()?;
    tree.write("a.txt", "hello world")?;

    let index = HashIndex::new();
    let key = WatchKey::new(tree.root(), ".", "*.txt");

    let first = index.get_or_compute(&key).await?;
    assert_eq!(index.walks(), 1);

    let second = index.get_or_compute(&key).await?;
    assert_eq!(first, second);
    assert_eq!(index.walks(), 1, "clean hit must not walk the filesystem");
    Ok(())
}

#[tokio::test]
async fn hello_world_example() -> TestResult {
    init_tracing();

    let tree = TempTree::new()?;
    let one = tree.write("one.txt", "hello world")?;

    let index = HashIndex::new();
    let key = WatchKey::new(tree.root(), ".", "*.txt");

    let single = index.get_or_compute(&key).await?;
    assert_eq!(single.file_count, 1);
    assert!(!single.hash.is_empty());

    // Same bytes under a second name: per-file hashes are equal, the
    // aggregate is not, because paths participate in it.
    let two = tree.write("two.txt", "hello world")?;
    index.invalidate_file(&two);
    index.invalidate_file(&one);

    let double = index.get_or_compute(&key).await?;
    assert_eq!(double.file_count, 2);
    assert_ne!(single.hash, double.hash);
    assert_eq!(index.file_hash(&one), index.file_hash(&two));
    Ok(())
}

#[tokio::test]
async fn missing_root_is_not_found_and_empty_match_is_no_match() -> TestResult {
    init_tracing();

    let tree = TempTree::new()?;
    tree.write("readme.md", "# hi")?;

    let index = HashIndex::new();

    let absent = WatchKey::new(tree.path("absent"), ".", "*.rs");
    assert!(matches!(
        index.get_or_compute(&absent).await,
        Err(HashError::NotFound(_))
    ));

    let none = WatchKey::new(tree.root(), ".", "*.rs");
    assert!(matches!(
        index.get_or_compute(&none).await,
        Err(HashError::NoMatch)
    ));
    Ok(())
}

#[tokio::test]
async fn failed_walks_leave_the_cache_reusable() -> TestResult {
    init_tracing();

    let tree = TempTree::new()?;
    tree.write("a.toml", "x = 1")?;

    let index = HashIndex::new();
    let good = WatchKey::new(tree.root(), ".", "*.toml");
    let bad = WatchKey::new(tree.root(), ".", "*.yaml");

    let before = index.get_or_compute(&good).await?;
    assert!(index.get_or_compute(&bad).await.is_err());

    // The failing request corrupted nothing; a retry and the original key
    // both behave as before.
    let after = index.get_or_compute(&good).await?;
    assert_eq!(before, after);
    Ok(())
}

#[tokio::test]
async fn invalidation_hits_exactly_the_matching_keys() -> TestResult {
    init_tracing();

    let tree = TempTree::new()?;
    let doc = tree.write("notes.md", "md")?;
    tree.write("main.rs", "rs")?;

    let index = HashIndex::new();
    let md_key = WatchKey::new(tree.root(), ".", "*.md");
    let rs_key = WatchKey::new(tree.root(), ".", "*.rs");
    index.get_or_compute(&md_key).await?;
    index.get_or_compute(&rs_key).await?;

    let affected = index.invalidate_file(&doc);
    assert_eq!(affected, vec![md_key.clone()]);
    assert!(index.cached(&md_key).is_none());
    assert!(index.cached(&rs_key).is_some());
    Ok(())
}

#[tokio::test]
async fn fingerprint_reuse_skips_unchanged_files() -> TestResult {
    init_tracing();

    let tree = TempTree::new()?;
    let a = tree.write("a.txt", "stable")?;
    tree.write("b.txt", "changing")?;

    let index = HashIndex::new();
    let key = WatchKey::new(tree.root(), ".", "*.txt");
    index.get_or_compute(&key).await?;
    let a_hash = index.file_hash(&a).expect("a.txt hashed");

    let b = tree.write("b.txt", "changed")?;
    index.invalidate_file(&b);
    index.get_or_compute(&key).await?;

    // a.txt kept its cached hash; b.txt was re-hashed.
    assert_eq!(index.file_hash(&a), Some(a_hash));
    Ok(())
}

#[tokio::test]
async fn concurrent_callers_share_one_computation() -> TestResult {
    init_tracing();

    let tree = TempTree::new()?;
    for i in 0..32 {
        tree.write(&format!("f{i}.txt"), &format!("contents {i}"))?;
    }

    let index = std::sync::Arc::new(HashIndex::new());
    let key = WatchKey::new(tree.root(), ".", "*.txt");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let index = std::sync::Arc::clone(&index);
        let key = key.clone();
        handles.push(tokio::spawn(
            async move { index.get_or_compute(&key).await },
        ));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await??);
    }

    assert!(results.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(index.walks(), 1, "callers must share a single walk");
    Ok(())
}

proptest! {
    #[test]
    fn aggregate_is_permutation_invariant(
        pairs in proptest::collection::vec(("[a-z]{1,12}", "[0-9a-f]{16}"), 0..16)
    ) {
        let mut reversed = pairs.clone();
        reversed.reverse();
        prop_assert_eq!(hasher::aggregate(&pairs), hasher::aggregate(&reversed));
    }

    #[test]
    fn aggregate_distinguishes_paths(
        rel_a in "[a-z]{1,12}",
        rel_b in "[a-z]{1,12}",
        hash in "[0-9a-f]{16}"
    ) {
        prop_assume!(rel_a != rel_b);
        let a = hasher::aggregate(&[(rel_a, hash.clone())]);
        let b = hasher::aggregate(&[(rel_b, hash)]);
        prop_assert_ne!(a, b);
    }
}
