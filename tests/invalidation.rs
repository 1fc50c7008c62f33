//! Watch plumbing: debounce coalescing, subscription fan-out, root
//! refcounting and lazy invalidation, all against a scripted backend.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::sleep;

use fshasher::config::Settings;
use fshasher::daemon::Daemon;
use fshasher::key::WatchKey;
use fshasher::watch::ChangeNotification;
use fshasher_test_utils::{init_tracing, mock_watch::MockBackend, tree::TempTree, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

const DEBOUNCE: Duration = Duration::from_millis(50);

fn test_settings(tree: &TempTree) -> Settings {
    Settings {
        state_file: tree.path("state.json"),
        debounce: DEBOUNCE,
        ..Settings::default()
    }
}

fn channel() -> (
    mpsc::Sender<ChangeNotification>,
    mpsc::Receiver<ChangeNotification>,
) {
    mpsc::channel(16)
}

#[tokio::test]
async fn burst_of_events_coalesces_into_one_notification() -> TestResult {
    init_tracing();

    let tree = TempTree::new()?;
    let state = TempTree::new()?;
    let a = tree.write("a.txt", "one")?;
    let b = tree.write("b.txt", "two")?;

    let backend = MockBackend::new();
    let daemon = Daemon::open(backend.clone(), &test_settings(&state))?;
    let key = WatchKey::new(tree.root(), ".", "*.txt");

    let stale = daemon.hash(&key, false).await?;
    let (tx, mut rx) = channel();
    daemon.watch(&key, tx)?;

    tree.write("a.txt", "one rewritten")?;
    tree.write("b.txt", "two rewritten")?;

    // An editor-style burst: several raw events inside one window.
    backend.emit(vec![a.clone()]);
    backend.emit(vec![a.clone()]);
    backend.emit(vec![b.clone()]);
    backend.emit(vec![a.clone()]);

    let note = with_timeout(rx.recv()).await.expect("notification");
    assert_eq!(note.key, key.id());
    assert_eq!(
        note.paths,
        vec![a.to_string_lossy().to_string(), b.to_string_lossy().to_string()]
    );

    // Exactly one notification for the whole burst.
    sleep(DEBOUNCE * 4).await;
    assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);

    // The background recompute landed; the next hash is a clean hit.
    let fresh = daemon.hash(&key, false).await?;
    assert_ne!(stale.hash, fresh.hash);
    assert_eq!(daemon.index().cached(&key), Some(fresh));
    Ok(())
}

#[tokio::test]
async fn quiet_period_resets_the_window() -> TestResult {
    init_tracing();

    let tree = TempTree::new()?;
    let state = TempTree::new()?;
    let a = tree.write("a.txt", "one")?;

    let backend = MockBackend::new();
    let daemon = Daemon::open(backend.clone(), &test_settings(&state))?;
    let key = WatchKey::new(tree.root(), ".", "*.txt");

    daemon.hash(&key, false).await?;
    let (tx, mut rx) = channel();
    daemon.watch(&key, tx)?;

    tree.write("a.txt", "first change")?;
    backend.emit(vec![a.clone()]);
    with_timeout(rx.recv()).await.expect("first notification");

    // A second change after the window closed gets its own notification.
    tree.write("a.txt", "second change")?;
    backend.emit(vec![a.clone()]);
    let note = with_timeout(rx.recv()).await.expect("second notification");
    assert_eq!(note.key, key.id());
    Ok(())
}

#[tokio::test]
async fn each_subscription_is_notified_independently() -> TestResult {
    init_tracing();

    let tree = TempTree::new()?;
    let state = TempTree::new()?;
    let a = tree.write("a.txt", "shared")?;

    let backend = MockBackend::new();
    let daemon = Daemon::open(backend.clone(), &test_settings(&state))?;
    let key = WatchKey::new(tree.root(), ".", "*.txt");
    daemon.hash(&key, false).await?;

    let (tx1, mut rx1) = channel();
    let (tx2, mut rx2) = channel();
    let sub1 = daemon.watch(&key, tx1)?;
    daemon.watch(&key, tx2)?;

    tree.write("a.txt", "changed once")?;
    backend.emit(vec![a.clone()]);
    with_timeout(rx1.recv()).await.expect("first subscriber");
    with_timeout(rx2.recv()).await.expect("second subscriber");

    // Dropping one subscription must not silence the other.
    daemon.unwatch(&key, &[sub1])?;
    tree.write("a.txt", "changed twice")?;
    backend.emit(vec![a.clone()]);

    let note = with_timeout(rx2.recv()).await.expect("surviving subscriber");
    assert_eq!(note.key, key.id());
    sleep(DEBOUNCE * 4).await;
    assert_eq!(rx1.try_recv().unwrap_err(), TryRecvError::Empty);
    Ok(())
}

#[tokio::test]
async fn roots_are_refcounted_across_keys() -> TestResult {
    init_tracing();

    let tree = TempTree::new()?;
    let state = TempTree::new()?;
    tree.write("doc.md", "md")?;
    tree.write("main.rs", "rs")?;

    let backend = MockBackend::new();
    let daemon = Daemon::open(backend.clone(), &test_settings(&state))?;
    let md = WatchKey::new(tree.root(), ".", "*.md");
    let rs = WatchKey::new(tree.root(), ".", "*.rs");

    let (tx, _rx) = channel();
    let md_sub = daemon.watch(&md, tx.clone())?;
    let rs_sub = daemon.watch(&rs, tx)?;

    // Two keys on the same root share one OS watch.
    assert_eq!(backend.armed_roots(), vec![tree.root()]);

    daemon.unwatch(&md, &[md_sub])?;
    assert_eq!(backend.armed_roots(), vec![tree.root()]);

    daemon.unwatch(&rs, &[rs_sub])?;
    assert!(backend.armed_roots().is_empty());
    assert_eq!(backend.disarmed_roots(), vec![tree.root()]);
    Ok(())
}

#[tokio::test]
async fn nested_roots_reuse_an_armed_ancestor() -> TestResult {
    init_tracing();

    let tree = TempTree::new()?;
    let state = TempTree::new()?;
    tree.write("sub/inner.rs", "rs")?;

    let backend = MockBackend::new();
    let daemon = Daemon::open(backend.clone(), &test_settings(&state))?;
    let outer = WatchKey::new(tree.root(), ".", "**/*.rs");
    let inner = WatchKey::new(tree.path("sub"), ".", "*.rs");

    let (tx, _rx) = channel();
    daemon.watch(&outer, tx.clone())?;
    daemon.watch(&inner, tx)?;

    // The recursive ancestor watch covers the nested root.
    assert_eq!(backend.armed_roots(), vec![tree.root()]);
    Ok(())
}

#[tokio::test]
async fn unwatched_keys_stay_lazily_dirty() -> TestResult {
    init_tracing();

    let tree = TempTree::new()?;
    let state = TempTree::new()?;
    tree.write("doc.md", "md")?;
    let rs = tree.write("main.rs", "fn main() {}")?;

    let backend = MockBackend::new();
    let daemon = Daemon::open(backend.clone(), &test_settings(&state))?;
    let md_key = WatchKey::new(tree.root(), ".", "*.md");
    let rs_key = WatchKey::new(tree.root(), ".", "*.rs");

    // Watch only the markdown key so the root is armed at all.
    let (tx, mut rx) = channel();
    daemon.watch(&md_key, tx)?;
    let stale = daemon.hash(&rs_key, false).await?;
    let walks_before = daemon.index().walks();

    tree.write("main.rs", "fn main() { println!(); }")?;
    backend.emit(vec![rs.clone()]);
    sleep(DEBOUNCE * 4).await;

    // Nobody watches the rust key: no notification, no eager recompute.
    assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
    assert_eq!(daemon.index().walks(), walks_before);
    assert!(daemon.index().cached(&rs_key).is_none());

    // The next explicit request pays for the recompute.
    let fresh = daemon.hash(&rs_key, false).await?;
    assert_ne!(stale.hash, fresh.hash);
    Ok(())
}

#[tokio::test]
async fn deleted_files_leave_the_aggregate() -> TestResult {
    init_tracing();

    let tree = TempTree::new()?;
    let state = TempTree::new()?;
    tree.write("keep.txt", "keep")?;
    let gone = tree.write("gone.txt", "gone")?;

    let backend = MockBackend::new();
    let daemon = Daemon::open(backend.clone(), &test_settings(&state))?;
    let key = WatchKey::new(tree.root(), ".", "*.txt");

    let both = daemon.hash(&key, false).await?;
    assert_eq!(both.file_count, 2);

    let (tx, mut rx) = channel();
    daemon.watch(&key, tx)?;

    tree.remove("gone.txt")?;
    backend.emit(vec![gone.clone()]);
    with_timeout(rx.recv()).await.expect("deletion notification");

    let remaining = daemon.hash(&key, false).await?;
    assert_eq!(remaining.file_count, 1);
    assert_ne!(both.hash, remaining.hash);
    Ok(())
}

#[tokio::test]
async fn connection_teardown_drops_orphaned_cache_entries() -> TestResult {
    init_tracing();

    let tree = TempTree::new()?;
    let state = TempTree::new()?;
    tree.write("a.txt", "contents")?;

    let backend = MockBackend::new();
    let daemon: Arc<Daemon<MockBackend>> = Daemon::open(backend.clone(), &test_settings(&state))?;
    let key = WatchKey::new(tree.root(), ".", "*.txt");

    daemon.hash(&key, false).await?;
    let (tx, _rx) = channel();
    let sub = daemon.watch(&key, tx)?;
    assert!(daemon.index().cached(&key).is_some());

    daemon.drop_connection(vec![(key.clone(), sub)]);

    // No subscription and no persisted record: the entry is gone and the
    // root is disarmed.
    assert!(daemon.index().cached(&key).is_none());
    assert!(backend.armed_roots().is_empty());
    Ok(())
}
