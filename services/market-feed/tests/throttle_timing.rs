//! Timing behaviour of throttled views under a paused clock

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{timeout, Instant};

use market_feed::throttle::spawn_throttled;

const INTERVAL: Duration = Duration::from_millis(100);

struct Source {
    changes: watch::Sender<u64>,
    value: Arc<AtomicU64>,
}

impl Source {
    fn set(&self, value: u64) {
        self.value.store(value, Ordering::SeqCst);
        self.changes.send_modify(|generation| *generation += 1);
    }
}

fn make_view() -> (Source, watch::Receiver<u64>) {
    let (changes, changes_rx) = watch::channel(0u64);
    let value = Arc::new(AtomicU64::new(0));
    let reader = value.clone();
    let view = spawn_throttled(changes_rx, INTERVAL, move || reader.load(Ordering::SeqCst));
    (Source { changes, value }, view)
}

#[tokio::test(start_paused = true)]
async fn test_burst_collapses_to_one_emission() {
    let (source, mut view) = make_view();
    assert_eq!(*view.borrow(), 0);

    let start = Instant::now();
    source.set(1);
    source.set(2);
    source.set(3);

    view.changed().await.unwrap();
    assert!(start.elapsed() >= INTERVAL);
    assert_eq!(*view.borrow_and_update(), 3);

    // Nothing else pending
    assert!(timeout(INTERVAL * 5, view.changed()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_change_inside_window_is_not_dropped() {
    let (source, mut view) = make_view();

    source.set(1);
    tokio::time::sleep(Duration::from_millis(60)).await;
    source.set(2);

    view.changed().await.unwrap();
    assert_eq!(*view.borrow_and_update(), 2);

    tokio::time::sleep(Duration::from_millis(50)).await;
    source.set(3);

    let start = Instant::now();
    view.changed().await.unwrap();
    assert!(start.elapsed() >= INTERVAL);
    assert_eq!(*view.borrow_and_update(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_idle_source_never_emits() {
    let (_source, mut view) = make_view();
    assert!(timeout(Duration::from_secs(10), view.changed()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_pending_value_flushed_after_source_closes() {
    let (source, mut view) = make_view();
    source.set(7);
    drop(source);

    view.changed().await.unwrap();
    assert_eq!(*view.borrow_and_update(), 7);

    // Task exits once flushed, closing the view
    assert!(view.changed().await.is_err());
}
