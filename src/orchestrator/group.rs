//! Bounded fan-out/join primitive shared by every concurrency level.
//!
//! Items are admitted in submission order, at most `limit` at a time. The
//! call returns only after every item has reached a terminal state; a
//! failing item never cancels its siblings.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::{AppError, Result};

/// Run `work` over `items` with at most `limit` in flight.
///
/// Results are returned in submission order. A task that panics yields
/// `AppError::Spawn` in its slot.
pub async fn run_bounded<T, F, Fut>(
    items: Vec<T>,
    limit: usize,
    work: F,
) -> Vec<Result<Fut::Output>>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let work = Arc::new(work);
    let mut handles = Vec::with_capacity(items.len());

    for item in items {
        // Semaphore was never closed, so acquire cannot fail.
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let work = Arc::clone(&work);
        handles.push(tokio::spawn(async move {
            let _permit = permit;
            work(item).await
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(
            handle
                .await
                .map_err(|err| AppError::Spawn(format!("task panicked: {err}"))),
        );
    }
    results
}

/// Aggregate exit code of a joined group: the first non-zero code in
/// submission order, `1` for a panicked item, `0` otherwise.
#[must_use]
pub fn aggregate_codes(results: &[Result<i32>]) -> i32 {
    results
        .iter()
        .map(|r| match r {
            Ok(code) => *code,
            Err(_) => 1,
        })
        .find(|code| *code != 0)
        .unwrap_or(0)
}

/// Counts held slots and remembers the high-water mark.
#[derive(Debug, Default)]
pub struct SlotGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl SlotGauge {
    /// Occupy a slot until the returned guard drops.
    #[must_use]
    pub fn enter(self: &Arc<Self>) -> SlotGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        SlotGuard {
            gauge: Arc::clone(self),
        }
    }

    /// Slots currently held.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Most slots ever held at once.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Releases a [`SlotGauge`] slot on drop.
#[derive(Debug)]
pub struct SlotGuard {
    gauge: Arc<SlotGauge>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.gauge.active.fetch_sub(1, Ordering::SeqCst);
    }
}
