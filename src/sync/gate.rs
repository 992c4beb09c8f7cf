//! FIFO mutual-exclusion gate for the trigger flag.
//!
//! Scheduling here is single-threaded cooperative, but two logically
//! concurrent calls can still interleave between reading the trigger flag
//! and clearing it. The gate serializes that read-modify-write window.

use std::future::Future;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::WireResult;
use crate::sync::store::{SharedStore, TRIGGER_KEY};

/// Async lock with strict FIFO hand-off.
///
/// `acquire` suspends until the lock is free and returns a guard; dropping
/// the guard releases the lock to the next waiter in arrival order. Built on
/// a single-permit fair semaphore: release is guaranteed on every exit path
/// including panics, and a waiter cancelled mid-hand-off returns the permit
/// instead of stranding it.
pub struct Gate {
    sem: Semaphore,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    pub fn new() -> Self {
        Self {
            sem: Semaphore::new(1),
        }
    }

    pub async fn acquire(&self) -> GateGuard<'_> {
        let permit = self
            .sem
            .acquire()
            .await
            .expect("gate semaphore is never closed");
        GateGuard { _permit: permit }
    }

    /// Run `f` while holding the lock. The lock is released when the
    /// returned future completes, errors, or is dropped mid-flight.
    pub async fn with_lock<T, F, Fut>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.acquire().await;
        f().await
    }
}

#[derive(Debug)]
pub struct GateGuard<'a> {
    _permit: SemaphorePermit<'a>,
}

// ---------------------------------------------------------------------------
// Trigger flag — "redirect the next matching call" boolean
// ---------------------------------------------------------------------------

/// Gate-guarded accessor for the shared trigger flag.
///
/// The flag lives in the shared store under [`TRIGGER_KEY`] so both
/// execution contexts see it; the gate makes read-then-clear atomic with
/// respect to concurrent matching calls. Without it, two racing calls could
/// both observe the flag set (duplicate redirection) or both miss it.
pub struct TriggerFlag {
    gate: Gate,
    store: Arc<dyn SharedStore>,
}

impl TriggerFlag {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self {
            gate: Gate::new(),
            store,
        }
    }

    /// Arm the flag: the next matching call is redirected.
    pub async fn arm(&self) -> WireResult<()> {
        self.gate
            .with_lock(|| async { self.store.set(TRIGGER_KEY, json!(true)).await })
            .await
    }

    /// Read-then-clear under the gate. Returns `true` exactly once per arm:
    /// the caller that sees `true` must redirect, everyone else proceeds.
    pub async fn check_and_clear(&self) -> WireResult<bool> {
        self.gate
            .with_lock(|| async {
                let armed = self
                    .store
                    .get(TRIGGER_KEY)
                    .await?
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if armed {
                    self.store.set(TRIGGER_KEY, json!(false)).await?;
                }
                Ok(armed)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio_test::{assert_pending, task};

    #[tokio::test]
    async fn with_lock_is_mutually_exclusive() {
        let gate = Arc::new(Gate::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let gate = gate.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                gate.with_lock(|| async {
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn release_runs_even_when_locked_section_panics() {
        let gate = Arc::new(Gate::new());
        let g2 = gate.clone();
        let crashed = tokio::spawn(async move {
            let _guard = g2.acquire().await;
            panic!("boom");
        });
        assert!(crashed.await.is_err());

        // The lock must be free again; a bounded wait proves no deadlock.
        tokio::time::timeout(std::time::Duration::from_millis(100), gate.acquire())
            .await
            .expect("gate deadlocked after panic");
    }

    #[tokio::test]
    async fn waiters_wake_in_fifo_order() {
        let gate = Arc::new(Gate::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let guard = gate.acquire().await;
        let mut handles = Vec::new();
        for i in 0..4 {
            let gate = gate.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _g = gate.acquire().await;
                order.lock().unwrap().push(i);
            }));
            // Let each waiter enqueue before the next spawns.
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        drop(guard);
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_keep_the_lock() {
        let gate = Gate::new();
        let guard = gate.acquire().await;

        // Queue a waiter, then cancel it after the hand-off has already
        // been aimed at it.
        let mut waiter = task::spawn(gate.acquire());
        assert_pending!(waiter.poll());
        drop(guard);
        drop(waiter);

        tokio::time::timeout(std::time::Duration::from_millis(200), gate.acquire())
            .await
            .expect("gate deadlocked: cancelled waiter kept the lock");
    }

    #[tokio::test]
    async fn trigger_flag_yields_exactly_one_redirect() {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let flag = Arc::new(TriggerFlag::new(store));
        flag.arm().await.unwrap();

        let a = flag.clone();
        let b = flag.clone();
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.check_and_clear().await.unwrap() }),
            tokio::spawn(async move { b.check_and_clear().await.unwrap() }),
        );
        let (ra, rb) = (ra.unwrap(), rb.unwrap());
        assert!(ra ^ rb, "exactly one caller must see the flag: {ra} {rb}");
    }

    #[tokio::test]
    async fn unarmed_flag_means_proceed() {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let flag = TriggerFlag::new(store);
        assert!(!flag.check_and_clear().await.unwrap());
    }
}
