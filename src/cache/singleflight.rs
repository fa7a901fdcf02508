//! Duplicate call suppression
//!
//! [`SingleFlight::run`] guarantees at most one in-flight computation per
//! key. The first caller of a burst starts the computation; everyone who asks
//! for the same key before it finishes waits and receives a clone of the same
//! `Result`. Once the result is published the key is released, so the next
//! call starts a fresh computation.
//!
//! The computation runs on a spawned task: a caller that gives up waiting
//! (its future is dropped) does not cancel work other waiters depend on.

use crate::common::{Error, Result};
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

type Slot<V> = Option<Result<V>>;
type Flights<V> = Arc<Mutex<HashMap<String, Flight<V>>>>;

struct Flight<V> {
    id: u64,
    done: watch::Receiver<Slot<V>>,
}

/// Coalesces concurrent computations keyed by string
pub struct SingleFlight<V> {
    flights: Flights<V>,
    next_id: AtomicU64,
}

impl<V> Default for SingleFlight<V> {
    fn default() -> Self {
        Self {
            flights: Arc::default(),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<V> SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key` unless a computation for `key` is already in
    /// flight, in which case wait for that one instead. `work` is dropped
    /// unused when the caller joins an existing flight.
    pub async fn run<F>(&self, key: &str, work: F) -> Result<V>
    where
        F: Future<Output = Result<V>> + Send + 'static,
    {
        let mut done = {
            let mut flights = self.flights.lock();
            match flights.get(key) {
                Some(flight) => flight.done.clone(),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = watch::channel(None);
                    flights.insert(
                        key.to_string(),
                        Flight {
                            id,
                            done: rx.clone(),
                        },
                    );
                    tokio::spawn(Self::lead(
                        Arc::clone(&self.flights),
                        key.to_string(),
                        id,
                        tx,
                        work,
                    ));
                    rx
                }
            }
        };

        let slot = done
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::Internal(format!("in-flight load for {:?} was dropped", key)))?;

        match &*slot {
            Some(result) => result.clone(),
            None => Err(Error::Internal(format!(
                "in-flight load for {:?} finished without a result",
                key
            ))),
        }
    }

    /// Execute the computation, publish its result, then release the key
    async fn lead<F>(flights: Flights<V>, key: String, id: u64, tx: watch::Sender<Slot<V>>, work: F)
    where
        F: Future<Output = Result<V>> + Send + 'static,
    {
        let result = match AssertUnwindSafe(work).catch_unwind().await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(key = %key, "load panicked");
                Err(Error::Internal(format!("load for {:?} panicked", key)))
            }
        };

        tx.send_replace(Some(result));

        let mut flights = flights.lock();
        if flights.get(&key).is_some_and(|f| f.id == id) {
            flights.remove(&key);
        }
    }

    /// Number of keys with a computation in flight
    pub fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }
}

impl<V> std::fmt::Debug for SingleFlight<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.flights.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Barrier;

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_callers_share_one_execution() {
        let group = Arc::new(SingleFlight::<u32>::new());
        let count = Arc::new(AtomicUsize::new(0));
        let all = 1000;
        let barrier = Arc::new(Barrier::new(all));

        let handles: Vec<_> = (0..all)
            .map(|_| {
                let group = Arc::clone(&group);
                let count = Arc::clone(&count);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    group
                        .run("key", async move {
                            count.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(200)).await;
                            Ok(7)
                        })
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 7);
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_sequential_calls_run_again() {
        let group = SingleFlight::<usize>::new();
        let count = Arc::new(AtomicUsize::new(0));

        for expected in 1..=3 {
            let count = Arc::clone(&count);
            let value = group
                .run("key", async move { Ok(count.fetch_add(1, Ordering::SeqCst) + 1) })
                .await
                .unwrap();
            assert_eq!(value, expected);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_error_shared_by_all_waiters() {
        let group = Arc::new(SingleFlight::<String>::new());
        let barrier = Arc::new(Barrier::new(10));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let group = Arc::clone(&group);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    group
                        .run("key", async {
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            Err(Error::loader(anyhow::anyhow!("key not exist")))
                        })
                        .await
                })
            })
            .collect();

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert_eq!(err.to_string(), "key not exist");
        }
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_coalesce() {
        let group = SingleFlight::<&'static str>::new();
        let (a, b) = tokio::join!(
            group.run("a", async { Ok("A") }),
            group.run("b", async { Ok("B") }),
        );
        assert_eq!(a.unwrap(), "A");
        assert_eq!(b.unwrap(), "B");
    }

    #[tokio::test]
    async fn test_abandoned_caller_does_not_cancel_work() {
        let group = Arc::new(SingleFlight::<u32>::new());
        let count = Arc::new(AtomicUsize::new(0));

        let leader = {
            let group = Arc::clone(&group);
            let count = Arc::clone(&count);
            tokio::spawn(async move {
                group
                    .run("key", async move {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        leader.abort();

        let value = group.run("key", async { Ok(2) }).await.unwrap();
        assert_eq!(value, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    async fn explode() -> Result<u32> {
        panic!("loader exploded")
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let group = SingleFlight::<u32>::new();
        let result = group.run("key", explode()).await;
        assert!(matches!(result, Err(Error::Internal(_))));
        assert_eq!(group.in_flight(), 0);

        assert_eq!(group.run("key", async { Ok(3) }).await.unwrap(), 3);
    }
}
