// SPDX-License-Identifier: Apache-2.0
//! Cooperative cancellation and a bounded worker pool for running tool
//! calls from a single LLM turn concurrently while still returning results
//! in the order the calls were made.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const DEFAULT_WORKERS: usize = 4;

struct State {
    cancelled: bool,
    callbacks: Vec<Box<dyn FnOnce() + Send>>,
}

/// A set-once flag with callback registration, shared cheaply across the
/// tasks spawned for one dispatch round.
#[derive(Clone)]
pub struct CancellationToken {
    state: Arc<Mutex<State>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State { cancelled: false, callbacks: Vec::new() })),
        }
    }

    /// Idempotent. On the first call, flips the flag and runs every
    /// registered callback outside the lock so a callback that re-enters
    /// (registers another callback, checks `is_cancelled`) can't deadlock.
    pub fn cancel(&self) {
        let callbacks = {
            let mut state = self.state.lock().unwrap();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            std::mem::take(&mut state.callbacks)
        };
        for cb in callbacks {
            cb();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().unwrap().cancelled
    }

    /// Runs `cb` immediately if already cancelled; otherwise stores it for
    /// the eventual `cancel()`.
    pub fn register_callback(&self, cb: impl FnOnce() + Send + 'static) {
        let already_cancelled = {
            let mut state = self.state.lock().unwrap();
            if state.cancelled {
                true
            } else {
                state.callbacks.push(Box::new(cb));
                return;
            }
        };
        if already_cancelled {
            cb();
        }
    }
}

/// One tool invocation requested in a single LLM turn.
#[derive(Debug, Clone)]
pub struct Call {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

/// The outcome of one dispatched call, indexed back to its `Call` by `id`.
#[derive(Debug, Clone)]
pub struct CallResult {
    pub id: String,
    pub name: String,
    pub output: String,
    pub cancelled: bool,
}

/// Fixed-size worker pool for running tool calls. Bounds real concurrency
/// to `worker_count` regardless of how many calls a single turn submits.
pub struct Dispatcher {
    semaphore: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(worker_count: usize) -> Self {
        Self { semaphore: Arc::new(Semaphore::new(worker_count.max(1))) }
    }

    /// Runs every call through `executor`, blocking until all have
    /// completed (successfully, errored, or observed cancellation), and
    /// returns results in the same order as `calls`.
    pub async fn dispatch<F, Fut>(
        &self,
        calls: Vec<Call>,
        cancellation: CancellationToken,
        executor: F,
    ) -> Vec<CallResult>
    where
        F: Fn(Call, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = String> + Send + 'static,
    {
        let executor = Arc::new(executor);
        let mut joins = JoinSet::new();

        for (index, call) in calls.into_iter().enumerate() {
            let semaphore = self.semaphore.clone();
            let cancellation = cancellation.clone();
            let executor = executor.clone();

            joins.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let id = call.id.clone();
                let name = call.name.clone();

                if cancellation.is_cancelled() {
                    return (
                        index,
                        CallResult { id, name, output: String::new(), cancelled: true },
                    );
                }

                let output = executor(call, cancellation).await;
                (index, CallResult { id, name, output, cancelled: false })
            });
        }

        let mut results: Vec<Option<CallResult>> = Vec::new();
        while let Some(joined) = joins.join_next().await {
            match joined {
                Ok((index, result)) => {
                    if results.len() <= index {
                        results.resize_with(index + 1, || None);
                    }
                    results[index] = Some(result);
                }
                Err(e) => tracing::error!(error = %e, "tool dispatch task panicked"),
            }
        }

        results.into_iter().flatten().collect()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn cancel_is_idempotent_and_runs_callbacks_once() {
        let token = CancellationToken::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        token.register_callback(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        token.cancel();
        token.cancel();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(token.is_cancelled());
    }

    #[test]
    fn callback_registered_after_cancel_runs_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        token.register_callback(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatch_preserves_input_order_regardless_of_completion_order() {
        let dispatcher = Dispatcher::new(4);
        let calls = vec![
            Call { id: "1".into(), name: "slow".into(), args: serde_json::json!({}) },
            Call { id: "2".into(), name: "fast".into(), args: serde_json::json!({}) },
        ];
        let results = dispatcher
            .dispatch(calls, CancellationToken::new(), |call, _cancel| async move {
                if call.name == "slow" {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                }
                format!("done:{}", call.name)
            })
            .await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "1");
        assert_eq!(results[0].output, "done:slow");
        assert_eq!(results[1].id, "2");
        assert_eq!(results[1].output, "done:fast");
    }

    #[tokio::test]
    async fn already_cancelled_token_skips_executor() {
        let dispatcher = Dispatcher::new(2);
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let calls = vec![Call { id: "1".into(), name: "noop".into(), args: serde_json::json!({}) }];
        let executed = Arc::new(AtomicUsize::new(0));
        let e = executed.clone();
        let results = dispatcher
            .dispatch(calls, cancellation, move |_call, _cancel| {
                let e = e.clone();
                async move {
                    e.fetch_add(1, Ordering::SeqCst);
                    "should not run".to_string()
                }
            })
            .await;
        assert_eq!(executed.load(Ordering::SeqCst), 0);
        assert!(results[0].cancelled);
    }

    #[tokio::test]
    async fn worker_pool_bounds_real_concurrency() {
        let dispatcher = Dispatcher::new(2);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let calls: Vec<Call> = (0..6)
            .map(|i| Call { id: i.to_string(), name: "x".into(), args: serde_json::json!({}) })
            .collect();

        let in_flight2 = in_flight.clone();
        let max_seen2 = max_seen.clone();
        dispatcher
            .dispatch(calls, CancellationToken::new(), move |_call, _cancel| {
                let in_flight = in_flight2.clone();
                let max_seen = max_seen2.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    "ok".to_string()
                }
            })
            .await;

        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }
}
