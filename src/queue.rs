//! Operation queues (C4, §4.4).
//!
//! Two logically independent queues — install and uninstall — share this
//! one generic implementation, the way client-go's
//! `workqueue.RateLimitingInterface` is one generic engine used by many
//! controllers rather than hand-rolled per use: keyed dedup, a single
//! worker (so operations against the same biz key never interleave within
//! one queue, §5), and a pluggable retry-backoff policy (§4.4, §9 — no
//! retry policy beyond the fixed default exists upstream, so this is the
//! hook that decision resolves into without inventing new behavior).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, trace, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A handler invoked by a queue worker for a dequeued key. Handlers must be
/// idempotent (§4.1, §4.4): re-running one for the same key after a prior
/// partial failure must not corrupt state.
#[async_trait]
pub trait QueueHandler: Send + Sync {
    async fn handle(&self, key: &str) -> anyhow::Result<()>;
}

/// Computes the backoff delay before retrying the `attempt`-th failure for
/// a key (1-indexed: `attempt == 1` is the delay before the first retry).
pub trait RetryPolicy: Send + Sync {
    fn delay_for(&self, attempt: u32) -> Duration;
}

/// §4.4's stated default: a fixed 100ms retry delay, regardless of attempt
/// count. `spec.md` §9 notes that a smarter, policy-driven backoff was
/// intended upstream but never specified — this fixed policy is what is
/// actually implemented, not a guess at the missing one.
pub struct FixedDelayPolicy {
    pub delay: Duration,
}

impl Default for FixedDelayPolicy {
    fn default() -> Self {
        FixedDelayPolicy {
            delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy for FixedDelayPolicy {
    fn delay_for(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

struct Shared {
    /// Keys currently enqueued: either waiting to run, or waiting out a
    /// retry backoff. A key is removed only when its handler succeeds.
    in_flight: Mutex<HashSet<String>>,
    attempts: Mutex<HashMap<String, u32>>,
}

/// A single-worker, keyed-dedup, rate-limited-retry work queue (§4.4).
pub struct RateLimitingQueue {
    name: String,
    sender: mpsc::UnboundedSender<String>,
    shared: Arc<Shared>,
}

impl RateLimitingQueue {
    /// Spawns the worker task and returns a handle to enqueue into it.
    /// The worker runs until `cancellation` fires.
    pub fn start(
        name: impl Into<String>,
        handler: Arc<dyn QueueHandler>,
        retry_policy: Arc<dyn RetryPolicy>,
        cancellation: CancellationToken,
    ) -> Self {
        let name = name.into();
        let (sender, mut receiver) = mpsc::unbounded_channel::<String>();
        let shared = Arc::new(Shared {
            in_flight: Mutex::new(HashSet::new()),
            attempts: Mutex::new(HashMap::new()),
        });

        let worker_name = name.clone();
        let worker_shared = shared.clone();
        let worker_sender = sender.clone();
        tokio::spawn(async move {
            loop {
                let key = tokio::select! {
                    _ = cancellation.cancelled() => {
                        debug!("queue {worker_name} shutting down");
                        break;
                    }
                    item = receiver.recv() => match item {
                        Some(key) => key,
                        None => break,
                    },
                };

                trace!("queue {worker_name} processing key={key}");
                match handler.handle(&key).await {
                    Ok(()) => {
                        worker_shared.attempts.lock().unwrap().remove(&key);
                        worker_shared.in_flight.lock().unwrap().remove(&key);
                        trace!("queue {worker_name} key={key} succeeded, forgotten");
                    }
                    Err(err) => {
                        let attempt = {
                            let mut attempts = worker_shared.attempts.lock().unwrap();
                            let entry = attempts.entry(key.clone()).or_insert(0);
                            *entry += 1;
                            *entry
                        };
                        let delay = retry_policy.delay_for(attempt);
                        warn!(
                            "queue {worker_name} key={key} attempt={attempt} failed: {err:#}; retrying in {delay:?}"
                        );
                        let resend = worker_sender.clone();
                        let retry_key = key.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            // The key stays in `in_flight` for the whole
                            // backoff window, so a concurrent enqueue of
                            // the same key is still deduplicated.
                            let _ = resend.send(retry_key);
                        });
                    }
                }
            }
        });

        RateLimitingQueue { name, sender, shared }
    }

    /// Enqueues `key`. A no-op if `key` is already present (§4.4).
    pub fn enqueue(&self, key: impl Into<String>) {
        let key = key.into();
        let mut in_flight = self.shared.in_flight.lock().unwrap();
        if !in_flight.insert(key.clone()) {
            trace!("queue {} key={key} already queued, skipping", self.name);
            return;
        }
        if self.sender.send(key.clone()).is_err() {
            error!("queue {} worker is gone, dropping key={key}", self.name);
            in_flight.remove(&key);
        }
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        self.shared.in_flight.lock().unwrap().contains(key)
    }
}
