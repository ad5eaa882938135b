//! Token-bucket admission control.
//!
//! The bucket refills in discrete steps: every `period`, `tokens_per_period`
//! tokens are added (capped at `capacity`) and handed to queued callers. A
//! caller that finds no token waits in a bounded queue; when the queue is full
//! it is rejected with [`AcquireError::Throttled`].
//!
//! Waiting is cancellation-safe: dropping an `acquire` future removes its
//! queue entry, and a token granted concurrently with the drop is returned.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Order in which queued callers are granted tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QueueOrder {
    /// FIFO.
    #[default]
    OldestFirst,
    /// LIFO; a full queue evicts its oldest waiter to admit a newcomer.
    NewestFirst,
}

/// Token bucket parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBucketConfig {
    pub capacity: u32,
    pub tokens_per_period: u32,
    pub period: Duration,
    pub queue_limit: usize,
    pub queue_order: QueueOrder,
    pub auto_replenish: bool,
}

impl TokenBucketConfig {
    pub fn validate(&self) -> Result<(), BucketConfigError> {
        if self.capacity == 0 {
            return Err(BucketConfigError::ZeroCapacity);
        }
        if self.tokens_per_period == 0 {
            return Err(BucketConfigError::ZeroTokensPerPeriod);
        }
        if self.period.is_zero() {
            return Err(BucketConfigError::ZeroPeriod);
        }
        Ok(())
    }
}

impl Default for TokenBucketConfig {
    /// Twelve Data free tier: 8 requests per minute.
    fn default() -> Self {
        Self {
            capacity: 8,
            tokens_per_period: 8,
            period: Duration::from_secs(60),
            queue_limit: 100,
            queue_order: QueueOrder::OldestFirst,
            auto_replenish: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BucketConfigError {
    #[error("token bucket capacity must be greater than zero")]
    ZeroCapacity,
    #[error("tokens per period must be greater than zero")]
    ZeroTokensPerPeriod,
    #[error("replenishment period must be greater than zero")]
    ZeroPeriod,
    #[error("automatic replenishment requires a running tokio runtime")]
    NoRuntime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AcquireError {
    /// No token available and no room in the wait queue.
    #[error("request rejected by the token bucket: no tokens available and the wait queue is full")]
    Throttled,
}

/// Proof of admission. Tokens are consumed, not returned, when a lease ends.
#[derive(Debug)]
pub struct Lease {
    queued: bool,
}

impl Lease {
    /// Whether the caller had to wait in the queue.
    pub const fn was_queued(&self) -> bool {
        self.queued
    }
}

/// Point-in-time bucket counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BucketStatistics {
    pub available_tokens: u32,
    pub queued: usize,
    pub total_successful_leases: u64,
    pub total_failed_leases: u64,
}

struct Waiter {
    id: u64,
    grant: oneshot::Sender<Result<(), AcquireError>>,
}

struct BucketState {
    available: u32,
    waiters: VecDeque<Waiter>,
    next_waiter_id: u64,
    successful: u64,
    failed: u64,
}

struct BucketShared {
    config: TokenBucketConfig,
    state: Mutex<BucketState>,
}

impl BucketShared {
    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().expect("token bucket mutex poisoned")
    }

    fn replenish(&self) {
        let mut state = self.lock();
        state.available = state
            .available
            .saturating_add(self.config.tokens_per_period)
            .min(self.config.capacity);
        self.dispatch(&mut state);
    }

    /// Hand available tokens to queued callers in queue order.
    fn dispatch(&self, state: &mut BucketState) {
        while state.available > 0 {
            let next = match self.config.queue_order {
                QueueOrder::OldestFirst => state.waiters.pop_front(),
                QueueOrder::NewestFirst => state.waiters.pop_back(),
            };
            let Some(waiter) = next else {
                break;
            };

            if waiter.grant.send(Ok(())).is_ok() {
                state.available -= 1;
                state.successful += 1;
            }
        }
    }
}

/// Token bucket shared by every provider call of the process.
pub struct TokenBucket {
    shared: Arc<BucketShared>,
    replenisher: Option<JoinHandle<()>>,
}

impl TokenBucket {
    /// Build a full bucket. With `auto_replenish`, the refill task is spawned
    /// on the current tokio runtime.
    pub fn new(config: TokenBucketConfig) -> Result<Self, BucketConfigError> {
        config.validate()?;

        let shared = Arc::new(BucketShared {
            state: Mutex::new(BucketState {
                available: config.capacity,
                waiters: VecDeque::new(),
                next_waiter_id: 0,
                successful: 0,
                failed: 0,
            }),
            config,
        });

        let replenisher = if shared.config.auto_replenish {
            let runtime =
                tokio::runtime::Handle::try_current().map_err(|_| BucketConfigError::NoRuntime)?;
            Some(runtime.spawn(replenish_loop(
                Arc::downgrade(&shared),
                shared.config.period,
            )))
        } else {
            None
        };

        Ok(Self {
            shared,
            replenisher,
        })
    }

    pub fn config(&self) -> &TokenBucketConfig {
        &self.shared.config
    }

    /// Take one token, waiting in the queue if none is available.
    pub async fn acquire(&self) -> Result<Lease, AcquireError> {
        let (id, receiver) = {
            let mut state = self.shared.lock();
            if state.waiters.is_empty() && state.available > 0 {
                state.available -= 1;
                state.successful += 1;
                return Ok(Lease { queued: false });
            }

            if state.waiters.len() >= self.shared.config.queue_limit {
                let evict_oldest = self.shared.config.queue_order == QueueOrder::NewestFirst
                    && self.shared.config.queue_limit > 0;
                if !evict_oldest {
                    state.failed += 1;
                    return Err(AcquireError::Throttled);
                }

                if let Some(evicted) = state.waiters.pop_front() {
                    state.failed += 1;
                    let _ = evicted.grant.send(Err(AcquireError::Throttled));
                }
            }

            let id = state.next_waiter_id;
            state.next_waiter_id += 1;
            let (grant, receiver) = oneshot::channel();
            state.waiters.push_back(Waiter { id, grant });
            (id, receiver)
        };

        let mut wait = QueuedWait {
            shared: &*self.shared,
            id,
            receiver,
            settled: false,
        };

        let outcome = (&mut wait.receiver).await;
        wait.settled = true;
        match outcome {
            Ok(Ok(())) => Ok(Lease { queued: true }),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(AcquireError::Throttled),
        }
    }

    /// Add one period's worth of tokens and wake queued callers.
    pub fn replenish(&self) {
        self.shared.replenish();
    }

    pub fn statistics(&self) -> BucketStatistics {
        let state = self.shared.lock();
        BucketStatistics {
            available_tokens: state.available,
            queued: state.waiters.len(),
            total_successful_leases: state.successful,
            total_failed_leases: state.failed,
        }
    }
}

impl Drop for TokenBucket {
    fn drop(&mut self) {
        if let Some(replenisher) = self.replenisher.take() {
            replenisher.abort();
        }
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("config", &self.shared.config)
            .field("statistics", &self.statistics())
            .finish()
    }
}

async fn replenish_loop(shared: Weak<BucketShared>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.replenish();
    }
}

/// Queue entry of a pending `acquire`; cleans up if the future is dropped.
struct QueuedWait<'a> {
    shared: &'a BucketShared,
    id: u64,
    receiver: oneshot::Receiver<Result<(), AcquireError>>,
    settled: bool,
}

impl Drop for QueuedWait<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let mut state = self.shared.lock();
        if let Some(position) = state.waiters.iter().position(|w| w.id == self.id) {
            state.waiters.remove(position);
            return;
        }

        // Grants are sent under the lock, so a missing entry means the send already happened.
        if let Ok(Ok(())) = self.receiver.try_recv() {
            state.successful -= 1;
            state.available = (state.available + 1).min(self.shared.config.capacity);
            self.shared.dispatch(&mut state);
        }
    }
}
