//! Token-bucket rate limiter with strict FIFO admission
//!
//! One limiter exists per connected account, because the provider issues its
//! quota per credential. Tokens refill continuously up to `capacity`.
//! Waiters are admitted strictly in submission order: a large request that
//! arrived first is served before smaller requests queued behind it, even if
//! those could be served sooner. The limiter never fails, it only delays.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::debug;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Slack for float rounding when comparing token counts
const EPSILON: f64 = 1e-6;

/// Lowest accepted refill rate, so a misconfigured bucket still drains its queue
const MIN_REFILL_PER_SECOND: f64 = 0.001;

/// Token-bucket limiter for calls to the external mail API
pub struct RateLimiter {
    capacity: f64,
    refill_per_second: f64,
    state: Mutex<BucketState>,
    notify: Notify,
}

struct BucketState {
    available: f64,
    last_refill: Instant,
    next_ticket: u64,
    /// Tickets of queued callers, oldest first
    waiters: VecDeque<u64>,
}

impl BucketState {
    fn refill(&mut self, capacity: f64, refill_per_second: f64) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.available = (self.available + elapsed * refill_per_second).min(capacity);
        self.last_refill = now;
    }
}

impl RateLimiter {
    /// Create a full bucket
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            refill_per_second: refill_per_second.max(MIN_REFILL_PER_SECOND),
            state: Mutex::new(BucketState {
                available: capacity,
                last_refill: Instant::now(),
                next_ticket: 0,
                waiters: VecDeque::new(),
            }),
            notify: Notify::new(),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    pub fn refill_per_second(&self) -> f64 {
        self.refill_per_second
    }

    /// Tokens available right now (after refill)
    pub fn available(&self) -> f64 {
        let mut state = self.lock_state();
        state.refill(self.capacity, self.refill_per_second);
        state.available
    }

    /// Number of callers currently queued
    pub fn queued(&self) -> usize {
        self.lock_state().waiters.len()
    }

    /// Wait until `cost` tokens are available, then debit them.
    ///
    /// A cost above capacity is clamped to capacity. Dropping the returned
    /// future before it completes gives up the caller's place in the queue.
    pub async fn acquire(&self, cost: u32) {
        let cost = self.clamp_cost(cost);

        let ticket = {
            let mut state = self.lock_state();
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            state.waiters.push_back(ticket);
            ticket
        };
        let mut guard = QueueGuard {
            limiter: self,
            ticket,
            queued: true,
        };

        loop {
            // Register before checking so a release between check and await is not lost
            let notified = self.notify.notified();

            let wait = {
                let mut state = self.lock_state();
                state.refill(self.capacity, self.refill_per_second);

                match state.waiters.front() {
                    Some(&front) if front == ticket => {
                        if state.available + EPSILON >= cost {
                            state.available = (state.available - cost).max(0.0);
                            state.waiters.pop_front();
                            guard.queued = false;
                            drop(state);
                            self.notify.notify_waiters();
                            return;
                        }
                        let deficit = cost - state.available;
                        Some(Duration::from_secs_f64(deficit / self.refill_per_second))
                    }
                    _ => None,
                }
            };

            match wait {
                Some(delay) => tokio::time::sleep(delay).await,
                None => notified.await,
            }
        }
    }

    fn clamp_cost(&self, cost: u32) -> f64 {
        let cost = f64::from(cost);
        if cost > self.capacity {
            debug!(
                "Rate limiter request of {} exceeds capacity {}, clamping",
                cost, self.capacity
            );
            self.capacity
        } else {
            cost
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes an abandoned ticket from the queue
struct QueueGuard<'a> {
    limiter: &'a RateLimiter,
    ticket: u64,
    queued: bool,
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        if !self.queued {
            return;
        }
        let mut state = self.limiter.lock_state();
        state.waiters.retain(|&t| t != self.ticket);
        drop(state);
        self.limiter.notify.notify_waiters();
    }
}
