//! A de-duplicating, rate-limited FIFO work queue.
//!
//! Items are tracked in a `dirty` set (queued, not yet handed out) and a
//! `processing` set (handed out, not yet `done`). An item added while dirty
//! collapses into the pending entry. An item added while processing is held
//! back and queued again when the consumer calls [`WorkQueue::done`].

use ahash::{AHashMap, AHashSet};
use parking_lot::Mutex;
use std::{collections::VecDeque, hash::Hash, sync::Arc};
use tokio::{
    sync::Notify,
    time::{self, Duration, Instant},
};

const BASE_DELAY: Duration = Duration::from_millis(5);
const MAX_DELAY: Duration = Duration::from_secs(1000);
const BUCKET_QPS: f64 = 8192.0;
const BUCKET_BURST: f64 = 9216.0;

#[derive(Debug)]
pub struct WorkQueue<T> {
    state: Mutex<State<T>>,
    limiter: Mutex<RateLimiter<T>>,
    notify: Notify,
}

#[derive(Debug)]
struct State<T> {
    queue: VecDeque<T>,
    dirty: AHashSet<T>,
    processing: AHashSet<T>,
    shutting_down: bool,
}

/// The maximum of a per-item exponential backoff and an overall token bucket.
#[derive(Debug)]
struct RateLimiter<T> {
    failures: AHashMap<T, u32>,
    bucket: TokenBucket,
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    qps: f64,
    burst: f64,
    last: Instant,
}

// === impl WorkQueue ===

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: AHashSet::new(),
                processing: AHashSet::new(),
                shutting_down: false,
            }),
            limiter: Mutex::new(RateLimiter::new(Instant::now())),
            notify: Notify::new(),
        })
    }

    pub fn add(&self, item: T) {
        let mut state = self.state.lock();
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.notify.notify_one();
    }

    /// Adds `item` once `delay` has elapsed.
    pub fn add_after(self: &Arc<Self>, item: T, delay: Duration) {
        if delay.is_zero() {
            return self.add(item);
        }
        if self.is_shutting_down() {
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Adds `item` after the delay the rate limiter assigns to it.
    pub fn add_rate_limited(self: &Arc<Self>, item: T) {
        let delay = self.limiter.lock().when(&item, Instant::now());
        self.add_after(item, delay);
    }

    /// Waits for the next item. Returns `None` once the queue has shut down.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
            }
            notified.await;
        }
    }

    /// Marks `item` as processed, queuing it again if it was re-added
    /// meanwhile.
    pub fn done(&self, item: &T) {
        self.limiter.lock().forget(item);

        let mut state = self.state.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shut_down(&self) {
        self.state.lock().shutting_down = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }
}

// === impl RateLimiter ===

impl<T: Clone + Eq + Hash> RateLimiter<T> {
    fn new(now: Instant) -> Self {
        Self {
            failures: AHashMap::new(),
            bucket: TokenBucket {
                tokens: BUCKET_BURST,
                qps: BUCKET_QPS,
                burst: BUCKET_BURST,
                last: now,
            },
        }
    }

    fn when(&mut self, item: &T, now: Instant) -> Duration {
        let failures = self.failures.entry(item.clone()).or_default();
        let backoff = BASE_DELAY
            .saturating_mul(1u32 << (*failures).min(31))
            .min(MAX_DELAY);
        *failures = failures.saturating_add(1);

        backoff.max(self.bucket.reserve(now))
    }

    fn forget(&mut self, item: &T) {
        self.failures.remove(item);
    }
}

// === impl TokenBucket ===

impl TokenBucket {
    /// Takes one token, returning how long the caller must wait for it.
    fn reserve(&mut self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.last = now;
        self.tokens = (self.tokens + elapsed * self.qps).min(self.burst) - 1.0;
        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.qps)
        }
    }
}
