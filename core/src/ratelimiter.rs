//! Token bucket shared by everything that paces outbound traffic.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Semaphore;

#[derive(Clone)]
pub struct RateLimiter {
    sem: Arc<Semaphore>,
    per_sec: u32,
}

impl RateLimiter {
    /// `None` when pacing is disabled (`tokens_per_sec == 0`).
    /// Must be called from within a tokio runtime.
    pub fn per_second(tokens_per_sec: u32) -> Option<Self> {
        (tokens_per_sec > 0).then(|| RateLimiter::new(tokens_per_sec))
    }

    pub fn new(tokens_per_sec: u32) -> Self {
        let per_sec = tokens_per_sec.max(1);
        let sem = Arc::new(Semaphore::new(0));
        let weak: Weak<Semaphore> = Arc::downgrade(&sem);
        let interval_ms = (1000 / per_sec).max(1) as u64;
        tokio::spawn(async move {
            let mut t = tokio::time::interval(Duration::from_millis(interval_ms));
            t.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                t.tick().await;
                // Refill stops once every limiter handle is gone.
                let Some(sem) = weak.upgrade() else { break };
                if sem.available_permits() < per_sec as usize {
                    sem.add_permits(1);
                }
            }
        });
        RateLimiter { sem, per_sec }
    }

    pub fn rate(&self) -> u32 {
        self.per_sec
    }

    /// Wait for one token. Tokens are consumed, never returned.
    pub async fn acquire(&self) {
        if let Ok(permit) = self.sem.acquire().await {
            permit.forget();
        }
    }
}
