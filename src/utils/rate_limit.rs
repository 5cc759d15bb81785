// src/utils/rate_limit.rs

//! Outbound request throttling.
//!
//! Every upstream and downstream client shares one limiter per endpoint so
//! the configured requests-per-minute ceiling holds over any rolling
//! 60-second window, including if batch sending is ever parallelized.

use std::num::NonZeroU32;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter as GovernorLimiter};

/// Requests-per-minute limiter; safe for concurrent use behind an `Arc`.
pub struct RateLimiter {
    inner: GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>,
    per_minute: u32,
}

impl RateLimiter {
    /// Create a limiter allowing `per_minute` requests per rolling minute.
    ///
    /// A zero ceiling is clamped to one request per minute; config
    /// validation rejects zero before this is ever hit.
    pub fn per_minute(per_minute: u32) -> Self {
        let ceiling = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            inner: GovernorLimiter::direct(Quota::per_minute(ceiling)),
            per_minute: ceiling.get(),
        }
    }

    /// Wait until the next request is allowed. Never errors; only delays.
    pub async fn acquire(&self) {
        self.inner.until_ready().await;
    }

    /// The configured ceiling.
    pub fn ceiling(&self) -> u32 {
        self.per_minute
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("per_minute", &self.per_minute)
            .finish()
    }
}
