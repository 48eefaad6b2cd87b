//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-session command line limiter
pub struct SessionRateLimiter {
    limiter: Limiter,
}

impl SessionRateLimiter {
    /// `None` when `lines_per_second` is zero, meaning unlimited
    pub fn new(lines_per_second: u32) -> Option<Self> {
        let rate = NonZeroU32::new(lines_per_second)?;
        Some(Self {
            limiter: RateLimiter::direct(Quota::per_second(rate)),
        })
    }

    /// Check if another line is allowed (returns true if allowed)
    pub fn check_line(&self) -> bool {
        self.limiter.check().is_ok()
    }
}
