//! Shared request gate
//!
//! One [`RequestGate`] is created per pipeline and handed by `Arc` to every
//! stage that talks to the API. Each request attempt waits on the gate first,
//! so the aggregate request rate stays at or below the configured ceiling no
//! matter how many workers are running.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{Error, Result};

/// Token-bucket gate with a fixed replenish interval of `1 / rate`
pub struct RequestGate {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    requests_per_second: f64,
    granted: AtomicU64,
}

impl RequestGate {
    /// Create a gate admitting `requests_per_second` on average
    ///
    /// `burst` is how many requests may pass back-to-back once the bucket is
    /// full; 1 gives a strict minimum interval between requests.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a non-positive or non-finite rate, or a
    /// rate so high that its interval rounds to zero.
    pub fn new(requests_per_second: f64, burst: u32) -> Result<Self> {
        if !requests_per_second.is_finite() || requests_per_second <= 0.0 {
            return Err(Error::config(format!(
                "rate limit must be positive, got {requests_per_second}"
            )));
        }

        let period = Duration::from_secs_f64(1.0 / requests_per_second);
        let burst = NonZeroU32::new(burst)
            .ok_or_else(|| Error::config("rate limit burst must be greater than 0"))?;
        let quota = Quota::with_period(period)
            .ok_or_else(|| Error::config("rate limit interval rounds to zero"))?
            .allow_burst(burst);

        Ok(Self {
            limiter: RateLimiter::direct(quota),
            requests_per_second,
            granted: AtomicU64::new(0),
        })
    }

    /// Wait until one request may be issued
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
        self.granted.fetch_add(1, Ordering::Relaxed);
    }

    /// Requests admitted so far
    pub fn granted(&self) -> u64 {
        self.granted.load(Ordering::Relaxed)
    }

    /// Configured average rate
    pub fn requests_per_second(&self) -> f64 {
        self.requests_per_second
    }
}

impl std::fmt::Debug for RequestGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGate")
            .field("requests_per_second", &self.requests_per_second)
            .field("granted", &self.granted())
            .finish()
    }
}
