// ===============================
// src/ratelimit.rs (token bucket)
// ===============================
//
// Satu bucket dipakai bersama oleh semua worker fetch.
// - Refill kontinu (fraksional) dari waktu yang berlalu, di-clamp ke capacity.
// - acquire(): tunggu sampai ada token; kalau future di-drop saat menunggu,
//   tidak ada token yang terpakai (token hanya diambil di dalam lock).
// - try_acquire(): non-blocking.
//
use parking_lot::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::trace;

use crate::metrics::LIMITER_WAITS;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last: Instant,
}

#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// `refill_per_sec` must be positive; config validation guarantees it.
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            refill_per_sec: refill_per_sec.max(f64::MIN_POSITIVE),
            state: Mutex::new(BucketState { tokens: capacity, last: Instant::now() }),
        }
    }

    pub fn per_minute(rate_per_min: u32, burst: u32) -> Self {
        Self::new(burst, f64::from(rate_per_min) / 60.0)
    }

    fn refill(&self, st: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(st.last).as_secs_f64();
        st.tokens = (st.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        st.last = now;
    }

    pub fn try_acquire(&self) -> bool {
        let mut st = self.state.lock();
        self.refill(&mut st, Instant::now());
        if st.tokens >= 1.0 {
            st.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub async fn acquire(&self) {
        while !self.try_acquire() {
            let wait = {
                let mut st = self.state.lock();
                self.refill(&mut st, Instant::now());
                Duration::from_secs_f64((1.0 - st.tokens).max(0.0) / self.refill_per_sec)
            };
            LIMITER_WAITS.inc();
            trace!(wait_ms = wait.as_millis() as u64, "rate limiter: waiting for token");
            sleep(wait).await;
        }
    }

    pub fn available(&self) -> f64 {
        let mut st = self.state.lock();
        self.refill(&mut st, Instant::now());
        st.tokens
    }
}
