//! Token-bucket rate limiter shared across the Worker Pool.
//!
//! Two independent buckets, bytes/sec and requests/sec; `acquire` blocks
//! until both admit the request. Bucket capacity is one second of the
//! configured rate, refilled continuously based on elapsed wall-clock time
//! rather than a ticking background task — the same "compute elapsed,
//! top up, clamp to capacity" shape `BufferPool`'s admission control uses,
//! just over a byte/request budget instead of a buffer count.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::time::sleep;

struct Bucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(refill_per_sec: f64) -> Self {
        Self {
            capacity: refill_per_sec,
            tokens: refill_per_sec,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Attempt to withdraw `amount` tokens; returns `true` on success.
    fn try_take(&mut self, amount: f64) -> bool {
        self.refill();
        if self.tokens >= amount {
            self.tokens -= amount;
            true
        } else {
            false
        }
    }

    fn time_until(&self, amount: f64) -> Duration {
        if self.refill_per_sec <= 0.0 {
            return Duration::from_millis(50);
        }
        let deficit = (amount - self.tokens).max(0.0);
        Duration::from_secs_f64(deficit / self.refill_per_sec)
    }
}

/// `None` for either cap represents the unlimited sentinel, which
/// short-circuits `acquire` entirely for that dimension.
pub struct Pacer {
    bytes: Option<Mutex<Bucket>>,
    requests: Option<Mutex<Bucket>>,
}

impl Pacer {
    pub fn new(bytes_per_sec: Option<u64>, requests_per_sec: Option<u64>) -> Self {
        Self {
            bytes: bytes_per_sec.map(|r| Mutex::new(Bucket::new(r as f64))),
            requests: requests_per_sec.map(|r| Mutex::new(Bucket::new(r as f64))),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None, None)
    }

    /// Blocks until both the byte and request buckets admit the request.
    pub async fn acquire(&self, n_bytes: u64) {
        loop {
            let mut wait = Duration::ZERO;

            if let Some(bytes) = &self.bytes {
                let mut b = bytes.lock().unwrap();
                if !b.try_take(n_bytes as f64) {
                    wait = wait.max(b.time_until(n_bytes as f64));
                }
            }
            if let Some(requests) = &self.requests {
                let mut r = requests.lock().unwrap();
                if !r.try_take(1.0) {
                    wait = wait.max(r.time_until(1.0));
                }
            }

            if wait.is_zero() {
                return;
            }
            sleep(wait.min(Duration::from_millis(250))).await;
        }
    }
}
