//! Opaque 128-bit job identifier.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Immutable 128-bit identifier, unique per job, never re-used.
///
/// Constructed from a millisecond timestamp (high 64 bits) and a
/// process-local monotonic counter plus a random salt (low 64 bits), which
/// keeps `new()` collision-free without pulling in a UUID dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u128);

static COUNTER: AtomicU64 = AtomicU64::new(0);

impl JobId {
    pub fn new() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let salt = std::process::id() as u64;
        let low = seq.wrapping_mul(0x9E3779B97F4A7C15).wrapping_add(salt);
        Self(((millis as u128) << 64) | (low as u128))
    }

    pub fn high(&self) -> u64 {
        (self.0 >> 64) as u64
    }

    pub fn low(&self) -> u64 {
        self.0 as u64
    }

    pub fn from_parts(high: u64, low: u64) -> Self {
        Self(((high as u128) << 64) | (low as u128))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.high(), self.low())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseJobIdError;

impl fmt::Display for ParseJobIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid job id: expected 32 hex digits")
    }
}

impl std::error::Error for ParseJobIdError {}

impl FromStr for JobId {
    type Err = ParseJobIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ParseJobIdError);
        }
        let high = u64::from_str_radix(&s[0..16], 16).map_err(|_| ParseJobIdError)?;
        let low = u64::from_str_radix(&s[16..32], 16).map_err(|_| ParseJobIdError)?;
        Ok(Self::from_parts(high, low))
    }
}
