//! Correlation ids: wall-clock millis followed by a per-process counter.

use std::borrow::Borrow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Upper bound (exclusive) for the random counter seed.
const SEED_RANGE: u64 = 100_000;

/// Opaque id tying a relayed body to the wire request that carries it.
/// Always ASCII digits, so it survives query and fragment encoding untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accepts a non-empty string of ASCII digits.
    pub fn parse(s: &str) -> Option<Self> {
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            Some(CorrelationId(s.to_string()))
        } else {
            None
        }
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for CorrelationId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Mints correlation ids. One per relay context.
#[derive(Debug)]
pub struct IdGenerator {
    counter: AtomicU64,
}

impl IdGenerator {
    /// Counter seeded randomly so two page loads in the same millisecond diverge.
    pub fn new() -> Self {
        Self::with_seed(rand::thread_rng().gen_range(0..SEED_RANGE))
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            counter: AtomicU64::new(seed),
        }
    }

    /// Next id using the current wall-clock time.
    pub fn next(&self) -> CorrelationId {
        self.next_at(now_millis())
    }

    /// Next id for a given timestamp. The counter advances on every call, so
    /// ids minted within the same millisecond never collide.
    pub fn next_at(&self, millis: u64) -> CorrelationId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        CorrelationId(format!("{}{}", millis, n))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
