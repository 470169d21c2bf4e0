//! Time-windowed duplicate detection for stream handshake salts.
//!
//! Salts are remembered as 64-bit BLAKE3 fingerprints in two generations.
//! When the current generation is older than the window it becomes the
//! previous one and the old previous generation is dropped, so every salt is
//! remembered for at least one full window and at most two.

use crate::kdf::salt_fingerprint;
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Default salt memory window.
pub const SALT_WINDOW: Duration = Duration::from_secs(60);

/// Two-generation salt filter.
#[derive(Debug)]
pub struct SaltFilter {
    window: Duration,
    current: HashSet<u64>,
    previous: HashSet<u64>,
    rotated_at: Instant,
}

impl SaltFilter {
    /// Create a filter with the given memory window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self::new_at(window, Instant::now())
    }

    /// Create a filter whose first generation starts at `now`.
    #[must_use]
    pub fn new_at(window: Duration, now: Instant) -> Self {
        Self {
            window,
            current: HashSet::new(),
            previous: HashSet::new(),
            rotated_at: now,
        }
    }

    /// Record `salt`, returning `false` if it was already seen in the window.
    pub fn check(&mut self, salt: &[u8]) -> bool {
        self.check_at(salt, Instant::now())
    }

    /// Same as [`check`](Self::check) with an explicit clock reading.
    pub fn check_at(&mut self, salt: &[u8], now: Instant) -> bool {
        self.rotate(now);

        let fingerprint = salt_fingerprint(salt);
        if self.previous.contains(&fingerprint) {
            return false;
        }
        self.current.insert(fingerprint)
    }

    /// Number of fingerprints currently remembered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.current.len() + self.previous.len()
    }

    /// Whether nothing is remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn rotate(&mut self, now: Instant) {
        let age = now.saturating_duration_since(self.rotated_at);
        if age < self.window {
            return;
        }
        if age >= self.window * 2 {
            self.previous.clear();
            self.current.clear();
        } else {
            self.previous = std::mem::take(&mut self.current);
        }
        self.rotated_at = now;
    }
}

impl Default for SaltFilter {
    fn default() -> Self {
        Self::new(SALT_WINDOW)
    }
}
