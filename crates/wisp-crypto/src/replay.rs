//! Sliding-window replay protection for datagram packet ids.
//!
//! A ring of 64-bit blocks tracks which counters inside the window have been
//! seen. Counters ahead of the window slide it forward; counters behind it are
//! rejected. Reordering inside the window is tolerated, duplicates are not.

const BLOCK_BITS_LOG: u64 = 6;
const BLOCK_BITS: u64 = 1 << BLOCK_BITS_LOG;
const RING_BLOCKS: u64 = 1 << 7;
const BLOCK_MASK: u64 = RING_BLOCKS - 1;
const BIT_MASK: u64 = BLOCK_BITS - 1;

/// Number of counters behind the highest seen counter that are still accepted.
pub const WINDOW_SIZE: u64 = (RING_BLOCKS - 1) * BLOCK_BITS;

/// Per-session duplicate detector over packet ids.
#[derive(Debug, Clone)]
pub struct ReplayProtection {
    last: u64,
    limit: u64,
    ring: [u64; RING_BLOCKS as usize],
}

impl ReplayProtection {
    /// Create a window accepting counters `0..u64::MAX`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(u64::MAX)
    }

    /// Create a window accepting counters strictly below `limit`.
    #[must_use]
    pub fn with_limit(limit: u64) -> Self {
        Self {
            last: 0,
            limit,
            ring: [0; RING_BLOCKS as usize],
        }
    }

    /// Report whether `counter` would be accepted, without recording it.
    #[must_use]
    pub fn check(&self, counter: u64) -> bool {
        if counter >= self.limit {
            return false;
        }
        if counter > self.last {
            return true;
        }
        if self.last - counter > WINDOW_SIZE {
            return false;
        }
        let (block, bit) = position(counter);
        self.ring[block] & bit == 0
    }

    /// Accept and record `counter`, or reject it as a replay.
    ///
    /// Returns `false` if the counter is at or beyond the limit, behind the
    /// window, or already recorded. A rejected counter leaves the window
    /// unchanged.
    pub fn check_and_update(&mut self, counter: u64) -> bool {
        if counter >= self.limit {
            return false;
        }

        if counter > self.last {
            let current = self.last >> BLOCK_BITS_LOG;
            let diff = ((counter >> BLOCK_BITS_LOG) - current).min(RING_BLOCKS);
            for i in current + 1..=current + diff {
                self.ring[(i & BLOCK_MASK) as usize] = 0;
            }
            self.last = counter;
        } else if self.last - counter > WINDOW_SIZE {
            return false;
        }

        let (block, bit) = position(counter);
        let old = self.ring[block];
        self.ring[block] = old | bit;
        old & bit == 0
    }

    /// Highest counter recorded so far.
    #[must_use]
    pub fn last(&self) -> u64 {
        self.last
    }

    /// Forget everything.
    pub fn reset(&mut self) {
        self.last = 0;
        self.ring = [0; RING_BLOCKS as usize];
    }
}

impl Default for ReplayProtection {
    fn default() -> Self {
        Self::new()
    }
}

fn position(counter: u64) -> (usize, u64) {
    let block = ((counter >> BLOCK_BITS_LOG) & BLOCK_MASK) as usize;
    (block, 1 << (counter & BIT_MASK))
}
