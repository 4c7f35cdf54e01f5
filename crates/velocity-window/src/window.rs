//! Index-Evicted Window Queue

/// Compact the evicted prefix once it holds at least this many entries
const COMPACTION_MIN: usize = 64;

/// Append-only queue of `(step, amount)` entries for one account role.
///
/// Eviction only advances `head`; the dead prefix is reclaimed in bulk once it
/// outweighs the live entries, so each entry is moved at most once.
#[derive(Debug, Clone, Default)]
pub struct WindowQueue {
    /// Entry storage, live entries start at `head`
    entries: Vec<(u32, f64)>,
    /// Index of the oldest live entry
    head: usize,
    /// Running sum of live amounts
    sum: f64,
}

impl WindowQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry whose step is strictly older than `cutoff`
    pub fn evict_before(&mut self, cutoff: u32) {
        while let Some(&(step, amount)) = self.entries.get(self.head) {
            if step >= cutoff {
                break;
            }
            self.sum -= amount;
            self.head += 1;
        }

        if self.head == self.entries.len() {
            // Reset exactly so float residue never leaks into an empty window
            self.entries.clear();
            self.head = 0;
            self.sum = 0.0;
        } else if self.head >= COMPACTION_MIN && self.head * 2 >= self.entries.len() {
            self.entries.drain(..self.head);
            self.head = 0;
        }
    }

    /// Append an entry at the tail
    pub fn push(&mut self, step: u32, amount: f64) {
        self.entries.push((step, amount));
        self.sum += amount;
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len() - self.head
    }

    /// Check if no entries are live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of live amounts
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Step of the oldest live entry
    pub fn oldest_step(&self) -> Option<u32> {
        self.entries.get(self.head).map(|&(step, _)| step)
    }

    /// Allocated slots, including the not-yet-compacted prefix
    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }
}
