use std::sync::Arc;

use crate::bucket::Bucket;

/// The fixed-size array of buckets a single hashed timing wheel hashes
/// timers into.
///
/// Width is rounded up to the next power of two so that slot indexing can
/// use a mask (`& (width - 1)`) instead of a modulo, following the same
/// trick Netty's `HashedWheelTimer` and mio's `Timer` both use.
pub(crate) struct Wheel {
    buckets: Box<[Arc<Bucket>]>,
    mask: u64,
}

impl Wheel {
    pub(crate) fn new(requested_width: usize) -> Self {
        let width = next_pow2(requested_width.max(1));
        let buckets = (0..width).map(|_| Arc::new(Bucket::new())).collect();
        Self {
            buckets,
            mask: (width - 1) as u64,
        }
    }

    pub(crate) fn width(&self) -> usize {
        self.buckets.len()
    }

    /// Index of the slot `tick` hashes to.
    pub(crate) fn slot_for(&self, tick: u64) -> usize {
        (tick & self.mask) as usize
    }

    pub(crate) fn bucket(&self, slot: usize) -> &Arc<Bucket> {
        &self.buckets[slot]
    }
}

fn next_pow2(n: usize) -> usize {
    n.next_power_of_two()
}
