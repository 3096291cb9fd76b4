use std::cell::Cell;
use std::sync::{Arc, Weak};

use crate::handle::TimerHandleInner;

/// One slot of the wheel's backing array.
///
/// Holds an intrusive doubly-linked list of [`TimerHandleInner`]s hashed to
/// this slot. All mutation happens on the worker thread (the only thread
/// that ever walks a bucket's links), mirroring the single-writer rule mio's
/// `Timer` uses for its own wheel slots. The list is head-inserted: `add`
/// pushes at the front, `expire_due` walks front to back.
pub(crate) struct Bucket {
    head: Cell<Option<Arc<TimerHandleInner>>>,
}

impl Bucket {
    pub(crate) fn new() -> Self {
        Self {
            head: Cell::new(None),
        }
    }

    /// Links `entry` into this bucket, taking ownership of one strong
    /// reference. `self_weak` is stashed on the entry so `remove` can later
    /// find its way back without the bucket array itself being reachable
    /// from the entry.
    pub(crate) fn add(&self, self_weak: Weak<Bucket>, entry: Arc<TimerHandleInner>) {
        let old_head = self.head.take();
        entry.prev.set(None);
        entry.next.set(old_head.clone());
        if let Some(old_head) = old_head {
            old_head.prev.set(Some(Arc::downgrade(&entry)));
        }
        entry.bucket.set(Some(self_weak));
        self.head.set(Some(entry));
    }

    /// Unlinks `entry` from this bucket. No-op if `entry` is not currently
    /// the head and has no linked neighbors recorded (i.e. it was already
    /// removed, or never linked).
    pub(crate) fn remove(&self, entry: &Arc<TimerHandleInner>) {
        let prev = entry.prev.take().and_then(|w| w.upgrade());
        let next = entry.next.take();

        match &prev {
            Some(prev) => prev.next.set(next.clone()),
            None => self.head.set(next.clone()),
        }
        if let Some(next) = &next {
            next.prev.set(prev.as_ref().map(Arc::downgrade));
        }
        entry.bucket.set(None);
    }

    /// Walks the list once. Every entry whose `remaining_rounds` has reached
    /// zero is spliced out; it is only yielded (for the worker to call
    /// `expire()` on) if its deadline has actually passed `now_offset` — a
    /// defensive re-check against an early pass, per spec.md §4.3. Everyone
    /// else's `remaining_rounds` is decremented in place.
    pub(crate) fn expire_due(&self, now_offset: u64) -> Vec<Arc<TimerHandleInner>> {
        let mut due = Vec::new();
        let mut cursor = self.head.take();
        let mut new_head: Option<Arc<TimerHandleInner>> = None;
        let mut new_tail: Option<Arc<TimerHandleInner>> = None;

        while let Some(entry) = cursor {
            let next = entry.next.take();
            cursor = next.clone();

            let rounds = entry.remaining_rounds.get();
            if rounds <= 0 {
                entry.prev.set(None);
                entry.next.set(None);
                entry.bucket.set(None);
                if entry.deadline_ns <= now_offset {
                    due.push(entry);
                }
                continue;
            }
            entry.remaining_rounds.set(rounds - 1);

            entry.prev.set(new_tail.as_ref().map(Arc::downgrade));
            entry.next.set(None);
            match &new_tail {
                Some(tail) => tail.next.set(Some(entry.clone())),
                None => new_head = Some(entry.clone()),
            }
            new_tail = Some(entry);
        }

        self.head.set(new_head);
        due
    }
}

// The `Cell`s here are only ever touched from the worker thread; see
// `TimerHandleInner`'s safety note for the same argument.
unsafe impl Send for Bucket {}
unsafe impl Sync for Bucket {}
