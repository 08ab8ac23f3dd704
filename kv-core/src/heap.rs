//! # TTL Heap
//!
//! A binary min-heap ordered by expiration deadline, used by the
//! keyspace to find the next key due to expire without scanning every
//! entry. Items are addressed by an opaque [`HeapHandle`] backed by an
//! inverse `position` map, so the heap owns its own bookkeeping instead
//! of reaching into caller state on every swap.

use std::collections::HashMap;

/// Identifies one heap item across swaps; stable for the item's
/// lifetime in the heap regardless of how many times it moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapHandle(u64);

struct Item<K> {
    deadline_ms: u64,
    key: K,
    handle: HeapHandle,
}

/// A min-heap of `(deadline_ms, K)` pairs addressable by [`HeapHandle`].
pub struct TtlHeap<K> {
    items: Vec<Item<K>>,
    position: HashMap<HeapHandle, usize>,
    next_handle: u64,
}

impl<K> Default for TtlHeap<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> TtlHeap<K> {
    pub fn new() -> Self {
        TtlHeap {
            items: Vec::new(),
            position: HashMap::new(),
            next_handle: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.items.swap(a, b);
        self.position.insert(self.items[a].handle, a);
        self.position.insert(self.items[b].handle, b);
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.items[parent].deadline_ms <= self.items[idx].deadline_ms {
                break;
            }
            self.swap(parent, idx);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        loop {
            let left = idx * 2 + 1;
            let right = idx * 2 + 2;
            let mut smallest = idx;
            if left < self.items.len() && self.items[left].deadline_ms < self.items[smallest].deadline_ms {
                smallest = left;
            }
            if right < self.items.len() && self.items[right].deadline_ms < self.items[smallest].deadline_ms {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.swap(idx, smallest);
            idx = smallest;
        }
    }

    /// Schedules `key` to expire at `deadline_ms`, returning a handle
    /// that can later be used with [`TtlHeap::update`] or
    /// [`TtlHeap::remove`].
    pub fn push(&mut self, key: K, deadline_ms: u64) -> HeapHandle {
        let handle = HeapHandle(self.next_handle);
        self.next_handle += 1;
        let idx = self.items.len();
        self.items.push(Item {
            deadline_ms,
            key,
            handle,
        });
        self.position.insert(handle, idx);
        self.sift_up(idx);
        handle
    }

    /// Changes the deadline for an existing handle.
    pub fn update(&mut self, handle: HeapHandle, deadline_ms: u64) {
        let Some(&idx) = self.position.get(&handle) else {
            return;
        };
        let old = self.items[idx].deadline_ms;
        self.items[idx].deadline_ms = deadline_ms;
        match deadline_ms.cmp(&old) {
            std::cmp::Ordering::Less => self.sift_up(idx),
            std::cmp::Ordering::Greater => self.sift_down(idx),
            std::cmp::Ordering::Equal => {}
        }
    }

    /// Removes the item addressed by `handle`, if still present.
    pub fn remove(&mut self, handle: HeapHandle) -> Option<K> {
        let idx = self.position.remove(&handle)?;
        let last = self.items.len() - 1;
        if idx != last {
            self.swap(idx, last);
        }
        let removed = self.items.pop().expect("non-empty by idx precondition");
        self.position.remove(&removed.handle);
        if idx < self.items.len() {
            self.sift_down(idx);
            self.sift_up(idx);
        }
        Some(removed.key)
    }

    /// Peeks the soonest deadline without removing it.
    pub fn peek(&self) -> Option<(&K, u64)> {
        self.items.first().map(|item| (&item.key, item.deadline_ms))
    }

    /// Looks up the current deadline for a still-tracked handle.
    pub fn deadline_of(&self, handle: HeapHandle) -> Option<u64> {
        let idx = *self.position.get(&handle)?;
        Some(self.items[idx].deadline_ms)
    }

    /// Pops every item whose deadline is `<= now_ms`, in increasing
    /// deadline order, up to `max_items`.
    pub fn pop_expired(&mut self, now_ms: u64, max_items: usize) -> Vec<K> {
        let mut out = Vec::new();
        while out.len() < max_items {
            match self.peek() {
                Some((_, deadline)) if deadline <= now_ms => {
                    let handle = self.items[0].handle;
                    out.push(self.remove(handle).expect("handle from live peek"));
                }
                _ => break,
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_deadline_order() {
        let mut heap = TtlHeap::new();
        heap.push("c", 30);
        heap.push("a", 10);
        heap.push("b", 20);

        let expired = heap.pop_expired(25, 10);
        assert_eq!(expired, vec!["a", "b"]);
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn update_reorders_correctly() {
        let mut heap = TtlHeap::new();
        let a = heap.push("a", 100);
        heap.push("b", 10);
        heap.update(a, 1);

        let (key, deadline) = heap.peek().unwrap();
        assert_eq!(*key, "a");
        assert_eq!(deadline, 1);
    }

    #[test]
    fn remove_by_handle_detaches_cleanly() {
        let mut heap = TtlHeap::new();
        let a = heap.push("a", 1);
        let b = heap.push("b", 2);
        let c = heap.push("c", 3);

        assert_eq!(heap.remove(b), Some("b"));
        assert_eq!(heap.len(), 2);
        assert_eq!(heap.pop_expired(u64::MAX, 10), vec!["a", "c"]);
        let _ = (a, c);
    }

    #[test]
    fn respects_max_items_cap() {
        let mut heap = TtlHeap::new();
        for i in 0..10u64 {
            heap.push(i, i);
        }
        let popped = heap.pop_expired(100, 3);
        assert_eq!(popped.len(), 3);
        assert_eq!(heap.len(), 7);
    }
}
