//! # Idle/Recency List
//!
//! A sentinel-headed intrusive doubly-linked list tracking connections in
//! least-recently-active order, so the event loop can find and close
//! connections idle past the timeout without scanning every connection
//! each tick. Generic over any id type the caller uses to name list
//! members (here, a connection id).
//!
//! Nodes are addressed by the caller's own id (`K`), not by a slab index
//! local to this module: the event loop already has a natural per-
//! connection id and this list just threads `prev`/`next` links through
//! whatever map the caller keeps those ids in, via the [`IdleNode`]
//! trait.

use std::collections::HashMap;
use std::hash::Hash;

/// A doubly-linked recency list over ids of type `K`. Each id carries its
/// own `prev`/`next` links and a last-active timestamp, stored in an
/// internal map rather than intruding into the caller's connection
/// struct, since connections here are keyed by `K` in the event loop's
/// own table.
pub struct IdleList<K> {
    links: HashMap<K, Links<K>>,
    head: Option<K>, // least recently active
    tail: Option<K>, // most recently active
}

struct Links<K> {
    prev: Option<K>,
    next: Option<K>,
    last_active_ms: u64,
}

impl<K: Eq + Hash + Copy> Default for IdleList<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Copy> IdleList<K> {
    pub fn new() -> Self {
        IdleList {
            links: HashMap::new(),
            head: None,
            tail: None,
        }
    }

    /// Inserts `id` as the most recently active entry.
    pub fn insert(&mut self, id: K, now_ms: u64) {
        self.links.insert(
            id,
            Links {
                prev: self.tail,
                next: None,
                last_active_ms: now_ms,
            },
        );
        if let Some(tail) = self.tail {
            self.links.get_mut(&tail).expect("tail tracked").next = Some(id);
        } else {
            self.head = Some(id);
        }
        self.tail = Some(id);
    }

    fn detach(&mut self, id: K) {
        let Some(links) = self.links.remove(&id) else {
            return;
        };
        match links.prev {
            Some(prev) => self.links.get_mut(&prev).expect("prev tracked").next = links.next,
            None => self.head = links.next,
        }
        match links.next {
            Some(next) => self.links.get_mut(&next).expect("next tracked").prev = links.prev,
            None => self.tail = links.prev,
        }
    }

    /// Moves `id` to the most-recently-active end, updating its
    /// timestamp. A no-op if `id` is not tracked.
    pub fn touch(&mut self, id: K, now_ms: u64) {
        if !self.links.contains_key(&id) {
            return;
        }
        self.detach(id);
        self.insert(id, now_ms);
    }

    /// Removes `id` from the list entirely (e.g. connection closed).
    pub fn remove(&mut self, id: K) {
        self.detach(id);
    }

    /// Returns the least-recently-active id and its timestamp, if any.
    pub fn oldest(&self) -> Option<(K, u64)> {
        let head = self.head?;
        Some((head, self.links[&head].last_active_ms))
    }

    /// Pops every id whose last-active timestamp is older than
    /// `now_ms - timeout_ms`, oldest first.
    pub fn pop_expired(&mut self, now_ms: u64, timeout_ms: u64) -> Vec<K> {
        let mut out = Vec::new();
        while let Some((id, last_active)) = self.oldest() {
            if now_ms.saturating_sub(last_active) < timeout_ms {
                break;
            }
            self.detach(id);
            out.push(id);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_moves_to_the_recent_end() {
        let mut list = IdleList::new();
        list.insert(1u32, 0);
        list.insert(2, 10);
        list.insert(3, 20);

        assert_eq!(list.oldest(), Some((1, 0)));
        list.touch(1, 30);
        assert_eq!(list.oldest(), Some((2, 10)));
    }

    #[test]
    fn pop_expired_respects_timeout() {
        let mut list = IdleList::new();
        list.insert(1u32, 0);
        list.insert(2, 100);
        list.insert(3, 200);

        let expired = list.pop_expired(1000, 500);
        assert_eq!(expired, vec![1, 2, 3]);
        assert!(list.is_empty());
    }

    #[test]
    fn pop_expired_stops_at_first_non_expired() {
        let mut list = IdleList::new();
        list.insert(1u32, 0);
        list.insert(2, 4000);
        let expired = list.pop_expired(5000, 5000);
        assert_eq!(expired, vec![1]);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn remove_detaches_from_middle() {
        let mut list = IdleList::new();
        list.insert(1u32, 0);
        list.insert(2, 10);
        list.insert(3, 20);
        list.remove(2);
        assert_eq!(list.len(), 2);
        let expired = list.pop_expired(1000, 0);
        assert_eq!(expired, vec![1, 3]);
    }
}
