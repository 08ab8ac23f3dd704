//! # Keyspace and Entry Lifecycle
//!
//! The keyspace is the top-level map from key bytes to [`Entry`], backed
//! by the same progressive [`HMap`] used for ZSet name indexes. It owns
//! each entry's TTL registration and hands off large-ZSet teardown to a
//! [`WorkerPool`].

use kv_common::StoreResult;

use crate::hash::{Chained, HMap};
use crate::hash_fn::fnv1a64;
use crate::heap::{HeapHandle, TtlHeap};
use crate::slab::Slab;
use crate::worker_pool::{Task, WorkerPool};
use crate::zset::ZSet;

/// Member count above which `entry_del` offloads ZSet teardown to the
/// worker pool instead of dropping it inline on the event loop thread.
pub const ASYNC_FREE_THRESHOLD: usize = 10_000;

pub enum Payload {
    Str(Vec<u8>),
    ZSet(ZSet),
}

impl Payload {
    pub fn type_name(&self) -> &'static str {
        match self {
            Payload::Str(_) => "string",
            Payload::ZSet(_) => "zset",
        }
    }
}

pub struct Entry {
    key: Vec<u8>,
    hcode: u64,
    pub payload: Payload,
    ttl: Option<HeapHandle>,
    hnext: Option<u32>,
}

impl Chained for Entry {
    fn hcode(&self) -> u64 {
        self.hcode
    }
    fn next(&self) -> Option<u32> {
        self.hnext
    }
    fn set_next(&mut self, next: Option<u32>) {
        self.hnext = next;
    }
}

/// The keyspace: key -> [`Entry`] map, plus the supporting TTL heap and
/// worker pool every mutation keeps consistent.
pub struct Keyspace {
    entries: Slab<Entry>,
    index: HMap<Entry>,
    ttl_heap: TtlHeap<u32>,
    workers: WorkerPool,
}

impl Keyspace {
    pub fn new(worker_threads: usize) -> Self {
        Keyspace {
            entries: Slab::new(),
            index: HMap::new(),
            ttl_heap: TtlHeap::new(),
            workers: WorkerPool::new(worker_threads),
        }
    }

    fn find_id(&mut self, key: &[u8]) -> Option<u32> {
        let hcode = fnv1a64(key);
        self.index.lookup(&mut self.entries, hcode, |e| e.key == key)
    }

    pub fn get(&mut self, key: &[u8]) -> Option<&Payload> {
        let id = self.find_id(key)?;
        Some(&self.entries.get(id).expect("entry exists").payload)
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut Payload> {
        let id = self.find_id(key)?;
        Some(&mut self.entries.get_mut(id).expect("entry exists").payload)
    }

    /// Looks up (or creates, via `make`) the entry for `key`, giving the
    /// caller mutable access to its payload. `make` runs only on a miss.
    pub fn get_or_insert_with(
        &mut self,
        key: &[u8],
        make: impl FnOnce() -> Payload,
    ) -> StoreResult<&mut Payload> {
        if let Some(id) = self.find_id(key) {
            return Ok(&mut self.entries.get_mut(id).expect("entry exists").payload);
        }
        let hcode = fnv1a64(key);
        let id = self.entries.insert(Entry {
            key: key.to_vec(),
            hcode,
            payload: make(),
            ttl: None,
            hnext: None,
        });
        self.index
            .insert(&mut self.entries, id)
            .map_err(|e| {
                self.entries.remove(id);
                e
            })?;
        Ok(&mut self.entries.get_mut(id).expect("entry exists").payload)
    }

    /// Every key currently present, in unspecified order.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.entries.iter().map(|(_, e)| e.key.clone()).collect()
    }

    pub fn exists_count<'a>(&mut self, keys: impl IntoIterator<Item = &'a [u8]>) -> usize {
        let mut seen: Vec<&[u8]> = Vec::new();
        let mut count = 0;
        for key in keys {
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            if self.find_id(key).is_some() {
                count += 1;
            }
        }
        count
    }

    /// Remaining TTL in milliseconds: `-2` if the key is absent, `-1` if
    /// it has no TTL, otherwise the milliseconds left (clamped to 0).
    pub fn pttl_ms(&mut self, key: &[u8], now_ms: u64) -> i64 {
        let Some(id) = self.find_id(key) else {
            return -2;
        };
        match self.entries.get(id).expect("entry exists").ttl {
            None => -1,
            Some(handle) => {
                let deadline = self
                    .ttl_heap
                    .deadline_of(handle)
                    .expect("ttl handle tracked while entry holds it");
                deadline.saturating_sub(now_ms) as i64
            }
        }
    }

    /// Sets or clears a key's TTL. `ttl_ms < 0` clears it. Returns
    /// `false` if the key does not exist.
    pub fn expire(&mut self, key: &[u8], ttl_ms: i64, now_ms: u64) -> bool {
        let Some(id) = self.find_id(key) else {
            return false;
        };
        self.set_ttl(id, ttl_ms, now_ms);
        true
    }

    fn set_ttl(&mut self, id: u32, ttl_ms: i64, now_ms: u64) {
        let existing = self.entries.get(id).expect("entry exists").ttl;
        if ttl_ms < 0 {
            if let Some(handle) = existing {
                self.ttl_heap.remove(handle);
                self.entries.get_mut(id).expect("entry exists").ttl = None;
            }
            return;
        }
        let deadline = now_ms.saturating_add(ttl_ms as u64);
        match existing {
            Some(handle) => self.ttl_heap.update(handle, deadline),
            None => {
                let handle = self.ttl_heap.push(id, deadline);
                self.entries.get_mut(id).expect("entry exists").ttl = Some(handle);
            }
        }
    }

    /// Removes `key` entirely. Returns `true` if it existed.
    pub fn del(&mut self, key: &[u8]) -> bool {
        let hcode = fnv1a64(key);
        let Some(id) = self.index.pop(&mut self.entries, hcode, |e| e.key == key) else {
            return false;
        };
        self.entry_del(id);
        true
    }

    /// Unlinks `id`'s TTL registration, then destroys it: inline for
    /// small payloads, or via the worker pool for a ZSet past
    /// [`ASYNC_FREE_THRESHOLD`] members. `id` must already be detached
    /// from the keyspace index before this is called.
    fn entry_del(&mut self, id: u32) {
        if let Some(handle) = self.entries.get(id).expect("entry exists").ttl {
            self.ttl_heap.remove(handle);
        }
        let entry = self.entries.remove(id).expect("entry exists");
        match entry.payload {
            Payload::ZSet(zset) if zset.len() > ASYNC_FREE_THRESHOLD => {
                self.workers.submit(Task::DestroyZSet(zset));
            }
            _ => {}
        }
    }

    /// Pops and destroys every entry whose TTL has elapsed by `now_ms`,
    /// capped at `max_items` per call.
    pub fn expire_due(&mut self, now_ms: u64, max_items: usize) -> usize {
        let due = self.ttl_heap.pop_expired(now_ms, max_items);
        let count = due.len();
        for id in due {
            let hcode = self.entries.get(id).expect("entry exists").hcode;
            let key = self.entries.get(id).expect("entry exists").key.clone();
            self.index.pop(&mut self.entries, hcode, |e| e.key == key);
            let entry = self.entries.remove(id).expect("entry exists");
            match entry.payload {
                Payload::ZSet(zset) if zset.len() > ASYNC_FREE_THRESHOLD => {
                    self.workers.submit(Task::DestroyZSet(zset));
                }
                _ => {}
            }
        }
        count
    }

    /// The soonest TTL deadline still pending, for the event loop's
    /// poll-timeout calculation.
    pub fn next_ttl_deadline(&self) -> Option<u64> {
        self.ttl_heap.peek().map(|(_, deadline)| deadline)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drains the worker pool, joining every in-flight destruction.
    pub fn shutdown(self) {
        self.workers.shutdown();
    }
}
