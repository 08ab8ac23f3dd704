//! # Progressive Hash Table
//!
//! Purpose: a two-table open-chained map that rehashes incrementally so no
//! single mutating call ever pays for a full-table resize. Backs both the
//! keyspace (key bytes -> entry id) and each ZSet's name index (member name
//! -> node id).
//!
//! ## Design Principles
//! 1. **Index-based chains**: nodes live in a caller-owned [`Slab`] and are
//!    chained via an intrusive `next` id (trait [`Chained`]), not raw
//!    pointers.
//! 2. **Bounded migration work**: every mutating call performs at most
//!    [`K_REHASH_WORK`] migration steps, bounding worst-case latency on the
//!    single-threaded event loop.
//! 3. **Active-then-shadow lookup**: a lookup always consults the active
//!    table first, then the shadow (mid-migration) table.

use kv_common::{StoreError, StoreResult};

use crate::slab::Slab;

/// Migration steps performed per mutating call.
pub const K_REHASH_WORK: usize = 128;

/// Load factor (size / bucket count) above which a migration begins.
const MAX_LOAD_FACTOR: usize = 8;

/// Trait for items that can be chained within one hash bucket.
pub trait Chained {
    fn hcode(&self) -> u64;
    fn next(&self) -> Option<u32>;
    fn set_next(&mut self, next: Option<u32>);
}

struct HTab {
    buckets: Vec<Option<u32>>,
    mask: usize,
    size: usize,
}

impl HTab {
    fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        HTab {
            buckets: vec![None; capacity],
            mask: capacity - 1,
            size: 0,
        }
    }

    fn try_new(capacity: usize) -> StoreResult<Self> {
        debug_assert!(capacity.is_power_of_two());
        let mut buckets = Vec::new();
        buckets
            .try_reserve_exact(capacity)
            .map_err(|_| StoreError::OutOfMemory)?;
        buckets.resize(capacity, None);
        Ok(HTab {
            buckets,
            mask: capacity - 1,
            size: 0,
        })
    }

    fn bucket_of(&self, hcode: u64) -> usize {
        (hcode as usize) & self.mask
    }

    fn insert_node<T: Chained>(&mut self, slab: &mut Slab<T>, id: u32) {
        let hcode = slab.get(id).expect("node exists").hcode();
        let idx = self.bucket_of(hcode);
        let head = self.buckets[idx];
        slab.get_mut(id).expect("node exists").set_next(head);
        self.buckets[idx] = Some(id);
        self.size += 1;
    }

    fn lookup<T: Chained>(
        &self,
        slab: &Slab<T>,
        hcode: u64,
        mut eq: impl FnMut(&T) -> bool,
    ) -> Option<u32> {
        let idx = self.bucket_of(hcode);
        let mut cur = self.buckets[idx];
        while let Some(id) = cur {
            let node = slab.get(id).expect("chained node exists");
            if node.hcode() == hcode && eq(node) {
                return Some(id);
            }
            cur = node.next();
        }
        None
    }

    fn pop<T: Chained>(
        &mut self,
        slab: &mut Slab<T>,
        hcode: u64,
        mut eq: impl FnMut(&T) -> bool,
    ) -> Option<u32> {
        let idx = self.bucket_of(hcode);
        let mut prev: Option<u32> = None;
        let mut cur = self.buckets[idx];
        while let Some(id) = cur {
            let node = slab.get(id).expect("chained node exists");
            let matches = node.hcode() == hcode && eq(node);
            let next = node.next();
            if matches {
                match prev {
                    Some(p) => slab.get_mut(p).expect("chained node exists").set_next(next),
                    None => self.buckets[idx] = next,
                }
                self.size -= 1;
                return Some(id);
            }
            prev = Some(id);
            cur = next;
        }
        None
    }

    /// Unlinks a node by id rather than by equality, for unwinding a
    /// just-inserted node whose id is already known.
    fn remove_id<T: Chained>(&mut self, slab: &mut Slab<T>, hcode: u64, target: u32) {
        let idx = self.bucket_of(hcode);
        let mut prev: Option<u32> = None;
        let mut cur = self.buckets[idx];
        while let Some(id) = cur {
            let next = slab.get(id).expect("chained node exists").next();
            if id == target {
                match prev {
                    Some(p) => slab.get_mut(p).expect("chained node exists").set_next(next),
                    None => self.buckets[idx] = next,
                }
                self.size -= 1;
                return;
            }
            prev = Some(id);
            cur = next;
        }
    }
}

/// A progressively-resizing open-chained hash map over nodes in `Slab<T>`.
pub struct HMap<T> {
    active: HTab,
    shadow: Option<HTab>,
    migrate_bucket: usize,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Chained> Default for HMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Chained> HMap<T> {
    pub fn new() -> Self {
        HMap {
            active: HTab::new(4),
            shadow: None,
            migrate_bucket: 0,
            _marker: std::marker::PhantomData,
        }
    }

    /// Total number of live entries across both tables.
    pub fn len(&self) -> usize {
        self.active.size + self.shadow.as_ref().map_or(0, |tab| tab.size)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn help_rehash(&mut self, slab: &mut Slab<T>) {
        let Some(shadow) = self.shadow.as_mut() else {
            return;
        };

        let mut moved = 0;
        while moved < K_REHASH_WORK {
            if shadow.size == 0 {
                self.shadow = None;
                self.migrate_bucket = 0;
                return;
            }
            while self.migrate_bucket < shadow.buckets.len()
                && shadow.buckets[self.migrate_bucket].is_none()
            {
                self.migrate_bucket += 1;
            }
            if self.migrate_bucket >= shadow.buckets.len() {
                self.shadow = None;
                self.migrate_bucket = 0;
                return;
            }

            let id = shadow.buckets[self.migrate_bucket].take().unwrap();
            let next = slab.get(id).expect("chained node exists").next();
            shadow.buckets[self.migrate_bucket] = next;
            shadow.size -= 1;
            self.active.insert_node(slab, id);
            moved += 1;
        }
    }

    fn maybe_start_rehash(&mut self) -> StoreResult<()> {
        if self.shadow.is_some() {
            return Ok(());
        }
        if self.active.size <= self.active.buckets.len() * MAX_LOAD_FACTOR {
            return Ok(());
        }
        let new_capacity = self.active.buckets.len() * 2;
        let new_active = HTab::try_new(new_capacity)?;
        let old_active = std::mem::replace(&mut self.active, new_active);
        self.shadow = Some(old_active);
        self.migrate_bucket = 0;
        Ok(())
    }

    /// Inserts an already-allocated node (by id) into the table.
    ///
    /// The node's hash code, as reported by [`Chained::hcode`], is read
    /// from the slab; its `next` link is overwritten to thread it onto a
    /// bucket chain.
    pub fn insert(&mut self, slab: &mut Slab<T>, id: u32) -> StoreResult<()> {
        self.help_rehash(slab);
        self.active.insert_node(slab, id);
        if let Err(e) = self.maybe_start_rehash() {
            // The node is already live and findable in `active`; failing to
            // grow a shadow table is not a reason to leave it dangling, so
            // unlink it before reporting the error.
            let hcode = slab.get(id).expect("node exists").hcode();
            self.active.remove_id(slab, hcode, id);
            return Err(e);
        }
        Ok(())
    }

    /// Finds the node matching `hcode` and `eq`, consulting the active
    /// table then the shadow table, after performing bounded migration
    /// work.
    pub fn lookup(
        &mut self,
        slab: &mut Slab<T>,
        hcode: u64,
        mut eq: impl FnMut(&T) -> bool,
    ) -> Option<u32> {
        self.help_rehash(slab);
        if let Some(id) = self.active.lookup(slab, hcode, &mut eq) {
            return Some(id);
        }
        self.shadow.as_ref()?.lookup(slab, hcode, &mut eq)
    }

    /// Removes and returns the node matching `hcode` and `eq`.
    ///
    /// Detaches from whichever table (active or shadow) actually contains
    /// the match, never the other one.
    pub fn pop(
        &mut self,
        slab: &mut Slab<T>,
        hcode: u64,
        mut eq: impl FnMut(&T) -> bool,
    ) -> Option<u32> {
        self.help_rehash(slab);
        if let Some(id) = self.active.pop(slab, hcode, &mut eq) {
            return Some(id);
        }
        self.shadow.as_mut()?.pop(slab, hcode, &mut eq)
    }

    /// True while a migration is in progress.
    pub fn is_migrating(&self) -> bool {
        self.shadow.is_some()
    }

    /// Active-table bucket count, for load-factor assertions in tests.
    pub fn active_capacity(&self) -> usize {
        self.active.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Node {
        hcode: u64,
        value: u64,
        next: Option<u32>,
    }

    impl Chained for Node {
        fn hcode(&self) -> u64 {
            self.hcode
        }
        fn next(&self) -> Option<u32> {
            self.next
        }
        fn set_next(&mut self, next: Option<u32>) {
            self.next = next;
        }
    }

    fn fnv1a(bytes: &[u8]) -> u64 {
        crate::hash_fn::fnv1a64(bytes)
    }

    #[test]
    fn insert_lookup_pop_roundtrip() {
        let mut slab = Slab::new();
        let mut map = HMap::new();

        for value in 0u64..64 {
            let hcode = fnv1a(&value.to_le_bytes());
            let id = slab.insert(Node {
                hcode,
                value,
                next: None,
            });
            map.insert(&mut slab, id).unwrap();
        }

        for value in 0u64..64 {
            let hcode = fnv1a(&value.to_le_bytes());
            let found = map.lookup(&mut slab, hcode, |n| n.value == value);
            assert!(found.is_some(), "missing {value}");
        }

        assert_eq!(map.len(), 64);
    }

    #[test]
    fn rehash_preserves_all_live_entries_under_load() {
        let mut slab = Slab::new();
        let mut map = HMap::new();
        let n = 500u64;

        for value in 0..n {
            let hcode = fnv1a(&value.to_le_bytes());
            let id = slab.insert(Node {
                hcode,
                value,
                next: None,
            });
            map.insert(&mut slab, id).unwrap();
        }

        // Drive any remaining migration to completion.
        for _ in 0..10_000 {
            if !map.is_migrating() {
                break;
            }
            let hcode = fnv1a(&0u64.to_le_bytes());
            map.lookup(&mut slab, hcode, |n| n.value == 0);
        }

        assert!(!map.is_migrating());
        assert_eq!(map.len(), n as usize);
        for value in 0..n {
            let hcode = fnv1a(&value.to_le_bytes());
            assert!(map.lookup(&mut slab, hcode, |x| x.value == value).is_some());
        }
    }

    #[test]
    fn pop_detaches_from_the_table_that_actually_matched() {
        let mut slab = Slab::new();
        let mut map = HMap::new();
        let n = 200u64;
        for value in 0..n {
            let hcode = fnv1a(&value.to_le_bytes());
            let id = slab.insert(Node {
                hcode,
                value,
                next: None,
            });
            map.insert(&mut slab, id).unwrap();
        }

        // Pop every entry, including while a migration may still be live,
        // and verify each is really gone afterward (this is the "pop
        // detaches from the table that matched" guarantee).
        for value in 0..n {
            let hcode = fnv1a(&value.to_le_bytes());
            let id = map.pop(&mut slab, hcode, |x| x.value == value);
            assert!(id.is_some());
            slab.remove(id.unwrap());
            assert!(map
                .lookup(&mut slab, hcode, |x| x.value == value)
                .is_none());
        }
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn remove_id_unlinks_only_the_named_node() {
        let mut slab = Slab::new();
        let mut tab = HTab::new(4);

        let hcode = fnv1a(b"shared-bucket");
        let a = slab.insert(Node {
            hcode,
            value: 1,
            next: None,
        });
        let b = slab.insert(Node {
            hcode,
            value: 2,
            next: None,
        });
        tab.insert_node(&mut slab, a);
        tab.insert_node(&mut slab, b);
        assert_eq!(tab.size, 2);

        tab.remove_id(&mut slab, hcode, a);

        assert_eq!(tab.size, 1);
        assert!(tab.lookup(&slab, hcode, |n| n.value == 1).is_none());
        assert_eq!(tab.lookup(&slab, hcode, |n| n.value == 2), Some(b));
    }

    #[test]
    fn insert_rolls_back_the_node_link_when_rehash_start_fails() {
        // Mirrors what `HMap::insert` does internally when
        // `maybe_start_rehash` fails after the node is already linked:
        // the node must come back out of the table it was just linked
        // into, leaving lookups and later pops over that bucket sane.
        let mut slab = Slab::new();
        let mut tab = HTab::new(4);
        let hcode = fnv1a(b"k");
        let id = slab.insert(Node {
            hcode,
            value: 7,
            next: None,
        });
        tab.insert_node(&mut slab, id);
        assert_eq!(tab.size, 1);

        tab.remove_id(&mut slab, hcode, id);

        assert_eq!(tab.size, 0);
        assert!(tab.lookup(&slab, hcode, |n| n.value == 7).is_none());
        // The slab slot itself is still whatever the caller left it as;
        // callers (e.g. `Keyspace::get_or_insert_with`) free it after the
        // table no longer references it, never before.
        assert!(slab.get(id).is_some());
    }
}
