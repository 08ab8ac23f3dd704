//! # Sorted Set
//!
//! A ZSet orders members by `(score, name)` using the AVL tree in
//! [`crate::avl`], and additionally indexes them by name through the
//! progressive hash table in [`crate::hash`] so membership lookups and
//! score updates do not need a tree walk. Each member lives once, as a
//! single [`ZNode`] in a private [`Slab`], referenced from both
//! structures by the same id.

use std::cmp::Ordering;

use crate::avl::{self, AvlNode};
use crate::hash::{Chained, HMap};
use crate::hash_fn::fnv1a64;
use crate::slab::Slab;

/// One member of a sorted set: a name, a score, and the intrusive links
/// both the AVL tree and the hash table need.
pub struct ZNode {
    pub name: Vec<u8>,
    pub score: f64,
    hcode: u64,

    // AVL (ordered by score, name)
    parent: Option<u32>,
    left: Option<u32>,
    right: Option<u32>,
    height: i32,
    count: u32,

    // hash chain (by name)
    hnext: Option<u32>,
}

impl ZNode {
    fn new(name: Vec<u8>, score: f64) -> Self {
        let hcode = fnv1a64(&name);
        ZNode {
            name,
            score,
            hcode,
            parent: None,
            left: None,
            right: None,
            height: 1,
            count: 1,
            hnext: None,
        }
    }
}

impl AvlNode for ZNode {
    fn parent(&self) -> Option<u32> {
        self.parent
    }
    fn set_parent(&mut self, parent: Option<u32>) {
        self.parent = parent;
    }
    fn left(&self) -> Option<u32> {
        self.left
    }
    fn set_left(&mut self, left: Option<u32>) {
        self.left = left;
    }
    fn right(&self) -> Option<u32> {
        self.right
    }
    fn set_right(&mut self, right: Option<u32>) {
        self.right = right;
    }
    fn height(&self) -> i32 {
        self.height
    }
    fn set_height(&mut self, height: i32) {
        self.height = height;
    }
    fn count(&self) -> u32 {
        self.count
    }
    fn set_count(&mut self, count: u32) {
        self.count = count;
    }
}

impl Chained for ZNode {
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

fn score_cmp(slab: &Slab<ZNode>, a: u32, b: u32) -> Ordering {
    let na = slab.get(a).expect("znode exists");
    let nb = slab.get(b).expect("znode exists");
    na.score
        .partial_cmp(&nb.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| na.name.cmp(&nb.name))
}

/// A sorted set: AVL tree ordered by `(score, name)` plus a name index.
#[derive(Default)]
pub struct ZSet {
    nodes: Slab<ZNode>,
    root: Option<u32>,
    index: HMap<ZNode>,
}

impl ZSet {
    pub fn new() -> Self {
        ZSet {
            nodes: Slab::new(),
            root: None,
            index: HMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn find_id(&mut self, name: &[u8]) -> Option<u32> {
        let hcode = fnv1a64(name);
        self.index.lookup(&mut self.nodes, hcode, |n| n.name == name)
    }

    /// Looks up a member's score.
    pub fn score(&mut self, name: &[u8]) -> Option<f64> {
        let id = self.find_id(name)?;
        Some(self.nodes.get(id).expect("znode exists").score)
    }

    /// Inserts a new member or re-scores an existing one. Returns `true`
    /// if the member was newly added.
    pub fn add(&mut self, name: Vec<u8>, score: f64) -> bool {
        if let Some(id) = self.find_id(&name) {
            let old_score = self.nodes.get(id).expect("znode exists").score;
            if old_score != score {
                if let Some(root) = self.root {
                    self.root = avl::remove(&mut self.nodes, root, id);
                }
                let node = self.nodes.get_mut(id).expect("znode exists");
                node.score = score;
                node.set_parent(None);
                node.set_left(None);
                node.set_right(None);
                node.set_height(1);
                node.set_count(1);
                self.root = Some(avl::insert(&mut self.nodes, self.root, id, score_cmp));
            }
            return false;
        }

        let id = self.nodes.insert(ZNode::new(name, score));
        self.index
            .insert(&mut self.nodes, id)
            .expect("hash insert");
        self.root = Some(avl::insert(&mut self.nodes, self.root, id, score_cmp));
        true
    }

    /// Removes a member, returning its score if it existed.
    pub fn remove(&mut self, name: &[u8]) -> Option<f64> {
        let hcode = fnv1a64(name);
        let id = self.index.pop(&mut self.nodes, hcode, |n| n.name == name)?;
        let root = self.root.expect("tree non-empty when index non-empty");
        self.root = avl::remove(&mut self.nodes, root, id);
        let node = self.nodes.remove(id).expect("znode exists");
        Some(node.score)
    }

    /// Returns up to `limit` members starting at the first member whose
    /// `(score, name)` is `>= (score, name)`, advanced by `offset`
    /// positions first (supports `zquery`'s seek-then-page behavior).
    pub fn query(
        &self,
        score: f64,
        name: &[u8],
        offset: i64,
        limit: usize,
    ) -> Vec<(Vec<u8>, f64)> {
        let Some(root) = self.root else {
            return Vec::new();
        };

        let Some(mut cur) = self.seek(root, score, name) else {
            return Vec::new();
        };

        if offset != 0 {
            match avl::offset(&self.nodes, cur, offset) {
                Some(id) => cur = id,
                None => return Vec::new(),
            }
        }

        let mut out = Vec::with_capacity(limit.min(self.len()));
        let mut next = Some(cur);
        while let Some(id) = next {
            if out.len() >= limit {
                break;
            }
            let node = self.nodes.get(id).expect("znode exists");
            out.push((node.name.clone(), node.score));
            next = self.successor(id);
        }
        out
    }

    /// Finds the first node whose key is `>= (score, name)`.
    fn seek(&self, root: u32, score: f64, name: &[u8]) -> Option<u32> {
        let mut cur = Some(root);
        let mut best: Option<u32> = None;
        while let Some(id) = cur {
            let node = self.nodes.get(id).expect("znode exists");
            let ord = node
                .score
                .partial_cmp(&score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| node.name.as_slice().cmp(name));
            match ord {
                Ordering::Less => cur = node.right(),
                Ordering::Equal => return Some(id),
                Ordering::Greater => {
                    best = Some(id);
                    cur = node.left();
                }
            }
        }
        best
    }

    fn successor(&self, id: u32) -> Option<u32> {
        let node = self.nodes.get(id).expect("znode exists");
        if let Some(right) = node.right() {
            return Some(avl::first(&self.nodes, right));
        }
        let mut child = id;
        let mut parent = node.parent();
        while let Some(p) = parent {
            let pnode = self.nodes.get(p).expect("znode exists");
            if pnode.left() == Some(child) {
                return Some(p);
            }
            child = p;
            parent = pnode.parent();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_lookup_and_remove() {
        let mut z = ZSet::new();
        assert!(z.add(b"a".to_vec(), 1.0));
        assert!(z.add(b"b".to_vec(), 2.0));
        assert!(!z.add(b"a".to_vec(), 3.0)); // re-score, not new
        assert_eq!(z.score(b"a"), Some(3.0));
        assert_eq!(z.score(b"b"), Some(2.0));
        assert_eq!(z.score(b"missing"), None);

        assert_eq!(z.remove(b"a"), Some(3.0));
        assert_eq!(z.score(b"a"), None);
        assert_eq!(z.len(), 1);
    }

    #[test]
    fn query_orders_by_score_then_name() {
        let mut z = ZSet::new();
        z.add(b"charlie".to_vec(), 1.0);
        z.add(b"alice".to_vec(), 1.0);
        z.add(b"bob".to_vec(), 1.0);
        z.add(b"dave".to_vec(), 2.0);

        let all = z.query(f64::MIN, b"", 0, 100);
        let names: Vec<_> = all.iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(
            names,
            vec![
                b"alice".to_vec(),
                b"bob".to_vec(),
                b"charlie".to_vec(),
                b"dave".to_vec(),
            ]
        );
    }

    #[test]
    fn query_respects_offset_and_limit() {
        let mut z = ZSet::new();
        for i in 0..10 {
            z.add(format!("m{i:02}").into_bytes(), i as f64);
        }
        let page = z.query(0.0, b"", 3, 2);
        assert_eq!(page, vec![(b"m03".to_vec(), 3.0), (b"m04".to_vec(), 4.0)]);
    }

    #[test]
    fn remove_many_keeps_structure_consistent() {
        let mut z = ZSet::new();
        for i in 0..200 {
            z.add(format!("m{i:03}").into_bytes(), i as f64);
        }
        for i in (0..200).step_by(2) {
            assert_eq!(z.remove(format!("m{i:03}").as_bytes()), Some(i as f64));
        }
        assert_eq!(z.len(), 100);
        let remaining = z.query(f64::MIN, b"", 0, 1000);
        assert_eq!(remaining.len(), 100);
        for (name, score) in &remaining {
            let idx: usize = std::str::from_utf8(&name[1..]).unwrap().parse().unwrap();
            assert_eq!(idx % 2, 1);
            assert_eq!(*score, idx as f64);
        }
    }
}
