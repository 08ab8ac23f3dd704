//! # Intrusive AVL Tree
//!
//! Backs the ordered side of a ZSet: nodes are ordered by `(score, name)`
//! and the tree supports rank-based `offset` navigation so `zquery` can
//! seek to the Nth successor of a node in O(log n).
//!
//! Nodes live in a caller-owned [`Slab`] and reference each other by `u32`
//! id rather than by pointer: parent/left/right/count are all
//! `Option<u32>` / `u32` fields, and rotations operate purely on ids.

use std::cmp::Ordering;

use crate::slab::Slab;

/// Trait implemented by node payloads that can be organized into an AVL
/// tree. The tree itself only tracks parent/child ids and the subtree
/// node count; this trait connects it back to a payload's own identity
/// and comparison order.
pub trait AvlNode {
    fn parent(&self) -> Option<u32>;
    fn set_parent(&mut self, parent: Option<u32>);
    fn left(&self) -> Option<u32>;
    fn set_left(&mut self, left: Option<u32>);
    fn right(&self) -> Option<u32>;
    fn set_right(&mut self, right: Option<u32>);
    fn height(&self) -> i32;
    fn set_height(&mut self, height: i32);
    fn count(&self) -> u32;
    fn set_count(&mut self, count: u32);
}

fn height<T: AvlNode>(slab: &Slab<T>, id: Option<u32>) -> i32 {
    id.map_or(0, |id| slab.get(id).expect("avl node exists").height())
}

fn count<T: AvlNode>(slab: &Slab<T>, id: Option<u32>) -> u32 {
    id.map_or(0, |id| slab.get(id).expect("avl node exists").count())
}

fn update<T: AvlNode>(slab: &mut Slab<T>, id: u32) {
    let (left, right) = {
        let node = slab.get(id).expect("avl node exists");
        (node.left(), node.right())
    };
    let h = 1 + height(slab, left).max(height(slab, right));
    let c = 1 + count(slab, left) + count(slab, right);
    let node = slab.get_mut(id).expect("avl node exists");
    node.set_height(h);
    node.set_count(c);
}

fn balance_factor<T: AvlNode>(slab: &Slab<T>, id: u32) -> i32 {
    let node = slab.get(id).expect("avl node exists");
    height(slab, node.left()) - height(slab, node.right())
}

/// Left-rotates `id` down, returning the new subtree root.
fn rotate_left<T: AvlNode>(slab: &mut Slab<T>, id: u32) -> u32 {
    let new_root = slab.get(id).expect("avl node exists").right().unwrap();
    let new_root_left = slab.get(new_root).expect("avl node exists").left();

    slab.get_mut(id).expect("avl node exists").set_right(new_root_left);
    if let Some(child) = new_root_left {
        slab.get_mut(child).expect("avl node exists").set_parent(Some(id));
    }

    let parent = slab.get(id).expect("avl node exists").parent();
    slab.get_mut(new_root).expect("avl node exists").set_parent(parent);
    slab.get_mut(new_root).expect("avl node exists").set_left(Some(id));
    slab.get_mut(id).expect("avl node exists").set_parent(Some(new_root));

    update(slab, id);
    update(slab, new_root);
    new_root
}

/// Right-rotates `id` down, returning the new subtree root.
fn rotate_right<T: AvlNode>(slab: &mut Slab<T>, id: u32) -> u32 {
    let new_root = slab.get(id).expect("avl node exists").left().unwrap();
    let new_root_right = slab.get(new_root).expect("avl node exists").right();

    slab.get_mut(id).expect("avl node exists").set_left(new_root_right);
    if let Some(child) = new_root_right {
        slab.get_mut(child).expect("avl node exists").set_parent(Some(id));
    }

    let parent = slab.get(id).expect("avl node exists").parent();
    slab.get_mut(new_root).expect("avl node exists").set_parent(parent);
    slab.get_mut(new_root).expect("avl node exists").set_right(Some(id));
    slab.get_mut(id).expect("avl node exists").set_parent(Some(new_root));

    update(slab, id);
    update(slab, new_root);
    new_root
}

/// Rebalances the subtree rooted at `id`, returning the (possibly new)
/// subtree root. Caller is responsible for fixing up the returned root's
/// own parent link.
fn fix<T: AvlNode>(slab: &mut Slab<T>, id: u32) -> u32 {
    update(slab, id);
    let bf = balance_factor(slab, id);
    if bf > 1 {
        let left = slab.get(id).expect("avl node exists").left().unwrap();
        if balance_factor(slab, left) < 0 {
            let new_left = rotate_left(slab, left);
            slab.get_mut(id).expect("avl node exists").set_left(Some(new_left));
        }
        rotate_right(slab, id)
    } else if bf < -1 {
        let right = slab.get(id).expect("avl node exists").right().unwrap();
        if balance_factor(slab, right) > 0 {
            let new_right = rotate_right(slab, right);
            slab.get_mut(id).expect("avl node exists").set_right(Some(new_right));
        }
        rotate_left(slab, id)
    } else {
        id
    }
}

/// Walks from `id` up to the root, rebalancing every ancestor. Returns
/// the new root id.
fn fix_up<T: AvlNode>(slab: &mut Slab<T>, mut id: u32) -> u32 {
    loop {
        let parent = slab.get(id).expect("avl node exists").parent();
        let new_id = fix(slab, id);
        match parent {
            None => return new_id,
            Some(parent) => {
                let (pleft, pright) = {
                    let p = slab.get(parent).expect("avl node exists");
                    (p.left(), p.right())
                };
                if pleft == Some(id) {
                    slab.get_mut(parent).expect("avl node exists").set_left(Some(new_id));
                } else if pright == Some(id) {
                    slab.get_mut(parent).expect("avl node exists").set_right(Some(new_id));
                }
                slab.get_mut(new_id).expect("avl node exists").set_parent(Some(parent));
                id = parent;
            }
        }
    }
}

/// Inserts `id` as a fresh leaf, using `cmp` to order against existing
/// nodes, and returns the new tree root. `id` must already exist in
/// `slab` with left/right/parent cleared and height/count at their leaf
/// defaults (1, 1).
pub fn insert<T: AvlNode>(
    slab: &mut Slab<T>,
    root: Option<u32>,
    id: u32,
    mut cmp: impl FnMut(&Slab<T>, u32, u32) -> Ordering,
) -> u32 {
    let Some(root) = root else {
        return id;
    };

    let mut cur = root;
    loop {
        let ord = cmp(slab, id, cur);
        let side = if ord == Ordering::Less {
            slab.get(cur).expect("avl node exists").left()
        } else {
            slab.get(cur).expect("avl node exists").right()
        };
        match side {
            Some(next) => cur = next,
            None => {
                slab.get_mut(id).expect("avl node exists").set_parent(Some(cur));
                if ord == Ordering::Less {
                    slab.get_mut(cur).expect("avl node exists").set_left(Some(id));
                } else {
                    slab.get_mut(cur).expect("avl node exists").set_right(Some(id));
                }
                return fix_up(slab, cur);
            }
        }
    }
}

/// Detaches `id` from the tree and returns the new root (or `None` if the
/// tree is now empty). `id` must be a node currently in the tree rooted
/// at `root`. `root` is otherwise unused but kept in the signature since
/// every caller already has it at hand and it documents intent.
pub fn remove<T: AvlNode>(slab: &mut Slab<T>, root: u32, id: u32) -> Option<u32> {
    let _ = root;
    let new_root = detach(slab, id);
    clear_links(slab, id);
    new_root
}

/// Detaches `id` from the tree, rebalances, and returns the new root.
/// Leaves `id`'s own left/right/parent links untouched; the caller clears
/// them afterward. Mirrors the classic recursive AVL delete: a node with
/// no right child is replaced in its parent by its left child; otherwise
/// its in-order successor is recursively detached and swapped into `id`'s
/// place.
fn detach<T: AvlNode>(slab: &mut Slab<T>, id: u32) -> Option<u32> {
    let right = slab.get(id).expect("avl node exists").right();

    if right.is_none() {
        let parent = slab.get(id).expect("avl node exists").parent();
        let left = slab.get(id).expect("avl node exists").left();
        if let Some(left) = left {
            slab.get_mut(left).expect("avl node exists").set_parent(parent);
        }
        return attach_to_parent(slab, parent, id, left);
    }

    let mut successor = right.unwrap();
    while let Some(next) = slab.get(successor).expect("avl node exists").left() {
        successor = next;
    }
    // Removing `successor` may rebalance (and rotate) `id`'s own subtree,
    // so everything about `id` must be re-read after this call, not
    // before it.
    let root_after_detaching_successor = detach(slab, successor);

    let parent = slab.get(id).expect("avl node exists").parent();
    let left = slab.get(id).expect("avl node exists").left();
    let right_child = slab.get(id).expect("avl node exists").right();
    let node_height = slab.get(id).expect("avl node exists").height();
    let node_count = slab.get(id).expect("avl node exists").count();

    // Splice `successor` into `id`'s current position with `id`'s
    // current children.
    slab.get_mut(successor).expect("avl node exists").set_left(left);
    if let Some(left) = left {
        slab.get_mut(left).expect("avl node exists").set_parent(Some(successor));
    }
    slab.get_mut(successor).expect("avl node exists").set_right(right_child);
    if let Some(right_child) = right_child {
        slab.get_mut(right_child).expect("avl node exists").set_parent(Some(successor));
    }
    slab.get_mut(successor).expect("avl node exists").set_height(node_height);
    slab.get_mut(successor).expect("avl node exists").set_count(node_count);

    match attach_to_parent(slab, parent, id, Some(successor)) {
        Some(root) => Some(root),
        None => root_after_detaching_successor,
    }
}

/// Points `id`'s parent at `replacement` instead (or, if `id` was the
/// root, simply returns `replacement` as the new root), then rebalances
/// from `parent` upward.
fn attach_to_parent<T: AvlNode>(
    slab: &mut Slab<T>,
    parent: Option<u32>,
    id: u32,
    replacement: Option<u32>,
) -> Option<u32> {
    match parent {
        None => replacement,
        Some(parent) => {
            let pleft = slab.get(parent).expect("avl node exists").left();
            if pleft == Some(id) {
                slab.get_mut(parent).expect("avl node exists").set_left(replacement);
            } else {
                slab.get_mut(parent).expect("avl node exists").set_right(replacement);
            }
            Some(fix_up(slab, parent))
        }
    }
}

fn clear_links<T: AvlNode>(slab: &mut Slab<T>, id: u32) {
    let node = slab.get_mut(id).expect("avl node exists");
    node.set_parent(None);
    node.set_left(None);
    node.set_right(None);
    node.set_height(1);
    node.set_count(1);
}

/// Returns the id reached by moving `offset` positions in-order from
/// `id` (negative moves toward predecessors, positive toward
/// successors), or `None` if that would walk off either end.
pub fn offset<T: AvlNode>(slab: &Slab<T>, id: u32, target: i64) -> Option<u32> {
    let mut pos: i64 = 0;
    let mut cur = id;

    while pos != target {
        let node = slab.get(cur).expect("avl node exists");
        let right_count = count(slab, node.right()) as i64;
        let left_count = count(slab, node.left()) as i64;

        if pos < target && pos + right_count >= target {
            cur = node.right()?;
            pos += count(slab, slab.get(cur).expect("avl node exists").left()) as i64 + 1;
        } else if pos > target && pos - left_count <= target {
            cur = node.left()?;
            pos -= count(slab, slab.get(cur).expect("avl node exists").right()) as i64 + 1;
        } else {
            let parent = node.parent()?;
            let pnode = slab.get(parent).expect("avl node exists");
            if pnode.right() == Some(cur) {
                pos -= count(slab, pnode.left()) as i64 + 1;
            } else {
                pos += count(slab, pnode.right()) as i64 + 1;
            }
            cur = parent;
        }
    }
    Some(cur)
}

/// Returns the leftmost (minimum) node of the subtree rooted at `root`.
pub fn first<T: AvlNode>(slab: &Slab<T>, root: u32) -> u32 {
    let mut cur = root;
    while let Some(left) = slab.get(cur).expect("avl node exists").left() {
        cur = left;
    }
    cur
}
