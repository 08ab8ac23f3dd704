//! kv-core - the data structures and keyspace behind the store.
//!
//! This crate has no knowledge of sockets or the wire format; it is the
//! part of the system `kv-server` drives from its event loop.

pub mod avl;
pub mod hash;
pub mod hash_fn;
pub mod heap;
pub mod idle_list;
pub mod keyspace;
pub mod slab;
pub mod worker_pool;
pub mod zset;

pub use hash_fn::fnv1a64;
pub use heap::{HeapHandle, TtlHeap};
pub use idle_list::IdleList;
pub use keyspace::{Entry, Keyspace, Payload, ASYNC_FREE_THRESHOLD};
pub use slab::Slab;
pub use worker_pool::{Task, WorkerPool};
pub use zset::ZSet;
