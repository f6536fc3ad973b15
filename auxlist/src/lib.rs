//! Auxlist: a lock-free set over a linked list with auxiliary nodes.
//!
//! Every pair of adjacent cells is separated by a link-only *auxiliary*
//! node, so both splicing a new cell in and unlinking a deleted one are a
//! single compare-and-swap. Nodes come from a fixed pool built once at
//! construction and are recycled through a reference counting protocol, so
//! no operation ever touches the allocator.
//!
//! # Key Features
//!
//! - **Lock-Free Progress**: every mutation is one CAS; failed CASes retry
//!   without blocking
//! - **Fixed Memory**: `capacity` cells and auxiliary nodes, preallocated
//! - **Safe Recycling**: a node only returns to its pool once no thread holds
//!   a counted reference to it and no node links to it
//! - **Lazy Repair**: traversals unlink stranded auxiliary nodes as they go
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::thread;
//! use auxlist::ListSet;
//!
//! let set = Arc::new(ListSet::with_capacity(64));
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|t| {
//!         let set = set.clone();
//!         thread::spawn(move || {
//!             for i in 0..8 {
//!                 set.insert(t * 8 + i).unwrap();
//!             }
//!         })
//!     })
//!     .collect();
//!
//! for h in handles {
//!     h.join().unwrap();
//! }
//!
//! assert!(set.contains(&17));
//! assert!(set.remove(&17));
//! assert!(!set.contains(&17));
//! ```

#![warn(missing_docs)]

mod cursor;
mod error;
mod node;
mod pool;
mod reclaim;
mod set;

pub use error::ListError;
pub use node::NodeKind;
pub use pool::{MAX_CAPACITY, PoolStats};
pub use set::{DEFAULT_CAPACITY, ListSet};
