use core::fmt;

use crate::node::NodeKind;

/// Errors surfaced by [`ListSet`](crate::ListSet) operations.
///
/// Contention is never reported; CAS failures are retried internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListError {
    /// The pool for `kind` had no free node when an insert needed one.
    ///
    /// Recoverable: a later `remove` returns nodes to the pool.
    CapacityExhausted {
        /// Which pool ran dry.
        kind: NodeKind,
        /// Capacity the set was built with.
        capacity: usize,
    },
}

impl fmt::Display for ListError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListError::CapacityExhausted { kind, capacity } => {
                let pool = match kind {
                    NodeKind::Cell => "cell",
                    NodeKind::Auxiliary => "auxiliary",
                };
                write!(f, "Capacity exhausted: {} pool empty (capacity {})", pool, capacity)
            }
        }
    }
}

impl std::error::Error for ListError {}
