//! Thread-local query buffers for allocation-free search
//!
//! The visited set and both heaps are reused across queries on the same
//! thread. Batch search fans out over a thread pool, so each worker ends
//! up with its own warm set of buffers.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use super::types::Candidate;

/// Reusable buffers for one layer search.
#[derive(Default)]
pub(crate) struct QueryBuffers {
    /// Nodes already visited during graph traversal
    pub visited: HashSet<u32>,

    /// Candidates still to explore (min-heap by distance)
    pub candidates: BinaryHeap<Reverse<Candidate>>,

    /// Current best results (max-heap, capped at the beam width)
    pub results: BinaryHeap<Candidate>,
}

impl QueryBuffers {
    pub fn clear(&mut self) {
        self.visited.clear();
        self.candidates.clear();
        self.results.clear();
    }
}

thread_local! {
    static QUERY_BUFFERS: RefCell<QueryBuffers> = RefCell::new(QueryBuffers::default());
}

/// Runs `f` with this thread's buffers, cleared on entry.
pub(crate) fn with_buffers<F, R>(f: F) -> R
where
    F: FnOnce(&mut QueryBuffers) -> R,
{
    QUERY_BUFFERS.with(|buffers| {
        let mut buffers = buffers.borrow_mut();
        buffers.clear();
        f(&mut buffers)
    })
}
