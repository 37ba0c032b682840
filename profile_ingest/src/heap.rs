//! Binary min-heap keyed by a numeric priority.
//!
//! Used wherever ingestion needs to repeatedly pull the smallest item,
//! e.g. merging per-thread event timelines in timestamp order.
//!
//! # Example
//!
//! ```
//! use profile_ingest::heap::MinHeap;
//!
//! let mut heap = MinHeap::with_capacity(4);
//! heap.insert(5.0, "e").unwrap();
//! heap.insert(1.0, "a").unwrap();
//! heap.insert(3.0, "c").unwrap();
//!
//! assert_eq!(heap.extract_min().unwrap().node, "a");
//! assert_eq!(heap.peek_min().map(|n| n.node), Some("c"));
//! ```

use thiserror::Error;

/// Errors returned by [`MinHeap`] operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    #[error("cannot extract from an empty queue")]
    EmptyQueue,

    #[error("priority must not be NaN")]
    InvalidPriority,
}

pub type Result<T> = std::result::Result<T, HeapError>;

/// A value a [`MinHeap`] can be ordered by.
///
/// Tuples compare lexicographically, so `(f64, usize)` orders by the first
/// field and breaks ties with the second.
pub trait Priority: PartialOrd {
    /// False for values outside the total order, i.e. NaN.
    fn is_valid(&self) -> bool;
}

impl Priority for f64 {
    fn is_valid(&self) -> bool {
        !self.is_nan()
    }
}

macro_rules! integer_priority {
    ($($t:ty),*) => {
        $(impl Priority for $t {
            fn is_valid(&self) -> bool {
                true
            }
        })*
    };
}

integer_priority!(u32, u64, usize, i32, i64);

impl<A: Priority, B: Priority> Priority for (A, B) {
    fn is_valid(&self) -> bool {
        self.0.is_valid() && self.1.is_valid()
    }
}

/// A payload paired with the priority it is ordered by.
#[derive(Debug, Clone, PartialEq)]
pub struct HeapNode<T, P = f64> {
    pub priority: P,
    pub node: T,
}

impl<T, P> HeapNode<T, P> {
    pub fn new(priority: P, node: T) -> Self {
        Self { priority, node }
    }
}

/// Array-backed binary min-heap.
///
/// Layout is 0-based: the root lives at index 0 and the children of `i`
/// are `2i + 1` and `2i + 2`. Every parent's priority is `<=` both of its
/// children's priorities. Equal priorities come out in no particular
/// order; use a tuple priority when ties must be broken.
///
/// [`insert`](Self::insert) and [`from_vec`](Self::from_vec) reject NaN
/// priorities with [`HeapError::InvalidPriority`]. Collecting through
/// [`FromIterator`] cannot fail, so it skips those elements instead.
#[derive(Debug, Clone)]
pub struct MinHeap<T, P = f64> {
    heap: Vec<HeapNode<T, P>>,
}

impl<T, P: Priority> Default for MinHeap<T, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, P: Priority> MinHeap<T, P> {
    pub fn new() -> Self {
        Self { heap: Vec::new() }
    }

    /// Create a heap with room for `capacity` elements before reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
        }
    }

    /// Build a heap from unordered nodes in O(n).
    ///
    /// Fails with [`HeapError::InvalidPriority`] if any priority is NaN.
    pub fn from_vec(nodes: Vec<HeapNode<T, P>>) -> Result<Self> {
        if nodes.iter().any(|n| !n.priority.is_valid()) {
            return Err(HeapError::InvalidPriority);
        }
        Ok(Self::heapify(nodes))
    }

    /// Number of elements currently stored.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Allocated slots, always `>= len()`.
    pub fn capacity(&self) -> usize {
        self.heap.capacity()
    }

    pub fn insert(&mut self, priority: P, node: T) -> Result<()> {
        if !priority.is_valid() {
            return Err(HeapError::InvalidPriority);
        }

        self.heap.push(HeapNode::new(priority, node));
        self.sift_up(self.heap.len() - 1);
        Ok(())
    }

    /// The minimum-priority element, without removing it.
    pub fn peek_min(&self) -> Option<&HeapNode<T, P>> {
        self.heap.first()
    }

    /// Remove and return the minimum-priority element.
    pub fn extract_min(&mut self) -> Result<HeapNode<T, P>> {
        if self.heap.is_empty() {
            return Err(HeapError::EmptyQueue);
        }

        let min = self.heap.swap_remove(0);
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        Ok(min)
    }

    /// Drain the heap into a vector ordered by ascending priority.
    pub fn into_sorted_vec(mut self) -> Vec<HeapNode<T, P>> {
        let mut sorted = Vec::with_capacity(self.heap.len());
        while let Ok(node) = self.extract_min() {
            sorted.push(node);
        }
        sorted
    }

    fn heapify(nodes: Vec<HeapNode<T, P>>) -> Self {
        let mut heap = Self { heap: nodes };
        for index in (0..heap.heap.len() / 2).rev() {
            heap.sift_down(index);
        }
        heap
    }

    fn sift_up(&mut self, mut index: usize) {
        // Index 0 is the root and has no parent; reaching it ends the sift.
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.heap[index].priority < self.heap[parent].priority {
                self.heap.swap(index, parent);
                index = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut smallest = index;

            if left < len && self.heap[left].priority < self.heap[smallest].priority {
                smallest = left;
            }
            if right < len && self.heap[right].priority < self.heap[smallest].priority {
                smallest = right;
            }
            if smallest == index {
                break;
            }

            self.heap.swap(index, smallest);
            index = smallest;
        }
    }

    #[cfg(test)]
    fn is_valid(&self) -> bool {
        (1..self.heap.len()).all(|i| self.heap[(i - 1) / 2].priority <= self.heap[i].priority)
    }
}

impl<T, P: Priority> FromIterator<(P, T)> for MinHeap<T, P> {
    /// Bulk-load with a single heapify pass. NaN priorities are skipped.
    fn from_iter<I: IntoIterator<Item = (P, T)>>(iter: I) -> Self {
        let nodes = iter
            .into_iter()
            .filter(|(priority, _)| priority.is_valid())
            .map(|(priority, node)| HeapNode::new(priority, node))
            .collect();
        Self::heapify(nodes)
    }
}
