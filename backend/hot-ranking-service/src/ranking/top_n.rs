use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

struct Scored<T> {
    score: f64,
    seq: u64,
    value: T,
}

impl<T> PartialEq for Scored<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Scored<T> {}

impl<T> PartialOrd for Scored<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Scored<T> {
    // Higher score ranks higher; on ties the earlier insertion ranks higher.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Fixed-capacity streaming Top-N selection.
///
/// Keeps the `capacity` highest-scoring values seen so far in a min-heap, so
/// pushing P candidates costs O(P log capacity) and memory stays bounded.
pub struct BoundedTopN<T> {
    heap: BinaryHeap<Reverse<Scored<T>>>,
    capacity: usize,
    next_seq: u64,
}

impl<T> BoundedTopN<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
            capacity,
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Lowest score currently retained.
    pub fn min_score(&self) -> Option<f64> {
        self.heap.peek().map(|Reverse(min)| min.score)
    }

    /// Offer a candidate. Returns whether it was retained.
    ///
    /// At capacity a candidate evicts the current minimum only when its
    /// score is strictly greater. NaN scores are rejected.
    pub fn push(&mut self, value: T, score: f64) -> bool {
        if self.capacity == 0 || score.is_nan() {
            return false;
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        if self.heap.len() < self.capacity {
            self.heap.push(Reverse(Scored { score, seq, value }));
            return true;
        }

        match self.heap.peek_mut() {
            Some(mut min) if score > min.0.score => {
                *min = Reverse(Scored { score, seq, value });
                true
            }
            _ => false,
        }
    }

    /// Retained values, highest score first.
    pub fn into_sorted_vec(self) -> Vec<(T, f64)> {
        // Ascending order of Reverse<_> is descending order of score.
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(scored)| (scored.value, scored.score))
            .collect()
    }
}
