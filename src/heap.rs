//! Bounded top-k selection.
//!
//! [`TopK`] keeps the `k` greatest items of a stream without materializing or sorting the whole
//! stream. Internally it is a min-heap of capacity `k`: while under capacity every item is pushed;
//! once full, a candidate replaces the current minimum only if it is strictly greater. Each offer
//! costs O(log k).
//!
//! "Greatest" is whatever the item's [`Ord`] says, so callers encode their ranking (including
//! tie-breaks) in the item type. See [`Ranked`] for score/id pairs.

use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
};

#[derive(Debug, Clone)]
pub struct TopK<T: Ord> {
    capacity: usize,
    heap: BinaryHeap<Reverse<T>>,
}

impl<T: Ord> TopK<T> {
    /// Keep at most `capacity` items. Storage grows with the items actually retained, so a
    /// capacity far beyond the stream length costs nothing.
    pub fn new(capacity: usize) -> Self {
        TopK {
            capacity,
            heap: BinaryHeap::new(),
        }
    }

    /// Like [`TopK::new`], preallocating for a stream of about `expected` items.
    pub fn with_expected(capacity: usize, expected: usize) -> Self {
        TopK {
            capacity,
            heap: BinaryHeap::with_capacity(capacity.min(expected)),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// The smallest retained item, i.e. the one evicted next.
    pub fn min(&self) -> Option<&T> {
        self.heap.peek().map(|Reverse(item)| item)
    }

    /// Offer a candidate. Returns true if it was retained.
    pub fn offer(&mut self, item: T) -> bool {
        if self.capacity == 0 {
            return false;
        }
        if self.heap.len() < self.capacity {
            self.heap.push(Reverse(item));
            return true;
        }
        match self.heap.peek_mut() {
            Some(mut smallest) if item > smallest.0 => {
                *smallest = Reverse(item);
                true
            }
            _ => false,
        }
    }

    /// Retained items, greatest first.
    pub fn into_sorted_vec(self) -> Vec<T> {
        // BinaryHeap<Reverse<T>>::into_sorted_vec is ascending in Reverse<T>, i.e. descending in T.
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(item)| item)
            .collect()
    }
}

impl<T: Ord> Extend<T> for TopK<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.offer(item);
        }
    }
}

/// A score paired with an id. Higher scores rank greater; on equal scores the *smaller* id ranks
/// greater, so a descending sort lists ties in ascending id order.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked<S> {
    pub score: S,
    pub id: String,
}

/// Ordering for any totally-ordered score.
pub trait Score: PartialOrd + Copy {
    fn total_cmp(&self, other: &Self) -> Ordering;
}

impl Score for usize {
    fn total_cmp(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }
}

impl Score for f32 {
    fn total_cmp(&self, other: &Self) -> Ordering {
        f32::total_cmp(self, other)
    }
}

impl Score for f64 {
    fn total_cmp(&self, other: &Self) -> Ordering {
        f64::total_cmp(self, other)
    }
}

impl<S: Score> Eq for Ranked<S> {}

impl<S: Score> PartialOrd for Ranked<S> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<S: Score> Ord for Ranked<S> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.id.cmp(&self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn ranked(score: usize, id: &str) -> Ranked<usize> {
        Ranked {
            score,
            id: id.to_string(),
        }
    }

    #[test]
    fn test_keeps_k_greatest() {
        let mut top = TopK::new(3);
        top.extend([5, 1, 9, 3, 7, 2, 8]);
        assert_eq!(top.into_sorted_vec(), vec![9, 8, 7]);
    }

    #[test]
    fn test_under_capacity_keeps_everything() {
        let mut top = TopK::new(10);
        top.extend([2, 1]);
        assert_eq!(top.len(), 2);
        assert_eq!(top.into_sorted_vec(), vec![2, 1]);
    }

    #[test]
    fn test_huge_capacity_allocates_lazily() {
        let mut top = TopK::new(usize::MAX);
        top.extend([3, 1, 2]);
        assert_eq!(top.into_sorted_vec(), vec![3, 2, 1]);

        let mut top = TopK::with_expected(usize::MAX, 2);
        top.extend([5, 4]);
        assert_eq!(top.len(), 2);
    }

    #[test]
    fn test_zero_capacity() {
        let mut top = TopK::new(0);
        assert!(!top.offer(1));
        assert!(top.is_empty());
    }

    #[test]
    fn test_equal_candidate_does_not_evict() {
        let mut top = TopK::new(1);
        assert!(top.offer(ranked(3, "b")));
        // Same score, larger id ranks lower: rejected.
        assert!(!top.offer(ranked(3, "c")));
        // Same score, smaller id ranks higher: replaces.
        assert!(top.offer(ranked(3, "a")));
        assert_eq!(top.min().map(|r| r.id.as_str()), Some("a"));
    }

    #[test]
    fn test_ranked_tie_break_ascending_id() {
        let mut top = TopK::new(3);
        top.extend([
            ranked(2, "d"),
            ranked(5, "z"),
            ranked(2, "b"),
            ranked(2, "c"),
            ranked(1, "a"),
        ]);
        let ids: Vec<_> = top.into_sorted_vec().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["z", "b", "c"]);
    }

    #[test]
    fn test_matches_full_sort() {
        // Deterministic pseudo-random scores with many ties.
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let items: Vec<Ranked<usize>> = (0..500)
            .map(|i| {
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                ranked((seed % 17) as usize, &format!("n{i:03}"))
            })
            .collect();
        for k in [1, 2, 7, 50, 499, 500, 800] {
            let mut top = TopK::new(k);
            top.extend(items.iter().cloned());
            let mut sorted = items.clone();
            sorted.sort_by(|a, b| b.cmp(a));
            sorted.truncate(k);
            assert_eq!(top.into_sorted_vec(), sorted, "k = {k}");
        }
    }
}
