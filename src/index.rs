use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use ordered_float::OrderedFloat;

use crate::vector::cosine_distance;

/// Heap entry. Ordered by distance, then by insertion sequence, so the
/// max-heap top is always the current worst candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    dist: OrderedFloat<f32>,
    seq: usize,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist.cmp(&other.dist).then(self.seq.cmp(&other.seq))
    }
}
impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub id: u128,
    pub vector: Vec<f32>,
    /// Position of the full record in the segment
    pub offset: u64,
}

/// Exact cosine nearest-neighbour index. Every query scans all entries, so
/// results never miss a closer record.
#[derive(Debug, Default)]
pub struct FlatIndex {
    entries: Vec<Entry>,
    by_id: HashMap<u128, usize>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: u128) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Returns false when `id` is already indexed; the index is left untouched.
    pub fn insert(&mut self, id: u128, vector: Vec<f32>, offset: u64) -> bool {
        if self.by_id.contains_key(&id) {
            return false;
        }
        self.by_id.insert(id, self.entries.len());
        self.entries.push(Entry { id, vector, offset });
        true
    }

    /// Top-`k` entries closest to `query`, closest first, with their distances.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(&Entry, f32)> {
        let k = k.min(self.entries.len());
        if k == 0 {
            return vec![];
        }

        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k);
        for (seq, entry) in self.entries.iter().enumerate() {
            let dist = OrderedFloat(cosine_distance(query, &entry.vector));
            if heap.len() < k {
                heap.push(Candidate { dist, seq });
            } else if let Some(worst) = heap.peek() {
                if dist < worst.dist {
                    heap.pop();
                    heap.push(Candidate { dist, seq });
                }
            }
        }

        heap.into_sorted_vec()
            .into_iter()
            .map(|c| (&self.entries[c.seq], c.dist.into_inner()))
            .collect()
    }
}
