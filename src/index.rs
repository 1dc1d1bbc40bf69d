//! Bipartition index: a hash map from bipartition bitsets to edge ids.
//!
//! The FBP kernel populates this once from the reference tree and then only
//! reads it while bootstrap trees are processed in parallel, so the structure
//! is deliberately simple: chained buckets of `(Bitset, id)` pairs, resolved
//! by full bitset equality, rehashed by capacity doubling when the load
//! factor threshold is crossed.
//!
//! Keys are expected to be in canonical form (see [`Bitset::canonical`]);
//! the index itself does not canonicalise.

use crate::bitset::Bitset;

/// Default load factor above which the bucket array is doubled.
pub const DEFAULT_LOAD_FACTOR: f32 = 0.75;

/// Hash map keyed by bipartition bitsets, valued by reference-edge ids.
#[derive(Debug, Clone)]
pub struct BipartitionIndex {
    buckets: Vec<Vec<(Bitset, usize)>>,
    load_factor: f32,
    len: usize,
}

impl BipartitionIndex {
    /// Creates an index with the given initial bucket count.
    pub fn new(capacity: usize, load_factor: f32) -> Self {
        BipartitionIndex {
            buckets: vec![Vec::new(); capacity.max(1)],
            load_factor,
            len: 0,
        }
    }

    /// Creates an index sized for a reference tree with `nb_edges` edges.
    pub fn with_edge_count(nb_edges: usize) -> Self {
        Self::new(nb_edges * 2, DEFAULT_LOAD_FACTOR)
    }

    /// Number of stored bipartitions.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn bucket_of(&self, key: &Bitset) -> usize {
        key.hash_code() as usize % self.buckets.len()
    }

    /// Inserts `(key, id)`. If the key is already present the existing entry
    /// wins: the first edge inserted for a bipartition stays its
    /// representative (both root-child edges of a rooted tree carry the same
    /// unrooted bipartition and must resolve to one counter).
    pub fn insert(&mut self, key: Bitset, id: usize) {
        if (self.len + 1) as f32 > self.load_factor * self.buckets.len() as f32 {
            self.rehash();
        }
        let b = self.bucket_of(&key);
        let bucket = &mut self.buckets[b];
        if bucket.iter().any(|(k, _)| *k == key) {
            return;
        }
        bucket.push((key, id));
        self.len += 1;
    }

    /// Looks up the edge id stored for `key`, scanning the bucket with full
    /// bitset equality.
    pub fn get(&self, key: &Bitset) -> Option<usize> {
        let b = self.bucket_of(key);
        self.buckets[b]
            .iter()
            .find(|(k, _)| k == key)
            .map(|&(_, id)| id)
    }

    /// Doubles the bucket array and redistributes all entries.
    fn rehash(&mut self) {
        let new_cap = self.buckets.len() * 2;
        let old = std::mem::replace(&mut self.buckets, vec![Vec::new(); new_cap]);
        for bucket in old {
            for (key, id) in bucket {
                let b = key.hash_code() as usize % new_cap;
                self.buckets[b].push((key, id));
            }
        }
    }
}
