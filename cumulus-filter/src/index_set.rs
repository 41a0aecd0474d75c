//! Point index masks.
//!
//! An [`IndexSet`] names the active points of a node against a filter: a
//! sorted, deduplicated list of indices into the node's own point arrays.
//! Combinators intersect and union these sets instead of re-scanning
//! payloads.

use serde::{Deserialize, Serialize};

/// Sorted, deduplicated set of point indices.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexSet(Vec<u32>);

impl IndexSet {
    /// The empty set.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// The full set `0..n`.
    pub fn full(n: u32) -> Self {
        Self((0..n).collect())
    }

    /// Build from indices that are already sorted and unique.
    pub fn from_sorted(indices: Vec<u32>) -> Self {
        debug_assert!(
            indices.windows(2).all(|w| w[0] < w[1]),
            "indices must be sorted and unique"
        );
        Self(indices)
    }

    /// Build from arbitrary indices (sorts and deduplicates).
    pub fn from_unsorted(mut indices: Vec<u32>) -> Self {
        indices.sort_unstable();
        indices.dedup();
        Self(indices)
    }

    /// Number of active indices.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no index is active.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `index` is active.
    pub fn contains(&self, index: u32) -> bool {
        self.0.binary_search(&index).is_ok()
    }

    /// Iterate the active indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }

    /// The active indices as a slice.
    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    /// Set intersection (both sorted: linear merge).
    pub fn intersect(&self, other: &IndexSet) -> IndexSet {
        let mut out = Vec::with_capacity(self.len().min(other.len()));
        let (mut i, mut j) = (0, 0);
        while i < self.0.len() && j < other.0.len() {
            match self.0[i].cmp(&other.0[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    out.push(self.0[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        IndexSet(out)
    }

    /// Set union (both sorted: linear merge).
    pub fn union(&self, other: &IndexSet) -> IndexSet {
        let mut out = Vec::with_capacity(self.len() + other.len());
        let (mut i, mut j) = (0, 0);
        while i < self.0.len() && j < other.0.len() {
            match self.0[i].cmp(&other.0[j]) {
                std::cmp::Ordering::Less => {
                    out.push(self.0[i]);
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    out.push(other.0[j]);
                    j += 1;
                }
                std::cmp::Ordering::Equal => {
                    out.push(self.0[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        out.extend_from_slice(&self.0[i..]);
        out.extend_from_slice(&other.0[j..]);
        IndexSet(out)
    }
}

impl FromIterator<u32> for IndexSet {
    fn from_iter<T: IntoIterator<Item = u32>>(iter: T) -> Self {
        Self::from_unsorted(iter.into_iter().collect())
    }
}
