//! Felsenstein bootstrap kernel: exact bipartition matching.
//!
//! The reference tree's bipartitions are indexed once (canonical form,
//! first-inserted edge as representative); each bootstrap tree then looks up
//! the canonical form of each of its own bipartitions and every hit counts
//! one occurrence for the matched reference edge.

use crate::index::BipartitionIndex;
use crate::tree::Tree;

/// Builds the read-only bipartition index over the reference tree's edges.
/// Splits must be updated beforehand.
pub fn build_index(ref_tree: &Tree) -> BipartitionIndex {
    let n = ref_tree.n_taxa;
    let mut index = BipartitionIndex::with_edge_count(ref_tree.edges.len());
    for (e, edge) in ref_tree.edges.iter().enumerate() {
        index.insert(edge.split.canonical(n), e);
    }
    index
}

/// Resolves every reference edge to the representative edge holding its
/// bipartition's counter. Distinct for all edges except the two root-child
/// edges of a rooted binary tree, which share one split.
pub fn representatives(ref_tree: &Tree, index: &BipartitionIndex) -> Vec<usize> {
    let n = ref_tree.n_taxa;
    ref_tree
        .edges
        .iter()
        .map(|edge| {
            index
                .get(&edge.split.canonical(n))
                .expect("reference edge indexed")
        })
        .collect()
}

/// One bootstrap tree's contribution: the representative reference-edge ids
/// whose bipartition the tree contains.
pub fn matching_edges(index: &BipartitionIndex, alt: &Tree) -> Vec<usize> {
    let n = alt.n_taxa;
    alt.bipartition_edges()
        .into_iter()
        .filter_map(|be| index.get(&alt.edges[be].split.canonical(n)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitset::Bitset;
    use crate::tree::{Taxa, Tree};

    fn prepared(newick: &str) -> (Tree, Taxa) {
        let (mut t, taxa) = Tree::parse_reference(newick).unwrap();
        t.update_splits();
        (t, taxa)
    }

    fn matching(newick: &str, taxa: &Taxa) -> Tree {
        let mut t = Tree::parse_matching(newick, taxa).unwrap();
        t.update_splits();
        t
    }

    #[test]
    fn test_every_reference_edge_resolves() {
        let (r, _) = prepared("(((A,B),C),(D,E));");
        let index = build_index(&r);
        let reps = representatives(&r, &index);
        for (e, &rep) in reps.iter().enumerate() {
            // the representative carries the same canonical split
            assert_eq!(
                r.edges[e].split.canonical(5),
                r.edges[rep].split.canonical(5)
            );
        }
    }

    #[test]
    fn test_foreign_split_misses() {
        let (r, _) = prepared("((A,B),(C,D));");
        let index = build_index(&r);
        // {B, C} is not a split of the reference tree
        let mut bc = Bitset::zeros(1);
        bc.set(1);
        bc.set(2);
        assert_eq!(index.get(&bc.canonical(4)), None);
    }

    #[test]
    fn test_identical_tree_hits_every_bipartition() {
        let (r, taxa) = prepared("((A,B),(C,D));");
        let index = build_index(&r);
        let b = matching("((A,B),(C,D));", &taxa);
        let hits = matching_edges(&index, &b);
        // 4 pendant splits + 1 shared internal split
        assert_eq!(hits.len(), 5);
        let reps = representatives(&r, &index);
        // both internal edges resolve to one representative, and it was hit
        let internal: Vec<usize> = (0..r.edges.len())
            .filter(|&e| !r.is_leaf(r.edges[e].child))
            .collect();
        assert_eq!(reps[internal[0]], reps[internal[1]]);
        assert_eq!(
            hits.iter().filter(|&&h| h == reps[internal[0]]).count(),
            1
        );
    }

    #[test]
    fn test_conflicting_tree_hits_only_pendants() {
        let (r, taxa) = prepared("((A,B),(C,D));");
        let index = build_index(&r);
        let b = matching("((A,C),(B,D));", &taxa);
        let hits = matching_edges(&index, &b);
        let reps = representatives(&r, &index);
        for &h in &hits {
            assert!(r.is_leaf(r.edges[h].child), "unexpected internal hit {h}");
        }
        // no internal representative was matched
        for e in 0..r.edges.len() {
            if !r.is_leaf(r.edges[e].child) {
                assert!(!hits.contains(&reps[e]));
            }
        }
    }
}
