//! Classical transfer-distance kernel.
//!
//! For one bootstrap tree this computes, for every reference edge, the
//! minimum transfer (Hamming) distance to any bootstrap edge, via the
//! Brehelin–Gascuel–Martin recurrence: two post-order passes fill the
//! intersection matrix `I[e][e'] = |A(e) ∩ A(e')|` and the complement matrix
//! `C[e][e'] = |Ā(e) ∩ A(e')|`, from which the distance of a pair is
//! `|A(e)| + C − I`, complemented to `n − h` when it exceeds `n/2`.
//!
//! Matrices are `u16`; the driver caps the taxon count so the `|A| + C`
//! intermediate cannot wrap.

use crate::error::{invariant_breach, Result};
use crate::tree::{Edge, Tree};

/// Flat row-major matrix; one row per reference edge, one column per
/// bootstrap edge.
struct Matrix {
    data: Vec<u16>,
    cols: usize,
}

impl Matrix {
    fn new(rows: usize, cols: usize) -> Self {
        Matrix {
            data: vec![0; rows * cols],
            cols,
        }
    }

    #[inline]
    fn get(&self, r: usize, c: usize) -> u16 {
        self.data[r * self.cols + c]
    }

    #[inline]
    fn set(&mut self, r: usize, c: usize, v: u16) {
        self.data[r * self.cols + c] = v;
    }

    #[inline]
    fn add(&mut self, r: usize, c: usize, v: u16) {
        self.data[r * self.cols + c] += v;
    }

    /// Adds row `src` into row `dst` element-wise. `dst` is always a parent
    /// edge, so `dst < src` holds by the id ordering of the arena.
    fn add_row(&mut self, dst: usize, src: usize) {
        debug_assert!(dst < src);
        let (head, tail) = self.data.split_at_mut(src * self.cols);
        let dst_row = &mut head[dst * self.cols..dst * self.cols + self.cols];
        let src_row = &tail[..self.cols];
        for (d, s) in dst_row.iter_mut().zip(src_row) {
            *d += *s;
        }
    }
}

/// Per-bootstrap-tree result of the classical kernel.
pub struct TransferOutcome {
    /// Minimum transfer distance per reference edge.
    pub min_dist: Vec<u16>,
    /// Bootstrap edge realising the minimum, per reference edge.
    pub min_edge: Vec<usize>,
}

/// Runs both post-order passes against one bootstrap tree.
///
/// The reference tree must have its splits updated (the cardinalities feed
/// the Hamming step); the bootstrap tree only needs its topology.
pub fn min_transfer_dists(ref_tree: &Tree, alt: &Tree) -> TransferOutcome {
    let m = ref_tree.edges.len();
    let mb = alt.edges.len();
    let n = ref_tree.n_taxa;
    let mut i_mat = Matrix::new(m, mb);
    let mut c_mat = Matrix::new(m, mb);
    let mut min_dist = vec![n as u16; m];
    let mut min_edge = vec![0usize; m];

    let alt_leaf_edges: Vec<(usize, usize)> = alt
        .leaves
        .iter()
        .map(|&l| (alt.nodes[l].parent_edge.expect("leaf off root"), alt.nodes[l].taxon.unwrap()))
        .collect();

    // Pass 1: reference tree post-order, columns fixed to the terminal edges
    // of the bootstrap tree.
    for x in (0..ref_tree.nodes.len()).rev() {
        let Some(e) = ref_tree.nodes[x].parent_edge else {
            continue;
        };
        match ref_tree.nodes[x].taxon {
            Some(t) => {
                for &(be, bt) in &alt_leaf_edges {
                    let hit = (bt == t) as u16;
                    i_mat.set(e, be, hit);
                    c_mat.set(e, be, 1 - hit);
                }
            }
            None => {
                for &ce in &ref_tree.nodes[x].child_edges {
                    i_mat.add_row(e, ce);
                    c_mat.add_row(e, ce);
                }
            }
        }
    }

    // Pass 2: bootstrap tree post-order; internal columns are the sum of
    // their child columns, and every column updates the running minimum.
    let cards: Vec<u16> = ref_tree
        .edges
        .iter()
        .map(|edge| edge.split.count_ones() as u16)
        .collect();
    let half = (n / 2) as u16;
    for v in (0..alt.nodes.len()).rev() {
        let Some(be) = alt.nodes[v].parent_edge else {
            continue;
        };
        if alt.nodes[v].taxon.is_none() {
            for &ce in &alt.nodes[v].child_edges {
                for e in 0..m {
                    i_mat.add(e, be, i_mat.get(e, ce));
                    c_mat.add(e, be, c_mat.get(e, ce));
                }
            }
        }
        for e in 0..m {
            let mut h = cards[e] + c_mat.get(e, be) - i_mat.get(e, be);
            if h > half {
                h = n as u16 - h;
            }
            if h < min_dist[e] {
                min_dist[e] = h;
                min_edge[e] = be;
            }
        }
    }

    TransferOutcome { min_dist, min_edge }
}

/// The taxa that must transfer to turn one bipartition into the other:
/// whichever of the membership-differs / membership-agrees sides is smaller.
/// Its size must equal the recorded minimum distance.
pub fn species_to_move(
    ref_edge: &Edge,
    alt_edge: &Edge,
    dist: usize,
    n_taxa: usize,
) -> Result<Vec<usize>> {
    let mut moved = Vec::new();
    let mut kept = Vec::new();
    for t in 0..n_taxa {
        if ref_edge.split.contains(t) != alt_edge.split.contains(t) {
            moved.push(t);
        } else {
            kept.push(t);
        }
    }
    let chosen = if moved.len() < kept.len() { moved } else { kept };
    if chosen.len() != dist {
        return Err(invariant_breach!(
            "moved species set has {} taxa where the minimum transfer distance is {}",
            chosen.len(),
            dist
        ));
    }
    Ok(chosen)
}

/// Per-tree moved-species counters: for every reference edge whose normalised
/// distance is at or under the cutoff (and deep enough for the cutoff to be
/// meaningful), each taxon of the transfer set is counted once. Also returns
/// the number of qualifying edges.
pub fn moved_species_counts(
    ref_tree: &Tree,
    alt: &Tree,
    outcome: &TransferOutcome,
    dist_cutoff: f64,
) -> Result<(Vec<u32>, u32)> {
    let n = ref_tree.n_taxa;
    let mut moved = vec![0u32; n];
    let mut branches_close = 0u32;
    let min_depth = (1.0 / dist_cutoff + 1.0).ceil() as usize;
    for (e, redge) in ref_tree.edges.iter().enumerate() {
        if ref_tree.is_leaf(redge.child) || redge.topo_depth < 2 {
            continue;
        }
        let norm = outcome.min_dist[e] as f64 / (redge.topo_depth as f64 - 1.0);
        if norm <= dist_cutoff && redge.topo_depth >= min_depth {
            let bedge = &alt.edges[outcome.min_edge[e]];
            for t in species_to_move(redge, bedge, outcome.min_dist[e] as usize, n)? {
                moved[t] += 1;
            }
            branches_close += 1;
        }
    }
    Ok((moved, branches_close))
}
