//! Rapid transfer-index computation.
//!
//! The reference tree is walked heavy path by heavy path, from the bottom
//! leaf of each path upward. At every step the leaves of the pendant light
//! subtrees are "added" to an accumulator that maintains, for every node v
//! of the bootstrap tree, the rooted transfer distance between the walked
//! reference subtree and the subtree of v — lazily, so one added leaf costs
//! far less than a full traversal. After the additions at a step, the
//! accumulator's minimum and maximum give the transfer index of the current
//! reference node; the rooted transfer index of the edge above node u is
//! `min(ti_min[u], n − ti_max[u])`.
//!
//! Two accumulators implement the seam: [`Hpt`] (the O(log² n) Heavy-Path
//! Tree) and [`LazyState`], which keeps the per-node `d_lazy`/`diff`/
//! `d_min`/`d_max` state directly on the bootstrap tree and pays O(depth)
//! per leaf. The direct form is the oracle the HPT is checked against.

use crate::error::Result;
use crate::heavy_paths::Hpt;
use crate::tree::Tree;

/// The seam between the reference-tree walk and a bootstrap-side state.
pub trait TransferAccumulator {
    /// Adds one bootstrap leaf to the walked set.
    fn add_leaf(&mut self, alt_leaf: usize);
    /// Removes the contribution of one previously added bootstrap leaf.
    fn reset_leaf(&mut self, alt_leaf: usize);
    /// Minimum transfer distance over all bootstrap nodes.
    fn dist_min(&self) -> i32;
    /// Maximum transfer distance over all bootstrap nodes.
    fn dist_max(&self) -> i32;
}

impl TransferAccumulator for Hpt<'_> {
    fn add_leaf(&mut self, alt_leaf: usize) {
        Hpt::add_leaf(self, alt_leaf);
    }
    fn reset_leaf(&mut self, alt_leaf: usize) {
        Hpt::reset_leaf(self, alt_leaf);
    }
    fn dist_min(&self) -> i32 {
        Hpt::dist_min(self)
    }
    fn dist_max(&self) -> i32 {
        Hpt::dist_max(self)
    }
}

/// Per-node lazy transfer distances kept directly on the bootstrap tree.
///
/// Baseline: `d_lazy[v] = d_max[v] = subtreesize(v)` (the distance to the
/// empty walked set), `d_min[v] = 1` (every subtree contains a leaf at
/// distance 1), `diff[v] = 0`.
pub struct LazyState<'t> {
    tree: &'t Tree,
    d_lazy: Vec<i32>,
    diff: Vec<i32>,
    d_min: Vec<i32>,
    d_max: Vec<i32>,
    scratch: Vec<usize>,
}

impl<'t> LazyState<'t> {
    pub fn new(tree: &'t Tree) -> Self {
        let sizes: Vec<i32> = tree.nodes.iter().map(|nd| nd.subtree_size as i32).collect();
        LazyState {
            tree,
            d_lazy: sizes.clone(),
            diff: vec![0; tree.nodes.len()],
            d_min: vec![1; tree.nodes.len()],
            d_max: sizes,
            scratch: Vec::new(),
        }
    }

    fn fill_path_to_root(&mut self, leaf: usize) {
        self.scratch.clear();
        let mut v = Some(leaf);
        while let Some(u) = v {
            self.scratch.push(u);
            v = self.tree.nodes[u].parent;
        }
    }
}

impl TransferAccumulator for LazyState<'_> {
    fn add_leaf(&mut self, alt_leaf: usize) {
        self.fill_path_to_root(alt_leaf);
        let pathlen = self.scratch.len();
        // Descent: apply and push the pending residues; ancestors of the
        // leaf drop by one, subtrees off the path rise by one.
        for i in (1..pathlen).rev() {
            let v = self.scratch[i];
            let below = self.scratch[i - 1];
            let dv = self.diff[v];
            self.d_lazy[v] += dv - 1;
            self.diff[below] += dv;
            for k in 0..self.tree.nodes[v].children.len() {
                let c = self.tree.nodes[v].children[k];
                if c != below {
                    self.diff[c] += dv + 1;
                }
            }
            self.diff[v] = 0;
        }
        self.d_lazy[alt_leaf] += self.diff[alt_leaf] - 1;
        self.diff[alt_leaf] = 0;

        // Ascent: rebuild min/max from the settled values.
        self.d_min[alt_leaf] = self.d_lazy[alt_leaf];
        self.d_max[alt_leaf] = self.d_lazy[alt_leaf];
        for i in 1..pathlen {
            let v = self.scratch[i];
            let mut lo = self.d_lazy[v];
            let mut hi = self.d_lazy[v];
            for k in 0..self.tree.nodes[v].children.len() {
                let c = self.tree.nodes[v].children[k];
                lo = lo.min(self.d_min[c] + self.diff[c]);
                hi = hi.max(self.d_max[c] + self.diff[c]);
            }
            self.d_min[v] = lo;
            self.d_max[v] = hi;
        }
    }

    fn reset_leaf(&mut self, alt_leaf: usize) {
        let mut v = Some(alt_leaf);
        while let Some(u) = v {
            self.d_lazy[u] = self.tree.nodes[u].subtree_size as i32;
            self.d_max[u] = self.tree.nodes[u].subtree_size as i32;
            self.d_min[u] = 1;
            self.diff[u] = 0;
            for k in 0..self.tree.nodes[u].children.len() {
                let c = self.tree.nodes[u].children[k];
                self.diff[c] = 0;
            }
            v = self.tree.nodes[u].parent;
        }
    }

    fn dist_min(&self) -> i32 {
        self.d_min[self.tree.root]
    }

    fn dist_max(&self) -> i32 {
        self.d_max[self.tree.root]
    }
}

/// Walks every heavy path of the reference tree against the accumulator and
/// returns, per reference edge, the rooted transfer index
/// `min(ti_min, n − ti_max)` of the node below it.
pub fn walk_transfer_indices<A: TransferAccumulator>(ref_tree: &Tree, alt: &Tree, acc: &mut A) -> Vec<u16> {
    let n = ref_tree.n_taxa as i32;
    let mut ti_min = vec![0i32; ref_tree.nodes.len()];
    let mut ti_max = vec![0i32; ref_tree.nodes.len()];

    for &start in &ref_tree.leaves {
        // ascend while on the heavy side, adding the pendant light leaves
        let mut u = Some(start);
        while let Some(v) = u {
            match ref_tree.nodes[v].taxon {
                Some(t) => acc.add_leaf(alt.leaf_of_taxon[t]),
                None => {
                    for &t in &ref_tree.nodes[v].light_leaves {
                        acc.add_leaf(alt.leaf_of_taxon[t]);
                    }
                }
            }
            ti_min[v] = acc.dist_min();
            ti_max[v] = acc.dist_max();
            u = heavy_parent(ref_tree, v);
        }
        // release the same leaves before the next heavy path
        let mut u = Some(start);
        while let Some(v) = u {
            match ref_tree.nodes[v].taxon {
                Some(t) => acc.reset_leaf(alt.leaf_of_taxon[t]),
                None => {
                    for &t in &ref_tree.nodes[v].light_leaves {
                        acc.reset_leaf(alt.leaf_of_taxon[t]);
                    }
                }
            }
            u = heavy_parent(ref_tree, v);
        }
    }

    let mut out = vec![0u16; ref_tree.edges.len()];
    for v in 0..ref_tree.nodes.len() {
        if let Some(e) = ref_tree.nodes[v].parent_edge {
            out[e] = ti_min[v].min(n - ti_max[v]) as u16;
        }
    }
    out
}

/// Next node up when the current one is its parent's heavy child.
fn heavy_parent(tree: &Tree, v: usize) -> Option<usize> {
    let p = tree.nodes[v].parent?;
    (tree.nodes[p].heavy_child == Some(v)).then_some(p)
}

/// Rapid TBE kernel: transfer index of every reference edge against one
/// bootstrap tree, through the Heavy-Path Tree. Both trees need their
/// transfer-walk state prepared; the bootstrap tree must be binary.
pub fn transfer_indices(ref_tree: &Tree, alt: &Tree) -> Result<Vec<u16>> {
    let mut hpt = Hpt::new(alt)?;
    Ok(walk_transfer_indices(ref_tree, alt, &mut hpt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::min_transfer_dists;
    use crate::tree::{random_binary_newick, Taxa, Tree};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn prepared(newick: &str) -> (Tree, Taxa) {
        let (mut t, taxa) = Tree::parse_reference(newick).unwrap();
        t.update_splits();
        t.prepare_transfer_walk();
        (t, taxa)
    }

    fn matching(newick: &str, taxa: &Taxa) -> Tree {
        let mut t = Tree::parse_matching(newick, taxa).unwrap();
        t.update_splits();
        t.prepare_transfer_walk();
        t
    }

    /// Classical, direct-lazy and HPT kernels on the same pair of trees, for
    /// every edge deep enough to matter.
    fn assert_kernels_agree(r: &Tree, b: &Tree) {
        let classical = min_transfer_dists(r, b);
        let mut lazy = LazyState::new(b);
        let direct = walk_transfer_indices(r, b, &mut lazy);
        let hpt = transfer_indices(r, b).unwrap();
        for e in 0..r.edges.len() {
            if r.edges[e].topo_depth < 2 {
                continue;
            }
            assert_eq!(
                classical.min_dist[e], direct[e],
                "edge {e}: classical vs direct"
            );
            assert_eq!(direct[e], hpt[e], "edge {e}: direct vs HPT");
        }
    }

    #[test]
    fn test_identical_trees_index_zero() {
        let (r, taxa) = prepared("((((A,B),C),(D,E)),((F,G),H));");
        let b = matching("((((A,B),C),(D,E)),((F,G),H));", &taxa);
        let out = transfer_indices(&r, &b).unwrap();
        for e in 0..r.edges.len() {
            assert_eq!(out[e], 0, "edge {e}");
        }
    }

    #[test]
    fn test_conflicting_quartet() {
        let (r, taxa) = prepared("((A,B),(C,D));");
        let b = matching("((A,C),(B,D));", &taxa);
        let out = transfer_indices(&r, &b).unwrap();
        for e in 0..r.edges.len() {
            if !r.is_leaf(r.edges[e].child) {
                assert_eq!(out[e], 1, "edge {e}");
            }
        }
    }

    #[test]
    fn test_kernels_agree_small_fixed_trees() {
        let (r, taxa) = prepared("(((A,B),C),(D,E));");
        for alt in ["(((A,B),C),(D,E));", "(((A,C),B),(D,E));", "((A,(D,E)),(B,C));"] {
            let b = matching(alt, &taxa);
            assert_kernels_agree(&r, &b);
        }
    }

    #[test]
    fn test_kernels_agree_random_trees() {
        let names: Vec<String> = (0..24).map(|i| format!("t{i:02}")).collect();
        let refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        let mut rng = StdRng::seed_from_u64(421);
        for _ in 0..8 {
            let (r, taxa) = prepared(&random_binary_newick(&refs, &mut rng));
            for _ in 0..4 {
                let b = matching(&random_binary_newick(&refs, &mut rng), &taxa);
                assert_kernels_agree(&r, &b);
            }
        }
    }

    #[test]
    fn test_index_bounded_by_depth() {
        let names: Vec<String> = (0..16).map(|i| format!("x{i:02}")).collect();
        let refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        let mut rng = StdRng::seed_from_u64(99);
        let (r, taxa) = prepared(&random_binary_newick(&refs, &mut rng));
        for _ in 0..6 {
            let b = matching(&random_binary_newick(&refs, &mut rng), &taxa);
            let out = transfer_indices(&r, &b).unwrap();
            for e in 0..r.edges.len() {
                if r.edges[e].topo_depth >= 2 {
                    assert!((out[e] as usize) <= r.edges[e].topo_depth - 1);
                }
            }
        }
    }

    #[test]
    fn test_accumulator_state_reusable_across_paths() {
        // The same accumulator serves every heavy path of the walk; after a
        // full walk it must be back at baseline and usable again.
        let (r, taxa) = prepared("((((A,B),C),(D,E)),((F,G),H));");
        let b = matching("(((A,(B,C)),(D,E)),((F,H),G));", &taxa);
        let first = transfer_indices(&r, &b).unwrap();
        let mut hpt = Hpt::new(&b).unwrap();
        let second = walk_transfer_indices(&r, &b, &mut hpt);
        let third = walk_transfer_indices(&r, &b, &mut hpt);
        assert_eq!(first, second);
        assert_eq!(second, third);
    }
}
