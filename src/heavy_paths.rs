//! Heavy-path decomposition of a bootstrap tree with lazy aggregates.
//!
//! The bootstrap tree is decomposed into heavy paths. Each heavy path is
//! represented by a balanced binary tree of [`PathNode`]s (a "PathTree", PT):
//! internal PT nodes carry min/max aggregates for their subpath and for the
//! pendant subtrees hanging off it, PT leaves correspond to one bootstrap
//! node each and carry that node's own transfer distance. The PT of a pendant
//! heavy path is glued onto the PT leaf of the node it hangs from; the glued
//! whole is the Heavy-Path Tree (HPT), of depth O(log² n).
//!
//! Adding a reference leaf to the walked set means one root-to-leaf descent
//! pushing pending `diff` residues (−1 on the path towards the leaf, +1 off
//! it) and one ascent recomputing the aggregates, so the minimum and maximum
//! transfer distance over every bootstrap node are maintained in
//! O(log² n) per update.

use crate::error::{Error, Result};
use crate::tree::Tree;

/// One node of the Heavy-Path Tree.
///
/// A PT leaf has `node` set (the bootstrap node it stands for) and, unless
/// that node is a bootstrap leaf, `child_heavypath` pointing at the PT root
/// of the pendant heavy path. Internal PT nodes have `left`/`right`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathNode {
    pub left: Option<usize>,
    pub right: Option<usize>,
    pub parent: Option<usize>,
    /// Bootstrap node represented by this PT leaf.
    pub node: Option<usize>,
    pub child_heavypath: Option<usize>,
    pub parent_heavypath: Option<usize>,
    /// Number of PathNodes above this one through the whole HPT.
    pub total_depth: usize,
    pub diff_path: i32,
    pub diff_subtree: i32,
    pub d_min_path: i32,
    pub d_max_path: i32,
    pub d_min_subtree: i32,
    pub d_max_subtree: i32,
}

/// The Heavy-Path Tree over one bootstrap tree.
pub struct Hpt<'t> {
    tree: &'t Tree,
    paths: Vec<PathNode>,
    root: usize,
    /// Bootstrap node id → id of its PT leaf.
    leaf_path: Vec<usize>,
    scratch: Vec<usize>,
}

impl<'t> Hpt<'t> {
    /// Decomposes the tree. The tree must have its transfer-walk state
    /// prepared (subtree sizes, heavy children) and be strictly binary;
    /// any other arity is a structural violation.
    pub fn new(tree: &'t Tree) -> Result<Self> {
        let mut hpt = Hpt {
            tree,
            paths: Vec::new(),
            root: 0,
            leaf_path: vec![usize::MAX; tree.nodes.len()],
            scratch: Vec::new(),
        };
        hpt.root = hpt.decompose(tree.root, 0)?;
        Ok(hpt)
    }

    fn alloc(&mut self) -> usize {
        self.paths.push(PathNode {
            left: None,
            right: None,
            parent: None,
            node: None,
            child_heavypath: None,
            parent_heavypath: None,
            total_depth: 0,
            diff_path: 0,
            diff_subtree: 0,
            d_min_path: 1,
            d_max_path: 0,
            d_min_subtree: 1,
            d_max_subtree: 1,
        });
        self.paths.len() - 1
    }

    /// Builds the PT for the heavy path starting at `top` and, recursively,
    /// the PTs of every pendant heavy path.
    fn decompose(&mut self, top: usize, depth: usize) -> Result<usize> {
        let mut heavypath = vec![top];
        let mut cur = top;
        while self.tree.nodes[cur].taxon.is_none() {
            cur = self.tree.nodes[cur]
                .heavy_child
                .expect("internal node has children");
            heavypath.push(cur);
        }
        if heavypath.len() == 1 {
            self.path_leaf(heavypath[0], depth)
        } else {
            self.partition(&heavypath, depth)
        }
    }

    /// Splits a heavy path in half, building a balanced PT over it.
    fn partition(&mut self, heavypath: &[usize], depth: usize) -> Result<usize> {
        let p = self.alloc();
        self.paths[p].total_depth = depth;

        let l1 = heavypath.len() / 2;
        let left = if l1 == 1 {
            self.path_leaf(heavypath[0], depth + 1)?
        } else {
            self.partition(&heavypath[..l1], depth + 1)?
        };
        self.paths[left].parent = Some(p);
        self.paths[p].left = Some(left);

        let l2 = heavypath.len() - l1;
        let right = if l2 == 1 {
            self.path_leaf(heavypath[l1], depth + 1)?
        } else {
            self.partition(&heavypath[l1..], depth + 1)?
        };
        self.paths[right].parent = Some(p);
        self.paths[p].right = Some(right);

        self.paths[p].d_min_path = self.paths[left].d_min_path.min(self.paths[right].d_min_path);
        self.paths[p].d_max_path = self.paths[left].d_max_path.max(self.paths[right].d_max_path);
        self.paths[p].d_max_subtree = self.paths[left]
            .d_max_subtree
            .max(self.paths[right].d_max_subtree);
        Ok(p)
    }

    /// Builds the PT leaf for one bootstrap node, hanging the pendant heavy
    /// path (the light child's decomposition) off it when the node is
    /// internal.
    fn path_leaf(&mut self, v: usize, depth: usize) -> Result<usize> {
        let p = self.alloc();
        self.paths[p].total_depth = depth;
        self.paths[p].node = Some(v);
        self.leaf_path[v] = p;

        let size = self.tree.nodes[v].subtree_size as i32;
        self.paths[p].d_max_path = size;

        if self.tree.nodes[v].taxon.is_none() {
            let children = &self.tree.nodes[v].children;
            if children.len() != 2 {
                return Err(Error::NotBinary {
                    node: v,
                    children: children.len(),
                });
            }
            let heavy = self.tree.nodes[v].heavy_child.expect("internal node");
            let light = if children[0] == heavy {
                children[1]
            } else {
                children[0]
            };
            let child = self.decompose(light, depth + 1)?;
            self.paths[child].parent_heavypath = Some(p);
            self.paths[p].child_heavypath = Some(child);
            self.paths[p].d_min_subtree = self.paths[child]
                .d_min_path
                .min(self.paths[child].d_min_subtree);
            self.paths[p].d_max_subtree = self.paths[child]
                .d_max_path
                .max(self.paths[child].d_max_subtree);
            self.paths[p].d_min_path = size;
            self.paths[p].d_max_path = size;
        }
        Ok(p)
    }

    /// A PT leaf standing for a bootstrap *leaf* (no pendant heavy path).
    #[inline]
    fn is_hpt_leaf(&self, p: usize) -> bool {
        self.paths[p].node.is_some() && self.paths[p].child_heavypath.is_none()
    }

    /// Minimum transfer distance over all bootstrap nodes.
    pub fn dist_min(&self) -> i32 {
        self.paths[self.root]
            .d_min_path
            .min(self.paths[self.root].d_min_subtree)
    }

    /// Maximum transfer distance over all bootstrap nodes.
    pub fn dist_max(&self) -> i32 {
        self.paths[self.root]
            .d_max_path
            .max(self.paths[self.root].d_max_subtree)
    }

    /// Fills `scratch` with the PathNode ids from the PT leaf of `alt_leaf`
    /// up to the HPT root, following each PT to its root in turn.
    fn fill_path_to_root(&mut self, leaf_path: usize) {
        self.scratch.clear();
        let mut between = Some(leaf_path);
        while let Some(start) = between {
            let mut w = start;
            loop {
                self.scratch.push(w);
                match self.paths[w].parent {
                    Some(p) => w = p,
                    None => break,
                }
            }
            between = self.paths[*self.scratch.last().unwrap()].parent_heavypath;
        }
        debug_assert_eq!(self.scratch.len(), self.paths[leaf_path].total_depth + 1);
    }

    /// Adds a bootstrap leaf to the walked reference subtree: the distance of
    /// every ancestor of the leaf drops by one, every other node's rises by
    /// one, all through lazy residues along a single HPT descent, then one
    /// ascent recomputes the aggregates.
    pub fn add_leaf(&mut self, alt_leaf: usize) {
        let lp = self.leaf_path[alt_leaf];
        self.fill_path_to_root(lp);
        let pathlen = self.scratch.len();

        // Descent (root towards leaf): push residues, settle visited nodes.
        for i in (1..pathlen).rev() {
            let pi = self.scratch[i];
            let below = self.scratch[i - 1];
            if self.paths[pi].node.is_some() {
                // PT leaf en route: `below` is the root of its pendant PT
                let ds = self.paths[pi].diff_subtree;
                self.paths[below].diff_path += ds;
                self.paths[below].diff_subtree += ds;
                let dp = self.paths[pi].diff_path;
                self.paths[pi].d_min_path += dp - 1;
                self.paths[pi].d_max_path = self.paths[pi].d_min_path;
            } else {
                let dp = self.paths[pi].diff_path;
                let ds = self.paths[pi].diff_subtree;
                self.paths[below].diff_path += dp;
                self.paths[below].diff_subtree += ds;
                if self.paths[pi].right == Some(below) {
                    // the left subpath holds ancestors of the leaf: on-path
                    // −1, their pendant subtrees +1
                    let l = self.paths[pi].left.expect("internal PT node");
                    self.paths[l].diff_path += dp - 1;
                    self.paths[l].diff_subtree += ds + 1;
                } else {
                    debug_assert_eq!(self.paths[pi].left, Some(below));
                    // the right subpath is entirely off the leaf's side
                    let r = self.paths[pi].right.expect("internal PT node");
                    self.paths[r].diff_path += dp + 1;
                    self.paths[r].diff_subtree += ds + 1;
                }
            }
            self.paths[pi].diff_path = 0;
            self.paths[pi].diff_subtree = 0;
        }
        let p0 = self.scratch[0];
        debug_assert!(self.is_hpt_leaf(p0));
        let dp = self.paths[p0].diff_path;
        self.paths[p0].d_min_path += dp - 1;
        self.paths[p0].d_max_path = self.paths[p0].d_min_path;
        self.paths[p0].diff_path = 0;
        self.paths[p0].diff_subtree = 0;

        // Ascent: recompute the aggregates along the same path.
        for i in 1..pathlen {
            let pi = self.scratch[i];
            if let Some(child) = self.paths[pi].child_heavypath {
                if self.is_hpt_leaf(child) {
                    let v = self.paths[child].d_min_path;
                    self.paths[pi].d_min_subtree = v;
                    self.paths[pi].d_max_subtree = v;
                } else {
                    self.paths[pi].d_min_subtree = self.paths[child]
                        .d_min_path
                        .min(self.paths[child].d_min_subtree);
                    self.paths[pi].d_max_subtree = self.paths[child]
                        .d_max_path
                        .max(self.paths[child].d_max_subtree);
                }
            } else {
                let l = self.paths[pi].left.expect("internal PT node");
                let r = self.paths[pi].right.expect("internal PT node");
                self.paths[pi].d_min_path = (self.paths[l].d_min_path + self.paths[l].diff_path)
                    .min(self.paths[r].d_min_path + self.paths[r].diff_path);
                self.paths[pi].d_max_path = (self.paths[l].d_max_path + self.paths[l].diff_path)
                    .max(self.paths[r].d_max_path + self.paths[r].diff_path);
                if self.is_hpt_leaf(l) {
                    self.paths[pi].d_min_subtree =
                        self.paths[r].d_min_subtree + self.paths[r].diff_subtree;
                    self.paths[pi].d_max_subtree =
                        self.paths[r].d_max_subtree + self.paths[r].diff_subtree;
                } else if self.is_hpt_leaf(r) {
                    self.paths[pi].d_min_subtree =
                        self.paths[l].d_min_subtree + self.paths[l].diff_subtree;
                    self.paths[pi].d_max_subtree =
                        self.paths[l].d_max_subtree + self.paths[l].diff_subtree;
                } else {
                    self.paths[pi].d_min_subtree = (self.paths[l].d_min_subtree
                        + self.paths[l].diff_subtree)
                        .min(self.paths[r].d_min_subtree + self.paths[r].diff_subtree);
                    self.paths[pi].d_max_subtree = (self.paths[l].d_max_subtree
                        + self.paths[l].diff_subtree)
                        .max(self.paths[r].d_max_subtree + self.paths[r].diff_subtree);
                }
            }
        }
    }

    /// Restores the path from this leaf to the HPT root to the baseline
    /// state, walking up exactly once and clearing the residues it deposited
    /// on the path's siblings.
    pub fn reset_leaf(&mut self, alt_leaf: usize) {
        let mut between = Some(self.leaf_path[alt_leaf]);
        while let Some(start) = between {
            let mut w = start;
            // `w` is a PT leaf here on every round
            self.paths[w].diff_path = 0;
            self.paths[w].diff_subtree = 0;
            let v = self.paths[w].node.expect("PT leaf");
            let size = self.tree.nodes[v].subtree_size as i32;
            self.paths[w].d_min_path = size;
            self.paths[w].d_max_path = size;
            if let Some(child) = self.paths[w].child_heavypath {
                self.paths[w].d_min_subtree = self.paths[child]
                    .d_min_path
                    .min(self.paths[child].d_min_subtree);
                self.paths[w].d_max_subtree = self.paths[child]
                    .d_max_path
                    .max(self.paths[child].d_max_subtree);
            }
            while let Some(p) = self.paths[w].parent {
                w = p;
                self.paths[w].diff_path = 0;
                self.paths[w].diff_subtree = 0;
                let l = self.paths[w].left.expect("internal PT node");
                let r = self.paths[w].right.expect("internal PT node");
                self.paths[w].d_min_path =
                    self.paths[l].d_min_path.min(self.paths[r].d_min_path);
                self.paths[w].d_max_path =
                    self.paths[l].d_max_path.max(self.paths[r].d_max_path);
                self.paths[w].d_min_subtree = 1;
                self.paths[w].d_max_subtree =
                    self.paths[l].d_max_subtree.max(self.paths[r].d_max_subtree);
                self.paths[l].diff_path = 0;
                self.paths[l].diff_subtree = 0;
                self.paths[r].diff_path = 0;
                self.paths[r].diff_subtree = 0;
            }
            between = self.paths[w].parent_heavypath;
        }
    }

    #[cfg(test)]
    fn snapshot(&self) -> Vec<PathNode> {
        self.paths.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Taxa, Tree};

    fn prepared(newick: &str) -> (Tree, Taxa) {
        let (mut t, taxa) = Tree::parse_reference(newick).unwrap();
        t.prepare_transfer_walk();
        (t, taxa)
    }

    #[test]
    fn test_baseline_aggregates() {
        let (t, taxa) = prepared("((((A,B),C),(D,E)),((F,G),H));");
        let hpt = Hpt::new(&t).unwrap();
        // empty walked set: every node sits at its subtree size, so the
        // minimum is a leaf (1) and the maximum is the root (n)
        assert_eq!(hpt.dist_min(), 1);
        assert_eq!(hpt.dist_max(), taxa.len() as i32);
    }

    #[test]
    fn test_every_node_has_a_path_leaf() {
        let (t, _) = prepared("((((A,B),C),(D,E)),((F,G),H));");
        let hpt = Hpt::new(&t).unwrap();
        for v in 0..t.nodes.len() {
            let p = hpt.leaf_path[v];
            assert_ne!(p, usize::MAX, "node {v} unmapped");
            assert_eq!(hpt.paths[p].node, Some(v));
        }
    }

    #[test]
    fn test_add_single_leaf_reaches_zero() {
        let (t, taxa) = prepared("((((A,B),C),(D,E)),((F,G),H));");
        let mut hpt = Hpt::new(&t).unwrap();
        for tx in 0..taxa.len() {
            hpt.add_leaf(t.leaf_of_taxon[tx]);
            // the partner leaf itself is now at distance 0
            assert_eq!(hpt.dist_min(), 0, "taxon {tx}");
            hpt.reset_leaf(t.leaf_of_taxon[tx]);
        }
    }

    #[test]
    fn test_add_then_reset_restores_baseline() {
        let (t, taxa) = prepared("(((A,(B,C)),((D,E),(F,G))),(H,(I,J)));");
        let mut hpt = Hpt::new(&t).unwrap();
        let baseline = hpt.snapshot();
        // several leaves added together, reset in the same order
        let added: Vec<usize> = (0..4).map(|tx| t.leaf_of_taxon[tx]).collect();
        for &l in &added {
            hpt.add_leaf(l);
        }
        assert_ne!(hpt.snapshot(), baseline);
        for &l in &added {
            hpt.reset_leaf(l);
        }
        assert_eq!(hpt.snapshot(), baseline);
        // and all taxa at once
        for tx in 0..taxa.len() {
            hpt.add_leaf(t.leaf_of_taxon[tx]);
        }
        // the walked set equals the whole leaf set: the root distance is 0
        assert_eq!(hpt.dist_min(), 0);
        for tx in 0..taxa.len() {
            hpt.reset_leaf(t.leaf_of_taxon[tx]);
        }
        assert_eq!(hpt.snapshot(), baseline);
    }

    #[test]
    fn test_caterpillar_decomposition() {
        // worst-case shape for the heavy paths
        let (t, _) = prepared("(A,(B,(C,(D,(E,(F,(G,H)))))));");
        let mut hpt = Hpt::new(&t).unwrap();
        let baseline = hpt.snapshot();
        for &l in t.leaves.clone().iter() {
            hpt.add_leaf(l);
            assert_eq!(hpt.dist_min(), 0);
            hpt.reset_leaf(l);
        }
        assert_eq!(hpt.snapshot(), baseline);
    }

    #[test]
    fn test_multifurcation_is_fatal() {
        let (t, _) = prepared("((A,B,C),(D,E));");
        assert!(matches!(Hpt::new(&t), Err(Error::NotBinary { .. })));
    }
}
