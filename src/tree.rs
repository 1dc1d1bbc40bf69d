//! Arena tree model for support computation.
//!
//! # Overview
//! The external parser (`phylotree`) produces a generic tree; this module
//! converts it into an edge-indexed arena tailored to the support kernels:
//! nodes and edges live in flat vectors, every cross-reference is an index,
//! and freeing a tree is dropping the two vectors.
//!
//! Node ids are assigned in preorder, so a child's id and the id of the edge
//! above it are always greater than the parent's. Iterating ids in reverse is
//! therefore a valid post-order; the kernels rely on this.
//!
//! # CRITICAL: Why we key leaves by taxon NAMES not node IDs
//! Node ids are assigned during parsing and differ across files. Taxon names
//! are consistent. The reference tree fixes the name table (sorted
//! alphabetically), and every bootstrap tree is mapped onto the same bit
//! positions through it.

use std::collections::HashMap;

use phylotree::tree::Tree as PhyloTree;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::bitset::Bitset;
use crate::error::{Error, Result};

/// The leaf name table: reference-tree taxon names sorted alphabetically,
/// assigning each name a stable id in `[0, n)`.
#[derive(Debug, Clone)]
pub struct Taxa {
    names: Vec<String>,
    ids: HashMap<String, usize>,
}

impl Taxa {
    /// Builds the table from the (unsorted) leaf names of the reference tree.
    /// Duplicated names are rejected.
    pub fn new(mut names: Vec<String>) -> Result<Self> {
        names.sort();
        for pair in names.windows(2) {
            if pair[0] == pair[1] {
                return Err(Error::TaxaMismatch(format!(
                    "taxon {} appears more than once in the reference tree",
                    pair[0]
                )));
            }
        }
        let ids = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        Ok(Taxa { names, ids })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn id_of(&self, name: &str) -> Option<usize> {
        self.ids.get(name).copied()
    }

    pub fn name_of(&self, id: usize) -> &str {
        &self.names[id]
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A tree node. Topology is immutable after construction; the auxiliary
/// fields (`subtree_size`, `heavy_child`, `light_leaves`) are filled by
/// [`Tree::prepare_transfer_walk`].
#[derive(Debug, Clone)]
pub struct Node {
    pub name: Option<String>,
    pub parent: Option<usize>,
    /// Edge towards the parent; `None` at the root.
    pub parent_edge: Option<usize>,
    pub children: Vec<usize>,
    pub child_edges: Vec<usize>,
    /// Taxon id for leaves, `None` for internal nodes.
    pub taxon: Option<usize>,
    /// Number of edges between this node and the root.
    pub depth: usize,
    pub subtree_size: usize,
    /// Child of maximal subtree size; ties go to the lowest child id.
    pub heavy_child: Option<usize>,
    /// Taxon ids found in the subtrees of non-heavy children.
    pub light_leaves: Vec<usize>,
}

/// An edge, oriented away from the root: `parent` is the root side, `child`
/// the far side. The bipartition bitset holds the leaves reachable through
/// `child` and is filled by [`Tree::update_splits`].
#[derive(Debug, Clone)]
pub struct Edge {
    pub parent: usize,
    pub child: usize,
    pub length: Option<f64>,
    pub split: Bitset,
    /// `min(|B|, n - |B|)` for the child-side bipartition B.
    pub topo_depth: usize,
    pub support: Option<f64>,
}

/// Rooted, edge-indexed tree over the shared taxon table.
#[derive(Debug, Clone)]
pub struct Tree {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub root: usize,
    /// Node ids of the leaves, in preorder.
    pub leaves: Vec<usize>,
    /// Taxon id → leaf node id. This is how leaf partners between two trees
    /// are resolved without mutating either tree.
    pub leaf_of_taxon: Vec<usize>,
    pub n_taxa: usize,
    pub words: usize,
}

impl Tree {
    /// Parses the reference tree, deriving the taxon table from its leaves.
    pub fn parse_reference(newick: &str) -> Result<(Tree, Taxa)> {
        let ptree = PhyloTree::from_newick(newick).map_err(|e| Error::Parse(e.to_string()))?;
        let mut names = Vec::new();
        for leaf_id in ptree.get_leaves() {
            let node = ptree.get(&leaf_id).map_err(|e| Error::Parse(e.to_string()))?;
            let name = node
                .name
                .clone()
                .ok_or_else(|| Error::Parse("unnamed leaf in the reference tree".into()))?;
            names.push(name);
        }
        if names.is_empty() {
            return Err(Error::Parse("reference tree has no leaves".into()));
        }
        let taxa = Taxa::new(names)?;
        let tree = Self::from_phylo(&ptree, &taxa)?;
        Ok((tree, taxa))
    }

    /// Parses a bootstrap tree against the fixed taxon table. Any leaf that
    /// is missing, duplicated or unknown makes the tree unusable.
    pub fn parse_matching(newick: &str, taxa: &Taxa) -> Result<Tree> {
        let ptree = PhyloTree::from_newick(newick).map_err(|e| Error::Parse(e.to_string()))?;
        Self::from_phylo(&ptree, taxa)
    }

    fn from_phylo(ptree: &PhyloTree, taxa: &Taxa) -> Result<Tree> {
        let root_id = ptree.get_root().map_err(|e| Error::Parse(e.to_string()))?;
        let n = taxa.len();
        let words = n.div_ceil(64);
        let mut tree = Tree {
            nodes: Vec::new(),
            edges: Vec::new(),
            root: 0,
            leaves: Vec::new(),
            leaf_of_taxon: vec![usize::MAX; n],
            n_taxa: n,
            words,
        };
        let mut seen = vec![false; n];
        // preorder construction; children pushed in reverse so they pop in
        // left-to-right order
        let mut stack: Vec<(usize, Option<usize>)> = vec![(root_id, None)];
        while let Some((pid, parent)) = stack.pop() {
            let pnode = ptree.get(&pid).map_err(|e| Error::Parse(e.to_string()))?;
            let id = tree.nodes.len();
            let depth = parent.map_or(0, |p| tree.nodes[p].depth + 1);
            let parent_edge = match parent {
                None => None,
                Some(p) => {
                    let e = tree.edges.len();
                    tree.edges.push(Edge {
                        parent: p,
                        child: id,
                        length: pnode.parent_edge,
                        split: Bitset::zeros(words),
                        topo_depth: 0,
                        support: None,
                    });
                    tree.nodes[p].children.push(id);
                    tree.nodes[p].child_edges.push(e);
                    Some(e)
                }
            };
            let taxon = if pnode.children.is_empty() {
                let name = pnode
                    .name
                    .clone()
                    .ok_or_else(|| Error::Parse("unnamed leaf".into()))?;
                let t = taxa.id_of(&name).ok_or_else(|| {
                    Error::TaxaMismatch(format!("taxon {name} is absent from the reference tree"))
                })?;
                if seen[t] {
                    return Err(Error::TaxaMismatch(format!("taxon {name} appears twice")));
                }
                seen[t] = true;
                tree.leaves.push(id);
                tree.leaf_of_taxon[t] = id;
                Some(t)
            } else {
                None
            };
            tree.nodes.push(Node {
                name: pnode.name.clone(),
                parent,
                parent_edge,
                children: Vec::new(),
                child_edges: Vec::new(),
                taxon,
                depth,
                subtree_size: 0,
                heavy_child: None,
                light_leaves: Vec::new(),
            });
            for &c in pnode.children.iter().rev() {
                stack.push((c, Some(id)));
            }
        }
        if tree.leaves.len() != n {
            return Err(Error::TaxaMismatch(format!(
                "tree has {} leaves where the reference has {}",
                tree.leaves.len(),
                n
            )));
        }
        Ok(tree)
    }

    #[inline]
    pub fn is_leaf(&self, v: usize) -> bool {
        self.nodes[v].taxon.is_some()
    }

    /// True when every internal node has exactly two children — the shape
    /// the heavy-path decomposition requires.
    pub fn is_binary(&self) -> bool {
        self.nodes
            .iter()
            .all(|nd| nd.taxon.is_some() || nd.children.len() == 2)
    }

    /// Fills every edge's bipartition bitset (post-order union) and its
    /// topological depth.
    pub fn update_splits(&mut self) {
        let n = self.n_taxa;
        for x in (0..self.nodes.len()).rev() {
            let Some(e) = self.nodes[x].parent_edge else {
                continue;
            };
            let split = match self.nodes[x].taxon {
                Some(t) => {
                    let mut b = Bitset::zeros(self.words);
                    b.set(t);
                    b
                }
                None => {
                    let mut acc = Bitset::zeros(self.words);
                    for &ce in &self.nodes[x].child_edges {
                        acc.or_assign(&self.edges[ce].split);
                    }
                    acc
                }
            };
            let card = split.count_ones();
            self.edges[e].topo_depth = card.min(n - card);
            self.edges[e].split = split;
        }
    }

    /// Fills subtree sizes, heavy children and light-leaf lists — the state
    /// the rapid kernel walks over.
    pub fn prepare_transfer_walk(&mut self) {
        for x in (0..self.nodes.len()).rev() {
            self.nodes[x].subtree_size = if self.nodes[x].taxon.is_some() {
                1
            } else {
                self.nodes[x]
                    .children
                    .iter()
                    .map(|&c| self.nodes[c].subtree_size)
                    .sum()
            };
        }
        for x in 0..self.nodes.len() {
            // strict > keeps the first maximum; children are in ascending id
            // order, so ties resolve to the lowest id
            let mut best: Option<usize> = None;
            for &c in &self.nodes[x].children {
                if best.is_none_or(|b| self.nodes[c].subtree_size > self.nodes[b].subtree_size) {
                    best = Some(c);
                }
            }
            self.nodes[x].heavy_child = best;
        }
        for x in 0..self.nodes.len() {
            if self.nodes[x].taxon.is_some() {
                continue;
            }
            let heavy = self.nodes[x].heavy_child;
            let children = self.nodes[x].children.clone();
            let mut acc = Vec::new();
            for c in children {
                if Some(c) != heavy {
                    self.collect_taxa(c, &mut acc);
                }
            }
            self.nodes[x].light_leaves = acc;
        }
    }

    fn collect_taxa(&self, v: usize, out: &mut Vec<usize>) {
        let mut stack = vec![v];
        while let Some(u) = stack.pop() {
            match self.nodes[u].taxon {
                Some(t) => out.push(t),
                None => stack.extend(self.nodes[u].children.iter().copied()),
            }
        }
    }

    /// Edge ids carrying distinct unrooted bipartitions within this tree.
    ///
    /// When the root has exactly two children its two edges induce the same
    /// split; the second one is omitted so one tree contributes at most one
    /// hit per bipartition.
    pub fn bipartition_edges(&self) -> Vec<usize> {
        let root_children = &self.nodes[self.root].children;
        let skip = if root_children.len() == 2 {
            self.nodes[root_children[1]].parent_edge
        } else {
            None
        };
        (0..self.edges.len()).filter(|&e| Some(e) != skip).collect()
    }

    /// Serialises the tree as Newick. Internal nodes that carry a support
    /// value are labelled with it (six decimals), overriding any original
    /// label; branch lengths are written when present.
    pub fn to_newick(&self) -> String {
        let mut out = String::new();
        self.write_clade(self.root, &mut out);
        out.push(';');
        out
    }

    fn write_clade(&self, v: usize, out: &mut String) {
        let node = &self.nodes[v];
        if node.children.is_empty() {
            out.push_str(node.name.as_deref().unwrap_or(""));
        } else {
            out.push('(');
            for (k, &c) in node.children.iter().enumerate() {
                if k > 0 {
                    out.push(',');
                }
                self.write_clade(c, out);
            }
            out.push(')');
            let support = node.parent_edge.and_then(|e| self.edges[e].support);
            match support {
                Some(s) => out.push_str(&format!("{s:.6}")),
                None => {
                    if let Some(name) = &node.name {
                        out.push_str(name);
                    }
                }
            }
        }
        if let Some(e) = node.parent_edge {
            if let Some(len) = self.edges[e].length {
                out.push_str(&format!(":{len}"));
            }
        }
    }
}

/// Generates a uniformly bipartitioned random rooted binary tree over the
/// given names, as a Newick string. Drives the oracle-equivalence tests for
/// the transfer kernels; the rng comes from the engine context.
pub fn random_binary_newick<R: Rng>(names: &[&str], rng: &mut R) -> String {
    fn clade<R: Rng>(names: &[&str], rng: &mut R, out: &mut String) {
        if names.len() == 1 {
            out.push_str(names[0]);
            return;
        }
        let k = rng.gen_range(1..names.len());
        out.push('(');
        clade(&names[..k], rng, out);
        out.push(',');
        clade(&names[k..], rng, out);
        out.push(')');
    }
    let mut shuffled: Vec<&str> = names.to_vec();
    shuffled.shuffle(rng);
    let mut out = String::new();
    clade(&shuffled, rng, &mut out);
    out.push(';');
    out
}
