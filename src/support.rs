//! The bootstrap driver: owns the configuration, dispatches bootstrap trees
//! across a worker pool, folds the per-tree contributions deterministically
//! and annotates the reference tree with support values.
//!
//! The driver moves through the stages
//! `Init → RefLoaded → BootLoaded → Computing → Aggregated → Emitted`.
//! Fatal errors before `Computing` abort the run; a bad bootstrap tree inside
//! `Computing` is logged and skipped and does not count towards the tree
//! total used in the support denominators.

use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::fbp;
use crate::index::BipartitionIndex;
use crate::io as tree_io;
use crate::rapid;
use crate::transfer;
use crate::tree::{random_binary_newick, Taxa, Tree};

/// Support algorithm selector.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Algo {
    /// Classical transfer bootstrap (matrix kernel; reports moved taxa).
    Tbe,
    /// Transfer bootstrap through the Heavy-Path Tree.
    TbeRapid,
    /// Felsenstein bootstrap (exact bipartition matching).
    Fbp,
}

/// Driver configuration.
#[derive(Clone, Debug)]
pub struct SupportConfig {
    pub algo: Algo,
    /// Requested worker count; clamped to the hardware maximum, minimum 1.
    pub threads: usize,
    /// Normalised-distance cutoff for the moved-taxa computation.
    pub dist_cutoff: f64,
    pub quiet: bool,
    /// Engine PRNG seed.
    pub seed: u64,
}

impl Default for SupportConfig {
    fn default() -> Self {
        SupportConfig {
            algo: Algo::Tbe,
            threads: 1,
            dist_cutoff: 0.3,
            quiet: false,
            seed: 0,
        }
    }
}

/// Driver stages, advanced by [`Engine::run`] and [`Engine::emit`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    Init,
    RefLoaded,
    BootLoaded,
    Computing,
    Aggregated,
    Emitted,
}

/// One row of the per-edge transfer statistics.
pub struct TransferRow {
    pub edge: usize,
    pub depth: usize,
    pub mean_min_dist: f64,
}

/// Per-edge statistics, shaped by the algorithm that produced them.
pub enum EdgeStat {
    Transfer(Vec<TransferRow>),
    Count(Vec<(usize, u32)>),
}

/// Everything the run produced: the annotated reference tree, the taxon
/// table, the effective tree count and the statistics rows.
pub struct SupportOutcome {
    pub tree: Tree,
    pub taxa: Taxa,
    /// Bootstrap trees that actually contributed.
    pub num_trees: usize,
    pub skipped: usize,
    pub edge_stats: EdgeStat,
    /// Per-taxon transfer index percentages (classical TBE only).
    pub taxon_transfer: Option<Vec<f64>>,
}

/// What one bootstrap tree contributes to the accumulators.
enum Contribution {
    Fbp { hits: Vec<usize> },
    Tbe { min_dist: Vec<u16>, moved: Vec<u32>, branches_close: u32 },
}

/// The engine: configuration plus the per-engine PRNG (there is no global
/// random state anywhere in the crate).
pub struct Engine {
    cfg: SupportConfig,
    rng: StdRng,
    stage: Stage,
}

impl Engine {
    pub fn new(cfg: SupportConfig) -> Self {
        let rng = StdRng::seed_from_u64(cfg.seed);
        Engine {
            cfg,
            rng,
            stage: Stage::Init,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Generates a random rooted binary bootstrap tree over the given taxa,
    /// from the engine PRNG. Simulation and test helper.
    pub fn random_bootstrap(&mut self, taxa: &Taxa) -> String {
        let names: Vec<&str> = taxa.names().iter().map(|s| s.as_str()).collect();
        random_binary_newick(&names, &mut self.rng)
    }

    /// Runs the configured kernel over all bootstrap trees and aggregates
    /// the per-edge supports into the reference tree.
    pub fn run(&mut self, ref_newick: &str, boot_newicks: &[String]) -> Result<SupportOutcome> {
        let (mut ref_tree, taxa) = Tree::parse_reference(ref_newick)?;
        let n = taxa.len();
        if n < 2 {
            return Err(Error::Parse(
                "reference tree must contain at least two taxa".into(),
            ));
        }
        if n > u16::MAX as usize / 2 {
            return Err(Error::Config(format!(
                "{n} taxa exceed the 16-bit transfer matrices"
            )));
        }
        ref_tree.update_splits();
        if self.cfg.algo == Algo::TbeRapid {
            ref_tree.prepare_transfer_walk();
        }
        self.stage = Stage::RefLoaded;
        // the bootstrap string pool arrives pre-read from the caller
        self.stage = Stage::BootLoaded;

        let threads = self.cfg.threads.clamp(1, num_cpus::get());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| Error::Config(format!("cannot build the worker pool: {e}")))?;
        let index = match self.cfg.algo {
            Algo::Fbp => Some(fbp::build_index(&ref_tree)),
            _ => None,
        };
        self.stage = Stage::Computing;

        let cfg = &self.cfg;
        let results: Result<Vec<Option<Contribution>>> = pool.install(|| {
            boot_newicks
                .par_iter()
                .enumerate()
                .map(|(i_tree, newick)| {
                    process_tree(i_tree, newick, &ref_tree, &taxa, index.as_ref(), cfg)
                })
                .collect()
        });
        let results = results?;

        // Sequential fold, in input order: integer sums are independent of
        // the thread count, and the floating-point moved-taxa sums are folded
        // in a fixed order.
        let m = ref_tree.edges.len();
        let mut num_trees = 0usize;
        let mut skipped = 0usize;
        let mut counts = vec![0u32; m];
        let mut dist_sum = vec![0u64; m];
        let mut moved_counts = vec![0f64; n];
        for contribution in results {
            match contribution {
                None => skipped += 1,
                Some(Contribution::Fbp { hits }) => {
                    num_trees += 1;
                    for h in hits {
                        counts[h] += 1;
                    }
                }
                Some(Contribution::Tbe {
                    min_dist,
                    moved,
                    branches_close,
                }) => {
                    num_trees += 1;
                    for (e, d) in min_dist.iter().enumerate() {
                        dist_sum[e] += u64::from(*d);
                    }
                    if branches_close > 0 {
                        for (t, c) in moved.iter().enumerate() {
                            moved_counts[t] += f64::from(*c) / f64::from(branches_close);
                        }
                    }
                }
            }
        }

        let mut taxon_transfer = None;
        let edge_stats = if num_trees == 0 {
            match self.cfg.algo {
                Algo::Fbp => EdgeStat::Count(Vec::new()),
                _ => EdgeStat::Transfer(Vec::new()),
            }
        } else {
            match self.cfg.algo {
                Algo::Fbp => {
                    let reps = fbp::representatives(&ref_tree, index.as_ref().expect("fbp index"));
                    let mut rows = Vec::new();
                    for e in 0..m {
                        if ref_tree.is_leaf(ref_tree.edges[e].child) {
                            continue;
                        }
                        let count = counts[reps[e]];
                        ref_tree.edges[e].support = Some(f64::from(count) / num_trees as f64);
                        rows.push((e, count));
                    }
                    EdgeStat::Count(rows)
                }
                Algo::Tbe | Algo::TbeRapid => {
                    let mut rows = Vec::new();
                    for e in 0..m {
                        let depth = ref_tree.edges[e].topo_depth;
                        if ref_tree.is_leaf(ref_tree.edges[e].child) || depth < 2 {
                            continue;
                        }
                        let avg = dist_sum[e] as f64 / num_trees as f64;
                        ref_tree.edges[e].support = Some(1.0 - avg / (depth as f64 - 1.0));
                        rows.push(TransferRow {
                            edge: e,
                            depth,
                            mean_min_dist: avg,
                        });
                    }
                    if self.cfg.algo == Algo::Tbe {
                        taxon_transfer = Some(
                            moved_counts
                                .iter()
                                .map(|c| c * 100.0 / num_trees as f64)
                                .collect(),
                        );
                    }
                    EdgeStat::Transfer(rows)
                }
            }
        };
        self.stage = Stage::Aggregated;

        Ok(SupportOutcome {
            tree: ref_tree,
            taxa,
            num_trees,
            skipped,
            edge_stats,
            taxon_transfer,
        })
    }

    /// Writes the annotated tree and, when requested, the statistics file.
    pub fn emit(
        &mut self,
        outcome: &SupportOutcome,
        out_path: Option<&Path>,
        stats_path: Option<&Path>,
    ) -> Result<()> {
        let mut writer = tree_io::open_writer(out_path)?;
        tree_io::write_support_tree(&mut writer, outcome)
            .map_err(|e| Error::io(out_path.unwrap_or(Path::new("-")), e))?;
        if let Some(sp) = stats_path {
            let mut stats_writer = tree_io::open_writer(Some(sp))?;
            tree_io::write_stats(&mut stats_writer, outcome, &outcome.taxa)
                .map_err(|e| Error::io(sp, e))?;
        }
        self.stage = Stage::Emitted;
        Ok(())
    }
}

/// Parses and processes one bootstrap tree on a worker. Parse failures and
/// leaf-set mismatches are warnings that skip the tree; structural and
/// internal errors abort the whole run.
fn process_tree(
    i_tree: usize,
    newick: &str,
    ref_tree: &Tree,
    taxa: &Taxa,
    index: Option<&BipartitionIndex>,
    cfg: &SupportConfig,
) -> Result<Option<Contribution>> {
    if !cfg.quiet {
        eprintln!("New bootstrap tree : {i_tree}");
    }
    let mut alt = match Tree::parse_matching(newick, taxa) {
        Ok(t) => t,
        Err(Error::Parse(msg)) => {
            eprintln!("Not a correct Newick tree ({i_tree}), skipping: {msg}");
            return Ok(None);
        }
        Err(Error::TaxaMismatch(msg)) => {
            eprintln!("Bootstrap tree {i_tree} does not match the reference taxa, skipping: {msg}");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    match cfg.algo {
        Algo::Fbp => {
            alt.update_splits();
            let hits = fbp::matching_edges(index.expect("fbp index"), &alt);
            Ok(Some(Contribution::Fbp { hits }))
        }
        Algo::Tbe => {
            alt.update_splits();
            let outcome = transfer::min_transfer_dists(ref_tree, &alt);
            let (moved, branches_close) =
                transfer::moved_species_counts(ref_tree, &alt, &outcome, cfg.dist_cutoff)?;
            Ok(Some(Contribution::Tbe {
                min_dist: outcome.min_dist,
                moved,
                branches_close,
            }))
        }
        Algo::TbeRapid => {
            alt.prepare_transfer_walk();
            let min_dist = rapid::transfer_indices(ref_tree, &alt)?;
            Ok(Some(Contribution::Tbe {
                min_dist,
                moved: Vec::new(),
                branches_close: 0,
            }))
        }
    }
}

/// Quiet-gated progress line on standard error.
pub fn log_if(show: bool, msg: impl AsRef<str>) {
    if show {
        eprintln!("{}", msg.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitset::Bitset;

    fn config(algo: Algo) -> SupportConfig {
        SupportConfig {
            algo,
            threads: 1,
            dist_cutoff: 0.3,
            quiet: true,
            seed: 42,
        }
    }

    fn run(algo: Algo, reference: &str, boots: &[&str]) -> SupportOutcome {
        let boots: Vec<String> = boots.iter().map(|s| s.to_string()).collect();
        let mut engine = Engine::new(config(algo));
        let outcome = engine.run(reference, &boots).unwrap();
        assert_eq!(engine.stage(), Stage::Aggregated);
        outcome
    }

    /// Support of the (annotated) edge carrying the given taxa as one side.
    fn support_of(outcome: &SupportOutcome, names: &[&str]) -> f64 {
        let n = outcome.taxa.len();
        let mut want = Bitset::zeros(n.div_ceil(64));
        for nm in names {
            want.set(outcome.taxa.id_of(nm).unwrap());
        }
        let want = want.canonical(n);
        outcome
            .tree
            .edges
            .iter()
            .find_map(|e| {
                (e.split.canonical(n) == want).then_some(e.support).flatten()
            })
            .unwrap_or_else(|| panic!("no annotated edge for {names:?}"))
    }

    #[test]
    fn test_identical_quartet_full_support() {
        for algo in [Algo::Tbe, Algo::TbeRapid, Algo::Fbp] {
            let out = run(algo, "((A,B),(C,D));", &["((A,B),(C,D));"]);
            assert_eq!(out.num_trees, 1);
            assert_eq!(support_of(&out, &["A", "B"]), 1.0, "{algo:?}");
            assert_eq!(support_of(&out, &["C", "D"]), 1.0, "{algo:?}");
        }
    }

    #[test]
    fn test_conflicting_quartet_zero_support() {
        for algo in [Algo::Tbe, Algo::TbeRapid, Algo::Fbp] {
            let out = run(algo, "((A,B),(C,D));", &["((A,C),(B,D));"]);
            assert_eq!(support_of(&out, &["A", "B"]), 0.0, "{algo:?}");
            assert_eq!(support_of(&out, &["C", "D"]), 0.0, "{algo:?}");
        }
    }

    #[test]
    fn test_fbp_partial_agreement() {
        let out = run(
            Algo::Fbp,
            "(((A,B),C),(D,E));",
            &["(((A,B),C),(D,E));", "(((A,C),B),(D,E));"],
        );
        assert_eq!(support_of(&out, &["A", "B"]), 0.5);
        assert_eq!(support_of(&out, &["D", "E"]), 1.0);
    }

    #[test]
    fn test_classical_and_rapid_drivers_agree() {
        let reference = "((((A,B),(C,D)),(E,F)),((G,H),(I,(J,K))));";
        let boots = [
            "((((A,B),(C,D)),(E,F)),((G,H),(I,(J,K))));",
            "((((A,C),(B,D)),(E,G)),((F,H),(I,(J,K))));",
            "(((A,(B,(C,D))),(E,F)),(((G,H),I),(J,K)));",
        ];
        let classical = run(Algo::Tbe, reference, &boots);
        let rapid = run(Algo::TbeRapid, reference, &boots);
        assert_eq!(classical.tree.to_newick(), rapid.tree.to_newick());
    }

    #[test]
    fn test_identical_bootstraps_all_edges_one() {
        // 100 bootstrap copies of a 16-taxon reference
        let reference =
            "((((A,B),(C,D)),((E,F),(G,H))),(((I,J),(K,L)),((M,N),(O,P))));";
        let boots: Vec<&str> = std::iter::repeat_n(reference, 100).collect();
        for algo in [Algo::Tbe, Algo::TbeRapid, Algo::Fbp] {
            let out = run(algo, reference, &boots);
            assert_eq!(out.num_trees, 100);
            for edge in &out.tree.edges {
                if let Some(s) = edge.support {
                    assert_eq!(s, 1.0, "{algo:?}");
                }
            }
        }
    }

    #[test]
    fn test_mismatched_bootstrap_skipped() {
        let out = run(Algo::Tbe, "((A,B),(C,D));", &["((A,B),(C,X));"]);
        assert_eq!(out.num_trees, 0);
        assert_eq!(out.skipped, 1);
        // reference emitted unmodified
        assert!(out.tree.edges.iter().all(|e| e.support.is_none()));
        assert_eq!(out.tree.to_newick(), "((A,B),(C,D));");
    }

    #[test]
    fn test_unparseable_bootstrap_skipped() {
        let out = run(Algo::Fbp, "((A,B),(C,D));", &["this is not newick", "((A,B),(C,D));"]);
        assert_eq!(out.num_trees, 1);
        assert_eq!(out.skipped, 1);
        assert_eq!(support_of(&out, &["A", "B"]), 1.0);
    }

    #[test]
    fn test_support_bounds_on_random_bootstraps() {
        let mut engine = Engine::new(config(Algo::Tbe));
        let (_, taxa) = Tree::parse_reference(
            "((((A,B),(C,D)),((E,F),(G,H))),(((I,J),(K,L)),((M,N),(O,P))));",
        )
        .unwrap();
        let reference = engine.random_bootstrap(&taxa);
        let boots: Vec<String> = (0..20).map(|_| engine.random_bootstrap(&taxa)).collect();
        for algo in [Algo::Tbe, Algo::TbeRapid, Algo::Fbp] {
            let mut engine = Engine::new(config(algo));
            let out = engine.run(&reference, &boots).unwrap();
            assert_eq!(out.num_trees, 20);
            for edge in &out.tree.edges {
                if let Some(s) = edge.support {
                    assert!((0.0..=1.0).contains(&s), "{algo:?}: {s}");
                }
            }
        }
    }

    #[test]
    fn test_determinism_across_runs_and_threads() {
        let reference = "((((A,B),(C,D)),(E,F)),((G,H),(I,J)));";
        let boots: Vec<String> = vec![
            "((((A,C),(B,D)),(E,F)),((G,I),(H,J)));".into(),
            "((((A,B),(C,D)),(E,F)),((G,H),(I,J)));".into(),
            "((A,((B,C),D)),((E,(F,G)),(H,(I,J))));".into(),
        ];
        for algo in [Algo::Tbe, Algo::TbeRapid, Algo::Fbp] {
            let mut single = Engine::new(config(algo));
            let first = single.run(reference, &boots).unwrap().tree.to_newick();
            let second = single.run(reference, &boots).unwrap().tree.to_newick();
            assert_eq!(first, second, "{algo:?}: reruns differ");

            let mut wide = Engine::new(SupportConfig {
                threads: 4,
                ..config(algo)
            });
            let parallel = wide.run(reference, &boots).unwrap().tree.to_newick();
            assert_eq!(first, parallel, "{algo:?}: thread count changed the result");
        }
    }

    #[test]
    fn test_moved_taxa_reported_for_classical_only() {
        let reference = "(((A,B),(C,D)),((E,F),(G,H)));";
        let boots = ["(((A,B),(C,D)),((E,F),(G,H)));"];
        let classical = run(Algo::Tbe, reference, &boots);
        assert!(classical.taxon_transfer.is_some());
        assert!(matches!(classical.edge_stats, EdgeStat::Transfer(_)));
        let rapid = run(Algo::TbeRapid, reference, &boots);
        assert!(rapid.taxon_transfer.is_none());
        let fbp = run(Algo::Fbp, reference, &boots);
        assert!(matches!(fbp.edge_stats, EdgeStat::Count(_)));
    }

    #[test]
    fn test_emit_advances_stage() {
        let dir = std::env::temp_dir();
        let out_path = dir.join("support_emit_test.nwk");
        let stats_path = dir.join("support_emit_test.tsv");
        let mut engine = Engine::new(config(Algo::Tbe));
        let boots = vec!["((A,B),(C,D));".to_string()];
        let outcome = engine.run("((A,B),(C,D));", &boots).unwrap();
        engine
            .emit(&outcome, Some(out_path.as_path()), Some(stats_path.as_path()))
            .unwrap();
        assert_eq!(engine.stage(), Stage::Emitted);
        let tree = std::fs::read_to_string(&out_path).unwrap();
        assert!(tree.contains("1.000000"), "{tree}");
        let stats = std::fs::read_to_string(&stats_path).unwrap();
        assert!(stats.starts_with("EdgeId\tDepth\tMeanMinDist"), "{stats}");
        assert!(stats.contains("Taxa transfer indexes:"), "{stats}");
        std::fs::remove_file(&out_path).ok();
        std::fs::remove_file(&stats_path).ok();
    }
}
