//! Python binding layer for the support computation.
//!
//! Exposes one entry point that reads a reference tree and a bootstrap file
//! and returns the annotated Newick string plus the per-edge supports.

use std::path::PathBuf;

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::io::{read_bootstrap_newicks, read_reference_newick};
use crate::support::{Algo, Engine, SupportConfig};

/// Compute branch supports for a reference tree from a bootstrap tree file.
///
/// Args:
///     reference: Path to the reference tree file (Newick)
///     bootstrap: Path to the bootstrap trees file, one Newick per line
///     algo: "tbe", "tbe-rapid" or "fbp" (default: "tbe")
///     threads: Worker thread count (default: 1)
///     dist_cutoff: Moved-taxa distance cutoff, tbe only (default: 0.3)
///     seed: Engine PRNG seed (default: 0)
///
/// Returns:
///     A tuple of (newick, supports) where:
///     - newick is the reference tree annotated with supports
///     - supports is a list of (edge_id, support) pairs
///
/// Raises:
///     ValueError: If a file cannot be read, the reference tree does not
///     parse, or the computation fails.
#[pyfunction]
#[pyo3(signature = (reference, bootstrap, algo="tbe", threads=1, dist_cutoff=0.3, seed=0))]
fn branch_supports(
    reference: PathBuf,
    bootstrap: PathBuf,
    algo: &str,
    threads: usize,
    dist_cutoff: f64,
    seed: u64,
) -> PyResult<(String, Vec<(usize, f64)>)> {
    let algo = match algo {
        "tbe" => Algo::Tbe,
        "tbe-rapid" => Algo::TbeRapid,
        "fbp" => Algo::Fbp,
        other => {
            return Err(PyValueError::new_err(format!(
                "unknown algorithm {other:?}: expected tbe, tbe-rapid or fbp"
            )))
        }
    };
    let ref_newick =
        read_reference_newick(&reference).map_err(|e| PyValueError::new_err(e.to_string()))?;
    let boot_newicks =
        read_bootstrap_newicks(&bootstrap).map_err(|e| PyValueError::new_err(e.to_string()))?;

    let mut engine = Engine::new(SupportConfig {
        algo,
        threads,
        dist_cutoff,
        quiet: true,
        seed,
    });
    let outcome = engine
        .run(&ref_newick, &boot_newicks)
        .map_err(|e| PyValueError::new_err(e.to_string()))?;

    let supports = outcome
        .tree
        .edges
        .iter()
        .enumerate()
        .filter_map(|(e, edge)| edge.support.map(|s| (e, s)))
        .collect();
    Ok((outcome.tree.to_newick(), supports))
}

/// Python module definition
#[pymodule]
fn transfer_bootstrap(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(branch_supports, m)?)?;
    Ok(())
}
