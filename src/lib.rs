//! Crate root: lightweight module orchestration and public re-exports.
//!
//! Modules:
//! - `bitset`: compact bitset representation for tree bipartitions.
//! - `index`: bipartition-keyed hash map for exact (FBP) matching.
//! - `tree`: arena tree model, split and heavy-path preparation, Newick output.
//! - `transfer`: classical transfer-distance kernel (I/C matrices).
//! - `heavy_paths`: Heavy-Path Tree with lazy min/max aggregates.
//! - `rapid`: rapid transfer-index kernel over the heavy-path walk.
//! - `fbp`: Felsenstein bootstrap kernel.
//! - `support`: the driver — parallel dispatch, aggregation, emission.
//! - `io`: tree and statistics file reading and writing.
//! - `api`: Python bindings via `pyo3` (gated behind "python" feature).

pub mod bitset;
pub mod error;
pub mod fbp;
pub mod heavy_paths;
pub mod index;
pub mod io;
pub mod rapid;
pub mod support;
pub mod transfer;
pub mod tree;

#[cfg(feature = "python")]
pub mod api;

// Re-export frequently used types & functions
pub use bitset::Bitset;
pub use error::{Error, Result};
pub use support::{Algo, Engine, SupportConfig, SupportOutcome};
pub use tree::{Taxa, Tree};
