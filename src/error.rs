//! Crate-wide error type covering the failure taxonomy of the engine:
//! configuration problems, reference-tree failures (fatal), per-bootstrap-tree
//! skip causes, structural violations and internal invariant breaches.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or contradictory configuration (missing required flag,
    /// unknown algorithm, unusable thread count).
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O failure with the offending path attached.
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The reference tree (or a bootstrap tree, before being downgraded to a
    /// skip by the driver) could not be parsed.
    #[error("tree parse error: {0}")]
    Parse(String),

    /// A bootstrap tree whose leaf set does not match the reference taxa.
    #[error("leaf set mismatch: {0}")]
    TaxaMismatch(String),

    /// The rapid transfer kernel met a node it cannot decompose.
    #[error("binary trees only: node {node} has {children} children")]
    NotBinary { node: usize, children: usize },

    /// An internal consistency check failed; carries a file/line diagnostic.
    #[error("internal invariant breach at {file}:{line}: {message}")]
    Invariant {
        file: &'static str,
        line: u32,
        message: String,
    },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

/// Builds an [`Error::Invariant`] carrying the call site.
macro_rules! invariant_breach {
    ($($arg:tt)*) => {
        $crate::error::Error::Invariant {
            file: file!(),
            line: line!(),
            message: format!($($arg)*),
        }
    };
}
pub(crate) use invariant_breach;

pub type Result<T> = std::result::Result<T, Error>;
