//! Reading tree files and writing the annotated tree and statistics.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{Error, Result};
use crate::support::{EdgeStat, SupportOutcome};
use crate::tree::Taxa;

/// Reads a single Newick tree from a file. The tree may span several lines;
/// everything up to the first `;` is joined.
pub fn read_reference_newick<P: AsRef<Path>>(path: P) -> Result<String> {
    let content =
        fs::read_to_string(path.as_ref()).map_err(|e| Error::io(path.as_ref(), e))?;
    let flat: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    match flat.find(';') {
        Some(end) => Ok(flat[..=end].to_string()),
        None => Err(Error::Parse(format!(
            "no tree found in {}",
            path.as_ref().display()
        ))),
    }
}

/// Reads the bootstrap trees, one Newick string per line, until EOF.
pub fn read_bootstrap_newicks<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let content =
        fs::read_to_string(path.as_ref()).map_err(|e| Error::io(path.as_ref(), e))?;
    let mut trees = Vec::with_capacity(10);
    for line in content.lines() {
        let line = line.trim();
        if !line.is_empty() {
            trees.push(line.to_string());
        }
    }
    Ok(trees)
}

/// Opens the writer for an output path: `None` or `-` is stdout, a path
/// ending in `.gz` is gzip-compressed.
pub fn open_writer(path: Option<&Path>) -> Result<Box<dyn Write>> {
    let Some(p) = path else {
        return Ok(Box::new(BufWriter::new(io::stdout())));
    };
    if p.as_os_str() == "-" {
        return Ok(Box::new(BufWriter::new(io::stdout())));
    }
    let file = File::create(p).map_err(|e| Error::io(p, e))?;
    if p.to_string_lossy().ends_with(".gz") {
        let enc = GzEncoder::new(file, Compression::default());
        Ok(Box::new(BufWriter::new(enc)))
    } else {
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// Writes the annotated tree in Newick format.
pub fn write_support_tree(out: &mut dyn Write, outcome: &SupportOutcome) -> io::Result<()> {
    writeln!(out, "{}", outcome.tree.to_newick())?;
    out.flush()
}

/// Writes the per-edge statistics, tab separated, plus the per-taxon
/// transfer indexes when the classical TBE kernel produced them.
pub fn write_stats(
    out: &mut dyn Write,
    outcome: &SupportOutcome,
    taxa: &Taxa,
) -> io::Result<()> {
    match &outcome.edge_stats {
        EdgeStat::Transfer(rows) => {
            writeln!(out, "EdgeId\tDepth\tMeanMinDist")?;
            for row in rows {
                writeln!(out, "{}\t{}\t{:.6}", row.edge, row.depth, row.mean_min_dist)?;
            }
            if let Some(transfer) = &outcome.taxon_transfer {
                writeln!(out, "Taxa transfer indexes:")?;
                for (taxon, pct) in transfer.iter().enumerate() {
                    writeln!(out, "{} : {:.6}", taxa.name_of(taxon), pct)?;
                }
            }
        }
        EdgeStat::Count(rows) => {
            writeln!(out, "EdgeId\tCount")?;
            for &(edge, count) in rows {
                writeln!(out, "{edge}\t{count}")?;
            }
        }
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_reference_joins_lines() {
        let dir = std::env::temp_dir();
        let path = dir.join("ref_multiline_test.nwk");
        fs::write(&path, "((A,B),\n  (C,D));\ntrailing garbage").unwrap();
        assert_eq!(read_reference_newick(&path).unwrap(), "((A,B),(C,D));");
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_read_bootstrap_skips_blank_lines() {
        let dir = std::env::temp_dir();
        let path = dir.join("boot_lines_test.nwk");
        fs::write(&path, "((A,B),(C,D));\n\n((A,C),(B,D));\n").unwrap();
        let trees = read_bootstrap_newicks(&path).unwrap();
        assert_eq!(trees.len(), 2);
        assert_eq!(trees[1], "((A,C),(B,D));");
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            read_reference_newick("/definitely/not/here.nwk"),
            Err(Error::Io { .. })
        ));
    }
}
