//src/abundance.rs

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ahash::AHashMap;
use log::info;

use crate::error::{PlacementError, Result};

/// query_id -> read count (e.g. salmon NumReads)
pub type AbundanceTable = AHashMap<String, f64>;

const COUNT_COLUMN: &str = "NumReads";

/// Parses a read-count table.
///
/// Accepts salmon's `quant.sf` (or anything with a header naming a
/// `NumReads` column, query id in the first column) and headerless
/// two-column `<query_id>\t<count>` tables.
pub fn parse_abundance_table<P: AsRef<Path>>(filepath: P) -> Result<AbundanceTable> {
    let path = filepath.as_ref();
    let file = File::open(path).map_err(|e| PlacementError::io(path, e))?;
    let reader = BufReader::new(file);

    let mut table = AbundanceTable::new();
    let mut count_col: Option<usize> = None;
    let mut first = true;

    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| PlacementError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();

        if first {
            first = false;
            if let Some(idx) = fields.iter().position(|f| f.eq_ignore_ascii_case(COUNT_COLUMN)) {
                count_col = Some(idx);
                continue;
            }
            // headerless, unless the second field is not a number
            if fields.len() >= 2 && fields[1].parse::<f64>().is_err() {
                count_col = Some(1);
                continue;
            }
        }

        let col = count_col.unwrap_or(1);
        let malformed = |detail: String| PlacementError::MalformedAbundance {
            path: path.to_path_buf(),
            line: line_no + 1,
            detail,
        };
        let raw = fields
            .get(col)
            .ok_or_else(|| malformed(format!("missing count column {}", col + 1)))?;
        let count: f64 = raw
            .parse()
            .map_err(|_| malformed(format!("invalid count '{}'", raw)))?;
        if !(count >= 0.0 && count.is_finite()) {
            return Err(malformed(format!("count {} must be finite and >= 0", count)));
        }
        *table.entry(fields[0].to_string()).or_insert(0.0) += count;
    }

    info!("Loaded read counts for {} sequences from {}", table.len(), path.display());
    Ok(table)
}
