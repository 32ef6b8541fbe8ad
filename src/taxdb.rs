//src/taxdb.rs

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ahash::AHashMap;
use log::{debug, info, warn};
use serde::Deserialize;

use crate::config::TaxonomyFormat;
use crate::error::{PlacementError, Result};
use crate::types::Lineage;

/// Maps a reference (protein) accession to the strain id used in the taxonomy table.
pub type ProteinMap = AHashMap<String, String>;

/// Fallback strain column names seen in reference tables.
const STRAIN_COL_FALLBACKS: [&str; 2] = ["source_id", "strain"];

/// Reference accession -> lineage lookup, shared read-only by every query.
#[derive(Debug, Clone, Default)]
pub struct TaxonomyTable {
    /// Rank names, general to specific
    pub ranks: Vec<String>,
    entries: AHashMap<String, Lineage>,
    protein_map: ProteinMap,
}

impl TaxonomyTable {
    /// Build a table directly. Lineages shorter than `ranks` are padded with `None`.
    pub fn from_entries<I, S>(ranks: Vec<String>, entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Lineage)>,
        S: Into<String>,
    {
        let depth = ranks.len();
        let entries = entries
            .into_iter()
            .map(|(id, mut lineage)| {
                lineage.resize(depth, None);
                (id.into(), lineage)
            })
            .collect();
        Self {
            ranks,
            entries,
            protein_map: ProteinMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.ranks.len()
    }

    /// Route reference ids through `map` before the strain lookup.
    pub fn attach_protein_map(&mut self, map: ProteinMap) {
        self.protein_map = map;
    }

    /// Lineage of a reference accession. The protein map is consulted first;
    /// ids it doesn't know are looked up as strain ids directly.
    pub fn resolve(&self, reference_id: &str) -> Option<&Lineage> {
        if let Some(strain) = self.protein_map.get(reference_id) {
            if let Some(lineage) = self.entries.get(strain) {
                return Some(lineage);
            }
        }
        self.entries.get(reference_id)
    }
}

/// Normalise one rank label; blanks and NA-style placeholders become `None`.
fn clean_label(raw: &str) -> Option<String> {
    let label = raw.trim().trim_matches('"').trim();
    match label.to_ascii_lowercase().as_str() {
        "" | "na" | "nan" | "none" | "null" => None,
        _ => Some(label.to_string()),
    }
}

fn find_column(header: &[&str], name: &str) -> Option<usize> {
    header
        .iter()
        .position(|h| h.trim().trim_matches('"').eq_ignore_ascii_case(name))
}

enum Layout {
    /// One column holding the whole lineage
    Delimited(usize),
    /// One column per present rank
    Split(Vec<usize>),
}

/// Parses a tab-separated taxonomy table with a header line.
///
/// The lineage is either one column (`format.taxonomy_col`) split on
/// `format.delimiter`, or pre-split columns named after `format.ranks`.
/// For the pre-split layout only the ranks actually present become ranks of
/// the returned table.
pub fn parse_taxonomy_table<P: AsRef<Path>>(
    filepath: P,
    format: &TaxonomyFormat,
) -> Result<TaxonomyTable> {
    let path = filepath.as_ref();
    let file = File::open(path).map_err(|e| PlacementError::io(path, e))?;
    let reader = BufReader::new(file);

    let mut lines = reader.lines().enumerate();

    // Header: first non-empty line
    let header_line = loop {
        match lines.next() {
            Some((_, line)) => {
                let line = line.map_err(|e| PlacementError::io(path, e))?;
                if !line.trim().is_empty() {
                    break line;
                }
            }
            None => {
                return Err(PlacementError::MalformedTaxonomy {
                    path: path.to_path_buf(),
                    line: 0,
                    detail: "file is empty".to_string(),
                })
            }
        }
    };
    let header: Vec<&str> = header_line.split('\t').collect();

    let strain_idx = find_column(&header, &format.strain_col)
        .or_else(|| STRAIN_COL_FALLBACKS.iter().find_map(|c| find_column(&header, c)))
        .ok_or_else(|| PlacementError::MissingColumn {
            path: path.to_path_buf(),
            column: format.strain_col.clone(),
        })?;

    let (ranks, layout) = match find_column(&header, &format.taxonomy_col) {
        Some(idx) => (format.ranks.clone(), Layout::Delimited(idx)),
        None => {
            let mut ranks = Vec::new();
            let mut columns = Vec::new();
            for rank in &format.ranks {
                if let Some(col) = find_column(&header, rank) {
                    ranks.push(rank.clone());
                    columns.push(col);
                }
            }
            if columns.is_empty() {
                return Err(PlacementError::MissingColumn {
                    path: path.to_path_buf(),
                    column: format.taxonomy_col.clone(),
                });
            }
            (ranks, Layout::Split(columns))
        }
    };
    let depth = ranks.len();

    let mut entries: AHashMap<String, Lineage> = AHashMap::new();
    let mut duplicates = 0usize;
    let mut saw_delimiter = false;

    for (line_no, line_result) in lines {
        let line = line_result.map_err(|e| PlacementError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();

        let strain = fields
            .get(strain_idx)
            .map(|s| s.trim().trim_matches('"'))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| PlacementError::MalformedTaxonomy {
                path: path.to_path_buf(),
                line: line_no + 1,
                detail: "missing strain identifier".to_string(),
            })?;

        let lineage: Lineage = match &layout {
            Layout::Delimited(col) => {
                let raw = fields.get(*col).copied().unwrap_or("");
                if raw.contains(format.delimiter.as_str()) {
                    saw_delimiter = true;
                }
                let raw = raw.trim().trim_matches('"');
                let mut parts: Lineage = raw
                    .split(format.delimiter.as_str())
                    .map(clean_label)
                    .collect();
                // a trailing delimiter leaves one empty part
                if parts.len() == depth + 1 && parts.last() == Some(&None) {
                    parts.pop();
                }
                if parts.len() > depth {
                    return Err(PlacementError::DelimiterMismatch {
                        path: path.to_path_buf(),
                        line: line_no + 1,
                        found: parts.len(),
                        expected: depth,
                    });
                }
                parts.resize(depth, None);
                parts
            }
            Layout::Split(columns) => columns
                .iter()
                .map(|&c| fields.get(c).and_then(|v| clean_label(v)))
                .collect(),
        };

        if entries.contains_key(strain) {
            duplicates += 1;
            continue;
        }
        entries.insert(strain.to_string(), lineage);
    }

    if matches!(layout, Layout::Delimited(_)) && depth > 1 && !entries.is_empty() && !saw_delimiter {
        return Err(PlacementError::DelimiterMismatch {
            path: path.to_path_buf(),
            line: 0,
            found: 1,
            expected: depth,
        });
    }

    if duplicates > 0 {
        warn!(
            "{} duplicate strain ids in {}; kept the first occurrence of each",
            duplicates,
            path.display()
        );
    }
    info!(
        "Loaded {} taxonomy entries over {} ranks from {}",
        entries.len(),
        depth,
        path.display()
    );
    debug!("Ranks: {}", ranks.join(", "));

    Ok(TaxonomyTable {
        ranks,
        entries,
        protein_map: ProteinMap::new(),
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// Parses a JSON object mapping reference accessions to strain ids.
/// Values may be a string or a list of strings (the first is used).
pub fn parse_protein_map<P: AsRef<Path>>(filepath: P) -> Result<ProteinMap> {
    let path = filepath.as_ref();
    let file = File::open(path).map_err(|e| PlacementError::io(path, e))?;
    let raw: HashMap<String, OneOrMany> = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| PlacementError::MalformedProteinMap {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;

    let mut map = ProteinMap::with_capacity(raw.len());
    for (protein, strains) in raw {
        let strain = match strains {
            OneOrMany::One(s) => s,
            OneOrMany::Many(list) => match list.into_iter().next() {
                Some(s) => s,
                None => {
                    return Err(PlacementError::MalformedProteinMap {
                        path: path.to_path_buf(),
                        detail: format!("empty strain list for '{}'", protein),
                    })
                }
            },
        };
        map.insert(protein, strain);
    }
    info!("Loaded {} protein -> strain mappings from {}", map.len(), path.display());
    Ok(map)
}
