//src/config.rs

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use clap::ValueEnum;

use crate::cutoffs::CutoffMetric;
use crate::error::{PlacementError, Result};

/// Default rank order used when the taxonomy table carries pre-split rank columns.
pub const DEFAULT_RANKS: [&str; 7] = [
    "supergroup",
    "division",
    "class",
    "order",
    "family",
    "genus",
    "species",
];

/// Which aligner produced the hit table. Both emit tabular outfmt 6, but
/// subject identifiers and file naming differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum AlignerKind {
    #[default]
    Diamond,
    Blast,
}

impl AlignerKind {
    /// File extension of this aligner's output in the pipeline layout.
    pub fn output_extension(&self) -> &'static str {
        match self {
            AlignerKind::Diamond => "diamond.out",
            AlignerKind::Blast => "blast.txt",
        }
    }
}

impl FromStr for AlignerKind {
    type Err = PlacementError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "diamond" => Ok(AlignerKind::Diamond),
            "blast" | "blastp" => Ok(AlignerKind::Blast),
            other => Err(PlacementError::InvalidConfig(format!(
                "unknown aligner '{}', expected diamond or blast",
                other
            ))),
        }
    }
}

impl fmt::Display for AlignerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlignerKind::Diamond => f.write_str("diamond"),
            AlignerKind::Blast => f.write_str("blast"),
        }
    }
}

/// How much a single qualifying hit counts in a rank's vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum VoteWeighting {
    /// Every hit is one vote
    #[default]
    HitCount,
    /// Hits vote with their bit score (1.0 when the table has none)
    BitScore,
    /// Hits vote with percent identity / 100
    Identity,
}

/// What a rank without a cutoff threshold means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum MissingCutoffPolicy {
    /// Every hit qualifies at that rank, unless the rank is listed as mandatory
    #[default]
    NoFilter,
    /// Every rank needs a threshold
    Strict,
}

/// Column layout of the taxonomy table.
#[derive(Debug, Clone, PartialEq)]
pub struct TaxonomyFormat {
    pub strain_col: String,
    pub taxonomy_col: String,
    pub delimiter: String,
    /// Rank names, general to specific. Used as column names for pre-split
    /// tables and as names of the parts of a delimited lineage.
    pub ranks: Vec<String>,
}

impl Default for TaxonomyFormat {
    fn default() -> Self {
        Self {
            strain_col: "strain_name".to_string(),
            taxonomy_col: "taxonomy".to_string(),
            delimiter: ";".to_string(),
            ranks: DEFAULT_RANKS.iter().map(|r| r.to_string()).collect(),
        }
    }
}

/// All knobs of a placement run, passed explicitly to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementConfig {
    pub consensus_cutoff: f64,
    /// Overrides the metric named in the cutoff file
    pub cutoff_metric: Option<CutoffMetric>,
    pub weighting: VoteWeighting,
    pub missing_cutoff: MissingCutoffPolicy,
    pub aligner: AlignerKind,
    pub taxonomy_format: TaxonomyFormat,
    /// 0 = let rayon decide
    pub threads: usize,
    /// Recompute outputs even when the cache says they are fresh
    pub force: bool,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            consensus_cutoff: 0.75,
            cutoff_metric: None,
            weighting: VoteWeighting::default(),
            missing_cutoff: MissingCutoffPolicy::default(),
            aligner: AlignerKind::default(),
            taxonomy_format: TaxonomyFormat::default(),
            threads: 0,
            force: false,
        }
    }
}

impl PlacementConfig {
    pub fn validate(&self) -> Result<()> {
        let c = self.consensus_cutoff;
        if !(c > 0.0 && c <= 1.0) {
            return Err(PlacementError::InvalidConsensusCutoff(c));
        }
        if self.taxonomy_format.delimiter.is_empty() {
            return Err(PlacementError::InvalidConfig(
                "taxonomy delimiter must not be empty".to_string(),
            ));
        }
        if self.taxonomy_format.ranks.is_empty() {
            return Err(PlacementError::InvalidConfig(
                "at least one rank must be configured".to_string(),
            ));
        }
        Ok(())
    }

    /// Every setting that changes placement output, one `key=value` per line.
    /// `threads` and `force` are left out.
    pub fn fingerprint(&self) -> String {
        let format = &self.taxonomy_format;
        let metric = self
            .cutoff_metric
            .map(|m| m.to_string())
            .unwrap_or_else(|| "from-file".to_string());
        format!(
            "consensus_cutoff={:?}\ncutoff_metric={}\nweighting={:?}\nmissing_cutoff={:?}\naligner={}\n\
             strain_col={}\ntaxonomy_col={}\ndelimiter={:?}\nranks={}\n",
            self.consensus_cutoff,
            metric,
            self.weighting,
            self.missing_cutoff,
            self.aligner,
            format.strain_col,
            format.taxonomy_col,
            format.delimiter,
            format.ranks.join(","),
        )
    }
}

/// Locations of the tables shared by every sample of a run.
#[derive(Debug, Clone, Default)]
pub struct ReferenceInputs {
    pub taxonomy_table: PathBuf,
    pub cutoff_file: PathBuf,
    pub protein_map: Option<PathBuf>,
    pub abundance_table: Option<PathBuf>,
}

impl ReferenceInputs {
    /// Every input file, for cache freshness checks.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.taxonomy_table.clone(), self.cutoff_file.clone()];
        paths.extend(self.protein_map.iter().cloned());
        paths.extend(self.abundance_table.iter().cloned());
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PlacementConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.consensus_cutoff, 0.75);
        assert_eq!(config.taxonomy_format.ranks.len(), 7);
    }

    #[test]
    fn test_consensus_cutoff_bounds() {
        for bad in [0.0, -0.5, 1.01, f64::NAN] {
            let config = PlacementConfig {
                consensus_cutoff: bad,
                ..Default::default()
            };
            assert!(matches!(
                config.validate(),
                Err(PlacementError::InvalidConsensusCutoff(_))
            ));
        }
        let config = PlacementConfig {
            consensus_cutoff: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fingerprint_tracks_output_settings() {
        let base = PlacementConfig::default();
        let stricter = PlacementConfig {
            consensus_cutoff: 0.9,
            ..Default::default()
        };
        let weighted = PlacementConfig {
            weighting: VoteWeighting::BitScore,
            ..Default::default()
        };
        let more_threads = PlacementConfig {
            threads: 8,
            force: true,
            ..Default::default()
        };
        assert_ne!(base.fingerprint(), stricter.fingerprint());
        assert_ne!(base.fingerprint(), weighted.fingerprint());
        assert_eq!(base.fingerprint(), more_threads.fingerprint());
        assert!(base.fingerprint().contains("consensus_cutoff=0.75\n"));
    }

    #[test]
    fn test_aligner_from_str() {
        assert_eq!("DIAMOND".parse::<AlignerKind>().unwrap(), AlignerKind::Diamond);
        assert_eq!("blastp".parse::<AlignerKind>().unwrap(), AlignerKind::Blast);
        assert!("bowtie".parse::<AlignerKind>().is_err());
        assert_eq!(AlignerKind::Blast.output_extension(), "blast.txt");
    }
}
