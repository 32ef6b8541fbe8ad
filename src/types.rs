//src/types.rs

use std::fmt;

/// One row of an aligner's tabular output.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentHit {
    pub query_id: String,
    pub reference_id: String,
    pub percent_identity: f64, // 0-100
    pub e_value: f64,
    pub bit_score: Option<f64>,
}

impl AlignmentHit {
    pub fn new(query_id: &str, reference_id: &str, percent_identity: f64, e_value: f64) -> Self {
        Self {
            query_id: query_id.to_string(),
            reference_id: reference_id.to_string(),
            percent_identity,
            e_value,
            bit_score: None,
        }
    }

    pub fn with_bit_score(mut self, bit_score: f64) -> Self {
        self.bit_score = Some(bit_score);
        self
    }
}

/// Rank labels ordered from most general to most specific.
/// `None` marks a rank the taxonomy table legitimately leaves blank.
pub type Lineage = Vec<Option<String>>;

/// What the engine says about a single rank of a query's lineage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RankCall {
    /// Assigned, with a label from the taxonomy table
    Label(String),
    /// Assigned, but the taxonomy table has no label at this rank
    Missing,
    /// Deeper than the consensus rank
    Unresolved,
}

pub const UNRESOLVED_MARKER: &str = "unresolved";

impl fmt::Display for RankCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RankCall::Label(label) => f.write_str(label),
            RankCall::Missing => Ok(()),
            RankCall::Unresolved => f.write_str(UNRESOLVED_MARKER),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationStatus {
    Classified,
    /// Consensus was reached, but only after an exact tie at `rank` forced a fallback
    Ambiguous { rank: usize },
    Unclassified,
}

impl ClassificationStatus {
    pub fn label(&self, ranks: &[String]) -> String {
        match self {
            ClassificationStatus::Classified => "classified".to_string(),
            ClassificationStatus::Ambiguous { rank } => {
                let name = ranks.get(*rank).map(String::as_str).unwrap_or("?");
                format!("ambiguous-at-{}", name)
            }
            ClassificationStatus::Unclassified => "unclassified".to_string(),
        }
    }
}

/// The engine's call for one query sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusResult {
    pub query_id: String,
    pub status: ClassificationStatus,
    /// Index into the taxonomy's rank list; `None` when unclassified
    pub consensus_rank: Option<usize>,
    /// One entry per rank of the taxonomy table
    pub lineage: Vec<RankCall>,
    pub consensus_fraction: f64,
    pub qualifying_hits: usize,
    pub orphan_count: usize,
    pub reference_ids: Vec<String>,
    pub best_identity: Option<f64>,
    pub best_e_value: Option<f64>,
    pub abundance: Option<f64>,
    /// Deepest rank where the two leading labels tied exactly
    pub tied_rank: Option<usize>,
}

impl ConsensusResult {
    pub fn unclassified(query_id: &str, rank_count: usize) -> Self {
        Self {
            query_id: query_id.to_string(),
            status: ClassificationStatus::Unclassified,
            consensus_rank: None,
            lineage: vec![RankCall::Unresolved; rank_count],
            consensus_fraction: 0.0,
            qualifying_hits: 0,
            orphan_count: 0,
            reference_ids: Vec::new(),
            best_identity: None,
            best_e_value: None,
            abundance: None,
            tied_rank: None,
        }
    }

    pub fn is_classified(&self) -> bool {
        self.consensus_rank.is_some()
    }

    /// The label at the consensus rank, if any.
    pub fn classification(&self) -> Option<&RankCall> {
        self.consensus_rank.and_then(|r| self.lineage.get(r))
    }
}

/// A structured representation of one line of the per-query output file.
#[derive(Debug, Clone)]
pub struct PlacementOutputLine {
    pub query_id: String,
    pub status: String,
    pub classification_level: String,
    pub classification: String,
    pub full_classification: String,
    pub consensus_fraction: f64,
    pub qualifying_hits: usize,
    pub orphan_hits: usize,
    pub max_pid: Option<f64>,
    pub min_evalue: Option<f64>,
    pub abundance: Option<f64>,
    pub reference_ids: String,
    /// Rank where an exact tie blocked consensus
    pub tied_rank: Option<String>,
}

/// One row of a per-rank summary table.
#[derive(Debug, Clone, PartialEq)]
pub struct RankSummaryRow {
    pub rank: String,
    pub label: String,
    pub query_count: usize,
    pub abundance: f64,
}
