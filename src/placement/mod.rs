pub mod place_batch;
pub mod place_query;
pub mod placement_stats;

use std::sync::Arc;

use crate::abundance::AbundanceTable;
use crate::config::{PlacementConfig, VoteWeighting};
use crate::cutoffs::CutoffTable;
use crate::error::{PlacementError, Result};
use crate::taxdb::TaxonomyTable;

pub use place_batch::{PlacementBatch, PlacementDiagnostics};

/// Reduces each query's alignment hits to one consensus lineage.
///
/// Holds only read-only state, so a single engine is shared by every
/// worker thread.
#[derive(Debug, Clone)]
pub struct TaxonomyConsensusEngine {
    taxonomy: Arc<TaxonomyTable>,
    cutoffs: Arc<CutoffTable>,
    abundance: Option<Arc<AbundanceTable>>,
    consensus_cutoff: f64,
    weighting: VoteWeighting,
}

impl TaxonomyConsensusEngine {
    pub fn new(
        taxonomy: Arc<TaxonomyTable>,
        cutoffs: Arc<CutoffTable>,
        config: &PlacementConfig,
    ) -> Result<Self> {
        config.validate()?;
        if cutoffs.thresholds.len() != taxonomy.depth() {
            return Err(PlacementError::InvalidConfig(format!(
                "cutoff table covers {} ranks but the taxonomy has {}",
                cutoffs.thresholds.len(),
                taxonomy.depth()
            )));
        }
        Ok(Self {
            taxonomy,
            cutoffs,
            abundance: None,
            consensus_cutoff: config.consensus_cutoff,
            weighting: config.weighting,
        })
    }

    pub fn with_abundance(mut self, abundance: Arc<AbundanceTable>) -> Self {
        self.abundance = Some(abundance);
        self
    }

    pub fn ranks(&self) -> &[String] {
        &self.taxonomy.ranks
    }

    pub fn taxonomy(&self) -> &TaxonomyTable {
        &self.taxonomy
    }

    pub fn consensus_cutoff(&self) -> f64 {
        self.consensus_cutoff
    }
}
