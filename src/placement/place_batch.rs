use std::collections::{BTreeMap, BTreeSet};

use log::{info, warn};
use rayon::prelude::*;

use super::TaxonomyConsensusEngine;
use crate::types::{AlignmentHit, ClassificationStatus, ConsensusResult};

/// Batch-level counters reported next to the per-query results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlacementDiagnostics {
    pub total_hits: usize,
    pub orphaned_hits: usize,
    /// Reference ids that had no taxonomy entry
    pub orphaned_references: BTreeSet<String>,
    pub classified: usize,
    pub ambiguous: usize,
    pub unclassified: usize,
}

/// Every query's call, keyed and ordered by query id.
#[derive(Debug, Clone, Default)]
pub struct PlacementBatch {
    pub results: BTreeMap<String, ConsensusResult>,
    pub diagnostics: PlacementDiagnostics,
}

impl TaxonomyConsensusEngine {
    /// Place every distinct query of `hits`.
    pub fn place_all(&self, hits: &[AlignmentHit]) -> PlacementBatch {
        self.place_all_with_queries(hits, std::iter::empty::<&str>())
    }

    /// Like [`place_all`](Self::place_all), but every id in `queries` also gets a
    /// result even if it has no hit at all (it comes back unclassified).
    ///
    /// Query groups are placed in parallel on the current rayon pool; the
    /// output is keyed by query id so completion order never shows.
    pub fn place_all_with_queries<'q, I>(&self, hits: &[AlignmentHit], queries: I) -> PlacementBatch
    where
        I: IntoIterator<Item = &'q str>,
    {
        let mut groups: BTreeMap<&str, Vec<&AlignmentHit>> = BTreeMap::new();
        for hit in hits {
            groups.entry(hit.query_id.as_str()).or_default().push(hit);
        }
        for query in queries {
            groups.entry(query).or_default();
        }
        let groups: Vec<(&str, Vec<&AlignmentHit>)> = groups.into_iter().collect();

        let results: BTreeMap<String, ConsensusResult> = groups
            .par_iter()
            .map(|(query_id, group)| (query_id.to_string(), self.place_query(query_id, group)))
            .collect();

        let mut diagnostics = PlacementDiagnostics {
            total_hits: hits.len(),
            ..Default::default()
        };
        for result in results.values() {
            diagnostics.orphaned_hits += result.orphan_count;
            match result.status {
                ClassificationStatus::Classified => diagnostics.classified += 1,
                ClassificationStatus::Ambiguous { .. } => diagnostics.ambiguous += 1,
                ClassificationStatus::Unclassified => diagnostics.unclassified += 1,
            }
        }
        if diagnostics.orphaned_hits > 0 {
            diagnostics.orphaned_references = hits
                .iter()
                .filter(|hit| self.taxonomy.resolve(&hit.reference_id).is_none())
                .map(|hit| hit.reference_id.clone())
                .collect();
            warn!(
                "{} of {} hits ({} distinct references) have no taxonomy entry and were ignored",
                diagnostics.orphaned_hits,
                diagnostics.total_hits,
                diagnostics.orphaned_references.len()
            );
        }

        info!(
            "Placed {} queries: {} classified, {} ambiguous, {} unclassified",
            results.len(),
            diagnostics.classified,
            diagnostics.ambiguous,
            diagnostics.unclassified
        );

        PlacementBatch {
            results,
            diagnostics,
        }
    }
}
