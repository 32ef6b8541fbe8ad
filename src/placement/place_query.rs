use std::collections::BTreeMap;

use super::TaxonomyConsensusEngine;
use crate::config::VoteWeighting;
use crate::types::{AlignmentHit, ClassificationStatus, ConsensusResult, Lineage, RankCall};

/// Outcome of tallying one rank.
#[derive(Debug, PartialEq)]
enum Vote<'a> {
    /// No qualifying hit carries a label at this rank
    Empty,
    /// The two leading labels have exactly the same weight
    Tie(f64),
    Winner(&'a str, f64),
}

/// Pick the heaviest label. Exact ties are reported, never broken.
fn plurality<'a>(tally: &BTreeMap<&'a str, f64>) -> Vote<'a> {
    let mut best: Option<(&str, f64)> = None;
    let mut tied = false;
    for (&label, &weight) in tally {
        match best {
            Some((_, w)) if weight > w => {
                best = Some((label, weight));
                tied = false;
            }
            Some((_, w)) if weight == w => tied = true,
            Some(_) => {}
            None => best = Some((label, weight)),
        }
    }
    match best {
        None => Vote::Empty,
        Some((_, w)) if tied => Vote::Tie(w),
        Some((label, w)) => Vote::Winner(label, w),
    }
}

/// Lexicographically first label with the most weight; `Missing` if no hit has one.
fn majority_label(hits: &[(&AlignmentHit, &Lineage, f64)], rank: usize) -> RankCall {
    let mut tally: BTreeMap<&str, f64> = BTreeMap::new();
    for (_, lineage, weight) in hits {
        if let Some(label) = lineage[rank].as_deref() {
            *tally.entry(label).or_insert(0.0) += weight;
        }
    }
    let mut best: Option<(&str, f64)> = None;
    for (label, weight) in tally {
        if best.map_or(true, |(_, w)| weight > w) {
            best = Some((label, weight));
        }
    }
    match best {
        Some((label, _)) => RankCall::Label(label.to_string()),
        None => RankCall::Missing,
    }
}

impl TaxonomyConsensusEngine {
    #[inline]
    fn vote_weight(&self, hit: &AlignmentHit) -> f64 {
        match self.weighting {
            VoteWeighting::HitCount => 1.0,
            VoteWeighting::BitScore => hit.bit_score.unwrap_or(1.0).max(0.0),
            VoteWeighting::Identity => hit.percent_identity / 100.0,
        }
    }

    /// Place one query from its hits. Never fails: orphaned hits are counted,
    /// and a query without consensus comes back `Unclassified`.
    ///
    /// Ranks are visited deepest first. At each rank only the hits passing
    /// that rank's cutoff vote; hits without a label at the rank still count
    /// toward the total. The first rank whose unique plurality label reaches
    /// the consensus cutoff is the consensus rank.
    pub fn place_query(&self, query_id: &str, hits: &[&AlignmentHit]) -> ConsensusResult {
        let depth = self.taxonomy.depth();
        let mut result = ConsensusResult::unclassified(query_id, depth);
        result.abundance = self
            .abundance
            .as_ref()
            .and_then(|table| table.get(query_id).copied());

        let mut resolved: Vec<(&AlignmentHit, &Lineage, f64)> = Vec::with_capacity(hits.len());
        for &hit in hits {
            match self.taxonomy.resolve(&hit.reference_id) {
                Some(lineage) => resolved.push((hit, lineage, self.vote_weight(hit))),
                None => result.orphan_count += 1,
            }
        }
        if resolved.is_empty() {
            return result;
        }

        // fixed order => floating-point sums don't depend on input order
        resolved.sort_by(|a, b| {
            a.0.reference_id
                .cmp(&b.0.reference_id)
                .then(b.0.percent_identity.total_cmp(&a.0.percent_identity))
                .then(a.0.e_value.total_cmp(&b.0.e_value))
        });

        result.best_identity = resolved
            .iter()
            .map(|(h, _, _)| h.percent_identity)
            .max_by(f64::total_cmp);
        result.best_e_value = resolved.iter().map(|(h, _, _)| h.e_value).min_by(f64::total_cmp);

        let mut tied_rank = None;
        let mut most_qualifying = 0usize;

        for rank in (0..depth).rev() {
            let qualifying: Vec<(&AlignmentHit, &Lineage, f64)> = resolved
                .iter()
                .copied()
                .filter(|(hit, _, _)| self.cutoffs.qualifies(hit, rank))
                .collect();
            most_qualifying = most_qualifying.max(qualifying.len());

            let mut total = 0.0;
            let mut tally: BTreeMap<&str, f64> = BTreeMap::new();
            for (_, lineage, weight) in &qualifying {
                total += weight;
                if let Some(label) = lineage[rank].as_deref() {
                    *tally.entry(label).or_insert(0.0) += weight;
                }
            }
            if !(total.is_finite() && total > 0.0) {
                continue;
            }

            let (label, weight) = match plurality(&tally) {
                Vote::Empty => continue,
                Vote::Tie(weight) => {
                    // only a tie that would otherwise have passed makes the call ambiguous
                    if tied_rank.is_none() && weight / total >= self.consensus_cutoff {
                        tied_rank = Some(rank);
                    }
                    continue;
                }
                Vote::Winner(label, weight) => (label, weight),
            };

            let fraction = weight / total;
            if !fraction.is_finite() || fraction < self.consensus_cutoff {
                continue;
            }

            let supporting: Vec<(&AlignmentHit, &Lineage, f64)> = qualifying
                .iter()
                .copied()
                .filter(|(_, lineage, _)| lineage[rank].as_deref() == Some(label))
                .collect();

            let mut lineage = Vec::with_capacity(depth);
            for shallower in 0..rank {
                lineage.push(majority_label(&supporting, shallower));
            }
            lineage.push(RankCall::Label(label.to_string()));
            lineage.resize(depth, RankCall::Unresolved);

            let mut reference_ids: Vec<String> = qualifying
                .iter()
                .map(|(hit, _, _)| hit.reference_id.clone())
                .collect();
            reference_ids.dedup();

            result.status = match tied_rank {
                Some(rank) => ClassificationStatus::Ambiguous { rank },
                None => ClassificationStatus::Classified,
            };
            result.consensus_rank = Some(rank);
            result.lineage = lineage;
            result.consensus_fraction = fraction;
            result.qualifying_hits = qualifying.len();
            result.reference_ids = reference_ids;
            result.tied_rank = tied_rank;
            return result;
        }

        let mut reference_ids: Vec<String> = resolved
            .iter()
            .map(|(hit, _, _)| hit.reference_id.clone())
            .collect();
        reference_ids.dedup();

        result.qualifying_hits = most_qualifying;
        result.reference_ids = reference_ids;
        result.tied_rank = tied_rank;
        result
    }
}
