use std::collections::BTreeMap;

use crate::types::{ConsensusResult, RankCall, RankSummaryRow};

/// Label used for queries assigned at a rank the taxonomy leaves blank.
pub const MISSING_LABEL: &str = "unlabeled";

/// Count queries (and their abundance) per label at `rank`.
///
/// Only queries whose consensus rank is at least as deep as `rank` are
/// counted. Rows are sorted by query count, then abundance, descending,
/// with the label as the final tie-break.
pub fn build_rank_summary<'a, I>(results: I, ranks: &[String], rank: usize) -> Vec<RankSummaryRow>
where
    I: IntoIterator<Item = &'a ConsensusResult>,
{
    let mut per_label: BTreeMap<String, (usize, f64)> = BTreeMap::new();

    for result in results {
        match result.consensus_rank {
            Some(deepest) if deepest >= rank => {}
            _ => continue,
        }
        let label = match &result.lineage[rank] {
            RankCall::Label(label) => label.clone(),
            RankCall::Missing => MISSING_LABEL.to_string(),
            RankCall::Unresolved => continue,
        };
        let entry = per_label.entry(label).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += result.abundance.unwrap_or(0.0);
    }

    let rank_name = ranks.get(rank).cloned().unwrap_or_default();
    let mut rows: Vec<RankSummaryRow> = per_label
        .into_iter()
        .map(|(label, (query_count, abundance))| RankSummaryRow {
            rank: rank_name.clone(),
            label,
            query_count,
            abundance,
        })
        .collect();

    rows.sort_by(|a, b| {
        b.query_count
            .cmp(&a.query_count)
            .then(b.abundance.total_cmp(&a.abundance))
            .then(a.label.cmp(&b.label))
    });
    rows
}

/// Summary rows for every rank, general to specific.
pub fn build_full_summary(results: &BTreeMap<String, ConsensusResult>, ranks: &[String]) -> Vec<RankSummaryRow> {
    (0..ranks.len())
        .flat_map(|rank| build_rank_summary(results.values(), ranks, rank))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClassificationStatus;

    fn classified(id: &str, calls: Vec<RankCall>, rank: usize, abundance: Option<f64>) -> ConsensusResult {
        let mut r = ConsensusResult::unclassified(id, calls.len());
        r.status = ClassificationStatus::Classified;
        r.consensus_rank = Some(rank);
        r.lineage = calls;
        r.abundance = abundance;
        r
    }

    fn label(s: &str) -> RankCall {
        RankCall::Label(s.to_string())
    }

    #[test]
    fn test_rank_summary_counts() {
        let ranks: Vec<String> = vec!["genus".into(), "species".into()];
        let mut results = BTreeMap::new();
        results.insert(
            "t1".to_string(),
            classified("t1", vec![label("Homo"), label("H. sapiens")], 1, Some(10.0)),
        );
        results.insert(
            "t2".to_string(),
            classified("t2", vec![label("Homo"), RankCall::Unresolved], 0, Some(5.0)),
        );
        results.insert(
            "t3".to_string(),
            classified("t3", vec![label("Pan"), RankCall::Unresolved], 0, None),
        );
        results.insert(
            "t4".to_string(),
            classified("t4", vec![RankCall::Missing, label("X. y")], 1, Some(1.0)),
        );
        results.insert("t5".to_string(), ConsensusResult::unclassified("t5", 2));

        let genus = build_rank_summary(results.values(), &ranks, 0);
        assert_eq!(genus.len(), 3);
        assert_eq!(genus[0].label, "Homo");
        assert_eq!(genus[0].query_count, 2);
        assert_eq!(genus[0].abundance, 15.0);
        assert_eq!(genus[1].label, MISSING_LABEL);
        assert_eq!(genus[2].label, "Pan");

        let species = build_rank_summary(results.values(), &ranks, 1);
        assert_eq!(species.len(), 2);
        assert_eq!(species[0].label, "H. sapiens");
        assert_eq!(species[0].rank, "species");

        let all = build_full_summary(&results, &ranks);
        assert_eq!(all.len(), 5);
    }
}
