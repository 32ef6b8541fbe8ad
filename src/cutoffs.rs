//src/cutoffs.rs

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use clap::ValueEnum;
use log::debug;
use serde::Deserialize;

use crate::config::MissingCutoffPolicy;
use crate::error::{PlacementError, Result};
use crate::types::AlignmentHit;

/// The alignment statistic a cutoff threshold is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CutoffMetric {
    /// Minimum percent identity
    #[default]
    #[value(name = "pid", alias = "percent-identity")]
    PercentIdentity,
    /// Maximum e-value
    #[value(name = "evalue", alias = "e-value")]
    EValue,
}

impl CutoffMetric {
    /// Does `hit` pass `threshold` under this metric?
    #[inline]
    pub fn passes(&self, hit: &AlignmentHit, threshold: f64) -> bool {
        match self {
            CutoffMetric::PercentIdentity => hit.percent_identity >= threshold,
            CutoffMetric::EValue => hit.e_value <= threshold,
        }
    }

    /// Is `deeper` at least as strict as `shallower`?
    pub fn at_least_as_strict(&self, deeper: f64, shallower: f64) -> bool {
        match self {
            CutoffMetric::PercentIdentity => deeper >= shallower,
            CutoffMetric::EValue => deeper <= shallower,
        }
    }

    fn check_value(&self, value: f64) -> std::result::Result<(), String> {
        match self {
            CutoffMetric::PercentIdentity if !(0.0..=100.0).contains(&value) => {
                Err(format!("percent identity threshold {} is outside 0-100", value))
            }
            CutoffMetric::EValue if !(value >= 0.0 && value.is_finite()) => {
                Err(format!("e-value threshold {} must be a finite value >= 0", value))
            }
            _ => Ok(()),
        }
    }
}

impl FromStr for CutoffMetric {
    type Err = PlacementError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pid" | "percent_identity" | "percent-identity" | "identity" => {
                Ok(CutoffMetric::PercentIdentity)
            }
            "evalue" | "e_value" | "e-value" => Ok(CutoffMetric::EValue),
            other => Err(PlacementError::InvalidConfig(format!(
                "unknown cutoff metric '{}', expected pid or evalue",
                other
            ))),
        }
    }
}

impl fmt::Display for CutoffMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CutoffMetric::PercentIdentity => f.write_str("pid"),
            CutoffMetric::EValue => f.write_str("evalue"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StructuredCutoffs {
    #[serde(default)]
    metric: Option<String>,
    thresholds: BTreeMap<String, f64>,
    #[serde(default)]
    mandatory: Vec<String>,
}

/// A cutoff file is either the structured form or a bare `rank: value` mapping.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CutoffDocument {
    Structured(StructuredCutoffs),
    Flat(BTreeMap<String, f64>),
}

/// Per-rank thresholds, indexed like the taxonomy table's ranks.
#[derive(Debug, Clone, PartialEq)]
pub struct CutoffTable {
    pub metric: CutoffMetric,
    pub thresholds: Vec<Option<f64>>,
    pub mandatory: Vec<bool>,
}

impl CutoffTable {
    /// Build and validate a table. `thresholds` holds `(rank name, value)`
    /// pairs; rank names are matched case-insensitively against `ranks`.
    pub fn new(
        metric: CutoffMetric,
        ranks: &[String],
        thresholds: &[(String, f64)],
        mandatory: &[String],
        policy: MissingCutoffPolicy,
    ) -> Result<Self> {
        let mut per_rank = vec![None; ranks.len()];
        for (name, value) in thresholds {
            let idx = rank_index(ranks, name)?;
            metric.check_value(*value).map_err(PlacementError::InvalidConfig)?;
            per_rank[idx] = Some(*value);
        }

        let mut required = vec![policy == MissingCutoffPolicy::Strict; ranks.len()];
        for name in mandatory {
            required[rank_index(ranks, name)?] = true;
        }

        for (idx, rank) in ranks.iter().enumerate() {
            if required[idx] && per_rank[idx].is_none() {
                return Err(PlacementError::MissingMandatoryCutoff(rank.clone()));
            }
        }

        let table = Self {
            metric,
            thresholds: per_rank,
            mandatory: required,
        };
        table.check_monotonic(ranks)?;
        Ok(table)
    }

    /// Load a YAML cutoff file. `metric_override` wins over the file's `metric` key.
    pub fn from_yaml<P: AsRef<Path>>(
        path: P,
        ranks: &[String],
        metric_override: Option<CutoffMetric>,
        policy: MissingCutoffPolicy,
    ) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| PlacementError::io(path, e))?;
        Self::from_yaml_str(&text, ranks, metric_override, policy).map_err(|e| match e {
            PlacementError::InvalidConfig(detail) => PlacementError::MalformedCutoffs {
                path: path.to_path_buf(),
                detail,
            },
            other => other,
        })
    }

    pub fn from_yaml_str(
        text: &str,
        ranks: &[String],
        metric_override: Option<CutoffMetric>,
        policy: MissingCutoffPolicy,
    ) -> Result<Self> {
        let doc: CutoffDocument = serde_yaml::from_str(text)
            .map_err(|e| PlacementError::InvalidConfig(e.to_string()))?;

        let (file_metric, thresholds, mandatory) = match doc {
            CutoffDocument::Structured(s) => {
                let metric = s.metric.as_deref().map(str::parse::<CutoffMetric>).transpose()?;
                (metric, s.thresholds, s.mandatory)
            }
            CutoffDocument::Flat(map) => (None, map, Vec::new()),
        };
        let metric = metric_override.or(file_metric).unwrap_or_default();
        debug!("Cutoff metric: {}, {} rank thresholds", metric, thresholds.len());

        let pairs: Vec<(String, f64)> = thresholds.into_iter().collect();
        Self::new(metric, ranks, &pairs, &mandatory, policy)
    }

    /// Does `hit` count at rank `rank`? A rank without a threshold filters nothing.
    #[inline]
    pub fn qualifies(&self, hit: &AlignmentHit, rank: usize) -> bool {
        match self.thresholds.get(rank).copied().flatten() {
            Some(t) => self.metric.passes(hit, t),
            None => true,
        }
    }

    /// Deeper ranks must be at least as strict as every shallower rank that has a threshold.
    fn check_monotonic(&self, ranks: &[String]) -> Result<()> {
        let mut previous: Option<(usize, f64)> = None;
        for (idx, threshold) in self.thresholds.iter().enumerate() {
            let Some(value) = *threshold else { continue };
            if let Some((prev_idx, prev_value)) = previous {
                if !self.metric.at_least_as_strict(value, prev_value) {
                    return Err(PlacementError::NonMonotonicCutoffs {
                        shallower: ranks[prev_idx].clone(),
                        shallower_value: prev_value,
                        deeper: ranks[idx].clone(),
                        deeper_value: value,
                    });
                }
            }
            previous = Some((idx, value));
        }
        Ok(())
    }
}

fn rank_index(ranks: &[String], name: &str) -> Result<usize> {
    ranks
        .iter()
        .position(|r| r.eq_ignore_ascii_case(name.trim()))
        .ok_or_else(|| PlacementError::UnknownRank(name.to_string()))
}
