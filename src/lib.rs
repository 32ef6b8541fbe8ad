// src/lib.rs
pub mod abundance;
pub mod cache;
pub mod config;
pub mod cutoffs;
pub mod error;
pub mod hits;
pub mod placement;
pub mod taxdb;
pub mod types;

use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info};
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::abundance::parse_abundance_table;
use crate::cache::ArtifactCache;
use crate::config::{AlignerKind, PlacementConfig, ReferenceInputs};
use crate::cutoffs::CutoffTable;
use crate::error::{PlacementError, Result};
use crate::hits::read_hit_table;
use crate::placement::placement_stats::build_full_summary;
use crate::placement::{PlacementDiagnostics, TaxonomyConsensusEngine};
use crate::taxdb::{parse_protein_map, parse_taxonomy_table};
use crate::types::{ConsensusResult, PlacementOutputLine, RankSummaryRow};

const NA: &str = "NA";

/// Placement results of one batch. Structured data only; text is generated on demand.
pub struct PlacementResults {
    /// Rank names of the taxonomy the results refer to
    pub ranks: Vec<String>,
    /// One result per query, ordered by query id
    pub results: BTreeMap<String, ConsensusResult>,
    pub diagnostics: PlacementDiagnostics,
    /// Per-rank label counts
    pub summary_rows: Vec<RankSummaryRow>,
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    value
        .map(|v| format!("{:.*}", precision, v))
        .unwrap_or_else(|| NA.to_string())
}

impl PlacementResults {
    fn from_batch(ranks: Vec<String>, batch: placement::PlacementBatch) -> Self {
        let summary_rows = build_full_summary(&batch.results, &ranks);
        Self {
            ranks,
            results: batch.results,
            diagnostics: batch.diagnostics,
            summary_rows,
        }
    }

    /// Structured version of the output rows.
    pub fn output_lines(&self) -> Vec<PlacementOutputLine> {
        self.results
            .values()
            .map(|r| {
                let (level, classification) = match r.consensus_rank {
                    Some(rank) => (self.ranks[rank].clone(), r.lineage[rank].to_string()),
                    None => (NA.to_string(), NA.to_string()),
                };
                PlacementOutputLine {
                    query_id: r.query_id.clone(),
                    status: r.status.label(&self.ranks),
                    classification_level: level,
                    classification,
                    full_classification: r
                        .lineage
                        .iter()
                        .map(|c| c.to_string())
                        .collect::<Vec<_>>()
                        .join(";"),
                    consensus_fraction: r.consensus_fraction,
                    qualifying_hits: r.qualifying_hits,
                    orphan_hits: r.orphan_count,
                    max_pid: r.best_identity,
                    min_evalue: r.best_e_value,
                    abundance: r.abundance,
                    reference_ids: r.reference_ids.join(","),
                    tied_rank: r.tied_rank.map(|rank| self.ranks[rank].clone()),
                }
            })
            .collect()
    }

    /// Generate the per-query output file on demand
    pub fn get_placement_output(&self) -> String {
        let mut output = String::new();
        output.push_str(
            "query_id\tstatus\tclassification_level\tclassification\tfull_classification\t\
             consensus_fraction\tqualifying_hits\torphan_hits\tmax_pid\tmin_evalue\tabundance\treference_ids\ttied_rank\n",
        );
        for line in self.output_lines() {
            let min_evalue = line
                .min_evalue
                .map(|e| format!("{:e}", e))
                .unwrap_or_else(|| NA.to_string());
            let _ = writeln!(
                output,
                "{}\t{}\t{}\t{}\t{}\t{:.4}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                line.query_id,
                line.status,
                line.classification_level,
                line.classification,
                line.full_classification,
                line.consensus_fraction,
                line.qualifying_hits,
                line.orphan_hits,
                fmt_opt(line.max_pid, 2),
                min_evalue,
                fmt_opt(line.abundance, 2),
                line.reference_ids,
                line.tied_rank.as_deref().unwrap_or(NA),
            );
        }
        output
    }

    /// Generate the per-rank summary table on demand
    pub fn get_summary_report(&self) -> String {
        let mut output = String::new();
        output.push_str("rank\tlabel\tquery_count\tabundance\n");
        for row in &self.summary_rows {
            let _ = writeln!(
                output,
                "{}\t{}\t{}\t{:.2}",
                row.rank, row.label, row.query_count, row.abundance
            );
        }
        output
    }

    pub fn write_outputs<P: AsRef<Path>, Q: AsRef<Path>>(&self, placement_path: P, summary_path: Q) -> Result<()> {
        let placement_path = placement_path.as_ref();
        let summary_path = summary_path.as_ref();
        // placement file last: it is what the cache checks
        fs::write(summary_path, self.get_summary_report())
            .map_err(|e| PlacementError::io(summary_path, e))?;
        fs::write(placement_path, self.get_placement_output())
            .map_err(|e| PlacementError::io(placement_path, e))?;
        Ok(())
    }
}

/// Loads and validates every shared table, then builds the engine.
/// Nothing is placed if any of them fails to load.
pub fn load_engine(config: &PlacementConfig, inputs: &ReferenceInputs) -> Result<TaxonomyConsensusEngine> {
    config.validate()?;

    let mut taxonomy = parse_taxonomy_table(&inputs.taxonomy_table, &config.taxonomy_format)?;
    if let Some(path) = &inputs.protein_map {
        taxonomy.attach_protein_map(parse_protein_map(path)?);
    }

    let cutoffs = CutoffTable::from_yaml(
        &inputs.cutoff_file,
        &taxonomy.ranks,
        config.cutoff_metric,
        config.missing_cutoff,
    )?;
    info!(
        "Cutoff metric {}, consensus cutoff {}",
        cutoffs.metric, config.consensus_cutoff
    );

    let mut engine = TaxonomyConsensusEngine::new(Arc::new(taxonomy), Arc::new(cutoffs), config)?;
    if let Some(path) = &inputs.abundance_table {
        engine = engine.with_abundance(Arc::new(parse_abundance_table(path)?));
    }
    Ok(engine)
}

/// Run `f` on a rayon pool of `threads` workers (0 = the global pool).
fn in_pool<T, F>(threads: usize, f: F) -> Result<T>
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    if threads == 0 {
        return Ok(f());
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| PlacementError::InvalidConfig(format!("cannot build thread pool: {}", e)))?;
    Ok(pool.install(f))
}

/// Unified function to place every query of one hit table
pub fn place_taxonomy<P: AsRef<Path>>(
    config: &PlacementConfig,
    inputs: &ReferenceInputs,
    hit_table: P,
) -> Result<PlacementResults> {
    // 1. Shared tables first: fail before any placement work
    let engine = load_engine(config, inputs)?;

    // 2. Hits of this batch
    let hits = read_hit_table(hit_table.as_ref(), config.aligner)?;
    info!("Read {} hits from {}", hits.len(), hit_table.as_ref().display());

    // 3. Place
    let batch = in_pool(config.threads, || engine.place_all(&hits))?;
    Ok(PlacementResults::from_batch(engine.ranks().to_vec(), batch))
}

/// One sample's hit table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleJob {
    pub name: String,
    pub hit_table: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    Placed {
        queries: usize,
        classified: usize,
        orphaned_hits: usize,
    },
    /// Output was fresh, nothing recomputed
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleReport {
    pub sample: String,
    pub output: PathBuf,
    pub outcome: SampleOutcome,
}

pub fn placement_output_path(out_dir: &Path, sample: &str) -> PathBuf {
    out_dir.join(format!("{}-estimated-taxonomy.out", sample))
}

pub fn summary_output_path(out_dir: &Path, sample: &str) -> PathBuf {
    out_dir.join(format!("{}-summary.tsv", sample))
}

/// Find every hit table of `aligner` in `dir` (optionally gzipped), sorted by sample name.
pub fn discover_samples<P: AsRef<Path>>(dir: P, aligner: AlignerKind) -> Result<Vec<SampleJob>> {
    let dir = dir.as_ref();
    let suffix = format!(".{}", aligner.output_extension());
    let gz_suffix = format!("{}.gz", suffix);

    let mut samples: Vec<SampleJob> = fs::read_dir(dir)
        .map_err(|e| PlacementError::io(dir, e))?
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            if !path.is_file() {
                return None;
            }
            let filename = path.file_name()?.to_string_lossy().to_string();
            let name = filename
                .strip_suffix(&gz_suffix)
                .or_else(|| filename.strip_suffix(&suffix))?;
            if name.is_empty() {
                return None;
            }
            Some(SampleJob {
                name: name.to_string(),
                hit_table: path,
            })
        })
        .collect();
    samples.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(samples)
}

fn run_sample(
    engine: &TaxonomyConsensusEngine,
    config: &PlacementConfig,
    cache: &ArtifactCache,
    sample: &SampleJob,
    out_dir: &Path,
    reference_paths: &[PathBuf],
) -> SampleReport {
    let output = placement_output_path(out_dir, &sample.name);
    let summary = summary_output_path(out_dir, &sample.name);

    let mut inputs = reference_paths.to_vec();
    inputs.push(sample.hit_table.clone());

    let outcome = if !cache.needs_rebuild(&output, &inputs) {
        SampleOutcome::Skipped
    } else {
        let placed = read_hit_table(&sample.hit_table, config.aligner).and_then(|hits| {
            let batch = engine.place_all(&hits);
            let results = PlacementResults::from_batch(engine.ranks().to_vec(), batch);
            results.write_outputs(&output, &summary)?;
            cache.record(&output).map_err(|e| PlacementError::io(&output, e))?;
            Ok(results)
        });
        match placed {
            Ok(results) => SampleOutcome::Placed {
                queries: results.results.len(),
                classified: results.diagnostics.classified + results.diagnostics.ambiguous,
                orphaned_hits: results.diagnostics.orphaned_hits,
            },
            Err(e) => {
                error!("Sample {} failed: {}", sample.name, e);
                SampleOutcome::Failed(e.to_string())
            }
        }
    };

    SampleReport {
        sample: sample.name.clone(),
        output,
        outcome,
    }
}

/// Place every sample, writing `<sample>-estimated-taxonomy.out` and
/// `<sample>-summary.tsv` into `out_dir`.
///
/// Shared tables are loaded once, before any sample is dispatched; a broken
/// taxonomy or cutoff file is the only error returned. Per-sample problems
/// (unreadable hit table, write failure) end up in that sample's report.
/// `on_done` is called from worker threads as samples finish.
pub fn run_samples<F>(
    config: &PlacementConfig,
    inputs: &ReferenceInputs,
    samples: &[SampleJob],
    out_dir: &Path,
    on_done: F,
) -> Result<Vec<SampleReport>>
where
    F: Fn(&SampleReport) + Sync,
{
    let engine = load_engine(config, inputs)?;
    fs::create_dir_all(out_dir).map_err(|e| PlacementError::io(out_dir, e))?;

    let reference_paths = inputs.paths();
    let mut params = config.fingerprint();
    for path in &reference_paths {
        let _ = writeln!(params, "input={}", path.display());
    }
    let cache = ArtifactCache::new(config.force).with_params(params);
    let reports = Mutex::new(Vec::with_capacity(samples.len()));

    in_pool(config.threads, || {
        samples.par_iter().for_each(|sample| {
            let report = run_sample(&engine, config, &cache, sample, out_dir, &reference_paths);
            on_done(&report);
            reports.lock().push(report);
        })
    })?;

    let mut reports = reports.into_inner();
    reports.sort_by(|a, b| a.sample.cmp(&b.sample));
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClassificationStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TAXONOMY: &str = "strain_name\ttaxonomy\n\
        refA\tAlveolata;Dinoflagellata;Dinophyceae;Gymnodiniales;Gymnodiniaceae;Gymnodinium;Gymnodinium catenatum\n\
        refB\tAlveolata;Dinoflagellata;Dinophyceae;Gymnodiniales;Gymnodiniaceae;Gymnodinium;Gymnodinium instriatum\n\
        refC\tStramenopiles;Ochrophyta;Bacillariophyta;Naviculales;Naviculaceae;Navicula;\n\
        refD\tStramenopiles;Ochrophyta;Bacillariophyta;Naviculales;Naviculaceae;Navicula;Navicula tripunctata\n";

    const CUTOFFS: &str = "species: 95\ngenus: 90\nfamily: 65\norder: 50\nclass: 30\n";

    const HITS: &str = "\
q1\trefA\t98.0\t100\t2\t0\t1\t100\t1\t100\t1e-50\t200
q1\trefB\t97.0\t100\t3\t0\t1\t100\t1\t100\t1e-48\t190
q2\trefC\t70.0\t100\t30\t0\t1\t100\t1\t100\t1e-20\t90
q3\trefZ\t99.0\t100\t1\t0\t1\t100\t1\t100\t1e-60\t250
";

    fn setup(dir: &Path) -> ReferenceInputs {
        fs::write(dir.join("tax-table.txt"), TAXONOMY).unwrap();
        fs::write(dir.join("tax-cutoffs.yaml"), CUTOFFS).unwrap();
        fs::write(dir.join("s1.diamond.out"), HITS).unwrap();
        ReferenceInputs {
            taxonomy_table: dir.join("tax-table.txt"),
            cutoff_file: dir.join("tax-cutoffs.yaml"),
            protein_map: None,
            abundance_table: None,
        }
    }

    #[test]
    fn test_place_taxonomy_api() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = setup(dir.path());
        let results =
            place_taxonomy(&PlacementConfig::default(), &inputs, dir.path().join("s1.diamond.out"))
                .expect("placement failed");

        assert_eq!(results.results.len(), 3);
        let q1 = &results.results["q1"];
        assert_eq!(q1.status, ClassificationStatus::Classified);
        assert_eq!(results.ranks[q1.consensus_rank.unwrap()], "genus");

        let q2 = &results.results["q2"];
        assert_eq!(results.ranks[q2.consensus_rank.unwrap()], "family");

        let q3 = &results.results["q3"];
        assert_eq!(q3.status, ClassificationStatus::Unclassified);
        assert_eq!(q3.orphan_count, 1);

        let text = results.get_placement_output();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("query_id\tstatus"));
        let q1_fields: Vec<&str> = lines[1].split('\t').collect();
        assert_eq!(q1_fields[0], "q1");
        assert_eq!(q1_fields[1], "classified");
        assert_eq!(q1_fields[2], "genus");
        assert_eq!(q1_fields[3], "Gymnodinium");
        assert_eq!(
            q1_fields[4],
            "Alveolata;Dinoflagellata;Dinophyceae;Gymnodiniales;Gymnodiniaceae;Gymnodinium;unresolved"
        );
        assert_eq!(q1_fields[5], "1.0000");
        assert_eq!(q1_fields[8], "98.00");
        assert_eq!(q1_fields[11], "refA,refB");
        assert_eq!(q1_fields[12], "NA");

        let q3_fields: Vec<&str> = lines[3].split('\t').collect();
        assert_eq!(q3_fields[1], "unclassified");
        assert_eq!(q3_fields[2], "NA");
        assert_eq!(q3_fields[7], "1");

        let summary = results.get_summary_report();
        assert!(summary.contains("genus\tGymnodinium\t1\t0.00"));
        assert!(summary.contains("family\tNaviculaceae\t1\t0.00"));
    }

    #[test]
    fn test_tie_is_written_for_unclassified_queries() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = setup(dir.path());
        let hits = dir.path().join("tie.diamond.out");
        fs::write(
            &hits,
            "q9\trefA\t99.0\t100\t1\t0\t1\t100\t1\t100\t1e-50\t200\n\
             q9\trefD\t99.0\t100\t1\t0\t1\t100\t1\t100\t1e-50\t200\n",
        )
        .unwrap();
        let config = PlacementConfig {
            consensus_cutoff: 0.5,
            ..Default::default()
        };
        let results = place_taxonomy(&config, &inputs, &hits).unwrap();
        let q9 = &results.results["q9"];
        assert_eq!(q9.status, ClassificationStatus::Unclassified);

        let text = results.get_placement_output();
        assert!(text.lines().next().unwrap().ends_with("\treference_ids\ttied_rank"));
        let fields: Vec<&str> = text.lines().nth(1).unwrap().split('\t').collect();
        assert_eq!(fields[1], "unclassified");
        assert_eq!(fields[12], "species");
    }

    #[test]
    fn test_broken_cutoffs_fail_before_placement() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = setup(dir.path());
        fs::write(&inputs.cutoff_file, "species: 50\ngenus: 90\n").unwrap();
        let err = place_taxonomy(&PlacementConfig::default(), &inputs, dir.path().join("s1.diamond.out"))
            .err()
            .unwrap();
        assert!(matches!(err, PlacementError::NonMonotonicCutoffs { .. }));

        let samples = vec![SampleJob {
            name: "s1".into(),
            hit_table: dir.path().join("s1.diamond.out"),
        }];
        let out = dir.path().join("out");
        let called = AtomicUsize::new(0);
        let res = run_samples(&PlacementConfig::default(), &inputs, &samples, &out, |_| {
            called.fetch_add(1, Ordering::SeqCst);
        });
        assert!(res.is_err());
        assert_eq!(called.load(Ordering::SeqCst), 0);
        assert!(!out.exists());
    }

    #[test]
    fn test_abundance_and_protein_map() {
        let dir = tempfile::tempdir().unwrap();
        let mut inputs = setup(dir.path());
        fs::write(dir.path().join("protein-map.json"), r#"{"refZ": "refC"}"#).unwrap();
        fs::write(dir.path().join("quant.sf"), "Name\tNumReads\nq1\t12\nq3\t4\n").unwrap();
        inputs.protein_map = Some(dir.path().join("protein-map.json"));
        inputs.abundance_table = Some(dir.path().join("quant.sf"));

        let results =
            place_taxonomy(&PlacementConfig::default(), &inputs, dir.path().join("s1.diamond.out"))
                .unwrap();
        let q3 = &results.results["q3"];
        assert_eq!(q3.orphan_count, 0);
        assert_eq!(results.ranks[q3.consensus_rank.unwrap()], "genus");
        assert_eq!(q3.abundance, Some(4.0));
        assert_eq!(results.results["q1"].abundance, Some(12.0));
        assert_eq!(results.results["q2"].abundance, None);
        assert!(results.get_summary_report().contains("genus\tGymnodinium\t1\t12.00"));
    }

    #[test]
    fn test_run_samples_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = setup(dir.path());
        fs::write(dir.path().join("s2.diamond.out"), "broken\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let samples = discover_samples(dir.path(), AlignerKind::Diamond).unwrap();
        assert_eq!(
            samples.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            vec!["s1", "s2"]
        );

        let out = dir.path().join("out");
        let done = AtomicUsize::new(0);
        let config = PlacementConfig {
            threads: 2,
            ..Default::default()
        };
        let reports = run_samples(&config, &inputs, &samples, &out, |_| {
            done.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 2);
        assert_eq!(reports[0].sample, "s1");
        assert_eq!(
            reports[0].outcome,
            SampleOutcome::Placed {
                queries: 3,
                classified: 2,
                orphaned_hits: 1
            }
        );
        assert!(matches!(reports[1].outcome, SampleOutcome::Failed(_)));
        assert!(placement_output_path(&out, "s1").exists());
        assert!(summary_output_path(&out, "s1").exists());
        assert!(!placement_output_path(&out, "s2").exists());

        // second run: s1 is fresh, s2 still broken
        let reports = run_samples(&config, &inputs, &samples[..1], &out, |_| {}).unwrap();
        assert_eq!(reports[0].outcome, SampleOutcome::Skipped);

        let forced = PlacementConfig {
            force: true,
            ..config
        };
        let reports = run_samples(&forced, &inputs, &samples[..1], &out, |_| {}).unwrap();
        assert!(matches!(reports[0].outcome, SampleOutcome::Placed { .. }));
    }

    #[test]
    fn test_changed_settings_invalidate_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = setup(dir.path());
        fs::write(
            dir.path().join("s1.diamond.out"),
            "q1\trefA\t98.0\t100\t2\t0\t1\t100\t1\t100\t1e-50\t200\n\
             q1\trefA\t97.5\t100\t2\t0\t1\t100\t1\t100\t1e-49\t195\n\
             q1\trefB\t97.0\t100\t3\t0\t1\t100\t1\t100\t1e-48\t190\n",
        )
        .unwrap();
        let samples = vec![SampleJob {
            name: "s1".into(),
            hit_table: dir.path().join("s1.diamond.out"),
        }];
        let out = dir.path().join("out");

        let loose = PlacementConfig {
            consensus_cutoff: 0.6,
            ..Default::default()
        };
        let reports = run_samples(&loose, &inputs, &samples, &out, |_| {}).unwrap();
        assert!(matches!(reports[0].outcome, SampleOutcome::Placed { .. }));
        let text = fs::read_to_string(placement_output_path(&out, "s1")).unwrap();
        assert!(text.contains("\tspecies\tGymnodinium catenatum\t"));

        let reports = run_samples(&loose, &inputs, &samples, &out, |_| {}).unwrap();
        assert_eq!(reports[0].outcome, SampleOutcome::Skipped);

        let strict = PlacementConfig {
            consensus_cutoff: 0.9,
            ..Default::default()
        };
        let reports = run_samples(&strict, &inputs, &samples, &out, |_| {}).unwrap();
        assert!(matches!(reports[0].outcome, SampleOutcome::Placed { .. }));
        let text = fs::read_to_string(placement_output_path(&out, "s1")).unwrap();
        let q1: Vec<&str> = text.lines().nth(1).unwrap().split('\t').collect();
        assert_eq!(q1[2], "genus");
        assert_eq!(q1[5], "1.0000");

        let reports = run_samples(&strict, &inputs, &samples, &out, |_| {}).unwrap();
        assert_eq!(reports[0].outcome, SampleOutcome::Skipped);
    }
}
