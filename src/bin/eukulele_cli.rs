use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};

use eukulele_rs::config::{
    AlignerKind, MissingCutoffPolicy, PlacementConfig, ReferenceInputs, TaxonomyFormat, VoteWeighting,
    DEFAULT_RANKS,
};
use eukulele_rs::cutoffs::CutoffMetric;
use eukulele_rs::{discover_samples, run_samples, SampleJob, SampleOutcome};

#[derive(Parser, Debug)]
#[command(version, about = "Consensus taxonomic placement of eukaryotic sequences from alignment hits")]
struct Args {
    /// Alignment hit table, or a directory of them
    #[arg(short, long)]
    input: PathBuf,

    /// Directory for the estimated-taxonomy and summary files
    #[arg(short, long)]
    out_dir: PathBuf,

    /// Taxonomy table (tab-separated, with header)
    #[arg(long)]
    tax_table: PathBuf,

    /// YAML file of per-rank cutoffs
    #[arg(long)]
    cutoff: PathBuf,

    /// JSON map from reference protein ids to strain ids
    #[arg(long)]
    protein_map: Option<PathBuf>,

    /// Read counts per query (salmon quant.sf or two-column table)
    #[arg(long)]
    abundance: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = AlignerKind::Diamond)]
    alignment_choice: AlignerKind,

    /// Overrides the metric named in the cutoff file
    #[arg(long, value_enum)]
    cutoff_metric: Option<CutoffMetric>,

    #[arg(long, default_value_t = 0.75)]
    consensus_cutoff: f64,

    #[arg(long, value_enum, default_value_t = VoteWeighting::HitCount)]
    weighting: VoteWeighting,

    /// What a rank without a cutoff means
    #[arg(long, value_enum, default_value_t = MissingCutoffPolicy::NoFilter)]
    missing_cutoff: MissingCutoffPolicy,

    #[arg(long, default_value = "strain_name")]
    strain_col_id: String,

    #[arg(long, default_value = "taxonomy")]
    taxonomy_col_id: String,

    /// Separator of lineage strings in the taxonomy column
    #[arg(long, default_value = ";")]
    delimiter: String,

    /// Rank names, general to specific
    #[arg(long, value_delimiter = ',')]
    ranks: Option<Vec<String>>,

    /// Worker threads (0 = all cores)
    #[arg(short = 'p', long = "cpus", default_value_t = 0)]
    threads: usize,

    /// Recompute outputs even if they are up to date
    #[arg(long)]
    force: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn config(&self) -> PlacementConfig {
        PlacementConfig {
            consensus_cutoff: self.consensus_cutoff,
            cutoff_metric: self.cutoff_metric,
            weighting: self.weighting,
            missing_cutoff: self.missing_cutoff,
            aligner: self.alignment_choice,
            taxonomy_format: TaxonomyFormat {
                strain_col: self.strain_col_id.clone(),
                taxonomy_col: self.taxonomy_col_id.clone(),
                delimiter: self.delimiter.clone(),
                ranks: self
                    .ranks
                    .clone()
                    .unwrap_or_else(|| DEFAULT_RANKS.iter().map(|r| r.to_string()).collect()),
            },
            threads: self.threads,
            force: self.force,
        }
    }

    fn inputs(&self) -> ReferenceInputs {
        ReferenceInputs {
            taxonomy_table: self.tax_table.clone(),
            cutoff_file: self.cutoff.clone(),
            protein_map: self.protein_map.clone(),
            abundance_table: self.abundance.clone(),
        }
    }
}

fn spinner(color: &str, msg: &'static str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            .template(&format!("{{spinner:.{}}} {{msg}}", color))
            .expect("Invalid spinner template"),
    );
    spinner.set_message(msg);
    spinner
}

/// Name of a sample from its hit table's file name.
fn sample_name(path: &Path, aligner: AlignerKind) -> String {
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_default();
    let suffix = format!(".{}", aligner.output_extension());
    let trimmed = filename.strip_suffix(".gz").unwrap_or(&filename);
    let trimmed = trimmed.strip_suffix(suffix.as_str()).unwrap_or(trimmed);
    match trimmed.rsplit_once('.') {
        Some((stem, _)) if trimmed == filename && !stem.is_empty() => stem.to_string(),
        _ => trimmed.to_string(),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let config = args.config();
    let inputs = args.inputs();

    // 1. Gather hit tables
    let gather = spinner("blue", "Gathering alignment hit tables...");
    let samples: Vec<SampleJob> = if args.input.is_dir() {
        match discover_samples(&args.input, config.aligner) {
            Ok(samples) => samples,
            Err(e) => {
                gather.finish_and_clear();
                error!("{}", e);
                return ExitCode::from(1);
            }
        }
    } else {
        vec![SampleJob {
            name: sample_name(&args.input, config.aligner),
            hit_table: args.input.clone(),
        }]
    };
    gather.finish_with_message(format!("Found {} hit table(s).", samples.len()));

    if samples.is_empty() {
        error!(
            "No *.{} files found in {}",
            config.aligner.output_extension(),
            args.input.display()
        );
        return ExitCode::from(1);
    }

    // 2. Place
    let progress = ProgressBar::new(samples.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("Invalid progress template"),
    );
    progress.set_message("Placing samples...");

    let reports = match run_samples(&config, &inputs, &samples, &args.out_dir, |report| {
        progress.set_message(report.sample.clone());
        progress.inc(1);
    }) {
        Ok(reports) => reports,
        Err(e) => {
            progress.finish_and_clear();
            error!("{}", e);
            return ExitCode::from(1);
        }
    };
    progress.finish_with_message("Placement finished.");

    // 3. Report
    let mut failed = 0usize;
    for report in &reports {
        match &report.outcome {
            SampleOutcome::Placed {
                queries,
                classified,
                orphaned_hits,
            } => info!(
                "{}: {}/{} queries classified, {} orphaned hits -> {}",
                report.sample,
                classified,
                queries,
                orphaned_hits,
                report.output.display()
            ),
            SampleOutcome::Skipped => info!("{}: up to date", report.sample),
            SampleOutcome::Failed(reason) => {
                failed += 1;
                error!("{}: {}", report.sample, reason);
            }
        }
    }

    let done = spinner("cyan", "All done!");
    done.finish_with_message(format!(
        "All done! {} placed or up to date, {} failed.",
        reports.len() - failed,
        failed
    ));

    if failed > 0 {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_to_config() {
        let args = Args::try_parse_from([
            "eukulele-rs",
            "-i",
            "s1.blast.txt",
            "-o",
            "out",
            "--tax-table",
            "tax-table.txt",
            "--cutoff",
            "tax-cutoffs.yaml",
            "--alignment-choice",
            "blast",
            "--cutoff-metric",
            "evalue",
            "--consensus-cutoff",
            "0.6",
            "--weighting",
            "bit-score",
            "--ranks",
            "class,genus,species",
            "--cpus",
            "4",
        ])
        .unwrap();
        let config = args.config();
        assert_eq!(config.aligner, AlignerKind::Blast);
        assert_eq!(config.cutoff_metric, Some(CutoffMetric::EValue));
        assert_eq!(config.consensus_cutoff, 0.6);
        assert_eq!(config.weighting, VoteWeighting::BitScore);
        assert_eq!(config.taxonomy_format.ranks, vec!["class", "genus", "species"]);
        assert_eq!(config.threads, 4);
        assert!(!config.force);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from([
            "eukulele-rs",
            "-i",
            "hits",
            "-o",
            "out",
            "--tax-table",
            "t",
            "--cutoff",
            "c",
        ])
        .unwrap();
        let config = args.config();
        assert_eq!(config, PlacementConfig::default());
        assert!(args.inputs().protein_map.is_none());
    }

    #[test]
    fn test_sample_names() {
        assert_eq!(sample_name(Path::new("/x/s1.diamond.out"), AlignerKind::Diamond), "s1");
        assert_eq!(sample_name(Path::new("s1.diamond.out.gz"), AlignerKind::Diamond), "s1");
        assert_eq!(sample_name(Path::new("s2.blast.txt"), AlignerKind::Blast), "s2");
        assert_eq!(sample_name(Path::new("hits.tsv"), AlignerKind::Diamond), "hits");
    }
}
