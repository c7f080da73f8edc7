use std::path::{Path, PathBuf};
use log::Level;
use tokio::task;
use crate::cli::Mode;
use crate::config::defs::{
    PipelineError, PipelineStage, RunConfig, ANNOTATION_HEADER_FILE, ANNOTATION_INFO_HEADER,
    BCFTOOLS_TAG, STATS_SUFFIX, TABIX_TAG,
};
use crate::pipelines::report::generate_report;
use crate::utils::command::{bcftools, run_checked, tabix, ToolRunner};
use crate::utils::file::{
    clear_dir_contents, count_records, discover_vcf_inputs, ensure_writable_dir,
    file_path_manipulator, index_path, sample_base, stage_artifact_path,
};
use crate::utils::logger::PipelineLog;
use crate::utils::stats::{parse_summary, Count, VariantSummary};
use crate::utils::vcf::{validate_vcf, ValidationFailure, ValidationOutcome};


/// Record counts around the quality filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterCounts {
    pub before: u64,
    pub after: u64,
}

impl FilterCounts {
    pub fn retained_percent(&self) -> f64 {
        if self.before == 0 {
            0.0
        } else {
            self.after as f64 / self.before as f64 * 100.0
        }
    }
}

/// Everything that persists in the output directory for one input.
#[derive(Debug, Clone)]
pub struct ProcessedArtifacts {
    pub input: PathBuf,
    pub sample_base: String,
    pub final_vcf: PathBuf,
    pub final_index: PathBuf,
    pub stats_file: PathBuf,
    pub normalized: bool,
    pub filter_counts: FilterCounts,
    pub summary: VariantSummary,
}

#[derive(Debug, Clone)]
pub enum FileOutcome {
    Completed(ProcessedArtifacts),
    Failed(ValidationFailure),
}

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub processed: usize,
    pub failed: usize,
    pub outputs: Vec<ProcessedArtifacts>,
    pub failures: Vec<(PathBuf, ValidationFailure)>,
}

impl BatchSummary {
    fn record(&mut self, input: &Path, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Completed(artifacts) => {
                self.processed += 1;
                self.outputs.push(artifacts);
            }
            FileOutcome::Failed(reason) => {
                self.failed += 1;
                self.failures.push((input.to_path_buf(), reason));
            }
        }
    }
}


async fn count_records_async(path: &Path) -> Result<u64, PipelineError> {
    let path = path.to_path_buf();
    task::spawn_blocking(move || count_records(&path))
        .await
        .map_err(|e| PipelineError::Other(format!("Record counting task failed: {}", e)))?
        .map_err(PipelineError::from)
}

/// Builds the positional index next to a compressed VCF.
pub async fn index_vcf<R: ToolRunner>(runner: &R, path: &Path) -> Result<PathBuf, PipelineError> {
    run_checked(runner, TABIX_TAG, &tabix::index_args(path)).await?;
    Ok(index_path(path))
}


/// Keeps records with QUAL >= `min_qual` and INFO/DP >= `min_depth`.
///
/// # Arguments
///
/// * `runner` - Tool runner.
/// * `log` - Run log.
/// * `input` - Validated input VCF.
/// * `output` - Compressed, indexed output path.
/// * `min_qual` - Minimum QUAL.
/// * `min_depth` - Minimum INFO/DP.
///
/// # Returns
/// Record counts before and after filtering.
pub async fn quality_filter<R: ToolRunner, L: PipelineLog>(
    runner: &R,
    log: &L,
    input: &Path,
    output: &Path,
    min_qual: f64,
    min_depth: u32,
) -> Result<FilterCounts, PipelineError> {
    log.append(
        Level::Info,
        &format!("Applying quality filters (QUAL>={}, DP>={})", min_qual, min_depth),
    );

    let config = bcftools::filter_config(input, output, min_qual, min_depth);
    run_checked(runner, BCFTOOLS_TAG, &bcftools::arg_generator(&config)).await?;
    index_vcf(runner, output).await?;

    let counts = FilterCounts {
        before: count_records_async(input).await?,
        after: count_records_async(output).await?,
    };
    log.append(Level::Info, &format!("Records before filtering: {}", counts.before));
    log.append(
        Level::Info,
        &format!("Records after filtering: {} ({:.1}% retained)", counts.after, counts.retained_percent()),
    );
    Ok(counts)
}

/// Splits multi-allelic records and left-aligns indels against `reference`.
pub async fn normalize<R: ToolRunner, L: PipelineLog>(
    runner: &R,
    log: &L,
    input: &Path,
    output: &Path,
    reference: &Path,
) -> Result<(), PipelineError> {
    log.append(Level::Info, "Normalizing variants...");
    let config = bcftools::norm_config(input, output, reference);
    run_checked(runner, BCFTOOLS_TAG, &bcftools::arg_generator(&config)).await?;
    index_vcf(runner, output).await?;
    log.append(Level::Info, &format!("Normalization complete: {}", output.display()));
    Ok(())
}

/// Copies INFO from `source` and declares the pipeline flag through a generated header fragment.
pub async fn annotate<R: ToolRunner, L: PipelineLog>(
    runner: &R,
    log: &L,
    input: &Path,
    output: &Path,
    source: &Path,
    header: &Path,
) -> Result<(), PipelineError> {
    log.append(Level::Info, "Adding variant annotations...");
    tokio::fs::write(header, format!("{}\n", ANNOTATION_INFO_HEADER)).await?;

    let config = bcftools::annotate_config(input, output, source, header);
    run_checked(runner, BCFTOOLS_TAG, &bcftools::arg_generator(&config)).await?;
    index_vcf(runner, output).await?;
    log.append(Level::Info, &format!("Annotation complete: {}", output.display()));
    Ok(())
}

/// Writes the full `bcftools stats` report to `stats_file` and logs the headline counts.
pub async fn compute_stats<R: ToolRunner, L: PipelineLog>(
    runner: &R,
    log: &L,
    input: &Path,
    stats_file: &Path,
) -> Result<VariantSummary, PipelineError> {
    log.append(Level::Info, "Generating statistics...");
    let config = bcftools::stats_config(input);
    let output = run_checked(runner, BCFTOOLS_TAG, &bcftools::arg_generator(&config)).await?;
    tokio::fs::write(stats_file, &output.stdout).await?;

    let summary = parse_summary(&output.stdout_lossy());
    log.append(Level::Info, &format!("Total variants: {}", Count(summary.records)));
    log.append(Level::Info, &format!("SNPs: {}", Count(summary.snps)));
    log.append(Level::Info, &format!("Indels: {}", Count(summary.indels)));
    Ok(summary)
}


/// Validate -> Filter -> (Normalize | Skip) -> Annotate -> Stats for one input.
///
/// Artifacts are named from the input's base name, so two inputs sharing a base
/// name overwrite each other's outputs.
///
/// # Arguments
///
/// * `config` - Run configuration.
/// * `runner` - Tool runner.
/// * `log` - Run log.
/// * `input` - VCF to process.
///
/// # Returns
/// FileOutcome; a validation failure is Ok(Failed). Any tool failure is Err and
/// must abort the run.
pub async fn process_vcf<R: ToolRunner, L: PipelineLog>(
    config: &RunConfig,
    runner: &R,
    log: &L,
    input: &Path,
) -> Result<FileOutcome, PipelineError> {
    if let ValidationOutcome::Failed(reason) = validate_vcf(runner, log, input).await? {
        log.append(Level::Error, &format!("Validation failed for {}: {}", input.display(), reason));
        return Ok(FileOutcome::Failed(reason));
    }

    let base = sample_base(input);
    log.append(Level::Info, &format!("Processing {} (sample {})", input.display(), base));

    let filtered = stage_artifact_path(&config.temp_dir, &base, PipelineStage::Filter.suffix());
    let filter_counts = quality_filter(runner, log, input, &filtered, config.min_qual, config.min_depth).await?;

    let (annotation_input, normalized) = if config.reference_available() {
        let normalized = stage_artifact_path(&config.temp_dir, &base, PipelineStage::Normalize.suffix());
        normalize(runner, log, &filtered, &normalized, &config.reference).await?;
        (normalized, true)
    } else {
        log.append(
            Level::Warn,
            &format!("Reference genome not found at {}, skipping normalization", config.reference.display()),
        );
        (filtered, false)
    };

    let source = match &config.annotation_source {
        Some(source) => source.clone(),
        None => {
            log.append(
                Level::Warn,
                &format!("No annotation source given; annotating {} from itself", annotation_input.display()),
            );
            annotation_input.clone()
        }
    };
    let header = file_path_manipulator(Path::new(&base), Some(&config.temp_dir), None, Some(ANNOTATION_HEADER_FILE), "_");
    let final_vcf = stage_artifact_path(&config.output_dir, &base, PipelineStage::Annotate.suffix());
    annotate(runner, log, &annotation_input, &final_vcf, &source, &header).await?;

    let stats_file = file_path_manipulator(Path::new(&base), Some(&config.output_dir), None, Some(STATS_SUFFIX), "_");
    let summary = compute_stats(runner, log, &final_vcf, &stats_file).await?;

    log.append(Level::Info, &format!("Successfully processed: {}", input.display()));
    Ok(FileOutcome::Completed(ProcessedArtifacts {
        input: input.to_path_buf(),
        sample_base: base,
        final_index: index_path(&final_vcf),
        final_vcf,
        stats_file,
        normalized,
        filter_counts,
        summary,
    }))
}


/// Creates the run directories and proves the output and scratch locations are writable.
pub fn prepare_workspace<L: PipelineLog>(config: &RunConfig, log: &L) -> Result<(), PipelineError> {
    std::fs::create_dir_all(&config.input_dir)?;
    ensure_writable_dir(&config.output_dir)?;
    ensure_writable_dir(&config.temp_dir)?;

    log.append(Level::Info, &format!("Input directory: {}", config.input_dir.display()));
    log.append(Level::Info, &format!("Output directory: {}", config.output_dir.display()));
    log.append(Level::Info, &format!("Temp directory: {}", config.temp_dir.display()));
    if config.reference_available() {
        log.append(Level::Info, &format!("Reference genome: {}", config.reference.display()));
    } else {
        log.append(
            Level::Warn,
            &format!("Reference genome not found at {}; normalization will be skipped", config.reference.display()),
        );
    }
    Ok(())
}

/// Empties the scratch directory. Intermediate artifacts do not survive a run.
pub fn cleanup_scratch<L: PipelineLog>(config: &RunConfig, log: &L) -> Result<(), PipelineError> {
    let removed = clear_dir_contents(&config.temp_dir)?;
    log.append(Level::Info, &format!("Cleaned up {} temporary files", removed));
    Ok(())
}


/// Processes every `*.vcf` and `*.vcf.gz` in the input directory. Validation
/// failures are counted and skipped; tool failures abort the batch.
pub async fn run_batch<R: ToolRunner, L: PipelineLog>(
    config: &RunConfig,
    runner: &R,
    log: &L,
) -> Result<BatchSummary, PipelineError> {
    log.append(Level::Info, &format!("Starting batch processing of {}", config.input_dir.display()));
    let inputs = discover_vcf_inputs(&config.input_dir)?;
    if inputs.is_empty() {
        log.append(Level::Warn, &format!("No VCF files found in {}", config.input_dir.display()));
    }

    let mut summary = BatchSummary::default();
    for input in inputs.iter().filter(|p| p.exists()) {
        let outcome = process_vcf(config, runner, log, input).await?;
        summary.record(input, outcome);
    }

    log.append(
        Level::Info,
        &format!("Batch processing complete: {} successful, {} failed", summary.processed, summary.failed),
    );
    Ok(summary)
}

/// The input path for `single` mode, or the logged usage error when it is absent.
pub fn single_input<'a, L: PipelineLog>(log: &L, file: Option<&'a Path>) -> Result<&'a Path, PipelineError> {
    file.ok_or_else(|| {
        log.append(Level::Error, "Usage: vcf-batch-pipeline single <vcf_file>");
        PipelineError::MissingArgument("single mode requires a VCF file path".to_string())
    })
}

/// Processes one file. Unlike batch mode, a validation failure is fatal here.
pub async fn run_single<R: ToolRunner, L: PipelineLog>(
    config: &RunConfig,
    runner: &R,
    log: &L,
    file: Option<&Path>,
) -> Result<BatchSummary, PipelineError> {
    let file = single_input(log, file)?;

    match process_vcf(config, runner, log, file).await? {
        FileOutcome::Failed(reason) => {
            log.append(Level::Error, &format!("Single file processing failed: {}", file.display()));
            Err(PipelineError::ValidationFailed {
                path: file.display().to_string(),
                reason: reason.to_string(),
            })
        }
        outcome => {
            let mut summary = BatchSummary::default();
            summary.record(file, outcome);
            log.append(Level::Info, "Single file processing complete");
            Ok(summary)
        }
    }
}


/// Runs one invocation end to end: workspace, mode dispatch, scratch cleanup, report.
///
/// # Arguments
///
/// * `config` - Run configuration.
/// * `runner` - Tool runner; dependencies are expected to be checked already.
/// * `log` - Run log.
/// * `mode` - `All`/`Batch` or `Single`.
/// * `file` - Input for `Single`.
///
/// # Returns
/// The batch counters and artifacts.
pub async fn run_pipeline<R: ToolRunner, L: PipelineLog>(
    config: &RunConfig,
    runner: &R,
    log: &L,
    mode: Mode,
    file: Option<&Path>,
) -> Result<BatchSummary, PipelineError> {
    if mode == Mode::Single {
        single_input(log, file)?;
    }

    log.append(Level::Info, "Starting VCF processing pipeline");
    prepare_workspace(config, log)?;

    let summary = match mode {
        Mode::Single => run_single(config, runner, log, file).await?,
        Mode::All | Mode::Batch => run_batch(config, runner, log).await?,
        Mode::Help => {
            return Err(PipelineError::InvalidConfig("help mode does not run the pipeline".to_string()));
        }
    };

    cleanup_scratch(config, log)?;
    let report = generate_report(config, &summary, log).await?;
    log.append(Level::Info, &format!("Pipeline complete. Report: {}", report.display()));
    Ok(summary)
}
