use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use log::Level;
use sysinfo::{MemoryRefreshKind, RefreshKind, System};
use crate::config::defs::{PipelineError, RunConfig, REPORT_FILE, REPORT_SUMMARY_LINES, STATS_SUFFIX};
use crate::pipelines::vcf_processing::BatchSummary;
use crate::utils::file::files_with_suffix;
use crate::utils::logger::{PipelineLog, TIMESTAMP_FORMAT};
use crate::utils::stats::summary_lines;


fn host_description() -> String {
    let refresh_kind = RefreshKind::nothing().with_memory(MemoryRefreshKind::everything());
    let system = System::new_with_specifics(refresh_kind);
    let host = System::host_name().unwrap_or_else(|| "unknown".to_string());
    format!("{} ({} GiB RAM)", host, system.total_memory() / 1_073_741_824)
}

fn sample_name(stats_file: &Path) -> String {
    let name = stats_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.strip_suffix(&format!("_{}", STATS_SUFFIX))
        .unwrap_or(&name)
        .to_string()
}

/// Renders the report text. Thresholds come from the run configuration, so
/// overridden values are reported as used.
pub fn render_report(
    config: &RunConfig,
    summary: &BatchSummary,
    stats: &[(PathBuf, String)],
    generated: &str,
    host: &str,
) -> Result<String, std::fmt::Error> {
    let mut report = String::new();
    writeln!(report, "VCF Processing Pipeline Report")?;
    writeln!(report, "==============================")?;
    writeln!(report, "Generated: {}", generated)?;
    writeln!(report, "Host: {}", host)?;
    writeln!(report)?;

    writeln!(report, "Configuration")?;
    writeln!(report, "-------------")?;
    writeln!(report, "Input directory: {}", config.input_dir.display())?;
    writeln!(report, "Output directory: {}", config.output_dir.display())?;
    writeln!(report, "Quality filter: QUAL >= {}", config.min_qual)?;
    writeln!(report, "Depth filter: DP >= {}", config.min_depth)?;
    if config.reference_available() {
        writeln!(report, "Reference genome: {} (normalization applied)", config.reference.display())?;
    } else {
        writeln!(report, "Reference genome: not found (normalization skipped)")?;
    }
    match &config.annotation_source {
        Some(source) => {
            writeln!(report, "Annotation source: {}", source.display())?;
        }
        None => {
            writeln!(report, "Annotation source: each file annotated from itself")?;
        }
    }
    writeln!(report)?;

    writeln!(report, "Run Summary")?;
    writeln!(report, "-----------")?;
    writeln!(report, "Files processed successfully: {}", summary.processed)?;
    writeln!(report, "Files failed validation: {}", summary.failed)?;
    for (input, reason) in &summary.failures {
        writeln!(report, "  {}: {}", input.display(), reason)?;
    }
    writeln!(report)?;

    writeln!(report, "Per-Sample Statistics")?;
    writeln!(report, "---------------------")?;
    if stats.is_empty() {
        writeln!(report, "No statistics files found.")?;
    }
    for (path, text) in stats {
        writeln!(report, "Sample: {}", sample_name(path))?;
        for line in summary_lines(text, REPORT_SUMMARY_LINES) {
            writeln!(report, "{}", line)?;
        }
        writeln!(report)?;
    }
    Ok(report)
}


/// Collects every `*_stats.txt` in the output directory and writes the run report there.
///
/// # Arguments
///
/// * `config` - Run configuration.
/// * `summary` - Counters from this invocation.
/// * `log` - Run log.
///
/// # Returns
/// Path of the written report.
pub async fn generate_report<L: PipelineLog>(
    config: &RunConfig,
    summary: &BatchSummary,
    log: &L,
) -> Result<PathBuf, PipelineError> {
    log.append(Level::Info, "Generating processing report...");

    let mut stats = Vec::new();
    for path in files_with_suffix(&config.output_dir, &format!("_{}", STATS_SUFFIX))? {
        let text = tokio::fs::read_to_string(&path).await?;
        stats.push((path, text));
    }

    let generated = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
    let report = render_report(config, summary, &stats, &generated, &host_description())
        .map_err(|e| PipelineError::Other(format!("Failed to render report: {}", e)))?;

    let report_path = config.output_dir.join(REPORT_FILE);
    tokio::fs::write(&report_path, report).await?;
    log.append(Level::Info, &format!("Report generated: {}", report_path.display()));
    Ok(report_path)
}
