use std::cell::RefCell;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::{tempdir, TempDir};

use vcf_batch_pipeline::cli::Mode;
use vcf_batch_pipeline::config::defs::{PipelineError, RunConfig, REPORT_FILE, REQUIRED_TOOLS};
use vcf_batch_pipeline::pipelines::vcf_processing::{process_vcf, run_pipeline, single_input, FileOutcome};
use vcf_batch_pipeline::utils::command::{check_dependencies, ToolOutput, ToolRunner};
use vcf_batch_pipeline::utils::logger::RunLogger;
use vcf_batch_pipeline::utils::vcf::ValidationFailure;


const HEADER: &str = "##fileformat=VCFv4.2\n##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Depth\">\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n";
const RECORDS: &str = "chr1\t100\t.\tA\tG\t50\tPASS\tDP=20\nchr1\t150\t.\tAT\tA\t40\tPASS\tDP=12\nchr1\t200\t.\tC\tT\t10\tPASS\tDP=30\nchr2\t300\t.\tG\tA\t60\tPASS\tDP=4\n";


/// Stands in for bgzip, tabix and bcftools by reproducing their effect on files.
#[derive(Default)]
struct FakeTools {
    calls: RefCell<Vec<(String, Vec<String>)>>,
    missing: Vec<&'static str>,
    fail: Option<(&'static str, &'static str, i32)>,
}

fn read_text(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    if bytes.starts_with(&[0x1f, 0x8b]) {
        let mut text = String::new();
        MultiGzDecoder::new(&bytes[..]).read_to_string(&mut text)?;
        Ok(text)
    } else {
        Ok(String::from_utf8(bytes)?)
    }
}

fn write_gz(path: &Path, text: &str) -> Result<()> {
    let mut encoder = GzEncoder::new(File::create(path)?, Compression::default());
    encoder.write_all(text.as_bytes())?;
    encoder.finish()?;
    Ok(())
}

fn option_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// `QUAL>=30 && INFO/DP>=10` -> (30.0, 10)
fn thresholds(expression: &str) -> (f64, u32) {
    let mut qual = 0.0;
    let mut depth = 0;
    for clause in expression.split("&&") {
        let clause = clause.trim();
        if let Some(v) = clause.strip_prefix("QUAL>=") {
            qual = v.parse().unwrap_or(0.0);
        } else if let Some(v) = clause.strip_prefix("INFO/DP>=") {
            depth = v.parse().unwrap_or(0);
        }
    }
    (qual, depth)
}

fn passes(line: &str, qual: f64, depth: u32) -> bool {
    let fields: Vec<&str> = line.split('\t').collect();
    let q: f64 = fields.get(5).and_then(|q| q.parse().ok()).unwrap_or(0.0);
    let dp: u32 = fields
        .get(7)
        .and_then(|info| info.split(';').find_map(|kv| kv.strip_prefix("DP=")))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    q >= qual && dp >= depth
}

impl FakeTools {
    fn calls_to(&self, tool: &str, subcommand: &str) -> Vec<Vec<String>> {
        self.calls
            .borrow()
            .iter()
            .filter(|(t, args)| t == tool && args.first().map(String::as_str) == Some(subcommand))
            .map(|(_, args)| args.clone())
            .collect()
    }

    fn bcftools(&self, args: &[String]) -> Result<ToolOutput> {
        let input = PathBuf::from(args.last().ok_or_else(|| anyhow!("no input"))?);
        let text = read_text(&input)?;
        match args[0].as_str() {
            "stats" => {
                let records = text.lines().filter(|l| !l.starts_with('#') && !l.is_empty()).count();
                let snps = text
                    .lines()
                    .filter(|l| !l.starts_with('#'))
                    .filter(|l| {
                        let f: Vec<&str> = l.split('\t').collect();
                        f.len() > 4 && f[3].len() == 1 && f[4].len() == 1
                    })
                    .count();
                let stdout = format!(
                    "# This file was produced by bcftools stats (1.17+htslib-1.17)\n# SN, Summary numbers:\nSN\t0\tnumber of samples:\t0\nSN\t0\tnumber of records:\t{}\nSN\t0\tnumber of SNPs:\t{}\nSN\t0\tnumber of indels:\t{}\n",
                    records,
                    snps,
                    records - snps
                );
                Ok(ToolOutput { code: Some(0), stdout: stdout.into_bytes(), stderr: Vec::new() })
            }
            sub @ ("filter" | "norm" | "annotate") => {
                let output = PathBuf::from(option_value(args, "-o").ok_or_else(|| anyhow!("no -o"))?);
                let result = match sub {
                    "filter" => {
                        let (qual, depth) = thresholds(option_value(args, "-i").unwrap_or(""));
                        text.lines()
                            .filter(|l| l.starts_with('#') || passes(l, qual, depth))
                            .map(|l| format!("{}\n", l))
                            .collect::<String>()
                    }
                    "annotate" => {
                        let header = read_text(Path::new(option_value(args, "-h").unwrap_or("")))?;
                        let mut out = String::new();
                        for line in text.lines() {
                            if line.starts_with("#CHROM") {
                                out.push_str(&header);
                            }
                            out.push_str(line);
                            out.push('\n');
                        }
                        out
                    }
                    _ => text,
                };
                write_gz(&output, &result)?;
                Ok(ToolOutput { code: Some(0), ..Default::default() })
            }
            other => Err(anyhow!("unexpected bcftools subcommand {}", other)),
        }
    }
}

impl ToolRunner for FakeTools {
    async fn run(&self, tool: &str, args: &[String]) -> Result<ToolOutput> {
        self.calls.borrow_mut().push((tool.to_string(), args.to_vec()));

        if self.missing.iter().any(|m| *m == tool) {
            return Err(anyhow!("Failed to spawn {}: No such file or directory", tool));
        }
        if args.first().map(String::as_str) == Some("--version") {
            let stdout = match tool {
                "bcftools" => "bcftools 1.17\nUsing htslib 1.17\n".to_string(),
                _ => format!("{} (htslib) 1.17\n", tool),
            };
            return Ok(ToolOutput { code: Some(0), stdout: stdout.into_bytes(), stderr: Vec::new() });
        }
        if let Some((fail_tool, fail_sub, code)) = self.fail {
            if fail_tool == tool && args.first().map(String::as_str) == Some(fail_sub) {
                return Ok(ToolOutput { code: Some(code), stdout: Vec::new(), stderr: b"[E::fake] failure".to_vec() });
            }
        }

        match tool {
            "bgzip" => {
                let path = option_value(args, "-t").ok_or_else(|| anyhow!("bgzip without -t"))?;
                let mut sink = Vec::new();
                let intact = File::open(path)
                    .and_then(|f| MultiGzDecoder::new(f).read_to_end(&mut sink))
                    .is_ok();
                Ok(ToolOutput { code: Some(if intact { 0 } else { 1 }), ..Default::default() })
            }
            "tabix" => {
                let target = args.last().ok_or_else(|| anyhow!("tabix without file"))?;
                fs::write(format!("{}.tbi", target), b"TBI\x01")?;
                Ok(ToolOutput { code: Some(0), ..Default::default() })
            }
            "bcftools" => self.bcftools(args),
            other => Err(anyhow!("unknown tool {}", other)),
        }
    }
}


struct Run {
    _dir: TempDir,
    config: RunConfig,
    logger: RunLogger,
}

impl Run {
    fn new() -> Result<Self> {
        let dir = tempdir()?;
        let config = RunConfig::with_root(dir.path());
        fs::create_dir_all(&config.input_dir)?;
        let logger = RunLogger::open(&config.log_file)?;
        Ok(Run { _dir: dir, config, logger })
    }

    fn input(&self, name: &str) -> PathBuf {
        self.config.input_dir.join(name)
    }

    fn output(&self, name: &str) -> PathBuf {
        self.config.output_dir.join(name)
    }

    fn log_text(&self) -> Result<String> {
        Ok(fs::read_to_string(&self.config.log_file)?)
    }

    fn add_plain(&self, name: &str) -> Result<PathBuf> {
        let path = self.input(name);
        fs::write(&path, format!("{}{}", HEADER, RECORDS))?;
        Ok(path)
    }

    fn add_gz(&self, name: &str) -> Result<PathBuf> {
        let path = self.input(name);
        write_gz(&path, &format!("{}{}", HEADER, RECORDS))?;
        Ok(path)
    }
}


#[tokio::test]
async fn test_batch_two_valid_files_without_reference() -> Result<()> {
    let run = Run::new()?;
    run.add_gz("sample1.vcf.gz")?;
    run.add_plain("sample2.vcf")?;
    let tools = FakeTools::default();

    let summary = run_pipeline(&run.config, &tools, &run.logger, Mode::All, None).await?;
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failed, 0);

    for base in ["sample1", "sample2"] {
        assert!(run.output(&format!("{}_processed.vcf.gz", base)).is_file());
        assert!(run.output(&format!("{}_processed.vcf.gz.tbi", base)).is_file());
        assert!(run.output(&format!("{}_stats.txt", base)).is_file());
    }
    assert!(run.log_text()?.contains("Batch processing complete: 2 successful, 0 failed"));

    // Without a reference the annotator reads the filtered artifact directly
    assert!(tools.calls_to("bcftools", "norm").is_empty());
    let annotate_calls = tools.calls_to("bcftools", "annotate");
    assert_eq!(annotate_calls.len(), 2);
    for call in &annotate_calls {
        assert!(call.last().is_some_and(|input| input.ends_with("_filtered.vcf.gz")));
    }

    // Scratch space is purged, report is written
    assert_eq!(fs::read_dir(&run.config.temp_dir)?.count(), 0);
    let report = fs::read_to_string(run.output(REPORT_FILE))?;
    assert!(report.contains("Sample: sample1"));
    assert!(report.contains("Sample: sample2"));
    assert!(report.contains("SN\t0\tnumber of records:\t2"));
    Ok(())
}

#[tokio::test]
async fn test_reference_present_routes_normalized_artifact_to_annotation() -> Result<()> {
    let run = Run::new()?;
    run.add_gz("sample1.vcf.gz")?;
    fs::write(&run.config.reference, ">chr1\nACGTACGT\n")?;
    let tools = FakeTools::default();

    let summary = run_pipeline(&run.config, &tools, &run.logger, Mode::Batch, None).await?;
    assert_eq!(summary.processed, 1);
    assert!(summary.outputs[0].normalized);

    let norm_calls = tools.calls_to("bcftools", "norm");
    assert_eq!(norm_calls.len(), 1);
    let reference = run.config.reference.to_string_lossy().into_owned();
    assert_eq!(option_value(&norm_calls[0], "-f"), Some(reference.as_str()));

    let annotate_calls = tools.calls_to("bcftools", "annotate");
    assert!(annotate_calls[0].last().is_some_and(|input| input.ends_with("sample1_normalized.vcf.gz")));
    Ok(())
}

#[tokio::test]
async fn test_corrupt_file_is_counted_and_batch_continues() -> Result<()> {
    let run = Run::new()?;
    run.add_plain("good.vcf")?;
    fs::write(run.input("bad.vcf.gz"), b"\x1f\x8b\x08\x00truncated")?;
    let tools = FakeTools::default();

    let summary = run_pipeline(&run.config, &tools, &run.logger, Mode::All, None).await?;
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures[0].1, ValidationFailure::CorruptStream);

    assert!(run.log_text()?.contains("Batch processing complete: 1 successful, 1 failed"));
    assert!(run.output("good_processed.vcf.gz").is_file());
    assert!(!run.output("bad_processed.vcf.gz").exists());
    assert!(!run.output("bad_stats.txt").exists());
    Ok(())
}

#[tokio::test]
async fn test_single_mode_validation_failure_is_fatal() -> Result<()> {
    let run = Run::new()?;
    let tools = FakeTools::default();
    let missing = run.input("ghost.vcf.gz");

    let result = run_pipeline(&run.config, &tools, &run.logger, Mode::Single, Some(missing.as_path())).await;
    match result {
        Err(e @ PipelineError::ValidationFailed { .. }) => {
            assert_eq!(e.exit_code(), 1);
            assert!(e.to_string().contains(&ValidationFailure::Missing.to_string()));
        }
        other => panic!("expected validation failure, got {:?}", other),
    }
    assert!(!run.output("ghost_processed.vcf.gz").exists());
    assert!(!run.output("ghost_stats.txt").exists());
    assert!(!run.output(REPORT_FILE).exists());
    assert!(tools.calls.borrow().is_empty());
    assert!(run.log_text()?.contains("ERROR: File not found"));
    Ok(())
}

#[tokio::test]
async fn test_single_mode_reports_after_success() -> Result<()> {
    let run = Run::new()?;
    let tools = FakeTools::default();
    let input = run.add_plain("solo.vcf")?;

    let summary = run_pipeline(&run.config, &tools, &run.logger, Mode::Single, Some(input.as_path())).await?;
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 0);
    assert!(run.output("solo_processed.vcf.gz").exists());
    assert!(run.output(REPORT_FILE).exists());
    Ok(())
}

#[test]
fn test_single_input_checked_without_tools() -> Result<()> {
    let run = Run::new()?;
    let path = run.input("a.vcf");
    assert_eq!(single_input(&run.logger, Some(path.as_path()))?, path.as_path());
    assert!(matches!(single_input(&run.logger, None), Err(PipelineError::MissingArgument(_))));
    assert!(run.log_text()?.contains("ERROR: Usage: vcf-batch-pipeline single <vcf_file>"));
    Ok(())
}

#[tokio::test]
async fn test_single_mode_without_path_is_usage_error() -> Result<()> {
    let run = Run::new()?;
    let tools = FakeTools::default();

    let result = run_pipeline(&run.config, &tools, &run.logger, Mode::Single, None).await;
    match result {
        Err(e @ PipelineError::MissingArgument(_)) => assert_eq!(e.exit_code(), 1),
        other => panic!("expected usage error, got {:?}", other),
    }
    assert!(run.log_text()?.contains("ERROR: Usage: vcf-batch-pipeline single <vcf_file>"));
    assert!(!run.config.output_dir.exists());
    Ok(())
}

#[tokio::test]
async fn test_tool_failure_aborts_whole_batch() -> Result<()> {
    let run = Run::new()?;
    run.add_plain("a.vcf")?;
    run.add_plain("b.vcf")?;
    let tools = FakeTools { fail: Some(("bcftools", "filter", 3)), ..Default::default() };

    let result = run_pipeline(&run.config, &tools, &run.logger, Mode::All, None).await;
    match result {
        Err(e @ PipelineError::ToolExecution { .. }) => {
            assert_eq!(e.exit_code(), 3);
            assert!(e.to_string().contains("[E::fake] failure"));
        }
        other => panic!("expected tool failure, got {:?}", other),
    }

    // Aborted on the first file; the second is never attempted
    assert_eq!(tools.calls_to("bcftools", "filter").len(), 1);
    assert!(!run.log_text()?.contains("Batch processing complete"));
    assert!(!run.output(REPORT_FILE).exists());
    Ok(())
}

#[tokio::test]
async fn test_filter_counts_are_logged() -> Result<()> {
    let run = Run::new()?;
    let input = run.add_plain("counts.vcf")?;
    fs::create_dir_all(&run.config.temp_dir)?;
    fs::create_dir_all(&run.config.output_dir)?;
    let tools = FakeTools::default();

    let outcome = process_vcf(&run.config, &tools, &run.logger, &input).await?;
    let FileOutcome::Completed(artifacts) = outcome else {
        panic!("expected completion");
    };
    // QUAL 10 and DP 4 records are dropped
    assert_eq!(artifacts.filter_counts.before, 4);
    assert_eq!(artifacts.filter_counts.after, 2);
    assert_eq!(artifacts.summary.records, Some(2));
    assert_eq!(artifacts.summary.snps, Some(1));
    assert_eq!(artifacts.summary.indels, Some(1));

    let log = run.log_text()?;
    assert!(log.contains("Records before filtering: 4"));
    assert!(log.contains("Records after filtering: 2 (50.0% retained)"));
    assert!(log.contains("Total variants: 2"));

    let processed = read_text(&artifacts.final_vcf)?;
    assert!(processed.contains("##INFO=<ID=PIPELINE_PROCESSED"));
    Ok(())
}

#[tokio::test]
async fn test_rerun_overwrites_final_artifact() -> Result<()> {
    let run = Run::new()?;
    run.add_gz("repeat.vcf.gz")?;
    let tools = FakeTools::default();

    run_pipeline(&run.config, &tools, &run.logger, Mode::All, None).await?;
    run_pipeline(&run.config, &tools, &run.logger, Mode::All, None).await?;

    let finals: Vec<_> = fs::read_dir(&run.config.output_dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with("_processed.vcf.gz"))
        .collect();
    assert_eq!(finals.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_overridden_thresholds_reach_filter_and_report() -> Result<()> {
    let mut run = Run::new()?;
    run.config.min_qual = 45.0;
    run.config.min_depth = 15;
    run.add_plain("strict.vcf")?;
    let tools = FakeTools::default();

    let summary = run_pipeline(&run.config, &tools, &run.logger, Mode::All, None).await?;
    assert_eq!(summary.outputs[0].filter_counts.after, 1);

    let filter_calls = tools.calls_to("bcftools", "filter");
    assert_eq!(option_value(&filter_calls[0], "-i"), Some("QUAL>=45 && INFO/DP>=15"));

    let report = fs::read_to_string(run.output(REPORT_FILE))?;
    assert!(report.contains("Quality filter: QUAL >= 45"));
    assert!(report.contains("Depth filter: DP >= 15"));
    Ok(())
}

#[tokio::test]
async fn test_self_annotation_by_default_and_external_source_when_given() -> Result<()> {
    let run = Run::new()?;
    let input = run.add_plain("anno.vcf")?;
    fs::create_dir_all(&run.config.temp_dir)?;
    fs::create_dir_all(&run.config.output_dir)?;
    let tools = FakeTools::default();

    process_vcf(&run.config, &tools, &run.logger, &input).await?;
    let call = &tools.calls_to("bcftools", "annotate")[0];
    assert_eq!(option_value(call, "-a"), call.last().map(String::as_str));
    assert!(run.log_text()?.contains("annotating"));

    let mut config = run.config.clone();
    let truth = run.input("truth_set.vcf.gz");
    config.annotation_source = Some(truth.clone());
    let tools = FakeTools::default();
    process_vcf(&config, &tools, &run.logger, &input).await?;
    let call = &tools.calls_to("bcftools", "annotate")[0];
    let truth = truth.to_string_lossy().into_owned();
    assert_eq!(option_value(call, "-a"), Some(truth.as_str()));
    Ok(())
}

#[tokio::test]
async fn test_missing_dependency_is_fatal() -> Result<()> {
    let run = Run::new()?;
    let tools = FakeTools { missing: vec!["tabix"], ..Default::default() };

    let result = check_dependencies(&tools, &run.logger, REQUIRED_TOOLS).await;
    match result {
        Err(e @ PipelineError::MissingDependency { .. }) => assert_eq!(e.exit_code(), 1),
        other => panic!("expected missing dependency, got {:?}", other),
    }
    let log = run.log_text()?;
    assert!(log.contains("Found bgzip 1.17"));
    assert!(log.contains("Required tool not found: tabix"));
    Ok(())
}

#[tokio::test]
async fn test_empty_input_directory() -> Result<()> {
    let run = Run::new()?;
    let tools = FakeTools::default();
    let summary = run_pipeline(&run.config, &tools, &run.logger, Mode::All, None).await?;
    assert_eq!(summary.processed + summary.failed, 0);

    let log = run.log_text()?;
    assert!(log.contains("No VCF files found"));
    assert!(log.contains("Batch processing complete: 0 successful, 0 failed"));
    assert!(run.output(REPORT_FILE).is_file());
    Ok(())
}
