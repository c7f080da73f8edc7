use std::path::{Path, PathBuf};
use lazy_static::lazy_static;
use std::collections::HashMap;
use thiserror::Error;
use crate::cli::Arguments;

// External software
pub const GZIP_EXT: &str = "gz";
pub const VCF_EXT: &str = "vcf";
pub const BGZIP_TAG: &str = "bgzip";
pub const TABIX_TAG: &str = "tabix";
pub const BCFTOOLS_TAG: &str = "bcftools";

pub const REQUIRED_TOOLS: &[&str] = &[BGZIP_TAG, TABIX_TAG, BCFTOOLS_TAG];

lazy_static! {
    /// Oldest release each tool has been run against.
    pub static ref TOOL_VERSIONS: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert(BGZIP_TAG, "1.10");
        m.insert(TABIX_TAG, "1.10");
        m.insert(BCFTOOLS_TAG, "1.10");

        m
    };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BcftoolsSubcommand {
    Filter,
    Norm,
    Annotate,
    Stats
}

impl BcftoolsSubcommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            BcftoolsSubcommand::Filter => "filter",
            BcftoolsSubcommand::Norm => "norm",
            BcftoolsSubcommand::Annotate => "annotate",
            BcftoolsSubcommand::Stats => "stats",
        }
    }
}

// Run layout, relative to the run root
pub const INPUT_DIR: &str = "input_vcf";
pub const OUTPUT_DIR: &str = "processed_vcf";
pub const TEMP_DIR: &str = "temp";
pub const LOG_FILE: &str = "processing.log";
pub const REFERENCE_FILE: &str = "reference.fa";

// Static Filenames
pub const REPORT_FILE: &str = "pipeline_report.txt";
pub const ANNOTATION_HEADER_FILE: &str = "annotation_header.txt";
pub const STATS_SUFFIX: &str = "stats.txt";

// Static Parameters
pub const VCF_HEADER_PREFIX: &str = "##fileformat=VCF";
pub const DEFAULT_MIN_QUAL: f64 = 30.0;
pub const DEFAULT_MIN_DEPTH: u32 = 10;
pub const REPORT_SUMMARY_LINES: usize = 10;
pub const ANNOTATION_INFO_HEADER: &str =
    "##INFO=<ID=PIPELINE_PROCESSED,Number=0,Type=Flag,Description=\"Record passed the VCF batch pipeline\">";


/// Artifact produced by each stage; the suffix names the file `<base>_<suffix>.vcf.gz`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Filter,
    Normalize,
    Annotate,
}

impl PipelineStage {
    pub fn suffix(&self) -> &'static str {
        match self {
            PipelineStage::Filter => "filtered",
            PipelineStage::Normalize => "normalized",
            PipelineStage::Annotate => "processed",
        }
    }
}


#[derive(Debug, Clone)]
pub struct RunConfig  {
    pub root: PathBuf,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub log_file: PathBuf,
    pub reference: PathBuf,
    pub min_qual: f64,
    pub min_depth: u32,
    pub annotation_source: Option<PathBuf>,
}

impl RunConfig {
    /// Resolves the run layout from the parsed arguments.
    ///
    /// # Arguments
    ///
    /// * `args` - Parsed command-line arguments.
    /// * `cwd` - Directory used when `--root` is absent or relative.
    ///
    /// # Returns
    /// RunConfig with every path absolute or root-relative.
    pub fn from_args(args: &Arguments, cwd: &Path) -> Result<Self, PipelineError> {
        let root = match &args.root {
            Some(root) => resolve(cwd, root),
            None => cwd.to_path_buf(),
        };

        if !args.min_qual.is_finite() || args.min_qual < 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "Minimum quality must be a non-negative number, got {}",
                args.min_qual
            )));
        }

        let pick = |given: &Option<PathBuf>, default: &str| match given {
            Some(path) => resolve(&root, path),
            None => root.join(default),
        };

        Ok(RunConfig {
            input_dir: pick(&args.input_dir, INPUT_DIR),
            output_dir: pick(&args.output_dir, OUTPUT_DIR),
            temp_dir: pick(&args.temp_dir, TEMP_DIR),
            log_file: pick(&args.log_file, LOG_FILE),
            reference: pick(&args.reference, REFERENCE_FILE),
            min_qual: args.min_qual,
            min_depth: args.min_depth,
            annotation_source: args.annotation_source.as_ref().map(|p| resolve(cwd, p)),
            root,
        })
    }

    /// Default layout under `root` with default thresholds.
    pub fn with_root(root: &Path) -> Self {
        RunConfig {
            root: root.to_path_buf(),
            input_dir: root.join(INPUT_DIR),
            output_dir: root.join(OUTPUT_DIR),
            temp_dir: root.join(TEMP_DIR),
            log_file: root.join(LOG_FILE),
            reference: root.join(REFERENCE_FILE),
            min_qual: DEFAULT_MIN_QUAL,
            min_depth: DEFAULT_MIN_DEPTH,
            annotation_source: None,
        }
    }

    /// Re-checked on every call; the reference may appear or vanish between files.
    pub fn reference_available(&self) -> bool {
        self.reference.is_file()
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}


#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Required tool not found: {tool} ({error})")]
    MissingDependency { tool: String, error: String },

    #[error("Tool {tool} failed: {error}")]
    ToolExecution {
        tool: String,
        error: String,
        code: Option<i32>,
    },

    #[error("No write permission: {0}")]
    PermissionDenied(String),

    #[error("Validation failed for {path}: {reason}")]
    ValidationFailed { path: String, reason: String },

    #[error("Missing required argument: {0}")]
    MissingArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    IOError(String),

    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// Process exit status for this error. Tool failures propagate the tool's own code.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::ToolExecution { code: Some(code), .. } if *code != 0 => *code,
            _ => 1,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::IOError(e.to_string())
    }
}
