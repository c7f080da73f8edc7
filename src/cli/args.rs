use std::path::PathBuf;
use clap::{Parser, ValueEnum};
use crate::config::defs::{DEFAULT_MIN_DEPTH, DEFAULT_MIN_QUAL};

#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq)]
pub enum Mode {
    /// Process every VCF in the input directory
    #[default]
    All,
    /// Same as `all`
    Batch,
    /// Process exactly one file
    Single,
    /// Print usage
    Help,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "vcf-batch-pipeline",
    version,
    about = "Validate, filter, normalize, annotate and summarise a batch of VCF files"
)]
pub struct Arguments {

    #[arg(value_enum, default_value = "all")]
    pub mode: Mode,

    #[arg(help = "VCF to process in `single` mode")]
    pub file: Option<PathBuf>,

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(long, help = "Run root holding input_vcf/, processed_vcf/, temp/ and reference.fa. Defaults to the current directory.")]
    pub root: Option<PathBuf>,

    #[arg(long = "input-dir")]
    pub input_dir: Option<PathBuf>,

    #[arg(short = 'o', long = "output-dir")]
    pub output_dir: Option<PathBuf>,

    #[arg(long = "temp-dir")]
    pub temp_dir: Option<PathBuf>,

    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    #[arg(short = 'r', long, help = "Reference genome; normalization is skipped when it does not exist")]
    pub reference: Option<PathBuf>,

    #[arg(short = 'q', long = "min-qual", default_value_t = DEFAULT_MIN_QUAL)]
    pub min_qual: f64,

    #[arg(short = 'd', long = "min-depth", default_value_t = DEFAULT_MIN_DEPTH)]
    pub min_depth: u32,

    #[arg(long, help = "Indexed VCF to copy INFO annotations from. Defaults to the file being annotated.")]
    pub annotation_source: Option<PathBuf>,
}
