use std::fmt;
use std::path::Path;
use log::Level;
use crate::config::defs::{PipelineError, BGZIP_TAG, VCF_HEADER_PREFIX};
use crate::utils::command::{bgzip, ToolRunner};
use crate::utils::file::{has_gz_suffix, read_first_line};
use crate::utils::logger::PipelineLog;


/// Why a file was refused before any stage ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    Missing,
    CorruptStream,
    Unreadable(String),
    BadHeader(Option<String>),
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationFailure::Missing => write!(f, "file does not exist"),
            ValidationFailure::CorruptStream => write!(f, "compressed stream failed integrity check"),
            ValidationFailure::Unreadable(e) => write!(f, "cannot read content: {}", e),
            ValidationFailure::BadHeader(Some(line)) => {
                write!(f, "first line does not start with {}: {}", VCF_HEADER_PREFIX, line)
            }
            ValidationFailure::BadHeader(None) => write!(f, "file is empty"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Passed,
    Failed(ValidationFailure),
}

impl ValidationOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, ValidationOutcome::Passed)
    }
}


/// Checks that `path` exists, that a `.gz` file has an intact BGZF stream, and
/// that the first decompressed line carries the VCF format signature.
///
/// # Arguments
///
/// * `runner` - Runs `bgzip -t` for compressed inputs.
/// * `log` - Run log; one line per check outcome.
/// * `path` - Candidate input.
///
/// # Returns
/// ValidationOutcome. Only a failure to start `bgzip` is an Err.
pub async fn validate_vcf<R: ToolRunner, L: PipelineLog>(
    runner: &R,
    log: &L,
    path: &Path,
) -> Result<ValidationOutcome, PipelineError> {
    log.append(Level::Info, &format!("Validating VCF file: {}", path.display()));

    if !path.is_file() {
        log.append(Level::Error, &format!("File not found: {}", path.display()));
        return Ok(ValidationOutcome::Failed(ValidationFailure::Missing));
    }

    if has_gz_suffix(path) {
        let output = runner
            .run(BGZIP_TAG, &bgzip::integrity_args(path))
            .await
            .map_err(|e| PipelineError::ToolExecution {
                tool: BGZIP_TAG.to_string(),
                error: e.to_string(),
                code: None,
            })?;
        if !output.success() {
            log.append(Level::Error, &format!("Corrupted gzip file: {}", path.display()));
            return Ok(ValidationOutcome::Failed(ValidationFailure::CorruptStream));
        }
        log.append(Level::Info, &format!("Compressed stream intact: {}", path.display()));
    }

    let first_line = match read_first_line(path) {
        Ok(line) => line,
        Err(e) => {
            log.append(Level::Error, &format!("Cannot read {}: {}", path.display(), e));
            return Ok(ValidationOutcome::Failed(ValidationFailure::Unreadable(e.to_string())));
        }
    };

    match first_line {
        Some(line) if line.starts_with(VCF_HEADER_PREFIX) => {
            log.append(Level::Info, &format!("VCF validation passed: {}", path.display()));
            Ok(ValidationOutcome::Passed)
        }
        other => {
            log.append(Level::Error, &format!("Invalid VCF header in: {}", path.display()));
            Ok(ValidationOutcome::Failed(ValidationFailure::BadHeader(other)))
        }
    }
}
