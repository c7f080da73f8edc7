/// Functions and structs for working with creating command-line arguments
/// and running the external htslib tools.

use anyhow::{anyhow, Result};
use log::Level;
use tokio::process::Command;
use crate::config::defs::{PipelineError, TOOL_VERSIONS};
use crate::utils::logger::PipelineLog;


/// Captured result of one external tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Exit code; `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}


/// Runs an external tool with a structured argument list and waits for it to exit.
///
/// Returns `Err` only if the process could not be started. A non-zero exit is a
/// normal `ToolOutput`; callers decide whether it is fatal.
#[allow(async_fn_in_trait)]
pub trait ToolRunner {
    async fn run(&self, tool: &str, args: &[String]) -> Result<ToolOutput>;
}

/// Spawns real processes from PATH. No shell is involved.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    async fn run(&self, tool: &str, args: &[String]) -> Result<ToolOutput> {
        let output = Command::new(tool)
            .args(args)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| anyhow!("Failed to spawn {}: {}. Is {} installed?", tool, e, tool))?;

        Ok(ToolOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}


/// Runs a tool and converts both spawn failure and non-zero exit into a fatal error.
pub async fn run_checked<R: ToolRunner>(runner: &R, tool: &str, args: &[String]) -> Result<ToolOutput, PipelineError> {
    let output = runner.run(tool, args).await.map_err(|e| PipelineError::ToolExecution {
        tool: tool.to_string(),
        error: e.to_string(),
        code: None,
    })?;
    ensure_success(tool, output)
}

pub fn ensure_success(tool: &str, output: ToolOutput) -> Result<ToolOutput, PipelineError> {
    if output.success() {
        return Ok(output);
    }
    let stderr = output.stderr_lossy();
    Err(PipelineError::ToolExecution {
        tool: tool.to_string(),
        error: match output.code {
            Some(code) => format!("exited with status {}: {}", code, stderr.trim()),
            None => format!("terminated by signal: {}", stderr.trim()),
        },
        code: output.code,
    })
}


pub mod bgzip {
    use std::path::Path;

    /// `bgzip -t`: exit 0 iff the BGZF stream is intact.
    pub fn integrity_args(path: &Path) -> Vec<String> {
        vec!["-t".to_string(), path.to_string_lossy().to_string()]
    }
}

pub mod tabix {
    use std::path::Path;

    pub fn index_args(path: &Path) -> Vec<String> {
        vec![
            "-f".to_string(),
            "-p".to_string(),
            "vcf".to_string(),
            path.to_string_lossy().to_string(),
        ]
    }
}

pub mod bcftools {
    use std::path::{Path, PathBuf};
    use crate::config::defs::BcftoolsSubcommand;

    /// Ordered option list; `None` values are bare flags. Options are emitted before the input.
    #[derive(Debug, Clone)]
    pub struct BcftoolsConfig {
        pub subcommand: BcftoolsSubcommand,
        pub subcommand_fields: Vec<(String, Option<String>)>,
        pub input: PathBuf,
    }

    pub fn arg_generator(config: &BcftoolsConfig) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push(config.subcommand.as_str().to_string());
        for (key, value) in &config.subcommand_fields {
            args_vec.push(key.clone());
            if let Some(value) = value {
                args_vec.push(value.clone());
            }
        }
        args_vec.push(config.input.to_string_lossy().to_string());
        args_vec
    }

    fn compressed_output(output: &Path) -> Vec<(String, Option<String>)> {
        vec![
            ("-O".to_string(), Some("z".to_string())),
            ("-o".to_string(), Some(output.to_string_lossy().to_string())),
        ]
    }

    pub fn filter_expression(min_qual: f64, min_depth: u32) -> String {
        format!("QUAL>={} && INFO/DP>={}", min_qual, min_depth)
    }

    pub fn filter_config(input: &Path, output: &Path, min_qual: f64, min_depth: u32) -> BcftoolsConfig {
        let mut fields = vec![("-i".to_string(), Some(filter_expression(min_qual, min_depth)))];
        fields.extend(compressed_output(output));
        BcftoolsConfig {
            subcommand: BcftoolsSubcommand::Filter,
            subcommand_fields: fields,
            input: input.to_path_buf(),
        }
    }

    /// Splits multi-allelic records (`-m -both`) and left-aligns against the reference.
    pub fn norm_config(input: &Path, output: &Path, reference: &Path) -> BcftoolsConfig {
        let mut fields = vec![
            ("-m".to_string(), Some("-both".to_string())),
            ("-f".to_string(), Some(reference.to_string_lossy().to_string())),
        ];
        fields.extend(compressed_output(output));
        BcftoolsConfig {
            subcommand: BcftoolsSubcommand::Norm,
            subcommand_fields: fields,
            input: input.to_path_buf(),
        }
    }

    pub fn annotate_config(input: &Path, output: &Path, source: &Path, header: &Path) -> BcftoolsConfig {
        let mut fields = vec![
            ("-a".to_string(), Some(source.to_string_lossy().to_string())),
            ("-c".to_string(), Some("INFO".to_string())),
            ("-h".to_string(), Some(header.to_string_lossy().to_string())),
        ];
        fields.extend(compressed_output(output));
        BcftoolsConfig {
            subcommand: BcftoolsSubcommand::Annotate,
            subcommand_fields: fields,
            input: input.to_path_buf(),
        }
    }

    pub fn stats_config(input: &Path) -> BcftoolsConfig {
        BcftoolsConfig {
            subcommand: BcftoolsSubcommand::Stats,
            subcommand_fields: Vec::new(),
            input: input.to_path_buf(),
        }
    }
}


/// Pulls the version token out of the first line of `<tool> --version`.
/// htslib prints `bgzip (htslib) 1.17` and `bcftools 1.17`.
pub fn parse_version_line(line: &str) -> Option<String> {
    line.split_whitespace()
        .last()
        .filter(|token| token.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .map(|token| token.to_string())
}

/// Major and minor components; `1.9` sorts before `1.10`.
fn version_key(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.split(|c: char| c == '.' || c == '-' || c == '+');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().unwrap_or("0").parse().ok()?;
    Some((major, minor))
}

fn meets_minimum(version: &str, minimum: &str) -> Option<bool> {
    Some(version_key(version)? >= version_key(minimum)?)
}


/// Runs `<tool> --version`. Err only if the tool cannot be started; an
/// unrecognisable version line yields `None`.
pub async fn check_version<R: ToolRunner>(runner: &R, tool: &str) -> Result<Option<String>> {
    let output = runner.run(tool, &["--version".to_string()]).await?;
    let stdout = output.stdout_lossy();
    Ok(stdout.lines().next().and_then(parse_version_line))
}


/// Verifies every required tool can be started before any file is touched.
///
/// # Arguments
///
/// * `runner` - Tool runner.
/// * `log` - Run log.
/// * `tools` - Tool tags to check.
///
/// # Returns
/// Ok, or MissingDependency for the first tool that cannot be spawned.
pub async fn check_dependencies<R: ToolRunner, L: PipelineLog>(runner: &R, log: &L, tools: &[&str]) -> Result<(), PipelineError> {
    log.append(Level::Info, "Checking dependencies...");
    for &tool in tools {
        let version = match check_version(runner, tool).await {
            Ok(version) => version,
            Err(e) => {
                log.append(Level::Error, &format!("Required tool not found: {}", tool));
                return Err(PipelineError::MissingDependency {
                    tool: tool.to_string(),
                    error: e.to_string(),
                });
            }
        };

        match version {
            Some(version) => {
                log.append(Level::Info, &format!("Found {} {}", tool, version));
                if let Some(&minimum) = TOOL_VERSIONS.get(tool) {
                    if meets_minimum(&version, minimum) == Some(false) {
                        log.append(
                            Level::Warn,
                            &format!("{} {} is older than the tested minimum {}", tool, version, minimum),
                        );
                    }
                }
            }
            None => log.append(Level::Warn, &format!("Could not determine {} version", tool)),
        }
    }
    log.append(Level::Info, "All dependencies found");
    Ok(())
}
