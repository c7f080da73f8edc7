use std::env;
use std::io::Write;
use std::time::Instant;

use anyhow::Result;
use clap::CommandFactory;
use env_logger::Builder;
use log::{Level, LevelFilter};

use vcf_batch_pipeline::cli::{parse, Arguments, Mode};
use vcf_batch_pipeline::config::defs::{PipelineError, RunConfig, INPUT_DIR, LOG_FILE, OUTPUT_DIR, REFERENCE_FILE, REQUIRED_TOOLS, TEMP_DIR};
use vcf_batch_pipeline::pipelines::vcf_processing::{run_pipeline, single_input};
use vcf_batch_pipeline::utils::command::{check_dependencies, SystemRunner};
use vcf_batch_pipeline::utils::logger::{PipelineLog, RunLogger, TIMESTAMP_FORMAT};


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format(TIMESTAMP_FORMAT),
                record.level(),
                record.args()
            )
        })
        .target(env_logger::Target::Stdout)
        .init();

    if args.mode == Mode::Help {
        print_usage()?;
        return Ok(());
    }

    let dir = env::current_dir()?;
    let run_config = match RunConfig::from_args(&args, &dir) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(e.exit_code());
        }
    };

    let logger = match RunLogger::open(&run_config.log_file) {
        Ok(logger) => logger,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    println!("\n-------------\n VCF Batch Pipeline\n-------------\n");

    if let Err(e) = run(&run_config, &logger, &args).await {
        logger.append(
            Level::Error,
            &format!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis()),
        );
        std::process::exit(e.exit_code());
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}


async fn run(run_config: &RunConfig, logger: &RunLogger, args: &Arguments) -> Result<(), PipelineError> {
    if args.mode == Mode::Single {
        single_input(logger, args.file.as_deref())?;
    }

    let runner = SystemRunner;
    check_dependencies(&runner, logger, REQUIRED_TOOLS).await?;

    run_pipeline(run_config, &runner, logger, args.mode, args.file.as_deref()).await?;
    Ok(())
}


fn print_usage() -> Result<()> {
    Arguments::command().print_help()?;
    println!();
    println!("Modes:");
    println!("  all | batch      Process every *.vcf and *.vcf.gz in the input directory (default)");
    println!("  single <file>    Process one VCF file");
    println!("  help             Show this message");
    println!();
    println!("Layout (relative to --root):");
    println!("  {}/        input VCF files", INPUT_DIR);
    println!("  {}/    processed VCFs, *_stats.txt and the run report", OUTPUT_DIR);
    println!("  {}/             intermediate files, removed at the end of each run", TEMP_DIR);
    println!("  {}   run log", LOG_FILE);
    println!("  {}     optional reference genome; normalization is skipped without it", REFERENCE_FILE);
    Ok(())
}
