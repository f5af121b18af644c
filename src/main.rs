use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use std::{env, fs};

use anyhow::Result;
use env_logger::Builder;
use log::{debug, error, info, LevelFilter};

use amplicon_pipelines::cli::parse;
use amplicon_pipelines::config::defs::{PipelineError, RunConfig};
use amplicon_pipelines::pipelines::{amplicon, pool};
use amplicon_pipelines::utils::system::{compute_channel_capacity, detect_ram};

#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    #[cfg(not(unix))]
    anyhow::bail!("External tool process pipelines are only supported on Unix systems.");

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
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    let cwd = env::current_dir()?;
    let out_dir = setup_output_dir(&args.out_dir, &cwd)?;
    info!("Output directory: {}", out_dir.display());

    let (total_ram, available_ram) = detect_ram()?;
    debug!(
        "RAM: {} GiB total, {} GiB available",
        total_ram / 1_073_741_824,
        available_ram / 1_073_741_824
    );
    let channel_capacity = compute_channel_capacity(available_ram, args.jobs.max(1));

    let module = args.module.clone();
    let run_config = Arc::new(RunConfig {
        cwd,
        out_dir,
        args,
        channel_capacity,
    });

    if let Err(e) = match module.as_str() {
        "process" => amplicon::run(run_config).await,
        "pool" => pool::run(run_config).await,
        _ => Err(PipelineError::InvalidConfig(format!(
            "Invalid module: {} (expected 'process' or 'pool')",
            module
        ))),
    } {
        error!(
            "Pipeline failed: {} at {} milliseconds.",
            e,
            run_start.elapsed().as_millis()
        );
        std::process::exit(1);
    }

    info!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}

/// Resolves the output directory (relative paths against the current
/// directory) and ensures it exists.
fn setup_output_dir(out_dir: &Option<String>, cwd: &PathBuf) -> Result<PathBuf> {
    let out_dir = match out_dir {
        Some(out) => {
            let path = PathBuf::from(out);
            if path.is_absolute() {
                path
            } else {
                cwd.join(path)
            }
        }
        None => cwd.clone(),
    };
    fs::create_dir_all(&out_dir)?;
    Ok(out_dir)
}
