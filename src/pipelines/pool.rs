/// Cross-sample pooling: merges every per-sample quality table in a
/// directory into a single table under the same minimum-quality-wins rule
/// each sample applied internally.

use std::path::PathBuf;
use std::sync::Arc;

use log::info;

use crate::config::defs::{PipelineError, RunConfig, QUALITY_SUFFIX};
use crate::utils::consolidate::{merge_quality_tables, ConsolidateCounts};
use crate::utils::file::list_files_with_suffix;

/// Standalone entry point: pools the quality tables found in the input
/// directory (the output directory when none is given), excluding a pooled
/// table from an earlier run.
pub async fn run(config: Arc<RunConfig>) -> Result<(), PipelineError> {
    let input_dir = config
        .args
        .input_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| config.out_dir.clone());
    let suffix = format!(".{}", QUALITY_SUFFIX);
    let pooled_name = format!("{}.{}", config.args.pooled_name, QUALITY_SUFFIX);
    let tables: Vec<PathBuf> = list_files_with_suffix(&input_dir, &[&suffix])?
        .into_iter()
        .filter(|p| p.file_name().map_or(true, |n| n.to_string_lossy() != pooled_name))
        .collect();
    if tables.is_empty() {
        return Err(PipelineError::InvalidConfig(format!(
            "no .{} tables found in {}",
            QUALITY_SUFFIX,
            input_dir.display()
        )));
    }
    let counts = pool_quality_tables(&config, &tables)?;
    info!(
        "pooled {} tables: {} records kept, {} shadowed duplicates discarded",
        tables.len(),
        counts.kept,
        counts.discarded
    );
    Ok(())
}

/// Merges the given tables and publishes the pooled table atomically. The
/// merge writes to a dot-prefixed sibling in the output directory, renamed
/// into place only after the record counts reconcile.
pub fn pool_quality_tables(
    config: &RunConfig,
    tables: &[PathBuf],
) -> Result<ConsolidateCounts, PipelineError> {
    let out = config
        .out_dir
        .join(format!("{}.{}", config.args.pooled_name, QUALITY_SUFFIX));
    let partial = config
        .out_dir
        .join(format!(".{}.{}.partial", config.args.pooled_name, QUALITY_SUFFIX));
    let counts = match merge_quality_tables(tables, &partial) {
        Ok(counts) => counts,
        Err(e) => {
            let _ = std::fs::remove_file(&partial);
            return Err(e);
        }
    };
    std::fs::rename(&partial, &out)?;
    Ok(counts)
}
