/// Driver for a processing run: discovers mate pairs in the input
/// directory, gates each pair through the activation checks, runs eligible
/// samples concurrently under a bounded limit, and finishes by pooling the
/// per-sample quality tables of every sample that published.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use fxhash::FxHashSet;
use log::{error, info, warn};
use tokio::sync::Semaphore;

use crate::config::defs::{
    PipelineError, RunConfig, CUTADAPT_TAG, EMPTY_GZIP_BYTES, SWARM_TAG, VSEARCH_TAG,
};
use crate::pipelines::pool;
use crate::pipelines::sample::{run_sample, SampleContext};
use crate::utils::command::check_versions;
use crate::utils::fastx::record_counter;
use crate::utils::file::{remove_stale_staging, ArtifactSet};
use crate::utils::pattern::{classify, Classification};

#[derive(Debug, Clone)]
pub struct SamplePair {
    pub sample_id: String,
    pub forward: PathBuf,
    pub reverse: PathBuf,
}

#[derive(Debug, PartialEq)]
pub enum Activation {
    Eligible,
    Skip(String),
}

/// Pre-flight gate run before any pipeline stage is created. Both mates must
/// exist and be larger than the empty-container threshold; a skipped sample
/// produces no artifacts and never halts the run.
pub fn activate(pair: &SamplePair, min_bytes: u64) -> Activation {
    for (mate, path) in [("forward", &pair.forward), ("reverse", &pair.reverse)] {
        match std::fs::metadata(path) {
            Err(_) => {
                return Activation::Skip(format!("{} mate {} is missing", mate, path.display()))
            }
            Ok(md) if md.len() <= min_bytes => {
                return Activation::Skip(format!(
                    "{} mate {} holds no reads ({} bytes)",
                    mate,
                    path.display(),
                    md.len()
                ))
            }
            Ok(_) => {}
        }
    }
    Activation::Eligible
}

/// Scans the input directory and pairs forward reads with their derived
/// reverse mates. Forward names sort before their mates in every recognized
/// naming scheme, so a single sorted pass pairs everything; file names that
/// match no scheme (including orphan reverse files) are reported and skipped.
pub fn discover_pairs(input_dir: &Path) -> Result<Vec<SamplePair>, PipelineError> {
    let mut names: Vec<String> = Vec::new();
    for entry in std::fs::read_dir(input_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();

    let mut claimed_mates: FxHashSet<String> = FxHashSet::default();
    let mut seen_ids: FxHashSet<String> = FxHashSet::default();
    let mut pairs = Vec::new();
    for name in &names {
        if claimed_mates.contains(name) {
            continue;
        }
        match classify(name) {
            Classification::Paired { reverse, sample_id } => {
                if !seen_ids.insert(sample_id.clone()) {
                    warn!(
                        "skipping {}: sample id {:?} already claimed by an earlier pair",
                        name, sample_id
                    );
                    continue;
                }
                claimed_mates.insert(reverse.clone());
                pairs.push(SamplePair {
                    sample_id,
                    forward: input_dir.join(name),
                    reverse: input_dir.join(&reverse),
                });
            }
            Classification::Unknown => warn!("skipping {}: unrecognized file name", name),
        }
    }
    Ok(pairs)
}

pub async fn run(config: Arc<RunConfig>) -> Result<(), PipelineError> {
    check_versions(vec![VSEARCH_TAG, CUTADAPT_TAG, SWARM_TAG]).await?;

    let input_dir = config
        .args
        .input_dir
        .as_ref()
        .map(PathBuf::from)
        .ok_or_else(|| {
            PipelineError::InvalidConfig("--input-dir is required for the process module".to_string())
        })?;
    let min_bytes = config.args.min_input_bytes.unwrap_or(EMPTY_GZIP_BYTES);

    let pairs = discover_pairs(&input_dir)?;
    if pairs.is_empty() {
        return Err(PipelineError::InvalidConfig(format!(
            "no paired FASTQ files found in {}",
            input_dir.display()
        )));
    }

    let mut eligible = Vec::new();
    for pair in pairs {
        match activate(&pair, min_bytes) {
            Activation::Eligible => eligible.push(pair),
            Activation::Skip(reason) => warn!("skipping sample {}: {}", pair.sample_id, reason),
        }
    }
    let total = eligible.len();
    info!(
        "{} eligible sample(s), up to {} in flight",
        total,
        config.args.jobs.max(1)
    );

    let semaphore = Arc::new(Semaphore::new(config.args.jobs.max(1)));
    let mut handles = Vec::with_capacity(total);
    for (index, pair) in eligible.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| PipelineError::Other(anyhow!("semaphore closed: {}", e)))?;
            info!("[{}/{}] processing sample {}", index + 1, total, pair.sample_id);
            let artifacts = ArtifactSet::for_sample(&config.out_dir, &pair.sample_id);
            artifacts.remove_stale()?;
            remove_stale_staging(&config.out_dir, &pair.sample_id)?;
            run_sample(
                config,
                SampleContext {
                    sample_id: pair.sample_id,
                    forward: pair.forward,
                    reverse: pair.reverse,
                    artifacts,
                },
            )
            .await
        }));
    }

    // Failures are isolated per sample; the run continues and pools what
    // succeeded.
    let mut published: Vec<ArtifactSet> = Vec::new();
    let mut failures = 0usize;
    for handle in handles {
        match handle.await {
            Ok(Ok(summary)) => {
                let artifacts = ArtifactSet::for_sample(&config.out_dir, &summary.sample_id);
                let sequences = record_counter(&artifacts.fasta).unwrap_or(0);
                info!(
                    "sample {}: {} unique identities ({} duplicates collapsed), {} dereplicated sequences, {} clusters kept",
                    summary.sample_id,
                    summary.unique_sequences,
                    summary.duplicates_collapsed,
                    sequences,
                    summary.clusters_kept
                );
                published.push(artifacts);
            }
            Ok(Err(e)) => {
                error!("sample failed: {}", e);
                failures += 1;
            }
            Err(e) => {
                error!("sample task aborted: {}", e);
                failures += 1;
            }
        }
    }

    if published.is_empty() {
        return Err(PipelineError::InvalidConfig(
            "every sample failed; nothing to pool".to_string(),
        ));
    }
    let tables: Vec<PathBuf> = published.iter().map(|a| a.quality.clone()).collect();
    let counts = pool::pool_quality_tables(&config, &tables)?;
    info!(
        "pooled {} quality tables: {} records kept, {} discarded",
        tables.len(),
        counts.kept,
        counts.discarded
    );
    if failures > 0 {
        warn!("{} sample(s) failed; their artifacts were not published", failures);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(dir: &Path, forward: &str, reverse: &str) -> SamplePair {
        SamplePair {
            sample_id: "S".to_string(),
            forward: dir.join(forward),
            reverse: dir.join(reverse),
        }
    }

    #[test]
    fn test_activate_missing_mate_skips() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("S_R1.fastq"), vec![0u8; 100]).unwrap();
        let p = pair(dir.path(), "S_R1.fastq", "S_R2.fastq");
        match activate(&p, EMPTY_GZIP_BYTES) {
            Activation::Skip(reason) => assert!(reason.contains("missing")),
            Activation::Eligible => panic!("missing mate should skip"),
        }
    }

    #[test]
    fn test_activate_empty_container_skips() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("S_R1.fastq.gz"), vec![0u8; 28]).unwrap();
        std::fs::write(dir.path().join("S_R2.fastq.gz"), vec![0u8; 100]).unwrap();
        let p = pair(dir.path(), "S_R1.fastq.gz", "S_R2.fastq.gz");
        match activate(&p, EMPTY_GZIP_BYTES) {
            Activation::Skip(reason) => assert!(reason.contains("no reads")),
            Activation::Eligible => panic!("empty container should skip"),
        }
    }

    #[test]
    fn test_activate_eligible() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("S_R1.fastq.gz"), vec![0u8; 500]).unwrap();
        std::fs::write(dir.path().join("S_R2.fastq.gz"), vec![0u8; 500]).unwrap();
        let p = pair(dir.path(), "S_R1.fastq.gz", "S_R2.fastq.gz");
        assert_eq!(activate(&p, EMPTY_GZIP_BYTES), Activation::Eligible);
    }

    #[test]
    fn test_discover_pairs_claims_mates_and_skips_strays() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "A_L001_R1_001.fastq.gz",
            "A_L001_R2_001.fastq.gz",
            "B.1.fq",
            "B.2.fq",
            "notes.txt",
        ] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        let pairs = discover_pairs(dir.path()).unwrap();
        let ids: Vec<&str> = pairs.iter().map(|p| p.sample_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert!(pairs[0].reverse.ends_with("A_L001_R2_001.fastq.gz"));
        assert!(pairs[1].reverse.ends_with("B.2.fq"));
    }

    #[test]
    fn test_discover_pairs_duplicate_sample_id_kept_once() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["A_R1.fastq", "A_R2.fastq", "A_R1.fastq.gz", "A_R2.fastq.gz"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        let pairs = discover_pairs(dir.path()).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].sample_id, "A");
    }
}
