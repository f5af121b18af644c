/// One sample's processing pipeline: a fixed six-stage DAG over in-memory
/// byte channels.
///
/// ```text
/// merge(fwd,rev) -> trim(5') -> trim(3') -> fasta-convert -+-> quality-extract -> <id>.qual
///                                                          +-> dereplicate -+-> <id>.fas
///                                                                           +-> cluster -> <id>.stats
/// ```
///
/// Every producer is spawned before the terminal consumer so no channel ever
/// waits for a reader that does not exist yet. Artifacts are written into a
/// sample-scoped staging directory and renamed into the output directory
/// only after the join barrier: all stage tasks joined, all children exited
/// cleanly. A failure anywhere drops the staging directory, so partial
/// artifacts are never visible.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use futures::future::try_join_all;
use log::warn;
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

use crate::config::defs::{
    PipelineError, RunConfig, CUTADAPT_TAG, MIN_CLUSTER_MASS, SWARM_TAG, VSEARCH_TAG,
};
use crate::utils::command::{cutadapt, swarm, vsearch};
use crate::utils::consolidate::consolidate;
use crate::utils::fastx::collect_identity_records;
use crate::utils::file::{staging_prefix, ArtifactSet};
use crate::utils::sequence::reverse_complement;
use crate::utils::streams::{
    join_with_error_handling, open_sample_log, parse_child_output, spawn_source_cmd,
    stream_to_cmd, stream_to_file, t_junction, ChildStream,
};
use crate::utils::system::effective_threads;

/// Everything one pipeline run needs, passed explicitly into each stage.
/// Channel and staging names derive from the sample id, so concurrently
/// running samples never share file-system state.
pub struct SampleContext {
    pub sample_id: String,
    pub forward: PathBuf,
    pub reverse: PathBuf,
    pub artifacts: ArtifactSet,
}

#[derive(Debug, Clone)]
pub struct SampleSummary {
    pub sample_id: String,
    pub unique_sequences: u64,
    pub duplicates_collapsed: u64,
    pub clusters_kept: u64,
}

/// Runs one sample end to end, bounded by the configured wall-clock timeout.
/// The timeout exists because the external merge tool is known to stall
/// indefinitely under rare conditions; on expiry every child is killed and
/// only this sample fails.
pub async fn run_sample(
    config: Arc<RunConfig>,
    ctx: SampleContext,
) -> Result<SampleSummary, PipelineError> {
    let seconds = config.args.sample_timeout;
    if seconds == 0 {
        return run_stages(config, ctx).await;
    }
    let sample = ctx.sample_id.clone();
    match timeout(Duration::from_secs(seconds), run_stages(config, ctx)).await {
        Ok(result) => result,
        // Dropping the stage futures kills the children (kill_on_drop) and
        // removes the staging directory.
        Err(_) => Err(PipelineError::SampleTimeout { sample, seconds }),
    }
}

async fn run_stages(
    config: Arc<RunConfig>,
    ctx: SampleContext,
) -> Result<SampleSummary, PipelineError> {
    let capacity = config.channel_capacity;
    let threads = effective_threads(config.args.threads);

    let staging = tempfile::Builder::new()
        .prefix(&staging_prefix(&ctx.sample_id))
        .tempdir_in(&config.out_dir)
        .map_err(|e| PipelineError::IOError(format!("staging dir: {}", e)))?;
    let staged = ArtifactSet::for_sample(staging.path(), &ctx.sample_id);

    let log = open_sample_log(&staged.log).await?;
    let mut stage_tasks: Vec<JoinHandle<Result<()>>> = Vec::new();
    let mut junction_dones: Vec<oneshot::Receiver<Result<()>>> = Vec::new();
    let mut children: Vec<(&'static str, Arc<Mutex<Child>>)> = Vec::new();

    // Stage 1: merge. Reads the mate files itself; merged FASTQ on stdout,
    // diagnostics to the sample log. Zero merged reads is a soft outcome.
    let (merge_child, merge_err) = spawn_source_cmd(
        VSEARCH_TAG,
        vsearch::merge_args(&ctx.forward, &ctx.reverse, threads),
        log.clone(),
    )
    .await?;
    stage_tasks.push(merge_err);
    let merge_rx = {
        let mut guard = merge_child.lock().await;
        parse_child_output(&mut guard, ChildStream::Stdout, capacity).await?
    };
    children.push(("merge", merge_child));

    // Stage 2: primer trimming, two chained passes. Forward primer at the
    // 5' end, then the reverse complement of the reverse primer at the 3'
    // end; untrimmed or ambiguous reads are dropped by the tool.
    let (trim5_child, trim5_feed, trim5_err) = stream_to_cmd(
        merge_rx,
        CUTADAPT_TAG,
        cutadapt::forward_args(&config.args.primer_f, config.args.min_length),
        log.clone(),
    )
    .await?;
    stage_tasks.push(trim5_feed);
    stage_tasks.push(trim5_err);
    let trim5_rx = {
        let mut guard = trim5_child.lock().await;
        parse_child_output(&mut guard, ChildStream::Stdout, capacity).await?
    };
    children.push(("trim-forward", trim5_child));

    let anti_primer_r = reverse_complement(&config.args.primer_r);
    let (trim3_child, trim3_feed, trim3_err) = stream_to_cmd(
        trim5_rx,
        CUTADAPT_TAG,
        cutadapt::reverse_args(&anti_primer_r, config.args.primer_r.len(), config.args.min_length),
        log.clone(),
    )
    .await?;
    stage_tasks.push(trim3_feed);
    stage_tasks.push(trim3_err);
    let trim3_rx = {
        let mut guard = trim3_child.lock().await;
        parse_child_output(&mut guard, ChildStream::Stdout, capacity).await?
    };
    children.push(("trim-reverse", trim3_child));

    // Stage 3: FASTQ -> FASTA keyed by the sequence SHA-1, expected-error
    // annotated, unwrapped.
    let (convert_child, convert_feed, convert_err) =
        stream_to_cmd(trim3_rx, VSEARCH_TAG, vsearch::convert_args(), log.clone()).await?;
    stage_tasks.push(convert_feed);
    stage_tasks.push(convert_err);
    let convert_rx = {
        let mut guard = convert_child.lock().await;
        parse_child_output(&mut guard, ChildStream::Stdout, capacity).await?
    };
    children.push(("fasta-convert", convert_child));

    // Fan-out: both consumers see the converted stream byte for byte.
    let (fasta_streams, fasta_done) = t_junction(
        convert_rx,
        2,
        capacity,
        format!("{}-fasta", ctx.sample_id),
    )
    .await;
    junction_dones.push(fasta_done);
    let mut fasta_streams = fasta_streams.into_iter();
    let quality_rx = fasta_streams.next().ok_or(PipelineError::EmptyStream)?;
    let derep_in_rx = fasta_streams.next().ok_or(PipelineError::EmptyStream)?;

    // Stage 4: quality-extract (in-process). One (key, expected-errors,
    // length) record per read, collapsed to the minimum expected error per
    // identity key.
    let quality_path = staged.quality.clone();
    let quality_task: JoinHandle<Result<(u64, u64)>> = tokio::spawn(async move {
        let records = collect_identity_records(quality_rx).await?;
        let input = records.len() as u64;
        let kept = consolidate(records);
        let mut body = String::with_capacity(kept.len() * 64);
        for record in &kept {
            body.push_str(&record.to_line());
            body.push('\n');
        }
        tokio::fs::write(&quality_path, body).await?;
        Ok((kept.len() as u64, input - kept.len() as u64))
    });

    // Stage 5: dereplicate into the sample's sequence set.
    let (derep_child, derep_feed, derep_err) =
        stream_to_cmd(derep_in_rx, VSEARCH_TAG, vsearch::derep_args(), log.clone()).await?;
    stage_tasks.push(derep_feed);
    stage_tasks.push(derep_err);
    let derep_rx = {
        let mut guard = derep_child.lock().await;
        parse_child_output(&mut guard, ChildStream::Stdout, capacity).await?
    };
    children.push(("dereplicate", derep_child));

    let (derep_streams, derep_done) = t_junction(
        derep_rx,
        2,
        capacity,
        format!("{}-derep", ctx.sample_id),
    )
    .await;
    junction_dones.push(derep_done);
    let mut derep_streams = derep_streams.into_iter();
    let fasta_file_rx = derep_streams.next().ok_or(PipelineError::EmptyStream)?;
    let cluster_rx = derep_streams.next().ok_or(PipelineError::EmptyStream)?;

    stage_tasks.push(stream_to_file(fasta_file_rx, staged.fasta.clone()));

    // Stage 6: clustering, the terminal consumer. Cluster statistics land in
    // a staging file; membership detail is discarded.
    let raw_stats = staging.path().join("clusters.stats");
    let (swarm_child, swarm_feed, swarm_err) = stream_to_cmd(
        cluster_rx,
        SWARM_TAG,
        swarm::cluster_args(config.args.differences, threads, &raw_stats),
        log.clone(),
    )
    .await?;
    stage_tasks.push(swarm_feed);
    stage_tasks.push(swarm_err);
    children.push(("cluster", swarm_child));

    // Join barrier. Nothing below publishes until every background task has
    // terminated and every child has exited.
    let task_results = try_join_all(stage_tasks)
        .await
        .map_err(|e| PipelineError::Other(e.into()))?;
    for result in task_results {
        result.map_err(PipelineError::Other)?;
    }
    for done in junction_dones {
        done.await
            .map_err(|_| PipelineError::StreamDataDropped)?
            .map_err(PipelineError::Other)?;
    }
    let (unique_sequences, duplicates_collapsed) =
        join_with_error_handling(quality_task).await?;

    for (stage, child) in &children {
        let status = child
            .lock()
            .await
            .wait()
            .await
            .map_err(|e| PipelineError::ToolExecution {
                tool: stage.to_string(),
                error: e.to_string(),
            })?;
        if !status.success() {
            return Err(PipelineError::ToolExecution {
                tool: stage.to_string(),
                error: format!("exited with {}", status),
            });
        }
    }

    let clusters_kept = filter_cluster_stats(&raw_stats, &staged.stats)?;

    {
        let mut file = log.lock().await;
        file.flush().await?;
    }

    // Atomic publish: staging lives inside the output directory, so these
    // renames never cross a file-system boundary.
    for (src, dst) in staged.all().iter().zip(ctx.artifacts.all().iter()) {
        tokio::fs::rename(src, dst)
            .await
            .map_err(|e| PipelineError::IOError(format!("publishing {}: {}", dst.display(), e)))?;
    }

    Ok(SampleSummary {
        sample_id: ctx.sample_id,
        unique_sequences,
        duplicates_collapsed,
        clusters_kept,
    })
}

/// Keeps only clusters whose total abundance exceeds the fixed threshold.
/// A missing or empty stats file (no reads survived) yields an empty table.
pub fn filter_cluster_stats(raw: &Path, out: &Path) -> Result<u64, PipelineError> {
    let body = match std::fs::read_to_string(raw) {
        Ok(body) => body,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(PipelineError::IOError(e.to_string())),
    };
    let mut kept = 0u64;
    let mut filtered = String::new();
    for line in body.lines() {
        let mass = line.split('\t').nth(1).and_then(|m| m.parse::<u64>().ok());
        match mass {
            Some(mass) if mass > MIN_CLUSTER_MASS => {
                filtered.push_str(line);
                filtered.push('\n');
                kept += 1;
            }
            Some(_) => {}
            None => warn!("malformed cluster stats line skipped: {:?}", line),
        }
    }
    std::fs::write(out, filtered).map_err(|e| PipelineError::IOError(e.to_string()))?;
    Ok(kept)
}
