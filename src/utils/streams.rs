// src/utils/streams.rs
//
// Channel plumbing between pipeline stages. Stages communicate exclusively
// through bounded tokio mpsc channels of byte chunks; the bounded capacity is
// the backpressure mechanism, so no stage buffers unbounded data. Fan-out is
// a lossless tee: every receiver sees an identical copy of the stream.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::{debug, warn};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

const READ_CHUNK_BYTES: usize = 65_536;

#[derive(Debug, Clone)]
pub enum ParseOutput {
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChildStream {
    Stdout,
    Stderr,
}

/// Shared append handle to one sample's log file. Tool diagnostics go here,
/// never into the data stream.
pub type SampleLog = Arc<Mutex<File>>;

pub async fn open_sample_log(path: &PathBuf) -> Result<SampleLog> {
    let file = File::create(path).await?;
    Ok(Arc::new(Mutex::new(file)))
}

/// Generates any number of output streams from a single input stream.
/// All receivers get every item; a send blocks until the slowest consumer
/// has room, which is the intended backpressure. The done channel resolves
/// when the input is exhausted and every copy has been delivered.
pub async fn t_junction<T>(
    mut input_rx: mpsc::Receiver<T>,
    num_streams: usize,
    capacity: usize,
    label: String,
) -> (Vec<mpsc::Receiver<T>>, oneshot::Receiver<Result<()>>)
where
    T: Clone + Send + 'static,
{
    let mut senders = Vec::with_capacity(num_streams);
    let mut receivers = Vec::with_capacity(num_streams);
    for _ in 0..num_streams {
        let (tx, rx) = mpsc::channel(capacity);
        senders.push(tx);
        receivers.push(rx);
    }

    let (done_tx, done_rx) = oneshot::channel();
    tokio::spawn(async move {
        while let Some(item) = input_rx.recv().await {
            for tx in &senders {
                if tx.send(item.clone()).await.is_err() {
                    let _ = done_tx.send(Err(anyhow!("{}: a consumer hung up early", label)));
                    return;
                }
            }
        }
        debug!("t_junction {} drained", label);
        let _ = done_tx.send(Ok(()));
    });

    (receivers, done_rx)
}

/// Spawns an external tool that consumes the given byte stream on stdin.
/// Stdout is left piped for `parse_child_output`; stderr is appended to the
/// sample log. Returns the child plus the stdin-feeder and stderr-drain
/// tasks so the caller can join them at the barrier.
pub async fn stream_to_cmd(
    mut input_rx: mpsc::Receiver<ParseOutput>,
    tool: &str,
    args: Vec<String>,
    log: SampleLog,
) -> Result<(Arc<Mutex<Child>>, JoinHandle<Result<()>>, JoinHandle<Result<()>>)> {
    let tool_owned = tool.to_string();
    let mut child = Command::new(tool)
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| anyhow!("Failed to spawn {}: {}. Is it installed?", tool_owned, e))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("Failed to open stdin for {}", tool_owned))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("Failed to open stderr for {}", tool_owned))?;

    let feeder_tool = tool_owned.clone();
    let stream_task = tokio::spawn(async move {
        while let Some(ParseOutput::Bytes(chunk)) = input_rx.recv().await {
            if let Err(e) = stdin.write_all(&chunk).await {
                // Downstream tools may close stdin once satisfied; drain and stop.
                warn!("{} closed stdin early: {}", feeder_tool, e);
                break;
            }
        }
        stdin.shutdown().await.ok();
        Ok(())
    });

    let err_task = spawn_stderr_to_log(stderr, tool_owned, log);

    Ok((Arc::new(Mutex::new(child)), stream_task, err_task))
}

/// Spawns an external tool that reads its inputs from file arguments rather
/// than stdin (the head of a pipeline). Stderr goes to the sample log.
pub async fn spawn_source_cmd(
    tool: &str,
    args: Vec<String>,
    log: SampleLog,
) -> Result<(Arc<Mutex<Child>>, JoinHandle<Result<()>>)> {
    let tool_owned = tool.to_string();
    let mut child = Command::new(tool)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| anyhow!("Failed to spawn {}: {}. Is it installed?", tool_owned, e))?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("Failed to open stderr for {}", tool_owned))?;
    let err_task = spawn_stderr_to_log(stderr, tool_owned, log);

    Ok((Arc::new(Mutex::new(child)), err_task))
}

fn spawn_stderr_to_log(
    stderr: tokio::process::ChildStderr,
    tool: String,
    log: SampleLog,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Some(line) = lines.next_line().await? {
            let mut file = log.lock().await;
            file.write_all(format!("[{}] {}\n", tool, line).as_bytes())
                .await?;
        }
        let mut file = log.lock().await;
        file.flush().await?;
        Ok(())
    })
}

/// Reads a child's stdout into a bounded byte-chunk channel.
pub async fn parse_child_output(
    child: &mut Child,
    stream: ChildStream,
    capacity: usize,
) -> Result<mpsc::Receiver<ParseOutput>> {
    if stream != ChildStream::Stdout {
        return Err(anyhow!("only stdout parsing is supported between stages"));
    }
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("child stdout already taken"))?;

    let (tx, rx) = mpsc::channel(capacity);
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK_BYTES];
        loop {
            match stdout.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(ParseOutput::Bytes(buf[..n].to_vec())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("child stdout read failed: {}", e);
                    break;
                }
            }
        }
    });
    Ok(rx)
}

/// Collects a child's output stream into lines; for version probes and other
/// short, bounded outputs.
pub async fn read_child_output_to_vec(
    child: &mut Child,
    stream: ChildStream,
) -> Result<Vec<String>> {
    let mut text = String::new();
    match stream {
        ChildStream::Stdout => {
            let mut stdout = child
                .stdout
                .take()
                .ok_or_else(|| anyhow!("child stdout already taken"))?;
            stdout.read_to_string(&mut text).await?;
        }
        ChildStream::Stderr => {
            let mut stderr = child
                .stderr
                .take()
                .ok_or_else(|| anyhow!("child stderr already taken"))?;
            stderr.read_to_string(&mut text).await?;
        }
    }
    Ok(text.lines().map(|l| l.to_string()).collect())
}

/// Drains a byte stream into a file. Spawned per output artifact.
pub fn stream_to_file(
    mut input_rx: mpsc::Receiver<ParseOutput>,
    path: PathBuf,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let mut file = File::create(&path)
            .await
            .map_err(|e| anyhow!("Failed to create {}: {}", path.display(), e))?;
        while let Some(ParseOutput::Bytes(chunk)) = input_rx.recv().await {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    })
}

/// Joins a spawned task, flattening the join error into the task's error.
pub async fn join_with_error_handling<T>(handle: JoinHandle<Result<T>>) -> Result<T> {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(anyhow!("task panicked or was cancelled: {}", e)),
    }
}
