use std::fmt;
use std::path::PathBuf;
use crate::cli::Arguments;
use lazy_static::lazy_static;
use std::collections::HashMap;

// External software
pub const VSEARCH_TAG: &str = "vsearch";
pub const CUTADAPT_TAG: &str = "cutadapt";
pub const SWARM_TAG: &str = "swarm";

lazy_static! {
    pub static ref TOOL_VERSIONS: HashMap<&'static str, f32> = {
        let mut m = HashMap::new();
        m.insert(VSEARCH_TAG, 2.21);
        m.insert(CUTADAPT_TAG, 4.0);
        m.insert(SWARM_TAG, 3.1);

        m
    };
}

// Per-sample artifact suffixes
pub const FASTA_SUFFIX: &str = "fas";
pub const QUALITY_SUFFIX: &str = "qual";
pub const LOG_SUFFIX: &str = "log";
pub const STATS_SUFFIX: &str = "stats";

// Identity keys are SHA-1 hex digests; dedup compares this many leading bytes.
pub const KEY_PREFIX_WIDTH: usize = 40;

// Clusters whose total abundance does not exceed this are dropped
// from the per-sample cluster-size table.
pub const MIN_CLUSTER_MASS: u64 = 2;

// An empty gzip container is 28 bytes or less; mate files at or below
// this size hold no reads worth processing.
pub const EMPTY_GZIP_BYTES: u64 = 28;

pub struct RunConfig {
    pub cwd: PathBuf,
    pub out_dir: PathBuf,
    pub args: Arguments,
    pub channel_capacity: usize,
}

#[derive(Debug)]
pub enum PipelineError {
    InvalidConfig(String),
    ToolExecution { tool: String, error: String },
    ToolVersion { tool: String, required: f32, found: String },
    StreamDataDropped,
    EmptyStream,
    IOError(String),
    SampleTimeout { sample: String, seconds: u64 },
    ConsolidationMismatch { input: u64, kept: u64, discarded: u64 },
    Other(anyhow::Error),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            PipelineError::ToolExecution { tool, error } => {
                write!(f, "{} failed: {}", tool, error)
            }
            PipelineError::ToolVersion { tool, required, found } => {
                write!(f, "{} version {} found, {} or newer required", tool, found, required)
            }
            PipelineError::StreamDataDropped => write!(f, "stream data dropped between stages"),
            PipelineError::EmptyStream => write!(f, "expected stream is missing"),
            PipelineError::IOError(msg) => write!(f, "I/O error: {}", msg),
            PipelineError::SampleTimeout { sample, seconds } => {
                write!(f, "sample {} exceeded the {}s timeout (merge stall?)", sample, seconds)
            }
            PipelineError::ConsolidationMismatch { input, kept, discarded } => {
                write!(
                    f,
                    "consolidation record counts diverge: {} in, {} kept, {} discarded",
                    input, kept, discarded
                )
            }
            PipelineError::Other(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::IOError(e.to_string())
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        PipelineError::Other(e)
    }
}
