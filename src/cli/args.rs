use clap::Parser;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "amplicon-pipelines", version)]
pub struct Arguments {

    #[arg(short, long, help = "Pipeline module to run: 'process' or 'pool'")]
    pub module: String,

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(short = 'i', long = "input-dir", help = "Directory holding raw paired-end FASTQ files (process) or per-sample quality tables (pool)")]
    pub input_dir: Option<String>,

    #[arg(short = 'o', long = "out", help = "Output directory for all generated files. Defaults to the current working directory.")]
    pub out_dir: Option<String>,

    #[arg(long = "primer-f", default_value = "CCAGCASCYGCGGTAATTCC")]
    pub primer_f: String,

    #[arg(long = "primer-r", default_value = "TYRATCAAGAACGAAAGT")]
    pub primer_r: String,

    #[arg(long = "min-length", default_value_t = 32, help = "Minimum read length after primer trimming")]
    pub min_length: usize,

    #[arg(short = 'd', long = "differences", default_value_t = 1, help = "Maximum pairwise differences for clustering")]
    pub differences: usize,

    #[arg(short = 'j', long = "jobs", default_value_t = 1, help = "Maximum number of samples processed concurrently")]
    pub jobs: usize,

    #[arg(long, default_value_t = 0, help = "Threads handed to external tools; 0 = all physical cores")]
    pub threads: usize,

    #[arg(long = "min-input-bytes", help = "Mate files at or below this size are skipped; defaults to the size of an empty gzip container")]
    pub min_input_bytes: Option<u64>,

    #[arg(long = "sample-timeout", default_value_t = 0, help = "Per-sample wall-clock limit in seconds; 0 disables. Guards against the known vsearch merge stall.")]
    pub sample_timeout: u64,

    #[arg(long = "pooled-name", default_value = "pooled", help = "Base name of the cross-sample quality table")]
    pub pooled_name: String,
}
