/// Command-line construction and presence checks for the external tools.
/// The tools are opaque collaborators; only their CLI contracts live here.

use anyhow::{anyhow, Result};
use log::debug;

use crate::config::defs::{CUTADAPT_TAG, SWARM_TAG, TOOL_VERSIONS, VSEARCH_TAG};

/// Minimum primer overlap: two thirds of the primer length, truncated.
pub fn min_overlap(primer: &str) -> usize {
    primer.len() * 2 / 3
}

pub mod vsearch {
    use std::path::Path;
    use anyhow::{anyhow, Result};
    use tokio::process::Command;
    use crate::config::defs::VSEARCH_TAG;
    use crate::utils::streams::{read_child_output_to_vec, ChildStream};

    /// vsearch reports its version on stderr: "vsearch v2.21.1_linux_x86_64, ...".
    pub async fn presence_check() -> Result<String> {
        let mut child = Command::new(VSEARCH_TAG)
            .arg("--version")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn {}: {}. Is vsearch installed?", VSEARCH_TAG, e))?;

        let lines = read_child_output_to_vec(&mut child, ChildStream::Stderr).await?;
        child.wait().await?;
        let first_line = lines
            .first()
            .ok_or_else(|| anyhow!("No output from vsearch --version"))?;
        let version = first_line
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| anyhow!("Invalid vsearch --version output: {}", first_line))?
            .trim_start_matches('v')
            .split('_')
            .next()
            .unwrap_or_default()
            .to_string();
        if version.is_empty() {
            return Err(anyhow!("Empty version number in vsearch output: {}", first_line));
        }
        Ok(version)
    }

    /// Overlap-merge of one sample's paired reads; merged FASTQ on stdout.
    pub fn merge_args(forward: &Path, reverse: &Path, threads: usize) -> Vec<String> {
        vec![
            "--fastq_mergepairs".to_string(),
            forward.to_string_lossy().to_string(),
            "--reverse".to_string(),
            reverse.to_string_lossy().to_string(),
            "--threads".to_string(),
            threads.to_string(),
            "--fastq_ascii".to_string(),
            "33".to_string(),
            "--fastq_allowmergestagger".to_string(),
            "--fastqout".to_string(),
            "-".to_string(),
        ]
    }

    /// FASTQ to FASTA, relabeled with the sequence SHA-1 and annotated with
    /// the expected-error summary. Unwrapped output so the fan-out consumers
    /// see one line per sequence.
    pub fn convert_args() -> Vec<String> {
        vec![
            "--fastq_filter".to_string(),
            "-".to_string(),
            "--quiet".to_string(),
            "--relabel_sha1".to_string(),
            "--eeout".to_string(),
            "--fasta_width".to_string(),
            "0".to_string(),
            "--fastaout".to_string(),
            "-".to_string(),
        ]
    }

    /// Collapse identical sequences, summing abundances; drops the
    /// expected-error annotation.
    pub fn derep_args() -> Vec<String> {
        vec![
            "--derep_fulllength".to_string(),
            "-".to_string(),
            "--quiet".to_string(),
            "--sizeout".to_string(),
            "--fasta_width".to_string(),
            "0".to_string(),
            "--output".to_string(),
            "-".to_string(),
        ]
    }
}

pub mod cutadapt {
    use anyhow::{anyhow, Result};
    use tokio::process::Command;
    use crate::config::defs::CUTADAPT_TAG;
    use crate::utils::streams::{read_child_output_to_vec, ChildStream};

    pub async fn presence_check() -> Result<String> {
        let mut child = Command::new(CUTADAPT_TAG)
            .arg("--version")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn {}: {}. Is cutadapt installed?", CUTADAPT_TAG, e))?;

        let lines = read_child_output_to_vec(&mut child, ChildStream::Stdout).await?;
        child.wait().await?;
        let version = lines
            .first()
            .ok_or_else(|| anyhow!("No output from cutadapt --version"))?
            .trim()
            .to_string();
        if version.is_empty() {
            return Err(anyhow!("Empty version number from cutadapt"));
        }
        Ok(version)
    }

    /// First trimming pass: locate the forward primer at the 5' end.
    /// Untrimmed reads are discarded, not erred.
    pub fn forward_args(primer_f: &str, min_length: usize) -> Vec<String> {
        vec![
            "--discard-untrimmed".to_string(),
            "--minimum-length".to_string(),
            min_length.to_string(),
            "-g".to_string(),
            primer_f.to_string(),
            "-O".to_string(),
            super::min_overlap(primer_f).to_string(),
            "-".to_string(),
        ]
    }

    /// Second pass: locate the reverse-complemented reverse primer at the
    /// 3' end and drop any read still carrying ambiguous bases.
    pub fn reverse_args(anti_primer_r: &str, primer_r_len: usize, min_length: usize) -> Vec<String> {
        vec![
            "--discard-untrimmed".to_string(),
            "--minimum-length".to_string(),
            min_length.to_string(),
            "--max-n".to_string(),
            "0".to_string(),
            "-a".to_string(),
            anti_primer_r.to_string(),
            "-O".to_string(),
            (primer_r_len * 2 / 3).to_string(),
            "-".to_string(),
        ]
    }
}

pub mod swarm {
    use std::path::Path;
    use anyhow::{anyhow, Result};
    use tokio::process::Command;
    use crate::config::defs::SWARM_TAG;
    use crate::utils::streams::{read_child_output_to_vec, ChildStream};

    /// swarm reports its version on stderr: "Swarm 3.1.5 ...".
    pub async fn presence_check() -> Result<String> {
        let mut child = Command::new(SWARM_TAG)
            .arg("--version")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn {}: {}. Is swarm installed?", SWARM_TAG, e))?;

        let lines = read_child_output_to_vec(&mut child, ChildStream::Stderr).await?;
        child.wait().await?;
        let first_line = lines
            .first()
            .ok_or_else(|| anyhow!("No output from swarm --version"))?;
        let version = first_line
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| anyhow!("Invalid swarm --version output: {}", first_line))?
            .to_string();
        if version.is_empty() {
            return Err(anyhow!("Empty version number in swarm output: {}", first_line));
        }
        Ok(version)
    }

    /// Abundance-aware clustering of the dereplicated sequence set read from
    /// stdin. Per-cluster statistics go to the dedicated stats file; cluster
    /// membership detail is not used beyond size filtering and is discarded.
    pub fn cluster_args(differences: usize, threads: usize, stats_path: &Path) -> Vec<String> {
        vec![
            "-d".to_string(),
            differences.to_string(),
            "-z".to_string(),
            "-t".to_string(),
            threads.to_string(),
            "-o".to_string(),
            "/dev/null".to_string(),
            "-s".to_string(),
            stats_path.to_string_lossy().to_string(),
        ]
    }
}

pub async fn check_version(tool: &str) -> Result<String> {
    match tool {
        VSEARCH_TAG => vsearch::presence_check().await,
        CUTADAPT_TAG => cutadapt::presence_check().await,
        SWARM_TAG => swarm::presence_check().await,
        _ => Err(anyhow!("Unknown tool: {}", tool)),
    }
}

/// Verifies every required tool is on PATH and at least the minimum version.
pub async fn check_versions(tools: Vec<&str>) -> Result<()> {
    for tool in tools {
        let version = check_version(tool).await?;
        let required = TOOL_VERSIONS
            .get(tool)
            .copied()
            .ok_or_else(|| anyhow!("No minimum version recorded for {}", tool))?;
        let major_minor = parse_major_minor(&version)
            .ok_or_else(|| anyhow!("Unparseable {} version: {}", tool, version))?;
        if major_minor < required {
            return Err(anyhow!(
                "{} version {} found, {} or newer required",
                tool,
                version,
                required
            ));
        }
        debug!("{} {} (>= {})", tool, version, required);
    }
    Ok(())
}

fn parse_major_minor(version: &str) -> Option<f32> {
    let mut parts = version.split('.');
    let major = parts.next()?;
    let minor = parts.next().unwrap_or("0");
    format!("{}.{}", major, minor).parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_overlap_truncates() {
        assert_eq!(min_overlap("CCAGCASCYGCGGTAATTCC"), 13); // 20 * 2 / 3
        assert_eq!(min_overlap("TYRATCAAGAACGAAAGT"), 12); // 18 * 2 / 3
        assert_eq!(min_overlap("AAAA"), 2); // 4 * 2 / 3 truncates
    }

    #[test]
    fn test_parse_major_minor() {
        assert_eq!(parse_major_minor("2.21.1"), Some(2.21));
        assert_eq!(parse_major_minor("4"), Some(4.0));
        assert_eq!(parse_major_minor("not-a-version"), None);
    }

    #[test]
    fn test_merge_args_shape() {
        let args = vsearch::merge_args(
            std::path::Path::new("A_R1.fq.gz"),
            std::path::Path::new("A_R2.fq.gz"),
            4,
        );
        assert!(args.contains(&"--fastq_allowmergestagger".to_string()));
        assert!(args.contains(&"--fastq_ascii".to_string()));
        assert_eq!(args.last().unwrap(), "-");
    }
}
