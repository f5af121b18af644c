use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use log::debug;

use crate::config::defs::{FASTA_SUFFIX, LOG_SUFFIX, QUALITY_SUFFIX, STATS_SUFFIX};

pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1F, 0x8B]), // Gzip magic bytes
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Enum to hold either an uncompressed or gzipped file reader.
pub enum FileReader {
    Uncompressed(BufReader<File>),
    Gzipped(BufReader<GzDecoder<File>>),
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FileReader::Uncompressed(r) => r.read(buf),
            FileReader::Gzipped(r) => r.read(buf),
        }
    }
}

/// The four durable outputs of one sample run, named deterministically from
/// the sample id. A sample id maps to at most one live set at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactSet {
    pub fasta: PathBuf,
    pub quality: PathBuf,
    pub log: PathBuf,
    pub stats: PathBuf,
}

impl ArtifactSet {
    pub fn for_sample(out_dir: &Path, sample_id: &str) -> ArtifactSet {
        ArtifactSet {
            fasta: out_dir.join(format!("{}.{}", sample_id, FASTA_SUFFIX)),
            quality: out_dir.join(format!("{}.{}", sample_id, QUALITY_SUFFIX)),
            log: out_dir.join(format!("{}.{}", sample_id, LOG_SUFFIX)),
            stats: out_dir.join(format!("{}.{}", sample_id, STATS_SUFFIX)),
        }
    }

    pub fn all(&self) -> [&PathBuf; 4] {
        [&self.fasta, &self.quality, &self.log, &self.stats]
    }

    pub fn file_names(&self) -> Vec<String> {
        self.all()
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect()
    }

    /// Removes any artifact left over from a previous run of the same
    /// sample, so a rerun starts from a clean slate. Must run before any
    /// stage is created.
    pub fn remove_stale(&self) -> io::Result<()> {
        for path in self.all() {
            match std::fs::remove_file(path) {
                Ok(()) => debug!("removed stale artifact {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn all_present(&self) -> bool {
        self.all().iter().all(|p| p.exists())
    }
}

/// Removes leftover per-sample staging directories from an interrupted run.
/// Staging dirs are dot-prefixed with the sample id so concurrent samples
/// never collide.
pub fn staging_prefix(sample_id: &str) -> String {
    format!(".{}-", sample_id)
}

pub fn remove_stale_staging(out_dir: &Path, sample_id: &str) -> io::Result<()> {
    let prefix = staging_prefix(sample_id);
    for entry in std::fs::read_dir(out_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix) && entry.file_type()?.is_dir() {
            debug!("removing stale staging dir {}", entry.path().display());
            std::fs::remove_dir_all(entry.path())?;
        }
    }
    Ok(())
}

/// Sorted list of regular files in a directory carrying one of the given
/// extensions (compared against the full file name, so "fastq.gz" works).
pub fn list_files_with_suffix(dir: &Path, suffixes: &[&str]) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if suffixes.iter().any(|s| name.ends_with(s)) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_artifact_names_derive_from_sample_id() {
        let set = ArtifactSet::for_sample(Path::new("/data/out"), "A");
        assert_eq!(set.fasta, PathBuf::from("/data/out/A.fas"));
        assert_eq!(set.quality, PathBuf::from("/data/out/A.qual"));
        assert_eq!(set.log, PathBuf::from("/data/out/A.log"));
        assert_eq!(set.stats, PathBuf::from("/data/out/A.stats"));
    }

    #[test]
    fn test_remove_stale_clears_previous_outputs() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let set = ArtifactSet::for_sample(dir.path(), "S1");
        std::fs::write(&set.fasta, ">x\nACGT\n")?;
        std::fs::write(&set.quality, "x\t0.1\t4\n")?;
        set.remove_stale()?;
        assert!(!set.fasta.exists());
        assert!(!set.quality.exists());
        // Missing files are not an error.
        set.remove_stale()?;
        Ok(())
    }

    #[test]
    fn test_is_gzipped() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let gz_path = dir.path().join("x.gz");
        let mut enc = flate2::write::GzEncoder::new(
            File::create(&gz_path)?,
            flate2::Compression::default(),
        );
        enc.write_all(b"@r1\nACGT\n+\nIIII\n")?;
        enc.finish()?;
        assert!(is_gzipped(&gz_path)?);

        let plain = dir.path().join("x.txt");
        std::fs::write(&plain, "hello")?;
        assert!(!is_gzipped(&plain)?);
        Ok(())
    }

    #[test]
    fn test_list_files_with_suffix_sorted() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("b_R1.fastq.gz"), "x")?;
        std::fs::write(dir.path().join("a_R1.fastq.gz"), "x")?;
        std::fs::write(dir.path().join("notes.txt"), "x")?;
        let files = list_files_with_suffix(dir.path(), &["fastq.gz"])?;
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a_R1.fastq.gz", "b_R1.fastq.gz"]);
        Ok(())
    }
}
