use seq_io::fasta::{Reader as FastaReader, OwnedRecord as FastaOwnedRecord};
use seq_io::fastq::{Reader as FastqReader, OwnedRecord as FastqOwnedRecord};
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;
use flate2::read::GzDecoder;
use anyhow::{anyhow, Result};
use tokio::sync::mpsc;

use crate::utils::consolidate::IdentityRecord;
use crate::utils::file::{is_gzipped, FileReader};
use crate::utils::streams::ParseOutput;

const FASTA_TAG: &str = "fasta";
const FASTQ_TAG: &str = "fastq";
const FASTA_EXTS: &[&'static str] = &["fasta", "fa", "fas", "fna"];
const FASTQ_EXTS: &[&'static str] = &["fastq", "fq"];

/// Defines FASTA and FASTQ as part of a unified FASTX structure.
#[derive(Clone)]
pub enum SequenceRecord {
    Fasta {
        id: String,
        desc: Option<String>,
        seq: Vec<u8>,
    },
    Fastq {
        id: String,
        desc: Option<String>,
        seq: Vec<u8>,
        qual: Vec<u8>,
    },
}

impl SequenceRecord {
    pub fn id(&self) -> &str {
        match self {
            SequenceRecord::Fasta { id, .. } => id,
            SequenceRecord::Fastq { id, .. } => id,
        }
    }

    pub fn seq(&self) -> &[u8] {
        match self {
            SequenceRecord::Fasta { seq, .. } => seq,
            SequenceRecord::Fastq { seq, .. } => seq,
        }
    }
}

impl From<FastaOwnedRecord> for SequenceRecord {
    fn from(record: FastaOwnedRecord) -> Self {
        let (id, desc) = parse_header(&record.head, '>');
        SequenceRecord::Fasta {
            id,
            desc,
            seq: record.seq,
        }
    }
}

impl From<FastqOwnedRecord> for SequenceRecord {
    fn from(record: FastqOwnedRecord) -> Self {
        let (id, desc) = parse_header(&record.head, '@');
        SequenceRecord::Fastq {
            id,
            desc,
            seq: record.seq,
            qual: record.qual,
        }
    }
}

/// Enum to hold either FASTA or FASTQ reader
pub enum SequenceReader {
    Fasta(FastaReader<FileReader>),
    Fastq(FastqReader<FileReader>),
}

/// Creates a SequenceReader for either FASTA or FASTQ files, transparently
/// decompressing gzip.
pub fn sequence_reader(path: &PathBuf) -> io::Result<SequenceReader> {
    let file = File::open(path)?;
    let is_gz = is_gzipped(path)?;
    let reader = if is_gz {
        FileReader::Gzipped(BufReader::new(GzDecoder::new(file)))
    } else {
        FileReader::Uncompressed(BufReader::new(file))
    };

    let filetype = fastx_filetype(path)?;
    match filetype.as_str() {
        FASTA_TAG => Ok(SequenceReader::Fasta(FastaReader::new(reader))),
        FASTQ_TAG => Ok(SequenceReader::Fastq(FastqReader::new(reader))),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Unsupported file type for path: {:?}", path),
        )),
    }
}

/// Writes one FASTQ record; used when fabricating test inputs.
pub fn write_fastq_record<W: Write>(
    writer: &mut W,
    id: &str,
    desc: Option<&str>,
    seq: &[u8],
    qual: &[u8],
) -> io::Result<()> {
    writer.write_all(b"@")?;
    writer.write_all(id.as_bytes())?;
    if let Some(desc) = desc {
        writer.write_all(b" ")?;
        writer.write_all(desc.as_bytes())?;
    }
    writer.write_all(b"\n")?;
    writer.write_all(seq)?;
    writer.write_all(b"\n+\n")?;
    writer.write_all(qual)?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// Determines if a file path is FASTA, FASTQ, or neither.
/// Checks extensions, not the body.
fn fastx_filetype(path: &PathBuf) -> io::Result<String> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    for part in name.rsplit('.') {
        if FASTA_EXTS.iter().any(|&e| e == part) {
            return Ok(FASTA_TAG.to_string());
        }
        if FASTQ_EXTS.iter().any(|&e| e == part) {
            return Ok(FASTQ_TAG.to_string());
        }
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!(
            "File '{}' has invalid extension(s). Expected FASTA ({:?}) or FASTQ ({:?}).",
            path.display(),
            FASTA_EXTS,
            FASTQ_EXTS
        ),
    ))
}

/// Parses a FASTX header into (id, desc), split on the first whitespace.
fn parse_header(head: &[u8], prefix: char) -> (String, Option<String>) {
    let head_str = String::from_utf8_lossy(head).into_owned();
    let parts: Vec<&str> = head_str.splitn(2, |c: char| c.is_whitespace()).collect();
    let id = parts[0].trim_start_matches(prefix).to_string();
    let desc = parts.get(1).map(|s| s.to_string()).filter(|s| !s.is_empty());
    (id, desc)
}

/// Reads a whole FASTA or FASTQ file into owned records.
pub fn read_records(path: &PathBuf) -> io::Result<Vec<SequenceRecord>> {
    let mut records = Vec::new();
    match sequence_reader(path)? {
        SequenceReader::Fasta(reader) => {
            for record in reader.into_records() {
                let record = record.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                records.push(record.into());
            }
        }
        SequenceReader::Fastq(reader) => {
            for record in reader.into_records() {
                let record = record.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                records.push(record.into());
            }
        }
    }
    Ok(records)
}

/// Counts the number of records in a FASTA or FASTQ file.
pub fn record_counter(path: &PathBuf) -> io::Result<u64> {
    let mut counter = 0;
    match sequence_reader(path)? {
        SequenceReader::Fasta(reader) => {
            for _ in reader.into_records() {
                counter += 1;
            }
        }
        SequenceReader::Fastq(reader) => {
            for _ in reader.into_records() {
                counter += 1;
            }
        }
    }
    Ok(counter)
}

/// Splits a relabeled FASTA header of the form `sha1;ee=<value>` into the
/// identity key and the expected-error annotation.
pub fn split_identity_header(id: &str) -> Result<(String, f64)> {
    let (key, ee) = id
        .split_once(";ee=")
        .ok_or_else(|| anyhow!("FASTA header lacks an expected-error annotation: {}", id))?;
    let quality: f64 = ee
        .trim_end_matches(';')
        .parse()
        .map_err(|e| anyhow!("bad expected-error annotation in {:?}: {}", id, e))?;
    Ok((key.to_string(), quality))
}

/// Consumes one fan-out copy of the converted FASTA byte stream and collects
/// one IdentityRecord per sequence. The converter emits unwrapped FASTA, so
/// records arrive as strict header/sequence line pairs; chunk boundaries from
/// the channel are reassembled here.
pub async fn collect_identity_records(
    mut input_rx: mpsc::Receiver<ParseOutput>,
) -> Result<Vec<IdentityRecord>> {
    let mut records = Vec::new();
    let mut pending: Vec<u8> = Vec::new();
    let mut header: Option<(String, f64)> = None;

    let mut handle_line = |line: &[u8], header: &mut Option<(String, f64)>| -> Result<()> {
        if line.is_empty() {
            return Ok(());
        }
        if line[0] == b'>' {
            if header.is_some() {
                return Err(anyhow!("FASTA record without a sequence line"));
            }
            let (id, _desc) = parse_header(line, '>');
            *header = Some(split_identity_header(&id)?);
        } else {
            let (key, quality) = header
                .take()
                .ok_or_else(|| anyhow!("FASTA sequence line without a header"))?;
            records.push(IdentityRecord {
                key,
                quality,
                length: line.len() as u64,
            });
        }
        Ok(())
    };

    while let Some(ParseOutput::Bytes(chunk)) = input_rx.recv().await {
        pending.extend_from_slice(&chunk);
        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).take(pos).collect();
            handle_line(&line, &mut header)?;
        }
    }
    if !pending.is_empty() {
        handle_line(&pending.clone(), &mut header)?;
    }
    if header.is_some() {
        return Err(anyhow!("truncated FASTA stream: trailing header without sequence"));
    }
    Ok(records)
}
