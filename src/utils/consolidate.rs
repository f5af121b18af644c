/// Identity-collapse over quality records.
///
/// A quality table holds one line per read: `key<TAB>expected_errors<TAB>length`,
/// where the key is a SHA-1 hex digest of the sequence. Consolidation keeps,
/// for every run of records sharing a key, the one with the lowest expected
/// error value. The algorithm is a total-order sort on the composite key
/// (length, key bytes, expected errors) followed by a streaming pass that
/// drops records whose key prefix equals the previously kept record's prefix.
/// Length leads the comparison to match the historical table ordering; it
/// does not participate in identity.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use log::info;

use crate::config::defs::{PipelineError, KEY_PREFIX_WIDTH};

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityRecord {
    pub key: String,
    pub quality: f64,
    pub length: u64,
}

impl IdentityRecord {
    pub fn key_prefix(&self) -> &[u8] {
        let bytes = self.key.as_bytes();
        &bytes[..bytes.len().min(KEY_PREFIX_WIDTH)]
    }

    /// One quality-table line, without the trailing newline.
    pub fn to_line(&self) -> String {
        format!("{}\t{}\t{}", self.key, self.quality, self.length)
    }

    pub fn parse_line(line: &str) -> Result<IdentityRecord> {
        let mut fields = line.split_whitespace();
        let key = fields
            .next()
            .ok_or_else(|| anyhow!("empty quality-table line"))?
            .to_string();
        let quality: f64 = fields
            .next()
            .ok_or_else(|| anyhow!("quality-table line lacks an expected-error field: {}", line))?
            .parse()
            .map_err(|e| anyhow!("bad expected-error value in {:?}: {}", line, e))?;
        let length: u64 = fields
            .next()
            .ok_or_else(|| anyhow!("quality-table line lacks a length field: {}", line))?
            .parse()
            .map_err(|e| anyhow!("bad length value in {:?}: {}", line, e))?;
        Ok(IdentityRecord { key, quality, length })
    }
}

/// Total order over the composite sort key. No tie depends on input order.
pub fn composite_cmp(a: &IdentityRecord, b: &IdentityRecord) -> Ordering {
    a.length
        .cmp(&b.length)
        .then_with(|| a.key.as_bytes().cmp(b.key.as_bytes()))
        .then_with(|| a.quality.total_cmp(&b.quality))
}

/// Collapses duplicate identity keys, keeping the record with the minimum
/// expected-error value per key. Output is sorted by the composite key and
/// idempotent under re-consolidation.
pub fn consolidate(mut records: Vec<IdentityRecord>) -> Vec<IdentityRecord> {
    records.sort_by(composite_cmp);
    let mut kept: Vec<IdentityRecord> = Vec::with_capacity(records.len());
    for record in records {
        match kept.last() {
            Some(prev) if prev.key_prefix() == record.key_prefix() => {}
            _ => kept.push(record),
        }
    }
    kept
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConsolidateCounts {
    pub input: u64,
    pub kept: u64,
    pub discarded: u64,
}

// Heap entry for the k-way merge; ordered by composite key, with the source
// index as a final deterministic tie-break.
struct HeapEntry {
    record: IdentityRecord,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        composite_cmp(&self.record, &other.record).then(self.source.cmp(&other.source))
    }
}

struct TableSource {
    lines: std::io::Lines<BufReader<File>>,
    last: Option<IdentityRecord>,
    path: PathBuf,
}

impl TableSource {
    fn next_record(&mut self) -> Result<Option<IdentityRecord>> {
        loop {
            match self.lines.next() {
                None => return Ok(None),
                Some(line) => {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let record = IdentityRecord::parse_line(&line)?;
                    if let Some(prev) = &self.last {
                        if composite_cmp(prev, &record) == Ordering::Greater {
                            return Err(anyhow!(
                                "quality table {} is not sorted (key {} out of order)",
                                self.path.display(),
                                record.key
                            ));
                        }
                    }
                    self.last = Some(record.clone());
                    return Ok(Some(record));
                }
            }
        }
    }
}

/// K-way merge of already-sorted per-sample quality tables into one global,
/// consolidated table. Streaming: memory use is bounded by the number of
/// input tables, not their size. Each input is checked for sort order on the
/// fly; a count imbalance afterwards is a whole-run error, since it indicates
/// a correctness regression rather than a per-sample problem.
pub fn merge_quality_tables(
    inputs: &[PathBuf],
    output: &Path,
) -> Result<ConsolidateCounts, PipelineError> {
    let mut sources: Vec<TableSource> = Vec::with_capacity(inputs.len());
    for path in inputs {
        let file = File::open(path)
            .map_err(|e| PipelineError::IOError(format!("{}: {}", path.display(), e)))?;
        sources.push(TableSource {
            lines: BufReader::new(file).lines(),
            last: None,
            path: path.clone(),
        });
    }

    let mut heap: BinaryHeap<Reverse<HeapEntry>> = BinaryHeap::new();
    let mut counts = ConsolidateCounts::default();

    for (source, table) in sources.iter_mut().enumerate() {
        if let Some(record) = table.next_record()? {
            counts.input += 1;
            heap.push(Reverse(HeapEntry { record, source }));
        }
    }

    let out_file = File::create(output)
        .map_err(|e| PipelineError::IOError(format!("{}: {}", output.display(), e)))?;
    let mut writer = BufWriter::new(out_file);
    let mut last_kept: Option<IdentityRecord> = None;

    while let Some(Reverse(entry)) = heap.pop() {
        let HeapEntry { record, source } = entry;
        if let Some(next) = sources[source].next_record()? {
            counts.input += 1;
            heap.push(Reverse(HeapEntry { record: next, source }));
        }

        let duplicate = matches!(
            &last_kept,
            Some(prev) if prev.key_prefix() == record.key_prefix()
        );
        if duplicate {
            counts.discarded += 1;
        } else {
            writeln!(writer, "{}", record.to_line())
                .map_err(|e| PipelineError::IOError(e.to_string()))?;
            counts.kept += 1;
            last_kept = Some(record);
        }
    }
    writer
        .flush()
        .map_err(|e| PipelineError::IOError(e.to_string()))?;

    if counts.kept + counts.discarded != counts.input {
        return Err(PipelineError::ConsolidationMismatch {
            input: counts.input,
            kept: counts.kept,
            discarded: counts.discarded,
        });
    }
    info!(
        "consolidated {} quality tables: {} records in, {} kept, {} discarded",
        inputs.len(),
        counts.input,
        counts.kept,
        counts.discarded
    );
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(key: &str, quality: f64, length: u64) -> IdentityRecord {
        IdentityRecord { key: key.to_string(), quality, length }
    }

    #[test]
    fn test_consolidate_keeps_minimum_quality() {
        let out = consolidate(vec![rec("X", 0.5, 50), rec("X", 0.2, 50)]);
        assert_eq!(out, vec![rec("X", 0.2, 50)]);
    }

    #[test]
    fn test_consolidate_is_idempotent() {
        let once = consolidate(vec![
            rec("b", 1.0, 10),
            rec("a", 0.3, 10),
            rec("a", 0.1, 10),
            rec("c", 2.0, 8),
        ]);
        let twice = consolidate(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_consolidate_never_gains_keys() {
        let input = vec![
            rec("a", 0.3, 10),
            rec("a", 0.1, 10),
            rec("b", 0.9, 10),
            rec("b", 0.9, 10),
        ];
        let distinct_in = 2;
        let out = consolidate(input);
        assert!(out.len() <= distinct_in);
        assert_eq!(out[0], rec("a", 0.1, 10));
        assert_eq!(out[1], rec("b", 0.9, 10));
    }

    #[test]
    fn test_length_precedes_key_in_sort() {
        // Records with different lengths for the same key are not adjacent
        // after the sort, so both survive; this matches the historical
        // pipeline's behavior.
        let out = consolidate(vec![rec("k", 0.5, 60), rec("k", 0.2, 50)]);
        assert_eq!(out, vec![rec("k", 0.2, 50), rec("k", 0.5, 60)]);
    }

    #[test]
    fn test_prefix_width_bounds_comparison() {
        // Keys identical in the first 40 bytes are duplicates even if they
        // diverge afterwards.
        let long_a = format!("{}A", "0".repeat(KEY_PREFIX_WIDTH));
        let long_b = format!("{}B", "0".repeat(KEY_PREFIX_WIDTH));
        let out = consolidate(vec![rec(&long_a, 0.4, 10), rec(&long_b, 0.6, 10)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].quality, 0.4);
    }

    #[test]
    fn test_parse_and_format_round_trip() {
        let record = rec("deadbeef", 0.53, 187);
        let parsed = IdentityRecord::parse_line(&record.to_line()).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_merge_quality_tables_keeps_global_minimum() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let table_a = dir.path().join("a.qual");
        let table_b = dir.path().join("b.qual");
        std::fs::write(&table_a, "Y\t1.0\t50\n")?;
        std::fs::write(&table_b, "Y\t0.4\t50\nZ\t0.7\t60\n")?;

        let pooled = dir.path().join("pooled.qual");
        let counts = merge_quality_tables(&[table_a, table_b], &pooled).unwrap();
        assert_eq!(counts, ConsolidateCounts { input: 3, kept: 2, discarded: 1 });

        let body = std::fs::read_to_string(&pooled)?;
        assert_eq!(body, "Y\t0.4\t50\nZ\t0.7\t60\n");
        Ok(())
    }

    #[test]
    fn test_merge_rejects_unsorted_input() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let table = dir.path().join("bad.qual");
        std::fs::write(&table, "Z\t0.7\t60\nY\t0.4\t50\n")?;
        let pooled = dir.path().join("pooled.qual");
        assert!(merge_quality_tables(&[table], &pooled).is_err());
        Ok(())
    }
}
