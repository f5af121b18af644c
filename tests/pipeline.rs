// End-to-end checks of the pieces that do not need the external tools:
// pair discovery and activation, fan-out fidelity, quality-table pooling,
// and the fabricated-FASTQ helpers used to build inputs.

use std::path::Path;

use anyhow::Result;
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::sync::mpsc;

use amplicon_pipelines::cli::Arguments;
use amplicon_pipelines::config::defs::{RunConfig, EMPTY_GZIP_BYTES};
use amplicon_pipelines::pipelines::amplicon::{activate, discover_pairs, Activation, SamplePair};
use amplicon_pipelines::pipelines::pool::pool_quality_tables;
use amplicon_pipelines::utils::fastx::{read_records, record_counter, write_fastq_record};
use amplicon_pipelines::utils::file::ArtifactSet;
use amplicon_pipelines::utils::pattern::{classify, Classification};
use amplicon_pipelines::utils::sequence::{normal_phred_qual_string, DNA};
use amplicon_pipelines::utils::streams::{t_junction, ParseOutput};

fn write_gzipped_fastq(path: &Path, reads: usize, read_len: usize) {
    let file = std::fs::File::create(path).unwrap();
    let mut enc = GzEncoder::new(file, Compression::default());
    for i in 0..reads {
        let seq = DNA::random_sequence(read_len);
        let qual = normal_phred_qual_string(read_len, 35.0, 3.0);
        write_fastq_record(
            &mut enc,
            &format!("read{}", i),
            None,
            seq.as_bytes(),
            qual.as_bytes(),
        )
        .unwrap();
    }
    enc.finish().unwrap();
}

fn test_config(out_dir: &Path) -> RunConfig {
    RunConfig {
        cwd: out_dir.to_path_buf(),
        out_dir: out_dir.to_path_buf(),
        args: Arguments {
            pooled_name: "pooled".to_string(),
            ..Default::default()
        },
        channel_capacity: 16,
    }
}

#[test]
fn classified_forward_name_maps_to_one_artifact_set() {
    let (reverse, sample_id) = match classify("sampleA_L001_R1_001.fastq.gz") {
        Classification::Paired { reverse, sample_id } => (reverse, sample_id),
        Classification::Unknown => panic!("Illumina lane naming must classify"),
    };
    assert_eq!(reverse, "sampleA_L001_R2_001.fastq.gz");
    assert_eq!(sample_id, "sampleA");

    let set = ArtifactSet::for_sample(Path::new("/out"), &sample_id);
    assert_eq!(
        set.file_names(),
        vec!["sampleA.fas", "sampleA.qual", "sampleA.log", "sampleA.stats"]
    );
}

#[test]
fn effectively_empty_mate_is_skipped_without_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    write_gzipped_fastq(&dir.path().join("A_R1.fastq.gz"), 10, 80);
    // An empty gzip container for the reverse mate.
    let empty = GzEncoder::new(
        std::fs::File::create(dir.path().join("A_R2.fastq.gz")).unwrap(),
        Compression::default(),
    );
    empty.finish().unwrap();

    let pairs = discover_pairs(dir.path()).unwrap();
    assert_eq!(pairs.len(), 1);
    match activate(&pairs[0], EMPTY_GZIP_BYTES) {
        Activation::Skip(reason) => assert!(reason.contains("no reads")),
        Activation::Eligible => panic!("empty mate must be skipped"),
    }
    // The gate runs before any stage exists, so nothing was written.
    assert!(!ArtifactSet::for_sample(dir.path(), "A").all_present());
}

#[test]
fn populated_pair_is_eligible() {
    let dir = tempfile::tempdir().unwrap();
    write_gzipped_fastq(&dir.path().join("B_R1.fq.gz"), 25, 120);
    write_gzipped_fastq(&dir.path().join("B_R2.fq.gz"), 25, 120);
    let pairs = discover_pairs(dir.path()).unwrap();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].sample_id, "B");
    assert_eq!(activate(&pairs[0], EMPTY_GZIP_BYTES), Activation::Eligible);
}

#[test]
fn fabricated_fastq_round_trips_through_the_reader() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reads.fastq.gz");
    write_gzipped_fastq(&path, 12, 90);

    assert_eq!(record_counter(&path).unwrap(), 12);
    let records = read_records(&path).unwrap();
    assert_eq!(records.len(), 12);
    assert_eq!(records[0].id(), "read0");
    assert!(records.iter().all(|r| r.seq().len() == 90));
}

#[tokio::test]
async fn fan_out_delivers_identical_copies() {
    let (tx, rx) = mpsc::channel(4);
    let (mut outputs, done) = t_junction(rx, 3, 4, "test-fanout".to_string()).await;

    let chunks: Vec<&[u8]> = vec![b">a;ee=0.1\n", b"ACGT", b"ACGT\n"];
    for chunk in &chunks {
        tx.send(ParseOutput::Bytes(chunk.to_vec())).await.unwrap();
    }
    drop(tx);

    let expected: Vec<u8> = chunks.concat();
    for rx in outputs.iter_mut() {
        let mut collected = Vec::new();
        while let Some(ParseOutput::Bytes(chunk)) = rx.recv().await {
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, expected);
    }
    done.await.unwrap().unwrap();
}

#[test]
fn pooling_publishes_atomically() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = test_config(dir.path());

    let table_a = dir.path().join("a.qual");
    let table_b = dir.path().join("b.qual");
    std::fs::write(&table_a, "k1\t0.9\t50\nk2\t0.3\t60\n")?;
    std::fs::write(&table_b, "k1\t0.2\t50\n")?;

    let counts = pool_quality_tables(&config, &[table_a, table_b])?;
    assert_eq!(counts.kept, 2);
    assert_eq!(counts.discarded, 1);

    let pooled = dir.path().join("pooled.qual");
    assert_eq!(std::fs::read_to_string(&pooled)?, "k1\t0.2\t50\nk2\t0.3\t60\n");
    assert!(!dir.path().join(".pooled.qual.partial").exists());
    Ok(())
}

#[test]
fn failed_pooling_leaves_no_output() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = test_config(dir.path());

    let bad = dir.path().join("bad.qual");
    std::fs::write(&bad, "not a quality table\n")?;

    assert!(pool_quality_tables(&config, &[bad]).is_err());
    assert!(!dir.path().join("pooled.qual").exists());
    assert!(!dir.path().join(".pooled.qual.partial").exists());
    Ok(())
}

#[test]
fn rerun_of_a_sample_replaces_stale_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let pair = SamplePair {
        sample_id: "C".to_string(),
        forward: dir.path().join("C_R1.fastq"),
        reverse: dir.path().join("C_R2.fastq"),
    };
    let artifacts = ArtifactSet::for_sample(dir.path(), &pair.sample_id);
    std::fs::write(&artifacts.fasta, ">old\nACGT\n").unwrap();
    std::fs::write(&artifacts.quality, "old\t0.1\t4\n").unwrap();

    artifacts.remove_stale().unwrap();
    assert!(!artifacts.fasta.exists());
    assert!(!artifacts.quality.exists());
}
