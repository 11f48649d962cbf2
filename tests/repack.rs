//! Re-packing from an existing archive (the `-Z` path): verbatim DEFLATE
//! streams and STORE entries must survive a pack→repack round trip with
//! their original CRC-32 and sizes intact, without being re-deflated.

use fastzip::compress::PackOptions;
use fastzip::model::{FileJob, JobSource, OutputFormat, PackFormat};
use fastzip::pack::{self, PackConfig};
use fastzip::reader::ArchiveReader;
use fastzip::reporter::StderrReporter;
use fastzip::writer::ArchiveWriter;
use flate2::Compression;
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

fn build_source_archive(dir: &std::path::Path) -> std::path::PathBuf {
    let src = tempdir().unwrap();
    let payload = "the quick brown fox ".repeat(500);
    fs::write(src.path().join("big.txt"), payload.as_bytes()).unwrap();
    fs::write(src.path().join("raw.bin"), [1u8, 2, 3, 4, 5]).unwrap();

    let jobs = vec![
        FileJob {
            source: JobSource::Disk(src.path().join("big.txt")),
            archive_name: "big.txt".to_string(),
            output_format: OutputFormat::Deflate(Compression::default()),
            input_format: PackFormat::Uncompressed,
            known_sizes: None,
            preserved: None,
        },
        FileJob {
            source: JobSource::Disk(src.path().join("raw.bin")),
            archive_name: "raw.bin".to_string(),
            output_format: OutputFormat::Store,
            input_format: PackFormat::Uncompressed,
            known_sizes: None,
            preserved: None,
        },
    ];

    let archive_path = dir.join("source.zip");
    let writer = ArchiveWriter::new(&archive_path, jobs.len()).unwrap();
    let config = PackConfig {
        worker_count: 2,
        sequential_order: false,
        sign: false,
    };
    let (writer, _) =
        pack::run(jobs, config, PackOptions::default(), writer, Arc::new(StderrReporter)).unwrap();
    writer.close().unwrap();
    archive_path
}

#[test]
fn repack_preserves_original_compressed_bytes() {
    let workdir = tempdir().unwrap();
    let source_path = build_source_archive(workdir.path());

    let source = ArchiveReader::open(&source_path).unwrap();
    let mut repack_jobs = Vec::new();
    for entry in &source.entries {
        repack_jobs.push(FileJob {
            source: JobSource::Archive {
                path: source_path.clone(),
                offset: entry.local_header_offset,
            },
            archive_name: entry.name.clone(),
            output_format: if entry.stored {
                OutputFormat::Store
            } else {
                OutputFormat::Deflate(Compression::default())
            },
            input_format: if entry.stored {
                PackFormat::Uncompressed
            } else {
                PackFormat::Compressed
            },
            known_sizes: Some((entry.compressed_size, entry.uncompressed_size, entry.crc32)),
            preserved: None,
        });
    }
    let original_entries: Vec<_> = source.entries.clone();
    drop(source);

    let repacked_path = workdir.path().join("repacked.zip");
    let writer = ArchiveWriter::new(&repacked_path, repack_jobs.len()).unwrap();
    let config = PackConfig {
        worker_count: 2,
        sequential_order: false,
        sign: false,
    };
    let (writer, _) = pack::run(
        repack_jobs,
        config,
        PackOptions::default(),
        writer,
        Arc::new(StderrReporter),
    )
    .unwrap();
    writer.close().unwrap();

    let mut source = ArchiveReader::open(&source_path).unwrap();
    let mut repacked = ArchiveReader::open(&repacked_path).unwrap();
    assert_eq!(repacked.entries.len(), original_entries.len());

    for original in &original_entries {
        let repacked_entry = repacked
            .entries
            .iter()
            .find(|e| e.name == original.name)
            .cloned()
            .unwrap_or_else(|| panic!("missing entry {}", original.name));
        assert_eq!(repacked_entry.crc32, original.crc32);
        assert_eq!(repacked_entry.uncompressed_size, original.uncompressed_size);
        assert_eq!(repacked_entry.stored, original.stored);

        let original_data = source.read_entry(original).unwrap();
        let repacked_data = repacked.read_entry(&repacked_entry).unwrap();
        assert_eq!(repacked_data, original_data, "payload mismatch for {}", original.name);
    }
}
