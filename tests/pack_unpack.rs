//! Round-trip coverage for the pack/unpack schedulers: what goes in on
//! disk comes back out byte-identical, at every supported compression
//! level, with the central directory entry count matching what was packed.

use fastzip::compress::PackOptions;
use fastzip::model::{FileJob, JobSource, OutputFormat, PackFormat};
use fastzip::pack::{self, PackConfig};
use fastzip::reader::ArchiveReader;
use fastzip::reporter::StderrReporter;
use fastzip::unpack::{self, UnpackConfig};
use fastzip::writer::ArchiveWriter;
use flate2::Compression;
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

fn jobs_for(files: &[(&str, &[u8])], src_dir: &std::path::Path, format: OutputFormat) -> Vec<FileJob> {
    files
        .iter()
        .map(|(name, data)| {
            let path = src_dir.join(name);
            fs::write(&path, data).unwrap();
            FileJob {
                source: JobSource::Disk(path),
                archive_name: name.to_string(),
                output_format: format,
                input_format: PackFormat::Uncompressed,
                known_sizes: None,
                preserved: None,
            }
        })
        .collect()
}

fn pack_and_unpack(files: &[(&str, &[u8])], format: OutputFormat) -> std::path::PathBuf {
    let src = tempdir().unwrap();
    let jobs = jobs_for(files, src.path(), format);

    let archive_dir = tempdir().unwrap();
    let archive_path = archive_dir.path().join("out.zip");
    let writer = ArchiveWriter::new(&archive_path, jobs.len()).unwrap();
    let config = PackConfig {
        worker_count: 4,
        sequential_order: false,
        sign: false,
    };
    let (writer, digests) =
        pack::run(jobs, config, PackOptions::default(), writer, Arc::new(StderrReporter)).unwrap();
    assert!(digests.is_empty());
    writer.close().unwrap();

    let reader = ArchiveReader::open(&archive_path).unwrap();
    assert_eq!(reader.entries.len(), files.len());
    drop(reader);

    let dest = tempdir().unwrap().into_path();
    unpack::run(
        &archive_path,
        dest.clone(),
        UnpackConfig { worker_count: 4 },
        Arc::new(StderrReporter),
    )
    .unwrap();
    dest
}

const SAMPLE_FILES: &[(&str, &[u8])] = &[
    ("a.txt", b"hello world, hello world, hello world" as &[u8]),
    ("dir/b.bin", &[0xDEu8, 0xAD, 0xBE, 0xEF, 0x00, 0x01, 0x02, 0x03]),
    ("empty.txt", b""),
];

#[test]
fn round_trip_store() {
    let dest = pack_and_unpack(SAMPLE_FILES, OutputFormat::Store);
    for (name, data) in SAMPLE_FILES {
        let got = fs::read(dest.join(name)).unwrap();
        assert_eq!(&got, data, "mismatch for {name}");
    }
}

#[test]
fn round_trip_deflate_level_1() {
    let dest = pack_and_unpack(SAMPLE_FILES, OutputFormat::Deflate(Compression::new(1)));
    for (name, data) in SAMPLE_FILES {
        let got = fs::read(dest.join(name)).unwrap();
        assert_eq!(&got, data, "mismatch for {name}");
    }
}

#[test]
fn round_trip_deflate_level_9() {
    let dest = pack_and_unpack(SAMPLE_FILES, OutputFormat::Deflate(Compression::new(9)));
    for (name, data) in SAMPLE_FILES {
        let got = fs::read(dest.join(name)).unwrap();
        assert_eq!(&got, data, "mismatch for {name}");
    }
}

#[cfg(unix)]
#[test]
fn round_trip_preserves_unix_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let src = tempdir().unwrap();
    let path = src.path().join("script.sh");
    fs::write(&path, b"#!/bin/sh\necho hi\n").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

    let jobs = vec![FileJob {
        source: JobSource::Disk(path),
        archive_name: "script.sh".to_string(),
        output_format: OutputFormat::Deflate(Compression::default()),
        input_format: PackFormat::Uncompressed,
        known_sizes: None,
        preserved: None,
    }];

    let archive_dir = tempdir().unwrap();
    let archive_path = archive_dir.path().join("out.zip");
    let writer = ArchiveWriter::new(&archive_path, 1).unwrap();
    let config = PackConfig {
        worker_count: 1,
        sequential_order: false,
        sign: false,
    };
    let (writer, _) =
        pack::run(jobs, config, PackOptions::default(), writer, Arc::new(StderrReporter)).unwrap();
    writer.close().unwrap();

    let dest = tempdir().unwrap().into_path();
    unpack::run(
        &archive_path,
        dest.clone(),
        UnpackConfig { worker_count: 1 },
        Arc::new(StderrReporter),
    )
    .unwrap();

    let mode = fs::metadata(dest.join("script.sh")).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
}

#[test]
fn central_directory_entry_count_matches_local_headers() {
    let src = tempdir().unwrap();
    let jobs = jobs_for(
        &[
            ("one.txt", b"one" as &[u8]),
            ("two.txt", b"two"),
            ("three.txt", b"three"),
        ],
        src.path(),
        OutputFormat::Deflate(Compression::default()),
    );
    let archive_dir = tempdir().unwrap();
    let archive_path = archive_dir.path().join("out.zip");
    let writer = ArchiveWriter::new(&archive_path, jobs.len()).unwrap();
    let config = PackConfig {
        worker_count: 4,
        sequential_order: false,
        sign: false,
    };
    let (writer, _) =
        pack::run(jobs, config, PackOptions::default(), writer, Arc::new(StderrReporter)).unwrap();
    writer.close().unwrap();

    let reader = ArchiveReader::open(&archive_path).unwrap();
    assert_eq!(reader.entries.len(), 3);
    let mut names: Vec<_> = reader.entries.iter().map(|e| e.name.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["one.txt", "three.txt", "two.txt"]);
}

#[test]
fn sequential_order_commits_in_input_order() {
    let src = tempdir().unwrap();
    let jobs = jobs_for(
        &[
            ("z_first.txt", b"z" as &[u8]),
            ("a_second.txt", b"a"),
            ("m_third.txt", b"m"),
        ],
        src.path(),
        OutputFormat::Store,
    );
    let archive_dir = tempdir().unwrap();
    let archive_path = archive_dir.path().join("out.zip");
    let writer = ArchiveWriter::new(&archive_path, jobs.len()).unwrap();
    let config = PackConfig {
        worker_count: 4,
        sequential_order: true,
        sign: false,
    };
    let (writer, _) =
        pack::run(jobs, config, PackOptions::default(), writer, Arc::new(StderrReporter)).unwrap();
    writer.close().unwrap();

    let reader = ArchiveReader::open(&archive_path).unwrap();
    let names: Vec<_> = reader.entries.iter().map(|e| e.name.clone()).collect();
    assert_eq!(names, vec!["z_first.txt", "a_second.txt", "m_third.txt"]);
}

#[test]
fn forced_zip64_round_trips_small_entries() {
    let src = tempdir().unwrap();
    let jobs = jobs_for(
        &[("small.txt", b"not actually huge" as &[u8])],
        src.path(),
        OutputFormat::Store,
    );
    let archive_dir = tempdir().unwrap();
    let archive_path = archive_dir.path().join("out.zip");
    let mut writer = ArchiveWriter::new(&archive_path, jobs.len()).unwrap();
    writer.set_force_zip64(true);
    let config = PackConfig {
        worker_count: 1,
        sequential_order: false,
        sign: false,
    };
    let (writer, _) =
        pack::run(jobs, config, PackOptions::default(), writer, Arc::new(StderrReporter)).unwrap();
    writer.close().unwrap();

    let bytes = fs::read(&archive_path).unwrap();
    let eocd64_sig = fastzip::format::EOCD64_SIG.to_le_bytes();
    assert!(
        bytes.windows(4).any(|w| w == eocd64_sig),
        "expected a ZIP64 EOCD record when force_zip64 is set"
    );

    let reader = ArchiveReader::open(&archive_path).unwrap();
    assert_eq!(reader.entries.len(), 1);
    assert_eq!(reader.entries[0].uncompressed_size, 17);
}
