//! The pack scheduler (C5): a fixed worker pool drains a shared FIFO of
//! jobs and commits results to the archive writer, either in finish order
//! or in strict input-enumeration order.

use crate::compress::{self, PackOptions};
use crate::format::LocalHeader;
use crate::model::{FileJob, JobSource, ZipEntry};
use crate::reporter::Reporter;
use crate::writer::ArchiveWriter;
use crate::{Error, Result};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

/// Tunables for a pack run.
#[derive(Clone, Copy)]
pub struct PackConfig {
    pub worker_count: usize,
    pub sequential_order: bool,
    pub sign: bool,
}

struct Shared {
    queue: Mutex<VecDeque<(usize, FileJob)>>,
    writer: Mutex<ArchiveWriter>,
    digest_buffer: Mutex<String>,
    commit_cv: Condvar,
    next_commit: Mutex<usize>,
    sequential_order: bool,
}

/// Run the pack scheduler to completion. `jobs` is consumed in order;
/// `opts` controls per-entry compression behavior. Returns the finalized
/// writer plus the accumulated per-entry SHA-1 digest listing (`Name:
/// ...\r\nSHA1-Digest: ...\r\n\r\n` sections), which is empty unless
/// `config.sign` was set — the caller (the signer) builds MANIFEST.MF
/// from it.
pub fn run(
    jobs: Vec<FileJob>,
    config: PackConfig,
    opts: PackOptions,
    writer: ArchiveWriter,
    reporter: Arc<dyn Reporter>,
) -> Result<(ArchiveWriter, String)> {
    let mut queue = VecDeque::with_capacity(jobs.len());
    for (i, job) in jobs.into_iter().enumerate() {
        queue.push_back((i, job));
    }

    let shared = Arc::new(Shared {
        queue: Mutex::new(queue),
        writer: Mutex::new(writer),
        digest_buffer: Mutex::new(String::new()),
        commit_cv: Condvar::new(),
        next_commit: Mutex::new(0),
        sequential_order: config.sequential_order,
    });

    let worker_count = config.worker_count.max(1);
    let mut handles = Vec::with_capacity(worker_count);

    for _ in 0..worker_count {
        let shared = Arc::clone(&shared);
        let reporter = Arc::clone(&reporter);
        let sign = config.sign;
        handles.push(thread::spawn(move || worker_loop(shared, opts, reporter, sign)));
    }

    for handle in handles {
        // A panicking worker indicates a bug, not a recoverable per-entry
        // error; propagate rather than silently losing entries.
        handle.join().expect("pack worker panicked");
    }

    let shared =
        Arc::try_unwrap(shared).unwrap_or_else(|_| panic!("all workers joined; no other owners"));
    let writer = shared.writer.into_inner().unwrap();
    let digests = shared.digest_buffer.into_inner().unwrap();
    Ok((writer, digests))
}

fn worker_loop(shared: Arc<Shared>, opts: PackOptions, reporter: Arc<dyn Reporter>, sign: bool) {
    loop {
        let (index, job) = {
            let mut queue = shared.queue.lock().unwrap();
            match queue.pop_front() {
                Some(item) => item,
                None => return,
            }
        };

        let archive_name = job.archive_name.clone();
        log::trace!("worker dequeued job {index} ({archive_name})");
        let outcome = process_job(&job, &opts, sign, &reporter);

        if shared.sequential_order {
            let mut next = shared.next_commit.lock().unwrap();
            while *next != index {
                next = shared.commit_cv.wait(next).unwrap();
            }
        }

        match outcome {
            Ok(Some((entry, digest_section))) => {
                if let Some(section) = digest_section {
                    shared.digest_buffer.lock().unwrap().push_str(&section);
                }
                log::debug!("committing entry {archive_name} ({} bytes)", entry.data.len());
                if let Err(e) = shared.writer.lock().unwrap().add(entry) {
                    reporter.error(&format!("failed to write entry {archive_name}: {e}"));
                }
            }
            Ok(None) => {}
            Err(e) => {
                reporter.warn(&format!("skipping {archive_name}: {e}"));
            }
        }

        if shared.sequential_order {
            let mut next = shared.next_commit.lock().unwrap();
            *next = index + 1;
            shared.commit_cv.notify_all();
        }
    }
}

type DigestSection = String;

/// Read, pack, and (if signing) digest a single job. Returns `Ok(None)`
/// for entries that should be skipped without comment (symlinks,
/// directories, `META-INF/*` collisions while signing).
fn process_job(
    job: &FileJob,
    opts: &PackOptions,
    sign: bool,
    reporter: &Arc<dyn Reporter>,
) -> Result<Option<(ZipEntry, Option<DigestSection>)>> {
    if sign && job.archive_name.starts_with("META-INF") {
        return Ok(None);
    }

    // Each job carries its own desired output format (e.g. `-X ext,...`
    // forcing STORE for certain extensions, or a repacked entry preserving
    // its source method); only `early_out`/`want_digest` come from the
    // scheduler-wide options.
    let job_opts = PackOptions {
        output_format: job.output_format,
        ..*opts
    };

    // `digest_input` holds the bytes to SHA-1 for the JAR manifest, paired
    // with whether they are already plain (uncompressed) or still need
    // inflating before hashing.
    let (mut entry, digest_input) = match &job.source {
        JobSource::Disk(path) => {
            let metadata = std::fs::symlink_metadata(path)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::FileTypeExt as _;
                if metadata.file_type().is_symlink() {
                    reporter.warn(&format!("skipping symlink {}", path.display()));
                    return Ok(None);
                }
            }
            if metadata.is_dir() {
                return Ok(None);
            }
            let mut file = File::open(path)?;
            let size = metadata.len();
            let entry =
                compress::pack(&job.archive_name, &mut file, size, job.input_format, &job_opts)?;
            let digest_input = if sign {
                file.seek(SeekFrom::Start(0))?;
                let mut buf = Vec::with_capacity(size as usize);
                file.read_to_end(&mut buf)?;
                Some((buf, true))
            } else {
                None
            };
            (entry, digest_input)
        }
        JobSource::Archive { path, offset } => {
            let mut file = File::open(path)?;
            file.seek(SeekFrom::Start(*offset))?;
            let size = job.known_sizes.map(|(c, _, _)| c).unwrap_or(0);
            seek_past_local_header(&mut file)?;
            let mut entry =
                compress::pack(&job.archive_name, &mut file, size, job.input_format, &job_opts)?;
            if let Some((compressed_size, uncompressed_size, crc32)) = job.known_sizes {
                entry.data.truncate(compressed_size as usize);
                entry.uncompressed_size = uncompressed_size;
                entry.crc32 = crc32;
            }
            if let Some(meta) = job.preserved {
                entry.mtime = meta.mtime;
                entry.mode = meta.mode;
                entry.uid = meta.uid;
                entry.gid = meta.gid;
            }
            // `entry.data` already holds the re-packed payload (verbatim
            // DEFLATE stream, or stored bytes); hash that, inflating first
            // if it is still compressed.
            let digest_input = if sign {
                Some((entry.data.clone(), entry.stored))
            } else {
                None
            };
            (entry, digest_input)
        }
    };

    apply_disk_metadata(&mut entry, &job.source);

    let digest_section = digest_input
        .map(|(bytes, stored)| compress::sha1_of_original(&bytes, stored))
        .transpose()?
        .map(|digest| {
            format!(
                "Name: {}\r\nSHA1-Digest: {}\r\n\r\n",
                job.archive_name,
                crate::sign::base64_encode(&digest)
            )
        });

    Ok(Some((entry, digest_section)))
}

/// Read the 30-byte local file header at the file's current position and
/// seek past it plus the name/extra fields, leaving the cursor at the
/// start of the payload. Mirrors `reader::ArchiveReader::read_raw` and
/// `unpack::extract_file`, which do the same before reading an entry's
/// compressed bytes.
fn seek_past_local_header(file: &mut File) -> Result<()> {
    let mut fixed = [0u8; 30];
    file.read_exact(&mut fixed)?;
    let header = LocalHeader::parse(&fixed)
        .ok_or_else(|| Error::InvalidFormat("bad local file header".into()))?;
    file.seek(SeekFrom::Current(
        header.name_len as i64 + header.extra_len as i64,
    ))?;
    Ok(())
}

fn apply_disk_metadata(entry: &mut ZipEntry, source: &JobSource) {
    let JobSource::Disk(path) = source else {
        return;
    };
    let Ok(metadata) = std::fs::metadata(path) else {
        return;
    };
    if let Ok(modified) = metadata.modified() {
        if let Ok(dur) = modified.duration_since(std::time::UNIX_EPOCH) {
            entry.mtime = dur.as_secs() as i64;
        }
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt as _;
        entry.mode = (metadata.mode() & 0xFFFF) as u16;
        entry.uid = metadata.uid();
        entry.gid = metadata.gid();
    }
}
