//! The unpack scheduler (C6): a fixed worker pool drains entries off an
//! atomic index counter; symlinks and directories are deferred to a
//! post-pass so their metadata is applied after file contents exist.

use crate::reader::{ArchiveReader, ZipEntry};
use crate::reporter::Reporter;
use crate::{Error, Result};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Clone, Copy)]
pub struct UnpackConfig {
    pub worker_count: usize,
}

/// Decide where to extract to when the caller did not specify a destination.
///
/// If the archive has fewer than 2 entries, no smart redirection happens
/// (extract into the given root as-is). Otherwise, if every entry shares a
/// common top-level path component, extraction stays in the given root
/// (the archive already carries its own prefix); if not, a subdirectory
/// named after the archive's basename is used.
pub fn smart_destination(archive_path: &Path, entries: &[ZipEntry]) -> PathBuf {
    if entries.len() < 2 {
        return PathBuf::new();
    }

    let mut common: Option<&str> = None;
    for entry in entries {
        let first = entry.name.split('/').next().unwrap_or("");
        match common {
            None => common = Some(first),
            Some(c) if c == first => {}
            Some(_) => return default_basename_dir(archive_path),
        }
    }
    PathBuf::new()
}

fn default_basename_dir(archive_path: &Path) -> PathBuf {
    let stem = archive_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "extracted".to_string());
    PathBuf::from(stem)
}

struct Shared {
    entries: Vec<ZipEntry>,
    cursor: AtomicUsize,
    archive_path: PathBuf,
    dest_root: PathBuf,
    deferred_links: Mutex<Vec<usize>>,
    deferred_dirs: Mutex<Vec<usize>>,
}

/// Extract every entry of `archive_path` under `dest_root`.
pub fn run(
    archive_path: &Path,
    dest_root: PathBuf,
    config: UnpackConfig,
    reporter: Arc<dyn Reporter>,
) -> Result<()> {
    let reader = ArchiveReader::open(archive_path)?;
    let entries = reader.entries.clone();
    drop(reader);

    fs::create_dir_all(&dest_root)?;

    let shared = Arc::new(Shared {
        entries,
        cursor: AtomicUsize::new(0),
        archive_path: archive_path.to_path_buf(),
        dest_root,
        deferred_links: Mutex::new(Vec::new()),
        deferred_dirs: Mutex::new(Vec::new()),
    });

    log::debug!(
        "unpacking {} entries into {} with {} workers",
        shared.entries.len(),
        shared.dest_root.display(),
        config.worker_count.max(1)
    );

    let worker_count = config.worker_count.max(1);
    let mut handles = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let shared = Arc::clone(&shared);
        let reporter = Arc::clone(&reporter);
        handles.push(thread::spawn(move || worker_loop(shared, reporter)));
    }
    for handle in handles {
        handle.join().expect("unpack worker panicked");
    }

    let shared = Arc::try_unwrap(shared).unwrap_or_else(|_| panic!("all workers joined"));
    post_pass(&shared)?;
    Ok(())
}

fn worker_loop(shared: Arc<Shared>, reporter: Arc<dyn Reporter>) {
    loop {
        let index = shared.cursor.fetch_add(1, Ordering::SeqCst);
        if index >= shared.entries.len() {
            return;
        }
        let entry = &shared.entries[index];

        if entry.is_symlink() {
            shared.deferred_links.lock().unwrap().push(index);
            continue;
        }
        if entry.is_dir() {
            let path = shared.dest_root.join(&entry.name);
            if let Err(e) = fs::create_dir_all(&path) {
                reporter.warn(&format!("could not create directory {}: {e}", entry.name));
            }
            shared.deferred_dirs.lock().unwrap().push(index);
            continue;
        }

        log::trace!("worker extracting entry {index} ({})", entry.name);
        if let Err(e) = extract_file(&shared, entry) {
            reporter.warn(&format!("could not extract {}: {e}", entry.name));
        }
    }
}

fn extract_file(shared: &Shared, entry: &ZipEntry) -> Result<()> {
    let out_path = shared.dest_root.join(&entry.name);
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut archive = File::open(&shared.archive_path)?;
    archive.seek(SeekFrom::Start(entry.local_header_offset))?;
    let mut fixed = [0u8; 30];
    archive.read_exact(&mut fixed)?;
    let header = crate::format::LocalHeader::parse(&fixed)
        .ok_or_else(|| Error::InvalidFormat("bad local file header".into()))?;
    archive.seek(SeekFrom::Current(
        header.name_len as i64 + header.extra_len as i64,
    ))?;

    let mut limited = (&mut archive).take(entry.compressed_size);
    let mut out = File::create(&out_path)?;
    if entry.stored {
        std::io::copy(&mut limited, &mut out)?;
    } else {
        let mut inflater = flate2::read::DeflateDecoder::new(limited);
        std::io::copy(&mut inflater, &mut out)?;
    }
    out.flush()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Some(mode) = entry.regular_file_mode() {
            let _ = fs::set_permissions(&out_path, fs::Permissions::from_mode(mode));
        }
    }
    set_mtime(&out_path, entry.mtime);
    Ok(())
}

fn post_pass(shared: &Shared) -> Result<()> {
    for &index in shared.deferred_links.lock().unwrap().iter() {
        let entry = &shared.entries[index];
        create_symlink(shared, entry)?;
    }
    for &index in shared.deferred_dirs.lock().unwrap().iter() {
        let entry = &shared.entries[index];
        let path = shared.dest_root.join(&entry.name);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                let _ = fs::set_permissions(&path, fs::Permissions::from_mode(mode));
            }
        }
        set_mtime(&path, entry.mtime);
    }
    Ok(())
}

fn create_symlink(shared: &Shared, entry: &ZipEntry) -> Result<()> {
    let target = read_link_target(&shared.archive_path, entry)?;
    let link_path = shared.dest_root.join(&entry.name);
    if let Some(parent) = link_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let _ = fs::remove_file(&link_path);
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(&target, &link_path)?;
    }
    #[cfg(not(unix))]
    {
        fs::write(&link_path, target.as_bytes())?;
    }
    Ok(())
}

fn read_link_target(archive_path: &Path, entry: &ZipEntry) -> Result<String> {
    let mut file = File::open(archive_path)?;
    file.seek(SeekFrom::Start(entry.local_header_offset))?;
    let mut fixed = [0u8; 30];
    file.read_exact(&mut fixed)?;
    let header = crate::format::LocalHeader::parse(&fixed)
        .ok_or_else(|| Error::InvalidFormat("bad local file header".into()))?;
    file.seek(SeekFrom::Current(
        header.name_len as i64 + header.extra_len as i64,
    ))?;
    let mut raw = vec![0u8; entry.compressed_size as usize];
    file.read_exact(&mut raw)?;
    let target = if entry.stored {
        raw
    } else {
        let mut inflater = flate2::read::DeflateDecoder::new(&raw[..]);
        let mut out = Vec::new();
        inflater.read_to_end(&mut out)?;
        out
    };
    Ok(String::from_utf8_lossy(&target).into_owned())
}

fn set_mtime(path: &Path, unix_time: i64) {
    let mtime = filetime::FileTime::from_unix_time(unix_time, 0);
    // Best-effort: some filesystems/platforms reject utimes on certain
    // entries (e.g. broken symlinks already replaced); not fatal.
    let _ = filetime::set_file_mtime(path, mtime);
}
