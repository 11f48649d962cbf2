//! Core data types shared by the writer, reader, and schedulers.

use std::path::PathBuf;

/// A ready-to-write archive entry produced by [`crate::compress::pack`].
///
/// The buffer is owned by the entry and is consumed by
/// [`crate::writer::ArchiveWriter::add`] on commit.
pub struct ZipEntry {
    pub name: String,
    pub stored: bool,
    pub data: Vec<u8>,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub mtime: i64,
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
}

/// How an entry's payload is currently compressed, used to decide the
/// cheapest path through [`crate::compress::pack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackFormat {
    Uncompressed,
    Compressed,
}

/// Requested output compression for a [`FileJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Store,
    Deflate(flate2::Compression),
}

/// Where a job's bytes come from.
pub enum JobSource {
    /// A plain file on disk.
    Disk(PathBuf),
    /// An entry inside an already-open input archive, read from a byte offset.
    Archive { path: PathBuf, offset: u64 },
}

/// A single unit of packing work, immutable once enqueued.
pub struct FileJob {
    pub source: JobSource,
    pub archive_name: String,
    pub output_format: OutputFormat,
    /// Original compression state; `Compressed` only when re-packing from an archive.
    pub input_format: PackFormat,
    /// When re-packing, the original compressed/uncompressed sizes and CRC, if known.
    pub known_sizes: Option<(u64, u64, u32)>,
    /// When re-packing from an archive, the original entry's timestamp and
    /// mode/ownership, carried over since the source has no `stat` of its own.
    pub preserved: Option<PreservedMeta>,
}

/// Metadata copied from an existing archive entry when re-packing (`-Z`),
/// since a `JobSource::Archive` has no filesystem inode to `stat`.
#[derive(Debug, Clone, Copy)]
pub struct PreservedMeta {
    pub mtime: i64,
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
}
