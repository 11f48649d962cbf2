//! The archive reader: locates and parses the central directory (including
//! the ZIP64 variant) and exposes an indexable entry list.

use crate::dostime::dos_to_unix;
use crate::format::*;
use crate::{Error, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// One parsed central directory entry.
#[derive(Debug, Clone)]
pub struct ZipEntry {
    pub name: String,
    pub stored: bool,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub local_header_offset: u64,
    pub mtime: i64,
    pub external_attrs: u32,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl ZipEntry {
    /// Unix mode bits packed into the high 16 bits of `external_attrs`, if
    /// the archive was written with Unix external attributes.
    pub fn unix_mode(&self) -> Option<u32> {
        if self.external_attrs >> 16 != 0 {
            Some(self.external_attrs >> 16)
        } else {
            None
        }
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self.unix_mode(), Some(m) if m & 0o170000 == 0o120000)
    }

    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/') || matches!(self.unix_mode(), Some(m) if m & 0o170000 == 0o040000)
    }

    /// Permission bits to restore on an extracted regular file, or `None`
    /// to leave the platform default. A broken archive whose external
    /// attributes don't set the regular-file bit is treated as carrying
    /// no permission information at all, rather than applying garbage bits.
    pub fn regular_file_mode(&self) -> Option<u32> {
        match self.unix_mode() {
            Some(m) if m & 0o170000 == 0o100000 => Some(m & 0o7777),
            _ => None,
        }
    }
}

/// The parsed central directory of an archive: an ordered entry list plus
/// the file handle positioned for random-access reads of local headers.
pub struct ArchiveReader {
    file: File,
    pub entries: Vec<ZipEntry>,
    /// The archive-level comment trailing the EOCD record, if any.
    pub comment: Vec<u8>,
}

impl ArchiveReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)?;
        let (cd_offset, cd_count, comment) = find_central_directory(&mut file)?;
        let entries = read_central_directory(&mut file, cd_offset, cd_count)?;
        Ok(Self { file, entries, comment })
    }

    /// Read the raw (still compressed, if DEFLATE) payload bytes of an entry.
    pub fn read_raw(&mut self, entry: &ZipEntry) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(entry.local_header_offset))?;
        let mut fixed = [0u8; 30];
        self.file.read_exact(&mut fixed)?;
        let header = LocalHeader::parse(&fixed)
            .ok_or_else(|| Error::InvalidFormat("bad local file header".into()))?;
        self.file
            .seek(SeekFrom::Current((header.name_len as i64) + header.extra_len as i64))?;
        let mut data = vec![0u8; entry.compressed_size as usize];
        self.file.read_exact(&mut data)?;
        Ok(data)
    }

    /// Read and inflate (or just return, for STORE) an entry's uncompressed bytes.
    pub fn read_entry(&mut self, entry: &ZipEntry) -> Result<Vec<u8>> {
        let raw = self.read_raw(entry)?;
        if entry.stored {
            Ok(raw)
        } else {
            let mut inflater = flate2::read::DeflateDecoder::new(&raw[..]);
            let mut out = Vec::with_capacity(entry.uncompressed_size as usize);
            inflater.read_to_end(&mut out)?;
            Ok(out)
        }
    }

    /// Look up an entry by its archive path, e.g. to pull a single member
    /// out of a large archive without extracting everything.
    pub fn find(&self, name: &str) -> Result<&ZipEntry> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| Error::EntryNotFound(name.to_string()))
    }
}

/// Scan backward from the end of the file for the EOCD signature, then
/// follow the ZIP64 locator chain if the classic record is maxed out.
/// Returns `(cd_offset, cd_count, archive_comment)`.
fn find_central_directory(file: &mut File) -> Result<(u64, u64, Vec<u8>)> {
    let file_len = file.seek(SeekFrom::End(0))?;
    let scan_len = (file_len).min(65_557);
    let start = file_len - scan_len;
    file.seek(SeekFrom::Start(start))?;
    let mut buf = vec![0u8; scan_len as usize];
    file.read_exact(&mut buf)?;

    let sig = EOCD_SIG.to_le_bytes();
    let eocd_pos = buf
        .windows(4)
        .rposition(|w| w == sig)
        .ok_or_else(|| Error::InvalidFormat("end of central directory not found".into()))?;

    let eocd = &buf[eocd_pos..];
    if eocd.len() < 22 {
        return Err(Error::InvalidFormat("truncated EOCD record".into()));
    }
    let mut entry_count = read_u16(eocd, 10) as u64;
    let mut cd_offset = read_u32(eocd, 16) as u64;

    let comment_len = read_u16(eocd, 20) as usize;
    let comment = eocd.get(22..22 + comment_len).unwrap_or(&[]).to_vec();

    if entry_count == MASK_16 as u64 || cd_offset == MASK_32 as u64 {
        // ZIP64: locator sits 20 bytes before EOCD.
        if eocd_pos < 20 {
            return Err(Error::InvalidFormat("missing ZIP64 locator".into()));
        }
        let locator = &buf[eocd_pos - 20..eocd_pos];
        if read_u32(locator, 0) != EOCD64_LOCATOR_SIG {
            return Err(Error::InvalidFormat("missing ZIP64 locator signature".into()));
        }
        let eocd64_offset = read_u64(locator, 8);
        file.seek(SeekFrom::Start(eocd64_offset))?;
        let mut rec = [0u8; 56];
        file.read_exact(&mut rec)?;
        if read_u32(&rec, 0) != EOCD64_SIG {
            return Err(Error::InvalidFormat("missing ZIP64 EOCD signature".into()));
        }
        entry_count = read_u64(&rec, 32);
        cd_offset = read_u64(&rec, 48);
    }

    Ok((cd_offset, entry_count, comment))
}

fn read_central_directory(file: &mut File, cd_offset: u64, cd_count: u64) -> Result<Vec<ZipEntry>> {
    file.seek(SeekFrom::Start(cd_offset))?;
    let mut entries = Vec::with_capacity(cd_count as usize);

    for _ in 0..cd_count {
        let mut fixed = [0u8; 46];
        file.read_exact(&mut fixed)?;
        let rec = CentralDirEntry::parse(&fixed)
            .ok_or_else(|| Error::InvalidFormat("bad central directory entry".into()))?;
        if rec.method != METHOD_STORE && rec.method != METHOD_DEFLATE {
            return Err(Error::UnsupportedCompression(rec.method));
        }

        let mut name = vec![0u8; rec.name_len as usize];
        file.read_exact(&mut name)?;
        let name = String::from_utf8_lossy(&name).into_owned();

        let mut extra = vec![0u8; rec.extra_len as usize];
        file.read_exact(&mut extra)?;

        let mut comment = vec![0u8; rec.comment_len as usize];
        file.read_exact(&mut comment)?;
        let _ = comment;

        let mut compressed_size = rec.compressed_size as u64;
        let mut uncompressed_size = rec.uncompressed_size as u64;
        let mut local_header_offset = rec.local_header_offset as u64;
        let mut uid = None;
        let mut gid = None;

        let mut p = 0usize;
        while p + 4 <= extra.len() {
            let id = read_u16(&extra, p);
            let len = read_u16(&extra, p + 2) as usize;
            let body_start = p + 4;
            if body_start + len > extra.len() {
                break;
            }
            let body = &extra[body_start..body_start + len];
            match id {
                ZIP64_EXTRA_HEADER_ID => {
                    let mut q = 0;
                    if uncompressed_size == MASK_32 as u64 && q + 8 <= body.len() {
                        uncompressed_size = read_u64(body, q);
                        q += 8;
                    }
                    if compressed_size == MASK_32 as u64 && q + 8 <= body.len() {
                        compressed_size = read_u64(body, q);
                        q += 8;
                    }
                    if local_header_offset == MASK_32 as u64 && q + 8 <= body.len() {
                        local_header_offset = read_u64(body, q);
                    }
                }
                UNIX_EXTRA_HEADER_ID => {
                    if body.len() >= 2 {
                        let ulen = body[1] as usize;
                        if 2 + ulen <= body.len() {
                            let uid_bytes = &body[2..2 + ulen];
                            uid = Some(le_bytes_to_u32(uid_bytes));
                            let glen_off = 2 + ulen;
                            if glen_off < body.len() {
                                let glen = body[glen_off] as usize;
                                let gid_start = glen_off + 1;
                                if gid_start + glen <= body.len() {
                                    gid = Some(le_bytes_to_u32(&body[gid_start..gid_start + glen]));
                                }
                            }
                        }
                    }
                }
                EXTENDED_TIMESTAMP_EXTRA_HEADER_ID => {
                    // Recorded but currently unused; mtime comes from the DOS field.
                }
                _ => {}
            }
            p = body_start + len;
        }

        entries.push(ZipEntry {
            name,
            stored: rec.method == METHOD_STORE,
            compressed_size,
            uncompressed_size,
            crc32: rec.crc32,
            local_header_offset,
            mtime: dos_to_unix(((rec.mod_date as u32) << 16) | rec.mod_time as u32),
            external_attrs: rec.external_attrs,
            uid,
            gid,
        });
    }

    Ok(entries)
}

fn le_bytes_to_u32(b: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    let n = b.len().min(4);
    buf[..n].copy_from_slice(&b[..n]);
    u32::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ZipEntry as WriteEntry;
    use crate::writer::ArchiveWriter;
    use tempfile::NamedTempFile;

    #[test]
    fn round_trip_single_stored_entry() {
        let tmp = NamedTempFile::new().unwrap();
        let mut writer = ArchiveWriter::new(tmp.path(), 1).unwrap();
        writer
            .add(WriteEntry {
                name: "hello.txt".into(),
                stored: true,
                data: b"hello world".to_vec(),
                uncompressed_size: 11,
                crc32: crc32fast::hash(b"hello world"),
                mtime: 1_700_000_000,
                mode: 0o644,
                uid: 0,
                gid: 0,
            })
            .unwrap();
        writer.close().unwrap();

        let mut reader = ArchiveReader::open(tmp.path()).unwrap();
        assert_eq!(reader.entries.len(), 1);
        let entry = reader.entries[0].clone();
        assert_eq!(entry.name, "hello.txt");
        assert!(entry.stored);
        let data = reader.read_entry(&entry).unwrap();
        assert_eq!(data, b"hello world");
    }
}
