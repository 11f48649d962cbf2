//! The archive writer: appends entries sequentially, keeps the central
//! directory image in memory, and finalizes with EOCD/EOCD64.

use crate::dostime::unix_to_dos;
use crate::format::*;
use crate::model::ZipEntry;
use crate::Result;
use std::fs::File;
use std::io::{Seek, Write};
use std::path::Path;

struct CentralDirRecord {
    name: String,
    stored: bool,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    local_header_offset: u64,
    mod_dos_time: u32,
    external_attrs: u32,
}

/// Appends ZIP entries to an output file and finalizes the container.
///
/// One `File`, entries written sequentially, central directory built up in
/// memory and flushed at `close`. Uses the full local-header-plus-central-
/// directory contract rather than a data-descriptor streaming variant,
/// since entries here are already fully compressed in memory by the time
/// they reach the writer.
pub struct ArchiveWriter {
    output: File,
    records: Vec<CentralDirRecord>,
    align: bool,
    force_zip64: bool,
    comment: Vec<u8>,
}

impl ArchiveWriter {
    pub fn new<P: AsRef<Path>>(path: P, estimated_entries: usize) -> Result<Self> {
        Ok(Self {
            output: File::create(path)?,
            records: Vec::with_capacity(estimated_entries),
            align: false,
            force_zip64: false,
            comment: Vec::new(),
        })
    }

    pub fn set_align(&mut self, align: bool) {
        self.align = align;
    }

    pub fn set_force_zip64(&mut self, force: bool) {
        self.force_zip64 = force;
    }

    /// Set the archive-level comment written after the EOCD record, e.g.
    /// one carried over from an input archive being re-packed.
    pub fn set_comment(&mut self, comment: Vec<u8>) {
        self.comment = comment;
    }

    /// Append one compressed entry, writing its local header and payload.
    pub fn add(&mut self, entry: ZipEntry) -> Result<()> {
        self.add_raw(
            &entry.name,
            entry.stored,
            entry.data.len() as u64,
            entry.uncompressed_size,
            entry.mtime,
            entry.crc32,
            ((entry.mode as u32) << 16),
            &entry.data,
        )
    }

    /// Append a pre-formed entry (used by the signer for MANIFEST.MF /
    /// CERT.SF / CERT.RSA, which are always STORE).
    #[allow(clippy::too_many_arguments)]
    pub fn add_raw(
        &mut self,
        name: &str,
        stored: bool,
        compressed_size: u64,
        uncompressed_size: u64,
        mtime: i64,
        crc32: u32,
        external_attrs: u32,
        data: &[u8],
    ) -> Result<()> {
        let local_header_offset = self.output.stream_position()?;
        let name_len = name.len() as u16;
        let needs_zip64 = self.force_zip64
            || compressed_size > 0xFFFF_FFFE
            || uncompressed_size > 0xFFFF_FFFE
            || local_header_offset > 0xFFFF_FFFE;
        let dos_time = unix_to_dos(mtime);
        let method = if stored { METHOD_STORE } else { METHOD_DEFLATE };

        let mut extra = Vec::new();
        if needs_zip64 {
            extra.extend(
                Zip64Extra {
                    uncompressed_size,
                    compressed_size,
                    local_header_offset,
                }
                .encode(),
            );
        } else if stored && self.align {
            let pad = alignment_padding(local_header_offset, name_len as u64);
            extra.resize(pad as usize, 0);
        }

        let version_needed = if needs_zip64 {
            VERSION_NEEDED_ZIP64
        } else {
            VERSION_NEEDED_DEFAULT
        };

        self.output.write_all(&LOCAL_HEADER_SIG.to_le_bytes())?;
        self.output.write_all(&version_needed.to_le_bytes())?;
        self.output.write_all(&0u16.to_le_bytes())?; // flags
        self.output.write_all(&method.to_le_bytes())?;
        self.output.write_all(&(dos_time & 0xFFFF).to_le_bytes())?;
        self.output.write_all(&((dos_time >> 16) as u16).to_le_bytes())?;
        self.output.write_all(&crc32.to_le_bytes())?;
        self.output
            .write_all(&(if needs_zip64 { MASK_32 } else { compressed_size as u32 }).to_le_bytes())?;
        self.output
            .write_all(&(if needs_zip64 { MASK_32 } else { uncompressed_size as u32 }).to_le_bytes())?;
        self.output.write_all(&name_len.to_le_bytes())?;
        self.output.write_all(&(extra.len() as u16).to_le_bytes())?;
        self.output.write_all(name.as_bytes())?;
        self.output.write_all(&extra)?;
        self.output.write_all(data)?;

        self.records.push(CentralDirRecord {
            name: name.to_string(),
            stored,
            crc32,
            compressed_size,
            uncompressed_size,
            local_header_offset,
            mod_dos_time: dos_time,
            external_attrs,
        });
        Ok(())
    }

    /// Write the central directory and EOCD (and ZIP64 variants as needed),
    /// consuming the writer.
    pub fn close(mut self) -> Result<()> {
        log::debug!("finalizing archive: {} entries", self.records.len());
        let cd_start = self.output.stream_position()?;

        for rec in &self.records {
            let needs_zip64 = self.force_zip64
                || rec.compressed_size > 0xFFFF_FFFE
                || rec.uncompressed_size > 0xFFFF_FFFE
                || rec.local_header_offset > 0xFFFF_FFFE;
            let method = if rec.stored { METHOD_STORE } else { METHOD_DEFLATE };
            let version_needed = if needs_zip64 {
                VERSION_NEEDED_ZIP64
            } else {
                VERSION_NEEDED_DEFAULT
            };

            let mut extra = Vec::new();
            if needs_zip64 {
                extra.extend(
                    Zip64Extra {
                        uncompressed_size: rec.uncompressed_size,
                        compressed_size: rec.compressed_size,
                        local_header_offset: rec.local_header_offset,
                    }
                    .encode(),
                );
            }

            self.output.write_all(&CENTRAL_DIR_SIG.to_le_bytes())?;
            self.output.write_all(&version_needed.to_le_bytes())?; // version made by
            self.output.write_all(&version_needed.to_le_bytes())?; // version needed
            self.output.write_all(&0u16.to_le_bytes())?; // flags
            self.output.write_all(&method.to_le_bytes())?;
            self.output
                .write_all(&(rec.mod_dos_time & 0xFFFF).to_le_bytes())?;
            self.output
                .write_all(&((rec.mod_dos_time >> 16) as u16).to_le_bytes())?;
            self.output.write_all(&rec.crc32.to_le_bytes())?;
            self.output.write_all(
                &(if needs_zip64 {
                    MASK_32
                } else {
                    rec.compressed_size as u32
                })
                .to_le_bytes(),
            )?;
            self.output.write_all(
                &(if needs_zip64 {
                    MASK_32
                } else {
                    rec.uncompressed_size as u32
                })
                .to_le_bytes(),
            )?;
            self.output.write_all(&(rec.name.len() as u16).to_le_bytes())?;
            self.output.write_all(&(extra.len() as u16).to_le_bytes())?;
            self.output.write_all(&0u16.to_le_bytes())?; // comment len
            self.output.write_all(&0u16.to_le_bytes())?; // disk number start
            self.output.write_all(&0u16.to_le_bytes())?; // internal attrs
            self.output.write_all(&rec.external_attrs.to_le_bytes())?;
            self.output.write_all(
                &(if needs_zip64 {
                    MASK_32
                } else {
                    rec.local_header_offset as u32
                })
                .to_le_bytes(),
            )?;
            self.output.write_all(rec.name.as_bytes())?;
            self.output.write_all(&extra)?;
        }

        let cd_size = self.output.stream_position()? - cd_start;
        let entry_count = self.records.len();
        let need_eocd64 =
            self.force_zip64 || entry_count > 0xFFFE || cd_start > 0xFFFF_FFFE;

        if need_eocd64 {
            self.output.write_all(&EOCD64_SIG.to_le_bytes())?;
            self.output.write_all(&44u64.to_le_bytes())?; // record size, excluding sig+size
            self.output.write_all(&VERSION_NEEDED_ZIP64.to_le_bytes())?; // version made by
            self.output.write_all(&VERSION_NEEDED_ZIP64.to_le_bytes())?; // version needed
            self.output.write_all(&0u32.to_le_bytes())?; // disk number
            self.output.write_all(&0u32.to_le_bytes())?; // disk with CD
            self.output.write_all(&(entry_count as u64).to_le_bytes())?;
            self.output.write_all(&(entry_count as u64).to_le_bytes())?;
            self.output.write_all(&cd_size.to_le_bytes())?;
            self.output.write_all(&cd_start.to_le_bytes())?;

            self.output.write_all(&EOCD64_LOCATOR_SIG.to_le_bytes())?;
            self.output.write_all(&0u32.to_le_bytes())?; // disk with EOCD64
            self.output.write_all(&(cd_start + cd_size).to_le_bytes())?;
            self.output.write_all(&1u32.to_le_bytes())?; // total disks
        }

        self.output.write_all(&EOCD_SIG.to_le_bytes())?;
        self.output.write_all(&0u16.to_le_bytes())?; // disk number
        self.output.write_all(&0u16.to_le_bytes())?; // disk with CD
        self.output
            .write_all(&(if need_eocd64 { MASK_16 } else { entry_count as u16 }).to_le_bytes())?;
        self.output
            .write_all(&(if need_eocd64 { MASK_16 } else { entry_count as u16 }).to_le_bytes())?;
        self.output
            .write_all(&(if need_eocd64 { MASK_32 } else { cd_size as u32 }).to_le_bytes())?;
        self.output
            .write_all(&(if need_eocd64 { MASK_32 } else { cd_start as u32 }).to_le_bytes())?;
        self.output
            .write_all(&(self.comment.len() as u16).to_le_bytes())?;
        self.output.write_all(&self.comment)?;

        self.output.flush()?;
        Ok(())
    }
}

/// Padding bytes needed so the payload starts on a 4-byte boundary.
/// Zero when already aligned (a naive `4 - x%4` formula would pad a
/// spurious 4 bytes in that case).
fn alignment_padding(local_header_offset: u64, name_len: u64) -> u64 {
    let unaligned = local_header_offset + LOCAL_HEADER_SIZE + name_len;
    (4 - unaligned % 4) % 4
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn alignment_is_zero_when_already_aligned() {
        // offset 0 + 30 + 2-byte name = 32, already a multiple of 4
        assert_eq!(alignment_padding(0, 2), 0);
    }

    #[test]
    fn alignment_pads_to_next_multiple_of_four() {
        assert_eq!(alignment_padding(0, 3), 3);
        assert_eq!(alignment_padding(0, 1), 1);
    }

    #[test]
    fn empty_archive_has_valid_eocd() {
        let tmp = NamedTempFile::new().unwrap();
        let writer = ArchiveWriter::new(tmp.path(), 0).unwrap();
        writer.close().unwrap();
        let bytes = std::fs::read(tmp.path()).unwrap();
        assert_eq!(&bytes[bytes.len() - 22..bytes.len() - 18], &EOCD_SIG.to_le_bytes());
    }
}
