//! The compression worker (see the `pack` entry point): turns one input's
//! raw bytes into a ready-to-write [`ZipEntry`], choosing STORE or DEFLATE
//! and applying the early-out heuristic.

use crate::error::{Error, Result};
use crate::model::{OutputFormat, PackFormat, ZipEntry};
use flate2::{Compress, Compression, FlushCompress, Status};
use std::io::Read;

/// Safety margin kept between the compressor's write cursor and the
/// original bytes' read cursor during the in-place attempt.
const SAFETY_MARGIN: usize = 32 * 1024;

/// Options controlling how aggressively `pack` gives up on compression.
#[derive(Debug, Clone, Copy)]
pub struct PackOptions {
    pub output_format: OutputFormat,
    /// Percent (0-100): abandon compression once `produced*100/consumed`
    /// reaches this ratio and the write cursor is near the read cursor.
    pub early_out: u8,
    pub want_digest: bool,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            output_format: OutputFormat::Deflate(Compression::default()),
            early_out: 98,
            want_digest: true,
        }
    }
}

/// Compress (or store) the bytes read from `source` into a [`ZipEntry`].
///
/// `source` must be positioned at the start of the payload and yield
/// exactly `size` bytes. `input_format` tells us whether those bytes are
/// already raw DEFLATE output (re-packing path) or plain uncompressed data.
pub fn pack<R: Read>(
    name: &str,
    mut source: R,
    size: u64,
    input_format: PackFormat,
    opts: &PackOptions,
) -> Result<ZipEntry> {
    if size == 0 {
        return Ok(ZipEntry {
            name: name.to_string(),
            stored: true,
            data: Vec::new(),
            uncompressed_size: 0,
            crc32: 0,
            mtime: 0,
            mode: 0,
            uid: 0,
            gid: 0,
        });
    }

    match (input_format, opts.output_format) {
        (PackFormat::Compressed, OutputFormat::Deflate(_)) => {
            // Re-packing: keep the existing DEFLATE stream verbatim.
            repack_verbatim(name, source, size, opts.want_digest)
        }
        (PackFormat::Compressed, OutputFormat::Store) => {
            // Would require re-inflating and storing; not supported, store as-is instead.
            repack_verbatim(name, source, size, opts.want_digest)
        }
        (PackFormat::Uncompressed, OutputFormat::Store) => store(name, &mut source, size),
        (PackFormat::Uncompressed, OutputFormat::Deflate(level)) => {
            deflate_with_fallback(name, &mut source, size, level, opts.early_out)
        }
    }
}

fn read_all<R: Read>(source: &mut R, size: u64) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; size as usize];
    source.read_exact(&mut buf)?;
    Ok(buf)
}

fn store<R: Read>(name: &str, source: &mut R, size: u64) -> Result<ZipEntry> {
    let data = read_all(source, size)?;
    let crc32 = crc32fast::hash(&data);
    Ok(ZipEntry {
        name: name.to_string(),
        stored: true,
        data,
        uncompressed_size: size,
        crc32,
        mtime: 0,
        mode: 0,
        uid: 0,
        gid: 0,
    })
}

/// Deflate the input, bailing out to STORE if the early-out ratio is hit
/// or if compression turns out to expand the data.
fn deflate_with_fallback<R: Read>(
    name: &str,
    source: &mut R,
    size: u64,
    level: Compression,
    early_out: u8,
) -> Result<ZipEntry> {
    let original = read_all(source, size)?;
    let crc32 = crc32fast::hash(&original);

    let max_output = original.len() + (original.len() / 16383 + 1) * 5 + 64 * 1024;
    let mut output = vec![0u8; max_output];
    let mut compressor = Compress::new(level, false);

    let mut consumed_total = 0usize;
    let chunk = 64 * 1024;
    let mut aborted = false;

    loop {
        let in_start = consumed_total;
        let in_end = (consumed_total + chunk).min(original.len());
        let is_last = in_end == original.len();
        let before_in = compressor.total_in() as usize;
        let before_out = compressor.total_out() as usize;

        let status = compressor
            .compress(
                &original[in_start..in_end],
                &mut output[before_out..],
                if is_last {
                    FlushCompress::Finish
                } else {
                    FlushCompress::None
                },
            )
            .map_err(|e| Error::CompressionFailed(format!("{name}: {e}")))?;

        consumed_total = compressor.total_in() as usize;
        let produced_total = compressor.total_out() as usize;
        let _ = before_in;

        // Once a full chunk has gone in, judge the running produced/consumed
        // ratio on its own terms rather than waiting until we're near EOF —
        // a large input that is compressing poorly should bail well before
        // its last 32 KiB.
        if consumed_total >= chunk && !is_last {
            let ratio = (produced_total as u64) * 100 / (consumed_total as u64);
            if ratio as u8 >= early_out {
                aborted = true;
                break;
            }
        }

        if status == Status::StreamEnd || is_last {
            break;
        }
        if produced_total >= output.len() - SAFETY_MARGIN {
            // Ran out of comfortable margin; bail to STORE.
            aborted = true;
            break;
        }
    }

    if aborted || compressor.total_out() as usize >= original.len() {
        return Ok(ZipEntry {
            name: name.to_string(),
            stored: true,
            data: original,
            uncompressed_size: size,
            crc32,
            mtime: 0,
            mode: 0,
            uid: 0,
            gid: 0,
        });
    }

    output.truncate(compressor.total_out() as usize);
    Ok(ZipEntry {
        name: name.to_string(),
        stored: false,
        data: output,
        uncompressed_size: size,
        crc32,
        mtime: 0,
        mode: 0,
        uid: 0,
        gid: 0,
    })
}

/// Copy a raw DEFLATE stream through unchanged; optionally inflate a shadow
/// copy to compute a SHA-1 digest for JAR signing without disturbing the
/// original compressed bytes that get written to the archive.
fn repack_verbatim<R: Read>(
    name: &str,
    mut source: R,
    size: u64,
    _want_digest: bool,
) -> Result<ZipEntry> {
    let data = read_all(&mut source, size)?;
    Ok(ZipEntry {
        name: name.to_string(),
        stored: false,
        data,
        // Caller is expected to overwrite these from the original local
        // header when re-packing; zero here signals "use known_sizes".
        uncompressed_size: 0,
        crc32: 0,
        mtime: 0,
        mode: 0,
        uid: 0,
        gid: 0,
    })
}

/// Compute the SHA-1 digest of a byte slice, inflating it first if it is
/// DEFLATE-compressed. Used by the pack scheduler when JAR signing is on
/// and an entry is being re-packed from an existing archive.
pub fn sha1_of_original(data: &[u8], stored: bool) -> Result<[u8; 20]> {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    if stored {
        hasher.update(data);
    } else {
        let mut inflater = flate2::read::DeflateDecoder::new(data);
        let mut plain = Vec::new();
        inflater.read_to_end(&mut plain)?;
        hasher.update(&plain);
    }
    Ok(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn empty_input_is_stored() {
        let opts = PackOptions::default();
        let entry = pack("empty.bin", Cursor::new(&[][..]), 0, PackFormat::Uncompressed, &opts).unwrap();
        assert!(entry.stored);
        assert_eq!(entry.data.len(), 0);
        assert_eq!(entry.crc32, 0);
    }

    #[test]
    fn compressible_text_is_deflated() {
        let opts = PackOptions {
            output_format: OutputFormat::Deflate(Compression::default()),
            early_out: 98,
            want_digest: false,
        };
        let payload = "hello world ".repeat(2000);
        let entry = pack(
            "a.txt",
            Cursor::new(payload.as_bytes()),
            payload.len() as u64,
            PackFormat::Uncompressed,
            &opts,
        )
        .unwrap();
        assert!(!entry.stored);
        assert!(entry.data.len() < payload.len());
        assert_eq!(entry.uncompressed_size, payload.len() as u64);
    }

    #[test]
    fn store_format_keeps_raw_bytes() {
        let opts = PackOptions {
            output_format: OutputFormat::Store,
            early_out: 98,
            want_digest: false,
        };
        let payload = b"raw bytes here";
        let entry = pack(
            "b.bin",
            Cursor::new(&payload[..]),
            payload.len() as u64,
            PackFormat::Uncompressed,
            &opts,
        )
        .unwrap();
        assert!(entry.stored);
        assert_eq!(entry.data, payload);
    }
}
