//! # fastzip
//!
//! A high-throughput parallel ZIP archiver/dearchiver with optional JAR
//! (Android APK v1) signing.
//!
//! The crate is organized around the three subsystems that carry the real
//! engineering weight:
//!
//! - the pack ([`pack`]) and unpack ([`unpack`]) schedulers, each a fixed
//!   worker pool draining a shared queue,
//! - the ZIP container [`writer`] and [`reader`], and
//! - the [`sign`] module, which builds `MANIFEST.MF`/`CERT.SF`/`CERT.RSA`
//!   from a JKS [`keystore`] via a small [`asn1`] DER codec.
//!
//! [`cli`] wires these into the `fastzip` binary; everything else is usable
//! as a library on its own.
//!
//! ## Quick start
//!
//! ```no_run
//! use fastzip::model::{FileJob, JobSource, OutputFormat, PackFormat};
//! use fastzip::pack::{self, PackConfig};
//! use fastzip::compress::PackOptions;
//! use fastzip::reporter::StderrReporter;
//! use fastzip::writer::ArchiveWriter;
//! use std::sync::Arc;
//!
//! # fn main() -> fastzip::Result<()> {
//! let jobs = vec![FileJob {
//!     source: JobSource::Disk("README.md".into()),
//!     archive_name: "README.md".into(),
//!     output_format: OutputFormat::Deflate(flate2::Compression::default()),
//!     input_format: PackFormat::Uncompressed,
//!     known_sizes: None,
//!     preserved: None,
//! }];
//! let writer = ArchiveWriter::new("out.zip", jobs.len())?;
//! let config = PackConfig { worker_count: 4, sequential_order: false, sign: false };
//! let (writer, _digests) = pack::run(jobs, config, PackOptions::default(), writer, Arc::new(StderrReporter))?;
//! writer.close()?;
//! # Ok(())
//! # }
//! ```

pub mod asn1;
pub mod cli;
pub mod compress;
pub mod dostime;
pub mod error;
pub mod format;
pub mod keystore;
pub mod model;
pub mod pack;
pub mod reader;
pub mod reporter;
pub mod sign;
pub mod unpack;
pub mod writer;

pub use error::{Error, Result};
