//! Command-line option parsing and the pack/unpack driver.

use crate::compress::PackOptions;
use crate::error::{Error, Result};
use crate::keystore::Keystore;
use crate::model::{FileJob, JobSource, OutputFormat, PackFormat, PreservedMeta};
use crate::pack::{self, PackConfig};
use crate::reader::ArchiveReader;
use crate::reporter::{Reporter, StderrReporter};
use crate::sign::{self, SignOptions};
use crate::unpack::{self, UnpackConfig};
use crate::writer::ArchiveWriter;
use flate2::Compression;
use getopts::Options;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const ANDROID_NO_PACK_EXTS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "wav", "mp2", "mp3", "ogg", "aac", "mpg", "mpeg", "mid", "midi",
    "smf", "jet", "rtttl", "imy", "xmf", "mp4", "m4a", "m4v", "3gp", "3gpp", "3g2", "3gpp2", "amr",
    "awb", "wma", "wmv",
];

pub struct CliOptions {
    pub archive: String,
    pub paths: Vec<String>,
    pub list_only: bool,
    pub junk_paths: bool,
    pub worker_count: usize,
    pub verbose: bool,
    pub dest_dir: Option<String>,
    pub force_extract: bool,
    pub level: Option<u32>,
    pub sequential: bool,
    pub align: bool,
    pub no_pack_exts: Vec<String>,
    pub repack_archive: Option<String>,
    pub early_out: u8,
    pub sign: Option<SignRequest>,
    pub force_zip64: bool,
}

pub struct SignRequest {
    pub keystore_path: Option<String>,
    pub password: String,
    pub alias: Option<String>,
}

fn build_option_table() -> Options {
    let mut opts = Options::new();
    opts.optflag("l", "", "list archive contents");
    opts.optflag("j", "", "junk (strip) leading path components");
    opts.optopt("t", "", "worker thread count", "N");
    opts.optflag("v", "", "verbose");
    opts.optopt("d", "", "destination directory", "DIR");
    opts.optflag("x", "", "force extraction mode");
    opts.optflag("s", "", "sequential commit order");
    opts.optflag("A", "", "4-byte-align stored entries");
    opts.optopt("X", "", "store these extensions verbatim", "ext,...");
    opts.optopt("Z", "", "add entries from another zip", "file");
    opts.optopt("e", "", "early-out threshold percent", "N");
    opts.optflagopt("S", "", "JAR-sign with ks,password,alias", "[ks,pw,alias]");
    opts.optflag("", "apk", "convenience: sign as an Android debug APK");
    opts.optflag("", "zip64", "force ZIP64 emission");
    for level in 0..=9 {
        opts.optflag(&level.to_string(), "", "deflate level");
    }
    opts
}

pub fn parse_args(args: &[String]) -> Result<CliOptions> {
    let option_table = build_option_table();
    let matches = option_table
        .parse(args)
        .map_err(|e| Error::Usage(e.to_string()))?;

    if matches.free.is_empty() {
        return Err(Error::Usage("missing archive path".into()));
    }

    let archive = matches.free[0].clone();
    let paths = matches.free[1..].to_vec();

    let level = (0..=9).find(|l| matches.opt_present(&l.to_string()));

    let no_pack_exts: Vec<String> = matches
        .opt_str("X")
        .map(|s| s.split(',').map(str::to_string).collect())
        .unwrap_or_default();

    let apk = matches.opt_present("apk");

    let sign = if apk {
        Some(SignRequest {
            keystore_path: Some(default_debug_keystore()),
            password: "android".to_string(),
            alias: None,
        })
    } else if let Some(spec) = matches.opt_str("S") {
        let parts: Vec<&str> = spec.splitn(3, ',').collect();
        Some(SignRequest {
            keystore_path: parts.first().map(|s| s.to_string()),
            password: parts.get(1).unwrap_or(&"android").to_string(),
            alias: parts.get(2).map(|s| s.to_string()),
        })
    } else if matches.opt_present("S") {
        Some(SignRequest {
            keystore_path: None,
            password: "android".to_string(),
            alias: None,
        })
    } else {
        None
    };

    Ok(CliOptions {
        archive,
        paths,
        list_only: matches.opt_present("l"),
        junk_paths: matches.opt_present("j"),
        worker_count: matches
            .opt_str("t")
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)),
        verbose: matches.opt_present("v"),
        dest_dir: matches.opt_str("d"),
        force_extract: matches.opt_present("x"),
        level,
        sequential: matches.opt_present("s"),
        align: matches.opt_present("A") || apk,
        no_pack_exts: if apk {
            ANDROID_NO_PACK_EXTS.iter().map(|s| s.to_string()).collect()
        } else {
            no_pack_exts
        },
        repack_archive: matches.opt_str("Z"),
        early_out: matches
            .opt_str("e")
            .and_then(|s| s.parse().ok())
            .unwrap_or(98),
        sign,
        force_zip64: matches.opt_present("zip64"),
    })
}

fn default_debug_keystore() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.android/debug.keystore")
}

/// Decide pack vs. extract from the archive argument: an existing `.zip`
/// with no extra paths means extract; an existing directory means pack.
pub fn detect_mode(opts: &CliOptions) -> Result<Mode> {
    let archive_path = Path::new(&opts.archive);
    if opts.force_extract {
        return Ok(Mode::Extract);
    }
    if opts.paths.is_empty() && archive_path.is_file() {
        return Ok(Mode::Extract);
    }
    if !opts.paths.is_empty() || archive_path.is_dir() {
        return Ok(Mode::Pack);
    }
    Err(Error::Usage(format!(
        "cannot determine mode for '{}': not an existing archive or directory",
        opts.archive
    )))
}

pub enum Mode {
    Pack,
    Extract,
}

pub fn run(opts: CliOptions) -> Result<()> {
    let reporter: Arc<dyn Reporter> = Arc::new(StderrReporter);

    if opts.list_only {
        let reader = ArchiveReader::open(&opts.archive)?;
        for entry in &reader.entries {
            println!(
                "{:>10} {:>10} {}",
                entry.compressed_size, entry.uncompressed_size, entry.name
            );
        }
        return Ok(());
    }

    match detect_mode(&opts)? {
        Mode::Pack => run_pack(&opts, reporter),
        Mode::Extract => run_unpack(&opts, reporter),
    }
}

fn run_pack(opts: &CliOptions, reporter: Arc<dyn Reporter>) -> Result<()> {
    let archive_name = if opts.archive.ends_with(".zip") {
        opts.archive.clone()
    } else {
        format!("{}.zip", opts.archive.trim_end_matches('/'))
    };

    let jobs = collect_jobs(opts)?;
    let mut writer = ArchiveWriter::new(&archive_name, jobs.len())?;
    writer.set_align(opts.align);
    writer.set_force_zip64(opts.force_zip64);
    if let Some(repack_path) = &opts.repack_archive {
        let source = ArchiveReader::open(repack_path)?;
        writer.set_comment(source.comment.clone());
    }

    let output_format = match opts.level {
        Some(0) => OutputFormat::Store,
        Some(level) => OutputFormat::Deflate(Compression::new(level)),
        None => OutputFormat::Deflate(Compression::default()),
    };

    let pack_opts = PackOptions {
        output_format,
        early_out: opts.early_out,
        want_digest: opts.sign.is_some(),
    };

    let config = PackConfig {
        worker_count: opts.worker_count,
        sequential_order: opts.sequential,
        sign: opts.sign.is_some(),
    };

    if opts.verbose {
        log::debug!("packing {} entries with {} workers", jobs.len(), config.worker_count);
    }

    let (mut writer, digests) = pack::run(jobs, config, pack_opts, writer, Arc::clone(&reporter))?;

    if let Some(sign_req) = &opts.sign {
        let keystore_path = sign_req
            .keystore_path
            .clone()
            .ok_or_else(|| Error::KeystoreNotFound("no keystore path given".into()))?;
        let file = File::open(&keystore_path)
            .map_err(|_| Error::KeystoreNotFound(keystore_path.clone()))?;
        let keystore = Keystore::load(file)?;
        sign::sign_archive(
            &mut writer,
            &digests,
            SignOptions {
                keystore,
                password: &sign_req.password,
                alias: sign_req.alias.as_deref(),
            },
        )?;
    }

    writer.close()?;
    Ok(())
}

fn collect_jobs(opts: &CliOptions) -> Result<Vec<FileJob>> {
    let mut jobs = Vec::new();

    if let Some(repack_path) = &opts.repack_archive {
        collect_repack_jobs(repack_path, opts, &mut jobs)?;
    }

    let mut roots = opts.paths.clone();
    if roots.is_empty() && opts.repack_archive.is_none() {
        roots.push(opts.archive.clone());
    }

    for root in &roots {
        walk(Path::new(root), Path::new(root), opts, &mut jobs)?;
    }

    Ok(jobs)
}

/// Add one [`FileJob`] per entry of an existing ZIP (`-Z file`), preserving
/// its current compression method rather than re-deflating from scratch.
fn collect_repack_jobs(repack_path: &str, opts: &CliOptions, jobs: &mut Vec<FileJob>) -> Result<()> {
    let reader = ArchiveReader::open(repack_path)?;
    let repack_path = PathBuf::from(repack_path);

    for entry in &reader.entries {
        if entry.is_symlink() || entry.is_dir() {
            continue;
        }

        let archive_name = if opts.junk_paths {
            Path::new(&entry.name)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| entry.name.clone())
        } else {
            entry.name.clone()
        };

        if opts.verbose {
            log::debug!("repacking {archive_name} from {}", repack_path.display());
            println!("{archive_name}");
        }

        jobs.push(FileJob {
            source: JobSource::Archive {
                path: repack_path.clone(),
                offset: entry.local_header_offset,
            },
            archive_name,
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
            preserved: Some(PreservedMeta {
                mtime: entry.mtime,
                mode: entry.unix_mode().unwrap_or(0) as u16,
                uid: entry.uid.unwrap_or(0),
                gid: entry.gid.unwrap_or(0),
            }),
        });
    }
    Ok(())
}

fn walk(base: &Path, current: &Path, opts: &CliOptions, jobs: &mut Vec<FileJob>) -> Result<()> {
    let metadata = std::fs::symlink_metadata(current)?;
    if metadata.is_dir() {
        let mut children: Vec<_> = std::fs::read_dir(current)?.filter_map(|e| e.ok()).collect();
        children.sort_by_key(|e| e.file_name());
        for child in children {
            walk(base, &child.path(), opts, jobs)?;
        }
        return Ok(());
    }
    if !metadata.is_file() {
        return Ok(());
    }

    let relative = current.strip_prefix(base.parent().unwrap_or(base)).unwrap_or(current);
    let archive_name = if opts.junk_paths {
        current
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        relative.to_string_lossy().replace('\\', "/")
    };

    let ext = current
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let output_format = if opts.no_pack_exts.iter().any(|e| e == &ext) {
        OutputFormat::Store
    } else {
        match opts.level {
            Some(0) => OutputFormat::Store,
            Some(level) => OutputFormat::Deflate(Compression::new(level)),
            None => OutputFormat::Deflate(Compression::default()),
        }
    };

    if opts.verbose {
        println!("{archive_name}");
    }

    jobs.push(FileJob {
        source: JobSource::Disk(current.to_path_buf()),
        archive_name,
        output_format,
        input_format: PackFormat::Uncompressed,
        known_sizes: None,
        preserved: None,
    });
    Ok(())
}

fn run_unpack(opts: &CliOptions, reporter: Arc<dyn Reporter>) -> Result<()> {
    let archive_path = PathBuf::from(&opts.archive);
    let reader = ArchiveReader::open(&archive_path)?;
    let dest = match &opts.dest_dir {
        Some(d) => PathBuf::from(d),
        None => unpack::smart_destination(&archive_path, &reader.entries),
    };
    if opts.verbose {
        for entry in &reader.entries {
            println!("{}", entry.name);
        }
    }
    log::debug!(
        "extracting {} entries from {} into {}",
        reader.entries.len(),
        archive_path.display(),
        dest.display()
    );
    drop(reader);

    let config = UnpackConfig {
        worker_count: opts.worker_count,
    };
    unpack::run(&archive_path, dest, config, reporter)
}
