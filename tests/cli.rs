//! CLI flag parsing and pack/extract mode detection.

use fastzip::cli::{self, Mode};
use std::fs;
use tempfile::tempdir;

#[test]
fn parses_level_and_repack_and_verbose_flags() {
    let args: Vec<String> = vec!["-9", "-v", "-Z", "other.zip", "out.zip"]
        .into_iter()
        .map(String::from)
        .collect();
    let opts = cli::parse_args(&args).unwrap();
    assert_eq!(opts.level, Some(9));
    assert!(opts.verbose);
    assert_eq!(opts.repack_archive.as_deref(), Some("other.zip"));
    assert_eq!(opts.archive, "out.zip");
}

#[test]
fn parses_sign_spec_with_keystore_password_alias() {
    let args: Vec<String> = vec!["-Smykeystore.jks,hunter2,myalias", "out.zip"]
        .into_iter()
        .map(String::from)
        .collect();
    let opts = cli::parse_args(&args).unwrap();
    let sign = opts.sign.expect("sign request parsed");
    assert_eq!(sign.keystore_path.as_deref(), Some("mykeystore.jks"));
    assert_eq!(sign.password, "hunter2");
    assert_eq!(sign.alias.as_deref(), Some("myalias"));
}

#[test]
fn apk_flag_implies_alignment_and_debug_keystore() {
    let args: Vec<String> = vec!["--apk", "out.zip"].into_iter().map(String::from).collect();
    let opts = cli::parse_args(&args).unwrap();
    assert!(opts.align);
    assert!(opts.sign.is_some());
    assert!(!opts.no_pack_exts.is_empty());
}

#[test]
fn missing_archive_argument_is_a_usage_error() {
    let args: Vec<String> = vec![];
    assert!(cli::parse_args(&args).is_err());
}

#[test]
fn detect_mode_picks_extract_for_existing_archive_with_no_paths() {
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("existing.zip");
    fs::write(&archive_path, b"PK\x05\x06").unwrap();

    let args: Vec<String> = vec![archive_path.to_string_lossy().into_owned()];
    let opts = cli::parse_args(&args).unwrap();
    assert!(matches!(cli::detect_mode(&opts).unwrap(), Mode::Extract));
}

#[test]
fn detect_mode_picks_pack_for_existing_directory() {
    let dir = tempdir().unwrap();
    let to_pack = dir.path().join("payload");
    fs::create_dir(&to_pack).unwrap();

    let args: Vec<String> = vec![to_pack.to_string_lossy().into_owned()];
    let opts = cli::parse_args(&args).unwrap();
    assert!(matches!(cli::detect_mode(&opts).unwrap(), Mode::Pack));
}
