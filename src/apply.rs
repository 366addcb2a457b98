// Path-based helpers: apply to a new file, apply in place with an optional
// backup, validate a patch against a source, and inspect a patch.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::{ChecksumTarget, PatchError, Result};
use crate::formats::{Patch, PatchMetadata, crc32::crc32, load_patch};
use crate::io::{self, ApplyStats};
use crate::options::PatchOptions;

/// Suffix of the scratch file used by `apply_patch_inplace`.
const TEMP_SUFFIX: &str = ".tmp";

/// Apply the patch at `patch_path` to `source_path`, writing `output_path`.
pub fn apply_patch(
    patch_path: &Path,
    source_path: &Path,
    output_path: &Path,
    opts: &PatchOptions,
) -> Result<ApplyStats> {
    let patch = load_patch(patch_path)?;
    let stats = patch.apply_to_file(source_path, output_path, opts)?;
    info!(
        "applied {} patch {}: {} -> {} bytes",
        stats.format,
        patch_path.display(),
        stats.source_size,
        stats.output_size
    );
    Ok(stats)
}

/// Patch `file_path` in place.
///
/// The result goes to `<file>.tmp` first and is renamed over the original
/// only on success; on failure the scratch file is removed and the original
/// is untouched. With `opts.create_backup` the original is copied aside
/// before anything else happens.
pub fn apply_patch_inplace(
    patch_path: &Path,
    file_path: &Path,
    opts: &PatchOptions,
) -> Result<ApplyStats> {
    let patch = load_patch(patch_path)?;
    apply_inplace(&patch, file_path, opts)
}

/// In-place apply of an already loaded patch. See [`apply_patch_inplace`].
pub fn apply_inplace(patch: &Patch, file_path: &Path, opts: &PatchOptions) -> Result<ApplyStats> {
    if opts.create_backup {
        create_backup(file_path, opts)?;
    }

    let temp_path = with_suffix(file_path, TEMP_SUFFIX);
    match patch.apply_to_file(file_path, &temp_path, opts) {
        Ok(stats) => {
            fs::rename(&temp_path, file_path)?;
            info!(
                "patched {} in place ({} patch, {} -> {} bytes)",
                file_path.display(),
                stats.format,
                stats.source_size,
                stats.output_size
            );
            Ok(stats)
        }
        Err(e) => {
            if let Err(cleanup) = fs::remove_file(&temp_path)
                && cleanup.kind() != std::io::ErrorKind::NotFound
            {
                warn!("could not remove {}: {cleanup}", temp_path.display());
            }
            Err(e)
        }
    }
}

/// Check that a patch is well formed and, for formats with checksums, that
/// `source_path` is the file it was made for.
pub fn validate_patch(patch_path: &Path, source_path: &Path, opts: &PatchOptions) -> Result<()> {
    let patch = load_patch(patch_path)?;
    patch.validate()?;

    let meta = patch.metadata();
    if !meta.has_checksums {
        debug!("{} patch has no checksums; structure only", meta.format);
        return Ok(());
    }

    let source = io::open_file_reader_with(source_path, opts.use_mmap, opts.io_buffer_size)?;
    let actual_size = source.size();
    if meta.src_size > 0 && actual_size != meta.src_size && !opts.allow_size_mismatch {
        return Err(PatchError::SourceSizeMismatch {
            expected: meta.src_size,
            actual: actual_size,
        });
    }

    let actual = crc32(source.as_bytes());
    if actual != meta.src_crc32 {
        return Err(PatchError::checksum(
            ChecksumTarget::Source,
            meta.src_crc32,
            actual,
        ));
    }
    Ok(())
}

/// Parse a patch file and summarize it.
pub fn get_patch_info(patch_path: &Path) -> Result<PatchMetadata> {
    Ok(load_patch(patch_path)?.metadata())
}

/// Copy `file_path` to `file_path + opts.backup_suffix`.
///
/// Fails with an argument error unless `opts.create_backup` is set.
pub fn create_backup(file_path: &Path, opts: &PatchOptions) -> Result<PathBuf> {
    if !opts.create_backup {
        return Err(PatchError::InvalidArgument(
            "backup creation is not enabled".into(),
        ));
    }
    if !file_path.exists() {
        return Err(PatchError::FileNotFound(file_path.to_path_buf()));
    }

    let backup_path = with_suffix(file_path, &opts.backup_suffix);
    fs::copy(file_path, &backup_path)?;
    info!("backup written to {}", backup_path.display());
    Ok(backup_path)
}

/// Check that `path` exists and is not empty.
pub fn verify_output(path: &Path) -> Result<()> {
    let meta = fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => PatchError::FileNotFound(path.to_path_buf()),
        _ => PatchError::Io(e),
    })?;
    if meta.len() == 0 {
        return Err(PatchError::EmptyFile(path.to_path_buf()));
    }
    Ok(())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::formats::{Format, varint};

    /// UPS patch turning "hello world" into "HELLO world".
    fn hello_ups() -> Vec<u8> {
        let mut out = b"UPS1".to_vec();
        varint::encode(11, &mut out);
        varint::encode(11, &mut out);
        varint::encode(0, &mut out);
        out.extend_from_slice(&[0x20; 5]);
        out.push(0);
        out.extend_from_slice(&crc32(b"hello world").to_le_bytes());
        out.extend_from_slice(&crc32(b"HELLO world").to_le_bytes());
        let self_crc = crc32(&out);
        out.extend_from_slice(&self_crc.to_le_bytes());
        out
    }

    fn ips_patch() -> Vec<u8> {
        let mut out = b"PATCH".to_vec();
        out.extend_from_slice(&[0, 0, 2, 0, 3]);
        out.extend_from_slice(b"XYZ");
        out.extend_from_slice(b"EOF");
        out
    }

    #[test]
    fn apply_patch_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let patch = dir.path().join("p.ups");
        let source = dir.path().join("in.bin");
        let output = dir.path().join("out.bin");
        fs::write(&patch, hello_ups()).unwrap();
        fs::write(&source, b"hello world").unwrap();

        let stats = apply_patch(&patch, &source, &output, &PatchOptions::default()).unwrap();
        assert_eq!(stats.format, Format::Ups);
        assert_eq!(stats.source_size, 11);
        assert_eq!(stats.output_size, 11);
        assert_eq!(stats.patch_size, hello_ups().len() as u64);
        assert_eq!(fs::read(&output).unwrap(), b"HELLO world");
        assert!(verify_output(&output).is_ok());
    }

    #[test]
    fn failed_apply_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let patch = dir.path().join("p.ups");
        let source = dir.path().join("in.bin");
        let output = dir.path().join("out.bin");
        fs::write(&patch, hello_ups()).unwrap();
        fs::write(&source, b"jello world").unwrap();

        let err = apply_patch(&patch, &source, &output, &PatchOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert!(!output.exists());
    }

    #[test]
    fn inplace_with_backup() {
        let dir = tempfile::tempdir().unwrap();
        let patch = dir.path().join("p.ips");
        let file = dir.path().join("game.bin");
        fs::write(&patch, ips_patch()).unwrap();
        fs::write(&file, b"abcdef").unwrap();

        let opts = PatchOptions {
            create_backup: true,
            ..Default::default()
        };
        apply_patch_inplace(&patch, &file, &opts).unwrap();

        assert_eq!(fs::read(&file).unwrap(), b"abXYZf");
        assert_eq!(fs::read(dir.path().join("game.bin.bak")).unwrap(), b"abcdef");
        assert!(!dir.path().join("game.bin.tmp").exists());
    }

    #[test]
    fn inplace_failure_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        let patch = dir.path().join("p.ups");
        let file = dir.path().join("game.bin");
        fs::write(&patch, hello_ups()).unwrap();
        fs::write(&file, b"not the right source").unwrap();

        assert!(apply_patch_inplace(&patch, &file, &PatchOptions::default()).is_err());
        assert_eq!(fs::read(&file).unwrap(), b"not the right source");
        assert!(!dir.path().join("game.bin.tmp").exists());
        assert!(!dir.path().join("game.bin.bak").exists());
    }

    #[test]
    fn validate_checks_source() {
        let dir = tempfile::tempdir().unwrap();
        let patch = dir.path().join("p.ups");
        let good = dir.path().join("good.bin");
        let bad = dir.path().join("bad.bin");
        let short = dir.path().join("short.bin");
        fs::write(&patch, hello_ups()).unwrap();
        fs::write(&good, b"hello world").unwrap();
        fs::write(&bad, b"hello there").unwrap();
        fs::write(&short, b"hello").unwrap();

        let opts = PatchOptions::default();
        assert!(validate_patch(&patch, &good, &opts).is_ok());
        assert!(matches!(
            validate_patch(&patch, &bad, &opts),
            Err(PatchError::ChecksumMismatch { .. })
        ));
        assert!(matches!(
            validate_patch(&patch, &short, &opts),
            Err(PatchError::SourceSizeMismatch {
                expected: 11,
                actual: 5
            })
        ));
    }

    #[test]
    fn validate_ips_ignores_source() {
        let dir = tempfile::tempdir().unwrap();
        let patch = dir.path().join("p.ips");
        fs::write(&patch, ips_patch()).unwrap();
        let missing = dir.path().join("missing.bin");
        assert!(validate_patch(&patch, &missing, &PatchOptions::default()).is_ok());
    }

    #[test]
    fn patch_info() {
        let dir = tempfile::tempdir().unwrap();
        let patch = dir.path().join("p.ups");
        fs::write(&patch, hello_ups()).unwrap();
        let meta = get_patch_info(&patch).unwrap();
        assert_eq!(meta.format, Format::Ups);
        assert_eq!(meta.src_size, 11);
        assert_eq!(meta.src_crc32, crc32(b"hello world"));
        assert_eq!(meta.record_count, 1);

        let err = get_patch_info(&dir.path().join("nope.ups")).unwrap_err();
        assert!(matches!(err, PatchError::FileNotFound(_)));
    }

    #[test]
    fn backup_requires_opt_in() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.bin");
        fs::write(&file, b"data").unwrap();

        let err = create_backup(&file, &PatchOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);

        let opts = PatchOptions {
            create_backup: true,
            backup_suffix: ".orig".into(),
            ..Default::default()
        };
        let backup = create_backup(&file, &opts).unwrap();
        assert_eq!(backup, dir.path().join("a.bin.orig"));
        assert_eq!(fs::read(backup).unwrap(), b"data");
    }

    #[test]
    fn verify_output_rejects_missing_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.bin");
        assert!(matches!(
            verify_output(&missing),
            Err(PatchError::FileNotFound(_))
        ));

        let empty = dir.path().join("empty.bin");
        fs::write(&empty, b"").unwrap();
        assert!(matches!(
            verify_output(&empty),
            Err(PatchError::EmptyFile(_))
        ));
    }
}
