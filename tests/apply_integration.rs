mod common;

use std::fs;

use common::{Bps, Ips, bps_patch, ips_patch, ups_patch};
use romdelta::apply::{
    apply_inplace, apply_patch, apply_patch_inplace, create_backup, get_patch_info,
    validate_patch, verify_output,
};
use romdelta::{ErrorKind, Format, PatchError, PatchOptions, detect_format_from_file, load_patch};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

fn rom(len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(len as u64);
    (0..len).map(|_| rng.random()).collect()
}

#[test]
fn apply_patch_buffered_and_mapped_agree() {
    let dir = tempdir().unwrap();
    let source = rom(300_000);
    let mut target = source.clone();
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..200 {
        let i = rng.random_range(0..target.len());
        target[i] = target[i].wrapping_add(1);
    }
    target.extend_from_slice(b"trailer");

    let patch_path = dir.path().join("hack.ups");
    let source_path = dir.path().join("game.bin");
    fs::write(&patch_path, ups_patch(&source, &target)).unwrap();
    fs::write(&source_path, &source).unwrap();

    for use_mmap in [true, false] {
        let out_path = dir.path().join(format!("out-{use_mmap}.bin"));
        let opts = PatchOptions {
            use_mmap,
            io_buffer_size: 4096,
            ..Default::default()
        };
        let stats = apply_patch(&patch_path, &source_path, &out_path, &opts).unwrap();
        assert_eq!(stats.format, Format::Ups);
        assert_eq!(stats.source_size, source.len() as u64);
        assert_eq!(stats.output_size, target.len() as u64);
        assert_eq!(fs::read(&out_path).unwrap(), target);
        verify_output(&out_path).unwrap();

        #[cfg(feature = "file-io")]
        assert!(stats.output_sha256.is_some());
    }
}

#[test]
fn inplace_batch_over_several_files() {
    let dir = tempdir().unwrap();
    let patch_path = dir.path().join("fix.ips");
    fs::write(&patch_path, ips_patch(&[Ips::Literal(4, b"PATCHED")])).unwrap();
    let patch = load_patch(&patch_path).unwrap();

    let opts = PatchOptions {
        create_backup: true,
        ..Default::default()
    };
    for n in 0..4 {
        let file = dir.path().join(format!("save{n}.dat"));
        fs::write(&file, vec![n as u8; 16]).unwrap();
        apply_inplace(&patch, &file, &opts).unwrap();

        let data = fs::read(&file).unwrap();
        assert_eq!(&data[4..11], b"PATCHED");
        assert_eq!(data[0], n as u8);
        let backup = dir.path().join(format!("save{n}.dat.bak"));
        assert_eq!(fs::read(backup).unwrap(), vec![n as u8; 16]);
    }
}

#[test]
fn inplace_failure_restores_nothing_and_leaves_no_temp() {
    let dir = tempdir().unwrap();
    let source = b"expected source";
    let (patch, _) = bps_patch(source, b"", &[Bps::SourceRead(15)]);
    let patch_path = dir.path().join("p.bps");
    let file = dir.path().join("other.bin");
    fs::write(&patch_path, patch).unwrap();
    fs::write(&file, b"a different one").unwrap();

    let err = apply_patch_inplace(&patch_path, &file, &PatchOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Integrity);
    assert_eq!(fs::read(&file).unwrap(), b"a different one");
    assert!(!dir.path().join("other.bin.tmp").exists());
}

#[test]
fn validate_and_info_on_bps() {
    let dir = tempdir().unwrap();
    let source = rom(1000);
    let (patch, target) = bps_patch(
        &source,
        b"title",
        &[Bps::SourceCopy(500, 500), Bps::SourceCopy(500, -1000)],
    );
    assert_eq!(&target[..500], &source[500..]);

    let patch_path = dir.path().join("swap.bps");
    let source_path = dir.path().join("src.bin");
    fs::write(&patch_path, patch).unwrap();
    fs::write(&source_path, &source).unwrap();

    assert_eq!(detect_format_from_file(&patch_path).unwrap(), Format::Bps);
    let info = get_patch_info(&patch_path).unwrap();
    assert_eq!(info.src_size, 1000);
    assert_eq!(info.target_size, 1000);
    assert_eq!(info.metadata.as_deref(), Some("title"));
    assert!(info.has_checksums);

    validate_patch(&patch_path, &source_path, &PatchOptions::default()).unwrap();

    fs::write(&source_path, &source[..999]).unwrap();
    let err = validate_patch(&patch_path, &source_path, &PatchOptions::default()).unwrap_err();
    assert!(matches!(err, PatchError::SourceSizeMismatch { .. }));
}

#[test]
fn missing_inputs_are_io_errors() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("missing");
    let out = dir.path().join("out");

    let err = apply_patch(&missing, &missing, &out, &PatchOptions::default()).unwrap_err();
    assert!(matches!(err, PatchError::FileNotFound(_)));
    assert_eq!(err.kind(), ErrorKind::Io);

    let patch_path = dir.path().join("p.ips");
    fs::write(&patch_path, ips_patch(&[])).unwrap();
    let err = apply_patch(&patch_path, &missing, &out, &PatchOptions::default()).unwrap_err();
    assert!(matches!(err, PatchError::FileNotFound(_)));
    assert!(!out.exists());
}

#[test]
fn backup_helper_honours_options() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("f.bin");
    fs::write(&file, b"payload").unwrap();

    assert_eq!(
        create_backup(&file, &PatchOptions::default())
            .unwrap_err()
            .kind(),
        ErrorKind::Argument
    );

    let opts = PatchOptions {
        create_backup: true,
        ..Default::default()
    };
    let backup = create_backup(&file, &opts).unwrap();
    assert_eq!(fs::read(backup).unwrap(), b"payload");
}
