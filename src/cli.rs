// Command-line front end for romdelta.
//
// Subcommands map onto the path-based helpers in `crate::apply`. Every
// `cmd_*` function returns a process exit code; errors are printed as
// `romdelta: <message>` on stderr.

use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};

use crate::apply;
use crate::error::Result;
use crate::formats::{Format, Patch, PatchMetadata, load_patch};
use crate::io::{ApplyStats, hex_digest};
use crate::options::{DEFAULT_IO_BUFFER_SIZE, PatchOptions};

// ---------------------------------------------------------------------------
// Byte size parsing (supports K, M, G suffixes)
// ---------------------------------------------------------------------------

fn parse_byte_size(s: &str) -> std::result::Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".into());
    }
    let (num_part, multiplier) = match s.as_bytes().last() {
        Some(b'k' | b'K') => (&s[..s.len() - 1], 1024u64),
        Some(b'm' | b'M') => (&s[..s.len() - 1], 1024 * 1024),
        Some(b'g' | b'G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1u64),
    };
    let num: u64 = num_part
        .trim()
        .parse()
        .map_err(|e| format!("invalid size '{s}': {e}"))?;
    num.checked_mul(multiplier)
        .filter(|&n| n > 0)
        .ok_or_else(|| format!("size out of range: '{s}'"))
}

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// IPS / UPS / BPS patch applier.
#[derive(Parser, Debug)]
#[command(
    name = "romdelta",
    version,
    about = "IPS/UPS/BPS patch applier",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Force overwrite existing output files.
    #[arg(short = 'f', long, global = true)]
    force: bool,

    /// Quiet mode (suppress non-error output).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Output stats as JSON to stderr.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Apply a patch to a source file.
    Apply(ApplyArgs),
    /// Print information about a patch.
    Info(InfoArgs),
    /// Check a patch and, where it carries checksums, its source file.
    Validate(ValidateArgs),
    /// Apply one patch in place to several files.
    Batch(BatchArgs),
    /// Print build/configuration details.
    Config,
}

#[derive(Args, Debug)]
struct ApplyTuningArgs {
    /// Skip source/target CRC-32 verification.
    #[arg(long = "no-checksum")]
    no_checksum: bool,

    /// Accept a source whose size differs from the size recorded in the patch.
    #[arg(long = "allow-size-mismatch")]
    allow_size_mismatch: bool,

    /// Read the source with buffered I/O instead of a memory map.
    #[arg(long = "no-mmap")]
    no_mmap: bool,

    /// I/O buffer size (supports K/M/G suffix).
    #[arg(long = "buffer-size", value_parser = parse_byte_size, default_value_t = DEFAULT_IO_BUFFER_SIZE as u64)]
    buffer_size: u64,
}

#[derive(Args, Debug)]
struct ApplyArgs {
    /// Patch file (.ips, .ups or .bps).
    #[arg(value_hint = ValueHint::FilePath)]
    patch: PathBuf,

    /// Source file the patch was made against.
    #[arg(value_hint = ValueHint::FilePath)]
    source: PathBuf,

    /// Output file (default: patch the source in place).
    #[arg(value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    /// Keep a `.bak` copy of the file about to be replaced.
    #[arg(short = 'b', long)]
    backup: bool,

    #[command(flatten)]
    tuning: ApplyTuningArgs,
}

#[derive(Args, Debug)]
struct InfoArgs {
    /// Patch file.
    #[arg(value_hint = ValueHint::FilePath)]
    patch: PathBuf,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    /// Patch file.
    #[arg(value_hint = ValueHint::FilePath)]
    patch: PathBuf,

    /// Source file to check against the patch's checksums.
    #[arg(value_hint = ValueHint::FilePath)]
    source: PathBuf,

    #[command(flatten)]
    tuning: ApplyTuningArgs,
}

#[derive(Args, Debug)]
struct BatchArgs {
    /// Patch file.
    #[arg(value_hint = ValueHint::FilePath)]
    patch: PathBuf,

    /// Files to patch in place.
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    files: Vec<PathBuf>,

    /// Keep a `.bak` copy of every file before patching it.
    #[arg(short = 'b', long)]
    backup: bool,

    #[command(flatten)]
    tuning: ApplyTuningArgs,
}

// ---------------------------------------------------------------------------
// Resolved command + options (flattened from Cli)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Apply,
    Info,
    Validate,
    Batch,
    Config,
}

struct Options {
    command: Command,
    force: bool,
    quiet: bool,
    verbose: u8,
    json_output: bool,
    patch_file: Option<PathBuf>,
    source_file: Option<PathBuf>,
    output_file: Option<PathBuf>,
    files: Vec<PathBuf>,
    patch: PatchOptions,
}

fn patch_options(tuning: &ApplyTuningArgs, backup: bool) -> PatchOptions {
    PatchOptions {
        verify_checksums: !tuning.no_checksum,
        allow_size_mismatch: tuning.allow_size_mismatch,
        use_mmap: !tuning.no_mmap,
        io_buffer_size: usize::try_from(tuning.buffer_size).unwrap_or(usize::MAX),
        create_backup: backup,
        ..Default::default()
    }
}

fn resolve_options(cli: Cli) -> Options {
    let mut opts = Options {
        command: Command::Config,
        force: cli.force,
        quiet: cli.quiet,
        verbose: cli.verbose.min(2),
        json_output: cli.json_output,
        patch_file: None,
        source_file: None,
        output_file: None,
        files: Vec::new(),
        patch: PatchOptions::default(),
    };

    match cli.command {
        Cmd::Apply(args) => {
            opts.command = Command::Apply;
            opts.patch = patch_options(&args.tuning, args.backup);
            opts.patch_file = Some(args.patch);
            opts.source_file = Some(args.source);
            opts.output_file = args.output;
        }
        Cmd::Info(args) => {
            opts.command = Command::Info;
            opts.patch_file = Some(args.patch);
        }
        Cmd::Validate(args) => {
            opts.command = Command::Validate;
            opts.patch = patch_options(&args.tuning, false);
            opts.patch_file = Some(args.patch);
            opts.source_file = Some(args.source);
        }
        Cmd::Batch(args) => {
            opts.command = Command::Batch;
            opts.patch = patch_options(&args.tuning, args.backup);
            opts.patch_file = Some(args.patch);
            opts.files = args.files;
        }
        Cmd::Config => {}
    }

    opts
}

#[cfg(any(test, feature = "fuzzing"))]
pub fn fuzz_try_parse_args(args: &[String]) {
    let argv: Vec<String> = std::iter::once("romdelta".to_string())
        .chain(args.iter().cloned())
        .collect();
    if let Ok(cli) = Cli::try_parse_from(argv) {
        let _ = resolve_options(cli);
    }
}

fn required<'a>(path: &'a Option<PathBuf>, what: &str) -> std::result::Result<&'a Path, i32> {
    path.as_deref().ok_or_else(|| {
        eprintln!("romdelta: missing {what}");
        1
    })
}

fn stats_json(command: &str, stats: &ApplyStats) -> serde_json::Value {
    serde_json::json!({
        "command": command,
        "format": stats.format.name(),
        "source_size": stats.source_size,
        "patch_size": stats.patch_size,
        "output_size": stats.output_size,
        "output_sha256": stats.output_sha256.as_ref().map(|d| hex_digest(d)),
    })
}

// ---------------------------------------------------------------------------
// Config command
// ---------------------------------------------------------------------------

fn cmd_config() -> i32 {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!("romdelta version {version} (Rust), Copyright (C) romdelta contributors");
    eprintln!("Licensed under the MIT License");

    let crc32fast = cfg!(feature = "crc32") as u8;
    let file_io = cfg!(feature = "file-io") as u8;
    let mmap = cfg!(feature = "mmap") as u8;
    let parallel = cfg!(feature = "parallel") as u8;
    let ptr_size = std::mem::size_of::<*const ()>();

    eprintln!("FORMATS=IPS,UPS,BPS");
    eprintln!("CRC32FAST={crc32fast}");
    eprintln!("FILE_IO={file_io}");
    eprintln!("MMAP={mmap}");
    eprintln!("PARALLEL={parallel}");
    eprintln!("DEFAULT_IO_BUFFER_SIZE={DEFAULT_IO_BUFFER_SIZE}");
    eprintln!("sizeof(usize)={ptr_size}");

    0
}

// ---------------------------------------------------------------------------
// Apply command
// ---------------------------------------------------------------------------

fn cmd_apply(opts: &Options) -> i32 {
    let (patch_path, source_path) = match (
        required(&opts.patch_file, "patch file"),
        required(&opts.source_file, "source file"),
    ) {
        (Ok(p), Ok(s)) => (p, s),
        _ => return 1,
    };

    // Writing onto the source itself is an in-place apply.
    let output_path = opts
        .output_file
        .as_deref()
        .filter(|out| *out != source_path);

    let result = match output_path {
        None => apply::apply_patch_inplace(patch_path, source_path, &opts.patch),
        Some(out) => {
            if out.exists() && !opts.force {
                eprintln!(
                    "romdelta: output file exists, use -f to overwrite: {}",
                    out.display()
                );
                return 1;
            }
            if opts.patch.create_backup
                && out.exists()
                && let Err(e) = apply::create_backup(out, &opts.patch)
            {
                eprintln!("romdelta: backup: {}: {e}", out.display());
                return 1;
            }
            apply::apply_patch(patch_path, source_path, out, &opts.patch)
        }
    };

    let stats = match result {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("romdelta: apply error: {e}");
            return 1;
        }
    };

    if opts.verbose > 0 && !opts.quiet {
        eprintln!(
            "romdelta: {} patch: source size: {}, patch size: {}, output size: {}",
            stats.format, stats.source_size, stats.patch_size, stats.output_size
        );
        if let Some(digest) = &stats.output_sha256 {
            eprintln!("romdelta: output sha256: {}", hex_digest(digest));
        }
    }

    if opts.json_output {
        eprintln!("{:#}", stats_json("apply", &stats));
    }

    0
}

// ---------------------------------------------------------------------------
// Info command
// ---------------------------------------------------------------------------

fn print_metadata(meta: &PatchMetadata) {
    println!("Format:              {}", meta.format);
    if meta.format == Format::Ips {
        println!("Target size (min):   {}", meta.target_size);
        println!("Records:             {}", meta.record_count);
        println!(
            "IPS32 trailer:       {}",
            if meta.ips32 { "yes" } else { "no" }
        );
        println!("Checksums:           none");
        return;
    }

    println!("Source size:         {}", meta.src_size);
    println!("Target size:         {}", meta.target_size);
    println!("Source CRC32:        {:08X}", meta.src_crc32);
    println!("Target CRC32:        {:08X}", meta.target_crc32);
    println!("Patch CRC32:         {:08X}", meta.patch_crc32);
    let noun = match meta.format {
        Format::Ups => "XOR blocks:",
        _ => "Commands:",
    };
    println!("{noun:<21}{}", meta.record_count);
    if let Some(text) = &meta.metadata {
        println!("Metadata:            {text}");
    }
}

fn cmd_info(opts: &Options) -> i32 {
    let patch_path = match required(&opts.patch_file, "patch file") {
        Ok(p) => p,
        Err(code) => return code,
    };

    let patch = match load_patch(patch_path) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("romdelta: {}: {e}", patch_path.display());
            return 1;
        }
    };
    let meta = patch.metadata();

    if !opts.quiet {
        print_metadata(&meta);
        if opts.verbose > 0 {
            let self_check = match patch.validate() {
                Ok(()) => "ok".to_string(),
                Err(e) => e.to_string(),
            };
            println!("Self check:          {self_check}");
        }
    }

    if opts.json_output {
        let json = serde_json::json!({
            "command": "info",
            "format": meta.format.name(),
            "src_size": meta.src_size,
            "target_size": meta.target_size,
            "src_crc32": format!("{:08X}", meta.src_crc32),
            "target_crc32": format!("{:08X}", meta.target_crc32),
            "patch_crc32": format!("{:08X}", meta.patch_crc32),
            "has_checksums": meta.has_checksums,
            "record_count": meta.record_count,
            "ips32": meta.ips32,
            "metadata": meta.metadata,
        });
        eprintln!("{json:#}");
    }

    0
}

// ---------------------------------------------------------------------------
// Validate command
// ---------------------------------------------------------------------------

fn cmd_validate(opts: &Options) -> i32 {
    let (patch_path, source_path) = match (
        required(&opts.patch_file, "patch file"),
        required(&opts.source_file, "source file"),
    ) {
        (Ok(p), Ok(s)) => (p, s),
        _ => return 1,
    };

    let result = apply::validate_patch(patch_path, source_path, &opts.patch);

    if opts.json_output {
        let json = serde_json::json!({
            "command": "validate",
            "patch": patch_path.display().to_string(),
            "source": source_path.display().to_string(),
            "valid": result.is_ok(),
            "error": result.as_ref().err().map(|e| e.to_string()),
            "error_kind": result.as_ref().err().map(|e| e.kind().to_string()),
        });
        eprintln!("{json:#}");
    }

    match result {
        Ok(()) => {
            if !opts.quiet {
                println!("{}: patch is valid and can be applied", patch_path.display());
            }
            0
        }
        Err(e) => {
            eprintln!("romdelta: validation failed: {e}");
            1
        }
    }
}

// ---------------------------------------------------------------------------
// Batch command
// ---------------------------------------------------------------------------

fn patch_all(
    patch: &Patch,
    files: &[PathBuf],
    opts: &PatchOptions,
) -> Vec<Result<ApplyStats>> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        files
            .par_iter()
            .map(|file| apply::apply_inplace(patch, file, opts))
            .collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        files
            .iter()
            .map(|file| apply::apply_inplace(patch, file, opts))
            .collect()
    }
}

fn cmd_batch(opts: &Options) -> i32 {
    let patch_path = match required(&opts.patch_file, "patch file") {
        Ok(p) => p,
        Err(code) => return code,
    };

    let patch = match load_patch(patch_path) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("romdelta: {}: {e}", patch_path.display());
            return 1;
        }
    };

    let results = patch_all(&patch, &opts.files, &opts.patch);

    let mut succeeded = 0usize;
    let mut report = Vec::with_capacity(results.len());
    for (file, result) in opts.files.iter().zip(&results) {
        match result {
            Ok(stats) => {
                succeeded += 1;
                if opts.verbose > 0 && !opts.quiet {
                    eprintln!(
                        "romdelta: {}: {} -> {} bytes",
                        file.display(),
                        stats.source_size,
                        stats.output_size
                    );
                }
            }
            Err(e) => eprintln!("romdelta: {}: {e}", file.display()),
        }
        if opts.json_output {
            report.push(match result {
                Ok(stats) => serde_json::json!({
                    "file": file.display().to_string(),
                    "ok": true,
                    "output_size": stats.output_size,
                }),
                Err(e) => serde_json::json!({
                    "file": file.display().to_string(),
                    "ok": false,
                    "error": e.to_string(),
                }),
            });
        }
    }

    let failed = results.len() - succeeded;
    if !opts.quiet {
        eprintln!(
            "romdelta: batch: {succeeded} of {} files patched, {failed} failed",
            results.len()
        );
    }

    if opts.json_output {
        let json = serde_json::json!({
            "command": "batch",
            "format": patch.format_name(),
            "succeeded": succeeded,
            "failed": failed,
            "files": report,
        });
        eprintln!("{json:#}");
    }

    if failed == 0 { 0 } else { 1 }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run() -> ! {
    let cli = Cli::parse();
    let opts = resolve_options(cli);

    let default_filter = match (opts.quiet, opts.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, _) => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let exit_code = match opts.command {
        Command::Apply => cmd_apply(&opts),
        Command::Info => cmd_info(&opts),
        Command::Validate => cmd_validate(&opts),
        Command::Batch => cmd_batch(&opts),
        Command::Config => cmd_config(),
    };

    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
