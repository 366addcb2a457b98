//! romdelta: IPS, UPS and BPS patch decoding and application in Rust.
//!
//! The crate provides:
//! - Format codecs with bounds-checked apply (`formats`)
//! - File-oriented helpers: buffered or memory-mapped reads, hashed writes (`io`)
//! - Path-based orchestration: apply, in-place apply, validate (`apply`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```no_run
//! use romdelta::{PatchOptions, load_patch_from_memory};
//!
//! let patch_bytes = std::fs::read("hack.bps").unwrap();
//! let source = std::fs::read("game.sfc").unwrap();
//!
//! let patch = load_patch_from_memory(patch_bytes).unwrap();
//! println!("{} patch, {} commands", patch.format(), patch.metadata().record_count);
//! let target = patch.apply(&source, &PatchOptions::default()).unwrap();
//! std::fs::write("game-patched.sfc", target).unwrap();
//! ```

pub mod apply;
pub mod error;
pub mod formats;
pub mod io;
pub mod options;

#[cfg(feature = "cli")]
pub mod cli;

pub use error::{ErrorKind, PatchError, Result};
pub use formats::{
    Format, Patch, PatchMetadata, detect_format, detect_format_from_file, load_patch,
    load_patch_from_memory,
};
pub use io::ApplyStats;
pub use options::PatchOptions;
