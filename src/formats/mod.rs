// IPS, UPS and BPS patch formats.
//
// # Modules
//
// - `varint`: Bijective base-128 integer shared by UPS and BPS
// - `crc32`: CRC-32 (IEEE) for the UPS/BPS footers
// - `ips`: IPS records: literal and RLE writes at 24-bit offsets
// - `ups`: UPS XOR blocks with source/target/patch checksums
// - `bps`: BPS copy/read commands with source/target/patch checksums
//
// `Patch` is the closed set of parsed patches; `detect_format` and
// `load_patch_from_memory` pick the codec from the magic bytes.

pub mod bps;
pub mod crc32;
pub mod ips;
pub mod ups;
pub mod varint;

use std::fmt;
use std::path::Path;

use log::debug;

use crate::error::{PatchError, Result};
use crate::io::{self, ApplyStats};
use crate::options::PatchOptions;

pub use bps::{BPS_MAGIC, BpsAction, BpsCommand, BpsPatch};
pub use ips::{IPS_EOF, IPS_MAGIC, IpsPayload, IpsPatch, IpsRecord};
pub use ups::{UPS_MAGIC, UpsPatch, XorBlock};

/// Shortest buffer `detect_format` will look at.
const MIN_DETECT_LEN: usize = 4;

/// Little-endian u32 at `pos`; callers guarantee four bytes are there.
#[inline]
pub(crate) fn read_u32_le(data: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}

// ---------------------------------------------------------------------------
// Format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Ips,
    Ups,
    Bps,
}

impl Format {
    pub fn name(self) -> &'static str {
        match self {
            Self::Ips => "IPS",
            Self::Ups => "UPS",
            Self::Bps => "BPS",
        }
    }

    /// Conventional file extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Ips => "ips",
            Self::Ups => "ups",
            Self::Bps => "bps",
        }
    }

    /// Whether the format carries source/target/patch CRC-32 values.
    pub fn has_checksums(self) -> bool {
        !matches!(self, Self::Ips)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identify a patch by its magic bytes.
pub fn detect_format(data: &[u8]) -> Result<Format> {
    if data.len() < MIN_DETECT_LEN {
        return Err(PatchError::InvalidFormat(format!(
            "patch too small to identify: {} bytes",
            data.len()
        )));
    }
    if ips::is_ips(data) {
        Ok(Format::Ips)
    } else if ups::is_ups(data) {
        Ok(Format::Ups)
    } else if bps::is_bps(data) {
        Ok(Format::Bps)
    } else {
        Err(PatchError::UnknownFormat)
    }
}

/// Read a file and identify its patch format.
pub fn detect_format_from_file(path: &Path) -> Result<Format> {
    detect_format(&io::read_file(path)?)
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Summary of a parsed patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchMetadata {
    pub format: Format,
    /// Declared source size; 0 for IPS.
    pub src_size: u64,
    /// Declared target size; for IPS the highest byte any record writes.
    pub target_size: u64,
    pub src_crc32: u32,
    pub target_crc32: u32,
    pub patch_crc32: u32,
    pub has_checksums: bool,
    /// Records (IPS), XOR blocks (UPS) or commands (BPS).
    pub record_count: usize,
    /// IPS only: four or more bytes follow the EOF marker.
    pub ips32: bool,
    /// BPS only: embedded metadata, if any.
    pub metadata: Option<String>,
}

// ---------------------------------------------------------------------------
// Patch
// ---------------------------------------------------------------------------

/// A parsed patch of any supported format.
#[derive(Debug, Clone)]
pub enum Patch {
    Ips(IpsPatch),
    Ups(UpsPatch),
    Bps(BpsPatch),
}

impl Patch {
    pub fn format(&self) -> Format {
        match self {
            Self::Ips(_) => Format::Ips,
            Self::Ups(_) => Format::Ups,
            Self::Bps(_) => Format::Bps,
        }
    }

    pub fn format_name(&self) -> &'static str {
        self.format().name()
    }

    pub fn metadata(&self) -> PatchMetadata {
        match self {
            Self::Ips(p) => PatchMetadata {
                format: Format::Ips,
                src_size: 0,
                target_size: p.target_size() as u64,
                src_crc32: 0,
                target_crc32: 0,
                patch_crc32: 0,
                has_checksums: false,
                record_count: p.records().len(),
                ips32: p.is_ips32(),
                metadata: None,
            },
            Self::Ups(p) => PatchMetadata {
                format: Format::Ups,
                src_size: p.src_size(),
                target_size: p.target_size(),
                src_crc32: p.src_crc32(),
                target_crc32: p.target_crc32(),
                patch_crc32: p.patch_crc32(),
                has_checksums: true,
                record_count: p.blocks().len(),
                ips32: false,
                metadata: None,
            },
            Self::Bps(p) => PatchMetadata {
                format: Format::Bps,
                src_size: p.src_size(),
                target_size: p.target_size(),
                src_crc32: p.src_crc32(),
                target_crc32: p.target_crc32(),
                patch_crc32: p.patch_crc32(),
                has_checksums: true,
                record_count: p.commands().len(),
                ips32: false,
                metadata: (!p.metadata_bytes().is_empty())
                    .then(|| p.metadata_string().into_owned()),
            },
        }
    }

    /// Apply to an in-memory source. Returns the complete target or an error,
    /// never a partial buffer.
    pub fn apply(&self, source: &[u8], opts: &PatchOptions) -> Result<Vec<u8>> {
        match self {
            Self::Ips(p) => p.apply(source, opts),
            Self::Ups(p) => p.apply(source, opts),
            Self::Bps(p) => p.apply(source, opts),
        }
    }

    /// Read `source_path`, apply, and write the result to `output_path`.
    ///
    /// The output file is only created once the target has been rebuilt and
    /// verified.
    pub fn apply_to_file(
        &self,
        source_path: &Path,
        output_path: &Path,
        opts: &PatchOptions,
    ) -> Result<ApplyStats> {
        let reader = io::open_file_reader_with(source_path, opts.use_mmap, opts.io_buffer_size)?;
        debug!(
            "{}: source {} ({} bytes, {})",
            self.format_name(),
            source_path.display(),
            reader.size(),
            if reader.is_mapped() { "mapped" } else { "buffered" }
        );

        let output = self.apply(reader.as_bytes(), opts)?;
        let output_sha256 = io::write_hashed(output_path, &output, opts.io_buffer_size)?;

        Ok(ApplyStats {
            format: self.format(),
            source_size: reader.size(),
            patch_size: self.as_bytes().len() as u64,
            output_size: output.len() as u64,
            output_sha256,
        })
    }

    /// Structural re-check; UPS and BPS also verify the patch's own CRC-32.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Ips(p) => p.validate(),
            Self::Ups(p) => p.validate(),
            Self::Bps(p) => p.validate(),
        }
    }

    /// Raw patch bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Ips(p) => p.as_bytes(),
            Self::Ups(p) => p.as_bytes(),
            Self::Bps(p) => p.as_bytes(),
        }
    }
}

/// Detect the format of `data` and parse it with the matching codec.
pub fn load_patch_from_memory(data: impl Into<Vec<u8>>) -> Result<Patch> {
    let data = data.into();
    let format = detect_format(&data)?;
    debug!("detected {format} patch ({} bytes)", data.len());
    Ok(match format {
        Format::Ips => Patch::Ips(IpsPatch::load(data)?),
        Format::Ups => Patch::Ups(UpsPatch::load(data)?),
        Format::Bps => Patch::Bps(BpsPatch::load(data)?),
    })
}

/// Read a patch file and parse it.
pub fn load_patch(path: &Path) -> Result<Patch> {
    load_patch_from_memory(io::read_file(path)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
