// UPS (Universal Patching System) codec.
//
// Layout:
//   "UPS1"
//   varint  source_size
//   varint  target_size
//   block*  : varint relative_offset, xor_byte* (non-zero), 0x00
//   u32 LE  source_crc32
//   u32 LE  target_crc32
//   u32 LE  patch_crc32   -- over every preceding byte
//
// Block offsets are relative to a cursor that persists across blocks. Each
// stored XOR byte moves the cursor forward by one; the terminator does not.

use log::{debug, trace};

use super::crc32::crc32;
use super::{read_u32_le, varint};
use crate::error::{ChecksumTarget, PatchError, Result};
use crate::options::PatchOptions;

pub const UPS_MAGIC: &[u8; 4] = b"UPS1";

/// Three little-endian CRC-32 values close every UPS patch.
const FOOTER_LEN: usize = 12;

// ---------------------------------------------------------------------------
// Blocks
// ---------------------------------------------------------------------------

/// A run of XOR bytes at an absolute output offset. `bytes` never holds 0x00.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XorBlock {
    pub offset: usize,
    pub bytes: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Parsed patch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct UpsPatch {
    data: Vec<u8>,
    src_size: u64,
    target_size: u64,
    src_crc32: u32,
    target_crc32: u32,
    patch_crc32: u32,
    blocks: Vec<XorBlock>,
}

impl UpsPatch {
    pub fn load(data: impl Into<Vec<u8>>) -> Result<Self> {
        let data = data.into();
        check_envelope(&data)?;

        let footer = data.len() - FOOTER_LEN;
        let mut pos = UPS_MAGIC.len();
        let src_size = varint::decode(&data, &mut pos);
        let target_size = varint::decode(&data, &mut pos);
        if pos > footer {
            return Err(PatchError::InvalidHeader(format!(
                "UPS size fields overrun the checksum footer at offset {footer}"
            )));
        }

        let mut blocks = Vec::new();
        let mut cursor: usize = 0;

        while pos < footer {
            let block_start = pos;
            let relative = varint::decode(&data, &mut pos);
            if pos > footer {
                return Err(PatchError::Corrupted(format!(
                    "UPS block offset at {block_start} overruns the checksum footer"
                )));
            }
            cursor = usize::try_from(relative)
                .ok()
                .and_then(|rel| cursor.checked_add(rel))
                .ok_or_else(|| {
                    PatchError::Corrupted(format!(
                        "UPS block offset {relative} at {block_start} overflows"
                    ))
                })?;

            let offset = cursor;
            let mut bytes = Vec::new();
            while pos < footer {
                let byte = data[pos];
                pos += 1;
                if byte == 0 {
                    break;
                }
                bytes.push(byte);
                cursor = cursor.checked_add(1).ok_or_else(|| {
                    PatchError::Corrupted(format!(
                        "UPS block at {block_start} runs past the addressable range"
                    ))
                })?;
            }

            if !bytes.is_empty() {
                trace!("UPS: block of {} bytes at {offset:#X}", bytes.len());
                blocks.push(XorBlock { offset, bytes });
            }
        }

        let src_crc32 = read_u32_le(&data, footer);
        let target_crc32 = read_u32_le(&data, footer + 4);
        let patch_crc32 = read_u32_le(&data, footer + 8);

        debug!(
            "UPS: loaded {} blocks, source {src_size} bytes, target {target_size} bytes",
            blocks.len()
        );

        Ok(Self {
            data,
            src_size,
            target_size,
            src_crc32,
            target_crc32,
            patch_crc32,
            blocks,
        })
    }

    pub fn apply(&self, source: &[u8], opts: &PatchOptions) -> Result<Vec<u8>> {
        if opts.verify_checksums {
            if !opts.allow_size_mismatch && source.len() as u64 != self.src_size {
                return Err(PatchError::SourceSizeMismatch {
                    expected: self.src_size,
                    actual: source.len() as u64,
                });
            }
            let actual = crc32(source);
            if actual != self.src_crc32 {
                return Err(PatchError::checksum(
                    ChecksumTarget::Source,
                    self.src_crc32,
                    actual,
                ));
            }
        }

        let target_size = usize::try_from(self.target_size).map_err(|_| {
            PatchError::InvalidFormat(format!(
                "target size {} does not fit in memory",
                self.target_size
            ))
        })?;

        let len = source.len().max(target_size);
        let mut output = Vec::new();
        output.try_reserve_exact(len).map_err(|_| {
            PatchError::InvalidFormat(format!(
                "target size {} does not fit in memory",
                self.target_size
            ))
        })?;
        output.extend_from_slice(source);
        output.resize(len, 0);

        for block in &self.blocks {
            for (i, &byte) in block.bytes.iter().enumerate() {
                if let Some(slot) = output.get_mut(block.offset.saturating_add(i)) {
                    *slot ^= byte;
                }
            }
        }
        output.resize(target_size, 0);

        if opts.verify_checksums {
            let actual = crc32(&output);
            if actual != self.target_crc32 {
                return Err(PatchError::checksum(
                    ChecksumTarget::Target,
                    self.target_crc32,
                    actual,
                ));
            }
        }

        debug!(
            "UPS: applied {} blocks, {} -> {} bytes",
            self.blocks.len(),
            source.len(),
            output.len()
        );
        Ok(output)
    }

    /// Re-check the envelope and the patch's own CRC-32.
    pub fn validate(&self) -> Result<()> {
        check_envelope(&self.data)?;
        let body = &self.data[..self.data.len() - 4];
        let actual = crc32(body);
        if actual != self.patch_crc32 {
            return Err(PatchError::checksum(
                ChecksumTarget::Patch,
                self.patch_crc32,
                actual,
            ));
        }
        Ok(())
    }

    /// Check a source/target pair against the declared CRC-32 values.
    pub fn verify_checksums(&self, source: &[u8], target: &[u8]) -> Result<()> {
        let actual = crc32(source);
        if actual != self.src_crc32 {
            return Err(PatchError::checksum(
                ChecksumTarget::Source,
                self.src_crc32,
                actual,
            ));
        }
        let actual = crc32(target);
        if actual != self.target_crc32 {
            return Err(PatchError::checksum(
                ChecksumTarget::Target,
                self.target_crc32,
                actual,
            ));
        }
        Ok(())
    }

    pub fn blocks(&self) -> &[XorBlock] {
        &self.blocks
    }

    pub fn src_size(&self) -> u64 {
        self.src_size
    }

    pub fn target_size(&self) -> u64 {
        self.target_size
    }

    pub fn src_crc32(&self) -> u32 {
        self.src_crc32
    }

    pub fn target_crc32(&self) -> u32 {
        self.target_crc32
    }

    pub fn patch_crc32(&self) -> u32 {
        self.patch_crc32
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

pub fn is_ups(data: &[u8]) -> bool {
    data.starts_with(UPS_MAGIC)
}

fn check_envelope(data: &[u8]) -> Result<()> {
    if data.len() < UPS_MAGIC.len() + FOOTER_LEN {
        return Err(PatchError::InvalidFormat(format!(
            "UPS patch too small: {} bytes",
            data.len()
        )));
    }
    if !is_ups(data) {
        return Err(PatchError::InvalidHeader("missing 'UPS1' magic".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
