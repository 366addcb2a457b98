// BPS (Beat Patching System) codec.
//
// Layout:
//   "BPS1"
//   varint  source_size
//   varint  target_size
//   varint  metadata_size
//   metadata (metadata_size bytes)
//   command*  : varint ((length - 1) << 2 | action) [varint signed_delta]
//   u32 LE  source_crc32
//   u32 LE  target_crc32
//   u32 LE  patch_crc32   -- over every preceding byte
//
// Replay threads three cursors: a source cursor shared by SourceRead and
// SourceCopy, a target cursor for TargetCopy, and a literal cursor for
// TargetRead that starts right after the metadata and is independent of the
// command decoder.

use std::borrow::Cow;
use std::ops::Range;

use log::{debug, trace};

use super::crc32::crc32;
use super::{read_u32_le, varint};
use crate::error::{ChecksumTarget, PatchError, Result};
use crate::options::PatchOptions;

pub const BPS_MAGIC: &[u8; 4] = b"BPS1";

const FOOTER_LEN: usize = 12;

/// Upper bound on the up-front output reservation. Larger targets still
/// work, the buffer just grows on demand.
const PREALLOC_LIMIT: usize = 64 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BpsAction {
    SourceRead,
    TargetRead,
    SourceCopy,
    TargetCopy,
}

impl BpsAction {
    fn from_bits(bits: u64) -> Self {
        match bits & 3 {
            0 => Self::SourceRead,
            1 => Self::TargetRead,
            2 => Self::SourceCopy,
            _ => Self::TargetCopy,
        }
    }

    pub fn is_copy(self) -> bool {
        matches!(self, Self::SourceCopy | Self::TargetCopy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BpsCommand {
    pub action: BpsAction,
    /// Always at least 1.
    pub length: u64,
    /// Signed cursor adjustment; present only for the copy actions.
    pub offset_delta: Option<i64>,
}

// ---------------------------------------------------------------------------
// Parsed patch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BpsPatch {
    data: Vec<u8>,
    src_size: u64,
    target_size: u64,
    metadata: Range<usize>,
    /// First byte after the metadata; where TargetRead literals start.
    data_offset: usize,
    src_crc32: u32,
    target_crc32: u32,
    patch_crc32: u32,
    commands: Vec<BpsCommand>,
}

impl BpsPatch {
    pub fn load(data: impl Into<Vec<u8>>) -> Result<Self> {
        let data = data.into();
        check_envelope(&data)?;

        let footer = data.len() - FOOTER_LEN;
        let mut pos = BPS_MAGIC.len();
        let src_size = varint::decode(&data, &mut pos);
        let target_size = varint::decode(&data, &mut pos);
        let metadata_size = varint::decode(&data, &mut pos);
        if pos > footer {
            return Err(PatchError::InvalidHeader(format!(
                "BPS size fields overrun the checksum footer at offset {footer}"
            )));
        }

        let metadata_end = usize::try_from(metadata_size)
            .ok()
            .and_then(|len| pos.checked_add(len))
            .filter(|&end| end <= footer)
            .ok_or_else(|| {
                PatchError::InvalidFormat(format!(
                    "BPS metadata of {metadata_size} bytes at offset {pos} exceeds the patch"
                ))
            })?;
        let metadata = pos..metadata_end;
        let data_offset = metadata_end;
        pos = metadata_end;

        let mut commands = Vec::new();
        while pos < footer {
            let command_start = pos;
            let encoded = varint::decode(&data, &mut pos);
            let action = BpsAction::from_bits(encoded);
            let length = (encoded >> 2) + 1;
            let offset_delta = action
                .is_copy()
                .then(|| varint::decode_signed(&data, &mut pos));

            if pos > footer {
                return Err(PatchError::Corrupted(format!(
                    "BPS command at offset {command_start} overruns the checksum footer"
                )));
            }

            commands.push(BpsCommand {
                action,
                length,
                offset_delta,
            });
        }

        let src_crc32 = read_u32_le(&data, footer);
        let target_crc32 = read_u32_le(&data, footer + 4);
        let patch_crc32 = read_u32_le(&data, footer + 8);

        debug!(
            "BPS: loaded {} commands, source {src_size} bytes, target {target_size} bytes, {} bytes metadata",
            commands.len(),
            metadata.len()
        );

        Ok(Self {
            data,
            src_size,
            target_size,
            metadata,
            data_offset,
            src_crc32,
            target_crc32,
            patch_crc32,
            commands,
        })
    }

    pub fn apply(&self, source: &[u8], opts: &PatchOptions) -> Result<Vec<u8>> {
        if !opts.allow_size_mismatch && source.len() as u64 != self.src_size {
            return Err(PatchError::SourceSizeMismatch {
                expected: self.src_size,
                actual: source.len() as u64,
            });
        }
        if opts.verify_checksums {
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
        let literal_end = self.data.len() - FOOTER_LEN;

        let mut output: Vec<u8> = Vec::with_capacity(target_size.min(PREALLOC_LIMIT));
        let mut source_cursor: usize = 0;
        let mut target_cursor: usize = 0;
        let mut literal_cursor: usize = self.data_offset;

        for (index, command) in self.commands.iter().enumerate() {
            let length = usize::try_from(command.length)
                .ok()
                .filter(|&len| output.len().saturating_add(len) <= target_size)
                .ok_or(PatchError::TargetSizeMismatch {
                    expected: self.target_size,
                    actual: (output.len() as u64).saturating_add(command.length),
                })?;
            output.try_reserve(length).map_err(|_| {
                PatchError::InvalidFormat(format!(
                    "command {index}: {length} more output bytes do not fit in memory"
                ))
            })?;

            match command.action {
                BpsAction::SourceRead => {
                    let end = source_cursor
                        .checked_add(length)
                        .filter(|&end| end <= source.len())
                        .ok_or_else(|| {
                            PatchError::InvalidOffset(format!(
                                "command {index}: SourceRead of {length} bytes at {source_cursor} exceeds source size {}",
                                source.len()
                            ))
                        })?;
                    trace!("BPS: SourceRead {length} @ {source_cursor}");
                    output.extend_from_slice(&source[source_cursor..end]);
                    source_cursor = end;
                }
                BpsAction::TargetRead => {
                    let end = literal_cursor
                        .checked_add(length)
                        .filter(|&end| end <= literal_end)
                        .ok_or_else(|| {
                            PatchError::InvalidOffset(format!(
                                "command {index}: TargetRead of {length} bytes at {literal_cursor} runs into the checksum footer"
                            ))
                        })?;
                    trace!("BPS: TargetRead {length} @ {literal_cursor}");
                    output.extend_from_slice(&self.data[literal_cursor..end]);
                    literal_cursor = end;
                }
                BpsAction::SourceCopy => {
                    let delta = command.offset_delta.unwrap_or(0);
                    let start = offset_by(source_cursor, delta)
                        .filter(|&start| {
                            start
                                .checked_add(length)
                                .is_some_and(|end| end <= source.len())
                        })
                        .ok_or_else(|| {
                            PatchError::InvalidOffset(format!(
                                "command {index}: SourceCopy of {length} bytes at {source_cursor}{delta:+} is outside the source ({} bytes)",
                                source.len()
                            ))
                        })?;
                    trace!("BPS: SourceCopy {length} @ {start}");
                    output.extend_from_slice(&source[start..start + length]);
                    source_cursor = start + length;
                }
                BpsAction::TargetCopy => {
                    let delta = command.offset_delta.unwrap_or(0);
                    let start = offset_by(target_cursor, delta)
                        .filter(|&start| start < output.len())
                        .ok_or_else(|| {
                            PatchError::InvalidOffset(format!(
                                "command {index}: TargetCopy from {target_cursor}{delta:+} is outside the {} bytes written so far",
                                output.len()
                            ))
                        })?;
                    trace!("BPS: TargetCopy {length} @ {start}");
                    if start + length <= output.len() {
                        output.extend_from_within(start..start + length);
                    } else {
                        // Overlapping copy: each byte may be one this command
                        // just wrote.
                        for i in 0..length {
                            let byte = output[start + i];
                            output.push(byte);
                        }
                    }
                    target_cursor = start + length;
                }
            }
        }

        if output.len() != target_size {
            return Err(PatchError::TargetSizeMismatch {
                expected: self.target_size,
                actual: output.len() as u64,
            });
        }

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
            "BPS: applied {} commands, {} -> {} bytes",
            self.commands.len(),
            source.len(),
            output.len()
        );
        Ok(output)
    }

    /// Re-check the envelope and the patch's own CRC-32.
    pub fn validate(&self) -> Result<()> {
        check_envelope(&self.data)?;
        let actual = crc32(&self.data[..self.data.len() - 4]);
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

    /// Embedded metadata, usually XML. Invalid UTF-8 is replaced.
    pub fn metadata_string(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.metadata_bytes())
    }

    pub fn metadata_bytes(&self) -> &[u8] {
        &self.data[self.metadata.clone()]
    }

    pub fn commands(&self) -> &[BpsCommand] {
        &self.commands
    }

    pub fn data_offset(&self) -> usize {
        self.data_offset
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

pub fn is_bps(data: &[u8]) -> bool {
    data.starts_with(BPS_MAGIC)
}

fn check_envelope(data: &[u8]) -> Result<()> {
    if data.len() < BPS_MAGIC.len() + FOOTER_LEN {
        return Err(PatchError::InvalidFormat(format!(
            "BPS patch too small: {} bytes",
            data.len()
        )));
    }
    if !is_bps(data) {
        return Err(PatchError::InvalidHeader("missing 'BPS1' magic".into()));
    }
    Ok(())
}

/// `cursor + delta`, or `None` when the result is negative or overflows.
#[inline]
fn offset_by(cursor: usize, delta: i64) -> Option<usize> {
    let moved = i128::try_from(cursor).ok()? + i128::from(delta);
    usize::try_from(moved).ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
