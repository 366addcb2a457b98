// IPS (International Patching System) codec.
//
// Layout:
//   "PATCH"
//   record*  : offset(u24 BE) size(u16 BE) [data(size) | rle_count(u16 BE) value(u8)]
//   "EOF"
//   [trailing bytes]  -- four or more mark the patch as IPS32 (reported only)
//
// A size of zero tags an RLE record. There is no checksum of any kind.

use std::ops::Range;

use log::{debug, trace};

use crate::error::{PatchError, Result};
use crate::options::PatchOptions;

pub const IPS_MAGIC: &[u8; 5] = b"PATCH";
pub const IPS_EOF: &[u8; 3] = b"EOF";

const RECORD_HEADER_LEN: usize = 5;
const RLE_BODY_LEN: usize = 3;
/// Bytes after the EOF marker that flag the 32-bit variant.
const IPS32_TRAILER_LEN: usize = 4;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// What a record writes at its offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpsPayload {
    /// Literal bytes, stored as a range into the patch buffer.
    Literal(Range<usize>),
    /// `count` repetitions of `value`.
    Rle { count: u16, value: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpsRecord {
    /// Absolute 24-bit target offset.
    pub offset: u32,
    pub payload: IpsPayload,
}

impl IpsRecord {
    /// Number of bytes this record writes.
    pub fn len(&self) -> usize {
        match &self.payload {
            IpsPayload::Literal(range) => range.len(),
            IpsPayload::Rle { count, .. } => *count as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One past the last byte written.
    pub fn end(&self) -> usize {
        self.offset as usize + self.len()
    }

    pub fn is_rle(&self) -> bool {
        matches!(self.payload, IpsPayload::Rle { .. })
    }
}

// ---------------------------------------------------------------------------
// Parsed patch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct IpsPatch {
    data: Vec<u8>,
    records: Vec<IpsRecord>,
    ips32: bool,
}

impl IpsPatch {
    /// Parse an IPS patch. Literal record data stays in the owned buffer.
    pub fn load(data: impl Into<Vec<u8>>) -> Result<Self> {
        let data = data.into();
        check_envelope(&data)?;

        let mut records = Vec::new();
        let mut ips32 = false;
        let mut pos = IPS_MAGIC.len();

        while pos + IPS_EOF.len() <= data.len() {
            if &data[pos..pos + IPS_EOF.len()] == IPS_EOF {
                ips32 = pos + IPS_EOF.len() + IPS32_TRAILER_LEN <= data.len();
                break;
            }

            if pos + RECORD_HEADER_LEN > data.len() {
                return Err(PatchError::Corrupted(format!(
                    "truncated IPS record header at offset {pos}"
                )));
            }

            let offset = u32::from(data[pos]) << 16
                | u32::from(data[pos + 1]) << 8
                | u32::from(data[pos + 2]);
            let size = u16::from_be_bytes([data[pos + 3], data[pos + 4]]);
            let record_start = pos;
            pos += RECORD_HEADER_LEN;

            let payload = if size == 0 {
                if pos + RLE_BODY_LEN > data.len() {
                    return Err(PatchError::Corrupted(format!(
                        "truncated RLE record at offset {record_start}"
                    )));
                }
                let count = u16::from_be_bytes([data[pos], data[pos + 1]]);
                let value = data[pos + 2];
                pos += RLE_BODY_LEN;
                if count == 0 {
                    return Err(PatchError::Corrupted(format!(
                        "zero-length RLE record at offset {record_start}"
                    )));
                }
                IpsPayload::Rle { count, value }
            } else {
                let end = pos + size as usize;
                if end > data.len() {
                    return Err(PatchError::Corrupted(format!(
                        "truncated data record at offset {record_start}: need {size} bytes, {} available",
                        data.len() - pos
                    )));
                }
                let range = pos..end;
                pos = end;
                IpsPayload::Literal(range)
            };

            records.push(IpsRecord { offset, payload });
        }

        debug!(
            "IPS: loaded {} records ({} bytes){}",
            records.len(),
            data.len(),
            if ips32 { ", IPS32 trailer" } else { "" }
        );

        Ok(Self {
            data,
            records,
            ips32,
        })
    }

    /// Replay every record over a copy of `source`, growing it with zeros
    /// where a record writes past the end.
    ///
    /// IPS has no checksums, so `_opts` has nothing to enforce.
    pub fn apply(&self, source: &[u8], _opts: &PatchOptions) -> Result<Vec<u8>> {
        let mut output = source.to_vec();

        for record in &self.records {
            let start = record.offset as usize;
            let end = record.end();
            if end > output.len() {
                output.resize(end, 0);
            }

            match &record.payload {
                IpsPayload::Literal(range) => {
                    trace!("IPS: literal {} bytes at {start:#08X}", range.len());
                    output[start..end].copy_from_slice(&self.data[range.clone()]);
                }
                IpsPayload::Rle { count, value } => {
                    trace!("IPS: rle {count} x {value:#04X} at {start:#08X}");
                    output[start..end].fill(*value);
                }
            }
        }

        debug!(
            "IPS: applied {} records, {} -> {} bytes",
            self.records.len(),
            source.len(),
            output.len()
        );
        Ok(output)
    }

    pub fn validate(&self) -> Result<()> {
        check_envelope(&self.data)
    }

    pub fn records(&self) -> &[IpsRecord] {
        &self.records
    }

    /// Literal bytes of a record, or `None` for RLE records.
    pub fn literal(&self, record: &IpsRecord) -> Option<&[u8]> {
        match &record.payload {
            IpsPayload::Literal(range) => self.data.get(range.clone()),
            IpsPayload::Rle { .. } => None,
        }
    }

    /// Whether four or more bytes follow the EOF marker.
    ///
    /// Informational only: records are always read with 24-bit offsets.
    pub fn is_ips32(&self) -> bool {
        self.ips32
    }

    /// Highest `offset + length` over all records (0 when there are none).
    pub fn target_size(&self) -> usize {
        self.records.iter().map(IpsRecord::end).max().unwrap_or(0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Whether `data` starts with the IPS magic.
pub fn is_ips(data: &[u8]) -> bool {
    data.starts_with(IPS_MAGIC)
}

fn check_envelope(data: &[u8]) -> Result<()> {
    if data.len() < IPS_MAGIC.len() + IPS_EOF.len() {
        return Err(PatchError::InvalidFormat(format!(
            "IPS patch too small: {} bytes",
            data.len()
        )));
    }
    if !is_ips(data) {
        return Err(PatchError::InvalidHeader("missing 'PATCH' magic".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
