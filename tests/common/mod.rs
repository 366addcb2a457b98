// Patch builders shared by the integration tests.
//
// The crate only applies patches, so tests assemble them by hand. The BPS
// builder replays its own commands with a small reference model to produce
// the expected target independently of the library.

#![allow(dead_code)]

use romdelta::formats::crc32::crc32;
use romdelta::formats::varint;

// ---------------------------------------------------------------------------
// IPS
// ---------------------------------------------------------------------------

pub enum Ips<'a> {
    Literal(u32, &'a [u8]),
    Rle(u32, u16, u8),
}

pub fn ips_patch(records: &[Ips<'_>]) -> Vec<u8> {
    let mut out = b"PATCH".to_vec();
    for record in records {
        match record {
            Ips::Literal(offset, bytes) => {
                out.extend_from_slice(&offset.to_be_bytes()[1..]);
                out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
                out.extend_from_slice(bytes);
            }
            Ips::Rle(offset, count, value) => {
                out.extend_from_slice(&offset.to_be_bytes()[1..]);
                out.extend_from_slice(&[0, 0]);
                out.extend_from_slice(&count.to_be_bytes());
                out.push(*value);
            }
        }
    }
    out.extend_from_slice(b"EOF");
    out
}

// ---------------------------------------------------------------------------
// UPS
// ---------------------------------------------------------------------------

/// XOR diff of `source` and `target` as a UPS patch.
pub fn ups_patch(source: &[u8], target: &[u8]) -> Vec<u8> {
    let xor = |i: usize| source.get(i).copied().unwrap_or(0) ^ target[i];

    let mut out = b"UPS1".to_vec();
    varint::encode(source.len() as u64, &mut out);
    varint::encode(target.len() as u64, &mut out);

    let mut cursor = 0usize;
    let mut i = 0usize;
    while i < target.len() {
        if xor(i) == 0 {
            i += 1;
            continue;
        }
        varint::encode((i - cursor) as u64, &mut out);
        while i < target.len() && xor(i) != 0 {
            out.push(xor(i));
            i += 1;
        }
        out.push(0);
        cursor = i;
    }

    finish(out, source, target)
}

// ---------------------------------------------------------------------------
// BPS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bps {
    SourceRead(u64),
    TargetRead(u64),
    SourceCopy(u64, i64),
    TargetCopy(u64, i64),
}

pub fn encode_commands(commands: &[Bps]) -> Vec<u8> {
    let mut body = Vec::new();
    for command in commands {
        let (action, length, delta) = match *command {
            Bps::SourceRead(n) => (0, n, None),
            Bps::TargetRead(n) => (1, n, None),
            Bps::SourceCopy(n, d) => (2, n, Some(d)),
            Bps::TargetCopy(n, d) => (3, n, Some(d)),
        };
        varint::encode(((length - 1) << 2) | action, &mut body);
        if let Some(d) = delta {
            varint::encode_signed(d, &mut body);
        }
    }
    body
}

/// Replay `commands` against `source`. TargetRead bytes come from `blob`,
/// the bytes that follow the metadata.
pub fn bps_reference(source: &[u8], blob: &[u8], commands: &[Bps]) -> Vec<u8> {
    let mut target: Vec<u8> = Vec::new();
    let (mut src, mut tgt, mut lit) = (0usize, 0usize, 0usize);
    for command in commands {
        match *command {
            Bps::SourceRead(n) => {
                target.extend_from_slice(&source[src..src + n as usize]);
                src += n as usize;
            }
            Bps::TargetRead(n) => {
                target.extend_from_slice(&blob[lit..lit + n as usize]);
                lit += n as usize;
            }
            Bps::SourceCopy(n, d) => {
                src = (src as i64 + d) as usize;
                target.extend_from_slice(&source[src..src + n as usize]);
                src += n as usize;
            }
            Bps::TargetCopy(n, d) => {
                tgt = (tgt as i64 + d) as usize;
                for _ in 0..n {
                    target.push(target[tgt]);
                    tgt += 1;
                }
            }
        }
    }
    target
}

/// Build a BPS patch and return it with the target it produces.
pub fn bps_patch(source: &[u8], metadata: &[u8], commands: &[Bps]) -> (Vec<u8>, Vec<u8>) {
    let body = encode_commands(commands);
    let target = bps_reference(source, &body, commands);
    let patch = bps_raw(
        source.len() as u64,
        target.len() as u64,
        metadata,
        &body,
        crc32(source),
        crc32(&target),
    );
    (patch, target)
}

/// Assemble a BPS patch from explicit header fields and an encoded body.
pub fn bps_raw(
    src_size: u64,
    target_size: u64,
    metadata: &[u8],
    body: &[u8],
    src_crc: u32,
    target_crc: u32,
) -> Vec<u8> {
    let mut out = b"BPS1".to_vec();
    varint::encode(src_size, &mut out);
    varint::encode(target_size, &mut out);
    varint::encode(metadata.len() as u64, &mut out);
    out.extend_from_slice(metadata);
    out.extend_from_slice(body);
    out.extend_from_slice(&src_crc.to_le_bytes());
    out.extend_from_slice(&target_crc.to_le_bytes());
    let self_crc = crc32(&out);
    out.extend_from_slice(&self_crc.to_le_bytes());
    out
}

/// Turn arbitrary `(kind, length, delta)` triples into a command list that
/// is valid for a source of `source_len` bytes.
pub fn sanitize_commands(source_len: usize, raw: &[(u8, u16, i16)]) -> Vec<Bps> {
    let mut commands = Vec::new();
    let (mut src, mut tgt, mut out, mut lit) = (0usize, 0usize, 0usize, 0usize);

    for &(kind, len, delta) in raw {
        let len = usize::from(len.max(1));
        let command = match kind % 4 {
            0 => {
                let n = len.min(source_len - src);
                if n == 0 {
                    continue;
                }
                src += n;
                Bps::SourceRead(n as u64)
            }
            1 => {
                // Every encoded command is at least one byte long, so the
                // literal region always covers this many bytes.
                let n = len.min(commands.len() + 1 - lit);
                if n == 0 {
                    continue;
                }
                lit += n;
                Bps::TargetRead(n as u64)
            }
            2 => {
                if source_len == 0 {
                    continue;
                }
                let start = (src as i64 + i64::from(delta)).clamp(0, source_len as i64 - 1) as usize;
                let n = len.min(source_len - start);
                let d = start as i64 - src as i64;
                src = start + n;
                Bps::SourceCopy(n as u64, d)
            }
            _ => {
                if out == 0 {
                    continue;
                }
                let start = (tgt as i64 + i64::from(delta)).clamp(0, out as i64 - 1) as usize;
                let n = len.min(64);
                let d = start as i64 - tgt as i64;
                tgt = start + n;
                Bps::TargetCopy(n as u64, d)
            }
        };
        out += match command {
            Bps::SourceRead(n) | Bps::TargetRead(n) | Bps::SourceCopy(n, _) | Bps::TargetCopy(n, _) => {
                n as usize
            }
        };
        commands.push(command);
    }
    commands
}

// ---------------------------------------------------------------------------
// Shared footer
// ---------------------------------------------------------------------------

fn finish(mut out: Vec<u8>, source: &[u8], target: &[u8]) -> Vec<u8> {
    out.extend_from_slice(&crc32(source).to_le_bytes());
    out.extend_from_slice(&crc32(target).to_le_bytes());
    let self_crc = crc32(&out);
    out.extend_from_slice(&self_crc.to_le_bytes());
    out
}
