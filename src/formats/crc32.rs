// CRC-32 (IEEE 802.3, reflected polynomial 0xEDB88320).
//
// With the `crc32` feature the SIMD-dispatching `crc32fast` crate does the
// work; otherwise a byte-at-a-time table built at compile time is used. Both
// paths produce identical values: init 0xFFFFFFFF, final XOR 0xFFFFFFFF.

const POLYNOMIAL: u32 = 0xEDB8_8320;

#[cfg_attr(feature = "crc32", allow(dead_code))]
static TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ POLYNOMIAL
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// One-shot CRC-32 of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(data);
    hasher.finalize()
}

// ---------------------------------------------------------------------------
// Incremental hasher
// ---------------------------------------------------------------------------

/// Incremental CRC-32 over several slices.
#[derive(Clone)]
pub struct Crc32 {
    #[cfg(feature = "crc32")]
    inner: crc32fast::Hasher,
    #[cfg(not(feature = "crc32"))]
    state: u32,
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc32 {
    pub fn new() -> Self {
        #[cfg(feature = "crc32")]
        {
            Self {
                inner: crc32fast::Hasher::new(),
            }
        }
        #[cfg(not(feature = "crc32"))]
        {
            Self { state: 0xFFFF_FFFF }
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        #[cfg(feature = "crc32")]
        {
            self.inner.update(data);
        }
        #[cfg(not(feature = "crc32"))]
        {
            let mut crc = self.state;
            for &byte in data {
                crc = TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize] ^ (crc >> 8);
            }
            self.state = crc;
        }
    }

    pub fn finalize(self) -> u32 {
        #[cfg(feature = "crc32")]
        {
            self.inner.finalize()
        }
        #[cfg(not(feature = "crc32"))]
        {
            self.state ^ 0xFFFF_FFFF
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
