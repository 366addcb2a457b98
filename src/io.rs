// File-level I/O for patch application.
//
// Sources are read whole, either through a buffered reader or, with the
// `mmap` feature, a read-only memory map. Outputs go through a `FileWriter`
// in one go once the target is complete. With the `file-io` feature a
// SHA-256 of the output is computed while it is written.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

#[cfg(feature = "file-io")]
use sha2::Digest;

use crate::error::{PatchError, Result};
use crate::formats::Format;
use crate::options::DEFAULT_IO_BUFFER_SIZE;

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Statistics returned by the file-level apply helpers.
#[derive(Debug, Clone)]
pub struct ApplyStats {
    /// Format of the applied patch.
    pub format: Format,
    /// Source file size in bytes.
    pub source_size: u64,
    /// Patch size in bytes.
    pub patch_size: u64,
    /// Reconstructed output size in bytes.
    pub output_size: u64,
    /// SHA-256 of the written output (if `file-io` feature is enabled).
    pub output_sha256: Option<[u8; 32]>,
}

// ---------------------------------------------------------------------------
// Readers
// ---------------------------------------------------------------------------

/// Whole-file read access.
pub trait FileReader {
    /// File size in bytes.
    fn size(&self) -> u64;

    /// The full contents.
    fn as_bytes(&self) -> &[u8];

    /// Whether the contents are memory-mapped rather than copied.
    fn is_mapped(&self) -> bool {
        false
    }

    /// Copy the full contents.
    fn read_all(&self) -> Result<Vec<u8>> {
        Ok(self.as_bytes().to_vec())
    }

    /// Copy `len` bytes starting at `offset`.
    fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let bytes = self.as_bytes();
        usize::try_from(offset)
            .ok()
            .and_then(|start| Some(start..start.checked_add(len)?))
            .and_then(|range| bytes.get(range))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                PatchError::InvalidOffset(format!(
                    "range {offset}+{len} is outside a {} byte file",
                    bytes.len()
                ))
            })
    }
}

/// Reads the whole file into memory through a `BufReader`.
pub struct BufferedFileReader {
    data: Vec<u8>,
}

impl BufferedFileReader {
    pub fn open(path: &Path) -> Result<Self> {
        Self::with_capacity(path, DEFAULT_IO_BUFFER_SIZE)
    }

    pub fn with_capacity(path: &Path, buf_size: usize) -> Result<Self> {
        let file = open_existing(path)?;
        let len_hint = file.metadata().map(|m| m.len() as usize).unwrap_or(0);
        let mut reader = BufReader::with_capacity(buf_size.max(1), file);
        let mut data = Vec::with_capacity(len_hint);
        reader.read_to_end(&mut data)?;
        Ok(Self { data })
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl FileReader for BufferedFileReader {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn read_all(&self) -> Result<Vec<u8>> {
        Ok(self.data.clone())
    }
}

/// Read-only memory map of the whole file.
#[cfg(feature = "mmap")]
pub struct MappedFileReader {
    map: memmap2::Mmap,
}

#[cfg(feature = "mmap")]
impl MappedFileReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = open_existing(path)?;
        // SAFETY: the mapping is only read, and patch sources are not expected
        // to be modified by another process while a patch is being applied.
        let map = unsafe { memmap2::Mmap::map(&file)? };
        Ok(Self { map })
    }
}

#[cfg(feature = "mmap")]
impl FileReader for MappedFileReader {
    fn size(&self) -> u64 {
        self.map.len() as u64
    }

    fn as_bytes(&self) -> &[u8] {
        &self.map
    }

    fn is_mapped(&self) -> bool {
        true
    }
}

/// Open `path` for reading with the default buffer size.
pub fn open_file_reader(path: &Path, prefer_mmap: bool) -> Result<Box<dyn FileReader>> {
    open_file_reader_with(path, prefer_mmap, DEFAULT_IO_BUFFER_SIZE)
}

/// Open `path` for reading. With `prefer_mmap` (and the `mmap` feature) a
/// memory map is tried first; empty files and mapping failures fall back to
/// the buffered reader.
pub fn open_file_reader_with(
    path: &Path,
    prefer_mmap: bool,
    buf_size: usize,
) -> Result<Box<dyn FileReader>> {
    #[cfg(feature = "mmap")]
    if prefer_mmap {
        let len = open_existing(path)?.metadata()?.len();
        if len > 0 {
            match MappedFileReader::open(path) {
                Ok(reader) => return Ok(Box::new(reader)),
                Err(e) => log::debug!(
                    "mmap of {} failed ({e}), using buffered read",
                    path.display()
                ),
            }
        }
    }
    #[cfg(not(feature = "mmap"))]
    let _ = prefer_mmap;

    Ok(Box::new(BufferedFileReader::with_capacity(path, buf_size)?))
}

/// Read a whole file.
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    Ok(BufferedFileReader::open(path)?.into_inner())
}

fn open_existing(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => PatchError::FileNotFound(path.to_path_buf()),
        _ => PatchError::Io(e),
    })
}

// ---------------------------------------------------------------------------
// Writers
// ---------------------------------------------------------------------------

/// Sequential and positioned writes to a file.
pub trait FileWriter {
    fn write(&mut self, data: &[u8]) -> Result<()>;
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
}

/// `BufWriter` over a newly created (or truncated) file.
pub struct BufferedFileWriter {
    inner: BufWriter<File>,
}

impl BufferedFileWriter {
    pub fn create(path: &Path) -> Result<Self> {
        Self::with_capacity(path, DEFAULT_IO_BUFFER_SIZE)
    }

    pub fn with_capacity(path: &Path, buf_size: usize) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            inner: BufWriter::with_capacity(buf_size.max(1), file),
        })
    }
}

impl FileWriter for BufferedFileWriter {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data)?;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        // Seeking a BufWriter flushes it first.
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

/// Create (or truncate) `path` with the default buffer size.
pub fn create_file_writer(path: &Path) -> Result<Box<dyn FileWriter>> {
    create_file_writer_with(path, DEFAULT_IO_BUFFER_SIZE)
}

pub fn create_file_writer_with(path: &Path, buf_size: usize) -> Result<Box<dyn FileWriter>> {
    Ok(Box::new(BufferedFileWriter::with_capacity(path, buf_size)?))
}

/// Write `data` to `path` through a [`FileWriter`], returning its SHA-256
/// when the `file-io` feature is enabled.
pub fn write_hashed(path: &Path, data: &[u8], buf_size: usize) -> Result<Option<[u8; 32]>> {
    let mut writer = create_file_writer_with(path, buf_size)?;

    #[cfg(feature = "file-io")]
    let output_sha256 = {
        let mut hashing_writer = HashingWriter {
            inner: writer.as_mut(),
            hasher: sha2::Sha256::new(),
        };
        hashing_writer.write(data)?;
        hashing_writer.flush()?;
        Some(hashing_writer.hasher.finalize().into())
    };

    #[cfg(not(feature = "file-io"))]
    let output_sha256: Option<[u8; 32]> = {
        writer.write(data)?;
        writer.flush()?;
        None
    };

    Ok(output_sha256)
}

// ---------------------------------------------------------------------------
// Hashing writer (used with file-io feature)
// ---------------------------------------------------------------------------

/// Hashes everything written sequentially through it.
#[cfg(feature = "file-io")]
struct HashingWriter<'a> {
    inner: &'a mut dyn FileWriter,
    hasher: sha2::Sha256,
}

#[cfg(feature = "file-io")]
impl HashingWriter<'_> {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write(data)?;
        self.hasher.update(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}

/// Lowercase hex rendering of a digest.
pub fn hex_digest(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
