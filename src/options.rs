// Options accepted by `Patch::apply` and the file-level helpers.

/// Default I/O buffer size for buffered readers and writers.
pub const DEFAULT_IO_BUFFER_SIZE: usize = 64 * 1024; // 64 KiB

/// Configuration for applying a patch.
#[derive(Debug, Clone)]
pub struct PatchOptions {
    /// Enforce the source/target CRC-32 checks (UPS, BPS).
    pub verify_checksums: bool,
    /// Accept a source whose length differs from the declared source size.
    pub allow_size_mismatch: bool,
    /// Prefer memory-mapped reads when the `mmap` feature is enabled.
    pub use_mmap: bool,
    /// Buffer size for buffered file readers/writers.
    pub io_buffer_size: usize,
    /// Copy the original file aside before an in-place apply.
    pub create_backup: bool,
    /// Suffix appended to the file name to form the backup path.
    pub backup_suffix: String,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            verify_checksums: true,
            allow_size_mismatch: false,
            use_mmap: true,
            io_buffer_size: DEFAULT_IO_BUFFER_SIZE,
            create_backup: false,
            backup_suffix: ".bak".to_string(),
        }
    }
}

impl PatchOptions {
    /// Options with checksum verification turned off.
    pub fn unchecked() -> Self {
        Self {
            verify_checksums: false,
            ..Default::default()
        }
    }
}
