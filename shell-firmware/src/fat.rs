//! SD/FAT32 client: the thin seam to the external FAT32 driver.
//!
//! No retry happens in here; errors surface to the caller, which decides
//! between the retry prompt (card mount), the file browser (image load)
//! and the fatal path (cache flush).

use std::fmt;

/// Errors reported by the FAT32 driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// No card mounted, or the partition could not be mounted.
    NotMounted,
    /// Path does not exist.
    NotFound,
    /// Handle is stale or was never opened.
    BadHandle,
    /// Seek past the end of the file.
    SeekRange,
    /// The card or the controller reported a hardware error.
    Device,
    /// Write attempted on a read-only volume or file.
    WriteProtected,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FsError::NotMounted => "no mounted volume",
            FsError::NotFound => "file not found",
            FsError::BadHandle => "bad file handle",
            FsError::SeekRange => "seek out of range",
            FsError::Device => "device error",
            FsError::WriteProtected => "write protected",
        };
        f.write_str(s)
    }
}

impl std::error::Error for FsError {}

/// Opaque handle to an open file. Valid until closed or until the volume
/// is re-mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(pub u16);

/// The FAT32 driver surface the Shell consumes.
///
/// Byte-at-a-time read/write matches the driver's sector-buffered API;
/// the driver coalesces into sector writes internally. `flush` forces the
/// buffered sector out to the card.
pub trait Volume {
    /// Mount the given partition of the active SD slot.
    fn mount(&mut self, partition: u8) -> Result<(), FsError>;

    /// Open a file by absolute path.
    fn open(&mut self, path: &str) -> Result<FileHandle, FsError>;

    /// Create the file if missing, truncate if present, open for write.
    fn create(&mut self, path: &str) -> Result<FileHandle, FsError>;

    /// Close a handle. Closing an invalid handle is a no-op.
    fn close(&mut self, handle: FileHandle);

    /// File size as the driver's (lo, hi) word pair.
    fn size(&self, handle: FileHandle) -> Result<(u16, u16), FsError>;

    /// Seek to the absolute byte position given as a (lo, hi) word pair.
    fn seek(&mut self, handle: FileHandle, lo: u16, hi: u16) -> Result<(), FsError>;

    /// Read one byte; `None` at end of file.
    fn read_byte(&mut self, handle: FileHandle) -> Result<Option<u8>, FsError>;

    /// Write one byte at the current position.
    fn write_byte(&mut self, handle: FileHandle, byte: u8) -> Result<(), FsError>;

    /// Flush the driver's sector buffer to the card.
    fn flush(&mut self, handle: FileHandle) -> Result<(), FsError>;
}

/// Combine the driver's (lo, hi) size words into a byte count.
#[must_use]
pub fn size_bytes(lo: u16, hi: u16) -> u32 {
    (u32::from(hi) << 16) | u32::from(lo)
}

/// Split a byte position into the driver's (lo, hi) word pair.
#[must_use]
pub fn split_pos(pos: u32) -> (u16, u16) {
    (pos as u16, (pos >> 16) as u16)
}
