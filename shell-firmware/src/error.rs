//! Shell error taxonomy.
//!
//! Recoverable errors travel up to the dispatcher as ordinary `Result`s:
//! a failed card mount is retried by the user, a failed image load drops
//! back to the file browser. Fatal errors all funnel through
//! [`ShellError::Fatal`]; the main loop translates that single variant
//! into the on-screen halt routine and a code in the cartridge status
//! register.

use std::fmt;

use crate::fat::FsError;

/// Codes written to the cartridge status register on the fatal path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FatalCode {
    /// Seek failed while writing a dirty cache back to the image file.
    FlushSeek = 0xEE10,
    /// Byte write failed during cache write-back.
    FlushWrite = 0xEE11,
    /// FAT buffer flush failed after cache write-back.
    FlushSync = 0xEE12,
    /// Configuration file holds a byte outside {0, 1}.
    ConfigCorrupt = 0xEE20,
}

impl FatalCode {
    /// The code published to the cartridge status register.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Errors surfaced by Shell operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellError {
    /// SD card not mounted or card mount failed. The user is shown the
    /// code and prompted to retry; no state is lost.
    Mount(FsError),
    /// File open/read failed while mounting an image. The drive stays
    /// unmounted and the user returns to the file browser.
    ImageLoad(FsError),
    /// The image file size matches no supported fixed disk layout.
    UnsupportedImage { size: u32 },
    /// Unrecoverable. The cache would otherwise silently lose data.
    Fatal(FatalCode),
}

impl fmt::Display for ShellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShellError::Mount(e) => write!(f, "SD card mount failed: {e}"),
            ShellError::ImageLoad(e) => write!(f, "image load failed: {e}"),
            ShellError::UnsupportedImage { size } => {
                write!(f, "unsupported image size: {size} bytes")
            }
            ShellError::Fatal(code) => write!(f, "fatal error {:04X}", code.as_u16()),
        }
    }
}

impl std::error::Error for ShellError {}

pub type ShellResult<T> = Result<T, ShellError>;
