//! Flush Engine: deferred write-back of dirty image caches.
//!
//! The emulated drive writes in bursts. Flushing every write immediately
//! would thrash the SD card and blow the core's acknowledge deadline, so
//! the engine waits for the hardware quiet-period signal, then walks the
//! whole image back to the file in small bounded iterations.
//!
//! Per-drive state machine (state lives in the [`DriveRecord`]):
//!
//! | State    | Condition                          | One call does                         |
//! |----------|------------------------------------|---------------------------------------|
//! | Pending  | dirty, quiet period not elapsed    | nothing                               |
//! | Starting | dirty, quiet elapsed, not flushing | seek 0, capture size, mark flushing   |
//! | Flushing | flushing                           | write up to [`FLUSH_ITER_BYTES`]      |
//! | Flushed  | remaining hits 0                   | flush FAT buffer, clear dirty+flushing|
//!
//! Clean drives never reach the engine; the dispatcher only calls in when
//! the cache is dirty. A core write at any point clears `flushing` (see
//! [`DriveRecord::note_write`]), which restarts the pass from Pending.
//!
//! A seek, write or flush error is fatal. The cache is authoritative; if
//! the destination image cannot be updated the user must be told rather
//! than silently losing data.

use shell_core::regmap::{drivereg, DEV_DRIVE_CTL, WIN_WORDS};
use shell_core::Mmio;

use crate::fat::Volume;
use crate::vdr::{buffer_read, DriveRecord, FlushCursor};
use crate::{FatalCode, Hif, ShellError, ShellResult};

/// Bytes written back per engine call. One value for all drives for now.
pub const FLUSH_ITER_BYTES: usize = 100;

/// Quiet period the hardware enforces after the core's last write before
/// it asserts `CACHE_READY`. One value for all drives for now.
pub const ANTI_THRASH_MS: u32 = 2000;

/// What one engine call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStep {
    /// Quiet period not yet elapsed.
    Waiting,
    /// Pass set up: file rewound, cursor captured.
    Started,
    /// Advanced by the given byte count.
    Advanced(usize),
    /// Image fully written back; cache clean again.
    Completed,
}

/// Run one bounded flush iteration for a dirty drive.
pub fn step<M: Mmio, V: Volume>(
    hif: &mut Hif<M>,
    vol: &mut V,
    drive: usize,
    rec: &mut DriveRecord,
) -> ShellResult<FlushStep> {
    debug_assert!(rec.cache_dirty());
    let Some(handle) = rec.handle() else {
        // unreachable while the registry invariants hold
        return Ok(FlushStep::Waiting);
    };

    if !rec.flushing() {
        let ready = hif.with_device(DEV_DRIVE_CTL, drive as u16, |w| {
            w.read(drivereg::CACHE_READY)
        });
        if ready == 0 {
            return Ok(FlushStep::Waiting);
        }
        vol.seek(handle, 0, 0)
            .map_err(|_| ShellError::Fatal(FatalCode::FlushSeek))?;
        rec.set_cursor(FlushCursor {
            page: 0,
            offset: 0,
            remaining: rec.image_size(),
        });
        rec.set_flushing(true);
        log::debug!("drive {drive}: flush pass started ({} bytes)", rec.image_size());
        return Ok(FlushStep::Started);
    }

    let cursor = rec.cursor();
    let span = (cursor.remaining as usize).min(FLUSH_ITER_BYTES);
    let start = u32::from(cursor.page) * u32::from(WIN_WORDS) + u32::from(cursor.offset);

    let mut chunk = [0u8; FLUSH_ITER_BYTES];
    buffer_read(hif, rec.buffer_dev(), start, &mut chunk[..span]);
    for &b in &chunk[..span] {
        vol.write_byte(handle, b)
            .map_err(|_| ShellError::Fatal(FatalCode::FlushWrite))?;
    }

    let cursor = advance_cursor(cursor, span);
    rec.set_cursor(cursor);

    if cursor.remaining == 0 {
        vol.flush(handle)
            .map_err(|_| ShellError::Fatal(FatalCode::FlushSync))?;
        rec.set_clean();
        log::debug!("drive {drive}: flush pass complete");
        return Ok(FlushStep::Completed);
    }
    Ok(FlushStep::Advanced(span))
}

/// Move the cursor forward, carrying the offset into the page number when
/// it wraps past the window.
fn advance_cursor(cursor: FlushCursor, span: usize) -> FlushCursor {
    let linear = u32::from(cursor.page) * u32::from(WIN_WORDS) + u32::from(cursor.offset)
        + span as u32;
    FlushCursor {
        page: (linear / u32::from(WIN_WORDS)) as u16,
        offset: (linear % u32::from(WIN_WORDS)) as u16,
        remaining: cursor.remaining - span as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_advances_within_page() {
        let c = advance_cursor(
            FlushCursor { page: 0, offset: 0, remaining: 1000 },
            100,
        );
        assert_eq!(c, FlushCursor { page: 0, offset: 100, remaining: 900 });
    }

    #[test]
    fn cursor_wraps_page_boundary() {
        let c = advance_cursor(
            FlushCursor { page: 2, offset: 4050, remaining: 500 },
            100,
        );
        assert_eq!(c, FlushCursor { page: 3, offset: 54, remaining: 400 });
    }

    #[test]
    fn cursor_drains_to_zero() {
        let c = advance_cursor(
            FlushCursor { page: 42, offset: 2816, remaining: 64 },
            64,
        );
        assert_eq!(c.remaining, 0);
    }
}
