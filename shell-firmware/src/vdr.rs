//! Virtual-Drive Registry: one record per logical drive.
//!
//! A record tracks what is mounted, whether the memory-mapped image
//! buffer has unflushed writes, and where a paused flush pass stands.
//! Invariants held at every main-loop boundary:
//! - mounted implies an open file handle and an image buffer device,
//! - a dirty cache implies mounted,
//! - an active flush implies a dirty cache.

use log::{debug, info};
use shell_core::regmap::{drivereg, image_device, DEV_DRIVE_CTL, MAX_DRIVES, WIN_WORDS};
use shell_core::Mmio;

use crate::fat::{size_bytes, split_pos, FileHandle, Volume};
use crate::{FatalCode, Hif, ShellError, ShellResult};

/// Standard 35-track disk image (683 sectors of 256 bytes).
pub const IMAGE_SIZE_35: u32 = 174_848;
/// Extended 40-track disk image.
pub const IMAGE_SIZE_40: u32 = 196_608;

/// Image format discriminator surfaced to the emulated core.
///
/// Only the fixed, error-byte-free layouts are supported; anything else
/// is rejected at mount time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ImageFormat {
    /// 35-track disk image.
    Disk35 = 0,
    /// 40-track disk image.
    Disk40 = 1,
}

impl ImageFormat {
    /// Recognise a format from the exact file size.
    #[must_use]
    pub fn from_size(size: u32) -> Option<Self> {
        match size {
            IMAGE_SIZE_35 => Some(ImageFormat::Disk35),
            IMAGE_SIZE_40 => Some(ImageFormat::Disk40),
            _ => None,
        }
    }

    #[must_use]
    pub const fn id(self) -> u16 {
        self as u16
    }
}

/// Saved position of a flush pass between bounded iterations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushCursor {
    /// 4-KiB page within the image buffer.
    pub page: u16,
    /// Word offset within the page.
    pub offset: u16,
    /// Bytes still to write back.
    pub remaining: u32,
}

/// State of one virtual drive.
#[derive(Debug)]
pub struct DriveRecord {
    mounted: bool,
    format: Option<ImageFormat>,
    read_only: bool,
    handle: Option<FileHandle>,
    image_name: Option<String>,
    image_size: u32,
    buffer_dev: u16,
    cache_dirty: bool,
    flushing: bool,
    cursor: FlushCursor,
    menu_group: Option<u8>,
    mount_snapshot: bool,
}

impl DriveRecord {
    fn new(drive: usize) -> Self {
        Self {
            mounted: false,
            format: None,
            read_only: false,
            handle: None,
            image_name: None,
            image_size: 0,
            buffer_dev: image_device(drive),
            cache_dirty: false,
            flushing: false,
            cursor: FlushCursor::default(),
            menu_group: None,
            mount_snapshot: false,
        }
    }

    #[must_use]
    pub fn mounted(&self) -> bool {
        self.mounted
    }

    #[must_use]
    pub fn read_only(&self) -> bool {
        self.read_only
    }

    #[must_use]
    pub fn format(&self) -> Option<ImageFormat> {
        self.format
    }

    #[must_use]
    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    #[must_use]
    pub fn image_name(&self) -> Option<&str> {
        self.image_name.as_deref()
    }

    #[must_use]
    pub fn handle(&self) -> Option<FileHandle> {
        self.handle
    }

    /// Image buffer device id on the selector bus.
    #[must_use]
    pub fn buffer_dev(&self) -> u16 {
        self.buffer_dev
    }

    #[must_use]
    pub fn cache_dirty(&self) -> bool {
        self.cache_dirty
    }

    #[must_use]
    pub fn flushing(&self) -> bool {
        self.flushing
    }

    #[must_use]
    pub fn cursor(&self) -> FlushCursor {
        self.cursor
    }

    pub(crate) fn set_cursor(&mut self, cursor: FlushCursor) {
        self.cursor = cursor;
    }

    pub(crate) fn set_flushing(&mut self, flushing: bool) {
        self.flushing = flushing;
    }

    pub(crate) fn set_clean(&mut self) {
        self.cache_dirty = false;
        self.flushing = false;
    }

    /// A serviced write: the cache diverges from the card and any flush
    /// pass in progress restarts from scratch.
    pub(crate) fn note_write(&mut self) {
        self.cache_dirty = true;
        self.flushing = false;
    }

    #[must_use]
    pub fn menu_group(&self) -> Option<u8> {
        self.menu_group
    }

    pub fn set_menu_group(&mut self, group: Option<u8>) {
        self.menu_group = group;
    }

    fn invariants_ok(&self) -> bool {
        if self.mounted && (self.handle.is_none() || self.image_name.is_none()) {
            return false;
        }
        if self.cache_dirty && !self.mounted {
            return false;
        }
        if self.flushing && !self.cache_dirty {
            return false;
        }
        true
    }
}

/// The registry: a fixed array of records plus the pending menu feed.
#[derive(Debug)]
pub struct Vdr {
    drives: [DriveRecord; MAX_DRIVES],
    menu_changes: Vec<(u8, bool)>,
}

impl Default for Vdr {
    fn default() -> Self {
        Self::new()
    }
}

impl Vdr {
    #[must_use]
    pub fn new() -> Self {
        Self {
            drives: std::array::from_fn(DriveRecord::new),
            menu_changes: Vec::new(),
        }
    }

    #[must_use]
    pub fn drive(&self, n: usize) -> &DriveRecord {
        &self.drives[n]
    }

    pub fn drive_mut(&mut self, n: usize) -> &mut DriveRecord {
        &mut self.drives[n]
    }

    #[must_use]
    pub fn mounted(&self, n: usize) -> bool {
        self.drives[n].mounted
    }

    #[must_use]
    pub fn menu_group_of(&self, n: usize) -> Option<u8> {
        self.drives[n].menu_group
    }

    /// Mount status changes since the last drain, in occurrence order.
    /// The menu collaborator consumes these to keep its visual state in
    /// step with `mount_snapshot`.
    pub fn take_menu_changes(&mut self) -> Vec<(u8, bool)> {
        std::mem::take(&mut self.menu_changes)
    }

    fn record_mount_change(&mut self, n: usize) {
        let rec = &mut self.drives[n];
        if rec.mount_snapshot != rec.mounted {
            rec.mount_snapshot = rec.mounted;
            if let Some(group) = rec.menu_group {
                self.menu_changes.push((group, rec.mounted));
            }
        }
    }

    /// All records satisfy the loop-boundary invariants.
    #[must_use]
    pub fn invariants_ok(&self) -> bool {
        self.drives.iter().all(DriveRecord::invariants_ok)
    }

    /// Latch size/read-only/type into the core-facing registers and pulse
    /// the mount bit for one cycle. The core samples the auxiliaries on
    /// the rising edge; they are cleared after the pulse.
    pub fn strobe_mount<M: Mmio>(
        hif: &mut Hif<M>,
        drive: usize,
        size: u32,
        read_only: bool,
        image_type: u16,
    ) {
        let (size_lo, size_hi) = split_pos(size);
        hif.with_device(DEV_DRIVE_CTL, drive as u16, |w| {
            w.write(drivereg::MOUNT_TYPE, image_type);
            w.write(drivereg::MOUNT_RO, u16::from(read_only));
            w.write(drivereg::MOUNT_SIZE_LO, size_lo);
            w.write(drivereg::MOUNT_SIZE_HI, size_hi);
            w.write(drivereg::MOUNT, 1);
            w.write(drivereg::MOUNT, 0);
            w.write(drivereg::MOUNT_SIZE_LO, 0);
            w.write(drivereg::MOUNT_SIZE_HI, 0);
            w.write(drivereg::MOUNT_RO, 0);
            w.write(drivereg::MOUNT_TYPE, 0);
        });
    }

    /// Mount `path` on drive `n`: load the image into the drive's buffer
    /// and announce it to the core.
    ///
    /// Mounting the image that is already mounted is a no-op: the cache
    /// state is preserved and the core sees no new pulse.
    pub fn mount<M: Mmio, V: Volume>(
        &mut self,
        hif: &mut Hif<M>,
        vol: &mut V,
        n: usize,
        path: &str,
        read_only: bool,
    ) -> ShellResult<()> {
        if self.drives[n].mounted && self.drives[n].image_name.as_deref() == Some(path) {
            debug!("drive {n}: {path} already mounted");
            return Ok(());
        }
        if self.drives[n].mounted {
            self.unmount(hif, vol, n)?;
        }

        let handle = vol.open(path).map_err(ShellError::ImageLoad)?;
        let (lo, hi) = vol.size(handle).map_err(ShellError::ImageLoad)?;
        let size = size_bytes(lo, hi);
        let Some(format) = ImageFormat::from_size(size) else {
            vol.close(handle);
            return Err(ShellError::UnsupportedImage { size });
        };

        if let Err(e) = load_image(hif, vol, handle, self.drives[n].buffer_dev, size) {
            vol.close(handle);
            return Err(e);
        }

        let rec = &mut self.drives[n];
        rec.mounted = true;
        rec.format = Some(format);
        rec.read_only = read_only;
        rec.handle = Some(handle);
        rec.image_name = Some(path.to_string());
        rec.image_size = size;
        rec.cache_dirty = false;
        rec.flushing = false;
        rec.cursor = FlushCursor::default();

        Self::strobe_mount(hif, n, size, read_only, format.id());
        self.record_mount_change(n);
        info!("drive {n}: mounted {path} ({size} bytes, {format:?})");
        Ok(())
    }

    /// Unmount drive `n`. A dirty cache is written back to the image file
    /// first; the anti-thrash delay does not apply because no further
    /// writes can arrive for an image that is going away.
    pub fn unmount<M: Mmio, V: Volume>(
        &mut self,
        hif: &mut Hif<M>,
        vol: &mut V,
        n: usize,
    ) -> ShellResult<()> {
        if !self.drives[n].mounted {
            return Ok(());
        }

        if self.drives[n].cache_dirty {
            if let Some(handle) = self.drives[n].handle {
                write_back_all(
                    hif,
                    vol,
                    handle,
                    self.drives[n].buffer_dev,
                    self.drives[n].image_size,
                )?;
            }
        }

        let rec = &mut self.drives[n];
        if let Some(handle) = rec.handle.take() {
            vol.close(handle);
        }
        let name = rec.image_name.take();
        rec.mounted = false;
        rec.format = None;
        rec.read_only = false;
        rec.image_size = 0;
        rec.cache_dirty = false;
        rec.flushing = false;
        rec.cursor = FlushCursor::default();

        Self::strobe_mount(hif, n, 0, false, 0);
        self.record_mount_change(n);
        info!("drive {n}: unmounted {}", name.as_deref().unwrap_or("?"));
        Ok(())
    }
}

/// Read `buf.len()` image bytes starting at byte address `start` out of
/// an image buffer device. One byte per window word; page boundaries
/// re-select.
pub(crate) fn buffer_read<M: Mmio>(hif: &mut Hif<M>, dev: u16, start: u32, buf: &mut [u8]) {
    let mut addr = start;
    let mut done = 0usize;
    while done < buf.len() {
        let page = (addr / u32::from(WIN_WORDS)) as u16;
        let offset = (addr % u32::from(WIN_WORDS)) as u16;
        let span = (buf.len() - done).min((WIN_WORDS - offset) as usize);
        hif.with_device(dev, page, |w| {
            for i in 0..span {
                buf[done + i] = w.read(offset + i as u16) as u8;
            }
        });
        addr += span as u32;
        done += span;
    }
}

/// Write `data` into an image buffer device starting at byte address
/// `start`.
pub(crate) fn buffer_write<M: Mmio>(hif: &mut Hif<M>, dev: u16, start: u32, data: &[u8]) {
    let mut addr = start;
    let mut done = 0usize;
    while done < data.len() {
        let page = (addr / u32::from(WIN_WORDS)) as u16;
        let offset = (addr % u32::from(WIN_WORDS)) as u16;
        let span = (data.len() - done).min((WIN_WORDS - offset) as usize);
        hif.with_device(dev, page, |w| {
            for i in 0..span {
                w.write(offset + i as u16, u16::from(data[done + i]));
            }
        });
        addr += span as u32;
        done += span;
    }
}

/// Stream the opened file into the image buffer device.
fn load_image<M: Mmio, V: Volume>(
    hif: &mut Hif<M>,
    vol: &mut V,
    handle: FileHandle,
    dev: u16,
    size: u32,
) -> ShellResult<()> {
    vol.seek(handle, 0, 0).map_err(ShellError::ImageLoad)?;
    let mut chunk = [0u8; 512];
    let mut pos = 0u32;
    while pos < size {
        let want = ((size - pos) as usize).min(chunk.len());
        for slot in chunk.iter_mut().take(want) {
            match vol.read_byte(handle).map_err(ShellError::ImageLoad)? {
                Some(b) => *slot = b,
                None => return Err(ShellError::ImageLoad(crate::fat::FsError::Device)),
            }
        }
        buffer_write(hif, dev, pos, &chunk[..want]);
        pos += want as u32;
    }
    Ok(())
}

/// Write the whole image buffer back to the file in one synchronous pass.
/// Used by unmount; the incremental path lives in the flush engine.
fn write_back_all<M: Mmio, V: Volume>(
    hif: &mut Hif<M>,
    vol: &mut V,
    handle: FileHandle,
    dev: u16,
    size: u32,
) -> ShellResult<()> {
    vol.seek(handle, 0, 0)
        .map_err(|_| ShellError::Fatal(FatalCode::FlushSeek))?;
    let mut chunk = [0u8; 512];
    let mut pos = 0u32;
    while pos < size {
        let want = ((size - pos) as usize).min(chunk.len());
        buffer_read(hif, dev, pos, &mut chunk[..want]);
        for &b in &chunk[..want] {
            vol.write_byte(handle, b)
                .map_err(|_| ShellError::Fatal(FatalCode::FlushWrite))?;
        }
        pos += want as u32;
    }
    vol.flush(handle)
        .map_err(|_| ShellError::Fatal(FatalCode::FlushSync))?;
    Ok(())
}
