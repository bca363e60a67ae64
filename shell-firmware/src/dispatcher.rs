//! Request Dispatcher: the cooperative scheduler polled by the main loop.
//!
//! Each poll, in this order:
//! 1. disable configuration persistence if the active SD slot is not the
//!    one observed at boot (writing settings to a different card would
//!    corrupt it),
//! 2. detect hot-swap and inhibit mounts until the card is restarted,
//! 3. sweep drives for pending core read requests,
//! 4. sweep drives for pending core write requests,
//! 5. give every dirty drive one bounded flush iteration.
//!
//! Sweeps run in ascending drive order and a request is fully serviced
//! (acknowledge asserted and de-asserted) before the next drive is
//! considered.

use log::warn;
use shell_core::regmap::{csr, drivereg, DEV_DRIVE_CTL, MAX_DRIVES, WIN_WORDS};
use shell_core::Mmio;

use crate::fat::Volume;
use crate::flush;
use crate::vdr::{buffer_read, buffer_write, Vdr};
use crate::{Hif, ShellResult};

/// Dispatcher state: SD-slot observations and the persistence gate.
#[derive(Debug)]
pub struct Dispatcher {
    boot_slot: u16,
    last_slot: u16,
    sd_changed: bool,
    persist_enabled: bool,
}

impl Dispatcher {
    /// `boot_slot` is the active-slot CSR field sampled at startup.
    #[must_use]
    pub fn new(boot_slot: u16) -> Self {
        Self {
            boot_slot,
            last_slot: boot_slot,
            sd_changed: false,
            persist_enabled: true,
        }
    }

    /// Settings may still be written back to the card.
    #[must_use]
    pub fn persist_enabled(&self) -> bool {
        self.persist_enabled
    }

    /// The card was swapped since the last mount; mounts are inhibited
    /// until the card is restarted.
    #[must_use]
    pub fn sd_changed(&self) -> bool {
        self.sd_changed
    }

    /// The mount path restarted the card; swap handled.
    pub fn clear_sd_changed(&mut self) {
        self.sd_changed = false;
    }

    /// One dispatcher pass.
    pub fn poll<M: Mmio, V: Volume>(
        &mut self,
        hif: &mut Hif<M>,
        vol: &mut V,
        vdr: &mut Vdr,
    ) -> ShellResult<()> {
        let slot = hif.csr_read() & csr::SD_SLOT;
        if slot != self.boot_slot && self.persist_enabled {
            warn!("active SD slot changed from boot; settings persistence disabled");
            self.persist_enabled = false;
        }
        if slot != self.last_slot {
            warn!("SD hot-swap detected");
            self.sd_changed = true;
        }
        self.last_slot = slot;

        for n in 0..MAX_DRIVES {
            if vdr.mounted(n) {
                service_read(hif, n, vdr);
            }
        }
        for n in 0..MAX_DRIVES {
            if vdr.mounted(n) {
                service_write(hif, n, vdr);
            }
        }
        for n in 0..MAX_DRIVES {
            if vdr.mounted(n) && vdr.drive(n).cache_dirty() {
                flush::step(hif, vol, n, vdr.drive_mut(n))?;
            }
        }
        Ok(())
    }
}

/// A pending core request, latched while asserting the acknowledge.
struct Request {
    /// Byte-granular start address in the linear image buffer.
    addr: u32,
    /// Bytes to transfer.
    len: usize,
}

fn latch_request<M: Mmio>(hif: &mut Hif<M>, drive: usize, kind: u16) -> Option<Request> {
    hif.with_device(DEV_DRIVE_CTL, drive as u16, |w| {
        if w.read(kind) == 0 {
            return None;
        }
        let win = w.read(drivereg::WIN4K);
        let off = w.read(drivereg::OFF4K);
        let len = w.read(drivereg::SIZE_BYTES) as usize;
        w.write(drivereg::ACK, 1);
        Some(Request {
            addr: u32::from(win) * u32::from(WIN_WORDS) + u32::from(off),
            len,
        })
    })
}

/// Image buffer → drive internal buffer, then release the acknowledge.
fn service_read<M: Mmio>(hif: &mut Hif<M>, drive: usize, vdr: &mut Vdr) {
    let Some(req) = latch_request(hif, drive, drivereg::SD_RD) else {
        return;
    };
    let mut data = vec![0u8; req.len];
    buffer_read(hif, vdr.drive(drive).buffer_dev(), req.addr, &mut data);
    hif.with_device(DEV_DRIVE_CTL, drive as u16, |w| {
        for (i, &b) in data.iter().enumerate() {
            w.write(drivereg::BUF_ADDR, i as u16);
            w.write(drivereg::BUF_DOUT, u16::from(b));
            w.write(drivereg::BUF_WREN, 1);
            w.write(drivereg::BUF_WREN, 0);
        }
        w.write(drivereg::ACK, 0);
    });
}

/// Drive internal buffer → image buffer; marks the cache dirty and
/// restarts any flush pass in progress.
fn service_write<M: Mmio>(hif: &mut Hif<M>, drive: usize, vdr: &mut Vdr) {
    let Some(req) = latch_request(hif, drive, drivereg::SD_WR) else {
        return;
    };
    let mut data = vec![0u8; req.len];
    hif.with_device(DEV_DRIVE_CTL, drive as u16, |w| {
        for (i, slot) in data.iter_mut().enumerate() {
            w.write(drivereg::BUF_ADDR, i as u16);
            *slot = w.read(drivereg::BUF_DIN) as u8;
        }
    });
    buffer_write(hif, vdr.drive(drive).buffer_dev(), req.addr, &data);
    hif.with_device(DEV_DRIVE_CTL, drive as u16, |w| {
        w.write(drivereg::ACK, 0);
    });
    vdr.drive_mut(drive).note_write();
}
