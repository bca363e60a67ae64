//! Hardware I/O Façade: the synchronous view of the four memory-mapped
//! peripherals (CSR, paged RAM/ROM window, cycle counter, keyboard).
//!
//! The window selector pair is a shared bus. Any call into other firmware
//! code may move it, so access goes through [`Hif::with_device`]: the
//! selectors are written, the closure gets a typed [`DataWindow`], and no
//! selection is assumed to outlive the closure.

use shell_core::regmap::{
    CSR, CYCLE_HI, CYCLE_MID, KBD_MATRIX, WIN_DATA, WIN_DEVICE, WIN_PAGE, WIN_WORDS,
};
use shell_core::{Deadline, Mmio, CYCLES_PER_MS};

/// The active 4096-word data window, valid for the duration of a
/// [`Hif::with_device`] closure.
pub struct DataWindow<'a, M: Mmio> {
    bus: &'a mut M,
}

impl<M: Mmio> DataWindow<'_, M> {
    /// Read the word at `offset` (0..4095) in the selected page.
    pub fn read(&mut self, offset: u16) -> u16 {
        debug_assert!(offset < WIN_WORDS);
        self.bus.read(WIN_DATA + offset)
    }

    /// Write the word at `offset` (0..4095) in the selected page.
    pub fn write(&mut self, offset: u16, value: u16) {
        debug_assert!(offset < WIN_WORDS);
        self.bus.write(WIN_DATA + offset, value);
    }
}

/// Hardware I/O Façade.
#[derive(Debug)]
pub struct Hif<M: Mmio> {
    bus: M,
}

impl<M: Mmio> Hif<M> {
    pub fn new(bus: M) -> Self {
        Self { bus }
    }

    /// Direct access to the underlying bus, for diagnostics and tests.
    pub fn bus_mut(&mut self) -> &mut M {
        &mut self.bus
    }

    /// Select `device`/`page` and run `f` with the data window.
    ///
    /// Every access group re-selects; nothing survives past the closure.
    pub fn with_device<R>(
        &mut self,
        device: u16,
        page: u16,
        f: impl FnOnce(&mut DataWindow<'_, M>) -> R,
    ) -> R {
        self.bus.write(WIN_DEVICE, device);
        self.bus.write(WIN_PAGE, page);
        f(&mut DataWindow { bus: &mut self.bus })
    }

    /// Current value of the 32-bit cycle counter.
    ///
    /// The middle word is read first; the hardware latches the high word
    /// on that read so the two halves are consistent.
    pub fn cycles(&mut self) -> u32 {
        let mid = self.bus.read(CYCLE_MID);
        let hi = self.bus.read(CYCLE_HI);
        (u32::from(hi) << 16) | u32::from(mid)
    }

    /// Busy-wait for `ms` milliseconds on the cycle counter.
    pub fn wait_ms(&mut self, ms: u32) {
        let deadline = Deadline::after(self.cycles(), ms.saturating_mul(CYCLES_PER_MS));
        while !deadline.is_elapsed(self.cycles()) {}
    }

    pub fn csr_read(&mut self) -> u16 {
        self.bus.read(CSR)
    }

    pub fn csr_set(&mut self, bits: u16) {
        let v = self.bus.read(CSR);
        self.bus.write(CSR, v | bits);
    }

    pub fn csr_clear(&mut self, bits: u16) {
        let v = self.bus.read(CSR);
        self.bus.write(CSR, v & !bits);
    }

    /// Scan the keyboard matrix register.
    pub fn kbd_scan(&mut self) -> u16 {
        self.bus.read(KBD_MATRIX)
    }
}
