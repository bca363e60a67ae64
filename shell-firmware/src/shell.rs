//! The Shell context: one struct owning every subsystem, and the
//! cooperative main-loop pass.
//!
//! A pass runs the dispatcher, offers a key scan to the external menu
//! collaborator, then gives the CRT loader one housekeeping step. Every
//! pass must finish well inside the core's tolerance for request
//! acknowledgement, which is why each sub-step is bounded.

use log::{error, info};
use shell_core::regmap::{cartreg, cartstat, csr, DEV_CART_CTL};
use shell_core::Mmio;

use crate::crt::CrtLoader;
use crate::dispatcher::Dispatcher;
use crate::fat::Volume;
use crate::settings::Settings;
use crate::vdr::Vdr;
use crate::{FatalCode, Hif, ShellError, ShellResult};

/// Keypress debounce busy-wait.
pub const KEY_DEBOUNCE_MS: u32 = 333;
/// Settling time after an SD card restart.
pub const SD_SETTLE_MS: u32 = 100;

/// The Shell.
#[derive(Debug)]
pub struct Shell<M: Mmio, V: Volume> {
    hif: Hif<M>,
    vol: V,
    vdr: Vdr,
    dispatcher: Dispatcher,
    crt: CrtLoader,
    settings: Settings,
}

impl<M: Mmio, V: Volume> Shell<M, V> {
    /// Bring the Shell up: mount the card, note which SD slot we booted
    /// from, and read the persisted settings.
    ///
    /// A card-mount failure is transient: the caller shows the code and
    /// retries. A corrupt config file is fatal.
    pub fn boot(bus: M, mut vol: V) -> ShellResult<Self> {
        let mut hif = Hif::new(bus);
        vol.mount(0).map_err(ShellError::Mount)?;
        let boot_slot = hif.csr_read() & csr::SD_SLOT;

        let mut settings = Settings::new();
        match settings.load(&mut vol) {
            Ok(outcome) => info!("settings: {outcome:?}"),
            Err(e @ ShellError::Fatal(_)) => return Err(e),
            Err(e) => info!("settings unavailable ({e}); defaults in effect"),
        }

        Ok(Self {
            hif,
            vol,
            vdr: Vdr::new(),
            dispatcher: Dispatcher::new(boot_slot),
            crt: CrtLoader::new(),
            settings,
        })
    }

    /// One pass of the cooperative main loop.
    pub fn run_pass(&mut self) -> ShellResult<()> {
        self.dispatcher
            .poll(&mut self.hif, &mut self.vol, &mut self.vdr)?;
        // key decoding and menu handling live outside; scan_key() is
        // their entry point between passes
        self.crt.step(&mut self.hif)?;
        debug_assert!(self.vdr.invariants_ok());
        Ok(())
    }

    /// Mount an image on drive `n`. If the card was hot-swapped since the
    /// last mount, restart it first.
    pub fn mount_drive(&mut self, n: usize, path: &str, read_only: bool) -> ShellResult<()> {
        if self.dispatcher.sd_changed() {
            self.vol.mount(0).map_err(ShellError::Mount)?;
            self.hif.wait_ms(SD_SETTLE_MS);
            self.dispatcher.clear_sd_changed();
        }
        self.vdr.mount(&mut self.hif, &mut self.vol, n, path, read_only)
    }

    pub fn unmount_drive(&mut self, n: usize) -> ShellResult<()> {
        self.vdr.unmount(&mut self.hif, &mut self.vol, n)
    }

    /// Kick the CRT loader off against the file the hardware streamed to
    /// DRAM (base and length from the cartridge status register).
    pub fn start_cartridge(&mut self) {
        self.crt.start_from_regs(&mut self.hif);
    }

    /// Pulse the core reset line. The CRT loader drops back to idle.
    pub fn reset_core(&mut self) {
        self.hif.csr_set(csr::RESET);
        self.hif.wait_ms(1);
        self.hif.csr_clear(csr::RESET);
        self.crt.reset(&mut self.hif);
    }

    /// Scan the keyboard with the debounce wait applied. Key decoding is
    /// the menu collaborator's business.
    pub fn scan_key(&mut self) -> Option<u16> {
        let raw = self.hif.kbd_scan();
        if raw == 0 {
            return None;
        }
        self.hif.wait_ms(KEY_DEBOUNCE_MS);
        Some(raw)
    }

    /// Persist the menu bits, unless the active card is not the boot
    /// card. Returns whether a write happened.
    pub fn save_settings(&mut self) -> ShellResult<bool> {
        if !self.dispatcher.persist_enabled() {
            info!("settings not saved: active SD slot differs from boot");
            return Ok(false);
        }
        self.settings.save(&mut self.vol)?;
        Ok(true)
    }

    /// The single fatal path: publish the code to the cartridge status
    /// register. The caller switches to the full-screen overlay and
    /// halts.
    pub fn report_fatal(&mut self, code: FatalCode) {
        error!("fatal: {code:?} ({:#06X})", code.as_u16());
        self.hif.with_device(DEV_CART_CTL, 0, |w| {
            w.write(cartreg::STATUS, cartstat::ERROR);
            w.write(cartreg::ERR, code.as_u16());
        });
    }

    #[must_use]
    pub fn vdr(&self) -> &Vdr {
        &self.vdr
    }

    pub fn vdr_mut(&mut self) -> &mut Vdr {
        &mut self.vdr
    }

    #[must_use]
    pub fn crt(&self) -> &CrtLoader {
        &self.crt
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Direct bus access, for diagnostics and tests.
    pub fn bus_mut(&mut self) -> &mut M {
        self.hif.bus_mut()
    }

    pub fn volume_mut(&mut self) -> &mut V {
        &mut self.vol
    }
}
