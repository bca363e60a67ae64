//! The simulated machine: CSR, cycle counter, selector bus, and the
//! devices behind the data window.

use shell_core::regmap::{
    cartreg, csr, drivereg, image_device, CSR, CYCLE_HI, CYCLE_MID, DEV_BANK_HI, DEV_BANK_LO,
    DEV_CART_CTL, DEV_CART_RAM, DEV_DRIVE_CTL, KBD_MATRIX, MAX_DRIVES, WIN_DATA, WIN_DEVICE,
    WIN_PAGE, WIN_WORDS,
};
use shell_core::{Mmio, CYCLES_PER_MS};
use shell_firmware::flush::ANTI_THRASH_MS;
use shell_firmware::vdr::IMAGE_SIZE_40;

/// Cycles the counter advances per bus access.
const CYCLES_PER_ACCESS: u64 = 16;

/// Drive internal buffer size, bytes.
const DRIVE_BUF_BYTES: usize = 4096;

/// One latched mount pulse, with the auxiliaries sampled on the rising
/// edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountEvent {
    pub size: u32,
    pub read_only: bool,
    pub image_type: u16,
}

/// One bank table entry captured on the publish strobe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishedBank {
    pub load_address: u16,
    pub size: u16,
    pub bank: u16,
    pub ram_offset: u32,
}

/// The emulated core's side of one virtual drive.
#[derive(Debug)]
struct SimDrive {
    sd_rd: bool,
    sd_wr: bool,
    ack: bool,
    lba: u32,
    block_count: u16,
    byte_addr: u32,
    size_bytes: u16,
    buf: Vec<u8>,
    buf_addr: u16,
    buf_dout: u16,
    buf_wren: bool,
    mount_level: bool,
    mount_type: u16,
    mount_ro: u16,
    mount_size_lo: u16,
    mount_size_hi: u16,
    mount_events: Vec<MountEvent>,
    last_write_cycle: Option<u64>,
    ack_rises: u32,
    ack_falls: u32,
}

impl SimDrive {
    fn new() -> Self {
        Self {
            sd_rd: false,
            sd_wr: false,
            ack: false,
            lba: 0,
            block_count: 0,
            byte_addr: 0,
            size_bytes: 0,
            buf: vec![0; DRIVE_BUF_BYTES],
            buf_addr: 0,
            buf_dout: 0,
            buf_wren: false,
            mount_level: false,
            mount_type: 0,
            mount_ro: 0,
            mount_size_lo: 0,
            mount_size_hi: 0,
            mount_events: Vec::new(),
            last_write_cycle: None,
            ack_rises: 0,
            ack_falls: 0,
        }
    }

    fn reg_read(&mut self, reg: u16, now: u64) -> u16 {
        match reg {
            drivereg::SD_RD => u16::from(self.sd_rd),
            drivereg::SD_WR => u16::from(self.sd_wr),
            drivereg::ACK => u16::from(self.ack),
            drivereg::LBA_LO => self.lba as u16,
            drivereg::LBA_HI => (self.lba >> 16) as u16,
            drivereg::BLOCK_COUNT => self.block_count,
            drivereg::BYTES_LO => self.byte_addr as u16,
            drivereg::BYTES_HI => (self.byte_addr >> 16) as u16,
            drivereg::SIZE_BYTES => self.size_bytes,
            drivereg::WIN4K => (self.byte_addr / u32::from(WIN_WORDS)) as u16,
            drivereg::OFF4K => (self.byte_addr % u32::from(WIN_WORDS)) as u16,
            drivereg::BUF_ADDR => self.buf_addr,
            drivereg::BUF_DOUT => self.buf_dout,
            drivereg::BUF_DIN => u16::from(self.buf[usize::from(self.buf_addr) % self.buf.len()]),
            drivereg::MOUNT => u16::from(self.mount_level),
            drivereg::MOUNT_TYPE => self.mount_type,
            drivereg::MOUNT_RO => self.mount_ro,
            drivereg::MOUNT_SIZE_LO => self.mount_size_lo,
            drivereg::MOUNT_SIZE_HI => self.mount_size_hi,
            drivereg::CACHE_READY => {
                let quiet = u64::from(ANTI_THRASH_MS) * u64::from(CYCLES_PER_MS);
                let ready = self
                    .last_write_cycle
                    .map_or(true, |t| now.saturating_sub(t) >= quiet);
                u16::from(ready)
            }
            _ => 0,
        }
    }

    fn reg_write(&mut self, reg: u16, value: u16) {
        match reg {
            drivereg::ACK => {
                let level = value != 0;
                if level && !self.ack {
                    self.ack_rises += 1;
                    // the core drops its request once acknowledged
                    self.sd_rd = false;
                    self.sd_wr = false;
                }
                if !level && self.ack {
                    self.ack_falls += 1;
                }
                self.ack = level;
            }
            drivereg::BUF_ADDR => self.buf_addr = value,
            drivereg::BUF_DOUT => self.buf_dout = value,
            drivereg::BUF_WREN => {
                let level = value != 0;
                if level && !self.buf_wren {
                    let at = usize::from(self.buf_addr) % self.buf.len();
                    self.buf[at] = self.buf_dout as u8;
                }
                self.buf_wren = level;
            }
            drivereg::MOUNT => {
                let level = value != 0;
                if level && !self.mount_level {
                    let event = MountEvent {
                        size: (u32::from(self.mount_size_hi) << 16)
                            | u32::from(self.mount_size_lo),
                        read_only: self.mount_ro != 0,
                        image_type: self.mount_type,
                    };
                    log::debug!("mount pulse latched: {event:?}");
                    self.mount_events.push(event);
                }
                self.mount_level = level;
            }
            drivereg::MOUNT_TYPE => self.mount_type = value,
            drivereg::MOUNT_RO => self.mount_ro = value,
            drivereg::MOUNT_SIZE_LO => self.mount_size_lo = value,
            drivereg::MOUNT_SIZE_HI => self.mount_size_hi = value,
            _ => {}
        }
    }
}

/// The cartridge control register file as the core sees it.
#[derive(Debug, Default)]
pub struct CartCtl {
    pub status: u16,
    pub fsize: u32,
    pub addr_units: u32,
    pub err: u16,
    pub err_addr: u32,
    pub cart_id: u16,
    pub exrom: u16,
    pub game: u16,
    pub bank_lo_req: u16,
    pub bank_hi_req: u16,
    /// Every entry published through the strobe, in order.
    pub bank_table: Vec<PublishedBank>,
    bt_load_addr: u16,
    bt_size: u16,
    bt_bank: u16,
    bt_offs_lo: u16,
    bt_offs_hi: u16,
    bt_strobe: bool,
}

impl CartCtl {
    fn reg_read(&self, reg: u16) -> u16 {
        match reg {
            cartreg::STATUS => self.status,
            cartreg::FSIZE_LO => self.fsize as u16,
            cartreg::FSIZE_HI => (self.fsize >> 16) as u16,
            cartreg::ADDR_LO => self.addr_units as u16,
            cartreg::ADDR_HI => (self.addr_units >> 16) as u16,
            cartreg::ERR => self.err,
            cartreg::ERR_ADDR_LO => self.err_addr as u16,
            cartreg::ERR_ADDR_HI => (self.err_addr >> 16) as u16,
            cartreg::CART_ID => self.cart_id,
            cartreg::EXROM => self.exrom,
            cartreg::GAME => self.game,
            cartreg::BANK_LO_REQ => self.bank_lo_req,
            cartreg::BANK_HI_REQ => self.bank_hi_req,
            _ => 0,
        }
    }

    fn reg_write(&mut self, reg: u16, value: u16) {
        match reg {
            cartreg::STATUS => self.status = value,
            cartreg::ERR => self.err = value,
            cartreg::ERR_ADDR_LO => {
                self.err_addr = (self.err_addr & 0xFFFF_0000) | u32::from(value);
            }
            cartreg::ERR_ADDR_HI => {
                self.err_addr = (self.err_addr & 0xFFFF) | (u32::from(value) << 16);
            }
            cartreg::CART_ID => self.cart_id = value,
            cartreg::EXROM => self.exrom = value,
            cartreg::GAME => self.game = value,
            cartreg::BT_LOAD_ADDR => self.bt_load_addr = value,
            cartreg::BT_SIZE => self.bt_size = value,
            cartreg::BT_BANK => self.bt_bank = value,
            cartreg::BT_OFFS_LO => self.bt_offs_lo = value,
            cartreg::BT_OFFS_HI => self.bt_offs_hi = value,
            cartreg::BT_STROBE => {
                let level = value != 0;
                if level && !self.bt_strobe {
                    self.bank_table.push(PublishedBank {
                        load_address: self.bt_load_addr,
                        size: self.bt_size,
                        bank: self.bt_bank,
                        ram_offset: (u32::from(self.bt_offs_hi) << 16)
                            | u32::from(self.bt_offs_lo),
                    });
                }
                self.bt_strobe = level;
            }
            _ => {}
        }
    }
}

/// The whole simulated machine.
#[derive(Debug)]
pub struct SimMachine {
    csr: u16,
    kbd: u16,
    sel_dev: u16,
    sel_page: u16,
    cycles: u64,
    cycle_latch_hi: u16,
    drives: [SimDrive; MAX_DRIVES],
    images: [Vec<u8>; MAX_DRIVES],
    dram: Vec<u16>,
    bram_lo: Vec<u16>,
    bram_hi: Vec<u16>,
    cart: CartCtl,
}

impl Default for SimMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimMachine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            csr: 0,
            kbd: 0,
            sel_dev: 0,
            sel_page: 0,
            cycles: 0,
            cycle_latch_hi: 0,
            drives: std::array::from_fn(|_| SimDrive::new()),
            images: std::array::from_fn(|_| vec![0; IMAGE_SIZE_40 as usize]),
            dram: Vec::new(),
            bram_lo: vec![0; usize::from(WIN_WORDS)],
            bram_hi: vec![0; usize::from(WIN_WORDS)],
            cart: CartCtl::default(),
        }
    }

    /// Raise a core read request: `len` bytes starting at image byte
    /// address `addr` into the drive's internal buffer.
    pub fn raise_read(&mut self, drive: usize, addr: u32, len: u16) {
        let d = &mut self.drives[drive];
        d.byte_addr = addr;
        d.size_bytes = len;
        d.lba = addr / 256;
        d.block_count = len.div_ceil(256);
        d.sd_rd = true;
    }

    /// Raise a core write request: `data` is already in the drive's
    /// internal buffer, destined for image byte address `addr`. Resets
    /// the drive's anti-thrash timer, as the hardware does.
    pub fn raise_write(&mut self, drive: usize, addr: u32, data: &[u8]) {
        let now = self.cycles;
        let d = &mut self.drives[drive];
        d.buf[..data.len()].copy_from_slice(data);
        d.byte_addr = addr;
        d.size_bytes = data.len() as u16;
        d.lba = addr / 256;
        d.block_count = (data.len() as u16).div_ceil(256);
        d.sd_wr = true;
        d.last_write_cycle = Some(now);
    }

    /// (read pending, write pending) for a drive.
    #[must_use]
    pub fn request_pending(&self, drive: usize) -> (bool, bool) {
        (self.drives[drive].sd_rd, self.drives[drive].sd_wr)
    }

    /// (rises, falls) of the acknowledge line since the last reset.
    #[must_use]
    pub fn ack_counts(&self, drive: usize) -> (u32, u32) {
        (self.drives[drive].ack_rises, self.drives[drive].ack_falls)
    }

    pub fn reset_ack_counts(&mut self, drive: usize) {
        self.drives[drive].ack_rises = 0;
        self.drives[drive].ack_falls = 0;
    }

    /// The drive's internal buffer.
    #[must_use]
    pub fn drive_buf(&self, drive: usize) -> &[u8] {
        &self.drives[drive].buf
    }

    /// The linear image buffer RAM shared with the core.
    #[must_use]
    pub fn image(&self, drive: usize) -> &[u8] {
        &self.images[drive]
    }

    /// Mount pulses latched so far.
    #[must_use]
    pub fn mount_events(&self, drive: usize) -> &[MountEvent] {
        &self.drives[drive].mount_events
    }

    /// Let wall-clock pass without bus traffic.
    pub fn advance_ms(&mut self, ms: u32) {
        self.cycles += u64::from(ms) * u64::from(CYCLES_PER_MS);
    }

    /// Pack a byte stream into the HyperRAM word store starting at
    /// `word_base`: byte 2n in the low half, byte 2n+1 in the high half.
    pub fn load_dram_bytes(&mut self, word_base: u32, bytes: &[u8]) {
        let words = bytes.len().div_ceil(2);
        let end = word_base as usize + words;
        if self.dram.len() < end {
            self.dram.resize(end, 0);
        }
        for (i, pair) in bytes.chunks(2).enumerate() {
            let lo = u16::from(pair[0]);
            let hi = u16::from(*pair.get(1).unwrap_or(&0));
            self.dram[word_base as usize + i] = (hi << 8) | lo;
        }
    }

    /// Peek one HyperRAM word.
    #[must_use]
    pub fn dram_word(&self, word_addr: u32) -> u16 {
        self.dram.get(word_addr as usize).copied().unwrap_or(0)
    }

    /// Announce a streamed cartridge file: start address (16-word units)
    /// and byte length, as the hardware writes them before interrupting
    /// the firmware.
    pub fn set_cart_file(&mut self, addr_units: u32, len: u32) {
        self.cart.addr_units = addr_units;
        self.cart.fsize = len;
    }

    #[must_use]
    pub fn cart(&self) -> &CartCtl {
        &self.cart
    }

    pub fn set_bank_lo_req(&mut self, bank: u16) {
        self.cart.bank_lo_req = bank;
    }

    pub fn set_bank_hi_req(&mut self, bank: u16) {
        self.cart.bank_hi_req = bank;
    }

    #[must_use]
    pub fn bram_lo(&self) -> &[u16] {
        &self.bram_lo
    }

    #[must_use]
    pub fn bram_hi(&self) -> &[u16] {
        &self.bram_hi
    }

    /// Flip the active-SD-slot observation bit.
    pub fn set_sd_slot(&mut self, slot: u16) {
        if slot == 0 {
            self.csr &= !csr::SD_SLOT;
        } else {
            self.csr |= csr::SD_SLOT;
        }
    }

    pub fn set_kbd(&mut self, raw: u16) {
        self.kbd = raw;
    }

    fn window_read(&mut self, offset: u16) -> u16 {
        let now = self.cycles;
        match self.sel_dev {
            DEV_DRIVE_CTL => {
                let drive = usize::from(self.sel_page) % MAX_DRIVES;
                self.drives[drive].reg_read(offset, now)
            }
            DEV_CART_CTL => self.cart.reg_read(offset),
            DEV_CART_RAM => {
                let at = usize::from(self.sel_page) * usize::from(WIN_WORDS) + usize::from(offset);
                self.dram.get(at).copied().unwrap_or(0)
            }
            DEV_BANK_LO => self.bram_lo[usize::from(offset)],
            DEV_BANK_HI => self.bram_hi[usize::from(offset)],
            dev => {
                if let Some(n) = (0..MAX_DRIVES).find(|&n| image_device(n) == dev) {
                    let at =
                        usize::from(self.sel_page) * usize::from(WIN_WORDS) + usize::from(offset);
                    u16::from(self.images[n].get(at).copied().unwrap_or(0))
                } else {
                    0
                }
            }
        }
    }

    fn window_write(&mut self, offset: u16, value: u16) {
        match self.sel_dev {
            DEV_DRIVE_CTL => {
                let drive = usize::from(self.sel_page) % MAX_DRIVES;
                self.drives[drive].reg_write(offset, value);
            }
            DEV_CART_CTL => self.cart.reg_write(offset, value),
            DEV_CART_RAM => {
                let at = usize::from(self.sel_page) * usize::from(WIN_WORDS) + usize::from(offset);
                if at >= self.dram.len() {
                    self.dram.resize(at + 1, 0);
                }
                self.dram[at] = value;
            }
            DEV_BANK_LO => self.bram_lo[usize::from(offset)] = value,
            DEV_BANK_HI => self.bram_hi[usize::from(offset)] = value,
            dev => {
                if let Some(n) = (0..MAX_DRIVES).find(|&n| image_device(n) == dev) {
                    let at =
                        usize::from(self.sel_page) * usize::from(WIN_WORDS) + usize::from(offset);
                    if at < self.images[n].len() {
                        self.images[n][at] = value as u8;
                    }
                }
            }
        }
    }
}

impl Mmio for SimMachine {
    fn read(&mut self, address: u16) -> u16 {
        self.cycles += CYCLES_PER_ACCESS;
        match address {
            CSR => self.csr,
            CYCLE_MID => {
                // reading the middle word latches the high word
                self.cycle_latch_hi = (self.cycles >> 16) as u16;
                self.cycles as u16
            }
            CYCLE_HI => self.cycle_latch_hi,
            KBD_MATRIX => self.kbd,
            WIN_DEVICE => self.sel_dev,
            WIN_PAGE => self.sel_page,
            a if (WIN_DATA..WIN_DATA + WIN_WORDS).contains(&a) => self.window_read(a - WIN_DATA),
            _ => 0,
        }
    }

    fn write(&mut self, address: u16, value: u16) {
        self.cycles += CYCLES_PER_ACCESS;
        match address {
            CSR => self.csr = value,
            WIN_DEVICE => self.sel_dev = value,
            WIN_PAGE => self.sel_page = value,
            a if (WIN_DATA..WIN_DATA + WIN_WORDS).contains(&a) => {
                self.window_write(a - WIN_DATA, value);
            }
            _ => {}
        }
    }
}
