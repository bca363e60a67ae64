//! CRT Loader: cartridge container parsing and bank cache.
//!
//! The emulated core executes out of two small 8-KiB BRAMs ("lo" and
//! "hi"); the cartridge file itself is far larger and sits in external
//! DRAM, streamed there by hardware. The loader walks the container once,
//! publishes every CHIP packet to the core's bank table, then serves the
//! core's bank-switch requests by copying the selected bank into the
//! matching BRAM.
//!
//! All integers in the file are big-endian while DRAM words pack the byte
//! stream little-endian (byte 2n in the low half, byte 2n+1 in the high
//! half), so every multi-byte field goes through an explicit byte swap at
//! the field site.
//!
//! One [`CrtLoader::step`] call performs a bounded amount of work: one
//! state transition, one CHIP packet, or one [`BURST_BYTES`] burst of a
//! bank copy. A bank copy therefore spans many main-loop passes; a bank
//! request that changes while a copy is in flight is latched and
//! serviced on the next return to ready.

use log::{debug, info};
use shell_core::regmap::{
    cartreg, cartstat, DEV_BANK_HI, DEV_BANK_LO, DEV_CART_CTL, DEV_CART_RAM, WIN_WORDS,
};
use shell_core::Mmio;

use crate::{Hif, ShellResult};

/// File signature, including the trailing spaces.
pub const CRT_SIGNATURE: &[u8; 16] = b"C64 CARTRIDGE   ";
/// CHIP packet signature.
pub const CHIP_SIGNATURE: &[u8; 4] = b"CHIP";
/// Smallest file that can hold a header.
pub const CRT_MIN_LEN: u32 = 0x40;
/// Bank payload size.
pub const BANK_BYTES: u32 = 8192;
const BANK_WORDS: u32 = BANK_BYTES / 2;
/// DRAM stride from one CHIP packet to the next, in words
/// (16-byte header plus the 8-KiB payload).
pub const CHIP_STRIDE_WORDS: u32 = 0x1008;
/// Largest DRAM/BRAM burst, in bytes. One [`CrtLoader::step`] call moves
/// at most one burst of a bank copy.
pub const BURST_BYTES: usize = 256;
const BURST_WORDS: usize = BURST_BYTES / 2;

/// Parse errors, with the codes published to the status register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CrtError {
    /// File shorter than one header.
    LengthTooSmall = 1,
    /// The 16 signature bytes do not match.
    MissingCrtHeader = 2,
    /// A CHIP packet signature was expected and not found.
    MissingChipHeader = 3,
}

impl CrtError {
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }
}

/// Well-known cartridge hardware type ids from the container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartridgeKind {
    Normal,
    ActionReplay,
    KcsPower,
    FinalCartridgeIii,
    SimonsBasic,
    Ocean1,
    Expert,
    FunPlay,
    SuperGames,
    AtomicPower,
    EpyxFastload,
    MagicDesk,
    EasyFlash,
    Unknown,
}

impl From<u16> for CartridgeKind {
    fn from(value: u16) -> Self {
        match value {
            0 => CartridgeKind::Normal,
            1 => CartridgeKind::ActionReplay,
            2 => CartridgeKind::KcsPower,
            3 => CartridgeKind::FinalCartridgeIii,
            4 => CartridgeKind::SimonsBasic,
            5 => CartridgeKind::Ocean1,
            6 => CartridgeKind::Expert,
            7 => CartridgeKind::FunPlay,
            8 => CartridgeKind::SuperGames,
            9 => CartridgeKind::AtomicPower,
            10 => CartridgeKind::EpyxFastload,
            19 => CartridgeKind::MagicDesk,
            32 => CartridgeKind::EasyFlash,
            _ => CartridgeKind::Unknown,
        }
    }
}

/// One CHIP packet as published to the core's bank table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankEntry {
    pub load_address: u16,
    pub size: u16,
    pub bank: u16,
    /// Payload position in DRAM, in words, relative to the first payload.
    pub ram_offset: u32,
}

/// Coarse status surfaced in the cartridge status register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderStatus {
    Idle,
    Parsing,
    Ready,
    Error,
}

/// Reader positions within the file, plus the two bank-copy states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Signature,
    HeaderFields,
    ChipHeader,
    Ready,
    LoadLo,
    LoadHi,
    Failed,
}

/// Fields of the fixed file header.
struct FileHeader {
    header_len: u32,
    version: u16,
    cart_id: u16,
    exrom: u8,
    game: u8,
}

/// Fields of one CHIP packet header.
struct ChipHeader {
    bank: u16,
    load_address: u16,
    size: u16,
}

/// Progress of a bank copy between bounded bursts.
#[derive(Debug, Clone, Copy)]
struct BankStream {
    bank: u16,
    /// Words copied so far.
    copied: u32,
}

/// The CRT loader state machine.
#[derive(Debug)]
pub struct CrtLoader {
    phase: Phase,
    /// File start in DRAM, in words.
    file_base: u32,
    /// File length in bytes.
    file_len: u32,
    /// Read cursor, byte offset within the file.
    cursor: u32,
    /// First CHIP payload in DRAM, in words. Established once, after the
    /// file header.
    payload_base: u32,
    version: u16,
    cart_id: u16,
    exrom: u8,
    game: u8,
    name: String,
    banks: Vec<BankEntry>,
    error: Option<(CrtError, u32)>,
    lo_active: u16,
    hi_active: u16,
    lo_pending: Option<u16>,
    hi_pending: Option<u16>,
    /// The bank copy in flight, if any.
    stream: Option<BankStream>,
    /// The first lo bank is loaded unconditionally after the parse so the
    /// core has something to execute from.
    force_first_lo: bool,
}

impl Default for CrtLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl CrtLoader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            file_base: 0,
            file_len: 0,
            cursor: 0,
            payload_base: 0,
            version: 0,
            cart_id: 0,
            exrom: 0,
            game: 0,
            name: String::new(),
            banks: Vec::new(),
            error: None,
            lo_active: 0,
            hi_active: 0,
            lo_pending: None,
            hi_pending: None,
            stream: None,
            force_first_lo: false,
        }
    }

    #[must_use]
    pub fn status(&self) -> LoaderStatus {
        match self.phase {
            Phase::Idle => LoaderStatus::Idle,
            Phase::Signature | Phase::HeaderFields | Phase::ChipHeader => LoaderStatus::Parsing,
            Phase::Ready | Phase::LoadLo | Phase::LoadHi => LoaderStatus::Ready,
            Phase::Failed => LoaderStatus::Error,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<(CrtError, u32)> {
        self.error
    }

    #[must_use]
    pub fn banks(&self) -> &[BankEntry] {
        &self.banks
    }

    #[must_use]
    pub fn cart_id(&self) -> u16 {
        self.cart_id
    }

    #[must_use]
    pub fn kind(&self) -> CartridgeKind {
        CartridgeKind::from(self.cart_id)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn version(&self) -> u16 {
        self.version
    }

    #[must_use]
    pub fn active_banks(&self) -> (u16, u16) {
        (self.lo_active, self.hi_active)
    }

    /// Back to idle; the core-facing status register is cleared.
    pub fn reset<M: Mmio>(&mut self, hif: &mut Hif<M>) {
        *self = Self::new();
        hif.with_device(DEV_CART_CTL, 0, |w| {
            w.write(cartreg::STATUS, cartstat::NOT_STARTED);
            w.write(cartreg::ERR, 0);
            w.write(cartreg::ERR_ADDR_LO, 0);
            w.write(cartreg::ERR_ADDR_HI, 0);
        });
    }

    /// Start parsing the file the hardware streamed to DRAM, taking the
    /// base address and length from the cartridge status register.
    pub fn start_from_regs<M: Mmio>(&mut self, hif: &mut Hif<M>) {
        let (base_units, len) = hif.with_device(DEV_CART_CTL, 0, |w| {
            let base = (u32::from(w.read(cartreg::ADDR_HI)) << 16)
                | u32::from(w.read(cartreg::ADDR_LO));
            let len = (u32::from(w.read(cartreg::FSIZE_HI)) << 16)
                | u32::from(w.read(cartreg::FSIZE_LO));
            (base, len)
        });
        // the address register counts 16-word units
        self.start(hif, base_units * 16, len);
    }

    /// Start parsing at DRAM word address `base_words`, file length
    /// `len` bytes.
    pub fn start<M: Mmio>(&mut self, hif: &mut Hif<M>, base_words: u32, len: u32) {
        *self = Self::new();
        self.file_base = base_words;
        self.file_len = len;
        hif.with_device(DEV_CART_CTL, 0, |w| {
            w.write(cartreg::STATUS, cartstat::LOADING);
            w.write(cartreg::ERR, cartstat::ERR_BUSY);
        });
        if len < CRT_MIN_LEN {
            self.fail(hif, CrtError::LengthTooSmall, 0);
            return;
        }
        self.phase = Phase::Signature;
    }

    /// Advance the state machine by one bounded unit of work: a state
    /// transition, one CHIP packet, or one burst of a bank copy.
    pub fn step<M: Mmio>(&mut self, hif: &mut Hif<M>) -> ShellResult<()> {
        match self.phase {
            Phase::Idle | Phase::Failed => {}
            Phase::Signature => self.step_signature(hif),
            Phase::HeaderFields => self.step_header_fields(hif),
            Phase::ChipHeader => self.step_chip_header(hif),
            Phase::Ready => self.step_ready(hif),
            Phase::LoadLo => {
                self.latch_bank_requests(hif);
                if self.stream_burst(hif, DEV_BANK_LO) {
                    if let Some(s) = self.stream.take() {
                        self.lo_active = s.bank;
                        debug!("crt: lo bank {} loaded", s.bank);
                    }
                    self.phase = Phase::Ready;
                }
            }
            Phase::LoadHi => {
                self.latch_bank_requests(hif);
                if self.stream_burst(hif, DEV_BANK_HI) {
                    if let Some(s) = self.stream.take() {
                        self.hi_active = s.bank;
                        debug!("crt: hi bank {} loaded", s.bank);
                    }
                    self.phase = Phase::Ready;
                }
            }
        }
        Ok(())
    }

    fn step_signature<M: Mmio>(&mut self, hif: &mut Hif<M>) {
        let mut sig = [0u8; 16];
        self.read_file(hif, 0, &mut sig);
        if let Some(bad) = first_mismatch(&sig, CRT_SIGNATURE) {
            self.fail(hif, CrtError::MissingCrtHeader, bad as u32);
            return;
        }
        self.cursor = 16;
        self.phase = Phase::HeaderFields;
    }

    fn step_header_fields<M: Mmio>(&mut self, hif: &mut Hif<M>) {
        let mut raw = [0u8; 16];
        self.read_file(hif, self.cursor, &mut raw);
        let header = parse_file_header(&raw);

        let mut name_raw = [0u8; 32];
        self.read_file(hif, 0x20, &mut name_raw);
        self.name = name_raw
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| b as char)
            .collect();

        self.version = header.version;
        self.cart_id = header.cart_id;
        self.exrom = header.exrom;
        self.game = header.game;
        hif.with_device(DEV_CART_CTL, 0, |w| {
            w.write(cartreg::CART_ID, header.cart_id);
            w.write(cartreg::EXROM, u16::from(header.exrom));
            w.write(cartreg::GAME, u16::from(header.game));
        });
        info!(
            "crt: \"{}\" type {:?} exrom={} game={}",
            self.name,
            self.kind(),
            header.exrom,
            header.game
        );

        // the header length in the file is authoritative
        if header.header_len + 0x10 > self.file_len {
            self.fail(hif, CrtError::MissingChipHeader, header.header_len);
            return;
        }
        self.cursor = header.header_len;
        self.phase = Phase::ChipHeader;
    }

    fn step_chip_header<M: Mmio>(&mut self, hif: &mut Hif<M>) {
        let mut raw = [0u8; 16];
        self.read_file(hif, self.cursor, &mut raw);
        if first_mismatch(&raw[..4], CHIP_SIGNATURE).is_some() {
            self.fail(hif, CrtError::MissingChipHeader, self.cursor);
            return;
        }
        let chip = parse_chip_header(&raw);

        let payload_at = self.cursor + 16;
        if self.banks.is_empty() {
            self.payload_base = self.file_base + payload_at / 2;
        }
        let ram_offset = (self.file_base + payload_at / 2) - self.payload_base;

        let entry = BankEntry {
            load_address: chip.load_address,
            size: chip.size,
            bank: chip.bank,
            ram_offset,
        };
        hif.with_device(DEV_CART_CTL, 0, |w| {
            w.write(cartreg::BT_LOAD_ADDR, entry.load_address);
            w.write(cartreg::BT_SIZE, entry.size);
            w.write(cartreg::BT_BANK, entry.bank);
            w.write(cartreg::BT_OFFS_LO, entry.ram_offset as u16);
            w.write(cartreg::BT_OFFS_HI, (entry.ram_offset >> 16) as u16);
            w.write(cartreg::BT_STROBE, 1);
            w.write(cartreg::BT_STROBE, 0);
        });
        self.banks.push(entry);
        debug!(
            "crt: bank {} at ${:04X}, {} bytes, dram offset {:#X}",
            entry.bank, entry.load_address, entry.size, entry.ram_offset
        );

        // another packet only fits if a payload plus one more header remain
        let remaining = self.file_len.saturating_sub(payload_at);
        self.cursor = payload_at + u32::from(chip.size);
        if remaining >= u32::from(chip.size) + 0x10 {
            return;
        }

        self.phase = Phase::Ready;
        self.force_first_lo = true;
        hif.with_device(DEV_CART_CTL, 0, |w| {
            w.write(cartreg::STATUS, cartstat::SUCCESS);
            w.write(cartreg::ERR, 0);
        });
        info!("crt: parse complete, {} bank(s)", self.banks.len());
    }

    fn step_ready<M: Mmio>(&mut self, hif: &mut Hif<M>) {
        self.latch_bank_requests(hif);
        if let Some(bank) = self.lo_pending.take() {
            self.stream = Some(BankStream { bank, copied: 0 });
            self.phase = Phase::LoadLo;
        } else if let Some(bank) = self.hi_pending.take() {
            self.stream = Some(BankStream { bank, copied: 0 });
            self.phase = Phase::LoadHi;
        }
    }

    /// Sample the core's bank request registers. Runs on every ready and
    /// streaming pass: a request that changes while a copy is in flight
    /// is latched here and serviced on the next return to ready, never by
    /// pre-empting the copy.
    fn latch_bank_requests<M: Mmio>(&mut self, hif: &mut Hif<M>) {
        let (lo_req, hi_req) = hif.with_device(DEV_CART_CTL, 0, |w| {
            (w.read(cartreg::BANK_LO_REQ), w.read(cartreg::BANK_HI_REQ))
        });
        if self.force_first_lo {
            self.force_first_lo = false;
            self.lo_pending = Some(lo_req);
        } else {
            let lo_now = match self.stream {
                Some(s) if self.phase == Phase::LoadLo => s.bank,
                _ => self.lo_active,
            };
            if lo_req != lo_now {
                self.lo_pending = Some(lo_req);
            }
        }
        let hi_now = match self.stream {
            Some(s) if self.phase == Phase::LoadHi => s.bank,
            _ => self.hi_active,
        };
        if hi_req != hi_now {
            self.hi_pending = Some(hi_req);
        }
    }

    /// Copy at most one [`BURST_BYTES`] burst of the bank being streamed
    /// from DRAM into a bank BRAM. True once the whole bank has landed.
    fn stream_burst<M: Mmio>(&mut self, hif: &mut Hif<M>, bram_dev: u16) -> bool {
        let Some(s) = self.stream else {
            return true;
        };
        let src = self.payload_base + CHIP_STRIDE_WORDS * u32::from(s.bank) + s.copied;
        let span = ((BANK_WORDS - s.copied) as usize).min(BURST_WORDS);
        let mut burst = [0u16; BURST_WORDS];
        read_dram_words(hif, src, &mut burst[..span]);
        hif.with_device(bram_dev, 0, |w| {
            for (i, &word) in burst[..span].iter().enumerate() {
                w.write((s.copied as usize + i) as u16, word);
            }
        });
        let copied = s.copied + span as u32;
        if let Some(s) = &mut self.stream {
            s.copied = copied;
        }
        copied >= BANK_WORDS
    }

    /// Read file bytes starting at byte offset `off`, unpacking the
    /// little-endian word store.
    fn read_file<M: Mmio>(&self, hif: &mut Hif<M>, off: u32, buf: &mut [u8]) {
        let mut i = 0usize;
        let mut off = off;
        while i < buf.len() {
            let word_addr = self.file_base + off / 2;
            let page = (word_addr / u32::from(WIN_WORDS)) as u16;
            hif.with_device(DEV_CART_RAM, page, |w| {
                while i < buf.len() {
                    let word_addr = self.file_base + off / 2;
                    if (word_addr / u32::from(WIN_WORDS)) as u16 != page {
                        break;
                    }
                    let word = w.read((word_addr % u32::from(WIN_WORDS)) as u16);
                    buf[i] = if off & 1 == 0 {
                        word as u8
                    } else {
                        (word >> 8) as u8
                    };
                    i += 1;
                    off += 1;
                }
            });
        }
    }

    fn fail<M: Mmio>(&mut self, hif: &mut Hif<M>, err: CrtError, byte_off: u32) {
        self.phase = Phase::Failed;
        self.error = Some((err, byte_off));
        hif.with_device(DEV_CART_CTL, 0, |w| {
            w.write(cartreg::STATUS, cartstat::ERROR);
            w.write(cartreg::ERR, err.code());
            w.write(cartreg::ERR_ADDR_LO, byte_off as u16);
            w.write(cartreg::ERR_ADDR_HI, (byte_off >> 16) as u16);
        });
        log::error!("crt: parse failed at byte {byte_off:#X}: {err:?}");
    }
}

/// Read words from the cartridge DRAM device, splitting across pages.
fn read_dram_words<M: Mmio>(hif: &mut Hif<M>, word_addr: u32, buf: &mut [u16]) {
    let mut addr = word_addr;
    let mut done = 0usize;
    while done < buf.len() {
        let page = (addr / u32::from(WIN_WORDS)) as u16;
        let offset = (addr % u32::from(WIN_WORDS)) as u16;
        let span = (buf.len() - done).min((WIN_WORDS - offset) as usize);
        hif.with_device(DEV_CART_RAM, page, |w| {
            for i in 0..span {
                buf[done + i] = w.read(offset + i as u16);
            }
        });
        addr += span as u32;
        done += span;
    }
}

/// Index of the first differing byte, if any.
fn first_mismatch(got: &[u8], want: &[u8]) -> Option<usize> {
    got.iter().zip(want).position(|(a, b)| a != b)
}

/// Decode the 16 header bytes that follow the signature.
fn parse_file_header(raw: &[u8; 16]) -> FileHeader {
    FileHeader {
        header_len: u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]),
        version: u16::from_be_bytes([raw[4], raw[5]]),
        cart_id: u16::from_be_bytes([raw[6], raw[7]]),
        exrom: raw[8],
        game: raw[9],
    }
}

/// Decode one 16-byte CHIP packet header (signature already checked).
fn parse_chip_header(raw: &[u8; 16]) -> ChipHeader {
    ChipHeader {
        bank: u16::from_be_bytes([raw[10], raw[11]]),
        load_address: u16::from_be_bytes([raw[12], raw[13]]),
        size: u16::from_be_bytes([raw[14], raw[15]]),
    }
}
