//! Configuration persistence: the menu-bit file on the SD card.
//!
//! One byte per menu item, 0 or 1, written lowest bit first. A first
//! byte of 0xFF marks an unprogrammed file: defaults apply and the file
//! is rewritten on the first save. Any other byte outside {0, 1} means
//! the file is corrupt, which is fatal.

use log::{info, warn};

use crate::fat::{FsError, Volume};
use crate::{FatalCode, ShellError, ShellResult};

/// Fixed pathname on the mounted card.
pub const CONFIG_FILE: &str = "/shell.cfg";

/// Number of persisted menu bits; also the file size in bytes.
pub const MENU_ITEM_COUNT: usize = 16;

/// How a load resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Bits read from the file.
    Loaded,
    /// File marked unprogrammed (leading 0xFF); defaults in effect and
    /// the file will be rewritten on the first save.
    Defaults,
    /// No config file on the card; defaults in effect.
    NoFile,
}

/// The persisted menu bits.
#[derive(Debug)]
pub struct Settings {
    bits: [bool; MENU_ITEM_COUNT],
    needs_rewrite: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

impl Settings {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bits: [false; MENU_ITEM_COUNT],
            needs_rewrite: false,
        }
    }

    #[must_use]
    pub fn get(&self, item: usize) -> bool {
        self.bits[item]
    }

    pub fn set(&mut self, item: usize, value: bool) {
        self.bits[item] = value;
    }

    /// Read the config file. Missing file and the unprogrammed marker
    /// both fall back to defaults; a malformed byte is fatal.
    pub fn load<V: Volume>(&mut self, vol: &mut V) -> ShellResult<LoadOutcome> {
        let handle = match vol.open(CONFIG_FILE) {
            Ok(h) => h,
            Err(FsError::NotFound) => {
                info!("no config file; defaults in effect");
                return Ok(LoadOutcome::NoFile);
            }
            Err(e) => return Err(ShellError::Mount(e)),
        };

        let mut raw = [0u8; MENU_ITEM_COUNT];
        let mut got = 0usize;
        let outcome = loop {
            if got == raw.len() {
                break None;
            }
            match vol.read_byte(handle).map_err(ShellError::Mount)? {
                Some(b) => {
                    raw[got] = b;
                    got += 1;
                }
                None => break Some(got),
            }
        };
        vol.close(handle);

        if got == 0 || raw[0] == 0xFF {
            self.bits = [false; MENU_ITEM_COUNT];
            self.needs_rewrite = true;
            info!("config file unprogrammed; defaults in effect");
            return Ok(LoadOutcome::Defaults);
        }
        if outcome.is_some() {
            // the file is defined to be exactly one byte per item
            return Err(ShellError::Fatal(FatalCode::ConfigCorrupt));
        }
        self.bits = decode_bits(&raw)?;
        info!("config loaded");
        Ok(LoadOutcome::Loaded)
    }

    /// Write the bits back, lowest bit first.
    pub fn save<V: Volume>(&mut self, vol: &mut V) -> ShellResult<()> {
        let handle = vol.create(CONFIG_FILE).map_err(ShellError::Mount)?;
        for &bit in &self.bits {
            if let Err(e) = vol.write_byte(handle, u8::from(bit)) {
                vol.close(handle);
                return Err(ShellError::Mount(e));
            }
        }
        let flushed = vol.flush(handle);
        vol.close(handle);
        flushed.map_err(ShellError::Mount)?;
        self.needs_rewrite = false;
        info!("config saved");
        Ok(())
    }

    /// The unprogrammed marker was seen and no save has happened yet.
    #[must_use]
    pub fn needs_rewrite(&self) -> bool {
        self.needs_rewrite
    }
}

/// Validate and decode one byte per bit.
fn decode_bits(raw: &[u8; MENU_ITEM_COUNT]) -> ShellResult<[bool; MENU_ITEM_COUNT]> {
    let mut bits = [false; MENU_ITEM_COUNT];
    for (i, &b) in raw.iter().enumerate() {
        match b {
            0 => bits[i] = false,
            1 => bits[i] = true,
            _ => {
                warn!("config byte {i} is {b:#04X}");
                return Err(ShellError::Fatal(FatalCode::ConfigCorrupt));
            }
        }
    }
    Ok(bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_zeroes_and_ones() {
        let mut raw = [0u8; MENU_ITEM_COUNT];
        raw[0] = 1;
        raw[5] = 1;
        let bits = decode_bits(&raw).unwrap();
        assert!(bits[0]);
        assert!(!bits[1]);
        assert!(bits[5]);
    }

    #[test]
    fn rejects_other_bytes() {
        let mut raw = [0u8; MENU_ITEM_COUNT];
        raw[3] = 2;
        assert_eq!(
            decode_bits(&raw),
            Err(ShellError::Fatal(FatalCode::ConfigCorrupt))
        );
    }
}
