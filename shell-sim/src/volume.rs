//! In-memory FAT32 stand-in with per-operation fault injection.

use std::collections::BTreeMap;

use shell_firmware::fat::{FileHandle, FsError, Volume};

/// Operations a scripted failure can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOp {
    Mount,
    Open,
    Seek,
    Read,
    Write,
    Flush,
}

#[derive(Debug)]
struct OpenFile {
    path: String,
    pos: u32,
}

/// An in-memory volume of named files.
#[derive(Debug)]
pub struct MemVolume {
    mounted: bool,
    files: BTreeMap<String, Vec<u8>>,
    open: Vec<Option<OpenFile>>,
    fail_next: Option<FailOp>,
    writes: u32,
}

impl Default for MemVolume {
    fn default() -> Self {
        Self::new()
    }
}

impl MemVolume {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mounted: false,
            files: BTreeMap::new(),
            open: Vec::new(),
            fail_next: None,
            writes: 0,
        }
    }

    /// Bytes written through [`Volume::write_byte`] since the last reset.
    #[must_use]
    pub fn write_count(&self) -> u32 {
        self.writes
    }

    pub fn reset_write_count(&mut self) {
        self.writes = 0;
    }

    /// Put a file on the card.
    pub fn insert_file(&mut self, path: &str, data: Vec<u8>) {
        self.files.insert(path.to_string(), data);
    }

    /// Current contents of a file.
    #[must_use]
    pub fn file(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    /// Make the next `op` fail with a device error.
    pub fn fail_next(&mut self, op: FailOp) {
        self.fail_next = Some(op);
    }

    fn take_fail(&mut self, op: FailOp) -> bool {
        if self.fail_next == Some(op) {
            self.fail_next = None;
            true
        } else {
            false
        }
    }

    fn slot(&mut self, handle: FileHandle) -> Result<&mut OpenFile, FsError> {
        self.open
            .get_mut(usize::from(handle.0))
            .and_then(Option::as_mut)
            .ok_or(FsError::BadHandle)
    }
}

impl Volume for MemVolume {
    fn mount(&mut self, _partition: u8) -> Result<(), FsError> {
        if self.take_fail(FailOp::Mount) {
            return Err(FsError::Device);
        }
        self.mounted = true;
        Ok(())
    }

    fn open(&mut self, path: &str) -> Result<FileHandle, FsError> {
        if !self.mounted {
            return Err(FsError::NotMounted);
        }
        if self.take_fail(FailOp::Open) {
            return Err(FsError::Device);
        }
        if !self.files.contains_key(path) {
            return Err(FsError::NotFound);
        }
        let id = self.open.len() as u16;
        self.open.push(Some(OpenFile {
            path: path.to_string(),
            pos: 0,
        }));
        Ok(FileHandle(id))
    }

    fn create(&mut self, path: &str) -> Result<FileHandle, FsError> {
        if !self.mounted {
            return Err(FsError::NotMounted);
        }
        if self.take_fail(FailOp::Open) {
            return Err(FsError::Device);
        }
        self.files.insert(path.to_string(), Vec::new());
        let id = self.open.len() as u16;
        self.open.push(Some(OpenFile {
            path: path.to_string(),
            pos: 0,
        }));
        Ok(FileHandle(id))
    }

    fn close(&mut self, handle: FileHandle) {
        if let Some(slot) = self.open.get_mut(usize::from(handle.0)) {
            *slot = None;
        }
    }

    fn size(&self, handle: FileHandle) -> Result<(u16, u16), FsError> {
        let open = self
            .open
            .get(usize::from(handle.0))
            .and_then(Option::as_ref)
            .ok_or(FsError::BadHandle)?;
        let len = self.files.get(&open.path).ok_or(FsError::NotFound)?.len() as u32;
        Ok((len as u16, (len >> 16) as u16))
    }

    fn seek(&mut self, handle: FileHandle, lo: u16, hi: u16) -> Result<(), FsError> {
        if self.take_fail(FailOp::Seek) {
            return Err(FsError::Device);
        }
        let pos = (u32::from(hi) << 16) | u32::from(lo);
        let len = {
            let open = self
                .open
                .get(usize::from(handle.0))
                .and_then(Option::as_ref)
                .ok_or(FsError::BadHandle)?;
            self.files.get(&open.path).ok_or(FsError::NotFound)?.len() as u32
        };
        if pos > len {
            return Err(FsError::SeekRange);
        }
        self.slot(handle)?.pos = pos;
        Ok(())
    }

    fn read_byte(&mut self, handle: FileHandle) -> Result<Option<u8>, FsError> {
        if self.take_fail(FailOp::Read) {
            return Err(FsError::Device);
        }
        let open = self
            .open
            .get(usize::from(handle.0))
            .and_then(Option::as_ref)
            .ok_or(FsError::BadHandle)?;
        let data = self.files.get(&open.path).ok_or(FsError::NotFound)?;
        let pos = open.pos;
        if pos as usize >= data.len() {
            return Ok(None);
        }
        let byte = data[pos as usize];
        self.slot(handle)?.pos = pos + 1;
        Ok(Some(byte))
    }

    fn write_byte(&mut self, handle: FileHandle, byte: u8) -> Result<(), FsError> {
        if self.take_fail(FailOp::Write) {
            return Err(FsError::Device);
        }
        let (path, pos) = {
            let open = self
                .open
                .get(usize::from(handle.0))
                .and_then(Option::as_ref)
                .ok_or(FsError::BadHandle)?;
            (open.path.clone(), open.pos)
        };
        let data = self.files.get_mut(&path).ok_or(FsError::NotFound)?;
        if (pos as usize) < data.len() {
            data[pos as usize] = byte;
        } else {
            data.push(byte);
        }
        self.slot(handle)?.pos = pos + 1;
        self.writes += 1;
        Ok(())
    }

    fn flush(&mut self, handle: FileHandle) -> Result<(), FsError> {
        if self.take_fail(FailOp::Flush) {
            return Err(FsError::Device);
        }
        self.slot(handle).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_round_trip() {
        let mut vol = MemVolume::new();
        vol.insert_file("/a.bin", vec![1, 2, 3]);
        vol.mount(0).unwrap();

        let h = vol.open("/a.bin").unwrap();
        assert_eq!(vol.size(h).unwrap(), (3, 0));
        assert_eq!(vol.read_byte(h).unwrap(), Some(1));
        vol.seek(h, 2, 0).unwrap();
        vol.write_byte(h, 9).unwrap();
        vol.write_byte(h, 10).unwrap();
        assert_eq!(vol.file("/a.bin").unwrap(), &[1, 2, 9, 10]);
    }

    #[test]
    fn injected_failure_fires_once() {
        let mut vol = MemVolume::new();
        vol.insert_file("/a.bin", vec![0]);
        vol.mount(0).unwrap();
        let h = vol.open("/a.bin").unwrap();

        vol.fail_next(FailOp::Write);
        assert_eq!(vol.write_byte(h, 1), Err(FsError::Device));
        assert_eq!(vol.write_byte(h, 1), Ok(()));
    }

    #[test]
    fn open_requires_mount() {
        let mut vol = MemVolume::new();
        vol.insert_file("/a.bin", vec![0]);
        assert_eq!(vol.open("/a.bin"), Err(FsError::NotMounted));
    }
}
