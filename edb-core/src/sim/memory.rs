//! Simulated target memory and breakpoint mask storage.

use crate::hal::{NvStore, TargetMemory};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

/// Sparse byte-addressed memory; unwritten bytes read as zero.
#[derive(Debug, Default)]
pub struct SimMemory {
    bytes: Mutex<HashMap<u32, u8>>,
}

impl SimMemory {
    /// Empty memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `data` to `address`.
    pub fn load(&self, address: u32, data: &[u8]) {
        let mut bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        for (offset, &value) in data.iter().enumerate() {
            bytes.insert(address.wrapping_add(offset as u32), value);
        }
    }

    /// Read `len` bytes from `address`.
    pub fn read(&self, address: u32, len: usize) -> Vec<u8> {
        let bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        (0..len as u32)
            .map(|offset| bytes.get(&address.wrapping_add(offset)).copied().unwrap_or_default())
            .collect()
    }
}

impl TargetMemory for SimMemory {
    fn read_byte(&self, address: u32) -> u8 {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&address)
            .copied()
            .unwrap_or_default()
    }

    fn write_byte(&self, address: u32, value: u8) {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner).insert(address, value);
    }
}

/// Mask store that outlives the board it is plugged into, the way FRAM
/// outlives a power cycle. Clones share the stored value.
#[derive(Debug, Clone, Default)]
pub struct RamNvStore(Arc<Mutex<u16>>);

impl RamNvStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding `mask`.
    pub fn with_mask(mask: u16) -> Self {
        Self(Arc::new(Mutex::new(mask)))
    }

    /// Stored value.
    pub fn mask(&self) -> u16 {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NvStore for RamNvStore {
    fn load(&self) -> Result<u16> {
        Ok(self.mask())
    }

    fn store(&mut self, mask: u16) -> Result<()> {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = mask;
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    breakpoints: u16,
}

/// Mask store backed by a JSON file.
#[derive(Debug, Clone)]
pub struct FileNvStore {
    path: PathBuf,
}

impl FileNvStore {
    /// Store at `path`; the file is created on the first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl NvStore for FileNvStore {
    fn load(&self) -> Result<u16> {
        if !self.path.exists() {
            return Ok(0);
        }
        let text = std::fs::read_to_string(&self.path)?;
        let state: PersistedState = serde_json::from_str(&text)?;
        Ok(state.breakpoints)
    }

    fn store(&mut self, mask: u16) -> Result<()> {
        let text = serde_json::to_string_pretty(&PersistedState { breakpoints: mask })?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_defaults_to_zero() {
        let memory = SimMemory::new();
        memory.load(0x2000, &[0x11, 0x22]);
        assert_eq!(memory.read(0x1FFF, 4), vec![0, 0x11, 0x22, 0]);
        memory.write_byte(0x2002, 0x33);
        assert_eq!(memory.read_byte(0x2002), 0x33);
    }

    #[test]
    fn test_ram_store_is_shared() {
        let mut store = RamNvStore::new();
        let survivor = store.clone();
        store.store(0x8001).unwrap();
        assert_eq!(survivor.load().unwrap(), 0x8001);
    }

    #[test]
    fn test_file_store_round_trip() {
        let path = std::env::temp_dir().join(format!("edb-nv-{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let mut store = FileNvStore::new(&path);
        assert_eq!(store.load().unwrap(), 0);
        store.store(0x0042).unwrap();
        assert_eq!(FileNvStore::new(&path).load().unwrap(), 0x0042);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_file_store_rejects_garbage() {
        let path = std::env::temp_dir().join(format!("edb-nv-bad-{}.json", std::process::id()));
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(FileNvStore::new(&path).load(), Err(crate::Error::Json(_))));
        std::fs::remove_file(&path).unwrap();
    }
}
