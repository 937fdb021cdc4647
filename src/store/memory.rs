use std::sync::{Mutex, MutexGuard};

use crate::error::Error;

use super::{PeerStore, StoreData};

#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<StoreData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreData> {
        // A panic mid-write leaves at most one patch half applied.
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PeerStore for MemoryStore {
    fn read<T>(&self, f: impl FnOnce(&StoreData) -> T) -> Result<T, Error> {
        Ok(f(&self.lock()))
    }

    fn write<T>(&self, f: impl FnOnce(&mut StoreData) -> Result<T, Error>) -> Result<T, Error> {
        f(&mut self.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_contract() {
        super::super::tests::exercise(&MemoryStore::new());
    }
}
