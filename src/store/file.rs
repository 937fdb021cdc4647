use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use bincode::config::Configuration;

use crate::error::Error;

use super::{PeerStore, StoreData};

const BINCODE_CONFIG: Configuration = bincode::config::standard();

/// Whole-state file store.
///
/// Every operation reloads the file, so edits made by another process are
/// picked up; writes go through a temp file and a rename.
///
/// An advisory lock on a sibling `.lock` file is held for the whole of each
/// operation: shared for reads, exclusive for load-modify-save. Every handle
/// opens its own descriptor, so this also serialises threads and separate
/// `FileStore`s on the same path.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

enum LockMode {
    Shared,
    Exclusive,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let lock_path = path.with_extension("lock");
        let store = Self { path, lock_path };

        // Fail early on a corrupt file.
        store.read(|_| ())?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Released when the returned file is dropped.
    fn lock(&self, mode: LockMode) -> Result<File, Error> {
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)?;

        match mode {
            LockMode::Shared => fs2::FileExt::lock_shared(&file)?,
            LockMode::Exclusive => fs2::FileExt::lock_exclusive(&file)?,
        }

        Ok(file)
    }

    fn load(&self) -> Result<StoreData, Error> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StoreData::default());
            }
            Err(err) => return Err(err.into()),
        };

        Ok(bincode::decode_from_slice(&bytes, BINCODE_CONFIG)?.0)
    }

    fn save(&self, data: &StoreData) -> Result<(), Error> {
        let bytes = bincode::encode_to_vec(data, BINCODE_CONFIG)?;
        let tmp = self.path.with_extension("tmp");

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        // Holds private keys.
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PeerStore for FileStore {
    fn read<T>(&self, f: impl FnOnce(&StoreData) -> T) -> Result<T, Error> {
        let _lock = self.lock(LockMode::Shared)?;
        Ok(f(&self.load()?))
    }

    fn write<T>(&self, f: impl FnOnce(&mut StoreData) -> Result<T, Error>) -> Result<T, Error> {
        let _lock = self.lock(LockMode::Exclusive)?;

        let mut data = self.load()?;
        let res = f(&mut data)?;
        self.save(&data)?;

        Ok(res)
    }
}
