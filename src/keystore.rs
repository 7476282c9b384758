//
// keystore.rs
// dicom-deid
//
// Loads the symmetric key from disk, generating and persisting it on first use.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{DeidError, Result};

pub const DEFAULT_KEY_PATH: &str = "secret.key";

/// Raw AES-256 key length before text encoding.
pub const KEY_LEN: usize = 32;

/// Opaque key bytes exactly as stored in the key file.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Fresh random key in the on-disk text encoding.
    pub fn generate() -> Self {
        let mut raw = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut raw);
        let encoded = URL_SAFE.encode(raw);
        raw.zeroize();
        Self(encoded.into_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial([REDACTED])")
    }
}

/// File-backed key location. Clones share the creation lock.
#[derive(Clone)]
pub struct KeyStore {
    path: PathBuf,
    create_lock: Arc<Mutex<()>>,
}

impl KeyStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            create_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the stored key, creating it exactly once if the file is missing.
    pub fn load_or_create(&self) -> Result<KeyMaterial> {
        let _guard = self
            .create_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match fs::read(&self.path) {
            Ok(bytes) => return Ok(KeyMaterial::from_bytes(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(DeidError::storage(&self.path, err)),
        }

        let key = KeyMaterial::generate();
        match self.persist_new(&key) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "generated new encryption key");
                Ok(key)
            }
            // Another process created the file between our read and link.
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => fs::read(&self.path)
                .map(KeyMaterial::from_bytes)
                .map_err(|err| DeidError::storage(&self.path, err)),
            Err(err) => Err(DeidError::storage(&self.path, err)),
        }
    }

    /// Writes the key to a private temp file, then links it into place so
    /// readers never observe a partially written key.
    fn persist_new(&self, key: &KeyMaterial) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_KEY_PATH.to_string());
        let tmp = self
            .path
            .with_file_name(format!(".{}.{:016x}.tmp", file_name, OsRng.next_u64()));

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let result = options
            .open(&tmp)
            .and_then(|mut file| {
                file.write_all(key.as_bytes())?;
                file.sync_all()
            })
            .and_then(|()| fs::hard_link(&tmp, &self.path));
        let _ = fs::remove_file(&tmp);
        result
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PATH)
    }
}

/// Loads or creates the key at the default well-known path.
pub fn load_or_create_key() -> Result<KeyMaterial> {
    KeyStore::default().load_or_create()
}
