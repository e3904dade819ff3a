//! Target configuration: the immutable-except-key-slot state shared by
//! every bio this target processes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use blockveil_core::{AsyncCipherBackend, CipherEngine, CryptError, IvGenerator, IvMode, SectorNumber, SyncCipherBackend};

use crate::device::BlockDevice;
use crate::pool::{PagePool, RloPool, PAGE_SIZE};

/// One backend or the other, chosen at construction per the cipher spec.
enum Backend {
    Sync(SyncCipherBackend),
    Async(AsyncCipherBackend),
}

impl Backend {
    fn engine(&self) -> &dyn CipherEngine {
        match self {
            Backend::Sync(b) => b,
            Backend::Async(b) => b,
        }
    }

    fn set_key(&self, new_key: Vec<u8>) -> Result<(), CryptError> {
        match self {
            Backend::Sync(b) => b.set_key(new_key),
            Backend::Async(b) => b.set_key(new_key),
        }
    }

    fn wipe_key(&self) {
        match self {
            Backend::Sync(b) => b.wipe_key(),
            Backend::Async(b) => b.wipe_key(),
        }
    }
}

/// A key slot that may be rewritten, but only while the target is
/// suspended: the data bytes themselves, plus a validity flag.
struct KeySlot {
    bytes: Vec<u8>,
    valid: bool,
}

impl Drop for KeySlot {
    fn drop(&mut self) {
        self.bytes.fill(0);
    }
}

/// Immutable target configuration (except the key slot, guarded by its
/// own lock and only mutable while suspended).
pub struct Target {
    pub start_sector: SectorNumber,
    pub iv_offset: u64,
    backend: Backend,
    iv_gen: IvMode,
    key: RwLock<KeySlot>,
    suspended: AtomicBool,
    pub rlo_pool: RloPool,
    pub page_pool: PagePool,
    pub device: Arc<dyn BlockDevice>,
}

impl Target {
    /// `key_valid` is `false` for a target constructed with the `"-"`
    /// (no key yet) key-hex form: the backend is still built against
    /// `key`'s bytes (so its length fixes the cipher's key size for a
    /// later `key set`), but preresume refuses to resume until a real
    /// key is installed.
    pub fn new(
        backend: Backend,
        iv_gen: IvMode,
        key: Vec<u8>,
        key_valid: bool,
        start_sector: SectorNumber,
        iv_offset: u64,
        device: Arc<dyn BlockDevice>,
    ) -> Self {
        let key = RwLock::new(KeySlot { bytes: key, valid: key_valid });
        Self {
            start_sector,
            iv_offset,
            backend,
            iv_gen,
            key,
            suspended: AtomicBool::new(false),
            rlo_pool: RloPool::new(),
            page_pool: PagePool::new(PAGE_SIZE),
            device,
        }
    }

    pub fn sync(
        backend: SyncCipherBackend,
        iv_gen: IvMode,
        key: Vec<u8>,
        key_valid: bool,
        start_sector: SectorNumber,
        iv_offset: u64,
        device: Arc<dyn BlockDevice>,
    ) -> Self {
        Self::new(Backend::Sync(backend), iv_gen, key, key_valid, start_sector, iv_offset, device)
    }

    pub fn asynchronous(
        backend: AsyncCipherBackend,
        iv_gen: IvMode,
        key: Vec<u8>,
        key_valid: bool,
        start_sector: SectorNumber,
        iv_offset: u64,
        device: Arc<dyn BlockDevice>,
    ) -> Self {
        let backend = backend.with_max_inflight(crate::config::max_inflight());
        Self::new(Backend::Async(backend), iv_gen, key, key_valid, start_sector, iv_offset, device)
    }

    pub fn engine(&self) -> &dyn CipherEngine {
        self.backend.engine()
    }

    pub fn iv_generator(&self) -> &dyn IvGenerator {
        &self.iv_gen
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    pub fn postsuspend(&self) {
        self.suspended.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.suspended.store(false, Ordering::Release);
    }

    /// Refuses to resume (retry-again semantic) if the key is not valid.
    pub fn preresume(&self) -> Result<(), CryptError> {
        if self.key.read().unwrap().valid {
            Ok(())
        } else {
            Err(CryptError::Again)
        }
    }

    pub fn key_hex(&self) -> Option<String> {
        let slot = self.key.read().unwrap();
        slot.valid.then(|| hex::encode(&slot.bytes))
    }

    /// `key set <new>`: only valid while suspended, requires matching
    /// length with the existing key. Rewrites both the status-facing
    /// slot and the backend's own operative key, so I/O issued after this
    /// call actually uses `new_key`.
    pub fn key_set(&self, new_key: Vec<u8>) -> Result<(), CryptError> {
        if !self.is_suspended() {
            return Err(CryptError::Perm);
        }
        let mut slot = self.key.write().unwrap();
        if new_key.len() != slot.bytes.len() {
            return Err(CryptError::Invalid);
        }
        self.backend.set_key(new_key.clone())?;
        slot.bytes = new_key;
        slot.valid = true;
        Ok(())
    }

    /// `key wipe`: zeroes the key and clears key-valid, on both the
    /// status-facing slot and the backend's operative key so encryption
    /// and decryption stop using the old key immediately.
    pub fn key_wipe(&self) -> Result<(), CryptError> {
        if !self.is_suspended() {
            return Err(CryptError::Perm);
        }
        let mut slot = self.key.write().unwrap();
        self.backend.wipe_key();
        slot.bytes.fill(0);
        slot.valid = false;
        Ok(())
    }
}
