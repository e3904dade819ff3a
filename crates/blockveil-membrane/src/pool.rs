//! The two bounded pools: request lifecycle objects and data pages used
//! by write cloning. Both guarantee forward progress under memory
//! pressure by reserving a minimum free count that ordinary allocation
//! never dips below.

use parking_lot::Mutex;

use blockveil_core::bio::{new_page, Page};
use blockveil_core::CryptError;

/// Minimum reserved RLO slots, guaranteed available even under pressure.
pub const MIN_IOS: usize = 256;
/// Minimum reserved pages, guaranteed available even under pressure.
pub const MIN_POOL_PAGES: usize = 32;

/// Bytes per pool page: large enough to hold several sectors, the way a
/// real page-pool page (4 KiB) holds eight 512-byte sectors.
pub const PAGE_SIZE: usize = 8 * blockveil_core::sector::SECTOR_SIZE;

/// Counts outstanding allocations against a fixed reserve. Allocation
/// against the reserve always succeeds; allocation beyond it may fail
/// under pressure rather than block, mirroring a `mempool_alloc`
/// guarantee rather than a general-purpose allocator.
struct Reserve {
    outstanding: Mutex<usize>,
    capacity: usize,
}

impl Reserve {
    fn new(capacity: usize) -> Self {
        Self { outstanding: Mutex::new(0), capacity }
    }

    fn try_take(&self) -> bool {
        let mut out = self.outstanding.lock();
        if *out >= self.capacity {
            return false;
        }
        *out += 1;
        true
    }

    fn release(&self) {
        let mut out = self.outstanding.lock();
        debug_assert!(*out > 0, "pool release without a matching take");
        *out = out.saturating_sub(1);
    }
}

/// Bounded reserve of RLO slots. The pool itself does not own
/// `RequestLifecycleObject` storage — callers construct one fresh per
/// bio and simply respect the reserve's admission control, matching how
/// an object pool with non-trivial per-request state (an embedded
/// closure, in this case) is more naturally expressed as a counting
/// admission gate than a literal freelist of reusable objects.
pub struct RloPool {
    reserve: Reserve,
}

impl RloPool {
    pub fn new() -> Self {
        Self { reserve: Reserve::new(MIN_IOS) }
    }

    /// Admits one RLO allocation, or logs and returns `NoMemory` if the
    /// reserve is exhausted. Pairs with [`RloPool::release`], called once
    /// the RLO this permit was taken for has completed — kept as two
    /// explicit calls rather than an RAII guard because the release has
    /// to happen from inside a `'static` completion closure that may run
    /// on a different thread than the one that admitted it.
    pub fn admit(&self) -> Result<(), CryptError> {
        if self.reserve.try_take() {
            Ok(())
        } else {
            tracing::error!("RLO pool exhausted");
            Err(CryptError::NoMemory)
        }
    }

    pub fn release(&self) {
        self.reserve.release();
    }
}

impl Default for RloPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded reserve of data pages, used by the write path to allocate
/// destination clones.
pub struct PagePool {
    reserve: Reserve,
    page_len: usize,
}

impl PagePool {
    pub fn new(page_len: usize) -> Self {
        Self { reserve: Reserve::new(MIN_POOL_PAGES), page_len }
    }

    /// Allocates one page. `blocking` mirrors the write path's
    /// "first `MIN_BIO_PAGES` may block" rule: when `true` and the
    /// reserve is momentarily exhausted, this retries briefly rather than
    /// failing outright; when `false`, exhaustion fails immediately so a
    /// short clone is preferred over sleeping.
    pub fn alloc(&self, blocking: bool) -> Option<Page> {
        if self.reserve.try_take() {
            return Some(new_page(self.page_len));
        }
        if !blocking {
            tracing::debug!("page pool momentarily exhausted, returning short");
            return None;
        }
        for _ in 0..8 {
            std::thread::sleep(std::time::Duration::from_millis(1));
            if self.reserve.try_take() {
                return Some(new_page(self.page_len));
            }
        }
        tracing::warn!("page pool exhausted even on blocking allocation");
        None
    }

    pub fn free(&self) {
        self.reserve.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rlo_pool_admits_up_to_reserve() {
        let pool = RloPool::new();
        for _ in 0..MIN_IOS {
            pool.admit().unwrap();
        }
        assert!(pool.admit().is_err());
        pool.release();
        assert!(pool.admit().is_ok());
    }

    #[test]
    fn test_page_pool_non_blocking_alloc_fails_past_reserve() {
        let pool = PagePool::new(512);
        let mut pages = Vec::new();
        for _ in 0..MIN_POOL_PAGES {
            pages.push(pool.alloc(false).unwrap());
        }
        assert!(pool.alloc(false).is_none());
        pool.free();
        assert!(pool.alloc(false).is_some());
    }
}
