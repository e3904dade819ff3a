//! The request lifecycle object: tracks one upper-layer bio from
//! submission to completion across however many clone bios the write or
//! read path ends up submitting underneath it.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicIsize, Ordering};
use std::sync::Mutex;

use blockveil_core::{Bio, CryptError};

use crate::bounce::BounceTag;

/// One upper-layer bio's journey through encryption or decryption.
///
/// `pending` is signed so that `dec_pending`'s "did we just reach zero"
/// check is a single `fetch_sub`-and-compare with no separate sign
/// check; a debug assertion still catches the invariant violation
/// (pending dropping below zero) spec.md requires never happen.
pub struct RequestLifecycleObject {
    original: Mutex<Option<Bio>>,
    pending: AtomicIsize,
    /// 0 = no error yet; otherwise the first latched `CryptError`'s errno.
    latched_errno: AtomicI32,
    post_process: AtomicBool,
    bounce_tag: Mutex<Option<BounceTag>>,
    on_complete: Mutex<Option<Box<dyn FnOnce(&Bio, Result<(), CryptError>) + Send>>>,
}

impl RequestLifecycleObject {
    /// Allocates a fresh RLO for `original`, pending = 0, no latched
    /// error, `post_process` false. `on_complete` fires exactly once, the
    /// moment pending reaches zero.
    pub fn new(original: Bio, on_complete: impl FnOnce(&Bio, Result<(), CryptError>) + Send + 'static) -> Self {
        Self {
            original: Mutex::new(Some(original)),
            pending: AtomicIsize::new(0),
            latched_errno: AtomicI32::new(0),
            post_process: AtomicBool::new(false),
            bounce_tag: Mutex::new(None),
            on_complete: Mutex::new(Some(Box::new(on_complete))),
        }
    }

    /// Takes a pending reference before submitting a sub-operation.
    pub fn take_pending(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    pub fn post_process(&self) -> bool {
        self.post_process.load(Ordering::Acquire)
    }

    pub fn set_post_process(&self) {
        self.post_process.store(true, Ordering::Release);
    }

    pub fn set_bounce_tag(&self, tag: BounceTag) {
        *self.bounce_tag.lock().unwrap() = Some(tag);
    }

    /// Latches `err` if it is the first failure seen (first failure
    /// wins; later successes never clear it), releases the pending
    /// reference taken for this sub-operation, and — if pending has just
    /// reached zero — reverses any bounce substitution, completes the
    /// original bio, and returns `true` to tell the caller this RLO is
    /// now finished and its pool slot may be reclaimed.
    pub fn dec_pending(&self, result: Result<(), CryptError>) -> bool {
        if let Err(e) = result {
            let errno = e.errno();
            self.latched_errno
                .compare_exchange(0, errno, Ordering::AcqRel, Ordering::Acquire)
                .ok();
        }

        let prev = self.pending.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev >= 1, "RLO pending count underflowed: was {prev}");
        if prev != 1 {
            return false;
        }

        if let Some(tag) = self.bounce_tag.lock().unwrap().take() {
            tag.unwind();
        }

        let errno = self.latched_errno.load(Ordering::Acquire);
        let final_result = if errno == 0 { Ok(()) } else { Err(CryptError::from_errno(errno)) };

        let bio_guard = self.original.lock().unwrap();
        if let Some(bio) = bio_guard.as_ref() {
            if let Some(cb) = self.on_complete.lock().unwrap().take() {
                cb(bio, final_result);
            }
        }
        true
    }

    pub fn with_original<R>(&self, f: impl FnOnce(&Bio) -> R) -> R {
        let guard = self.original.lock().unwrap();
        f(guard.as_ref().expect("RLO original bio missing"))
    }
}
