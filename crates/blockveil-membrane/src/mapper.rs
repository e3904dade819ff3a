//! The entry point invoked once per incoming bio from the upper layer.
//!
//! Never performs sleeping cryptography itself: it allocates an RLO
//! (from a pool that guarantees forward progress), runs the bio through
//! the bounce shim, and posts a continuation to the worker queue — safe
//! to call from any context the upper layer chooses, including one that
//! must not block.

use std::sync::Arc;

use blockveil_core::{Bio, CryptError, Direction};

use crate::bounce::BounceShim;
use crate::rlo::RequestLifecycleObject;
use crate::target::Target;
use crate::worker::{process_read, process_write, WorkerQueue};

pub struct Mapper {
    target: Arc<Target>,
    worker: Arc<WorkerQueue>,
}

impl Mapper {
    pub fn new(target: Arc<Target>, worker: Arc<WorkerQueue>) -> Self {
        Self { target, worker }
    }

    /// Submits `bio`, invoking `on_complete` once the RLO it allocates has
    /// finished (pending reached zero).
    pub fn submit(&self, bio: Bio, on_complete: impl FnOnce(&Bio, Result<(), CryptError>) + Send + 'static) -> Result<(), CryptError> {
        self.target.rlo_pool.admit()?;
        let direction = bio.direction;
        let (bio, bounce_tag) = match direction {
            Direction::Encrypt => BounceShim::wrap_for_write(bio),
            Direction::Decrypt => BounceShim::wrap_for_read(bio),
        };

        let release_target = self.target.clone();
        let rlo = Arc::new(RequestLifecycleObject::new(bio, move |bio, res| {
            on_complete(bio, res);
            release_target.rlo_pool.release();
        }));
        if let Some(tag) = bounce_tag {
            rlo.set_bounce_tag(tag);
        }

        let target = self.target.clone();
        let worker = self.worker.clone();
        match direction {
            Direction::Encrypt => worker.submit(Box::new(move || process_write(target, rlo, worker.clone()))),
            Direction::Decrypt => worker.submit(Box::new(move || process_read(target, rlo, worker.clone()))),
        }
        Ok(())
    }
}
