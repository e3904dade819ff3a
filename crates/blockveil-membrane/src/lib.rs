//! Resource pooling, worker-thread dispatch, and the write/read path state
//! machines that sit above `blockveil-core`'s conversion engine.
//!
//! This crate owns everything `blockveil-core` deliberately stays out of:
//! the request lifecycle object, the two bounded pools, the dedicated
//! worker queue that keeps cryptography out of the caller's context, and
//! the write-clone / read-clone protocols that drive `ConversionContext`
//! against a real (or simulated) backing device.

pub mod bounce;
pub mod config;
pub mod device;
pub mod mapper;
pub mod pool;
pub mod rlo;
pub mod target;
pub mod worker;

pub use bounce::BounceShim;
pub use device::BlockDevice;
pub use mapper::Mapper;
pub use pool::{PagePool, RloPool, MIN_IOS, MIN_POOL_PAGES};
pub use rlo::RequestLifecycleObject;
pub use target::Target;
pub use worker::{process_read, process_write, WorkerQueue};
