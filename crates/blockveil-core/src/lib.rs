//! Sector-granular encrypt/decrypt conversion engine.
//!
//! This crate implements the data path only: IV generation, the two
//! cipher backends, and the cursor that walks a source/destination bio
//! pair one sector at a time. Resource pooling, worker-thread dispatch,
//! and the request lifecycle object that ties a conversion back to an
//! upper-layer I/O live in `blockveil-membrane`, which is the crate that
//! actually interposes between a block-I/O submitter and a backing
//! device.

pub mod bio;
pub mod cipher;
pub mod convert;
pub mod error;
pub mod hash;
pub mod iv;
pub mod sector;

pub use bio::{Bio, Page, Segment};
pub use cipher::{AsyncCipherBackend, CipherEngine, ChainMode, SyncCipherBackend};
pub use convert::ConversionContext;
pub use error::{CryptError, CryptResult};
pub use iv::{BenbiIv, EssivIv, IvGenerator, IvMode, NullIv, PlainIv};
pub use sector::{Direction, SectorNumber, SECTOR_SIZE};
