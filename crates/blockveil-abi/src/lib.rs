//! The control-plane surface named but not implemented by
//! `blockveil-core`'s data path: target construction from the five
//! positional arguments, status/message, and suspend/resume lifecycle
//! hooks. Everything here is glue over `blockveil-membrane::Target`; no
//! cryptography happens in this crate.

pub mod lifecycle;
pub mod message;
pub mod spec;
pub mod status;
pub mod target;

pub use spec::CipherSpec;
pub use target::ConstructedTarget;
