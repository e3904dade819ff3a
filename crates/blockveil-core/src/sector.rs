//! Fixed sector geometry shared by every component in the conversion path.

/// All cryptographic work proceeds in fixed 512-byte units, independent of
/// the backing device's own logical block size.
pub const SECTOR_SIZE: usize = 1 << 9;

/// A logical sector index, already offset by the target's `iv_offset` by
/// the time it reaches the IV generator.
pub type SectorNumber = u64;

/// Direction of a single sector conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}
