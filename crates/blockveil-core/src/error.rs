//! Error taxonomy for the conversion engine.
//!
//! Every variant maps to a POSIX-style errno used by the control-plane
//! surface (`blockveil-abi`) when reporting failures upward.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CryptError {
    #[error("invalid argument")]
    Invalid,
    #[error("out of memory")]
    NoMemory,
    #[error("I/O error")]
    Io,
    #[error("resource temporarily unavailable")]
    Again,
    #[error("operation not permitted")]
    Perm,
}

impl CryptError {
    /// Negative POSIX-style code, matching the sign convention used
    /// throughout the control-plane surface.
    pub const fn errno(self) -> i32 {
        match self {
            CryptError::Invalid => -22, // EINVAL
            CryptError::NoMemory => -12, // ENOMEM
            CryptError::Io => -5, // EIO
            CryptError::Again => -11, // EAGAIN
            CryptError::Perm => -1, // EPERM
        }
    }

    /// Recovers a `CryptError` from one of the negative codes `errno`
    /// produces. Panics on any other value: this is only ever called on
    /// a code this crate itself latched.
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            -22 => CryptError::Invalid,
            -12 => CryptError::NoMemory,
            -5 => CryptError::Io,
            -11 => CryptError::Again,
            -1 => CryptError::Perm,
            other => panic!("unrecognized latched errno: {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_round_trips_through_from_errno() {
        for e in [CryptError::Invalid, CryptError::NoMemory, CryptError::Io, CryptError::Again, CryptError::Perm] {
            assert_eq!(CryptError::from_errno(e.errno()), e);
        }
    }
}

pub type CryptResult<T> = Result<T, CryptError>;
