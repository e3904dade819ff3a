//! Suspend/resume lifecycle hooks on the control-plane surface.

use blockveil_core::CryptError;

use crate::target::ConstructedTarget;

/// Refuses to resume (retry-again semantic) if the key is not valid.
pub fn preresume(ct: &ConstructedTarget) -> Result<(), CryptError> {
    ct.target.preresume()
}

/// Marks the target suspended, unlocking `key set`/`key wipe`.
pub fn postsuspend(ct: &ConstructedTarget) {
    ct.target.postsuspend();
}

/// Clears the suspended flag, allowing I/O to flow again.
pub fn resume(ct: &ConstructedTarget) {
    ct.target.resume();
}
