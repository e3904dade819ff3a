//! The message interface: `key set <keyhex>` and `key wipe`, valid only
//! while the target is suspended.

use blockveil_core::CryptError;

use crate::target::ConstructedTarget;

pub fn dispatch(ct: &ConstructedTarget, argv: &[&str]) -> Result<(), CryptError> {
    match argv {
        ["key", "set", key_hex] => key_set(ct, key_hex),
        ["key", "wipe"] => ct.target.key_wipe(),
        _ => {
            tracing::warn!(?argv, "unrecognized message");
            Err(CryptError::Invalid)
        }
    }
}

fn key_set(ct: &ConstructedTarget, key_hex: &str) -> Result<(), CryptError> {
    if key_hex.len() % 2 != 0 || !key_hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
        return Err(CryptError::Invalid);
    }
    let bytes = hex::decode(key_hex).map_err(|_| CryptError::Invalid)?;
    ct.target.key_set(bytes)
}
