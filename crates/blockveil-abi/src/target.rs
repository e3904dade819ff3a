//! Target construction from the five positional arguments named in the
//! control-plane interface.

use std::sync::Arc;

use blockveil_core::{BenbiIv, ChainMode, CryptError, EssivIv, IvMode, NullIv, PlainIv, SectorNumber, SyncCipherBackend};
use blockveil_membrane::{BlockDevice, Target};

use crate::spec::CipherSpec;

/// A constructed target plus the identity fields the control-plane
/// surface reports back (§6) but that `blockveil-membrane::Target`
/// itself has no need to carry.
pub struct ConstructedTarget {
    pub target: Arc<Target>,
    pub cipher_spec: CipherSpec,
    pub key_len: usize,
    pub device_name: String,
}

const AES_BLOCK_SIZE: usize = 16;

/// Parses `key_hex` per the control-plane grammar: even-length lowercase
/// hex, or the literal `"-"` meaning "no key yet" (zero-length key, not
/// yet valid).
fn parse_key_hex(key_hex: &str) -> Result<(Vec<u8>, bool), CryptError> {
    if key_hex == "-" {
        return Ok((Vec::new(), false));
    }
    if key_hex.len() % 2 != 0 || !key_hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
        return Err(CryptError::Invalid);
    }
    let bytes = hex::decode(key_hex).map_err(|_| CryptError::Invalid)?;
    Ok((bytes, true))
}

fn build_iv_mode(spec: &CipherSpec, iv_size: usize, key: &[u8]) -> Result<IvMode, CryptError> {
    match spec.ivmode.as_str() {
        "plain" => Ok(IvMode::Plain(PlainIv::new(iv_size))),
        "null" => Ok(IvMode::Null(NullIv::new(iv_size))),
        "benbi" => Ok(IvMode::Benbi(BenbiIv::new(iv_size, AES_BLOCK_SIZE)?)),
        "essiv" => {
            let hash_name = spec.ivopts.as_deref().ok_or(CryptError::Invalid)?;
            Ok(IvMode::Essiv(EssivIv::new(iv_size, &spec.cipher, hash_name, key)?))
        }
        _ => Err(CryptError::Invalid),
    }
}

/// Constructs a target from the five positional arguments:
/// `<cipher-spec> <key-hex> <iv-offset> <backing-device> <start-sector>`.
/// `device` is the caller-supplied lower block layer `backing_device`
/// names — this crate has no way to resolve a device name to a live
/// `BlockDevice` on its own.
pub fn construct(
    cipher_spec: &str,
    key_hex: &str,
    iv_offset: u64,
    backing_device: &str,
    start_sector: SectorNumber,
    device: Arc<dyn BlockDevice>,
) -> Result<ConstructedTarget, CryptError> {
    let spec = CipherSpec::parse(cipher_spec)?;
    if spec.cipher != "aes" {
        // The only cipher this pack's crypto crates actually back.
        return Err(CryptError::Invalid);
    }
    let chainmode = ChainMode::parse(&spec.chainmode).ok_or(CryptError::Invalid)?;

    let (key, key_valid) = parse_key_hex(key_hex)?;
    let key_len = if key.is_empty() { 32 } else { key.len() };
    // A not-yet-keyed target still needs a correctly sized placeholder so
    // the backend's internal cipher-mode dispatch has something to key
    // against; it is never used for real conversion before `key set`
    // installs real bytes, because `preresume` refuses to resume first.
    let backend_key = if key.is_empty() { vec![0u8; key_len] } else { key.clone() };
    if !matches!(backend_key.len(), 16 | 24 | 32) {
        return Err(CryptError::Invalid);
    }

    let backend = SyncCipherBackend::new(&spec.cipher, chainmode, backend_key.clone())?;
    let iv_gen = build_iv_mode(&spec, backend.iv_size(), &backend_key)?;

    let target = Target::sync(backend, iv_gen, backend_key, key_valid, start_sector, iv_offset, device);

    Ok(ConstructedTarget {
        target: Arc::new(target),
        cipher_spec: spec,
        key_len,
        device_name: backing_device.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockveil_core::Bio;
    use blockveil_membrane::device::DeviceCompletion;

    struct NullDevice;
    impl BlockDevice for NullDevice {
        fn submit(&self, _bio: Bio, on_complete: DeviceCompletion) {
            on_complete(Ok(()));
        }
    }

    #[test]
    fn test_construct_plain_aes_cbc() {
        let key_hex = "00".repeat(32);
        let result = construct("aes-cbc-plain", &key_hex, 0, "/dev/null", 0, Arc::new(NullDevice));
        assert!(result.is_ok());
    }

    #[test]
    fn test_construct_essiv_sha256() {
        let key_hex = "00".repeat(32);
        let result = construct("aes-cbc-essiv:sha256", &key_hex, 0, "/dev/null", 0, Arc::new(NullDevice));
        assert!(result.is_ok());
    }

    #[test]
    fn test_construct_no_key_yet_is_invalid_for_resume() {
        let result = construct("aes-cbc-plain", "-", 0, "/dev/null", 0, Arc::new(NullDevice));
        let constructed = result.unwrap();
        assert!(constructed.target.preresume().is_err());
    }

    #[test]
    fn test_construct_rejects_bad_hex() {
        let result = construct("aes-cbc-plain", "zz", 0, "/dev/null", 0, Arc::new(NullDevice));
        assert!(result.is_err());
    }

    #[test]
    fn test_construct_rejects_odd_length_hex() {
        let result = construct("aes-cbc-plain", "abc", 0, "/dev/null", 0, Arc::new(NullDevice));
        assert!(result.is_err());
    }
}
