//! Status reporting: table and info forms.

use crate::target::ConstructedTarget;

/// Table form: `"cipher-chainmode[-ivmode] <keyhex-or-dash> <iv-offset>
/// <dev-name> <start-sector>"`.
pub fn table(ct: &ConstructedTarget) -> String {
    let key_field = ct.target.key_hex().unwrap_or_else(|| "-".to_string());
    format!(
        "{} {} {} {} {}",
        ct.cipher_spec.canonical(),
        key_field,
        ct.target.iv_offset,
        ct.device_name,
        ct.target.start_sector,
    )
}

/// Info form: always empty, per the control-plane interface.
pub fn info(_ct: &ConstructedTarget) -> String {
    String::new()
}
