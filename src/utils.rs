//! Identifier helpers shared by the stores and workflows

use bech32::Bech32m;
use uuid7::uuid7;

/// Human readable prefix for user accounts
pub const USER_HRP: &str = "user_";
/// Human readable prefix for ledger entries (wallet transactions)
pub const LEDGER_HRP: &str = "ltx_";
/// Human readable prefix for member reports
pub const REPORT_HRP: &str = "report_";

// construct a unique id then encode using bech32m
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

pub fn new_user_id() -> anyhow::Result<String> {
    new_uuid_to_bech32(USER_HRP)
}

pub fn new_entry_id() -> anyhow::Result<String> {
    new_uuid_to_bech32(LEDGER_HRP)
}

pub fn new_report_id() -> anyhow::Result<String> {
    new_uuid_to_bech32(REPORT_HRP)
}

/// Returns true when `id` decodes as bech32 with the expected prefix.
pub fn has_prefix(id: &str, hrp: &str) -> bool {
    match bech32::decode(id) {
        Ok((decoded, _)) => decoded.as_str() == hrp.to_lowercase(),
        Err(_) => false,
    }
}
