//! Named secret-store slots the runtime persists state in.
//!
//! Each document-backed store owns exactly one `(service, account)` slot and
//! serialises its whole state there as JSON. Keeping the names in one place
//! makes uninstall cleanup auditable.

/// Whitelist store slot.
pub const WHITELIST_SERVICE: &str = "com.osaurus.whitelist";
/// Whitelist store account.
pub const WHITELIST_ACCOUNT: &str = "whitelist-data";

/// Revocation store slot.
pub const REVOCATION_SERVICE: &str = "com.osaurus.revocations";
/// Revocation store account.
pub const REVOCATION_ACCOUNT: &str = "revocation-data";

/// Per-device counter store slot.
pub const COUNTER_SERVICE: &str = "com.osaurus.counters";
/// Counter store account.
pub const COUNTER_ACCOUNT: &str = "counter-data";

/// Master key slot.
pub const IDENTITY_SERVICE: &str = "com.osaurus.identity";
/// Master key account.
pub const IDENTITY_MASTER_ACCOUNT: &str = "master-key";

/// Per-plugin config documents live under this service, one account per
/// plugin id, so uninstalling a plugin deletes exactly one entry.
pub const PLUGIN_CONFIG_SERVICE: &str = "com.osaurus.plugins";
