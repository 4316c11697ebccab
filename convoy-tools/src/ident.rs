use anyhow::Error;

/// A fresh random UUID in its hyphenated text form.
pub fn generate_uuid() -> String {
    proxmox_uuid::Uuid::generate().to_string()
}

/// Generate `<prefix>-<16 hex digits>` from a fresh UUID.
pub fn generate_name(prefix: &str) -> String {
    let hex: String = generate_uuid().chars().filter(|c| *c != '-').take(16).collect();
    format!("{}-{}", prefix, hex)
}

/// Current time as RFC3339 UTC string.
pub fn now_rfc3339() -> Result<String, Error> {
    proxmox_time::epoch_to_rfc3339_utc(proxmox_time::epoch_i64())
}

#[test]
fn test_generate_name() {
    let name = generate_name("backup");
    assert_eq!(name.len(), "backup-".len() + 16);
    assert!(name.starts_with("backup-"));
    assert!(name["backup-".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    assert_ne!(name, generate_name("backup"));
}
