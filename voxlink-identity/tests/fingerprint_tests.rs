use voxlink_identity::{normalize_mac, HardwareProfile};

// ── MAC normalization ───────────────────────────────────────────

#[test]
fn normalize_mac_dashes() {
    assert_eq!(normalize_mac("AA-BB-CC-DD-EE-FF"), "aa:bb:cc:dd:ee:ff");
}

#[test]
fn normalize_mac_colons() {
    assert_eq!(normalize_mac("aa:bb:cc:dd:ee:ff"), "aa:bb:cc:dd:ee:ff");
}

#[test]
fn normalize_mac_bare_hex() {
    assert_eq!(normalize_mac("AABBCCDDEEFF"), "aa:bb:cc:dd:ee:ff");
}

#[test]
fn normalize_mac_dot_groups() {
    assert_eq!(normalize_mac("aabb.ccdd.eeff"), "aa:bb:cc:dd:ee:ff");
}

#[test]
fn normalize_mac_wrong_length_passes_through() {
    assert_eq!(normalize_mac("AA-BB-CC"), "aa-bb-cc");
}

#[test]
fn normalize_mac_non_hex_passes_through() {
    assert_eq!(normalize_mac("GG-HH-II-JJ-KK-LL"), "gg-hh-ii-jj-kk-ll");
}

// ── Serial derivation ───────────────────────────────────────────

fn profile_with_mac(mac: Option<&str>) -> HardwareProfile {
    HardwareProfile {
        system: "linux".to_string(),
        hostname: "vox-test-host".to_string(),
        mac_address: mac.map(String::from),
        machine_id: Some("4c2a9f30e1d84b5f9b7c1d2e3f405162".to_string()),
    }
}

#[test]
fn serial_from_mac_has_expected_shape() {
    let serial = profile_with_mac(Some("aa:bb:cc:dd:ee:ff")).derive_serial();
    assert!(serial.starts_with("SN-"));
    assert!(serial.ends_with("-aabbccddeeff"));
    // SN- + 8 hex chars + - + 12 hex chars
    assert_eq!(serial.len(), 24);
}

#[test]
fn serial_hash_is_uppercase_hex() {
    let serial = profile_with_mac(Some("aa:bb:cc:dd:ee:ff")).derive_serial();
    let hash = &serial[3..11];
    assert!(hash
        .chars()
        .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
}

#[test]
fn serial_is_deterministic() {
    let a = profile_with_mac(Some("aa:bb:cc:dd:ee:ff")).derive_serial();
    let b = profile_with_mac(Some("aa:bb:cc:dd:ee:ff")).derive_serial();
    assert_eq!(a, b);
}

#[test]
fn distinct_macs_yield_distinct_serials() {
    let a = profile_with_mac(Some("aa:bb:cc:dd:ee:ff")).derive_serial();
    let b = profile_with_mac(Some("aa:bb:cc:dd:ee:00")).derive_serial();
    assert_ne!(a, b);
}

#[test]
fn serial_without_mac_uses_machine_id_prefix() {
    let serial = profile_with_mac(None).derive_serial();
    assert!(serial.starts_with("SN-"));
    assert!(serial.ends_with("-4c2a9f30e1d8"));
}

#[test]
fn serial_without_mac_or_machine_id_uses_hostname() {
    let profile = HardwareProfile {
        system: "linux".to_string(),
        hostname: "Vox-Host-01".to_string(),
        mac_address: None,
        machine_id: None,
    };
    let serial = profile.derive_serial();
    assert!(serial.ends_with("-voxhost01"));
}

// ── Collection and serde ────────────────────────────────────────

#[test]
fn profile_collection() {
    let profile = HardwareProfile::collect();
    assert!(!profile.system.is_empty());
    assert!(!profile.hostname.is_empty());
}

#[test]
fn profile_serde_roundtrip() {
    let profile = profile_with_mac(Some("aa:bb:cc:dd:ee:ff"));
    let json = serde_json::to_string(&profile).unwrap();
    let parsed: HardwareProfile = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, profile);
}
