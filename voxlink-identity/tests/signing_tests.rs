use proptest::prelude::*;
use std::fs;
use tempfile::TempDir;
use voxlink_identity::{DeviceIdentity, IdentityError, IdentityStore};

const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

/// Writes a record with a fixed signing key and loads it back.
fn fixture_identity(dir: &TempDir) -> DeviceIdentity {
    let record = serde_json::json!({
        "serial_number": "SN-1A2B3C4D-aabbccddeeff",
        "signing_key": KEY_HEX,
        "mac_address": "aa:bb:cc:dd:ee:ff",
        "activated": false,
        "fingerprint": {
            "system": "linux",
            "hostname": "fixture",
            "mac_address": "aa:bb:cc:dd:ee:ff",
            "machine_id": null
        },
        "created_at": "2025-01-15T10:00:00Z"
    });
    fs::write(dir.path().join("identity.json"), record.to_string()).unwrap();
    IdentityStore::new(dir.path()).load_or_create().unwrap()
}

#[test]
fn signature_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let identity = fixture_identity(&dir);

    let a = identity.sign_challenge("abc123").unwrap();
    let b = identity.sign_challenge("abc123").unwrap();
    assert_eq!(a, b);
}

#[test]
fn signature_is_lowercase_hex() {
    let dir = TempDir::new().unwrap();
    let identity = fixture_identity(&dir);

    let sig = identity.sign_challenge("abc123").unwrap();
    assert_eq!(sig.len(), 64);
    assert!(sig
        .chars()
        .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

#[test]
fn signature_stable_across_loads() {
    let dir = TempDir::new().unwrap();
    let first = fixture_identity(&dir);
    let second = IdentityStore::new(dir.path()).load_or_create().unwrap();

    assert_eq!(
        first.sign_challenge("abc123").unwrap(),
        second.sign_challenge("abc123").unwrap()
    );
}

#[test]
fn different_challenges_produce_different_signatures() {
    let dir = TempDir::new().unwrap();
    let identity = fixture_identity(&dir);

    assert_ne!(
        identity.sign_challenge("abc123").unwrap(),
        identity.sign_challenge("abc124").unwrap()
    );
}

#[test]
fn empty_challenge_is_rejected() {
    let dir = TempDir::new().unwrap();
    let identity = fixture_identity(&dir);

    let err = identity.sign_challenge("").unwrap_err();
    assert!(matches!(err, IdentityError::EmptyChallenge));
}

#[test]
fn device_handle_prefers_mac() {
    let dir = TempDir::new().unwrap();
    let identity = fixture_identity(&dir);
    assert_eq!(identity.device_handle(), "aa:bb:cc:dd:ee:ff");
}

proptest! {
    #[test]
    fn signing_deterministic_for_any_challenge(challenge in "[a-zA-Z0-9]{1,64}") {
        let dir = TempDir::new().unwrap();
        let identity = fixture_identity(&dir);
        prop_assert_eq!(
            identity.sign_challenge(&challenge).unwrap(),
            identity.sign_challenge(&challenge).unwrap()
        );
    }

    #[test]
    fn single_char_change_changes_signature(
        challenge in "[a-z0-9]{8,32}",
        pos in 0usize..32,
    ) {
        let dir = TempDir::new().unwrap();
        let identity = fixture_identity(&dir);

        let pos = pos % challenge.len();
        let mut mutated: Vec<char> = challenge.chars().collect();
        mutated[pos] = if mutated[pos] == 'x' { 'y' } else { 'x' };
        let mutated: String = mutated.into_iter().collect();

        prop_assert_ne!(
            identity.sign_challenge(&challenge).unwrap(),
            identity.sign_challenge(&mutated).unwrap()
        );
    }
}
