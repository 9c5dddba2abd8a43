//! Identity lifecycle against the file-backed key store.

use std::fs;

use mesh_core::{decode_position, encode_position, PositionFlags, PositionMessage};
use mesh_crypto::{
    verify, Access, FileKeyStore, IdentityError, IdentityManager, KeyStore, OsRandom, RngSource,
    StoreSession, PRIVATE_KEY_SIZE,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

fn manager(dir: &TempDir) -> IdentityManager<FileKeyStore, OsRandom> {
    IdentityManager::new(FileKeyStore::new(dir.path()), OsRandom)
}

/// Identity survives a restart: a second manager over the same directory
/// loads the same key and writes nothing.
#[test]
fn test_identity_persists_across_restarts() {
    let dir = TempDir::new().unwrap();

    let mut first = manager(&dir);
    first.initialize().unwrap();
    let path = dir.path().join("identity.json");
    let before = fs::read(&path).unwrap();

    let mut second = manager(&dir);
    second.initialize().unwrap();

    assert_eq!(second.public_key(), first.public_key());
    assert_eq!(second.mesh_id(), first.mesh_id());
    assert_eq!(fs::read(&path).unwrap(), before);

    // Signatures from either instance verify under the same key.
    let signature = second.sign(b"restart").unwrap();
    assert!(verify(&first.public_key(), &signature, b"restart"));
}

#[test]
fn test_truncated_private_key_is_replaced() {
    let dir = TempDir::new().unwrap();
    let store = FileKeyStore::new(dir.path());

    let mut session = store.open("identity", Access::ReadWrite).unwrap();
    session.put_bytes("priv", &[0x42; 32]).unwrap();
    session.close().unwrap();

    let mut identity = manager(&dir);
    identity.initialize().unwrap();
    assert!(identity.is_ready());

    let session = store.open("identity", Access::ReadOnly).unwrap();
    let private = session.get_bytes("priv").unwrap().unwrap();
    assert_eq!(private.len(), PRIVATE_KEY_SIZE);
    assert_eq!(&private[32..], &identity.public_key());
}

#[test]
fn test_stale_public_key_is_rewritten_on_disk() {
    let dir = TempDir::new().unwrap();
    let mut original = manager(&dir);
    original.initialize().unwrap();

    let store = FileKeyStore::new(dir.path());
    let mut session = store.open("identity", Access::ReadWrite).unwrap();
    session.put_bytes("pub", &[0x11; 32]).unwrap();
    session.close().unwrap();

    let mut reloaded = manager(&dir);
    reloaded.initialize().unwrap();
    assert_eq!(reloaded.public_key(), original.public_key());

    let session = store.open("identity", Access::ReadOnly).unwrap();
    assert_eq!(
        session.get_bytes("pub").unwrap().unwrap().as_slice(),
        &original.public_key()
    );
}

#[test]
fn test_corrupt_store_file_regenerates() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("identity.json"), b"\x00\x01garbage").unwrap();

    let mut identity = manager(&dir);
    identity.initialize().unwrap();
    assert!(identity.is_ready());

    let mut reloaded = manager(&dir);
    reloaded.initialize().unwrap();
    assert_eq!(reloaded.public_key(), identity.public_key());
}

/// Damage confined to the public-key entry is repaired; the private key and
/// therefore the node's identity survive.
#[test]
fn test_damaged_public_entry_keeps_identity() {
    let dir = TempDir::new().unwrap();
    let mut first = manager(&dir);
    first.initialize().unwrap();

    let path = dir.path().join("identity.json");
    let mut doc: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    doc["entries"]["pub"]["value"] = "zz".into();
    doc["entries"]["ver"]["value"] = 300.into();
    fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

    let mut second = manager(&dir);
    second.initialize().unwrap();
    assert_eq!(second.public_key(), first.public_key());

    let store = FileKeyStore::new(dir.path());
    let session = store.open("identity", Access::ReadOnly).unwrap();
    assert_eq!(
        session.get_bytes("pub").unwrap().unwrap().as_slice(),
        &first.public_key()
    );
    assert_eq!(session.get_u8("ver").unwrap(), Some(1));
}

#[cfg(unix)]
#[test]
fn test_unwritable_store_wipes_identity() {
    let dir = TempDir::new().unwrap();
    // A regular file where the store directory should be.
    let blocker = dir.path().join("store");
    fs::write(&blocker, b"").unwrap();

    let mut identity = IdentityManager::new(FileKeyStore::new(&blocker), OsRandom);
    let err = identity.initialize().unwrap_err();

    assert!(matches!(err, IdentityError::Store(_)));
    assert!(!identity.is_ready());
    assert_eq!(identity.public_key(), [0u8; 32]);
}

/// Encode, sign, decode, verify: the path an outgoing report takes.
#[test]
fn test_signed_position_report() {
    let dir = TempDir::new().unwrap();
    let mut identity = IdentityManager::new(
        FileKeyStore::new(dir.path()),
        RngSource(StdRng::seed_from_u64(99)),
    );
    identity.initialize().unwrap();

    let report = PositionMessage {
        flags: PositionFlags::HAS_ALTITUDE,
        lat_e7: 515_007_700,
        lon_e7: -1_275_000,
        alt_m: 35,
        timestamp: 1_712_345_678,
        ..PositionMessage::default()
    };
    let frame = encode_position(&report);
    let signature = identity.sign(&frame).unwrap();

    assert!(verify(&identity.public_key(), &signature, &frame));
    assert_eq!(decode_position(&frame).unwrap(), report);

    let mut tampered = frame.to_vec();
    tampered[5] ^= 0x80;
    assert!(!verify(&identity.public_key(), &signature, &tampered));
}

#[test]
fn test_peers_agree_on_shared_secret() {
    let alice_dir = TempDir::new().unwrap();
    let bob_dir = TempDir::new().unwrap();
    let mut alice = manager(&alice_dir);
    let mut bob = manager(&bob_dir);
    alice.initialize().unwrap();
    bob.initialize().unwrap();

    let alice_view = alice.derive_shared_secret(&bob.public_key()).unwrap();
    let bob_view = bob.derive_shared_secret(&alice.public_key()).unwrap();
    assert_eq!(alice_view.as_bytes(), bob_view.as_bytes());

    // Same result after both restart.
    let mut alice_again = manager(&alice_dir);
    alice_again.initialize().unwrap();
    let again = alice_again.derive_shared_secret(&bob.public_key()).unwrap();
    assert_eq!(again.as_bytes(), alice_view.as_bytes());
}
