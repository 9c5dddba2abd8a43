//! Node identity for the mesh.
//!
//! This crate provides:
//! - Ed25519 node identity with load-or-generate initialization
//! - Signing, stateless verification, and X25519 shared secrets
//! - The key store capability, with in-memory and file-backed stores
//! - The random source capability
//!
//! # Design
//!
//! The identity manager owns no I/O of its own: storage and randomness are
//! injected, so the whole lifecycle can run against [`MemoryKeyStore`] and a
//! scripted [`RandomSource`] in tests.
//!
//! Key material is held in zeroizing containers and is never handed out;
//! after a failed initialization the manager holds no key at all.

#![forbid(unsafe_code)]

pub mod identity;
pub mod keystore;
pub mod random;

pub use identity::{
    is_sentinel, verify, IdentityConfig, IdentityError, IdentityManager, MeshId, SharedSecret,
    IDENTITY_FORMAT_VERSION, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE, SIGNATURE_SIZE,
};
pub use keystore::{
    Access, FileKeyStore, KeyStore, MemoryKeyStore, StoreError, StoreSession,
};
pub use random::{OsRandom, RandomSource, RngSource};
