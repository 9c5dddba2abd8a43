//! Node identity: one Ed25519 keypair per node.
//!
//! The keypair is loaded from (or generated into) a [`KeyStore`] once at
//! startup by [`IdentityManager::initialize`] and is read-only afterwards.
//!
//! A **mesh id** is the base64url-encoded public key (32 bytes → 43
//! characters). The **node id** is the public key's leading byte, which the
//! mesh uses as a compact address; `0x00` and `0xFF` are reserved there, so
//! no identity with those leading bytes is ever accepted.
//!
//! # Example
//!
//! ```
//! use mesh_crypto::identity::{verify, IdentityManager};
//! use mesh_crypto::{MemoryKeyStore, OsRandom};
//!
//! let mut identity = IdentityManager::new(MemoryKeyStore::new(), OsRandom);
//! identity.initialize().unwrap();
//!
//! let signature = identity.sign(b"position report").unwrap();
//! assert!(verify(&identity.public_key(), &signature, b"position report"));
//! ```

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::keystore::{Access, KeyStore, StoreError, StoreSession};
use crate::random::RandomSource;

/// Persisted private key size: 32-byte seed followed by the 32-byte public key.
pub const PRIVATE_KEY_SIZE: usize = 64;
pub const PUBLIC_KEY_SIZE: usize = 32;
pub const SIGNATURE_SIZE: usize = 64;
pub const SEED_SIZE: usize = 32;

/// Format marker written next to the keys.
pub const IDENTITY_FORMAT_VERSION: u8 = 1;

/// Default bound on key generation draws.
pub const DEFAULT_GENERATE_ATTEMPTS: u32 = 16;

/// Identity errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity not initialized")]
    NotReady,

    #[error("no acceptable keypair after {0} attempts")]
    GenerationExhausted(u32),

    #[error("key store error: {0}")]
    Store(#[from] StoreError),

    #[error("short write to {key:?}: wrote {written} of {expected} bytes")]
    ShortWrite {
        key: String,
        expected: usize,
        written: usize,
    },

    #[error("invalid peer public key")]
    InvalidPeerKey,

    #[error("key agreement produced a degenerate secret")]
    DegenerateSecret,

    #[error("invalid mesh id: {0}")]
    InvalidMeshId(String),
}

/// Store layout and generation policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub namespace: String,
    pub private_key_name: String,
    pub public_key_name: String,
    pub format_version_name: String,
    pub max_generate_attempts: u32,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            namespace: "identity".into(),
            private_key_name: "priv".into(),
            public_key_name: "pub".into(),
            format_version_name: "ver".into(),
            max_generate_attempts: DEFAULT_GENERATE_ATTEMPTS,
        }
    }
}

/// True for leading bytes reserved by the mesh (unassigned and broadcast).
pub fn is_sentinel(byte: u8) -> bool {
    byte == 0x00 || byte == 0xFF
}

/// Mesh ID: base64url-encoded Ed25519 public key.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct MeshId(String);

impl TryFrom<String> for MeshId {
    type Error = IdentityError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::decode(&s)?;
        Ok(Self(s))
    }
}

impl MeshId {
    pub fn from_bytes(bytes: &[u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Parses the text form, checking it decodes to a 32-byte key.
    pub fn parse(s: &str) -> Result<Self, IdentityError> {
        Self::decode(s)?;
        Ok(Self(s.to_string()))
    }

    pub fn to_bytes(&self) -> Result<[u8; PUBLIC_KEY_SIZE], IdentityError> {
        Self::decode(&self.0)
    }

    fn decode(s: &str) -> Result<[u8; PUBLIC_KEY_SIZE], IdentityError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|e| IdentityError::InvalidMeshId(e.to_string()))?;

        let len = bytes.len();
        bytes.try_into().map_err(|_| {
            IdentityError::InvalidMeshId(format!("expected 32 bytes, got {len}"))
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MeshId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for MeshId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MeshId({})", self.0)
    }
}

/// 32-byte key agreement output. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret([REDACTED])")
    }
}

impl PartialEq for SharedSecret {
    fn eq(&self, other: &Self) -> bool {
        // Not constant time; for tests and diagnostics only.
        self.0 == other.0
    }
}

impl Eq for SharedSecret {}

/// Verifies an Ed25519 signature over `message`.
///
/// Fails closed: a public key or signature of the wrong length, a key that
/// is not a valid point, and a non-canonical signature all return `false`.
pub fn verify(public_key: &[u8], signature: &[u8], message: &[u8]) -> bool {
    let Ok(public_key) = <&[u8; PUBLIC_KEY_SIZE]>::try_from(public_key) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };

    verifying_key.verify_strict(message, &signature).is_ok()
}

/// Why a stored private key was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    PublicHalfMismatch,
    ZeroPublicKey,
    SentinelLeadingByte(u8),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PublicHalfMismatch => f.write_str("embedded public key does not match seed"),
            Self::ZeroPublicKey => f.write_str("derived public key is zero"),
            Self::SentinelLeadingByte(b) => write!(f, "reserved leading byte {b:#04x}"),
        }
    }
}

fn check_public_key(public_key: &[u8; PUBLIC_KEY_SIZE]) -> Result<(), Rejection> {
    if public_key.iter().all(|&b| b == 0) {
        return Err(Rejection::ZeroPublicKey);
    }
    if is_sentinel(public_key[0]) {
        return Err(Rejection::SentinelLeadingByte(public_key[0]));
    }
    Ok(())
}

struct Loaded {
    key: SigningKey,
    needs_repair: bool,
}

/// Owns the node's keypair.
///
/// Either fully valid (`is_ready()`, keys consistent) or fully wiped (not
/// ready, public key zero, no private key held). Initialization takes
/// `&mut self`; everything else is read-only.
pub struct IdentityManager<S, R> {
    store: S,
    rng: R,
    config: IdentityConfig,
    signing_key: Option<SigningKey>,
    public_key: [u8; PUBLIC_KEY_SIZE],
}

impl<S: KeyStore, R: RandomSource> IdentityManager<S, R> {
    pub fn new(store: S, rng: R) -> Self {
        Self::with_config(store, rng, IdentityConfig::default())
    }

    pub fn with_config(store: S, rng: R, config: IdentityConfig) -> Self {
        Self {
            store,
            rng,
            config,
            signing_key: None,
            public_key: [0u8; PUBLIC_KEY_SIZE],
        }
    }

    /// Loads the stored identity or generates and persists a new one.
    ///
    /// Returns immediately if already initialized. On error the manager is
    /// left wiped.
    pub fn initialize(&mut self) -> Result<(), IdentityError> {
        if self.is_ready() {
            return Ok(());
        }

        if let Some(loaded) = self.load() {
            if loaded.needs_repair {
                self.repair(&loaded.key);
            }
            self.install(loaded.key);
            info!(node_id = self.node_id(), mesh_id = %self.mesh_id_string(), "loaded identity");
            return Ok(());
        }

        let key = match self.generate() {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "identity generation failed");
                self.wipe();
                return Err(e);
            }
        };

        if let Err(e) = self.persist(&key) {
            warn!(error = %e, "failed to persist new identity");
            self.wipe();
            return Err(e);
        }

        self.install(key);
        info!(node_id = self.node_id(), mesh_id = %self.mesh_id_string(), "generated identity");
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.signing_key.is_some()
    }

    /// Public key; all zero until ready.
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public_key
    }

    /// Compact node identifier: the public key's leading byte, 0 when not ready.
    pub fn node_id(&self) -> u8 {
        self.public_key[0]
    }

    pub fn mesh_id(&self) -> Option<MeshId> {
        self.is_ready().then(|| MeshId::from_bytes(&self.public_key))
    }

    /// Deterministic Ed25519 signature over `message`.
    pub fn sign(&self, message: &[u8]) -> Result<[u8; SIGNATURE_SIZE], IdentityError> {
        let key = self.signing_key.as_ref().ok_or(IdentityError::NotReady)?;
        Ok(key.sign(message).to_bytes())
    }

    /// Derives a shared secret with a peer's Ed25519 public key.
    ///
    /// Both keys are mapped to their X25519 forms: ours via the hashed seed
    /// scalar, the peer's via the birational map to Montgomery form. Both
    /// ends derive the same 32 bytes.
    pub fn derive_shared_secret(
        &self,
        peer_public_key: &[u8],
    ) -> Result<SharedSecret, IdentityError> {
        let key = self.signing_key.as_ref().ok_or(IdentityError::NotReady)?;

        let peer: &[u8; PUBLIC_KEY_SIZE] = peer_public_key
            .try_into()
            .map_err(|_| IdentityError::InvalidPeerKey)?;
        let peer = VerifyingKey::from_bytes(peer).map_err(|_| IdentityError::InvalidPeerKey)?;
        let peer = x25519_dalek::PublicKey::from(peer.to_montgomery().to_bytes());

        let scalar = Zeroizing::new(key.to_scalar_bytes());
        let secret = x25519_dalek::StaticSecret::from(*scalar);
        let shared = secret.diffie_hellman(&peer);

        if !shared.was_contributory() {
            return Err(IdentityError::DegenerateSecret);
        }
        Ok(SharedSecret(shared.to_bytes()))
    }

    fn mesh_id_string(&self) -> String {
        self.mesh_id().map(|id| id.0).unwrap_or_default()
    }

    fn install(&mut self, key: SigningKey) {
        self.public_key = key.verifying_key().to_bytes();
        self.signing_key = Some(key);
    }

    fn wipe(&mut self) {
        // SigningKey zeroizes itself on drop.
        self.signing_key = None;
        self.public_key.zeroize();
    }

    fn load(&self) -> Option<Loaded> {
        let cfg = &self.config;
        let session = match self.store.open(&cfg.namespace, Access::ReadOnly) {
            Ok(session) => session,
            Err(e) => {
                debug!(error = %e, "key store not readable, treating as no identity");
                return None;
            }
        };

        let private = match session.get_bytes(&cfg.private_key_name) {
            Ok(Some(private)) if private.len() == PRIVATE_KEY_SIZE => private,
            Ok(Some(private)) => {
                debug!(len = private.len(), "stored private key has wrong length, ignoring");
                return None;
            }
            Ok(None) => {
                debug!("no identity stored");
                return None;
            }
            Err(e) => {
                debug!(error = %e, "failed to read private key, treating as no identity");
                return None;
            }
        };

        let mut keypair = Zeroizing::new([0u8; PRIVATE_KEY_SIZE]);
        keypair.copy_from_slice(&private);
        drop(private);

        let key = match SigningKey::from_keypair_bytes(&keypair) {
            Ok(key) => key,
            Err(_) => {
                warn!(reason = %Rejection::PublicHalfMismatch, "stored private key is corrupt");
                return None;
            }
        };

        let derived = key.verifying_key().to_bytes();
        if let Err(reason) = check_public_key(&derived) {
            warn!(%reason, "stored private key is corrupt");
            return None;
        }

        let public_ok = matches!(
            session.get_bytes(&cfg.public_key_name),
            Ok(Some(stored)) if stored.as_slice() == derived.as_slice()
        );
        let version_ok = matches!(
            session.get_u8(&cfg.format_version_name),
            Ok(Some(IDENTITY_FORMAT_VERSION))
        );
        if let Err(e) = session.close() {
            debug!(error = %e, "failed to close key store session");
        }

        Some(Loaded {
            key,
            needs_repair: !(public_ok && version_ok),
        })
    }

    /// Rewrites the public key and format marker from the private key.
    fn repair(&self, key: &SigningKey) {
        warn!("stored public key missing or stale, rewriting");

        let public_key = key.verifying_key().to_bytes();
        let result = self.open_for_write().and_then(|mut session| {
            put_exact(&mut session, &self.config.public_key_name, &public_key)?;
            session.put_u8(&self.config.format_version_name, IDENTITY_FORMAT_VERSION)?;
            session.close().map_err(IdentityError::from)
        });

        if let Err(e) = result {
            warn!(error = %e, "failed to repair stored public key");
        }
    }

    fn generate(&mut self) -> Result<SigningKey, IdentityError> {
        let attempts = self.config.max_generate_attempts;

        for attempt in 1..=attempts {
            let mut seed = Zeroizing::new([0u8; SEED_SIZE]);
            self.rng.fill(seed.as_mut_slice());

            if seed.iter().all(|&b| b == 0) {
                warn!(attempt, "random source returned an all-zero seed");
                continue;
            }

            let key = SigningKey::from_bytes(&seed);
            seed.zeroize();

            match check_public_key(&key.verifying_key().to_bytes()) {
                Ok(()) => return Ok(key),
                Err(reason) => warn!(attempt, %reason, "rejected generated keypair"),
            }
        }

        Err(IdentityError::GenerationExhausted(attempts))
    }

    fn persist(&self, key: &SigningKey) -> Result<(), IdentityError> {
        let cfg = &self.config;
        let keypair = Zeroizing::new(key.to_keypair_bytes());
        let public_key = key.verifying_key().to_bytes();

        let mut session = self.open_for_write()?;
        put_exact(&mut session, &cfg.private_key_name, keypair.as_slice())?;
        put_exact(&mut session, &cfg.public_key_name, &public_key)?;
        session.put_u8(&cfg.format_version_name, IDENTITY_FORMAT_VERSION)?;
        session.close()?;
        Ok(())
    }

    fn open_for_write(&self) -> Result<S::Session, IdentityError> {
        Ok(self.store.open(&self.config.namespace, Access::ReadWrite)?)
    }
}

fn put_exact<T: StoreSession>(
    session: &mut T,
    key: &str,
    value: &[u8],
) -> Result<(), IdentityError> {
    let written = session.put_bytes(key, value)?;
    if written != value.len() {
        return Err(IdentityError::ShortWrite {
            key: key.to_string(),
            expected: value.len(),
            written,
        });
    }
    Ok(())
}

impl<S, R> fmt::Debug for IdentityManager<S, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityManager")
            .field("ready", &self.signing_key.is_some())
            .field("public_key", &hex::encode(self.public_key))
            .field("signing_key", &"[REDACTED]")
            .finish()
    }
}
