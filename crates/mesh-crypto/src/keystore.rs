//! Persistent key store capability.
//!
//! A namespaced blob store in the style of embedded NVS partitions: a caller
//! opens a namespace, reads and stages writes through the returned session,
//! and commits them all at once with [`StoreSession::close`]. A session
//! dropped without `close` discards its staged writes, which is how a power
//! cut mid-update looks to the next boot.
//!
//! Two implementations ship with the crate:
//! - [`MemoryKeyStore`]: shared in-process map, used by tests and by hosts
//!   without persistent storage
//! - [`FileKeyStore`]: one JSON document per namespace, replaced atomically

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::{Zeroize, Zeroizing};

/// How a namespace is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// Key store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid namespace or key name: {0:?}")]
    InvalidName(String),

    #[error("namespace {0:?} is open read-only")]
    ReadOnly(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
}

/// A namespaced blob store.
pub trait KeyStore {
    type Session: StoreSession;

    fn open(&self, namespace: &str, access: Access) -> Result<Self::Session, StoreError>;
}

/// An open namespace.
pub trait StoreSession {
    /// Reads a blob. Returns `None` if the key is absent or holds a small
    /// integer rather than a blob.
    fn get_bytes(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>, StoreError>;

    fn get_u8(&self, key: &str) -> Result<Option<u8>, StoreError>;

    /// Stages a blob, returning the number of bytes accepted.
    fn put_bytes(&mut self, key: &str, value: &[u8]) -> Result<usize, StoreError>;

    fn put_u8(&mut self, key: &str, value: u8) -> Result<(), StoreError>;

    /// Commits staged writes and releases the namespace.
    fn close(self) -> Result<(), StoreError>;
}

#[derive(Clone)]
enum Entry {
    Blob(Zeroizing<Vec<u8>>),
    U8(u8),
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blob(bytes) => write!(f, "Blob({} bytes)", bytes.len()),
            Self::U8(value) => write!(f, "U8({value})"),
        }
    }
}

type Namespace = BTreeMap<String, Entry>;

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 15
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn check_name(name: &str) -> Result<(), StoreError> {
    if valid_name(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

fn read_blob(entries: &Namespace, key: &str) -> Option<Zeroizing<Vec<u8>>> {
    match entries.get(key) {
        Some(Entry::Blob(bytes)) => Some(bytes.clone()),
        _ => None,
    }
}

fn read_u8(entries: &Namespace, key: &str) -> Option<u8> {
    match entries.get(key) {
        Some(Entry::U8(value)) => Some(*value),
        _ => None,
    }
}

// ============================================
// MemoryKeyStore
// ============================================

#[derive(Debug, Default)]
struct MemoryInner {
    namespaces: HashMap<String, Namespace>,
    committed_writes: usize,
    short_writes: bool,
    unavailable: bool,
}

/// In-memory store. Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of individual writes committed so far.
    pub fn committed_writes(&self) -> usize {
        self.lock().committed_writes
    }

    /// When set, `put_bytes` accepts zero bytes, as a worn-out flash would.
    pub fn set_short_writes(&self, enabled: bool) {
        self.lock().short_writes = enabled;
    }

    /// When set, `open` fails.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Reads a committed blob directly, bypassing sessions.
    pub fn blob(&self, namespace: &str, key: &str) -> Option<Vec<u8>> {
        let inner = self.lock();
        let entries = inner.namespaces.get(namespace)?;
        read_blob(entries, key).map(|bytes| bytes.to_vec())
    }

    /// Reads a committed small integer directly, bypassing sessions.
    pub fn small_int(&self, namespace: &str, key: &str) -> Option<u8> {
        let inner = self.lock();
        read_u8(inner.namespaces.get(namespace)?, key)
    }

    /// Seeds a blob directly, bypassing sessions and write counting.
    pub fn insert_blob(&self, namespace: &str, key: &str, value: &[u8]) {
        self.lock()
            .namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), Entry::Blob(Zeroizing::new(value.to_vec())));
    }

    pub fn remove(&self, namespace: &str, key: &str) {
        if let Some(entries) = self.lock().namespaces.get_mut(namespace) {
            entries.remove(key);
        }
    }
}

impl KeyStore for MemoryKeyStore {
    type Session = MemorySession;

    fn open(&self, namespace: &str, access: Access) -> Result<MemorySession, StoreError> {
        check_name(namespace)?;

        let inner = self.lock();
        if inner.unavailable {
            return Err(StoreError::Unavailable("memory store disabled".into()));
        }
        let staged = inner.namespaces.get(namespace).cloned().unwrap_or_default();
        drop(inner);

        Ok(MemorySession {
            store: self.clone(),
            namespace: namespace.to_string(),
            access,
            staged,
            pending_writes: 0,
        })
    }
}

/// Session over a [`MemoryKeyStore`] namespace.
#[derive(Debug)]
pub struct MemorySession {
    store: MemoryKeyStore,
    namespace: String,
    access: Access,
    staged: Namespace,
    pending_writes: usize,
}

impl MemorySession {
    fn writable(&self, key: &str) -> Result<(), StoreError> {
        check_name(key)?;
        if self.access == Access::ReadOnly {
            return Err(StoreError::ReadOnly(self.namespace.clone()));
        }
        Ok(())
    }
}

impl StoreSession for MemorySession {
    fn get_bytes(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>, StoreError> {
        Ok(read_blob(&self.staged, key))
    }

    fn get_u8(&self, key: &str) -> Result<Option<u8>, StoreError> {
        Ok(read_u8(&self.staged, key))
    }

    fn put_bytes(&mut self, key: &str, value: &[u8]) -> Result<usize, StoreError> {
        self.writable(key)?;
        if self.store.lock().short_writes {
            return Ok(0);
        }

        self.staged.insert(
            key.to_string(),
            Entry::Blob(Zeroizing::new(value.to_vec())),
        );
        self.pending_writes += 1;
        Ok(value.len())
    }

    fn put_u8(&mut self, key: &str, value: u8) -> Result<(), StoreError> {
        self.writable(key)?;
        self.staged.insert(key.to_string(), Entry::U8(value));
        self.pending_writes += 1;
        Ok(())
    }

    fn close(self) -> Result<(), StoreError> {
        if self.pending_writes == 0 {
            return Ok(());
        }

        let mut inner = self.store.lock();
        inner.committed_writes += self.pending_writes;
        inner.namespaces.insert(self.namespace, self.staged);
        Ok(())
    }
}

// ============================================
// FileKeyStore
// ============================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct NamespaceFile {
    #[serde(default)]
    entries: BTreeMap<String, FileEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
enum FileEntry {
    /// Hex-encoded blob.
    Blob(String),
    U8(u8),
}

impl NamespaceFile {
    fn wipe(&mut self) {
        for entry in self.entries.values_mut() {
            if let FileEntry::Blob(hex) = entry {
                hex.zeroize();
            }
        }
    }
}

/// Read side of [`NamespaceFile`]: entries stay untyped until decoded one
/// at a time.
#[derive(Debug, Default, Deserialize)]
struct RawNamespaceFile {
    #[serde(default)]
    entries: BTreeMap<String, serde_json::Value>,
}

impl RawNamespaceFile {
    fn wipe(&mut self) {
        for value in self.entries.values_mut() {
            wipe_value(value);
        }
    }
}

fn wipe_value(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(text) => text.zeroize(),
        serde_json::Value::Array(items) => items.iter_mut().for_each(wipe_value),
        serde_json::Value::Object(fields) => fields.values_mut().for_each(wipe_value),
        _ => {}
    }
}

fn decode_entry(value: &serde_json::Value) -> Result<Entry, String> {
    match FileEntry::deserialize(value).map_err(|e| e.to_string())? {
        FileEntry::Blob(mut text) => {
            let decoded = hex::decode(&text).map_err(|e| e.to_string());
            text.zeroize();
            Ok(Entry::Blob(Zeroizing::new(decoded?)))
        }
        FileEntry::U8(value) => Ok(Entry::U8(value)),
    }
}

/// File-backed store: `<root>/<namespace>.json`.
///
/// Commits write a sibling temp file, flush it to disk, and rename it over
/// the previous document, so a reader sees either the old or the new
/// namespace in full. Files are created with mode 0600 on Unix.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    root: PathBuf,
}

impl FileKeyStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn namespace_path(&self, namespace: &str) -> PathBuf {
        self.root.join(format!("{namespace}.json"))
    }

    fn load(path: &Path) -> Result<Namespace, StoreError> {
        let raw = match fs::read(path) {
            Ok(raw) => Zeroizing::new(raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Namespace::new()),
            Err(e) => return Err(e.into()),
        };

        let mut file: RawNamespaceFile = serde_json::from_slice(&raw)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))?;

        // A damaged entry reads as absent; its neighbours stay usable.
        let mut entries = Namespace::new();
        for (key, value) in &file.entries {
            match decode_entry(value) {
                Ok(entry) => {
                    entries.insert(key.clone(), entry);
                }
                Err(reason) => {
                    warn!(path = %path.display(), %key, %reason, "dropping undecodable key store entry");
                }
            }
        }
        file.wipe();

        Ok(entries)
    }

    fn commit(&self, namespace: &str, entries: &Namespace) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)?;

        let mut file = NamespaceFile {
            entries: entries
                .iter()
                .map(|(key, entry)| {
                    let value = match entry {
                        Entry::Blob(bytes) => FileEntry::Blob(hex::encode(bytes.as_slice())),
                        Entry::U8(value) => FileEntry::U8(*value),
                    };
                    (key.clone(), value)
                })
                .collect(),
        };
        let encoded = serde_json::to_vec_pretty(&file)
            .map(Zeroizing::new)
            .map_err(|e| StoreError::Corrupt(e.to_string()));
        file.wipe();
        let encoded = encoded?;

        let path = self.namespace_path(namespace);

        // Uniquely named, so concurrent writers never share a temp file.
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        tmp.write_all(&encoded)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;

        // Persist the rename itself.
        #[cfg(unix)]
        File::open(&self.root)?.sync_all()?;

        debug!(path = %path.display(), "committed key store namespace");
        Ok(())
    }
}

impl KeyStore for FileKeyStore {
    type Session = FileSession;

    /// Opens a namespace. A read-write open of a corrupt document starts
    /// from an empty namespace, which the next commit replaces.
    fn open(&self, namespace: &str, access: Access) -> Result<FileSession, StoreError> {
        check_name(namespace)?;

        let path = self.namespace_path(namespace);
        let staged = match (Self::load(&path), access) {
            (Ok(entries), _) => entries,
            (Err(StoreError::Corrupt(reason)), Access::ReadWrite) => {
                warn!(%reason, "discarding corrupt key store namespace");
                Namespace::new()
            }
            (Err(e), _) => return Err(e),
        };

        Ok(FileSession {
            store: self.clone(),
            namespace: namespace.to_string(),
            access,
            staged,
            dirty: false,
        })
    }
}

/// Session over a [`FileKeyStore`] namespace.
#[derive(Debug)]
pub struct FileSession {
    store: FileKeyStore,
    namespace: String,
    access: Access,
    staged: Namespace,
    dirty: bool,
}

impl FileSession {
    fn writable(&self, key: &str) -> Result<(), StoreError> {
        check_name(key)?;
        if self.access == Access::ReadOnly {
            return Err(StoreError::ReadOnly(self.namespace.clone()));
        }
        Ok(())
    }
}

impl StoreSession for FileSession {
    fn get_bytes(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>, StoreError> {
        Ok(read_blob(&self.staged, key))
    }

    fn get_u8(&self, key: &str) -> Result<Option<u8>, StoreError> {
        Ok(read_u8(&self.staged, key))
    }

    fn put_bytes(&mut self, key: &str, value: &[u8]) -> Result<usize, StoreError> {
        self.writable(key)?;
        self.staged.insert(
            key.to_string(),
            Entry::Blob(Zeroizing::new(value.to_vec())),
        );
        self.dirty = true;
        Ok(value.len())
    }

    fn put_u8(&mut self, key: &str, value: u8) -> Result<(), StoreError> {
        self.writable(key)?;
        self.staged.insert(key.to_string(), Entry::U8(value));
        self.dirty = true;
        Ok(())
    }

    fn close(self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        self.store.commit(&self.namespace, &self.staged)
    }
}
