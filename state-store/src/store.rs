//! Persistence backends for the push state document
//!
//! This module provides the storage contract and two backends:
//! - `StateStore`: load/save contract the subscription manager commits through
//! - `JsonFileStore`: JSON document on disk, replaced atomically on every save
//! - `MemoryStore`: in-process store for tests and ephemeral services

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{Result, StoreError};
use crate::model::PushState;

/// Durable storage for the push state document.
///
/// A `save` must be atomic: after it returns, a subsequent `load` (in this or a
/// later process) observes either the previous document or the new one, never
/// a mixture.
pub trait StateStore: Send + Sync {
    /// Load the persisted document.
    ///
    /// Returns `Ok(None)` when nothing has been persisted yet.
    fn load(&self) -> Result<Option<PushState>>;

    /// Replace the persisted document.
    fn save(&self, state: &PushState) -> Result<()>;
}

// ============================================================================
// JsonFileStore
// ============================================================================

/// Stores the document as pretty-printed JSON in a single file.
///
/// Writes go to a sibling temporary file which is synced and then renamed
/// over the target.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state".to_string());
        self.path
            .with_file_name(format!(".{}.tmp-{}", file_name, std::process::id()))
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<Option<PushState>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        let state: PushState = serde_json::from_slice(&bytes)?;
        if state.version != PushState::CURRENT_VERSION {
            return Err(StoreError::UnsupportedVersion(state.version));
        }

        tracing::debug!(
            "Loaded {} registrations from {}",
            state.registrations.len(),
            self.path.display()
        );
        Ok(Some(state))
    }

    fn save(&self, state: &PushState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
            }
        }

        let data = serde_json::to_vec_pretty(state)?;
        let tmp_path = self.temp_path();

        let write = || -> std::io::Result<()> {
            let mut file: File = OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&tmp_path)?;
            file.write_all(&data)?;
            file.sync_all()
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp_path);
            return Err(StoreError::io(&tmp_path, e));
        }

        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(StoreError::io(&self.path, e));
        }

        tracing::trace!("Persisted push state to {}", self.path.display());
        Ok(())
    }
}

// ============================================================================
// MemoryStore
// ============================================================================

/// Keeps the document in memory.
///
/// Saves can be made to fail on demand, which lets callers exercise their
/// all-or-nothing commit paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    document: Mutex<Option<PushState>>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds a persisted document.
    pub fn with_state(state: PushState) -> Self {
        Self {
            document: Mutex::new(Some(state)),
            ..Self::default()
        }
    }

    /// Make every subsequent `save` fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.fail_saves.store(failing, Ordering::SeqCst);
    }

    /// Number of successful saves so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// The last document saved, if any.
    pub fn snapshot(&self) -> Option<PushState> {
        self.document.lock().clone()
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<Option<PushState>> {
        Ok(self.document.lock().clone())
    }

    fn save(&self, state: &PushState) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("saves are disabled".to_string()));
        }
        *self.document.lock() = Some(state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
