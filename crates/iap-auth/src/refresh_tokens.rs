//! Refresh token storage
//!
//! A JSON file mapping origins to the OAuth refresh token obtained during
//! the last browser login. The silent acquisition path exchanges it for a
//! new IAP token without user interaction. All writes go through the same
//! atomic temp-file + rename as the cookie files; a tokio Mutex serializes
//! writers inside one process, and every write re-reads the file first so
//! entries added by other helper processes survive.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::credentials::write_atomic;
use crate::error::{Error, Result};
use crate::origin::Origin;
use crate::secret::Secret;

/// Refresh token for one origin.
///
/// `helper_id` records which OAuth client issued the token; a token issued
/// to a different client cannot be exchanged and is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshEntry {
    pub helper_id: String,
    pub refresh: Secret,
    /// Issue time as unix seconds
    pub issued_at: i64,
}

/// Origin-keyed refresh token file manager.
pub struct RefreshTokenStore {
    path: PathBuf,
    state: Mutex<HashMap<String, RefreshEntry>>,
}

impl RefreshTokenStore {
    /// Load refresh tokens from the given file path.
    ///
    /// A missing file is an empty store; nothing is written until the first
    /// token is added.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = read_entries(&path).await?;
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Load, falling back to an empty store when the file is unreadable or
    /// corrupt. A broken token file only costs a browser login.
    pub async fn load_or_empty(path: PathBuf) -> Self {
        match Self::load(path.clone()).await {
            Ok(store) => store,
            Err(e) => {
                info!(path = %path.display(), error = %e, "ignoring unusable refresh token file");
                Self {
                    path,
                    state: Mutex::new(HashMap::new()),
                }
            }
        }
    }

    /// Refresh token for `origin`, if one was stored by `helper_id`.
    pub async fn get(&self, origin: &Origin, helper_id: &str) -> Option<Secret> {
        let state = self.state.lock().await;
        state
            .get(&origin.to_string())
            .filter(|entry| entry.helper_id == helper_id)
            .map(|entry| entry.refresh.clone())
    }

    /// Add or replace the refresh token for `origin` and persist to disk.
    ///
    /// Entries written by other processes since this store was loaded are
    /// kept.
    pub async fn insert(&self, origin: &Origin, entry: RefreshEntry) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut entries = self.current_entries(&state).await;
        entries.insert(origin.to_string(), entry);
        persist(&self.path, &entries).await?;
        *state = entries;
        debug!(origin = %origin, "stored refresh token");
        Ok(())
    }

    /// Drop the refresh token for `origin` and persist to disk.
    ///
    /// Returns the removed entry if it existed.
    pub async fn remove(&self, origin: &Origin) -> Result<Option<RefreshEntry>> {
        let mut state = self.state.lock().await;
        let mut entries = self.current_entries(&state).await;
        let removed = entries.remove(&origin.to_string());
        if removed.is_some() {
            persist(&self.path, &entries).await?;
            debug!(origin = %origin, "removed refresh token");
        }
        *state = entries;
        Ok(removed)
    }

    /// On-disk entries, or the in-memory copy when the file cannot be read.
    async fn current_entries(
        &self,
        state: &HashMap<String, RefreshEntry>,
    ) -> HashMap<String, RefreshEntry> {
        match read_entries(&self.path).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "re-reading refresh tokens failed, using loaded copy");
                state.clone()
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Read the token file. A missing file is an empty map.
async fn read_entries(path: &Path) -> Result<HashMap<String, RefreshEntry>> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            let entries: HashMap<String, RefreshEntry> = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing refresh token file: {e}")))?;
            debug!(path = %path.display(), origins = entries.len(), "loaded refresh tokens");
            Ok(entries)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "refresh token file not found, starting empty");
            Ok(HashMap::new())
        }
        Err(e) => Err(Error::Io(format!("reading refresh token file: {e}"))),
    }
}

async fn persist(path: &Path, state: &HashMap<String, RefreshEntry>) -> Result<()> {
    let json = serde_json::to_string_pretty(state)
        .map_err(|e| Error::CredentialParse(format!("serializing refresh tokens: {e}")))?;
    write_atomic(path, json.as_bytes()).await
}
