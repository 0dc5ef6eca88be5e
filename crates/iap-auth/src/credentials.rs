//! Per-origin cookie file storage
//!
//! One cookie file per origin under the cache directory, named by
//! [`Origin::slug`]. Writes go to a uniquely named temp file in the same
//! directory and are renamed over the target, so a reader (including git's
//! own cookie handling and concurrent helper processes) only ever sees the
//! previous file or the complete new one.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::constants::{CONFIG_SUBDIR, COOKIE_FILE_EXTENSION};
use crate::cookie::CachedCredential;
use crate::error::{Error, Result};
use crate::origin::Origin;

/// Cookie file store rooted at a cache directory.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at `~/.config/gcp-iap`.
    pub fn default_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(CONFIG_SUBDIR))
            .ok_or_else(|| Error::Config("cannot determine home directory".into()))
    }

    /// Cookie file path for `origin`. Also what `http.cookieFile` is set to.
    pub fn path_for(&self, origin: &Origin) -> PathBuf {
        self.dir
            .join(format!("{}.{COOKIE_FILE_EXTENSION}", origin.slug()))
    }

    /// Read the cached credential for `origin`.
    ///
    /// Returns `NotFound` when there is no file, `Io` when it cannot be read
    /// and `CredentialParse` when its contents do not decode. Never creates
    /// anything on disk.
    pub async fn load(&self, origin: &Origin) -> Result<CachedCredential> {
        let path = self.path_for(origin);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!(
                    "no cookie file at {}",
                    path.display()
                )));
            }
            Err(e) => {
                return Err(Error::Io(format!(
                    "reading cookie file {}: {e}",
                    path.display()
                )));
            }
        };

        let credential = CachedCredential::parse(&contents)?;
        debug!(origin = %origin, path = %path.display(), "loaded cached credential");
        Ok(credential)
    }

    /// Replace the cached credential for `origin`.
    pub async fn save(&self, origin: &Origin, credential: &CachedCredential) -> Result<()> {
        let path = self.path_for(origin);
        write_atomic(&path, credential.to_file_contents().as_bytes()).await?;
        debug!(origin = %origin, path = %path.display(), "persisted credential");
        Ok(())
    }
}

/// Write `contents` to `path` atomically with 0600 permissions.
///
/// Parent directories are created as needed. The temp file name carries the
/// process id and a random suffix so concurrent writers never share one.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Io(format!("{} has no parent directory", path.display())))?;

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::Io(format!("creating {}: {e}", dir.display())))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = dir.join(format!(
        ".{file_name}.tmp.{}.{}",
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    ));

    if let Err(e) = write_tmp(&tmp_path, contents).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }

    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(Error::Io(format!(
            "renaming temp file over {}: {e}",
            path.display()
        )));
    }

    Ok(())
}

async fn write_tmp(tmp_path: &Path, contents: &[u8]) -> Result<()> {
    tokio::fs::write(tmp_path, contents)
        .await
        .map_err(|e| Error::Io(format!("writing temp file: {e}")))?;

    // Set 0600 permissions (unix only)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting temp file permissions: {e}")))?;
    }

    Ok(())
}
