//! Global package cache
//!
//! Directory layout under the cache root:
//!
//! ```text
//! <root>/
//! ├── p/<hex-multihash>   finalized content-addressed package trees
//! ├── o/<hex64>           synthetic file packages (generated sources)
//! └── tmp/<hex64>         in-flight unpacks
//! ```
//!
//! Work happens in `tmp/` and is promoted with a rename, so a package
//! directory under `p/` is always complete. Concurrent processes may race on
//! the same destination; the loser deletes its own temp tree.

use rand::Rng;
use std::fs;
use std::hash::Hasher as _;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Finalized content-addressed packages.
pub const PACKAGES_SUBDIR: &str = "p";

/// Synthetic packages written by [`Cache::store_file_pkg`].
pub const OBJECTS_SUBDIR: &str = "o";

/// In-flight work, promoted or deleted before a run finishes.
pub const TMP_SUBDIR: &str = "tmp";

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Home directory could not be determined for the default root
    #[error("could not determine home directory for the cache root")]
    NoHomeDirectory,
}

/// Handle to the global cache directory.
#[derive(Debug, Clone)]
pub struct Cache {
    root: PathBuf,
}

impl Cache {
    /// Open the cache at `root`, creating the directory structure if needed.
    pub fn init(root: PathBuf) -> Result<Self, CacheError> {
        fs::create_dir_all(root.join(PACKAGES_SUBDIR))?;
        fs::create_dir_all(root.join(OBJECTS_SUBDIR))?;
        fs::create_dir_all(root.join(TMP_SUBDIR))?;
        Ok(Cache { root })
    }

    /// Open the cache at the default location (~/.vela/cache).
    pub fn open_default() -> Result<Self, CacheError> {
        let home = dirs::home_dir().ok_or(CacheError::NoHomeDirectory)?;
        Self::init(home.join(".vela").join("cache"))
    }

    /// The cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Root-relative path of a content-addressed package: `p/<hex>`.
    pub fn package_sub_path(hex_digest: &str) -> String {
        format!("{PACKAGES_SUBDIR}/{hex_digest}")
    }

    /// Absolute path of a content-addressed package.
    pub fn package_dir(&self, hex_digest: &str) -> PathBuf {
        self.root.join(PACKAGES_SUBDIR).join(hex_digest)
    }

    /// Create a fresh `tmp/<hex64>` work directory.
    ///
    /// Returns both the root-relative sub-path (for the later rename) and the
    /// absolute path.
    pub fn create_tmp_dir(&self) -> Result<(String, PathBuf), CacheError> {
        let name: u64 = rand::thread_rng().gen();
        let sub_path = format!("{TMP_SUBDIR}/{name:016x}");
        let path = self.root.join(&sub_path);
        fs::create_dir_all(&path)?;
        Ok((sub_path, path))
    }

    /// Atomically promote a temp directory to its final cache location.
    ///
    /// `dest_dir_sub_path` must name a single-level subdirectory of the cache
    /// root (`p/<hex>` or `o/<hex>`); the second byte is the path separator.
    ///
    /// Retry policy:
    /// - `NotFound` means the destination's parent bucket does not exist yet:
    ///   create it once and retry; a second failure surfaces.
    /// - "already exists" shapes (`AlreadyExists`, `DirectoryNotEmpty`) and
    ///   `PermissionDenied` mean another process won the race: delete our
    ///   temp tree and report success.
    pub fn rename_tmp_into_cache(
        &self,
        tmp_dir_sub_path: &str,
        dest_dir_sub_path: &str,
    ) -> Result<(), CacheError> {
        debug_assert_eq!(dest_dir_sub_path.as_bytes().get(1), Some(&b'/'));

        let tmp = self.root.join(tmp_dir_sub_path);
        let dest = self.root.join(dest_dir_sub_path);

        let first = match fs::rename(&tmp, &dest) {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        match first.kind() {
            io::ErrorKind::NotFound => {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::rename(&tmp, &dest)?;
                Ok(())
            }
            io::ErrorKind::AlreadyExists
            | io::ErrorKind::DirectoryNotEmpty
            | io::ErrorKind::PermissionDenied => {
                debug!(dest = %dest.display(), "lost cache insertion race, discarding temp tree");
                fs::remove_dir_all(&tmp)?;
                Ok(())
            }
            _ => Err(first.into()),
        }
    }

    /// Remove a temp directory after a failed fetch. Best effort.
    pub fn cleanup_tmp_dir(&self, tmp_dir_sub_path: &str) {
        let _ = fs::remove_dir_all(self.root.join(tmp_dir_sub_path));
    }

    /// Store `contents` as a synthetic single-file package under `o/`.
    ///
    /// The digest is a fast non-cryptographic hash of the crate version and
    /// the contents; these packages are generated artifacts, not fetched
    /// ones, so collision resistance against an adversary is not needed.
    /// Returns the package directory.
    pub fn store_file_pkg(&self, basename: &str, contents: &str) -> Result<PathBuf, CacheError> {
        let mut hasher = rustc_hash::FxHasher::default();
        hasher.write(env!("CARGO_PKG_VERSION").as_bytes());
        hasher.write(contents.as_bytes());
        let hex_digest = format!("{:016x}", hasher.finish());

        let dest = self.root.join(OBJECTS_SUBDIR).join(&hex_digest);
        if dest.is_dir() {
            return Ok(dest);
        }

        let (tmp_sub_path, tmp_path) = self.create_tmp_dir()?;
        fs::write(tmp_path.join(basename), contents)?;
        self.rename_tmp_into_cache(&tmp_sub_path, &format!("{OBJECTS_SUBDIR}/{hex_digest}"))?;
        Ok(dest)
    }
}
