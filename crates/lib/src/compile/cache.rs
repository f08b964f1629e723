//! Content-addressed cache of dependency-only compilation outputs.
//!
//! Entries live at `<root>/<hash>/` where the hash names a [`DepsCacheKey`].
//! An entry is built in a private staging directory, sealed with a completion
//! marker holding the hash of its contents, and renamed into place. Readers
//! only trust entries whose marker matches their contents; anything else is
//! treated as absent and rebuilt.

use std::collections::BTreeMap;
use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::CompileError;
use super::skeleton::manifest_files;
use crate::descriptor::BuildDescriptor;
use crate::platform::paths::deps_cache_dir;
use crate::util::hash::{Hashable, ObjectHash, hash_directory, hash_file};

/// Marker file sealing a complete entry.
pub const COMPLETE_MARKER: &str = ".m8dist-complete";

const STAGING_PREFIX: &str = ".staging-";
const MARKER_VERSION: u32 = 1;

/// Everything the dependency-only build output depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepsCacheKey {
  /// Hash of every manifest and lock file, keyed by relative path.
  pub manifests: BTreeMap<String, String>,
  pub toolchain: String,
  pub triple: String,
  pub env: BTreeMap<String, String>,
  pub command: String,
}

impl Hashable for DepsCacheKey {}

impl DepsCacheKey {
  pub fn from_descriptor(descriptor: &BuildDescriptor) -> Result<Self, CompileError> {
    let root = &descriptor.source_root;
    let mut manifests = BTreeMap::new();
    for rel in manifest_files(root)? {
      let hash = hash_file(&root.join(&rel))?;
      let key = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");
      manifests.insert(key, hash.0);
    }
    if manifests.is_empty() {
      return Err(CompileError::NoManifest(root.clone()));
    }

    Ok(Self {
      manifests,
      toolchain: descriptor.toolchain.version.clone(),
      triple: descriptor.platform.rust_triple(),
      env: descriptor.env.clone(),
      command: descriptor.deps_command.clone(),
    })
  }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheMarker {
  version: u32,
  output_hash: String,
}

/// A cache entry as listed by [`DepsCache::entries`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
  pub hash: String,
  pub path: PathBuf,
  pub complete: bool,
  pub size: u64,
}

#[derive(Debug, Clone)]
pub struct DepsCache {
  root: PathBuf,
}

impl Default for DepsCache {
  fn default() -> Self {
    Self::new(deps_cache_dir())
  }
}

impl DepsCache {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn entry_path(&self, key: &ObjectHash) -> PathBuf {
    self.root.join(&key.0)
  }

  /// Path of a verified entry, or `None` when absent or corrupted.
  pub fn lookup(&self, key: &ObjectHash) -> Option<PathBuf> {
    let path = self.entry_path(key);
    if !path.is_dir() {
      return None;
    }
    match verify(&path) {
      Ok(true) => {
        debug!(path = %path.display(), "dependency cache hit");
        Some(path)
      }
      Ok(false) => {
        warn!(path = %path.display(), "dependency cache entry corrupted, will rebuild");
        None
      }
      Err(e) => {
        warn!(path = %path.display(), error = %e, "unreadable dependency cache entry, will rebuild");
        None
      }
    }
  }

  /// Build an entry with `build` and publish it under `key`.
  ///
  /// `build` receives an empty staging directory to fill. If another writer
  /// published a valid entry meanwhile, the staged result is discarded and
  /// the existing entry is returned.
  pub async fn insert_with<F, Fut>(&self, key: &ObjectHash, build: F) -> Result<PathBuf, CompileError>
  where
    F: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = Result<(), CompileError>>,
  {
    tokio::fs::create_dir_all(&self.root).await?;
    let staging = tempfile::Builder::new().prefix(STAGING_PREFIX).tempdir_in(&self.root)?;

    build(staging.path().to_path_buf()).await?;
    seal(staging.path())?;

    let entry = self.entry_path(key);
    if let Some(existing) = self.lookup(key) {
      debug!(path = %existing.display(), "entry published concurrently, discarding staged result");
      return Ok(existing);
    }
    if entry.symlink_metadata().is_ok() {
      self.discard_corrupt(&entry)?;
    }

    let staged = staging.keep();
    match fs::rename(&staged, &entry) {
      Ok(()) => {
        info!(path = %entry.display(), "dependency cache entry stored");
        Ok(entry)
      }
      Err(e) => {
        if let Err(remove) = fs::remove_dir_all(&staged) {
          warn!(path = %staged.display(), error = %remove, "failed to remove staged cache entry");
        }
        self.lookup(key).ok_or(CompileError::Io(e))
      }
    }
  }

  /// Move a corrupt entry aside and delete it.
  ///
  /// The entry is re-verified first so a valid entry published by another
  /// writer in the meantime is left alone.
  fn discard_corrupt(&self, entry: &Path) -> Result<(), CompileError> {
    if verify(entry).unwrap_or(false) {
      return Ok(());
    }
    let aside = tempfile::Builder::new().prefix(STAGING_PREFIX).tempdir_in(&self.root)?;
    match fs::rename(entry, aside.path().join("corrupt")) {
      Ok(()) => {
        warn!(path = %entry.display(), "discarded corrupt dependency cache entry");
        Ok(())
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }

  /// Every entry under the root, staging directories excluded.
  pub fn entries(&self) -> io::Result<Vec<CacheEntry>> {
    let read = match fs::read_dir(&self.root) {
      Ok(read) => read,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(e),
    };

    let mut entries = Vec::new();
    for dirent in read {
      let dirent = dirent?;
      let hash = dirent.file_name().to_string_lossy().into_owned();
      if hash.starts_with(STAGING_PREFIX) || !dirent.file_type()?.is_dir() {
        continue;
      }
      let path = dirent.path();
      entries.push(CacheEntry {
        complete: verify(&path).unwrap_or(false),
        size: dir_size(&path),
        hash,
        path,
      });
    }
    entries.sort_by(|a, b| a.hash.cmp(&b.hash));
    Ok(entries)
  }

  /// Remove every entry, returning how many were removed.
  pub fn clean(&self) -> io::Result<usize> {
    let entries = self.entries()?;
    for entry in &entries {
      fs::remove_dir_all(&entry.path)?;
    }
    Ok(entries.len())
  }
}

fn seal(path: &Path) -> Result<(), CompileError> {
  let output_hash = hash_directory(path, &[COMPLETE_MARKER])?;
  let marker = CacheMarker {
    version: MARKER_VERSION,
    output_hash: output_hash.0,
  };
  let content = serde_json::to_string(&marker)?;
  fs::write(path.join(COMPLETE_MARKER), format!("{}\n", content))?;
  Ok(())
}

fn verify(path: &Path) -> Result<bool, CompileError> {
  let marker_path = path.join(COMPLETE_MARKER);
  let content = match fs::read_to_string(&marker_path) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
    Err(e) => return Err(e.into()),
  };
  let marker: CacheMarker = serde_json::from_str(&content)?;
  if marker.version != MARKER_VERSION {
    return Ok(false);
  }
  Ok(hash_directory(path, &[COMPLETE_MARKER])?.0 == marker.output_hash)
}

fn dir_size(path: &Path) -> u64 {
  walkdir::WalkDir::new(path)
    .into_iter()
    .filter_map(Result::ok)
    .filter(|e| e.file_type().is_file())
    .filter_map(|e| e.metadata().ok())
    .map(|m| m.len())
    .sum()
}
