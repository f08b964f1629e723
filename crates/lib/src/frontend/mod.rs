//! Frontend artifact injection.
//!
//! The product embeds a web frontend that is built elsewhere and published as
//! a gzip tarball. Before compiling, the bundle pinned by its SHA-256 is
//! fetched and unpacked into the working copy (`frontend/deploy` by default).
//!
//! Injection is all-or-nothing: the bundle is verified, unpacked into a
//! staging directory next to the destination, flushed to disk, and only then
//! renamed over the destination. A bundle that cannot be fetched or does not
//! match its digest fails the job; nothing is cached between runs.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::FrontendConfig;
use crate::util::fs::sync_tree;
use crate::util::hash::{ContentHash, hash_directory};

/// Immutable revision pointer for a frontend bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrontendPin {
  pub url: String,
  pub sha256: String,
  /// Destination relative to the source root.
  pub dest: PathBuf,
  pub strip_components: usize,
}

impl From<&FrontendConfig> for FrontendPin {
  fn from(config: &FrontendConfig) -> Self {
    Self {
      url: config.url.clone(),
      sha256: config.sha256.to_lowercase(),
      dest: config.dest.clone(),
      strip_components: config.strip_components,
    }
  }
}

/// A bundle placed in a working copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrontendArtifact {
  pub pin: FrontendPin,
  pub path: PathBuf,
  /// Hash of the unpacked tree.
  pub content_hash: ContentHash,
  pub files: usize,
}

#[derive(Debug, Error)]
pub enum FrontendError {
  #[error("frontend bundle {url} not found")]
  NotFound { url: String },

  #[error("failed to fetch frontend bundle {url}: {message}")]
  Fetch { url: String, message: String },

  #[error("frontend bundle {url} hash mismatch: expected {expected}, got {actual}")]
  HashMismatch {
    url: String,
    expected: String,
    actual: String,
  },

  #[error("failed to unpack frontend bundle: {message}")]
  Unpack { message: String },

  #[error("frontend bundle {url} contains no files")]
  Empty { url: String },

  #[error("io error: {0}")]
  Io(#[from] io::Error),
}

enum Pointer<'a> {
  Http(&'a str),
  Local(PathBuf),
}

fn pointer(url: &str) -> Pointer<'_> {
  if url.starts_with("https://") || url.starts_with("http://") {
    Pointer::Http(url)
  } else if let Some(path) = url.strip_prefix("file://") {
    Pointer::Local(PathBuf::from(path))
  } else {
    Pointer::Local(PathBuf::from(url))
  }
}

async fn fetch(url: &str) -> Result<Vec<u8>, FrontendError> {
  match pointer(url) {
    Pointer::Http(url) => {
      info!(url = %url, "fetching frontend bundle");
      let response = reqwest::get(url).await.map_err(|e| FrontendError::Fetch {
        url: url.to_string(),
        message: e.to_string(),
      })?;

      let status = response.status();
      if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
        return Err(FrontendError::NotFound { url: url.to_string() });
      }
      if !status.is_success() {
        return Err(FrontendError::Fetch {
          url: url.to_string(),
          message: format!("HTTP {}", status),
        });
      }

      let bytes = response.bytes().await.map_err(|e| FrontendError::Fetch {
        url: url.to_string(),
        message: e.to_string(),
      })?;
      Ok(bytes.to_vec())
    }
    Pointer::Local(path) => {
      debug!(path = %path.display(), "reading local frontend bundle");
      tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => FrontendError::NotFound { url: url.to_string() },
        _ => FrontendError::Fetch {
          url: url.to_string(),
          message: e.to_string(),
        },
      })
    }
  }
}

/// Fetch the bundle pinned by `pin` and place it under `source_root`.
///
/// Any previous contents of the destination are replaced wholesale.
pub async fn inject(pin: &FrontendPin, source_root: &Path) -> Result<FrontendArtifact, FrontendError> {
  let bytes = fetch(&pin.url).await?;

  let actual = hex::encode(Sha256::digest(&bytes));
  if !actual.eq_ignore_ascii_case(&pin.sha256) {
    return Err(FrontendError::HashMismatch {
      url: pin.url.clone(),
      expected: pin.sha256.clone(),
      actual,
    });
  }

  let dest = source_root.join(&pin.dest);
  let strip = pin.strip_components;
  let url = pin.url.clone();
  let (path, files) = {
    let dest = dest.clone();
    tokio::task::spawn_blocking(move || place(&bytes, &dest, strip, &url))
      .await
      .map_err(|e| FrontendError::Unpack { message: e.to_string() })??
  };

  let content_hash = hash_directory(&path, &[]).map_err(|e| FrontendError::Unpack { message: e.to_string() })?;
  info!(dest = %path.display(), files, hash = %content_hash, "frontend injected");

  Ok(FrontendArtifact {
    pin: pin.clone(),
    path,
    content_hash,
    files,
  })
}

/// Unpack into a staging directory beside `dest`, then swap it in.
fn place(bytes: &[u8], dest: &Path, strip: usize, url: &str) -> Result<(PathBuf, usize), FrontendError> {
  let parent = dest.parent().ok_or_else(|| FrontendError::Unpack {
    message: format!("destination {} has no parent", dest.display()),
  })?;
  fs::create_dir_all(parent)?;

  let staging = tempfile::Builder::new().prefix(".frontend-").tempdir_in(parent)?;
  let files = unpack(bytes, staging.path(), strip)?;
  if files == 0 {
    return Err(FrontendError::Empty { url: url.to_string() });
  }
  sync_tree(staging.path())?;

  if dest.symlink_metadata().is_ok() {
    debug!(dest = %dest.display(), "replacing previous frontend");
    fs::remove_dir_all(dest)?;
  }
  let staged = staging.keep();
  fs::rename(&staged, dest)?;
  #[cfg(unix)]
  fs::File::open(parent)?.sync_all()?;

  Ok((dest.to_path_buf(), files))
}

fn unpack(bytes: &[u8], staging: &Path, strip: usize) -> Result<usize, FrontendError> {
  let unpack_err = |e: io::Error| FrontendError::Unpack { message: e.to_string() };
  let mut archive = tar::Archive::new(GzDecoder::new(bytes));
  let mut files = 0;

  for entry in archive.entries().map_err(unpack_err)? {
    let mut entry = entry.map_err(unpack_err)?;
    let path = entry.path().map_err(unpack_err)?.into_owned();

    let mut parts = Vec::new();
    for component in path.components() {
      match component {
        Component::Normal(part) => parts.push(part.to_owned()),
        Component::CurDir => {}
        _ => {
          return Err(FrontendError::Unpack {
            message: format!("refusing entry outside the bundle: {}", path.display()),
          });
        }
      }
    }
    if parts.len() <= strip {
      continue;
    }
    let rel: PathBuf = parts[strip..].iter().collect();
    if through_symlink(staging, &rel) {
      return Err(FrontendError::Unpack {
        message: format!("refusing entry below a symlink: {}", path.display()),
      });
    }
    let target = staging.join(&rel);

    let kind = entry.header().entry_type();
    if kind == tar::EntryType::Symlink {
      let link = entry.link_name().map_err(unpack_err)?.unwrap_or_default().into_owned();
      if !link_stays_inside(&rel, &link) {
        return Err(FrontendError::Unpack {
          message: format!("refusing symlink {} -> {} leaving the bundle", path.display(), link.display()),
        });
      }
    }

    match kind {
      tar::EntryType::Directory => fs::create_dir_all(&target)?,
      tar::EntryType::Regular | tar::EntryType::Continuous | tar::EntryType::Symlink => {
        if let Some(parent) = target.parent() {
          fs::create_dir_all(parent)?;
        }
        entry.unpack(&target).map_err(unpack_err)?;
        files += 1;
      }
      other => debug!(path = %path.display(), kind = ?other, "skipping bundle entry"),
    }
  }

  Ok(files)
}

/// Whether a directory between `staging` and `rel` is already a symlink.
fn through_symlink(staging: &Path, rel: &Path) -> bool {
  let mut current = staging.to_path_buf();
  let mut components = rel.components().peekable();
  while let Some(component) = components.next() {
    if components.peek().is_none() {
      break;
    }
    current.push(component);
    if current.symlink_metadata().is_ok_and(|m| m.file_type().is_symlink()) {
      return true;
    }
  }
  false
}

/// Whether a symlink at `rel` pointing to `link` resolves inside the bundle.
///
/// `..` is only allowed as a leading component, so the walk up starts from a
/// real directory and never passes back through another link.
fn link_stays_inside(rel: &Path, link: &Path) -> bool {
  let mut depth = rel.components().count().saturating_sub(1);
  let mut leading = true;
  for component in link.components() {
    match component {
      Component::ParentDir if leading => match depth.checked_sub(1) {
        Some(up) => depth = up,
        None => return false,
      },
      Component::CurDir => {}
      Component::Normal(_) => leading = false,
      _ => return false,
    }
  }
  !link.as_os_str().is_empty()
}
