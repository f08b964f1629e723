//! macOS SDK shim.
//!
//! Instead of trusting whatever SDK the host toolchain discovers, macOS builds
//! point `SDKROOT` at a synthesized directory shaped like a real SDK that
//! contains only the frameworks and libraries the product needs:
//!
//! ```text
//! <shim>/
//! ├── SDKSettings.json
//! ├── System/Library/Frameworks/
//! │   ├── AudioUnit.framework -> <frameworks_root>/AudioUnit.framework
//! │   └── CoreAudio.framework -> <frameworks_root>/CoreAudio.framework
//! └── usr/lib/
//!     └── libiconv.tbd -> <library_root>/libiconv.tbd
//! ```
//!
//! The plan is pure data derived from the dependency table. Materialising it
//! is idempotent and lands in a directory named by the hash of the plan and
//! its roots, so different roots never share a shim. Platforms that share a
//! plan (both macOS architectures) share the directory too.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{Linkage, NativeDependency};
use crate::util::fs::symlink;
use crate::util::hash::{HashError, Hashable};

const FRAMEWORKS_DIR: &str = "System/Library/Frameworks";
const LIBRARY_DIR: &str = "usr/lib";
const SDK_SETTINGS: &str = "SDKSettings.json";
const STAGING_PREFIX: &str = ".staging-";

/// Where a shim entry points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "kebab-case")]
pub enum ShimSource {
  Framework(&'static str),
  Library(&'static str),
}

/// One symlink inside the shim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ShimEntry {
  /// Path of the link relative to the shim root, `/`-separated.
  pub link: String,
  pub source: ShimSource,
}

/// Host locations the shim links into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShimRoots {
  pub frameworks_root: PathBuf,
  pub library_root: PathBuf,
  pub deployment_target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SdkShimPlan {
  pub entries: Vec<ShimEntry>,
}

#[derive(Serialize)]
struct ShimKey<'a> {
  plan: &'a SdkShimPlan,
  roots: &'a ShimRoots,
}

impl Hashable for ShimKey<'_> {}

#[derive(Debug, Error)]
pub enum ShimError {
  #[error("failed to hash shim plan: {0}")]
  Hash(#[from] HashError),

  #[error("failed to create {path}: {source}")]
  Create {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl SdkShimPlan {
  /// Build the plan for the frameworks and system libraries in `deps`.
  pub fn for_dependencies(deps: &[NativeDependency]) -> Self {
    let entries = deps
      .iter()
      .filter_map(|dep| match dep.linkage {
        Linkage::Framework { name } => Some(ShimEntry {
          link: format!("{}/{}.framework", FRAMEWORKS_DIR, name),
          source: ShimSource::Framework(name),
        }),
        Linkage::SystemLibrary { file } => Some(ShimEntry {
          link: format!("{}/{}", LIBRARY_DIR, file),
          source: ShimSource::Library(file),
        }),
        Linkage::SharedLibrary { .. } => None,
      })
      .collect();
    Self { entries }
  }

  /// Absolute target of an entry's symlink.
  pub fn target_of(entry: &ShimEntry, roots: &ShimRoots) -> PathBuf {
    match entry.source {
      ShimSource::Framework(name) => roots.frameworks_root.join(format!("{}.framework", name)),
      ShimSource::Library(file) => roots.library_root.join(file),
    }
  }

  /// Whether `root` already holds exactly this plan's links and settings.
  fn is_materialized(&self, root: &Path, roots: &ShimRoots) -> bool {
    let links_match = self.entries.iter().all(|entry| {
      fs::read_link(root.join(&entry.link)).is_ok_and(|existing| existing == Self::target_of(entry, roots))
    });
    links_match
      && fs::read_to_string(root.join(SDK_SETTINGS)).ok().as_deref()
        == Some(sdk_settings(&roots.deployment_target).as_str())
  }

  fn populate(&self, dir: &Path, roots: &ShimRoots) -> Result<(), ShimError> {
    for entry in &self.entries {
      let link = dir.join(&entry.link);
      if let Some(parent) = link.parent() {
        fs::create_dir_all(parent).map_err(create_err(parent))?;
      }
      symlink(&Self::target_of(entry, roots), &link).map_err(create_err(&link))?;
    }
    let settings_path = dir.join(SDK_SETTINGS);
    fs::write(&settings_path, sdk_settings(&roots.deployment_target)).map_err(create_err(&settings_path))
  }

  /// Create the shim under `base` if needed and return its root.
  ///
  /// The shim is assembled in a staging directory and renamed into place, so
  /// concurrent callers with the same plan and roots all get the same
  /// complete directory. A published shim is never modified.
  pub fn materialize(&self, base: &Path, roots: &ShimRoots) -> Result<PathBuf, ShimError> {
    let hash = ShimKey { plan: self, roots }.compute_hash()?;
    let root = base.join(&hash.0);
    if self.is_materialized(&root, roots) {
      debug!(root = %root.display(), "SDK shim up to date");
      return Ok(root);
    }

    fs::create_dir_all(base).map_err(create_err(base))?;
    let staging = tempfile::Builder::new()
      .prefix(STAGING_PREFIX)
      .tempdir_in(base)
      .map_err(create_err(base))?;
    self.populate(staging.path(), roots)?;

    if root.symlink_metadata().is_ok() && !self.is_materialized(&root, roots) {
      warn!(root = %root.display(), "replacing incomplete SDK shim");
      discard(&root, base)?;
    }

    let staged = staging.keep();
    match fs::rename(&staged, &root) {
      Ok(()) => {
        info!(root = %root.display(), entries = self.entries.len(), "materialised SDK shim");
        Ok(root)
      }
      Err(source) => {
        if let Err(e) = fs::remove_dir_all(&staged) {
          warn!(path = %staged.display(), error = %e, "failed to remove staged SDK shim");
        }
        if self.is_materialized(&root, roots) {
          debug!(root = %root.display(), "SDK shim published concurrently");
          Ok(root)
        } else {
          Err(ShimError::Create { path: root, source })
        }
      }
    }
  }
}

fn create_err(path: &Path) -> impl FnOnce(io::Error) -> ShimError {
  let path = path.to_path_buf();
  move |source| ShimError::Create { path, source }
}

/// Move `root` out of the way and delete it. Losing the race to another
/// caller doing the same is fine.
fn discard(root: &Path, base: &Path) -> Result<(), ShimError> {
  let aside = tempfile::Builder::new()
    .prefix(STAGING_PREFIX)
    .tempdir_in(base)
    .map_err(create_err(base))?;
  match fs::rename(root, aside.path().join("stale")) {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(ShimError::Create {
      path: root.to_path_buf(),
      source: e,
    }),
  }
}

fn sdk_settings(deployment_target: &str) -> String {
  let settings = serde_json::json!({
    "CanonicalName": format!("macosx{}", deployment_target),
    "DisplayName": format!("macOS {} (m8dist shim)", deployment_target),
    "Version": deployment_target,
    "DefaultDeploymentTarget": deployment_target,
  });
  format!("{:#}\n", settings)
}
