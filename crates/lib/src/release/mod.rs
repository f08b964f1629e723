//! Release publishing.
//!
//! Publishing is the one fan-in point of a run. It only happens for a
//! reference matching the release tag pattern ([`match_release_ref`]) and
//! only once every platform of the build matrix has produced its artifact:
//! a release never goes out with platforms missing.
//!
//! # Submodules
//!
//! - [`trigger`] - Release tag matching
//! - [`store`] - Directory and GitHub release stores

pub mod store;
pub mod trigger;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::package::ReleaseArtifact;
use crate::platform::TargetPlatform;

pub use store::{ConfiguredStore, DirectoryStore, GithubStore, ReleaseStore, StoreError};
pub use trigger::{ReleaseTrigger, match_release_ref};

#[derive(Debug, Error)]
pub enum PublishError {
  #[error("no artifact for {}", join_platforms(.missing))]
  IncompleteMatrix { missing: Vec<TargetPlatform> },

  #[error("artifact for {platform} is version {found}, release is {expected}")]
  VersionMismatch {
    platform: TargetPlatform,
    expected: String,
    found: String,
  },

  #[error("upload to {store} failed: {source}")]
  Store {
    store: String,
    #[source]
    source: StoreError,
  },
}

fn join_platforms(platforms: &[TargetPlatform]) -> String {
  platforms.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", ")
}

/// What a publish uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReport {
  pub version: String,
  pub store: String,
  pub locations: Vec<String>,
}

/// Upload the archive and checksum of every matrix platform under the
/// trigger's version.
pub async fn publish<S: ReleaseStore>(
  trigger: &ReleaseTrigger,
  matrix: &[TargetPlatform],
  artifacts: &BTreeMap<TargetPlatform, ReleaseArtifact>,
  store: &S,
) -> Result<PublishReport, PublishError> {
  let missing: Vec<TargetPlatform> = matrix.iter().filter(|p| !artifacts.contains_key(p)).copied().collect();
  if !missing.is_empty() {
    return Err(PublishError::IncompleteMatrix { missing });
  }

  let mut files: Vec<PathBuf> = Vec::with_capacity(matrix.len() * 2);
  for platform in matrix {
    let Some(artifact) = artifacts.get(platform) else {
      continue;
    };
    if artifact.version != trigger.version {
      return Err(PublishError::VersionMismatch {
        platform: *platform,
        expected: trigger.version.clone(),
        found: artifact.version.clone(),
      });
    }
    files.extend(artifact.files().iter().map(|f| f.to_path_buf()));
  }

  let description = store.describe();
  info!(version = %trigger.version, store = %description, files = files.len(), "publishing release");
  let locations = store
    .publish(&trigger.version, &files)
    .await
    .map_err(|source| PublishError::Store {
      store: description.clone(),
      source,
    })?;

  Ok(PublishReport {
    version: trigger.version.clone(),
    store: description,
    locations,
  })
}
