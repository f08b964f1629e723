//! The build-and-release pipeline.
//!
//! Every platform of a run goes through the same stages as its own tokio task
//! ([`run_job`]). Jobs share nothing mutable: the [`PipelineContext`] is
//! read-only and the dependency cache publishes entries atomically. A failed
//! job is recorded and never retried; sibling jobs carry on. [`release`]
//! adds the trigger check in front and the publish fan-in behind.
//!
//! # Submodules
//!
//! - [`job`] - The per-platform stage sequence

pub mod job;

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::compile::{CompileError, DepsCache};
use crate::config::Config;
use crate::deps::ResolveError;
use crate::descriptor::DescriptorError;
use crate::frontend::FrontendError;
use crate::package::{PackageError, ReleaseArtifact};
use crate::patch::{DynamicEditor, PatchError, Patchelf};
use crate::platform::TargetPlatform;
use crate::platform::paths::{deps_cache_dir, sdk_shim_dir};
use crate::release::{self, PublishError, PublishReport, ReleaseStore, ReleaseTrigger, match_release_ref};

pub use job::{JobOutput, run_job};

/// Why a platform job (or the publish step) failed.
#[derive(Debug, Error)]
pub enum PipelineError {
  #[error(transparent)]
  UnsupportedPlatform(#[from] ResolveError),

  #[error("failed to construct build environment: {0}")]
  EnvironmentFailure(#[from] DescriptorError),

  #[error("failed to prepare working copy {path}: {source}")]
  WorkingCopy {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("missing frontend artifact: {0}")]
  MissingFrontendArtifact(#[from] FrontendError),

  #[error("compilation failed: {0}")]
  CompileFailure(#[from] CompileError),

  #[error("binary post-processing failed: {0}")]
  PatchFailure(#[from] PatchError),

  #[error("packaging failed: {0}")]
  PackagingFailure(#[from] PackageError),

  #[error("publishing failed: {0}")]
  PublishFailure(#[from] PublishError),

  #[error("job aborted: {0}")]
  Aborted(String),
}

impl PipelineError {
  /// Short stage name for reports.
  pub fn kind(&self) -> &'static str {
    match self {
      Self::UnsupportedPlatform(_) => "unsupported-platform",
      Self::EnvironmentFailure(_) | Self::WorkingCopy { .. } => "environment-failure",
      Self::MissingFrontendArtifact(_) => "missing-frontend-artifact",
      Self::CompileFailure(_) => "compile-failure",
      Self::PatchFailure(_) => "patch-failure",
      Self::PackagingFailure(_) => "packaging-failure",
      Self::PublishFailure(_) => "publish-failure",
      Self::Aborted(_) => "aborted",
    }
  }
}

/// Read-only inputs shared by every job of a run.
pub struct PipelineContext<E: DynamicEditor = Patchelf> {
  pub config: Config,
  pub cache: DepsCache,
  /// Where macOS SDK shims are materialised.
  pub shim_base: PathBuf,
  pub editor: E,
}

impl PipelineContext<Patchelf> {
  /// Context using the default cache locations and `patchelf`.
  pub fn new(config: Config) -> Self {
    let editor = Patchelf::new(config.toolchain.patchelf.clone());
    Self {
      config,
      cache: DepsCache::new(deps_cache_dir()),
      shim_base: sdk_shim_dir(),
      editor,
    }
  }
}

/// Outcome of every job of a run.
#[derive(Debug, Default)]
pub struct MatrixResult {
  pub succeeded: BTreeMap<TargetPlatform, JobOutput>,
  pub failed: BTreeMap<TargetPlatform, PipelineError>,
}

impl MatrixResult {
  pub fn is_success(&self) -> bool {
    self.failed.is_empty()
  }

  pub fn artifacts(&self) -> BTreeMap<TargetPlatform, ReleaseArtifact> {
    self
      .succeeded
      .iter()
      .map(|(platform, output)| (*platform, output.artifact.clone()))
      .collect()
  }
}

/// Run one job per platform, at most `build.parallelism` at a time.
pub async fn run_matrix<E: DynamicEditor + 'static>(
  ctx: Arc<PipelineContext<E>>,
  platforms: &[TargetPlatform],
  version: &str,
) -> MatrixResult {
  let semaphore = Arc::new(Semaphore::new(ctx.config.build.parallelism.max(1)));
  let mut join_set = JoinSet::new();
  let mut scheduled: Vec<TargetPlatform> = Vec::new();

  for platform in platforms {
    if scheduled.contains(platform) {
      continue;
    }
    scheduled.push(*platform);

    let platform = *platform;
    let ctx = ctx.clone();
    let semaphore = semaphore.clone();
    let version = version.to_string();

    join_set.spawn(async move {
      let Ok(_permit) = semaphore.acquire_owned().await else {
        return (platform, Err(PipelineError::Aborted("job queue closed".to_string())));
      };
      (platform, run_job(&ctx, platform, &version).await)
    });
  }

  let mut result = MatrixResult::default();
  while let Some(joined) = join_set.join_next().await {
    match joined {
      Ok((platform, Ok(output))) => {
        result.succeeded.insert(platform, output);
      }
      Ok((platform, Err(e))) => {
        error!(platform = %platform, error = %e, "job failed");
        result.failed.insert(platform, e);
      }
      Err(e) => {
        error!(error = %e, "job task panicked");
      }
    }
  }

  // A panicked task reports no platform; account for it here
  for platform in scheduled {
    if !result.succeeded.contains_key(&platform) && !result.failed.contains_key(&platform) {
      result
        .failed
        .insert(platform, PipelineError::Aborted("job task panicked".to_string()));
    }
  }

  info!(
    succeeded = result.succeeded.len(),
    failed = result.failed.len(),
    "matrix finished"
  );
  result
}

/// A release run for a qualifying reference.
#[derive(Debug)]
pub struct ReleaseRun {
  pub trigger: ReleaseTrigger,
  pub matrix: MatrixResult,
  pub publish: Result<PublishReport, PipelineError>,
}

#[derive(Debug)]
pub enum ReleaseOutcome {
  /// The reference is not a release tag; nothing was built or uploaded.
  NotTriggered { reference: String },
  Ran(ReleaseRun),
}

/// Build the configured matrix for `reference` and publish it.
pub async fn release<E, S>(ctx: Arc<PipelineContext<E>>, reference: &str, store: &S) -> ReleaseOutcome
where
  E: DynamicEditor + 'static,
  S: ReleaseStore,
{
  let Some(trigger) = match_release_ref(reference) else {
    info!(reference = %reference, "reference is not a release tag, skipping");
    return ReleaseOutcome::NotTriggered {
      reference: reference.to_string(),
    };
  };

  info!(version = %trigger.version, platforms = ctx.config.matrix.len(), "starting release");
  let matrix = run_matrix(ctx.clone(), &ctx.config.matrix, &trigger.version).await;
  let publish = release::publish(&trigger, &ctx.config.matrix, &matrix.artifacts(), store)
    .await
    .map_err(PipelineError::from);

  ReleaseOutcome::Ran(ReleaseRun {
    trigger,
    matrix,
    publish,
  })
}
