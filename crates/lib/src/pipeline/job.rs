//! One platform job: resolve, describe, inject, compile, post-process, package.

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, info_span, Instrument};

use super::{PipelineContext, PipelineError};
use crate::compile::{self, CacheStatus};
use crate::deps::resolve;
use crate::descriptor::{self, Hook};
use crate::frontend::inject;
use crate::package::{self, ReleaseArtifact};
use crate::patch::{DynamicEditor, patch_binary};
use crate::platform::TargetPlatform;
use crate::util::fs::copy_tree;
use crate::util::hash::ContentHash;

/// Directories of the source tree never copied into a working copy.
const WORKING_COPY_EXCLUDES: &[&str] = &["target", ".git"];

/// Result of a successful job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobOutput {
  pub platform: TargetPlatform,
  pub artifact: ReleaseArtifact,
  /// Whether the binary went through the post-processor.
  pub patched: bool,
  pub deps_cache: CacheStatus,
  /// Hash of the injected frontend, when one is configured.
  pub frontend: Option<ContentHash>,
}

/// Copy the product source into a fresh per-job directory.
async fn working_copy(source: &Path, dest: &Path, excludes: Vec<String>) -> Result<PathBuf, PipelineError> {
  let wrap = |source: io::Error| PipelineError::WorkingCopy {
    path: dest.to_path_buf(),
    source,
  };
  if dest.exists() {
    tokio::fs::remove_dir_all(dest).await.map_err(wrap)?;
  }

  let (from, to) = (source.to_path_buf(), dest.to_path_buf());
  let copied = tokio::task::spawn_blocking(move || {
    let excludes: Vec<&str> = excludes.iter().map(String::as_str).collect();
    copy_tree(&from, &to, &excludes)
  })
  .await
  .map_err(|e| wrap(io::Error::other(e)))?
  .map_err(wrap)?;

  debug!(dest = %dest.display(), files = copied, "created working copy");
  Ok(dest.to_path_buf())
}

/// Top-level names under `source` that hold pipeline outputs.
fn output_excludes(source: &Path, dirs: &[PathBuf]) -> Vec<String> {
  let mut excludes: Vec<String> = WORKING_COPY_EXCLUDES.iter().map(|s| s.to_string()).collect();
  for dir in dirs {
    let Some(first) = dir.strip_prefix(source).ok().and_then(|rel| rel.components().next()) else {
      continue;
    };
    let name = first.as_os_str().to_string_lossy().into_owned();
    if !excludes.contains(&name) {
      excludes.push(name);
    }
  }
  excludes
}

/// Run every stage for `platform`, strictly in order.
pub async fn run_job<E: DynamicEditor>(
  ctx: &PipelineContext<E>,
  platform: TargetPlatform,
  version: &str,
) -> Result<JobOutput, PipelineError> {
  let span = info_span!("job", platform = %platform);
  async move {
    let config = &ctx.config;
    let deps = resolve(&platform)?;

    let job_dir = config.work_dir().join(platform.slug());
    let scratch = job_dir.join("scratch");
    let source_root = config.source_root();
    let excludes = output_excludes(&source_root, &[config.work_dir(), config.output_dir()]);
    let src = working_copy(&source_root, &job_dir.join("src"), excludes).await?;

    let descriptor = descriptor::construct(&platform, &deps, config, &src, &ctx.shim_base)?;

    let frontend = match descriptor.frontend_pin() {
      Some(pin) => Some(inject(pin, &descriptor.source_root).await?.content_hash),
      None => None,
    };
    compile::run_command_hooks(&descriptor, &scratch).await?;

    let deps_artifacts = compile::compile_dependencies(&descriptor, &ctx.cache, &scratch).await?;
    let mut binary = compile::compile_full(&descriptor, &deps_artifacts, version, &scratch).await?;

    let mut patched = false;
    for hook in &descriptor.post_compile {
      match hook {
        Hook::PatchDynamic(spec) => {
          binary = patch_binary(&ctx.editor, &binary, spec, &scratch.join("patched")).await?;
          patched = true;
        }
        Hook::Strip => {
          if let Some(strip) = &descriptor.toolchain.strip {
            binary = package::strip_binary(strip, &binary, &scratch.join("stripped")).await?;
          }
        }
        Hook::InjectFrontend(_) | Hook::Command(_) => {}
      }
    }

    let artifact = package::package(&binary, &config.output_dir())?;
    info!(archive = %artifact.archive.display(), patched, deps = %deps_artifacts.status, "job finished");

    Ok(JobOutput {
      platform,
      artifact,
      patched,
      deps_cache: deps_artifacts.status,
      frontend,
    })
  }
  .instrument(span)
  .await
}
