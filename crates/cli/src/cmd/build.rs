//! Implementation of the `m8dist build` command.
//!
//! Runs the per-platform pipeline (frontend injection, compilation,
//! post-processing, packaging) for each requested platform without
//! publishing anything.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, bail};
use serde::Serialize;

use m8dist_lib::pipeline::{JobOutput, MatrixResult, PipelineContext, PipelineError, run_matrix};
use m8dist_lib::platform::TargetPlatform;

use super::{load_config, runtime};
use crate::output::{
  OutputFormat, format_duration, print_error, print_item, print_json, print_stat, print_success, truncate_hash,
};

#[derive(Debug, Serialize)]
pub(super) struct JobFailure {
  pub stage: &'static str,
  pub error: String,
}

#[derive(Debug, Serialize)]
pub(super) struct MatrixOutput<'a> {
  pub succeeded: &'a BTreeMap<TargetPlatform, JobOutput>,
  pub failed: BTreeMap<TargetPlatform, JobFailure>,
  pub elapsed_ms: u128,
}

impl<'a> MatrixOutput<'a> {
  pub fn new(result: &'a MatrixResult, started: Instant) -> Self {
    let failed = result
      .failed
      .iter()
      .map(|(platform, e)| (*platform, failure(e)))
      .collect();
    Self {
      succeeded: &result.succeeded,
      failed,
      elapsed_ms: started.elapsed().as_millis(),
    }
  }
}

fn failure(e: &PipelineError) -> JobFailure {
  JobFailure {
    stage: e.kind(),
    error: e.to_string(),
  }
}

/// Per-platform summary lines shared with `m8dist release`.
pub(super) fn print_matrix(result: &MatrixResult) {
  for (platform, job) in &result.succeeded {
    print_success(&format!("{}", platform));
    print_item(&job.artifact.archive.display().to_string());
    print_stat("sha256", truncate_hash(&job.artifact.sha256));
    print_stat("deps cache", &job.deps_cache.to_string());
    print_stat("patched", if job.patched { "yes" } else { "no" });
    if let Some(frontend) = &job.frontend {
      print_stat("frontend", truncate_hash(&frontend.0));
    }
  }
  for (platform, e) in &result.failed {
    print_error(&format!("{} failed during {}: {}", platform, e.kind(), e));
  }
}

pub fn cmd_build(
  config: Option<&Path>,
  platforms: Vec<TargetPlatform>,
  version: &str,
  output: OutputFormat,
) -> Result<()> {
  let config = load_config(config)?;
  let platforms = if platforms.is_empty() {
    config.matrix.clone()
  } else {
    platforms
  };

  let start = Instant::now();
  let ctx = Arc::new(PipelineContext::new(config));
  let rt = runtime()?;
  let result = rt.block_on(run_matrix(ctx, &platforms, version));

  if output.is_json() {
    print_json(&MatrixOutput::new(&result, start))?;
  } else {
    print_matrix(&result);
    println!();
    print_stat("Built", &format!("{}/{}", result.succeeded.len(), platforms.len()));
    print_stat("Time", &format_duration(start.elapsed()));
  }

  if !result.is_success() {
    bail!("{} of {} platform job(s) failed", result.failed.len(), platforms.len());
  }
  Ok(())
}
