//! Implementation of the `m8dist release` command.
//!
//! Nothing is built for a reference that is not a release tag. Otherwise the
//! whole configured matrix is built and published only if every platform
//! produced its artifact.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use serde::Serialize;

use m8dist_lib::pipeline::{PipelineContext, ReleaseOutcome, release};
use m8dist_lib::release::{ConfiguredStore, PublishReport, match_release_ref};

use super::build::{MatrixOutput, print_matrix};
use super::{load_config, runtime};
use crate::output::{
  OutputFormat, format_duration, print_error, print_info, print_item, print_json, print_stat, print_success,
};

#[derive(Debug, Serialize)]
struct ReleaseOutput<'a> {
  reference: &'a str,
  triggered: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  version: Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  matrix: Option<MatrixOutput<'a>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  published: Option<&'a PublishReport>,
  #[serde(skip_serializing_if = "Option::is_none")]
  publish_error: Option<String>,
}

pub fn cmd_release(config: Option<&Path>, reference: &str, output: OutputFormat) -> Result<()> {
  // Checked up front so a non-release push needs neither config nor credentials
  if match_release_ref(reference).is_none() {
    if output.is_json() {
      return print_json(&ReleaseOutput {
        reference,
        triggered: false,
        version: None,
        matrix: None,
        published: None,
        publish_error: None,
      });
    }
    print_info(&format!("{} is not a release tag, nothing to do", reference));
    return Ok(());
  }

  let config = load_config(config)?;
  let store = ConfiguredStore::from_config(&config.release.store, |p| config.resolve_path(p))
    .context("Failed to set up release store")?;

  let start = Instant::now();
  let ctx = Arc::new(PipelineContext::new(config));
  let rt = runtime()?;
  let run = match rt.block_on(release(ctx, reference, &store)) {
    ReleaseOutcome::Ran(run) => run,
    ReleaseOutcome::NotTriggered { reference } => {
      print_info(&format!("{} is not a release tag, nothing to do", reference));
      return Ok(());
    }
  };

  if output.is_json() {
    print_json(&ReleaseOutput {
      reference,
      triggered: true,
      version: Some(&run.trigger.version),
      matrix: Some(MatrixOutput::new(&run.matrix, start)),
      published: run.publish.as_ref().ok(),
      publish_error: run.publish.as_ref().err().map(|e| e.to_string()),
    })?;
  } else {
    print_info(&format!("Release {} from {}", run.trigger.version, reference));
    print_matrix(&run.matrix);
    println!();
    match &run.publish {
      Ok(report) => {
        print_success(&format!("Published {} to {}", report.version, report.store));
        for location in &report.locations {
          print_item(location);
        }
      }
      Err(e) => print_error(&format!("Release withheld: {}", e)),
    }
    print_stat("Time", &format_duration(start.elapsed()));
  }

  if let Err(e) = run.publish {
    bail!("Release {} was not published: {}", run.trigger.version, e);
  }
  Ok(())
}
