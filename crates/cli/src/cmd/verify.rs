//! Implementation of the `m8dist verify` command.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use m8dist_lib::package::{checksum_path_for, verify_checksum};

use crate::output::{OutputFormat, print_json, print_stat, print_success};

#[derive(Debug, Serialize)]
struct VerifyOutput<'a> {
  archive: &'a Path,
  checksum: &'a Path,
  sha256: &'a str,
}

pub fn cmd_verify(archive: &Path, output: OutputFormat) -> Result<()> {
  let sha256 = verify_checksum(archive).with_context(|| format!("Verification of {} failed", archive.display()))?;
  let checksum = checksum_path_for(archive);

  if output.is_json() {
    return print_json(&VerifyOutput {
      archive,
      checksum: &checksum,
      sha256: &sha256,
    });
  }

  print_success(&format!("{} matches its checksum", archive.display()));
  print_stat("sha256", &sha256);
  Ok(())
}
