//! Implementation of the `m8dist install` command.
//!
//! Installs the binary of a release archive into `<prefix>/bin`. The archive
//! is verified against its checksum file first, and the binary is unpacked
//! next to its destination and renamed into place, so an interrupted install
//! never leaves a partial binary behind.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use m8dist_lib::package::{unpack_archive, verify_checksum};
use m8dist_lib::platform::paths::home_dir;

use crate::output::{OutputFormat, print_json, print_stat, print_success};

#[derive(Debug, Serialize)]
struct InstallOutput<'a> {
  archive: &'a Path,
  sha256: &'a str,
  installed: &'a Path,
}

fn default_prefix() -> PathBuf {
  home_dir().join(".local")
}

pub fn cmd_install(archive: &Path, prefix: Option<PathBuf>, output: OutputFormat) -> Result<()> {
  let sha256 = verify_checksum(archive).with_context(|| format!("Refusing to install {}", archive.display()))?;

  let bin_dir = prefix.unwrap_or_else(default_prefix).join("bin");
  fs::create_dir_all(&bin_dir).with_context(|| format!("Failed to create {}", bin_dir.display()))?;
  let bin_dir = dunce::canonicalize(&bin_dir).unwrap_or(bin_dir);

  let staging = tempfile::Builder::new()
    .prefix(".m8dist-install-")
    .tempdir_in(&bin_dir)
    .context("Failed to create staging directory")?;
  let unpacked = unpack_archive(archive, staging.path()).context("Failed to unpack archive")?;

  let file_name = unpacked
    .file_name()
    .map(|n| n.to_os_string())
    .context("Archive entry has no file name")?;
  let installed = bin_dir.join(file_name);
  fs::rename(&unpacked, &installed).with_context(|| format!("Failed to install {}", installed.display()))?;
  info!(path = %installed.display(), sha256 = %sha256, "installed binary");

  if output.is_json() {
    return print_json(&InstallOutput {
      archive,
      sha256: &sha256,
      installed: &installed,
    });
  }

  print_success(&format!("Installed {}", installed.display()));
  print_stat("sha256", &sha256);
  Ok(())
}
