//! Implementation of the `m8dist shell` command.
//!
//! Exposes the same environment a pipeline job compiles in, either as
//! `export` lines for `eval` or as an interactive `$SHELL` rooted at the
//! product source.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use tracing::info;

use m8dist_lib::deps;
use m8dist_lib::descriptor;
use m8dist_lib::platform::TargetPlatform;
use m8dist_lib::platform::paths::sdk_shim_dir;

use super::{load_config, target_or_host};
use crate::output::print_info;

/// Host variables an interactive shell needs on top of the build environment.
const PASSTHROUGH_VARS: &[&str] = &["HOME", "TERM", "USER", "DISPLAY"];

pub fn cmd_shell(config: Option<&Path>, platform: Option<TargetPlatform>, print: bool) -> Result<()> {
  let config = load_config(config)?;
  let platform = target_or_host(platform)?;
  let deps = deps::resolve(&platform).with_context(|| format!("Cannot build for {}", platform))?;
  let source_root = config.source_root();
  let descriptor = descriptor::construct(&platform, &deps, &config, &source_root, &sdk_shim_dir())
    .context("Failed to construct build environment")?;

  if print {
    print!("{}", descriptor.shell_exports());
    return Ok(());
  }

  let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
  info!(shell = %shell, platform = %platform, "spawning development shell");
  print_info(&format!(
    "Entering {} build environment for {} (exit to leave)",
    descriptor.product, platform
  ));

  let mut command = Command::new(&shell);
  command.env_clear();
  for var in PASSTHROUGH_VARS {
    if let Some(value) = std::env::var_os(var) {
      command.env(var, value);
    }
  }
  let status = command
    .envs(&descriptor.env)
    .current_dir(&source_root)
    .status()
    .with_context(|| format!("Failed to spawn {}", shell))?;

  if !status.success() {
    std::process::exit(status.code().unwrap_or(1));
  }
  Ok(())
}
