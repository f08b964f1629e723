//! Implementation of the `m8dist info` command.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

use m8dist_lib::deps;
use m8dist_lib::platform::TargetPlatform;
use m8dist_lib::platform::paths::{deps_cache_dir, sdk_shim_dir};

use super::{config_path, load_config};
use crate::output::{OutputFormat, print_json, print_stat, print_warning};

#[derive(Debug, Serialize)]
struct InfoOutput {
  version: &'static str,
  host: Option<TargetPlatform>,
  host_supported: bool,
  config: PathBuf,
  product: String,
  matrix: Vec<TargetPlatform>,
  deps_cache: PathBuf,
  sdk_shims: PathBuf,
}

pub fn cmd_info(config: Option<&Path>, output: OutputFormat) -> Result<()> {
  let path = config_path(config);
  let loaded = load_config(config)?;
  let host = TargetPlatform::current();

  let info = InfoOutput {
    version: env!("CARGO_PKG_VERSION"),
    host,
    host_supported: host.is_some_and(|p| deps::resolve(&p).is_ok()),
    config: path,
    product: loaded.product.name.clone(),
    matrix: loaded.matrix.clone(),
    deps_cache: deps_cache_dir(),
    sdk_shims: sdk_shim_dir(),
  };

  if output.is_json() {
    return print_json(&info);
  }

  println!("m8dist {}", info.version);
  match info.host {
    Some(host) => print_stat("Host", &host.to_string()),
    None => print_warning("Could not detect the host platform"),
  }
  print_stat("Host supported", if info.host_supported { "yes" } else { "no" });
  print_stat("Config", &info.config.display().to_string());
  print_stat("Product", &info.product);
  let matrix: Vec<String> = info.matrix.iter().map(|p| p.to_string()).collect();
  print_stat("Matrix", &matrix.join(", "));
  print_stat("Dependency cache", &info.deps_cache.display().to_string());
  print_stat("SDK shims", &info.sdk_shims.display().to_string());
  Ok(())
}
