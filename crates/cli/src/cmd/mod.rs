mod build;
mod cache;
mod info;
mod install;
mod release;
mod resolve;
mod shell;
mod verify;

pub use build::cmd_build;
pub use cache::{CacheCommand, cmd_cache};
pub use info::cmd_info;
pub use install::cmd_install;
pub use release::cmd_release;
pub use resolve::cmd_resolve;
pub use shell::cmd_shell;
pub use verify::cmd_verify;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tokio::runtime::Runtime;

use m8dist_lib::config::Config;
use m8dist_lib::platform::TargetPlatform;

/// The config file a command reads: `--config`, else the default location.
fn config_path(explicit: Option<&Path>) -> PathBuf {
  explicit.map(Path::to_path_buf).unwrap_or_else(Config::default_path)
}

/// Load the config. An explicit `--config` must exist; the default location may not.
fn load_config(explicit: Option<&Path>) -> Result<Config> {
  let path = config_path(explicit);
  let loaded = match explicit {
    Some(_) => Config::load(&path),
    None => Config::load_or_default(&path),
  };
  loaded.with_context(|| format!("Failed to load config {}", path.display()))
}

fn target_or_host(platform: Option<TargetPlatform>) -> Result<TargetPlatform> {
  match platform.or_else(TargetPlatform::current) {
    Some(platform) => Ok(platform),
    None => bail!("Could not detect the host platform, pass --platform"),
  }
}

fn runtime() -> Result<Runtime> {
  Runtime::new().context("Failed to create async runtime")
}
