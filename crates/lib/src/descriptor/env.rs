//! Environment rules.
//!
//! The build environment is the baseline merged with every rule whose OS
//! gate matches the target, applied in table order. Rules only read their
//! inputs, so merging is a pure function of (platform, dependencies, config,
//! shim root).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::consts::SOURCE_DATE_EPOCH;
use crate::deps::DependencySet;
use crate::platform::{Os, TargetPlatform};

use super::DescriptorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsGate {
  All,
  Only(Os),
}

impl OsGate {
  fn matches(self, os: Os) -> bool {
    match self {
      Self::All => true,
      Self::Only(gated) => gated == os,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvRule {
  Baseline,
  LinkerOverride,
  RuntimeLibraryPath,
  PluginDirectory,
  SdkShim,
}

/// One entry per recognised option, applied top to bottom.
pub const ENV_RULES: &[(OsGate, EnvRule)] = &[
  (OsGate::All, EnvRule::Baseline),
  (OsGate::Only(Os::Linux), EnvRule::LinkerOverride),
  (OsGate::Only(Os::Linux), EnvRule::RuntimeLibraryPath),
  (OsGate::Only(Os::Linux), EnvRule::PluginDirectory),
  (OsGate::Only(Os::MacOs), EnvRule::SdkShim),
];

pub struct EnvInputs<'a> {
  pub platform: &'a TargetPlatform,
  pub deps: &'a DependencySet,
  pub config: &'a Config,
  pub sdk_root: Option<&'a Path>,
}

/// Merge every rule applicable to the target platform.
pub fn merge(inputs: &EnvInputs<'_>) -> Result<BTreeMap<String, String>, DescriptorError> {
  let mut env = BTreeMap::new();
  for (gate, rule) in ENV_RULES {
    if gate.matches(inputs.platform.os) {
      apply(*rule, inputs, &mut env)?;
    }
  }
  Ok(env)
}

fn apply(rule: EnvRule, inputs: &EnvInputs<'_>, env: &mut BTreeMap<String, String>) -> Result<(), DescriptorError> {
  let toolchain = &inputs.config.toolchain;
  let arch = inputs.platform.arch;

  match rule {
    EnvRule::Baseline => {
      set(env, "SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH.to_string());
      set(env, "LANG", "C");
      set(env, "LC_ALL", "C");
      set(env, "CARGO_TERM_COLOR", "never");
      set(env, "CARGO_BUILD_TARGET", inputs.platform.rust_triple());
      set(env, "CARGO", toolchain.cargo.display().to_string());
      set(env, "CARGO_HOME", toolchain.cargo_home().display().to_string());
      set(env, "RUSTUP_HOME", toolchain.rustup_home().display().to_string());
      set(env, "RUSTUP_TOOLCHAIN", &toolchain.version);
      set(env, "PATH", join(&toolchain.path)?);

      let pkg_config: Vec<PathBuf> = library_dirs(inputs).into_iter().map(|dir| dir.join("pkgconfig")).collect();
      set(env, "PKG_CONFIG_PATH", join(&pkg_config)?);
    }
    EnvRule::LinkerOverride => {
      if let Some(linker) = &toolchain.linker {
        set(env, linker_var(inputs.platform), linker);
      }
    }
    EnvRule::RuntimeLibraryPath => {
      set(env, "LD_LIBRARY_PATH", join(&library_dirs(inputs))?);
    }
    EnvRule::PluginDirectory => {
      set(env, "ALSA_PLUGIN_DIR", inputs.config.linux.plugin_dir(arch).display().to_string());
    }
    EnvRule::SdkShim => {
      let root = inputs.sdk_root.ok_or(DescriptorError::MissingSdkShim(*inputs.platform))?;
      set(env, "SDKROOT", root.display().to_string());
      set(env, "MACOSX_DEPLOYMENT_TARGET", &inputs.config.macos.deployment_target);
    }
  }
  Ok(())
}

fn set(env: &mut BTreeMap<String, String>, key: impl Into<String>, value: impl Into<String>) {
  env.insert(key.into(), value.into());
}

/// `CARGO_TARGET_<TRIPLE>_LINKER`
pub fn linker_var(platform: &TargetPlatform) -> String {
  format!(
    "CARGO_TARGET_{}_LINKER",
    platform.rust_triple().to_uppercase().replace('-', "_")
  )
}

/// Directory of every resolved shared library, first occurrence wins.
fn library_dirs(inputs: &EnvInputs<'_>) -> Vec<PathBuf> {
  let mut dirs: Vec<PathBuf> = Vec::new();
  for dep in inputs.deps.shared_libraries() {
    let dir = inputs.config.linux.library_dir_for(dep.name, inputs.platform.arch);
    if !dirs.contains(&dir) {
      dirs.push(dir);
    }
  }
  dirs
}

fn join(paths: &[PathBuf]) -> Result<String, DescriptorError> {
  let joined = std::env::join_paths(paths)?;
  Ok(joined.to_string_lossy().into_owned())
}
