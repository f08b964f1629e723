//! Build descriptors.
//!
//! A [`BuildDescriptor`] is everything one platform job needs to compile:
//! the source root, the merged environment, toolchain references and the
//! ordered pre- and post-compile hooks. It is built once by [`construct`] and
//! only read afterwards; later stages that need a different source root get a
//! copy through [`BuildDescriptor::with_source_root`].
//!
//! # Submodules
//!
//! - [`env`] - The OS-gated environment rule table

pub mod env;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::Config;
use crate::deps::shim::ShimRoots;
use crate::deps::{DependencySet, ShimError};
use crate::frontend::FrontendPin;
use crate::patch::PatchSpec;
use crate::platform::{Os, TargetPlatform};

pub use env::{ENV_RULES, EnvInputs, EnvRule, OsGate, linker_var};

#[derive(Debug, Error)]
pub enum DescriptorError {
  #[error("dependency set is for {actual}, not {expected}")]
  PlatformMismatch {
    expected: TargetPlatform,
    actual: TargetPlatform,
  },

  #[error("{0} needs an SDK shim but none was materialised")]
  MissingSdkShim(TargetPlatform),

  #[error("failed to materialise SDK shim: {0}")]
  Shim(#[from] ShimError),

  #[error("invalid search path: {0}")]
  SearchPath(#[from] std::env::JoinPathsError),
}

/// Pinned tools used by a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toolchain {
  pub version: String,
  pub cargo: PathBuf,
  pub linker: Option<String>,
  pub strip: Option<PathBuf>,
  pub patchelf: PathBuf,
}

/// A step run before or after compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "hook", content = "with", rename_all = "kebab-case")]
pub enum Hook {
  /// Place the pinned frontend bundle in the working copy.
  InjectFrontend(FrontendPin),
  /// A configured shell command, run in the source root.
  Command(String),
  /// Declare runtime libraries in the binary (Linux only).
  PatchDynamic(PatchSpec),
  /// Strip debug symbols before packaging.
  Strip,
}

/// Which half of the compilation a command belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildProfile {
  DepsOnly,
  Full,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildDescriptor {
  pub product: String,
  pub platform: TargetPlatform,
  pub source_root: PathBuf,
  pub env: BTreeMap<String, String>,
  pub toolchain: Toolchain,
  pub pre_compile: Vec<Hook>,
  pub post_compile: Vec<Hook>,
  pub deps_command: String,
  pub build_command: String,
  pub binary_name: String,
  pub profile_dir: String,
}

impl BuildDescriptor {
  pub fn with_source_root(&self, source_root: &Path) -> Self {
    Self {
      source_root: source_root.to_path_buf(),
      ..self.clone()
    }
  }

  pub fn command(&self, profile: BuildProfile) -> &str {
    match profile {
      BuildProfile::DepsOnly => &self.deps_command,
      BuildProfile::Full => &self.build_command,
    }
  }

  pub fn frontend_pin(&self) -> Option<&FrontendPin> {
    self.pre_compile.iter().find_map(|hook| match hook {
      Hook::InjectFrontend(pin) => Some(pin),
      _ => None,
    })
  }

  pub fn command_hooks(&self) -> impl Iterator<Item = &str> {
    self.pre_compile.iter().filter_map(|hook| match hook {
      Hook::Command(cmd) => Some(cmd.as_str()),
      _ => None,
    })
  }

  pub fn patch_spec(&self) -> Option<&PatchSpec> {
    self.post_compile.iter().find_map(|hook| match hook {
      Hook::PatchDynamic(spec) => Some(spec),
      _ => None,
    })
  }

  pub fn strips(&self) -> bool {
    self.post_compile.contains(&Hook::Strip)
  }

  /// Where cargo leaves the product binary inside `target_dir`.
  pub fn binary_path(&self, target_dir: &Path) -> PathBuf {
    let file = if self.platform.os == Os::Windows {
      format!("{}.exe", self.binary_name)
    } else {
      self.binary_name.clone()
    };
    target_dir
      .join(self.platform.rust_triple())
      .join(&self.profile_dir)
      .join(file)
  }

  /// `export KEY='value'` lines for a POSIX shell.
  pub fn shell_exports(&self) -> String {
    self
      .env
      .iter()
      .map(|(key, value)| format!("export {}='{}'\n", key, value.replace('\'', "'\\''")))
      .collect()
  }
}

/// Assemble the descriptor for one platform job.
///
/// On macOS the SDK shim described by `deps` is materialised under
/// `shim_base` first; everything else is pure construction.
pub fn construct(
  platform: &TargetPlatform,
  deps: &DependencySet,
  config: &Config,
  source_root: &Path,
  shim_base: &Path,
) -> Result<BuildDescriptor, DescriptorError> {
  if deps.platform != *platform {
    return Err(DescriptorError::PlatformMismatch {
      expected: *platform,
      actual: deps.platform,
    });
  }

  let sdk_root = match &deps.sdk_shim {
    Some(plan) => {
      let roots = ShimRoots {
        frameworks_root: config.macos.frameworks_root.clone(),
        library_root: config.macos.library_root.clone(),
        deployment_target: config.macos.deployment_target.clone(),
      };
      Some(plan.materialize(shim_base, &roots)?)
    }
    None => None,
  };

  let env = env::merge(&EnvInputs {
    platform,
    deps,
    config,
    sdk_root: sdk_root.as_deref(),
  })?;
  debug!(platform = %platform, vars = env.len(), "merged build environment");

  let mut pre_compile = Vec::new();
  if let Some(frontend) = &config.frontend {
    pre_compile.push(Hook::InjectFrontend(FrontendPin::from(frontend)));
  }
  pre_compile.extend(config.build.pre_hooks.iter().cloned().map(Hook::Command));

  let mut post_compile = Vec::new();
  if platform.os == Os::Linux {
    let spec = match &config.linux.patch {
      Some(entries) => PatchSpec::new(entries.clone()),
      None => PatchSpec::for_dependencies(deps),
    };
    post_compile.push(Hook::PatchDynamic(spec));
  }
  if config.toolchain.strip.is_some() {
    post_compile.push(Hook::Strip);
  }

  let toolchain = &config.toolchain;
  let descriptor = BuildDescriptor {
    product: config.product.name.clone(),
    platform: *platform,
    source_root: source_root.to_path_buf(),
    env,
    toolchain: Toolchain {
      version: toolchain.version.clone(),
      cargo: toolchain.cargo.clone(),
      linker: toolchain.linker.clone(),
      strip: toolchain.strip.clone(),
      patchelf: toolchain.patchelf.clone(),
    },
    pre_compile,
    post_compile,
    deps_command: config.build.deps_command.clone(),
    build_command: config.build.command.clone(),
    binary_name: config.product.binary_name().to_string(),
    profile_dir: config.build.profile_dir.clone(),
  };

  info!(
    platform = %platform,
    pre_hooks = descriptor.pre_compile.len(),
    post_hooks = descriptor.post_compile.len(),
    "constructed build descriptor"
  );
  Ok(descriptor)
}
