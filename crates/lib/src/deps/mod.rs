//! Platform dependency resolution.
//!
//! [`resolve`] is a pure, total function over [`SUPPORTED_PLATFORMS`]: the
//! same platform always yields the same [`DependencySet`], and anything
//! outside the supported set fails with [`ResolveError::UnsupportedPlatform`]
//! without producing a partial result.
//!
//! # Submodules
//!
//! - [`table`] - The per-OS dependency tables
//! - [`shim`] - The macOS SDK shim plan and its materialisation
//!
//! [`SUPPORTED_PLATFORMS`]: crate::platform::SUPPORTED_PLATFORMS

pub mod shim;
pub mod table;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::platform::{Abi, Os, TargetPlatform};

pub use shim::{SdkShimPlan, ShimEntry, ShimError, ShimSource};

/// What a native dependency is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DepRole {
  AudioMixing,
  AudioServer,
  DeviceManagement,
  AudioRouting,
  AudioCodec,
  AudioUnitFramework,
  CoreAudioFramework,
  CharsetConversion,
}

/// How the product links against a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Linkage {
  /// An ELF shared library with pkg-config metadata at build time.
  SharedLibrary {
    pkg_config: &'static str,
    soname: &'static str,
    /// Loaded through `dlopen` rather than linked, so invisible to the linker.
    dlopen: bool,
  },
  /// An Apple framework (`<name>.framework`).
  Framework { name: &'static str },
  /// A dylib shipped with the OS (`usr/lib/<file>`).
  SystemLibrary { file: &'static str },
}

/// A single native dependency of the product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct NativeDependency {
  pub name: &'static str,
  pub role: DepRole,
  pub linkage: Linkage,
  /// Optional dependencies are built against but may be absent at runtime.
  pub optional: bool,
}

impl NativeDependency {
  pub fn soname(&self) -> Option<&'static str> {
    match self.linkage {
      Linkage::SharedLibrary { soname, .. } => Some(soname),
      _ => None,
    }
  }

  pub fn is_dynamically_loaded(&self) -> bool {
    matches!(self.linkage, Linkage::SharedLibrary { dlopen: true, .. })
  }
}

/// Build-time and run-time native dependencies of one target platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencySet {
  pub platform: TargetPlatform,
  pub dependencies: Vec<NativeDependency>,
  /// Present only for macOS targets.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub sdk_shim: Option<SdkShimPlan>,
}

impl DependencySet {
  /// Dependencies that are ELF shared libraries, in resolution order.
  pub fn shared_libraries(&self) -> impl Iterator<Item = &NativeDependency> {
    self
      .dependencies
      .iter()
      .filter(|d| matches!(d.linkage, Linkage::SharedLibrary { .. }))
  }

  /// Shared libraries loaded at runtime through `dlopen`.
  pub fn dynamically_loaded(&self) -> impl Iterator<Item = &NativeDependency> {
    self.dependencies.iter().filter(|d| d.is_dynamically_loaded())
  }

  pub fn get(&self, name: &str) -> Option<&NativeDependency> {
    self.dependencies.iter().find(|d| d.name == name)
  }
}

/// Errors from dependency resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
  #[error("unsupported platform: {0}")]
  UnsupportedPlatform(TargetPlatform),
}

/// Resolve the native dependency set of `platform`.
pub fn resolve(platform: &TargetPlatform) -> Result<DependencySet, ResolveError> {
  let (dependencies, sdk_shim) = match (platform.os, platform.abi) {
    (Os::Linux, Abi::Gnu) => (table::LINUX.to_vec(), None),
    (Os::MacOs, Abi::Darwin) => (table::MACOS.to_vec(), Some(SdkShimPlan::for_dependencies(table::MACOS))),
    _ => return Err(ResolveError::UnsupportedPlatform(*platform)),
  };

  debug!(platform = %platform, count = dependencies.len(), "resolved native dependencies");

  Ok(DependencySet {
    platform: *platform,
    dependencies,
    sdk_shim,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::platform::{Arch, SUPPORTED_PLATFORMS};

  #[test]
  fn every_supported_platform_resolves() {
    for platform in SUPPORTED_PLATFORMS {
      let set = resolve(&platform).unwrap();
      assert_eq!(set.platform, platform);
      assert!(!set.dependencies.is_empty());
    }
  }

  #[test]
  fn resolution_is_pure() {
    for platform in SUPPORTED_PLATFORMS {
      assert_eq!(resolve(&platform).unwrap(), resolve(&platform).unwrap());
    }
  }

  #[test]
  fn unsupported_platforms_fail() {
    let unsupported = [
      TargetPlatform::new(Os::Windows, Arch::X86_64),
      TargetPlatform::new(Os::Linux, Arch::X86_64).with_abi(Abi::Musl),
      TargetPlatform::new(Os::MacOs, Arch::Aarch64).with_abi(Abi::Gnu),
    ];

    for platform in unsupported {
      assert_eq!(resolve(&platform), Err(ResolveError::UnsupportedPlatform(platform)));
    }
  }

  #[test]
  fn linux_set_has_audio_stack() {
    let set = resolve(&TargetPlatform::new(Os::Linux, Arch::X86_64)).unwrap();
    let names: Vec<_> = set.dependencies.iter().map(|d| d.name).collect();

    assert_eq!(names, vec!["alsa-lib", "pipewire", "udev", "jack2", "opus"]);
    assert!(set.get("jack2").unwrap().optional);
    assert!(set.get("opus").unwrap().optional);
    assert!(!set.get("alsa-lib").unwrap().optional);
    assert!(set.sdk_shim.is_none());
  }

  #[test]
  fn linux_dynamically_loaded_libraries() {
    let set = resolve(&TargetPlatform::new(Os::Linux, Arch::Aarch64)).unwrap();
    let sonames: Vec<_> = set.dynamically_loaded().filter_map(|d| d.soname()).collect();
    assert_eq!(sonames, vec!["libpipewire-0.3.so.0", "libjack.so.0"]);
  }

  #[test]
  fn macos_set_has_frameworks_and_shim() {
    let set = resolve(&TargetPlatform::new(Os::MacOs, Arch::X86_64)).unwrap();
    let names: Vec<_> = set.dependencies.iter().map(|d| d.name).collect();

    assert_eq!(names, vec!["AudioUnit", "CoreAudio", "iconv"]);
    assert_eq!(set.shared_libraries().count(), 0);

    let shim = set.sdk_shim.unwrap();
    assert_eq!(shim.entries.len(), 3);
  }
}
