//! Target platform identification.
//!
//! A [`TargetPlatform`] names one build job: operating system, CPU
//! architecture, and ABI. Platforms are written as `<os>-<arch>` with an
//! optional `-<abi>` suffix (e.g. `linux-x86_64`, `linux-aarch64-musl`,
//! `macos-aarch64`).

pub mod abi;
pub mod arch;
pub mod os;
pub mod paths;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use abi::Abi;
pub use arch::Arch;
pub use os::Os;

/// Errors from parsing a platform string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformParseError {
  #[error("unknown operating system '{0}'")]
  UnknownOs(String),

  #[error("unknown architecture '{0}'")]
  UnknownArch(String),

  #[error("unknown ABI '{0}'")]
  UnknownAbi(String),

  #[error("malformed platform '{0}', expected <os>-<arch>[-<abi>]")]
  Malformed(String),
}

/// An (operating system, CPU architecture, ABI) tuple identifying a build job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetPlatform {
  pub os: Os,
  pub arch: Arch,
  pub abi: Abi,
}

impl TargetPlatform {
  /// Create a platform with the default ABI for `os`
  pub fn new(os: Os, arch: Arch) -> Self {
    Self {
      os,
      arch,
      abi: Abi::default_for(os),
    }
  }

  pub fn with_abi(mut self, abi: Abi) -> Self {
    self.abi = abi;
    self
  }

  /// Detect the host platform at runtime
  ///
  /// Returns `None` if the OS or architecture is not recognised
  pub fn current() -> Option<Self> {
    let os = Os::current()?;
    let arch = Arch::current()?;
    let abi = if os == Os::Linux && cfg!(target_env = "musl") {
      Abi::Musl
    } else {
      Abi::default_for(os)
    };
    Some(Self { os, arch, abi })
  }

  /// Returns the `<os>-<arch>` form used in release archive names
  pub fn slug(&self) -> String {
    format!("{}-{}", self.os, self.arch)
  }

  /// Returns the rustc target triple for this platform
  pub fn rust_triple(&self) -> String {
    match self.os {
      Os::Linux => format!("{}-unknown-linux-{}", self.arch, self.abi),
      Os::MacOs => format!("{}-apple-darwin", self.arch),
      Os::Windows => format!("{}-pc-windows-{}", self.arch, self.abi),
    }
  }
}

impl fmt::Display for TargetPlatform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.abi == Abi::default_for(self.os) {
      write!(f, "{}-{}", self.os, self.arch)
    } else {
      write!(f, "{}-{}-{}", self.os, self.arch, self.abi)
    }
  }
}

impl FromStr for TargetPlatform {
  type Err = PlatformParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    // x86_64 contains an underscore, never a dash, so splitting on '-' is safe
    let parts: Vec<&str> = s.split('-').collect();
    let (os, arch, abi) = match parts.as_slice() {
      [os, arch] => (os.parse::<Os>()?, arch.parse::<Arch>()?, None),
      [os, arch, abi] => (os.parse::<Os>()?, arch.parse::<Arch>()?, Some(abi.parse::<Abi>()?)),
      _ => return Err(PlatformParseError::Malformed(s.to_string())),
    };
    let platform = Self::new(os, arch);
    Ok(match abi {
      Some(abi) => platform.with_abi(abi),
      None => platform,
    })
  }
}

impl TryFrom<String> for TargetPlatform {
  type Error = PlatformParseError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<TargetPlatform> for String {
  fn from(platform: TargetPlatform) -> Self {
    platform.to_string()
  }
}

/// Every platform the pipeline can produce a release for.
pub const SUPPORTED_PLATFORMS: [TargetPlatform; 4] = [
  TargetPlatform {
    os: Os::Linux,
    arch: Arch::X86_64,
    abi: Abi::Gnu,
  },
  TargetPlatform {
    os: Os::Linux,
    arch: Arch::Aarch64,
    abi: Abi::Gnu,
  },
  TargetPlatform {
    os: Os::MacOs,
    arch: Arch::X86_64,
    abi: Abi::Darwin,
  },
  TargetPlatform {
    os: Os::MacOs,
    arch: Arch::Aarch64,
    abi: Abi::Darwin,
  },
];
