use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::PlatformParseError;

/// CPU architecture variants understood by m8dist
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
  X86_64,
  Aarch64,
}

impl Arch {
  /// Detect the host CPU architecture at runtime
  pub fn current() -> Option<Self> {
    match std::env::consts::ARCH {
      "x86_64" => Some(Self::X86_64),
      "aarch64" => Some(Self::Aarch64),
      _ => None,
    }
  }

  /// Returns the lowercase string identifier for this architecture
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::X86_64 => "x86_64",
      Self::Aarch64 => "aarch64",
    }
  }

  /// Debian multiarch tuple, used for default library directories
  pub fn multiarch(&self) -> &'static str {
    match self {
      Self::X86_64 => "x86_64-linux-gnu",
      Self::Aarch64 => "aarch64-linux-gnu",
    }
  }
}

impl fmt::Display for Arch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for Arch {
  type Err = PlatformParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "x86_64" | "amd64" => Ok(Self::X86_64),
      "aarch64" | "arm64" => Ok(Self::Aarch64),
      other => Err(PlatformParseError::UnknownArch(other.to_string())),
    }
  }
}
