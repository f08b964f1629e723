use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::PlatformParseError;

/// Operating system variants understood by m8dist.
///
/// Windows is recognised so it can be named in a matrix and rejected by the
/// resolver, but no build is ever produced for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
  Linux,
  MacOs,
  Windows,
}

impl Os {
  /// Detect the host operating system at runtime
  pub fn current() -> Option<Self> {
    match std::env::consts::OS {
      "linux" => Some(Self::Linux),
      "macos" => Some(Self::MacOs),
      "windows" => Some(Self::Windows),
      _ => None,
    }
  }

  /// Returns the lowercase identifier used in archive names
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Linux => "linux",
      Self::MacOs => "macos",
      Self::Windows => "windows",
    }
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for Os {
  type Err = PlatformParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "linux" => Ok(Self::Linux),
      "macos" | "darwin" => Ok(Self::MacOs),
      "windows" => Ok(Self::Windows),
      other => Err(PlatformParseError::UnknownOs(other.to_string())),
    }
  }
}
