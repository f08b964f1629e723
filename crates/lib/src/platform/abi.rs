use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::PlatformParseError;
use super::os::Os;

/// ABI variant of a target platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Abi {
  Gnu,
  Musl,
  Darwin,
  Msvc,
}

impl Abi {
  /// The ABI a platform gets when none is spelled out.
  pub fn default_for(os: Os) -> Self {
    match os {
      Os::Linux => Self::Gnu,
      Os::MacOs => Self::Darwin,
      Os::Windows => Self::Msvc,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Gnu => "gnu",
      Self::Musl => "musl",
      Self::Darwin => "darwin",
      Self::Msvc => "msvc",
    }
  }
}

impl fmt::Display for Abi {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for Abi {
  type Err = PlatformParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "gnu" => Ok(Self::Gnu),
      "musl" => Ok(Self::Musl),
      "darwin" => Ok(Self::Darwin),
      "msvc" => Ok(Self::Msvc),
      other => Err(PlatformParseError::UnknownAbi(other.to_string())),
    }
  }
}
