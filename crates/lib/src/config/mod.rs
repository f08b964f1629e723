//! Pipeline configuration (`m8dist.toml`).
//!
//! Every section has defaults, so an empty file (or no file at all) yields a
//! working configuration for the standard four-platform matrix. Relative
//! paths are resolved against the directory containing the config file.
//!
//! # Example
//!
//! ```toml
//! matrix = ["linux-x86_64", "macos-aarch64"]
//!
//! [product]
//! name = "remote-m8"
//! source = "."
//!
//! [toolchain]
//! version = "1.84.0"
//! linker = "clang"
//!
//! [frontend]
//! url = "https://example.com/m8-frontend-3f2a9c1.tar.gz"
//! sha256 = "5d4c...e1"
//!
//! [release.store]
//! kind = "github"
//! repository = "owner/remote-m8"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::{CONFIG_FILENAME, DEFAULT_PRODUCT};
use crate::patch::PatchEntry;
use crate::platform::paths::home_dir;
use crate::platform::{Arch, SUPPORTED_PLATFORMS, TargetPlatform};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: Box<toml::de::Error>,
  },

  #[error("invalid config: {0}")]
  Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
  pub product: ProductConfig,
  pub toolchain: ToolchainConfig,
  pub frontend: Option<FrontendConfig>,
  pub build: BuildConfig,
  pub matrix: Vec<TargetPlatform>,
  pub linux: LinuxConfig,
  pub macos: MacosConfig,
  pub release: ReleaseConfig,

  /// Directory the config was loaded from.
  #[serde(skip)]
  pub base_dir: PathBuf,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      product: ProductConfig::default(),
      toolchain: ToolchainConfig::default(),
      frontend: None,
      build: BuildConfig::default(),
      matrix: SUPPORTED_PLATFORMS.to_vec(),
      linux: LinuxConfig::default(),
      macos: MacosConfig::default(),
      release: ReleaseConfig::default(),
      base_dir: PathBuf::from("."),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProductConfig {
  pub name: String,
  /// Binary target name, defaults to the product name.
  pub binary: Option<String>,
  /// Product source root.
  pub source: PathBuf,
}

impl Default for ProductConfig {
  fn default() -> Self {
    Self {
      name: DEFAULT_PRODUCT.to_string(),
      binary: None,
      source: PathBuf::from("."),
    }
  }
}

impl ProductConfig {
  pub fn binary_name(&self) -> &str {
    self.binary.as_deref().unwrap_or(&self.name)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolchainConfig {
  /// Pinned toolchain version, exported as `RUSTUP_TOOLCHAIN` and part of every cache key.
  pub version: String,
  pub cargo: PathBuf,
  /// Linker override for Linux targets.
  pub linker: Option<String>,
  /// Strip tool; stripping is skipped when unset.
  pub strip: Option<PathBuf>,
  pub patchelf: PathBuf,
  /// Directories forming the build's `PATH`.
  pub path: Vec<PathBuf>,
  pub cargo_home: Option<PathBuf>,
  pub rustup_home: Option<PathBuf>,
}

impl Default for ToolchainConfig {
  fn default() -> Self {
    Self {
      version: "1.84.0".to_string(),
      cargo: PathBuf::from("cargo"),
      linker: Some("clang".to_string()),
      strip: Some(PathBuf::from("strip")),
      patchelf: PathBuf::from("patchelf"),
      path: vec![PathBuf::from("/usr/local/bin"), PathBuf::from("/usr/bin"), PathBuf::from("/bin")],
      cargo_home: None,
      rustup_home: None,
    }
  }
}

impl ToolchainConfig {
  /// `CARGO_HOME`, falling back to the host's.
  pub fn cargo_home(&self) -> PathBuf {
    self
      .cargo_home
      .clone()
      .or_else(|| std::env::var_os("CARGO_HOME").map(PathBuf::from))
      .unwrap_or_else(|| home_dir().join(".cargo"))
  }

  /// `RUSTUP_HOME`, falling back to the host's.
  pub fn rustup_home(&self) -> PathBuf {
    self
      .rustup_home
      .clone()
      .or_else(|| std::env::var_os("RUSTUP_HOME").map(PathBuf::from))
      .unwrap_or_else(|| home_dir().join(".rustup"))
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrontendConfig {
  /// `https://`, `http://`, `file://` URL or a local path.
  pub url: String,
  /// SHA-256 of the bundle; the immutable revision pin.
  pub sha256: String,
  /// Destination inside the working copy.
  #[serde(default = "default_frontend_dest")]
  pub dest: PathBuf,
  /// Leading path components dropped while unpacking.
  #[serde(default = "default_strip_components")]
  pub strip_components: usize,
}

fn default_frontend_dest() -> PathBuf {
  PathBuf::from("frontend/deploy")
}

fn default_strip_components() -> usize {
  1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
  /// Command compiling only the dependency graph (run in the skeleton tree).
  pub deps_command: String,
  /// Command compiling the product on top of the cached dependencies.
  pub command: String,
  /// Cargo profile directory the binary lands in.
  pub profile_dir: String,
  /// Extra shell commands run after frontend injection, before compiling.
  pub pre_hooks: Vec<String>,
  /// Where release archives are written.
  pub output_dir: PathBuf,
  /// Per-job working copies.
  pub work_dir: PathBuf,
  /// Maximum number of platform jobs running at once.
  pub parallelism: usize,
}

impl Default for BuildConfig {
  fn default() -> Self {
    Self {
      deps_command: "\"$CARGO\" build --release --locked".to_string(),
      command: "\"$CARGO\" build --release --locked".to_string(),
      profile_dir: "release".to_string(),
      pre_hooks: Vec::new(),
      output_dir: PathBuf::from("dist"),
      work_dir: PathBuf::from("target/m8dist"),
      parallelism: std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinuxConfig {
  /// Library directory used for every dependency without an override.
  /// Defaults to `/usr/lib/<multiarch>`.
  pub library_dir: Option<PathBuf>,
  /// Per-dependency library directory overrides, keyed by dependency name.
  pub library_dirs: BTreeMap<String, PathBuf>,
  /// Directory of runtime-loaded audio backend plugins.
  /// Defaults to `<library_dir>/alsa-lib`.
  pub plugin_dir: Option<PathBuf>,
  /// Replaces the default patch spec when set.
  pub patch: Option<Vec<PatchEntry>>,
}

impl LinuxConfig {
  pub fn default_library_dir(&self, arch: Arch) -> PathBuf {
    self
      .library_dir
      .clone()
      .unwrap_or_else(|| PathBuf::from("/usr/lib").join(arch.multiarch()))
  }

  /// Directory holding the shared library of dependency `name`.
  pub fn library_dir_for(&self, name: &str, arch: Arch) -> PathBuf {
    self
      .library_dirs
      .get(name)
      .cloned()
      .unwrap_or_else(|| self.default_library_dir(arch))
  }

  pub fn plugin_dir(&self, arch: Arch) -> PathBuf {
    self
      .plugin_dir
      .clone()
      .unwrap_or_else(|| self.default_library_dir(arch).join("alsa-lib"))
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MacosConfig {
  pub frameworks_root: PathBuf,
  pub library_root: PathBuf,
  pub deployment_target: String,
}

impl Default for MacosConfig {
  fn default() -> Self {
    Self {
      frameworks_root: PathBuf::from("/System/Library/Frameworks"),
      library_root: PathBuf::from("/usr/lib"),
      deployment_target: "11.0".to_string(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReleaseConfig {
  pub store: ReleaseStoreConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReleaseStoreConfig {
  /// Copy files to `<path>/<version>/`.
  Directory { path: PathBuf },
  /// Upload as assets of a GitHub release named after the tag.
  Github {
    repository: String,
    #[serde(default = "default_github_api")]
    api_url: String,
  },
}

impl Default for ReleaseStoreConfig {
  fn default() -> Self {
    Self::Directory {
      path: PathBuf::from("dist/releases"),
    }
  }
}

fn default_github_api() -> String {
  "https://api.github.com".to_string()
}

impl Config {
  /// Load a config file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let base_dir = path
      .parent()
      .filter(|p| !p.as_os_str().is_empty())
      .map(Path::to_path_buf)
      .unwrap_or_else(|| PathBuf::from("."));
    Self::parse(&content, path, base_dir)
  }

  /// Load `path` if it exists, otherwise defaults rooted at the current directory.
  pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
    if path.exists() {
      return Self::load(path);
    }
    debug!(path = %path.display(), "no config file, using defaults");
    Ok(Self::default())
  }

  /// Default config path, `M8DIST_CONFIG` or `./m8dist.toml`.
  pub fn default_path() -> PathBuf {
    std::env::var_os("M8DIST_CONFIG")
      .map(PathBuf::from)
      .unwrap_or_else(|| PathBuf::from(CONFIG_FILENAME))
  }

  pub fn parse(content: &str, path: &Path, base_dir: PathBuf) -> Result<Self, ConfigError> {
    let mut config: Config = toml::from_str(content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source: Box::new(source),
    })?;
    config.base_dir = base_dir;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<(), ConfigError> {
    if self.product.name.is_empty() {
      return Err(ConfigError::Invalid("product.name must not be empty".to_string()));
    }
    if self.matrix.is_empty() {
      return Err(ConfigError::Invalid("matrix must list at least one platform".to_string()));
    }
    if self.build.parallelism == 0 {
      return Err(ConfigError::Invalid("build.parallelism must be at least 1".to_string()));
    }
    if let Some(frontend) = &self.frontend {
      let valid = frontend.sha256.len() == 64 && frontend.sha256.chars().all(|c| c.is_ascii_hexdigit());
      if !valid {
        return Err(ConfigError::Invalid(format!(
          "frontend.sha256 must be 64 hex characters, got '{}'",
          frontend.sha256
        )));
      }
    }
    Ok(())
  }

  /// Resolve a possibly relative path against the config directory.
  pub fn resolve_path(&self, path: &Path) -> PathBuf {
    if path.is_absolute() {
      path.to_path_buf()
    } else {
      self.base_dir.join(path)
    }
  }

  pub fn source_root(&self) -> PathBuf {
    self.resolve_path(&self.product.source)
  }

  pub fn output_dir(&self) -> PathBuf {
    self.resolve_path(&self.build.output_dir)
  }

  pub fn work_dir(&self) -> PathBuf {
    self.resolve_path(&self.build.work_dir)
  }
}
