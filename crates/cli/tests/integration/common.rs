//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

use m8dist_lib::compile::CompiledBinary;
use m8dist_lib::package::{ReleaseArtifact, package};
use m8dist_lib::platform::TargetPlatform;

/// Isolated test environment.
///
/// Each test gets its own temporary directory holding the config file, the
/// product source, and the cache.
pub struct TestEnv {
  pub temp: TempDir,
  pub config_path: PathBuf,
}

impl TestEnv {
  /// Create from config content written to `m8dist.toml`.
  pub fn with_config(content: &str) -> Self {
    let env = Self::empty();
    std::fs::write(&env.config_path, content).unwrap();
    env
  }

  /// Create an empty test environment.
  pub fn empty() -> Self {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("m8dist.toml");
    Self { temp, config_path }
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  pub fn path(&self, relative_path: &str) -> PathBuf {
    self.temp.path().join(relative_path)
  }

  /// Cache root (isolated per test).
  pub fn cache_path(&self) -> PathBuf {
    let p = self.temp.path().join("cache");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Package a fake binary the way a pipeline job would.
  pub fn release_artifact(&self, version: &str, platform: &str) -> ReleaseArtifact {
    let bin = self.path("bin-src/remote-m8");
    std::fs::create_dir_all(bin.parent().unwrap()).unwrap();
    std::fs::write(&bin, b"#!/bin/sh\necho remote-m8\n").unwrap();
    let platform: TargetPlatform = platform.parse().unwrap();
    let binary = CompiledBinary {
      product: "remote-m8".to_string(),
      platform,
      version: version.to_string(),
      path: bin,
    };
    package(&binary, &self.path("dist")).unwrap()
  }

  /// Get a pre-configured Command for the m8dist binary.
  ///
  /// Runs in the temp directory with:
  /// - `M8DIST_CONFIG`: the test's config file
  /// - `M8DIST_CACHE`: isolated cache root
  /// - `HOME`: the temp directory, so default install prefixes stay inside it
  pub fn m8dist_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("m8dist");
    cmd.current_dir(self.temp.path());
    cmd.env("M8DIST_CONFIG", &self.config_path);
    cmd.env("M8DIST_CACHE", self.cache_path());
    cmd.env("HOME", self.temp.path());
    cmd.env_remove("RUST_LOG");
    cmd
  }
}

/// A minimal cargo project that is never actually compiled.
pub fn write_source_tree(env: &TestEnv, dir: &str) {
  env.write_file(
    &format!("{}/Cargo.toml", dir),
    "[package]\nname = \"remote-m8\"\nversion = \"0.1.0\"\nedition = \"2021\"\n",
  );
  env.write_file(&format!("{}/src/main.rs", dir), "fn main() {}\n");
}

pub fn file_url(path: &Path) -> String {
  format!("file://{}", path.display())
}
