//! Compilation with a dependency cache.
//!
//! Compilation is split in two over the same [`BuildDescriptor`]:
//!
//! 1. [`compile_dependencies`] builds a skeleton of the source tree (manifests
//!    plus stub targets) into a content-addressed [`DepsCache`] entry. A hit
//!    is a pure read.
//! 2. [`compile_full`] seeds a fresh target directory from that entry and
//!    builds the real, frontend-augmented source on top of it.
//!
//! # Submodules
//!
//! - [`cache`] - The dependency cache and its key
//! - [`cmd`] - Running commands in a scrubbed environment
//! - [`skeleton`] - Skeleton source trees

pub mod cache;
pub mod cmd;
pub mod skeleton;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::descriptor::{BuildDescriptor, BuildProfile};
use crate::platform::TargetPlatform;
use crate::util::fs::copy_tree;
use crate::util::hash::{DirHashError, HashError, Hashable, ObjectHash};

pub use cache::{CacheEntry, DepsCache, DepsCacheKey};
pub use cmd::run_command;

#[derive(Debug, Error)]
pub enum CompileError {
  #[error("no Cargo.toml found under {0}")]
  NoManifest(PathBuf),

  #[error("command failed with exit code {code:?}: {cmd}\n{stderr}")]
  CommandFailed {
    cmd: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("compiled binary not found at {0}")]
  MissingBinary(PathBuf),

  #[error("failed to hash cache key: {0}")]
  Hash(#[from] HashError),

  #[error("failed to hash cache entry: {0}")]
  DirHash(#[from] DirHashError),

  #[error("io error: {0}")]
  Io(#[from] io::Error),
}

/// The product binary built for one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledBinary {
  pub product: String,
  pub platform: TargetPlatform,
  pub version: String,
  pub path: PathBuf,
}

impl CompiledBinary {
  /// The same binary at another location.
  pub fn with_path(&self, path: PathBuf) -> Self {
    Self { path, ..self.clone() }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
  Hit,
  Miss,
}

impl fmt::Display for CacheStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Hit => write!(f, "hit"),
      Self::Miss => write!(f, "miss"),
    }
  }
}

/// Output of a dependency-only build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepsArtifacts {
  pub key: ObjectHash,
  pub path: PathBuf,
  pub status: CacheStatus,
}

impl DepsArtifacts {
  pub fn target_dir(&self) -> PathBuf {
    self.path.join("target")
  }
}

fn command_env(descriptor: &BuildDescriptor, target_dir: &Path) -> std::collections::BTreeMap<String, String> {
  let mut env = descriptor.env.clone();
  env.insert("CARGO_TARGET_DIR".to_string(), target_dir.display().to_string());
  env
}

/// Run the configured shell hooks in the source root, in order.
pub async fn run_command_hooks(descriptor: &BuildDescriptor, scratch: &Path) -> Result<(), CompileError> {
  for hook in descriptor.command_hooks() {
    run_command(hook, &descriptor.env, &descriptor.source_root, &scratch.join("tmp")).await?;
  }
  Ok(())
}

/// Build the dependency graph, or reuse a cached build of it.
pub async fn compile_dependencies(
  descriptor: &BuildDescriptor,
  cache: &DepsCache,
  scratch: &Path,
) -> Result<DepsArtifacts, CompileError> {
  let key = DepsCacheKey::from_descriptor(descriptor)?.compute_hash()?;

  if let Some(path) = cache.lookup(&key) {
    info!(platform = %descriptor.platform, key = %key, "dependencies cached");
    return Ok(DepsArtifacts {
      key,
      path,
      status: CacheStatus::Hit,
    });
  }

  info!(platform = %descriptor.platform, key = %key, "compiling dependencies");
  let skeleton_dir = scratch.join("skeleton");
  let stubs = skeleton::write_skeleton(&descriptor.source_root, &skeleton_dir)?;
  debug!(stubs, "skeleton ready");

  let path = cache
    .insert_with(&key, |staging| async move {
      let target_dir = staging.join("target");
      let env = command_env(descriptor, &target_dir);
      run_command(
        descriptor.command(BuildProfile::DepsOnly),
        &env,
        &skeleton_dir,
        &scratch.join("tmp"),
      )
      .await?;
      tokio::fs::create_dir_all(&target_dir).await?;
      Ok::<(), CompileError>(())
    })
    .await?;

  Ok(DepsArtifacts {
    key,
    path,
    status: CacheStatus::Miss,
  })
}

/// Build the product on top of `deps`.
pub async fn compile_full(
  descriptor: &BuildDescriptor,
  deps: &DepsArtifacts,
  version: &str,
  scratch: &Path,
) -> Result<CompiledBinary, CompileError> {
  let target_dir = scratch.join("target");
  if target_dir.exists() {
    tokio::fs::remove_dir_all(&target_dir).await?;
  }

  let seed = deps.target_dir();
  let seeded = {
    let target_dir = target_dir.clone();
    tokio::task::spawn_blocking(move || copy_tree(&seed, &target_dir, &[]))
      .await
      .map_err(io::Error::other)??
  };
  debug!(files = seeded, target_dir = %target_dir.display(), "seeded target directory");

  info!(platform = %descriptor.platform, version = %version, "compiling product");
  let env = command_env(descriptor, &target_dir);
  run_command(
    descriptor.command(BuildProfile::Full),
    &env,
    &descriptor.source_root,
    &scratch.join("tmp"),
  )
  .await?;

  let path = descriptor.binary_path(&target_dir);
  if !path.is_file() {
    return Err(CompileError::MissingBinary(path));
  }

  Ok(CompiledBinary {
    product: descriptor.product.clone(),
    platform: descriptor.platform,
    version: version.to_string(),
    path,
  })
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use crate::config::Config;
  use crate::deps::resolve;
  use crate::descriptor::construct;
  use crate::platform::{Arch, Os};
  use crate::util::testutil::append_line;
  use std::fs;
  use tempfile::TempDir;

  struct Fixture {
    _temp: TempDir,
    root: PathBuf,
    source: PathBuf,
    cache: DepsCache,
  }

  fn fixture() -> Fixture {
    let temp = TempDir::new().unwrap();
    let root = temp.path().to_path_buf();
    let source = root.join("src");
    fs::create_dir_all(source.join("src")).unwrap();
    fs::write(source.join("Cargo.toml"), "[package]\nname = \"remote-m8\"\nversion = \"0.1.0\"\n").unwrap();
    fs::write(source.join("Cargo.lock"), "version = 4\n").unwrap();
    fs::write(source.join("src/main.rs"), "fn main() {}\n").unwrap();
    let cache = DepsCache::new(root.join("cache"));
    Fixture {
      _temp: temp,
      root,
      source,
      cache,
    }
  }

  fn descriptor(fx: &Fixture) -> BuildDescriptor {
    let counter = fx.root.join("deps-runs");
    let mut config = Config::default();
    config.build.deps_command = format!(
      "mkdir -p \"$CARGO_TARGET_DIR/release\" && echo dep > \"$CARGO_TARGET_DIR/release/libdep.rlib\" && {}",
      append_line(&counter, "run")
    );
    config.build.command = "test -f \"$CARGO_TARGET_DIR/release/libdep.rlib\" && \
       mkdir -p \"$CARGO_TARGET_DIR/$CARGO_BUILD_TARGET/release\" && \
       cp src/main.rs \"$CARGO_TARGET_DIR/$CARGO_BUILD_TARGET/release/remote-m8\""
      .to_string();
    let platform = TargetPlatform::new(Os::Linux, Arch::X86_64);
    let deps = resolve(&platform).unwrap();
    construct(&platform, &deps, &config, &fx.source, &fx.root.join("sdk")).unwrap()
  }

  fn runs(fx: &Fixture) -> usize {
    fs::read_to_string(fx.root.join("deps-runs")).map(|s| s.lines().count()).unwrap_or(0)
  }

  #[tokio::test]
  async fn second_dependency_build_is_a_cache_hit() {
    let fx = fixture();
    let descriptor = descriptor(&fx);

    let first = compile_dependencies(&descriptor, &fx.cache, &fx.root.join("job1")).await.unwrap();
    let second = compile_dependencies(&descriptor, &fx.cache, &fx.root.join("job2")).await.unwrap();

    assert_eq!(first.status, CacheStatus::Miss);
    assert_eq!(second.status, CacheStatus::Hit);
    assert_eq!(first.key, second.key);
    assert_eq!(runs(&fx), 1);
  }

  #[tokio::test]
  async fn product_source_changes_keep_the_cache() {
    let fx = fixture();
    let descriptor = descriptor(&fx);
    let first = compile_dependencies(&descriptor, &fx.cache, &fx.root.join("job")).await.unwrap();

    fs::write(fx.source.join("src/main.rs"), "fn main() { println!(\"changed\"); }\n").unwrap();
    let second = compile_dependencies(&descriptor, &fx.cache, &fx.root.join("job")).await.unwrap();

    assert_eq!(first.key, second.key);
    assert_eq!(second.status, CacheStatus::Hit);
  }

  #[tokio::test]
  async fn lock_file_changes_miss_the_cache() {
    let fx = fixture();
    let descriptor = descriptor(&fx);
    let first = compile_dependencies(&descriptor, &fx.cache, &fx.root.join("job")).await.unwrap();

    fs::write(fx.source.join("Cargo.lock"), "version = 4\n# bumped\n").unwrap();
    let second = compile_dependencies(&descriptor, &fx.cache, &fx.root.join("job")).await.unwrap();

    assert_ne!(first.key, second.key);
    assert_eq!(second.status, CacheStatus::Miss);
    assert_eq!(runs(&fx), 2);
  }

  #[test]
  fn toolchain_version_is_part_of_the_key() {
    let fx = fixture();
    let descriptor = descriptor(&fx);
    let mut other = descriptor.clone();
    other.toolchain.version = "1.85.0".to_string();

    let a = DepsCacheKey::from_descriptor(&descriptor).unwrap().compute_hash().unwrap();
    let b = DepsCacheKey::from_descriptor(&other).unwrap().compute_hash().unwrap();

    assert_ne!(a, b);
  }

  #[tokio::test]
  async fn full_build_uses_seeded_dependencies() {
    let fx = fixture();
    let descriptor = descriptor(&fx);
    let scratch = fx.root.join("job");
    let deps = compile_dependencies(&descriptor, &fx.cache, &scratch).await.unwrap();

    let binary = compile_full(&descriptor, &deps, "1.2.3", &scratch).await.unwrap();

    assert_eq!(binary.product, "remote-m8");
    assert_eq!(binary.version, "1.2.3");
    assert_eq!(
      binary.path,
      scratch.join("target/x86_64-unknown-linux-gnu/release/remote-m8")
    );
    // The cache entry itself is never written to by the full build
    assert!(!deps.target_dir().join("x86_64-unknown-linux-gnu").exists());
  }

  #[tokio::test]
  async fn failing_build_is_a_compile_error() {
    let fx = fixture();
    let mut descriptor = descriptor(&fx);
    descriptor.build_command = "exit 101".to_string();
    let scratch = fx.root.join("job");
    let deps = compile_dependencies(&descriptor, &fx.cache, &scratch).await.unwrap();

    let result = compile_full(&descriptor, &deps, "1.2.3", &scratch).await;

    assert!(matches!(result, Err(CompileError::CommandFailed { code: Some(101), .. })));
  }

  #[tokio::test]
  async fn build_without_binary_is_reported() {
    let fx = fixture();
    let mut descriptor = descriptor(&fx);
    descriptor.build_command = "true".to_string();
    let scratch = fx.root.join("job");
    let deps = compile_dependencies(&descriptor, &fx.cache, &scratch).await.unwrap();

    let result = compile_full(&descriptor, &deps, "1.2.3", &scratch).await;

    assert!(matches!(result, Err(CompileError::MissingBinary(_))));
  }

  #[tokio::test]
  async fn command_hooks_run_in_order_in_source_root() {
    let fx = fixture();
    let mut descriptor = descriptor(&fx);
    descriptor.pre_compile = vec![
      crate::descriptor::Hook::Command("echo one >> hooks.log".to_string()),
      crate::descriptor::Hook::Command("echo two >> hooks.log".to_string()),
    ];

    run_command_hooks(&descriptor, &fx.root.join("job")).await.unwrap();

    assert_eq!(fs::read_to_string(fx.source.join("hooks.log")).unwrap(), "one\ntwo\n");
  }
}
