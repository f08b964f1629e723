//! Skeleton source trees for dependency-only compilation.
//!
//! A skeleton keeps every `Cargo.toml` and `Cargo.lock` of the source tree
//! and replaces each build target with an empty stub, so building it compiles
//! the external dependency graph and nothing of the product itself. Because
//! only manifests are copied, product source edits never invalidate the
//! dependency cache.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

/// Directories never searched for manifests.
pub const SKIPPED_DIRS: &[&str] = &["target", ".git", "node_modules", "dist"];

const MANIFEST_FILES: &[&str] = &["Cargo.toml", "Cargo.lock"];
const BIN_STUB: &str = "fn main() {}\n";
const LIB_STUB: &str = "";

/// Manifest and lock files under `root`, relative and sorted.
pub fn manifest_files(root: &Path) -> io::Result<Vec<PathBuf>> {
  let walker = WalkDir::new(root)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|e| {
      e.depth() == 0
        || !(e.file_type().is_dir() && e.file_name().to_str().is_some_and(|n| SKIPPED_DIRS.contains(&n)))
    });

  let mut files = Vec::new();
  for entry in walker {
    let entry = entry.map_err(io::Error::other)?;
    let is_manifest = entry
      .file_name()
      .to_str()
      .is_some_and(|name| MANIFEST_FILES.contains(&name));
    if entry.file_type().is_file() && is_manifest {
      files.push(entry.path().strip_prefix(root).map_err(io::Error::other)?.to_path_buf());
    }
  }
  Ok(files)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum StubKind {
  Lib,
  Bin,
}

/// A manifest-declared target path, which must stay inside its package.
fn package_relative(path: &str) -> io::Result<PathBuf> {
  let path = Path::new(path);
  let inside = path
    .components()
    .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
  if !inside || path.as_os_str().is_empty() {
    return Err(io::Error::new(
      io::ErrorKind::InvalidData,
      format!("target path {} leaves its package", path.display()),
    ));
  }
  Ok(path.to_path_buf())
}

/// Targets declared in a manifest or found by cargo's auto-discovery.
fn targets(src_dir: &Path, manifest: &toml::Table) -> io::Result<Vec<(PathBuf, StubKind)>> {
  let mut found = Vec::new();

  for (file, kind) in [("src/main.rs", StubKind::Bin), ("src/lib.rs", StubKind::Lib)] {
    if src_dir.join(file).is_file() {
      found.push((PathBuf::from(file), kind));
    }
  }
  if let Ok(entries) = fs::read_dir(src_dir.join("src/bin")) {
    for entry in entries.flatten() {
      let path = entry.path();
      if path.extension().is_some_and(|ext| ext == "rs") {
        found.push((PathBuf::from("src/bin").join(entry.file_name()), StubKind::Bin));
      } else if path.join("main.rs").is_file() {
        found.push((PathBuf::from("src/bin").join(entry.file_name()).join("main.rs"), StubKind::Bin));
      }
    }
  }

  let build_script = match manifest.get("package").and_then(|p| p.get("build")).and_then(|b| b.as_str()) {
    Some(path) => Some(package_relative(path)?),
    None => src_dir.join("build.rs").is_file().then(|| PathBuf::from("build.rs")),
  };
  if let Some(path) = build_script {
    found.push((path, StubKind::Bin));
  }

  if let Some(path) = manifest.get("lib").and_then(|l| l.get("path")).and_then(|p| p.as_str()) {
    found.push((package_relative(path)?, StubKind::Lib));
  }
  for section in ["bin", "example", "test", "bench"] {
    let declared = manifest.get(section).and_then(|s| s.as_array()).into_iter().flatten();
    for target in declared {
      if let Some(path) = target.get("path").and_then(|p| p.as_str()) {
        found.push((package_relative(path)?, StubKind::Bin));
      }
    }
  }

  found.sort();
  found.dedup_by(|a, b| a.0 == b.0);
  Ok(found)
}

/// Write the skeleton of `src` into `dst`, returning the number of stubs.
pub fn write_skeleton(src: &Path, dst: &Path) -> io::Result<usize> {
  if dst.exists() {
    fs::remove_dir_all(dst)?;
  }
  fs::create_dir_all(dst)?;

  let mut stubs = 0;
  for rel in manifest_files(src)? {
    let from = src.join(&rel);
    let to = dst.join(&rel);
    if let Some(parent) = to.parent() {
      fs::create_dir_all(parent)?;
    }
    fs::copy(&from, &to)?;

    if rel.file_name().is_some_and(|n| n == "Cargo.toml") {
      let content = fs::read_to_string(&from)?;
      let manifest: toml::Table = toml::from_str(&content)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{}: {}", from.display(), e)))?;
      let src_dir = from.parent().unwrap_or(src);
      let dst_dir = to.parent().unwrap_or(dst);

      for (target, kind) in targets(src_dir, &manifest)? {
        let stub = dst_dir.join(&target);
        if let Some(parent) = stub.parent() {
          fs::create_dir_all(parent)?;
        }
        fs::write(
          &stub,
          match kind {
            StubKind::Bin => BIN_STUB,
            StubKind::Lib => LIB_STUB,
          },
        )?;
        stubs += 1;
      }
    }
  }

  debug!(src = %src.display(), dst = %dst.display(), stubs, "wrote skeleton");
  Ok(stubs)
}
