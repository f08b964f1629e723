//! Binary post-processing for Linux targets.
//!
//! Some libraries the product needs at runtime never show up in its dynamic
//! section: audio backends reached through `dlopen` and the compiler's own
//! runtime support library. This stage declares them as `DT_NEEDED` entries in
//! the compiled binary without relinking, so the loader resolves them from
//! the binary alone.
//!
//! Editing is delegated to a [`DynamicEditor`], a narrow capability that only
//! knows how to add needed entries to a file. The stage around it checks the
//! input is a dynamic ELF, skips sonames already declared, works on a copy, and
//! re-reads the dynamic section afterwards to verify every requested soname
//! is present.
//!
//! # Submodules
//!
//! - [`elf`] - Reading `DT_NEEDED` entries
//! - [`patchelf`] - The `patchelf`-backed editor

pub mod elf;
pub mod patchelf;

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::compile::CompiledBinary;
use crate::deps::DependencySet;
use crate::platform::{Os, TargetPlatform};

pub use elf::{ElfReadError, needed_libraries};
pub use patchelf::Patchelf;

/// Library name and soname of the compiler runtime support library.
pub const COMPILER_RUNTIME: (&str, &str) = ("libgcc", "libgcc_s.so.1");

/// A library to declare as a runtime dependency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchEntry {
  pub library: String,
  pub soname: String,
}

impl PatchEntry {
  pub fn new(library: &str, soname: &str) -> Self {
    Self {
      library: library.to_string(),
      soname: soname.to_string(),
    }
  }
}

/// Ordered list of needed entries to add to a Linux binary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PatchSpec {
  pub entries: Vec<PatchEntry>,
}

impl PatchSpec {
  pub fn new(entries: Vec<PatchEntry>) -> Self {
    Self { entries }
  }

  /// Every dynamically loaded dependency, then the compiler runtime.
  pub fn for_dependencies(deps: &DependencySet) -> Self {
    let mut entries: Vec<PatchEntry> = deps
      .dynamically_loaded()
      .filter_map(|dep| dep.soname().map(|soname| PatchEntry::new(dep.name, soname)))
      .collect();
    entries.push(PatchEntry::new(COMPILER_RUNTIME.0, COMPILER_RUNTIME.1));
    Self { entries }
  }

  pub fn sonames(&self) -> impl Iterator<Item = &str> {
    self.entries.iter().map(|e| e.soname.as_str())
  }
}

#[derive(Debug, Error)]
pub enum PatchError {
  #[error("post-processing only applies to Linux binaries, not {0}")]
  WrongPlatform(TargetPlatform),

  #[error("{path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: ElfReadError,
  },

  #[error("binary editor '{program}' is not available: {source}")]
  ToolUnavailable {
    program: String,
    #[source]
    source: io::Error,
  },

  #[error("binary editor '{program}' failed with exit code {code:?}: {stderr}")]
  EditorFailed {
    program: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("{path} is still missing needed entries after patching: {}", missing.join(", "))]
  Verification { path: PathBuf, missing: Vec<String> },

  #[error("io error: {0}")]
  Io(#[from] io::Error),
}

/// Capability to add `DT_NEEDED` entries to a binary in place.
pub trait DynamicEditor: Send + Sync {
  fn add_needed(&self, binary: &Path, sonames: &[String]) -> impl Future<Output = Result<(), PatchError>> + Send;
}

fn read_needed(path: &Path) -> Result<Vec<String>, PatchError> {
  let data = std::fs::read(path)?;
  needed_libraries(&data).map_err(|source| PatchError::Read {
    path: path.to_path_buf(),
    source,
  })
}

/// Declare every soname in `spec` as needed by `binary`.
///
/// The input binary is left untouched; the patched copy is written to
/// `out_dir` and returned as a new [`CompiledBinary`].
pub async fn patch_binary<E: DynamicEditor>(
  editor: &E,
  binary: &CompiledBinary,
  spec: &PatchSpec,
  out_dir: &Path,
) -> Result<CompiledBinary, PatchError> {
  if binary.platform.os != Os::Linux {
    return Err(PatchError::WrongPlatform(binary.platform));
  }

  let existing = read_needed(&binary.path)?;
  debug!(binary = %binary.path.display(), needed = ?existing, "current dynamic dependencies");

  let mut missing: Vec<String> = Vec::new();
  for soname in spec.sonames() {
    if !existing.iter().any(|n| n == soname) && !missing.iter().any(|n| n == soname) {
      missing.push(soname.to_string());
    }
  }

  tokio::fs::create_dir_all(out_dir).await?;
  let file_name = binary.path.file_name().map(PathBuf::from).unwrap_or_else(|| PathBuf::from(&binary.product));
  let patched_path = out_dir.join(file_name);
  tokio::fs::copy(&binary.path, &patched_path).await?;

  if missing.is_empty() {
    info!(binary = %binary.path.display(), "all needed entries already declared");
  } else {
    info!(binary = %patched_path.display(), adding = ?missing, "adding needed entries");
    editor.add_needed(&patched_path, &missing).await?;
  }

  let after = read_needed(&patched_path)?;
  let still_missing: Vec<String> = spec
    .sonames()
    .filter(|soname| !after.iter().any(|n| n == soname))
    .map(str::to_string)
    .collect();
  if !still_missing.is_empty() {
    return Err(PatchError::Verification {
      path: patched_path,
      missing: still_missing,
    });
  }

  Ok(binary.with_path(patched_path))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::deps::resolve;
  use crate::platform::Arch;
  use crate::util::testutil::{ELF_DYNAMIC, ELF_DYNSTR, minimal_elf};
  use std::sync::Mutex;
  use tempfile::tempdir;

  /// Records calls without touching the binary.
  #[derive(Default)]
  struct RecordingEditor {
    calls: Mutex<Vec<Vec<String>>>,
  }

  impl DynamicEditor for RecordingEditor {
    async fn add_needed(&self, _binary: &Path, sonames: &[String]) -> Result<(), PatchError> {
      self.calls.lock().unwrap().push(sonames.to_vec());
      Ok(())
    }
  }

  fn binary_at(path: PathBuf, os: Os) -> CompiledBinary {
    CompiledBinary {
      product: "remote-m8".to_string(),
      platform: TargetPlatform::new(os, Arch::X86_64),
      version: "1.2.3".to_string(),
      path,
    }
  }

  #[test]
  fn default_spec_lists_dlopen_libraries_then_runtime() {
    let deps = resolve(&TargetPlatform::new(Os::Linux, Arch::X86_64)).unwrap();
    let spec = PatchSpec::for_dependencies(&deps);
    let sonames: Vec<_> = spec.sonames().collect();

    assert_eq!(sonames, vec!["libpipewire-0.3.so.0", "libjack.so.0", "libgcc_s.so.1"]);
    assert_eq!(spec.entries[0].library, "pipewire");
  }

  #[tokio::test]
  async fn refuses_non_linux_binaries() {
    let editor = RecordingEditor::default();
    let temp = tempdir().unwrap();
    let binary = binary_at(temp.path().join("remote-m8"), Os::MacOs);

    let result = patch_binary(&editor, &binary, &PatchSpec::default(), temp.path()).await;

    assert!(matches!(result, Err(PatchError::WrongPlatform(_))));
    assert!(editor.calls.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn rejects_files_that_are_not_elf() {
    let editor = RecordingEditor::default();
    let temp = tempdir().unwrap();
    let path = temp.path().join("remote-m8");
    std::fs::write(&path, b"#!/bin/sh\necho hi\n").unwrap();

    let result = patch_binary(&editor, &binary_at(path, Os::Linux), &PatchSpec::default(), temp.path()).await;

    assert!(matches!(
      result,
      Err(PatchError::Read {
        source: ElfReadError::NotElf,
        ..
      })
    ));
  }

  /// Adds needed entries to a [`minimal_elf`] image by filling its spare
  /// string table and dynamic section space.
  struct InPlaceEditor;

  impl DynamicEditor for InPlaceEditor {
    async fn add_needed(&self, binary: &Path, sonames: &[String]) -> Result<(), PatchError> {
      let mut data = std::fs::read(binary)?;
      for soname in sonames {
        let strtab = &data[ELF_DYNSTR];
        let offset = strtab.iter().rposition(|b| *b != 0).map_or(1, |last| last + 2);
        let start = ELF_DYNSTR.start + offset;
        data[start..start + soname.len()].copy_from_slice(soname.as_bytes());

        let slot = ELF_DYNAMIC
          .step_by(16)
          .find(|at| data[*at..*at + 8].iter().all(|b| *b == 0))
          .unwrap();
        data[slot..slot + 8].copy_from_slice(&1u64.to_le_bytes());
        data[slot + 8..slot + 16].copy_from_slice(&(offset as u64).to_le_bytes());
      }
      std::fs::write(binary, data)?;
      Ok(())
    }
  }

  #[tokio::test]
  async fn editor_declares_every_missing_soname() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("remote-m8");
    std::fs::write(&path, minimal_elf(&["libasound.so.2", "libc.so.6"])).unwrap();
    let binary = binary_at(path, Os::Linux);
    let deps = resolve(&binary.platform).unwrap();
    let spec = PatchSpec::for_dependencies(&deps);

    let patched = patch_binary(&InPlaceEditor, &binary, &spec, &temp.path().join("patched"))
      .await
      .unwrap();

    assert_eq!(
      read_needed(&patched.path).unwrap(),
      vec![
        "libasound.so.2",
        "libc.so.6",
        "libpipewire-0.3.so.0",
        "libjack.so.0",
        "libgcc_s.so.1"
      ]
    );
    // The input binary keeps its original entries
    assert_eq!(read_needed(&binary.path).unwrap(), vec!["libasound.so.2", "libc.so.6"]);
  }

  #[tokio::test]
  async fn only_missing_sonames_are_added() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("remote-m8");
    std::fs::write(&path, minimal_elf(&["libgcc_s.so.1"])).unwrap();
    let spec = PatchSpec::new(vec![
      PatchEntry::new("jack2", "libjack.so.0"),
      PatchEntry::new("libgcc", "libgcc_s.so.1"),
    ]);

    let patched = patch_binary(&InPlaceEditor, &binary_at(path, Os::Linux), &spec, &temp.path().join("patched"))
      .await
      .unwrap();

    assert_eq!(read_needed(&patched.path).unwrap(), vec!["libgcc_s.so.1", "libjack.so.0"]);
  }

  #[cfg(all(target_os = "linux", target_env = "gnu"))]
  mod with_fixture_binary {
    use super::*;

    /// The test executable itself is a dynamically linked ELF that needs libc.
    fn fixture(dir: &Path) -> CompiledBinary {
      let path = dir.join("remote-m8");
      std::fs::copy(std::env::current_exe().unwrap(), &path).unwrap();
      binary_at(path, Os::Linux)
    }

    #[tokio::test]
    async fn already_declared_sonames_skip_the_editor() {
      let editor = RecordingEditor::default();
      let temp = tempdir().unwrap();
      let binary = fixture(temp.path());
      let spec = PatchSpec::new(vec![PatchEntry::new("libc", "libc.so.6")]);

      let patched = patch_binary(&editor, &binary, &spec, &temp.path().join("patched"))
        .await
        .unwrap();

      assert!(editor.calls.lock().unwrap().is_empty());
      assert_eq!(patched.path, temp.path().join("patched/remote-m8"));
      assert_eq!(patched.platform, binary.platform);
    }

    #[tokio::test]
    async fn editor_that_does_nothing_fails_verification() {
      let editor = RecordingEditor::default();
      let temp = tempdir().unwrap();
      let binary = fixture(temp.path());
      let spec = PatchSpec::new(vec![
        PatchEntry::new("libc", "libc.so.6"),
        PatchEntry::new("jack2", "libjack.so.0"),
      ]);

      let result = patch_binary(&editor, &binary, &spec, &temp.path().join("patched")).await;

      // Only the missing soname is handed to the editor
      assert_eq!(*editor.calls.lock().unwrap(), vec![vec!["libjack.so.0".to_string()]]);
      match result {
        Err(PatchError::Verification { missing, .. }) => assert_eq!(missing, vec!["libjack.so.0"]),
        other => panic!("expected verification failure, got {:?}", other),
      }
    }

    #[tokio::test]
    #[ignore = "requires patchelf"]
    async fn patchelf_adds_every_soname() {
      let temp = tempdir().unwrap();
      let binary = fixture(temp.path());
      let deps = resolve(&binary.platform).unwrap();
      let spec = PatchSpec::for_dependencies(&deps);

      let patched = patch_binary(&Patchelf::default(), &binary, &spec, &temp.path().join("patched"))
        .await
        .unwrap();

      let needed = read_needed(&patched.path).unwrap();
      for soname in spec.sonames() {
        assert!(needed.iter().any(|n| n == soname), "{} missing from {:?}", soname, needed);
      }
      // The original stays untouched
      assert!(!read_needed(&binary.path).unwrap().iter().any(|n| n == "libjack.so.0"));
    }
  }
}
