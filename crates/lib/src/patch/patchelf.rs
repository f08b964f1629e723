//! [`DynamicEditor`] backed by the `patchelf` tool.

use std::io;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::debug;

use super::{DynamicEditor, PatchError};

/// Runs `patchelf --add-needed <soname>... <binary>`.
#[derive(Debug, Clone)]
pub struct Patchelf {
  program: PathBuf,
}

impl Patchelf {
  pub fn new(program: impl Into<PathBuf>) -> Self {
    Self { program: program.into() }
  }

  pub fn program(&self) -> &Path {
    &self.program
  }

  fn args(binary: &Path, sonames: &[String]) -> Vec<String> {
    let mut args = Vec::with_capacity(sonames.len() * 2 + 1);
    for soname in sonames {
      args.push("--add-needed".to_string());
      args.push(soname.clone());
    }
    args.push(binary.to_string_lossy().into_owned());
    args
  }
}

impl Default for Patchelf {
  fn default() -> Self {
    Self::new("patchelf")
  }
}

impl DynamicEditor for Patchelf {
  async fn add_needed(&self, binary: &Path, sonames: &[String]) -> Result<(), PatchError> {
    let program = self.program.display().to_string();
    let args = Self::args(binary, sonames);
    debug!(program = %program, args = ?args, "running binary editor");

    let output = Command::new(&self.program)
      .args(&args)
      .output()
      .await
      .map_err(|source| match source.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => PatchError::ToolUnavailable {
          program: program.clone(),
          source,
        },
        _ => PatchError::Io(source),
      })?;

    if !output.status.success() {
      return Err(PatchError::EditorFailed {
        program,
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }
    Ok(())
  }
}
