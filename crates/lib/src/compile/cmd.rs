//! Running build commands in a scrubbed environment.

use std::collections::BTreeMap;
use std::path::Path;

use tokio::process::Command;
use tracing::{debug, info};

use super::CompileError;

/// Lines of stderr kept in a [`CompileError::CommandFailed`].
const STDERR_TAIL_LINES: usize = 40;

/// Run `cmd` through `/bin/sh -c` in `cwd`.
///
/// The host environment is cleared. `HOME` points to a directory that does
/// not exist, temp variables point to `tmp_dir`, and `env` supplies
/// everything else (including `PATH`). Returns trimmed stdout.
pub async fn run_command(
  cmd: &str,
  env: &BTreeMap<String, String>,
  cwd: &Path,
  tmp_dir: &Path,
) -> Result<String, CompileError> {
  info!(cmd = %cmd, cwd = %cwd.display(), "running build command");
  tokio::fs::create_dir_all(tmp_dir).await?;

  let (shell, args) = shell();
  let mut command = Command::new(shell);
  command
    .args(args)
    .arg(cmd)
    .current_dir(cwd)
    .env_clear()
    .env("HOME", "/homeless-shelter")
    .env("TMPDIR", tmp_dir)
    .env("TMP", tmp_dir)
    .env("TEMP", tmp_dir)
    .envs(env);

  let output = command.output().await?;
  let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stdout.is_empty() {
      debug!(stdout = %stdout, "command stdout");
    }
    return Err(CompileError::CommandFailed {
      cmd: cmd.to_string(),
      code: output.status.code(),
      stderr: tail(&stderr, STDERR_TAIL_LINES),
    });
  }

  if !stdout.is_empty() {
    debug!(stdout = %stdout, "command output");
  }
  Ok(stdout)
}

#[cfg(unix)]
fn shell() -> (&'static str, &'static [&'static str]) {
  ("/bin/sh", &["-c"])
}

#[cfg(windows)]
fn shell() -> (&'static str, &'static [&'static str]) {
  ("cmd.exe", &["/C"])
}

fn tail(text: &str, lines: usize) -> String {
  let all: Vec<&str> = text.trim_end().lines().collect();
  let start = all.len().saturating_sub(lines);
  all[start..].join("\n")
}
