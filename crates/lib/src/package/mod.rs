//! Packaging release archives.
//!
//! A compiled (and possibly patched) binary is stripped, written as the single
//! entry of `<product>-<version>-<os>-<arch>.tar.gz`, and checksummed into
//! `<product>-<version>-<os>-<arch>.sha256` in `sha256sum` format.
//!
//! Archives are byte-for-byte reproducible: the tar header carries fixed
//! ownership, mode and mtime (`SOURCE_DATE_EPOCH`), and the gzip header has a
//! zero mtime and no file name.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::compile::CompiledBinary;
use crate::consts::SOURCE_DATE_EPOCH;
use crate::platform::TargetPlatform;

const ARCHIVE_EXT: &str = ".tar.gz";
const CHECKSUM_EXT: &str = ".sha256";
const BINARY_MODE: u32 = 0o755;

#[derive(Debug, Error)]
pub enum PackageError {
  #[error("strip tool '{program}' is not available: {source}")]
  StripUnavailable {
    program: String,
    #[source]
    source: io::Error,
  },

  #[error("strip tool '{program}' failed with exit code {code:?}: {stderr}")]
  StripFailed {
    program: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("no checksum file {0}")]
  MissingChecksum(PathBuf),

  #[error("malformed checksum file {0}")]
  MalformedChecksum(PathBuf),

  #[error("checksum mismatch for {archive}: expected {expected}, got {actual}")]
  ChecksumMismatch {
    archive: PathBuf,
    expected: String,
    actual: String,
  },

  #[error("unexpected archive entry '{0}'")]
  UnexpectedEntry(String),

  #[error("io error: {0}")]
  Io(#[from] io::Error),
}

/// An archive and its checksum file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseArtifact {
  pub product: String,
  pub version: String,
  pub platform: TargetPlatform,
  pub archive: PathBuf,
  pub checksum: PathBuf,
  pub sha256: String,
}

impl ReleaseArtifact {
  pub fn files(&self) -> [&Path; 2] {
    [&self.archive, &self.checksum]
  }
}

fn base_name(product: &str, version: &str, platform: &TargetPlatform) -> String {
  format!("{}-{}-{}", product, version, platform.slug())
}

/// `<product>-<version>-<os>-<arch>.tar.gz`
pub fn archive_name(product: &str, version: &str, platform: &TargetPlatform) -> String {
  format!("{}{}", base_name(product, version, platform), ARCHIVE_EXT)
}

/// `<product>-<version>-<os>-<arch>.sha256`
pub fn checksum_name(product: &str, version: &str, platform: &TargetPlatform) -> String {
  format!("{}{}", base_name(product, version, platform), CHECKSUM_EXT)
}

/// The checksum file that belongs next to `archive`.
pub fn checksum_path_for(archive: &Path) -> PathBuf {
  let name = archive.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
  let stem = name.strip_suffix(ARCHIVE_EXT).unwrap_or(&name);
  archive.with_file_name(format!("{}{}", stem, CHECKSUM_EXT))
}

/// Copy `binary` into `out_dir` and strip debug symbols from the copy.
pub async fn strip_binary(strip: &Path, binary: &CompiledBinary, out_dir: &Path) -> Result<CompiledBinary, PackageError> {
  tokio::fs::create_dir_all(out_dir).await?;
  let file_name = binary.path.file_name().map(PathBuf::from).unwrap_or_else(|| PathBuf::from(&binary.product));
  let stripped = out_dir.join(file_name);
  tokio::fs::copy(&binary.path, &stripped).await?;

  let program = strip.display().to_string();
  debug!(program = %program, binary = %stripped.display(), "stripping debug symbols");
  let output = Command::new(strip)
    .arg("-S")
    .arg(&stripped)
    .output()
    .await
    .map_err(|source| PackageError::StripUnavailable {
      program: program.clone(),
      source,
    })?;

  if !output.status.success() {
    return Err(PackageError::StripFailed {
      program,
      code: output.status.code(),
      stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    });
  }

  Ok(binary.with_path(stripped))
}

/// Write `binary` as the only entry `<entry_name>` of a gzip tarball.
pub fn write_archive(binary: &Path, entry_name: &str, dest: &Path) -> Result<(), PackageError> {
  let data = fs::read(binary)?;

  let mut header = tar::Header::new_gnu();
  header.set_entry_type(tar::EntryType::Regular);
  header.set_size(data.len() as u64);
  header.set_mode(BINARY_MODE);
  header.set_uid(0);
  header.set_gid(0);
  header.set_mtime(SOURCE_DATE_EPOCH);
  header.set_username("")?;
  header.set_groupname("")?;

  let file = fs::File::create(dest)?;
  let encoder = GzBuilder::new().mtime(0).write(file, Compression::best());
  let mut builder = tar::Builder::new(encoder);
  builder.mode(tar::HeaderMode::Deterministic);
  builder.append_data(&mut header, entry_name, data.as_slice())?;

  let encoder = builder.into_inner()?;
  let mut file = encoder.finish()?;
  file.flush()?;
  file.sync_all()?;
  Ok(())
}

fn sha256_file(path: &Path) -> io::Result<String> {
  let mut file = fs::File::open(path)?;
  let mut hasher = Sha256::new();
  let mut buf = [0u8; 64 * 1024];
  loop {
    let n = file.read(&mut buf)?;
    if n == 0 {
      break;
    }
    hasher.update(&buf[..n]);
  }
  Ok(hex::encode(hasher.finalize()))
}

/// Archive and checksum `binary` into `out_dir`.
pub fn package(binary: &CompiledBinary, out_dir: &Path) -> Result<ReleaseArtifact, PackageError> {
  fs::create_dir_all(out_dir)?;
  let archive_file = archive_name(&binary.product, &binary.version, &binary.platform);
  let archive = out_dir.join(&archive_file);
  let checksum = out_dir.join(checksum_name(&binary.product, &binary.version, &binary.platform));

  write_archive(&binary.path, &binary.product, &archive)?;
  let sha256 = sha256_file(&archive)?;
  fs::write(&checksum, format!("{}  {}\n", sha256, archive_file))?;

  info!(archive = %archive.display(), sha256 = %sha256, "packaged release archive");
  Ok(ReleaseArtifact {
    product: binary.product.clone(),
    version: binary.version.clone(),
    platform: binary.platform,
    archive,
    checksum,
    sha256,
  })
}

/// Recompute the digest of `archive` and compare it with its checksum file.
pub fn verify_checksum(archive: &Path) -> Result<String, PackageError> {
  let checksum = checksum_path_for(archive);
  let content = match fs::read_to_string(&checksum) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(PackageError::MissingChecksum(checksum)),
    Err(e) => return Err(e.into()),
  };

  let expected = content
    .split_whitespace()
    .next()
    .filter(|h| h.len() == 64 && h.chars().all(|c| c.is_ascii_hexdigit()))
    .ok_or_else(|| PackageError::MalformedChecksum(checksum.clone()))?
    .to_lowercase();

  let actual = sha256_file(archive)?;
  if actual != expected {
    return Err(PackageError::ChecksumMismatch {
      archive: archive.to_path_buf(),
      expected,
      actual,
    });
  }
  Ok(actual)
}

/// Extract the single binary of a release archive into `dest_dir`.
pub fn unpack_archive(archive: &Path, dest_dir: &Path) -> Result<PathBuf, PackageError> {
  let file = fs::File::open(archive)?;
  let mut tar = tar::Archive::new(GzDecoder::new(file));
  fs::create_dir_all(dest_dir)?;

  let mut installed = None;
  for entry in tar.entries()? {
    let mut entry = entry?;
    let name = entry.path()?.to_string_lossy().into_owned();
    let plain = !name.is_empty() && !name.contains('/') && name != "." && name != "..";
    if installed.is_some() || !plain || entry.header().entry_type() != tar::EntryType::Regular {
      return Err(PackageError::UnexpectedEntry(name));
    }
    let target = dest_dir.join(&name);
    entry.unpack(&target)?;
    installed = Some(target);
  }

  installed.ok_or_else(|| PackageError::UnexpectedEntry(String::new()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::platform::{Arch, Os};
  use tempfile::TempDir;

  fn binary(dir: &Path, version: &str, platform: TargetPlatform) -> CompiledBinary {
    let path = dir.join("remote-m8");
    fs::write(&path, b"\x7fELF pretend binary").unwrap();
    CompiledBinary {
      product: "remote-m8".to_string(),
      platform,
      version: version.to_string(),
      path,
    }
  }

  #[test]
  fn names_follow_the_release_pattern() {
    let linux = TargetPlatform::new(Os::Linux, Arch::X86_64);
    let mac = TargetPlatform::new(Os::MacOs, Arch::Aarch64);

    assert_eq!(archive_name("remote-m8", "1.2.3", &linux), "remote-m8-1.2.3-linux-x86_64.tar.gz");
    assert_eq!(checksum_name("remote-m8", "1.2.3", &linux), "remote-m8-1.2.3-linux-x86_64.sha256");
    assert_eq!(archive_name("remote-m8", "v2.0.0", &mac), "remote-m8-v2.0.0-macos-aarch64.tar.gz");
    assert_eq!(
      checksum_path_for(Path::new("/d/remote-m8-v2.0.0-macos-aarch64.tar.gz")),
      PathBuf::from("/d/remote-m8-v2.0.0-macos-aarch64.sha256")
    );
  }

  #[test]
  fn packaging_is_deterministic() {
    let platform = TargetPlatform::new(Os::Linux, Arch::X86_64);
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();

    let first = package(&binary(a.path(), "1.2.3", platform), &a.path().join("out")).unwrap();
    let second = package(&binary(b.path(), "1.2.3", platform), &b.path().join("out")).unwrap();

    assert_eq!(first.sha256, second.sha256);
    assert_eq!(fs::read(&first.archive).unwrap(), fs::read(&second.archive).unwrap());
  }

  #[test]
  fn checksum_file_matches_recomputed_digest() {
    let temp = TempDir::new().unwrap();
    let platform = TargetPlatform::new(Os::Linux, Arch::X86_64);
    let artifact = package(&binary(temp.path(), "1.2.3", platform), &temp.path().join("out")).unwrap();

    let content = fs::read_to_string(&artifact.checksum).unwrap();
    assert_eq!(
      content,
      format!("{}  remote-m8-1.2.3-linux-x86_64.tar.gz\n", artifact.sha256)
    );
    assert_eq!(verify_checksum(&artifact.archive).unwrap(), artifact.sha256);
  }

  #[test]
  fn archive_entry_has_fixed_metadata() {
    let temp = TempDir::new().unwrap();
    let platform = TargetPlatform::new(Os::MacOs, Arch::Aarch64);
    let artifact = package(&binary(temp.path(), "v2.0.0", platform), &temp.path().join("out")).unwrap();

    let mut tar = tar::Archive::new(GzDecoder::new(fs::File::open(&artifact.archive).unwrap()));
    let entries: Vec<_> = tar
      .entries()
      .unwrap()
      .map(|e| {
        let e = e.unwrap();
        let h = e.header();
        (
          e.path().unwrap().to_string_lossy().into_owned(),
          h.mode().unwrap(),
          h.mtime().unwrap(),
          h.uid().unwrap(),
        )
      })
      .collect();

    assert_eq!(entries, vec![("remote-m8".to_string(), 0o755, SOURCE_DATE_EPOCH, 0)]);
  }

  #[test]
  fn tampered_archive_fails_verification() {
    let temp = TempDir::new().unwrap();
    let platform = TargetPlatform::new(Os::Linux, Arch::Aarch64);
    let artifact = package(&binary(temp.path(), "1.0.0", platform), &temp.path().join("out")).unwrap();

    let mut data = fs::read(&artifact.archive).unwrap();
    data.push(0);
    fs::write(&artifact.archive, data).unwrap();

    assert!(matches!(
      verify_checksum(&artifact.archive),
      Err(PackageError::ChecksumMismatch { .. })
    ));
  }

  #[test]
  fn missing_checksum_file() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("remote-m8-1.0.0-linux-x86_64.tar.gz");
    fs::write(&archive, b"").unwrap();

    assert!(matches!(verify_checksum(&archive), Err(PackageError::MissingChecksum(_))));
  }

  #[test]
  fn unpacks_the_single_binary() {
    let temp = TempDir::new().unwrap();
    let platform = TargetPlatform::new(Os::Linux, Arch::X86_64);
    let artifact = package(&binary(temp.path(), "1.2.3", platform), &temp.path().join("out")).unwrap();

    let installed = unpack_archive(&artifact.archive, &temp.path().join("prefix/bin")).unwrap();

    assert_eq!(installed, temp.path().join("prefix/bin/remote-m8"));
    assert_eq!(fs::read(&installed).unwrap(), b"\x7fELF pretend binary");
    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      assert_eq!(fs::metadata(&installed).unwrap().permissions().mode() & 0o777, 0o755);
    }
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn strip_works_on_a_copy() {
    let temp = TempDir::new().unwrap();
    let platform = TargetPlatform::new(Os::Linux, Arch::X86_64);
    let original = binary(temp.path(), "1.2.3", platform);

    // `true` accepts any arguments and leaves the file alone
    let stripped = strip_binary(Path::new("/bin/true"), &original, &temp.path().join("stripped"))
      .await
      .unwrap();

    assert_eq!(stripped.path, temp.path().join("stripped/remote-m8"));
    assert_eq!(stripped.version, original.version);
    assert!(original.path.exists());
  }

  #[tokio::test]
  async fn missing_strip_tool() {
    let temp = TempDir::new().unwrap();
    let platform = TargetPlatform::new(Os::Linux, Arch::X86_64);
    let original = binary(temp.path(), "1.2.3", platform);

    let result = strip_binary(Path::new("/nonexistent/strip"), &original, &temp.path().join("s")).await;

    assert!(matches!(result, Err(PackageError::StripUnavailable { .. })));
  }
}
