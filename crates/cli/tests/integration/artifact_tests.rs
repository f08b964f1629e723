use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn verify_accepts_untouched_archive() {
  let env = TestEnv::empty();
  let artifact = env.release_artifact("1.2.3", "linux-x86_64");

  env
    .m8dist_cmd()
    .arg("verify")
    .arg(&artifact.archive)
    .assert()
    .success()
    .stdout(predicate::str::contains(artifact.sha256.as_str()));
}

#[test]
fn verify_rejects_tampered_archive() {
  let env = TestEnv::empty();
  let artifact = env.release_artifact("1.2.3", "linux-x86_64");
  let mut bytes = std::fs::read(&artifact.archive).unwrap();
  bytes.push(0);
  std::fs::write(&artifact.archive, bytes).unwrap();

  env
    .m8dist_cmd()
    .arg("verify")
    .arg(&artifact.archive)
    .assert()
    .failure()
    .stderr(predicate::str::contains("Verification of"));
}

#[test]
fn verify_without_checksum_file_fails() {
  let env = TestEnv::empty();
  let artifact = env.release_artifact("2.0.0", "macos-aarch64");
  std::fs::remove_file(&artifact.checksum).unwrap();

  env.m8dist_cmd().arg("verify").arg(&artifact.archive).assert().failure();
}

#[test]
fn install_places_binary_under_prefix() {
  let env = TestEnv::empty();
  let artifact = env.release_artifact("1.2.3", "linux-aarch64");
  let prefix = env.path("prefix");

  env
    .m8dist_cmd()
    .arg("install")
    .arg(&artifact.archive)
    .arg("--prefix")
    .arg(&prefix)
    .assert()
    .success()
    .stdout(predicate::str::contains("Installed"));

  let installed = prefix.join("bin/remote-m8");
  assert_eq!(std::fs::read(&installed).unwrap(), b"#!/bin/sh\necho remote-m8\n");

  // No staging directories are left next to the binary
  let leftovers: Vec<_> = std::fs::read_dir(prefix.join("bin"))
    .unwrap()
    .map(|e| e.unwrap().file_name())
    .filter(|n| n.to_string_lossy().starts_with(".m8dist-install-"))
    .collect();
  assert!(leftovers.is_empty());

  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::metadata(&installed).unwrap().permissions().mode();
    assert_eq!(mode & 0o111, 0o111);
  }
}

#[test]
fn install_defaults_to_home_local() {
  let env = TestEnv::empty();
  let artifact = env.release_artifact("1.2.3", "linux-x86_64");

  let output = env
    .m8dist_cmd()
    .arg("install")
    .arg(&artifact.archive)
    .args(["-o", "json"])
    .output()
    .unwrap();
  assert!(output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["sha256"], artifact.sha256.as_str());
  assert!(env.path(".local/bin/remote-m8").is_file());
}

#[test]
fn install_refuses_tampered_archive() {
  let env = TestEnv::empty();
  let artifact = env.release_artifact("1.2.3", "linux-x86_64");
  std::fs::write(&artifact.checksum, format!("{}  x\n", "0".repeat(64))).unwrap();
  let prefix = env.path("prefix");

  env
    .m8dist_cmd()
    .arg("install")
    .arg(&artifact.archive)
    .arg("--prefix")
    .arg(&prefix)
    .assert()
    .failure()
    .stderr(predicate::str::contains("Refusing to install"));

  assert!(!prefix.join("bin/remote-m8").exists());
}
