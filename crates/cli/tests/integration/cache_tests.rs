use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn list_on_empty_cache() {
  let env = TestEnv::empty();

  env
    .m8dist_cmd()
    .args(["cache", "list"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Dependency cache is empty"));
}

#[test]
fn list_reports_incomplete_entries() {
  let env = TestEnv::empty();
  let entry = env.cache_path().join("deps/abcdef0123456789abcd");
  std::fs::create_dir_all(entry.join("target")).unwrap();
  std::fs::write(entry.join("target/lib.rlib"), b"partial").unwrap();

  let output = env.m8dist_cmd().args(["cache", "list", "-o", "json"]).output().unwrap();
  assert!(output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let entries = json["entries"].as_array().unwrap();
  assert_eq!(entries.len(), 1);
  assert_eq!(entries[0]["hash"], "abcdef0123456789abcd");
  assert_eq!(entries[0]["complete"], false);
  assert_eq!(json["total_bytes"], 7);
}

#[test]
fn clean_removes_every_entry() {
  let env = TestEnv::empty();
  let deps = env.cache_path().join("deps");
  for hash in ["aaaaaaaaaaaaaaaaaaaa", "bbbbbbbbbbbbbbbbbbbb"] {
    std::fs::create_dir_all(deps.join(hash)).unwrap();
  }

  env
    .m8dist_cmd()
    .args(["cache", "clean"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Removed 2 cache entries"));

  assert_eq!(std::fs::read_dir(&deps).unwrap().count(), 0);
}
