use predicates::prelude::*;

use super::common::{TestEnv, file_url, write_source_tree};

#[test]
fn unsupported_platform_fails_without_touching_outputs() {
  let env = TestEnv::with_config("[product]\nsource = \"app\"\n");
  write_source_tree(&env, "app");

  let output = env
    .m8dist_cmd()
    .args(["build", "--platform", "linux-x86_64-musl", "--version", "1.0.0", "-o", "json"])
    .output()
    .unwrap();
  assert!(!output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["failed"]["linux-x86_64-musl"]["stage"], "unsupported-platform");
  assert!(json["succeeded"].as_object().unwrap().is_empty());
  assert!(!env.path("dist").exists());
}

#[test]
fn missing_frontend_stops_before_compilation() {
  let env = TestEnv::empty();
  write_source_tree(&env, "app");
  let missing = env.path("frontend-gone.tar.gz");
  let config = format!(
    "matrix = [\"linux-x86_64\"]\n\n[product]\nsource = \"app\"\n\n[frontend]\nurl = \"{}\"\nsha256 = \"{}\"\n",
    file_url(&missing),
    "ab".repeat(32)
  );
  env.write_file("m8dist.toml", &config);

  env
    .m8dist_cmd()
    .args(["build", "--version", "1.0.0"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("missing-frontend-artifact"))
    .stderr(predicate::str::contains("1 of 1 platform job(s) failed"));

  // The dependency cache is never populated
  assert!(!env.cache_path().join("deps").exists());
  assert!(!env.path("dist").exists());
}

#[test]
fn failed_release_is_not_published() {
  let env = TestEnv::empty();
  write_source_tree(&env, "app");
  let config = format!(
    "matrix = [\"linux-x86_64\", \"macos-aarch64\"]\n\n[product]\nsource = \"app\"\n\n\
     [frontend]\nurl = \"{}\"\nsha256 = \"{}\"\n\n[release.store]\nkind = \"directory\"\npath = \"published\"\n",
    file_url(&env.path("missing.tar.gz")),
    "cd".repeat(32)
  );
  env.write_file("m8dist.toml", &config);

  env
    .m8dist_cmd()
    .args(["release", "--ref", "refs/tags/v1.0.0"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Release withheld"))
    .stderr(predicate::str::contains("v1.0.0 was not published"));

  assert!(!env.path("published").exists());
}
