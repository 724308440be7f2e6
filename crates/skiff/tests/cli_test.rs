use assert_cmd::Command;
use predicates::prelude::*;

fn skiff() -> Command {
    Command::cargo_bin("skiff").unwrap()
}

#[test]
fn help_lists_lifecycle_commands() {
    skiff()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("create"))
        .stdout(predicate::str::contains("delete"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("dry-run"));
}

#[test]
fn create_with_missing_config_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    skiff()
        .current_dir(dir.path())
        .args(["create", "--config", "does-not-exist.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("spec file not found"));
}

#[test]
fn create_rejects_invalid_spec_before_any_cloud_call() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("skiff.yaml"),
        r#"
name: bad
region: ""
auth:
  key_name: k
  private_key_path: /tmp/k.pem
"#,
    )
    .unwrap();

    skiff()
        .current_dir(dir.path())
        .args(["create", "--config", "skiff.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("region must be set"));
}

const CACHE_DOC: &str = r#"
spec:
  name: demo
  provider: aws
  region: us-east-1
  instance:
    instance_type: t3.medium
  auth:
    key_name: ci-key
    private_key_path: /tmp/ci-key.pem
status:
  conditions:
    - type: Progressing
      status: false
      reason: ""
      message: ""
      last_transition: 2026-01-05T08:00:00Z
    - type: Degraded
      status: false
      reason: ""
      message: ""
      last_transition: 2026-01-05T08:00:00Z
    - type: Available
      status: true
      reason: Ready
      message: environment is available
      last_transition: 2026-01-05T08:04:12Z
    - type: Terminated
      status: false
      reason: ""
      message: ""
      last_transition: 2026-01-05T08:00:00Z
  properties:
    - name: instance-id
      value: i-0aa11bb22cc33dd44
    - name: public-dns-name
      value: ec2-198-51-100-7.compute-1.amazonaws.com
"#;

#[test]
fn status_reads_the_cache_file() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("demo.yaml");
    std::fs::write(&cache, CACHE_DOC).unwrap();

    skiff()
        .current_dir(dir.path())
        .args(["status", "--cache"])
        .arg(&cache)
        .assert()
        .success()
        .stdout(predicate::str::contains("Available"))
        .stdout(predicate::str::contains("i-0aa11bb22cc33dd44"));
}

#[test]
fn status_json_prints_the_raw_document() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("demo.yaml");
    std::fs::write(&cache, CACHE_DOC).unwrap();

    skiff()
        .current_dir(dir.path())
        .args(["status", "--json", "--cache"])
        .arg(&cache)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"conditions\""))
        .stdout(predicate::str::contains("\"instance-id\""));
}

#[test]
fn status_without_cache_file_reports_never_created() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("skiff.yaml"),
        r#"
name: fresh
region: us-east-1
auth:
  key_name: ci-key
  private_key_path: /tmp/ci-key.pem
"#,
    )
    .unwrap();

    skiff()
        .current_dir(dir.path())
        .args(["status", "--config", "skiff.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no cache file"));
}
