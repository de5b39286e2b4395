//! Integration tests for Stowage

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    /// A config whose store cannot be reached, so any store access fails
    /// with a different error than the one under test
    fn isolated() -> (TempDir, Command) {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("config.toml");
        std::fs::write(
            &config,
            format!(
                "[store]\npodman = \"{}\"\nstate_dir = \"{}\"\n",
                dir.path().join("no-such-podman").display(),
                dir.path().join("state").display()
            ),
        )
        .unwrap();

        let mut cmd = cargo_bin_cmd!("stowage");
        cmd.env("STOWAGE_CONFIG", &config).env_remove("STOWAGE_HISTORY");
        (dir, cmd)
    }

    #[test]
    fn help_displays() {
        cargo_bin_cmd!("stowage")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("add and copy content"));
    }

    #[test]
    fn version_displays() {
        cargo_bin_cmd!("stowage")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("stowage"));
    }

    #[test]
    fn copy_help_lists_flags() {
        cargo_bin_cmd!("stowage")
            .args(["copy", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--contextdir"))
            .stdout(predicate::str::contains("--parents"));
    }

    #[test]
    fn missing_container() {
        let (_dir, mut cmd) = isolated();
        cmd.arg("copy")
            .assert()
            .failure()
            .stderr(predicate::str::contains("container ID must be specified"));
    }

    #[test]
    fn missing_source() {
        let (_dir, mut cmd) = isolated();
        cmd.args(["add", "web"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("src must be specified"));
    }

    #[test]
    fn ignorefile_requires_contextdir() {
        let (_dir, mut cmd) = isolated();
        cmd.args(["copy", "--ignorefile", "custom.ignore", "web", "src"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("requires that you specify a context dir"))
            .stdout(predicate::str::is_empty());
    }

    #[test]
    fn bad_timestamp() {
        let (_dir, mut cmd) = isolated();
        cmd.args(["copy", "--timestamp", "yesterday", "web", "src"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("parsing timestamp value"));
    }

    #[test]
    fn bad_retry_delay() {
        let (_dir, mut cmd) = isolated();
        cmd.args(["copy", "--retry-delay", "soon", "web", "src"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--retry-delay"));
    }

    #[test]
    fn checksum_requires_url() {
        let (_dir, mut cmd) = isolated();
        let checksum = format!("sha256:{}", "0".repeat(64));
        cmd.args(["add", "--checksum", &checksum, "web", "local.txt"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--checksum can only be used"));
    }

    #[test]
    fn add_rejects_parents() {
        cargo_bin_cmd!("stowage")
            .args(["add", "--parents", "web", "src"])
            .assert()
            .failure();
    }

    #[test]
    fn unreachable_store_reported_with_context() {
        let (_dir, mut cmd) = isolated();
        cmd.args(["copy", "web", "src"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("reading build container"));
    }

    #[test]
    fn history_of_unknown_store_fails() {
        let (_dir, mut cmd) = isolated();
        cmd.args(["history", "web"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"));
    }
}

#[cfg(target_os = "linux")]
mod testreport_tests {
    use assert_cmd::cargo::cargo_bin_cmd;
    use predicates::prelude::*;

    #[test]
    fn prints_runtime_spec() {
        cargo_bin_cmd!("stowage-testreport")
            .assert()
            .success()
            .stdout(predicate::str::contains("\"ociVersion\":\"1.2.0\""))
            .stdout(predicate::str::contains("\"uidMappings\""));
    }
}
