//! CLI Integration Tests
//!
//! Startup failures are fatal: the binary must exit non-zero before serving
//! anything when the configuration cannot produce a storage stack.

#[cfg(test)]
mod tests {
    use assert_cmd::Command;
    use predicates::prelude::*;
    use std::io::Write;

    #[test]
    fn test_missing_config_file_fails() {
        Command::cargo_bin("mizuchi-store")
            .unwrap()
            .args(["--config", "/definitely/not/here.yaml"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to read config file"));
    }

    #[test]
    fn test_invalid_config_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "storage:\n  backend:\n    type: memory\nmetrics:\n  enabled: true\n  address: nowhere"
        )
        .unwrap();

        Command::cargo_bin("mizuchi-store")
            .unwrap()
            .arg("--config")
            .arg(file.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid metrics address"));
    }

    #[test]
    fn test_help_lists_quota_flags() {
        Command::cargo_bin("mizuchi-store")
            .unwrap()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("--store-size"))
            .stdout(predicate::str::contains("--max-size"));
    }
}
