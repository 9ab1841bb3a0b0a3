/// Common test utilities and helpers for RepoScout CLI tests
use assert_fs::fixture::PathChild;
use assert_fs::TempDir;
use std::path::PathBuf;
use std::process::{Command, Output};

/// Isolated config file and database for one test
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub config_path: PathBuf,
    pub database_path: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.child("config.yml").path().to_path_buf();
        let database_path = temp_dir.child("data").child("reposcout.db").path().to_path_buf();
        let pid_path = temp_dir.child("reposcout.pid").path().to_path_buf();

        let config_content = format!(
            r#"
github:
  auth_method: "auto"
database:
  path: "{}"
daemon:
  pid_file: "{}"
  log_file: ""
logging:
  level: "warn"
"#,
            database_path.display(),
            pid_path.display()
        );
        std::fs::write(&config_path, config_content).expect("Failed to write test config");

        Self {
            temp_dir,
            config_path,
            database_path,
        }
    }

    /// Run the CLI against this environment's config
    pub fn run(&self, args: &[&str]) -> Output {
        let config = self.config_path.to_string_lossy().to_string();
        let mut full_args = vec!["run", "--quiet", "--", "--config", config.as_str()];
        full_args.extend_from_slice(args);

        Command::new("cargo")
            .args(&full_args)
            .env("XDG_CONFIG_HOME", self.temp_dir.path())
            .env_remove("RUST_LOG")
            .output()
            .expect("Failed to execute command")
    }
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

/// Assertion helpers for test validation
pub fn assert_contains_all(text: &str, expected: &[&str]) {
    for item in expected {
        assert!(
            text.contains(item),
            "Expected text to contain '{}', but it didn't. Text: {}",
            item,
            text
        );
    }
}
