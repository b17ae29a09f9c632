//! CLI command execution helpers with automatic timing
//!
//! Wraps the `lakesweep` binary, measures execution time and exposes
//! assertion helpers for exit codes and output.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

/// CLI command builder with timing
pub struct LakesweepCommand {
    binary_path: PathBuf,
    working_dir: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl LakesweepCommand {
    /// Create a new command in the given working directory
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            binary_path: find_lakesweep_binary(),
            working_dir: working_dir.as_ref().to_path_buf(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    /// Add command arguments
    pub fn args(&mut self, args: &[&str]) -> &mut Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    /// Set environment variable
    pub fn env(&mut self, key: &str, value: &str) -> &mut Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Execute command and return result with timing
    pub fn execute(&self) -> Result<CommandResult> {
        let start = Instant::now();

        let output = Command::new(&self.binary_path)
            .args(&self.args)
            .current_dir(&self.working_dir)
            .envs(&self.env)
            .env_remove("RUST_LOG")
            .output()
            .with_context(|| format!("Failed to execute {}", self.binary_path.display()))?;

        Ok(CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            duration: start.elapsed(),
        })
    }

    /// Execute and assert success
    pub fn assert_success(&self) -> Result<CommandResult> {
        let result = self.execute()?;

        if !result.success() {
            anyhow::bail!(
                "Command failed (exit code: {}):\nArgs: {:?}\nStdout: {}\nStderr: {}",
                result.exit_code,
                self.args,
                result.stdout,
                result.stderr
            );
        }

        Ok(result)
    }

    /// Execute and assert a specific exit code
    pub fn assert_exit(&self, code: i32) -> Result<CommandResult> {
        let result = self.execute()?;

        if result.exit_code != code {
            anyhow::bail!(
                "Expected exit code {}, got {}:\nArgs: {:?}\nStdout: {}\nStderr: {}",
                code,
                result.exit_code,
                self.args,
                result.stdout,
                result.stderr
            );
        }

        Ok(result)
    }

    /// Execute and expect failure
    pub fn assert_failure(&self) -> Result<CommandResult> {
        let result = self.execute()?;

        if result.success() {
            anyhow::bail!(
                "Command should have failed but succeeded:\nArgs: {:?}\nStdout: {}",
                self.args,
                result.stdout
            );
        }

        Ok(result)
    }
}

/// Command execution result with timing
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
}

impl CommandResult {
    /// Check if command succeeded
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Check if stdout contains text
    pub fn contains_stdout(&self, text: &str) -> bool {
        self.stdout.contains(text)
    }

    /// Check if stderr contains text
    pub fn contains_stderr(&self, text: &str) -> bool {
        self.stderr.contains(text)
    }

    /// Parse stdout as a JSON report
    pub fn json(&self) -> Result<serde_json::Value> {
        serde_json::from_str(&self.stdout)
            .with_context(|| format!("stdout is not JSON:\n{}", self.stdout))
    }

    /// First run ID (ULID) printed on stdout
    pub fn parse_run_id(&self) -> Option<String> {
        self.stdout.lines().find_map(extract_ulid)
    }

    /// Every run ID printed on stdout, in order
    pub fn parse_run_ids(&self) -> Vec<String> {
        self.stdout.lines().filter_map(extract_ulid).collect()
    }
}

/// Extract ULID from a line of text
pub fn extract_ulid(line: &str) -> Option<String> {
    // 26 Crockford base32 characters; runs created this century start with 01
    for (i, window) in line.as_bytes().windows(26).enumerate() {
        if window[0] == b'0'
            && window[1] == b'1'
            && window.iter().all(|b| b.is_ascii_alphanumeric())
        {
            return Some(line[i..i + 26].to_string());
        }
    }

    None
}

/// Find the lakesweep binary in the target directory
fn find_lakesweep_binary() -> PathBuf {
    if let Some(path) = option_env!("CARGO_BIN_EXE_lakesweep") {
        return PathBuf::from(path);
    }

    // Go up from the test binary location
    let mut path = std::env::current_exe().expect("Failed to get current exe path");
    path.pop(); // Remove test binary name
    path.pop(); // Remove deps/

    let debug_bin = path.join("lakesweep");
    if debug_bin.exists() {
        return debug_bin;
    }

    path.pop(); // Remove debug/
    let release_bin = path.join("release").join("lakesweep");
    if release_bin.exists() {
        return release_bin;
    }

    path.join("debug").join("lakesweep")
}

/// Macro for convenient command construction
///
/// Usage:
/// ```ignore
/// lakesweep!(lake.root(), "list").assert_success()?;
/// lakesweep!(lake.root(), "inspect", &run_id, "--json").assert_success()?;
/// ```
#[macro_export]
macro_rules! lakesweep {
    ($dir:expr, $($arg:expr),*) => {{
        let mut cmd = $crate::common::cli::LakesweepCommand::new($dir);
        cmd.args(&[$($arg),*]);
        cmd
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ulid_extraction() {
        let line = "Run 01HXKJ7NVQW3Y2YMZK5VFZX3G8 started";
        let id = extract_ulid(line);
        assert_eq!(id, Some("01HXKJ7NVQW3Y2YMZK5VFZX3G8".to_string()));
    }

    #[test]
    fn test_ulid_extraction_multiple() {
        let text = "01HXKJ7NVQW3Y2YMZK5VFZX3G8 COMPLETED\n01HXKJ8NVQW3Y2YMZK5VFZX3G9 FAILED";
        let result = CommandResult {
            stdout: text.to_string(),
            stderr: String::new(),
            exit_code: 0,
            duration: Duration::from_millis(10),
        };

        let ids = result.parse_run_ids();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], "01HXKJ7NVQW3Y2YMZK5VFZX3G8");
        assert_eq!(ids[1], "01HXKJ8NVQW3Y2YMZK5VFZX3G9");
    }
}
