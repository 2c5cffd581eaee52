//! CLI smoke tests: run the built binary against a throwaway database.
//! None of these commands reach the model server.

use std::process::{Command, Output};
use tempfile::TempDir;

struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_kindred"))
            .current_dir(self.dir.path())
            .arg("--config")
            .arg(self.dir.path().join("missing.toml"))
            .arg("--db")
            .arg(self.dir.path().join("kindred.db"))
            .arg("--log-dir")
            .arg(self.dir.path().join("logs"))
            .args(args)
            .env_remove("RUST_LOG")
            .output()
            .expect("failed to run kindred")
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_help_lists_subcommands() {
    let output = Command::new(env!("CARGO_BIN_EXE_kindred")).arg("--help").output().unwrap();
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("Usage"));
    for cmd in ["chat", "status", "consolidate", "decay", "patterns", "memories"] {
        assert!(text.contains(cmd), "missing {} in --help", cmd);
    }
}

#[test]
fn test_version_flag() {
    let output = Command::new(env!("CARGO_BIN_EXE_kindred")).arg("--version").output().unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("kindred"));
}

#[test]
fn test_status_json_on_fresh_database() {
    let sandbox = Sandbox::new();
    let output = sandbox.run(&["status", "--json"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let status: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(status["relationship"]["level"], 1);
    assert_eq!(status["memory_count"], 0);
    assert!(status["current_session"].is_null());
    assert!(sandbox.dir.path().join("kindred.db").exists());
}

#[test]
fn test_status_text() {
    let sandbox = Sandbox::new();
    let output = sandbox.run(&["status"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("Level 1"));
    assert!(text.contains("No open session"));
}

#[test]
fn test_consolidate_empty_day() {
    let sandbox = Sandbox::new();
    let output = sandbox.run(&["consolidate", "--date", "2024-01-01"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("nothing to consolidate"));
}

#[test]
fn test_consolidate_rejects_bad_date() {
    let sandbox = Sandbox::new();
    let output = sandbox.run(&["consolidate", "--date", "yesterday-ish"]);
    assert!(!output.status.success());
}

#[test]
fn test_decay_force_then_gated() {
    let sandbox = Sandbox::new();
    let output = sandbox.run(&["decay", "--force"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Decay ran: 0 memories faded, 0 pruned."));

    let output = sandbox.run(&["decay"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Decay skipped"));
}

#[test]
fn test_listings_on_empty_database() {
    let sandbox = Sandbox::new();
    assert!(stdout(&sandbox.run(&["memories"])).contains("No memories."));
    let queried = sandbox.run(&["memories", "--query", "garden plans"]);
    assert!(stdout(&queried).contains("No memories."));
    assert!(stdout(&sandbox.run(&["patterns"])).contains("No patterns yet."));
}

#[test]
fn test_log_file_is_written() {
    let sandbox = Sandbox::new();
    assert!(sandbox.run(&["status"]).status.success());
    let logs: Vec<_> = std::fs::read_dir(sandbox.dir.path().join("logs")).unwrap().collect();
    assert!(!logs.is_empty());
}
