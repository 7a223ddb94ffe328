#![allow(deprecated)]

use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    pub fn write_stack_kdl(&self, content: &str) {
        fs::write(self.stack_file(), content).unwrap();
    }

    #[allow(dead_code)]
    pub fn write_settings(&self, content: &str) {
        fs::write(self.root.path().join("stackflow.yaml"), content).unwrap();
    }

    pub fn stack_file(&self) -> PathBuf {
        self.root.path().join("stack.kdl")
    }

    #[allow(dead_code)]
    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    #[allow(dead_code)]
    pub fn state_file(&self, stack: &str) -> PathBuf {
        self.root
            .path()
            .join(".stackflow")
            .join(stack)
            .join("state.json")
    }

    /// `stackflow --file <stack.kdl>` isolated from the caller's environment
    pub fn stackflow(&self) -> Command {
        let mut cmd = Command::cargo_bin("stackflow").unwrap();
        cmd.current_dir(self.root.path())
            .env_remove("STACKFLOW_FILE")
            .env_remove("STACKFLOW_STAGE")
            .env_remove("STACKFLOW_STATE_DIR")
            .env_remove("STACKFLOW_CONCURRENCY")
            .env_remove("STACKFLOW_MAX_ATTEMPTS")
            .env_remove("RUST_LOG")
            .arg("--file")
            .arg(self.stack_file());
        cmd
    }
}
