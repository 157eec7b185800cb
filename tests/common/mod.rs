#![allow(dead_code)]

use age::secrecy::ExposeSecret;
use age::x25519;
use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// An isolated directory tree with a root `.sops.yaml` for one age identity.
pub struct TestEnv {
    _tmp: TempDir,
    pub home: PathBuf,
    pub root: PathBuf,
    pub identity: x25519::Identity,
}

impl TestEnv {
    pub fn new() -> Self {
        let tmp = TempDir::new().expect("create temp dir");
        let home = tmp.path().join("home");
        fs::create_dir_all(&home).expect("create isolated home");
        let root = tmp.path().join("repo");
        fs::create_dir_all(&root).expect("create repo root");

        let identity = x25519::Identity::generate();
        let env = Self {
            _tmp: tmp,
            home,
            root,
            identity,
        };
        env.write_config(
            ".sops.yaml",
            &format!("creation_rules:\n  - age: {}\n", env.recipient()),
        );
        env
    }

    pub fn recipient(&self) -> String {
        self.identity.to_public().to_string()
    }

    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.root.join(relative);
        fs::create_dir_all(path.parent().expect("parent dir")).expect("create parent dir");
        fs::write(&path, content).expect("write fixture");
        path
    }

    pub fn write_config(&self, relative: &str, content: &str) -> PathBuf {
        self.write(relative, content)
    }

    pub fn read(&self, path: &Path) -> String {
        fs::read_to_string(path).expect("read file")
    }

    /// Binary invocation without any age identity available.
    pub fn cmd_without_key(&self) -> Command {
        let mut cmd = Command::cargo_bin("sops-secret-scanner").expect("binary built");
        cmd.current_dir(&self.root)
            .env("HOME", &self.home)
            .env("XDG_CONFIG_HOME", self.home.join(".config"))
            .env("RUST_LOG", "sops_secret_scanner=info")
            .env_remove("SOPS_AGE_KEY")
            .env_remove("SOPS_AGE_KEY_FILE")
            .env_remove("SOPS_SCANNER_BASE_DIR")
            .env_remove("SOPS_SCANNER_SECRET_REGEXP")
            .env_remove("SOPS_SCANNER_FAIL_FAST");
        cmd
    }

    pub fn cmd(&self) -> Command {
        let mut cmd = self.cmd_without_key();
        cmd.env("SOPS_AGE_KEY", self.identity.to_string().expose_secret());
        cmd
    }
}
