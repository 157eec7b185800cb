//! # sops-secret-scanner
//!
//! Scans a directory tree for secret files and encrypts or decrypts each one
//! according to the nearest `.sops.yaml`.
//!
//! ## Flow
//!
//! ```text
//!   cli ──▶ commands ──▶ scan::identify_secret_files
//!                 │
//!                 └──▶ file::SecretFile::load ──▶ config (.sops.yaml)
//!                            │                 └─▶ sops::stores
//!                            ▼
//!                  encrypt() / decrypt() ──▶ sops engine ──▶ write back
//! ```
//!
//! ## Modules
//! - `scan`: regex-based discovery of secret files
//! - `config`: `.sops.yaml` lookup and creation rules
//! - `file`: load/encrypt/decrypt of a single file
//! - `sops`: document stores, value cipher, key groups and MAC
//! - `commands`: list/encrypt/decrypt handlers used by the binary

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod file;
pub mod scan;
pub mod settings;
pub mod sops;
pub mod util;

pub use config::Config;
pub use error::{Error, Result};
pub use file::SecretFile;
pub use settings::Settings;
