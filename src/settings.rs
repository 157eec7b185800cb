//! Run-wide settings, built once from the parsed command line and handed to
//! every command handler.

use std::path::PathBuf;

use crate::cli::Cli;
use crate::util::absolute_path;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Absolute directory scanned by the batch commands.
    pub base_dir: PathBuf,
    pub secret_regexp: String,
    /// Abort a batch on the first file that cannot be loaded instead of
    /// logging it and moving on.
    pub fail_fast: bool,
}

impl Settings {
    pub fn from_cli(cli: &Cli) -> std::io::Result<Self> {
        Ok(Self {
            base_dir: absolute_path(&cli.base_dir)?,
            secret_regexp: cli.secret_regexp.clone(),
            fail_fast: cli.fail_fast,
        })
    }
}
