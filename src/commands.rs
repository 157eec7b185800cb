//! Command handlers.
//!
//! Discovery errors and single-file load errors are returned to the caller.
//! Failures while encrypting or decrypting are logged per file and never
//! returned, so one bad file does not stop the others.

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::cli::Commands;
use crate::error::Result;
use crate::file::SecretFile;
use crate::scan::identify_secret_files;
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Encrypt,
    Decrypt,
}

impl Operation {
    fn verb(self) -> &'static str {
        match self {
            Operation::Encrypt => "encrypt",
            Operation::Decrypt => "decrypt",
        }
    }

    /// Whether `file` is already in the state this operation produces.
    fn is_done(self, file: &SecretFile) -> bool {
        match self {
            Operation::Encrypt => file.encrypted,
            Operation::Decrypt => !file.encrypted,
        }
    }

    fn apply(self, file: &mut SecretFile) -> Result<()> {
        match self {
            Operation::Encrypt => file.encrypt(),
            Operation::Decrypt => file.decrypt(),
        }
    }
}

/// Outcome counts of a batch run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub changed: usize,
    pub unchanged: usize,
    pub failed: usize,
}

pub fn run(command: &Commands, settings: &Settings) -> Result<()> {
    match command {
        Commands::ListSecrets => {
            for path in list_secrets(settings)? {
                println!("{}", path.display());
            }
        }
        Commands::EncryptAll => {
            process_all(settings, Operation::Encrypt)?;
        }
        Commands::DecryptAll => {
            process_all(settings, Operation::Decrypt)?;
        }
        Commands::Encrypt { secret_file } => process_one(secret_file, Operation::Encrypt)?,
        Commands::Decrypt { secret_file } => process_one(secret_file, Operation::Decrypt)?,
    }
    Ok(())
}

pub fn list_secrets(settings: &Settings) -> Result<Vec<PathBuf>> {
    let files = identify_secret_files(&settings.base_dir, &settings.secret_regexp)?;
    info!("Found {} secret files", files.len());
    Ok(files)
}

/// Encrypt or decrypt every secret file under the base directory.
pub fn process_all(settings: &Settings, operation: Operation) -> Result<BatchReport> {
    let files = list_secrets(settings)?;
    process_batch(&files, operation, settings.fail_fast, SecretFile::load)
}

/// Encrypt or decrypt a single file. Load errors are returned; mutation
/// errors are logged.
pub fn process_one(path: &Path, operation: Operation) -> Result<()> {
    process_single(path, operation, SecretFile::load)
}

fn process_single<F>(path: &Path, operation: Operation, load: F) -> Result<()>
where
    F: Fn(&Path) -> Result<SecretFile>,
{
    let mut file = load(path)?;
    if operation.is_done(&file) {
        info!(
            "{} is already {}ed, skipping...",
            path.display(),
            operation.verb()
        );
        return Ok(());
    }
    if let Err(e) = operation.apply(&mut file) {
        error!("failed to {} file {}: {}", operation.verb(), path.display(), e);
    }
    Ok(())
}

fn process_batch<F>(
    files: &[PathBuf],
    operation: Operation,
    fail_fast: bool,
    load: F,
) -> Result<BatchReport>
where
    F: Fn(&Path) -> Result<SecretFile>,
{
    let mut report = BatchReport::default();

    for path in files {
        let mut file = match load(path) {
            Ok(file) => file,
            Err(e) if fail_fast => return Err(e),
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                report.failed += 1;
                continue;
            }
        };

        if operation.is_done(&file) {
            report.unchanged += 1;
            continue;
        }
        match operation.apply(&mut file) {
            Ok(()) => report.changed += 1,
            Err(e) => {
                error!("failed to {} file {}: {}", operation.verb(), path.display(), e);
                report.failed += 1;
            }
        }
    }

    info!(
        "{}: {} changed, {} unchanged, {} failed",
        operation.verb(),
        report.changed,
        report.unchanged,
        report.failed
    );
    Ok(report)
}
