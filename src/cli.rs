use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub const DEFAULT_SECRET_REGEXP: &str = r"^.+/secrets?/.+$";

#[derive(Parser, Debug)]
#[command(
    name = "sops-secret-scanner",
    version,
    about = "Scan a directory for secret files and encrypt/decrypt them based on the closest .sops.yaml"
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "SOPS_SCANNER_SECRET_REGEXP",
        default_value = DEFAULT_SECRET_REGEXP,
        help = "Regular expression to match secret files"
    )]
    pub secret_regexp: String,
    #[arg(
        long,
        global = true,
        env = "SOPS_SCANNER_BASE_DIR",
        default_value = ".",
        help = "Base directory to scan for secret files"
    )]
    pub base_dir: PathBuf,
    #[arg(
        long,
        global = true,
        env = "SOPS_SCANNER_FAIL_FAST",
        default_value_t = false,
        help = "Abort encrypt-all/decrypt-all when a file cannot be loaded"
    )]
    pub fail_fast: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List all files which match the secret-regexp
    ListSecrets,
    /// Encrypt all files in the base directory
    EncryptAll,
    /// Decrypt all files in the base directory
    DecryptAll,
    /// Encrypt a single file
    Encrypt {
        #[arg(long, short = 'f', help = "Path to the secret file")]
        secret_file: PathBuf,
    },
    /// Decrypt a single file
    Decrypt {
        #[arg(long, short = 'f', help = "Path to the secret file")]
        secret_file: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_apply() {
        let cli = Cli::try_parse_from(["sops-secret-scanner", "list-secrets"]).unwrap();
        assert_eq!(cli.secret_regexp, DEFAULT_SECRET_REGEXP);
        assert_eq!(cli.base_dir, PathBuf::from("."));
        assert!(matches!(cli.command, Commands::ListSecrets));
    }

    #[test]
    fn single_file_commands_require_secret_file() {
        assert!(Cli::try_parse_from(["sops-secret-scanner", "encrypt"]).is_err());

        let cli =
            Cli::try_parse_from(["sops-secret-scanner", "decrypt", "-f", "secrets/db.yaml"]).unwrap();
        match cli.command {
            Commands::Decrypt { secret_file } => {
                assert_eq!(secret_file, PathBuf::from("secrets/db.yaml"))
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from([
            "sops-secret-scanner",
            "encrypt-all",
            "--base-dir",
            "/srv/app",
            "--fail-fast",
        ])
        .unwrap();
        assert_eq!(cli.base_dir, PathBuf::from("/srv/app"));
        assert!(cli.fail_fast);
    }
}
