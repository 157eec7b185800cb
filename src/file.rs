//! One secret file on disk: its resolved policy, parsed tree and whether it is
//! currently encrypted.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::{self, Config};
use crate::error::{Error, Result};
use crate::sops::{
    self, store_for_path, Cipher, KeyService, LocalKeyService, Metadata, Store, StoreError, Tree,
};
use crate::util::absolute_path;

/// In-memory state of a single secret file, created by [`SecretFile::load`].
pub struct SecretFile {
    /// Whether the file is encrypted. Updated after a successful
    /// [`encrypt`](Self::encrypt) or [`decrypt`](Self::decrypt).
    pub encrypted: bool,
    path: PathBuf,
    config: Config,
    store: Box<dyn Store>,
    tree: Tree,
    cipher: Cipher,
    key_service: Box<dyn KeyService>,
}

impl SecretFile {
    /// Load `path` using age identities from the environment.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_key_service(path, Box::new(LocalKeyService::from_env()))
    }

    /// Load `path`, resolved to a clean absolute path first, unwrapping data
    /// keys with `key_service`.
    pub fn load_with_key_service(path: &Path, key_service: Box<dyn KeyService>) -> Result<Self> {
        let path = absolute_path(path).map_err(Error::CurrentDir)?;
        let path = path.as_path();
        let config_path = config::find_config_file(path)
            .map_err(|_| Error::ConfigNotFound(path.to_path_buf()))?;
        let config = config::load_creation_rule_for_file(&config_path, path).map_err(|source| {
            Error::ConfigLoad {
                path: path.to_path_buf(),
                source,
            }
        })?;

        let bytes = std::fs::read(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let store = store_for_path(path);
        let load_err = |source| Error::Load {
            path: path.to_path_buf(),
            source,
        };
        let (mut tree, encrypted) = match store.load_encrypted_file(&bytes) {
            Ok(tree) if !tree.metadata.version.is_empty() => (tree, true),
            Ok(_) => {
                return Err(load_err(StoreError::InvalidMetadata(
                    "missing version".to_string(),
                )))
            }
            Err(StoreError::MetadataNotFound) => {
                let branches = store.load_plain_file(&bytes).map_err(load_err)?;
                (Tree::new(branches, metadata_for(&config), path), false)
            }
            Err(source) => return Err(load_err(source)),
        };
        tree.file_path = path.to_path_buf();

        debug!(
            "Loaded {} as {} ({})",
            path.display(),
            store.name(),
            if encrypted { "encrypted" } else { "plaintext" }
        );

        Ok(Self {
            encrypted,
            path: path.to_path_buf(),
            config,
            store,
            tree,
            cipher: Cipher::new(),
            key_service,
        })
    }

    /// Policy resolved from the nearest `.sops.yaml`.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Encrypt the file in place. Does nothing if it is already encrypted.
    pub fn encrypt(&mut self) -> Result<()> {
        if self.encrypted {
            debug!("{} is already encrypted", self.path.display());
            return Ok(());
        }
        info!("Encrypting file: {}", self.path.display());

        let data_key = self
            .tree
            .metadata
            .generate_data_key(self.key_service.as_ref())
            .map_err(|source| Error::DataKey {
                path: self.path.clone(),
                source,
            })?;
        sops::encrypt_tree(&mut self.tree, &data_key, &self.cipher).map_err(|source| {
            Error::Encryption {
                path: self.path.clone(),
                source,
            }
        })?;

        let bytes = self
            .store
            .emit_encrypted_file(&self.tree)
            .map_err(|source| Error::Serialization {
                path: self.path.clone(),
                source,
            })?;
        self.write(&bytes)?;
        self.encrypted = true;
        Ok(())
    }

    /// Decrypt the file in place. Does nothing if it is not encrypted.
    pub fn decrypt(&mut self) -> Result<()> {
        if !self.encrypted {
            debug!("{} is not encrypted", self.path.display());
            return Ok(());
        }
        info!("Decrypting file: {}", self.path.display());

        sops::decrypt_tree(&mut self.tree, self.key_service.as_ref(), &self.cipher).map_err(
            |source| Error::Decryption {
                path: self.path.clone(),
                source,
            },
        )?;

        let bytes = self
            .store
            .emit_plain_file(&self.tree.branches)
            .map_err(|source| Error::Serialization {
                path: self.path.clone(),
                source,
            })?;
        self.write(&bytes)?;
        self.encrypted = false;
        Ok(())
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        let write_err = |source| Error::Write {
            path: self.tree.file_path.clone(),
            source,
        };
        let mut file = File::create(&self.tree.file_path).map_err(write_err)?;
        file.write_all(bytes).map_err(write_err)?;
        file.flush().map_err(write_err)
    }
}

/// Fresh metadata for a plaintext file, taken from its creation rule.
fn metadata_for(config: &Config) -> Metadata {
    Metadata {
        key_groups: config.key_groups.clone(),
        shamir_threshold: config.shamir_threshold,
        last_modified: sops::tree::now(),
        message_authentication_code: String::new(),
        unencrypted_suffix: config.unencrypted_suffix.clone(),
        encrypted_suffix: config.encrypted_suffix.clone(),
        unencrypted_regex: config.unencrypted_regex.clone(),
        encrypted_regex: config.encrypted_regex.clone(),
        mac_only_encrypted: config.mac_only_encrypted,
        version: sops::VERSION.to_string(),
    }
}
