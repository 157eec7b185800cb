//! SOPS-style encrypted documents.
//!
//! ## Architecture
//!
//! ```text
//!  file bytes ──Store──▶ Tree { branches, metadata }
//!                          │
//!            generate_data_key (keys + shamir)
//!                          │
//!         encrypt_tree / decrypt_tree (cipher, MAC)
//!                          │
//!  file bytes ◀──Store── Tree
//! ```
//!
//! Values are encrypted one by one with a per-file data key; the data key is
//! wrapped for every age recipient listed in the file's key groups.

pub mod cipher;
pub mod keys;
pub mod shamir;
pub mod stores;
pub mod tree;

pub use cipher::Cipher;
pub use keys::{KeyGroup, KeyService, LocalKeyService, MasterKey};
pub use stores::{store_for_path, Store, StoreError};
pub use tree::{DataKeyError, DataKeyErrors, Metadata, Tree, TreeError};

use serde_yaml::Value;

/// Version string written into the metadata of every file this tool encrypts.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Encrypt every selected value of `tree` and seal the MAC into its metadata.
pub fn encrypt_tree(tree: &mut Tree, data_key: &[u8], cipher: &Cipher) -> Result<(), TreeError> {
    let mac = tree.encrypt(data_key, cipher)?;
    tree.metadata.last_modified = tree::now();
    tree.metadata.message_authentication_code = cipher
        .encrypt(
            &Value::String(mac),
            data_key,
            &tree.metadata.last_modified_string(),
        )
        .map_err(TreeError::Mac)?;
    Ok(())
}

/// Recover the data key, decrypt `tree` in place and verify its MAC.
pub fn decrypt_tree(
    tree: &mut Tree,
    key_service: &dyn KeyService,
    cipher: &Cipher,
) -> Result<(), TreeError> {
    let data_key = tree.metadata.get_data_key(key_service)?;
    let computed_mac = tree.decrypt(&data_key, cipher)?;

    if tree.metadata.message_authentication_code.is_empty() {
        return Err(TreeError::MissingMac);
    }
    let stored_mac = cipher
        .decrypt(
            &tree.metadata.message_authentication_code,
            &data_key,
            &tree.metadata.last_modified_string(),
        )
        .map_err(TreeError::Mac)?;

    if stored_mac.as_str() != Some(computed_mac.as_str()) {
        return Err(TreeError::MacMismatch);
    }
    Ok(())
}
