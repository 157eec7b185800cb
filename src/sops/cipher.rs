//! AES-256-GCM encryption of individual tree values.
//!
//! Encrypted values are stored inline as
//! `ENC[AES256_GCM,data:BASE64,iv:BASE64,tag:BASE64,type:TYPE]` so the
//! original scalar type survives a round trip. The additional authenticated
//! data binds each value to its position in the document.

use std::sync::OnceLock;

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use regex::Regex;
use serde_yaml::{Number, Value};
use thiserror::Error;

/// Key length in bytes (256 bits for AES-256)
pub const KEY_LENGTH: usize = 32;

/// Nonce length in bytes (96 bits for AES-GCM)
const NONCE_LENGTH: usize = 12;

const TAG_LENGTH: usize = 16;

const ENCRYPTED_PREFIX: &str = "ENC[AES256_GCM,";

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("data key must be {KEY_LENGTH} bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("cannot encrypt a value of this type: {0}")]
    UnsupportedType(String),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("value is not in the ENC[AES256_GCM,...] format")]
    MalformedValue,
    #[error("failed to decode {field}: {source}")]
    Base64 {
        field: &'static str,
        source: base64::DecodeError,
    },
    #[error("decryption failed: invalid key or corrupted data")]
    DecryptionFailed,
    #[error("decrypted value is not valid UTF-8")]
    InvalidUtf8,
    #[error("cannot parse decrypted {kind} value {value:?}")]
    InvalidTypedValue { kind: String, value: String },
}

fn encrypted_value_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^ENC\[AES256_GCM,data:(.*),iv:(.*),tag:(.*),type:(.*)\]$")
            .expect("static regex is valid")
    })
}

/// Check whether a string already holds an encrypted value.
pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENCRYPTED_PREFIX)
}

/// Stateless AES-256-GCM cipher for tree values.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cipher;

impl Cipher {
    pub fn new() -> Self {
        Self
    }

    /// Encrypt a scalar value, recording its type alongside the ciphertext.
    pub fn encrypt(
        &self,
        value: &Value,
        key: &[u8],
        additional_data: &str,
    ) -> Result<String, CipherError> {
        let (plaintext, kind) = match value {
            Value::String(s) => (s.clone(), "str"),
            Value::Bool(b) => (b.to_string(), "bool"),
            Value::Number(n) if n.is_i64() || n.is_u64() => (n.to_string(), "int"),
            Value::Number(n) => (n.to_string(), "float"),
            other => return Err(CipherError::UnsupportedType(format!("{:?}", other))),
        };

        let cipher = aes_cipher(key)?;
        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let mut sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: additional_data.as_bytes(),
                },
            )
            .map_err(|e| CipherError::EncryptionFailed(e.to_string()))?;

        // aes-gcm appends the tag to the ciphertext
        let tag = sealed.split_off(sealed.len() - TAG_LENGTH);

        Ok(format!(
            "ENC[AES256_GCM,data:{},iv:{},tag:{},type:{}]",
            BASE64.encode(&sealed),
            BASE64.encode(nonce_bytes),
            BASE64.encode(tag),
            kind
        ))
    }

    /// Decrypt a value produced by [`Cipher::encrypt`], restoring its type.
    pub fn decrypt(
        &self,
        ciphertext: &str,
        key: &[u8],
        additional_data: &str,
    ) -> Result<Value, CipherError> {
        let caps = encrypted_value_regex()
            .captures(ciphertext)
            .ok_or(CipherError::MalformedValue)?;

        let decode = |field: &'static str, idx: usize| {
            BASE64
                .decode(&caps[idx])
                .map_err(|source| CipherError::Base64 { field, source })
        };
        let data = decode("data", 1)?;
        let iv = decode("iv", 2)?;
        let tag = decode("tag", 3)?;
        let kind = &caps[4];

        if iv.len() != NONCE_LENGTH || tag.len() != TAG_LENGTH {
            return Err(CipherError::MalformedValue);
        }

        let mut combined = Vec::with_capacity(data.len() + tag.len());
        combined.extend_from_slice(&data);
        combined.extend_from_slice(&tag);

        let plaintext = aes_cipher(key)?
            .decrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &combined,
                    aad: additional_data.as_bytes(),
                },
            )
            .map_err(|_| CipherError::DecryptionFailed)?;
        let plaintext = String::from_utf8(plaintext).map_err(|_| CipherError::InvalidUtf8)?;

        typed_value(kind, plaintext)
    }
}

fn aes_cipher(key: &[u8]) -> Result<Aes256Gcm, CipherError> {
    if key.len() != KEY_LENGTH {
        return Err(CipherError::InvalidKeyLength(key.len()));
    }
    Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength(key.len()))
}

fn typed_value(kind: &str, plaintext: String) -> Result<Value, CipherError> {
    let invalid = |plaintext: String| CipherError::InvalidTypedValue {
        kind: kind.to_string(),
        value: plaintext,
    };

    match kind {
        "str" => Ok(Value::String(plaintext)),
        "bool" => match plaintext.as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(invalid(plaintext)),
        },
        "int" => {
            if let Ok(n) = plaintext.parse::<i64>() {
                Ok(Value::Number(Number::from(n)))
            } else if let Ok(n) = plaintext.parse::<u64>() {
                Ok(Value::Number(Number::from(n)))
            } else {
                Err(invalid(plaintext))
            }
        }
        "float" => {
            let parsed = match plaintext.as_str() {
                ".inf" => Some(f64::INFINITY),
                "-.inf" => Some(f64::NEG_INFINITY),
                ".nan" => Some(f64::NAN),
                other => other.parse::<f64>().ok(),
            };
            match parsed {
                Some(f) => Ok(Value::Number(Number::from(f))),
                None => Err(invalid(plaintext)),
            }
        }
        _ => Err(invalid(plaintext)),
    }
}
