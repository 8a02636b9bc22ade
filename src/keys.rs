//! Source log keys and signature verification.
//!
//! The hub only accepts heads from source logs it knows. Each known log is a
//! [`SourceLogKey`] in the [`KeyRegistry`], which is loaded once at startup and
//! shared read-only by every request.

use p256::ecdsa::signature::Verifier;
use p256::pkcs8::DecodePublicKey;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::path::Path;

/// Digest applied to the message before the signature check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// No separate digest. Ed25519 signs the message itself
    #[default]
    None,
    /// The signature covers the SHA-256 digest of the message
    Sha256,
}

/// Error type for signature verification
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// The signature does not validate under the key
    #[error("invalid signature")]
    InvalidSignature,
    /// The key type cannot be used with the configured digest
    #[error("{algorithm} keys cannot verify with hash {hash:?}")]
    UnsupportedHash {
        algorithm: &'static str,
        hash: HashAlgorithm,
    },
}

/// Error type for key registry loading
#[derive(Debug, thiserror::Error)]
pub enum KeyRegistryError {
    #[error("failed to read key registry {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse key registry: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unusable public key for {url}: {reason}")]
    BadKey { url: String, reason: String },
    #[error("duplicate source log {0}")]
    Duplicate(String),
}

/// A parsed source log verification key.
#[derive(Debug, Clone)]
pub enum PublicKey {
    Ed25519(ed25519_dalek::VerifyingKey),
    /// ECDSA over NIST P-256 with ASN.1 DER signatures
    EcdsaP256(p256::ecdsa::VerifyingKey),
    /// RSA with PKCS#1 v1.5 signatures
    Rsa(rsa::RsaPublicKey),
}

impl PublicKey {
    /// Parses raw 32-byte Ed25519 keys, or DER `SubjectPublicKeyInfo` holding
    /// an Ed25519, P-256 or RSA key.
    ///
    /// # Errors
    ///
    /// Returns a description of the failure if no key type matches.
    pub fn from_bytes(data: &[u8]) -> Result<Self, String> {
        if let Ok(raw) = <&[u8; ed25519_dalek::PUBLIC_KEY_LENGTH]>::try_from(data) {
            return ed25519_dalek::VerifyingKey::from_bytes(raw)
                .map(Self::Ed25519)
                .map_err(|e| e.to_string());
        }
        if let Ok(key) = ed25519_dalek::VerifyingKey::from_public_key_der(data) {
            return Ok(Self::Ed25519(key));
        }
        if let Ok(key) = p256::ecdsa::VerifyingKey::from_public_key_der(data) {
            return Ok(Self::EcdsaP256(key));
        }
        rsa::RsaPublicKey::from_public_key_der(data)
            .map(Self::Rsa)
            .map_err(|e| format!("not an Ed25519, P-256 or RSA public key: {e}"))
    }

    #[must_use]
    pub const fn algorithm(&self) -> &'static str {
        match self {
            Self::Ed25519(_) => "Ed25519",
            Self::EcdsaP256(_) => "ECDSA P-256",
            Self::Rsa(_) => "RSA",
        }
    }

    /// Digest used when the registry entry does not name one
    #[must_use]
    pub const fn default_hash(&self) -> HashAlgorithm {
        match self {
            Self::Ed25519(_) => HashAlgorithm::None,
            Self::EcdsaP256(_) | Self::Rsa(_) => HashAlgorithm::Sha256,
        }
    }

    /// Checks that this key type can verify under `hash`.
    ///
    /// # Errors
    ///
    /// Returns `SignatureError::UnsupportedHash` for ECDSA or RSA without a
    /// digest.
    pub fn check_hash(&self, hash: HashAlgorithm) -> Result<(), SignatureError> {
        match (self, hash) {
            (Self::EcdsaP256(_) | Self::Rsa(_), HashAlgorithm::None) => {
                Err(SignatureError::UnsupportedHash {
                    algorithm: self.algorithm(),
                    hash,
                })
            }
            _ => Ok(()),
        }
    }

    /// Verifies `signature` over `message`.
    ///
    /// Ed25519 always signs the message itself and ignores `hash`. ECDSA and
    /// RSA sign its digest under `hash`.
    ///
    /// # Errors
    ///
    /// Returns `SignatureError::InvalidSignature` if the signature is malformed
    /// or does not validate, and `SignatureError::UnsupportedHash` if the key
    /// type needs a digest and `hash` is `None`.
    pub fn verify(
        &self,
        hash: HashAlgorithm,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), SignatureError> {
        self.check_hash(hash)?;
        let valid = match self {
            Self::Ed25519(key) => ed25519_dalek::Signature::from_slice(signature)
                .is_ok_and(|signature| key.verify_strict(message, &signature).is_ok()),
            Self::EcdsaP256(key) => p256::ecdsa::Signature::from_der(signature)
                .is_ok_and(|signature| key.verify(message, &signature).is_ok()),
            Self::Rsa(key) => rsa::pkcs1v15::Signature::try_from(signature).is_ok_and(|signature| {
                rsa::pkcs1v15::VerifyingKey::<Sha256>::new(key.clone())
                    .verify(message, &signature)
                    .is_ok()
            }),
        };
        if valid {
            Ok(())
        } else {
            Err(SignatureError::InvalidSignature)
        }
    }
}

/// A known source log and the key its heads are signed with.
#[derive(Debug, Clone)]
pub struct SourceLogKey {
    /// URL identifying the source log
    pub url: String,
    /// Public key bytes as configured (DER or raw)
    pub pub_key_data: Vec<u8>,
    /// Parsed verification key
    pub pub_key: PublicKey,
    /// Digest applied before verification
    pub hash: HashAlgorithm,
}

impl SourceLogKey {
    /// Parses a key and pairs it with the digest its signatures use.
    ///
    /// # Errors
    ///
    /// Returns `KeyRegistryError::BadKey` if the bytes are not a usable key or
    /// the key type cannot verify under `hash`.
    pub fn new(
        url: impl Into<String>,
        pub_key_data: Vec<u8>,
        hash: HashAlgorithm,
    ) -> Result<Self, KeyRegistryError> {
        Self::parse(url.into(), pub_key_data, Some(hash))
    }

    /// Like [`SourceLogKey::new`], falling back to the key type's usual digest
    /// when `hash` is `None`.
    ///
    /// # Errors
    ///
    /// Returns `KeyRegistryError::BadKey` as [`SourceLogKey::new`] does.
    pub fn parse(
        url: String,
        pub_key_data: Vec<u8>,
        hash: Option<HashAlgorithm>,
    ) -> Result<Self, KeyRegistryError> {
        let bad_key = |reason: String| KeyRegistryError::BadKey {
            url: url.clone(),
            reason,
        };
        let pub_key = PublicKey::from_bytes(&pub_key_data).map_err(bad_key)?;
        let hash = hash.unwrap_or_else(|| pub_key.default_hash());
        pub_key
            .check_hash(hash)
            .map_err(|e| bad_key(e.to_string()))?;
        Ok(Self {
            url,
            pub_key_data,
            pub_key,
            hash,
        })
    }

    /// Checks `signature` over `message` with this key.
    ///
    /// # Errors
    ///
    /// Returns `SignatureError::InvalidSignature` if the check fails.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), SignatureError> {
        self.pub_key.verify(self.hash, message, signature)
    }
}

/// One entry of the on-disk registry file.
#[derive(Debug, Serialize, Deserialize)]
pub struct KeyRegistryEntry {
    pub url: String,
    #[serde(with = "crate::service::responses::bytes_format")]
    pub pub_key: Vec<u8>,
    /// Defaults per key type: none for Ed25519, sha256 otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<HashAlgorithm>,
}

/// Immutable map from source log URL to its key.
#[derive(Debug, Clone, Default)]
pub struct KeyRegistry {
    keys: HashMap<String, SourceLogKey>,
}

impl KeyRegistry {
    /// Builds a registry from parsed keys.
    ///
    /// # Errors
    ///
    /// Returns `KeyRegistryError::Duplicate` if two keys share a URL.
    pub fn new(keys: impl IntoIterator<Item = SourceLogKey>) -> Result<Self, KeyRegistryError> {
        let mut map = HashMap::new();
        for key in keys {
            if map.contains_key(&key.url) {
                return Err(KeyRegistryError::Duplicate(key.url));
            }
            map.insert(key.url.clone(), key);
        }
        Ok(Self { keys: map })
    }

    /// Parses a JSON array of [`KeyRegistryEntry`].
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid, a key does not parse, or a URL
    /// appears twice.
    pub fn from_json(json: &str) -> Result<Self, KeyRegistryError> {
        let entries: Vec<KeyRegistryEntry> = serde_json::from_str(json)?;
        let keys = entries
            .into_iter()
            .map(|e| SourceLogKey::parse(e.url, e.pub_key, e.hash))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(keys)
    }

    /// Loads the registry file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, KeyRegistryError> {
        let json = std::fs::read_to_string(path).map_err(|source| KeyRegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Looks up the key for a source log URL
    #[must_use]
    pub fn get(&self, url: &str) -> Option<&SourceLogKey> {
        self.keys.get(url)
    }

    /// Iterates over all keys in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &SourceLogKey> {
        self.keys.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
