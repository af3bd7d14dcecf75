//! Detached signatures and their verification
//!
//! The ledger never looks inside a signature blob. It hands the blob, the
//! stored artifact bytes and the credential thumbprint to a
//! [`SignatureVerifier`] and trusts the verdict.

use async_trait::async_trait;
use dashmap::DashMap;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Credential fingerprint, normalized to uppercase hex without separators
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Thumbprint(String);

impl Thumbprint {
    #[must_use]
    pub fn new(raw: &str) -> Self {
        Self(
            raw.chars()
                .filter(|c| !c.is_whitespace() && *c != ':')
                .collect::<String>()
                .to_ascii_uppercase(),
        )
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Thumbprint of an ed25519 public key: its full SHA-256, upper hex
    #[must_use]
    pub fn of_key(key: &VerifyingKey) -> Self {
        Self(hex::encode_upper(Sha256::digest(key.as_bytes())))
    }
}

impl From<String> for Thumbprint {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl From<Thumbprint> for String {
    fn from(value: Thumbprint) -> Self {
        value.0
    }
}

impl fmt::Display for Thumbprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque detached signature bytes; base64 on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignatureBlob(#[serde(with = "base64_bytes")] Vec<u8>);

impl SignatureBlob {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        // agents emit line-wrapped base64
        let compact: String = encoded.split_whitespace().collect();
        STANDARD.decode(compact).map_err(serde::de::Error::custom)
    }
}

/// Accepted signer identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSigner {
    pub thumbprint: Thumbprint,
    pub common_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("unknown credential {0}")]
    UnknownCredential(Thumbprint),

    #[error("malformed signature: {0}")]
    Malformed(String),

    #[error("signature does not match content")]
    Mismatch,
}

/// Checks a detached signature over exact content bytes
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    async fn verify(
        &self,
        content: &[u8],
        signature: &SignatureBlob,
        thumbprint: &Thumbprint,
    ) -> Result<VerifiedSigner, VerifyError>;
}

/// Verifies ed25519 signatures from a set of trusted public keys
#[derive(Debug, Default)]
pub struct Ed25519Verifier {
    trusted: DashMap<Thumbprint, (VerifyingKey, Option<String>)>,
}

impl Ed25519Verifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust a key; returns its thumbprint
    pub fn trust(&self, key: VerifyingKey, common_name: Option<String>) -> Thumbprint {
        let thumbprint = Thumbprint::of_key(&key);
        self.trusted.insert(thumbprint.clone(), (key, common_name));
        thumbprint
    }

    /// Trust a hex-encoded 32-byte public key
    ///
    /// # Errors
    /// `Malformed` for bad hex or an invalid curve point.
    pub fn trust_hex(
        &self,
        public_key_hex: &str,
        common_name: Option<String>,
    ) -> Result<Thumbprint, VerifyError> {
        let raw = hex::decode(public_key_hex.trim())
            .map_err(|e| VerifyError::Malformed(e.to_string()))?;
        let bytes: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| VerifyError::Malformed(format!("expected 32 bytes, got {}", raw.len())))?;
        let key =
            VerifyingKey::from_bytes(&bytes).map_err(|e| VerifyError::Malformed(e.to_string()))?;
        Ok(self.trust(key, common_name))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.trusted.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trusted.is_empty()
    }
}

#[async_trait]
impl SignatureVerifier for Ed25519Verifier {
    async fn verify(
        &self,
        content: &[u8],
        signature: &SignatureBlob,
        thumbprint: &Thumbprint,
    ) -> Result<VerifiedSigner, VerifyError> {
        let (key, common_name) = self
            .trusted
            .get(thumbprint)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| VerifyError::UnknownCredential(thumbprint.clone()))?;

        let signature = Signature::from_slice(signature.as_bytes())
            .map_err(|e| VerifyError::Malformed(e.to_string()))?;
        key.verify(content, &signature)
            .map_err(|_| VerifyError::Mismatch)?;

        Ok(VerifiedSigner {
            thumbprint: thumbprint.clone(),
            common_name,
        })
    }
}
