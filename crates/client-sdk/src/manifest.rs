//! The `.myst` recovery manifest: the one object a user must retain to
//! get a file back. Serialized as pretty-printed JSON; parsing
//! tolerates missing optional fields and rejects unknown major
//! versions.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::crypto::{IV_LEN, KEY_LEN, MASTER_SALT_LEN, TAG_LEN};
use crate::error::StorageError;

pub const MANIFEST_VERSION: &str = "3.0";
pub const MANIFEST_EXTENSION: &str = "myst";

/// Legacy manifests allocated 16 bytes for GCM nonces; only the first
/// 12 carry the nonce.
const LEGACY_IV_LEN: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub file_name: String,
    /// SHA-256 of the plaintext, hex.
    pub file_hash: String,
    pub original_size: u64,
    pub compressed: bool,
    pub reed_solomon: bool,
    #[serde(default)]
    pub reed_solomon_config: Option<ReedSolomonConfig>,
    /// Epoch milliseconds at upload time.
    pub timestamp: u64,
    pub security: Security,
    pub partitions: Vec<PartitionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReedSolomonConfig {
    pub data_shards: usize,
    pub parity_shards: usize,
    pub total_shards: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Security {
    pub double_encryption: bool,
    pub master_encryption: MasterEncryption,
    pub fragment_encryption: FragmentEncryptionSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterEncryption {
    pub algorithm: String,
    /// Base64 master key; null iff the manifest is password-bound.
    pub key: Option<String>,
    pub iv: String,
    pub tag: String,
    /// Base64 32-byte KDF salt; set iff the manifest is password-bound.
    #[serde(default)]
    pub salt: Option<String>,
    /// SHA-256 of the master ciphertext (the input to compression), hex.
    pub encrypted_hash: String,
    pub key_derivation: String,
    pub password_protected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentEncryptionSummary {
    pub algorithm: String,
    pub unique_keys_per_fragment: bool,
    pub total_unique_keys: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionRecord {
    pub index: usize,
    /// SHA-256 of the pre-encryption shard bytes, hex.
    pub original_checksum: String,
    pub size: u64,
    pub fragments: Vec<FragmentDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentDescriptor {
    pub fragment_id: String,
    pub redundancy_index: usize,
    pub node_id: String,
    pub node_address: String,
    /// SHA-256 of the fragment ciphertext, hex.
    pub checksum: String,
    pub encryption: FragmentKeys,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentKeys {
    /// Base64 raw key (pre-PBKDF2).
    pub key: String,
    pub iv: String,
    pub tag: String,
    pub salt: String,
    pub algorithm: String,
}

impl Manifest {
    pub fn parse(bytes: &[u8]) -> Result<Self, StorageError> {
        let manifest: Manifest = serde_json::from_slice(bytes)?;
        let major = manifest.version.split('.').next().unwrap_or_default();
        if major != "3" {
            return Err(StorageError::UnsupportedManifest {
                version: manifest.version,
            });
        }
        manifest.security.master_encryption.validate()?;
        Ok(manifest)
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, StorageError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn is_password_protected(&self) -> bool {
        self.security.master_encryption.password_protected
    }

    /// Number of data shards needed for reconstruction.
    pub fn data_shards(&self) -> usize {
        match &self.reed_solomon_config {
            Some(cfg) if self.reed_solomon => cfg.data_shards,
            _ => self.partitions.len(),
        }
    }

    pub fn parity_shards(&self) -> usize {
        match &self.reed_solomon_config {
            Some(cfg) if self.reed_solomon => cfg.parity_shards,
            _ => 0,
        }
    }

    pub fn total_fragments(&self) -> usize {
        self.partitions.iter().map(|p| p.fragments.len()).sum()
    }
}

impl MasterEncryption {
    /// Exactly one of the embedded key and the KDF salt is present, and
    /// the `password_protected` flag agrees with which one.
    pub fn validate(&self) -> Result<(), StorageError> {
        match (self.password_protected, &self.key, &self.salt) {
            (true, None, Some(_)) | (false, Some(_), None) => Ok(()),
            _ => Err(StorageError::malformed(
                "master_encryption",
                "exactly one of key and salt must be present",
            )),
        }
    }

    pub fn iv_bytes(&self) -> Result<[u8; IV_LEN], StorageError> {
        decode_iv(&self.iv)
    }

    pub fn tag_bytes(&self) -> Result<[u8; TAG_LEN], StorageError> {
        decode_b64_array(&self.tag, "master tag")
    }

    pub fn key_bytes(&self) -> Result<Option<[u8; KEY_LEN]>, StorageError> {
        self.key
            .as_deref()
            .map(|k| decode_b64_array(k, "master key"))
            .transpose()
    }

    pub fn salt_bytes(&self) -> Result<Option<[u8; MASTER_SALT_LEN]>, StorageError> {
        self.salt
            .as_deref()
            .map(|s| decode_b64_array(s, "master salt"))
            .transpose()
    }
}

pub fn encode_b64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn decode_b64(value: &str, field: &'static str) -> Result<Vec<u8>, StorageError> {
    BASE64
        .decode(value)
        .map_err(|e| StorageError::malformed(field, e.to_string()))
}

pub fn decode_b64_array<const N: usize>(
    value: &str,
    field: &'static str,
) -> Result<[u8; N], StorageError> {
    let bytes = decode_b64(value, field)?;
    bytes.try_into().map_err(|_| {
        StorageError::malformed(field, format!("expected {N} bytes"))
    })
}

/// Accepts both the 12-byte nonce and the legacy 16-byte field, using
/// the first 12 bytes either way.
pub fn decode_iv(value: &str) -> Result<[u8; IV_LEN], StorageError> {
    let bytes = decode_b64(value, "iv")?;
    if bytes.len() != IV_LEN && bytes.len() != LEGACY_IV_LEN {
        return Err(StorageError::malformed(
            "iv",
            format!("expected {IV_LEN} or {LEGACY_IV_LEN} bytes, got {}", bytes.len()),
        ));
    }
    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&bytes[..IV_LEN]);
    Ok(iv)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_manifest_json(version: &str) -> String {
        format!(
            r#"{{
  "version": "{version}",
  "file_name": "report.pdf",
  "file_hash": "aa{hash}",
  "original_size": 1024,
  "compressed": true,
  "reed_solomon": false,
  "timestamp": 1753000000000,
  "security": {{
    "double_encryption": true,
    "master_encryption": {{
      "algorithm": "AES-256-GCM",
      "key": "{key}",
      "iv": "{iv}",
      "tag": "{tag}",
      "encrypted_hash": "bb{hash}",
      "key_derivation": "RANDOM",
      "password_protected": false
    }},
    "fragment_encryption": {{
      "algorithm": "AES-256-GCM",
      "unique_keys_per_fragment": true,
      "total_unique_keys": 0
    }}
  }},
  "partitions": []
}}"#,
            hash = "00".repeat(31),
            key = encode_b64(&[1u8; 32]),
            iv = encode_b64(&[2u8; 12]),
            tag = encode_b64(&[3u8; 16]),
        )
    }

    #[test]
    fn parses_without_optional_fields() {
        let manifest = Manifest::parse(sample_manifest_json("3.0").as_bytes()).unwrap();
        assert!(manifest.security.master_encryption.salt.is_none());
        assert!(manifest.reed_solomon_config.is_none());
        assert_eq!(manifest.data_shards(), 0);
    }

    #[test]
    fn rejects_unknown_major_version() {
        let result = Manifest::parse(sample_manifest_json("2.2").as_bytes());
        match result {
            Err(StorageError::UnsupportedManifest { version }) => {
                assert_eq!(version, "2.2");
            }
            other => panic!("expected UnsupportedManifest, got {other:?}"),
        }
    }

    #[test]
    fn key_and_salt_together_are_rejected() {
        let mut manifest = Manifest::parse(sample_manifest_json("3.0").as_bytes()).unwrap();
        manifest.security.master_encryption.salt = Some(encode_b64(&[9u8; 32]));
        let bytes = manifest.to_json_bytes().unwrap();
        assert!(Manifest::parse(&bytes).is_err());
    }

    #[test]
    fn json_round_trip_preserves_fields() {
        let manifest = Manifest::parse(sample_manifest_json("3.0").as_bytes()).unwrap();
        let bytes = manifest.to_json_bytes().unwrap();
        let reparsed = Manifest::parse(&bytes).unwrap();
        assert_eq!(reparsed.file_name, "report.pdf");
        assert_eq!(reparsed.original_size, 1024);
        assert!(reparsed.compressed);
        assert_eq!(
            reparsed.security.master_encryption.iv_bytes().unwrap(),
            [2u8; 12]
        );
    }

    #[test]
    fn legacy_sixteen_byte_iv_is_truncated_to_nonce() {
        let mut wide = [0u8; 16];
        wide[..12].copy_from_slice(&[7u8; 12]);
        let iv = decode_iv(&encode_b64(&wide)).unwrap();
        assert_eq!(iv, [7u8; 12]);
    }

    #[test]
    fn pretty_output_is_indented() {
        let manifest = Manifest::parse(sample_manifest_json("3.0").as_bytes()).unwrap();
        let text = String::from_utf8(manifest.to_json_bytes().unwrap()).unwrap();
        assert!(text.contains("\n  \"version\""));
    }
}
