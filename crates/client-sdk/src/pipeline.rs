//! Network-free stages of the upload and download pipelines. The CLI
//! wraps these with directory discovery, node ranking, and transport;
//! tests drive them against an in-memory fragment map.

use chrono::Utc;

use crate::compress;
use crate::crypto::{
    self, FRAGMENT_SALT_LEN, IV_LEN, KEY_LEN, MASTER_SALT_LEN,
};
use crate::error::StorageError;
use crate::manifest::{
    encode_b64, FragmentEncryptionSummary, FragmentKeys, Manifest, MasterEncryption,
    PartitionRecord, ReedSolomonConfig, Security, MANIFEST_VERSION,
};
use crate::partition;
use crate::reed_solomon;

pub const DEFAULT_PARTITIONS: usize = 10;
pub const DEFAULT_REDUNDANCY: usize = 3;

pub const MASTER_ALGORITHM: &str = "AES-256-GCM";
pub const FRAGMENT_ALGORITHM: &str = "AES-256-GCM-LAYER2";

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub partitions: usize,
    pub redundancy: usize,
    pub compression: bool,
    pub reed_solomon: bool,
    pub master_password: Option<String>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            partitions: DEFAULT_PARTITIONS,
            redundancy: DEFAULT_REDUNDANCY,
            compression: true,
            reed_solomon: true,
            master_password: None,
        }
    }
}

/// Parity shard count when Reed-Solomon is enabled: `ceil(0.4 * D)`.
pub fn parity_count(data_shards: usize) -> usize {
    (data_shards * 2).div_ceil(5)
}

/// One shard ready for fragment encryption and distribution.
#[derive(Debug, Clone)]
pub struct ShardPlan {
    pub index: usize,
    /// SHA-256 of the pre-encryption shard bytes, hex.
    pub original_checksum: String,
    pub bytes: Vec<u8>,
}

/// Output of the local half of an upload: everything except node
/// assignments.
#[derive(Debug, Clone)]
pub struct EncodedUpload {
    pub file_hash: String,
    pub original_size: u64,
    pub compressed: bool,
    pub reed_solomon: bool,
    pub rs_config: Option<ReedSolomonConfig>,
    pub master: MasterEncryption,
    pub shards: Vec<ShardPlan>,
}

/// Steps 1-5 of the upload pipeline: hash, master-encrypt, compress,
/// and erasure-code the plaintext.
pub fn encode_payload(
    plaintext: &[u8],
    opts: &UploadOptions,
) -> Result<EncodedUpload, StorageError> {
    if opts.partitions < 2 {
        return Err(StorageError::malformed("partitions", "must be at least 2"));
    }
    if opts.redundancy < 1 {
        return Err(StorageError::malformed("redundancy", "must be at least 1"));
    }

    let file_hash = crypto::sha256_hex(plaintext);

    let (master_key, master_salt) = match &opts.master_password {
        Some(password) => {
            let salt = crypto::random_bytes::<MASTER_SALT_LEN>();
            (crypto::derive_master_key(password, &salt), Some(salt))
        }
        None => (crypto::random_bytes::<KEY_LEN>(), None),
    };

    let master_iv = crypto::random_bytes::<IV_LEN>();
    let (master_ct, master_tag) = crypto::encrypt(&master_key, &master_iv, plaintext)?;
    let encrypted_hash = crypto::sha256_hex(&master_ct);

    let processed = if opts.compression {
        compress::compress(&master_ct)?
    } else {
        master_ct
    };

    let (raw_shards, rs_config) = if opts.reed_solomon {
        let parity = parity_count(opts.partitions);
        let shards = reed_solomon::encode(&processed, opts.partitions, parity)?;
        let cfg = ReedSolomonConfig {
            data_shards: opts.partitions,
            parity_shards: parity,
            total_shards: opts.partitions + parity,
        };
        (shards, Some(cfg))
    } else {
        (partition::split(&processed, opts.partitions), None)
    };

    let shards = raw_shards
        .into_iter()
        .enumerate()
        .map(|(index, bytes)| ShardPlan {
            index,
            original_checksum: crypto::sha256_hex(&bytes),
            bytes,
        })
        .collect();

    let password_protected = opts.master_password.is_some();
    let master = MasterEncryption {
        algorithm: MASTER_ALGORITHM.to_string(),
        key: (!password_protected).then(|| encode_b64(&master_key)),
        iv: encode_b64(&master_iv),
        tag: encode_b64(&master_tag),
        salt: master_salt.map(|s| encode_b64(&s)),
        encrypted_hash,
        key_derivation: if password_protected { "PBKDF2" } else { "RANDOM" }.to_string(),
        password_protected,
    };

    Ok(EncodedUpload {
        file_hash,
        original_size: plaintext.len() as u64,
        compressed: opts.compression,
        reed_solomon: opts.reed_solomon,
        rs_config,
        master,
        shards,
    })
}

/// One encrypted, transmittable copy of a shard.
#[derive(Debug, Clone)]
pub struct EncryptedFragment {
    pub fragment_id: String,
    pub ciphertext: Vec<u8>,
    /// SHA-256 of the ciphertext, hex.
    pub checksum: String,
    pub keys: FragmentKeys,
}

/// Layer-2 encryption of one shard replica. Every call draws a fresh
/// `(raw_key, iv, salt)`, so retried slots never reuse key material.
pub fn encrypt_fragment(
    shard: &[u8],
    partition_index: usize,
    redundancy_index: usize,
) -> Result<EncryptedFragment, StorageError> {
    let raw_key = crypto::random_bytes::<KEY_LEN>();
    let salt = crypto::random_bytes::<FRAGMENT_SALT_LEN>();
    let iv = crypto::random_bytes::<IV_LEN>();

    let effective_key = crypto::derive_fragment_key(&raw_key, &salt);
    let (ciphertext, tag) = crypto::encrypt(&effective_key, &iv, shard)?;

    // The wall-clock component makes identical uploads produce distinct
    // fragment ids, which keeps storage nodes from correlating them.
    let timestamp_ms = Utc::now().timestamp_millis();
    let mut id_input =
        Vec::with_capacity(ciphertext.len() + KEY_LEN + IV_LEN + 24);
    id_input.extend_from_slice(&ciphertext);
    id_input.extend_from_slice(&raw_key);
    id_input.extend_from_slice(&iv);
    id_input.extend_from_slice(
        format!("{partition_index}-{redundancy_index}-{timestamp_ms}").as_bytes(),
    );
    let fragment_id = crypto::sha256_hex(&id_input);

    let checksum = crypto::sha256_hex(&ciphertext);
    Ok(EncryptedFragment {
        fragment_id,
        ciphertext,
        checksum,
        keys: FragmentKeys {
            key: encode_b64(&raw_key),
            iv: encode_b64(&iv),
            tag: encode_b64(&tag),
            salt: encode_b64(&salt),
            algorithm: FRAGMENT_ALGORITHM.to_string(),
        },
    })
}

/// Layer-2 decryption of a fetched fragment: ciphertext checksum, key
/// derivation, and AEAD open.
pub fn decrypt_fragment(
    keys: &FragmentKeys,
    expected_checksum: &str,
    ciphertext: &[u8],
) -> Result<Vec<u8>, StorageError> {
    if crypto::sha256_hex(ciphertext) != expected_checksum {
        return Err(StorageError::IntegrityFailure {
            stage: "fragment_ciphertext",
        });
    }

    let raw_key: [u8; KEY_LEN] =
        crate::manifest::decode_b64_array(&keys.key, "fragment key")?;
    let salt: [u8; FRAGMENT_SALT_LEN] =
        crate::manifest::decode_b64_array(&keys.salt, "fragment salt")?;
    let iv = crate::manifest::decode_iv(&keys.iv)?;
    let tag = crate::manifest::decode_b64_array(&keys.tag, "fragment tag")?;

    let effective_key = crypto::derive_fragment_key(&raw_key, &salt);
    crypto::decrypt(&effective_key, &iv, ciphertext, &tag)
}

/// Whether a decrypted shard matches the checksum recorded for its
/// partition at upload time.
pub fn shard_integrity_ok(record: &PartitionRecord, shard: &[u8]) -> bool {
    crypto::sha256_hex(shard) == record.original_checksum
}

/// Assemble the final manifest once every shard has its fragment
/// descriptors.
pub fn build_manifest(
    file_name: &str,
    encoded: &EncodedUpload,
    partitions: Vec<PartitionRecord>,
) -> Manifest {
    let total_unique_keys = partitions
        .iter()
        .map(|p| p.fragments.len() as u64)
        .sum();
    Manifest {
        version: MANIFEST_VERSION.to_string(),
        file_name: file_name.to_string(),
        file_hash: encoded.file_hash.clone(),
        original_size: encoded.original_size,
        compressed: encoded.compressed,
        reed_solomon: encoded.reed_solomon,
        reed_solomon_config: encoded.rs_config.clone(),
        timestamp: Utc::now().timestamp_millis() as u64,
        security: Security {
            double_encryption: true,
            master_encryption: encoded.master.clone(),
            fragment_encryption: FragmentEncryptionSummary {
                algorithm: MASTER_ALGORITHM.to_string(),
                unique_keys_per_fragment: true,
                total_unique_keys,
            },
        },
        partitions,
    }
}

/// Steps 5-9 of the download pipeline: erasure-decode the recovered
/// shards, undo compression, open the master layer, and verify the
/// plaintext hash. `shards` is ordered by partition index with `None`
/// marking partitions whose every replica failed.
pub fn recover_payload(
    manifest: &Manifest,
    shards: Vec<Option<Vec<u8>>>,
    password: Option<&str>,
) -> Result<Vec<u8>, StorageError> {
    let master = &manifest.security.master_encryption;
    if master.password_protected && password.is_none() {
        return Err(StorageError::PasswordRequired);
    }

    let data_shards = manifest.data_shards();
    let buffer = if manifest.reed_solomon {
        let parity_shards = manifest.parity_shards();
        match reed_solomon::decode(&shards, data_shards, parity_shards) {
            Ok(buffer) => buffer,
            // The decoder could not solve the system; if every data
            // shard survived their concatenation is already the answer.
            Err(err) => {
                if shards.iter().take(data_shards).all(Option::is_some) {
                    let mut out = Vec::new();
                    for shard in shards.iter().take(data_shards).flatten() {
                        out.extend_from_slice(shard);
                    }
                    out
                } else {
                    return Err(err);
                }
            }
        }
    } else {
        let have = shards.iter().filter(|s| s.is_some()).count();
        if have < shards.len() {
            return Err(StorageError::InsufficientShards {
                have,
                need: shards.len(),
            });
        }
        let chunks: Vec<Vec<u8>> = shards.into_iter().flatten().collect();
        partition::merge(&chunks)
    };

    // With compression the zlib stream self-delimits past the erasure
    // padding; without it the master ciphertext length equals the
    // plaintext length (the tag is detached).
    let master_ct = if manifest.compressed {
        compress::decompress(&buffer)?
    } else {
        let mut buffer = buffer;
        if buffer.len() < manifest.original_size as usize {
            return Err(StorageError::IntegrityFailure {
                stage: "master_ciphertext",
            });
        }
        buffer.truncate(manifest.original_size as usize);
        buffer
    };

    if crypto::sha256_hex(&master_ct) != master.encrypted_hash {
        return Err(StorageError::IntegrityFailure {
            stage: "master_ciphertext",
        });
    }

    let master_key = match (password, master.salt_bytes()?) {
        (Some(password), Some(salt)) => crypto::derive_master_key(password, &salt),
        _ => master
            .key_bytes()?
            .ok_or_else(|| StorageError::malformed("master_encryption", "missing key"))?,
    };

    let iv = master.iv_bytes()?;
    let tag = master.tag_bytes()?;
    let plaintext =
        crypto::decrypt(&master_key, &iv, &master_ct, &tag).map_err(|_| {
            if master.password_protected {
                StorageError::IncorrectPassword
            } else {
                StorageError::AuthenticationFailed
            }
        })?;

    if crypto::sha256_hex(&plaintext) != manifest.file_hash {
        return Err(StorageError::IntegrityFailure { stage: "final_hash" });
    }

    Ok(plaintext)
}
