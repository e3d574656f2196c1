//! On-disk fragment store: one `<fragment_id>.frag` file per fragment,
//! an in-memory table rebuilt (and re-hashed) on startup, and a
//! used-space counter enforcing the configured capacity.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use myst_protocol::FragmentMetadata;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const FRAGMENT_EXTENSION: &str = "frag";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("fragment does not fit: need {need} bytes, {available} available")]
    InsufficientSpace { need: u64, available: u64 },

    #[error("checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },

    #[error("fragment id must be 64 hex characters")]
    InvalidFragmentId,

    #[error("unknown fragment")]
    UnknownFragment,

    #[error("stored fragment no longer matches its checksum")]
    Corrupt,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct FragmentRecord {
    pub path: PathBuf,
    pub size: u64,
    pub checksum: String,
    /// Absent for fragments recovered by the startup scan.
    pub metadata: Option<FragmentMetadata>,
    pub stored_at: u64,
    pub access_count: u64,
}

pub struct FragmentStore {
    root: PathBuf,
    capacity: u64,
    used: u64,
    table: HashMap<String, FragmentRecord>,
}

impl FragmentStore {
    /// Open (or create) the store and rebuild the fragment table by
    /// scanning and re-hashing every `*.frag` on disk.
    pub fn open(root: &Path, capacity_gb: u64) -> std::io::Result<Self> {
        fs::create_dir_all(root)?;
        let capacity = capacity_gb
            .saturating_mul(1024)
            .saturating_mul(1024)
            .saturating_mul(1024);

        let mut table = HashMap::new();
        let mut used = 0u64;
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FRAGMENT_EXTENSION) {
                continue;
            }
            let Some(fragment_id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
            else {
                continue;
            };
            let bytes = fs::read(&path)?;
            let stored_at = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            used = used.saturating_add(bytes.len() as u64);
            table.insert(
                fragment_id,
                FragmentRecord {
                    path,
                    size: bytes.len() as u64,
                    checksum: sha256_hex(&bytes),
                    metadata: None,
                    stored_at,
                    access_count: 0,
                },
            );
        }

        tracing::info!(
            root = %root.display(),
            capacity_gb,
            fragments = table.len(),
            used_bytes = used,
            "fragment store opened"
        );
        Ok(Self {
            root: root.to_path_buf(),
            capacity,
            used,
            table,
        })
    }

    pub fn fragment_count(&self) -> usize {
        self.table.len()
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn available(&self) -> u64 {
        self.capacity.saturating_sub(self.used)
    }

    /// Persist a fragment: space check, checksum check, write to disk,
    /// then insert into the table.
    pub fn store(
        &mut self,
        fragment_id: &str,
        bytes: &[u8],
        expected_checksum: &str,
        metadata: FragmentMetadata,
    ) -> Result<u64, StoreError> {
        if !is_valid_fragment_id(fragment_id) {
            return Err(StoreError::InvalidFragmentId);
        }

        let size = bytes.len() as u64;
        let replaced = self
            .table
            .get(fragment_id)
            .map(|r| r.size)
            .unwrap_or(0);
        let projected = self.used.saturating_sub(replaced).saturating_add(size);
        if projected > self.capacity {
            return Err(StoreError::InsufficientSpace {
                need: size,
                available: self.available(),
            });
        }

        let computed = sha256_hex(bytes);
        if computed != expected_checksum {
            return Err(StoreError::ChecksumMismatch {
                expected: expected_checksum.to_string(),
                computed,
            });
        }

        let path = self.fragment_path(fragment_id);
        fs::write(&path, bytes)?;
        self.table.insert(
            fragment_id.to_string(),
            FragmentRecord {
                path,
                size,
                checksum: computed,
                metadata: Some(metadata),
                stored_at: chrono::Utc::now().timestamp_millis() as u64,
                access_count: 0,
            },
        );
        self.used = projected;
        Ok(size)
    }

    /// Read a fragment back, re-hashing against the recorded checksum
    /// to catch on-disk drift.
    pub fn read(&mut self, fragment_id: &str) -> Result<(Vec<u8>, FragmentRecord), StoreError> {
        let record = self
            .table
            .get_mut(fragment_id)
            .ok_or(StoreError::UnknownFragment)?;
        let bytes = fs::read(&record.path)?;
        if sha256_hex(&bytes) != record.checksum {
            return Err(StoreError::Corrupt);
        }
        record.access_count += 1;
        Ok((bytes, record.clone()))
    }

    /// Re-hash every stored fragment; corrupt ones are dropped from the
    /// table and deleted so their space is reusable. Returns
    /// `(healthy, dropped)`.
    pub fn sweep(&mut self) -> (usize, usize) {
        let ids: Vec<String> = self.table.keys().cloned().collect();
        let mut dropped = 0usize;
        for id in ids {
            let Some(record) = self.table.get(&id) else {
                continue;
            };
            let healthy = fs::read(&record.path)
                .map(|bytes| sha256_hex(&bytes) == record.checksum)
                .unwrap_or(false);
            if healthy {
                continue;
            }
            tracing::warn!(fragment_id = %id, "integrity sweep dropped corrupt fragment");
            if let Some(record) = self.table.remove(&id) {
                self.used = self.used.saturating_sub(record.size);
                let _ = fs::remove_file(&record.path);
            }
            dropped += 1;
        }
        (self.table.len(), dropped)
    }

    fn fragment_path(&self, fragment_id: &str) -> PathBuf {
        self.root.join(format!("{fragment_id}.{FRAGMENT_EXTENSION}"))
    }
}

/// Fragment ids are SHA-256 digests; anything else is rejected before
/// it can reach the filesystem.
fn is_valid_fragment_id(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeIdentity {
    node_id: String,
    created_at: u64,
}

/// Stable node identity, persisted next to the fragments as
/// `node_id.json`.
pub fn load_or_create_node_id(root: &Path) -> anyhow::Result<String> {
    fs::create_dir_all(root)?;
    let path = root.join("node_id.json");
    if path.exists() {
        let raw = fs::read_to_string(&path)?;
        let identity: NodeIdentity = serde_json::from_str(&raw)?;
        return Ok(identity.node_id);
    }

    let mut seed = [0u8; 16];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut seed);
    let identity = NodeIdentity {
        node_id: hex::encode(seed),
        created_at: chrono::Utc::now().timestamp_millis() as u64,
    };
    fs::write(&path, serde_json::to_string_pretty(&identity)?)?;
    Ok(identity.node_id)
}
