//! Upload orchestration: encode locally, discover and rank nodes, then
//! distribute fragments round-robin with bounded per-shard retries.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use myst_client_sdk::manifest::{FragmentDescriptor, PartitionRecord};
use myst_client_sdk::{
    build_manifest, encode_payload, encrypt_fragment, StorageError, UploadOptions,
    MANIFEST_EXTENSION,
};
use myst_protocol::{FragmentMetadata, StoreFragmentRequest};

use crate::transport::{DirectoryClient, NodeClient, RankedNode};

pub struct UploadRequest {
    pub file: PathBuf,
    pub options: UploadOptions,
    pub manifest_out: Option<PathBuf>,
}

pub async fn run(directory: &DirectoryClient, request: UploadRequest) -> Result<()> {
    let file_name = request
        .file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("input path has no usable file name"))?
        .to_string();
    let plaintext = fs::read(&request.file)
        .with_context(|| format!("failed to read {}", request.file.display()))?;

    let redundancy = request.options.redundancy;
    let encoded = encode_payload(&plaintext, &request.options)?;
    let shard_count = encoded.shards.len();
    let largest_shard = encoded
        .shards
        .iter()
        .map(|s| s.bytes.len() as u64)
        .max()
        .unwrap_or(0);

    let needed = shard_count * redundancy;
    let candidates = directory.nodes(needed, largest_shard).await?;
    if candidates.len() < needed {
        return Err(StorageError::InsufficientNodes {
            have: candidates.len(),
            need: needed,
        }
        .into());
    }

    let client = NodeClient::new();
    let ranked = client.rank(candidates).await;
    let reachable = ranked.iter().filter(|n| n.reachable()).count();
    println!(
        "upload file={file_name} bytes={} shards={shard_count} replicas={redundancy} nodes={}/{}",
        plaintext.len(),
        reachable,
        ranked.len()
    );

    let mut cursor = 0usize;
    let mut partitions = Vec::with_capacity(shard_count);
    for shard in &encoded.shards {
        let mut fragments = Vec::with_capacity(redundancy);
        let max_attempts = 2 * redundancy;
        let mut attempts = 0usize;
        let mut replica = 0usize;

        while replica < redundancy {
            if attempts >= max_attempts {
                return Err(StorageError::DistributionFailed { shard: shard.index }.into());
            }
            let node: &RankedNode = &ranked[cursor % ranked.len()];
            cursor += 1;
            attempts += 1;

            let fragment = encrypt_fragment(&shard.bytes, shard.index, replica)?;
            let store_request = StoreFragmentRequest {
                fragment_id: fragment.fragment_id.clone(),
                data: BASE64.encode(&fragment.ciphertext),
                checksum: fragment.checksum.clone(),
                metadata: FragmentMetadata {
                    file_hash: encoded.file_hash.clone(),
                    partition_index: shard.index,
                    redundancy_index: replica,
                    double_encrypted: true,
                    timestamp: Utc::now().timestamp_millis() as u64,
                },
            };

            match client.store(&node.descriptor.base_url(), &store_request).await {
                Ok(_) => {
                    println!(
                        "store shard={} replica={replica} node={} attempt={attempts}",
                        shard.index,
                        node.descriptor.id
                    );
                    fragments.push(FragmentDescriptor {
                        fragment_id: fragment.fragment_id,
                        redundancy_index: replica,
                        node_id: node.descriptor.id.clone(),
                        node_address: node.descriptor.endpoint(),
                        checksum: fragment.checksum,
                        encryption: fragment.keys,
                    });
                    replica += 1;
                }
                Err(err) => {
                    // Same slot, next node in the rotation.
                    tracing::warn!(
                        shard = shard.index,
                        replica,
                        node = %node.descriptor.id,
                        %err,
                        "fragment store failed, retrying on next node"
                    );
                }
            }
        }

        partitions.push(PartitionRecord {
            index: shard.index,
            original_checksum: shard.original_checksum.clone(),
            size: shard.bytes.len() as u64,
            fragments,
        });
    }

    let manifest = build_manifest(&file_name, &encoded, partitions);
    let out_path = request.manifest_out.unwrap_or_else(|| {
        request
            .file
            .with_file_name(format!("{file_name}.{MANIFEST_EXTENSION}"))
    });
    write_manifest(&manifest.to_json_bytes()?, &out_path)?;

    println!(
        "upload complete partitions={} fragments={} manifest={}",
        manifest.partitions.len(),
        manifest.total_fragments(),
        out_path.display()
    );
    Ok(())
}

fn write_manifest(bytes: &[u8], path: &Path) -> Result<()> {
    fs::write(path, bytes)
        .with_context(|| format!("failed to write manifest {}", path.display()))
}
