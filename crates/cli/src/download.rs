//! Download orchestration: parallel per-partition fragment fetch,
//! layer-2 decryption, and handoff to the reconstruction stages. Also
//! hosts the `verify` availability probe.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use futures::future::join_all;
use myst_client_sdk::manifest::PartitionRecord;
use myst_client_sdk::{
    decrypt_fragment, recover_payload, shard_integrity_ok, Manifest, StorageError,
};

use crate::transport::{endpoint_base_url, NodeClient};

pub struct DownloadRequest {
    pub manifest_path: PathBuf,
    pub output: Option<PathBuf>,
    pub master_password: Option<String>,
}

pub async fn run(request: DownloadRequest) -> Result<()> {
    let manifest = load_manifest(&request.manifest_path)?;
    if manifest.is_password_protected() && request.master_password.is_none() {
        return Err(StorageError::PasswordRequired.into());
    }

    let client = NodeClient::new();
    let partition_count = manifest.partitions.len();
    let tasks = manifest.partitions.iter().cloned().map(|record| {
        let client = client.clone();
        tokio::spawn(async move { fetch_partition(client, record).await })
    });

    let mut shards: Vec<Option<Vec<u8>>> = vec![None; partition_count];
    for joined in join_all(tasks).await {
        let (index, shard) = joined.context("partition fetch task panicked")?;
        if index < partition_count {
            shards[index] = shard;
        }
    }

    let recovered_partitions = shards.iter().filter(|s| s.is_some()).count();
    println!(
        "fetch partitions={recovered_partitions}/{partition_count} needed={}",
        manifest.data_shards()
    );

    let plaintext = recover_payload(&manifest, shards, request.master_password.as_deref())?;

    let out_path = request.output.unwrap_or_else(|| {
        request
            .manifest_path
            .with_file_name(&manifest.file_name)
    });
    fs::write(&out_path, &plaintext)
        .with_context(|| format!("failed to write {}", out_path.display()))?;

    println!(
        "download complete file={} bytes={} out={}",
        manifest.file_name,
        plaintext.len(),
        out_path.display()
    );
    Ok(())
}

/// Try each replica of one partition in manifest order; the first copy
/// that passes its checksum, AEAD tag, and shard hash wins.
async fn fetch_partition(
    client: NodeClient,
    record: PartitionRecord,
) -> (usize, Option<Vec<u8>>) {
    for descriptor in &record.fragments {
        let base_url = endpoint_base_url(&descriptor.node_address);
        let ciphertext = match client.retrieve(&base_url, &descriptor.fragment_id).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(
                    partition = record.index,
                    replica = descriptor.redundancy_index,
                    node = %descriptor.node_id,
                    %err,
                    "replica fetch failed"
                );
                continue;
            }
        };

        match decrypt_fragment(&descriptor.encryption, &descriptor.checksum, &ciphertext) {
            Ok(shard) if shard_integrity_ok(&record, &shard) => {
                return (record.index, Some(shard));
            }
            Ok(_) => {
                tracing::warn!(
                    partition = record.index,
                    replica = descriptor.redundancy_index,
                    "decrypted shard failed its recorded checksum"
                );
            }
            Err(err) => {
                tracing::warn!(
                    partition = record.index,
                    replica = descriptor.redundancy_index,
                    %err,
                    "replica failed layer-2 decryption"
                );
            }
        }
    }
    (record.index, None)
}

pub async fn verify(manifest_path: &Path) -> Result<()> {
    let manifest = load_manifest(manifest_path)?;
    let client = NodeClient::new();

    // Ping each distinct node once, not once per fragment.
    let mut endpoints: Vec<String> = manifest
        .partitions
        .iter()
        .flat_map(|p| p.fragments.iter().map(|f| f.node_address.clone()))
        .collect();
    endpoints.sort();
    endpoints.dedup();

    let base_urls: Vec<String> = endpoints.iter().map(|e| endpoint_base_url(e)).collect();
    let probes = join_all(base_urls.iter().map(|u| client.ping(u))).await;
    let reachable: HashMap<&str, bool> = endpoints
        .iter()
        .map(String::as_str)
        .zip(probes.iter().map(Option::is_some))
        .collect();

    let mut recoverable_partitions = 0usize;
    for record in &manifest.partitions {
        let alive = record
            .fragments
            .iter()
            .filter(|f| reachable.get(f.node_address.as_str()).copied().unwrap_or(false))
            .count();
        if alive > 0 {
            recoverable_partitions += 1;
        }
        println!(
            "partition={} replicas={} reachable={alive}",
            record.index,
            record.fragments.len()
        );
    }

    let needed = if manifest.reed_solomon {
        manifest.data_shards()
    } else {
        manifest.partitions.len()
    };
    let ok = recoverable_partitions >= needed;
    println!(
        "verify file={} partitions={recoverable_partitions}/{} needed={needed} recoverable={ok}",
        manifest.file_name,
        manifest.partitions.len()
    );
    if !ok {
        return Err(anyhow!(
            "file is not currently recoverable: {recoverable_partitions} of {needed} required partitions reachable"
        ));
    }
    Ok(())
}

pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(Manifest::parse(&bytes)?)
}
