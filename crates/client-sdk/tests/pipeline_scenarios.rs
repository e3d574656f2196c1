//! End-to-end pipeline scenarios driven against an in-memory fragment
//! map standing in for the storage network.

use std::collections::HashMap;

use myst_client_sdk::manifest::{FragmentDescriptor, PartitionRecord};
use myst_client_sdk::{
    build_manifest, decrypt_fragment, encode_payload, encrypt_fragment,
    recover_payload, shard_integrity_ok, Manifest, StorageError, UploadOptions,
};

/// Fragment ciphertexts keyed by fragment id.
type MemoryStore = HashMap<String, Vec<u8>>;

/// Run the upload pipeline, storing every fragment in memory.
fn upload_to_memory(plaintext: &[u8], opts: &UploadOptions) -> (Manifest, MemoryStore) {
    let encoded = encode_payload(plaintext, opts).expect("encode failed");
    let mut store = MemoryStore::new();
    let mut partitions = Vec::with_capacity(encoded.shards.len());

    for shard in &encoded.shards {
        let mut fragments = Vec::with_capacity(opts.redundancy);
        for r in 0..opts.redundancy {
            let frag = encrypt_fragment(&shard.bytes, shard.index, r).expect("encrypt failed");
            store.insert(frag.fragment_id.clone(), frag.ciphertext.clone());
            fragments.push(FragmentDescriptor {
                fragment_id: frag.fragment_id,
                redundancy_index: r,
                node_id: format!("node-{r}"),
                node_address: format!("127.0.0.{r}:9100"),
                checksum: frag.checksum,
                encryption: frag.keys,
            });
        }
        partitions.push(PartitionRecord {
            index: shard.index,
            original_checksum: shard.original_checksum.clone(),
            size: shard.bytes.len() as u64,
            fragments,
        });
    }

    (build_manifest("input.bin", &encoded, partitions), store)
}

/// Run the download pipeline against the in-memory store: replicas are
/// tried in manifest order, failed partitions become `None`.
fn download_from_memory(
    manifest: &Manifest,
    store: &MemoryStore,
    password: Option<&str>,
) -> Result<Vec<u8>, StorageError> {
    let mut shards: Vec<Option<Vec<u8>>> = Vec::with_capacity(manifest.partitions.len());
    for record in &manifest.partitions {
        let mut recovered = None;
        for descriptor in &record.fragments {
            let Some(ciphertext) = store.get(&descriptor.fragment_id) else {
                continue;
            };
            let Ok(shard) =
                decrypt_fragment(&descriptor.encryption, &descriptor.checksum, ciphertext)
            else {
                continue;
            };
            if shard_integrity_ok(record, &shard) {
                recovered = Some(shard);
                break;
            }
        }
        shards.push(recovered);
    }
    recover_payload(manifest, shards, password)
}

fn drop_partition(manifest: &Manifest, store: &mut MemoryStore, index: usize) {
    for descriptor in &manifest.partitions[index].fragments {
        store.remove(&descriptor.fragment_id);
    }
}

#[test]
fn tiny_plaintext_without_rs_or_compression() {
    let opts = UploadOptions {
        partitions: 4,
        redundancy: 1,
        compression: false,
        reed_solomon: false,
        master_password: None,
    };
    let (manifest, store) = upload_to_memory(b"hello world", &opts);

    assert_eq!(manifest.partitions.len(), 4);
    let sizes: Vec<u64> = manifest.partitions.iter().map(|p| p.size).collect();
    assert_eq!(sizes, vec![3, 3, 3, 2]);
    assert!(manifest
        .partitions
        .iter()
        .all(|p| p.fragments.len() == 1));
    assert!(manifest
        .file_hash
        .starts_with("b94d27b9934d3e08"));

    let recovered = download_from_memory(&manifest, &store, None).unwrap();
    assert_eq!(recovered, b"hello world");
}

#[test]
fn rs_survives_a_lost_partition() {
    let opts = UploadOptions {
        partitions: 10,
        redundancy: 1,
        compression: true,
        reed_solomon: true,
        master_password: None,
    };
    let plaintext = vec![0u8; 1024 * 1024];
    let (manifest, mut store) = upload_to_memory(&plaintext, &opts);

    let cfg = manifest.reed_solomon_config.as_ref().unwrap();
    assert_eq!(cfg.parity_shards, 4);
    assert_eq!(manifest.partitions.len(), 14);

    drop_partition(&manifest, &mut store, 3);

    let recovered = download_from_memory(&manifest, &store, None).unwrap();
    assert_eq!(recovered, plaintext);
}

#[test]
fn rs_fails_when_too_many_partitions_are_lost() {
    let opts = UploadOptions {
        partitions: 10,
        redundancy: 1,
        compression: true,
        reed_solomon: true,
        master_password: None,
    };
    let plaintext = vec![0u8; 1024 * 1024];
    let (manifest, mut store) = upload_to_memory(&plaintext, &opts);

    for index in 0..5 {
        drop_partition(&manifest, &mut store, index);
    }

    match download_from_memory(&manifest, &store, None) {
        Err(StorageError::InsufficientShards { have, need }) => {
            assert_eq!(have, 9);
            assert_eq!(need, 10);
        }
        other => panic!("expected InsufficientShards, got {other:?}"),
    }
}

#[test]
fn password_binding() {
    let opts = UploadOptions {
        partitions: 3,
        redundancy: 2,
        compression: true,
        reed_solomon: true,
        master_password: Some("correct horse".into()),
    };
    let (manifest, store) = upload_to_memory(b"secret", &opts);

    let master = &manifest.security.master_encryption;
    assert!(master.key.is_none());
    assert!(master.salt.is_some());
    assert!(master.password_protected);

    let recovered = download_from_memory(&manifest, &store, Some("correct horse")).unwrap();
    assert_eq!(recovered, b"secret");

    match download_from_memory(&manifest, &store, Some("wrong")) {
        Err(StorageError::IncorrectPassword) => {}
        other => panic!("expected IncorrectPassword, got {other:?}"),
    }

    match download_from_memory(&manifest, &store, None) {
        Err(StorageError::PasswordRequired) => {}
        other => panic!("expected PasswordRequired, got {other:?}"),
    }
}

#[test]
fn tampered_fragment_never_yields_corrupt_plaintext() {
    let opts = UploadOptions {
        partitions: 5,
        redundancy: 1,
        compression: false,
        reed_solomon: false,
        master_password: None,
    };
    let plaintext: Vec<u8> = (0..512u16).map(|v| (v % 251) as u8).collect();
    let (manifest, mut store) = upload_to_memory(&plaintext, &opts);

    let victim = &manifest.partitions[2].fragments[0];
    let bytes = store.get_mut(&victim.fragment_id).unwrap();
    bytes[0] ^= 0x01;

    // The replica fails its ciphertext checksum, the partition has no
    // other copy, and without parity the pipeline cannot proceed.
    assert!(download_from_memory(&manifest, &store, None).is_err());
}

#[test]
fn tampered_fragment_with_forged_checksum_fails_authentication() {
    let frag = encrypt_fragment(b"shard bytes", 2, 0).unwrap();
    let mut tampered = frag.ciphertext.clone();
    tampered[0] ^= 0x01;

    // Even a node that recomputes the checksum over the tampered bytes
    // cannot get past the fragment AEAD tag.
    let forged_checksum = myst_client_sdk::crypto::sha256_hex(&tampered);
    match decrypt_fragment(&frag.keys, &forged_checksum, &tampered) {
        Err(StorageError::AuthenticationFailed) => {}
        other => panic!("expected AuthenticationFailed, got {other:?}"),
    }
}

#[test]
fn tampered_manifest_file_hash_is_caught_after_master_decrypt() {
    let opts = UploadOptions {
        partitions: 4,
        redundancy: 1,
        compression: true,
        reed_solomon: true,
        master_password: None,
    };
    let (mut manifest, store) = upload_to_memory(b"authentic content", &opts);

    manifest.file_hash = myst_client_sdk::crypto::sha256_hex(b"some other file");

    match download_from_memory(&manifest, &store, None) {
        Err(StorageError::IntegrityFailure { stage: "final_hash" }) => {}
        other => panic!("expected final_hash IntegrityFailure, got {other:?}"),
    }
}

#[test]
fn round_trip_across_option_matrix() {
    let plaintext: Vec<u8> = (0..4096u32).map(|v| (v * 31 % 256) as u8).collect();
    for compression in [false, true] {
        for reed_solomon in [false, true] {
            for partitions in [2, 5, 10] {
                let opts = UploadOptions {
                    partitions,
                    redundancy: 2,
                    compression,
                    reed_solomon,
                    master_password: None,
                };
                let (manifest, store) = upload_to_memory(&plaintext, &opts);
                let recovered = download_from_memory(&manifest, &store, None)
                    .unwrap_or_else(|e| {
                        panic!("comp={compression} rs={reed_solomon} d={partitions}: {e}")
                    });
                assert_eq!(recovered, plaintext);
            }
        }
    }
}

#[test]
fn any_data_shard_subset_of_size_d_recovers() {
    let opts = UploadOptions {
        partitions: 6,
        redundancy: 1,
        compression: true,
        reed_solomon: true,
        master_password: None,
    };
    let plaintext = vec![0xA5u8; 100_000];
    let (manifest, store) = upload_to_memory(&plaintext, &opts);
    let parity = manifest.reed_solomon_config.as_ref().unwrap().parity_shards;

    // Drop every combination of `parity` partitions in a sliding window.
    for start in 0..manifest.partitions.len() - parity {
        let mut pruned = store.clone();
        for offset in 0..parity {
            drop_partition(&manifest, &mut pruned, start + offset);
        }
        let recovered = download_from_memory(&manifest, &pruned, None)
            .unwrap_or_else(|e| panic!("window at {start}: {e}"));
        assert_eq!(recovered, plaintext);
    }
}

#[test]
fn manifest_serialization_survives_the_network_round_trip() {
    let (manifest, store) = upload_to_memory(b"persist me", &UploadOptions::default());
    let bytes = manifest.to_json_bytes().unwrap();
    let reparsed = Manifest::parse(&bytes).unwrap();
    let recovered = download_from_memory(&reparsed, &store, None).unwrap();
    assert_eq!(recovered, b"persist me");
}
