mod download;
mod transport;
mod upload;

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use myst_client_sdk::manifest::{FragmentDescriptor, PartitionRecord};
use myst_client_sdk::{
    build_manifest, decrypt_fragment, encode_payload, encrypt_fragment,
    recover_payload, shard_integrity_ok, UploadOptions, DEFAULT_PARTITIONS,
    DEFAULT_REDUNDANCY,
};

use download::DownloadRequest;
use transport::{DirectoryClient, NodeClient};
use upload::UploadRequest;

#[derive(Parser, Debug)]
#[command(name = "myst", version, about = "Zero-knowledge distributed storage client")]
struct Args {
    /// Directory service base URL.
    #[arg(long, global = true, default_value_t = default_server())]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

fn default_server() -> String {
    std::env::var("MYST_DIRECTORY_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:9000".to_string())
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt, erasure-code, and scatter a file across storage nodes.
    Upload {
        file: PathBuf,

        /// Number of data shards.
        #[arg(long, default_value_t = DEFAULT_PARTITIONS)]
        partitions: usize,

        /// Fragment copies per shard.
        #[arg(long, default_value_t = DEFAULT_REDUNDANCY)]
        redundancy: usize,

        /// Bind the recovery manifest to a password instead of an
        /// embedded key.
        #[arg(long)]
        master_password: Option<String>,

        #[arg(long, default_value_t = false)]
        no_compression: bool,

        #[arg(long, default_value_t = false)]
        no_reed_solomon: bool,

        /// Manifest output path (defaults to `<file>.myst` next to the
        /// source).
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Reassemble a file from its recovery manifest.
    Download {
        manifest: PathBuf,

        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(long)]
        master_password: Option<String>,
    },

    /// Probe whether a manifest's file is currently recoverable.
    Verify { manifest: PathBuf },

    /// Print a manifest summary without secret material.
    Info { manifest: PathBuf },

    /// List directory nodes with live latency measurements.
    Stats {
        #[arg(long, default_value_t = 50)]
        count: usize,
    },

    /// Print the resolved client configuration.
    Config,

    /// Run the local pipeline self-test and check directory
    /// reachability.
    Test,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let directory = DirectoryClient::new(&args.server);

    match args.command {
        Commands::Upload {
            file,
            partitions,
            redundancy,
            master_password,
            no_compression,
            no_reed_solomon,
            output,
        } => {
            upload::run(
                &directory,
                UploadRequest {
                    file,
                    options: UploadOptions {
                        partitions,
                        redundancy,
                        compression: !no_compression,
                        reed_solomon: !no_reed_solomon,
                        master_password,
                    },
                    manifest_out: output,
                },
            )
            .await
        }
        Commands::Download {
            manifest,
            output,
            master_password,
        } => {
            download::run(DownloadRequest {
                manifest_path: manifest,
                output,
                master_password,
            })
            .await
        }
        Commands::Verify { manifest } => download::verify(&manifest).await,
        Commands::Info { manifest } => info(&manifest),
        Commands::Stats { count } => stats(&directory, count).await,
        Commands::Config => config(&args.server),
        Commands::Test => self_test(&directory).await,
    }
}

fn info(manifest_path: &std::path::Path) -> Result<()> {
    let manifest = download::load_manifest(manifest_path)?;
    let master = &manifest.security.master_encryption;

    println!("file_name={}", manifest.file_name);
    println!("file_hash={}", manifest.file_hash);
    println!("original_size={}", manifest.original_size);
    println!("version={}", manifest.version);
    println!("compressed={}", manifest.compressed);
    println!("reed_solomon={}", manifest.reed_solomon);
    if let Some(cfg) = &manifest.reed_solomon_config {
        println!(
            "shards data={} parity={} total={}",
            cfg.data_shards, cfg.parity_shards, cfg.total_shards
        );
    }
    println!("password_protected={}", master.password_protected);
    println!("key_derivation={}", master.key_derivation);
    println!("partitions={}", manifest.partitions.len());
    println!("fragments={}", manifest.total_fragments());

    let mut nodes: Vec<&str> = manifest
        .partitions
        .iter()
        .flat_map(|p| p.fragments.iter().map(|f| f.node_address.as_str()))
        .collect();
    nodes.sort();
    nodes.dedup();
    println!("nodes={}", nodes.len());
    Ok(())
}

async fn stats(directory: &DirectoryClient, count: usize) -> Result<()> {
    let nodes = directory.nodes(count, 0).await?;
    if nodes.is_empty() {
        println!("directory reports no nodes");
        return Ok(());
    }

    let client = NodeClient::new();
    let ranked = client.rank(nodes).await;
    for node in &ranked {
        let latency = if node.reachable() {
            format!("{:.1}ms", node.latency_ms)
        } else {
            "unreachable".to_string()
        };
        println!(
            "node={} address={} reliability={:.2} latency={latency}",
            node.descriptor.id,
            node.descriptor.endpoint(),
            node.descriptor.normalized_reliability()
        );
    }
    let reachable = ranked.iter().filter(|n| n.reachable()).count();
    println!("nodes={} reachable={reachable}", ranked.len());
    Ok(())
}

fn config(server: &str) -> Result<()> {
    println!("server={server}");
    println!("default_partitions={DEFAULT_PARTITIONS}");
    println!("default_redundancy={DEFAULT_REDUNDANCY}");
    println!("compression=true");
    println!("reed_solomon=true");
    Ok(())
}

/// Exercise the full local pipeline (including erasure recovery with
/// the maximum tolerable loss), then probe the directory.
async fn self_test(directory: &DirectoryClient) -> Result<()> {
    let plaintext: Vec<u8> = (0..64 * 1024u32).map(|v| (v % 251) as u8).collect();
    let options = UploadOptions::default();
    let encoded = encode_payload(&plaintext, &options)?;

    let mut store: HashMap<String, Vec<u8>> = HashMap::new();
    let mut partitions = Vec::new();
    for shard in &encoded.shards {
        let fragment = encrypt_fragment(&shard.bytes, shard.index, 0)?;
        store.insert(fragment.fragment_id.clone(), fragment.ciphertext.clone());
        partitions.push(PartitionRecord {
            index: shard.index,
            original_checksum: shard.original_checksum.clone(),
            size: shard.bytes.len() as u64,
            fragments: vec![FragmentDescriptor {
                fragment_id: fragment.fragment_id,
                redundancy_index: 0,
                node_id: "self-test".to_string(),
                node_address: "127.0.0.1:0".to_string(),
                checksum: fragment.checksum,
                encryption: fragment.keys,
            }],
        });
    }
    let manifest = build_manifest("self-test.bin", &encoded, partitions);

    // Simulate losing every parity shard's worth of partitions.
    let parity = manifest.parity_shards();
    let shards: Vec<Option<Vec<u8>>> = manifest
        .partitions
        .iter()
        .map(|record| {
            if record.index < parity {
                return None;
            }
            let descriptor = &record.fragments[0];
            let ciphertext = store.get(&descriptor.fragment_id)?;
            let shard =
                decrypt_fragment(&descriptor.encryption, &descriptor.checksum, ciphertext)
                    .ok()?;
            shard_integrity_ok(record, &shard).then_some(shard)
        })
        .collect();

    let recovered = recover_payload(&manifest, shards, None)?;
    anyhow::ensure!(recovered == plaintext, "pipeline self-test mismatch");
    println!("pipeline self-test ok bytes={} lost_partitions={parity}", plaintext.len());

    match directory.nodes(1, 0).await {
        Ok(nodes) => println!(
            "directory ok url={} nodes={}",
            directory.base_url(),
            nodes.len()
        ),
        Err(err) => println!("directory unreachable url={} err={err}", directory.base_url()),
    }
    Ok(())
}
