//! Client-side pipeline for the MystStore zero-knowledge storage
//! protocol: double-layer AES-256-GCM, DEFLATE, Reed-Solomon erasure
//! coding over GF(2^8), and the `.myst` recovery manifest codec.
//!
//! Everything here is network-free; transport and orchestration live in
//! the `myst` CLI.

pub mod compress;
pub mod crypto;
pub mod error;
pub mod gf256;
pub mod manifest;
pub mod partition;
pub mod pipeline;
pub mod reed_solomon;

pub use error::StorageError;
pub use manifest::{Manifest, MANIFEST_EXTENSION, MANIFEST_VERSION};
pub use pipeline::{
    build_manifest, decrypt_fragment, encode_payload, encrypt_fragment,
    recover_payload, shard_integrity_ok, EncodedUpload, EncryptedFragment,
    UploadOptions, DEFAULT_PARTITIONS, DEFAULT_REDUNDANCY,
};
