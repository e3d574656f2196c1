//! DEFLATE (zlib) codec applied to the master ciphertext before
//! partitioning. Compressing ciphertext rarely wins, but the layer is
//! part of the wire format and the `compressed` manifest flag selects
//! it on the way back.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::StorageError;

pub fn compress(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| StorageError::malformed("compression", e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| StorageError::malformed("compression", e.to_string()))
}

/// Reads a single zlib stream; trailing bytes (erasure padding) are
/// ignored once the stream terminates.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|_| StorageError::IntegrityFailure {
            stage: "decompress",
        })?;
    Ok(out)
}
