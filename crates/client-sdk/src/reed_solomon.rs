//! Reed-Solomon erasure codec over GF(2^8).
//!
//! The generator is fixed by the wire format: parity row `p` applies
//! coefficient `exp[((p+1)*(i+1)) mod 255]` to data shard `i`. Every
//! implementation of the protocol must reproduce these parity bytes
//! bit-for-bit, so the codec lives here instead of behind a library
//! with its own matrix construction.

use crate::error::StorageError;
use crate::gf256;

/// Generator coefficient applied to data shard `i` when producing
/// parity shard `p`.
#[inline]
fn coef(p: usize, i: usize) -> u8 {
    gf256::exp(((p + 1) * (i + 1)) % 255)
}

/// Split `data` into `data_shards` equal slices (the last right-padded
/// with zeros) and append `parity_shards` parity slices. Every returned
/// shard has length `ceil(data.len() / data_shards)`.
pub fn encode(
    data: &[u8],
    data_shards: usize,
    parity_shards: usize,
) -> Result<Vec<Vec<u8>>, StorageError> {
    if data_shards == 0 {
        return Err(StorageError::malformed(
            "data_shards",
            "must be at least 1",
        ));
    }

    let shard_len = data.len().div_ceil(data_shards);
    let mut shards: Vec<Vec<u8>> =
        vec![vec![0u8; shard_len]; data_shards + parity_shards];

    for (i, shard) in shards.iter_mut().enumerate().take(data_shards) {
        let start = i * shard_len;
        if start >= data.len() {
            continue;
        }
        let end = usize::min(start + shard_len, data.len());
        shard[..end - start].copy_from_slice(&data[start..end]);
    }

    for p in 0..parity_shards {
        for j in 0..shard_len {
            let mut acc = 0u8;
            for i in 0..data_shards {
                acc ^= gf256::mul(shards[i][j], coef(p, i));
            }
            shards[data_shards + p][j] = acc;
        }
    }

    Ok(shards)
}

/// Reconstruct the concatenated data shards from a sparse shard array
/// (`None` marks a missing position). The output is `data_shards *
/// shard_len` bytes; trailing erasure padding is left for the caller.
pub fn decode(
    shards: &[Option<Vec<u8>>],
    data_shards: usize,
    parity_shards: usize,
) -> Result<Vec<u8>, StorageError> {
    let total = data_shards + parity_shards;
    if shards.len() != total {
        return Err(StorageError::malformed(
            "shards",
            format!("expected {total} positions, got {}", shards.len()),
        ));
    }

    let have = shards.iter().filter(|s| s.is_some()).count();
    let Some(shard_len) = shards.iter().flatten().map(Vec::len).next() else {
        return Err(StorageError::InsufficientShards {
            have: 0,
            need: data_shards,
        });
    };
    if shards.iter().flatten().any(|s| s.len() != shard_len) {
        return Err(StorageError::malformed(
            "shards",
            "present shards have unequal lengths",
        ));
    }

    // Fast path: every data shard survived.
    if shards.iter().take(data_shards).all(Option::is_some) {
        let mut out = Vec::with_capacity(data_shards * shard_len);
        for shard in shards.iter().take(data_shards).flatten() {
            out.extend_from_slice(shard);
        }
        return Ok(out);
    }

    if have < data_shards {
        return Err(StorageError::InsufficientShards {
            have,
            need: data_shards,
        });
    }

    // Each surviving shard contributes one row of the linear system
    // A * data = rhs: a unit row for a data shard, a generator row for
    // a parity shard. Gauss-Jordan over all rows leaves the data shards
    // in index order.
    let mut rows: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(have);
    for (i, shard) in shards.iter().take(data_shards).enumerate() {
        if let Some(bytes) = shard {
            let mut coeffs = vec![0u8; data_shards];
            coeffs[i] = 1;
            rows.push((coeffs, bytes.clone()));
        }
    }
    for p in 0..parity_shards {
        if let Some(bytes) = &shards[data_shards + p] {
            let coeffs = (0..data_shards).map(|i| coef(p, i)).collect();
            rows.push((coeffs, bytes.clone()));
        }
    }

    for col in 0..data_shards {
        let pivot = (col..rows.len())
            .find(|&r| rows[r].0[col] != 0)
            .ok_or(StorageError::InsufficientShards {
                have,
                need: data_shards,
            })?;
        rows.swap(col, pivot);

        let lead = rows[col].0[col];
        if lead != 1 {
            let lead_inv = gf256::inv(lead);
            for x in rows[col].0.iter_mut() {
                *x = gf256::mul(*x, lead_inv);
            }
            for x in rows[col].1.iter_mut() {
                *x = gf256::mul(*x, lead_inv);
            }
        }

        let (pivot_coeffs, pivot_rhs) = (rows[col].0.clone(), rows[col].1.clone());
        for (r, row) in rows.iter_mut().enumerate() {
            if r == col {
                continue;
            }
            let factor = row.0[col];
            if factor == 0 {
                continue;
            }
            for k in 0..data_shards {
                row.0[k] ^= gf256::mul(factor, pivot_coeffs[k]);
            }
            for k in 0..shard_len {
                row.1[k] ^= gf256::mul(factor, pivot_rhs[k]);
            }
        }
    }

    let mut out = Vec::with_capacity(data_shards * shard_len);
    for row in rows.iter().take(data_shards) {
        out.extend_from_slice(&row.1);
    }
    Ok(out)
}
