//! Deterministic ceiling-chunk split and its inverse merge, used when
//! Reed-Solomon is disabled.

/// Split `data` into `count` chunks of `ceil(len / count)` bytes; the
/// last chunk may be shorter, and chunks past the end of short inputs
/// are empty.
pub fn split(data: &[u8], count: usize) -> Vec<Vec<u8>> {
    let chunk = data.len().div_ceil(count);
    (0..count)
        .map(|i| {
            let start = usize::min(i * chunk, data.len());
            let end = usize::min(start + chunk, data.len());
            data[start..end].to_vec()
        })
        .collect()
}

/// Concatenate chunks in index order.
pub fn merge(chunks: &[Vec<u8>]) -> Vec<u8> {
    let total = chunks.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(total);
    for chunk in chunks {
        out.extend_from_slice(chunk);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eleven_bytes_into_four_chunks() {
        let chunks = split(b"hello world", 4);
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 3, 2]);
    }

    #[test]
    fn merge_inverts_split() {
        let data: Vec<u8> = (0..=255).cycle().take(10_000).collect();
        for count in [1, 2, 3, 7, 10, 64] {
            let chunks = split(&data, count);
            assert_eq!(chunks.len(), count);
            assert_eq!(merge(&chunks), data);
        }
    }

    #[test]
    fn short_input_leaves_trailing_chunks_empty() {
        let chunks = split(&[1, 2], 4);
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![1, 1, 0, 0]);
        assert_eq!(merge(&chunks), vec![1, 2]);
    }

    #[test]
    fn empty_input_yields_empty_chunks() {
        let chunks = split(&[], 5);
        assert_eq!(chunks.len(), 5);
        assert!(chunks.iter().all(Vec::is_empty));
    }
}
