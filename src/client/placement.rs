use crate::core::DocId;

/// Computes a stable position in `[0, 1)` for a document id using FNV-1a.
///
/// Stands in for the server's hashed shard-key space: the same id always lands
/// on the same position, and distinct ids spread uniformly.
pub fn stable_position(id: &DocId) -> f64 {
    let mut hash = 14695981039346656037u64;
    let mut feed = |bytes: &[u8]| {
        for byte in bytes {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(1099511628211);
        }
    };
    match id {
        DocId::Number(n) => {
            feed(&[0x01]);
            feed(&n.to_bits().to_be_bytes());
        }
        DocId::Object(hex) => {
            feed(&[0x07]);
            feed(hex.as_bytes());
        }
    }
    (avalanche(hash) >> 11) as f64 / (1u64 << 53) as f64
}

/// 64-bit finalizer from MurmurHash3. FNV-1a alone leaves the high bits
/// nearly unchanged for ids that differ only in their last bytes.
fn avalanche(mut hash: u64) -> u64 {
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xff51afd7ed558ccd);
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xc4ceb93fe53f00b5);
    hash ^ (hash >> 33)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_is_stable_and_in_range() {
        let id = DocId::Object("65a000000000000000000001".into());
        let first = stable_position(&id);
        assert_eq!(first, stable_position(&id));
        assert!((0.0..1.0).contains(&first));
        assert_ne!(first, stable_position(&DocId::Number(0.5)));
    }

    #[test]
    fn test_positions_spread_over_quarters() {
        let mut buckets = [0usize; 4];
        for i in 0..4_000u64 {
            let id = DocId::Object(format!("{:024x}", i));
            buckets[(stable_position(&id) * 4.0) as usize] += 1;
        }
        for count in buckets {
            assert!(count > 800, "skewed buckets: {buckets:?}");
        }
    }

    #[test]
    fn test_trailing_byte_ids_spread() {
        // Object ids minted in the same second differ only in their counter.
        let mut buckets = [0usize; 4];
        for counter in 1..=4_000u64 {
            let id = DocId::Object(format!("{:08x}{:016x}", 0x68f0_0000u32, counter));
            buckets[(stable_position(&id) * 4.0) as usize] += 1;
        }
        for count in buckets {
            assert!(count > 800, "skewed buckets: {buckets:?}");
        }
    }
}
