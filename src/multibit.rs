//! Stand-in for the multibit / sparse-iterator bit-vector encoder.
//!
//! The real bit-vector encoder is an external collaborator (see the crate-level Non-goals):
//! production builds pick a packed representation tuned for the number of set keys and the
//! target's SIMD width. This crate only needs *some* encoder to produce bit-exact, testable
//! bytes for [`OpCode::SparseIterBegin`](crate::opcode::OpCode::SparseIterBegin) and its
//! siblings during assembly, so it ships a minimal one-bit-per-key encoder behind the
//! [`MultibitEncoder`] trait and lets callers supply a different one without touching the IR.

use crate::blob::Blob;
use crate::error::Result;

/// Encodes the set of keys a sparse iterator should visit into the auxiliary blob.
pub trait MultibitEncoder {
    /// Write a bit-vector covering `key_count` keys, with `keys` (strictly ascending, each
    /// `< key_count`) set, into `blob`. Returns the blob-relative offset of the encoded
    /// bit-vector.
    fn encode(&self, keys: &[u32], key_count: u32, blob: &mut Blob) -> Result<u32>;
}

/// A simple one-bit-per-key encoder: `ceil(key_count / 8)` bytes, little-endian bit order.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenseMultibitEncoder;

impl MultibitEncoder for DenseMultibitEncoder {
    fn encode(&self, keys: &[u32], key_count: u32, blob: &mut Blob) -> Result<u32> {
        let num_bytes = (key_count as usize + 7) / 8;
        let mut bits = vec![0u8; num_bytes];
        for &key in keys {
            debug_assert!(key < key_count, "sparse iterator key out of range");
            bits[(key / 8) as usize] |= 1 << (key % 8);
        }
        blob.write_aligned(&bits, 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sets_exactly_the_requested_bits() {
        let mut blob = Blob::new();
        let offset = DenseMultibitEncoder
            .encode(&[3, 7, 8], 16, &mut blob)
            .unwrap();
        let bytes = &blob.as_bytes()[offset as usize..offset as usize + 2];
        assert_eq!(bytes[0], (1 << 3) | (1 << 7));
        assert_eq!(bytes[1], 1);
    }
}
