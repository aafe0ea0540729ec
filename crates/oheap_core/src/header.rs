//! Heap header stored at the start of the device's caller header.
//!
//! ```text
//! offset  size  field
//! 0       4     heap_base (u32 LE)
//! 4       4     heap_height (u32 LE)
//! 8       4     blocks_per_bucket (u32 LE)
//! 12      ..    caller header bytes
//! ```

use crate::error::{HeapError, HeapResult};
use crate::heap::VirtualHeap;

/// Size of the heap header in bytes.
pub const HEAP_HEADER_SIZE: usize = 12;

/// Encodes the heap shape followed by the caller's header.
pub(crate) fn encode(heap: &VirtualHeap, header_data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEAP_HEADER_SIZE + header_data.len());
    out.extend_from_slice(&heap.heap_base().to_le_bytes());
    out.extend_from_slice(&heap.heap_height().to_le_bytes());
    out.extend_from_slice(&heap.blocks_per_bucket().to_le_bytes());
    out.extend_from_slice(header_data);
    out
}

/// Decodes a heap header, returning the heap and the caller's header.
pub(crate) fn decode(bytes: &[u8]) -> HeapResult<(VirtualHeap, &[u8])> {
    if bytes.len() < HEAP_HEADER_SIZE {
        return Err(HeapError::invalid_format(format!(
            "header is {} bytes, need at least {HEAP_HEADER_SIZE}",
            bytes.len()
        )));
    }
    let field = |at: usize| {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes[at..at + 4]);
        u32::from_le_bytes(raw)
    };

    let heap = VirtualHeap::new(field(0), field(4), field(8)).map_err(|err| match err {
        HeapError::Config { message } => HeapError::invalid_format(message),
        other => other,
    })?;
    Ok((heap, &bytes[HEAP_HEADER_SIZE..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_positions() {
        let heap = VirtualHeap::new(3, 4, 2).unwrap();
        let bytes = encode(&heap, b"xyz");
        assert_eq!(bytes.len(), HEAP_HEADER_SIZE + 3);
        assert_eq!(&bytes[0..4], &3u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &4u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &2u32.to_le_bytes());

        let (decoded, rest) = decode(&bytes).unwrap();
        assert_eq!(decoded, heap);
        assert_eq!(rest, b"xyz");
    }

    #[test]
    fn short_header_rejected() {
        assert!(matches!(
            decode(&[2, 0, 0, 0]),
            Err(HeapError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn bad_shape_rejected() {
        let mut bytes = encode(&VirtualHeap::new(2, 1, 1).unwrap(), &[]);
        bytes[0] = 1;
        assert!(matches!(decode(&bytes), Err(HeapError::InvalidFormat { .. })));
    }
}
