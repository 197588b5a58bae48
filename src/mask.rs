//! Payload masking (RFC 6455 section 5.3).

/// Mask or unmask a byte run in place.
///
/// Each `buf[i]` is XORed with `key[(offset + i) % 4]`. Masking is its own
/// inverse, so the same call unmasks.
#[inline]
pub(crate) fn apply_mask(buf: &mut [u8], key: [u8; 4], offset: usize) {
    apply_mask_fast(buf, key, offset);
}

/// A safe unoptimized mask application.
#[inline]
fn apply_mask_fallback(buf: &mut [u8], key: [u8; 4], offset: usize) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= key[(offset + i) & 3];
    }
}

/// Faster version of `apply_mask` operating on 8-byte blocks.
///
/// The key pattern is pre-rotated to the starting offset; since the block
/// size is a multiple of the key period, every block and the tail share
/// one phase.
#[inline]
fn apply_mask_fast(buf: &mut [u8], key: [u8; 4], offset: usize) {
    let mut pattern = [0u8; 8];
    for (i, byte) in pattern.iter_mut().enumerate() {
        *byte = key[(offset + i) & 3];
    }

    let mut blocks = buf.chunks_exact_mut(8);
    for block in &mut blocks {
        for (byte, k) in block.iter_mut().zip(pattern) {
            *byte ^= k;
        }
    }
    for (byte, k) in blocks.into_remainder().iter_mut().zip(pattern) {
        *byte ^= k;
    }
}

/// Streaming masker that carries its offset across calls, so a payload
/// masks identically no matter how it is chunked.
#[derive(Debug, Clone)]
pub(crate) struct Masker {
    key: [u8; 4],
    offset: usize,
}

impl Masker {
    pub(crate) fn new(key: [u8; 4]) -> Self {
        Self { key, offset: 0 }
    }

    /// Masks `buf` in place and advances the rolling offset.
    pub(crate) fn apply(&mut self, buf: &mut [u8]) {
        apply_mask(buf, self.key, self.offset);
        self.offset = (self.offset + buf.len()) & 3;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_matches_fallback() {
        let keys = [
            [0x00, 0x00, 0x00, 0x00],
            [0xFF, 0xFF, 0xFF, 0xFF],
            [0x12, 0x34, 0x56, 0x78],
            [0x37, 0xFA, 0x21, 0x3D],
        ];

        for key in keys {
            for size in 0..=64 {
                for offset in 0..4 {
                    let data: Vec<u8> = (0..size).map(|i| (i * 13 + 7) as u8).collect();

                    let mut fallback = data.clone();
                    apply_mask_fallback(&mut fallback, key, offset);

                    let mut fast = data.clone();
                    apply_mask_fast(&mut fast, key, offset);

                    assert_eq!(
                        fallback, fast,
                        "mismatch for key {:?} size {} offset {}",
                        key, size, offset
                    );
                }
            }
        }
    }

    #[test]
    fn test_mask_unmask_identity() {
        let key = [0xAA, 0xBB, 0xCC, 0xDD];
        let original = b"Hello, World! This is a test message with various lengths.";

        let mut data = original.to_vec();
        apply_mask(&mut data, key, 0);
        assert_ne!(&data[..], &original[..]);

        apply_mask(&mut data, key, 0);
        assert_eq!(&data[..], &original[..]);
    }

    #[test]
    fn test_mask_all_zeros_is_noop() {
        let mut data = b"Test data".to_vec();
        apply_mask(&mut data, [0; 4], 2);
        assert_eq!(&data[..], b"Test data");
    }

    #[test]
    fn test_known_vector() {
        // Masked "Hello" from RFC 6455 section 5.7.
        let key = [0x37, 0xFA, 0x21, 0x3D];
        let mut data = [0x7F, 0x9F, 0x4D, 0x51, 0x58];
        apply_mask(&mut data, key, 0);
        assert_eq!(&data, b"Hello");
    }

    #[test]
    fn test_chunking_invariance() {
        // A payload masked in arbitrary chunks through a Masker must equal
        // the payload masked in one shot.
        let key = [0x01, 0x23, 0x45, 0x67];
        let data: Vec<u8> = (0..200).map(|i| (i * 31) as u8).collect();

        let mut whole = data.clone();
        apply_mask(&mut whole, key, 0);

        for split in [1, 2, 3, 4, 5, 7, 63, 199] {
            let mut masker = Masker::new(key);
            let mut chunked = data.clone();
            for chunk in chunked.chunks_mut(split) {
                masker.apply(chunk);
            }
            assert_eq!(whole, chunked, "split size {}", split);
        }
    }

    #[test]
    fn test_rolling_offset_advances() {
        let mut masker = Masker::new([0x11, 0x22, 0x33, 0x44]);
        let mut first = [0xFF; 3];
        let mut second = [0xFF; 3];
        masker.apply(&mut first);
        masker.apply(&mut second);

        assert_eq!(first, [0xFF ^ 0x11, 0xFF ^ 0x22, 0xFF ^ 0x33]);
        assert_eq!(second, [0xFF ^ 0x44, 0xFF ^ 0x11, 0xFF ^ 0x22]);
    }
}
