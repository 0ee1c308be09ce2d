//! Fixed-size circular sample arena
//!
//! Copies runs of samples into and out of a fixed buffer, wrapping at the end
//! of the buffer. The arena holds no cursors and no locks: callers own their
//! read and write offsets and are responsible for never letting a writer
//! overtake a reader.

use tracing::debug;

/// Copy `src` into `arena` starting at `offset`, wrapping at the end
///
/// Returns the offset following the last element written. A run longer than
/// the arena keeps only its last `arena.len()` elements.
pub fn write_wrapped<T: Copy>(arena: &mut [T], src: &[T], offset: usize) -> usize {
    let size = arena.len();
    if size == 0 || src.is_empty() {
        return offset;
    }
    let mut offset = offset % size;
    let mut src = src;
    if src.len() > size {
        debug!(
            "Arena write of {} elements exceeds arena size {}, keeping tail",
            src.len(),
            size
        );
        let skipped = src.len() - size;
        offset = (offset + skipped) % size;
        src = &src[skipped..];
    }

    let first = src.len().min(size - offset);
    arena[offset..offset + first].copy_from_slice(&src[..first]);
    let rest = src.len() - first;
    if rest > 0 {
        arena[..rest].copy_from_slice(&src[first..]);
    }
    (offset + src.len()) % size
}

/// Fill `dst` from `arena` starting at `offset`, wrapping at the end
///
/// Returns the offset following the last element read. At most
/// `arena.len()` elements are read; any excess in `dst` is left untouched.
pub fn read_wrapped<T: Copy>(dst: &mut [T], arena: &[T], offset: usize) -> usize {
    let size = arena.len();
    if size == 0 || dst.is_empty() {
        return offset;
    }
    let offset = offset % size;
    let n = dst.len().min(size);

    let first = n.min(size - offset);
    dst[..first].copy_from_slice(&arena[offset..offset + first]);
    let rest = n - first;
    if rest > 0 {
        dst[first..n].copy_from_slice(&arena[..rest]);
    }
    (offset + n) % size
}

/// Write `n` samples of `sample_size` bytes from `src` into a byte arena
///
/// `offset` and the returned offset are byte offsets.
pub fn write(dst: &mut [u8], src: &[u8], offset: usize, n: usize, sample_size: usize) -> usize {
    let bytes = (n * sample_size).min(src.len());
    write_wrapped(dst, &src[..bytes], offset)
}

/// Read `n` samples of `sample_size` bytes from a byte arena into `dst`
pub fn read(dst: &mut [u8], src: &[u8], offset: usize, n: usize, sample_size: usize) -> usize {
    let bytes = (n * sample_size).min(dst.len());
    read_wrapped(&mut dst[..bytes], src, offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_without_wrap() {
        let mut arena = [0u8; 8];
        let next = write(&mut arena, &[1, 2, 3, 4], 2, 2, 2);
        assert_eq!(next, 6);
        assert_eq!(arena, [0, 0, 1, 2, 3, 4, 0, 0]);
    }

    #[test]
    fn test_write_wraps_at_end() {
        let mut arena = [0u8; 8];
        let next = write(&mut arena, &[1, 2, 3, 4, 5, 6], 6, 3, 2);
        assert_eq!(next, 4);
        assert_eq!(arena, [3, 4, 5, 6, 0, 0, 1, 2]);
    }

    #[test]
    fn test_roundtrip_at_every_offset_and_length() {
        let size = 24;
        let src: Vec<u8> = (0..size as u8).map(|b| b.wrapping_mul(7).wrapping_add(3)).collect();
        for offset in 0..size {
            for n in 0..=size {
                let mut arena = vec![0xAAu8; size];
                let after_write = write(&mut arena, &src, offset, n, 1);
                assert_eq!(after_write, (offset + n) % size);

                let mut out = vec![0u8; n];
                let after_read = read(&mut out, &arena, offset, n, 1);
                assert_eq!(after_read, after_write);
                assert_eq!(&out[..], &src[..n], "offset {} n {}", offset, n);
            }
        }
    }

    #[test]
    fn test_typed_float_roundtrip() {
        let mut arena = vec![0.0f32; 5];
        let next = write_wrapped(&mut arena, &[0.1, 0.2, 0.3], 4);
        assert_eq!(next, 2);
        let mut out = [0.0f32; 3];
        assert_eq!(read_wrapped(&mut out, &arena, 4), 2);
        assert_eq!(out, [0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_oversized_write_keeps_tail() {
        let mut arena = [0u8; 4];
        let next = write_wrapped(&mut arena, &[1, 2, 3, 4, 5, 6], 0);
        assert_eq!(next, 2);
        // Reading the last 4 written elements back from where they start
        let mut out = [0u8; 4];
        read_wrapped(&mut out, &arena, 2);
        assert_eq!(out, [3, 4, 5, 6]);
    }

    #[test]
    fn test_empty_arena_is_noop() {
        let mut arena: [u8; 0] = [];
        assert_eq!(write(&mut arena, &[1, 2], 5, 1, 2), 5);
        let mut out = [0u8; 2];
        assert_eq!(read(&mut out, &arena, 3, 1, 2), 3);
    }
}
