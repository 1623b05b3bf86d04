//! `CacheBuffer` — the in-memory append accumulator.
//!
//! A single contiguous byte region tracking `base` (logical offset of byte
//! 0), `full` (first logical offset not yet contiguously populated), and
//! `max` (one past the highest populated offset), plus a map of
//! out-of-order fragments awaiting coverage. Whenever `full - base` reaches
//! `block_size`, the leading block is handed to an `on_full` callback and
//! the window slides forward.
//!
//! The ring-less single-buffer design keeps the hot path allocation-free;
//! `pending` lets the filesystem accept out-of-order writes some clients
//! emit (e.g. a PUT that seeks back to patch in a header), while the `full`
//! cursor guarantees only the contiguous prefix is ever promoted.

use crate::error::{ObjfsError, Result};
use std::collections::BTreeMap;

pub trait OnFull: FnMut(&[u8], u64) -> Result<()> {}
impl<F: FnMut(&[u8], u64) -> Result<()>> OnFull for F {}

pub struct CacheBuffer {
    data: Vec<u8>,
    capacity: usize,
    block_size: usize,
    base: u64,
    full: u64,
    max: u64,
    /// offset -> length, for fragments written ahead of `full`.
    pending: BTreeMap<u64, usize>,
}

impl CacheBuffer {
    pub fn new(base_offset: u64, capacity: usize, block_size: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            capacity,
            block_size,
            base: base_offset,
            full: base_offset,
            max: base_offset,
            pending: BTreeMap::new(),
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn full(&self) -> u64 {
        self.full
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn pending_is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Forcibly re-anchor the buffer (used after truncate-to-zero).
    pub fn reset(&mut self, base_offset: u64) {
        self.base = base_offset;
        self.full = base_offset;
        self.max = base_offset;
        self.pending.clear();
    }

    /// Advances `base` to `new_base`, which must lie within the already
    /// contiguous prefix (`base..=full`). Unlike [`CacheBuffer::reset`],
    /// `max` and any out-of-order `pending` fragments beyond `full` survive
    /// the shift — used to drop committed bytes from the window after a
    /// flush without losing writes still in flight ahead of it.
    pub fn compact_to(&mut self, new_base: u64) -> Result<()> {
        if new_base < self.base || new_base > self.full {
            return Err(ObjfsError::Internal(format!(
                "compact target {new_base} outside contiguous prefix [{}, {}]",
                self.base, self.full
            )));
        }
        let shift = (new_base - self.base) as usize;
        if shift > 0 {
            let remaining = (self.max - self.base) as usize - shift;
            self.data.copy_within(shift..shift + remaining, 0);
            self.base = new_base;
        }
        Ok(())
    }

    /// Returns up to `dst.len()` bytes from `offset >= base`; `0` if
    /// `offset < base` or `offset >= max`.
    pub fn read(&self, dst: &mut [u8], offset: u64) -> usize {
        if offset < self.base || offset >= self.max {
            return 0;
        }
        let start = (offset - self.base) as usize;
        let avail = (self.max - offset) as usize;
        let n = dst.len().min(avail);
        dst[..n].copy_from_slice(&self.data[start..start + n]);
        n
    }

    /// Writes `data` at `offset`, invoking `on_full` for every full
    /// `block_size` region that becomes contiguous as a result. Returns
    /// the number of blocks flushed. Fails with `Internal` if `offset <
    /// base` or the write would start beyond `capacity`.
    pub fn write(&mut self, data: &[u8], offset: u64, on_full: &mut dyn OnFull) -> Result<usize> {
        if offset < self.base {
            return Err(ObjfsError::Internal(format!(
                "write offset {offset} precedes buffer base {}",
                self.base
            )));
        }
        let start = (offset - self.base) as usize;
        if start >= self.capacity {
            return Err(ObjfsError::Internal(format!(
                "write offset {offset} exceeds buffer capacity window (base {}, capacity {})",
                self.base, self.capacity
            )));
        }

        let n = data.len().min(self.capacity - start);
        self.data[start..start + n].copy_from_slice(&data[..n]);

        let end = offset + n as u64;
        if end > self.max {
            self.max = end;
        }

        if offset <= self.full && end > self.full {
            self.full = end;
            self.drain_pending();
        } else if offset > self.full {
            self.pending.insert(offset, n);
        }

        self.flush_full_blocks(on_full)
    }

    /// Greedily advances `full` using fragments recorded in `pending`.
    fn drain_pending(&mut self) {
        loop {
            let mut advanced = false;
            let mut consumed = Vec::new();
            for (&start, &len) in self.pending.iter() {
                let end = start + len as u64;
                if start <= self.full && end > self.full {
                    self.full = end;
                    advanced = true;
                }
                if end <= self.full {
                    consumed.push(start);
                }
            }
            for k in consumed {
                self.pending.remove(&k);
            }
            if !advanced {
                break;
            }
        }
    }

    fn flush_full_blocks(&mut self, on_full: &mut dyn OnFull) -> Result<usize> {
        let mut flushed = 0usize;
        while (self.full - self.base) as usize >= self.block_size {
            on_full(&self.data[..self.block_size], self.base)?;
            let remaining = self.max - self.base - self.block_size as u64;
            self.data.copy_within(self.block_size..self.block_size + remaining as usize, 0);
            self.base += self.block_size as u64;
            flushed += 1;
        }
        Ok(flushed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &[u8], _: u64) -> Result<()> {
        Ok(())
    }

    #[test]
    fn sequential_write_advances_full_and_max() {
        let mut buf = CacheBuffer::new(0, 32, 1024);
        let mut cb = noop;
        buf.write(b"hello", 0, &mut cb).unwrap();
        assert_eq!(buf.full(), 5);
        assert_eq!(buf.max(), 5);
        assert!(buf.pending_is_empty());
    }

    #[test]
    fn out_of_order_write_fills_pending_then_drains() {
        let mut buf = CacheBuffer::new(0, 32, 1024);
        let mut cb = noop;
        buf.write(b"world", 5, &mut cb).unwrap();
        assert_eq!(buf.full(), 0);
        assert!(!buf.pending_is_empty());

        buf.write(b"hello", 0, &mut cb).unwrap();
        assert_eq!(buf.full(), 10);
        assert!(buf.pending_is_empty());

        let mut out = [0u8; 10];
        buf.read(&mut out, 0);
        assert_eq!(&out, b"helloworld");
    }

    #[test]
    fn full_block_triggers_handler_and_slides_base() {
        let mut buf = CacheBuffer::new(0, 16, 4);
        let mut seen = Vec::new();
        let mut cb = |chunk: &[u8], off: u64| {
            seen.push((off, chunk.to_vec()));
            Ok(())
        };
        let n = buf.write(b"abcdefgh", 0, &mut cb).unwrap();
        assert_eq!(n, 2);
        assert_eq!(seen[0], (0, b"abcd".to_vec()));
        assert_eq!(seen[1], (4, b"efgh".to_vec()));
        assert_eq!(buf.base(), 8);
    }

    #[test]
    fn handler_failure_does_not_advance_base() {
        let mut buf = CacheBuffer::new(0, 16, 4);
        let mut cb = |_: &[u8], _: u64| Err(ObjfsError::Io("boom".into()));
        let err = buf.write(b"abcd", 0, &mut cb);
        assert!(err.is_err());
        assert_eq!(buf.base(), 0);
        assert_eq!(buf.full(), 4);
    }

    #[test]
    fn write_before_base_is_rejected() {
        let mut buf = CacheBuffer::new(10, 16, 4);
        let mut cb = noop;
        let err = buf.write(b"x", 5, &mut cb).unwrap_err();
        assert!(matches!(err, ObjfsError::Internal(_)));
    }

    #[test]
    fn reset_clears_pending_and_reanchors() {
        let mut buf = CacheBuffer::new(0, 32, 1024);
        let mut cb = noop;
        buf.write(b"world", 5, &mut cb).unwrap();
        assert!(!buf.pending_is_empty());
        buf.reset(100);
        assert_eq!(buf.base(), 100);
        assert_eq!(buf.full(), 100);
        assert_eq!(buf.max(), 100);
        assert!(buf.pending_is_empty());
    }

    #[test]
    fn compact_to_preserves_pending_fragments() {
        let mut buf = CacheBuffer::new(0, 32, 1024);
        let mut cb = noop;
        buf.write(b"AB", 0, &mut cb).unwrap();
        buf.write(b"EF", 8, &mut cb).unwrap(); // out-of-order, ahead of `full`
        assert_eq!(buf.full(), 2);
        assert_eq!(buf.max(), 10);

        buf.compact_to(2).unwrap();
        assert_eq!(buf.base(), 2);
        assert_eq!(buf.full(), 2);
        assert_eq!(buf.max(), 10);
        assert!(!buf.pending_is_empty());

        buf.write(b"CD", 2, &mut cb).unwrap();
        assert_eq!(buf.full(), 4);
    }

    #[test]
    fn compact_to_rejects_target_past_full() {
        let mut buf = CacheBuffer::new(0, 32, 1024);
        let err = buf.compact_to(5).unwrap_err();
        assert!(matches!(err, ObjfsError::Internal(_)));
    }

    use proptest::prop_assert_eq;

    proptest::proptest! {
        #[test]
        fn permutation_of_contiguous_stream_converges(len in 1usize..40, seed in 0u64..50) {
            let stream: Vec<u8> = (0..len as u32).map(|i| (i % 251) as u8).collect();
            // Split into fixed-size pieces, then shuffle the piece order deterministically.
            let piece_len = 3usize;
            let mut pieces: Vec<(usize, &[u8])> = stream.chunks(piece_len)
                .enumerate()
                .map(|(i, c)| (i * piece_len, c))
                .collect();
            // Deterministic pseudo-shuffle keyed on `seed`.
            for i in (1..pieces.len()).rev() {
                let j = (seed as usize).wrapping_mul(2654435761).wrapping_add(i) % (i + 1);
                pieces.swap(i, j);
            }

            let mut buf = CacheBuffer::new(0, len + 16, 1 << 20);
            let mut cb = noop;
            for (off, piece) in &pieces {
                buf.write(piece, *off as u64, &mut cb).unwrap();
            }

            prop_assert_eq!(buf.full(), len as u64);
            let mut out = vec![0u8; len];
            buf.read(&mut out, 0);
            prop_assert_eq!(out, stream);
        }
    }
}
