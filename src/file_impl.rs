//! `FileImpl` — the per-path write pipeline: a [`CacheBuffer`] absorbing
//! appended bytes, staged ~block-sized objects holding full blocks once
//! they drain out of the buffer, and the [`SliceFile`] that periodically
//! absorbs staged blocks via multipart copy.
//!
//! Writes are append-only: every accepted offset must land at or ahead of
//! the buffer's current window (spec'd single-writer discipline is
//! enforced one layer up, by [`crate::file_instance::FileInstanceMgr`]).

use crate::cache_buffer::CacheBuffer;
use crate::config::FsConfig;
use crate::error::Result;
use crate::object_io::ObjectIO;
use crate::slice_file::SliceFile;
use std::sync::Arc;

fn block_key(path: &str, offset: u64) -> String {
    format!("$cache$/{path}/blocks/{offset}")
}

pub struct FileImpl {
    io: Arc<dyn ObjectIO>,
    path: String,
    block_size: u64,
    eager_flush_blocks: usize,
    slice_file: SliceFile,
    buffer: CacheBuffer,
    staged_blocks: Vec<u64>,
}

impl FileImpl {
    pub fn open(io: Arc<dyn ObjectIO>, config: &FsConfig, path: &str, create: bool) -> Result<Self> {
        let slice_file = SliceFile::open(io.clone(), config, path, create)?;
        let base = slice_file.file_len();
        let buffer = CacheBuffer::new(base, config.cache_capacity as usize, config.block_size as usize);
        Ok(Self {
            io,
            path: path.to_string(),
            block_size: config.block_size,
            eager_flush_blocks: config.eager_flush_blocks,
            slice_file,
            buffer,
            staged_blocks: Vec::new(),
        })
    }

    pub fn len(&self) -> u64 {
        self.buffer.max()
    }

    fn committed_len(&self) -> u64 {
        self.slice_file.file_len()
    }

    fn staged_len(&self) -> u64 {
        self.staged_blocks.len() as u64 * self.block_size
    }

    /// Reads up to `dst.len()` bytes starting at `offset`, transparently
    /// spanning the committed slices, staged block objects, and the live
    /// buffer.
    pub fn read(&self, dst: &mut [u8], offset: u64) -> Result<usize> {
        let total = self.len();
        if offset >= total || dst.is_empty() {
            return Ok(0);
        }
        let committed_len = self.committed_len();
        let staged_boundary = committed_len + self.staged_len();

        let mut n = 0usize;
        let mut cur = offset;
        while n < dst.len() && cur < total {
            let got = if cur < committed_len {
                let want = ((committed_len - cur) as usize).min(dst.len() - n);
                self.slice_file.read(&mut dst[n..n + want], cur)?
            } else if cur < staged_boundary {
                let rel = cur - committed_len;
                let block_idx = rel / self.block_size;
                let block_off = committed_len + block_idx * self.block_size;
                let in_block = cur - block_off;
                let want = ((self.block_size - in_block) as usize).min(dst.len() - n);
                self.io
                    .get_range(&block_key(&self.path, block_off), &mut dst[n..n + want], in_block)?
            } else {
                self.buffer.read(&mut dst[n..], cur)
            };
            if got == 0 {
                break;
            }
            n += got;
            cur += got as u64;
        }
        Ok(n)
    }

    /// Appends `data` at `offset`. `offset` must lie within the buffer's
    /// current window (`>= committed_len + staged_len`); writes behind that
    /// point would mutate already-promoted content, which this layer never
    /// allows.
    pub fn write(&mut self, data: &[u8], offset: u64) -> Result<()> {
        let io = self.io.clone();
        let path = self.path.clone();
        let mut newly_staged = Vec::new();
        {
            let mut on_full = |chunk: &[u8], off: u64| -> Result<()> {
                io.put(&block_key(&path, off), chunk)?;
                newly_staged.push(off);
                Ok(())
            };
            self.buffer.write(data, offset, &mut on_full)?;
        }
        self.staged_blocks.extend(newly_staged);
        if self.staged_blocks.len() >= self.eager_flush_blocks {
            self.eager_flush()?;
        }
        Ok(())
    }

    /// Promotes fully staged blocks into the slice file without touching
    /// the buffer's still-partial tail.
    fn eager_flush(&mut self) -> Result<()> {
        if self.staged_blocks.is_empty() {
            return Ok(());
        }
        let blocks = std::mem::take(&mut self.staged_blocks);
        self.slice_file.append(&blocks, &[])?;
        self.delete_staged_objects(&blocks);
        Ok(())
    }

    /// Removes the now-redundant `$cache$/.../blocks/<offset>` objects once
    /// their bytes have been copied into the slice file. Best-effort: a
    /// leftover staged-block object past `file_len` is inert, never read
    /// again, and cleaned up on the next successful append or on unlink.
    fn delete_staged_objects(&self, offsets: &[u64]) {
        for &off in offsets {
            let _ = self.io.delete(&block_key(&self.path, off));
        }
    }

    /// Commits all staged blocks and the buffer's contiguous tail to the
    /// slice file. Out-of-order fragments still ahead of the contiguous
    /// prefix are preserved in the buffer.
    pub fn flush(&mut self) -> Result<()> {
        let blocks = std::mem::take(&mut self.staged_blocks);
        let tail_len = (self.buffer.full() - self.buffer.base()) as usize;
        let mut tail = vec![0u8; tail_len];
        self.buffer.read(&mut tail, self.buffer.base());

        if blocks.is_empty() && tail.is_empty() {
            return Ok(());
        }
        let committed_before = self.buffer.full();
        self.slice_file.append(&blocks, &tail)?;
        self.delete_staged_objects(&blocks);
        self.buffer.compact_to(committed_before)
    }

    /// Truncates the file to zero length, discarding any staged blocks and
    /// buffered, not-yet-committed bytes.
    pub fn truncate_zero(&mut self) -> Result<()> {
        for off in self.staged_blocks.drain(..) {
            let _ = self.io.delete(&block_key(&self.path, off));
        }
        self.slice_file.truncate_zero()?;
        self.buffer.reset(0);
        Ok(())
    }
}
