//! `SliceFile` — owns the slice meta record, performs crash recovery,
//! serves reads across slice boundaries, and executes `append` by merging
//! staged block objects and a residual buffer into the tail slice via
//! server-side multipart copy.

use crate::config::FsConfig;
use crate::error::{ObjfsError, Result};
use crate::object_io::ObjectIO;
use crate::slice_meta::SliceMeta;
use std::sync::Arc;
use tracing::{debug, warn};

fn block_key(path: &str, offset: u64) -> String {
    format!("$cache$/{path}/blocks/{offset}")
}

fn tmp_key2(path: &str) -> String {
    format!("$tmp$/{path}.tmp2")
}

fn tmp_key3(path: &str) -> String {
    format!("$tmp$/{path}.tmp3")
}

pub struct SliceFile {
    io: Arc<dyn ObjectIO>,
    path: String,
    block_size: u64,
    slice_size: u64,
    non_sliced: bool,
    slice_count: u64,
    cur_slice_name: String,
    cur_slice_len: u64,
    file_len: u64,
}

impl std::fmt::Debug for SliceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SliceFile")
            .field("path", &self.path)
            .field("block_size", &self.block_size)
            .field("slice_size", &self.slice_size)
            .field("non_sliced", &self.non_sliced)
            .field("slice_count", &self.slice_count)
            .field("cur_slice_name", &self.cur_slice_name)
            .field("cur_slice_len", &self.cur_slice_len)
            .field("file_len", &self.file_len)
            .finish()
    }
}

impl SliceFile {
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    pub fn slice_count(&self) -> u64 {
        self.slice_count
    }

    pub fn cur_slice_len(&self) -> u64 {
        self.cur_slice_len
    }

    pub fn cur_slice_name(&self) -> &str {
        &self.cur_slice_name
    }

    pub fn is_sliced(&self) -> bool {
        !self.non_sliced
    }

    /// Open (or create, when `create` is set) the slice file at `path`,
    /// performing crash recovery per spec §4.4.1.
    pub fn open(io: Arc<dyn ObjectIO>, config: &FsConfig, path: &str, create: bool) -> Result<Self> {
        let meta_key = SliceMeta::meta_key(path);
        let mut dirty = false;

        let mut sf = match io.head(&meta_key) {
            Ok(_) => {
                let meta = Self::load_meta(&io, &meta_key)?;
                if meta.cur_slice_name != SliceMeta::expected_tail_name(path, meta.slice_count) {
                    return Err(ObjfsError::Inconsistent(format!(
                        "tail name {} does not match slice_count {}",
                        meta.cur_slice_name, meta.slice_count
                    )));
                }
                SliceFile {
                    io: io.clone(),
                    path: path.to_string(),
                    block_size: config.block_size,
                    slice_size: meta.slice_size,
                    non_sliced: false,
                    slice_count: meta.slice_count,
                    cur_slice_name: meta.cur_slice_name,
                    cur_slice_len: meta.cur_slice_len,
                    file_len: meta.file_len,
                }
            }
            Err(ObjfsError::NotFound(_)) => {
                let size = match io.head(path) {
                    Ok(m) => m.size,
                    Err(ObjfsError::NotFound(_)) if create => {
                        io.put(path, &[])?;
                        0
                    }
                    Err(e) => return Err(e),
                };
                SliceFile {
                    io: io.clone(),
                    path: path.to_string(),
                    block_size: config.block_size,
                    slice_size: config.slice_size,
                    non_sliced: true,
                    slice_count: 0,
                    cur_slice_name: path.to_string(),
                    cur_slice_len: size,
                    file_len: size,
                }
            }
            Err(e) => return Err(e),
        };

        // Step 4: reconcile the tail object's actual size with meta.
        let tail_meta = sf.io.head(&sf.cur_slice_name)?;
        if tail_meta.size != sf.cur_slice_len {
            let delta = tail_meta.size as i128 - sf.cur_slice_len as i128;
            sf.cur_slice_len = tail_meta.size;
            sf.file_len = (sf.file_len as i128 + delta) as u64;
            dirty = true;
            warn!(path, delta, "recovered tail size mismatch against meta");
        }

        if !sf.non_sliced {
            // Step 5: list sealed slices, each must be exactly slice_size.
            let prefix = SliceMeta::slices_prefix(path);
            let entries = sf.io.list(&prefix, '/')?;
            let mut n = 0u64;
            for e in &entries {
                if e.is_prefix {
                    continue;
                }
                if e.size != sf.slice_size {
                    return Err(ObjfsError::Inconsistent(format!(
                        "sealed slice {} has size {} != slice_size {}",
                        e.name, e.size, sf.slice_size
                    )));
                }
                n += 1;
            }
            if n != sf.slice_count {
                sf.slice_count = n;
                dirty = true;
            }

            let computed = sf
                .slice_count
                .checked_mul(sf.slice_size)
                .and_then(|v| v.checked_add(sf.cur_slice_len))
                .ok_or_else(|| ObjfsError::Inconsistent("slice length overflow during recovery".into()))?;
            if computed > sf.file_len {
                sf.io.zero(&sf.cur_slice_name)?;
                sf.file_len = sf.slice_count * sf.slice_size;
                sf.cur_slice_len = 0;
                dirty = true;
                warn!(path, "discarded torn tail during recovery");
            } else if computed < sf.file_len {
                sf.file_len = computed;
                dirty = true;
            }
        }

        if dirty {
            sf.save_meta_forced()?;
        }

        Ok(sf)
    }

    fn load_meta(io: &Arc<dyn ObjectIO>, meta_key: &str) -> Result<SliceMeta> {
        let meta_size = io.head(meta_key)?.size as usize;
        let mut buf = vec![0u8; meta_size];
        let n = io.get_range(meta_key, &mut buf, 0)?;
        buf.truncate(n);
        SliceMeta::from_bytes(&buf)
    }

    /// Persists the meta object unconditionally. Used by recovery and by
    /// any mutation once `slice_count > 0` (invariant I4).
    fn save_meta_forced(&mut self) -> Result<()> {
        let meta = SliceMeta {
            slice_size: self.slice_size,
            slice_count: self.slice_count,
            cur_slice_name: self.cur_slice_name.clone(),
            cur_slice_len: self.cur_slice_len,
            file_len: self.file_len,
        };
        self.io.put(&SliceMeta::meta_key(&self.path), &meta.to_bytes()?)?;
        self.non_sliced = false;
        Ok(())
    }

    /// Saves the meta record, short-circuiting while `slice_count == 0`
    /// and the file has never been sliced — this avoids creating a meta
    /// object for files that never exceed one slice (spec §9).
    fn save_meta(&mut self) -> Result<()> {
        if self.non_sliced && self.slice_count == 0 {
            return Ok(());
        }
        self.save_meta_forced()
    }

    /// Reads up to `dst.len()` bytes starting at `offset`.
    pub fn read(&self, dst: &mut [u8], offset: u64) -> Result<usize> {
        if offset >= self.file_len {
            return Ok(0);
        }
        if self.slice_count == 0 {
            return self.io.get_range(&self.path, dst, offset);
        }

        let sn = offset / self.slice_size;
        let so = offset % self.slice_size;
        let first_key = if sn < self.slice_count {
            SliceMeta::sealed_slice_key(&self.path, sn)
        } else {
            self.cur_slice_name.clone()
        };
        let want = dst.len().min((self.slice_size - so) as usize);
        let mut n = self.io.get_range(&first_key, &mut dst[..want], so)?;

        if n < dst.len() && sn + 1 <= self.slice_count {
            let next_key = if sn + 1 == self.slice_count {
                self.cur_slice_name.clone()
            } else {
                SliceMeta::sealed_slice_key(&self.path, sn + 1)
            };
            let more = self.io.get_range(&next_key, &mut dst[n..], 0)?;
            n += more;
        }
        Ok(n)
    }

    /// Server-side copy of `[start, end)` of `source` into `target`, via a
    /// single-part multipart upload (valid for any size — the minimum part
    /// size constraint only binds non-last parts).
    fn copy_range(&self, target: &str, source: &str, start: u64, end: u64) -> Result<()> {
        let upload_id = self.io.mpu_start(target)?;
        match self.io.copy_part(target, &upload_id, 1, source, Some((start, end))) {
            Ok(etag) => self.io.complete(target, &upload_id, &[(1, etag)]),
            Err(e) => {
                let _ = self.io.abort(target, &upload_id);
                Err(e)
            }
        }
    }

    /// Assembles `tgt` from an optional remote tail (`rt`, `rt_len` bytes),
    /// zero or more staged block offsets, and a residual buffer, via
    /// multipart upload + copy. Returns the total byte length written.
    fn merge_blocks_and_buffer(
        &self,
        tgt: &str,
        rt: Option<&str>,
        rt_len: u64,
        blocks: &[u64],
        data: &[u8],
    ) -> Result<u64> {
        if rt_len == 0 && blocks.is_empty() {
            self.io.put(tgt, data)?;
            return Ok(data.len() as u64);
        }

        let mut rt_owned: Option<String> = None;
        let mut rt_key = rt;
        let mut rt_len = rt_len;
        let mut blocks = blocks;
        let mut skip_first = false;

        if rt_len > 0 && rt_len < self.block_size && !blocks.is_empty() {
            let rt_src = rt.expect("rt_len > 0 implies rt is Some");
            let mut tail_buf = vec![0u8; rt_len as usize];
            self.io.get_range(rt_src, &mut tail_buf, 0)?;
            let mut first_block = vec![0u8; self.block_size as usize];
            self.io
                .get_range(&block_key(&self.path, blocks[0]), &mut first_block, 0)?;
            tail_buf.extend_from_slice(&first_block);
            let tmp3 = tmp_key3(&self.path);
            self.io.put(&tmp3, &tail_buf)?;
            rt_owned = Some(tmp3);
            rt_key = rt_owned.as_deref();
            rt_len += self.block_size;
            skip_first = true;
        }
        if skip_first {
            blocks = &blocks[1..];
        }

        let upload_id = self.io.mpu_start(tgt)?;
        let result = (|| -> Result<u64> {
            let mut part_no = 1u32;
            let mut parts = Vec::new();
            let mut total = 0u64;

            if rt_len > 0 {
                let src = rt_key.expect("rt_len > 0 implies a source key");
                let full_parts = rt_len / self.block_size;
                let remainder = rt_len % self.block_size;
                let boundaries: Vec<(u64, u64)> = if remainder == 0 {
                    (0..full_parts)
                        .map(|i| (i * self.block_size, (i + 1) * self.block_size))
                        .collect()
                } else if full_parts == 0 {
                    vec![(0, rt_len)]
                } else {
                    let mut v: Vec<(u64, u64)> = (0..full_parts - 1)
                        .map(|i| (i * self.block_size, (i + 1) * self.block_size))
                        .collect();
                    v.push(((full_parts - 1) * self.block_size, rt_len));
                    v
                };
                for (start, end) in boundaries {
                    let etag = self.io.copy_part(tgt, &upload_id, part_no, src, Some((start, end)))?;
                    parts.push((part_no, etag));
                    part_no += 1;
                    total += end - start;
                }
            }

            for &off in blocks {
                if off < self.file_len {
                    debug!(path = %self.path, off, "skipping stale staged block");
                    continue;
                }
                let etag = self
                    .io
                    .copy_part(tgt, &upload_id, part_no, &block_key(&self.path, off), None)?;
                parts.push((part_no, etag));
                part_no += 1;
                total += self.block_size;
            }

            if !data.is_empty() {
                let etag = self.io.upload_part(tgt, &upload_id, part_no, data)?;
                parts.push((part_no, etag));
                total += data.len() as u64;
            }

            self.io.complete(tgt, &upload_id, &parts)?;
            Ok(total)
        })();

        if result.is_err() {
            let _ = self.io.abort(tgt, &upload_id);
        }
        if skip_first {
            let _ = self.io.delete(&tmp_key3(&self.path));
        }
        result
    }

    /// Merges `blocks` (staged-block offsets) and `tail_bytes` (residual
    /// buffer contents) into the tail slice, sealing as many slices as the
    /// resulting length spans.
    pub fn append(&mut self, blocks: &[u64], tail_bytes: &[u8]) -> Result<()> {
        let append_len = blocks.len() as u64 * self.block_size + tail_bytes.len() as u64;
        if append_len == 0 {
            return Ok(());
        }

        if self.cur_slice_len == 0 && append_len < self.slice_size {
            let written = self.merge_blocks_and_buffer(&self.cur_slice_name.clone(), None, 0, blocks, tail_bytes)?;
            self.cur_slice_len += written;
            self.file_len += written;
            self.save_meta()?;
            return Ok(());
        }

        if self.cur_slice_len > 0 && self.cur_slice_len < self.block_size && blocks.is_empty() {
            let mut tail_buf = vec![0u8; self.cur_slice_len as usize];
            self.io.get_range(&self.cur_slice_name, &mut tail_buf, 0)?;
            tail_buf.extend_from_slice(tail_bytes);
            self.io.put(&self.cur_slice_name, &tail_buf)?;
            self.cur_slice_len += tail_bytes.len() as u64;
            self.file_len += tail_bytes.len() as u64;
            self.save_meta()?;
            return Ok(());
        }

        let tmp2 = tmp_key2(&self.path);
        let tmp_total = self.merge_blocks_and_buffer(
            &tmp2,
            Some(&self.cur_slice_name.clone()),
            self.cur_slice_len,
            blocks,
            tail_bytes,
        )?;

        let mut consumed = 0u64;
        while tmp_total - consumed >= self.slice_size {
            let sealed_key = SliceMeta::sealed_slice_key(&self.path, self.slice_count);
            self.copy_range(&sealed_key, &tmp2, consumed, consumed + self.slice_size)?;
            consumed += self.slice_size;
            self.slice_count += 1;
            self.cur_slice_len = 0;
            self.file_len = self.slice_count * self.slice_size;
            self.cur_slice_name = SliceMeta::expected_tail_name(&self.path, self.slice_count);
            self.save_meta_forced()?;
        }

        let remaining = tmp_total - consumed;
        self.copy_range(&self.cur_slice_name.clone(), &tmp2, consumed, tmp_total)?;
        let delta = remaining - self.cur_slice_len;
        self.cur_slice_len = remaining;
        self.file_len += delta;
        self.save_meta()?;

        let _ = self.io.delete(&tmp2);
        Ok(())
    }

    /// Truncates to zero length: resets the object, clears the slice
    /// meta record and deletes it (the file becomes non-sliced again).
    pub fn truncate_zero(&mut self) -> Result<()> {
        self.io.put(&self.path, &[])?;
        if self.slice_count > 0 {
            for n in 0..self.slice_count {
                let _ = self.io.delete(&SliceMeta::sealed_slice_key(&self.path, n));
            }
        }
        if self.cur_slice_name != self.path {
            let _ = self.io.delete(&self.cur_slice_name);
        }
        let _ = self.io.delete(&SliceMeta::meta_key(&self.path));
        self.non_sliced = true;
        self.slice_count = 0;
        self.cur_slice_name = self.path.clone();
        self.cur_slice_len = 0;
        self.file_len = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_io::MemObjectStore;

    fn cfg() -> FsConfig {
        FsConfig::for_tests()
    }

    fn setup() -> (Arc<dyn ObjectIO>, FsConfig) {
        (Arc::new(MemObjectStore::new()), cfg())
    }

    #[test]
    fn open_create_starts_empty_non_sliced() {
        let (io, cfg) = setup();
        let sf = SliceFile::open(io, &cfg, "/a", true).unwrap();
        assert_eq!(sf.file_len(), 0);
        assert!(!sf.is_sliced());
    }

    #[test]
    fn open_missing_without_create_fails() {
        let (io, cfg) = setup();
        let err = SliceFile::open(io, &cfg, "/missing", false).unwrap_err();
        assert!(matches!(err, ObjfsError::NotFound(_)));
    }

    #[test]
    fn small_append_stays_single_slice() {
        let (io, cfg) = setup();
        let mut sf = SliceFile::open(io.clone(), &cfg, "/a", true).unwrap();
        sf.append(&[], b"hello").unwrap();
        assert_eq!(sf.file_len(), 5);
        assert_eq!(sf.slice_count(), 0);
        assert!(io.head(&SliceMeta::meta_key("/a")).is_err());

        let mut buf = [0u8; 5];
        sf.read(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn exactly_one_block_stays_single_slice() {
        let (io, cfg) = setup();
        let mut sf = SliceFile::open(io.clone(), &cfg, "/a", true).unwrap();
        let block_off = 0u64;
        io.put(&format!("$cache$//a/blocks/{block_off}"), &vec![7u8; cfg.block_size as usize])
            .unwrap();
        sf.append(&[block_off], &[]).unwrap();
        assert_eq!(sf.file_len(), cfg.block_size);
        assert_eq!(sf.slice_count(), 0);
        assert_eq!(sf.cur_slice_len(), cfg.block_size);
    }

    #[test]
    fn promotes_to_two_slices() {
        let (io, cfg) = setup();
        let mut sf = SliceFile::open(io.clone(), &cfg, "/a", true).unwrap();

        // slice_size = 4 blocks; write slice_size + 1 block worth of data.
        let blocks_per_slice = (cfg.slice_size / cfg.block_size) as u64;
        let total_blocks = blocks_per_slice + 1;
        let mut offsets = Vec::new();
        for i in 0..total_blocks {
            let off = i * cfg.block_size;
            io.put(&format!("$cache$//a/blocks/{off}"), &vec![(i % 251) as u8; cfg.block_size as usize])
                .unwrap();
            offsets.push(off);
        }
        sf.append(&offsets, &[]).unwrap();

        assert_eq!(sf.slice_count(), 1);
        assert_eq!(sf.cur_slice_len(), cfg.block_size);
        assert_eq!(sf.file_len(), cfg.slice_size + cfg.block_size);
        assert_eq!(sf.cur_slice_name(), "$slice$//a/files/1.dat");
        io.head(&SliceMeta::meta_key("/a")).unwrap();

        let sealed = io.head("$slice$//a/files/0.dat").unwrap();
        assert_eq!(sealed.size, cfg.slice_size);
    }

    #[test]
    fn out_of_order_write_then_read_matches() {
        let (io, cfg) = setup();
        let mut sf = SliceFile::open(io.clone(), &cfg, "/a", true).unwrap();
        sf.append(&[], b"helloworld").unwrap();
        let mut buf = vec![0u8; 10];
        sf.read(&mut buf, 0).unwrap();
        assert_eq!(buf, b"helloworld");
    }

    #[test]
    fn recovery_discards_torn_tail() {
        let (io, cfg) = setup();
        {
            let mut sf = SliceFile::open(io.clone(), &cfg, "/a", true).unwrap();
            sf.append(&[], b"hello").unwrap();
        }
        // Simulate a crash that left the logical object larger than the
        // historical meta's cur_slice_len would imply, by writing past it.
        let mut bigger = b"hello".to_vec();
        bigger.extend_from_slice(b"WORLD");
        io.put("/a", &bigger).unwrap();

        let sf = SliceFile::open(io.clone(), &cfg, "/a", false).unwrap();
        // Non-sliced recovery trusts the live object size.
        assert_eq!(sf.file_len(), 10);
    }

    #[test]
    fn truncate_zero_clears_everything() {
        let (io, cfg) = setup();
        let mut sf = SliceFile::open(io.clone(), &cfg, "/a", true).unwrap();
        let blocks_per_slice = (cfg.slice_size / cfg.block_size) as u64;
        let mut offsets = Vec::new();
        for i in 0..blocks_per_slice + 1 {
            let off = i * cfg.block_size;
            io.put(&format!("$cache$//a/blocks/{off}"), &vec![1u8; cfg.block_size as usize])
                .unwrap();
            offsets.push(off);
        }
        sf.append(&offsets, &[]).unwrap();
        assert!(sf.slice_count() > 0);

        sf.truncate_zero().unwrap();
        assert_eq!(sf.file_len(), 0);
        assert_eq!(sf.slice_count(), 0);
        assert!(io.head(&SliceMeta::meta_key("/a")).is_err());
        assert_eq!(io.head("/a").unwrap().size, 0);
    }
}
