//! `ObjectIO` — the abstract bucket-operations port.
//!
//! Concrete S3/Aliyun-OSS clients are external collaborators out of scope
//! for this crate (see spec §1). [`MemObjectStore`] is the in-memory
//! reference implementation used by tests, property tests, and the demo
//! CLI; it enforces the same multipart invariants a real store would so
//! misuse is caught here rather than only against a live bucket.

use crate::error::{ObjfsError, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Part numbers are 1-indexed and capped, mirroring S3/OSS multipart limits.
pub const MAX_PART_NUMBER: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectMeta {
    pub size: u64,
    pub mtime: u64,
}

#[derive(Debug, Clone)]
pub struct ListEntry {
    pub name: String,
    pub size: u64,
    pub is_prefix: bool,
}

/// Abstract bucket operations. All operations are synchronous and may block
/// for network I/O; see spec §5 for the concurrency model this implies.
pub trait ObjectIO: Send + Sync {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<()>;

    /// Reads up to `dst.len()` bytes starting at `offset`. A short read at
    /// EOF returns the prefix that exists; it is not an error.
    fn get_range(&self, name: &str, dst: &mut [u8], offset: u64) -> Result<usize>;

    fn head(&self, name: &str) -> Result<ObjectMeta>;

    /// Lists keys under `prefix`, stopping prefixes at the next `delimiter`.
    fn list(&self, prefix: &str, delimiter: char) -> Result<Vec<ListEntry>>;

    fn delete(&self, name: &str) -> Result<()>;

    fn copy_object(&self, target: &str, source: &str) -> Result<()>;

    fn zero(&self, name: &str) -> Result<()> {
        self.put(name, &[])
    }

    fn mpu_start(&self, name: &str) -> Result<String>;

    fn upload_part(&self, name: &str, upload_id: &str, part_no: u32, bytes: &[u8]) -> Result<String>;

    /// Copies `byte_range` (or the whole object when `None`) of `src_key`
    /// into `part_no` of the multipart upload identified by `upload_id`.
    fn copy_part(
        &self,
        name: &str,
        upload_id: &str,
        part_no: u32,
        src_key: &str,
        byte_range: Option<(u64, u64)>,
    ) -> Result<String>;

    fn complete(&self, name: &str, upload_id: &str, parts: &[(u32, String)]) -> Result<()>;

    fn abort(&self, name: &str, upload_id: &str) -> Result<()>;
}

fn check_part_no(part_no: u32) -> Result<()> {
    if part_no < 1 || part_no > MAX_PART_NUMBER {
        return Err(ObjfsError::Invalid(format!(
            "part_no {part_no} out of range [1, {MAX_PART_NUMBER}]"
        )));
    }
    Ok(())
}

struct PendingUpload {
    name: String,
    parts: HashMap<u32, Vec<u8>>,
}

struct MemStoreState {
    objects: HashMap<String, (Vec<u8>, u64)>,
    uploads: HashMap<String, PendingUpload>,
    next_upload_id: u64,
}

/// In-memory `ObjectIO` implementation. Never used in production; this is
/// the reference port implementation for tests and the demo CLI.
pub struct MemObjectStore {
    state: Mutex<MemStoreState>,
}

impl Default for MemObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemObjectStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemStoreState {
                objects: HashMap::new(),
                uploads: HashMap::new(),
                next_upload_id: 1,
            }),
        }
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Test/diagnostic helper: every object key currently stored.
    pub fn keys(&self) -> Vec<String> {
        let st = self.state.lock().unwrap();
        st.objects.keys().cloned().collect()
    }
}

impl ObjectIO for MemObjectStore {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        st.objects.insert(name.to_string(), (bytes.to_vec(), Self::now()));
        Ok(())
    }

    fn get_range(&self, name: &str, dst: &mut [u8], offset: u64) -> Result<usize> {
        let st = self.state.lock().unwrap();
        let (data, _) = st
            .objects
            .get(name)
            .ok_or_else(|| ObjfsError::NotFound(name.to_string()))?;
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = dst.len().min(data.len() - offset);
        dst[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn head(&self, name: &str) -> Result<ObjectMeta> {
        let st = self.state.lock().unwrap();
        let (data, mtime) = st
            .objects
            .get(name)
            .ok_or_else(|| ObjfsError::NotFound(name.to_string()))?;
        Ok(ObjectMeta {
            size: data.len() as u64,
            mtime: *mtime,
        })
    }

    fn list(&self, prefix: &str, delimiter: char) -> Result<Vec<ListEntry>> {
        let st = self.state.lock().unwrap();
        let mut prefixes = std::collections::BTreeSet::new();
        let mut entries = Vec::new();
        for (key, (data, _)) in st.objects.iter() {
            if let Some(rest) = key.strip_prefix(prefix) {
                if let Some(idx) = rest.find(delimiter) {
                    prefixes.insert(rest[..=idx].to_string());
                } else {
                    entries.push(ListEntry {
                        name: key.clone(),
                        size: data.len() as u64,
                        is_prefix: false,
                    });
                }
            }
        }
        for p in prefixes {
            entries.push(ListEntry {
                name: format!("{prefix}{p}"),
                size: 0,
                is_prefix: true,
            });
        }
        Ok(entries)
    }

    fn delete(&self, name: &str) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        st.objects.remove(name);
        Ok(())
    }

    fn copy_object(&self, target: &str, source: &str) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        let data = st
            .objects
            .get(source)
            .ok_or_else(|| ObjfsError::NotFound(source.to_string()))?
            .0
            .clone();
        st.objects.insert(target.to_string(), (data, Self::now()));
        Ok(())
    }

    fn mpu_start(&self, name: &str) -> Result<String> {
        let mut st = self.state.lock().unwrap();
        let id = format!("upload-{}", st.next_upload_id);
        st.next_upload_id += 1;
        st.uploads.insert(
            id.clone(),
            PendingUpload {
                name: name.to_string(),
                parts: HashMap::new(),
            },
        );
        Ok(id)
    }

    fn upload_part(&self, name: &str, upload_id: &str, part_no: u32, bytes: &[u8]) -> Result<String> {
        check_part_no(part_no)?;
        let mut st = self.state.lock().unwrap();
        let upload = st
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| ObjfsError::NotFound(format!("upload {upload_id}")))?;
        if upload.name != name {
            return Err(ObjfsError::Invalid("upload_id belongs to a different object".into()));
        }
        upload.parts.insert(part_no, bytes.to_vec());
        Ok(format!("etag-{part_no}"))
    }

    fn copy_part(
        &self,
        name: &str,
        upload_id: &str,
        part_no: u32,
        src_key: &str,
        byte_range: Option<(u64, u64)>,
    ) -> Result<String> {
        check_part_no(part_no)?;
        let mut st = self.state.lock().unwrap();
        let src = st
            .objects
            .get(src_key)
            .ok_or_else(|| ObjfsError::NotFound(src_key.to_string()))?
            .0
            .clone();
        let bytes = match byte_range {
            Some((start, end)) => {
                let start = start as usize;
                let end = (end as usize).min(src.len());
                if start > end {
                    return Err(ObjfsError::Invalid(format!("invalid byte range {start}..{end}")));
                }
                src[start..end].to_vec()
            }
            None => src,
        };
        let upload = st
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| ObjfsError::NotFound(format!("upload {upload_id}")))?;
        if upload.name != name {
            return Err(ObjfsError::Invalid("upload_id belongs to a different object".into()));
        }
        upload.parts.insert(part_no, bytes);
        Ok(format!("etag-{part_no}"))
    }

    fn complete(&self, name: &str, upload_id: &str, parts: &[(u32, String)]) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        let upload = st
            .uploads
            .remove(upload_id)
            .ok_or_else(|| ObjfsError::NotFound(format!("upload {upload_id}")))?;
        if upload.name != name {
            return Err(ObjfsError::Invalid("upload_id belongs to a different object".into()));
        }
        let mut assembled = Vec::new();
        for (part_no, _etag) in parts {
            let chunk = upload
                .parts
                .get(part_no)
                .ok_or_else(|| ObjfsError::Invalid(format!("missing part {part_no}")))?;
            assembled.extend_from_slice(chunk);
        }
        st.objects.insert(name.to_string(), (assembled, Self::now()));
        Ok(())
    }

    fn abort(&self, name: &str, upload_id: &str) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        if let Some(upload) = st.uploads.remove(upload_id) {
            if upload.name != name {
                return Err(ObjfsError::Invalid("upload_id belongs to a different object".into()));
            }
        }
        Ok(())
    }
}
