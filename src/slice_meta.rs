//! `SliceMeta` — the persisted side-car record naming a sliced file's
//! slices, their count, and the trailing slice's length.
//!
//! Encoded as a 2-byte magic (`0x01 0x00`) followed by a `serde_json`
//! object. A keyed text encoding is self-describing enough to survive
//! field-order or field-addition changes, matching the side-car convention
//! the teacher repo uses for its own index records.

use crate::error::{ObjfsError, Result};
use serde::{Deserialize, Serialize};

pub const META_MAGIC: [u8; 2] = [0x01, 0x00];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SliceMeta {
    pub slice_size: u64,
    pub slice_count: u64,
    pub cur_slice_name: String,
    pub cur_slice_len: u64,
    pub file_len: u64,
}

impl SliceMeta {
    pub fn new_simple(path: &str, len: u64) -> Self {
        Self {
            slice_size: 0,
            slice_count: 0,
            cur_slice_name: path.to_string(),
            cur_slice_len: len,
            file_len: len,
        }
    }

    /// Invariant I1: `file_len == slice_count * slice_size + cur_slice_len`.
    pub fn check_length_identity(&self) -> Result<()> {
        if self.slice_count == 0 {
            return Ok(());
        }
        let expected = self
            .slice_count
            .checked_mul(self.slice_size)
            .and_then(|v| v.checked_add(self.cur_slice_len))
            .ok_or_else(|| ObjfsError::Inconsistent("slice length overflow".into()))?;
        if expected != self.file_len {
            return Err(ObjfsError::Inconsistent(format!(
                "file_len {} != slice_count*slice_size + cur_slice_len {}",
                self.file_len, expected
            )));
        }
        Ok(())
    }

    pub fn sealed_slice_key(path: &str, n: u64) -> String {
        format!("$slice$/{path}/files/{n}.dat")
    }

    pub fn meta_key(path: &str) -> String {
        format!("$slice$/{path}/meta")
    }

    pub fn slices_prefix(path: &str) -> String {
        format!("$slice$/{path}/files/")
    }

    /// Invariant I3: naming of the tail object given `slice_count`.
    pub fn expected_tail_name(path: &str, slice_count: u64) -> String {
        if slice_count == 0 {
            path.to_string()
        } else {
            Self::sealed_slice_key(path, slice_count)
        }
    }

    /// Encodes as `magic (2) || crc32 of body (4, little-endian) || body`.
    /// The CRC catches torn writes of the meta object itself — a half
    /// written side-car is the one failure mode `SliceFile::open` cannot
    /// tell apart from a valid-but-stale one by size alone.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(self)
            .map_err(|e| ObjfsError::Internal(format!("encoding slice meta: {e}")))?;
        let crc = crc32fast::hash(&body);
        let mut out = Vec::with_capacity(2 + 4 + body.len());
        out.extend_from_slice(&META_MAGIC);
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 6 || bytes[0..2] != META_MAGIC {
            return Err(ObjfsError::Inconsistent("bad slice meta magic".into()));
        }
        let crc = u32::from_le_bytes(bytes[2..6].try_into().unwrap());
        let body = &bytes[6..];
        if crc32fast::hash(body) != crc {
            return Err(ObjfsError::Inconsistent("slice meta CRC mismatch".into()));
        }
        serde_json::from_slice(body)
            .map_err(|e| ObjfsError::Inconsistent(format!("decoding slice meta: {e}")))
    }
}
