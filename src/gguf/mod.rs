// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! GGUF metadata decoding.
//!
//! Only the header and the typed key-value section are read; tensor data is
//! never touched. Two passes are offered, each over a fresh [`RangeReader`]:
//!
//! - [`parse_params`] collects attention heads, KV heads, block count and
//!   embedding length, stopping as soon as the required trio is known.
//! - [`extract_file_type`] returns the `general.file_type` tag.
//!
//! Values of keys that are not needed are skipped with [`skip_value`], which
//! walks nested arrays without recursion.

pub mod reader;

pub use reader::{HttpRangeSource, RangeReader, RangeSource};

use crate::error::{Error, FormatError, Result};

/// "GGUF" read as a little-endian u32.
pub const GGUF_MAGIC: u32 = 0x4655_4747;

/// Highest container version understood.
pub const MAX_VERSION: u32 = 3;

/// Cap on key and string lengths (1 MiB).
pub const MAX_STRING_LEN: u64 = 1 << 20;

const FILE_TYPE_KEY: &str = "general.file_type";

/// Metadata value kinds, one per wire type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    Bool,
    String,
    Array,
    U64,
    I64,
    F64,
}

impl ValueKind {
    pub fn from_tag(tag: u32) -> Result<Self> {
        Ok(match tag {
            0 => ValueKind::U8,
            1 => ValueKind::I8,
            2 => ValueKind::U16,
            3 => ValueKind::I16,
            4 => ValueKind::U32,
            5 => ValueKind::I32,
            6 => ValueKind::F32,
            7 => ValueKind::Bool,
            8 => ValueKind::String,
            9 => ValueKind::Array,
            10 => ValueKind::U64,
            11 => ValueKind::I64,
            12 => ValueKind::F64,
            other => return Err(FormatError::UnknownType(other).into()),
        })
    }

    /// Encoded width of scalar kinds; `None` for strings and arrays.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            ValueKind::U8 | ValueKind::I8 | ValueKind::Bool => Some(1),
            ValueKind::U16 | ValueKind::I16 => Some(2),
            ValueKind::U32 | ValueKind::I32 | ValueKind::F32 => Some(4),
            ValueKind::U64 | ValueKind::I64 | ValueKind::F64 => Some(8),
            ValueKind::String | ValueKind::Array => None,
        }
    }

    fn is_int32(self) -> bool {
        matches!(self, ValueKind::U32 | ValueKind::I32)
    }
}

/// Architecture parameters needed for memory estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Params {
    pub attention_heads: u32,
    pub kv_heads: u32,
    pub hidden_layers: u32,
    pub hidden_size: u64,
}

/// Container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    /// Absent in version 0 containers.
    pub tensor_count: Option<u64>,
    pub metadata_count: u64,
}

fn read_u32<S: RangeSource>(rr: &mut RangeReader<S>) -> Result<u32> {
    Ok(u32::from_le_bytes(rr.read_array()?))
}

fn read_u64<S: RangeSource>(rr: &mut RangeReader<S>) -> Result<u64> {
    Ok(u64::from_le_bytes(rr.read_array()?))
}

/// Read a `u64` length prefix and check it against [`MAX_STRING_LEN`]
/// before any of the payload is read.
fn read_len<S: RangeSource>(
    rr: &mut RangeReader<S>,
    too_long: fn(u64) -> FormatError,
) -> Result<usize> {
    let len = read_u64(rr)?;
    if len > MAX_STRING_LEN {
        return Err(too_long(len).into());
    }
    Ok(len as usize)
}

fn read_string<S: RangeSource>(rr: &mut RangeReader<S>) -> Result<String> {
    let len = read_len(rr, FormatError::StringTooLong)?;
    let bytes = rr.read_exact(len)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Validate magic and version, then read the counts.
pub fn read_header<S: RangeSource>(rr: &mut RangeReader<S>) -> Result<Header> {
    let magic = read_u32(rr)?;
    if magic != GGUF_MAGIC {
        return Err(FormatError::BadMagic(magic).into());
    }
    let version = read_u32(rr)?;
    if version > MAX_VERSION {
        return Err(FormatError::UnsupportedVersion(version).into());
    }
    let tensor_count = if version >= 1 { Some(read_u64(rr)?) } else { None };
    let metadata_count = read_u64(rr)?;
    Ok(Header {
        version,
        tensor_count,
        metadata_count,
    })
}

/// Read one entry's key and value kind, leaving the cursor on the value.
pub fn read_entry_head<S: RangeSource>(rr: &mut RangeReader<S>) -> Result<(String, ValueKind)> {
    let len = read_len(rr, FormatError::KeyTooLong)?;
    let key_bytes = rr.read_exact(len)?;
    let key = String::from_utf8_lossy(&key_bytes).into_owned();
    let kind = ValueKind::from_tag(read_u32(rr)?)?;
    Ok((key, kind))
}

/// Skip one value of the given kind.
///
/// Nested arrays are walked with an explicit stack of
/// `(element kind, elements left)` frames, so nesting depth is bounded by the
/// data rather than by the call stack.
pub fn skip_value<S: RangeSource>(rr: &mut RangeReader<S>, kind: ValueKind) -> Result<()> {
    let mut frames: Vec<(ValueKind, u64)> = Vec::new();
    let mut next = Some(kind);

    loop {
        if let Some(kind) = next.take() {
            match kind {
                ValueKind::String => {
                    let len = read_len(rr, FormatError::StringTooLong)?;
                    rr.skip(len)?;
                }
                ValueKind::Array => {
                    let elem = ValueKind::from_tag(read_u32(rr)?)?;
                    let count = read_u64(rr)?;
                    frames.push((elem, count));
                }
                scalar => {
                    if let Some(width) = scalar.fixed_width() {
                        rr.skip(width)?;
                    }
                }
            }
        }

        match frames.last_mut() {
            None => return Ok(()),
            Some((_, 0)) => {
                frames.pop();
            }
            Some((elem, left)) => {
                *left -= 1;
                next = Some(*elem);
            }
        }
    }
}

/// Which parameter a key feeds, by exact suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamKey {
    HeadCount,
    HeadCountKv,
    BlockCount,
    EmbeddingLength,
}

impl ParamKey {
    fn classify(key: &str) -> Option<Self> {
        if key.ends_with(".attention.head_count") {
            Some(ParamKey::HeadCount)
        } else if key.ends_with(".attention.head_count_kv") {
            Some(ParamKey::HeadCountKv)
        } else if key.ends_with(".block_count") {
            Some(ParamKey::BlockCount)
        } else if key.ends_with(".embedding_length") {
            Some(ParamKey::EmbeddingLength)
        } else {
            None
        }
    }

    fn accepts(self, kind: ValueKind) -> bool {
        match self {
            ParamKey::HeadCount | ParamKey::HeadCountKv | ParamKey::BlockCount => kind.is_int32(),
            ParamKey::EmbeddingLength => matches!(
                kind,
                ValueKind::U32 | ValueKind::I32 | ValueKind::U64 | ValueKind::I64 | ValueKind::F64
            ),
        }
    }
}

/// Parameters gathered so far while scanning entries.
#[derive(Debug, Default)]
struct ParamsBuilder {
    attention_heads: Option<u32>,
    kv_heads: Option<u32>,
    hidden_layers: Option<u32>,
    hidden_size: Option<u64>,
}

impl ParamsBuilder {
    fn is_complete(&self) -> bool {
        self.attention_heads.is_some() && self.hidden_layers.is_some() && self.hidden_size.is_some()
    }

    fn build(self) -> Option<Params> {
        let attention_heads = self.attention_heads?;
        Some(Params {
            attention_heads,
            kv_heads: self.kv_heads.unwrap_or(attention_heads),
            hidden_layers: self.hidden_layers?,
            hidden_size: self.hidden_size?,
        })
    }

    fn apply<S: RangeSource>(
        &mut self,
        rr: &mut RangeReader<S>,
        param: ParamKey,
        kind: ValueKind,
    ) -> Result<()> {
        match param {
            ParamKey::HeadCount => {
                let v = read_u32(rr)?;
                self.attention_heads = Some(v);
                self.kv_heads.get_or_insert(v);
            }
            ParamKey::HeadCountKv => self.kv_heads = Some(read_u32(rr)?),
            ParamKey::BlockCount => self.hidden_layers = Some(read_u32(rr)?),
            ParamKey::EmbeddingLength => {
                // 64-bit kinds, the float included, are taken as their raw bits.
                let v = match kind.fixed_width() {
                    Some(8) => read_u64(rr)?,
                    _ => u64::from(read_u32(rr)?),
                };
                self.hidden_size = Some(v);
            }
        }
        Ok(())
    }
}

/// Scan metadata for the architecture parameters.
///
/// Returns as soon as head count, block count and embedding length are all
/// known; entries after that point are never read. If no explicit KV head
/// count was seen, `kv_heads` equals `attention_heads`.
pub fn parse_params<S: RangeSource>(rr: &mut RangeReader<S>) -> Result<Params> {
    let header = read_header(rr)?;
    let mut builder = ParamsBuilder::default();

    for _ in 0..header.metadata_count {
        let (key, kind) = read_entry_head(rr)?;
        match ParamKey::classify(&key) {
            Some(param) if param.accepts(kind) => builder.apply(rr, param, kind)?,
            _ => skip_value(rr, kind)?,
        }
        if builder.is_complete() {
            break;
        }
    }

    builder.build().ok_or(Error::IncompleteMetadata)
}

/// Find `general.file_type`.
///
/// 32-bit numeric values come back as `FTYPE_<n>`, strings upper-cased, any
/// other kind as an empty string. The scan stops at the first occurrence and
/// yields an empty string if the key is absent.
pub fn extract_file_type<S: RangeSource>(rr: &mut RangeReader<S>) -> Result<String> {
    let header = read_header(rr)?;

    for _ in 0..header.metadata_count {
        let (key, kind) = read_entry_head(rr)?;
        if key != FILE_TYPE_KEY {
            skip_value(rr, kind)?;
            continue;
        }
        return match kind {
            ValueKind::U32 | ValueKind::I32 | ValueKind::F32 => {
                Ok(format!("FTYPE_{}", read_u32(rr)?))
            }
            ValueKind::String => Ok(read_string(rr)?.to_uppercase()),
            other => {
                skip_value(rr, other)?;
                Ok(String::new())
            }
        };
    }

    Ok(String::new())
}
