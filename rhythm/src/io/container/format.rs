//! Binary layout of the bulk-data container.
//!
//! ```text
//! magic       b"FRDC"
//! version     u16 LE
//! header_len  u64 LE
//! header      JSON index of groups, lists and arrays
//! payload     array blobs, row-major little-endian, optionally zlib-compressed
//! ```

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::records::{ArrayData, DType, DataNode, DataTree};

pub const MAGIC: &[u8; 4] = b"FRDC";
pub const VERSION: u16 = 1;
const PREAMBLE_LEN: usize = 4 + 2 + 8;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct FormatError(String);

impl FormatError {
    fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// How arrays are laid out when encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    /// zlib level per array; `None` stores raw bytes.
    pub compression: Option<u32>,
    pub track_order: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    track_order: bool,
    root: Vec<(String, IndexNode)>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum IndexNode {
    Group {
        entries: Vec<(String, IndexNode)>,
    },
    List {
        items: Vec<IndexNode>,
    },
    Array {
        dtype: DType,
        shape: Vec<usize>,
        offset: u64,
        len: u64,
        compressed: bool,
    },
}

/// Serialize `tree` into a complete container image.
pub fn encode(tree: &DataTree, options: EncodeOptions) -> Result<Vec<u8>, FormatError> {
    let mut ordered;
    let tree = if options.track_order {
        tree
    } else {
        ordered = tree.clone();
        ordered.sort_keys();
        &ordered
    };

    let mut payload = Vec::new();
    let root = index_group(tree, options.compression, &mut payload)?;
    let header = serde_json::to_vec(&Header {
        track_order: options.track_order,
        root,
    })
    .map_err(|err| FormatError::new(format!("serialize header: {err}")))?;

    let mut out = Vec::with_capacity(PREAMBLE_LEN + header.len() + payload.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&(header.len() as u64).to_le_bytes());
    out.extend_from_slice(&header);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Parse a container image back into a tree.
pub fn decode(bytes: &[u8]) -> Result<DataTree, FormatError> {
    if bytes.len() < PREAMBLE_LEN || &bytes[..4] != MAGIC {
        return Err(FormatError::new("missing container magic"));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != VERSION {
        return Err(FormatError::new(format!(
            "unsupported container version {version}"
        )));
    }
    let mut len_bytes = [0_u8; 8];
    len_bytes.copy_from_slice(&bytes[6..PREAMBLE_LEN]);
    let header_len = usize::try_from(u64::from_le_bytes(len_bytes))
        .map_err(|_| FormatError::new("header length overflows"))?;
    let header_end = PREAMBLE_LEN
        .checked_add(header_len)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| FormatError::new("header extends past end of file"))?;

    let header: Header = serde_json::from_slice(&bytes[PREAMBLE_LEN..header_end])
        .map_err(|err| FormatError::new(format!("parse header: {err}")))?;
    let payload = &bytes[header_end..];
    build_group(header.root, payload)
}

fn index_group(
    tree: &DataTree,
    compression: Option<u32>,
    payload: &mut Vec<u8>,
) -> Result<Vec<(String, IndexNode)>, FormatError> {
    tree.iter()
        .map(|(name, node)| Ok((name.to_string(), index_node(node, compression, payload)?)))
        .collect()
}

fn index_node(
    node: &DataNode,
    compression: Option<u32>,
    payload: &mut Vec<u8>,
) -> Result<IndexNode, FormatError> {
    match node {
        DataNode::Group(tree) => Ok(IndexNode::Group {
            entries: index_group(tree, compression, payload)?,
        }),
        DataNode::List(items) => Ok(IndexNode::List {
            items: items
                .iter()
                .map(|item| index_node(item, compression, payload))
                .collect::<Result<_, _>>()?,
        }),
        DataNode::Array(array) => {
            let raw = array_to_bytes(array);
            let blob = match compression {
                Some(level) => compress(&raw, level)?,
                None => raw,
            };
            let offset = payload.len() as u64;
            payload.extend_from_slice(&blob);
            Ok(IndexNode::Array {
                dtype: array.dtype(),
                shape: array.shape().to_vec(),
                offset,
                len: blob.len() as u64,
                compressed: compression.is_some(),
            })
        }
    }
}

fn build_group(entries: Vec<(String, IndexNode)>, payload: &[u8]) -> Result<DataTree, FormatError> {
    let mut tree = DataTree::new();
    for (name, node) in entries {
        if tree.contains_key(&name) {
            return Err(FormatError::new(format!("duplicate key '{name}'")));
        }
        tree.insert(name, build_node(node, payload)?);
    }
    Ok(tree)
}

fn build_node(node: IndexNode, payload: &[u8]) -> Result<DataNode, FormatError> {
    match node {
        IndexNode::Group { entries } => Ok(DataNode::Group(build_group(entries, payload)?)),
        IndexNode::List { items } => Ok(DataNode::List(
            items
                .into_iter()
                .map(|item| build_node(item, payload))
                .collect::<Result<_, _>>()?,
        )),
        IndexNode::Array {
            dtype,
            shape,
            offset,
            len,
            compressed,
        } => {
            let blob = slice_payload(payload, offset, len)?;
            let expected = shape
                .iter()
                .try_fold(dtype.width(), |acc, dim| acc.checked_mul(*dim))
                .ok_or_else(|| FormatError::new("array size overflows"))?;
            let raw = if compressed {
                decompress(blob, expected)?
            } else {
                blob.to_vec()
            };
            if raw.len() != expected {
                return Err(FormatError::new(format!(
                    "array of {dtype} {shape:?} needs {expected} bytes, found {}",
                    raw.len()
                )));
            }
            Ok(DataNode::Array(array_from_bytes(dtype, &shape, &raw)?))
        }
    }
}

fn slice_payload(payload: &[u8], offset: u64, len: u64) -> Result<&[u8], FormatError> {
    let start = usize::try_from(offset).ok();
    let end = start.zip(usize::try_from(len).ok()).and_then(|(s, l)| s.checked_add(l));
    match (start, end) {
        (Some(start), Some(end)) if end <= payload.len() => Ok(&payload[start..end]),
        _ => Err(FormatError::new(format!(
            "array blob {offset}+{len} is outside the payload"
        ))),
    }
}

fn compress(raw: &[u8], level: u32) -> Result<Vec<u8>, FormatError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
    encoder
        .write_all(raw)
        .map_err(|err| FormatError::new(format!("compress array: {err}")))?;
    encoder
        .finish()
        .map_err(|err| FormatError::new(format!("finish compression: {err}")))
}

fn decompress(blob: &[u8], expected: usize) -> Result<Vec<u8>, FormatError> {
    // `expected` comes from the file; bound the reservation by what the blob can plausibly hold.
    let mut raw = Vec::with_capacity(expected.min(blob.len().saturating_mul(4)));
    // One extra byte lets an oversized stream be detected without reading it all.
    ZlibDecoder::new(blob)
        .take(expected as u64 + 1)
        .read_to_end(&mut raw)
        .map_err(|err| FormatError::new(format!("decompress array: {err}")))?;
    Ok(raw)
}

macro_rules! numeric_bytes {
    ($array:expr) => {
        $array.iter().flat_map(|v| v.to_le_bytes()).collect()
    };
}

fn array_to_bytes(array: &ArrayData) -> Vec<u8> {
    match array {
        ArrayData::Bool(a) => a.iter().map(|&v| u8::from(v)).collect(),
        ArrayData::U8(a) => a.iter().copied().collect(),
        ArrayData::I32(a) => numeric_bytes!(a),
        ArrayData::I64(a) => numeric_bytes!(a),
        ArrayData::F32(a) => numeric_bytes!(a),
        ArrayData::F64(a) => numeric_bytes!(a),
    }
}

macro_rules! numeric_array {
    ($ty:ty, $shape:expr, $raw:expr) => {{
        let values = $raw
            .chunks_exact(std::mem::size_of::<$ty>())
            .map(|chunk| {
                let mut buf = [0_u8; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(chunk);
                <$ty>::from_le_bytes(buf)
            })
            .collect::<Vec<$ty>>();
        shaped($shape, values)?.into()
    }};
}

fn array_from_bytes(dtype: DType, shape: &[usize], raw: &[u8]) -> Result<ArrayData, FormatError> {
    let array: ArrayData = match dtype {
        DType::Bool => {
            let values = raw
                .iter()
                .map(|byte| match byte {
                    0 => Ok(false),
                    1 => Ok(true),
                    other => Err(FormatError::new(format!("invalid bool byte {other}"))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            shaped(shape, values)?.into()
        }
        DType::U8 => shaped(shape, raw.to_vec())?.into(),
        DType::I32 => numeric_array!(i32, shape, raw),
        DType::I64 => numeric_array!(i64, shape, raw),
        DType::F32 => numeric_array!(f32, shape, raw),
        DType::F64 => numeric_array!(f64, shape, raw),
    };
    Ok(array)
}

fn shaped<T>(shape: &[usize], values: Vec<T>) -> Result<ArrayD<T>, FormatError> {
    ArrayD::from_shape_vec(IxDyn(shape), values)
        .map_err(|err| FormatError::new(format!("reshape to {shape:?}: {err}")))
}
