//! Stored record encoding.
//!
//! A cache entry is a hash with two fields:
//!
//! | Field | Content |
//! |-------|---------|
//! | `v` | JSON record `{"v": value, "d": [{"k": name, "v": version}, ...]}`, raw-deflate compressed when `c` is `1` |
//! | `c` | `1` if `v` is compressed, `0` (or absent) otherwise |
//!
//! JSON keeps the record self-describing; unknown fields are ignored on decode
//! so newer writers stay readable by older readers.

use std::collections::HashMap;
use std::io::{Read, Write};

use cacher_core::{CodecError, Dependency, DependencyTag};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

/// Hash field holding the encoded record.
pub const VALUE_FIELD: &str = "v";

/// Hash field holding the compression flag.
pub const COMPRESSED_FIELD: &str = "c";

const FLAG_COMPRESSED: &[u8] = b"1";
const FLAG_PLAIN: &[u8] = b"0";

/// A cached value together with the dependency versions it was stored against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    #[serde(rename = "v")]
    pub value: String,
    #[serde(rename = "d", default)]
    pub dependencies: Vec<Dependency>,
}

impl StoredRecord {
    pub fn new(value: impl Into<String>, dependencies: &[&dyn DependencyTag]) -> Self {
        Self {
            value: value.into(),
            dependencies: dependencies
                .iter()
                .map(|tag| Dependency::from_tag(*tag))
                .collect(),
        }
    }
}

/// Encode a record into the hash fields written to the store.
pub fn encode_record(
    record: &StoredRecord,
    compress: bool,
) -> Result<Vec<(String, Vec<u8>)>, CodecError> {
    let json = serde_json::to_vec(record).map_err(|e| CodecError::Encode {
        reason: e.to_string(),
    })?;

    let (payload, flag) = if compress {
        (deflate(&json)?, FLAG_COMPRESSED)
    } else {
        (json, FLAG_PLAIN)
    };

    Ok(vec![
        (COMPRESSED_FIELD.to_string(), flag.to_vec()),
        (VALUE_FIELD.to_string(), payload),
    ])
}

/// Decode the hash fields read back from the store.
pub fn decode_record(fields: &HashMap<String, Vec<u8>>) -> Result<StoredRecord, CodecError> {
    let payload = fields
        .get(VALUE_FIELD)
        .ok_or_else(|| CodecError::MissingField {
            field: VALUE_FIELD.to_string(),
        })?;

    let json = match fields.get(COMPRESSED_FIELD).map(Vec::as_slice) {
        None | Some(FLAG_PLAIN) => payload.clone(),
        Some(FLAG_COMPRESSED) => inflate(payload)?,
        Some(other) => {
            return Err(CodecError::Decode {
                reason: format!(
                    "unknown compression flag {:?}",
                    String::from_utf8_lossy(other)
                ),
            })
        }
    };

    serde_json::from_slice(&json).map_err(|e| CodecError::Decode {
        reason: e.to_string(),
    })
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(|e| CodecError::Compress {
        reason: e.to_string(),
    })?;
    encoder.finish().map_err(|e| CodecError::Compress {
        reason: e.to_string(),
    })
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = DeflateDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Decompress {
            reason: e.to_string(),
        })?;
    Ok(out)
}
