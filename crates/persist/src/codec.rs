use crate::snapshot::Snapshot;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

/// Default ceiling for an encoded payload.
pub const DEFAULT_PAYLOAD_LIMIT: usize = 5 * 1024 * 1024;
/// Default zstd level.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Errors from encoding or decoding payloads.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("payload digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },
}

/// Encoded snapshot bytes plus their content digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub bytes: Vec<u8>,
    pub digest: String,
}

/// Snapshot <-> opaque bytes: CBOR, zstd compressed, size-capped.
#[derive(Debug, Clone, Copy)]
pub struct PayloadCodec {
    limit: usize,
    level: i32,
}

impl Default for PayloadCodec {
    fn default() -> Self {
        Self::new(DEFAULT_PAYLOAD_LIMIT, DEFAULT_COMPRESSION_LEVEL)
    }
}

impl PayloadCodec {
    pub fn new(limit: usize, level: i32) -> Self {
        Self { limit, level }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn encode(&self, snapshot: &Snapshot) -> Result<EncodedPayload, CodecError> {
        let bytes = zstd_compress(&cbor_serialize(snapshot)?, self.level)?;
        if bytes.len() > self.limit {
            return Err(CodecError::PayloadTooLarge {
                size: bytes.len(),
                limit: self.limit,
            });
        }
        let digest = sha256_hex(&bytes);
        Ok(EncodedPayload { bytes, digest })
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Snapshot, CodecError> {
        if bytes.len() > self.limit {
            return Err(CodecError::PayloadTooLarge {
                size: bytes.len(),
                limit: self.limit,
            });
        }
        cbor_deserialize(&zstd_decompress(bytes)?)
    }

    /// Decode after checking the bytes against an expected digest.
    pub fn decode_verified(&self, bytes: &[u8], digest: &str) -> Result<Snapshot, CodecError> {
        verify_digest(bytes, digest)?;
        self.decode(bytes)
    }
}

pub fn verify_digest(bytes: &[u8], expected: &str) -> Result<(), CodecError> {
    let actual = sha256_hex(bytes);
    if actual != expected {
        return Err(CodecError::DigestMismatch {
            expected: expected.to_owned(),
            actual,
        });
    }
    Ok(())
}

pub(crate) fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CodecError::CborEncode(e.to_string()))?;
    Ok(buf)
}

pub(crate) fn cbor_deserialize<T: DeserializeOwned>(data: &[u8]) -> Result<T, CodecError> {
    ciborium::from_reader(data).map_err(|e| CodecError::CborDecode(e.to_string()))
}

pub(crate) fn zstd_compress(data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), level)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub(crate) fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
