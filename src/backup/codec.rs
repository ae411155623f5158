// Canonical serialization, checksums and gzip compression

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

use super::types::BackupData;
use crate::{BackupError, Result};

/// Serialize a snapshot to its canonical byte form.
///
/// Sections are ordered maps, so equal payloads always produce equal bytes.
pub fn to_canonical_bytes(data: &BackupData) -> Result<Vec<u8>> {
    serde_json::to_vec(data)
        .map_err(|e| BackupError::Serialization(format!("Failed to serialize backup data: {}", e)))
}

pub fn from_canonical_bytes(bytes: &[u8]) -> Result<BackupData> {
    serde_json::from_slice(bytes)
        .map_err(|e| BackupError::CorruptArchive(format!("Failed to parse backup payload: {}", e)))
}

/// Lowercase hex SHA-256
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn compress(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level.min(9)));
    encoder
        .write_all(data)
        .map_err(|e| BackupError::Pipeline(format!("Failed to compress data: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| BackupError::Pipeline(format!("Failed to finalize compression: {}", e)))
}

pub fn decompress(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(compressed);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| BackupError::CorruptArchive(format!("Failed to decompress data: {}", e)))?;
    Ok(decompressed)
}
