//! Size- and ratio-gated gzip compression of outbound payloads

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::config::CompressionConfig;
use crate::error::{Result, StreamError};

/// Bytes to put on the wire and whether they are gzip-compressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedPayload {
    pub bytes: Vec<u8>,
    pub compressed: bool,
}

/// Running totals for compression decisions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CompressionStats {
    pub attempted: u64,
    pub applied: u64,
    pub bytes_saved: u64,
}

pub struct CompressionManager {
    threshold_bytes: usize,
    max_ratio: f64,
    attempted: AtomicU64,
    applied: AtomicU64,
    bytes_saved: AtomicU64,
}

impl CompressionManager {
    pub fn new(config: &CompressionConfig) -> Self {
        Self {
            threshold_bytes: config.threshold_bytes,
            max_ratio: config.max_ratio,
            attempted: AtomicU64::new(0),
            applied: AtomicU64::new(0),
            bytes_saved: AtomicU64::new(0),
        }
    }

    /// Compress `message` when it is large enough and gzip pays off.
    ///
    /// Payloads under the threshold are returned raw without trying. Larger
    /// ones are compressed and kept only when the result is at most
    /// `max_ratio` of the raw size.
    pub fn compress(&self, message: &str) -> Result<CompressedPayload> {
        let raw = message.as_bytes();
        if raw.len() < self.threshold_bytes {
            return Ok(CompressedPayload {
                bytes: raw.to_vec(),
                compressed: false,
            });
        }

        self.attempted.fetch_add(1, Ordering::Relaxed);
        let packed = gzip(raw)?;

        if should_use_compressed(raw.len(), packed.len(), self.max_ratio) {
            self.applied.fetch_add(1, Ordering::Relaxed);
            self.bytes_saved
                .fetch_add((raw.len() - packed.len()) as u64, Ordering::Relaxed);
            tracing::trace!(raw = raw.len(), compressed = packed.len(), "Payload compressed");
            Ok(CompressedPayload {
                bytes: packed,
                compressed: true,
            })
        } else {
            Ok(CompressedPayload {
                bytes: raw.to_vec(),
                compressed: false,
            })
        }
    }

    pub fn stats(&self) -> CompressionStats {
        CompressionStats {
            attempted: self.attempted.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            bytes_saved: self.bytes_saved.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.attempted.store(0, Ordering::Relaxed);
        self.applied.store(0, Ordering::Relaxed);
        self.bytes_saved.store(0, Ordering::Relaxed);
    }
}

/// Keep the compressed form only if it is at most `max_ratio` of the raw size
pub fn should_use_compressed(raw_len: usize, compressed_len: usize, max_ratio: f64) -> bool {
    raw_len > 0 && (compressed_len as f64) <= (raw_len as f64) * max_ratio
}

fn gzip(raw: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::default());
    encoder.write_all(raw).map_err(StreamError::Compression)?;
    encoder.finish().map_err(StreamError::Compression)
}

/// Inverse of a compressed frame, for clients and tests
pub fn decompress(bytes: &[u8]) -> Result<String> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = String::new();
    decoder
        .read_to_string(&mut out)
        .map_err(StreamError::Compression)?;
    Ok(out)
}
