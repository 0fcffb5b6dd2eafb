use std::io::Read;
use std::path::Path;

use offload_protocol::DEFAULT_CHUNK_SIZE;
use sha2::{Digest, Sha256};

use crate::TransferError;

/// A slice of payload data handed to the transport.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Byte offset within the file.
    pub offset: u64,
    /// Size of this chunk in bytes.
    pub size: usize,
    /// Raw chunk data.
    pub data: Vec<u8>,
}

/// Computes SHA-256 of the first `limit` bytes of a file and returns the
/// hex-encoded digest.
///
/// Covers the same bytes a [`ChunkReader`] with the same limit yields.
pub fn calculate_file_checksum(path: &Path, limit: u64) -> Result<String, TransferError> {
    let mut file = std::fs::File::open(path)?.take(limit);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Reads a file in fixed-size chunks.
///
/// The reader stops at `limit` bytes, the declared payload size, even if
/// the file has grown since it was enqueued.
pub struct ChunkReader {
    file: std::fs::File,
    chunk_size: usize,
    offset: u64,
    limit: u64,
}

impl ChunkReader {
    /// Opens `path` for chunked reading of at most `limit` bytes.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] is used.
    pub fn new(path: &Path, chunk_size: usize, limit: u64) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Ok(Self {
            file,
            chunk_size,
            offset: 0,
            limit,
        })
    }

    /// Reads the next chunk. Returns `None` at the limit or at EOF.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }

        let read_size = std::cmp::min(remaining, self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; read_size];
        let n = self.file.read(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);

        let chunk = Chunk {
            offset: self.offset,
            size: n,
            data: buf,
        };
        self.offset += n as u64;
        Ok(Some(chunk))
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes remaining before the limit.
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.offset)
    }
}
