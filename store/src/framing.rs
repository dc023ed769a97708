//! Length-delimited, snappy-compressed record framing for chunk batch
//! files (§6): `[u64 compressed_len][compressed bytes]` repeated,
//! concatenated back-to-back. Each record's compressed bytes, once
//! decompressed, are a bincode-serialized [`TickDataChunk`] — and are
//! re-embeddable verbatim by a pass-through indexer that never
//! deserializes them (§6).

use evochora_error::StorageError;
use evochora_types::TickDataChunk;
use snap::raw::{Decoder as SnapDecoder, Encoder as SnapEncoder};
use std::io::{self, Read, Write};

/// Serializes and snappy-compresses one chunk into a length-prefixed
/// record, appended to `out`.
pub fn write_chunk_record(out: &mut impl Write, chunk: &TickDataChunk) -> Result<(), StorageError> {
    let payload = bincode::serialize(chunk).map_err(StorageError::new)?;
    let compressed = SnapEncoder::new()
        .compress_vec(&payload)
        .map_err(StorageError::new)?;
    out.write_all(&(compressed.len() as u64).to_le_bytes())
        .map_err(StorageError::new)?;
    out.write_all(&compressed).map_err(StorageError::new)?;
    Ok(())
}

/// Reads the next record's raw (decompressed, still-serialized) bytes
/// from `input`. Returns `Ok(None)` at a clean end of stream.
///
/// This is the entry point pass-through indexers use: they get the raw
/// bytes back without ever paying for a [`TickDataChunk`] allocation
/// (§4.3, §6) — only the compression buffer is allocated.
pub fn read_raw_chunk_record(input: &mut impl Read) -> Result<Option<Vec<u8>>, StorageError> {
    let mut len_buf = [0u8; 8];
    match input.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(StorageError::new(e)),
    }
    let len = u64::from_le_bytes(len_buf) as usize;
    let mut compressed = vec![0u8; len];
    input.read_exact(&mut compressed).map_err(StorageError::new)?;
    let raw = SnapDecoder::new()
        .decompress_vec(&compressed)
        .map_err(StorageError::new)?;
    Ok(Some(raw))
}

/// Reads and deserializes the next chunk from `input`.
pub fn read_chunk_record(input: &mut impl Read) -> Result<Option<TickDataChunk>, StorageError> {
    match read_raw_chunk_record(input)? {
        None => Ok(None),
        Some(raw) => {
            let chunk = bincode::deserialize(&raw).map_err(StorageError::new)?;
            Ok(Some(chunk))
        }
    }
}
