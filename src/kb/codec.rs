//! Binary codec for relation files.
//!
//! Every `.rel` (and `.ceg`) file is framed as:
//! ```text
//! [magic: 4 bytes][version: 1 byte][arity: 4 bytes LE][rows: 4 bytes LE]
//! [data: rows * arity * 4 bytes, u32 LE][crc32: 4 bytes LE]
//! ```
//! The checksum covers arity, row count and data, so truncation and bit rot
//! are both detected on load.

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;

/// Current codec version.
const CODEC_VERSION: u8 = 1;

/// Magic bytes identifying relation files.
pub const MAGIC: [u8; 4] = *b"RLCP";

/// Largest payload accepted on decode (1 GiB).
const MAX_PAYLOAD_SIZE: usize = 1024 * 1024 * 1024;

/// Writes `data` (row-major, `arity` values per row) as a framed relation.
///
/// # Errors
/// Returns an error if the writer fails or the relation is too large to frame.
pub fn encode_relation(writer: &mut impl Write, arity: usize, data: &[u32]) -> IoResult<()> {
    let rows = if arity == 0 { 0 } else { data.len() / arity };
    let arity32 = u32::try_from(arity)
        .map_err(|_| IoError::new(ErrorKind::InvalidInput, format!("arity {arity} too large")))?;
    let rows32 = u32::try_from(rows)
        .map_err(|_| IoError::new(ErrorKind::InvalidInput, format!("{rows} rows too many")))?;

    let mut payload = Vec::with_capacity(8 + data.len() * 4);
    payload.extend_from_slice(&arity32.to_le_bytes());
    payload.extend_from_slice(&rows32.to_le_bytes());
    for value in &data[..rows * arity] {
        payload.extend_from_slice(&value.to_le_bytes());
    }

    let mut hasher = Hasher::new();
    hasher.update(&payload);
    let crc = hasher.finalize();

    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Reads a framed relation, returning `(arity, data)`.
///
/// # Errors
/// - Returns error if magic bytes or version do not match
/// - Returns error if the payload is truncated or oversized
/// - Returns error if the checksum fails (corruption detected)
pub fn decode_relation(reader: &mut impl Read) -> IoResult<(usize, Vec<u32>)> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("invalid magic bytes: expected {MAGIC:?}, got {magic:?}"),
        ));
    }

    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != CODEC_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("unsupported codec version: {} (expected {CODEC_VERSION})", version[0]),
        ));
    }

    let mut header = [0u8; 8];
    reader.read_exact(&mut header)?;
    let arity = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let rows = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;

    let len = arity
        .checked_mul(rows)
        .and_then(|n| n.checked_mul(4))
        .filter(|&n| n <= MAX_PAYLOAD_SIZE)
        .ok_or_else(|| {
            IoError::new(
                ErrorKind::InvalidData,
                format!("relation of {rows} rows x {arity} columns exceeds maximum size"),
            )
        })?;

    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored_crc = u32::from_le_bytes(crc_bytes);

    let mut hasher = Hasher::new();
    hasher.update(&header);
    hasher.update(&bytes);
    let computed_crc = hasher.finalize();
    if stored_crc != computed_crc {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("CRC mismatch: stored={stored_crc:08x}, computed={computed_crc:08x} (data corrupted)"),
        ));
    }

    let data = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok((arity, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_roundtrip() {
        let data = vec![1, 2, 3, 4, 5, 6];
        let mut buf = Vec::new();
        encode_relation(&mut buf, 3, &data).unwrap();
        let (arity, decoded) = decode_relation(&mut Cursor::new(buf)).unwrap();
        assert_eq!(arity, 3);
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_corruption_detected() {
        let mut buf = Vec::new();
        encode_relation(&mut buf, 2, &[7, 8, 9, 10]).unwrap();
        // Flip a data byte (after magic, version and the 8-byte header).
        buf[4 + 1 + 8] ^= 0xFF;
        let err = decode_relation(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(err.to_string().contains("CRC mismatch"));
    }

    #[test]
    fn test_bad_magic() {
        let mut buf = Vec::new();
        encode_relation(&mut buf, 1, &[1]).unwrap();
        buf[0] = b'X';
        let err = decode_relation(&mut Cursor::new(buf)).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn test_truncated() {
        let mut buf = Vec::new();
        encode_relation(&mut buf, 2, &[1, 2, 3, 4]).unwrap();
        buf.truncate(buf.len() - 6);
        let err = decode_relation(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }
}
