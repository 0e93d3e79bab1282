//! Framing for WAL entries and segment payloads.
//!
//! Every record is framed as:
//! ```text
//! [version: 1 byte][length: 4 bytes LE][JSON payload][crc32: 4 bytes LE]
//! ```
//! Files start with `MAGIC` followed by the codec version.

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

const CODEC_VERSION: u8 = 1;

/// Upper bound on a single framed payload.
const MAX_ENTRY_SIZE: usize = 100 * 1024 * 1024;

/// Magic bytes identifying coletor store files.
pub const MAGIC: [u8; 4] = *b"COLT";

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Frames `value` with its length and checksum.
pub fn encode<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let data = serde_json::to_vec(value)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("serialization failed: {e}")))?;
    if data.len() > MAX_ENTRY_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("entry size {} exceeds maximum {MAX_ENTRY_SIZE}", data.len()),
        ));
    }
    #[allow(clippy::cast_possible_truncation)]
    let len = data.len() as u32;

    let mut out = Vec::with_capacity(data.len() + 9);
    out.push(CODEC_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&checksum(&data).to_le_bytes());
    Ok(out)
}

/// Reads one framed value, verifying its checksum.
///
/// A frame cut short by a crash surfaces as `UnexpectedEof`; every other
/// failure is `InvalidData`.
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != CODEC_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("unsupported codec version: {} (expected {CODEC_VERSION})", version[0]),
        ));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_ENTRY_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("entry size {len} exceeds maximum {MAX_ENTRY_SIZE}"),
        ));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;
    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;

    let stored = u32::from_le_bytes(crc_bytes);
    let computed = checksum(&data);
    if stored != computed {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("CRC mismatch: stored={stored:08x}, computed={computed:08x} (data corrupted)"),
        ));
    }

    serde_json::from_slice(&data)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("deserialization failed: {e}")))
}

/// Writes the file header.
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])
}

/// Reads and checks the file header, returning the codec version.
pub fn read_header(reader: &mut impl Read) -> IoResult<u8> {
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
    Ok(version[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::entity::{CanonicalEntity, EntityType};

    #[test]
    fn test_entity_survives_framing() {
        let entity = CanonicalEntity::seed("Forzza, R.C.", EntityType::Pessoa, 0.9, "FORZZA, R.C.");
        let framed = encode(&entity).unwrap();
        let decoded: CanonicalEntity = decode(&mut Cursor::new(framed)).unwrap();
        assert_eq!(decoded, entity);
    }

    #[test]
    fn test_flipped_byte_is_detected() {
        let mut framed = encode(&"Silva, J.".to_string()).unwrap();
        framed[7] ^= 0xFF;
        let err = decode::<String>(&mut Cursor::new(framed)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_short_frame_is_eof() {
        let framed = encode(&"Silva, J.".to_string()).unwrap();
        let cut = &framed[..framed.len() - 2];
        let err = decode::<String>(&mut Cursor::new(cut)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut bad = vec![CODEC_VERSION];
        bad.extend_from_slice(&200_000_000u32.to_le_bytes());
        let err = decode::<String>(&mut Cursor::new(bad)).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_header() {
        let mut buf = Vec::new();
        write_header(&mut buf).unwrap();
        assert_eq!(&buf[..4], b"COLT");
        assert_eq!(read_header(&mut Cursor::new(&buf)).unwrap(), CODEC_VERSION);
        assert!(read_header(&mut Cursor::new(b"ABCD\x01".to_vec())).is_err());
    }
}
