use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use crate::core::error::{Error, ErrorKind, Result};

/// Magic tag opening every persisted file.
pub const MAGIC: [u8; 4] = *b"SPYG";

/// Bumped whenever the payload encoding changes incompatibly.
pub const VERSION: u32 = 1;

/// Frames a payload as: magic, format version, little-endian payload length,
/// payload bytes, crc32 of the payload.
pub fn encode<T: Serialize>(payload: &T) -> Result<Vec<u8>> {
    let body = bincode::serialize(payload)?;
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&body);
    let checksum = hasher.finalize();
    let mut out = Vec::with_capacity(body.len() + 16);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&(body.len() as u64).to_le_bytes());
    out.extend_from_slice(&body);
    out.extend_from_slice(&checksum.to_le_bytes());
    Ok(out)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let format_error = |context: &str| Error::new(ErrorKind::Format, context);
    if bytes.len() < 16 {
        return Err(format_error("truncated frame"));
    }
    if bytes[0..4] != MAGIC {
        return Err(format_error("bad magic"));
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    if version != VERSION {
        return Err(Error::new(
            ErrorKind::Format,
            format!("unsupported format version {}", version),
        ));
    }
    let len = u64::from_le_bytes(bytes[8..16].try_into().unwrap()) as usize;
    if bytes.len() != 16 + len + 4 {
        return Err(format_error("frame length mismatch"));
    }
    let body = &bytes[16..16 + len];
    let stored = u32::from_le_bytes(bytes[16 + len..].try_into().unwrap());
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(body);
    if hasher.finalize() != stored {
        return Err(format_error("checksum mismatch"));
    }
    Ok(bincode::deserialize(body)?)
}

/// Writes a framed payload atomically: write to a temporary sibling, sync,
/// rename into place.
pub fn write_file<T: Serialize>(path: &Path, payload: &T) -> Result<()> {
    let bytes = encode(payload)?;
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    decode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let payload = vec![1u64, 2, 3];
        let bytes = encode(&payload).unwrap();
        let decoded: Vec<u64> = decode(&bytes).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn rejects_corruption() {
        let payload = String::from("intact");
        let mut bytes = encode(&payload).unwrap();
        let last = bytes.len() - 5;
        bytes[last] ^= 0xff;
        let err = decode::<String>(&bytes).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Format);
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        let mut bytes = encode(&0u32).unwrap();
        bytes[0] = b'X';
        assert!(decode::<u32>(&bytes).is_err());
        let mut bytes = encode(&0u32).unwrap();
        bytes[4] = 0xff;
        assert!(decode::<u32>(&bytes).is_err());
    }

    #[test]
    fn file_round_trip_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.bin");
        write_file(&path, &42u64).unwrap();
        assert_eq!(read_file::<u64>(&path).unwrap(), 42);
        assert!(!path.with_extension("tmp").exists());
    }
}
