// Versioned binary codec shared by persisted state and wire payloads.
//
// Layout conventions: a leading format-version byte on every top-level
// encoding, Bitcoin-style varints for counts and length prefixes,
// big-endian fixed-width integers.

use crate::error::{Error, Result};
use std::io::Read;

/// Bumped whenever an encoding changes shape.
pub const FORMAT_VERSION: u8 = 1;

pub trait Serializable {
    fn serialize(&self) -> Vec<u8>;
    fn deserialize(data: &[u8]) -> Result<Self>
    where
        Self: Sized;
}

pub fn put_format_version(buf: &mut Vec<u8>) {
    buf.push(FORMAT_VERSION);
}

pub fn get_format_version<R: Read + ?Sized>(reader: &mut R) -> Result<()> {
    let version = get_u8(reader)?;
    if version != FORMAT_VERSION {
        return Err(Error::Decode(format!(
            "unsupported format version {} (expected {})",
            version, FORMAT_VERSION
        )));
    }
    Ok(())
}

pub fn put_u8(buf: &mut Vec<u8>, value: u8) {
    buf.push(value);
}

pub fn put_bool(buf: &mut Vec<u8>, value: bool) {
    buf.push(value as u8);
}

pub fn put_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub fn put_i32(buf: &mut Vec<u8>, value: i32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub fn put_varint(buf: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => buf.push(value as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(value as u16).to_be_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(value as u32).to_be_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&value.to_be_bytes());
        }
    }
}

/// Varint length prefix followed by the raw bytes.
pub fn put_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    put_varint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

pub fn put_string(buf: &mut Vec<u8>, s: &str) {
    put_bytes(buf, s.as_bytes());
}

fn fill<R: Read + ?Sized>(reader: &mut R, out: &mut [u8]) -> Result<()> {
    reader
        .read_exact(out)
        .map_err(|e| Error::Decode(format!("truncated input: {}", e)))
}

pub fn get_u8<R: Read + ?Sized>(reader: &mut R) -> Result<u8> {
    let mut byte = [0u8; 1];
    fill(reader, &mut byte)?;
    Ok(byte[0])
}

pub fn get_bool<R: Read + ?Sized>(reader: &mut R) -> Result<bool> {
    Ok(get_u8(reader)? != 0)
}

pub fn get_u64<R: Read + ?Sized>(reader: &mut R) -> Result<u64> {
    let mut bytes = [0u8; 8];
    fill(reader, &mut bytes)?;
    Ok(u64::from_be_bytes(bytes))
}

pub fn get_i32<R: Read + ?Sized>(reader: &mut R) -> Result<i32> {
    let mut bytes = [0u8; 4];
    fill(reader, &mut bytes)?;
    Ok(i32::from_be_bytes(bytes))
}

pub fn get_array<const N: usize, R: Read + ?Sized>(reader: &mut R) -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    fill(reader, &mut bytes)?;
    Ok(bytes)
}

pub fn get_varint<R: Read + ?Sized>(reader: &mut R) -> Result<u64> {
    match get_u8(reader)? {
        tag @ 0..=0xfc => Ok(tag as u64),
        0xfd => {
            let mut bytes = [0u8; 2];
            fill(reader, &mut bytes)?;
            Ok(u16::from_be_bytes(bytes) as u64)
        }
        0xfe => {
            let mut bytes = [0u8; 4];
            fill(reader, &mut bytes)?;
            Ok(u32::from_be_bytes(bytes) as u64)
        }
        0xff => {
            let mut bytes = [0u8; 8];
            fill(reader, &mut bytes)?;
            Ok(u64::from_be_bytes(bytes))
        }
    }
}

pub fn get_bytes<R: Read + ?Sized>(reader: &mut R) -> Result<Vec<u8>> {
    let len = get_varint(reader)? as usize;
    let mut data = vec![0u8; len];
    fill(reader, &mut data)?;
    Ok(data)
}

pub fn get_string<R: Read + ?Sized>(reader: &mut R) -> Result<String> {
    let bytes = get_bytes(reader)?;
    String::from_utf8(bytes).map_err(|e| Error::Decode(format!("invalid utf-8 string: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_varint_round_trip() {
        for value in [0u64, 0xfc, 0xfd, 1000, 0xffff, 0x1_0000, 0xffff_ffff, u64::MAX] {
            let mut buf = Vec::new();
            put_varint(&mut buf, value);
            let mut cursor = Cursor::new(buf);
            assert_eq!(get_varint(&mut cursor).unwrap(), value);
        }
    }

    #[test]
    fn test_varint_small_is_one_byte() {
        let mut buf = Vec::new();
        put_varint(&mut buf, 42);
        assert_eq!(buf, vec![42]);
    }

    #[test]
    fn test_bytes_round_trip() {
        let mut buf = Vec::new();
        put_bytes(&mut buf, b"hello world");
        let mut cursor = Cursor::new(buf);
        assert_eq!(get_bytes(&mut cursor).unwrap(), b"hello world");
    }

    #[test]
    fn test_string_round_trip() {
        let mut buf = Vec::new();
        put_string(&mut buf, "full");
        put_bool(&mut buf, true);
        let mut cursor = Cursor::new(buf);
        assert_eq!(get_string(&mut cursor).unwrap(), "full");
        assert!(get_bool(&mut cursor).unwrap());
    }

    #[test]
    fn test_signed_index_round_trip() {
        let mut buf = Vec::new();
        put_i32(&mut buf, -1);
        put_i32(&mut buf, 7);
        let mut cursor = Cursor::new(buf);
        assert_eq!(get_i32(&mut cursor).unwrap(), -1);
        assert_eq!(get_i32(&mut cursor).unwrap(), 7);
    }

    #[test]
    fn test_truncated_input_is_decode_error() {
        let mut cursor = Cursor::new(vec![0xfd, 0x01]);
        assert!(get_varint(&mut cursor).is_err());
    }

    #[test]
    fn test_format_version_mismatch() {
        let mut cursor = Cursor::new(vec![FORMAT_VERSION + 1]);
        assert!(get_format_version(&mut cursor).is_err());
        let mut cursor = Cursor::new(vec![FORMAT_VERSION]);
        assert!(get_format_version(&mut cursor).is_ok());
    }
}
