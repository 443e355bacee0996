//! Binary Codec
//!
//! Versioned serializer/deserializer for the single-record on-disk format.
//! Every variable-width field is length-capped on read so a corrupted or
//! hostile file can never force a huge allocation.
//!
//! # On-disk layout (little-endian)
//!
//! ```text
//! magic: u32 | version: u32 | id: lpstr | name: lpstr | description: lpstr
//! | type: i8 | flags: u32 | data_len: i32 | data | local: u8
//! | temporary: u8 | uuid: [u8; 16]
//! ```
//!
//! where `lpstr` is a 4-byte signed length followed by that many UTF-8
//! bytes (length 0 means empty).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::asset::Asset;
use crate::error::{CacheError, Result};

/// Record magic, `FACH` read as a little-endian u32 constant
pub const MAGIC: u32 = 0x4641_4348;

/// Current record version
pub const VERSION: u32 = 1;

/// Read-side caps on variable-width fields.
#[derive(Debug, Clone, Copy)]
pub struct CodecLimits {
    /// Cap on each string field in bytes
    pub max_string_bytes: usize,
    /// Cap on the data field in bytes
    pub max_data_bytes: usize,
}

impl Default for CodecLimits {
    fn default() -> Self {
        Self {
            max_string_bytes: 256 * 1024,
            max_data_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Exact serialized size of an asset, used to preallocate write buffers.
pub fn encoded_len(asset: &Asset) -> usize {
    4 + 4 // magic + version
        + 4 + asset.id.len()
        + 4 + asset.name.len()
        + 4 + asset.description.len()
        + 1 // type
        + 4 // flags
        + 4 + asset.data.len()
        + 1 // local
        + 1 // temporary
        + 16 // uuid
}

/// Serialize an asset into the on-disk record format.
pub fn encode(asset: &Asset) -> Bytes {
    let mut buf = BytesMut::with_capacity(encoded_len(asset));
    buf.put_u32_le(MAGIC);
    buf.put_u32_le(VERSION);
    put_string(&mut buf, &asset.id);
    put_string(&mut buf, &asset.name);
    put_string(&mut buf, &asset.description);
    buf.put_i8(asset.kind);
    buf.put_u32_le(asset.flags);
    buf.put_i32_le(asset.data.len() as i32);
    buf.put_slice(&asset.data);
    buf.put_u8(asset.local as u8);
    buf.put_u8(asset.temporary as u8);
    buf.put_slice(asset.uuid.as_bytes());
    buf.freeze()
}

/// Deserialize an on-disk record.
///
/// Fails with `BadFormat` on wrong magic, unsupported version, negative
/// lengths, over-cap fields, invalid UTF-8, or a truncated stream. The
/// caller decides what to do with the file (the disk tier deletes it).
pub fn decode(mut buf: &[u8], limits: &CodecLimits) -> Result<Asset> {
    let magic = get_u32(&mut buf, "magic")?;
    if magic != MAGIC {
        return Err(CacheError::BadFormat(format!(
            "wrong magic 0x{magic:08X}"
        )));
    }

    let version = get_u32(&mut buf, "version")?;
    if version != VERSION {
        return Err(CacheError::BadFormat(format!(
            "unsupported version {version}"
        )));
    }

    let id = get_string(&mut buf, "id", limits.max_string_bytes)?;
    let name = get_string(&mut buf, "name", limits.max_string_bytes)?;
    let description = get_string(&mut buf, "description", limits.max_string_bytes)?;

    let kind = get_i8(&mut buf, "type")?;
    let flags = get_u32(&mut buf, "flags")?;

    let data_len = get_len(&mut buf, "data", limits.max_data_bytes)?;
    let data = get_bytes(&mut buf, "data", data_len)?;

    let local = get_u8(&mut buf, "local")? != 0;
    let temporary = get_u8(&mut buf, "temporary")? != 0;

    let uuid_bytes = get_bytes(&mut buf, "uuid", 16)?;
    let uuid = Uuid::from_slice(&uuid_bytes)
        .map_err(|e| CacheError::BadFormat(format!("uuid: {e}")))?;

    Ok(Asset {
        id,
        uuid,
        name,
        description,
        kind,
        flags,
        data: Bytes::copy_from_slice(&data),
        local,
        temporary,
    })
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_i32_le(s.len() as i32);
    buf.put_slice(s.as_bytes());
}

fn get_u32(buf: &mut &[u8], field: &str) -> Result<u32> {
    ensure(*buf, 4, field)?;
    Ok(buf.get_u32_le())
}

fn get_u8(buf: &mut &[u8], field: &str) -> Result<u8> {
    ensure(*buf, 1, field)?;
    Ok(buf.get_u8())
}

fn get_i8(buf: &mut &[u8], field: &str) -> Result<i8> {
    ensure(*buf, 1, field)?;
    Ok(buf.get_i8())
}

/// Read a 4-byte signed length and validate it against `cap`.
fn get_len(buf: &mut &[u8], field: &str, cap: usize) -> Result<usize> {
    ensure(*buf, 4, field)?;
    let len = buf.get_i32_le();
    if len < 0 {
        return Err(CacheError::BadFormat(format!(
            "negative {field} length {len}"
        )));
    }
    let len = len as usize;
    if len > cap {
        return Err(CacheError::BadFormat(format!(
            "{field} length {len} exceeds cap {cap}"
        )));
    }
    Ok(len)
}

fn get_bytes<'a>(buf: &mut &'a [u8], field: &str, len: usize) -> Result<&'a [u8]> {
    ensure(*buf, len, field)?;
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

fn get_string(buf: &mut &[u8], field: &str, cap: usize) -> Result<String> {
    let len = get_len(buf, field, cap)?;
    let raw = get_bytes(buf, field, len)?;
    String::from_utf8(raw.to_vec())
        .map_err(|_| CacheError::BadFormat(format!("{field} is not valid UTF-8")))
}

fn ensure(buf: &[u8], need: usize, field: &str) -> Result<()> {
    if buf.remaining() < need {
        return Err(CacheError::BadFormat(format!(
            "truncated stream reading {field}"
        )));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_asset() -> Asset {
        let mut asset = Asset::new("sample-id", Bytes::from_static(b"sample payload"));
        asset.name = "a name".into();
        asset.description = "a description".into();
        asset.kind = -7;
        asset.flags = 0xDEAD_0001;
        asset.local = true;
        asset.temporary = false;
        asset
    }

    #[test]
    fn test_round_trip() {
        let asset = sample_asset();
        let bytes = encode(&asset);
        assert_eq!(bytes.len(), encoded_len(&asset));

        let decoded = decode(&bytes, &CodecLimits::default()).unwrap();
        assert_eq!(decoded, asset);
    }

    #[test]
    fn test_round_trip_empty_fields() {
        let mut asset = Asset::new("x", Bytes::new());
        asset.name.clear();
        asset.description.clear();

        let decoded = decode(&encode(&asset), &CodecLimits::default()).unwrap();
        assert_eq!(decoded.data.len(), 0);
        assert_eq!(decoded.name, "");
        assert_eq!(decoded, asset);
    }

    #[test]
    fn test_wrong_magic() {
        let mut bytes = BytesMut::from(encode(&sample_asset()).as_ref());
        bytes[0..4].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());

        let err = decode(&bytes, &CodecLimits::default()).unwrap_err();
        assert!(err.is_bad_format(), "got {err:?}");
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = BytesMut::from(encode(&sample_asset()).as_ref());
        bytes[4..8].copy_from_slice(&2u32.to_le_bytes());

        let err = decode(&bytes, &CodecLimits::default()).unwrap_err();
        assert!(err.is_bad_format());
    }

    #[test]
    fn test_negative_string_length() {
        let mut bytes = BytesMut::from(encode(&sample_asset()).as_ref());
        // id length field sits right after magic + version
        bytes[8..12].copy_from_slice(&(-1i32).to_le_bytes());

        let err = decode(&bytes, &CodecLimits::default()).unwrap_err();
        assert!(err.to_string().contains("negative"));
    }

    #[test]
    fn test_string_over_cap() {
        let limits = CodecLimits {
            max_string_bytes: 4,
            max_data_bytes: 1024,
        };
        let asset = Asset::new("longer-than-four", Bytes::new());
        let err = decode(&encode(&asset), &limits).unwrap_err();
        assert!(err.is_bad_format());
    }

    #[test]
    fn test_data_at_cap_round_trips() {
        let limits = CodecLimits {
            max_string_bytes: 1024,
            max_data_bytes: 64,
        };
        let asset = Asset::new("edge", Bytes::from(vec![0xABu8; 64]));
        let decoded = decode(&encode(&asset), &limits).unwrap();
        assert_eq!(decoded.data.len(), 64);
    }

    #[test]
    fn test_data_over_cap() {
        let limits = CodecLimits {
            max_string_bytes: 1024,
            max_data_bytes: 64,
        };
        let asset = Asset::new("edge", Bytes::from(vec![0xABu8; 65]));
        let err = decode(&encode(&asset), &limits).unwrap_err();
        assert!(err.is_bad_format());
    }

    #[test]
    fn test_truncated_stream() {
        let bytes = encode(&sample_asset());
        for cut in [0, 3, 7, 11, bytes.len() - 1] {
            let err = decode(&bytes[..cut], &CodecLimits::default()).unwrap_err();
            assert!(err.is_bad_format(), "cut at {cut} gave {err:?}");
        }
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut bytes = BytesMut::from(encode(&sample_asset()).as_ref());
        // First id byte sits at offset 12
        bytes[12] = 0xFF;
        let err = decode(&bytes, &CodecLimits::default()).unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
    }

    #[test]
    fn test_flag_bytes_decode_as_bools() {
        let mut asset = sample_asset();
        asset.local = false;
        asset.temporary = true;
        let decoded = decode(&encode(&asset), &CodecLimits::default()).unwrap();
        assert!(!decoded.local);
        assert!(decoded.temporary);
    }
}
