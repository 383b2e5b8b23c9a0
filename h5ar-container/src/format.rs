//! Primitive encoding used by container files.
//!
//! A container file is the magic number followed by the encoded root group:
//!
//! ```text
//! FILE    := MAGIC NODE
//! NODE    := TAG ATTRS BODY
//! TAG     := 'g' | 'd' | 'l'
//! ATTRS   := count:u64 { name:STRING VALUE }*
//! VALUE   := 'i' i64 | 's' STRING
//! BODY    := GROUP | DATASET | LINK
//! GROUP   := count:u64 { name:STRING NODE }*
//! DATASET := type:u8 rank:u64 dims:u64* brank:u64 bdims:u64* deflate:u8 shuffle:u8
//!            len:u64 data:u8[len]
//! LINK    := target:STRING
//! STRING  := len:u64 utf8:u8[len]
//! ```
//!
//! All integers use a variable length encoding with 7 bits per byte.

use std::io::{Read, Write};

use crate::ContainerError;

// WARNING: DO NOT MODIFY THIS MAGIC VALUE

// sha256(b"h5ar container file v1.0")[0..8]
pub const H5AR_CONTAINER_MAGIC_1_0: [u8; 8] = [134, 236, 147, 118, 233, 23, 103, 214];

pub const TAG_GROUP: u8 = b'g';
pub const TAG_DATASET: u8 = b'd';
pub const TAG_SOFT_LINK: u8 = b'l';

pub const VALUE_INT: u8 = b'i';
pub const VALUE_STR: u8 = b's';

/// Upper bound for names and string attributes.
pub const MAX_STRING_LEN: u64 = 64 * 1024;

/// Serialize u64 as short, variable length byte sequence
///
/// Stores 7 bits per byte, Bit 8 indicates the end of the sequence (when not set).
pub fn encode_u64<W: Write>(writer: &mut W, v: u64) -> Result<(), ContainerError> {
    let mut enc = Vec::new();

    let mut d = v;
    loop {
        if d < 128 {
            enc.push(d as u8);
            break;
        }
        enc.push((128 | (d & 127)) as u8);
        d >>= 7;
    }
    writer.write_all(&enc)?;

    Ok(())
}

/// Deserialize u64 from variable length byte sequence
///
/// We read at most 10 bytes, which give a maximum of 70 bits.
pub fn decode_u64<R: Read>(reader: &mut R) -> Result<u64, ContainerError> {
    let mut v: u64 = 0;
    let mut buf = [0u8];

    for i in 0..10 {
        reader.read_exact(&mut buf)?;
        let t = buf[0];
        if t < 128 {
            v |= (t as u64) << (i * 7);
            return Ok(v);
        } else {
            v |= ((t & 127) as u64) << (i * 7);
        }
    }

    Err(ContainerError::Format(
        "decode_u64 failed - missing end marker".to_string(),
    ))
}

/// Serialize i64 as short, variable length byte sequence
///
/// Negative values end with an additional zero byte.
pub fn encode_i64<W: Write>(writer: &mut W, v: i64) -> Result<(), ContainerError> {
    let mut enc = Vec::new();

    let mut d = if v < 0 {
        (-(v + 1)) as u64 + 1 // also handles i64::MIN
    } else {
        v as u64
    };

    loop {
        if d < 128 {
            if v < 0 {
                enc.push(128 | d as u8);
                enc.push(0u8);
            } else {
                enc.push(d as u8);
            }
            break;
        }
        enc.push((128 | (d & 127)) as u8);
        d >>= 7;
    }
    writer.write_all(&enc)?;

    Ok(())
}

/// Deserialize i64 from variable length byte sequence
pub fn decode_i64<R: Read>(reader: &mut R) -> Result<i64, ContainerError> {
    let mut v: u64 = 0;
    let mut buf = [0u8];

    for i in 0..11 {
        // 70 bits + sign marker
        reader.read_exact(&mut buf)?;

        let t = buf[0];

        if t == 0 {
            if v == 0 {
                return Ok(0);
            }
            return Ok(-((v - 1) as i64) - 1); // also handles i64::MIN
        } else if t < 128 {
            v |= (t as u64) << (i * 7);
            return Ok(v as i64);
        } else {
            v |= ((t & 127) as u64) << (i * 7);
        }
    }

    Err(ContainerError::Format(
        "decode_i64 failed - missing end marker".to_string(),
    ))
}

pub fn encode_str<W: Write>(writer: &mut W, s: &str) -> Result<(), ContainerError> {
    encode_u64(writer, s.len() as u64)?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

pub fn decode_str<R: Read>(reader: &mut R) -> Result<String, ContainerError> {
    let len = decode_u64(reader)?;
    if len > MAX_STRING_LEN {
        return Err(ContainerError::Format(format!(
            "string of {len} bytes exceeds limit"
        )));
    }
    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data)?;
    String::from_utf8(data)
        .map_err(|err| ContainerError::Format(format!("invalid utf8 in string - {err}")))
}

pub fn decode_u8<R: Read>(reader: &mut R) -> Result<u8, ContainerError> {
    let mut buf = [0u8];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}
