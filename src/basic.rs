//! Component B: pack/unpack of basic (non-container) values. Generalizes
//! rustbus's `wire::util::{write_u32, parse_u32, write_string,
//! unmarshal_str, ...}` free functions (which operate on a bare
//! `Vec<u8>`/`&[u8]`) to operate on the owned `ByteBuffer` (component A)
//! and to return the precise `ValidationError` codes instead of
//! rustbus's coarser `UnmarshalError` variants.

use crate::buffer::ByteBuffer;
use crate::error::{OomError, ValidationError as VErr};
use crate::validation;
use crate::ByteOrder;

macro_rules! pack_fixed {
    ($name:ident, $ty:ty, $size:expr) => {
        pub fn $name(buf: &mut ByteBuffer, order: ByteOrder, value: $ty) -> Result<(), OomError> {
            let bytes = match order {
                ByteOrder::LittleEndian => value.to_le_bytes(),
                ByteOrder::BigEndian => value.to_be_bytes(),
            };
            buf.append(&bytes)
        }
    };
}

pack_fixed!(pack_i16, i16, 2);
pack_fixed!(pack_u16, u16, 2);
pack_fixed!(pack_i32, i32, 4);
pack_fixed!(pack_u32, u32, 4);
pack_fixed!(pack_i64, i64, 8);
pack_fixed!(pack_u64, u64, 8);

pub fn pack_byte(buf: &mut ByteBuffer, value: u8) -> Result<(), OomError> {
    buf.append(&[value])
}

pub fn pack_bool(buf: &mut ByteBuffer, order: ByteOrder, value: bool) -> Result<(), OomError> {
    pack_u32(buf, order, if value { 1 } else { 0 })
}

pub fn pack_f64(buf: &mut ByteBuffer, order: ByteOrder, value: f64) -> Result<(), OomError> {
    let bits = value.to_bits();
    pack_u64(buf, order, bits)
}

macro_rules! unpack_fixed {
    ($name:ident, $ty:ty, $size:expr) => {
        pub fn $name(bytes: &[u8], order: ByteOrder) -> Result<$ty, VErr> {
            if bytes.len() < $size {
                return Err(VErr::NotEnoughData);
            }
            let mut arr = [0u8; $size];
            arr.copy_from_slice(&bytes[..$size]);
            Ok(match order {
                ByteOrder::LittleEndian => <$ty>::from_le_bytes(arr),
                ByteOrder::BigEndian => <$ty>::from_be_bytes(arr),
            })
        }
    };
}

unpack_fixed!(unpack_i16, i16, 2);
unpack_fixed!(unpack_u16, u16, 2);
unpack_fixed!(unpack_i32, i32, 4);
unpack_fixed!(unpack_u32, u32, 4);
unpack_fixed!(unpack_i64, i64, 8);
unpack_fixed!(unpack_u64, u64, 8);

pub fn unpack_byte(bytes: &[u8]) -> Result<u8, VErr> {
    bytes.first().copied().ok_or(VErr::NotEnoughData)
}

pub fn unpack_bool(bytes: &[u8], order: ByteOrder) -> Result<bool, VErr> {
    match unpack_u32(bytes, order)? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(VErr::BooleanNotZeroOrOne),
    }
}

pub fn unpack_f64(bytes: &[u8], order: ByteOrder) -> Result<f64, VErr> {
    Ok(f64::from_bits(unpack_u64(bytes, order)?))
}

/// Write a length-prefixed, NUL-terminated UTF-8 string (used for both
/// `string` and `object-path`; the 4-byte length prefix excludes the
/// trailing NUL). The length prefix and NUL are reserved and written
/// atomically with the body so an allocation failure never leaves a
/// length prefix pointing at missing bytes.
pub fn pack_string(buf: &mut ByteBuffer, order: ByteOrder, value: &str) -> Result<(), OomError> {
    // Build the whole length+body+NUL run before touching `buf`, so a
    // failed allocation never leaves a length prefix with no body.
    let mut whole = Vec::new();
    whole.try_reserve(4 + value.len() + 1).map_err(|_| OomError)?;
    let prefix = match order {
        ByteOrder::LittleEndian => (value.len() as u32).to_le_bytes(),
        ByteOrder::BigEndian => (value.len() as u32).to_be_bytes(),
    };
    whole.extend_from_slice(&prefix);
    whole.extend_from_slice(value.as_bytes());
    whole.push(0);
    buf.append(&whole)
}

/// Write a length-prefixed (1-byte), NUL-terminated signature string.
pub fn pack_signature(buf: &mut ByteBuffer, value: &str) -> Result<(), OomError> {
    buf.append(&[value.len() as u8])?;
    buf.append(value.as_bytes())?;
    buf.append(&[0])
}

/// Unpack a `string` or `object-path` value. Returns `(bytes consumed,
/// value)`. Validates UTF-8 but not path syntax -- callers that need
/// path validation call [`crate::validation::validate_path`] themselves
/// (this keeps the wire-level unpack usable for both types).
pub fn unpack_string<'a>(bytes: &'a [u8], order: ByteOrder) -> Result<(usize, &'a str), VErr> {
    let len = unpack_u32(bytes, order)? as usize;
    let needed = 4 + len + 1;
    if bytes.len() < needed {
        return Err(VErr::StringLengthOutOfBounds);
    }
    if bytes[4 + len] != 0 {
        return Err(VErr::StringMissingNul);
    }
    let s = std::str::from_utf8(&bytes[4..4 + len]).map_err(|_| VErr::BadUtf8InString)?;
    Ok((needed, s))
}

pub fn unpack_path<'a>(bytes: &'a [u8], order: ByteOrder) -> Result<(usize, &'a str), VErr> {
    let (n, s) = unpack_string(bytes, order)?;
    validation::validate_path(s).map_err(|_| VErr::BadPath)?;
    Ok((n, s))
}

/// Unpack a `signature` value (1-byte length prefix, max 255).
pub fn unpack_signature<'a>(bytes: &'a [u8]) -> Result<(usize, &'a str), VErr> {
    if bytes.is_empty() {
        return Err(VErr::SignatureLengthOutOfBounds);
    }
    let len = bytes[0] as usize;
    let needed = 1 + len + 1;
    if bytes.len() < needed {
        return Err(VErr::SignatureLengthOutOfBounds);
    }
    if bytes[1 + len] != 0 {
        return Err(VErr::SignatureMissingNul);
    }
    let s = std::str::from_utf8(&bytes[1..1 + len]).map_err(|_| VErr::BadUtf8InString)?;
    crate::signature::validate(s).map_err(|_| VErr::BadSignature)?;
    Ok((needed, s))
}
