//! Component G: the body validator. Walks a types-only reader in
//! lockstep with a byte-range cursor, confirming that a body blob is a
//! legal instance of its signature before anything downstream trusts
//! it.
//!
//! Generalizes rustbus's `wire::unmarshal::unmarshal_header`/
//! `unmarshal_dynamic_header` validation loops (which unmarshal and
//! *construct* a value while checking it) into a walk that only
//! checks, grounded on `original_source/dbus/dbus-marshal-validate.c`
//! (`_dbus_validate_body_with_reason`), which is structured the same
//! way: align, check padding is NUL, read a length prefix, recurse.

use crate::basic;
use crate::error::ValidationError as VErr;
use crate::reader::Reader;
use crate::signature;
use crate::ByteOrder;

/// Validate that `body` is a byte-exact instance of `signature`.
///
/// `signature` must already have passed [`crate::signature::validate`].
/// If `bytes_remaining` is `Some`, any bytes past the last value are
/// reported through it instead of being rejected as `TooMuchData` --
/// the loader uses this to find the true end of a message's fixed-size
/// body, while direct callers that expect an exact match pass `None`.
pub fn validate_body(
    byteorder: ByteOrder,
    signature: &str,
    body: &[u8],
    mut bytes_remaining: Option<&mut usize>,
) -> Result<(), VErr> {
    let sig_bytes = signature.as_bytes();
    let mut cursor = 0usize;
    let mut types = Reader::init(byteorder, sig_bytes, 0, body, 0);
    walk_top_level(&mut types, body, &mut cursor)?;
    if cursor > body.len() {
        return Err(VErr::NotEnoughData);
    }
    if cursor < body.len() {
        match bytes_remaining {
            Some(out) => *out = body.len() - cursor,
            None => return Err(VErr::TooMuchData),
        }
    } else if let Some(out) = bytes_remaining.as_deref_mut() {
        *out = 0;
    }
    Ok(())
}

/// Walk every top-level value in `reader`, advancing `cursor` to the
/// byte position just past the last one validated.
fn walk_top_level(reader: &mut Reader, body: &[u8], cursor: &mut usize) -> Result<(), VErr> {
    loop {
        let code = reader.current_type();
        if code == signature::INVALID {
            return Ok(());
        }
        *cursor = validate_one(reader, body)?;
        if !reader.next() {
            return Ok(());
        }
    }
}

/// Validate the single value at `reader`'s cursor, returning the body
/// offset just past it. Checks alignment padding is all-NUL, then
/// dispatches per type.
fn validate_one(reader: &Reader, body: &[u8]) -> Result<usize, VErr> {
    let code = reader.current_type();
    let align = signature::alignment_of(code)?;
    let aligned = align_up(reader.body_pos(), align as usize);
    check_padding_nul(body, reader.body_pos(), aligned)?;
    if aligned > body.len() {
        return Err(VErr::NotEnoughData);
    }

    if signature::is_basic_fixed(code) {
        let size = match code {
            signature::BYTE => 1,
            signature::INT16 | signature::UINT16 => 2,
            signature::INT32 | signature::UINT32 => 4,
            signature::DOUBLE | signature::INT64 | signature::UINT64 => 8,
            signature::BOOLEAN => {
                if body.len() < aligned + 4 {
                    return Err(VErr::NotEnoughData);
                }
                basic::unpack_bool(&body[aligned..], reader.byteorder())?;
                4
            }
            _ => unreachable!(),
        };
        if code != signature::BOOLEAN && body.len() < aligned + size {
            return Err(VErr::NotEnoughData);
        }
        return Ok(aligned + size);
    }

    match code {
        signature::STRING => {
            let (n, _) = basic::unpack_string(&body[aligned..], reader.byteorder())?;
            Ok(aligned + n)
        }
        signature::OBJECT_PATH => {
            let (n, _) = basic::unpack_path(&body[aligned..], reader.byteorder())?;
            Ok(aligned + n)
        }
        signature::SIGNATURE => {
            let (n, _) = basic::unpack_signature(&body[aligned..])?;
            Ok(aligned + n)
        }
        signature::STRUCT_START | signature::DICT_ENTRY_START => validate_struct(reader, body, aligned),
        signature::ARRAY => validate_array(reader, body, aligned),
        signature::VARIANT => validate_variant(reader, body, aligned),
        _ => Err(VErr::UnknownTypecode),
    }
}

fn validate_struct(reader: &Reader, body: &[u8], aligned: usize) -> Result<usize, VErr> {
    let mut inner = *reader;
    reader.recurse(&mut inner).map_err(to_verr)?;
    let mut cursor = aligned;
    walk_top_level(&mut inner, body, &mut cursor)?;
    Ok(cursor)
}

fn validate_array(reader: &Reader, body: &[u8], aligned: usize) -> Result<usize, VErr> {
    if body.len() < aligned + 4 {
        return Err(VErr::ArrayLengthOutOfBounds);
    }
    let len = basic::unpack_u32(&body[aligned..], reader.byteorder())? as usize;
    if len > signature::MAX_ARRAY_LENGTH_BYTES as usize {
        return Err(VErr::ArrayLengthExceedsMax);
    }
    let after_len = aligned + 4;
    if after_len + len > body.len() {
        return Err(VErr::ArrayLengthOutOfBounds);
    }

    let mut elems = *reader;
    reader.recurse(&mut elems).map_err(to_verr)?;
    let (start, decl_len, _len_field_pos) = elems
        .array_bounds()
        .expect("array recurse must yield an array cursor");
    debug_assert_eq!(decl_len, len);

    check_padding_nul(body, after_len, start)?;

    if len == 0 {
        return Ok(start);
    }

    let mut cursor = start;
    loop {
        if elems.current_type() == signature::INVALID {
            break;
        }
        cursor = validate_one(&elems, body)?;
        if cursor > start + len {
            return Err(VErr::ArrayLengthIncorrect);
        }
        if !elems.next() {
            break;
        }
    }
    if cursor != start + len {
        return Err(VErr::ArrayLengthIncorrect);
    }
    Ok(cursor)
}

fn validate_variant(reader: &Reader, body: &[u8], aligned: usize) -> Result<usize, VErr> {
    if aligned >= body.len() {
        return Err(VErr::VariantSignatureLengthOutOfBounds);
    }
    let sig_len = body[aligned] as usize;
    let needed = 1 + sig_len + 1;
    if aligned + needed > body.len() {
        return Err(VErr::VariantSignatureLengthOutOfBounds);
    }
    if body[aligned + 1 + sig_len] != 0 {
        return Err(VErr::VariantSignatureMissingNul);
    }
    let inline_sig = std::str::from_utf8(&body[aligned + 1..aligned + 1 + sig_len])
        .map_err(|_| VErr::VariantSignatureBad)?;
    if inline_sig.is_empty() {
        return Err(VErr::VariantSignatureEmpty);
    }
    signature::validate(inline_sig).map_err(|_| VErr::VariantSignatureBad)?;
    let type_len = signature::len_of_complete_type(inline_sig.as_bytes(), 0)?;
    if type_len != inline_sig.len() {
        return Err(VErr::VariantSignatureSpecifiesMultipleValues);
    }

    let mut inner = *reader;
    reader.recurse(&mut inner).map_err(to_verr)?;
    let mut cursor = inner.body_pos();
    if inner.current_type() != signature::INVALID {
        cursor = validate_one(&inner, body)?;
        if inner.next() {
            return Err(VErr::VariantSignatureSpecifiesMultipleValues);
        }
    }
    Ok(cursor)
}

fn to_verr(e: crate::error::UnmarshalError) -> VErr {
    match e {
        crate::error::UnmarshalError::Validation(v) => v,
        _ => VErr::UnknownTypecode,
    }
}

fn check_padding_nul(body: &[u8], from: usize, to: usize) -> Result<(), VErr> {
    if to > body.len() {
        return Err(VErr::NotEnoughData);
    }
    if body[from..to].iter().any(|&b| b != 0) {
        return Err(VErr::AlignmentPaddingNotNul);
    }
    Ok(())
}

fn align_up(pos: usize, align: usize) -> usize {
    let rem = pos % align;
    if rem == 0 {
        pos
    } else {
        pos + (align - rem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic;
    use crate::buffer::ByteBuffer;

    #[test]
    fn valid_struct_body() {
        let mut body = ByteBuffer::new();
        basic::pack_string(&mut body, ByteOrder::LittleEndian, "hi").unwrap();
        body.pad_to_align(4).unwrap();
        basic::pack_i32(&mut body, ByteOrder::LittleEndian, 7).unwrap();
        assert_eq!(
            validate_body(ByteOrder::LittleEndian, "si", body.as_slice(), None),
            Ok(())
        );
    }

    #[test]
    fn too_much_data_rejected() {
        let mut body = ByteBuffer::new();
        basic::pack_i32(&mut body, ByteOrder::LittleEndian, 1).unwrap();
        body.append(&[9, 9, 9, 9]).unwrap();
        assert_eq!(
            validate_body(ByteOrder::LittleEndian, "i", body.as_slice(), None),
            Err(VErr::TooMuchData)
        );
    }

    #[test]
    fn bytes_remaining_reports_trailer_when_requested() {
        let mut body = ByteBuffer::new();
        basic::pack_i32(&mut body, ByteOrder::LittleEndian, 1).unwrap();
        body.append(&[9, 9, 9, 9]).unwrap();
        let mut remaining = 0;
        validate_body(ByteOrder::LittleEndian, "i", body.as_slice(), Some(&mut remaining)).unwrap();
        assert_eq!(remaining, 4);
    }

    #[test]
    fn array_length_mismatch_rejected() {
        let mut body = ByteBuffer::new();
        basic::pack_u32(&mut body, ByteOrder::LittleEndian, 8).unwrap();
        basic::pack_u32(&mut body, ByteOrder::LittleEndian, 1).unwrap();
        assert_eq!(
            validate_body(ByteOrder::LittleEndian, "au", body.as_slice(), None),
            Err(VErr::NotEnoughData)
        );
    }

    #[test]
    fn dict_body_round_trips() {
        let mut body = ByteBuffer::new();
        basic::pack_u32(&mut body, ByteOrder::LittleEndian, 0).unwrap();
        let len_pos = 0;
        let start = body.len();
        body.pad_to_align(8).unwrap();
        basic::pack_string(&mut body, ByteOrder::LittleEndian, "foo").unwrap();
        body.pad_to_align(4).unwrap();
        basic::pack_u32(&mut body, ByteOrder::LittleEndian, 42).unwrap();
        let len = (body.len() - start) as u32;
        for (i, b) in len.to_le_bytes().iter().enumerate() {
            body.set(len_pos + i, *b);
        }
        assert_eq!(
            validate_body(ByteOrder::LittleEndian, "a{su}", body.as_slice(), None),
            Ok(())
        );
    }

    #[test]
    fn variant_with_two_types_rejected() {
        let mut body = ByteBuffer::new();
        basic::pack_signature(&mut body, "ii").unwrap();
        body.pad_to_align(4).unwrap();
        basic::pack_i32(&mut body, ByteOrder::LittleEndian, 1).unwrap();
        basic::pack_i32(&mut body, ByteOrder::LittleEndian, 2).unwrap();
        assert_eq!(
            validate_body(ByteOrder::LittleEndian, "v", body.as_slice(), None),
            Err(VErr::VariantSignatureSpecifiesMultipleValues)
        );
    }
}
