//! Component E: the recursive reader. A cursor that walks a
//! `(signature, body)` pair, recursing into and stepping over
//! containers without ever copying the body.
//!
//! Modeled as one sum type dispatched by `match` rather than rustbus's
//! per-Rust-type `Unmarshal` trait dispatch (`wire::unmarshal::traits`),
//! because a
//! reader's behaviour here varies by *container kind*, not by the
//! concrete Rust type the caller eventually wants -- the same state
//! machine drives `struct`, `array` and `variant` alike. `ReaderKind`
//! is that sum type; `Mark`/`init_from_mark` depend on its variants
//! being small stable integers, grounded on
//! `dbus-marshal-recursive.c`'s `DBusTypeReader` (`original_source/`).

use crate::basic;
use crate::error::{UnmarshalError as UErr, ValidationError as VErr};
use crate::signature;
use crate::ByteOrder;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReaderKind {
    TopLevel = 0,
    Struct = 1,
    StructTypesOnly = 2,
    Array = 3,
    ArrayTypesOnly = 4,
    Variant = 5,
}

impl ReaderKind {
    fn is_types_only(self) -> bool {
        matches!(self, ReaderKind::StructTypesOnly | ReaderKind::ArrayTypesOnly)
    }
}

#[derive(Clone, Copy, Debug)]
struct ArrayCursor {
    /// Body position of the first element.
    start: usize,
    /// Declared length of the array contents, in bytes.
    len: usize,
    /// Body position of the 4-byte length field itself.
    len_field_pos: usize,
}

/// A value borrowed from a basic value at the reader's cursor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value<'b> {
    Byte(u8),
    Boolean(bool),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Double(f64),
    Str(&'b str),
    Path(&'b str),
    Signature(&'b str),
}

/// A compressed, restorable snapshot of a reader's position. Valid
/// only against the same `(sig, body)` buffers the reader was built
/// from.
#[derive(Clone, Copy, Debug)]
pub struct Mark {
    kind: ReaderKind,
    sig_pos: usize,
    body_pos: usize,
    array: Option<ArrayCursor>,
    finished: bool,
    types_only: bool,
}

/// Cursor over a `(signature, body)` pair. `sig` and `body` may alias
/// the same backing storage (a variant's inline signature lives inside
/// its own value block), so both borrow with the same lifetime.
#[derive(Clone, Copy, Debug)]
pub struct Reader<'b> {
    byteorder: ByteOrder,
    sig: &'b [u8],
    sig_pos: usize,
    body: &'b [u8],
    body_pos: usize,
    kind: ReaderKind,
    array: Option<ArrayCursor>,
    /// True for a cursor over types only, with no value block -- used
    /// by validators (component G) and header scanning.
    types_only: bool,
    /// Set once a struct reader has walked past its last field, or an
    /// array reader has reached its end; `current_type` reports
    /// `INVALID` from then on.
    finished: bool,
}

impl<'b> Reader<'b> {
    /// Fresh top-level cursor over an entire message body.
    pub fn init(byteorder: ByteOrder, sig: &'b [u8], sig_pos: usize, body: &'b [u8], body_pos: usize) -> Self {
        Reader {
            byteorder,
            sig,
            sig_pos,
            body,
            body_pos,
            kind: ReaderKind::TopLevel,
            array: None,
            types_only: false,
            finished: false,
        }
    }

    /// A cursor over a signature with no value block, used by
    /// validators that only need to walk types (component G's
    /// types-only lockstep walk, or header-field scanning).
    pub fn init_types_only(sig: &'b [u8], sig_pos: usize) -> Self {
        Reader {
            byteorder: ByteOrder::LittleEndian,
            sig,
            sig_pos,
            body: &[],
            body_pos: 0,
            kind: ReaderKind::TopLevel,
            array: None,
            types_only: true,
            finished: false,
        }
    }

    pub fn byteorder(&self) -> ByteOrder {
        self.byteorder
    }

    pub fn kind(&self) -> ReaderKind {
        self.kind
    }

    pub fn sig_pos(&self) -> usize {
        self.sig_pos
    }

    pub fn body_pos(&self) -> usize {
        self.body_pos
    }

    pub fn is_types_only(&self) -> bool {
        self.types_only
    }

    /// The type code at the cursor, or `INVALID` at the end of the
    /// current container.
    pub fn current_type(&self) -> u8 {
        if self.finished {
            return signature::INVALID;
        }
        match self.kind {
            ReaderKind::Struct | ReaderKind::StructTypesOnly => {
                if self.sig_pos >= self.sig.len() || self.sig[self.sig_pos] == signature::STRUCT_END {
                    signature::INVALID
                } else {
                    self.sig[self.sig_pos]
                }
            }
            ReaderKind::Array | ReaderKind::ArrayTypesOnly => {
                let at_end = if self.types_only {
                    self.finished
                } else {
                    let ac = self.array.expect("array reader without ArrayCursor");
                    self.body_pos >= ac.start + ac.len
                };
                if at_end {
                    signature::INVALID
                } else {
                    signature::first_code_at(self.sig, self.sig_pos)
                }
            }
            ReaderKind::Variant | ReaderKind::TopLevel => signature::first_code_at(self.sig, self.sig_pos),
        }
    }

    /// Precondition: `current_type() == ARRAY`. The element type of
    /// the array about to be recursed into.
    pub fn element_type(&self) -> Result<u8, UErr> {
        if self.current_type() != signature::ARRAY {
            return Err(UErr::NotAContainer);
        }
        Ok(signature::first_code_at(self.sig, self.sig_pos + 1))
    }

    pub fn has_next(&self) -> bool {
        self.current_type() != signature::INVALID
    }

    /// `(start, len, len_field_pos)` of the array region this reader
    /// is positioned over. `None` outside of an `Array` reader.
    pub(crate) fn array_bounds(&self) -> Option<(usize, usize, usize)> {
        self.array.map(|ac| (ac.start, ac.len, ac.len_field_pos))
    }

    /// The body offset the value at the cursor actually starts at,
    /// after skipping alignment padding for `current_type()`'s
    /// alignment rule, applied lazily on read rather than eagerly
    /// maintained as an invariant.
    pub(crate) fn value_start(&self) -> Result<usize, UErr> {
        let code = self.current_type();
        if code == signature::INVALID {
            return Err(UErr::EndOfContainer);
        }
        let align = signature::alignment_of(code).map_err(UErr::Validation)?;
        Ok(align_up(self.body_pos, align as usize))
    }

    /// Enter the current container, positioning `out` as its child
    /// reader. Precondition: `current_type()` is a container code.
    pub fn recurse(&self, out: &mut Reader<'b>) -> Result<(), UErr> {
        match self.current_type() {
            signature::STRUCT_START | signature::DICT_ENTRY_START => {
                let body_pos = if self.types_only { self.body_pos } else { self.value_start()? };
                *out = Reader {
                    byteorder: self.byteorder,
                    sig: self.sig,
                    sig_pos: self.sig_pos + 1,
                    body: self.body,
                    body_pos,
                    kind: if self.types_only {
                        ReaderKind::StructTypesOnly
                    } else {
                        ReaderKind::Struct
                    },
                    array: None,
                    types_only: self.types_only,
                    finished: false,
                };
                Ok(())
            }
            signature::ARRAY => {
                let elem_sig_pos = self.sig_pos + 1;
                if self.types_only {
                    *out = Reader {
                        byteorder: self.byteorder,
                        sig: self.sig,
                        sig_pos: elem_sig_pos,
                        body: self.body,
                        body_pos: self.body_pos,
                        kind: ReaderKind::ArrayTypesOnly,
                        array: None,
                        types_only: true,
                        finished: false,
                    };
                    return Ok(());
                }
                let len_field_pos = align_up(self.body_pos, 4);
                let len = basic::unpack_u32(&self.body[len_field_pos..], self.byteorder)
                    .map_err(UErr::Validation)? as usize;
                let after_len = len_field_pos + 4;
                let elem_code = signature::first_code_at(self.sig, elem_sig_pos);
                let align = signature::alignment_of(elem_code).map_err(UErr::Validation)?;
                let start = align_up(after_len, align as usize);
                *out = Reader {
                    byteorder: self.byteorder,
                    sig: self.sig,
                    sig_pos: elem_sig_pos,
                    body: self.body,
                    body_pos: start,
                    kind: ReaderKind::Array,
                    array: Some(ArrayCursor { start, len, len_field_pos }),
                    types_only: false,
                    finished: len == 0,
                };
                Ok(())
            }
            signature::VARIANT => {
                if self.types_only {
                    return Err(UErr::NotAContainer);
                }
                let pos = self.value_start()?;
                let (consumed, inline_sig) =
                    basic::unpack_signature(&self.body[pos..]).map_err(UErr::Validation)?;
                let mut n_types = 0usize;
                let mut p = 0usize;
                let sig_bytes_len = inline_sig.len();
                let sig_start = pos + 1;
                while p < sig_bytes_len {
                    p = signature::skip_one_complete_type(inline_sig.as_bytes(), p).map_err(UErr::Validation)?;
                    n_types += 1;
                }
                if n_types == 0 {
                    return Err(UErr::Validation(VErr::VariantSignatureEmpty));
                }
                if n_types > 1 {
                    return Err(UErr::Validation(VErr::VariantSignatureSpecifiesMultipleValues));
                }
                let value_pos = pos + consumed;
                *out = Reader {
                    byteorder: self.byteorder,
                    // The variant's type string lives inside its own
                    // value block, so the sub-reader's signature
                    // buffer aliases the body rather than `self.sig`.
                    sig: &self.body[sig_start..sig_start + sig_bytes_len],
                    sig_pos: 0,
                    body: self.body,
                    body_pos: value_pos,
                    kind: ReaderKind::Variant,
                    array: None,
                    types_only: false,
                    finished: false,
                };
                Ok(())
            }
            _ => Err(UErr::NotAContainer),
        }
    }

    /// Advance past the value at the cursor. Returns `false` once the
    /// container is exhausted (mirrors the source's combined
    /// has-more-and-advance step).
    pub fn next(&mut self) -> bool {
        if self.finished {
            return false;
        }
        let code = self.current_type();
        if code == signature::INVALID {
            self.finished = true;
            return false;
        }
        match self.kind {
            ReaderKind::Array => {
                let ac = self.array.expect("array reader without ArrayCursor");
                let start = self.value_start().unwrap_or(self.body_pos);
                let size = self.sized_value_at(start, code).unwrap_or(0);
                self.body_pos = start + size;
                if self.body_pos >= ac.start + ac.len {
                    self.finished = true;
                    return false;
                }
                true
            }
            ReaderKind::ArrayTypesOnly => {
                // Types-only arrays expose exactly one representative
                // element then stop; there is no length to bound them.
                self.finished = true;
                false
            }
            ReaderKind::Struct | ReaderKind::StructTypesOnly | ReaderKind::TopLevel => {
                if !self.types_only {
                    let start = self.value_start().unwrap_or(self.body_pos);
                    let size = self.sized_value_at(start, code).unwrap_or(0);
                    self.body_pos = start + size;
                }
                match signature::skip_one_complete_type(self.sig, self.sig_pos) {
                    Ok(p) => self.sig_pos = p,
                    Err(_) => {
                        self.finished = true;
                        return false;
                    }
                }
                if self.current_type() == signature::INVALID {
                    self.finished = true;
                    false
                } else {
                    true
                }
            }
            ReaderKind::Variant => {
                self.finished = true;
                false
            }
        }
    }

    /// Total on-wire size, in bytes, of the value of type `code`
    /// starting at the already-aligned offset `pos`.
    pub(crate) fn sized_value_at(&self, pos: usize, code: u8) -> Result<usize, UErr> {
        if signature::is_basic_fixed(code) {
            return Ok(match code {
                signature::BYTE => 1,
                signature::INT16 | signature::UINT16 => 2,
                signature::INT32 | signature::UINT32 | signature::BOOLEAN => 4,
                signature::INT64 | signature::UINT64 | signature::DOUBLE => 8,
                _ => unreachable!(),
            });
        }
        if code == signature::STRING || code == signature::OBJECT_PATH {
            let len = basic::unpack_u32(&self.body[pos..], self.byteorder).map_err(UErr::Validation)?;
            return Ok(4 + len as usize + 1);
        }
        if code == signature::SIGNATURE {
            let len = *self.body.get(pos).ok_or(UErr::Validation(VErr::NotEnoughData))? as usize;
            return Ok(1 + len + 1);
        }
        // Containers: build a reader positioned exactly at `pos` and
        // let recurse/next compute the extent, since those already
        // know each container kind's framing.
        let mut at_pos = *self;
        at_pos.body_pos = pos;
        at_pos.finished = false;
        if code == signature::VARIANT {
            let mut child = at_pos;
            at_pos.recurse(&mut child)?;
            let val_code = child.current_type();
            let val_size = if val_code == signature::INVALID {
                0
            } else {
                child.sized_value_at(child.body_pos, val_code)?
            };
            return Ok((child.body_pos - pos) + val_size);
        }
        if code == signature::STRUCT_START || code == signature::DICT_ENTRY_START {
            let mut child = at_pos;
            at_pos.recurse(&mut child)?;
            while child.has_next() {
                child.next();
            }
            return Ok(child.body_pos - pos);
        }
        if code == signature::ARRAY {
            let mut child = at_pos;
            at_pos.recurse(&mut child)?;
            let ac = child.array.expect("array child missing cursor");
            return Ok((ac.start - pos) + ac.len);
        }
        Err(UErr::Validation(VErr::UnknownTypecode))
    }

    /// Precondition: `signature::is_basic(current_type())`.
    pub fn read_basic(&self) -> Result<Value<'b>, UErr> {
        let code = self.current_type();
        let pos = self.value_start()?;
        let bytes = &self.body[pos..];
        Ok(match code {
            signature::BYTE => Value::Byte(basic::unpack_byte(bytes).map_err(UErr::Validation)?),
            signature::BOOLEAN => {
                Value::Boolean(basic::unpack_bool(bytes, self.byteorder).map_err(UErr::Validation)?)
            }
            signature::INT16 => {
                Value::Int16(basic::unpack_i16(bytes, self.byteorder).map_err(UErr::Validation)?)
            }
            signature::UINT16 => {
                Value::Uint16(basic::unpack_u16(bytes, self.byteorder).map_err(UErr::Validation)?)
            }
            signature::INT32 => {
                Value::Int32(basic::unpack_i32(bytes, self.byteorder).map_err(UErr::Validation)?)
            }
            signature::UINT32 => {
                Value::Uint32(basic::unpack_u32(bytes, self.byteorder).map_err(UErr::Validation)?)
            }
            signature::INT64 => {
                Value::Int64(basic::unpack_i64(bytes, self.byteorder).map_err(UErr::Validation)?)
            }
            signature::UINT64 => {
                Value::Uint64(basic::unpack_u64(bytes, self.byteorder).map_err(UErr::Validation)?)
            }
            signature::DOUBLE => {
                Value::Double(basic::unpack_f64(bytes, self.byteorder).map_err(UErr::Validation)?)
            }
            signature::STRING => {
                Value::Str(basic::unpack_string(bytes, self.byteorder).map_err(UErr::Validation)?.1)
            }
            signature::OBJECT_PATH => {
                Value::Path(basic::unpack_path(bytes, self.byteorder).map_err(UErr::Validation)?.1)
            }
            signature::SIGNATURE => {
                Value::Signature(basic::unpack_signature(bytes).map_err(UErr::Validation)?.1)
            }
            _ => return Err(UErr::WrongType),
        })
    }

    /// Precondition: the reader is inside an array of fixed-width
    /// basic elements. Returns the raw remaining element bytes and the
    /// element count; callers reinterpret per element type (the
    /// teacher's `dbus_message_iter_get_fixed_array` equivalent).
    pub fn read_fixed_multi(&self) -> Result<(&'b [u8], usize), UErr> {
        let ac = self.array.ok_or(UErr::NotAContainer)?;
        let code = signature::first_code_at(self.sig, self.sig_pos);
        if !signature::is_basic_fixed(code) {
            return Err(UErr::WrongType);
        }
        let elem_size = match code {
            signature::BYTE => 1,
            signature::INT16 | signature::UINT16 => 2,
            signature::INT32 | signature::UINT32 | signature::BOOLEAN => 4,
            signature::INT64 | signature::UINT64 | signature::DOUBLE => 8,
            _ => unreachable!(),
        };
        let pos = self.value_start().unwrap_or(self.body_pos);
        let remaining = ac.start + ac.len - pos;
        Ok((&self.body[pos..pos + remaining], remaining / elem_size))
    }

    /// Raw source bytes `[start, end)`. Used by the realignment
    /// protocol (component F) to copy an already-encoded value
    /// verbatim into a new position -- a value's bytes never depend on
    /// where it sits, only the padding in front of it does.
    pub(crate) fn raw(&self, start: usize, end: usize) -> &'b [u8] {
        &self.body[start..end]
    }

    pub fn save_mark(&self) -> Mark {
        Mark {
            kind: self.kind,
            sig_pos: self.sig_pos,
            body_pos: self.body_pos,
            array: self.array,
            finished: self.finished,
            types_only: self.types_only,
        }
    }

    pub fn init_from_mark(byteorder: ByteOrder, sig: &'b [u8], body: &'b [u8], mark: Mark) -> Self {
        Reader {
            byteorder,
            sig,
            sig_pos: mark.sig_pos,
            body,
            body_pos: mark.body_pos,
            kind: mark.kind,
            array: mark.array,
            types_only: mark.types_only,
            finished: mark.finished,
        }
    }

}

pub(crate) fn align_up(pos: usize, align: usize) -> usize {
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
    use crate::buffer::ByteBuffer;

    #[test]
    fn reads_int32_and_advances() {
        let sig = b"ii".to_vec();
        let mut body = ByteBuffer::new();
        basic::pack_i32(&mut body, ByteOrder::LittleEndian, 1).unwrap();
        basic::pack_i32(&mut body, ByteOrder::LittleEndian, 2).unwrap();
        let mut r = Reader::init(ByteOrder::LittleEndian, &sig, 0, body.as_slice(), 0);
        assert_eq!(r.read_basic().unwrap(), Value::Int32(1));
        assert!(r.next());
        assert_eq!(r.read_basic().unwrap(), Value::Int32(2));
        assert!(!r.next());
        assert_eq!(r.current_type(), signature::INVALID);
    }

    #[test]
    fn recurse_into_struct() {
        let sig = b"(si)".to_vec();
        let mut body = ByteBuffer::new();
        basic::pack_string(&mut body, ByteOrder::LittleEndian, "hi").unwrap();
        basic::pack_i32(&mut body, ByteOrder::LittleEndian, 7).unwrap();
        let top = Reader::init(ByteOrder::LittleEndian, &sig, 0, body.as_slice(), 0);
        let mut inner = top;
        top.recurse(&mut inner).unwrap();
        assert_eq!(inner.read_basic().unwrap(), Value::Str("hi"));
        inner.next();
        assert_eq!(inner.read_basic().unwrap(), Value::Int32(7));
        assert!(!inner.next());
    }

    #[test]
    fn struct_aligns_8_bytes_before_value() {
        // "yi(si)" -- byte then int32 then struct, forcing a pad
        // before the struct's 8-byte alignment.
        let sig = b"yi(si)".to_vec();
        let mut body = ByteBuffer::new();
        basic::pack_byte(&mut body, 1).unwrap();
        body.pad_to_align(4).unwrap();
        basic::pack_i32(&mut body, ByteOrder::LittleEndian, 2).unwrap();
        body.pad_to_align(8).unwrap();
        basic::pack_string(&mut body, ByteOrder::LittleEndian, "x").unwrap();
        body.pad_to_align(4).unwrap();
        basic::pack_i32(&mut body, ByteOrder::LittleEndian, 9).unwrap();

        let mut top = Reader::init(ByteOrder::LittleEndian, &sig, 0, body.as_slice(), 0);
        assert_eq!(top.read_basic().unwrap(), Value::Byte(1));
        top.next();
        assert_eq!(top.read_basic().unwrap(), Value::Int32(2));
        top.next();
        assert_eq!(top.current_type(), signature::STRUCT_START);
        let mut inner = top;
        top.recurse(&mut inner).unwrap();
        assert_eq!(inner.read_basic().unwrap(), Value::Str("x"));
        inner.next();
        assert_eq!(inner.read_basic().unwrap(), Value::Int32(9));
    }

    #[test]
    fn recurse_into_empty_array_yields_invalid() {
        let sig = b"ai".to_vec();
        let mut body = ByteBuffer::new();
        basic::pack_u32(&mut body, ByteOrder::LittleEndian, 0).unwrap();
        let top = Reader::init(ByteOrder::LittleEndian, &sig, 0, body.as_slice(), 0);
        let mut elems = top;
        top.recurse(&mut elems).unwrap();
        assert_eq!(elems.current_type(), signature::INVALID);
    }

    #[test]
    fn array_of_uint32_roundtrips() {
        let sig = b"au".to_vec();
        let values = [0x1234_5678u32, 0x2345_6781, 0x3456_7812, 0x4567_8123];
        let mut body = ByteBuffer::new();
        basic::pack_u32(&mut body, ByteOrder::LittleEndian, (values.len() * 4) as u32).unwrap();
        for v in values {
            basic::pack_u32(&mut body, ByteOrder::LittleEndian, v).unwrap();
        }
        let top = Reader::init(ByteOrder::LittleEndian, &sig, 0, body.as_slice(), 0);
        let mut elems = top;
        top.recurse(&mut elems).unwrap();
        let mut seen = Vec::new();
        loop {
            seen.push(match elems.read_basic().unwrap() {
                Value::Uint32(v) => v,
                _ => panic!("expected uint32"),
            });
            if !elems.next() {
                break;
            }
        }
        assert_eq!(seen, values);
    }

    #[test]
    fn variant_wraps_int32() {
        let sig = b"v".to_vec();
        let mut body = ByteBuffer::new();
        basic::pack_signature(&mut body, "i").unwrap();
        body.pad_to_align(4).unwrap();
        basic::pack_i32(&mut body, ByteOrder::LittleEndian, 3).unwrap();
        let top = Reader::init(ByteOrder::LittleEndian, &sig, 0, body.as_slice(), 0);
        let mut inner = top;
        top.recurse(&mut inner).unwrap();
        assert_eq!(inner.read_basic().unwrap(), Value::Int32(3));
    }

    #[test]
    fn mark_restores_position() {
        let sig = b"ii".to_vec();
        let mut body = ByteBuffer::new();
        basic::pack_i32(&mut body, ByteOrder::LittleEndian, 1).unwrap();
        basic::pack_i32(&mut body, ByteOrder::LittleEndian, 2).unwrap();
        let mut r = Reader::init(ByteOrder::LittleEndian, &sig, 0, body.as_slice(), 0);
        r.next();
        let mark = r.save_mark();
        assert_eq!(r.read_basic().unwrap(), Value::Int32(2));
        let restored = Reader::init_from_mark(ByteOrder::LittleEndian, &sig, body.as_slice(), mark);
        assert_eq!(restored.read_basic().unwrap(), Value::Int32(2));
    }
}
