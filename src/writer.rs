//! Component F: the recursive writer, and the realignment protocol
//! ([`set_basic`], [`delete`]) that mutates an already-marshalled body
//! in place.
//!
//! The container API mirrors libdbus's `dbus_message_iter_open_container`
//! / `dbus_message_iter_close_container` (`original_source/dbus/dbus-message.c`,
//! `dbus-marshal-recursive.c`): `open_array` and `open_variant` both take
//! the contained signature up front (an array's elements must share one
//! type; a variant wraps exactly one), while `open_struct` and
//! `open_dict_entry` need no signature argument because the matching
//! `close_*` call is itself the terminator. Builders push one `Frame`
//! per open container onto an explicit stack rather than rustbus's
//! per-Rust-type `Marshal` trait recursing through the call stack,
//! because the realignment protocol below needs to walk the same
//! nesting structure after the fact, outside of any write call.
//!
//! Once an array or variant's contained signature has been written (by
//! `open_array`/`open_variant` themselves), nothing nested inside it --
//! including struct fields several levels down -- writes to the
//! signature again; `suppress_depth` tracks how many such containers
//! are currently open so the suppression propagates through intervening
//! struct/dict-entry frames, which don't pre-declare their contents and
//! so don't affect it themselves.

use crate::basic;
use crate::buffer::ByteBuffer;
use crate::error::{MarshalError, OomError, ValidationError as VErr};
use crate::reader::{Mark, Reader, Value};
use crate::signature;
use crate::ByteOrder;

enum Frame {
    Struct { fields: usize },
    DictEntry { slot: usize },
    Array { len_pos: usize, start: usize },
    Variant,
}

/// Builds a `(signature, body)` pair field by field. `sig` and `body`
/// are owned by the caller (typically `Message`) and outlive the
/// writer; the writer only ever appends to or patches bytes already
/// written through it.
pub struct Writer<'o> {
    byteorder: ByteOrder,
    sig: &'o mut Vec<u8>,
    body: &'o mut ByteBuffer,
    stack: Vec<Frame>,
    /// Number of currently-open `Array`/`Variant` containers whose
    /// contained signature already fully describes everything nested
    /// inside them.
    suppress_depth: usize,
}

impl<'o> Writer<'o> {
    pub fn new(byteorder: ByteOrder, sig: &'o mut Vec<u8>, body: &'o mut ByteBuffer) -> Self {
        Writer { byteorder, sig, body, stack: Vec::new(), suppress_depth: 0 }
    }

    pub fn byteorder(&self) -> ByteOrder {
        self.byteorder
    }

    fn should_append_sig(&self) -> bool {
        self.suppress_depth == 0
    }

    /// Called after any value (basic or container) finishes writing,
    /// to bump the enclosing frame's field/slot counter.
    fn note_value_written(&mut self) {
        match self.stack.last_mut() {
            Some(Frame::Struct { fields }) => *fields += 1,
            Some(Frame::DictEntry { slot }) => *slot += 1,
            Some(Frame::Array { .. }) | Some(Frame::Variant) | None => {}
        }
    }

    fn append_sig_byte(&mut self, code: u8) -> Result<(), OomError> {
        self.sig.try_reserve(1).map_err(|_| OomError)?;
        self.sig.push(code);
        Ok(())
    }

    fn append_sig_str(&mut self, s: &str) -> Result<(), OomError> {
        self.sig.try_reserve(s.len()).map_err(|_| OomError)?;
        self.sig.extend_from_slice(s.as_bytes());
        Ok(())
    }

    /// Write one basic value. `value`'s variant determines both the
    /// type code appended to the signature (when this position calls
    /// for one) and the bytes appended to the body.
    pub fn write_basic(&mut self, value: Value<'_>) -> Result<(), MarshalError> {
        let code = basic_code_of(&value);
        if self.should_append_sig() {
            self.append_sig_byte(code).map_err(MarshalError::Oom)?;
        }
        let align = signature::alignment_of(code).map_err(MarshalError::Validation)?;
        self.body.pad_to_align(align as usize).map_err(MarshalError::Oom)?;
        match value {
            Value::Byte(v) => basic::pack_byte(self.body, v).map_err(MarshalError::Oom)?,
            Value::Boolean(v) => basic::pack_bool(self.body, self.byteorder, v).map_err(MarshalError::Oom)?,
            Value::Int16(v) => basic::pack_i16(self.body, self.byteorder, v).map_err(MarshalError::Oom)?,
            Value::Uint16(v) => basic::pack_u16(self.body, self.byteorder, v).map_err(MarshalError::Oom)?,
            Value::Int32(v) => basic::pack_i32(self.body, self.byteorder, v).map_err(MarshalError::Oom)?,
            Value::Uint32(v) => basic::pack_u32(self.body, self.byteorder, v).map_err(MarshalError::Oom)?,
            Value::Int64(v) => basic::pack_i64(self.body, self.byteorder, v).map_err(MarshalError::Oom)?,
            Value::Uint64(v) => basic::pack_u64(self.body, self.byteorder, v).map_err(MarshalError::Oom)?,
            Value::Double(v) => basic::pack_f64(self.body, self.byteorder, v).map_err(MarshalError::Oom)?,
            Value::Str(s) => basic::pack_string(self.body, self.byteorder, s).map_err(MarshalError::Oom)?,
            Value::Path(s) => {
                crate::validation::validate_path(s).map_err(MarshalError::Validation)?;
                basic::pack_string(self.body, self.byteorder, s).map_err(MarshalError::Oom)?
            }
            Value::Signature(s) => {
                signature::validate(s).map_err(MarshalError::Validation)?;
                basic::pack_signature(self.body, s).map_err(MarshalError::Oom)?
            }
        }
        self.note_value_written();
        Ok(())
    }

    /// Write a run of fixed-width elements as a single array in one
    /// call, skipping the per-element dispatch -- the `Reader` side's
    /// `read_fixed_multi` counterpart.
    pub fn write_fixed_multi_array(&mut self, element_code: u8, bytes_le_native: &[u8]) -> Result<(), MarshalError> {
        let elem_size = match element_code {
            signature::BYTE => 1,
            signature::INT16 | signature::UINT16 => 2,
            signature::INT32 | signature::UINT32 | signature::BOOLEAN => 4,
            signature::INT64 | signature::UINT64 | signature::DOUBLE => 8,
            _ => return Err(MarshalError::Validation(VErr::UnknownTypecode)),
        };
        if bytes_le_native.len() % elem_size != 0 {
            return Err(MarshalError::Validation(VErr::ArrayLengthIncorrect));
        }
        self.open_array(&(element_code as char).to_string())?;
        for chunk in bytes_le_native.chunks(elem_size) {
            self.body.append(chunk).map_err(MarshalError::Oom)?;
            self.note_value_written();
        }
        self.close()
    }

    pub fn open_struct(&mut self) -> Result<(), MarshalError> {
        if self.should_append_sig() {
            self.append_sig_byte(signature::STRUCT_START).map_err(MarshalError::Oom)?;
        }
        self.body.pad_to_align(8).map_err(MarshalError::Oom)?;
        self.stack.push(Frame::Struct { fields: 0 });
        Ok(())
    }

    pub fn open_dict_entry(&mut self) -> Result<(), MarshalError> {
        if self.should_append_sig() {
            self.append_sig_byte(signature::DICT_ENTRY_START).map_err(MarshalError::Oom)?;
        }
        self.body.pad_to_align(8).map_err(MarshalError::Oom)?;
        self.stack.push(Frame::DictEntry { slot: 0 });
        Ok(())
    }

    /// `contained_sig` must be exactly one complete type; it becomes
    /// the array's element signature and is validated up front so a
    /// malformed element type is rejected before any bytes are written.
    pub fn open_array(&mut self, contained_sig: &str) -> Result<(), MarshalError> {
        // Validate as `a` + `contained_sig` rather than `contained_sig`
        // alone: a dict's element type is a bare dict-entry (`{sv}`),
        // which is only legal signature syntax when immediately
        // preceded by `a` -- `signature::validate` rightly rejects it
        // standalone.
        let mut full = String::with_capacity(1 + contained_sig.len());
        full.push(signature::ARRAY as char);
        full.push_str(contained_sig);
        signature::validate(&full).map_err(MarshalError::Validation)?;
        let bytes = contained_sig.as_bytes();
        if signature::skip_one_complete_type(bytes, 0).map_err(MarshalError::Validation)? != bytes.len() {
            return Err(MarshalError::Validation(VErr::MissingArrayElementType));
        }
        if self.should_append_sig() {
            self.append_sig_byte(signature::ARRAY).map_err(MarshalError::Oom)?;
            self.append_sig_str(contained_sig).map_err(MarshalError::Oom)?;
        }
        self.body.pad_to_align(4).map_err(MarshalError::Oom)?;
        let len_pos = self.body.len();
        self.body.append(&[0, 0, 0, 0]).map_err(MarshalError::Oom)?;
        let elem_align = signature::alignment_of(bytes[0]).map_err(MarshalError::Validation)?;
        self.body.pad_to_align(elem_align as usize).map_err(MarshalError::Oom)?;
        let start = self.body.len();
        self.stack.push(Frame::Array { len_pos, start });
        self.suppress_depth += 1;
        Ok(())
    }

    /// `contained_sig` must be exactly one complete type; it is the
    /// variant's own signature and is written inline into the body
    /// immediately (libdbus writes the contained signature at
    /// `open_container` time too, not at `close_container`).
    pub fn open_variant(&mut self, contained_sig: &str) -> Result<(), MarshalError> {
        signature::validate(contained_sig).map_err(MarshalError::Validation)?;
        let bytes = contained_sig.as_bytes();
        if signature::skip_one_complete_type(bytes, 0).map_err(MarshalError::Validation)? != bytes.len() {
            return Err(MarshalError::Validation(VErr::VariantSignatureSpecifiesMultipleValues));
        }
        if self.should_append_sig() {
            self.append_sig_byte(signature::VARIANT).map_err(MarshalError::Oom)?;
        }
        basic::pack_signature(self.body, contained_sig).map_err(MarshalError::Oom)?;
        self.stack.push(Frame::Variant);
        self.suppress_depth += 1;
        Ok(())
    }

    /// Close whatever container was most recently opened.
    pub fn close(&mut self) -> Result<(), MarshalError> {
        match self.stack.pop() {
            Some(Frame::Struct { fields }) => {
                if fields == 0 {
                    return Err(MarshalError::Validation(VErr::StructHasNoFields));
                }
                if self.should_append_sig() {
                    self.append_sig_byte(signature::STRUCT_END).map_err(MarshalError::Oom)?;
                }
                self.note_value_written();
                Ok(())
            }
            Some(Frame::DictEntry { slot }) => {
                if slot != 2 {
                    return Err(MarshalError::Validation(VErr::StructStartedButNotEnded));
                }
                if self.should_append_sig() {
                    self.append_sig_byte(signature::DICT_ENTRY_END).map_err(MarshalError::Oom)?;
                }
                self.note_value_written();
                Ok(())
            }
            Some(Frame::Array { len_pos, start }) => {
                self.suppress_depth -= 1;
                let len = (self.body.len() - start) as u32;
                write_u32_at(self.body, len_pos, len, self.byteorder);
                self.note_value_written();
                Ok(())
            }
            Some(Frame::Variant) => {
                self.suppress_depth -= 1;
                self.note_value_written();
                Ok(())
            }
            None => Err(MarshalError::Validation(VErr::StructEndedButNotStarted)),
        }
    }
}

fn basic_code_of(value: &Value<'_>) -> u8 {
    match value {
        Value::Byte(_) => signature::BYTE,
        Value::Boolean(_) => signature::BOOLEAN,
        Value::Int16(_) => signature::INT16,
        Value::Uint16(_) => signature::UINT16,
        Value::Int32(_) => signature::INT32,
        Value::Uint32(_) => signature::UINT32,
        Value::Int64(_) => signature::INT64,
        Value::Uint64(_) => signature::UINT64,
        Value::Double(_) => signature::DOUBLE,
        Value::Str(_) => signature::STRING,
        Value::Path(_) => signature::OBJECT_PATH,
        Value::Signature(_) => signature::SIGNATURE,
    }
}

fn write_u32_at(body: &mut ByteBuffer, pos: usize, value: u32, order: ByteOrder) {
    let bytes = match order {
        ByteOrder::LittleEndian => value.to_le_bytes(),
        ByteOrder::BigEndian => value.to_be_bytes(),
    };
    for (i, b) in bytes.iter().enumerate() {
        body.set(pos + i, *b);
    }
}

/// Replace the basic value at `at` with whatever `encode` writes. A
/// fixed-width value (same size before and after) is overwritten in
/// place; a variable-length one goes through the full realignment
/// protocol below, since every sibling after it may need to shift.
///
/// `at` and `root` are [`Mark`]s rather than live [`Reader`]s: a
/// `Reader` borrows the body it walks, and that borrow would have to
/// stay alive across the very mutation this function performs on
/// `body_owner`, which the borrow checker rejects outright. A `Mark`
/// carries no borrow, so each read-only pass below reconstructs a
/// temporary `Reader` over `body_owner.as_slice()` inside its own
/// block and lets that borrow end before the next mutation.
pub fn set_basic(
    byteorder: ByteOrder,
    sig: &[u8],
    at: Mark,
    root: Mark,
    body_owner: &mut ByteBuffer,
    encode: impl FnOnce(&mut ByteBuffer) -> Result<(), OomError>,
) -> Result<(), MarshalError> {
    let (start, old_size, code, target_sig_pos) = {
        let at_reader = Reader::init_from_mark(byteorder, sig, body_owner.as_slice(), at);
        let code = at_reader.current_type();
        if !signature::is_basic(code) {
            return Err(MarshalError::Validation(VErr::UnknownTypecode));
        }
        let start = at_reader.value_start().map_err(to_marshal_err)?;
        let old_size = at_reader.sized_value_at(start, code).map_err(to_marshal_err)?;
        (start, old_size, code, at_reader.sig_pos())
    };

    if signature::is_basic_fixed(code) {
        let mut scratch = ByteBuffer::new();
        encode(&mut scratch).map_err(MarshalError::Oom)?;
        debug_assert_eq!(scratch.len(), old_size, "fixed-width basic type changed size");
        for (i, b) in scratch.as_slice().iter().enumerate() {
            body_owner.set(start + i, *b);
        }
        return Ok(());
    }

    realign_replace(byteorder, sig, root, start, target_sig_pos, body_owner, encode)
}

/// Remove the array element at `at`, then realign everything after it.
/// See [`set_basic`] for why `at`/`root` are `Mark`s rather than live
/// readers.
pub fn delete(
    byteorder: ByteOrder,
    sig: &[u8],
    at: Mark,
    root: Mark,
    body_owner: &mut ByteBuffer,
) -> Result<(), MarshalError> {
    let (start, target_sig_pos) = {
        let at_reader = Reader::init_from_mark(byteorder, sig, body_owner.as_slice(), at);
        if at_reader.current_type() == signature::INVALID {
            return Err(MarshalError::Validation(VErr::UnknownTypecode));
        }
        let start = at_reader.value_start().map_err(to_marshal_err)?;
        (start, at_reader.sig_pos())
    };

    realign_replace(byteorder, sig, root, start, target_sig_pos, body_owner, |_scratch| Ok(()))
}

fn to_marshal_err(e: crate::error::UnmarshalError) -> MarshalError {
    match e {
        crate::error::UnmarshalError::Validation(v) => MarshalError::Validation(v),
        _ => MarshalError::Validation(VErr::UnknownTypecode),
    }
}

/// One pending array-length correction: the array's length field lived
/// at `len_pos` in the *source* body (still true in `body_owner` after
/// the splice below, since the splice only touches bytes at or after
/// `start`, and every such array either encloses `start` -- its length
/// field necessarily comes before it -- or comes later and gets
/// spliced in as part of the replacement, not patched here).
struct Fixup {
    len_pos: usize,
    new_len: u32,
}

/// The realignment protocol (spec §4.F), grounded on
/// `dbus-marshal-recursive.c`'s `replacement_block_replace` /
/// `reader_set_basic_variable_length`: build a scratch buffer padded
/// to the same `% 8` residue as the value being replaced, write the
/// new value into it, then re-emit every value from `root` that
/// follows -- appending fresh padding as dictated by the scratch
/// buffer's own growing length rather than copying any padding bytes
/// from the source -- and splice the whole thing back over
/// `[start, end of root's span)`. Every array whose length field was
/// skipped while still "disabled" (not yet past the replaced value)
/// gets a [`Fixup`].
fn realign_replace(
    byteorder: ByteOrder,
    sig: &[u8],
    root: Mark,
    start: usize,
    target_sig_pos: usize,
    body_owner: &mut ByteBuffer,
    write_new_value: impl FnOnce(&mut ByteBuffer) -> Result<(), OomError>,
) -> Result<(), MarshalError> {
    let padding = start % 8;
    let mut scratch = ByteBuffer::new();
    for _ in 0..padding {
        scratch.append(&[0]).map_err(MarshalError::Oom)?;
    }
    write_new_value(&mut scratch).map_err(MarshalError::Oom)?;
    let new_value_len = scratch.len() - padding;

    let mut fixups = Vec::new();
    let final_end = {
        let mut walker = Reader::init_from_mark(byteorder, sig, body_owner.as_slice(), root);
        write_reader_partial(
            &mut scratch,
            &mut walker,
            Some((target_sig_pos, start)),
            new_value_len,
            &mut fixups,
        )?;
        walker.body_pos()
    };

    body_owner
        .splice_range(start, final_end, &scratch.as_slice()[padding..])
        .map_err(MarshalError::Oom)?;

    for f in fixups {
        write_u32_at(body_owner, f.len_pos, f.new_len, byteorder);
    }
    Ok(())
}

fn is_container(code: u8) -> bool {
    matches!(code, signature::ARRAY | signature::STRUCT_START | signature::DICT_ENTRY_START | signature::VARIANT)
}

/// If `enabled` is still false and `reader_pos` (a body offset) has
/// moved strictly past `start_after`'s, flip it on for good -- mirrors
/// `enable_if_after` in `dbus-marshal-recursive.c`, which never turns a
/// writer back off once turned on.
fn enable_if_after(enabled: &mut bool, reader_pos: usize, start_after: Option<(usize, usize)>) {
    if let Some((_, sa_pos)) = start_after {
        if !*enabled && reader_pos > sa_pos {
            *enabled = true;
        }
    }
}

/// Copy every value reachable from `reader` into `dest`, advancing
/// `reader` to its end. While the cursor is at or before
/// `start_after`'s body position nothing is written (the caller has
/// already written the `start_after_new_len`-byte replacement directly
/// into `dest`); writing turns on for good the moment the cursor moves
/// past it. Grounded on `_dbus_type_writer_write_reader_partial` /
/// `writer_write_reader_helper`.
fn write_reader_partial(
    dest: &mut ByteBuffer,
    reader: &mut Reader,
    start_after: Option<(usize, usize)>,
    start_after_new_len: usize,
    fixups: &mut Vec<Fixup>,
) -> Result<(), MarshalError> {
    let mut enabled = start_after.is_none();
    write_reader_helper(dest, reader, start_after, start_after_new_len, fixups, &mut enabled, false)
}

fn write_reader_helper(
    dest: &mut ByteBuffer,
    reader: &mut Reader,
    start_after: Option<(usize, usize)>,
    start_after_new_len: usize,
    fixups: &mut Vec<Fixup>,
    enabled: &mut bool,
    inside_start_after: bool,
) -> Result<(), MarshalError> {
    loop {
        let code = reader.current_type();
        if code == signature::INVALID {
            return Ok(());
        }

        if is_container(code) {
            let container_pos = reader.value_start().map_err(to_marshal_err)?;
            let this_is_start_after =
                !inside_start_after && start_after == Some((reader.sig_pos(), container_pos));

            let mut child = *reader;
            reader.recurse(&mut child).map_err(to_marshal_err)?;

            if !inside_start_after && !this_is_start_after {
                enable_if_after(enabled, child.body_pos(), start_after);
            }
            let enabled_at_recurse = *enabled;
            let dest_start = dest.len();
            let array_info = if code == signature::ARRAY { child.array_bounds() } else { None };

            let dest_len_pos =
                if enabled_at_recurse { open_in_dest(dest, code, reader, &child)? } else { None };

            write_reader_helper(
                dest,
                &mut child,
                start_after,
                start_after_new_len,
                fixups,
                enabled,
                inside_start_after || this_is_start_after,
            )?;

            if !inside_start_after && !this_is_start_after {
                enable_if_after(enabled, child.body_pos(), start_after);
            }
            let past_start_after = *enabled;

            if let Some(len_pos) = dest_len_pos {
                let written = (dest.len() - len_pos - 4) as u32;
                write_u32_at(dest, len_pos, written, reader.byteorder());
            }

            if start_after.is_some() && !enabled_at_recurse && past_start_after && code == signature::ARRAY {
                if let Some((astart, _alen, len_field_pos)) = array_info {
                    let sa_pos = start_after.expect("checked above").1;
                    let bytes_before = sa_pos - astart;
                    let bytes_after = dest.len() - dest_start;
                    let new_len = (bytes_before + start_after_new_len + bytes_after) as u32;
                    fixups.push(Fixup { len_pos: len_field_pos, new_len });
                }
            }
        } else {
            let value_pos = reader.value_start().map_err(to_marshal_err)?;
            if !inside_start_after {
                enable_if_after(enabled, value_pos, start_after);
            }
            if *enabled {
                let size = reader.sized_value_at(value_pos, code).map_err(to_marshal_err)?;
                let align = signature::alignment_of(code).map_err(MarshalError::Validation)?;
                dest.pad_to_align(align as usize).map_err(MarshalError::Oom)?;
                let bytes = reader.raw(value_pos, value_pos + size);
                dest.append(bytes).map_err(MarshalError::Oom)?;
            }
        }

        if !reader.next() {
            return Ok(());
        }
    }
}

/// Write the framing a fresh copy of this container needs before its
/// contents, returning the dest-buffer position of the array length
/// placeholder to patch once the contents are known (`None` for
/// struct/dict-entry/variant, which have nothing to patch).
fn open_in_dest(
    dest: &mut ByteBuffer,
    code: u8,
    reader: &Reader,
    child: &Reader,
) -> Result<Option<usize>, MarshalError> {
    match code {
        signature::STRUCT_START | signature::DICT_ENTRY_START => {
            dest.pad_to_align(8).map_err(MarshalError::Oom)?;
            Ok(None)
        }
        signature::ARRAY => {
            dest.pad_to_align(4).map_err(MarshalError::Oom)?;
            let len_pos = dest.len();
            dest.append(&[0, 0, 0, 0]).map_err(MarshalError::Oom)?;
            let elem_code = reader.element_type().map_err(to_marshal_err)?;
            let elem_align = signature::alignment_of(elem_code).map_err(MarshalError::Validation)?;
            dest.pad_to_align(elem_align as usize).map_err(MarshalError::Oom)?;
            Ok(Some(len_pos))
        }
        signature::VARIANT => {
            let header_start = reader.value_start().map_err(to_marshal_err)?;
            let header_end = child.body_pos();
            let bytes = reader.raw(header_start, header_end);
            dest.append(bytes).map_err(MarshalError::Oom)?;
            Ok(None)
        }
        _ => unreachable!("is_container only admits these four codes"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Reader;

    fn write_top_level(f: impl FnOnce(&mut Writer)) -> (Vec<u8>, ByteBuffer) {
        let mut sig = Vec::new();
        let mut body = ByteBuffer::new();
        {
            let mut w = Writer::new(ByteOrder::LittleEndian, &mut sig, &mut body);
            f(&mut w);
        }
        (sig, body)
    }

    #[test]
    fn writes_struct_of_string_and_int() {
        let (sig, body) = write_top_level(|w| {
            w.open_struct().unwrap();
            w.write_basic(Value::Str("hi")).unwrap();
            w.write_basic(Value::Int32(7)).unwrap();
            w.close().unwrap();
        });
        assert_eq!(sig, b"(si)");
        let top = Reader::init(ByteOrder::LittleEndian, &sig, 0, body.as_slice(), 0);
        let mut inner = top;
        top.recurse(&mut inner).unwrap();
        assert_eq!(inner.read_basic().unwrap(), Value::Str("hi"));
        inner.next();
        assert_eq!(inner.read_basic().unwrap(), Value::Int32(7));
    }

    #[test]
    fn writes_array_of_uint32_and_patches_length() {
        let (sig, body) = write_top_level(|w| {
            w.open_array("u").unwrap();
            w.write_basic(Value::Uint32(1)).unwrap();
            w.write_basic(Value::Uint32(2)).unwrap();
            w.write_basic(Value::Uint32(3)).unwrap();
            w.close().unwrap();
        });
        assert_eq!(sig, b"au");
        let top = Reader::init(ByteOrder::LittleEndian, &sig, 0, body.as_slice(), 0);
        let mut elems = top;
        top.recurse(&mut elems).unwrap();
        let mut out = Vec::new();
        loop {
            match elems.read_basic().unwrap() {
                Value::Uint32(v) => out.push(v),
                _ => panic!(),
            }
            if !elems.next() {
                break;
            }
        }
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn set_basic_grows_string_and_fixes_up_array_length() {
        let (sig, mut body) = write_top_level(|w| {
            w.open_array("s").unwrap();
            w.write_basic(Value::Str("a")).unwrap();
            w.write_basic(Value::Str("bb")).unwrap();
            w.close().unwrap();
        });
        let before_len = body.len();

        let (root_mark, at_mark) = {
            let top = Reader::init(ByteOrder::LittleEndian, &sig, 0, body.as_slice(), 0);
            let root_mark = top.save_mark();
            let mut elems = top;
            top.recurse(&mut elems).unwrap();
            // position at the second element ("bb")
            elems.next();
            (root_mark, elems.save_mark())
        };
        set_basic(ByteOrder::LittleEndian, &sig, at_mark, root_mark, &mut body, |b| {
            basic::pack_string(b, ByteOrder::LittleEndian, "much longer string")
        })
        .unwrap();

        assert!(body.len() > before_len);
        let top2 = Reader::init(ByteOrder::LittleEndian, &sig, 0, body.as_slice(), 0);
        let mut elems2 = top2;
        top2.recurse(&mut elems2).unwrap();
        assert_eq!(elems2.read_basic().unwrap(), Value::Str("a"));
        elems2.next();
        assert_eq!(elems2.read_basic().unwrap(), Value::Str("much longer string"));
        assert!(!elems2.next());
    }

    #[test]
    fn empty_struct_rejected_on_close() {
        let mut sig = Vec::new();
        let mut body = ByteBuffer::new();
        let mut w = Writer::new(ByteOrder::LittleEndian, &mut sig, &mut body);
        w.open_struct().unwrap();
        assert!(w.close().is_err());
    }
}
