//! Component I: the streaming message loader. Accumulates bytes handed
//! in from an arbitrary chunking, discovers message boundaries without
//! ever assuming a chunk boundary lines up with a message boundary,
//! and yields fully-validated [`Message`]s or goes sticky-corrupted.
//!
//! Grounded on rustbus's `client_conn::Conn` buffering dance
//! (`bytes_needed_for_current_message` / `buffer_contains_whole_message`
//! / `read_whole_message`, `src/client_conn.rs`) for the accumulate-
//! then-check-for-a-full-message shape, and `unmarshal::{unmarshal_header,
//! unmarshal_header_fields, unmarshal_header_field}` (`src/unmarshal.rs`)
//! for which header fields exist and what each one's wire type is.
//! The field array itself is walked with the recursive reader
//! (component E) and checked byte-exact with the body validator
//! (component G) instead of rustbus's manual `buf.remove(0)` loop,
//! since both components already know the framing rules and a loader
//! built on top of them can't disagree with the validator it calls.

use std::collections::VecDeque;

use crate::body_validate;
use crate::error::{OomError, ValidationError as VErr};
use crate::message::{self, Message, MessageType};
use crate::reader::{align_up, Reader, Value};
use crate::signature;
use crate::validation;
use crate::ByteOrder;

/// Used when the caller doesn't configure a cap explicitly.
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 32 * 1024 * 1024;
/// No cap passed to [`Loader::new`] may exceed this; messages longer
/// than it are rejected regardless -- a protocol-wide hard cap no
/// caller-supplied limit can raise.
pub const PROTOCOL_MESSAGE_LENGTH_CEILING: u32 = 0x7FFF_FFFF;

const DBUS_PATH_LOCAL: &str = "/org/freedesktop/DBus/Local";
const DBUS_INTERFACE_LOCAL: &str = "org.freedesktop.DBus.Local";
const CHUNK_SIZE: usize = 4096;
/// Fixed prologue plus the header-fields array, expressed as a
/// signature so the existing reader/validator can walk it instead of
/// a bespoke byte-offset parser: four bytes, two uint32s, then the
/// `(yv)` array.
const HEADER_SHAPE: &[u8] = b"yyyyuua(yv)";

/// Accepts raw bytes in arbitrary chunks and turns them into complete,
/// validated messages. Once any chunk proves invalid the loader goes
/// corrupted and stays that way: a transport that
/// sees `is_corrupted()` true should close the connection rather than
/// keep feeding it.
pub struct Loader {
    max_message_size: u32,
    accumulator: Vec<u8>,
    /// Placeholder bytes appended by the in-flight [`Loader::get_buffer`]
    /// call that [`Loader::return_buffer`] hasn't resolved yet.
    spare: usize,
    queue: VecDeque<Message>,
    corrupted: Option<VErr>,
}

impl Loader {
    pub fn new(max_message_size: u32) -> Self {
        Loader {
            max_message_size: max_message_size.min(PROTOCOL_MESSAGE_LENGTH_CEILING),
            accumulator: Vec::new(),
            spare: 0,
            queue: VecDeque::new(),
            corrupted: None,
        }
    }

    pub fn is_corrupted(&self) -> bool {
        self.corrupted.is_some()
    }

    /// The reason the loader went corrupted, if it has.
    pub fn corruption_reason(&self) -> Option<VErr> {
        self.corrupted
    }

    pub fn pop_message(&mut self) -> Option<Message> {
        self.queue.pop_front()
    }

    /// Hand the transport a spare region of the loader's own buffer to
    /// read into -- zero-copy ingestion, no intermediate `Vec` the
    /// caller has to allocate and then hand over.
    pub fn get_buffer(&mut self) -> Result<&mut [u8], OomError> {
        if self.spare == 0 {
            let filled = self.accumulator.len();
            self.accumulator.try_reserve(CHUNK_SIZE).map_err(|_| OomError)?;
            self.accumulator.resize(filled + CHUNK_SIZE, 0);
            self.spare = CHUNK_SIZE;
        }
        let filled = self.accumulator.len() - self.spare;
        Ok(&mut self.accumulator[filled..])
    }

    /// Tell the loader how many bytes of the region from the last
    /// [`get_buffer`](Loader::get_buffer) call the transport actually
    /// wrote, then run [`queue_messages`](Loader::queue_messages).
    pub fn return_buffer(&mut self, n_bytes_written: usize) -> Result<(), OomError> {
        debug_assert!(n_bytes_written <= self.spare);
        let filled = self.accumulator.len() - self.spare;
        self.accumulator.truncate(filled + n_bytes_written);
        self.spare = 0;
        self.queue_messages()
    }

    /// Pull as many complete messages out of the accumulator as are
    /// currently present. Safe to call repeatedly; a no-op once
    /// corrupted or once the accumulator holds only a partial message.
    pub fn queue_messages(&mut self) -> Result<(), OomError> {
        if self.corrupted.is_some() {
            return Ok(());
        }
        loop {
            let prologue = header_have_message_untrusted(self.max_message_size, &self.accumulator);
            let (byteorder, message_type, flags, serial, header_len, body_len) = match prologue {
                Prologue::Insufficient => return Ok(()),
                Prologue::Invalid(e) => {
                    self.corrupted = Some(e);
                    return Ok(());
                }
                Prologue::Ready { byteorder, message_type, flags, serial, header_len, body_len } => {
                    (byteorder, message_type, flags, serial, header_len, body_len)
                }
            };
            let total = header_len + body_len as usize;
            if self.accumulator.len() < total {
                return Ok(());
            }
            let header_bytes = &self.accumulator[..header_len];
            let body_bytes = &self.accumulator[header_len..total];
            match parse_message(byteorder, message_type, flags, serial, header_bytes, body_bytes, total as u32) {
                Ok(msg) => {
                    self.queue.push_back(msg);
                    self.accumulator.drain(..total);
                }
                Err(LoaderFail::Oom) => return Err(OomError),
                Err(LoaderFail::Invalid(e)) => {
                    self.corrupted = Some(e);
                    return Ok(());
                }
            }
        }
    }
}

impl Default for Loader {
    fn default() -> Self {
        Loader::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

enum Prologue {
    /// Fewer than the 16-byte minimum prologue; wait for more bytes.
    Insufficient,
    Invalid(VErr),
    Ready {
        byteorder: ByteOrder,
        message_type: MessageType,
        flags: u8,
        serial: u32,
        header_len: usize,
        body_len: u32,
    },
}

/// Sanity-check the fixed 12-byte prologue plus the 4-byte header
/// fields array length that follows it -- the 16 bytes every message
/// has regardless of how large its fields array turns out to be.
fn header_have_message_untrusted(max_size: u32, buf: &[u8]) -> Prologue {
    if buf.len() < 16 {
        return Prologue::Insufficient;
    }
    let byteorder = match ByteOrder::from_wire_byte(buf[0]) {
        Some(b) => b,
        None => return Prologue::Invalid(VErr::BadByteOrder),
    };
    if buf[1] == 0 {
        return Prologue::Invalid(VErr::BadMessageType);
    }
    let message_type = MessageType::from_wire_byte(buf[1]);
    let flags = buf[2];
    if buf[3] != message::PROTOCOL_VERSION {
        return Prologue::Invalid(VErr::BadProtocolVersion);
    }
    let body_len = match crate::basic::unpack_u32(&buf[4..8], byteorder) {
        Ok(v) => v,
        Err(e) => return Prologue::Invalid(e),
    };
    let serial = match crate::basic::unpack_u32(&buf[8..12], byteorder) {
        Ok(v) => v,
        Err(e) => return Prologue::Invalid(e),
    };
    if serial == 0 {
        return Prologue::Invalid(VErr::BadSerial);
    }
    let fields_len = match crate::basic::unpack_u32(&buf[12..16], byteorder) {
        Ok(v) => v,
        Err(e) => return Prologue::Invalid(e),
    };
    if fields_len > signature::MAX_ARRAY_LENGTH_BYTES {
        return Prologue::Invalid(VErr::InsaneFieldsArrayLength);
    }
    if body_len > signature::MAX_ARRAY_LENGTH_BYTES {
        return Prologue::Invalid(VErr::InsaneBodyLength);
    }
    let header_len = align_up(16 + fields_len as usize, 8);
    let total = match header_len.checked_add(body_len as usize) {
        Some(t) => t,
        None => return Prologue::Invalid(VErr::MessageTooLong),
    };
    let cap = max_size.min(PROTOCOL_MESSAGE_LENGTH_CEILING) as usize;
    if total > cap {
        return Prologue::Invalid(VErr::MessageTooLong);
    }
    Prologue::Ready {
        byteorder,
        message_type,
        flags,
        serial,
        header_len,
        body_len,
    }
}

enum LoaderFail {
    Oom,
    Invalid(VErr),
}

impl From<OomError> for LoaderFail {
    fn from(_: OomError) -> Self {
        LoaderFail::Oom
    }
}

impl From<VErr> for LoaderFail {
    fn from(e: VErr) -> Self {
        LoaderFail::Invalid(e)
    }
}

fn uerr_to_verr(e: crate::error::UnmarshalError) -> VErr {
    match e {
        crate::error::UnmarshalError::Validation(v) => v,
        _ => VErr::UnknownTypecode,
    }
}

#[derive(Default)]
struct ParsedFields {
    path: Option<String>,
    interface: Option<String>,
    member: Option<String>,
    error_name: Option<String>,
    reply_serial: Option<u32>,
    destination: Option<String>,
    sender: Option<String>,
    signature: Option<String>,
}

/// Build a locked [`Message`] out of one already-framed `(header,
/// body)` pair. `header_bytes` is exactly `header_len` bytes (prologue
/// plus header-fields array plus any trailing alignment pad);
/// `body_bytes` is exactly `body_len` bytes.
fn parse_message(
    byteorder: ByteOrder,
    message_type: MessageType,
    flags: u8,
    serial: u32,
    header_bytes: &[u8],
    body_bytes: &[u8],
    total_len: u32,
) -> Result<Message, LoaderFail> {
    let mut trailer = 0usize;
    body_validate::validate_body(
        byteorder,
        std::str::from_utf8(HEADER_SHAPE).expect("ascii"),
        header_bytes,
        Some(&mut trailer),
    )?;
    let pad_start = header_bytes.len() - trailer;
    if header_bytes[pad_start..].iter().any(|&b| b != 0) {
        return Err(LoaderFail::Invalid(VErr::AlignmentPaddingNotNul));
    }

    let parsed = extract_header_fields(byteorder, header_bytes)?;

    let sig_str = parsed.signature.as_deref().unwrap_or("");
    signature::validate(sig_str).map_err(LoaderFail::from)?;
    if !body_bytes.is_empty() && parsed.signature.is_none() {
        return Err(LoaderFail::Invalid(VErr::BadSignature));
    }
    body_validate::validate_body(byteorder, sig_str, body_bytes, None)?;

    let mut body = crate::buffer::ByteBuffer::new();
    body.append(body_bytes)?;

    let msg = Message::from_validated_parts(
        byteorder,
        message_type,
        flags,
        serial,
        parsed.path,
        parsed.interface,
        parsed.member,
        parsed.error_name,
        parsed.reply_serial,
        parsed.destination,
        parsed.sender,
        sig_str.as_bytes().to_vec(),
        body,
        total_len,
    );
    msg.required_fields_ok()?;
    Ok(msg)
}

/// Walk the `(yv)` array inside an already byte-validated header,
/// extracting and semantically checking each known field. Unknown
/// field codes are silently ignored rather than treated as an error.
fn extract_header_fields(byteorder: ByteOrder, header_bytes: &[u8]) -> Result<ParsedFields, LoaderFail> {
    let mut cur = Reader::init(byteorder, HEADER_SHAPE, 0, header_bytes, 0);
    for _ in 0..6 {
        cur.next();
    }
    let mut arr = cur;
    cur.recurse(&mut arr).map_err(|e| LoaderFail::Invalid(uerr_to_verr(e)))?;

    let mut seen = [false; 9];
    let mut out = ParsedFields::default();

    while arr.current_type() != signature::INVALID {
        let mut st = arr;
        arr.recurse(&mut st).map_err(|e| LoaderFail::Invalid(uerr_to_verr(e)))?;
        let code = match st.read_basic().map_err(|e| LoaderFail::Invalid(uerr_to_verr(e)))? {
            Value::Byte(b) => b,
            _ => unreachable!("(yv) first field is always a byte"),
        };
        st.next();
        let mut var = st;
        st.recurse(&mut var).map_err(|e| LoaderFail::Invalid(uerr_to_verr(e)))?;

        if (1..=8).contains(&code) {
            if seen[code as usize] {
                return Err(LoaderFail::Invalid(VErr::HeaderFieldAppearsTwice));
            }
            seen[code as usize] = true;
        }
        assign_field(code, &var, &mut out).map_err(LoaderFail::Invalid)?;

        if !arr.next() {
            break;
        }
    }
    Ok(out)
}

fn assign_field(code: u8, var: &Reader, out: &mut ParsedFields) -> Result<(), VErr> {
    match code {
        message::FIELD_PATH => {
            expect_type(var, signature::OBJECT_PATH)?;
            let Value::Path(p) = var.read_basic().map_err(uerr_to_verr)? else {
                unreachable!()
            };
            if p == DBUS_PATH_LOCAL {
                return Err(VErr::UsesLocalPath);
            }
            out.path = Some(p.to_string());
        }
        message::FIELD_INTERFACE => {
            expect_type(var, signature::STRING)?;
            let Value::Str(s) = var.read_basic().map_err(uerr_to_verr)? else {
                unreachable!()
            };
            if s == DBUS_INTERFACE_LOCAL {
                return Err(VErr::UsesLocalInterface);
            }
            validation::validate_interface(s)?;
            out.interface = Some(s.to_string());
        }
        message::FIELD_MEMBER => {
            expect_type(var, signature::STRING)?;
            let Value::Str(s) = var.read_basic().map_err(uerr_to_verr)? else {
                unreachable!()
            };
            validation::validate_member(s)?;
            out.member = Some(s.to_string());
        }
        message::FIELD_ERROR_NAME => {
            expect_type(var, signature::STRING)?;
            let Value::Str(s) = var.read_basic().map_err(uerr_to_verr)? else {
                unreachable!()
            };
            validation::validate_error_name(s)?;
            out.error_name = Some(s.to_string());
        }
        message::FIELD_REPLY_SERIAL => {
            expect_type(var, signature::UINT32)?;
            let Value::Uint32(v) = var.read_basic().map_err(uerr_to_verr)? else {
                unreachable!()
            };
            out.reply_serial = Some(v);
        }
        message::FIELD_DESTINATION => {
            expect_type(var, signature::STRING)?;
            let Value::Str(s) = var.read_basic().map_err(uerr_to_verr)? else {
                unreachable!()
            };
            validation::validate_destination(s)?;
            out.destination = Some(s.to_string());
        }
        message::FIELD_SENDER => {
            expect_type(var, signature::STRING)?;
            let Value::Str(s) = var.read_basic().map_err(uerr_to_verr)? else {
                unreachable!()
            };
            validation::validate_sender(s)?;
            out.sender = Some(s.to_string());
        }
        message::FIELD_SIGNATURE => {
            expect_type(var, signature::SIGNATURE)?;
            let Value::Signature(s) = var.read_basic().map_err(uerr_to_verr)? else {
                unreachable!()
            };
            out.signature = Some(s.to_string());
        }
        _ => {}
    }
    Ok(())
}

fn expect_type(var: &Reader, expected: u8) -> Result<(), VErr> {
    if var.current_type() != expected {
        return Err(VErr::HeaderFieldHasWrongType);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ByteBuffer;
    use crate::message::MessageType;
    use crate::reader::Value as RValue;
    use crate::writer::Writer;

    /// Hand-assemble a message with an empty body and caller-supplied
    /// header fields, bypassing `Message`'s own validation -- used to
    /// drive the loader with header fields `Message`'s setters would
    /// never let through (duplicates, reserved names).
    fn marshal_raw(byteorder: ByteOrder, msg_type_byte: u8, serial: u32, fields: impl FnOnce(&mut Writer)) -> Vec<u8> {
        let mut header = ByteBuffer::new();
        header.append(&[byteorder.wire_byte()]).unwrap();
        header.append(&[msg_type_byte]).unwrap();
        header.append(&[0]).unwrap();
        header.append(&[message::PROTOCOL_VERSION]).unwrap();
        crate::basic::pack_u32(&mut header, byteorder, 0).unwrap();
        crate::basic::pack_u32(&mut header, byteorder, serial).unwrap();

        let mut field_sig = Vec::new();
        {
            let mut w = Writer::new(byteorder, &mut field_sig, &mut header);
            w.open_array("(yv)").unwrap();
            fields(&mut w);
            w.close().unwrap();
        }
        header.pad_to_align(8).unwrap();
        header.into_vec()
    }

    fn write_field(w: &mut Writer, code: u8, contained_sig: &str, value: RValue) {
        w.open_struct().unwrap();
        w.write_basic(RValue::Byte(code)).unwrap();
        w.open_variant(contained_sig).unwrap();
        w.write_basic(value).unwrap();
        w.close().unwrap();
        w.close().unwrap();
    }

    fn sample_call() -> Message {
        let mut m = Message::new_method_call(ByteOrder::LittleEndian, "/foo/bar", "Bar").unwrap();
        m.set_interface(Some("org.Foo")).unwrap();
        m.set_destination(Some("org.example.Svc")).unwrap();
        m.append_args(|w| {
            w.write_basic(RValue::Int32(-0x1234_5678))?;
            w.write_basic(RValue::Str("Test string"))?;
            Ok(())
        })
        .unwrap();
        m.assign_serial(1).unwrap();
        m.lock().unwrap();
        m
    }

    #[test]
    fn loads_one_message_fed_byte_at_a_time() {
        let bytes = sample_call().marshal().unwrap();
        let mut loader = Loader::default();
        for &b in &bytes {
            let buf = loader.get_buffer().unwrap();
            buf[0] = b;
            loader.return_buffer(1).unwrap();
        }
        assert!(!loader.is_corrupted());
        let msg = loader.pop_message().expect("one message queued");
        assert!(loader.pop_message().is_none());
        assert_eq!(msg.path(), Some("/foo/bar"));
        assert_eq!(msg.interface(), Some("org.Foo"));
        assert_eq!(msg.destination(), Some("org.example.Svc"));
        let mut args = msg.args();
        assert_eq!(args.read_basic().unwrap(), RValue::Int32(-0x1234_5678));
        args.next();
        assert_eq!(args.read_basic().unwrap(), RValue::Str("Test string"));
    }

    #[test]
    fn chunking_is_invariant() {
        let bytes = sample_call().marshal().unwrap();

        let mut whole = Loader::default();
        let buf = whole.get_buffer().unwrap();
        buf[..bytes.len()].copy_from_slice(&bytes);
        whole.return_buffer(bytes.len()).unwrap();
        let whole_msg = whole.pop_message().unwrap();

        let mut split = Loader::default();
        let (a, b) = bytes.split_at(bytes.len() / 2);
        for chunk in [a, b] {
            let buf = split.get_buffer().unwrap();
            buf[..chunk.len()].copy_from_slice(chunk);
            split.return_buffer(chunk.len()).unwrap();
        }
        let split_msg = split.pop_message().unwrap();

        assert_eq!(whole_msg.serial(), split_msg.serial());
        assert_eq!(whole_msg.path(), split_msg.path());
        assert_eq!(whole_msg.body().as_slice(), split_msg.body().as_slice());
    }

    #[test]
    fn bad_body_length_corrupts_loader() {
        let mut bytes = sample_call().marshal().unwrap();
        let declared = crate::basic::unpack_u32(&bytes[4..8], ByteOrder::LittleEndian).unwrap();
        let fixed = (declared + 7).to_le_bytes();
        bytes[4..8].copy_from_slice(&fixed);
        bytes.extend_from_slice(&[0u8; 7]);

        let mut loader = Loader::default();
        let buf = loader.get_buffer().unwrap();
        buf[..bytes.len()].copy_from_slice(&bytes);
        loader.return_buffer(bytes.len()).unwrap();

        assert!(loader.is_corrupted());
        assert!(loader.pop_message().is_none());
    }

    #[test]
    fn corruption_is_sticky() {
        let mut loader = Loader::default();
        let buf = loader.get_buffer().unwrap();
        buf[0] = b'x'; // invalid byte-order byte
        loader.return_buffer(1).unwrap();
        assert!(loader.is_corrupted());

        let bytes = sample_call().marshal().unwrap();
        let buf = loader.get_buffer().unwrap();
        buf[..bytes.len()].copy_from_slice(&bytes);
        loader.return_buffer(bytes.len()).unwrap();
        assert!(loader.pop_message().is_none());
    }

    #[test]
    fn duplicate_header_field_is_rejected() {
        let bytes = marshal_raw(ByteOrder::LittleEndian, 2, 1, |w| {
            write_field(w, message::FIELD_REPLY_SERIAL, "u", RValue::Uint32(9));
            write_field(w, message::FIELD_REPLY_SERIAL, "u", RValue::Uint32(9));
        });
        let mut loader = Loader::default();
        let buf = loader.get_buffer().unwrap();
        buf[..bytes.len()].copy_from_slice(&bytes);
        loader.return_buffer(bytes.len()).unwrap();
        assert_eq!(loader.corruption_reason(), Some(VErr::HeaderFieldAppearsTwice));
    }

    #[test]
    fn wrong_type_header_field_is_rejected() {
        let bytes = marshal_raw(ByteOrder::LittleEndian, 2, 1, |w| {
            write_field(w, message::FIELD_REPLY_SERIAL, "s", RValue::Str("not a serial"));
        });
        let mut loader = Loader::default();
        let buf = loader.get_buffer().unwrap();
        buf[..bytes.len()].copy_from_slice(&bytes);
        loader.return_buffer(bytes.len()).unwrap();
        assert_eq!(loader.corruption_reason(), Some(VErr::HeaderFieldHasWrongType));
    }

    #[test]
    fn reserved_local_path_is_rejected() {
        let bytes = marshal_raw(ByteOrder::LittleEndian, MessageType::Signal.wire_byte(), 1, |w| {
            write_field(w, message::FIELD_PATH, "o", RValue::Path("/org/freedesktop/DBus/Local"));
            write_field(w, message::FIELD_INTERFACE, "s", RValue::Str("org.Foo"));
            write_field(w, message::FIELD_MEMBER, "s", RValue::Str("Bar"));
        });
        let mut loader = Loader::default();
        let buf = loader.get_buffer().unwrap();
        buf[..bytes.len()].copy_from_slice(&bytes);
        loader.return_buffer(bytes.len()).unwrap();
        assert_eq!(loader.corruption_reason(), Some(VErr::UsesLocalPath));
    }

    #[test]
    fn unknown_header_field_code_is_ignored() {
        let bytes = marshal_raw(ByteOrder::LittleEndian, MessageType::Signal.wire_byte(), 1, |w| {
            write_field(w, message::FIELD_PATH, "o", RValue::Path("/foo"));
            write_field(w, message::FIELD_INTERFACE, "s", RValue::Str("org.Foo"));
            write_field(w, message::FIELD_MEMBER, "s", RValue::Str("Bar"));
            write_field(w, 200, "u", RValue::Uint32(1));
        });
        let mut loader = Loader::default();
        let buf = loader.get_buffer().unwrap();
        buf[..bytes.len()].copy_from_slice(&bytes);
        loader.return_buffer(bytes.len()).unwrap();
        assert!(!loader.is_corrupted());
        let msg = loader.pop_message().expect("message despite unknown field");
        assert_eq!(msg.path(), Some("/foo"));
    }
}
