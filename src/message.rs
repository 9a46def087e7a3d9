//! Component H: the message object. A header/body pair that moves
//! through three states -- mutable, locked, transmitted -- with
//! routing-field setters that validate names as they go and refuse to
//! touch a locked message.
//!
//! Grounded on rustbus's `message::Message` (`src/message.rs`,
//! plain `Option<String>` fields per routing concept) for the field
//! layout, and `message_builder::{MessageBuilder, CallBuilder,
//! SignalBuilder}` (`src/message_builder.rs`) for the typed
//! constructor-per-message-type shape, generalized into an explicit
//! mutable -> locked state machine (rustbus has no lock
//! concept; it builds a `Message` once and hands it to the connection
//! layer) and the size-counter hook from `original_source/dbus/
//! dbus-message.c` (`dbus_message_set_size_counter` /
//! `message_counter` bookkeeping around `dbus_message_unref`).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::basic;
use crate::buffer::ByteBuffer;
use crate::error::{Error, MarshalError, OomError, ValidationError as VErr};
use crate::reader::{Reader, Value};
use crate::validation;
use crate::writer::Writer;
use crate::ByteOrder;

pub const PROTOCOL_VERSION: u8 = 1;

pub const FIELD_PATH: u8 = 1;
pub const FIELD_INTERFACE: u8 = 2;
pub const FIELD_MEMBER: u8 = 3;
pub const FIELD_ERROR_NAME: u8 = 4;
pub const FIELD_REPLY_SERIAL: u8 = 5;
pub const FIELD_DESTINATION: u8 = 6;
pub const FIELD_SENDER: u8 = 7;
pub const FIELD_SIGNATURE: u8 = 8;

pub const FLAG_NO_REPLY_EXPECTED: u8 = 0x01;
pub const FLAG_AUTO_ACTIVATION: u8 = 0x02;

/// The four well-known message types. Any other wire value is
/// preserved verbatim and ignored rather than rejected.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageType {
    MethodCall,
    MethodReturn,
    Error,
    Signal,
    Other(u8),
}

impl MessageType {
    pub fn wire_byte(self) -> u8 {
        match self {
            MessageType::MethodCall => 1,
            MessageType::MethodReturn => 2,
            MessageType::Error => 3,
            MessageType::Signal => 4,
            MessageType::Other(b) => b,
        }
    }

    pub fn from_wire_byte(b: u8) -> MessageType {
        match b {
            1 => MessageType::MethodCall,
            2 => MessageType::MethodReturn,
            3 => MessageType::Error,
            4 => MessageType::Signal,
            other => MessageType::Other(other),
        }
    }
}

/// A `(header, body)` pair. Mutable until [`Message::lock`] is called;
/// incoming messages built by the loader (component I) are created
/// already locked.
#[derive(Debug)]
pub struct Message {
    byteorder: ByteOrder,
    message_type: MessageType,
    flags: u8,
    serial: u32,
    path: Option<String>,
    interface: Option<String>,
    member: Option<String>,
    error_name: Option<String>,
    reply_serial: Option<u32>,
    destination: Option<String>,
    sender: Option<String>,
    sig: Vec<u8>,
    body: ByteBuffer,
    locked: bool,
    cached_total_len: u32,
    #[allow(clippy::type_complexity)]
    counters: Vec<Arc<AtomicUsize>>,
    counted: bool,
}

impl Message {
    /// An empty mutable message of the given type with no routing
    /// fields and no body.
    pub fn new(byteorder: ByteOrder, message_type: MessageType) -> Self {
        #[cfg(feature = "message-cache")]
        let body = crate::cache::get_from_cache().unwrap_or_default();
        #[cfg(not(feature = "message-cache"))]
        let body = ByteBuffer::new();

        Message {
            byteorder,
            message_type,
            flags: 0,
            serial: 0,
            path: None,
            interface: None,
            member: None,
            error_name: None,
            reply_serial: None,
            destination: None,
            sender: None,
            sig: Vec::new(),
            body,
            locked: false,
            cached_total_len: 0,
            counters: Vec::new(),
            counted: false,
        }
    }

    pub fn new_method_call(byteorder: ByteOrder, path: &str, member: &str) -> Result<Self, Error> {
        let mut m = Message::new(byteorder, MessageType::MethodCall);
        m.set_path(Some(path))?;
        m.set_member(Some(member))?;
        Ok(m)
    }

    pub fn new_signal(byteorder: ByteOrder, path: &str, interface: &str, member: &str) -> Result<Self, Error> {
        let mut m = Message::new(byteorder, MessageType::Signal);
        m.set_path(Some(path))?;
        m.set_interface(Some(interface))?;
        m.set_member(Some(member))?;
        Ok(m)
    }

    pub fn new_method_return(byteorder: ByteOrder, reply_serial: u32) -> Self {
        let mut m = Message::new(byteorder, MessageType::MethodReturn);
        m.reply_serial = Some(reply_serial);
        m
    }

    pub fn new_error(byteorder: ByteOrder, error_name: &str, reply_serial: u32) -> Result<Self, Error> {
        let mut m = Message::new(byteorder, MessageType::Error);
        m.set_error_name(Some(error_name))?;
        m.reply_serial = Some(reply_serial);
        Ok(m)
    }

    /// Build an already-locked message straight from parts the loader
    /// (component I) has already pushed through the same validators
    /// the `set_*` methods use -- there is nothing left to re-check,
    /// only to assemble.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_validated_parts(
        byteorder: ByteOrder,
        message_type: MessageType,
        flags: u8,
        serial: u32,
        path: Option<String>,
        interface: Option<String>,
        member: Option<String>,
        error_name: Option<String>,
        reply_serial: Option<u32>,
        destination: Option<String>,
        sender: Option<String>,
        sig: Vec<u8>,
        body: ByteBuffer,
        total_len: u32,
    ) -> Message {
        Message {
            byteorder,
            message_type,
            flags,
            serial,
            path,
            interface,
            member,
            error_name,
            reply_serial,
            destination,
            sender,
            sig,
            body,
            locked: true,
            cached_total_len: total_len,
            counters: Vec::new(),
            counted: false,
        }
    }

    fn check_mutable(&self) -> Result<(), Error> {
        if self.locked {
            Err(Error::MessageLocked)
        } else {
            Ok(())
        }
    }

    pub fn byteorder(&self) -> ByteOrder {
        self.byteorder
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn no_reply_expected(&self) -> bool {
        self.flags & FLAG_NO_REPLY_EXPECTED != 0
    }

    pub fn set_no_reply_expected(&mut self, on: bool) -> Result<(), Error> {
        self.check_mutable()?;
        set_flag_bit(&mut self.flags, FLAG_NO_REPLY_EXPECTED, on);
        Ok(())
    }

    pub fn auto_activation(&self) -> bool {
        self.flags & FLAG_AUTO_ACTIVATION != 0
    }

    pub fn set_auto_activation(&mut self, on: bool) -> Result<(), Error> {
        self.check_mutable()?;
        set_flag_bit(&mut self.flags, FLAG_AUTO_ACTIVATION, on);
        Ok(())
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }
    pub fn member(&self) -> Option<&str> {
        self.member.as_deref()
    }
    pub fn error_name(&self) -> Option<&str> {
        self.error_name.as_deref()
    }
    pub fn reply_serial(&self) -> Option<u32> {
        self.reply_serial
    }
    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    /// The body's type signature. Empty when the body is empty -- the
    /// SIGNATURE header field itself is omitted in that case, per the
    /// invariant that non-empty bodies are the only ones that carry it.
    pub fn signature(&self) -> &str {
        std::str::from_utf8(&self.sig).expect("signature bytes are always ASCII type codes")
    }

    pub fn set_path(&mut self, path: Option<&str>) -> Result<(), Error> {
        self.check_mutable()?;
        match path {
            Some(p) => {
                validation::validate_path(p)?;
                self.path = Some(p.to_string());
            }
            None => self.path = None,
        }
        Ok(())
    }

    pub fn set_interface(&mut self, interface: Option<&str>) -> Result<(), Error> {
        self.check_mutable()?;
        match interface {
            Some(i) => {
                validation::validate_interface(i)?;
                self.interface = Some(i.to_string());
            }
            None => self.interface = None,
        }
        Ok(())
    }

    pub fn set_member(&mut self, member: Option<&str>) -> Result<(), Error> {
        self.check_mutable()?;
        match member {
            Some(m) => {
                validation::validate_member(m)?;
                self.member = Some(m.to_string());
            }
            None => self.member = None,
        }
        Ok(())
    }

    pub fn set_error_name(&mut self, error_name: Option<&str>) -> Result<(), Error> {
        self.check_mutable()?;
        match error_name {
            Some(e) => {
                validation::validate_error_name(e)?;
                self.error_name = Some(e.to_string());
            }
            None => self.error_name = None,
        }
        Ok(())
    }

    pub fn set_reply_serial(&mut self, reply_serial: Option<u32>) -> Result<(), Error> {
        self.check_mutable()?;
        self.reply_serial = reply_serial;
        Ok(())
    }

    pub fn set_destination(&mut self, destination: Option<&str>) -> Result<(), Error> {
        self.check_mutable()?;
        match destination {
            Some(d) => {
                validation::validate_destination(d)?;
                self.destination = Some(d.to_string());
            }
            None => self.destination = None,
        }
        Ok(())
    }

    pub fn set_sender(&mut self, sender: Option<&str>) -> Result<(), Error> {
        self.check_mutable()?;
        match sender {
            Some(s) => {
                validation::validate_sender(s)?;
                self.sender = Some(s.to_string());
            }
            None => self.sender = None,
        }
        Ok(())
    }

    /// Append one or more values to the body, extending the signature
    /// to match. `f` receives a [`Writer`] over the message's own
    /// signature and body buffers.
    pub fn append_args(&mut self, f: impl FnOnce(&mut Writer<'_>) -> Result<(), MarshalError>) -> Result<(), Error> {
        self.check_mutable()?;
        let mut w = Writer::new(self.byteorder, &mut self.sig, &mut self.body);
        f(&mut w)?;
        Ok(())
    }

    /// A fresh top-level reader over the current body, for pulling
    /// values back out with component E's cursor API.
    pub fn args(&self) -> Reader<'_> {
        Reader::init(self.byteorder, &self.sig, 0, self.body.as_slice(), 0)
    }

    pub fn body(&self) -> &ByteBuffer {
        &self.body
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Assign this message's serial. May be called exactly once, and
    /// only before [`lock`](Message::lock); serial 0 is reserved to
    /// mean "unset" and is never itself a legal assignment.
    pub fn assign_serial(&mut self, serial: u32) -> Result<(), Error> {
        self.check_mutable()?;
        if self.serial != 0 {
            return Err(Error::SerialAlreadyAssigned);
        }
        if serial == 0 {
            return Err(Error::Validation(VErr::BadSerial));
        }
        self.serial = serial;
        Ok(())
    }

    pub(crate) fn required_fields_ok(&self) -> Result<(), VErr> {
        match self.message_type {
            MessageType::MethodCall => {
                if self.path.is_none() {
                    return Err(VErr::MissingPath);
                }
                if self.member.is_none() {
                    return Err(VErr::MissingMember);
                }
            }
            MessageType::MethodReturn => {
                if self.reply_serial.is_none() {
                    return Err(VErr::MissingReplySerial);
                }
            }
            MessageType::Error => {
                if self.reply_serial.is_none() {
                    return Err(VErr::MissingReplySerial);
                }
                if self.error_name.is_none() {
                    return Err(VErr::MissingErrorName);
                }
            }
            MessageType::Signal => {
                if self.path.is_none() {
                    return Err(VErr::MissingPath);
                }
                if self.interface.is_none() {
                    return Err(VErr::MissingInterface);
                }
                if self.member.is_none() {
                    return Err(VErr::MissingMember);
                }
            }
            MessageType::Other(_) => {}
        }
        if !self.body.is_empty() && self.sig.is_empty() {
            return Err(VErr::BadSignature);
        }
        Ok(())
    }

    /// Transition mutable -> locked. Checks the serial was assigned
    /// and the message type's required routing fields are present,
    /// caches the total on-wire length, and registers that length with
    /// any attached size counters. Idempotent.
    pub fn lock(&mut self) -> Result<(), Error> {
        if self.locked {
            return Ok(());
        }
        if self.serial == 0 {
            return Err(Error::Validation(VErr::BadSerial));
        }
        self.required_fields_ok()?;
        let total_len = self.marshal()?.len();
        self.cached_total_len = total_len as u32;
        self.locked = true;
        if !self.counters.is_empty() {
            for c in &self.counters {
                c.fetch_add(total_len, Ordering::SeqCst);
            }
            self.counted = true;
        }
        Ok(())
    }

    /// Register an external byte-cost counter. If the message is
    /// already locked, the counter is credited immediately with the
    /// cached total length; otherwise it is credited at the next
    /// [`lock`](Message::lock).
    pub fn attach_size_counter(&mut self, counter: Arc<AtomicUsize>) {
        if self.locked {
            counter.fetch_add(self.cached_total_len as usize, Ordering::SeqCst);
            self.counted = true;
        }
        self.counters.push(counter);
    }

    fn write_header_fields(&self, w: &mut Writer<'_>) -> Result<(), MarshalError> {
        w.open_array("(yv)")?;
        if let Some(p) = &self.path {
            write_field(w, FIELD_PATH, "o", Value::Path(p))?;
        }
        if let Some(i) = &self.interface {
            write_field(w, FIELD_INTERFACE, "s", Value::Str(i))?;
        }
        if let Some(m) = &self.member {
            write_field(w, FIELD_MEMBER, "s", Value::Str(m))?;
        }
        if let Some(e) = &self.error_name {
            write_field(w, FIELD_ERROR_NAME, "s", Value::Str(e))?;
        }
        if let Some(rs) = self.reply_serial {
            write_field(w, FIELD_REPLY_SERIAL, "u", Value::Uint32(rs))?;
        }
        if let Some(d) = &self.destination {
            write_field(w, FIELD_DESTINATION, "s", Value::Str(d))?;
        }
        if let Some(s) = &self.sender {
            write_field(w, FIELD_SENDER, "s", Value::Str(s))?;
        }
        if !self.sig.is_empty() {
            write_field(w, FIELD_SIGNATURE, "g", Value::Signature(self.signature()))?;
        }
        w.close()
    }

    /// Marshal the complete message (header, 8-aligned, followed
    /// immediately by the body) into one contiguous byte sequence --
    /// what a transport actually writes to the wire.
    pub fn marshal(&self) -> Result<Vec<u8>, MarshalError> {
        let mut header = ByteBuffer::new();
        header.append(&[self.byteorder.wire_byte()]).map_err(MarshalError::Oom)?;
        header.append(&[self.message_type.wire_byte()]).map_err(MarshalError::Oom)?;
        header.append(&[self.flags]).map_err(MarshalError::Oom)?;
        header.append(&[PROTOCOL_VERSION]).map_err(MarshalError::Oom)?;
        basic::pack_u32(&mut header, self.byteorder, self.body.len() as u32).map_err(MarshalError::Oom)?;
        basic::pack_u32(&mut header, self.byteorder, self.serial).map_err(MarshalError::Oom)?;

        let mut field_sig = Vec::new();
        {
            let mut w = Writer::new(self.byteorder, &mut field_sig, &mut header);
            self.write_header_fields(&mut w)?;
        }
        header.pad_to_align(8).map_err(MarshalError::Oom)?;

        let mut out = header.into_vec();
        out.try_reserve(self.body.len()).map_err(|_| OomError)?;
        out.extend_from_slice(self.body.as_slice());
        Ok(out)
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        if self.counted {
            for c in &self.counters {
                c.fetch_sub(self.cached_total_len as usize, Ordering::SeqCst);
            }
        }
        #[cfg(feature = "message-cache")]
        crate::cache::put_into_cache(std::mem::take(&mut self.body));
    }
}

fn write_field(w: &mut Writer<'_>, code: u8, contained_sig: &str, value: Value<'_>) -> Result<(), MarshalError> {
    w.open_struct()?;
    w.write_basic(Value::Byte(code))?;
    w.open_variant(contained_sig)?;
    w.write_basic(value)?;
    w.close()?;
    w.close()
}

fn set_flag_bit(flags: &mut u8, bit: u8, on: bool) {
    if on {
        *flags |= bit;
    } else {
        *flags &= !bit;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_call_requires_path_and_member() {
        let mut m = Message::new(ByteOrder::LittleEndian, MessageType::MethodCall);
        m.assign_serial(1).unwrap();
        assert_eq!(m.lock(), Err(Error::Validation(VErr::MissingPath)));
    }

    #[test]
    fn full_method_call_locks_and_marshals() {
        let mut m = Message::new_method_call(ByteOrder::LittleEndian, "/foo/bar", "Bar").unwrap();
        m.set_interface(Some("org.Foo")).unwrap();
        m.set_destination(Some("org.example.Svc")).unwrap();
        m.append_args(|w| {
            w.write_basic(Value::Int32(-0x1234_5678))?;
            w.write_basic(Value::Str("Test string"))?;
            Ok(())
        })
        .unwrap();
        m.assign_serial(1).unwrap();
        m.lock().unwrap();
        assert!(m.is_locked());
        let bytes = m.marshal().unwrap();
        assert_eq!(bytes[0], b'l');
        let header_len = bytes.len() - m.body().len();
        assert_eq!(header_len % 8, 0); // header portion 8-aligned before body follows
    }

    #[test]
    fn locked_message_rejects_mutation() {
        let mut m = Message::new_method_return(ByteOrder::LittleEndian, 1);
        m.assign_serial(2).unwrap();
        m.lock().unwrap();
        assert_eq!(m.set_sender(Some("org.foo.Bar")), Err(Error::MessageLocked));
    }

    #[test]
    fn serial_assigned_exactly_once() {
        let mut m = Message::new_method_return(ByteOrder::LittleEndian, 1);
        m.assign_serial(5).unwrap();
        assert_eq!(m.assign_serial(6), Err(Error::SerialAlreadyAssigned));
    }

    #[test]
    fn lock_is_idempotent() {
        let mut m = Message::new_method_return(ByteOrder::LittleEndian, 1);
        m.assign_serial(5).unwrap();
        m.lock().unwrap();
        m.lock().unwrap();
        assert!(m.is_locked());
    }

    #[test]
    fn size_counter_tracks_locked_message() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut m = Message::new_method_return(ByteOrder::LittleEndian, 1);
        m.attach_size_counter(counter.clone());
        m.assign_serial(9).unwrap();
        m.lock().unwrap();
        assert!(counter.load(Ordering::SeqCst) > 0);
        drop(m);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
