//! # dbus-wire
//!
//! The wire-format core of a D-Bus implementation: the signature grammar,
//! the recursive marshal/unmarshal engine, message header/body assembly
//! and validation, and the streaming message loader.
//!
//! This crate deliberately stops at the wire. It does not open sockets,
//! does not speak SASL, and does not know about the bus daemon, name
//! ownership, or object dispatch trees -- those are layered on top by
//! whoever owns the transport. See [`transport::Transport`] for the seam.
//!
//! ## Quickstart
//! ```
//! use dbus_wire::message::{Message, MessageType};
//! use dbus_wire::reader::Value;
//! use dbus_wire::ByteOrder;
//!
//! let mut msg = Message::new(ByteOrder::LittleEndian, MessageType::MethodCall);
//! msg.set_path(Some("/io/killing/spark")).unwrap();
//! msg.set_member(Some("Ping")).unwrap();
//! msg.set_interface(Some("io.killing.spark")).unwrap();
//!
//! msg.append_args(|w| {
//!     w.write_basic(Value::Str("hello"))?;
//!     Ok(())
//! }).unwrap();
//!
//! msg.assign_serial(1).unwrap();
//! msg.lock().unwrap();
//! assert!(msg.is_locked());
//! ```

pub mod basic;
pub mod body_validate;
pub mod buffer;
pub mod error;
pub mod loader;
pub mod message;
pub mod reader;
pub mod signature;
pub mod transport;
pub mod validation;
pub mod writer;

#[cfg(feature = "message-cache")]
pub mod cache;


pub use error::{Error, MarshalError, OomError, UnmarshalError, ValidationError};

/// The supported byte orders. A message's first header byte commits the
/// whole message (header and body) to one of these; readers and writers
/// swap at the boundary rather than ever reinterpreting raw bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    /// The byte order native to this target. Marshalling in the native
    /// order never needs a swap; the other order always does.
    #[cfg(target_endian = "little")]
    pub const NATIVE: ByteOrder = ByteOrder::LittleEndian;
    #[cfg(target_endian = "big")]
    pub const NATIVE: ByteOrder = ByteOrder::BigEndian;

    pub fn wire_byte(self) -> u8 {
        match self {
            ByteOrder::LittleEndian => b'l',
            ByteOrder::BigEndian => b'B',
        }
    }

    pub fn from_wire_byte(b: u8) -> Option<ByteOrder> {
        match b {
            b'l' => Some(ByteOrder::LittleEndian),
            b'B' => Some(ByteOrder::BigEndian),
            _ => None,
        }
    }
}
