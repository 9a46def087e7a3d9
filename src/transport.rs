//! The seam between this crate and whoever owns the actual stream.
//!
//! rustbus's `client_conn::Conn` reads directly off a `UnixStream`
//! via raw `nix::sys::socket` calls and writes marshalled bytes back
//! the same way (`src/client_conn.rs`, `read_once`/`send_message`).
//! That coupling is exactly what this crate drops: sockets, credential
//! passing and SASL live outside the wire format. What's left after
//! stripping the socket specifics is the shape the rest of this crate
//! actually calls through -- a blocking read into a caller-owned
//! buffer, and a blocking write of a caller-owned buffer -- expressed
//! here as a trait so a transport can be swapped in without touching
//! [`crate::loader::Loader`] or [`crate::message::Message`].
use std::io;

/// A blocking byte stream the core neither opens nor closes. Implement
/// this over a `UnixStream`, a TCP socket, an in-memory pipe for tests,
/// or anything else that can move bytes; this crate only ever calls
/// the two methods below.
pub trait Transport {
    /// Read at least one byte into `buf`, returning how many were
    /// read. Pairs with [`Loader::get_buffer`](crate::loader::Loader::get_buffer):
    /// callers typically read directly into the loader's own spare
    /// region and then call
    /// [`Loader::return_buffer`](crate::loader::Loader::return_buffer).
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all of `buf`, blocking until every byte is accepted.
    /// Callers pass the bytes from [`Message::marshal`](crate::message::Message::marshal).
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
}

impl<T: io::Read + io::Write> Transport for T {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(self, buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        io::Write::write_all(self, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_read_write_type_is_a_transport() {
        let mut stream = io::Cursor::new(Vec::new());
        Transport::write_all(&mut stream, b"hello").unwrap();
        assert_eq!(stream.get_ref().as_slice(), b"hello");

        stream.set_position(0);
        let mut buf = [0u8; 8];
        let n = Transport::read(&mut stream, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }
}
