//! Optional allocation-amortisation pool, off by default behind the
//! `message-cache` feature.
//!
//! Grounded on `dbus-message.c`'s `message_cache` static array: a
//! fixed-size slot array (`MAX_MESSAGE_CACHE_SIZE` there, [`CACHE_SIZE`]
//! here) guarded by one lock, with `dbus_message_cache_or_finalize`
//! pushing a message's backing allocation back into a free slot on
//! drop and `dbus_message_get` popping one out before allocating fresh.
//! [`get_from_cache`] and [`put_into_cache`] are the only functions
//! that ever lock [`POOL`] -- every other part of this crate is
//! unaffected by whether this feature is on.
//!
//! What's pooled here is the body [`ByteBuffer`]'s backing storage
//! rather than a whole [`Message`](crate::message::Message): a message's
//! string fields and signature are cheap compared to the body's `Vec`,
//! so recycling just that allocation captures most of the benefit the
//! source's pool was chasing without needing `Message` itself to carry
//! pool-return plumbing.
use std::sync::Mutex;

use crate::buffer::ByteBuffer;

const CACHE_SIZE: usize = 5;

static POOL: Mutex<Vec<ByteBuffer>> = Mutex::new(Vec::new());

/// Take a recycled, emptied buffer out of the pool if one is free.
/// Callers that get `None` just allocate a fresh [`ByteBuffer`] as if
/// this feature were off.
pub fn get_from_cache() -> Option<ByteBuffer> {
    POOL.lock().ok()?.pop()
}

/// Return a finished buffer's allocation to the pool for reuse. `buf`
/// is truncated to empty first; if the pool is already at
/// [`CACHE_SIZE`] the allocation is simply dropped instead.
pub fn put_into_cache(mut buf: ByteBuffer) {
    buf.truncate(0);
    if let Ok(mut pool) = POOL.lock() {
        if pool.len() < CACHE_SIZE {
            pool.push(buf);
        }
    }
}
