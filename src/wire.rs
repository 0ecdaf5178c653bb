//! Seam to the base peer-wire connection.
//!
//! The handshake, framing and socket I/O of the base protocol live outside
//! this crate. What the extension layer needs from a connection is small:
//! an identity for event reporting and a way to hand a fully-built frame to
//! the transport. Frames are always constructed completely before they are
//! queued, so no extension state is ever held across a network suspension.

use bytes::{BufMut, Bytes, BytesMut};
use std::net::SocketAddr;

use crate::constants::{DHT_PORT_MESSAGE_ID, EXTENDED_MESSAGE_ID};

/// Handle to one established peer-wire connection.
///
/// Implementations typically wrap an `mpsc` sender feeding the connection's
/// writer task. `queue_frame` must not block; if the transport is gone the
/// frame is abandoned, never retried.
pub trait PeerLink: Send {
    /// The remote peer's socket address, used to tag emitted events.
    fn addr(&self) -> SocketAddr;

    /// Hands a complete, length-prefixed frame to the transport.
    fn queue_frame(&mut self, frame: Bytes);
}

/// Builds an extended message frame: `[len][20][ext id][payload]`.
pub fn extended_frame(ext_id: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(6 + payload.len());
    buf.put_u32(2 + payload.len() as u32);
    buf.put_u8(EXTENDED_MESSAGE_ID);
    buf.put_u8(ext_id);
    buf.put_slice(payload);
    buf.freeze()
}

/// Builds a DHT port announcement frame: `[len][9][port]`.
pub fn port_frame(port: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(7);
    buf.put_u32(3);
    buf.put_u8(DHT_PORT_MESSAGE_ID);
    buf.put_u16(port);
    buf.freeze()
}
