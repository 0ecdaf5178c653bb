use bytes::Bytes;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::wire::PeerLink;

/// Transport stand-in that captures every queued frame.
pub struct MockLink {
    addr: SocketAddr,
    pub frames: Vec<Bytes>,
}

impl MockLink {
    pub fn new() -> Self {
        Self {
            addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881)),
            frames: Vec::new(),
        }
    }

    /// Extension message id of a captured extended frame.
    pub fn ext_id(&self, frame: usize) -> u8 {
        self.frames[frame][5]
    }

    /// Extension payload of a captured extended frame.
    pub fn ext_payload(&self, frame: usize) -> &[u8] {
        &self.frames[frame][6..]
    }
}

impl PeerLink for MockLink {
    fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn queue_frame(&mut self, frame: Bytes) {
        self.frames.push(frame);
    }
}
