//! Events emitted by the extension layer.
//!
//! All events are fire-and-forget notifications to the surrounding
//! application; the core never awaits a response. A closed receiver is
//! ignored — it means the application is shutting the connection down and
//! per-connection state is about to be dropped anyway.

use std::net::{SocketAddr, SocketAddrV4};

use tokio::sync::mpsc;

use crate::info_hash::InfoHash;
use crate::metadata::AssembledMetadata;
use crate::pex::PexFlags;

/// Sending half of the event stream, held by each connection's extension
/// state.
pub type EventSender = mpsc::UnboundedSender<ExtensionEvent>;

/// Receiving half, held by the application.
pub type EventReceiver = mpsc::UnboundedReceiver<ExtensionEvent>;

/// Creates the event channel for one or more connections.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// A domain event produced by one of the extension capabilities.
///
/// `addr` is always the remote endpoint of the connection the event
/// originated on.
#[derive(Debug, Clone)]
pub enum ExtensionEvent {
    /// A metadata assembly completed and no trust anchor was configured.
    /// The dictionary is untrusted until the caller verifies it.
    MetadataAssembled {
        addr: SocketAddr,
        metadata: AssembledMetadata,
    },

    /// A metadata assembly completed and must be checked against the
    /// expected info hash before use.
    MetadataVerificationRequired {
        addr: SocketAddr,
        metadata: AssembledMetadata,
        expected: InfoHash,
    },

    /// The remote announced a newly known peer via peer exchange.
    PeerAdded {
        addr: SocketAddr,
        peer: SocketAddrV4,
        flags: PexFlags,
    },

    /// The remote announced it lost contact with a peer.
    PeerDropped {
        addr: SocketAddr,
        peer: SocketAddrV4,
    },

    /// The remote announced its DHT UDP port.
    DhtPortAnnounced { addr: SocketAddr, port: u16 },
}
