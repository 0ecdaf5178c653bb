//! btex - BitTorrent extension protocol stack
//!
//! This library implements the optional capabilities negotiated on top of an
//! established peer-wire connection, following the relevant BEPs
//! (BitTorrent Enhancement Proposals):
//!
//! - [`extension`] - BEP-10 extension negotiation and message dispatch
//! - [`metadata`] - BEP-9 metadata exchange for magnet links
//! - [`pex`] - BEP-11 peer exchange
//! - [`dht_port`] - BEP-5 DHT port announcement (base-protocol level)
//! - [`bencode`] - BEP-3 bencode encoding/decoding
//! - [`wire`] - seam to the base peer-wire transport
//! - [`events`] - domain events emitted to the application
//!
//! The base protocol itself (handshake, framing, sockets) lives outside
//! this crate; a connection plugs in through the [`wire::PeerLink`] trait
//! and feeds inbound frames to [`extension::ConnectionExtensions::route`]
//! and [`dht_port::DhtPortSignal::on_command`].
//!
//! # Example
//!
//! ```
//! use btex::constants::{UT_METADATA, UT_PEX};
//! use btex::events::event_channel;
//! use btex::extension::{ConnectionExtensions, ExtensionRegistry};
//! use btex::metadata::MetadataExchange;
//! use btex::pex::PeerExchange;
//!
//! // once, at startup
//! let registry = ExtensionRegistry::builder()
//!     .register(UT_METADATA, 3, || Box::new(MetadataExchange::new(None)))
//!     .unwrap()
//!     .register(UT_PEX, 1, || Box::new(PeerExchange::new()))
//!     .unwrap()
//!     .build();
//!
//! // per connection
//! let (events, _event_rx) = event_channel();
//! let connection = ConnectionExtensions::new(registry, events);
//! let handshake = connection.local_handshake(Some("btex/0.1"), None);
//! assert_eq!(handshake.capability_id(UT_METADATA), Some(3));
//! ```

pub mod bencode;
pub mod constants;
pub mod dht_port;
pub mod events;
pub mod extension;
pub mod info_hash;
pub mod metadata;
pub mod pex;
pub mod wire;

pub use bencode::{decode, encode, BencodeError, Value};
pub use dht_port::DhtPortSignal;
pub use events::{event_channel, EventReceiver, EventSender, ExtensionEvent};
pub use extension::{
    ConnectionExtensions, Extension, ExtensionContext, ExtensionError, ExtensionHandshake,
    ExtensionRegistry,
};
pub use info_hash::InfoHash;
pub use metadata::{AssembledMetadata, MetadataExchange, MetadataMessage};
pub use pex::{PeerExchange, PexFlags, PexMessage, PexPeer};
pub use wire::PeerLink;

#[cfg(test)]
mod test_util;
