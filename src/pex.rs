//! Peer exchange (ut_pex, [BEP-11]).
//!
//! Connected peers gossip differential peer-list updates: compact 6-byte
//! records (4-byte IPv4 address + 2-byte port, network byte order) under
//! `added` and `dropped`, with a per-added-peer flag byte under `added.f`.
//! Address and port use the same byte order on every path — encode and
//! decode, added and dropped alike.
//!
//! The capability is stateless per message: each inbound update is decoded
//! and surfaced as one event per record, nothing is retained.
//!
//! [BEP-11]: http://bittorrent.org/beps/bep_0011.html

use bytes::{BufMut, Bytes, BytesMut};
use std::any::Any;
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing::debug;

use crate::bencode::{decode, encode, Value};
use crate::constants::{COMPACT_PEER_LEN, UT_PEX};
use crate::events::ExtensionEvent;
use crate::extension::{
    ConnectionExtensions, Extension, ExtensionContext, ExtensionError, ExtensionHandshake,
};
use crate::wire::PeerLink;

/// Per-peer flag byte accompanying added records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PexFlags {
    /// Peer prefers protocol encryption.
    pub encryption: bool,
    /// Peer is a seed.
    pub seed: bool,
    /// Peer supports uTP.
    pub utp: bool,
    /// Peer supports holepunching.
    pub holepunch: bool,
    /// Peer is known to be reachable.
    pub connectable: bool,
}

impl PexFlags {
    pub fn from_byte(b: u8) -> Self {
        Self {
            encryption: (b & 0x01) != 0,
            seed: (b & 0x02) != 0,
            utp: (b & 0x04) != 0,
            holepunch: (b & 0x08) != 0,
            connectable: (b & 0x10) != 0,
        }
    }

    pub fn to_byte(self) -> u8 {
        let mut b = 0u8;
        if self.encryption {
            b |= 0x01;
        }
        if self.seed {
            b |= 0x02;
        }
        if self.utp {
            b |= 0x04;
        }
        if self.holepunch {
            b |= 0x08;
        }
        if self.connectable {
            b |= 0x10;
        }
        b
    }
}

/// One peer advertised in an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PexPeer {
    pub addr: SocketAddrV4,
    pub flags: PexFlags,
}

impl PexPeer {
    pub fn new(addr: SocketAddrV4) -> Self {
        Self {
            addr,
            flags: PexFlags::default(),
        }
    }

    pub fn with_flags(addr: SocketAddrV4, flags: PexFlags) -> Self {
        Self { addr, flags }
    }
}

/// A decoded or to-be-sent peer exchange update.
#[derive(Debug, Clone, Default)]
pub struct PexMessage {
    pub added: Vec<PexPeer>,
    pub dropped: Vec<SocketAddrV4>,
}

impl PexMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.dropped.is_empty()
    }

    /// Encodes the update dictionary: `added` / `added.f` when there are
    /// additions, `dropped` when there are drops.
    pub fn encode(&self) -> Result<Bytes, ExtensionError> {
        let mut dict = BTreeMap::new();

        if !self.added.is_empty() {
            let mut compact = BytesMut::with_capacity(self.added.len() * COMPACT_PEER_LEN);
            let mut flags = BytesMut::with_capacity(self.added.len());
            for peer in &self.added {
                compact.put_slice(&peer.addr.ip().octets());
                compact.put_u16(peer.addr.port());
                flags.put_u8(peer.flags.to_byte());
            }
            dict.insert(Bytes::from_static(b"added"), Value::Bytes(compact.freeze()));
            dict.insert(Bytes::from_static(b"added.f"), Value::Bytes(flags.freeze()));
        }

        if !self.dropped.is_empty() {
            let mut compact = BytesMut::with_capacity(self.dropped.len() * COMPACT_PEER_LEN);
            for addr in &self.dropped {
                compact.put_slice(&addr.ip().octets());
                compact.put_u16(addr.port());
            }
            dict.insert(
                Bytes::from_static(b"dropped"),
                Value::Bytes(compact.freeze()),
            );
        }

        Ok(Bytes::from(encode(&Value::Dict(dict))?))
    }

    /// Decodes an update dictionary. A message with none of the recognized
    /// keys decodes as empty.
    pub fn decode(payload: &[u8]) -> Result<Self, ExtensionError> {
        let value = decode(payload)?;
        let dict = value
            .as_dict()
            .ok_or_else(|| ExtensionError::InvalidMessage("pex payload is not a dict".into()))?;

        let mut message = Self::new();

        if let Some(compact) = dict.get(b"added".as_slice()).and_then(|v| v.as_bytes()) {
            let flags = dict
                .get(b"added.f".as_slice())
                .and_then(|v| v.as_bytes())
                .map(|b| b.as_ref())
                .unwrap_or(&[]);
            for (i, addr) in decode_compact(compact).into_iter().enumerate() {
                let peer_flags = flags
                    .get(i)
                    .map(|&b| PexFlags::from_byte(b))
                    .unwrap_or_default();
                message.added.push(PexPeer::with_flags(addr, peer_flags));
            }
        }

        if let Some(compact) = dict.get(b"dropped".as_slice()).and_then(|v| v.as_bytes()) {
            message.dropped = decode_compact(compact);
        }

        Ok(message)
    }
}

fn decode_compact(data: &[u8]) -> Vec<SocketAddrV4> {
    data.chunks_exact(COMPACT_PEER_LEN)
        .map(|rec| {
            let ip = Ipv4Addr::new(rec[0], rec[1], rec[2], rec[3]);
            let port = u16::from_be_bytes([rec[4], rec[5]]);
            SocketAddrV4::new(ip, port)
        })
        .collect()
}

/// Per-connection ut_pex handler. Stateless: every update is surfaced as
/// events and forgotten.
#[derive(Default)]
pub struct PeerExchange;

impl PeerExchange {
    pub fn new() -> Self {
        Self
    }

    /// Sends a differential update through the dispatcher. An update with
    /// neither additions nor drops is not sent at all.
    pub fn send_update(
        connection: &ConnectionExtensions,
        link: &mut dyn PeerLink,
        message: &PexMessage,
    ) -> Result<(), ExtensionError> {
        if message.is_empty() {
            return Ok(());
        }
        connection.send(link, UT_PEX, &message.encode()?)
    }
}

impl Extension for PeerExchange {
    fn name(&self) -> &'static str {
        UT_PEX
    }

    fn on_handshake(
        &mut self,
        _ctx: &mut ExtensionContext<'_>,
        _handshake: &ExtensionHandshake,
    ) -> Result<(), ExtensionError> {
        Ok(())
    }

    fn on_message(
        &mut self,
        ctx: &mut ExtensionContext<'_>,
        payload: Bytes,
    ) -> Result<(), ExtensionError> {
        let message = PexMessage::decode(&payload)?;
        let addr = ctx.addr();

        if message.is_empty() {
            debug!("pex update from {} carried no peers", addr);
            return Ok(());
        }

        for peer in message.added {
            ctx.emit(ExtensionEvent::PeerAdded {
                addr,
                peer: peer.addr,
                flags: peer.flags,
            });
        }
        for dropped in message.dropped {
            ctx.emit(ExtensionEvent::PeerDropped {
                addr,
                peer: dropped,
            });
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_round_trip() {
        let flags = PexFlags {
            encryption: true,
            utp: true,
            connectable: true,
            ..Default::default()
        };
        assert_eq!(PexFlags::from_byte(flags.to_byte()), flags);
    }

    #[test]
    fn update_round_trip() {
        let mut msg = PexMessage::new();
        msg.added.push(PexPeer::with_flags(
            SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 1), 6881),
            PexFlags {
                encryption: true,
                ..Default::default()
            },
        ));
        msg.added.push(PexPeer::with_flags(
            SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 51413),
            PexFlags {
                seed: true,
                ..Default::default()
            },
        ));
        msg.dropped
            .push(SocketAddrV4::new(Ipv4Addr::new(172, 16, 0, 9), 65000));

        let decoded = PexMessage::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded.added.len(), 2);
        assert_eq!(decoded.added[0].addr, msg.added[0].addr);
        assert!(decoded.added[0].flags.encryption);
        assert_eq!(decoded.added[1].addr, msg.added[1].addr);
        assert!(decoded.added[1].flags.seed);
        assert_eq!(decoded.dropped, msg.dropped);
    }

    #[test]
    fn ports_are_network_byte_order_on_both_paths() {
        let mut msg = PexMessage::new();
        msg.added.push(PexPeer::new(SocketAddrV4::new(
            Ipv4Addr::new(1, 2, 3, 4),
            0x1234,
        )));
        msg.dropped
            .push(SocketAddrV4::new(Ipv4Addr::new(5, 6, 7, 8), 0x5678));

        let encoded = msg.encode().unwrap();
        let dict = decode(&encoded).unwrap();

        let added = dict.get(b"added").and_then(|v| v.as_bytes()).unwrap();
        assert_eq!(&added[..], &[1, 2, 3, 4, 0x12, 0x34]);

        let dropped = dict.get(b"dropped").and_then(|v| v.as_bytes()).unwrap();
        assert_eq!(&dropped[..], &[5, 6, 7, 8, 0x56, 0x78]);
    }

    #[test]
    fn unrecognized_dictionary_is_empty() {
        let decoded = PexMessage::decode(b"d5:other3:abce").unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn empty_update_encodes_empty_dict() {
        let msg = PexMessage::new();
        assert!(msg.is_empty());
        assert_eq!(&msg.encode().unwrap()[..], b"de");
    }

    #[test]
    fn truncated_compact_records_are_ignored() {
        // 6 full bytes + 3 stray bytes: one record, remainder dropped
        let mut dict = BTreeMap::new();
        dict.insert(
            Bytes::from_static(b"dropped"),
            Value::Bytes(Bytes::from_static(&[9, 9, 9, 9, 0x1a, 0x0a, 1, 2, 3])),
        );
        let payload = encode(&Value::Dict(dict)).unwrap();

        let decoded = PexMessage::decode(&payload).unwrap();
        assert_eq!(decoded.dropped.len(), 1);
        assert_eq!(
            decoded.dropped[0],
            SocketAddrV4::new(Ipv4Addr::new(9, 9, 9, 9), 6666)
        );
    }
}
