//! DHT port signaling (the base-protocol `port` message, [BEP-5]).
//!
//! Unlike the negotiated capabilities, the port announcement uses a fixed
//! base-protocol command id and needs no handshake: a peer that set the DHT
//! bit in its reserved bytes sends `[len][9][port u16]` right after the
//! base handshake. This module sits beside the extension dispatcher, not on
//! top of it.
//!
//! [BEP-5]: http://bittorrent.org/beps/bep_0005.html

use tracing::warn;

use crate::constants::DHT_PORT_MESSAGE_ID;
use crate::events::{EventSender, ExtensionEvent};
use crate::wire::{port_frame, PeerLink};

/// Per-connection DHT announcement state.
///
/// Created at connection setup, dropped with the connection.
#[derive(Debug, Default)]
pub struct DhtPortSignal {
    remote_port: Option<u16>,
    remote_uses_dht: bool,
}

impl DhtPortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers a base-protocol command to this capability.
    ///
    /// Returns `false` untouched for any command id other than the DHT port
    /// id. Otherwise decodes the 2-byte big-endian port, records it, marks
    /// the remote DHT-capable and emits [`ExtensionEvent::DhtPortAnnounced`].
    /// A malformed payload is consumed without changing state.
    pub fn on_command(
        &mut self,
        link: &dyn PeerLink,
        events: &EventSender,
        command_id: u8,
        payload: &[u8],
    ) -> bool {
        if command_id != DHT_PORT_MESSAGE_ID {
            return false;
        }

        let Some(raw) = payload.get(..2) else {
            warn!("dropping truncated dht port message from {}", link.addr());
            return true;
        };
        let port = u16::from_be_bytes([raw[0], raw[1]]);

        self.remote_port = Some(port);
        self.remote_uses_dht = true;
        let _ = events.send(ExtensionEvent::DhtPortAnnounced {
            addr: link.addr(),
            port,
        });
        true
    }

    /// Announces our own DHT port to the remote.
    pub fn announce(&self, link: &mut dyn PeerLink, port: u16) {
        link.queue_frame(port_frame(port));
    }

    /// The port the remote last announced.
    pub fn remote_port(&self) -> Option<u16> {
        self.remote_port
    }

    /// Whether the remote has signaled DHT support.
    pub fn remote_uses_dht(&self) -> bool {
        self.remote_uses_dht
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_channel;
    use crate::test_util::MockLink;

    #[test]
    fn decodes_big_endian_port() {
        let (tx, mut rx) = event_channel();
        let link = MockLink::new();
        let mut signal = DhtPortSignal::new();

        assert!(signal.on_command(&link, &tx, DHT_PORT_MESSAGE_ID, &[0x1a, 0x0a]));
        assert_eq!(signal.remote_port(), Some(6666));
        assert!(signal.remote_uses_dht());

        match rx.try_recv().unwrap() {
            ExtensionEvent::DhtPortAnnounced { port, .. } => assert_eq!(port, 6666),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn other_commands_pass_through_untouched() {
        let (tx, mut rx) = event_channel();
        let link = MockLink::new();
        let mut signal = DhtPortSignal::new();

        assert!(!signal.on_command(&link, &tx, 4, &[0x1a, 0x0a]));
        assert_eq!(signal.remote_port(), None);
        assert!(!signal.remote_uses_dht());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn truncated_payload_is_consumed_without_state_change() {
        let (tx, mut rx) = event_channel();
        let link = MockLink::new();
        let mut signal = DhtPortSignal::new();

        assert!(signal.on_command(&link, &tx, DHT_PORT_MESSAGE_ID, &[0x1a]));
        assert_eq!(signal.remote_port(), None);
        assert!(!signal.remote_uses_dht());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn announce_frames_the_fixed_command() {
        let mut link = MockLink::new();
        DhtPortSignal::new().announce(&mut link, 6881);

        assert_eq!(&link.frames[0][..], &[0, 0, 0, 3, 9, 0x1a, 0xe1]);
    }
}
