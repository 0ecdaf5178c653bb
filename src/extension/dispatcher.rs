use bytes::Bytes;
use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

use super::error::ExtensionError;
use super::handshake::ExtensionHandshake;
use super::registry::ExtensionRegistry;
use crate::constants::EXTENSION_HANDSHAKE_ID;
use crate::events::{EventSender, ExtensionEvent};
use crate::wire::{extended_frame, PeerLink};

/// A negotiated capability handler.
///
/// One instance exists per capability per connection, created by the
/// registry's factory when the connection's [`ConnectionExtensions`] is
/// built. All per-connection capability state lives inside the instance and
/// dies with it.
pub trait Extension: Send {
    /// The capability's wire name, e.g. `"ut_metadata"`.
    fn name(&self) -> &'static str;

    /// Called with every decoded extended handshake from the remote,
    /// including replays.
    fn on_handshake(
        &mut self,
        ctx: &mut ExtensionContext<'_>,
        handshake: &ExtensionHandshake,
    ) -> Result<(), ExtensionError>;

    /// Called with the verbatim payload of every inbound frame routed to
    /// this capability. Errors are contained to the frame.
    fn on_message(
        &mut self,
        ctx: &mut ExtensionContext<'_>,
        payload: Bytes,
    ) -> Result<(), ExtensionError>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// What a capability handler may touch while handling a callback: the
/// transport, the outbound id table, and the event stream.
pub struct ExtensionContext<'a> {
    addr: SocketAddr,
    link: &'a mut dyn PeerLink,
    outgoing: &'a HashMap<&'static str, u8>,
    events: &'a EventSender,
}

impl ExtensionContext<'_> {
    /// The remote endpoint of this connection.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The id the remote expects for messages of `name`.
    ///
    /// Looked up fresh on every send: a reconnect may renegotiate different
    /// ids, so the result must never be cached past the connection.
    pub fn outgoing_id(&self, name: &str) -> Result<u8, ExtensionError> {
        self.outgoing
            .get(name)
            .copied()
            .ok_or_else(|| ExtensionError::NotSupported(name.to_string()))
    }

    /// Frames `payload` as an extended message of capability `name` and
    /// hands it to the transport.
    pub fn send(&mut self, name: &str, payload: &[u8]) -> Result<(), ExtensionError> {
        let id = self.outgoing_id(name)?;
        self.link.queue_frame(extended_frame(id, payload));
        Ok(())
    }

    /// Emits a fire-and-forget event to the application.
    pub fn emit(&self, event: ExtensionEvent) {
        let _ = self.events.send(event);
    }
}

/// Per-connection extension state: the two direction-asymmetric id maps and
/// this connection's capability handler instances.
///
/// The `outgoing` map holds the ids the *remote* chose (stamped on frames we
/// send); the `local_ids` map holds the ids *we* advertised (used to route
/// frames we receive). What the remote calls "3" for a capability need not
/// be what we call "3" — the maps are never merged.
///
/// Owned exclusively by its connection's processing task; dropping it
/// discards all extension state for the connection.
pub struct ConnectionExtensions {
    registry: Arc<ExtensionRegistry>,
    handlers: HashMap<&'static str, Box<dyn Extension>>,
    local_ids: HashMap<u8, &'static str>,
    outgoing: HashMap<&'static str, u8>,
    remote_handshake: Option<ExtensionHandshake>,
    negotiated: bool,
    events: EventSender,
}

impl ConnectionExtensions {
    /// Creates the extension state for a freshly established connection.
    pub fn new(registry: Arc<ExtensionRegistry>, events: EventSender) -> Self {
        let mut handlers = HashMap::new();
        let mut local_ids = HashMap::new();
        for entry in registry.entries() {
            handlers.insert(entry.name, entry.create_handler());
            local_ids.insert(entry.local_id, entry.name);
        }

        Self {
            registry,
            handlers,
            local_ids,
            outgoing: HashMap::new(),
            remote_handshake: None,
            negotiated: false,
            events,
        }
    }

    /// Builds our own extended handshake from the registry's capability
    /// map. Sending it (as extension message 0) is the transport owner's
    /// job.
    pub fn local_handshake(
        &self,
        client: Option<&str>,
        metadata_size: Option<i64>,
    ) -> ExtensionHandshake {
        let mut hs = ExtensionHandshake::new();
        hs.capabilities = self.registry.local_capability_map();
        hs.client = client.map(String::from);
        hs.metadata_size = metadata_size;
        hs
    }

    /// Processes the remote's extended handshake.
    ///
    /// Records the remote's id for every capability we also register;
    /// unknown remote capabilities are ignored for forward compatibility.
    /// The id maps are filled once — a replayed handshake still reaches the
    /// handlers but never rewrites the tables. On a payload that does not
    /// decode, negotiation degrades to "no extensions" and the error is
    /// returned.
    pub fn negotiate(
        &mut self,
        link: &mut dyn PeerLink,
        payload: &[u8],
    ) -> Result<(), ExtensionError> {
        let handshake = ExtensionHandshake::decode(payload)?;

        let registry = Arc::clone(&self.registry);
        if !self.negotiated {
            for entry in registry.entries() {
                if let Some(id) = handshake.capability_id(entry.name) {
                    self.outgoing.insert(entry.name, id);
                }
            }
            self.negotiated = true;
        }

        let addr = link.addr();
        // handlers run in registration order, each failure contained
        for entry in registry.entries() {
            let Some(handler) = self.handlers.get_mut(entry.name) else {
                continue;
            };
            let mut ctx = ExtensionContext {
                addr,
                link: &mut *link,
                outgoing: &self.outgoing,
                events: &self.events,
            };
            if let Err(e) = handler.on_handshake(&mut ctx, &handshake) {
                warn!("extension {} failed to handle handshake: {}", entry.name, e);
            }
        }

        self.remote_handshake = Some(handshake);
        Ok(())
    }

    /// Routes one inbound extended frame: `[1-byte ext id][payload]`.
    ///
    /// Id 0 is the handshake; other ids are resolved through the local-id
    /// table. Frames with unknown ids and frames a handler rejects are
    /// dropped, never fatal to the connection.
    pub fn route(&mut self, link: &mut dyn PeerLink, frame: Bytes) {
        if frame.is_empty() {
            debug!("dropping empty extended frame from {}", link.addr());
            return;
        }

        let ext_id = frame[0];
        let payload = frame.slice(1..);

        if ext_id == EXTENSION_HANDSHAKE_ID {
            if let Err(e) = self.negotiate(link, &payload) {
                warn!("dropping malformed extended handshake from {}: {}", link.addr(), e);
            }
            return;
        }

        let Some(name) = self.local_ids.get(&ext_id).copied() else {
            debug!("dropping extended frame with unknown id {}", ext_id);
            return;
        };
        let Some(handler) = self.handlers.get_mut(name) else {
            return;
        };

        let addr = link.addr();
        let mut ctx = ExtensionContext {
            addr,
            link,
            outgoing: &self.outgoing,
            events: &self.events,
        };
        if let Err(e) = handler.on_message(&mut ctx, payload) {
            warn!("extension {} dropped a frame: {}", name, e);
        }
    }

    /// The id the remote expects for outbound messages of `name`.
    pub fn outgoing_id(&self, name: &str) -> Result<u8, ExtensionError> {
        self.outgoing
            .get(name)
            .copied()
            .ok_or_else(|| ExtensionError::NotSupported(name.to_string()))
    }

    /// Frames and sends one extension message of capability `name`.
    ///
    /// Fails without sending anything if the remote never advertised the
    /// capability.
    pub fn send(
        &self,
        link: &mut dyn PeerLink,
        name: &str,
        payload: &[u8],
    ) -> Result<(), ExtensionError> {
        let id = self.outgoing_id(name)?;
        link.queue_frame(extended_frame(id, payload));
        Ok(())
    }

    /// Whether the remote advertised support for `name`.
    pub fn remote_supports(&self, name: &str) -> bool {
        self.outgoing.contains_key(name)
    }

    /// Whether a remote handshake has been processed.
    pub fn negotiated(&self) -> bool {
        self.negotiated
    }

    /// The remote's most recent extended handshake.
    pub fn remote_handshake(&self) -> Option<&ExtensionHandshake> {
        self.remote_handshake.as_ref()
    }

    /// Typed access to a capability's per-connection handler, e.g. to read
    /// metadata assembly progress for an externally-built timeout policy.
    pub fn handler<T: Extension + 'static>(&self, name: &str) -> Option<&T> {
        self.handlers.get(name)?.as_any().downcast_ref::<T>()
    }

    pub fn handler_mut<T: Extension + 'static>(&mut self, name: &str) -> Option<&mut T> {
        self.handlers.get_mut(name)?.as_any_mut().downcast_mut::<T>()
    }
}
