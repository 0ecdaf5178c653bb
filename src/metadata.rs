//! Metadata exchange (ut_metadata, [BEP-9]).
//!
//! Fetches the torrent info dictionary from peers in 16 KiB pieces, for
//! magnet links where no `.torrent` file exists. The remote declares the
//! total metadata size in its extended handshake; every piece is requested
//! up front and fragments are placed into a pre-sized buffer by piece index,
//! so out-of-order arrival and retransmits cannot corrupt the result.
//!
//! A completed assembly is *untrusted* peer-supplied data. When the
//! exchange is configured with an expected [`InfoHash`], completion emits
//! [`ExtensionEvent::MetadataVerificationRequired`] and the caller runs
//! [`AssembledMetadata::verify`] before using the dictionary.
//!
//! [BEP-9]: http://bittorrent.org/beps/bep_0009.html

use bytes::Bytes;
use std::any::Any;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::bencode::{decode, decode_prefix, encode, Value};
use crate::constants::{MAX_METADATA_SIZE, METADATA_PIECE_SIZE, UT_METADATA};
use crate::events::ExtensionEvent;
use crate::extension::{Extension, ExtensionContext, ExtensionError, ExtensionHandshake};
use crate::info_hash::InfoHash;

/// Message types of the ut_metadata extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataMessageType {
    /// Request a metadata piece.
    Request = 0,
    /// Deliver a metadata piece.
    Data = 1,
    /// Refuse a metadata request.
    Reject = 2,
}

impl MetadataMessageType {
    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(MetadataMessageType::Request),
            1 => Some(MetadataMessageType::Data),
            2 => Some(MetadataMessageType::Reject),
            _ => None,
        }
    }
}

/// One ut_metadata message: a bencoded header, followed by the raw fragment
/// bytes for data messages.
#[derive(Debug, Clone)]
pub struct MetadataMessage {
    pub msg_type: MetadataMessageType,
    pub piece: u32,
    /// Declared total metadata size; data messages carry it.
    pub total_size: Option<i64>,
    /// Raw fragment bytes trailing the header in data messages.
    pub data: Option<Bytes>,
}

impl MetadataMessage {
    pub fn request(piece: u32) -> Self {
        Self {
            msg_type: MetadataMessageType::Request,
            piece,
            total_size: None,
            data: None,
        }
    }

    pub fn data(piece: u32, total_size: i64, data: Bytes) -> Self {
        Self {
            msg_type: MetadataMessageType::Data,
            piece,
            total_size: Some(total_size),
            data: Some(data),
        }
    }

    pub fn reject(piece: u32) -> Self {
        Self {
            msg_type: MetadataMessageType::Reject,
            piece,
            total_size: None,
            data: None,
        }
    }

    /// Encodes the bencoded header, appending the raw fragment for data
    /// messages.
    pub fn encode(&self) -> Result<Bytes, ExtensionError> {
        let mut dict = BTreeMap::new();
        dict.insert(
            Bytes::from_static(b"msg_type"),
            Value::Integer(self.msg_type as i64),
        );
        dict.insert(
            Bytes::from_static(b"piece"),
            Value::Integer(self.piece as i64),
        );
        if let Some(total_size) = self.total_size {
            dict.insert(Bytes::from_static(b"total_size"), Value::Integer(total_size));
        }

        let header = encode(&Value::Dict(dict))?;
        match self.data {
            Some(ref data) => {
                let mut buf = Vec::with_capacity(header.len() + data.len());
                buf.extend_from_slice(&header);
                buf.extend_from_slice(data);
                Ok(Bytes::from(buf))
            }
            None => Ok(Bytes::from(header)),
        }
    }

    /// Decodes a message; the encoded length of the leading dictionary
    /// determines where the header ends and the fragment begins.
    pub fn decode(payload: &[u8]) -> Result<Self, ExtensionError> {
        let (header, consumed) = decode_prefix(payload)?;
        if header.as_dict().is_none() {
            return Err(ExtensionError::InvalidMessage(
                "metadata header is not a dictionary".into(),
            ));
        }

        let msg_type = header
            .get(b"msg_type")
            .and_then(|v| v.as_integer())
            .and_then(MetadataMessageType::from_i64)
            .ok_or_else(|| ExtensionError::InvalidMessage("missing or bad msg_type".into()))?;

        let piece = header
            .get(b"piece")
            .and_then(|v| v.as_integer())
            .filter(|p| (0..=u32::MAX as i64).contains(p))
            .ok_or_else(|| ExtensionError::InvalidMessage("missing or bad piece".into()))?
            as u32;

        let total_size = header.get(b"total_size").and_then(|v| v.as_integer());

        let data = if msg_type == MetadataMessageType::Data {
            Some(Bytes::copy_from_slice(&payload[consumed..]))
        } else {
            None
        };

        Ok(Self {
            msg_type,
            piece,
            total_size,
            data,
        })
    }
}

/// Number of metadata pieces for a declared size.
pub fn metadata_piece_count(metadata_size: usize) -> usize {
    metadata_size.div_ceil(METADATA_PIECE_SIZE)
}

/// Length of one metadata piece; only the last piece is short.
pub fn metadata_piece_len(piece: u32, total_size: usize) -> usize {
    let offset = piece as usize * METADATA_PIECE_SIZE;
    if offset >= total_size {
        0
    } else {
        (total_size - offset).min(METADATA_PIECE_SIZE)
    }
}

/// An in-progress metadata reconstruction for one connection.
///
/// The piece count is fixed when the assembly is created from the
/// handshake-declared size and never recomputed. Fragments land at
/// `piece * 16384` in the pre-sized buffer regardless of arrival order.
#[derive(Debug)]
pub struct MetadataAssembly {
    total_size: usize,
    piece_count: usize,
    received: Vec<bool>,
    received_count: usize,
    buffer: Vec<u8>,
    started_at: Instant,
    last_progress: Instant,
}

impl MetadataAssembly {
    fn new(total_size: usize) -> Self {
        let now = Instant::now();
        Self {
            total_size,
            piece_count: metadata_piece_count(total_size),
            received: vec![false; metadata_piece_count(total_size)],
            received_count: 0,
            buffer: vec![0u8; total_size],
            started_at: now,
            last_progress: now,
        }
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn piece_count(&self) -> usize {
        self.piece_count
    }

    pub fn received_pieces(&self) -> usize {
        self.received_count
    }

    pub fn is_complete(&self) -> bool {
        self.received_count == self.piece_count
    }

    /// Time since the assembly was created. Timeout policy belongs to the
    /// caller; this layer only reports.
    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Time since the last fragment was accepted.
    pub fn since_last_progress(&self) -> Duration {
        self.last_progress.elapsed()
    }

    /// Places one fragment by piece index. Returns whether the fragment was
    /// new; duplicates are ignored without double-counting.
    fn place(&mut self, piece: u32, data: &[u8]) -> Result<bool, ExtensionError> {
        if piece as usize >= self.piece_count {
            return Err(ExtensionError::InvalidMessage(format!(
                "metadata piece {} out of range ({} pieces)",
                piece, self.piece_count
            )));
        }

        let expected = metadata_piece_len(piece, self.total_size);
        if data.len() != expected {
            return Err(ExtensionError::InvalidMessage(format!(
                "metadata piece {} has {} bytes, expected {}",
                piece,
                data.len(),
                expected
            )));
        }

        if self.received[piece as usize] {
            debug!("ignoring duplicate metadata piece {}", piece);
            return Ok(false);
        }

        let offset = piece as usize * METADATA_PIECE_SIZE;
        self.buffer[offset..offset + expected].copy_from_slice(data);
        self.received[piece as usize] = true;
        self.received_count += 1;
        self.last_progress = Instant::now();
        Ok(true)
    }

    /// Decodes the finished buffer and hands it out, consuming the buffer.
    fn take_result(&mut self) -> Result<AssembledMetadata, ExtensionError> {
        let info = decode(&self.buffer)?;
        if info.as_dict().is_none() {
            return Err(ExtensionError::InvalidMessage(
                "assembled metadata is not a dictionary".into(),
            ));
        }
        let raw = Bytes::from(std::mem::take(&mut self.buffer));
        Ok(AssembledMetadata { raw, info })
    }
}

/// A reconstructed info dictionary, not yet trusted.
#[derive(Debug, Clone)]
pub struct AssembledMetadata {
    raw: Bytes,
    info: Value,
}

impl AssembledMetadata {
    /// The decoded dictionary. Untrusted until [`verify`](Self::verify)
    /// succeeds.
    pub fn info(&self) -> &Value {
        &self.info
    }

    /// The exact bytes the dictionary was decoded from.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// SHA-1 of the raw bytes.
    pub fn info_hash(&self) -> InfoHash {
        InfoHash::for_info_bytes(&self.raw)
    }

    /// Checks the raw bytes against the expected info hash, yielding the
    /// dictionary only on a match.
    pub fn verify(self, expected: &InfoHash) -> Result<Value, ExtensionError> {
        if self.info_hash() == *expected {
            Ok(self.info)
        } else {
            Err(ExtensionError::InfoHashMismatch)
        }
    }
}

enum MetadataState {
    /// No usable handshake yet; the remote cannot serve metadata.
    AwaitingHandshake,
    Assembling(MetadataAssembly),
    Complete,
}

/// Per-connection ut_metadata handler.
///
/// Register via the extension registry, optionally with the info hash the
/// metadata must verify against:
///
/// ```
/// use btex::constants::UT_METADATA;
/// use btex::extension::ExtensionRegistry;
/// use btex::metadata::MetadataExchange;
///
/// let registry = ExtensionRegistry::builder()
///     .register(UT_METADATA, 3, || Box::new(MetadataExchange::new(None)))
///     .unwrap()
///     .build();
/// ```
pub struct MetadataExchange {
    expected: Option<InfoHash>,
    state: MetadataState,
}

impl MetadataExchange {
    pub fn new(expected: Option<InfoHash>) -> Self {
        Self {
            expected,
            state: MetadataState::AwaitingHandshake,
        }
    }

    /// The in-progress assembly, if fragments are still outstanding.
    pub fn assembly(&self) -> Option<&MetadataAssembly> {
        match &self.state {
            MetadataState::Assembling(a) => Some(a),
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, MetadataState::Complete)
    }
}

impl Extension for MetadataExchange {
    fn name(&self) -> &'static str {
        UT_METADATA
    }

    fn on_handshake(
        &mut self,
        ctx: &mut ExtensionContext<'_>,
        handshake: &ExtensionHandshake,
    ) -> Result<(), ExtensionError> {
        // piece count is fixed by the first usable handshake; replays are
        // observed but never restart the assembly
        if !matches!(self.state, MetadataState::AwaitingHandshake) {
            return Ok(());
        }
        let Some(size) = handshake.metadata_size else {
            return Ok(());
        };
        if size <= 0 || size as usize > MAX_METADATA_SIZE {
            warn!("ignoring implausible declared metadata size {}", size);
            return Ok(());
        }
        if ctx.outgoing_id(UT_METADATA).is_err() {
            // size declared but capability not advertised; nothing to request
            return Ok(());
        }

        let assembly = MetadataAssembly::new(size as usize);
        let piece_count = assembly.piece_count();
        self.state = MetadataState::Assembling(assembly);

        debug!(
            "requesting {} metadata pieces ({} bytes) from {}",
            piece_count,
            size,
            ctx.addr()
        );
        for piece in 0..piece_count {
            let request = MetadataMessage::request(piece as u32).encode()?;
            ctx.send(UT_METADATA, &request)?;
        }
        Ok(())
    }

    fn on_message(
        &mut self,
        ctx: &mut ExtensionContext<'_>,
        payload: Bytes,
    ) -> Result<(), ExtensionError> {
        let message = MetadataMessage::decode(&payload)?;

        match message.msg_type {
            MetadataMessageType::Request => {
                // we fetch metadata, we do not serve it
                let reject = MetadataMessage::reject(message.piece).encode()?;
                ctx.send(UT_METADATA, &reject)
            }
            MetadataMessageType::Reject => {
                debug!(
                    "{} rejected metadata piece {} request",
                    ctx.addr(),
                    message.piece
                );
                Ok(())
            }
            MetadataMessageType::Data => {
                let completed = match &mut self.state {
                    MetadataState::Assembling(assembly) => {
                        let data = message.data.as_deref().unwrap_or(&[]);
                        if !assembly.place(message.piece, data)? {
                            return Ok(());
                        }
                        if assembly.is_complete() {
                            Some(assembly.take_result()?)
                        } else {
                            None
                        }
                    }
                    _ => {
                        debug!("ignoring metadata piece with no assembly in progress");
                        None
                    }
                };

                if let Some(metadata) = completed {
                    self.state = MetadataState::Complete;
                    let addr = ctx.addr();
                    match self.expected {
                        Some(expected) => ctx.emit(ExtensionEvent::MetadataVerificationRequired {
                            addr,
                            metadata,
                            expected,
                        }),
                        None => ctx.emit(ExtensionEvent::MetadataAssembled { addr, metadata }),
                    }
                }
                Ok(())
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
