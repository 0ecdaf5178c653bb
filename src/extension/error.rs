use thiserror::Error;

/// Errors that can occur in the extension layer.
#[derive(Debug, Error)]
pub enum ExtensionError {
    /// The remote's extended handshake could not be decoded. Negotiation
    /// for the connection degrades to "no extensions".
    #[error("malformed extension handshake")]
    MalformedHandshake,

    /// A frame's bencoded payload could not be decoded. The frame is
    /// dropped; the connection stays up.
    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    /// Attempted to send a capability message the remote never advertised.
    #[error("peer does not support extension: {0}")]
    NotSupported(String),

    /// Extension id 0 is reserved for the handshake itself.
    #[error("extension id 0 is reserved for the handshake")]
    ReservedId,

    /// Two registrations share a name or a local id.
    #[error("duplicate extension registration: {0}")]
    Duplicate(String),

    /// A capability payload decoded but violated the capability's format.
    #[error("invalid extension message: {0}")]
    InvalidMessage(String),

    /// Assembled metadata did not hash to the expected info hash.
    #[error("metadata does not match expected info hash")]
    InfoHashMismatch,
}
