//! Protocol constants shared by all extension capabilities.
//!
//! Base-protocol command identifiers and extension-protocol values live here
//! so the capabilities never drift apart on the magic numbers.

/// Base-protocol command id for extended messages (BEP-10).
pub const EXTENDED_MESSAGE_ID: u8 = 20;

/// Base-protocol command id for the DHT port announcement (BEP-5).
pub const DHT_PORT_MESSAGE_ID: u8 = 9;

/// Extension message id reserved for the extended handshake itself.
///
/// Never assigned to a capability; the registry rejects it.
pub const EXTENSION_HANDSHAKE_ID: u8 = 0;

/// Canonical capability name for metadata exchange (BEP-9).
pub const UT_METADATA: &str = "ut_metadata";

/// Canonical capability name for peer exchange (BEP-11).
pub const UT_PEX: &str = "ut_pex";

/// Size of a metadata piece (16 KiB); only the final piece may be shorter.
pub const METADATA_PIECE_SIZE: usize = 16384;

/// Upper bound on a declared metadata size. Info dictionaries in the wild
/// stay well under this; larger declarations are treated as hostile.
pub const MAX_METADATA_SIZE: usize = 8 * 1024 * 1024;

/// Compact peer record length: 4-byte IPv4 address + 2-byte port (BEP-11).
pub const COMPACT_PEER_LEN: usize = 6;
