//! Extension protocol negotiation and dispatch (BEP-10).
//!
//! The extension protocol lets peers negotiate optional capabilities on top
//! of the base wire protocol. Each side advertises a map of capability name
//! to the numeric id *it* wants to receive those messages under; the two
//! directions of a connection therefore use independent id spaces, and this
//! module keeps them in two separate per-connection maps.
//!
//! Capabilities implement the [`Extension`] trait and are registered once at
//! startup in an [`ExtensionRegistry`]; each connection then materializes
//! its own handler instances through [`ConnectionExtensions`], so no
//! capability state is ever shared between connections.

mod dispatcher;
mod error;
mod handshake;
mod registry;

pub use dispatcher::{ConnectionExtensions, Extension, ExtensionContext};
pub use error::ExtensionError;
pub use handshake::ExtensionHandshake;
pub use registry::{ExtensionRegistry, ExtensionRegistryBuilder};
