use std::collections::BTreeMap;
use std::sync::Arc;

use super::dispatcher::Extension;
use super::error::ExtensionError;
use crate::constants::EXTENSION_HANDSHAKE_ID;

type HandlerFactory = Arc<dyn Fn() -> Box<dyn Extension> + Send + Sync>;

/// One locally-known capability: its name, the id we advertise for it, and
/// the factory producing a per-connection handler instance.
pub struct ExtensionRegistration {
    pub name: &'static str,
    pub local_id: u8,
    factory: HandlerFactory,
}

impl ExtensionRegistration {
    pub(super) fn create_handler(&self) -> Box<dyn Extension> {
        (self.factory)()
    }
}

/// Process-wide table of registered capabilities.
///
/// Populated once at startup through [`ExtensionRegistry::builder`] and
/// never mutated afterwards; connections share it behind an `Arc` without
/// locking.
pub struct ExtensionRegistry {
    entries: Vec<ExtensionRegistration>,
}

impl ExtensionRegistry {
    pub fn builder() -> ExtensionRegistryBuilder {
        ExtensionRegistryBuilder {
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[ExtensionRegistration] {
        &self.entries
    }

    pub fn by_name(&self, name: &str) -> Option<&ExtensionRegistration> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn by_local_id(&self, id: u8) -> Option<&ExtensionRegistration> {
        self.entries.iter().find(|e| e.local_id == id)
    }

    /// The `{name: local id}` map we advertise in our own extended
    /// handshake.
    pub fn local_capability_map(&self) -> BTreeMap<String, u8> {
        self.entries
            .iter()
            .map(|e| (e.name.to_string(), e.local_id))
            .collect()
    }
}

/// Builder validating registrations before the registry is frozen.
pub struct ExtensionRegistryBuilder {
    entries: Vec<ExtensionRegistration>,
}

impl ExtensionRegistryBuilder {
    /// Registers a capability under a local id.
    ///
    /// Rejects id 0 (reserved for the handshake) and duplicate names or
    /// ids.
    pub fn register<F>(
        mut self,
        name: &'static str,
        local_id: u8,
        factory: F,
    ) -> Result<Self, ExtensionError>
    where
        F: Fn() -> Box<dyn Extension> + Send + Sync + 'static,
    {
        if local_id == EXTENSION_HANDSHAKE_ID {
            return Err(ExtensionError::ReservedId);
        }
        if self
            .entries
            .iter()
            .any(|e| e.name == name || e.local_id == local_id)
        {
            return Err(ExtensionError::Duplicate(name.to_string()));
        }

        self.entries.push(ExtensionRegistration {
            name,
            local_id,
            factory: Arc::new(factory),
        });
        Ok(self)
    }

    pub fn build(self) -> Arc<ExtensionRegistry> {
        Arc::new(ExtensionRegistry {
            entries: self.entries,
        })
    }
}
