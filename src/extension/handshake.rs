use bytes::Bytes;
use std::collections::BTreeMap;

use super::error::ExtensionError;
use crate::bencode::{decode, encode, Value};

/// The extended handshake dictionary (BEP-10).
///
/// Carries the `m` capability map — capability name to the numeric id the
/// *sender* wants to receive that capability's messages under — plus a few
/// optional fields other capabilities piggyback on, most importantly the
/// declared metadata size used by metadata exchange.
#[derive(Debug, Clone, Default)]
pub struct ExtensionHandshake {
    /// Capability name → message id chosen by the sender. Ids of 0 are
    /// dropped on decode: 0 is reserved for the handshake.
    pub capabilities: BTreeMap<String, u8>,
    /// Client name and version (`v`).
    pub client: Option<String>,
    /// The sender's view of our external IP (`yourip`), raw bytes.
    pub your_ip: Option<Bytes>,
    /// Number of outstanding requests the sender allows (`reqq`).
    pub request_queue: Option<i64>,
    /// Declared total size of the info dictionary (`metadata_size`).
    pub metadata_size: Option<i64>,
}

impl ExtensionHandshake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes the handshake as the payload of extension message 0.
    pub fn encode(&self) -> Result<Bytes, ExtensionError> {
        let mut m = BTreeMap::new();
        for (name, id) in &self.capabilities {
            m.insert(
                Bytes::copy_from_slice(name.as_bytes()),
                Value::Integer(*id as i64),
            );
        }

        let mut dict = BTreeMap::new();
        dict.insert(Bytes::from_static(b"m"), Value::Dict(m));

        if let Some(ref client) = self.client {
            dict.insert(Bytes::from_static(b"v"), Value::string(client));
        }
        if let Some(ref ip) = self.your_ip {
            dict.insert(Bytes::from_static(b"yourip"), Value::Bytes(ip.clone()));
        }
        if let Some(reqq) = self.request_queue {
            dict.insert(Bytes::from_static(b"reqq"), Value::Integer(reqq));
        }
        if let Some(size) = self.metadata_size {
            dict.insert(Bytes::from_static(b"metadata_size"), Value::Integer(size));
        }

        Ok(Bytes::from(encode(&Value::Dict(dict))?))
    }

    /// Decodes a remote's extended handshake payload.
    ///
    /// Fails with [`ExtensionError::MalformedHandshake`] if the payload is
    /// not a bencoded dictionary. A missing `m` key yields an empty
    /// capability map, which negotiates as "no extensions".
    pub fn decode(payload: &[u8]) -> Result<Self, ExtensionError> {
        let value = decode(payload).map_err(|_| ExtensionError::MalformedHandshake)?;
        let dict = value
            .as_dict()
            .ok_or(ExtensionError::MalformedHandshake)?;

        let mut hs = Self::new();

        if let Some(m) = dict.get(b"m".as_slice()).and_then(|v| v.as_dict()) {
            for (key, val) in m {
                if let (Ok(name), Some(id)) = (std::str::from_utf8(key), val.as_integer()) {
                    if (1..=255).contains(&id) {
                        hs.capabilities.insert(name.to_string(), id as u8);
                    }
                }
            }
        }

        hs.client = dict
            .get(b"v".as_slice())
            .and_then(|v| v.as_str())
            .map(String::from);
        hs.your_ip = dict
            .get(b"yourip".as_slice())
            .and_then(|v| v.as_bytes())
            .cloned();
        hs.request_queue = dict.get(b"reqq".as_slice()).and_then(|v| v.as_integer());
        hs.metadata_size = dict
            .get(b"metadata_size".as_slice())
            .and_then(|v| v.as_integer());

        Ok(hs)
    }

    /// The id the sender of this handshake assigned to `name`, if any.
    pub fn capability_id(&self, name: &str) -> Option<u8> {
        self.capabilities.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let mut hs = ExtensionHandshake::new();
        hs.capabilities.insert("ut_metadata".to_string(), 3);
        hs.capabilities.insert("ut_pex".to_string(), 1);
        hs.client = Some("btex/0.1".to_string());
        hs.metadata_size = Some(20000);

        let encoded = hs.encode().unwrap();
        let decoded = ExtensionHandshake::decode(&encoded).unwrap();

        assert_eq!(decoded.capability_id("ut_metadata"), Some(3));
        assert_eq!(decoded.capability_id("ut_pex"), Some(1));
        assert_eq!(decoded.client, Some("btex/0.1".to_string()));
        assert_eq!(decoded.metadata_size, Some(20000));
    }

    #[test]
    fn reserved_and_out_of_range_ids_are_dropped() {
        // "bad" advertised with id 0, "huge" with id 300
        let payload = b"d1:md3:badi0e4:hugei300e6:ut_pexi2eee";
        let hs = ExtensionHandshake::decode(payload).unwrap();
        assert_eq!(hs.capability_id("bad"), None);
        assert_eq!(hs.capability_id("huge"), None);
        assert_eq!(hs.capability_id("ut_pex"), Some(2));
    }

    #[test]
    fn missing_capability_map_is_empty_not_fatal() {
        let hs = ExtensionHandshake::decode(b"d1:v4:teste").unwrap();
        assert!(hs.capabilities.is_empty());
        assert_eq!(hs.client, Some("test".to_string()));
    }

    #[test]
    fn non_dict_payload_is_malformed() {
        assert!(matches!(
            ExtensionHandshake::decode(b"i42e"),
            Err(ExtensionError::MalformedHandshake)
        ));
        assert!(matches!(
            ExtensionHandshake::decode(b"garbage"),
            Err(ExtensionError::MalformedHandshake)
        ));
    }
}
