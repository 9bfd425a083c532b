//! Port mapping resolution.
//!
//! Requests may carry several `local -> remote` port pairs, but only one pair
//! is honored per load balancer. The configured `lb-port` wins when present,
//! otherwise the first pair in request order is used.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{info, warn};

/// Ordered mapping from load balancer (local) port to backend (remote) port.
///
/// Serialized as a JSON object; entry order is preserved because the first
/// entry is the fallback when the preferred port is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortMapping(Vec<(u16, u16)>);

impl PortMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-entry mapping.
    pub fn single(local: u16, remote: u16) -> Self {
        Self(vec![(local, remote)])
    }

    /// Insert a pair, replacing the remote port if `local` is already mapped.
    pub fn insert(&mut self, local: u16, remote: u16) {
        match self.0.iter_mut().find(|(l, _)| *l == local) {
            Some(entry) => entry.1 = remote,
            None => self.0.push((local, remote)),
        }
    }

    pub fn get(&self, local: u16) -> Option<u16> {
        self.0.iter().find(|(l, _)| *l == local).map(|(_, r)| *r)
    }

    pub fn first(&self) -> Option<(u16, u16)> {
        self.0.first().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<(u16, u16)> for PortMapping {
    fn from_iter<I: IntoIterator<Item = (u16, u16)>>(iter: I) -> Self {
        let mut mapping = PortMapping::new();
        for (local, remote) in iter {
            mapping.insert(local, remote);
        }
        mapping
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (local, remote)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", local, remote)?;
        }
        write!(f, "}}")
    }
}

impl Serialize for PortMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (local, remote) in &self.0 {
            map.serialize_entry(local, remote)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for PortMapping {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PortMappingVisitor;

        impl<'de> Visitor<'de> for PortMappingVisitor {
            type Value = PortMapping;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of local port to remote port")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut mapping = PortMapping::new();
                while let Some((local, remote)) = access.next_entry::<u16, u16>()? {
                    mapping.insert(local, remote);
                }
                Ok(mapping)
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(PortMapping::new())
            }
        }

        deserializer.deserialize_any(PortMappingVisitor)
    }
}

/// Outcome of resolving a port mapping.
///
/// `local_port` is the port that was tried: the selected entry's key, or the
/// preferred port when the mapping was empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortResolution {
    pub local_port: u16,
    pub remote_port: Option<u16>,
}

impl PortResolution {
    /// The resolved pair, if both ports are usable (non-zero).
    pub fn pair(&self) -> Option<(u16, u16)> {
        match self.remote_port {
            Some(remote) if remote != 0 && self.local_port != 0 => Some((self.local_port, remote)),
            _ => None,
        }
    }
}

impl fmt::Display for PortResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.remote_port {
            Some(remote) => write!(f, "lb_port={}, remote_port={}", self.local_port, remote),
            None => write!(f, "lb_port={}, remote_port=None", self.local_port),
        }
    }
}

/// Pick exactly one `(local, remote)` pair from `mapping`.
pub fn resolve(mapping: &PortMapping, preferred_local: u16) -> PortResolution {
    if mapping.len() > 1 {
        warn!(
            port_mapping = %mapping,
            "Multiple port mappings specified in request, only one is honored"
        );
    }

    if let Some(remote) = mapping.get(preferred_local).filter(|r| *r != 0) {
        return PortResolution {
            local_port: preferred_local,
            remote_port: Some(remote),
        };
    }

    match mapping.first() {
        Some((local, remote)) => {
            info!(
                lb_port = local,
                remote_port = remote,
                "No port mapping for configured lb-port {}, defaulting to requested pair",
                preferred_local
            );
            PortResolution {
                local_port: local,
                remote_port: Some(remote),
            }
        }
        None => PortResolution {
            local_port: preferred_local,
            remote_port: None,
        },
    }
}
