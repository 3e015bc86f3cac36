//! Bidirectional map between event kinds and routing keys.

use std::collections::HashMap;

use crate::contracts::EventKind;
use crate::routing::{RoutingError, RoutingKey};

/// Which routing key each [`EventKind`] is published under.
///
/// Keys are unique: two kinds never share a routing key, so a consumer can
/// always pick the decoder from the routing key alone.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    by_kind: HashMap<EventKind, RoutingKey>,
    by_key: HashMap<RoutingKey, EventKind>,
}

impl RoutingTable {
    /// The conventional `<domain>.<entity>.<action>` keys.
    pub fn defaults() -> Self {
        let by_kind: HashMap<EventKind, RoutingKey> = EventKind::ALL
            .iter()
            .map(|kind| (*kind, RoutingKey::from_static(kind.default_routing_key())))
            .collect();
        let by_key = by_kind.iter().map(|(kind, key)| (key.clone(), *kind)).collect();
        Self { by_kind, by_key }
    }

    /// Defaults with per-kind overrides, keyed by [`EventKind::route_name`].
    pub fn with_overrides<I, N, K>(overrides: I) -> Result<Self, RoutingError>
    where
        I: IntoIterator<Item = (N, K)>,
        N: AsRef<str>,
        K: Into<String>,
    {
        let mut keys = Self::defaults().by_kind;

        for (name, key) in overrides {
            let kind = EventKind::from_route_name(name.as_ref())
                .ok_or_else(|| RoutingError::UnknownRoute(name.as_ref().to_owned()))?;
            keys.insert(kind, RoutingKey::parse(key)?);
        }

        Self::from_keys(keys)
    }

    fn from_keys(by_kind: HashMap<EventKind, RoutingKey>) -> Result<Self, RoutingError> {
        let mut by_key = HashMap::with_capacity(by_kind.len());
        let mut ordered: Vec<_> = by_kind.iter().collect();
        ordered.sort_by_key(|(kind, _)| **kind);

        for (kind, key) in ordered {
            if let Some(existing) = by_key.insert(key.clone(), *kind) {
                return Err(RoutingError::DuplicateRoutingKey {
                    key: key.to_string(),
                    first: existing.name(),
                    second: kind.name(),
                });
            }
        }

        Ok(Self { by_kind, by_key })
    }

    pub fn key_for(&self, kind: EventKind) -> &RoutingKey {
        // Construction inserts every kind.
        &self.by_kind[&kind]
    }

    pub fn kind_for(&self, key: &RoutingKey) -> Option<EventKind> {
        self.by_key.get(key).copied()
    }

    /// Look up a raw routing key as received from the broker.
    pub fn kind_for_str(&self, key: &str) -> Option<EventKind> {
        RoutingKey::parse(key).ok().and_then(|key| self.kind_for(&key))
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::defaults()
    }
}
