use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// The closed set of entity kinds the store knows about.
///
/// LoadBalancer, Port, Pool, and Origin are backed by tables and go through
/// the mutation pipeline. Owner, Location, and Provider are reference kinds:
/// opaque identities stored in foreign-key columns, never rows of their own.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum EntityKind {
    LoadBalancer,
    Port,
    Pool,
    Origin,
    Owner,
    Location,
    Provider,
}

impl EntityKind {
    /// The type tag embedded in every id of this kind.
    pub fn tag(self) -> &'static str {
        match self {
            EntityKind::LoadBalancer => "load-balancer",
            EntityKind::Port => "port",
            EntityKind::Pool => "pool",
            EntityKind::Origin => "origin",
            EntityKind::Owner => "owner",
            EntityKind::Location => "location",
            EntityKind::Provider => "provider",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "load-balancer" => Some(EntityKind::LoadBalancer),
            "port" => Some(EntityKind::Port),
            "pool" => Some(EntityKind::Pool),
            "origin" => Some(EntityKind::Origin),
            "owner" => Some(EntityKind::Owner),
            "location" => Some(EntityKind::Location),
            "provider" => Some(EntityKind::Provider),
            _ => None,
        }
    }

    /// Table backing this kind, if any. Reference kinds have none.
    pub fn table(self) -> Option<&'static str> {
        match self {
            EntityKind::LoadBalancer => Some("load_balancers"),
            EntityKind::Port => Some("ports"),
            EntityKind::Pool => Some("pools"),
            EntityKind::Origin => Some("origins"),
            _ => None,
        }
    }

    /// Subject name change messages for this kind are addressed to.
    pub fn subject(self) -> &'static str {
        match self {
            EntityKind::LoadBalancer => "load-balancer",
            EntityKind::Port => "load-balancer-port",
            EntityKind::Pool => "load-balancer-pool",
            EntityKind::Origin => "load-balancer-origin",
            _ => "unknown",
        }
    }
}

/// A globally unique, typed identifier: a kind tag plus a UUIDv7, rendered
/// as `"<tag>:<uuid>"` (e.g. `load-balancer:0193…`). The embedded tag is what
/// lets event assembly classify otherwise untyped id strings.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct EntityId {
    kind: EntityKind,
    uuid: Uuid,
}

impl EntityId {
    /// Mints a fresh id of the given kind.
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            uuid: Uuid::now_v7(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
}

#[derive(Debug, thiserror::Error)]
#[error("malformed entity id: {0:?}")]
pub struct ParseIdError(String);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.tag(), self.uuid)
    }
}

impl FromStr for EntityId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tag, uuid) = s.rsplit_once(':').ok_or_else(|| ParseIdError(s.to_string()))?;
        let kind = EntityKind::from_tag(tag).ok_or_else(|| ParseIdError(s.to_string()))?;
        let uuid = Uuid::parse_str(uuid).map_err(|_| ParseIdError(s.to_string()))?;
        Ok(EntityId { kind, uuid })
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_round_trip() -> anyhow::Result<()> {
        let id = EntityId::new(EntityKind::LoadBalancer);
        let rendered = id.to_string();
        assert!(rendered.starts_with("load-balancer:"));

        let parsed: EntityId = rendered.parse()?;
        assert_eq!(parsed, id);
        assert_eq!(parsed.kind(), EntityKind::LoadBalancer);
        Ok(())
    }

    #[test]
    fn rejects_unknown_tags_and_bad_uuids() {
        assert!("rocket:0193a0c8-0000-7000-8000-000000000000"
            .parse::<EntityId>()
            .is_err());
        assert!("pool:not-a-uuid".parse::<EntityId>().is_err());
        assert!("no-separator".parse::<EntityId>().is_err());
    }

    #[test]
    fn serde_uses_the_string_form() -> anyhow::Result<()> {
        let id = EntityId::new(EntityKind::Origin);
        let json = serde_json::to_string(&id)?;
        assert_eq!(json, format!("\"{}\"", id));

        let back: EntityId = serde_json::from_str(&json)?;
        assert_eq!(back, id);
        Ok(())
    }

    #[test]
    fn subjects_map_per_kind() {
        assert_eq!(EntityKind::LoadBalancer.subject(), "load-balancer");
        assert_eq!(EntityKind::Port.subject(), "load-balancer-port");
        assert_eq!(EntityKind::Pool.subject(), "load-balancer-pool");
        assert_eq!(EntityKind::Origin.subject(), "load-balancer-origin");
        assert_eq!(EntityKind::Owner.subject(), "unknown");
        assert_eq!(EntityKind::Location.subject(), "unknown");
    }
}
