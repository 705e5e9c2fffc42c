use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::id::{EntityId, EntityKind};

/// A record the store can persist. Field names map to table columns through
/// serde; fields without a matching column are filtered out before binding.
pub trait Entity: Serialize + DeserializeOwned {
    const KIND: EntityKind;

    fn id(&self) -> Option<&EntityId>;
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LoadBalancer {
    #[serde(default)]
    pub id: Option<EntityId>,
    pub name: String,
    pub owner_id: EntityId,
    pub location_id: EntityId,
    pub provider_id: EntityId,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<i64>,
}

impl Entity for LoadBalancer {
    const KIND: EntityKind = EntityKind::LoadBalancer;

    fn id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Port {
    #[serde(default)]
    pub id: Option<EntityId>,
    pub name: String,
    pub number: i64,
    pub load_balancer_id: EntityId,
    /// Pools this port serves; persisted through the port_pools join table,
    /// not a column.
    #[serde(default)]
    pub pool_ids: Vec<EntityId>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<i64>,
}

impl Entity for Port {
    const KIND: EntityKind = EntityKind::Port;

    fn id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Pool {
    #[serde(default)]
    pub id: Option<EntityId>,
    pub name: String,
    pub protocol: String,
    pub owner_id: EntityId,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<i64>,
}

impl Entity for Pool {
    const KIND: EntityKind = EntityKind::Pool;

    fn id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Origin {
    #[serde(default)]
    pub id: Option<EntityId>,
    pub name: String,
    pub target: String,
    pub port_number: i64,
    pub pool_id: EntityId,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<i64>,
}

impl Entity for Origin {
    const KIND: EntityKind = EntityKind::Origin;

    fn id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }
}
