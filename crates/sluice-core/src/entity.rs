//! Graph-structured geographic records.
//!
//! A dataset is a stream of bounds, nodes (points), ways (ordered node
//! references) and relations (ordered typed members). Change streams wrap
//! the same entities with the action that produced them.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A key/value tag attached to an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Kind of entity, in stream order (bounds first, relations last).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Bound,
    Node,
    Way,
    Relation,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityType::Bound => "bound",
            EntityType::Node => "node",
            EntityType::Way => "way",
            EntityType::Relation => "relation",
        };
        f.write_str(name)
    }
}

/// Bounding box of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
    #[serde(default)]
    pub origin: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub tags: Vec<Tag>,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Way {
    pub id: i64,
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub nodes: Vec<i64>,
}

/// A typed reference from a relation to another entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationMember {
    pub member_type: EntityType,
    pub member_id: i64,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: i64,
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub members: Vec<RelationMember>,
}

/// Any entity that can appear in a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Entity {
    Bound(Bound),
    Node(Node),
    Way(Way),
    Relation(Relation),
}

impl Entity {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Entity::Bound(_) => EntityType::Bound,
            Entity::Node(_) => EntityType::Node,
            Entity::Way(_) => EntityType::Way,
            Entity::Relation(_) => EntityType::Relation,
        }
    }

    /// Entity id. Bounds have no id and report 0.
    pub fn id(&self) -> i64 {
        match self {
            Entity::Bound(_) => 0,
            Entity::Node(n) => n.id,
            Entity::Way(w) => w.id,
            Entity::Relation(r) => r.id,
        }
    }

    pub fn version(&self) -> i32 {
        match self {
            Entity::Bound(_) => 0,
            Entity::Node(n) => n.version,
            Entity::Way(w) => w.version,
            Entity::Relation(r) => r.version,
        }
    }

    pub fn tags(&self) -> &[Tag] {
        match self {
            Entity::Bound(_) => &[],
            Entity::Node(n) => &n.tags,
            Entity::Way(w) => &w.tags,
            Entity::Relation(r) => &r.tags,
        }
    }

    /// Look up a tag value by key.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags()
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }

    /// Stream ordering: type rank, then id, then version.
    pub fn compare_type_then_id(&self, other: &Entity) -> Ordering {
        self.entity_type()
            .cmp(&other.entity_type())
            .then(self.id().cmp(&other.id()))
            .then(self.version().cmp(&other.version()))
    }

    /// Alternative ordering used by some downstream formats: id first.
    pub fn compare_id_then_type(&self, other: &Entity) -> Ordering {
        self.id()
            .cmp(&other.id())
            .then(self.entity_type().cmp(&other.entity_type()))
            .then(self.version().cmp(&other.version()))
    }
}

/// Element type of an entity stream. Serializes as the bare entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityContainer {
    pub entity: Entity,
}

impl EntityContainer {
    pub fn new(entity: Entity) -> Self {
        Self { entity }
    }
}

impl From<Entity> for EntityContainer {
    fn from(entity: Entity) -> Self {
        Self::new(entity)
    }
}

/// What happened to an entity in a change stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Modify,
    Delete,
}

/// Element type of a change stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeContainer {
    pub action: ChangeAction,
    pub entity: Entity,
}

impl ChangeContainer {
    pub fn new(action: ChangeAction, entity: Entity) -> Self {
        Self { action, entity }
    }
}
