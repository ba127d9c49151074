//! Entity filters: bounding box and tag patterns.

use indexmap::IndexMap;
use rhi_sluice_core::{Bound, Entity, EntityContainer, EntityType, Metadata, Output, Sink, TaskError};
use std::collections::HashSet;
use std::str::FromStr;

/// Output plumbing shared by single-output entity filters.
macro_rules! entity_filter {
    ($ty:ty) => {
        impl rhi_sluice_core::Outputs for $ty {
            fn output_kinds(&self) -> Vec<rhi_sluice_core::StreamKind> {
                vec![rhi_sluice_core::StreamKind::Entity]
            }

            fn set_sink(
                &mut self,
                slot: usize,
                sink: rhi_sluice_core::AnySink,
            ) -> Result<(), rhi_sluice_core::TaskError> {
                if slot != 0 {
                    return Err(rhi_sluice_core::TaskError::NoSuchSlot { slot, count: 1 });
                }
                self.output.bind(slot, sink)
            }
        }

        impl rhi_sluice_core::SinkSource for $ty {
            fn input_kind(&self) -> rhi_sluice_core::StreamKind {
                rhi_sluice_core::StreamKind::Entity
            }

            fn into_sink(self: Box<Self>) -> rhi_sluice_core::AnySink {
                rhi_sluice_core::AnySink::Entity(self)
            }
        }
    };
}

pub(crate) use entity_filter;

/// Geographic extent, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
}

impl Extent {
    pub fn new(left: f64, right: f64, top: f64, bottom: f64) -> Result<Self, TaskError> {
        if left > right {
            return Err(TaskError::InvalidArgument {
                name: "left".into(),
                reason: format!("left ({}) is east of right ({})", left, right),
            });
        }
        if bottom > top {
            return Err(TaskError::InvalidArgument {
                name: "bottom".into(),
                reason: format!("bottom ({}) is north of top ({})", bottom, top),
            });
        }
        Ok(Self {
            left,
            right,
            top,
            bottom,
        })
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lon >= self.left && lon <= self.right && lat >= self.bottom && lat <= self.top
    }
}

/// Keeps nodes inside the extent, ways referencing a kept node and relations
/// with a kept member. Bounds are replaced by the extent itself.
///
/// Expects type-then-id input so nodes are seen before the ways that use them.
pub struct BoundingBox {
    extent: Extent,
    nodes: HashSet<i64>,
    ways: HashSet<i64>,
    relations: HashSet<i64>,
    output: Output<EntityContainer>,
}

impl BoundingBox {
    pub fn new(extent: Extent) -> Self {
        Self {
            extent,
            nodes: HashSet::new(),
            ways: HashSet::new(),
            relations: HashSet::new(),
            output: Output::new(),
        }
    }

    fn keep(&mut self, entity: &Entity) -> bool {
        match entity {
            Entity::Bound(_) => true,
            Entity::Node(node) => {
                let inside = self.extent.contains(node.lat, node.lon);
                if inside {
                    self.nodes.insert(node.id);
                }
                inside
            }
            Entity::Way(way) => {
                let kept = way.nodes.iter().any(|id| self.nodes.contains(id));
                if kept {
                    self.ways.insert(way.id);
                }
                kept
            }
            Entity::Relation(relation) => {
                let kept = relation.members.iter().any(|m| {
                    let ids = match m.member_type {
                        EntityType::Node => &self.nodes,
                        EntityType::Way => &self.ways,
                        EntityType::Relation => &self.relations,
                        EntityType::Bound => return false,
                    };
                    ids.contains(&m.member_id)
                });
                if kept {
                    self.relations.insert(relation.id);
                }
                kept
            }
        }
    }
}

entity_filter!(BoundingBox);

impl Sink<EntityContainer> for BoundingBox {
    fn initialize(&mut self, metadata: &Metadata) -> Result<(), TaskError> {
        self.output.sink(0)?.initialize(metadata)
    }

    fn process(&mut self, record: EntityContainer) -> Result<(), TaskError> {
        if !self.keep(&record.entity) {
            return Ok(());
        }
        let record = match record.entity {
            Entity::Bound(bound) => EntityContainer::new(Entity::Bound(Bound {
                left: self.extent.left,
                right: self.extent.right,
                top: self.extent.top,
                bottom: self.extent.bottom,
                origin: bound.origin,
            })),
            entity => EntityContainer::new(entity),
        };
        self.output.sink(0)?.process(record)
    }

    fn complete(&mut self) -> Result<(), TaskError> {
        self.output.sink(0)?.complete()
    }

    fn release(&mut self) {
        self.output.release();
    }
}

/// Matches one tag's value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagPattern {
    /// `key=*`: any value.
    Any,
    /// `key=a,b,c`: one of the listed values.
    OneOf(Vec<String>),
}

impl TagPattern {
    pub fn parse(spec: &str) -> Self {
        if spec == "*" {
            TagPattern::Any
        } else {
            TagPattern::OneOf(spec.split(',').map(|v| v.trim().to_string()).collect())
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            TagPattern::Any => true,
            TagPattern::OneOf(values) => values.iter().any(|v| v == value),
        }
    }
}

/// `accept-<types>` or `reject-<types>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagFilterMode {
    pub accept: bool,
    pub entity_type: EntityType,
}

impl FromStr for TagFilterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (action, target) = s
            .split_once('-')
            .ok_or_else(|| format!("expected accept-<type> or reject-<type>, got '{}'", s))?;
        let accept = match action {
            "accept" => true,
            "reject" => false,
            other => return Err(format!("unknown tag filter action '{}'", other)),
        };
        let entity_type = match target {
            "nodes" => EntityType::Node,
            "ways" => EntityType::Way,
            "relations" => EntityType::Relation,
            other => return Err(format!("unknown tag filter target '{}'", other)),
        };
        Ok(Self {
            accept,
            entity_type,
        })
    }
}

/// Accepts or rejects entities of one type by their tags. Entities of other
/// types pass through untouched.
pub struct TagFilter {
    mode: TagFilterMode,
    patterns: IndexMap<String, TagPattern>,
    output: Output<EntityContainer>,
}

impl TagFilter {
    pub fn new(mode: TagFilterMode, patterns: IndexMap<String, TagPattern>) -> Self {
        Self {
            mode,
            patterns,
            output: Output::new(),
        }
    }

    fn keep(&self, entity: &Entity) -> bool {
        if entity.entity_type() != self.mode.entity_type {
            return true;
        }
        let matched = entity.tags().iter().any(|tag| {
            self.patterns
                .get(&tag.key)
                .is_some_and(|pattern| pattern.matches(&tag.value))
        });
        matched == self.mode.accept
    }
}

entity_filter!(TagFilter);

impl Sink<EntityContainer> for TagFilter {
    fn initialize(&mut self, metadata: &Metadata) -> Result<(), TaskError> {
        self.output.sink(0)?.initialize(metadata)
    }

    fn process(&mut self, record: EntityContainer) -> Result<(), TaskError> {
        if self.keep(&record.entity) {
            self.output.sink(0)?.process(record)?;
        }
        Ok(())
    }

    fn complete(&mut self) -> Result<(), TaskError> {
        self.output.sink(0)?.complete()
    }

    fn release(&mut self) {
        self.output.release();
    }
}
