//! Fixtures shared by the unit tests.

use rhi_sluice_core::{
    AnySink, Entity, EntityContainer, Metadata, Node, Sink, Tag, TaskError, Way,
};
use std::sync::{Arc, Mutex, MutexGuard};

pub fn node_at(id: i64, lat: f64, lon: f64) -> EntityContainer {
    EntityContainer::new(Entity::Node(Node {
        id,
        version: 1,
        tags: Vec::new(),
        lat,
        lon,
    }))
}

pub fn node(id: i64) -> EntityContainer {
    node_at(id, 0.0, 0.0)
}

pub fn node_v(id: i64, version: i32) -> EntityContainer {
    EntityContainer::new(Entity::Node(Node {
        id,
        version,
        tags: Vec::new(),
        lat: 0.0,
        lon: 0.0,
    }))
}

pub fn tagged_node(id: i64, key: &str, value: &str) -> EntityContainer {
    EntityContainer::new(Entity::Node(Node {
        id,
        version: 1,
        tags: vec![Tag::new(key, value)],
        lat: 0.0,
        lon: 0.0,
    }))
}

pub fn way_with(id: i64, nodes: Vec<i64>) -> EntityContainer {
    EntityContainer::new(Entity::Way(Way {
        id,
        version: 1,
        tags: Vec::new(),
        nodes,
    }))
}

pub fn way(id: i64) -> EntityContainer {
    way_with(id, Vec::new())
}

#[derive(Default)]
struct Collected {
    records: Vec<EntityContainer>,
    completed: bool,
    released: usize,
}

/// Entity sink that records everything it sees; clones share state.
#[derive(Clone, Default)]
pub struct CollectingSink {
    state: Arc<Mutex<Collected>>,
}

impl CollectingSink {
    fn state(&self) -> MutexGuard<'_, Collected> {
        self.state.lock().unwrap()
    }

    pub fn boxed(&self) -> AnySink {
        AnySink::Entity(Box::new(self.clone()))
    }

    pub fn ids(&self) -> Vec<i64> {
        self.state().records.iter().map(|r| r.entity.id()).collect()
    }

    pub fn versions(&self) -> Vec<(i64, i32)> {
        self.state()
            .records
            .iter()
            .map(|r| (r.entity.id(), r.entity.version()))
            .collect()
    }

    pub fn completed(&self) -> bool {
        self.state().completed
    }

    pub fn released(&self) -> usize {
        self.state().released
    }
}

impl Sink<EntityContainer> for CollectingSink {
    fn initialize(&mut self, _metadata: &Metadata) -> Result<(), TaskError> {
        Ok(())
    }

    fn process(&mut self, record: EntityContainer) -> Result<(), TaskError> {
        self.state().records.push(record);
        Ok(())
    }

    fn complete(&mut self) -> Result<(), TaskError> {
        self.state().completed = true;
        Ok(())
    }

    fn release(&mut self) {
        self.state().released += 1;
    }
}
