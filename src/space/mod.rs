//! The 4D regulatory coordinate space.
//!
//! [`CoordinateSpace`] keeps only what spatial queries need: each item's
//! coordinate and its outgoing crosswalk edges. Item content stays in the
//! [`RegulatoryStore`].

pub mod coordinate;
pub mod mapper;
pub mod store;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, trace};

pub use coordinate::{Coordinate4D, NurembergNumber};
pub use mapper::{CoordinateMapper, CoordinateTables, ItemMetadata};
pub use store::{Crosswalk, InMemoryStore, RegulatoryItem, RegulatoryStore};

use crate::error::{Error, Result};

/// Default hop limit for crosswalk traversal.
pub const DEFAULT_TRAVERSAL_DEPTH: usize = 3;

/// Slack for radius comparisons on accumulated float error.
const RADIUS_EPSILON: f64 = 1e-9;

/// An item id with its distance from the query point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbor {
    pub id: String,
    pub distance: f64,
}

/// An item reached by crosswalk traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelatedItem {
    pub id: String,
    pub relationship_type: String,
    /// Hops from the start item (1 = direct crosswalk)
    pub depth: usize,
    /// The item whose edge reached this one
    pub via: String,
}

struct SpatialEntry {
    coordinate: Coordinate4D,
    edges: RwLock<Vec<Crosswalk>>,
}

/// Coordinates and crosswalk edges for every indexed item.
///
/// Reads take shared locks only. Edge creation write-locks the source
/// item's edge list alone, so it never blocks readers of other items.
#[derive(Default)]
pub struct CoordinateSpace {
    entries: RwLock<BTreeMap<String, Arc<SpatialEntry>>>,
}

impl std::fmt::Debug for CoordinateSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinateSpace")
            .field("items", &self.len())
            .finish()
    }
}

fn by_distance_then_id(a: &Neighbor, b: &Neighbor) -> std::cmp::Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.id.cmp(&b.id))
}

impl CoordinateSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every item currently in the store.
    pub fn from_store(store: &dyn RegulatoryStore) -> Self {
        let space = Self::new();
        for item in store.items() {
            space.insert(&item);
        }
        debug!(items = space.len(), "Coordinate space indexed");
        space
    }

    /// Index (or re-index) one item's coordinate and edges.
    pub fn insert(&self, item: &RegulatoryItem) {
        let entry = Arc::new(SpatialEntry {
            coordinate: item.coordinate,
            edges: RwLock::new(item.crosswalks.clone()),
        });
        self.entries.write().insert(item.id.clone(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    fn entry(&self, id: &str) -> Option<Arc<SpatialEntry>> {
        self.entries.read().get(id).cloned()
    }

    pub fn coordinate(&self, id: &str) -> Option<Coordinate4D> {
        self.entry(id).map(|e| e.coordinate)
    }

    pub fn edges(&self, id: &str) -> Option<Vec<Crosswalk>> {
        self.entry(id).map(|e| e.edges.read().clone())
    }

    pub fn distance(a: &Coordinate4D, b: &Coordinate4D) -> f64 {
        a.distance(b)
    }

    fn scan(&self, coord: &Coordinate4D) -> Vec<Neighbor> {
        self.entries
            .read()
            .iter()
            .map(|(id, entry)| Neighbor {
                id: id.clone(),
                distance: coord.distance(&entry.coordinate),
            })
            .collect()
    }

    /// The `k` closest items, ties broken by id ascending.
    pub fn nearest_neighbors(&self, coord: &Coordinate4D, k: usize) -> Vec<Neighbor> {
        let mut all = self.scan(coord);
        all.sort_by(by_distance_then_id);
        all.truncate(k);
        all
    }

    /// Every item within `radius` (inclusive), closest first.
    pub fn within_radius(&self, coord: &Coordinate4D, radius: f64) -> Vec<Neighbor> {
        let mut hits: Vec<Neighbor> = self
            .scan(coord)
            .into_iter()
            .filter(|n| n.distance <= radius + RADIUS_EPSILON)
            .collect();
        hits.sort_by(by_distance_then_id);
        hits
    }

    /// Breadth-first walk along crosswalks, optionally restricted to one
    /// relationship type, up to `max_depth` hops.
    ///
    /// Returns `None` for an unknown start id. Each item appears once, at
    /// the smallest depth it is reachable at; the start item is never
    /// included, even when a cycle leads back to it.
    pub fn related_items(
        &self,
        id: &str,
        relationship_type: Option<&str>,
        max_depth: usize,
    ) -> Option<Vec<RelatedItem>> {
        let start = self.entry(id)?;

        let mut visited: BTreeSet<String> = BTreeSet::new();
        visited.insert(id.to_string());
        let mut frontier: VecDeque<(String, Arc<SpatialEntry>, usize)> = VecDeque::new();
        frontier.push_back((id.to_string(), start, 0));
        let mut found = Vec::new();

        while let Some((current_id, entry, depth)) = frontier.pop_front() {
            if depth >= max_depth {
                continue;
            }

            let edges = entry.edges.read().clone();
            for edge in edges {
                if let Some(wanted) = relationship_type {
                    if !edge.relationship_type.eq_ignore_ascii_case(wanted) {
                        continue;
                    }
                }
                if visited.contains(&edge.target_id) {
                    continue;
                }
                let Some(target) = self.entry(&edge.target_id) else {
                    trace!(from = %current_id, to = %edge.target_id, "Skipping dangling crosswalk");
                    continue;
                };

                visited.insert(edge.target_id.clone());
                found.push(RelatedItem {
                    id: edge.target_id.clone(),
                    relationship_type: edge.relationship_type.clone(),
                    depth: depth + 1,
                    via: current_id.clone(),
                });
                frontier.push_back((edge.target_id, target, depth + 1));
            }
        }

        Some(found)
    }

    /// Add a typed edge `from -> to`.
    ///
    /// Both ends must be indexed. Adding an edge that already exists is a
    /// no-op returning the existing edge. The edge is visible to every
    /// read issued after this returns.
    pub fn add_crosswalk(&self, from: &str, to: &str, relationship_type: &str) -> Result<Crosswalk> {
        let source = self.entry(from).ok_or_else(|| Error::ItemNotFound {
            id: from.to_string(),
        })?;
        if !self.contains(to) {
            return Err(Error::ItemNotFound { id: to.to_string() });
        }

        let mut edges = source.edges.write();
        if let Some(existing) = edges
            .iter()
            .find(|e| e.target_id == to && e.relationship_type == relationship_type)
        {
            return Ok(existing.clone());
        }

        let edge = Crosswalk::new(to, relationship_type);
        edges.push(edge.clone());
        debug!(from, to, relationship_type, "Crosswalk created");
        Ok(edge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(p: u8, l: u8, b: f64, e: u8) -> Coordinate4D {
        Coordinate4D::new(p, l, b, e).unwrap()
    }

    fn space_of(items: Vec<RegulatoryItem>) -> CoordinateSpace {
        CoordinateSpace::from_store(&InMemoryStore::from_items(items))
    }

    #[test]
    fn test_nearest_neighbors_ties_break_by_id() {
        let space = space_of(vec![
            RegulatoryItem::new("b", c(3, 2, 2.0, 2)),
            RegulatoryItem::new("a", c(3, 2, 1.0, 2)),
            RegulatoryItem::new("c", c(5, 4, 5.0, 5)),
        ]);

        let hits = space.nearest_neighbors(&c(3, 2, 1.5, 2), 2);
        let ids: Vec<_> = hits.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!((hits[0].distance - 0.5).abs() < 1e-12);

        assert_eq!(space.nearest_neighbors(&c(1, 1, 0.0, 1), 10).len(), 3);
    }

    #[test]
    fn test_within_radius_is_inclusive() {
        let space = space_of(vec![
            RegulatoryItem::new("edge", c(3, 2, 2.5, 2)),
            RegulatoryItem::new("far", c(3, 2, 2.6, 2)),
        ]);
        let hits = space.within_radius(&c(3, 2, 1.5, 2), 1.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "edge");
    }

    #[test]
    fn test_related_items_terminates_on_cycle() {
        let space = space_of(vec![
            RegulatoryItem::new("a", c(1, 1, 1.0, 1)).with_crosswalk("b", "implements"),
            RegulatoryItem::new("b", c(1, 1, 2.0, 1)).with_crosswalk("c", "implements"),
            RegulatoryItem::new("c", c(1, 1, 3.0, 1)).with_crosswalk("a", "modifies"),
        ]);

        let related = space.related_items("a", None, 50).unwrap();
        let ids: Vec<_> = related.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(related[1].depth, 2);
        assert_eq!(related[1].via, "b");
    }

    #[test]
    fn test_related_items_filters_and_bounds_depth() {
        let space = space_of(vec![
            RegulatoryItem::new("a", c(1, 1, 1.0, 1))
                .with_crosswalk("b", "implements")
                .with_crosswalk("d", "modifies"),
            RegulatoryItem::new("b", c(1, 1, 2.0, 1)).with_crosswalk("c", "implements"),
            RegulatoryItem::new("c", c(1, 1, 3.0, 1)),
            RegulatoryItem::new("d", c(1, 1, 4.0, 1)),
        ]);

        let implements = space.related_items("a", Some("implements"), 3).unwrap();
        assert_eq!(implements.len(), 2);
        assert!(implements.iter().all(|r| r.relationship_type == "implements"));

        let one_hop = space.related_items("a", None, 1).unwrap();
        assert_eq!(one_hop.len(), 2);
        assert!(space.related_items("a", None, 0).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_item_is_not_found() {
        let space = CoordinateSpace::new();
        assert!(space.related_items("ghost", None, 3).is_none());
        assert!(space.coordinate("ghost").is_none());
        assert!(matches!(
            space.add_crosswalk("ghost", "other", "implements"),
            Err(Error::ItemNotFound { .. })
        ));
    }

    #[test]
    fn test_add_crosswalk_read_after_write() {
        let space = space_of(vec![
            RegulatoryItem::new("a", c(1, 1, 1.0, 1)),
            RegulatoryItem::new("b", c(1, 1, 2.0, 1)),
        ]);

        assert!(space.related_items("a", None, 1).unwrap().is_empty());
        space.add_crosswalk("a", "b", "implements").unwrap();
        space.add_crosswalk("a", "b", "implements").unwrap();

        let related = space.related_items("a", None, 1).unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(space.edges("a").unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_edge_creation() {
        let items: Vec<_> = (0..20)
            .map(|i| RegulatoryItem::new(format!("n{:02}", i), c(1, 1, f64::from(i) / 4.0, 1)))
            .collect();
        let space = Arc::new(space_of(items));

        let handles: Vec<_> = (1..20)
            .map(|i| {
                let space = Arc::clone(&space);
                std::thread::spawn(move || {
                    space
                        .add_crosswalk("n00", &format!("n{:02}", i), "references")
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(space.edges("n00").unwrap().len(), 19);
    }
}
