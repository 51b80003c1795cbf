//! Geometry catalog and the shared pass-table cache.
//!
//! The catalog is the immutable, scenario-wide answer to "where is node N
//! at time t": satellites carry their TLE (or a fixed test position),
//! ground nodes their geodetic point. FoV models and the link fabric read
//! it instead of reaching into other nodes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use orbsim_geo::frame::Vec3;
use orbsim_geo::sun::point_in_sunlight;
use orbsim_geo::{position_velocity_ecef, GeoError, GroundPoint, Tle};

use crate::kernel::NodeKind;
use crate::time::{SimClock, SimTime};
use crate::{NodeId, TopologyId};

/// Where a node's position comes from.
#[derive(Debug, Clone)]
pub enum PositionSource {
    /// Propagated from a two-line element set.
    Tle(Box<Tle>),
    /// Static geodetic ground point.
    Ground(GroundPoint),
    /// Fixed ECEF position with a forced illumination flag (test orbits).
    Fixed { ecef: Vec3, sunlit: bool },
}

/// One node's geometry entry.
#[derive(Debug, Clone)]
pub struct GeoEntry {
    pub kind: NodeKind,
    pub topology: TopologyId,
    /// Node activity window (offsets from scenario start).
    pub window: (SimTime, SimTime),
    pub source: PositionSource,
}

/// Scenario-wide geometry lookup. Built once by the orchestrator.
#[derive(Debug)]
pub struct GeoCatalog {
    clock: SimClock,
    entries: BTreeMap<NodeId, GeoEntry>,
}

impl GeoCatalog {
    pub fn new(clock: SimClock) -> GeoCatalog {
        GeoCatalog {
            clock,
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, node: NodeId, entry: GeoEntry) {
        self.entries.insert(node, entry);
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn entry(&self, node: NodeId) -> Option<&GeoEntry> {
        self.entries.get(&node)
    }

    pub fn kind_of(&self, node: NodeId) -> Option<NodeKind> {
        self.entries.get(&node).map(|e| e.kind)
    }

    /// Whether the node's own window contains `t`.
    pub fn active_at(&self, node: NodeId, t: SimTime) -> bool {
        self.entries
            .get(&node)
            .map(|e| e.window.0 <= t && t <= e.window.1)
            .unwrap_or(false)
    }

    /// Node ids of any of the given kinds, in id order.
    pub fn nodes_of_kinds(&self, kinds: &[NodeKind]) -> Vec<NodeId> {
        self.entries
            .iter()
            .filter(|(_, e)| kinds.contains(&e.kind))
            .map(|(id, _)| *id)
            .collect()
    }

    /// ECEF position of a node at simulated time `t`.
    pub fn position_of(&self, node: NodeId, t: SimTime) -> Result<Vec3, GeoError> {
        let entry = self
            .entries
            .get(&node)
            .ok_or_else(|| GeoError::Domain(format!("node {node} not in geometry catalog")))?;
        match &entry.source {
            PositionSource::Ground(gp) => Ok(gp.to_ecef()),
            PositionSource::Fixed { ecef, .. } => Ok(*ecef),
            PositionSource::Tle(tle) => {
                let (pos, _) = position_velocity_ecef(tle, self.clock.unix_of(t))?;
                Ok(pos)
            }
        }
    }

    /// Whether a node is sunlit at `t`. Ground nodes use the shadow test on
    /// their surface position (relevant for solar-powered IoT devices).
    pub fn in_sunlight_of(&self, node: NodeId, t: SimTime) -> Result<bool, GeoError> {
        let entry = self
            .entries
            .get(&node)
            .ok_or_else(|| GeoError::Domain(format!("node {node} not in geometry catalog")))?;
        match &entry.source {
            PositionSource::Fixed { sunlit, .. } => Ok(*sunlit),
            PositionSource::Ground(gp) => {
                Ok(point_in_sunlight(gp.to_ecef(), self.clock.unix_of(t)))
            }
            PositionSource::Tle(tle) => {
                let (pos, _) = position_velocity_ecef(tle, self.clock.unix_of(t))?;
                Ok(point_in_sunlight(pos, self.clock.unix_of(t)))
            }
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.keys().copied()
    }
}

/// One visibility interval in simulated time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassInterval {
    pub start: SimTime,
    pub end: SimTime,
}

impl PassInterval {
    pub fn contains(&self, t: SimTime) -> bool {
        self.start <= t && t <= self.end
    }
}

/// Process-wide memo of pass tables, keyed by the unordered node pair.
///
/// Many readers, one-time writer per key: a table is computed once behind
/// the write lock and shared (`Arc`) afterwards. Tests inject a fresh cache
/// per scenario.
#[derive(Debug, Default)]
pub struct PassTableCache {
    tables: RwLock<HashMap<(NodeId, NodeId), Arc<Vec<PassInterval>>>>,
}

impl PassTableCache {
    pub fn new() -> PassTableCache {
        PassTableCache::default()
    }

    fn key(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Fetch the table for a pair, computing and publishing it on first use.
    pub fn get_or_compute(
        &self,
        a: NodeId,
        b: NodeId,
        compute: impl FnOnce() -> Vec<PassInterval>,
    ) -> Arc<Vec<PassInterval>> {
        let key = Self::key(a, b);
        if let Some(table) = self.tables.read().get(&key) {
            return Arc::clone(table);
        }
        let mut tables = self.tables.write();
        // Double-checked: another thread may have published while we waited.
        if let Some(table) = tables.get(&key) {
            return Arc::clone(table);
        }
        let table = Arc::new(compute());
        tables.insert(key, Arc::clone(&table));
        table
    }

    /// Whether a pair's table has been computed.
    pub fn contains(&self, a: NodeId, b: NodeId) -> bool {
        self.tables.read().contains_key(&Self::key(a, b))
    }

    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }
}

/// Shared read-only context handed to every node advance.
#[derive(Clone)]
pub struct SharedWorld {
    pub clock: SimClock,
    pub catalog: Arc<GeoCatalog>,
    pub passes: Arc<PassTableCache>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock() -> SimClock {
        SimClock::new("2022-10-17 12:00:00", "2022-10-17 13:00:00", 1.0).unwrap()
    }

    fn ground_entry(kind: NodeKind) -> GeoEntry {
        GeoEntry {
            kind,
            topology: TopologyId(0),
            window: (SimTime::ZERO, SimTime::from_secs(3600.0)),
            source: PositionSource::Ground(GroundPoint::new(0.0, 0.0, 0.0)),
        }
    }

    #[test]
    fn catalog_answers_kind_and_activity() {
        let mut catalog = GeoCatalog::new(clock());
        catalog.insert(NodeId(1), ground_entry(NodeKind::Gs));
        catalog.insert(
            NodeId(2),
            GeoEntry {
                window: (SimTime::from_secs(10.0), SimTime::from_secs(20.0)),
                ..ground_entry(NodeKind::IotDevice)
            },
        );
        assert_eq!(catalog.kind_of(NodeId(1)), Some(NodeKind::Gs));
        assert!(catalog.active_at(NodeId(1), SimTime::ZERO));
        assert!(!catalog.active_at(NodeId(2), SimTime::ZERO));
        assert!(catalog.active_at(NodeId(2), SimTime::from_secs(15.0)));
        assert_eq!(catalog.nodes_of_kinds(&[NodeKind::IotDevice]), vec![NodeId(2)]);
    }

    #[test]
    fn fixed_source_overrides_sunlight() {
        let mut catalog = GeoCatalog::new(clock());
        catalog.insert(
            NodeId(5),
            GeoEntry {
                kind: NodeKind::Sat,
                topology: TopologyId(0),
                window: (SimTime::ZERO, SimTime::from_secs(3600.0)),
                source: PositionSource::Fixed {
                    ecef: Vec3::new(7.0e6, 0.0, 0.0),
                    sunlit: false,
                },
            },
        );
        assert!(!catalog.in_sunlight_of(NodeId(5), SimTime::ZERO).unwrap());
        let pos = catalog.position_of(NodeId(5), SimTime::ZERO).unwrap();
        assert_eq!(pos.x, 7.0e6);
    }

    #[test]
    fn pass_cache_computes_once_and_is_symmetric() {
        let cache = PassTableCache::new();
        let mut calls = 0;
        let windows = vec![PassInterval {
            start: SimTime::from_secs(10.0),
            end: SimTime::from_secs(20.0),
        }];
        let w = windows.clone();
        let a = cache.get_or_compute(NodeId(1), NodeId(2), || {
            calls += 1;
            w
        });
        let b = cache.get_or_compute(NodeId(2), NodeId(1), || {
            calls += 1;
            Vec::new()
        });
        assert_eq!(calls, 1);
        assert_eq!(*a, *b);
        assert_eq!(a.as_slice(), windows.as_slice());
        assert_eq!(cache.len(), 1);
    }
}
