//! # Map Provider
//!
//! The navigator reads road data through [`MapProvider`]: edge endpoints and
//! length, street names (which may need a tile fetch first), and snapping a
//! raw position to the nearest road.
//!
//! [`RoadNetwork`] is an in-memory provider backed by an R-tree over edge
//! pieces. It is used for simulations and tests, and lets callers mark tiles
//! as not yet loaded to exercise lazy street-name lookups.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use rstar::primitives::{GeomWithData, Line};
use rstar::RTree;

use crate::eta::CrossTimeSource;
use crate::geo_utils;
use crate::segment::{
    EdgeRef, Instruction, NodeId, Readiness, Segment, SegmentGeometry, TravelDirection,
};
use crate::GpsPoint;

/// Candidates pulled from the R-tree before exact distance ranking.
const SNAP_CANDIDATES: usize = 16;

/// Urgency of a tile request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TilePriority {
    /// Needed for the street name of the next instruction.
    NextTurn,
    /// Ahead of the vehicle along the route.
    Prefetch,
}

/// Static description of an edge.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeInfo {
    pub from_node: NodeId,
    pub to_node: NodeId,
    pub from_pos: GpsPoint,
    pub to_pos: GpsPoint,
    /// Edge length in meters.
    pub length: f64,
    /// Allowed driving direction for one-way edges.
    pub oneway: Option<TravelDirection>,
}

/// Result of snapping a position to the road network.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeSnap {
    pub edge: EdgeRef,
    /// Nearest point on the edge.
    pub point: GpsPoint,
    /// Distance from the position to the edge, in meters.
    pub distance_m: f64,
}

/// Road data consumed by the navigator.
pub trait MapProvider {
    fn edge_info(&self, edge: EdgeRef) -> Option<EdgeInfo>;

    /// Street name of an edge. `Pending` means the tile is not loaded yet; the
    /// caller is expected to request it.
    fn street_name(&self, edge: EdgeRef) -> Readiness<String>;

    /// Nearest edge within `max_distance_m` of `position`.
    fn snap_to_edge(&self, position: &GpsPoint, max_distance_m: f64) -> Option<EdgeSnap>;

    /// Ask for a tile to be loaded. Must not block.
    fn request_tile(&self, tile: u32, priority: TilePriority);
}

// =============================================================================
// In-memory road network
// =============================================================================

/// One road edge of a [`RoadNetwork`].
#[derive(Debug, Clone)]
pub struct RoadEdge {
    pub from_node: NodeId,
    pub to_node: NodeId,
    pub points: Vec<GpsPoint>,
    pub street: String,
    /// Free-flow speed in m/s.
    pub speed_mps: f64,
    pub oneway: Option<TravelDirection>,
}

impl RoadEdge {
    pub fn new(from_node: u32, to_node: u32, points: Vec<GpsPoint>) -> Self {
        Self {
            from_node: NodeId(from_node),
            to_node: NodeId(to_node),
            points,
            street: String::new(),
            speed_mps: 13.9,
            oneway: None,
        }
    }

    pub fn street(mut self, name: &str) -> Self {
        self.street = name.to_string();
        self
    }

    pub fn speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = speed_mps;
        self
    }

    pub fn oneway(mut self, direction: TravelDirection) -> Self {
        self.oneway = Some(direction);
        self
    }

    fn length(&self) -> f64 {
        geo_utils::polyline_length(&self.points)
    }
}

type EdgePiece = GeomWithData<Line<[f64; 2]>, EdgeRef>;

/// In-memory [`MapProvider`] and [`CrossTimeSource`].
#[derive(Default)]
pub struct RoadNetwork {
    edges: HashMap<EdgeRef, RoadEdge>,
    index: RTree<EdgePiece>,
    traffic: HashMap<EdgeRef, f64>,
    unloaded_tiles: HashSet<u32>,
    tile_requests: Mutex<Vec<(u32, TilePriority)>>,
}

impl RoadNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an edge. Edges with fewer than two points are ignored.
    pub fn add_edge(&mut self, edge: EdgeRef, road: RoadEdge) {
        if road.points.len() < 2 {
            log::warn!("Ignoring edge {}/{} with {} points", edge.tile, edge.line, road.points.len());
            return;
        }
        for piece in road.points.windows(2) {
            let line = Line::new(
                [piece[0].longitude, piece[0].latitude],
                [piece[1].longitude, piece[1].latitude],
            );
            self.index.insert(GeomWithData::new(line, edge));
        }
        self.edges.insert(edge, road);
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Multiply the free-flow traversal time of an edge, e.g. 2.0 for heavy traffic.
    pub fn set_traffic_factor(&mut self, edge: EdgeRef, factor: f64) {
        self.traffic.insert(edge, factor);
    }

    /// Mark a tile as not loaded: street names on it become pending.
    pub fn unload_tile(&mut self, tile: u32) {
        self.unloaded_tiles.insert(tile);
    }

    pub fn load_tile(&mut self, tile: u32) {
        self.unloaded_tiles.remove(&tile);
    }

    /// Drain the tile requests received so far.
    pub fn take_tile_requests(&self) -> Vec<(u32, TilePriority)> {
        let mut requests = self
            .tile_requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *requests)
    }

    pub fn geometry(&self, edge: EdgeRef) -> Option<SegmentGeometry> {
        let road = self.edges.get(&edge)?;
        SegmentGeometry::from_polyline(road.points.clone(), None)
    }

    /// Free-flow traversal time of an edge, scaled by its traffic factor.
    pub fn travel_time(&self, edge: EdgeRef) -> Option<f64> {
        let road = self.edges.get(&edge)?;
        let factor = self.traffic.get(&edge).copied().unwrap_or(1.0);
        Some(road.length() / road.speed_mps.max(0.1) * factor)
    }

    /// Build an instrumented route segment over one of this network's edges.
    pub fn segment(
        &self,
        edge: EdgeRef,
        direction: TravelDirection,
        group_id: u32,
        instruction: Instruction,
    ) -> Option<Segment> {
        let geometry = self.geometry(edge)?;
        let distance = geometry.length();
        let cross_time = self.travel_time(edge)?;
        Some(
            Segment::new(edge, direction, group_id, instruction)
                .with_metrics(distance, cross_time)
                .with_geometry(geometry),
        )
    }
}

impl std::fmt::Debug for RoadNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoadNetwork")
            .field("edges", &self.edges.len())
            .field("pieces", &self.index.size())
            .field("unloaded_tiles", &self.unloaded_tiles)
            .finish()
    }
}

impl MapProvider for RoadNetwork {
    fn edge_info(&self, edge: EdgeRef) -> Option<EdgeInfo> {
        let road = self.edges.get(&edge)?;
        Some(EdgeInfo {
            from_node: road.from_node,
            to_node: road.to_node,
            from_pos: *road.points.first()?,
            to_pos: *road.points.last()?,
            length: road.length(),
            oneway: road.oneway,
        })
    }

    fn street_name(&self, edge: EdgeRef) -> Readiness<String> {
        if self.unloaded_tiles.contains(&edge.tile) {
            return Readiness::Pending;
        }
        Readiness::Ready(
            self.edges
                .get(&edge)
                .map(|road| road.street.clone())
                .unwrap_or_default(),
        )
    }

    fn snap_to_edge(&self, position: &GpsPoint, max_distance_m: f64) -> Option<EdgeSnap> {
        let query = [position.longitude, position.latitude];

        self.index
            .nearest_neighbor_iter(&query)
            .take(SNAP_CANDIDATES)
            .filter_map(|piece| {
                let line = piece.geom();
                let a = GpsPoint::new(line.from[1], line.from[0]);
                let b = GpsPoint::new(line.to[1], line.to[0]);
                let projection = geo_utils::project_onto_polyline(position, &[a, b])?;
                Some(EdgeSnap {
                    edge: piece.data,
                    point: projection.point,
                    distance_m: projection.offset_m,
                })
            })
            .filter(|snap| snap.distance_m <= max_distance_m)
            .min_by(|a, b| a.distance_m.total_cmp(&b.distance_m))
    }

    fn request_tile(&self, tile: u32, priority: TilePriority) {
        log::debug!("Tile {} requested ({:?})", tile, priority);
        self.tile_requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((tile, priority));
    }
}

impl CrossTimeSource for RoadNetwork {
    fn cross_time(&self, segment: &Segment) -> Option<f64> {
        self.travel_time(segment.edge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> RoadNetwork {
        let mut net = RoadNetwork::new();
        net.add_edge(
            EdgeRef::new(1, 0),
            RoadEdge::new(0, 1, vec![GpsPoint::new(0.0, 0.0), GpsPoint::new(0.0, 0.001)])
                .street("Main Street")
                .speed(10.0),
        );
        net.add_edge(
            EdgeRef::new(2, 1),
            RoadEdge::new(1, 2, vec![GpsPoint::new(0.0, 0.001), GpsPoint::new(0.001, 0.001)])
                .street("High Street")
                .oneway(TravelDirection::WithLine),
        );
        net
    }

    #[test]
    fn test_snap_picks_nearest_edge() {
        let net = network();
        let snap = net.snap_to_edge(&GpsPoint::new(0.0007, 0.00102), 200.0).unwrap();
        assert_eq!(snap.edge, EdgeRef::new(2, 1));
        assert!(snap.distance_m < 5.0, "got {}", snap.distance_m);

        let snap = net.snap_to_edge(&GpsPoint::new(0.0001, 0.0004), 200.0).unwrap();
        assert_eq!(snap.edge, EdgeRef::new(1, 0));
    }

    #[test]
    fn test_snap_respects_radius() {
        let net = network();
        assert!(net.snap_to_edge(&GpsPoint::new(0.01, 0.01), 200.0).is_none());
        assert!(RoadNetwork::new().snap_to_edge(&GpsPoint::new(0.0, 0.0), 200.0).is_none());
    }

    #[test]
    fn test_street_name_pending_until_tile_loaded() {
        let mut net = network();
        net.unload_tile(2);
        assert_eq!(net.street_name(EdgeRef::new(2, 1)), Readiness::Pending);
        assert_eq!(
            net.street_name(EdgeRef::new(1, 0)),
            Readiness::Ready("Main Street".to_string())
        );

        net.load_tile(2);
        assert_eq!(
            net.street_name(EdgeRef::new(2, 1)),
            Readiness::Ready("High Street".to_string())
        );
    }

    #[test]
    fn test_tile_requests_are_drained() {
        let net = network();
        net.request_tile(7, TilePriority::Prefetch);
        net.request_tile(8, TilePriority::NextTurn);
        assert_eq!(
            net.take_tile_requests(),
            vec![(7, TilePriority::Prefetch), (8, TilePriority::NextTurn)]
        );
        assert!(net.take_tile_requests().is_empty());
    }

    #[test]
    fn test_travel_time_with_traffic() {
        let mut net = network();
        let edge = EdgeRef::new(1, 0);
        let free_flow = net.travel_time(edge).unwrap();
        assert!((free_flow - 11.12).abs() < 0.1, "got {free_flow}");

        net.set_traffic_factor(edge, 2.0);
        assert!((net.travel_time(edge).unwrap() - 2.0 * free_flow).abs() < 1e-9);
    }

    #[test]
    fn test_edge_info_and_segment() {
        let net = network();
        let info = net.edge_info(EdgeRef::new(2, 1)).unwrap();
        assert_eq!(info.from_node, NodeId(1));
        assert_eq!(info.oneway, Some(TravelDirection::WithLine));

        let seg = net
            .segment(EdgeRef::new(1, 0), TravelDirection::WithLine, 3, Instruction::TurnLeft)
            .unwrap();
        assert!(seg.is_instrumented());
        assert!((seg.distance - 111.2).abs() < 1.0);
        assert!(net.segment(EdgeRef::new(9, 9), TravelDirection::WithLine, 0, Instruction::Continue).is_none());
    }
}
