//! # Route Guidance
//!
//! Turn-by-turn route tracking and guidance for in-vehicle navigation.
//!
//! This library provides:
//! - A segment model for computed routes, with lazy instrumentation
//! - A detour overlay that splices a short reroute in front of an existing route
//! - Progress tracking (distance to turn, distance to destination) per GPS fix
//! - Incremental ETA estimation with throttled change notifications
//! - Off-route detection and short / full recalculation
//! - Guidance events (instructions, announcements, arrival)
//!
//! The routing backend and the map/tile provider are external collaborators,
//! described by the [`RoutingBackend`] and [`MapProvider`] traits. An in-memory
//! [`RoadNetwork`] implements the map side for simulations and tests.
//!
//! ## Features
//!
//! - **`parallel`** - Compute per-segment cross-times with rayon when preparing routes
//! - **`serde`** - Serialize configuration and presentation events
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use route_guidance::{EdgeRef, Instruction, RouteSegments, Segment, SegmentList, TravelDirection};
//!
//! let segment = |line: u32, group: u32| {
//!     Segment::new(EdgeRef::new(1, line), TravelDirection::WithLine, group, Instruction::Continue)
//! };
//!
//! // A computed route of four segments...
//! let base = SegmentList::new((0..4).map(|i| segment(i, 1)).collect()).unwrap();
//! let mut route = RouteSegments::new(base);
//!
//! // ...and a short reroute that replaces the first three with a single detour segment.
//! route.install_detour(vec![segment(10, 7)], 1, 16).unwrap();
//!
//! assert_eq!(route.len(), 2);
//! assert_eq!(route.get(0).edge, EdgeRef::new(1, 10));
//! assert_eq!(route.get(1).edge, EdgeRef::new(1, 3));
//! ```

pub mod backend;
pub mod config;
pub mod detour;
pub mod error;
pub mod eta;
pub mod events;
pub mod geo_utils;
pub mod guidance;
pub mod map;
pub mod navigator;
pub mod outline;
pub mod reroute;
pub mod segment;
pub mod tracker;

#[cfg(test)]
pub(crate) mod test_support;

pub use backend::{
    BackendMessage, CompletionSender, ComputedRoute, RouteFlags, RouteOutcome, RouteRequest,
    RouteResult, RouteStatus, RoutingBackend,
};
pub use config::NavigationConfig;
pub use detour::RouteSegments;
pub use error::NavError;
pub use eta::{CrossTimeSource, EtaEstimator};
pub use events::{NavEvent, ProgressSnapshot, RouteSummary, StopReason};
pub use guidance::{AnnouncementSchedule, InstructionEntry};
pub use map::{EdgeInfo, EdgeSnap, MapProvider, RoadNetwork, TilePriority};
pub use navigator::{Destination, Fix, Navigator, RouteSession};
pub use outline::Outline;
pub use reroute::{RerouteKind, RouteState, TrackPoint};
pub use segment::{
    EdgeRef, Instrumentation, Instruction, NodeId, Readiness, RoundaboutExit, Segment,
    SegmentContext, SegmentGeometry, SegmentList, TravelDirection,
};
pub use tracker::TrackedLine;

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use route_guidance::GpsPoint;
/// let point = GpsPoint::new(51.5074, -0.1278); // London
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Bounding box of a route, used by hosts to frame the whole trip.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from GPS points.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        Some(geo_utils::compute_bounds(points))
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gps_point_validation() {
        assert!(GpsPoint::new(51.5074, -0.1278).is_valid());
        assert!(!GpsPoint::new(91.0, 0.0).is_valid());
        assert!(!GpsPoint::new(0.0, 181.0).is_valid());
        assert!(!GpsPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_bounds_from_points() {
        assert!(Bounds::from_points(&[]).is_none());

        let bounds = Bounds::from_points(&[
            GpsPoint::new(51.50, -0.13),
            GpsPoint::new(51.52, -0.11),
        ])
        .unwrap();
        let center = bounds.center();
        assert!((center.latitude - 51.51).abs() < 1e-9);
        assert!((center.longitude + 0.12).abs() < 1e-9);
    }
}
