//! # Geographic Utilities
//!
//! Core geographic computations used by route tracking.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two GPS points |
//! | [`polyline_length`] | Total length of a polyline in meters |
//! | [`project_onto_polyline`] | Nearest point on a polyline and the distance along it |
//! | [`remaining_distance`] | Distance from a position to either end of a polyline |
//! | [`compute_bounds`] | Bounding box of a set of points |
//! | [`meters_to_degrees`] | Convert meters to approximate degrees at a latitude |
//!
//! ## Example
//!
//! ```rust
//! use route_guidance::{GpsPoint, geo_utils};
//!
//! let road = vec![
//!     GpsPoint::new(0.0, 0.000),
//!     GpsPoint::new(0.0, 0.001),
//!     GpsPoint::new(0.0, 0.002),
//! ];
//!
//! // A vehicle a quarter of the way along the road
//! let vehicle = GpsPoint::new(0.0, 0.0005);
//! let ahead = geo_utils::remaining_distance(&vehicle, &road, true);
//! let behind = geo_utils::remaining_distance(&vehicle, &road, false);
//! assert!(ahead > behind);
//! ```
//!
//! ## Coordinate System
//!
//! All functions expect WGS84 coordinates (latitude/longitude in degrees).
//! Projection onto a polyline uses a planar approximation scaled by the
//! cosine of the latitude, which is accurate for road-sized pieces.

use geo::{Distance, Haversine, Point};
use crate::{Bounds, GpsPoint};

// =============================================================================
// Distance Functions
// =============================================================================

/// Calculate the great-circle distance between two GPS points using the Haversine formula.
///
/// Returns the distance in meters along the Earth's surface.
///
/// # Example
///
/// ```rust
/// use route_guidance::{GpsPoint, geo_utils};
///
/// let london = GpsPoint::new(51.5074, -0.1278);
/// let paris = GpsPoint::new(48.8566, 2.3522);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_560.0).abs() < 1000.0); // ~344 km
/// ```
#[inline]
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    Haversine::distance(point1, point2)
}

/// Calculate the total length of a polyline in meters.
///
/// Empty or single-point polylines return 0.0.
pub fn polyline_length(points: &[GpsPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Convert meters to approximate degrees at a given latitude.
///
/// Returns a single conservative value suitable for square search areas.
#[inline]
pub fn meters_to_degrees(meters: f64, latitude: f64) -> f64 {
    let lat_rad = latitude.to_radians();
    let meters_per_degree = 111_320.0 * lat_rad.cos().max(0.1);
    meters / meters_per_degree
}

// =============================================================================
// Projection
// =============================================================================

/// Result of projecting a position onto a polyline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolylineProjection {
    /// Nearest point on the polyline.
    pub point: GpsPoint,
    /// Index of the polyline piece holding the nearest point (0-based).
    pub piece_index: usize,
    /// Distance from the position to the nearest point, in meters.
    pub offset_m: f64,
    /// Distance along the polyline from its first point to the nearest point, in meters.
    pub along_m: f64,
    /// Total polyline length in meters.
    pub length_m: f64,
}

/// Project a position onto the nearest piece of a polyline.
///
/// Returns `None` if the polyline has fewer than 2 points.
pub fn project_onto_polyline(position: &GpsPoint, polyline: &[GpsPoint]) -> Option<PolylineProjection> {
    if polyline.len() < 2 {
        return None;
    }

    let mut best: Option<PolylineProjection> = None;
    let mut cumulative = 0.0;

    for (i, piece) in polyline.windows(2).enumerate() {
        let a = &piece[0];
        let b = &piece[1];
        let piece_len = haversine_distance(a, b);

        let projected = project_on_piece(position, a, b);
        let offset = haversine_distance(position, &projected);

        let is_better = match &best {
            Some(prev) => offset < prev.offset_m,
            None => true,
        };

        if is_better {
            best = Some(PolylineProjection {
                point: projected,
                piece_index: i,
                offset_m: offset,
                along_m: cumulative + haversine_distance(a, &projected),
                length_m: 0.0,
            });
        }

        cumulative += piece_len;
    }

    best.map(|mut p| {
        p.length_m = cumulative;
        p
    })
}

/// Distance from the projection of `position` to the end (`toward_end`) or the
/// start of the polyline.
///
/// Degenerate polylines (fewer than 2 points) return the distance to the
/// single point, or 0.0 when empty.
pub fn remaining_distance(position: &GpsPoint, polyline: &[GpsPoint], toward_end: bool) -> f64 {
    match project_onto_polyline(position, polyline) {
        Some(p) if toward_end => (p.length_m - p.along_m).max(0.0),
        Some(p) => p.along_m,
        None => polyline
            .first()
            .map(|only| haversine_distance(position, only))
            .unwrap_or(0.0),
    }
}

/// Project a point onto the piece `a`-`b`, clamped to the piece.
fn project_on_piece(p: &GpsPoint, a: &GpsPoint, b: &GpsPoint) -> GpsPoint {
    let cos_lat = ((a.latitude + b.latitude) / 2.0).to_radians().cos();

    let dx = (b.longitude - a.longitude) * cos_lat;
    let dy = b.latitude - a.latitude;
    let px = (p.longitude - a.longitude) * cos_lat;
    let py = p.latitude - a.latitude;

    let len_sq = dx * dx + dy * dy;
    if len_sq < 1e-20 {
        return *a;
    }

    let t = ((px * dx + py * dy) / len_sq).clamp(0.0, 1.0);

    GpsPoint::new(
        a.latitude + t * (b.latitude - a.latitude),
        a.longitude + t * (b.longitude - a.longitude),
    )
}

// =============================================================================
// Bounding Box
// =============================================================================

/// Compute the bounding box of a set of points.
///
/// For empty input, returns bounds with MIN/MAX values.
pub fn compute_bounds(points: &[GpsPoint]) -> Bounds {
    let mut min_lat = f64::MAX;
    let mut max_lat = f64::MIN;
    let mut min_lng = f64::MAX;
    let mut max_lng = f64::MIN;

    for p in points {
        min_lat = min_lat.min(p.latitude);
        max_lat = max_lat.max(p.latitude);
        min_lng = min_lng.min(p.longitude);
        max_lng = max_lng.max(p.longitude);
    }

    Bounds { min_lat, max_lat, min_lng, max_lng }
}

// =============================================================================
// Unit Tests
// =============================================================================
