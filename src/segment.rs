//! # Segment Model
//!
//! A computed route is an ordered array of [`Segment`]s, one per directed
//! traversal of a road-network edge. Consecutive segments that share a
//! `group_id` form one driving instruction (a roundabout's internal edges,
//! or back-to-back edges that need no new instruction).
//!
//! Segments near the vehicle are instrumented first; far segments may arrive
//! with [`Readiness::Pending`] geometry and be filled in later. Once a segment
//! is instrumented it stays instrumented for the rest of the session.

use crate::error::NavError;
use crate::geo_utils;
use crate::GpsPoint;

// =============================================================================
// Identity
// =============================================================================

/// Reference to a road-network edge: the tile holding it and its local id.
///
/// Only meaningful while that tile is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EdgeRef {
    pub tile: u32,
    pub line: u32,
}

impl EdgeRef {
    pub fn new(tile: u32, line: u32) -> Self {
        Self { tile, line }
    }
}

/// A road-network node (edge endpoint).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(pub u32);

/// Traversal direction relative to the edge's stored direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TravelDirection {
    WithLine,
    AgainstLine,
}

impl TravelDirection {
    pub fn reversed(self) -> Self {
        match self {
            TravelDirection::WithLine => TravelDirection::AgainstLine,
            TravelDirection::AgainstLine => TravelDirection::WithLine,
        }
    }
}

// =============================================================================
// Instructions
// =============================================================================

/// Driving instruction attached to the last segment of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Instruction {
    TurnLeft,
    TurnRight,
    KeepLeft,
    KeepRight,
    Continue,
    RoundaboutEnter,
    RoundaboutExit,
    RoundaboutStraight,
    RoundaboutLeft,
    RoundaboutRight,
    RoundaboutU,
    ApproachingDestination,
}

impl Instruction {
    pub fn is_roundabout(self) -> bool {
        matches!(
            self,
            Instruction::RoundaboutEnter
                | Instruction::RoundaboutExit
                | Instruction::RoundaboutStraight
                | Instruction::RoundaboutLeft
                | Instruction::RoundaboutRight
                | Instruction::RoundaboutU
        )
    }

    /// Whether a roundabout exit number accompanies this instruction.
    pub fn carries_exit(self) -> bool {
        matches!(self, Instruction::RoundaboutEnter | Instruction::RoundaboutExit)
    }

    /// Whether the instruction gets distance announcements.
    ///
    /// Approaching the destination is announced by the arrival event instead.
    pub fn is_announced(self) -> bool {
        self != Instruction::ApproachingDestination
    }
}

/// Which roundabout exit to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RoundaboutExit {
    /// 1-based exit count.
    Number(u8),
    /// The exit is marked on the map rather than counted.
    Marked,
}

/// Segment context, used to skip roundabout internals in street lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentContext {
    #[default]
    Normal,
    Roundabout,
}

// =============================================================================
// Lazy data
// =============================================================================

/// A value that may not have been produced yet.
#[derive(Debug, Clone, PartialEq)]
pub enum Readiness<T> {
    Pending,
    Ready(T),
}

impl<T> Readiness<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready(_))
    }

    pub fn as_ready(&self) -> Option<&T> {
        match self {
            Readiness::Ready(value) => Some(value),
            Readiness::Pending => None,
        }
    }

    pub fn into_ready(self) -> Option<T> {
        match self {
            Readiness::Ready(value) => Some(value),
            Readiness::Pending => None,
        }
    }
}

/// Fine-grained segment geometry, final once instrumented.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentGeometry {
    /// Position of the edge's first node.
    pub from_pos: GpsPoint,
    /// Position of the edge's last node.
    pub to_pos: GpsPoint,
    /// First/last shape-point index of the edge in its tile, if it has any.
    pub shape_range: Option<(u32, u32)>,
    /// Full polyline in stored edge direction, endpoints included.
    pub points: Vec<GpsPoint>,
}

impl SegmentGeometry {
    /// Geometry of a straight edge with no shape points.
    pub fn straight(from_pos: GpsPoint, to_pos: GpsPoint) -> Self {
        Self {
            from_pos,
            to_pos,
            shape_range: None,
            points: vec![from_pos, to_pos],
        }
    }

    pub fn from_polyline(points: Vec<GpsPoint>, shape_range: Option<(u32, u32)>) -> Option<Self> {
        let from_pos = *points.first()?;
        let to_pos = *points.last()?;
        Some(Self {
            from_pos,
            to_pos,
            shape_range,
            points,
        })
    }

    pub fn length(&self) -> f64 {
        geo_utils::polyline_length(&self.points)
    }
}

/// Late-arriving geometry and timing for a segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Instrumentation {
    pub geometry: SegmentGeometry,
    pub distance: f64,
    pub cross_time: f64,
}

// =============================================================================
// Segment
// =============================================================================

/// One directed traversal of a road-network edge within a route.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub edge: EdgeRef,
    pub direction: TravelDirection,
    pub group_id: u32,
    pub instruction: Instruction,
    pub exit: Option<RoundaboutExit>,
    pub context: SegmentContext,
    /// Traversal distance in meters (an estimate until instrumented).
    pub distance: f64,
    /// Estimated traversal time in seconds.
    pub cross_time: f64,
    geometry: Readiness<SegmentGeometry>,
}

impl Segment {
    /// Create an uninstrumented segment with zero distance and time.
    pub fn new(edge: EdgeRef, direction: TravelDirection, group_id: u32, instruction: Instruction) -> Self {
        Self {
            edge,
            direction,
            group_id,
            instruction,
            exit: None,
            context: SegmentContext::Normal,
            distance: 0.0,
            cross_time: 0.0,
            geometry: Readiness::Pending,
        }
    }

    pub fn with_metrics(mut self, distance: f64, cross_time: f64) -> Self {
        self.distance = distance;
        self.cross_time = cross_time;
        self
    }

    pub fn with_geometry(mut self, geometry: SegmentGeometry) -> Self {
        self.geometry = Readiness::Ready(geometry);
        self
    }

    pub fn with_exit(mut self, exit: RoundaboutExit) -> Self {
        self.exit = Some(exit);
        self
    }

    pub fn with_context(mut self, context: SegmentContext) -> Self {
        self.context = context;
        self
    }

    pub fn is_instrumented(&self) -> bool {
        self.geometry.is_ready()
    }

    pub fn geometry(&self) -> &Readiness<SegmentGeometry> {
        &self.geometry
    }

    /// Apply late instrumentation.
    ///
    /// Geometry is only ever set once; timing may be refreshed by later updates.
    /// Returns true if the segment became instrumented.
    pub fn instrument(&mut self, update: Instrumentation) -> bool {
        self.distance = update.distance;
        self.cross_time = update.cross_time;
        if self.geometry.is_ready() {
            return false;
        }
        self.geometry = Readiness::Ready(update.geometry);
        true
    }

    /// Position of the node where this traversal starts.
    pub fn start_position(&self) -> Option<GpsPoint> {
        let geometry = self.geometry.as_ready()?;
        Some(match self.direction {
            TravelDirection::WithLine => geometry.from_pos,
            TravelDirection::AgainstLine => geometry.to_pos,
        })
    }

    /// Position of the node where this traversal ends.
    pub fn end_position(&self) -> Option<GpsPoint> {
        let geometry = self.geometry.as_ready()?;
        Some(match self.direction {
            TravelDirection::WithLine => geometry.to_pos,
            TravelDirection::AgainstLine => geometry.from_pos,
        })
    }

    /// Distance from `position` to the end of this traversal, measured along
    /// the geometry. `None` until instrumented.
    pub fn distance_to_end(&self, position: &GpsPoint) -> Option<f64> {
        let geometry = self.geometry.as_ready()?;
        let toward_end = self.direction == TravelDirection::WithLine;
        Some(geo_utils::remaining_distance(position, &geometry.points, toward_end))
    }

    pub fn matches(&self, edge: EdgeRef, direction: TravelDirection) -> bool {
        self.edge == edge && self.direction == direction
    }
}

// =============================================================================
// Segment List
// =============================================================================

/// The segment array of one computed route.
///
/// Read-only apart from lazy instrumentation and cross-time refreshes; a new
/// route is always a new list.
#[derive(Debug, Clone, Default)]
pub struct SegmentList {
    segments: Vec<Segment>,
    num_instrumented: usize,
}

impl SegmentList {
    /// Take ownership of a backend-produced segment array.
    ///
    /// Storage is reserved fallibly so exhaustion surfaces as
    /// [`NavError::Allocation`] instead of aborting.
    pub fn new(segments: Vec<Segment>) -> Result<Self, NavError> {
        let mut owned = Vec::new();
        owned
            .try_reserve_exact(segments.len())
            .map_err(|_| NavError::Allocation { count: segments.len() })?;
        owned.extend(segments);

        let num_instrumented = owned.iter().filter(|s| s.is_instrumented()).count();
        Ok(Self {
            segments: owned,
            num_instrumented,
        })
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segment at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len()`; callers keep cursors within the route.
    pub fn get(&self, index: usize) -> &Segment {
        debug_assert!(index < self.segments.len(), "segment {} of {}", index, self.segments.len());
        &self.segments[index]
    }

    pub fn try_get(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [Segment] {
        &mut self.segments
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.segments.iter()
    }

    pub fn num_instrumented(&self) -> usize {
        self.num_instrumented
    }

    pub fn all_instrumented(&self) -> bool {
        self.num_instrumented == self.segments.len()
    }

    /// Apply late instrumentation to segment `index`. Out-of-range updates are ignored.
    pub fn instrument(&mut self, index: usize, update: Instrumentation) -> bool {
        let Some(segment) = self.segments.get_mut(index) else {
            return false;
        };
        let newly = segment.instrument(update);
        if newly {
            self.num_instrumented += 1;
        }
        newly
    }

    /// Replace the cross-time of segment `index`. Out-of-range updates are ignored.
    pub fn set_cross_time(&mut self, index: usize, cross_time: f64) {
        if let Some(segment) = self.segments.get_mut(index) {
            segment.cross_time = cross_time;
        }
    }

    pub fn total_distance(&self) -> f64 {
        self.segments.iter().map(|s| s.distance).sum()
    }

    pub fn total_cross_time(&self) -> f64 {
        self.segments.iter().map(|s| s.cross_time).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn geometry() -> SegmentGeometry {
        SegmentGeometry::straight(GpsPoint::new(0.0, 0.0), GpsPoint::new(0.0, 0.001))
    }

    fn instrumentation() -> Instrumentation {
        Instrumentation {
            geometry: geometry(),
            distance: 111.0,
            cross_time: 10.0,
        }
    }

    fn pending(line: u32) -> Segment {
        Segment::new(EdgeRef::new(1, line), TravelDirection::WithLine, 1, Instruction::Continue)
    }

    #[test]
    fn test_distance_to_end_respects_direction() {
        let with = pending(0).with_geometry(geometry());
        let mut against = with.clone();
        against.direction = TravelDirection::AgainstLine;

        let near_start = GpsPoint::new(0.0, 0.0001);
        let ahead = with.distance_to_end(&near_start).unwrap();
        let back = against.distance_to_end(&near_start).unwrap();
        assert!(ahead > 90.0 && ahead < 111.0, "got {ahead}");
        assert!(back < 20.0, "got {back}");
    }

    #[test]
    fn test_uninstrumented_has_no_distance_to_end() {
        assert!(pending(0).distance_to_end(&GpsPoint::new(0.0, 0.0)).is_none());
        assert!(pending(0).end_position().is_none());
    }

    #[test]
    fn test_end_position_against_line() {
        let mut seg = pending(0).with_geometry(geometry());
        seg.direction = TravelDirection::AgainstLine;
        assert_eq!(seg.end_position(), Some(GpsPoint::new(0.0, 0.0)));
        assert_eq!(seg.start_position(), Some(GpsPoint::new(0.0, 0.001)));
    }

    #[test]
    fn test_instrument_counts_once() {
        let mut list = SegmentList::new(vec![pending(0), pending(1)]).unwrap();
        assert_eq!(list.num_instrumented(), 0);

        assert!(list.instrument(1, instrumentation()));
        assert!(!list.instrument(1, instrumentation()));
        assert!(!list.instrument(5, instrumentation()));
        assert_eq!(list.num_instrumented(), 1);
        assert!(!list.all_instrumented());

        assert!(list.instrument(0, instrumentation()));
        assert!(list.all_instrumented());
        assert_eq!(list.total_distance(), 222.0);
    }

    #[test]
    fn test_instrument_refreshes_timing_only() {
        let mut seg = pending(0).with_geometry(geometry());
        let mut update = instrumentation();
        update.geometry = SegmentGeometry::straight(GpsPoint::new(1.0, 1.0), GpsPoint::new(1.0, 1.1));
        update.cross_time = 42.0;

        assert!(!seg.instrument(update));
        assert_eq!(seg.cross_time, 42.0);
        assert_eq!(seg.geometry().as_ready().unwrap().from_pos, GpsPoint::new(0.0, 0.0));
    }

    #[test]
    fn test_instruction_classes() {
        assert!(Instruction::RoundaboutEnter.carries_exit());
        assert!(!Instruction::RoundaboutStraight.carries_exit());
        assert!(Instruction::RoundaboutU.is_roundabout());
        assert!(!Instruction::KeepLeft.is_roundabout());
        assert!(!Instruction::ApproachingDestination.is_announced());
    }

    proptest! {
        #[test]
        fn test_instrumentation_is_monotonic(ops in proptest::collection::vec(0usize..8, 0..40)) {
            let mut list = SegmentList::new((0..8).map(pending).collect()).unwrap();
            let mut seen = [false; 8];

            for index in ops {
                list.instrument(index, instrumentation());
                seen[index] = true;
                for (i, was_seen) in seen.iter().enumerate() {
                    prop_assert_eq!(list.get(i).is_instrumented(), *was_seen);
                }
            }
            prop_assert_eq!(list.num_instrumented(), seen.iter().filter(|s| **s).count());
        }
    }
}
