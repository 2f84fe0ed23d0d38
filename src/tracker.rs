//! # Progress Tracker
//!
//! Per-fix bookkeeping over the logical segment sequence of a route:
//!
//! | Function | Purpose |
//! |----------|---------|
//! | [`sync_to_line`] | Move the cursor to the segment matching the tracked line |
//! | [`measure_progress`] | Distances and time to the next turn |
//! | [`remaining_after`] | Distance and time from the end of a group to the destination |
//! | [`find_track_segment`] | Locate the vehicle on a freshly installed route |
//! | [`Prefetcher`] | Request map tiles ahead of the vehicle |
//!
//! plus the route queries used by hosts ([`line_in_route`],
//! [`is_line_on_route`], [`next_line`], [`waypoint_at`]).
//!
//! Nothing here fails: an unmatched line is reported as [`SyncOutcome::NoMatch`]
//! and handled by the reroute controller.

use crate::detour::RouteSegments;
use crate::map::{MapProvider, TilePriority};
use crate::segment::{EdgeRef, NodeId, TravelDirection};
use crate::GpsPoint;

/// The road line the positioning system places the vehicle on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackedLine {
    pub edge: EdgeRef,
    pub direction: TravelDirection,
}

impl TrackedLine {
    pub fn new(edge: EdgeRef, direction: TravelDirection) -> Self {
        Self { edge, direction }
    }
}

// =============================================================================
// Cursor synchronisation
// =============================================================================

/// Result of matching a tracked line against the upcoming segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Still on the current segment.
    OnCurrent,
    /// Moved forward to `index`; `new_group` when an instruction boundary was crossed.
    Advanced { index: usize, new_group: bool },
    /// The next segment is not instrumented yet, so no decision can be made.
    AwaitingInstrumentation,
    /// No upcoming instrumented segment matches.
    NoMatch,
}

/// Match `line` against the segments after `current`, looking at no more than
/// `lookahead` instrumented segments.
pub fn sync_to_line(
    route: &RouteSegments,
    current: usize,
    line: &TrackedLine,
    lookahead: usize,
) -> SyncOutcome {
    let Some(current_seg) = route.try_get(current) else {
        return SyncOutcome::NoMatch;
    };
    if current_seg.matches(line.edge, line.direction) {
        return SyncOutcome::OnCurrent;
    }

    let mut checked = 0;
    for index in current + 1..route.len() {
        if checked >= lookahead {
            break;
        }
        let candidate = route.get(index);
        if !candidate.is_instrumented() {
            if index == current + 1 {
                return SyncOutcome::AwaitingInstrumentation;
            }
            break;
        }
        if candidate.matches(line.edge, line.direction) {
            return SyncOutcome::Advanced {
                index,
                new_group: candidate.group_id != current_seg.group_id,
            };
        }
        checked += 1;
    }
    SyncOutcome::NoMatch
}

/// Index of the first segment matching `edge` (and `direction`, if known).
///
/// Used after installing a route to place the cursor where the vehicle is.
pub fn find_track_segment(
    route: &RouteSegments,
    edge: EdgeRef,
    direction: Option<TravelDirection>,
) -> Option<usize> {
    route
        .iter()
        .position(|s| s.edge == edge && direction.map_or(true, |d| s.direction == d))
}

/// Last index of the instruction group containing `index`.
pub fn group_end(route: &RouteSegments, index: usize) -> usize {
    let group = route.get(index).group_id;
    let mut end = index;
    while end + 1 < route.len() && route.get(end + 1).group_id == group {
        end += 1;
    }
    end
}

// =============================================================================
// Distances
// =============================================================================

/// Distances around the cursor, in meters, and time to the next turn in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Progress {
    /// Remaining distance on the current segment.
    pub distance_to_next: f64,
    /// Distance already covered within the current group.
    pub distance_to_prev: f64,
    /// Remaining distance to the end of the current group.
    pub distance_to_turn: f64,
    pub eta_to_turn: f64,
    /// Length of the group after the current one.
    pub next_group_distance: f64,
    /// Last index of the current group.
    pub group_end: usize,
}

/// Measure progress of a vehicle at `position` on segment `current`.
///
/// Uninstrumented segments have no usable geometry, so their whole length
/// counts as remaining.
pub fn measure_progress(route: &RouteSegments, current: usize, position: &GpsPoint) -> Progress {
    let segment = route.get(current);
    let distance_to_next = segment
        .distance_to_end(position)
        .unwrap_or(segment.distance)
        .min(segment.distance.max(0.0));
    let group_end = group_end(route, current);

    let mut distance_to_prev = (segment.distance - distance_to_next).max(0.0);
    let mut back = current;
    while back > 0 && route.get(back - 1).group_id == segment.group_id {
        back -= 1;
        distance_to_prev += route.get(back).distance;
    }

    let distance_to_turn = distance_to_next
        + (current + 1..=group_end)
            .map(|i| route.get(i).distance)
            .sum::<f64>();

    let next_group_distance = if group_end + 1 < route.len() {
        let next_end = self::group_end(route, group_end + 1);
        (group_end + 1..=next_end).map(|i| route.get(i).distance).sum()
    } else {
        0.0
    };

    Progress {
        distance_to_next,
        distance_to_prev,
        distance_to_turn,
        eta_to_turn: eta_to_turn(route, current, group_end, distance_to_next),
        next_group_distance,
        group_end,
    }
}

/// Time to the end of the group, with the current segment's cross-time
/// pro-rated by its remaining fraction.
pub fn eta_to_turn(route: &RouteSegments, current: usize, group_end: usize, distance_to_next: f64) -> f64 {
    let segment = route.get(current);
    let partial = segment.cross_time * distance_to_next / (segment.distance + 1.0);
    partial
        + (current + 1..=group_end)
            .map(|i| route.get(i).cross_time)
            .sum::<f64>()
}

/// Distance and time of every segment after `group_end`.
pub fn remaining_after(route: &RouteSegments, group_end: usize) -> (f64, f64) {
    route
        .iter()
        .skip(group_end + 1)
        .fold((0.0, 0.0), |(d, t), s| (d + s.distance, t + s.cross_time))
}

// =============================================================================
// Prefetch
// =============================================================================

/// Requests map tiles for the segments ahead of the vehicle, each segment once.
///
/// Base and detour segments are tracked separately so installing a detour
/// keeps what was already requested for the reused tail.
#[derive(Debug, Clone, Default)]
pub struct Prefetcher {
    base_cursor: usize,
    detour_cursor: usize,
    last_tile: Option<u32>,
}

impl Prefetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything; used when the base route is replaced.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Forget the detour part; used when a detour is installed.
    pub fn reset_detour(&mut self) {
        self.detour_cursor = 0;
        self.last_tile = None;
    }

    /// Logical index of the first segment not yet requested.
    pub fn current_request_segment(&self, route: &RouteSegments) -> usize {
        if self.detour_cursor < route.detour_size() {
            self.detour_cursor
        } else {
            route.detour_size() + self.base_cursor.saturating_sub(route.detour_end())
        }
    }

    /// Request tiles for segments starting within `max_distance` of the
    /// vehicle. Returns the number of tile requests issued.
    pub fn advance<M: MapProvider + ?Sized>(
        &mut self,
        route: &RouteSegments,
        current: usize,
        distance_to_next: f64,
        max_distance: f64,
        map: &M,
    ) -> usize {
        let mut ahead = distance_to_next;
        let mut requested = 0;

        for index in current + 1..route.len() {
            if ahead > max_distance {
                break;
            }
            let segment = route.get(index);
            let fresh = match route.base_index(index) {
                None if index >= self.detour_cursor => {
                    self.detour_cursor = index + 1;
                    true
                }
                Some(base) if base >= self.base_cursor => {
                    self.base_cursor = base + 1;
                    true
                }
                _ => false,
            };
            if fresh && self.last_tile != Some(segment.edge.tile) {
                map.request_tile(segment.edge.tile, TilePriority::Prefetch);
                self.last_tile = Some(segment.edge.tile);
                requested += 1;
            }
            ahead += segment.distance;
        }
        requested
    }
}

// =============================================================================
// Route queries
// =============================================================================

/// Index of the first segment at or after `from` traversing `edge` in `direction`.
pub fn line_in_route(
    route: &RouteSegments,
    from: usize,
    edge: EdgeRef,
    direction: TravelDirection,
) -> Option<usize> {
    (from..route.len()).find(|&i| route.get(i).matches(edge, direction))
}

/// Whether `edge` is traversed at or after `from`.
///
/// With `nodes`, the traversal must also run from the first node to the second.
pub fn is_line_on_route<M: MapProvider + ?Sized>(
    route: &RouteSegments,
    from: usize,
    edge: EdgeRef,
    nodes: Option<(NodeId, NodeId)>,
    map: &M,
) -> bool {
    (from..route.len()).any(|i| {
        let segment = route.get(i);
        if segment.edge != edge {
            return false;
        }
        let Some((start, end)) = nodes else {
            return true;
        };
        map.edge_info(edge).is_some_and(|info| match segment.direction {
            TravelDirection::WithLine => info.from_node == start && info.to_node == end,
            TravelDirection::AgainstLine => info.to_node == start && info.from_node == end,
        })
    })
}

/// Edge of the segment after `current`.
pub fn next_line(route: &RouteSegments, current: usize) -> Option<EdgeRef> {
    route.try_get(current + 1).map(|s| s.edge)
}

/// End position of the segment lying `distance` meters ahead of the vehicle.
///
/// Past the end of the route, the end of the last segment is returned.
/// Uninstrumented segments have no known end position.
pub fn waypoint_at(
    route: &RouteSegments,
    current: usize,
    distance_to_next: f64,
    distance: f64,
) -> Option<GpsPoint> {
    let mut ahead = distance_to_next;
    let mut index = current;
    while ahead < distance && index + 1 < route.len() {
        index += 1;
        ahead += route.get(index).distance;
    }
    route.try_get(index)?.end_position()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::RoadNetwork;
    use crate::segment::{Instruction, Segment, SegmentList};
    use crate::test_support::{edge, fix_position, straight_road, straight_segments};

    fn route(groups: &[u32]) -> (RoadNetwork, RouteSegments) {
        let net = straight_road(groups.len() as u32);
        let segments = straight_segments(&net, groups);
        (net, RouteSegments::new(SegmentList::new(segments).unwrap()))
    }

    fn line(i: u32) -> TrackedLine {
        TrackedLine::new(edge(i), TravelDirection::WithLine)
    }

    #[test]
    fn test_sync_within_group() {
        let (_, route) = route(&[1, 1, 1, 1, 1]);
        assert_eq!(sync_to_line(&route, 2, &line(2), 10), SyncOutcome::OnCurrent);
        assert_eq!(
            sync_to_line(&route, 2, &line(3), 10),
            SyncOutcome::Advanced { index: 3, new_group: false }
        );
    }

    #[test]
    fn test_sync_across_group_boundary() {
        let (_, route) = route(&[1, 1, 2, 2, 2]);
        assert_eq!(
            sync_to_line(&route, 1, &line(2), 10),
            SyncOutcome::Advanced { index: 2, new_group: true }
        );
    }

    #[test]
    fn test_sync_respects_lookahead_and_direction() {
        let (_, route) = route(&[1, 1, 1, 1, 1, 1, 1]);
        assert_eq!(sync_to_line(&route, 0, &line(6), 3), SyncOutcome::NoMatch);
        assert!(matches!(sync_to_line(&route, 0, &line(6), 6), SyncOutcome::Advanced { index: 6, .. }));

        assert!(matches!(sync_to_line(&route, 0, &line(3), 3), SyncOutcome::Advanced { index: 3, .. }));
        // A zero lookahead checks no candidates at all
        assert_eq!(sync_to_line(&route, 0, &line(1), 0), SyncOutcome::NoMatch);
        assert_eq!(sync_to_line(&route, 0, &line(0), 0), SyncOutcome::OnCurrent);

        let reversed = TrackedLine::new(edge(1), TravelDirection::AgainstLine);
        assert_eq!(sync_to_line(&route, 0, &reversed, 10), SyncOutcome::NoMatch);
    }

    #[test]
    fn test_sync_waits_for_instrumentation() {
        let net = straight_road(4);
        let mut segments = straight_segments(&net, &[1, 1, 1, 1]);
        segments[1] = Segment::new(edge(1), TravelDirection::WithLine, 1, Instruction::Continue)
            .with_metrics(111.0, 10.0);
        let route = RouteSegments::new(SegmentList::new(segments).unwrap());

        assert_eq!(sync_to_line(&route, 0, &line(9), 10), SyncOutcome::AwaitingInstrumentation);
        // Further ahead an uninstrumented segment ends the search instead
        assert_eq!(sync_to_line(&route, 2, &line(9), 10), SyncOutcome::NoMatch);
    }

    #[test]
    fn test_progress_within_group() {
        let (_, route) = route(&[1, 1, 1, 2, 2]);
        let seg_len = route.get(0).distance;

        let progress = measure_progress(&route, 1, &fix_position(1, 0.25));
        assert_eq!(progress.group_end, 2);
        assert!((progress.distance_to_next - 0.75 * seg_len).abs() < 1.0);
        assert!((progress.distance_to_prev - 1.25 * seg_len).abs() < 1.0);
        assert!((progress.distance_to_turn - 1.75 * seg_len).abs() < 1.0);
        assert!((progress.next_group_distance - 2.0 * seg_len).abs() < 1e-6);

        let cross = route.get(1).cross_time;
        let expected_eta = cross * progress.distance_to_next / (seg_len + 1.0) + cross;
        assert!((progress.eta_to_turn - expected_eta).abs() < 1e-9);
    }

    #[test]
    fn test_progress_on_uninstrumented_segment_uses_full_length() {
        let segments = vec![
            Segment::new(edge(0), TravelDirection::WithLine, 1, Instruction::ApproachingDestination)
                .with_metrics(250.0, 20.0),
        ];
        let route = RouteSegments::new(SegmentList::new(segments).unwrap());
        let progress = measure_progress(&route, 0, &GpsPoint::new(0.0, 0.0));
        assert_eq!(progress.distance_to_next, 250.0);
        assert_eq!(progress.next_group_distance, 0.0);
    }

    #[test]
    fn test_remaining_after_group() {
        let (_, route) = route(&[1, 2, 2, 3]);
        let (distance, time) = remaining_after(&route, 2);
        assert_eq!(distance, route.get(3).distance);
        assert_eq!(time, route.get(3).cross_time);
        assert_eq!(remaining_after(&route, 3), (0.0, 0.0));
    }

    #[test]
    fn test_prefetch_requests_each_segment_once() {
        let (net, route) = route(&[1, 1, 1, 1, 1, 1]);
        let seg_len = route.get(0).distance;
        let mut prefetch = Prefetcher::new();

        // Covers segments 1 and 2 only
        let issued = prefetch.advance(&route, 0, seg_len, 2.5 * seg_len, &net);
        assert_eq!(issued, 2);
        assert_eq!(prefetch.current_request_segment(&route), 3);

        let again = prefetch.advance(&route, 0, seg_len, 2.5 * seg_len, &net);
        assert_eq!(again, 0);

        prefetch.advance(&route, 2, seg_len, 100_000.0, &net);
        assert_eq!(prefetch.current_request_segment(&route), 6);
        let tiles: Vec<u32> = net.take_tile_requests().into_iter().map(|(t, _)| t).collect();
        assert_eq!(tiles, vec![101, 102, 103, 104, 105]);
    }

    #[test]
    fn test_prefetch_keeps_base_state_across_detour() {
        let (net, mut route) = route(&[1, 1, 1, 1, 1, 1]);
        let mut prefetch = Prefetcher::new();
        prefetch.advance(&route, 0, 0.0, 100_000.0, &net);
        net.take_tile_requests();

        let detour = Segment::new(EdgeRef::new(900, 0), TravelDirection::WithLine, 9, Instruction::TurnLeft)
            .with_metrics(50.0, 5.0);
        route.install_detour(vec![detour.clone(), detour], 3, 16).unwrap();
        prefetch.reset_detour();

        prefetch.advance(&route, 0, 0.0, 100_000.0, &net);
        // Only the second detour segment is new; the reused tail was requested before
        assert_eq!(net.take_tile_requests(), vec![(900, TilePriority::Prefetch)]);
    }

    #[test]
    fn test_route_queries() {
        let (net, route) = route(&[1, 1, 2, 2]);
        assert_eq!(line_in_route(&route, 0, edge(2), TravelDirection::WithLine), Some(2));
        assert_eq!(line_in_route(&route, 3, edge(2), TravelDirection::WithLine), None);
        assert_eq!(next_line(&route, 1), Some(edge(2)));
        assert_eq!(next_line(&route, 3), None);

        assert!(is_line_on_route(&route, 0, edge(3), None, &net));
        assert!(is_line_on_route(&route, 0, edge(3), Some((NodeId(3), NodeId(4))), &net));
        assert!(!is_line_on_route(&route, 0, edge(3), Some((NodeId(4), NodeId(3))), &net));
        assert!(!is_line_on_route(&route, 0, EdgeRef::new(7, 7), None, &net));
    }

    #[test]
    fn test_waypoint_at_distance() {
        let (_, route) = route(&[1, 1, 1, 1]);
        let seg_len = route.get(0).distance;
        let wp = waypoint_at(&route, 0, seg_len, 1.5 * seg_len).unwrap();
        assert_eq!(Some(wp), route.get(1).end_position());

        let past_end = waypoint_at(&route, 0, seg_len, 1e9).unwrap();
        assert_eq!(Some(past_end), route.get(3).end_position());
    }

    #[test]
    fn test_find_track_segment() {
        let (_, route) = route(&[1, 1, 1]);
        assert_eq!(find_track_segment(&route, edge(2), Some(TravelDirection::WithLine)), Some(2));
        assert_eq!(find_track_segment(&route, edge(2), Some(TravelDirection::AgainstLine)), None);
        assert_eq!(find_track_segment(&route, edge(1), None), Some(1));
    }
}
