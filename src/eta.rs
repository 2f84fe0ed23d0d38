//! # ETA Estimator
//!
//! Keeps time-to-turn and time-to-destination for the active route, and
//! periodically re-estimates segment cross-times to follow traffic.
//!
//! Changes caused by a refresh are accumulated in a signed counter. A
//! notification is only surfaced once the accumulated change exceeds the
//! threshold, then the counter restarts from zero. The first refresh after a
//! route is installed only sets the baseline.
//!
//! With the `parallel` feature, cross-times are computed with rayon.

use std::time::{Duration, Instant};

use crate::detour::RouteSegments;
use crate::segment::Segment;
use crate::tracker;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Source of current traversal-time estimates.
pub trait CrossTimeSource: Send + Sync {
    /// Estimated traversal time of `segment` in seconds, or `None` to keep the
    /// current value.
    fn cross_time(&self, segment: &Segment) -> Option<f64>;
}

/// Recompute cross-times of segments `from..` with `source`.
pub fn update_cross_times<S: CrossTimeSource + ?Sized>(
    route: &mut RouteSegments,
    from: usize,
    source: &S,
) {
    let len = route.len();
    if from >= len {
        return;
    }

    #[cfg(feature = "parallel")]
    let estimates: Vec<Option<f64>> = {
        let view = &*route;
        (from..len)
            .into_par_iter()
            .map(|i| source.cross_time(view.get(i)))
            .collect()
    };

    #[cfg(not(feature = "parallel"))]
    let estimates: Vec<Option<f64>> = (from..len).map(|i| source.cross_time(route.get(i))).collect();

    for (offset, estimate) in estimates.into_iter().enumerate() {
        if let Some(cross_time) = estimate {
            route.get_mut(from + offset).cross_time = cross_time;
        }
    }
}

/// Time from the vehicle to the destination.
fn destination_eta(route: &RouteSegments, current: usize, distance_to_next: f64) -> (f64, f64) {
    let group_end = tracker::group_end(route, current);
    let to_turn = tracker::eta_to_turn(route, current, group_end, distance_to_next);
    let (_, after) = tracker::remaining_after(route, group_end);
    (to_turn, to_turn + after)
}

#[derive(Debug, Clone, Default)]
pub struct EtaEstimator {
    eta_to_turn: f64,
    eta_to_destination: f64,
    diff: f64,
    baselined: bool,
    last_refresh: Option<Instant>,
}

impl EtaEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seconds to the end of the current instruction group.
    pub fn eta_to_turn(&self) -> f64 {
        self.eta_to_turn
    }

    /// Seconds to the destination.
    pub fn eta_to_destination(&self) -> f64 {
        self.eta_to_destination
    }

    /// Change accumulated since the last notification, in seconds.
    pub fn pending_change(&self) -> f64 {
        self.diff
    }

    pub fn is_baselined(&self) -> bool {
        self.baselined
    }

    /// Store the per-fix values computed by the tracker.
    pub fn set_progress(&mut self, eta_to_turn: f64, eta_to_destination: f64) {
        self.eta_to_turn = eta_to_turn;
        self.eta_to_destination = eta_to_destination;
    }

    pub fn is_refresh_due(&self, now: Instant, interval: Duration) -> bool {
        match self.last_refresh {
            Some(last) => now.saturating_duration_since(last) >= interval,
            None => true,
        }
    }

    /// Take the current route timing as the new baseline, without notifying.
    pub fn rebaseline(&mut self, route: &RouteSegments, current: usize, distance_to_next: f64, now: Instant) {
        let (to_turn, to_destination) = destination_eta(route, current, distance_to_next);
        self.set_progress(to_turn, to_destination);
        self.diff = 0.0;
        self.baselined = true;
        self.last_refresh = Some(now);
    }

    /// Re-estimate cross-times of the unvisited segments and update the ETA.
    ///
    /// Skipped until every segment is instrumented; a skipped attempt still
    /// waits out the refresh interval. Returns the accumulated
    /// change in seconds when it exceeds `threshold`.
    pub fn refresh<S: CrossTimeSource + ?Sized>(
        &mut self,
        route: &mut RouteSegments,
        current: usize,
        distance_to_next: f64,
        source: &S,
        threshold: f64,
        now: Instant,
    ) -> Option<f64> {
        if !route.all_instrumented() {
            self.last_refresh = Some(now);
            return None;
        }

        let (_, before) = destination_eta(route, current, distance_to_next);
        update_cross_times(route, current, source);
        let (to_turn, after) = destination_eta(route, current, distance_to_next);
        self.set_progress(to_turn, after);
        self.last_refresh = Some(now);

        if !self.baselined {
            self.baselined = true;
            self.diff = 0.0;
            return None;
        }

        self.diff += after - before;
        if self.diff.abs() > threshold {
            let change = self.diff;
            self.diff = 0.0;
            log::debug!("ETA changed by {:.0}s", change);
            return Some(change);
        }
        None
    }

    /// Forget the baseline; the next refresh sets a new one.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentList;
    use crate::test_support::{straight_road, straight_segments};

    struct Scaled(f64);

    impl CrossTimeSource for Scaled {
        fn cross_time(&self, segment: &Segment) -> Option<f64> {
            Some(segment.distance / 10.0 * self.0)
        }
    }

    fn route(count: usize) -> RouteSegments {
        let net = straight_road(count as u32);
        let groups: Vec<u32> = (0..count as u32).map(|i| i / 2).collect();
        RouteSegments::new(SegmentList::new(straight_segments(&net, &groups)).unwrap())
    }

    #[test]
    fn test_first_refresh_never_notifies() {
        let mut route = route(6);
        let mut eta = EtaEstimator::new();
        let now = Instant::now();

        // A tenfold slowdown would be far above the threshold
        assert_eq!(eta.refresh(&mut route, 0, 100.0, &Scaled(10.0), 180.0, now), None);
        assert!(eta.is_baselined());
        assert_eq!(eta.pending_change(), 0.0);
        assert!(eta.eta_to_destination() > 0.0);
    }

    #[test]
    fn test_change_accumulates_until_threshold() {
        let mut route = route(6);
        let mut eta = EtaEstimator::new();
        let now = Instant::now();
        eta.refresh(&mut route, 0, 100.0, &Scaled(1.0), 180.0, now);

        // Roughly +33s of added time stays below the threshold
        assert_eq!(eta.refresh(&mut route, 0, 100.0, &Scaled(1.5), 180.0, now), None);
        let pending = eta.pending_change();
        assert!(pending > 0.0 && pending < 180.0, "pending {pending}");

        let change = eta.refresh(&mut route, 0, 100.0, &Scaled(6.0), 180.0, now).unwrap();
        assert!(change > 180.0);
        assert_eq!(eta.pending_change(), 0.0);
    }

    #[test]
    fn test_refresh_skipped_until_instrumented() {
        let mut route = RouteSegments::new(
            SegmentList::new(vec![Segment::new(
                crate::test_support::edge(0),
                crate::segment::TravelDirection::WithLine,
                1,
                crate::segment::Instruction::Continue,
            )])
            .unwrap(),
        );
        let mut eta = EtaEstimator::new();
        let now = Instant::now();
        assert_eq!(eta.refresh(&mut route, 0, 0.0, &Scaled(1.0), 180.0, now), None);
        assert!(!eta.is_baselined());
        // The skipped attempt still counts against the refresh interval
        assert!(!eta.is_refresh_due(now + Duration::from_secs(1), Duration::from_secs(60)));
    }

    #[test]
    fn test_refresh_interval() {
        let mut eta = EtaEstimator::new();
        let now = Instant::now();
        let interval = Duration::from_secs(60);
        assert!(eta.is_refresh_due(now, interval));

        eta.rebaseline(&route(4), 0, 0.0, now);
        assert!(!eta.is_refresh_due(now + Duration::from_secs(59), interval));
        assert!(eta.is_refresh_due(now + Duration::from_secs(60), interval));
    }

    #[test]
    fn test_update_cross_times_from_cursor() {
        let mut route = route(4);
        let before = route.get(0).cross_time;
        update_cross_times(&mut route, 2, &Scaled(100.0));
        assert_eq!(route.get(0).cross_time, before);
        assert!((route.get(3).cross_time - route.get(3).distance * 10.0).abs() < 1e-9);
    }
}
