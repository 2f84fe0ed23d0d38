//! # Off-Route / Recalculation Controller
//!
//! Decides what to do once the tracker can no longer place the vehicle on the
//! upcoming segments.
//!
//! ```text
//!   OnRoute ──no match──▶ OffRouteDetected ──decide: Start──▶ Recalculating{Short,Full}
//!      ▲                        ▲                                   │
//!      └────── success ─────────┼───────────────────────────────────┤
//!                               └──────────── failure ──────────────┘
//! ```
//!
//! A recalculation only starts when:
//! - no recalculation is outstanding,
//! - none was started within `reroute_cooldown`,
//! - the resolved origin differs from the one of the previous attempt.
//!
//! A short reroute (detour prefix reusing cached planner results) is chosen for
//! server-managed sessions that are still connected and went off-route less
//! than `short_reroute_grace` ago. Otherwise a full reroute replaces the route.

use std::time::Instant;

use crate::config::NavigationConfig;
use crate::segment::{EdgeRef, NodeId, TravelDirection};
use crate::GpsPoint;

/// Tracking state of the active route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RouteState {
    #[default]
    OnRoute,
    OffRouteDetected,
    RecalculatingShort,
    RecalculatingFull,
}

impl RouteState {
    pub fn is_recalculating(self) -> bool {
        matches!(self, RouteState::RecalculatingShort | RouteState::RecalculatingFull)
    }
}

/// How a route gets recalculated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RerouteKind {
    /// Detour prefix from the server, spliced in front of the current route.
    Short,
    /// New route from the local planner.
    FullLocal,
    /// New route from the server.
    FullServer,
}

/// Where a route computation starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPoint {
    pub edge: EdgeRef,
    /// Node the vehicle is driving toward; routing continues from it.
    pub node: NodeId,
    pub direction: TravelDirection,
    pub position: GpsPoint,
}

impl TrackPoint {
    /// Same edge and node, regardless of the exact position.
    pub fn same_origin(&self, other: &TrackPoint) -> bool {
        self.edge == other.edge && self.node == other.node
    }
}

/// Wall-clock marks used for debounce and the short-reroute window.
#[derive(Debug, Clone, Copy, Default)]
pub struct RerouteTimers {
    /// First detection of the current off-route episode.
    pub offtrack_since: Option<Instant>,
    /// Start of the latest recalculation (or route request).
    pub last_started: Option<Instant>,
}

/// Result of [`RerouteController::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerouteDecision {
    /// A recalculation is outstanding or the cooldown has not elapsed.
    Wait,
    /// Same origin as the previous attempt; recalculating would loop.
    SamePoint,
    Start(RerouteKind),
}

#[derive(Debug, Clone, Default)]
pub struct RerouteController {
    state: RouteState,
    timers: RerouteTimers,
    last_attempt_from: Option<TrackPoint>,
}

impl RerouteController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RouteState {
        self.state
    }

    pub fn timers(&self) -> &RerouteTimers {
        &self.timers
    }

    /// Record that the vehicle left the route. Returns true when this starts a
    /// new off-route episode.
    pub fn mark_off_route(&mut self, now: Instant) -> bool {
        if self.timers.offtrack_since.is_none() {
            self.timers.offtrack_since = Some(now);
        }
        if self.state == RouteState::OnRoute {
            self.state = RouteState::OffRouteDetected;
            return true;
        }
        false
    }

    /// Record that the vehicle matched the route again. Returns true when this
    /// ends an off-route episode.
    pub fn back_on_route(&mut self) -> bool {
        self.timers.offtrack_since = None;
        if self.state == RouteState::OffRouteDetected {
            self.state = RouteState::OnRoute;
            return true;
        }
        false
    }

    pub fn decide(
        &self,
        config: &NavigationConfig,
        now: Instant,
        server_managed: bool,
        connected: bool,
        from: &TrackPoint,
    ) -> RerouteDecision {
        if self.state.is_recalculating() {
            return RerouteDecision::Wait;
        }

        if let Some(started) = self.timers.last_started {
            if now.saturating_duration_since(started) < config.reroute_cooldown {
                return RerouteDecision::Wait;
            }
        }

        if let Some(previous) = &self.last_attempt_from {
            if previous.same_origin(from) {
                return RerouteDecision::SamePoint;
            }
        }

        let within_grace = self
            .timers
            .offtrack_since
            .map(|since| now.saturating_duration_since(since) < config.short_reroute_grace)
            .unwrap_or(false);

        let kind = match (server_managed && connected, within_grace) {
            (true, true) => RerouteKind::Short,
            (true, false) => RerouteKind::FullServer,
            (false, _) => RerouteKind::FullLocal,
        };
        RerouteDecision::Start(kind)
    }

    /// Record an initial route request as an attempt from `from`.
    ///
    /// Only the same-point guard is armed; the cooldown starts with the first
    /// recalculation.
    pub fn record_request(&mut self, from: TrackPoint) {
        self.last_attempt_from = Some(from);
    }

    pub fn begin(&mut self, kind: RerouteKind, from: TrackPoint, now: Instant) {
        self.record_request(from);
        self.timers.last_started = Some(now);
        self.state = match kind {
            RerouteKind::Short => RouteState::RecalculatingShort,
            RerouteKind::FullLocal | RerouteKind::FullServer => RouteState::RecalculatingFull,
        };
    }

    /// A route was installed. `clear_cooldown` lifts the debounce, which is
    /// done when the server delivers an original route.
    pub fn finish_success(&mut self, clear_cooldown: bool) {
        self.state = RouteState::OnRoute;
        self.timers.offtrack_since = None;
        if clear_cooldown {
            self.timers.last_started = None;
        }
    }

    /// The recalculation failed; the next fix may retry after the cooldown.
    pub fn finish_failure(&mut self) {
        self.state = RouteState::OffRouteDetected;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn point(line: u32, node: u32) -> TrackPoint {
        TrackPoint {
            edge: EdgeRef::new(1, line),
            node: NodeId(node),
            direction: TravelDirection::WithLine,
            position: GpsPoint::new(0.0, line as f64 * 0.001),
        }
    }

    #[test]
    fn test_short_reroute_within_grace() {
        // Off-route first detected 10 seconds ago on a connected server route
        let config = NavigationConfig::default();
        let t0 = Instant::now();
        let mut ctl = RerouteController::new();
        assert!(ctl.mark_off_route(t0));
        assert!(!ctl.mark_off_route(t0 + Duration::from_secs(5)));

        let now = t0 + Duration::from_secs(10);
        assert_eq!(
            ctl.decide(&config, now, true, true, &point(3, 4)),
            RerouteDecision::Start(RerouteKind::Short)
        );
    }

    #[test]
    fn test_full_reroute_when_grace_elapsed_or_disconnected() {
        let config = NavigationConfig::default();
        let t0 = Instant::now();
        let mut ctl = RerouteController::new();
        ctl.mark_off_route(t0);

        let late = t0 + Duration::from_secs(61);
        assert_eq!(
            ctl.decide(&config, late, true, true, &point(3, 4)),
            RerouteDecision::Start(RerouteKind::FullServer)
        );
        assert_eq!(
            ctl.decide(&config, t0, true, false, &point(3, 4)),
            RerouteDecision::Start(RerouteKind::FullLocal)
        );
        assert_eq!(
            ctl.decide(&config, t0, false, true, &point(3, 4)),
            RerouteDecision::Start(RerouteKind::FullLocal)
        );
    }

    #[test]
    fn test_debounce_and_outstanding_request() {
        let config = NavigationConfig::default();
        let t0 = Instant::now();
        let mut ctl = RerouteController::new();
        ctl.mark_off_route(t0);
        ctl.begin(RerouteKind::FullLocal, point(3, 4), t0);
        assert_eq!(ctl.state(), RouteState::RecalculatingFull);
        assert_eq!(ctl.decide(&config, t0, false, false, &point(5, 6)), RerouteDecision::Wait);

        ctl.finish_failure();
        assert_eq!(ctl.state(), RouteState::OffRouteDetected);
        let soon = t0 + Duration::from_secs(30);
        assert_eq!(ctl.decide(&config, soon, false, false, &point(5, 6)), RerouteDecision::Wait);

        let later = t0 + Duration::from_secs(60);
        assert_eq!(
            ctl.decide(&config, later, false, false, &point(5, 6)),
            RerouteDecision::Start(RerouteKind::FullLocal)
        );
    }

    #[test]
    fn test_same_point_guard() {
        let config = NavigationConfig::default();
        let t0 = Instant::now();
        let mut ctl = RerouteController::new();
        ctl.begin(RerouteKind::FullLocal, point(3, 4), t0);
        ctl.finish_failure();

        let later = t0 + Duration::from_secs(120);
        let mut moved_slightly = point(3, 4);
        moved_slightly.position.longitude += 0.0001;
        assert_eq!(
            ctl.decide(&config, later, false, false, &moved_slightly),
            RerouteDecision::SamePoint
        );
    }

    #[test]
    fn test_initial_request_arms_only_same_point_guard() {
        let config = NavigationConfig::default();
        let t0 = Instant::now();
        let mut ctl = RerouteController::new();
        ctl.record_request(point(1, 2));
        assert!(ctl.timers().last_started.is_none());

        ctl.mark_off_route(t0);
        assert_eq!(ctl.decide(&config, t0, false, false, &point(1, 2)), RerouteDecision::SamePoint);
        assert_eq!(
            ctl.decide(&config, t0, false, false, &point(3, 4)),
            RerouteDecision::Start(RerouteKind::FullLocal)
        );
    }

    #[test]
    fn test_success_clears_episode() {
        let t0 = Instant::now();
        let mut ctl = RerouteController::new();
        ctl.mark_off_route(t0);
        ctl.begin(RerouteKind::Short, point(1, 2), t0);
        assert_eq!(ctl.state(), RouteState::RecalculatingShort);

        ctl.finish_success(false);
        assert_eq!(ctl.state(), RouteState::OnRoute);
        assert!(ctl.timers().offtrack_since.is_none());
        assert!(ctl.timers().last_started.is_some());

        ctl.finish_success(true);
        assert!(ctl.timers().last_started.is_none());
    }

    #[test]
    fn test_back_on_route() {
        let mut ctl = RerouteController::new();
        assert!(!ctl.back_on_route());
        ctl.mark_off_route(Instant::now());
        assert!(ctl.back_on_route());
        assert_eq!(ctl.state(), RouteState::OnRoute);
    }
}
