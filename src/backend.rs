//! # Routing Backend
//!
//! Contract for the external route planner, which is either a local graph
//! search or a remote server.
//!
//! - [`RoutingBackend::compute_route`] is a synchronous local computation.
//! - [`RoutingBackend::request_route_async`] starts a server computation. The
//!   backend answers later through the [`CompletionSender`] it was handed, and
//!   may do so from any thread.
//!
//! Completions are tagged with the generation of the request that produced
//! them. The navigator drains them on its own loop and drops anything tagged
//! with a generation it no longer waits for.

use tokio::sync::mpsc::UnboundedSender;

use crate::error::NavError;
use crate::reroute::TrackPoint;
use crate::segment::{EdgeRef, Instrumentation, NodeId, Segment};
use crate::GpsPoint;

/// Options and notices attached to a route request and its result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RouteFlags {
    /// First route of a navigation session.
    pub new_route: bool,
    /// Recalculation after going off-route.
    pub recalc_route: bool,
    /// Reuse the planner's cached results; set for short reroutes.
    pub use_last_results: bool,
    /// The planner may move the destination to a reachable point.
    pub allow_destination_change: bool,
    /// The planner may start from a different road than the one requested.
    pub allow_alternate_source: bool,
    /// Set in results: the destination was moved.
    pub changed_destination: bool,
    /// Set in results: the route starts from a different road.
    pub changed_departure: bool,
    /// Compute geometry only, without turn instructions.
    pub ignore_turns: bool,
}

/// Input to a route computation.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteRequest {
    pub from: TrackPoint,
    pub to_edge: Option<EdgeRef>,
    pub to_node: Option<NodeId>,
    pub to_position: GpsPoint,
    pub to_street: Option<String>,
    pub flags: RouteFlags,
    /// Upper bound on returned segments; set for short reroutes.
    pub max_segments: Option<usize>,
}

/// Result of a synchronous local computation.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedRoute {
    pub segments: Vec<Segment>,
    /// Total route length in meters.
    pub total_length: f64,
    /// Total travel time in seconds.
    pub total_time: f64,
    pub flags: RouteFlags,
}

/// What a server result means for the active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStatus {
    /// A route to install (new route, full reroute or detour).
    Original,
    /// Refreshed timing for the route already installed.
    Update,
    /// An alternative route, for display only.
    Alternative { alt_id: u32 },
}

/// Successful server result.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteResult {
    pub status: RouteStatus,
    pub flags: RouteFlags,
    pub total_length: f64,
    pub total_time: f64,
    /// Display polyline of the whole route.
    pub outline: Vec<GpsPoint>,
    /// Route segments, or the detour prefix when `reused_tail` is set.
    pub segments: Vec<Segment>,
    /// For a detour: how many segments at the end of the installed route the
    /// detour reconnects to.
    pub reused_tail: Option<usize>,
    /// For [`RouteStatus::Update`]: new cross-times by route index.
    pub cross_time_updates: Vec<(usize, f64)>,
}

impl RouteResult {
    /// A complete route to install.
    pub fn original(segments: Vec<Segment>, total_length: f64, total_time: f64) -> Self {
        Self {
            status: RouteStatus::Original,
            flags: RouteFlags::default(),
            total_length,
            total_time,
            outline: Vec::new(),
            segments,
            reused_tail: None,
            cross_time_updates: Vec::new(),
        }
    }

    /// A detour reconnecting to the last `reused_tail` installed segments.
    pub fn detour(segments: Vec<Segment>, reused_tail: usize) -> Self {
        Self {
            reused_tail: Some(reused_tail),
            ..Self::original(segments, 0.0, 0.0)
        }
    }

    /// Refreshed cross-times for the installed route.
    pub fn update(cross_time_updates: Vec<(usize, f64)>, total_time: f64) -> Self {
        Self {
            status: RouteStatus::Update,
            cross_time_updates,
            ..Self::original(Vec::new(), 0.0, total_time)
        }
    }

    /// Display-only alternative geometry.
    pub fn alternative(alt_id: u32, outline: Vec<GpsPoint>) -> Self {
        Self {
            status: RouteStatus::Alternative { alt_id },
            outline,
            ..Self::original(Vec::new(), 0.0, 0.0)
        }
    }
}

/// Tagged completion of an asynchronous route request.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    Succeeded(RouteResult),
    ServerError(String),
    Inconsistent(String),
}

/// Message delivered from the backend to the navigator's loop.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    Route {
        generation: u64,
        outcome: RouteOutcome,
    },
    /// Late geometry and timing, keyed by route index.
    Instrumented {
        generation: u64,
        updates: Vec<(usize, Instrumentation)>,
    },
}

/// Handle through which a backend answers one request.
///
/// Cheap to clone and `Send`, so it can move into a network task.
#[derive(Debug, Clone)]
pub struct CompletionSender {
    generation: u64,
    tx: UnboundedSender<BackendMessage>,
}

impl CompletionSender {
    pub(crate) fn new(generation: u64, tx: UnboundedSender<BackendMessage>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver the result of the request.
    pub fn complete(&self, outcome: RouteOutcome) {
        self.send(BackendMessage::Route {
            generation: self.generation,
            outcome,
        });
    }

    /// Deliver late instrumentation for the route produced by this request.
    pub fn instrumented(&self, updates: Vec<(usize, Instrumentation)>) {
        self.send(BackendMessage::Instrumented {
            generation: self.generation,
            updates,
        });
    }

    fn send(&self, message: BackendMessage) {
        if self.tx.send(message).is_err() {
            log::debug!("Navigator gone, dropping completion for generation {}", self.generation);
        }
    }
}

/// External route planner.
pub trait RoutingBackend {
    /// Compute a route synchronously.
    fn compute_route(&mut self, request: &RouteRequest) -> Result<ComputedRoute, NavError>;

    /// Start an asynchronous computation. Must not block; the answer goes
    /// through `completion`.
    fn request_route_async(&mut self, request: RouteRequest, completion: CompletionSender);

    /// Abort the outstanding asynchronous request, if the backend supports it.
    /// Answers that still arrive are discarded by generation.
    fn cancel_pending_request(&mut self) {}

    /// Whether the remote planner is reachable.
    fn is_connected(&self) -> bool;
}
