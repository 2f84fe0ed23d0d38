//! # Navigator
//!
//! The single owner of navigation state. One [`Navigator`] drives at most one
//! [`RouteSession`] at a time:
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | [`Navigator::start_navigation`] | Resolve the origin, request a route |
//! | [`Navigator::on_fix`] | Track progress, detect off-route, emit guidance |
//! | [`Navigator::poll_backend`] | Apply asynchronous backend completions |
//! | [`Navigator::stop`] | End the session from any state |
//!
//! All mutation happens on the caller's loop. Backends answer through a
//! channel; completions tagged with a generation the navigator no longer waits
//! for are dropped.
//!
//! ## Fix processing order
//!
//! 1. Match the tracked line against the upcoming segments
//! 2. Off-route handling, when no segment matches
//! 3. New-instruction event after a group boundary
//! 4. Progress measurement and tile prefetch
//! 5. Throttled ETA refresh (local routes only)
//! 6. Progress event
//! 7. Arrival check, which ends the session
//! 8. Announcement schedule

use std::time::Instant;

use log::{debug, error, info, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::backend::{
    BackendMessage, CompletionSender, RouteFlags, RouteOutcome, RouteRequest, RouteResult,
    RouteStatus, RoutingBackend,
};
use crate::config::NavigationConfig;
use crate::detour::RouteSegments;
use crate::error::NavError;
use crate::eta::{CrossTimeSource, EtaEstimator};
use crate::events::{NavEvent, ProgressSnapshot, RouteSummary, StopReason};
use crate::geo_utils;
use crate::guidance::{self, AnnouncementSchedule, InstructionEntry, StreetLookup};
use crate::map::{MapProvider, TilePriority};
use crate::outline::Outline;
use crate::reroute::{RerouteController, RerouteDecision, RerouteKind, RouteState, TrackPoint};
use crate::segment::{EdgeRef, Instruction, Instrumentation, NodeId, Segment, SegmentList, TravelDirection};
use crate::tracker::{self, Prefetcher, Progress, SyncOutcome, TrackedLine};
use crate::GpsPoint;

/// One GPS fix from the positioning pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub position: GpsPoint,
    /// Road line the positioning system matched the vehicle to, if any.
    pub line: Option<TrackedLine>,
    pub speed_mps: f64,
}

impl Fix {
    pub fn new(position: GpsPoint, speed_mps: f64) -> Self {
        Self {
            position,
            line: None,
            speed_mps,
        }
    }

    pub fn on_line(mut self, line: TrackedLine) -> Self {
        self.line = Some(line);
        self
    }
}

/// Where the trip ends.
#[derive(Debug, Clone, PartialEq)]
pub struct Destination {
    pub position: GpsPoint,
    pub street: Option<String>,
}

impl Destination {
    pub fn new(position: GpsPoint) -> Self {
        Self {
            position,
            street: None,
        }
    }
}

// =============================================================================
// Route Session
// =============================================================================

/// State of the route being followed.
#[derive(Debug, Clone)]
pub struct RouteSession {
    route: RouteSegments,
    current_segment: usize,
    prefetcher: Prefetcher,
    progress: Progress,
    /// Distance and time after the current group, refreshed at group boundaries.
    remaining_distance: f64,
    remaining_time: f64,
    eta: EtaEstimator,
    announcements: AnnouncementSchedule,
    flags: RouteFlags,
    server_managed: bool,
    origin: TrackPoint,
    total_length: f64,
    total_time: f64,
    street: Option<String>,
    pending_street: Option<usize>,
    needs_instruction: bool,
    generation: u64,
}

impl RouteSession {
    fn new(route: RouteSegments, setup: &Installation) -> Self {
        Self {
            route,
            current_segment: 0,
            prefetcher: Prefetcher::new(),
            progress: Progress::default(),
            remaining_distance: 0.0,
            remaining_time: 0.0,
            eta: EtaEstimator::new(),
            announcements: AnnouncementSchedule::default(),
            flags: setup.flags,
            server_managed: setup.server_managed,
            origin: setup.origin,
            total_length: setup.total_length,
            total_time: setup.total_time,
            street: None,
            pending_street: None,
            needs_instruction: true,
            generation: setup.generation,
        }
    }

    pub fn route(&self) -> &RouteSegments {
        &self.route
    }

    pub fn current_segment(&self) -> usize {
        self.current_segment
    }

    /// First segment whose map tile has not been requested yet.
    pub fn current_request_segment(&self) -> usize {
        self.prefetcher
            .current_request_segment(&self.route)
            .max(self.current_segment)
    }

    pub fn flags(&self) -> RouteFlags {
        self.flags
    }

    /// Whether route timing is owned by a remote planner.
    pub fn is_server_managed(&self) -> bool {
        self.server_managed
    }

    pub fn origin(&self) -> &TrackPoint {
        &self.origin
    }

    pub fn total_length(&self) -> f64 {
        self.total_length
    }

    pub fn total_time(&self) -> f64 {
        self.total_time
    }

    /// Street the active instruction leads onto, once known.
    pub fn street(&self) -> Option<&str> {
        self.street.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn active_instruction(&self) -> Instruction {
        self.active_segment().instruction
    }

    fn active_segment(&self) -> &Segment {
        self.route
            .get(tracker::group_end(&self.route, self.current_segment))
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            current_segment: self.current_segment,
            distance_to_turn: self.progress.distance_to_turn,
            distance_to_destination: self.progress.distance_to_turn + self.remaining_distance,
            eta_to_turn: self.eta.eta_to_turn(),
            eta_to_destination: self.eta.eta_to_destination(),
            distance_to_prev: self.progress.distance_to_prev,
            next_group_distance: self.progress.next_group_distance,
        }
    }

    fn refresh_remaining(&mut self) {
        let end = tracker::group_end(&self.route, self.current_segment);
        let (distance, time) = tracker::remaining_after(&self.route, end);
        self.remaining_distance = distance;
        self.remaining_time = time;
    }

    fn measure(&mut self, position: &GpsPoint) {
        self.progress = tracker::measure_progress(&self.route, self.current_segment, position);
        self.eta
            .set_progress(self.progress.eta_to_turn, self.progress.eta_to_turn + self.remaining_time);
    }
}

// =============================================================================
// Navigator
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestPurpose {
    NewRoute,
    Reroute(RerouteKind),
}

#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    generation: u64,
    purpose: RequestPurpose,
    from: TrackPoint,
}

/// A complete route ready to become the session's route.
struct Installation {
    origin: TrackPoint,
    flags: RouteFlags,
    total_length: f64,
    total_time: f64,
    server_managed: bool,
    generation: u64,
    recalculated: Option<RerouteKind>,
}

enum Tracking {
    Continue,
    OffRoute,
    Ended,
}

/// Route-tracking and guidance state machine.
pub struct Navigator<B, M> {
    config: NavigationConfig,
    backend: B,
    map: M,
    session: Option<RouteSession>,
    reroute: RerouteController,
    outline: Outline,
    destination: Option<Destination>,
    destination_edge: Option<EdgeRef>,
    last_fix: Option<Fix>,
    pending: Option<PendingRequest>,
    generation: u64,
    tx: UnboundedSender<BackendMessage>,
    rx: UnboundedReceiver<BackendMessage>,
}

impl<B, M> Navigator<B, M>
where
    B: RoutingBackend,
    M: MapProvider + CrossTimeSource,
{
    pub fn new(config: NavigationConfig, backend: B, map: M) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            config,
            backend,
            map,
            session: None,
            reroute: RerouteController::new(),
            outline: Outline::new(),
            destination: None,
            destination_edge: None,
            last_fix: None,
            pending: None,
            generation: 0,
            tx,
            rx,
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn config(&self) -> &NavigationConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn map(&self) -> &M {
        &self.map
    }

    pub fn map_mut(&mut self) -> &mut M {
        &mut self.map
    }

    pub fn session(&self) -> Option<&RouteSession> {
        self.session.as_ref()
    }

    pub fn is_navigating(&self) -> bool {
        self.session.is_some()
    }

    /// Whether a backend request is outstanding.
    pub fn is_calculating(&self) -> bool {
        self.pending.is_some()
    }

    pub fn state(&self) -> RouteState {
        self.reroute.state()
    }

    pub fn last_fix(&self) -> Option<&Fix> {
        self.last_fix.as_ref()
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.destination.as_ref()
    }

    pub fn outline(&self) -> &Outline {
        &self.outline
    }

    pub fn progress(&self) -> Option<ProgressSnapshot> {
        self.session.as_ref().map(RouteSession::snapshot)
    }

    /// Sender for late instrumentation or server pushes concerning the
    /// installed route.
    pub fn completion_handle(&self) -> Option<CompletionSender> {
        self.session
            .as_ref()
            .map(|s| CompletionSender::new(s.generation, self.tx.clone()))
    }

    // -------------------------------------------------------------------------
    // Route queries
    // -------------------------------------------------------------------------

    pub fn instruction_list(&self) -> Vec<InstructionEntry> {
        self.session
            .as_ref()
            .map(|s| {
                guidance::instruction_list(&s.route, s.current_segment, s.progress.distance_to_next, &self.map)
            })
            .unwrap_or_default()
    }

    /// Position `distance` meters ahead along the route, or the destination
    /// for `None`.
    pub fn waypoint_at(&self, distance: Option<f64>) -> Option<GpsPoint> {
        let session = self.session.as_ref()?;
        match distance {
            Some(d) => tracker::waypoint_at(&session.route, session.current_segment, session.progress.distance_to_next, d),
            None => self.destination.as_ref().map(|d| d.position),
        }
    }

    /// Route index of `edge` traversed in `direction`, at or after the cursor.
    pub fn line_in_route(&self, edge: EdgeRef, direction: TravelDirection) -> Option<usize> {
        let session = self.session.as_ref()?;
        tracker::line_in_route(&session.route, session.current_segment, edge, direction)
    }

    pub fn is_line_on_route(&self, edge: EdgeRef, nodes: Option<(NodeId, NodeId)>) -> bool {
        self.session.as_ref().is_some_and(|s| {
            tracker::is_line_on_route(&s.route, s.current_segment, edge, nodes, &self.map)
        })
    }

    pub fn next_line(&self) -> Option<EdgeRef> {
        let session = self.session.as_ref()?;
        tracker::next_line(&session.route, session.current_segment)
    }

    // -------------------------------------------------------------------------
    // Starting and stopping
    // -------------------------------------------------------------------------

    /// Start navigating to `destination` from the last fix.
    ///
    /// Any active session is dropped first. Connected backends answer
    /// asynchronously through [`poll_backend`](Self::poll_backend); otherwise
    /// the route is computed and installed right away.
    pub fn start_navigation(&mut self, destination: Destination, now: Instant) -> Result<Vec<NavEvent>, NavError> {
        if self.pending.is_some() {
            self.backend.cancel_pending_request();
        }
        self.finish_session();

        let fix = self.last_fix.ok_or(NavError::NoPosition)?;
        let from = self.find_origin(&fix)?;

        self.destination_edge = self
            .map
            .snap_to_edge(&destination.position, self.config.destination_snap_distance)
            .map(|snap| snap.edge);
        if self.destination_edge.is_none() {
            warn!("No road near the destination, routing to the position only");
        }
        self.destination = Some(destination);

        let flags = RouteFlags {
            new_route: true,
            allow_destination_change: true,
            allow_alternate_source: true,
            ..RouteFlags::default()
        };
        let request = self.route_request(from, flags);
        self.reroute.record_request(from);

        let mut events = Vec::new();
        if self.backend.is_connected() {
            self.send_async(request, RequestPurpose::NewRoute, from);
            return Ok(events);
        }

        let computed = match self.backend.compute_route(&request) {
            Ok(computed) if !computed.segments.is_empty() => computed,
            Ok(_) => {
                self.finish_session();
                return Err(NavError::NoRoute);
            }
            Err(e) => {
                error!("Route computation failed: {}", e);
                self.finish_session();
                return Err(e);
            }
        };

        let setup = Installation {
            origin: from,
            flags: computed.flags,
            total_length: computed.total_length,
            total_time: computed.total_time,
            server_managed: false,
            generation: self.next_generation(),
            recalculated: None,
        };
        self.install_route(computed.segments, Vec::new(), setup, now, &mut events);
        Ok(events)
    }

    /// Stop navigating. Safe in any state; an outstanding request is cancelled
    /// and its answer discarded.
    pub fn stop(&mut self) -> Vec<NavEvent> {
        let active = self.session.is_some() || self.pending.is_some();
        if self.pending.is_some() {
            self.backend.cancel_pending_request();
        }
        self.finish_session();

        if active {
            info!("Navigation stopped");
            vec![NavEvent::Stopped {
                reason: StopReason::Requested,
            }]
        } else {
            Vec::new()
        }
    }

    // -------------------------------------------------------------------------
    // Fix processing
    // -------------------------------------------------------------------------

    /// Process a GPS fix.
    pub fn on_fix(&mut self, fix: Fix, now: Instant) -> Vec<NavEvent> {
        self.last_fix = Some(fix);
        let mut events = Vec::new();

        let Some(mut session) = self.session.take() else {
            return events;
        };
        match self.track(&mut session, &fix, now, &mut events) {
            Tracking::Continue => self.session = Some(session),
            Tracking::OffRoute => {
                self.session = Some(session);
                self.handle_off_route(&fix, now, &mut events);
            }
            Tracking::Ended => {}
        }
        events
    }

    fn track(&mut self, session: &mut RouteSession, fix: &Fix, now: Instant, events: &mut Vec<NavEvent>) -> Tracking {
        if let Some(line) = fix.line {
            match tracker::sync_to_line(&session.route, session.current_segment, &line, self.config.sync_lookahead) {
                SyncOutcome::OnCurrent => {}
                SyncOutcome::Advanced { index, new_group } => {
                    debug!("Segment {} -> {}", session.current_segment, index);
                    session.current_segment = index;
                    session.flags.changed_departure = false;
                    if new_group {
                        session.needs_instruction = true;
                    }
                }
                SyncOutcome::AwaitingInstrumentation => {
                    debug!("Segment {} not instrumented yet", session.current_segment + 1);
                }
                SyncOutcome::NoMatch => return Tracking::OffRoute,
            }
            if !session.route.is_detour_index(session.current_segment) && self.reroute.back_on_route() {
                info!("Back on route at segment {}", session.current_segment);
                events.push(NavEvent::BackOnRoute);
            }
        }

        if session.needs_instruction {
            self.emit_instruction(session, events);
        } else {
            retry_street(&self.map, session, events);
        }

        session.measure(&fix.position);
        session.prefetcher.advance(
            &session.route,
            session.current_segment,
            session.progress.distance_to_next,
            self.config.prefetch_distance,
            &self.map,
        );

        if !session.server_managed && session.eta.is_refresh_due(now, self.config.eta_refresh_interval) {
            let change = session.eta.refresh(
                &mut session.route,
                session.current_segment,
                session.progress.distance_to_next,
                &self.map,
                self.config.eta_change_threshold,
                now,
            );
            session.refresh_remaining();
            session.measure(&fix.position);
            if let Some(delta_secs) = change {
                events.push(NavEvent::EtaChanged {
                    delta_secs,
                    eta_to_destination: session.eta.eta_to_destination(),
                });
            }
        }

        events.push(NavEvent::Progress(session.snapshot()));

        let active = session.active_segment();
        let (instruction, exit) = (active.instruction, active.exit);
        if guidance::has_arrived(instruction, session.progress.distance_to_turn, fix.speed_mps, &self.config) {
            info!("Arrived, {:.0}m from the destination", session.progress.distance_to_turn);
            events.push(NavEvent::Arrived {
                position: self.destination.as_ref().map(|d| d.position),
            });
            events.push(NavEvent::Stopped {
                reason: StopReason::Arrived,
            });
            self.finish_session();
            return Tracking::Ended;
        }

        if instruction.is_announced() {
            if let Some(announcement) =
                session
                    .announcements
                    .evaluate(session.progress.distance_to_turn, fix.speed_mps, &self.config)
            {
                events.push(NavEvent::Announcement {
                    instruction,
                    exit: exit.filter(|_| instruction.carries_exit()),
                    street: session.street.clone(),
                    within: announcement.within,
                });
            }
        }
        Tracking::Continue
    }

    fn emit_instruction(&self, session: &mut RouteSession, events: &mut Vec<NavEvent>) {
        session.needs_instruction = false;
        session.announcements.reset();
        session.refresh_remaining();

        let end = tracker::group_end(&session.route, session.current_segment);
        let active = session.route.get(end);
        let (instruction, exit) = (active.instruction, active.exit);

        let street = match guidance::next_street(&session.route, end, &self.map, true) {
            StreetLookup::Resolved(name) => {
                session.pending_street = None;
                Some(name)
            }
            StreetLookup::Pending { index } => {
                session.pending_street = Some(index);
                None
            }
            StreetLookup::Unnamed => {
                session.pending_street = None;
                if instruction == Instruction::ApproachingDestination {
                    self.destination.as_ref().and_then(|d| d.street.clone())
                } else {
                    None
                }
            }
        };
        session.street = street.clone();

        debug!("New instruction {:?} at segment {}", instruction, end);
        events.push(NavEvent::NewInstruction {
            instruction,
            exit: exit.filter(|_| instruction.carries_exit()),
            street,
        });
    }

    // -------------------------------------------------------------------------
    // Off-route handling
    // -------------------------------------------------------------------------

    fn handle_off_route(&mut self, fix: &Fix, now: Instant, events: &mut Vec<NavEvent>) {
        if self.reroute.mark_off_route(now) {
            info!("Vehicle left the route");
            events.push(NavEvent::OffRoute);
        }

        let from = match self.find_origin(fix) {
            Ok(from) => from,
            Err(e) => {
                warn!("Cannot recalculate: {}", e);
                return;
            }
        };
        let Some(server_managed) = self.session.as_ref().map(|s| s.server_managed) else {
            return;
        };
        let connected = self.backend.is_connected();

        match self.reroute.decide(&self.config, now, server_managed, connected, &from) {
            RerouteDecision::Wait => {}
            RerouteDecision::SamePoint => {
                warn!("Recalculation requested from the same point as the last attempt, skipping");
            }
            RerouteDecision::Start(kind) => self.start_reroute(kind, from, now, events),
        }
    }

    /// Recalculate on request, e.g. when the driver asks for a new route.
    ///
    /// Subject to the same cooldown and same-point guard as automatic reroutes.
    pub fn recalculate(&mut self, now: Instant) -> Result<Vec<NavEvent>, NavError> {
        let server_managed = self
            .session
            .as_ref()
            .map(|s| s.server_managed)
            .ok_or(NavError::NotNavigating)?;
        let fix = self.last_fix.ok_or(NavError::NoPosition)?;
        let from = self.find_origin(&fix)?;

        let mut events = Vec::new();
        let connected = self.backend.is_connected();
        match self.reroute.decide(&self.config, now, server_managed, connected, &from) {
            RerouteDecision::Wait => debug!("Recalculation already running or too recent"),
            RerouteDecision::SamePoint => {
                warn!("Recalculation requested from the same point as the last attempt, skipping");
            }
            RerouteDecision::Start(kind) => self.start_reroute(kind, from, now, &mut events),
        }
        Ok(events)
    }

    fn start_reroute(&mut self, kind: RerouteKind, from: TrackPoint, now: Instant, events: &mut Vec<NavEvent>) {
        self.reroute.begin(kind, from, now);
        info!("Requesting {:?} reroute from {}/{}", kind, from.edge.tile, from.edge.line);
        events.push(NavEvent::RerouteStarted { kind });

        let flags = RouteFlags {
            recalc_route: true,
            use_last_results: kind == RerouteKind::Short,
            allow_alternate_source: true,
            ..RouteFlags::default()
        };
        let mut request = self.route_request(from, flags);

        match kind {
            RerouteKind::Short => {
                request.max_segments = Some(self.config.max_detour_segments);
                self.send_async(request, RequestPurpose::Reroute(kind), from);
            }
            RerouteKind::FullServer => {
                self.outline.preserve();
                self.send_async(request, RequestPurpose::Reroute(kind), from);
            }
            RerouteKind::FullLocal => match self.backend.compute_route(&request) {
                Ok(computed) if !computed.segments.is_empty() => {
                    let setup = Installation {
                        origin: from,
                        flags: computed.flags,
                        total_length: computed.total_length,
                        total_time: computed.total_time,
                        server_managed: false,
                        generation: self.next_generation(),
                        recalculated: Some(kind),
                    };
                    self.install_route(computed.segments, Vec::new(), setup, now, events);
                }
                Ok(_) => self.reroute_failed(NavError::NoRoute, events),
                Err(e) => self.reroute_failed(e, events),
            },
        }
    }

    fn reroute_failed(&mut self, error: NavError, events: &mut Vec<NavEvent>) {
        if error.is_fatal() {
            self.fail_fatal(error, events);
            return;
        }
        error!("Recalculation failed: {}", error);
        self.reroute.finish_failure();
        events.push(NavEvent::RerouteFailed { error });
    }

    // -------------------------------------------------------------------------
    // Backend completions
    // -------------------------------------------------------------------------

    /// Apply everything the backend delivered since the last call.
    pub fn poll_backend(&mut self, now: Instant) -> Vec<NavEvent> {
        let mut events = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            match message {
                BackendMessage::Route { generation, outcome } => {
                    self.on_route_message(generation, outcome, now, &mut events)
                }
                BackendMessage::Instrumented { generation, updates } => {
                    self.on_instrumented(generation, updates, &mut events)
                }
            }
        }
        events
    }

    fn on_route_message(&mut self, generation: u64, outcome: RouteOutcome, now: Instant, events: &mut Vec<NavEvent>) {
        let for_pending = self.pending.map(|p| p.generation) == Some(generation);
        let for_session = self.session.as_ref().map(|s| s.generation) == Some(generation);
        if !for_pending && !for_session {
            debug!("Discarding completion of stale generation {}", generation);
            return;
        }

        let error = match outcome {
            RouteOutcome::Succeeded(result) => {
                match result.status {
                    RouteStatus::Original => match self.pending.take() {
                        Some(pending) if for_pending => self.apply_original(pending, result, now, events),
                        other => {
                            self.pending = other;
                            debug!("Ignoring unsolicited route for generation {}", generation);
                        }
                    },
                    RouteStatus::Update => self.apply_update(result, now, events),
                    RouteStatus::Alternative { alt_id } => {
                        debug!("Alternative route {} received", alt_id);
                        self.outline.set_alternative(alt_id, result.outline);
                    }
                }
                return;
            }
            RouteOutcome::ServerError(message) => NavError::ServerError(message),
            RouteOutcome::Inconsistent(message) => NavError::Inconsistent(message),
        };

        if !for_pending {
            error!("Backend error for the installed route: {}", error);
            return;
        }
        if let Some(pending) = self.pending.take() {
            self.request_failed(pending.purpose, error, events);
        }
    }

    fn request_failed(&mut self, purpose: RequestPurpose, error: NavError, events: &mut Vec<NavEvent>) {
        match purpose {
            RequestPurpose::NewRoute => {
                error!("No route: {}", error);
                events.push(NavEvent::RouteFailed { error });
                events.push(NavEvent::Stopped {
                    reason: StopReason::NoRoute,
                });
                self.finish_session();
            }
            RequestPurpose::Reroute(_) => self.reroute_failed(error, events),
        }
    }

    fn apply_original(&mut self, pending: PendingRequest, result: RouteResult, now: Instant, events: &mut Vec<NavEvent>) {
        let recalculated = match pending.purpose {
            RequestPurpose::NewRoute => None,
            RequestPurpose::Reroute(kind) => Some(kind),
        };

        if let Some(reused_tail) = result.reused_tail {
            if self.session.is_some() {
                let kind = recalculated.unwrap_or(RerouteKind::Short);
                self.install_detour(result.segments, reused_tail, pending.generation, kind, now, events);
                return;
            }
        }

        if result.segments.is_empty() {
            self.request_failed(pending.purpose, NavError::NoRoute, events);
            return;
        }

        let setup = Installation {
            origin: pending.from,
            flags: result.flags,
            total_length: result.total_length,
            total_time: result.total_time,
            server_managed: true,
            generation: pending.generation,
            recalculated,
        };
        self.install_route(result.segments, result.outline, setup, now, events);
    }

    fn apply_update(&mut self, result: RouteResult, now: Instant, events: &mut Vec<NavEvent>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        for (index, cross_time) in result.cross_time_updates {
            if index < session.route.len() {
                session.route.get_mut(index).cross_time = cross_time;
            }
        }
        if result.total_time > 0.0 {
            session.total_time = result.total_time;
        }
        session.refresh_remaining();
        session
            .eta
            .rebaseline(&session.route, session.current_segment, session.progress.distance_to_next, now);
        session.progress.eta_to_turn = session.eta.eta_to_turn();

        debug!("Server updated ETA to {:.0}s", session.eta.eta_to_destination());
        events.push(NavEvent::EtaUpdated {
            eta_to_destination: session.eta.eta_to_destination(),
        });
    }

    fn on_instrumented(&mut self, generation: u64, updates: Vec<(usize, Instrumentation)>, events: &mut Vec<NavEvent>) {
        let Some(session) = self.session.as_mut() else {
            debug!("Discarding instrumentation, no route installed");
            return;
        };
        if session.generation != generation {
            debug!("Discarding instrumentation of stale generation {}", generation);
            return;
        }

        for (index, update) in updates {
            match session.route.base_index(index) {
                None => session.route.instrument_detour(index, update),
                Some(base) => session.route.instrument_base(base, update),
            };
        }
        session.refresh_remaining();
        if session.pending_street.is_some() {
            if let StreetLookup::Pending { index } = resolve_street(&self.map, session, events) {
                let tile = session.route.get(index).edge.tile;
                self.map.request_tile(tile, TilePriority::NextTurn);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Installation
    // -------------------------------------------------------------------------

    fn install_route(
        &mut self,
        segments: Vec<Segment>,
        outline: Vec<GpsPoint>,
        mut setup: Installation,
        now: Instant,
        events: &mut Vec<NavEvent>,
    ) {
        let base = match SegmentList::new(segments) {
            Ok(base) => base,
            Err(e) => {
                self.fail_fatal(e, events);
                return;
            }
        };
        let route = RouteSegments::new(base);
        if setup.total_length <= 0.0 {
            setup.total_length = route.base().total_distance();
        }
        if setup.total_time <= 0.0 {
            setup.total_time = route.base().total_cross_time();
        }

        let outline = if outline.is_empty() {
            route_outline(&route)
        } else {
            outline
        };
        self.outline.set_route(outline);

        let mut session = RouteSession::new(route, &setup);
        session.current_segment = self.resync_index(&session.route);
        session.refresh_remaining();
        if let Some(fix) = self.last_fix {
            session.measure(&fix.position);
        }

        if setup.server_managed {
            session
                .eta
                .rebaseline(&session.route, session.current_segment, session.progress.distance_to_next, now);
        } else {
            session.eta.refresh(
                &mut session.route,
                session.current_segment,
                session.progress.distance_to_next,
                &self.map,
                self.config.eta_change_threshold,
                now,
            );
            session.refresh_remaining();
        }

        info!(
            "Route installed: {} segments, {:.0}m, {:.0}s (generation {})",
            session.route.len(),
            setup.total_length,
            setup.total_time,
            setup.generation
        );

        self.reroute.finish_success(setup.server_managed);
        match setup.recalculated {
            None => events.push(NavEvent::RouteReady {
                summary: RouteSummary {
                    total_length: setup.total_length,
                    total_time: setup.total_time,
                    changed_destination: setup.flags.changed_destination,
                    changed_departure: setup.flags.changed_departure,
                    bounds: self.outline.bounds(),
                },
            }),
            Some(kind) => events.push(NavEvent::Rerouted { kind }),
        }
        self.session = Some(session);
    }

    fn install_detour(
        &mut self,
        prefix: Vec<Segment>,
        reused_tail: usize,
        generation: u64,
        kind: RerouteKind,
        now: Instant,
        events: &mut Vec<NavEvent>,
    ) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if let Err(e) = session
            .route
            .install_detour(prefix, reused_tail, self.config.max_detour_segments)
        {
            if e.is_fatal() {
                self.fail_fatal(e, events);
            } else {
                self.session = Some(session);
                self.reroute_failed(e, events);
            }
            return;
        }

        session.prefetcher.reset_detour();
        session.generation = generation;
        session.server_managed = true;
        session.needs_instruction = true;
        session.current_segment = self.resync_index(&session.route);
        session.refresh_remaining();
        if let Some(fix) = self.last_fix {
            session.measure(&fix.position);
        }
        session
            .eta
            .rebaseline(&session.route, session.current_segment, session.progress.distance_to_next, now);

        info!(
            "Detour installed: {} segments rejoining at {}",
            session.route.detour_size(),
            session.route.detour_end()
        );
        self.reroute.finish_success(false);
        events.push(NavEvent::Rerouted { kind });
        self.session = Some(session);
    }

    /// Where the vehicle is on `route`, from the last fix.
    fn resync_index(&self, route: &RouteSegments) -> usize {
        let Some(fix) = self.last_fix else {
            return 0;
        };
        let by_line = fix
            .line
            .and_then(|line| tracker::find_track_segment(route, line.edge, Some(line.direction)));
        by_line
            .or_else(|| {
                self.map
                    .snap_to_edge(&fix.position, self.config.origin_snap_distance)
                    .and_then(|snap| tracker::find_track_segment(route, snap.edge, None))
            })
            .unwrap_or(0)
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    /// Resolve where a route computation starts from a fix.
    fn find_origin(&self, fix: &Fix) -> Result<TrackPoint, NavError> {
        if let Some(line) = fix.line {
            if let Some(info) = self.map.edge_info(line.edge) {
                let node = match line.direction {
                    TravelDirection::WithLine => info.to_node,
                    TravelDirection::AgainstLine => info.from_node,
                };
                return Ok(TrackPoint {
                    edge: line.edge,
                    node,
                    direction: line.direction,
                    position: fix.position,
                });
            }
        }

        let not_found = NavError::NoRoadNearOrigin {
            distance_m: self.config.origin_snap_distance,
        };
        let snap = self
            .map
            .snap_to_edge(&fix.position, self.config.origin_snap_distance)
            .ok_or_else(|| not_found.clone())?;
        let info = self.map.edge_info(snap.edge).ok_or(not_found)?;

        let direction = info.oneway.unwrap_or_else(|| {
            let to_start = geo_utils::haversine_distance(&fix.position, &info.from_pos);
            let to_end = geo_utils::haversine_distance(&fix.position, &info.to_pos);
            if to_end >= to_start {
                TravelDirection::WithLine
            } else {
                TravelDirection::AgainstLine
            }
        });
        let node = match direction {
            TravelDirection::WithLine => info.to_node,
            TravelDirection::AgainstLine => info.from_node,
        };
        Ok(TrackPoint {
            edge: snap.edge,
            node,
            direction,
            position: snap.point,
        })
    }

    fn route_request(&self, from: TrackPoint, flags: RouteFlags) -> RouteRequest {
        let (to_position, to_street) = match &self.destination {
            Some(d) => (d.position, d.street.clone()),
            None => (from.position, None),
        };
        RouteRequest {
            from,
            to_edge: self.destination_edge,
            to_node: None,
            to_position,
            to_street,
            flags,
            max_segments: None,
        }
    }

    fn send_async(&mut self, request: RouteRequest, purpose: RequestPurpose, from: TrackPoint) {
        let generation = self.next_generation();
        self.pending = Some(PendingRequest {
            generation,
            purpose,
            from,
        });
        let completion = CompletionSender::new(generation, self.tx.clone());
        self.backend.request_route_async(request, completion);
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn fail_fatal(&mut self, error: NavError, events: &mut Vec<NavEvent>) {
        error!("Navigation terminated: {}", error);
        if self.pending.is_some() {
            self.backend.cancel_pending_request();
        }
        self.finish_session();
        events.push(NavEvent::Fatal { error });
        events.push(NavEvent::Stopped {
            reason: StopReason::Fatal,
        });
    }

    /// Release all session state. Answers to earlier requests become stale.
    fn finish_session(&mut self) {
        self.session = None;
        self.pending = None;
        self.reroute.reset();
        self.outline.clear();
        self.destination = None;
        self.destination_edge = None;
        self.next_generation();
    }
}

/// Re-attempt a pending street lookup without requesting tiles.
fn retry_street<M: MapProvider + ?Sized>(map: &M, session: &mut RouteSession, events: &mut Vec<NavEvent>) {
    if session.pending_street.is_some() {
        resolve_street(map, session, events);
    }
}

fn resolve_street<M: MapProvider + ?Sized>(
    map: &M,
    session: &mut RouteSession,
    events: &mut Vec<NavEvent>,
) -> StreetLookup {
    let end = tracker::group_end(&session.route, session.current_segment);
    let lookup = guidance::next_street(&session.route, end, map, false);
    match &lookup {
        StreetLookup::Resolved(name) => {
            session.pending_street = None;
            session.street = Some(name.clone());
            events.push(NavEvent::StreetResolved { street: name.clone() });
        }
        StreetLookup::Pending { index } => session.pending_street = Some(*index),
        StreetLookup::Unnamed => session.pending_street = None,
    }
    lookup
}

/// Display polyline from the instrumented segments.
fn route_outline(route: &RouteSegments) -> Vec<GpsPoint> {
    let mut points: Vec<GpsPoint> = route.iter().filter_map(|s| s.start_position()).collect();
    if let Some(end) = route.iter().last().and_then(|s| s.end_position()) {
        points.push(end);
    }
    points
}
