//! Events pushed to the presentation layer.
//!
//! Every outcome of fix processing and backend completion is reported as a
//! [`NavEvent`], errors included.

use crate::error::NavError;
use crate::reroute::RerouteKind;
use crate::segment::{Instruction, RoundaboutExit};
use crate::{Bounds, GpsPoint};

/// Snapshot of route progress after a fix.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProgressSnapshot {
    pub current_segment: usize,
    /// Meters to the next instruction.
    pub distance_to_turn: f64,
    /// Meters to the destination.
    pub distance_to_destination: f64,
    /// Seconds to the next instruction.
    pub eta_to_turn: f64,
    /// Seconds to the destination.
    pub eta_to_destination: f64,
    /// Meters already covered within the current instruction; for auto-zoom.
    pub distance_to_prev: f64,
    /// Length of the instruction after the next one; for auto-zoom.
    pub next_group_distance: f64,
}

/// Summary of a newly installed route.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RouteSummary {
    /// Meters.
    pub total_length: f64,
    /// Seconds.
    pub total_time: f64,
    /// The planner moved the destination.
    pub changed_destination: bool,
    /// The planner starts from a different road than the vehicle's.
    pub changed_departure: bool,
    pub bounds: Option<Bounds>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StopReason {
    Requested,
    Arrived,
    NoRoute,
    Fatal,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum NavEvent {
    RouteReady {
        summary: RouteSummary,
    },
    NewInstruction {
        instruction: Instruction,
        exit: Option<RoundaboutExit>,
        street: Option<String>,
    },
    /// The street name of the active instruction became available.
    StreetResolved {
        street: String,
    },
    Progress(ProgressSnapshot),
    Announcement {
        instruction: Instruction,
        exit: Option<RoundaboutExit>,
        street: Option<String>,
        /// Meters to the turn, or `None` when the turn is immediate.
        within: Option<f64>,
    },
    /// The ETA drifted by more than the configured threshold.
    EtaChanged {
        delta_secs: f64,
        eta_to_destination: f64,
    },
    /// The server refreshed route timing.
    EtaUpdated {
        eta_to_destination: f64,
    },
    Arrived {
        position: Option<GpsPoint>,
    },
    OffRoute,
    BackOnRoute,
    RerouteStarted {
        kind: RerouteKind,
    },
    Rerouted {
        kind: RerouteKind,
    },
    RerouteFailed {
        error: NavError,
    },
    RouteFailed {
        error: NavError,
    },
    /// The session could not continue and was terminated.
    Fatal {
        error: NavError,
    },
    Stopped {
        reason: StopReason,
    },
}
