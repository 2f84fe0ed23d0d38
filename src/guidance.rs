//! # Guidance
//!
//! Turns tracker output into discrete guidance: which street the next
//! instruction leads onto, when to announce it, and when the vehicle has
//! arrived.
//!
//! ## Announcement schedule
//!
//! Three tiers (800m / 200m / 40m by default) each fire once per instruction.
//! A tier fires at `distance + speed * lead`, so faster vehicles hear it
//! earlier. After a new instruction the schedule is undetermined and starts at
//! the first tier the vehicle is still beyond:
//!
//! ```text
//! remaining 1000m  →  next = 800m tier
//! remaining  500m  →  next = 200m tier  (800m tier skipped)
//! remaining   30m  →  next = 40m tier   (fires immediately, as "now")
//! ```

use crate::config::NavigationConfig;
use crate::detour::RouteSegments;
use crate::map::{MapProvider, TilePriority};
use crate::segment::{Instruction, Readiness, RoundaboutExit, SegmentContext};
use crate::tracker;
use crate::GpsPoint;

// =============================================================================
// Announcements
// =============================================================================

/// Which announcement tier fires next for the active instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnnouncementSchedule {
    #[default]
    Undetermined,
    Next(usize),
    Exhausted,
}

/// A fired announcement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Announcement {
    pub tier: usize,
    /// Remaining distance to announce, or `None` for the final "now" call.
    pub within: Option<f64>,
}

impl AnnouncementSchedule {
    pub fn reset(&mut self) {
        *self = AnnouncementSchedule::Undetermined;
    }

    /// Advance the schedule for a vehicle `distance` meters before the turn.
    pub fn evaluate(&mut self, distance: f64, speed_mps: f64, config: &NavigationConfig) -> Option<Announcement> {
        let tiers = &config.announce_distances;
        let speed = speed_mps.max(0.0);

        if *self == AnnouncementSchedule::Undetermined {
            let first = tiers
                .iter()
                .position(|&tier| distance > tier)
                .unwrap_or(tiers.len() - 1);
            *self = AnnouncementSchedule::Next(first);
        }

        let AnnouncementSchedule::Next(tier) = *self else {
            return None;
        };
        if distance > tiers[tier] + speed * config.announce_lead_seconds[tier] {
            return None;
        }

        let following = (0..tiers.len()).find(|&i| tiers[i] < tiers[tier] && distance > tiers[i]);
        *self = match following {
            Some(next) => AnnouncementSchedule::Next(next),
            None => AnnouncementSchedule::Exhausted,
        };

        Some(Announcement {
            tier,
            within: following.map(|_| distance),
        })
    }
}

/// Whether the vehicle has reached the destination.
pub fn has_arrived(active: Instruction, distance_to_turn: f64, speed_mps: f64, config: &NavigationConfig) -> bool {
    active == Instruction::ApproachingDestination && distance_to_turn <= config.arrival_distance(speed_mps)
}

// =============================================================================
// Street lookahead
// =============================================================================

/// Outcome of looking up the street an instruction leads onto.
#[derive(Debug, Clone, PartialEq)]
pub enum StreetLookup {
    Resolved(String),
    /// Segment `index` has no street name yet (not instrumented or tile not loaded).
    Pending { index: usize },
    /// Nothing named before the end of the route.
    Unnamed,
}

/// Find the street after the group ending at `group_end`.
///
/// Roundabout-internal segments are skipped, as are segments with an empty
/// name. With `request_tiles`, a missing name triggers a next-turn tile request.
pub fn next_street<M: MapProvider + ?Sized>(
    route: &RouteSegments,
    group_end: usize,
    map: &M,
    request_tiles: bool,
) -> StreetLookup {
    let mut index = group_end + 1;
    while index < route.len() && route.get(index).context == SegmentContext::Roundabout {
        index += 1;
    }

    while index < route.len() {
        let segment = route.get(index);
        let name = if segment.is_instrumented() {
            map.street_name(segment.edge)
        } else {
            Readiness::Pending
        };
        match name {
            Readiness::Ready(name) if name.is_empty() => index += 1,
            Readiness::Ready(name) => return StreetLookup::Resolved(name),
            Readiness::Pending => {
                if request_tiles {
                    map.request_tile(segment.edge.tile, TilePriority::NextTurn);
                }
                return StreetLookup::Pending { index };
            }
        }
    }
    StreetLookup::Unnamed
}

// =============================================================================
// Instruction list
// =============================================================================

/// One upcoming instruction.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InstructionEntry {
    pub instruction: Instruction,
    pub exit: Option<RoundaboutExit>,
    /// Street the instruction leads onto, if already known.
    pub street: Option<String>,
    /// Distance from the vehicle, in meters.
    pub distance: f64,
    /// Where the instruction applies, if the segment is instrumented.
    pub position: Option<GpsPoint>,
}

/// One entry per remaining instruction group, starting with the active one.
pub fn instruction_list<M: MapProvider + ?Sized>(
    route: &RouteSegments,
    current: usize,
    distance_to_next: f64,
    map: &M,
) -> Vec<InstructionEntry> {
    let mut entries = Vec::new();
    if current >= route.len() {
        return entries;
    }

    let mut distance = distance_to_next;
    let mut start = current;
    loop {
        let end = tracker::group_end(route, start);
        if end > start {
            distance += (start + 1..=end).map(|i| route.get(i).distance).sum::<f64>();
        }
        let last = route.get(end);
        let street = match next_street(route, end, map, false) {
            StreetLookup::Resolved(name) => Some(name),
            _ => None,
        };
        entries.push(InstructionEntry {
            instruction: last.instruction,
            exit: last.exit,
            street,
            distance,
            position: last.end_position(),
        });

        if end + 1 >= route.len() {
            break;
        }
        start = end + 1;
        distance += route.get(start).distance;
    }
    entries
}
