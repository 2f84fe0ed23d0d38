//! Shared fixtures for unit tests: a straight synthetic road and a scripted
//! routing backend.

use std::collections::VecDeque;

use crate::backend::{CompletionSender, ComputedRoute, RouteFlags, RouteRequest, RoutingBackend};
use crate::error::NavError;
use crate::map::{RoadEdge, RoadNetwork};
use crate::segment::{EdgeRef, Instruction, Segment, TravelDirection};
use crate::tracker::TrackedLine;
use crate::GpsPoint;

/// Spacing of the synthetic road's nodes, in degrees of longitude (~111m).
pub const STEP: f64 = 0.001;

/// Edge `i` of the straight road; each edge sits on its own tile.
pub fn edge(i: u32) -> EdgeRef {
    EdgeRef::new(100 + i, i)
}

/// Position `frac` of the way along edge `i`.
pub fn fix_position(i: u32, frac: f64) -> GpsPoint {
    GpsPoint::new(0.0, (i as f64 + frac) * STEP)
}

pub fn on_edge(i: u32) -> TrackedLine {
    TrackedLine::new(edge(i), TravelDirection::WithLine)
}

/// `count` edges along the equator, node `i` to node `i + 1`, named "Street i".
pub fn straight_road(count: u32) -> RoadNetwork {
    let mut net = RoadNetwork::new();
    for i in 0..count {
        net.add_edge(
            edge(i),
            RoadEdge::new(i, i + 1, vec![fix_position(i, 0.0), fix_position(i + 1, 0.0)])
                .street(&format!("Street {i}"))
                .speed(10.0),
        );
    }
    add_side_road(&mut net);
    net
}

/// Edge branching north from node 0; never part of the generated routes.
pub fn side_road() -> EdgeRef {
    EdgeRef::new(900, 0)
}

fn add_side_road(net: &mut RoadNetwork) {
    net.add_edge(
        side_road(),
        RoadEdge::new(1000, 1001, vec![GpsPoint::new(0.0005, 0.0), GpsPoint::new(0.01, 0.0)])
            .street("Side Road"),
    );
}

fn group_instruction(group: u32) -> Instruction {
    if group % 2 == 1 {
        Instruction::TurnRight
    } else {
        Instruction::TurnLeft
    }
}

/// Instrumented segments over edges `0..groups.len()`, segment `i` in group
/// `groups[i]`. The last group approaches the destination.
pub fn straight_segments(net: &RoadNetwork, groups: &[u32]) -> Vec<Segment> {
    let last_group = groups.last().copied();
    groups
        .iter()
        .enumerate()
        .filter_map(|(i, &group)| {
            let instruction = if Some(group) == last_group {
                Instruction::ApproachingDestination
            } else {
                group_instruction(group)
            };
            net.segment(edge(i as u32), TravelDirection::WithLine, group, instruction)
        })
        .collect()
}

pub fn computed(segments: Vec<Segment>) -> ComputedRoute {
    ComputedRoute {
        total_length: segments.iter().map(|s| s.distance).sum(),
        total_time: segments.iter().map(|s| s.cross_time).sum(),
        segments,
        flags: RouteFlags::default(),
    }
}

/// Backend answering from queued results and recording what it was asked.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    pub connected: bool,
    pub local_results: VecDeque<Result<ComputedRoute, NavError>>,
    pub local_requests: Vec<RouteRequest>,
    pub async_requests: Vec<(RouteRequest, CompletionSender)>,
    pub cancelled: usize,
}

impl ScriptedBackend {
    pub fn local(results: Vec<Result<ComputedRoute, NavError>>) -> Self {
        Self {
            local_results: results.into(),
            ..Self::default()
        }
    }

    pub fn server() -> Self {
        Self {
            connected: true,
            ..Self::default()
        }
    }

    pub fn last_completion(&self) -> CompletionSender {
        self.async_requests
            .last()
            .map(|(_, sender)| sender.clone())
            .expect("no async request issued")
    }
}

impl RoutingBackend for ScriptedBackend {
    fn compute_route(&mut self, request: &RouteRequest) -> Result<ComputedRoute, NavError> {
        self.local_requests.push(request.clone());
        self.local_results.pop_front().unwrap_or(Err(NavError::NoRoute))
    }

    fn request_route_async(&mut self, request: RouteRequest, completion: CompletionSender) {
        self.async_requests.push((request, completion));
    }

    fn cancel_pending_request(&mut self) {
        self.cancelled += 1;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
