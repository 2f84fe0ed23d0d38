//! Simulated drive along a small road network, printing guidance events.
//!
//! Run with: cargo run --example simulated_drive

use std::time::{Duration, Instant};

use route_guidance::geo_utils::haversine_distance;
use route_guidance::map::RoadEdge;
use route_guidance::{
    CompletionSender, ComputedRoute, Destination, EdgeRef, Fix, GpsPoint, Instruction, NavError,
    NavEvent, NavigationConfig, Navigator, RoadNetwork, RouteFlags, RouteOutcome, RouteRequest,
    RoutingBackend,
    Segment, SegmentGeometry, TrackedLine, TravelDirection,
};

/// One road of the demo corridor.
struct Road {
    edge: EdgeRef,
    from: GpsPoint,
    to: GpsPoint,
    group: u32,
    instruction: Instruction,
}

/// Planner that only knows one corridor, plus a shortcut back onto it.
struct CorridorPlanner {
    corridor: Vec<Road>,
    shortcut: Road,
    rejoin: usize,
}

impl CorridorPlanner {
    fn segment(road: &Road) -> Segment {
        let distance = haversine_distance(&road.from, &road.to);
        Segment::new(road.edge, TravelDirection::WithLine, road.group, road.instruction)
            .with_metrics(distance, distance / 13.9)
            .with_geometry(SegmentGeometry::straight(road.from, road.to))
    }
}

impl RoutingBackend for CorridorPlanner {
    fn compute_route(&mut self, request: &RouteRequest) -> Result<ComputedRoute, NavError> {
        let segments: Vec<Segment> = if request.from.edge == self.shortcut.edge {
            std::iter::once(&self.shortcut)
                .chain(&self.corridor[self.rejoin..])
                .map(Self::segment)
                .collect()
        } else {
            let start = self
                .corridor
                .iter()
                .position(|road| road.edge == request.from.edge)
                .ok_or(NavError::NoRoute)?;
            self.corridor[start..].iter().map(Self::segment).collect()
        };

        Ok(ComputedRoute {
            total_length: segments.iter().map(|s| s.distance).sum(),
            total_time: segments.iter().map(|s| s.cross_time).sum(),
            segments,
            flags: RouteFlags::default(),
        })
    }

    fn request_route_async(&mut self, _request: RouteRequest, completion: CompletionSender) {
        completion.complete(RouteOutcome::ServerError("corridor planner is offline".into()));
    }

    fn is_connected(&self) -> bool {
        false
    }
}

fn lerp(a: GpsPoint, b: GpsPoint, t: f64) -> GpsPoint {
    GpsPoint::new(
        a.latitude + (b.latitude - a.latitude) * t,
        a.longitude + (b.longitude - a.longitude) * t,
    )
}

fn print_events(clock: u64, events: Vec<NavEvent>) {
    for event in events {
        match event {
            NavEvent::Progress(p) => println!(
                "[{:>3}s] segment {}  {:.0}m to turn  {:.0}m / {:.0}s to destination",
                clock, p.current_segment, p.distance_to_turn, p.distance_to_destination, p.eta_to_destination
            ),
            other => println!("[{:>3}s] {:?}", clock, other),
        }
    }
}

fn main() {
    // Westminster-ish: three blocks east, a left turn, two blocks north
    let nodes = [
        GpsPoint::new(51.5000, -0.1300),
        GpsPoint::new(51.5000, -0.1280),
        GpsPoint::new(51.5000, -0.1260),
        GpsPoint::new(51.5000, -0.1240),
        GpsPoint::new(51.5015, -0.1240),
        GpsPoint::new(51.5030, -0.1240),
    ];
    let streets = ["Abbey Road", "Abbey Road", "Abbey Road", "Bridge Street", "Bridge Street"];

    let mut network = RoadNetwork::new();
    let mut corridor = Vec::new();
    for i in 0..streets.len() {
        let edge = EdgeRef::new(10 + i as u32 / 2, i as u32);
        network.add_edge(
            edge,
            RoadEdge::new(i as u32, i as u32 + 1, vec![nodes[i], nodes[i + 1]]).street(streets[i]),
        );
        let (group, instruction) = if i < 3 {
            (1, Instruction::TurnLeft)
        } else {
            (2, Instruction::ApproachingDestination)
        };
        corridor.push(Road {
            edge,
            from: nodes[i],
            to: nodes[i + 1],
            group,
            instruction,
        });
    }

    // A wrong turn south at node 1, with a lane leading back to node 3
    let detour_point = GpsPoint::new(51.4990, -0.1270);
    let wrong_turn = EdgeRef::new(20, 0);
    network.add_edge(
        wrong_turn,
        RoadEdge::new(1, 100, vec![nodes[1], detour_point]).street("Mill Lane"),
    );
    let shortcut = Road {
        edge: wrong_turn,
        from: detour_point,
        to: nodes[3],
        group: 7,
        instruction: Instruction::TurnLeft,
    };

    let planner = CorridorPlanner {
        corridor,
        shortcut,
        rejoin: 3,
    };
    let mut nav = Navigator::new(NavigationConfig::default(), planner, network);
    let start = Instant::now();
    let at = |secs: u64| start + Duration::from_secs(secs);

    let on = |edge: EdgeRef, position: GpsPoint| {
        Fix::new(position, 13.9).on_line(TrackedLine::new(edge, TravelDirection::WithLine))
    };

    nav.on_fix(on(EdgeRef::new(10, 0), nodes[0]), at(0));
    match nav.start_navigation(Destination::new(nodes[5]), at(0)) {
        Ok(events) => print_events(0, events),
        Err(e) => {
            eprintln!("Could not start navigation: {}", e);
            return;
        }
    }

    let mut clock = 0;
    // First block, then the wrong turn
    for step in 1..=4 {
        clock += 3;
        let position = lerp(nodes[0], nodes[1], step as f64 / 4.0);
        print_events(clock, nav.on_fix(on(EdgeRef::new(10, 0), position), at(clock)));
    }
    for step in 1..=3 {
        clock += 30;
        let position = lerp(nodes[1], detour_point, step as f64 / 3.0);
        print_events(clock, nav.on_fix(on(wrong_turn, position), at(clock)));
    }

    // Back on the corridor, all the way to the destination
    for (i, edge) in [(3u32, EdgeRef::new(11, 3)), (4, EdgeRef::new(12, 4))] {
        for step in 1..=5 {
            clock += 3;
            let position = lerp(nodes[i as usize], nodes[i as usize + 1], step as f64 / 5.0);
            print_events(clock, nav.on_fix(on(edge, position), at(clock)));
            if !nav.is_navigating() {
                return;
            }
        }
    }
}
