//! Navigation tuning parameters.

use std::time::Duration;

/// Configuration for route tracking, rerouting and guidance.
///
/// The distance and lead constants are empirically tuned; they are exposed
/// here so hosts can adjust them per platform.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NavigationConfig {
    /// Announcement distances before a turn, far to near, in meters.
    /// Default: [800.0, 200.0, 40.0]
    pub announce_distances: [f64; 3],

    /// Speed-dependent lead per announcement tier, in seconds: the tier fires at
    /// `distance + speed * lead`. Default: [2.0, 2.0, 1.0]
    pub announce_lead_seconds: [f64; 3],

    /// Base arrival distance in meters. Default: 20.0
    pub arrival_base_distance: f64,

    /// Arrival distance added per m/s of speed, in seconds. Default: 1.0
    pub arrival_speed_factor: f64,

    /// Minimum interval between local ETA refreshes. Default: 60s
    pub eta_refresh_interval: Duration,

    /// Accumulated ETA change that triggers a notification, in seconds.
    /// Default: 180.0
    pub eta_change_threshold: f64,

    /// Minimum time between two recalculation starts. Default: 60s
    pub reroute_cooldown: Duration,

    /// How long after first going off-route a server-managed session may still
    /// ask for a short reroute. Default: 60s
    pub short_reroute_grace: Duration,

    /// Upcoming instrumented segments searched for the tracked line before
    /// declaring the vehicle off-route. Default: 10
    pub sync_lookahead: usize,

    /// Distance ahead of the vehicle for which map tiles are prefetched, in
    /// meters. Default: 10000.0
    pub prefetch_distance: f64,

    /// Maximum number of segments in a short-reroute detour. Default: 256
    pub max_detour_segments: usize,

    /// Search radius when snapping the vehicle to a road, in meters.
    /// Default: 200.0
    pub origin_snap_distance: f64,

    /// Search radius when snapping the destination to a road, in meters.
    /// Default: 50.0
    pub destination_snap_distance: f64,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            announce_distances: [800.0, 200.0, 40.0],
            announce_lead_seconds: [2.0, 2.0, 1.0],
            arrival_base_distance: 20.0,
            arrival_speed_factor: 1.0,
            eta_refresh_interval: Duration::from_secs(60),
            eta_change_threshold: 180.0,
            reroute_cooldown: Duration::from_secs(60),
            short_reroute_grace: Duration::from_secs(60),
            sync_lookahead: 10,
            prefetch_distance: 10_000.0,
            max_detour_segments: 256,
            origin_snap_distance: 200.0,
            destination_snap_distance: 50.0,
        }
    }
}

impl NavigationConfig {
    /// Distance at which the vehicle counts as arrived, given its speed in m/s.
    pub fn arrival_distance(&self, speed_mps: f64) -> f64 {
        self.arrival_base_distance + speed_mps.max(0.0) * self.arrival_speed_factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arrival_distance_scales_with_speed() {
        let config = NavigationConfig::default();
        assert_eq!(config.arrival_distance(0.0), 20.0);
        assert_eq!(config.arrival_distance(5.0), 25.0);
        assert_eq!(config.arrival_distance(-3.0), 20.0);
    }

    #[test]
    fn test_announce_tiers_descend() {
        let config = NavigationConfig::default();
        assert!(config.announce_distances.windows(2).all(|w| w[0] > w[1]));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_partial_json_uses_defaults() {
        let config: NavigationConfig =
            serde_json::from_str(r#"{ "arrival_base_distance": 35.0, "sync_lookahead": 4 }"#).unwrap();
        assert_eq!(config.arrival_base_distance, 35.0);
        assert_eq!(config.sync_lookahead, 4);
        assert_eq!(config.eta_refresh_interval, Duration::from_secs(60));

        let json = serde_json::to_string(&config).unwrap();
        let back: NavigationConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
