//! Navigation error types.

use thiserror::Error;

/// Errors surfaced by navigation operations.
///
/// Errors are also carried inside [`NavEvent`](crate::NavEvent)s, so the type
/// is `Clone` and comparable.
#[derive(Debug, Clone, PartialEq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NavError {
    /// No GPS fix has been received yet.
    #[error("Current position is unknown")]
    NoPosition,

    /// The vehicle position could not be matched to any road.
    #[error("Can't find a road near departure point ({distance_m:.0}m search radius)")]
    NoRoadNearOrigin { distance_m: f64 },

    /// The backend found no route between origin and destination.
    #[error("Can't find a route")]
    NoRoute,

    /// The remote planner reported an error.
    #[error("Route server error: {0}")]
    ServerError(String),

    /// The backend returned a route that contradicts the request or itself.
    #[error("The service failed to provide a valid route: {0}")]
    Inconsistent(String),

    /// A detour does not fit the route it should be spliced into.
    #[error("Invalid detour: {detour_size} segments ending at {detour_end} over {base_count} base segments")]
    InvalidDetour {
        detour_size: usize,
        detour_end: usize,
        base_count: usize,
    },

    /// A detour exceeds the configured bound.
    #[error("Detour too large: {size} segments (max: {max})")]
    DetourTooLarge { size: usize, max: usize },

    /// Segment storage could not be allocated.
    #[error("Failed to allocate storage for {count} segments")]
    Allocation { count: usize },

    /// The operation needs an active navigation session.
    #[error("No navigation in progress")]
    NotNavigating,
}

impl NavError {
    /// Whether the error ends the navigation session rather than being retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, NavError::Allocation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(NavError::NoRoute.to_string(), "Can't find a route");
        assert_eq!(
            NavError::DetourTooLarge { size: 300, max: 256 }.to_string(),
            "Detour too large: 300 segments (max: 256)"
        );
    }

    #[test]
    fn test_only_allocation_is_fatal() {
        assert!(NavError::Allocation { count: 10 }.is_fatal());
        assert!(!NavError::ServerError("timeout".into()).is_fatal());
        assert!(!NavError::NoRoute.is_fatal());
    }
}
