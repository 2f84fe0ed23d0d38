//! Display-only route geometry.
//!
//! Never used for guidance. Before a full server reroute the current outline
//! is kept so the map can keep drawing it until the new route arrives.

use crate::{Bounds, GpsPoint};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outline {
    points: Vec<GpsPoint>,
    preserved: Vec<GpsPoint>,
    alternative: Option<(u32, Vec<GpsPoint>)>,
}

impl Outline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything with the outline of a newly installed route.
    pub fn set_route(&mut self, points: Vec<GpsPoint>) {
        self.points = points;
        self.preserved.clear();
        self.alternative = None;
    }

    /// Keep the current outline on display while a full reroute is pending.
    pub fn preserve(&mut self) {
        if !self.points.is_empty() {
            self.preserved = std::mem::take(&mut self.points);
        }
    }

    pub fn set_alternative(&mut self, alt_id: u32, points: Vec<GpsPoint>) {
        self.alternative = Some((alt_id, points));
    }

    /// Points to draw: the route outline, or the preserved one while rerouting.
    pub fn points(&self) -> &[GpsPoint] {
        if self.points.is_empty() {
            &self.preserved
        } else {
            &self.points
        }
    }

    pub fn is_preserved(&self) -> bool {
        self.points.is_empty() && !self.preserved.is_empty()
    }

    pub fn alternative(&self) -> Option<(u32, &[GpsPoint])> {
        self.alternative
            .as_ref()
            .map(|(id, points)| (*id, points.as_slice()))
    }

    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::from_points(self.points())
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> Vec<GpsPoint> {
        vec![GpsPoint::new(0.0, 0.0), GpsPoint::new(0.0, 0.01)]
    }

    #[test]
    fn test_preserved_until_new_route() {
        let mut outline = Outline::new();
        outline.set_route(line());
        outline.preserve();
        assert!(outline.is_preserved());
        assert_eq!(outline.points(), line().as_slice());

        outline.set_route(vec![GpsPoint::new(1.0, 1.0), GpsPoint::new(1.0, 1.1)]);
        assert!(!outline.is_preserved());
        assert_eq!(outline.points()[0], GpsPoint::new(1.0, 1.0));
    }

    #[test]
    fn test_alternative_freed_on_new_route() {
        let mut outline = Outline::new();
        outline.set_alternative(2, line());
        assert_eq!(outline.alternative().map(|(id, _)| id), Some(2));

        outline.set_route(line());
        assert!(outline.alternative().is_none());
        assert!(outline.bounds().is_some());
    }
}
