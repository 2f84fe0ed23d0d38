//! # Detour Overlay
//!
//! A short reroute only supplies a new prefix (the detour) while the rest of
//! the already-computed route is reused. [`RouteSegments`] presents the detour
//! followed by the reused tail of the base array as one logical sequence,
//! without copying or reallocating the base.
//!
//! With `detour_size` detour segments reconnecting at base index `detour_end`:
//!
//! ```text
//! logical:  [ d0 d1 ... d(size-1) | base[detour_end] ... base[count-1] ]
//! len     = base_count - detour_end + detour_size
//! ```
//!
//! Invariant: `0 <= detour_size <= detour_end <= base_count`.

use crate::error::NavError;
use crate::segment::{Instrumentation, Segment, SegmentList};

/// Detour-aware view over a route's segments.
#[derive(Debug, Clone, Default)]
pub struct RouteSegments {
    base: SegmentList,
    detour: Vec<Segment>,
    detour_end: usize,
}

impl RouteSegments {
    pub fn new(base: SegmentList) -> Self {
        Self {
            base,
            detour: Vec::new(),
            detour_end: 0,
        }
    }

    /// Number of segments in the logical sequence.
    pub fn len(&self) -> usize {
        self.base.len() - self.detour_end + self.detour.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn detour_size(&self) -> usize {
        self.detour.len()
    }

    pub fn detour_end(&self) -> usize {
        self.detour_end
    }

    pub fn base(&self) -> &SegmentList {
        &self.base
    }

    /// Whether logical index `index` falls inside the detour.
    pub fn is_detour_index(&self, index: usize) -> bool {
        index < self.detour.len()
    }

    /// Base-array index for a logical index, or `None` inside the detour.
    pub fn base_index(&self, index: usize) -> Option<usize> {
        if index < self.detour.len() {
            None
        } else {
            Some(index - self.detour.len() + self.detour_end)
        }
    }

    /// Segment at logical index `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len()`.
    pub fn get(&self, index: usize) -> &Segment {
        match self.base_index(index) {
            None => &self.detour[index],
            Some(base) => self.base.get(base),
        }
    }

    pub fn try_get(&self, index: usize) -> Option<&Segment> {
        if index >= self.len() {
            return None;
        }
        Some(self.get(index))
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> &mut Segment {
        match self.base_index(index) {
            None => &mut self.detour[index],
            Some(base) => &mut self.base.as_mut_slice()[base],
        }
    }

    /// Iterate over the logical sequence.
    pub fn iter(&self) -> impl Iterator<Item = &Segment> + '_ {
        self.detour
            .iter()
            .chain(self.base.iter().skip(self.detour_end))
    }

    /// Whether every segment of the logical sequence is instrumented.
    pub fn all_instrumented(&self) -> bool {
        self.detour.iter().all(|s| s.is_instrumented())
            && self.base.iter().skip(self.detour_end).all(|s| s.is_instrumented())
    }

    /// Splice a detour in front of the last `reused_tail` base segments.
    ///
    /// The base array and anything derived from it (prefetch state,
    /// instrumentation) is left untouched.
    pub fn install_detour(
        &mut self,
        prefix: Vec<Segment>,
        reused_tail: usize,
        max_size: usize,
    ) -> Result<(), NavError> {
        let base_count = self.base.len();
        let detour_size = prefix.len();

        if detour_size > max_size {
            return Err(NavError::DetourTooLarge {
                size: detour_size,
                max: max_size,
            });
        }

        let detour_end = base_count.checked_sub(reused_tail).ok_or(NavError::InvalidDetour {
            detour_size,
            detour_end: 0,
            base_count,
        })?;
        if detour_size > detour_end || detour_size + reused_tail == 0 {
            return Err(NavError::InvalidDetour {
                detour_size,
                detour_end,
                base_count,
            });
        }

        let mut detour = Vec::new();
        detour
            .try_reserve_exact(detour_size)
            .map_err(|_| NavError::Allocation { count: detour_size })?;
        detour.extend(prefix);

        self.detour = detour;
        self.detour_end = detour_end;
        Ok(())
    }

    /// Drop the detour; the logical sequence becomes the base again.
    pub fn clear_detour(&mut self) {
        self.detour.clear();
        self.detour_end = 0;
    }

    /// Replace the whole route, discarding any detour.
    pub fn replace_base(&mut self, base: SegmentList) {
        self.base = base;
        self.clear_detour();
    }

    /// Apply late instrumentation to a base-array segment.
    pub fn instrument_base(&mut self, base_index: usize, update: Instrumentation) -> bool {
        self.base.instrument(base_index, update)
    }

    /// Apply late instrumentation to a detour segment.
    pub fn instrument_detour(&mut self, detour_index: usize, update: Instrumentation) -> bool {
        match self.detour.get_mut(detour_index) {
            Some(segment) => segment.instrument(update),
            None => false,
        }
    }
}
