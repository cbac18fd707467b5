//! Dirty-region tracking.
//!
//! Regions marked stale accumulate into two envelope accumulators, one per
//! hemisphere, split at the antimeridian. Marking is the cache's only
//! cross-thread entry point, so the accumulators and the global flags live
//! behind one short-held mutex shared through a cloneable handle.

use std::sync::{Arc, Mutex};

use bitflags::bitflags;
use geo::GeoEnvelope;
use tracing::warn;

/// Beyond this many tracked sub-envelopes an accumulator degrades to
/// box-level tests only (still conservative, just coarser).
const MAX_TRACKED_PARTS: usize = 32;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DirtyFlags: u32 {
        /// The whole surface must be refreshed.
        const SURFACE = 1 << 0;
        /// The next visible resolve runs without a time slice.
        const STREAM = 1 << 1;
    }
}

#[derive(Debug, Default, Clone)]
struct EnvelopeAccumulator {
    bounds: Option<GeoEnvelope>,
    parts: Vec<GeoEnvelope>,
    saturated: bool,
}

impl EnvelopeAccumulator {
    fn merge(&mut self, region: GeoEnvelope) {
        match &mut self.bounds {
            Some(bounds) => bounds.expand_to_include(&region),
            None => self.bounds = Some(region),
        }
        if self.saturated {
            return;
        }
        if self.parts.len() >= MAX_TRACKED_PARTS {
            self.parts.clear();
            self.saturated = true;
        } else {
            self.parts.push(region);
        }
    }

    fn intersects(&self, region: &GeoEnvelope) -> bool {
        let Some(bounds) = &self.bounds else {
            return false;
        };
        if !bounds.intersects(region) {
            return false;
        }
        if self.saturated {
            return true;
        }
        self.parts.iter().any(|part| part.intersects(region))
    }

    fn is_empty(&self) -> bool {
        self.bounds.is_none()
    }

    fn len(&self) -> usize {
        if self.saturated { 1 } else { self.parts.len() }
    }

    fn capture_into(&self, out: &mut Vec<GeoEnvelope>) {
        if self.saturated {
            out.extend(self.bounds);
        } else {
            out.extend_from_slice(&self.parts);
        }
    }

    fn clear(&mut self) {
        self.bounds = None;
        self.parts.clear();
        self.saturated = false;
    }
}

/// Mergeable set of stale geographic regions. "Dirty" is a superset of what
/// must be refreshed: false positives cost extra work, false negatives are
/// not allowed.
#[derive(Debug, Default, Clone)]
pub struct DirtyRegionSet {
    west: EnvelopeAccumulator,
    east: EnvelopeAccumulator,
}

impl DirtyRegionSet {
    pub fn mark(&mut self, region: GeoEnvelope) {
        let (west, east) = region.split_at_antimeridian();
        if let Some(west) = west {
            self.west.merge(west);
        }
        if let Some(east) = east {
            self.east.merge(east);
        }
    }

    pub fn intersects(&self, region: &GeoEnvelope) -> bool {
        self.west.intersects(region) || self.east.intersects(region)
    }

    pub fn is_empty(&self) -> bool {
        self.west.is_empty() && self.east.is_empty()
    }

    pub fn len(&self) -> usize {
        self.west.len() + self.east.len()
    }

    pub fn clear(&mut self) {
        self.west.clear();
        self.east.clear();
    }

    pub fn capture_into(&self, out: &mut Vec<GeoEnvelope>) {
        self.west.capture_into(out);
        self.east.capture_into(out);
    }
}

#[derive(Debug, Default)]
pub(crate) struct DirtyState {
    pub flags: DirtyFlags,
    pub regions: DirtyRegionSet,
}

/// Cloneable handle for invalidating surface regions from any thread.
///
/// The lock is held only while mutating the accumulators and flags, never
/// during tile rendering or GPU resource work.
#[derive(Debug, Clone)]
pub struct SurfaceInvalidationHandle {
    shared: Arc<Mutex<DirtyState>>,
}

impl SurfaceInvalidationHandle {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(DirtyState::default())),
        }
    }

    /// Marks the entire surface dirty.
    pub fn mark_dirty(&self) {
        self.with_state(|state| {
            state.flags |= DirtyFlags::SURFACE;
        });
    }

    /// Merges `region` into the dirty set. With `streaming`, the next
    /// visible resolve ignores the frame budget so on-screen tiles refresh
    /// at full resolution immediately.
    pub fn mark_dirty_region(&self, region: GeoEnvelope, streaming: bool) {
        self.with_state(|state| {
            state.regions.mark(region);
            if streaming {
                state.flags |= DirtyFlags::STREAM;
            }
        });
    }

    pub fn is_dirty(&self) -> bool {
        self.with_state(|state| {
            state.flags.contains(DirtyFlags::SURFACE) || !state.regions.is_empty()
        })
        .unwrap_or(false)
    }

    /// Conservative overlap test against the accumulated dirty regions.
    pub fn intersects(&self, region: &GeoEnvelope) -> bool {
        self.with_state(|state| state.regions.intersects(region))
            .unwrap_or(false)
    }

    pub(crate) fn surface_flag_set(&self) -> bool {
        self.with_state(|state| state.flags.contains(DirtyFlags::SURFACE))
            .unwrap_or(false)
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut DirtyState) -> R) -> Option<R> {
        match self.shared.lock() {
            Ok(mut state) => Some(f(&mut state)),
            Err(_) => {
                warn!("dirty state lock poisoned; invalidation dropped");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DirtyFlags, DirtyRegionSet, MAX_TRACKED_PARTS, SurfaceInvalidationHandle};
    use geo::GeoEnvelope;

    #[test]
    fn empty_set_intersects_nothing() {
        let regions = DirtyRegionSet::default();
        assert!(regions.is_empty());
        assert!(!regions.intersects(&GeoEnvelope::new(-10.0, -10.0, 10.0, 10.0)));
    }

    #[test]
    fn marked_region_intersects_overlapping_queries_only() {
        let mut regions = DirtyRegionSet::default();
        regions.mark(GeoEnvelope::new(10.0, 10.0, 20.0, 20.0));

        assert!(regions.intersects(&GeoEnvelope::new(15.0, 15.0, 30.0, 30.0)));
        assert!(!regions.intersects(&GeoEnvelope::new(-40.0, -40.0, -30.0, -30.0)));
        assert_eq!(regions.len(), 1);
    }

    #[test]
    fn wrapping_region_lands_in_both_hemispheres() {
        let mut regions = DirtyRegionSet::default();
        regions.mark(GeoEnvelope::new(175.0, -5.0, -175.0, 5.0));

        assert!(regions.intersects(&GeoEnvelope::new(176.0, -1.0, 178.0, 1.0)));
        assert!(regions.intersects(&GeoEnvelope::new(-178.0, -1.0, -176.0, 1.0)));
        assert_eq!(regions.len(), 2);
    }

    #[test]
    fn accumulator_saturation_stays_conservative() {
        let mut regions = DirtyRegionSet::default();
        for i in 0..(MAX_TRACKED_PARTS + 4) {
            let offset = i as f64;
            regions.mark(GeoEnvelope::new(offset, 0.0, offset + 0.5, 0.5));
        }

        // box-level test still reports dirty, including gaps between parts
        assert!(regions.intersects(&GeoEnvelope::new(0.75, 0.1, 0.9, 0.2)));
        assert_eq!(regions.len(), 1);

        let mut captured = Vec::new();
        regions.capture_into(&mut captured);
        assert_eq!(captured.len(), 1);
    }

    #[test]
    fn precise_parts_reject_gap_queries() {
        let mut regions = DirtyRegionSet::default();
        regions.mark(GeoEnvelope::new(0.0, 0.0, 1.0, 1.0));
        regions.mark(GeoEnvelope::new(10.0, 10.0, 11.0, 11.0));

        // inside the merged bounds but between the parts
        assert!(!regions.intersects(&GeoEnvelope::new(5.0, 5.0, 6.0, 6.0)));
    }

    #[test]
    fn handle_accumulates_flags_and_regions() {
        let handle = SurfaceInvalidationHandle::new();
        assert!(!handle.is_dirty());

        handle.mark_dirty_region(GeoEnvelope::new(0.0, 0.0, 1.0, 1.0), true);
        assert!(handle.is_dirty());
        handle
            .with_state(|state| {
                assert!(state.flags.contains(DirtyFlags::STREAM));
                assert!(!state.flags.contains(DirtyFlags::SURFACE));
                assert_eq!(state.regions.len(), 1);
            })
            .unwrap();

        assert!(handle.intersects(&GeoEnvelope::new(0.5, 0.5, 2.0, 2.0)));
        assert!(!handle.intersects(&GeoEnvelope::new(50.0, 50.0, 60.0, 60.0)));

        handle.mark_dirty();
        assert!(handle.surface_flag_set());
    }

    #[test]
    fn handle_clones_share_state() {
        let handle = SurfaceInvalidationHandle::new();
        let clone = handle.clone();
        clone.mark_dirty();
        assert!(handle.surface_flag_set());
    }
}
