//! Per-pass update state.
//!
//! One `UpdateContext` lives for the duration of a resolve pass, possibly
//! spanning several frames. Idle is the absence of a context; the phase
//! enum covers every other scheduler state, so there is no partial state
//! to reset when a pass ends.

use std::sync::Arc;

use geo::GeoEnvelope;
use surface_protocol::TerrainTile;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ProgramCounter {
    pub position: usize,
    pub interrupted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PassPhase {
    Building,
    ResolvingVisible,
    ResolvingOffscreen,
    Publishing,
}

/// Which resolve sub-list a counter advance applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResolveList {
    Visible,
    Offscreen,
}

pub(crate) struct UpdateContext {
    pub phase: PassPhase,
    /// Tiles borrowed from the terrain provider for the lifetime of the
    /// pass; returned on publish.
    pub resolve_tiles: Vec<Arc<TerrainTile>>,
    pub visible_indices: Vec<usize>,
    pub offscreen_indices: Vec<usize>,
    pub visible_counter: ProgramCounter,
    pub offscreen_counter: ProgramCounter,
    /// Regions consumed by this pass; queried during classification.
    pub dirty_regions: Vec<GeoEnvelope>,
    pub stream: bool,
    /// Deepest quad-tree level among visible and dirty tiles; the mip-bias
    /// reference point.
    pub level0: u32,
    pub resolution_adjustment: f64,
    pub started_at_millis: u64,
    pub frames: u64,
}

impl UpdateContext {
    pub fn counter(&mut self, list: ResolveList) -> &mut ProgramCounter {
        match list {
            ResolveList::Visible => &mut self.visible_counter,
            ResolveList::Offscreen => &mut self.offscreen_counter,
        }
    }

    pub fn indices(&self, list: ResolveList) -> &[usize] {
        match list {
            ResolveList::Visible => &self.visible_indices,
            ResolveList::Offscreen => &self.offscreen_indices,
        }
    }

    pub fn list_exhausted(&self, list: ResolveList) -> bool {
        match list {
            ResolveList::Visible => {
                self.visible_counter.position >= self.visible_indices.len()
                    || self.visible_counter.interrupted
            }
            ResolveList::Offscreen => {
                self.offscreen_counter.position >= self.offscreen_indices.len()
                    || self.offscreen_counter.interrupted
            }
        }
    }

    pub fn is_render_pump_complete(&self) -> bool {
        self.list_exhausted(ResolveList::Visible) && self.list_exhausted(ResolveList::Offscreen)
    }

    pub fn interrupted(&self) -> bool {
        self.visible_counter.interrupted || self.offscreen_counter.interrupted
    }

    pub fn dirty_regions_intersect(&self, bounds: &GeoEnvelope) -> bool {
        self.dirty_regions
            .iter()
            .any(|region| region.intersects(bounds))
    }
}
