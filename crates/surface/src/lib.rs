//! Incremental surface tile-texture cache.
//!
//! This crate owns the double-buffered tile cache that drapes rendered map
//! imagery over the terrain mesh: dirty-region tracking, the frame-budgeted
//! update scheduler, buffer swap with stale-tile eviction, and draw-time
//! ancestor/descendant resolution.
//!
//! Internal architecture overview:
//! - `dirty`: cross-thread invalidation state (regions, flags, handle).
//! - `context`: per-pass program counters and phase machine.
//! - `surface_update`: builds passes and pumps tile renders under budget.
//! - `surface_sync`: publishes the back buffer with eviction policies.
//! - `surface_draw`: resolves front-buffer textures for the visible mesh.
//! - `resolution`: per-tile render resolution math.

use surface_protocol::{MonotonicClock, TileTextureAllocator};
use tiles::{TileStore, TileStoreConfig, TileStoreStats};

mod context;
mod dirty;
mod resolution;
mod surface_draw;
mod surface_sync;
mod surface_update;


pub use dirty::{DirtyFlags, DirtyRegionSet, SurfaceInvalidationHandle};
pub use surface_draw::SurfaceDrawStats;
pub use surface_update::SurfaceUpdateOutcome;

use context::UpdateContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceCacheConfig {
    pub store: TileStoreConfig,
    /// A publish older than this re-marks the surface dirty; zero disables
    /// interval-driven refresh.
    pub refresh_interval_millis: u64,
    /// A pass running longer than this publishes finished tiles
    /// incrementally instead of holding them to the pass boundary.
    pub incremental_publish_millis: u64,
}

impl Default for SurfaceCacheConfig {
    fn default() -> Self {
        Self {
            store: TileStoreConfig::default(),
            refresh_interval_millis: 3000,
            incremental_publish_millis: 250,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceCacheStats {
    pub front: TileStoreStats,
    pub back: TileStoreStats,
}

/// The incremental tile-texture cache.
///
/// All methods except the invalidation handle's marks run on the render
/// thread; `update` cooperates with the frame budget by returning rather
/// than blocking, and `draw` is read-only.
pub struct SurfaceCache<A: TileTextureAllocator> {
    config: SurfaceCacheConfig,
    allocator: A,
    clock: Box<dyn MonotonicClock>,
    front: TileStore<A>,
    back: TileStore<A>,
    invalidation: SurfaceInvalidationHandle,
    pass: Option<UpdateContext>,
    paused: bool,
    refresh_interval_millis: u64,
    last_refresh_millis: u64,
    /// Resolve-pass counter; identifies which pump rendered a tile.
    pump: u64,
    /// Monotonic per-tile render version.
    version: u64,
}

impl<A: TileTextureAllocator> SurfaceCache<A> {
    pub fn new(config: SurfaceCacheConfig, allocator: A, clock: Box<dyn MonotonicClock>) -> Self {
        let last_refresh_millis = clock.now_millis();
        Self {
            config,
            allocator,
            clock,
            front: TileStore::new(config.store),
            back: TileStore::new(config.store),
            invalidation: SurfaceInvalidationHandle::new(),
            pass: None,
            paused: false,
            refresh_interval_millis: config.refresh_interval_millis,
            last_refresh_millis,
            pump: 0,
            version: 0,
        }
    }

    pub fn config(&self) -> SurfaceCacheConfig {
        self.config
    }

    /// Cloneable cross-thread handle for marking regions stale.
    pub fn invalidation_handle(&self) -> SurfaceInvalidationHandle {
        self.invalidation.clone()
    }

    /// Marks the entire surface dirty.
    pub fn mark_dirty(&self) {
        self.invalidation.mark_dirty();
    }

    /// Merges `region` into the dirty set; see
    /// [`SurfaceInvalidationHandle::mark_dirty_region`].
    pub fn mark_dirty_region(&self, region: geo::GeoEnvelope, streaming: bool) {
        self.invalidation.mark_dirty_region(region, streaming);
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_minimum_refresh_interval(&mut self, millis: u64) {
        self.refresh_interval_millis = millis;
    }

    pub fn minimum_refresh_interval(&self) -> u64 {
        self.refresh_interval_millis
    }

    /// True when no resolve work is outstanding for the current pass.
    pub fn is_render_pump_complete(&self) -> bool {
        match &self.pass {
            Some(context) => context.is_render_pump_complete(),
            None => true,
        }
    }

    /// The currently displayed tile store.
    pub fn front(&self) -> &TileStore<A> {
        &self.front
    }

    pub fn stats(&self) -> SurfaceCacheStats {
        SurfaceCacheStats {
            front: self.front.stats(&self.allocator),
            back: self.back.stats(&self.allocator),
        }
    }

    /// Destroys every GPU resource in both buffers and their pools.
    /// Used at teardown.
    pub fn release(&mut self) {
        self.front.release(&mut self.allocator);
        self.back.release(&mut self.allocator);
    }

    fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }
}
