//! Pass construction and the budgeted tile-render pump.

use std::mem;
use std::sync::Arc;

use surface_protocol::{
    TerrainTileSource, TileRenderState, TileSceneRenderer, TileTextureAllocator,
};
use tiles::{MAX_MIP_BIAS, tile_key_for_envelope};
use tracing::{debug, trace};

use crate::SurfaceCache;
use crate::context::{PassPhase, ProgramCounter, ResolveList, UpdateContext};
use crate::dirty::DirtyFlags;
use crate::resolution::{resolution_adjustment_for_gsd, tile_render_resolution};

/// Result of one `update` pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceUpdateOutcome {
    /// No resolve pass is outstanding after this pump.
    pub completed: bool,
    /// Tiles rendered during this pump.
    pub tiles_rendered: usize,
    /// The caller should pump again promptly: the pass is still resolving,
    /// or new invalidations arrived while it ran.
    pub needs_refresh: bool,
}

impl<A: TileTextureAllocator> SurfaceCache<A> {
    /// Pumps one scheduling step under `budget_millis` of wall clock
    /// (zero means unlimited). Idempotent when nothing is dirty and the
    /// front buffer is populated.
    pub fn update<S, R>(
        &mut self,
        terrain: &mut S,
        renderer: &mut R,
        budget_millis: u64,
    ) -> SurfaceUpdateOutcome
    where
        S: TerrainTileSource,
        R: TileSceneRenderer<A::Texture>,
    {
        if self.paused {
            return SurfaceUpdateOutcome {
                completed: false,
                tiles_rendered: 0,
                needs_refresh: false,
            };
        }

        let mut context = match self.pass.take() {
            Some(mut context) => {
                self.apply_stream_upgrade(&mut context);
                context
            }
            None => match self.begin_pass(terrain) {
                Some(context) => context,
                None => {
                    return SurfaceUpdateOutcome {
                        completed: true,
                        tiles_rendered: 0,
                        needs_refresh: false,
                    };
                }
            },
        };

        if context.phase == PassPhase::Building {
            context.phase = PassPhase::ResolvingVisible;
        }
        context.frames += 1;

        let deadline = if budget_millis == 0 {
            None
        } else {
            Some(self.now_millis() + budget_millis)
        };

        let mut rendered = 0usize;
        let mut transfer = false;

        if context.phase == PassPhase::ResolvingVisible {
            // streaming refresh of the visible set is never time-sliced
            let visible_deadline = if context.stream { None } else { deadline };
            transfer |= self.update_tiles(
                &mut context,
                renderer,
                ResolveList::Visible,
                visible_deadline,
                false,
                &mut rendered,
            );
            if context.list_exhausted(ResolveList::Visible) {
                context.phase = PassPhase::ResolvingOffscreen;
            }
        }

        if context.phase == PassPhase::ResolvingOffscreen
            && !context.list_exhausted(ResolveList::Offscreen)
            && deadline.is_none_or(|limit| self.now_millis() < limit)
        {
            transfer |= self.update_tiles(
                &mut context,
                renderer,
                ResolveList::Offscreen,
                deadline,
                true,
                &mut rendered,
            );
        }

        let work_complete = context.is_render_pump_complete();
        if work_complete {
            context.phase = PassPhase::Publishing;
        }

        if transfer {
            // a completed, uninterrupted pass resolved the whole resolve
            // set, so stale front entries can be fully resynchronized
            let full_resync = work_complete && !context.interrupted();
            self.sync_buffers(&context, full_resync);
        }

        if work_complete {
            terrain.unlock_resolve_tiles(mem::take(&mut context.resolve_tiles));
            let needs_refresh = self.invalidation.is_dirty();
            debug!(
                pump = self.pump,
                frames = context.frames,
                interrupted = context.interrupted(),
                needs_refresh,
                "surface pass published"
            );
            SurfaceUpdateOutcome {
                completed: true,
                tiles_rendered: rendered,
                needs_refresh,
            }
        } else {
            self.pass = Some(context);
            SurfaceUpdateOutcome {
                completed: false,
                tiles_rendered: rendered,
                needs_refresh: true,
            }
        }
    }

    /// Starts a new pass if anything calls for one: empty front buffer,
    /// dirty flag or regions, elapsed refresh interval, or an unconfirmed
    /// visible set. Returns `None` when there is nothing to do.
    fn begin_pass<S: TerrainTileSource>(&mut self, terrain: &mut S) -> Option<UpdateContext> {
        let now = self.now_millis();
        let visible = terrain.visible_tiles();
        let front_empty = self.front.is_empty();

        let captured = self.invalidation.with_state(|state| {
            let mut dirty = state.flags.contains(DirtyFlags::SURFACE);
            dirty |= self.refresh_interval_millis != 0
                && now - self.last_refresh_millis > self.refresh_interval_millis;
            dirty |= !visible.confirmed;

            if !front_empty && state.regions.is_empty() && !dirty {
                return None;
            }

            let mut regions = Vec::new();
            // a globally dirty surface supersedes client regions this pass
            if !dirty {
                state.regions.capture_into(&mut regions);
            }
            state.regions.clear();
            let stream = state.flags.contains(DirtyFlags::STREAM);
            state.flags.remove(DirtyFlags::SURFACE | DirtyFlags::STREAM);
            Some((dirty, regions, stream))
        })??;
        let (dirty, mut regions, stream) = captured;

        let mut level0 = 0u32;
        for tile in &visible.tiles {
            level0 = level0.max(tile_key_for_envelope(&tile.bounds).level);
        }

        // a globally dirty surface makes every visible tile dirty
        if dirty {
            for tile in &visible.tiles {
                regions.push(tile.bounds);
            }
        }
        // an unpopulated front buffer makes everything dirty
        if front_empty {
            regions.push(geo::WORLD);
        }

        let mut context = UpdateContext {
            phase: PassPhase::Building,
            resolve_tiles: terrain.lock_resolve_tiles(),
            visible_indices: Vec::new(),
            offscreen_indices: Vec::new(),
            visible_counter: ProgramCounter::default(),
            offscreen_counter: ProgramCounter::default(),
            dirty_regions: regions,
            stream,
            level0,
            resolution_adjustment: resolution_adjustment_for_gsd(visible.ground_sample_distance),
            started_at_millis: now,
            frames: 0,
        };

        for (index, tile) in context.resolve_tiles.iter().enumerate() {
            let is_dirty = front_empty || context.dirty_regions_intersect(&tile.bounds);

            if is_dirty {
                context.visible_indices.push(index);
                context.level0 = context
                    .level0
                    .max(tile_key_for_envelope(&tile.bounds).level);
            } else if !self.front.contains_tile(tile_key_for_envelope(&tile.bounds)) {
                // resolved but missing from the front buffer; fill it in at
                // lower priority without treating it as visually stale
                context.offscreen_indices.push(index);
            }
        }

        self.last_refresh_millis = now;
        self.pump += 1;

        let stats = self.stats();
        debug!(
            pump = self.pump,
            resolve_tiles = context.resolve_tiles.len(),
            visible_dirty = context.visible_indices.len(),
            offscreen_dirty = context.offscreen_indices.len(),
            stream = context.stream,
            resident_bytes = stats.front.resident_bytes,
            pooled_bytes = stats.front.pooled_bytes + stats.back.pooled_bytes,
            "surface pass building"
        );

        Some(context)
    }

    /// A `streaming` mark arriving mid-pass restarts the visible counter
    /// with the stream flag set instead of waiting for the next pass.
    fn apply_stream_upgrade(&self, context: &mut UpdateContext) {
        if context.stream {
            return;
        }
        let upgraded = self
            .invalidation
            .with_state(|state| {
                if state.flags.contains(DirtyFlags::STREAM) {
                    state.flags.remove(DirtyFlags::STREAM);
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);
        if upgraded {
            context.stream = true;
            context.visible_counter = ProgramCounter::default();
            context.phase = PassPhase::ResolvingVisible;
        }
    }

    /// Advances one sub-list's program counter, rendering one back-buffer
    /// tile per step, until the list is exhausted, the deadline passes, or
    /// an interrupt lands. Returns whether rendered tiles are ready for
    /// transfer (list exhausted, or the pass has run long enough that
    /// finished work should publish incrementally).
    fn update_tiles<R: TileSceneRenderer<A::Texture>>(
        &mut self,
        context: &mut UpdateContext,
        renderer: &mut R,
        list: ResolveList,
        deadline: Option<u64>,
        allow_interrupt: bool,
        rendered: &mut usize,
    ) -> bool {
        let mut latest = context.started_at_millis;

        loop {
            let position = context.counter(list).position;
            if position >= context.indices(list).len() {
                break;
            }

            // checked up front so the multi-part flag below reflects it
            if allow_interrupt && self.invalidation.surface_flag_set() {
                context.counter(list).interrupted = true;
            }

            let tile = Arc::clone(&context.resolve_tiles[context.indices(list)[position]]);
            context.counter(list).position += 1;

            let key = tile_key_for_envelope(&tile.bounds);
            let mip_bias = (context.level0.saturating_sub(key.level) / 2).min(MAX_MIP_BIAS);

            match self.back.bind_tile(key, mip_bias, &mut self.allocator) {
                Some(texture_id) => {
                    self.version += 1;
                    let state = TileRenderState {
                        resolution: tile_render_resolution(
                            key.level,
                            tile.bounds.min_y,
                            tile.bounds.max_y,
                            context.resolution_adjustment,
                        ),
                        pump: self.pump,
                        version: self.version,
                        multi_part: !context.is_render_pump_complete(),
                    };
                    let target = self
                        .back
                        .texture_by_id(texture_id)
                        .expect("bound tile must be resident");
                    renderer.render_tile(target, &tile.bounds, &state);
                    *rendered += 1;
                }
                None => {
                    // no resource this frame; keep the region dirty so a
                    // later pass retries instead of silently dropping it
                    self.invalidation.mark_dirty_region(tile.bounds, false);
                    trace!(?key, "tile texture allocation failed, deferred");
                }
            }

            if deadline.is_some() {
                latest = self.now_millis();
            }
            if deadline.is_some_and(|limit| latest > limit) || context.counter(list).interrupted {
                break;
            }
        }

        // an interrupted list is abandoned; the follow-up pass redoes it
        if context.counter(list).interrupted {
            let total = context.indices(list).len();
            context.counter(list).position = total;
        }

        let exhausted = context.counter(list).position >= context.indices(list).len();
        exhausted
            || latest.saturating_sub(context.started_at_millis)
                > self.config.incremental_publish_millis
    }
}
