//! Buffer swap and stale-tile eviction.

use surface_protocol::TileTextureAllocator;
use tiles::{TileKey, tile_key_for_envelope};
use tracing::debug;

use crate::SurfaceCache;
use crate::context::UpdateContext;

impl<A: TileTextureAllocator> SurfaceCache<A> {
    /// Merges newly rendered back-buffer tiles into the front buffer.
    ///
    /// With `full_resync` (uninterrupted pass completion) every front key
    /// absent from the resolve set is evicted; otherwise only
    /// finer-resolution front keys contained in a newly rendered key are.
    /// Either way the back buffer's resources move (never copy) into the
    /// front store and the pools are recycled for the next pass.
    pub(crate) fn sync_buffers(&mut self, context: &UpdateContext, full_resync: bool) {
        if self.back.is_empty() {
            return;
        }

        let back_keys: Vec<TileKey> = self.back.resident_keys().collect();
        let mut evicted = 0usize;

        if full_resync {
            let mut resolved: Vec<TileKey> = context
                .resolve_tiles
                .iter()
                .map(|tile| tile_key_for_envelope(&tile.bounds))
                .collect();
            resolved.sort_unstable();

            let stale: Vec<TileKey> = self
                .front
                .resident_keys()
                .filter(|key| resolved.binary_search(key).is_err())
                .collect();
            for key in stale {
                self.front.release_tile(key, false, &mut self.allocator);
                evicted += 1;
            }
        } else {
            for &back_key in &back_keys {
                evicted += self.evict_descendants_of(back_key);
            }
        }

        for &back_key in &back_keys {
            self.back
                .transfer_tile(back_key, &mut self.front, &mut self.allocator);
        }
        self.back.clear(&mut self.allocator);
        self.front.drain_pool_into(&mut self.back, &mut self.allocator);

        debug!(
            transferred = back_keys.len(),
            evicted, full_resync, "surface buffers synchronized"
        );
    }

    /// Evicts resident front keys strictly contained in `ancestor`'s cell
    /// at deeper levels: a coarser tile was just refreshed, so stale finer
    /// children must go. The walk is a sorted-range scan per level, bounded
    /// by the deepest resident level.
    fn evict_descendants_of(&mut self, ancestor: TileKey) -> usize {
        let Some(max_level) = self.front.max_level() else {
            return 0;
        };

        let mut stale = Vec::new();
        let mut search = ancestor;
        let mut limit = TileKey::new(ancestor.level, ancestor.column + 1, ancestor.row + 1);
        while search.level < max_level {
            search = search.zoom_in();
            limit = limit.zoom_in();
            let range_end = TileKey::new(search.level, limit.column, 0);
            for key in self.front.resident_keys_between(search, range_end) {
                if key.row >= search.row && key.row < limit.row {
                    stale.push(key);
                }
            }
        }

        for &key in &stale {
            self.front.release_tile(key, false, &mut self.allocator);
        }
        stale.len()
    }
}
