//! Sparse tile-texture store with pooling.
//!
//! Each store owns an arena of GPU texture resources addressed by stable
//! ids; a sorted `TileKey → id` index holds the resident mapping and a
//! free-id list holds pooled resources awaiting reuse. Resources move
//! between stores (front/back) and the pool only through the explicit
//! transfer/release operations here, never by implicit copy.

use std::collections::BTreeMap;

use slotmap::SlotMap;
use surface_protocol::TileTextureAllocator;

use crate::key::TileKey;
use crate::{DEFAULT_TILE_SIZE, MAX_MIP_BIAS};

slotmap::new_key_type! {
    /// Stable id of one texture resource within a store's arena.
    pub struct TileTextureId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileStoreConfig {
    /// Edge length of a full-resolution tile texture, in texels.
    pub tile_size: u32,
    /// Upper bound on pooled (unmapped but retained) resources.
    pub pool_capacity: usize,
}

impl Default for TileStoreConfig {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            pool_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TileStoreStats {
    pub resident_tiles: usize,
    /// Residents bound at reduced (mip-biased) resolution.
    pub shared_tiles: usize,
    pub pooled_tiles: usize,
    pub resident_bytes: u64,
    pub shared_bytes: u64,
    pub pooled_bytes: u64,
}

struct ResidentTexture<T> {
    texture: T,
    edge_texels: u32,
}

/// One buffer's worth of tile textures (the cache holds two: front and back).
pub struct TileStore<A: TileTextureAllocator> {
    config: TileStoreConfig,
    arena: SlotMap<TileTextureId, ResidentTexture<A::Texture>>,
    index: BTreeMap<TileKey, TileTextureId>,
    pool: Vec<TileTextureId>,
}

impl<A: TileTextureAllocator> TileStore<A> {
    pub fn new(config: TileStoreConfig) -> Self {
        assert!(
            config.tile_size.is_power_of_two(),
            "tile size must be a power of two"
        );
        assert!(
            config.tile_size >> MAX_MIP_BIAS >= 1,
            "tile size must survive the deepest mip bias"
        );
        Self {
            config,
            arena: SlotMap::with_key(),
            index: BTreeMap::new(),
            pool: Vec::new(),
        }
    }

    pub fn config(&self) -> TileStoreConfig {
        self.config
    }

    pub fn tile_size(&self) -> u32 {
        self.config.tile_size
    }

    pub fn resident_tiles(&self) -> usize {
        self.index.len()
    }

    pub fn pooled_tiles(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains_tile(&self, key: TileKey) -> bool {
        self.index.contains_key(&key)
    }

    pub fn tile_id(&self, key: TileKey) -> Option<TileTextureId> {
        self.index.get(&key).copied()
    }

    pub fn texture(&self, key: TileKey) -> Option<&A::Texture> {
        self.index.get(&key).map(|id| &self.arena[*id].texture)
    }

    pub fn texture_by_id(&self, id: TileTextureId) -> Option<&A::Texture> {
        self.arena.get(id).map(|resident| &resident.texture)
    }

    pub fn texture_edge(&self, key: TileKey) -> Option<u32> {
        self.index.get(&key).map(|id| self.arena[*id].edge_texels)
    }

    /// Resident keys in `(level, column, row)` order.
    pub fn resident_keys(&self) -> impl Iterator<Item = TileKey> + '_ {
        self.index.keys().copied()
    }

    /// Resident keys in `start..limit` of the sorted index.
    pub fn resident_keys_between(
        &self,
        start: TileKey,
        limit: TileKey,
    ) -> impl Iterator<Item = TileKey> + '_ {
        self.index.range(start..limit).map(|(key, _)| *key)
    }

    /// Deepest level with a resident tile; bounds descendant walks.
    pub fn max_level(&self) -> Option<u32> {
        self.index.keys().next_back().map(|key| key.level)
    }

    pub fn edge_for_bias(&self, mip_bias: u32) -> u32 {
        self.config.tile_size >> mip_bias.min(MAX_MIP_BIAS)
    }

    /// Returns the resource recorded under `key`, binding one if absent:
    /// pool reuse for full-size bindings, fresh allocation otherwise.
    /// `None` means allocation failed and the tile is unavailable this
    /// frame. A resident resource of a different size is retired first.
    pub fn bind_tile(
        &mut self,
        key: TileKey,
        mip_bias: u32,
        allocator: &mut A,
    ) -> Option<TileTextureId> {
        let edge_texels = self.edge_for_bias(mip_bias);
        if let Some(&id) = self.index.get(&key) {
            if self.arena[id].edge_texels == edge_texels {
                return Some(id);
            }
            self.release_tile(key, true, allocator);
        }

        let id = if edge_texels == self.config.tile_size {
            match self.pool.pop() {
                Some(pooled) => Some(pooled),
                None => self.allocate(edge_texels, allocator),
            }
        } else {
            self.allocate(edge_texels, allocator)
        }?;

        self.index.insert(key, id);
        Some(id)
    }

    /// Removes the mapping under `key`. With `to_pool`, a full-size
    /// resource is retained for reuse (up to pool capacity); anything else
    /// is destroyed. Returns whether the key was resident.
    pub fn release_tile(&mut self, key: TileKey, to_pool: bool, allocator: &mut A) -> bool {
        let Some(id) = self.index.remove(&key) else {
            return false;
        };
        self.retire(id, to_pool, allocator);
        true
    }

    /// Moves the resource under `key` into `dest` (ownership transfer, not
    /// copy). An existing `dest` resident under the same key is retired to
    /// the destination pool first. Returns whether the key was resident.
    pub fn transfer_tile(&mut self, key: TileKey, dest: &mut Self, allocator: &mut A) -> bool {
        let Some(id) = self.index.remove(&key) else {
            return false;
        };
        let resident = self
            .arena
            .remove(id)
            .expect("indexed id must be resident in arena");
        if let Some(existing) = dest.index.remove(&key) {
            dest.retire(existing, true, allocator);
        }
        let dest_id = dest.arena.insert(resident);
        dest.index.insert(key, dest_id);
        true
    }

    /// Unmaps every resident, pooling full-size resources up to capacity
    /// and destroying the remainder.
    pub fn clear(&mut self, allocator: &mut A) {
        let keys: Vec<TileKey> = self.index.keys().copied().collect();
        for key in keys {
            self.release_tile(key, true, allocator);
        }
    }

    /// Moves every pooled resource into `dest`'s pool, up to its capacity;
    /// overflow is destroyed. Lets the buffer being refilled reuse
    /// resources retired by the displayed one.
    pub fn drain_pool_into(&mut self, dest: &mut Self, allocator: &mut A) {
        while let Some(id) = self.pool.pop() {
            let resident = self
                .arena
                .remove(id)
                .expect("pooled id must be resident in arena");
            if dest.pool.len() < dest.config.pool_capacity {
                let dest_id = dest.arena.insert(resident);
                dest.pool.push(dest_id);
            } else {
                allocator.destroy_texture(resident.texture);
            }
        }
    }

    /// Destroys every resident and pooled resource. Used at teardown.
    pub fn release(&mut self, allocator: &mut A) {
        self.index.clear();
        self.pool.clear();
        for (_, resident) in self.arena.drain() {
            allocator.destroy_texture(resident.texture);
        }
    }

    pub fn stats(&self, allocator: &A) -> TileStoreStats {
        let mut stats = TileStoreStats::default();
        for id in self.index.values() {
            let edge_texels = self.arena[*id].edge_texels;
            let bytes = allocator.texture_bytes(edge_texels);
            stats.resident_tiles += 1;
            stats.resident_bytes += bytes;
            if edge_texels != self.config.tile_size {
                stats.shared_tiles += 1;
                stats.shared_bytes += bytes;
            }
        }
        for id in &self.pool {
            stats.pooled_tiles += 1;
            stats.pooled_bytes += allocator.texture_bytes(self.arena[*id].edge_texels);
        }
        stats
    }

    fn allocate(&mut self, edge_texels: u32, allocator: &mut A) -> Option<TileTextureId> {
        let texture = allocator.create_texture(edge_texels)?;
        Some(self.arena.insert(ResidentTexture {
            texture,
            edge_texels,
        }))
    }

    fn retire(&mut self, id: TileTextureId, to_pool: bool, allocator: &mut A) {
        let full_size = self.arena[id].edge_texels == self.config.tile_size;
        if to_pool && full_size && self.pool.len() < self.config.pool_capacity {
            self.pool.push(id);
            return;
        }
        let resident = self
            .arena
            .remove(id)
            .expect("retired id must be resident in arena");
        allocator.destroy_texture(resident.texture);
    }
}
