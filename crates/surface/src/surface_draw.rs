//! Draw-time resolution of front-buffer textures for the visible mesh.

use geo::GeoEnvelope;
use smallvec::SmallVec;
use surface_protocol::{
    SurfaceCompositor, TerrainTile, TerrainTileSource, TexturePlacement, TileTextureAllocator,
};
use tiles::{TileKey, envelope_for_tile_key, tile_key_for_envelope};
use tracing::debug;

use crate::SurfaceCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceDrawStats {
    /// Visible mesh tiles considered.
    pub tiles: usize,
    /// Composite draws emitted.
    pub draws: usize,
    /// Mesh tiles without an exact-resolution front texture.
    pub exact_misses: usize,
    /// Mesh tiles with no usable texture at any resolution.
    pub unresolved: usize,
}

impl<A: TileTextureAllocator> SurfaceCache<A> {
    /// Textures the current visible tile set from the front buffer:
    /// exact match, else nearest resident ancestor, then any resolved
    /// finer-resolution descendants as overlay draws. Read-only; never
    /// schedules work.
    pub fn draw<S, C>(&self, terrain: &S, compositor: &mut C) -> SurfaceDrawStats
    where
        S: TerrainTileSource,
        C: SurfaceCompositor<A::Texture>,
    {
        let mut stats = SurfaceDrawStats::default();
        if self.front.is_empty() {
            return stats;
        }

        let visible = terrain.visible_tiles();
        let mut draw_tiles = visible.tiles.clone();
        draw_tiles.sort_by_key(|tile| tile_key_for_envelope(&tile.bounds));

        for tile in &draw_tiles {
            stats.tiles += 1;
            let mesh_key = tile_key_for_envelope(&tile.bounds);

            let mut resolved_key = mesh_key;
            let mut resolved = self.front.contains_tile(resolved_key);
            while !resolved && resolved_key.level > 0 {
                resolved_key = resolved_key.zoom_out();
                resolved = self.front.contains_tile(resolved_key);
            }

            let mut draws_this_tile = 0usize;
            if resolved {
                self.composite_from(resolved_key, tile, compositor);
                stats.draws += 1;
                draws_this_tile += 1;
                if resolved_key == mesh_key {
                    continue;
                }
            }
            stats.exact_misses += 1;

            for key in self.collect_overlays(mesh_key, &tile.bounds) {
                self.composite_from(key, tile, compositor);
                stats.draws += 1;
                draws_this_tile += 1;
            }

            if draws_this_tile == 0 {
                stats.unresolved += 1;
            }
        }

        debug!(
            tiles = stats.tiles,
            draws = stats.draws,
            exact_misses = stats.exact_misses,
            unresolved = stats.unresolved,
            "surface draw"
        );
        stats
    }

    fn composite_from<C: SurfaceCompositor<A::Texture>>(
        &self,
        key: TileKey,
        mesh_tile: &TerrainTile,
        compositor: &mut C,
    ) {
        let texture = self
            .front
            .texture(key)
            .expect("resolved key must be resident");
        let edge = self
            .front
            .texture_edge(key)
            .expect("resolved key must be resident");
        let cell = envelope_for_tile_key(key);
        compositor.composite_tile(
            mesh_tile,
            texture,
            edge,
            &TexturePlacement::for_texture(&cell, edge),
        );
    }

    /// Resident descendants of `mesh_key` overlapping the mesh tile's
    /// interior, walked level by level over the sorted index and bounded
    /// by the deepest resident level.
    fn collect_overlays(
        &self,
        mesh_key: TileKey,
        mesh_bounds: &GeoEnvelope,
    ) -> SmallVec<[TileKey; 4]> {
        let mut overlays = SmallVec::new();
        let Some(max_level) = self.front.max_level() else {
            return overlays;
        };

        // one-texel inset keeps edge-adjacent cells from counting as overlap
        let texels = f64::from(self.front.tile_size());
        let mesh_inset = mesh_bounds.shrink(
            (mesh_bounds.max_x - mesh_bounds.min_x) / texels,
            (mesh_bounds.max_y - mesh_bounds.min_y) / texels,
        );

        let mut search = mesh_key;
        let mut limit = TileKey::new(mesh_key.level, mesh_key.column + 1, mesh_key.row + 1);
        while search.level < max_level {
            search = search.zoom_in();
            limit = limit.zoom_in();
            let range_end = TileKey::new(search.level, limit.column, 0);
            for key in self.front.resident_keys_between(search, range_end) {
                if key.row < search.row || key.row >= limit.row {
                    continue;
                }
                let cell = envelope_for_tile_key(key);
                let cell_inset = cell.shrink(
                    (cell.max_x - cell.min_x) / texels,
                    (cell.max_y - cell.min_y) / texels,
                );
                if cell_inset.intersects(&mesh_inset) {
                    overlays.push(key);
                }
            }
        }
        overlays
    }
}
