//! Collaborator seams for the surface tile cache.
//!
//! This crate defines the traits and plain data types that cross the
//! boundary between the cache and its collaborators: the terrain/mesh
//! provider, the per-tile scene renderer, the GPU texture allocator, the
//! draw-time compositor, and the clock.

use std::sync::Arc;
use std::time::Instant;

use geo::GeoEnvelope;

/// One terrain mesh tile as supplied by the terrain provider.
///
/// The cache treats these as read-only; `bounds` is the tile's WGS84
/// axis-aligned bounding box.
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainTile {
    pub bounds: GeoEnvelope,
}

/// The tiles actually on screen this frame, plus the scene state the
/// scheduler derives its resolution adjustment from.
#[derive(Debug, Clone)]
pub struct VisibleTileSet {
    pub tiles: Vec<Arc<TerrainTile>>,
    /// False while the terrain subsystem is still converging on a tile
    /// selection; an unconfirmed set forces a refresh pass.
    pub confirmed: bool,
    /// Current scene ground sample distance, meters per pixel.
    pub ground_sample_distance: f64,
}

/// Supplies the candidate tile set to resolve against.
///
/// `lock_resolve_tiles`/`unlock_resolve_tiles` bound a read-only borrow
/// that may span several frames; the provider must not mutate tiles
/// referenced by an outstanding borrow. Violating that contract is
/// undefined behavior for the cache, not a runtime-checked error.
pub trait TerrainTileSource {
    fn lock_resolve_tiles(&mut self) -> Vec<Arc<TerrainTile>>;
    fn unlock_resolve_tiles(&mut self, tiles: Vec<Arc<TerrainTile>>);
    fn visible_tiles(&self) -> VisibleTileSet;
}

/// Per-tile render parameters handed to the scene renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileRenderState {
    /// Target resolution for the tile's content, meters per pixel.
    pub resolution: f64,
    /// Identifier of the resolve pass this render belongs to.
    pub pump: u64,
    /// Monotonically increasing per-tile render version.
    pub version: u64,
    /// True when the pass is still incomplete and more tiles from the same
    /// pass will follow in later frames.
    pub multi_part: bool,
}

/// Paints one tile's pixels into the bound target texture.
///
/// Synchronous; returns when the tile is fully painted. The cache never
/// suspends mid-tile.
pub trait TileSceneRenderer<Texture> {
    fn render_tile(&mut self, target: &Texture, bounds: &GeoEnvelope, state: &TileRenderState);
}

/// Creates and destroys the fixed-size 2D texture resources tiles are
/// rendered into. Resources are fungible at a given edge size; the cache
/// never inspects their representation.
pub trait TileTextureAllocator {
    type Texture;

    /// Returns `None` on allocation failure; the caller treats the tile as
    /// unavailable this frame and retries on a later pass.
    fn create_texture(&mut self, edge_texels: u32) -> Option<Self::Texture>;

    fn destroy_texture(&mut self, texture: Self::Texture);

    /// GPU byte footprint of one texture at the given edge size.
    fn texture_bytes(&self, edge_texels: u32) -> u64 {
        u64::from(edge_texels) * u64::from(edge_texels) * 4
    }
}

/// Maps geographic coordinates into a texture's texel space: multiply by
/// scale, then translate (applied to coordinates already offset by the
/// translation, i.e. `texel = (geo + translate) * scale`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TexturePlacement {
    pub scale_x: f64,
    pub scale_y: f64,
    pub translate_x: f64,
    pub translate_y: f64,
}

impl TexturePlacement {
    /// Placement for a texture of `edge_texels` covering `bounds`.
    pub fn for_texture(bounds: &GeoEnvelope, edge_texels: u32) -> Self {
        Self {
            scale_x: f64::from(edge_texels) / (bounds.max_x - bounds.min_x),
            scale_y: f64::from(edge_texels) / (bounds.max_y - bounds.min_y),
            translate_x: -bounds.min_x,
            translate_y: -bounds.min_y,
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x + self.translate_x) * self.scale_x,
            (y + self.translate_y) * self.scale_y,
        )
    }
}

/// Receives the resolved draws for each visible mesh tile: the exact or
/// ancestor texture first, then any higher-resolution descendant overlays.
pub trait SurfaceCompositor<Texture> {
    fn composite_tile(
        &mut self,
        mesh_tile: &TerrainTile,
        texture: &Texture,
        texture_edge: u32,
        placement: &TexturePlacement,
    );
}

/// Monotonic milliseconds since an arbitrary epoch.
pub trait MonotonicClock {
    fn now_millis(&self) -> u64;
}

/// Wall-clock backed [`MonotonicClock`] counting from construction.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for SystemClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
