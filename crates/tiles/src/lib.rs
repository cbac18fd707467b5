//! Quad-tree tile addressing and the double-bufferable tile texture store.

use static_assertions::const_assert;

mod key;
mod store;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_support;

pub use key::{
    TileKey, cell_size_degrees, columns_at_level, envelope_for_tile_key, rows_at_level,
    tile_key_for_envelope,
};
pub use store::{TileStore, TileStoreConfig, TileStoreStats, TileTextureId};

/// Edge length, in texels, of a full-resolution tile texture.
pub const DEFAULT_TILE_SIZE: u32 = 512;

/// Deepest mip bias a tile may be bound with; a bias-`b` binding renders
/// into a texture of edge `tile_size >> b`.
pub const MAX_MIP_BIAS: u32 = 4;

const_assert!(DEFAULT_TILE_SIZE.is_power_of_two());
const_assert!(DEFAULT_TILE_SIZE >> MAX_MIP_BIAS >= 1);
