//! Quad-tree tile addressing.
//!
//! Keys map deterministically between geographic envelopes and
//! `(level, column, row)` addresses over the full latitude/longitude
//! extent, origin (−180°, +90°), rows increasing southward. At level L the
//! grid is `2^(L+1)` columns by `2^L` rows of `180 / 2^L` degree cells.

use geo::GeoEnvelope;

/// Deepest addressable level; keeps `2^(level+1)` column counts inside u32.
pub const MAX_LEVEL: u32 = 28;

/// Quad-tree tile address.
///
/// Derived ordering is lexicographic by `(level, column, row)`, which the
/// store's sorted index and the range walks rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub level: u32,
    pub column: u32,
    pub row: u32,
}

impl TileKey {
    pub const fn new(level: u32, column: u32, row: u32) -> Self {
        Self { level, column, row }
    }

    pub fn zoom_in(self) -> TileKey {
        TileKey {
            level: self.level + 1,
            column: self.column * 2,
            row: self.row * 2,
        }
    }

    pub fn zoom_out(self) -> TileKey {
        assert!(self.level > 0, "cannot zoom out of level 0");
        TileKey {
            level: self.level - 1,
            column: self.column / 2,
            row: self.row / 2,
        }
    }
}

pub fn cell_size_degrees(level: u32) -> f64 {
    180.0 / f64::from(1u32 << level.min(MAX_LEVEL))
}

pub fn columns_at_level(level: u32) -> u32 {
    1u32 << (level.min(MAX_LEVEL) + 1)
}

pub fn rows_at_level(level: u32) -> u32 {
    1u32 << level.min(MAX_LEVEL)
}

/// Address of the tile whose cell contains the envelope's center, at the
/// level whose cell height best matches the envelope height.
pub fn tile_key_for_envelope(envelope: &GeoEnvelope) -> TileKey {
    debug_assert!(envelope.height() > 0.0, "envelope height must be positive");

    let raw_level = (180.0 / envelope.height()).log2().floor();
    let level = if raw_level.is_finite() && raw_level > 0.0 {
        (raw_level as u32).min(MAX_LEVEL)
    } else {
        0
    };

    let cell = cell_size_degrees(level);
    let (center_x, center_y) = envelope.center();
    let column = ((center_x + 180.0) / cell).floor();
    let row = ((90.0 - center_y) / cell).floor();

    TileKey {
        level,
        column: clamp_axis(column, columns_at_level(level)),
        row: clamp_axis(row, rows_at_level(level)),
    }
}

/// Exact inverse of [`tile_key_for_envelope`] at cell granularity.
pub fn envelope_for_tile_key(key: TileKey) -> GeoEnvelope {
    let cell = cell_size_degrees(key.level);
    let min_x = -180.0 + cell * f64::from(key.column);
    let max_y = 90.0 - cell * f64::from(key.row);
    GeoEnvelope::new(min_x, max_y - cell, min_x + cell, max_y)
}

fn clamp_axis(index: f64, count: u32) -> u32 {
    if index < 0.0 {
        return 0;
    }
    let max_index = count - 1;
    if index >= f64::from(count) {
        max_index
    } else {
        (index as u32).min(max_index)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        MAX_LEVEL, TileKey, cell_size_degrees, columns_at_level, envelope_for_tile_key,
        rows_at_level, tile_key_for_envelope,
    };
    use geo::{GeoEnvelope, WORLD};

    #[test]
    fn level_grid_dimensions() {
        assert_eq!(columns_at_level(0), 2);
        assert_eq!(rows_at_level(0), 1);
        assert_eq!(columns_at_level(3), 16);
        assert_eq!(rows_at_level(3), 8);
        assert_eq!(cell_size_degrees(2), 45.0);
    }

    #[test]
    fn zoom_out_inverts_zoom_in() {
        let keys = [
            TileKey::new(0, 0, 0),
            TileKey::new(2, 7, 3),
            TileKey::new(9, 511, 200),
            TileKey::new(MAX_LEVEL - 1, 12345, 6789),
        ];
        for key in keys {
            assert_eq!(key.zoom_in().zoom_out(), key);
        }
    }

    #[test]
    fn key_ordering_is_lexicographic_by_level_column_row() {
        let mut keys = vec![
            TileKey::new(2, 1, 0),
            TileKey::new(1, 3, 3),
            TileKey::new(2, 0, 5),
            TileKey::new(2, 1, 2),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                TileKey::new(1, 3, 3),
                TileKey::new(2, 0, 5),
                TileKey::new(2, 1, 0),
                TileKey::new(2, 1, 2),
            ]
        );
    }

    #[test]
    fn world_envelope_addresses_level_zero() {
        let key = tile_key_for_envelope(&WORLD);
        assert_eq!(key.level, 0);
    }

    #[test]
    fn round_trip_covers_envelope_center() {
        let envelopes = [
            GeoEnvelope::new(-180.0, 45.0, -135.0, 90.0),
            GeoEnvelope::new(0.0, 0.0, 45.0, 45.0),
            GeoEnvelope::new(100.0, -50.0, 111.25, -38.75),
            GeoEnvelope::new(179.0, 89.0, 180.0, 90.0),
            GeoEnvelope::new(-180.0, -90.0, -179.0, -89.0),
        ];
        for envelope in envelopes {
            let key = tile_key_for_envelope(&envelope);
            let cell = envelope_for_tile_key(key);
            let (center_x, center_y) = envelope.center();
            assert!(
                cell.contains_point(center_x, center_y),
                "cell {cell:?} of key {key:?} must contain center of {envelope:?}"
            );
        }
    }

    #[test]
    fn addressing_is_stable() {
        let envelope = GeoEnvelope::new(12.0, 30.0, 14.8125, 32.8125);
        let first = tile_key_for_envelope(&envelope);
        let second = tile_key_for_envelope(&envelope);
        assert_eq!(first, second);
    }

    #[test]
    fn level_two_quadrants_address_distinct_cells() {
        // 45-degree cells at level 2; four envelopes in distinct cells.
        let keys: Vec<TileKey> = [
            GeoEnvelope::new(-180.0, 45.0, -135.0, 90.0),
            GeoEnvelope::new(-135.0, 45.0, -90.0, 90.0),
            GeoEnvelope::new(-180.0, 0.0, -135.0, 45.0),
            GeoEnvelope::new(-135.0, 0.0, -90.0, 45.0),
        ]
        .iter()
        .map(tile_key_for_envelope)
        .collect();

        assert_eq!(keys[0], TileKey::new(2, 0, 0));
        assert_eq!(keys[1], TileKey::new(2, 1, 0));
        assert_eq!(keys[2], TileKey::new(2, 0, 1));
        assert_eq!(keys[3], TileKey::new(2, 1, 1));
    }

    #[test]
    fn envelope_for_tile_key_matches_grid_origin() {
        let cell = envelope_for_tile_key(TileKey::new(2, 0, 0));
        assert_eq!(cell, GeoEnvelope::new(-180.0, 45.0, -135.0, 90.0));

        let far_corner = envelope_for_tile_key(TileKey::new(2, 7, 3));
        assert_eq!(far_corner, GeoEnvelope::new(135.0, -90.0, 180.0, -45.0));
    }

    #[test]
    fn oversized_envelope_clamps_to_level_zero() {
        let tall = GeoEnvelope::new(-10.0, -90.0, 10.0, 90.0);
        assert_eq!(tile_key_for_envelope(&tall).level, 0);
    }
}
