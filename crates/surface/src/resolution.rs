//! Per-tile render resolution.
//!
//! Tiles render at the resolution of their own quad-tree level, corrected
//! near the poles (latitude convergence makes equirectangular cells
//! oversampled there) and scaled by the scene's fractional zoom so the
//! texture density follows the view.

/// Meters per pixel of a level-0 cell, web-mercator convention.
const LEVEL_ZERO_RESOLUTION: f64 = 156_543.034;

/// Detail multiplier applied on top of the level resolution.
const TILE_DETAIL_FACTOR: f64 = 8.0;

const POLAR_LATITUDE: f64 = 67.0;

pub(crate) fn resolution_for_level(level: u32) -> f64 {
    LEVEL_ZERO_RESOLUTION / f64::from(1u32 << level.min(31))
}

/// Fractional-zoom adjustment derived from the scene's ground sample
/// distance: `2^frac(level)`, in `[1, 2)`.
pub(crate) fn resolution_adjustment_for_gsd(ground_sample_distance: f64) -> f64 {
    if !(ground_sample_distance.is_finite()) || ground_sample_distance <= 0.0 {
        return 1.0;
    }
    let level = (LEVEL_ZERO_RESOLUTION / ground_sample_distance).log2();
    if !level.is_finite() {
        return 1.0;
    }
    (level - level.floor()).exp2()
}

/// Target render resolution for a tile spanning `min_y..max_y` latitude at
/// quad-tree `level`.
pub(crate) fn tile_render_resolution(
    level: u32,
    min_y: f64,
    max_y: f64,
    adjustment: f64,
) -> f64 {
    let mut resolution = resolution_for_level(level) / TILE_DETAIL_FACTOR;

    if min_y.abs().min(max_y.abs()) > POLAR_LATITUDE {
        let distance_to_pole = if min_y < 0.0 { 90.0 + max_y } else { 90.0 - min_y };
        // 2x-8x subsampling interpolated on distance from the tile's far
        // edge to the pole
        resolution *= (3.0 - distance_to_pole / 11.5).exp2().max(1.0);
    }

    resolution / adjustment
}
