//! Adaptive snapping of crop positions onto the quality map.
//!
//! Sampling density should follow terrain difficulty: a requested point that
//! misses the quality map is moved to the nearest valid cell, and the crop's
//! orientation is chosen from the local anisotropy of the map. The search
//! expands by doubling its radius and is capped, so a pathological map
//! fails the snap instead of looping forever.

use crate::error::{Error, Result};
use crate::geometry::QualityMap;
use crate::grid::{CropCoords, CropPosition, CropShape};

/// Default initial search radius, in lateral cells.
pub const DEFAULT_RADIUS: usize = 3;

/// Snap `point` onto the nearest valid quality-map cell.
///
/// If the point is already valid it is returned unchanged, paired with the
/// orientation the local anisotropy prefers. Otherwise the row at the
/// point's inline is scanned within `±radius` along the crossline axis,
/// then the column at the point's crossline along the inline axis; if both
/// fail the radius doubles and the search repeats. Once the doubled radius
/// exceeds `max_radius` the snap fails with [`Error::GridSnapFailed`].
///
/// The returned position keeps the coordinate flavor of the input: a
/// normalized point snaps to normalized fractions, an absolute point to
/// absolute cells. The height coordinate is never touched.
pub fn snap(
    point: &CropPosition,
    shape: CropShape,
    quality: &QualityMap,
    radius: usize,
    max_radius: usize,
) -> Result<(CropPosition, CropShape)> {
    let (pi, px) = lateral_cell(point, quality);
    let mut eps = radius.max(1);

    loop {
        // Point already on-grid: keep it, only pick the orientation.
        if quality.is_valid(pi, px) {
            return Ok((*point, oriented_shape(quality, pi, px, eps, shape)));
        }

        // Row scan: crossline varies, inline fixed.
        let x_lo = px.saturating_sub(eps);
        let x_hi = (px + eps).min(quality.crosslines());
        for x in x_lo..x_hi {
            if quality.is_valid(pi, x) {
                let snapped = rebuild(point, quality, pi, x);
                return Ok((snapped, oriented_shape(quality, pi, x, eps, shape)));
            }
        }

        // Column scan: inline varies, crossline fixed.
        let i_lo = pi.saturating_sub(eps);
        let i_hi = (pi + eps).min(quality.inlines());
        for i in i_lo..i_hi {
            if quality.is_valid(i, px) {
                let snapped = rebuild(point, quality, i, px);
                return Ok((snapped, oriented_shape(quality, i, px, eps, shape)));
            }
        }

        if eps.saturating_mul(2) > max_radius {
            return Err(Error::GridSnapFailed {
                i: pi,
                x: px,
                radius: eps,
            });
        }
        eps *= 2;
    }
}

/// Resolve the lateral cell a point refers to on the quality map.
fn lateral_cell(point: &CropPosition, quality: &QualityMap) -> (usize, usize) {
    let (i, x) = match point.coords {
        CropCoords::Absolute([i, x, _]) => (i, x),
        CropCoords::Normalized([fi, fx, _]) => (
            (fi.clamp(0.0, 1.0) * quality.inlines() as f64).round() as usize,
            (fx.clamp(0.0, 1.0) * quality.crosslines() as f64).round() as usize,
        ),
    };
    (
        i.min(quality.inlines().saturating_sub(1)),
        x.min(quality.crosslines().saturating_sub(1)),
    )
}

/// Rewrite a point's lateral coordinates after a snap, preserving its
/// coordinate flavor and height.
fn rebuild(point: &CropPosition, quality: &QualityMap, i: usize, x: usize) -> CropPosition {
    let coords = match point.coords {
        CropCoords::Absolute([_, _, h]) => CropCoords::Absolute([i, x, h]),
        CropCoords::Normalized([_, _, fh]) => CropCoords::Normalized([
            i as f64 / quality.inlines() as f64,
            x as f64 / quality.crosslines() as f64,
            fh,
        ]),
    };
    CropPosition {
        volume: point.volume,
        coords,
    }
}

/// Orientation tie-break at a candidate cell: sum validity over a
/// `2*radius` window along each lateral axis and give the crop's long axis
/// to the denser one. Ties keep the original (inline-major) shape.
fn oriented_shape(
    quality: &QualityMap,
    i: usize,
    x: usize,
    radius: usize,
    shape: CropShape,
) -> CropShape {
    let sum_i = quality.row_sum(i, x.saturating_sub(radius), x + radius);
    let sum_x = quality.column_sum(x, i.saturating_sub(radius), i + radius);
    if sum_i >= sum_x {
        shape
    } else {
        shape.transposed()
    }
}
