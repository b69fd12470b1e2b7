//! Crop positions and deterministic grid generation.
//!
//! A grid is the ordered set of crop positions covering a requested region
//! at a given stride. Its iteration order (row-major, inline slowest) is an
//! external contract: the assembler maps flat prediction sequences back onto
//! volume coordinates by that order alone.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geometry::{CubeBounds, QualityMap};
use crate::volume::LateralMap;

/// Identifier of the source cube a position refers to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeId(pub u32);

impl std::fmt::Display for VolumeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cube-{}", self.0)
    }
}

/// Crop extents along (inline, crossline, height).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropShape(pub [usize; 3]);

impl CropShape {
    pub fn new(i: usize, x: usize, h: usize) -> Self {
        Self([i, x, h])
    }

    pub fn extents(&self) -> [usize; 3] {
        self.0
    }

    /// The side-view variant: lateral axes swapped, height unchanged.
    pub fn transposed(&self) -> Self {
        Self([self.0[1], self.0[0], self.0[2]])
    }
}

/// Whether a crop keeps the requested shape or stores it transposed.
/// Shape and position always agree on orientation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    InlineMajor,
    CrosslineMajor,
}

impl Orientation {
    pub fn apply(&self, shape: CropShape) -> CropShape {
        match self {
            Orientation::InlineMajor => shape,
            Orientation::CrosslineMajor => shape.transposed(),
        }
    }
}

/// Draw an orientation per crop, transposing with probability `p`.
/// Seeded so a training run can be replayed exactly.
pub fn random_orientations(n: usize, p: f64, seed: u64) -> Vec<Orientation> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            if rng.gen::<f64>() < p {
                Orientation::CrosslineMajor
            } else {
                Orientation::InlineMajor
            }
        })
        .collect()
}

/// Reference-corner coordinates of a crop, either absolute cells or
/// normalized fractions resolved against the cube bounds at use time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum CropCoords {
    Absolute([usize; 3]),
    Normalized([f64; 3]),
}

/// Immutable reference corner of one crop.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CropPosition {
    pub volume: VolumeId,
    pub coords: CropCoords,
}

impl CropPosition {
    pub fn absolute(volume: VolumeId, i: usize, x: usize, h: usize) -> Self {
        Self {
            volume,
            coords: CropCoords::Absolute([i, x, h]),
        }
    }

    pub fn normalized(volume: VolumeId, i: f64, x: f64, h: f64) -> Self {
        Self {
            volume,
            coords: CropCoords::Normalized([i, x, h]),
        }
    }

    /// Resolve to absolute cells, clamped so the full `shape` extent fits
    /// inside `bounds`. No partial or clipped crops exist: a position too
    /// close to the far edge is pulled back instead.
    pub fn resolve(&self, bounds: CubeBounds, shape: CropShape) -> [usize; 3] {
        let extents = bounds.extents();
        let crop = shape.extents();
        let mut out = [0usize; 3];
        for axis in 0..3 {
            let free = extents[axis].saturating_sub(crop[axis]);
            let cell = match self.coords {
                CropCoords::Absolute(cells) => cells[axis],
                CropCoords::Normalized(fracs) => {
                    (fracs[axis].clamp(0.0, 1.0) * free as f64).round() as usize
                }
            };
            out[axis] = cell.min(free);
        }
        out
    }
}

/// Specification of a grid: crop extents, inclusive coverage ranges and the
/// per-axis stride.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridSpec {
    pub shape: CropShape,
    /// Inclusive `[min, max]` ranges for the two lateral axes.
    pub spatial_ranges: [[usize; 2]; 2],
    /// Inclusive `[min, max]` range for the height axis.
    pub height_range: [usize; 2],
    pub stride: [usize; 3],
}

impl GridSpec {
    /// Generate the ordered set of crop positions covering the ranges.
    ///
    /// Positions along each axis step by the stride and the final position
    /// is clamped to `max - extent + 1` so the last crop never overshoots.
    /// The output is the Cartesian product in row-major order (inline
    /// slowest, height fastest).
    pub fn generate(&self, volume: VolumeId) -> Result<Grid> {
        let ranges = [
            self.spatial_ranges[0],
            self.spatial_ranges[1],
            self.height_range,
        ];
        let extents = self.shape.extents();

        let mut axes: Vec<Vec<usize>> = Vec::with_capacity(3);
        for axis in 0..3 {
            axes.push(axis_positions(
                ranges[axis],
                extents[axis],
                self.stride[axis],
                axis,
            )?);
        }

        let mut positions = Vec::with_capacity(axes[0].len() * axes[1].len() * axes[2].len());
        for &i in &axes[0] {
            for &x in &axes[1] {
                for &h in &axes[2] {
                    positions.push([i, x, h]);
                }
            }
        }

        log::debug!(
            "generated grid on {volume}: {} positions ({}x{}x{})",
            positions.len(),
            axes[0].len(),
            axes[1].len(),
            axes[2].len()
        );

        Ok(Grid {
            volume,
            shape: self.shape,
            spatial_ranges: self.spatial_ranges,
            height_range: self.height_range,
            stride: self.stride,
            positions,
        })
    }
}

fn axis_positions(range: [usize; 2], extent: usize, stride: usize, axis: usize) -> Result<Vec<usize>> {
    let [min, max] = range;
    if stride < 1 {
        return Err(Error::InvalidGridSpec(format!(
            "stride must be >= 1 on axis {axis}"
        )));
    }
    if extent < 1 {
        return Err(Error::InvalidGridSpec(format!(
            "extent must be >= 1 on axis {axis}"
        )));
    }
    if max < min || max - min + 1 < extent {
        return Err(Error::InvalidGridSpec(format!(
            "range [{min}, {max}] is narrower than extent {extent} on axis {axis}"
        )));
    }

    let mut out = Vec::new();
    let mut p = min;
    loop {
        if p + extent - 1 >= max {
            // Final position: clamp so the crop ends exactly at `max`.
            out.push(max + 1 - extent);
            break;
        }
        out.push(p);
        p += stride;
    }
    Ok(out)
}

/// An immutable, ordered set of crop positions plus the metadata needed to
/// map predictions back onto volume coordinates.
#[derive(Clone, Debug)]
pub struct Grid {
    pub volume: VolumeId,
    pub shape: CropShape,
    pub spatial_ranges: [[usize; 2]; 2],
    pub height_range: [usize; 2],
    pub stride: [usize; 3],
    positions: Vec<[usize; 3]>,
}

impl Grid {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Absolute positions in iteration order.
    pub fn positions(&self) -> &[[usize; 3]] {
        &self.positions
    }

    pub fn iter(&self) -> impl Iterator<Item = &[usize; 3]> {
        self.positions.iter()
    }

    /// Minimum corner of the covered region.
    pub fn origin(&self) -> [usize; 3] {
        [
            self.spatial_ranges[0][0],
            self.spatial_ranges[1][0],
            self.height_range[0],
        ]
    }

    /// Extents of the covered region (the assembler's destination shape).
    pub fn extents(&self) -> [usize; 3] {
        [
            self.spatial_ranges[0][1] - self.spatial_ranges[0][0] + 1,
            self.spatial_ranges[1][1] - self.spatial_ranges[1][0] + 1,
            self.height_range[1] - self.height_range[0] + 1,
        ]
    }

    /// Fraction of valid quality-map cells covered by the grid's lateral
    /// footprint. Diagnostic only.
    pub fn coverage(&self, quality: &QualityMap) -> f32 {
        let valid = quality.valid_cells();
        if valid == 0 {
            return 0.0;
        }

        let mut covered = LateralMap::new_with(quality.inlines(), quality.crosslines(), false);
        let [ei, ex, _] = self.shape.extents();
        for &[pi, px, _] in &self.positions {
            for i in pi..(pi + ei).min(quality.inlines()) {
                for x in px..(px + ex).min(quality.crosslines()) {
                    covered.set(i, x, true);
                }
            }
        }

        let hit = covered
            .iter()
            .filter(|(i, x, c)| **c && quality.is_valid(*i, *x))
            .count();
        hit as f32 / valid as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(shape: [usize; 3], ranges: [[usize; 2]; 3], stride: [usize; 3]) -> GridSpec {
        GridSpec {
            shape: CropShape(shape),
            spatial_ranges: [ranges[0], ranges[1]],
            height_range: ranges[2],
            stride,
        }
    }

    #[test]
    fn axis_positions_clamp_the_last_step() {
        let p = axis_positions([0, 99], 10, 7, 0).unwrap();
        assert_eq!(p.first(), Some(&0));
        assert_eq!(p.last(), Some(&90));
        // Every crop stays inside the range
        assert!(p.iter().all(|&q| q + 10 <= 100));
    }

    #[test]
    fn exact_tiling_has_no_duplicate_tail() {
        let p = axis_positions([0, 9], 5, 5, 0).unwrap();
        assert_eq!(p, vec![0, 5]);
    }

    #[test]
    fn degenerate_specs_are_rejected() {
        assert!(matches!(
            axis_positions([0, 9], 5, 0, 0),
            Err(Error::InvalidGridSpec(_))
        ));
        assert!(matches!(
            axis_positions([0, 3], 5, 1, 0),
            Err(Error::InvalidGridSpec(_))
        ));
    }

    #[test]
    fn grid_is_deterministic_and_row_major() {
        let s = spec([2, 2, 4], [[0, 3], [0, 3], [0, 3]], [2, 2, 4]);
        let a = s.generate(VolumeId(0)).unwrap();
        let b = s.generate(VolumeId(0)).unwrap();
        assert_eq!(a.positions(), b.positions());
        assert_eq!(
            a.positions(),
            &[[0, 0, 0], [0, 2, 0], [2, 0, 0], [2, 2, 0]]
        );
    }

    #[test]
    fn full_cube_scenario_yields_361_positions() {
        // Volume (100, 100, 50), crop (10, 10, 50), stride (5, 5, 50):
        // 19 positions per lateral axis tiling [0, 90] with 50% overlap.
        let s = spec([10, 10, 50], [[0, 99], [0, 99], [0, 49]], [5, 5, 50]);
        let grid = s.generate(VolumeId(1)).unwrap();
        assert_eq!(grid.len(), 19 * 19);
        assert!(grid.iter().all(|&[i, x, h]| i <= 90 && x <= 90 && h == 0));

        // Union of extents covers the ranges exactly
        let mut covered = vec![false; 100];
        for &[i, _, _] in grid.iter() {
            for c in i..i + 10 {
                covered[c] = true;
            }
        }
        assert!(covered.iter().all(|&c| c));
    }

    #[test]
    fn normalized_positions_resolve_clamped() {
        let bounds = CubeBounds::new(100, 100, 50);
        let shape = CropShape::new(10, 10, 50);

        let p = CropPosition::normalized(VolumeId(0), 1.0, 0.5, 0.0);
        assert_eq!(p.resolve(bounds, shape), [90, 45, 0]);

        // Absolute positions past the far edge are pulled back
        let p = CropPosition::absolute(VolumeId(0), 95, 0, 0);
        assert_eq!(p.resolve(bounds, shape), [90, 0, 0]);
    }

    #[test]
    fn random_orientations_are_reproducible() {
        let a = random_orientations(32, 0.5, 42);
        let b = random_orientations(32, 0.5, 42);
        assert_eq!(a, b);
        assert!(random_orientations(32, 0.0, 7)
            .iter()
            .all(|o| *o == Orientation::InlineMajor));
        assert!(random_orientations(32, 1.0, 7)
            .iter()
            .all(|o| *o == Orientation::CrosslineMajor));
    }

    #[test]
    fn coverage_is_the_covered_fraction_of_valid_cells() {
        let quality = QualityMap::new(LateralMap::new_with(4, 4, 1.0));

        // A grid tiling the full lateral extent covers every valid cell.
        let full = spec([2, 2, 2], [[0, 3], [0, 3], [0, 1]], [2, 2, 2])
            .generate(VolumeId(0))
            .unwrap();
        assert_eq!(full.coverage(&quality), 1.0);

        // Restricting the crossline range to half the cube halves it.
        let half = spec([2, 2, 2], [[0, 3], [0, 1], [0, 1]], [2, 2, 2])
            .generate(VolumeId(0))
            .unwrap();
        assert_eq!(half.coverage(&quality), 0.5);

        // Invalid cells count toward neither numerator nor denominator.
        let mut cells = LateralMap::new_with(4, 4, 1.0);
        for x in 0..4 {
            cells.set(3, x, 0.0);
        }
        assert_eq!(half.coverage(&QualityMap::new(cells)), 0.5);
    }

    #[test]
    fn transposed_shape_swaps_lateral_axes() {
        let s = CropShape::new(1, 256, 256);
        assert_eq!(s.transposed(), CropShape::new(256, 1, 256));
        assert_eq!(Orientation::CrosslineMajor.apply(s), s.transposed());
        assert_eq!(Orientation::InlineMajor.apply(s), s);
    }
}
