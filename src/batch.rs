//! Per-crop batch storage and the coverage filter.
//!
//! A batch holds one column per crop attribute. Columns are plain typed
//! vectors rather than a name-to-array bag; the invariant is that every
//! populated column has the same length, so index `k` always refers to the
//! same physical crop across columns.

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::geometry::Geometry;
use crate::grid::{CropPosition, CropShape, Grid, Orientation};
use crate::volume::Volume;

/// Parallel per-crop columns. Empty columns are simply unpopulated.
#[derive(Clone, Debug, Default)]
pub struct CropBatch {
    pub positions: Vec<CropPosition>,
    pub shapes: Vec<CropShape>,
    pub images: Vec<Volume<f32>>,
    pub masks: Vec<Volume<f32>>,
    pub predictions: Vec<Volume<f32>>,
}

impl CropBatch {
    /// A batch over a grid's positions, all crops in the given orientation.
    pub fn from_grid(grid: &Grid, orientation: Orientation) -> Self {
        let shape = orientation.apply(grid.shape);
        Self {
            positions: grid
                .iter()
                .map(|&[i, x, h]| CropPosition::absolute(grid.volume, i, x, h))
                .collect(),
            shapes: vec![shape; grid.len()],
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Verify that every populated column matches the positions column.
    pub fn check_alignment(&self) -> Result<()> {
        let expected = self.positions.len();
        for (name, got) in [
            ("shapes", self.shapes.len()),
            ("images", self.images.len()),
            ("masks", self.masks.len()),
            ("predictions", self.predictions.len()),
        ] {
            if got != 0 && got != expected {
                return Err(Error::ComponentMisalignment {
                    component: name,
                    expected,
                    got,
                });
            }
        }
        Ok(())
    }

    /// Load the image column through the geometry provider, one task per
    /// crop. Crops are independent, so loading runs in parallel.
    pub fn load_images<G: Geometry + Sync>(&mut self, geometry: &G) -> Result<()> {
        self.check_alignment()?;
        if self.shapes.len() != self.positions.len() {
            return Err(Error::ComponentMisalignment {
                component: "shapes",
                expected: self.positions.len(),
                got: self.shapes.len(),
            });
        }
        let bounds = geometry.bounds();
        self.images = self
            .positions
            .par_iter()
            .zip(self.shapes.par_iter())
            .map(|(pos, shape)| geometry.load_crop(pos.resolve(bounds, *shape), *shape))
            .collect::<Result<Vec<_>>>()?;
        Ok(())
    }

    /// Drop crops whose mask coverage is at or below `threshold`, filtering
    /// every populated column with the same boolean mask. Dropping every
    /// crop is legal and leaves an empty batch.
    pub fn filter_by_coverage(&mut self, threshold: f32) -> Result<usize> {
        self.check_alignment()?;
        if self.masks.len() != self.positions.len() {
            return Err(Error::ComponentMisalignment {
                component: "masks",
                expected: self.positions.len(),
                got: self.masks.len(),
            });
        }

        let keep: Vec<bool> = self
            .masks
            .par_iter()
            .map(|mask| coverage(mask) > threshold)
            .collect();
        let dropped = keep.iter().filter(|k| !**k).count();

        retain_with(&keep, &mut self.positions);
        retain_with(&keep, &mut self.shapes);
        retain_with(&keep, &mut self.images);
        retain_with(&keep, &mut self.masks);
        retain_with(&keep, &mut self.predictions);

        if dropped > 0 {
            log::debug!(
                "coverage filter dropped {dropped} of {} crops (threshold {threshold})",
                keep.len()
            );
        }
        Ok(dropped)
    }
}

/// Fraction of a crop's lateral locations whose height-axis maximum is
/// positive.
pub fn coverage(mask: &Volume<f32>) -> f32 {
    let traces = mask.lateral_cells();
    if traces == 0 {
        return 0.0;
    }
    let [ni, nx, _] = mask.shape();
    let mut hit = 0usize;
    for i in 0..ni {
        for x in 0..nx {
            if mask.trace_max(i, x) > 0.0 {
                hit += 1;
            }
        }
    }
    hit as f32 / traces as f32
}

/// Keep `v[k]` where `keep[k]`, skipping unpopulated columns.
fn retain_with<T>(keep: &[bool], v: &mut Vec<T>) {
    if v.is_empty() {
        return;
    }
    debug_assert_eq!(keep.len(), v.len());
    let mut k = 0;
    v.retain(|_| {
        let kept = keep[k];
        k += 1;
        kept
    });
}
