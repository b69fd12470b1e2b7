//! Reassembly of per-crop predictions into one volumetric array.
//!
//! Overlapping contributions (stride < extent) are resolved by averaging:
//! the accumulator keeps a running sum and a per-voxel contribution count
//! sized to the destination, and divides once at the end. Accumulators
//! combine pairwise, so per-task partial accumulators can be reduced after
//! parallel work without sharing mutable state.

use crate::grid::Grid;
use crate::volume::Volume;

/// The identity axis order: predictions already in (inline, crossline,
/// height) layout.
pub const IDENTITY_ORDER: [usize; 3] = [0, 1, 2];

/// Sum-and-count accumulator over a destination region.
#[derive(Clone, Debug)]
pub struct Accumulator {
    sums: Volume<f32>,
    counts: Volume<u32>,
}

impl Accumulator {
    pub fn new(shape: [usize; 3]) -> Self {
        Self {
            sums: Volume::new_with(shape, 0.0),
            counts: Volume::new_with(shape, 0),
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        self.sums.shape()
    }

    /// Accumulate one crop at `offset` (destination-relative cells).
    /// The part of the crop outside the destination is ignored; grid
    /// invariants guarantee there is none for grid-generated positions.
    pub fn add(&mut self, crop: &Volume<f32>, offset: [usize; 3]) {
        let dest = self.sums.shape();
        let src = crop.shape();
        for i in 0..src[0].min(dest[0].saturating_sub(offset[0])) {
            for x in 0..src[1].min(dest[1].saturating_sub(offset[1])) {
                for h in 0..src[2].min(dest[2].saturating_sub(offset[2])) {
                    let (di, dx, dh) = (offset[0] + i, offset[1] + x, offset[2] + h);
                    let sum = *self.sums.get(di, dx, dh) + *crop.get(i, x, h);
                    self.sums.set(di, dx, dh, sum);
                    let n = *self.counts.get(di, dx, dh) + 1;
                    self.counts.set(di, dx, dh, n);
                }
            }
        }
    }

    /// Merge another accumulator over the same region. Commutative, so
    /// partial accumulators from independent tasks reduce in any order.
    pub fn combine(&mut self, other: &Accumulator) {
        debug_assert_eq!(self.shape(), other.shape());
        let [ni, nx, nh] = self.shape();
        for i in 0..ni {
            for x in 0..nx {
                for h in 0..nh {
                    let sum = *self.sums.get(i, x, h) + *other.sums.get(i, x, h);
                    self.sums.set(i, x, h, sum);
                    let n = *self.counts.get(i, x, h) + *other.counts.get(i, x, h);
                    self.counts.set(i, x, h, n);
                }
            }
        }
    }

    /// Divide sums by counts. Voxels nothing wrote to become zero; a grid
    /// covering its ranges leaves none.
    pub fn finalize(self) -> Volume<f32> {
        let shape = self.sums.shape();
        let mut out = Volume::new_with(shape, 0.0f32);
        let [ni, nx, nh] = shape;
        for i in 0..ni {
            for x in 0..nx {
                for h in 0..nh {
                    let n = *self.counts.get(i, x, h);
                    if n > 0 {
                        out.set(i, x, h, *self.sums.get(i, x, h) / n as f32);
                    }
                }
            }
        }
        out
    }
}

/// Aggregate predictions into the volume covering the grid's ranges.
///
/// `predictions` must be aligned 1:1, in grid iteration order, with the
/// grid's positions; each prediction is permuted by `order` to canonical
/// (inline, crossline, height) layout before accumulation. Assembly is
/// defined only once every position has a prediction: with fewer
/// predictions than positions this returns `None` (not ready) rather than
/// a wrong partial array.
pub fn assemble(predictions: &[Volume<f32>], grid: &Grid, order: [usize; 3]) -> Option<Volume<f32>> {
    if predictions.len() != grid.len() {
        log::debug!(
            "assembly pending: {} of {} predictions present",
            predictions.len(),
            grid.len()
        );
        return None;
    }

    let origin = grid.origin();
    let mut acc = Accumulator::new(grid.extents());
    for (pred, &[pi, px, ph]) in predictions.iter().zip(grid.iter()) {
        let canonical = pred.permuted(order);
        let offset = [pi - origin[0], px - origin[1], ph - origin[2]];
        acc.add(&canonical, offset);
    }
    Some(acc.finalize())
}
