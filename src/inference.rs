//! Whole-volume and chunked inference drivers.
//!
//! Both drivers follow the same shape: build a grid, load the crops in
//! parallel, predict, assemble, extract fragments. The whole-volume driver
//! keeps one destination array for the full region; the memory cost of its
//! sum and count buffers is the reason the chunked driver exists, which
//! splits one lateral axis into overlapping chunks and stitches the chunk
//! fragments through the merge engine.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::assemble::{assemble, IDENTITY_ORDER};
use crate::batch::CropBatch;
use crate::error::{Error, Result};
use crate::geometry::{CubeBounds, Geometry, Predictor};
use crate::grid::{CropShape, Grid, GridSpec, Orientation, VolumeId};
use crate::merge::{merge_list, MergeParams};
use crate::surface::{extract_fragments, HeightReduce, Surface};

/// Knobs shared by both inference drivers.
#[derive(Clone, Copy, Debug)]
pub struct InferenceParams {
    /// Prediction value above which a voxel is foreground.
    pub threshold: f32,
    /// Per-trace height statistic.
    pub reduce: HeightReduce,
    /// Minimum fragment size, in lateral locations.
    pub min_fragment_size: usize,
    /// Minimum size of a surface kept after the final merge.
    pub min_surface_size: usize,
    pub merge: MergeParams,
    /// How many crops cross every point along each axis; a factor of 2
    /// means stride = extent / 2.
    pub overlap_factor: usize,
    /// Chunk extent along the split axis (chunked driver only).
    pub chunk_size: usize,
    /// Overlap fraction of successive chunks, in `[0, 1)`.
    pub chunk_overlap: f64,
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            reduce: HeightReduce::Mean,
            min_fragment_size: 50,
            min_surface_size: 500,
            merge: MergeParams::default(),
            overlap_factor: 2,
            chunk_size: 100,
            chunk_overlap: 0.2,
        }
    }
}

/// Ranges to run inference over: the full lateral extent, and either the
/// supplied height range or the full depth.
pub fn inference_ranges(
    bounds: CubeBounds,
    height_range: Option<[usize; 2]>,
) -> ([[usize; 2]; 2], [usize; 2]) {
    let spatial = [[0, bounds.inlines - 1], [0, bounds.crosslines - 1]];
    let heights = height_range.unwrap_or([0, bounds.depth - 1]);
    (spatial, heights)
}

/// Stride from a crop shape and overlap factor, at least 1 per axis.
fn overlap_stride(shape: CropShape, overlap_factor: usize) -> [usize; 3] {
    let e = shape.extents();
    [
        (e[0] / overlap_factor.max(1)).max(1),
        (e[1] / overlap_factor.max(1)).max(1),
        (e[2] / overlap_factor.max(1)).max(1),
    ]
}

/// Run one grid end to end: load, predict, assemble, extract fragments.
fn run_grid<G, P>(
    geometry: &G,
    predictor: &P,
    grid: &Grid,
    params: &InferenceParams,
) -> Result<Vec<Surface>>
where
    G: Geometry + Sync,
    P: Predictor,
{
    let mut batch = CropBatch::from_grid(grid, Orientation::InlineMajor);
    batch.load_images(geometry)?;
    let predictions = predictor.predict(&batch.images)?;
    if predictions.len() != grid.len() {
        return Err(Error::PredictionMismatch {
            expected: grid.len(),
            got: predictions.len(),
        });
    }

    let volume = assemble(&predictions, grid, IDENTITY_ORDER).ok_or(Error::PredictionMismatch {
        expected: grid.len(),
        got: predictions.len(),
    })?;
    Ok(extract_fragments(
        &volume,
        grid.origin(),
        params.threshold,
        params.reduce,
        params.min_fragment_size,
    ))
}

/// Whole-volume inference: one grid over the requested region, assembled
/// into a single array, surfaces extracted from it. Fast but memory
/// intensive; prefer [`chunked`] on large cubes.
pub fn whole_volume<G, P>(
    geometry: &G,
    predictor: &P,
    shape: CropShape,
    height_range: Option<[usize; 2]>,
    params: &InferenceParams,
) -> Result<Vec<Surface>>
where
    G: Geometry + Sync,
    P: Predictor,
{
    let bounds = geometry.bounds();
    let (spatial_ranges, heights) = inference_ranges(bounds, height_range);
    let grid = GridSpec {
        shape,
        spatial_ranges,
        height_range: heights,
        stride: overlap_stride(shape, params.overlap_factor),
    }
    .generate(VolumeId::default())?;

    log::info!(
        "whole-volume inference: {} crops over {:?} x {:?}, grid coverage {:.3}",
        grid.len(),
        spatial_ranges,
        heights,
        grid.coverage(geometry.quality_map())
    );
    let fragments = run_grid(geometry, predictor, &grid, params)?;
    Ok(merge_list(
        fragments,
        &params.merge,
        false,
        params.min_surface_size,
    ))
}

/// Chunked inference: split the lateral axis with the smaller crop extent
/// into overlapping chunks, run each chunk like [`whole_volume`], and fold
/// every chunk's fragments through the merge engine.
///
/// `cancel` is observed between chunks only; on cancellation the surfaces
/// merged so far are returned.
pub fn chunked<G, P>(
    geometry: &G,
    predictor: &P,
    shape: CropShape,
    height_range: Option<[usize; 2]>,
    params: &InferenceParams,
    cancel: &AtomicBool,
) -> Result<Vec<Surface>>
where
    G: Geometry + Sync,
    P: Predictor,
{
    let bounds = geometry.bounds();
    let (spatial_ranges, heights) = inference_ranges(bounds, height_range);
    let stride = overlap_stride(shape, params.overlap_factor);

    // Chunk along the lateral axis the crop is thinner on.
    let extents = shape.extents();
    let axis = if extents[0] <= extents[1] { 0 } else { 1 };
    let chunk_size = params.chunk_size.max(extents[axis]);
    let step = ((chunk_size as f64) * (1.0 - params.chunk_overlap)).max(1.0) as usize;
    let axis_max = spatial_ranges[axis][1];

    let mut fragments = Vec::new();
    let mut start = spatial_ranges[axis][0];
    loop {
        if cancel.load(Ordering::Relaxed) {
            log::info!("inference cancelled at chunk start {start}");
            break;
        }

        // Pull a short tail chunk back so at least one crop fits.
        let lo = start.min((axis_max + 1).saturating_sub(extents[axis]));
        let mut chunk_ranges = spatial_ranges;
        chunk_ranges[axis] = [lo, (lo + chunk_size - 1).min(axis_max)];

        let grid = GridSpec {
            shape,
            spatial_ranges: chunk_ranges,
            height_range: heights,
            stride,
        }
        .generate(VolumeId::default())?;
        log::debug!(
            "chunk [{}, {}] on axis {axis}: {} crops, grid coverage {:.3}",
            chunk_ranges[axis][0],
            chunk_ranges[axis][1],
            grid.len(),
            grid.coverage(geometry.quality_map())
        );
        fragments.extend(run_grid(geometry, predictor, &grid, params)?);

        if chunk_ranges[axis][1] >= axis_max {
            break;
        }
        start += step;
    }

    Ok(merge_list(
        fragments,
        &params.merge,
        false,
        params.min_surface_size,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::QualityMap;
    use crate::volume::{LateralMap, Volume};

    /// A synthetic cube with one flat horizon at a fixed depth. The
    /// predictor marks voxels near that depth as foreground.
    struct FlatCube {
        bounds: CubeBounds,
        quality: QualityMap,
        horizon_depth: usize,
    }

    impl FlatCube {
        fn new(inlines: usize, crosslines: usize, depth: usize, horizon_depth: usize) -> Self {
            Self {
                bounds: CubeBounds::new(inlines, crosslines, depth),
                quality: QualityMap::new(LateralMap::new_with(inlines, crosslines, 1.0)),
                horizon_depth,
            }
        }
    }

    impl Geometry for FlatCube {
        fn bounds(&self) -> CubeBounds {
            self.bounds
        }

        fn quality_map(&self) -> &QualityMap {
            &self.quality
        }

        fn load_crop(&self, position: [usize; 3], shape: CropShape) -> Result<Volume<f32>> {
            let [_, _, eh] = shape.extents();
            let mut crop = Volume::new_with(shape.extents(), 0.0f32);
            // Encode the horizon as amplitude 1 at its absolute depth.
            let h0 = position[2];
            if self.horizon_depth >= h0 && self.horizon_depth < h0 + eh {
                let [ei, ex, _] = shape.extents();
                for i in 0..ei {
                    for x in 0..ex {
                        crop.set(i, x, self.horizon_depth - h0, 1.0);
                    }
                }
            }
            Ok(crop)
        }
    }

    /// Identity predictor: the "mask" is the loaded crop itself.
    struct Identity;

    impl Predictor for Identity {
        fn predict(&self, crops: &[Volume<f32>]) -> Result<Vec<Volume<f32>>> {
            Ok(crops.to_vec())
        }
    }

    /// Predictor that drops the last crop, violating the contract.
    struct Truncating;

    impl Predictor for Truncating {
        fn predict(&self, crops: &[Volume<f32>]) -> Result<Vec<Volume<f32>>> {
            Ok(crops[..crops.len() - 1].to_vec())
        }
    }

    fn params() -> InferenceParams {
        InferenceParams {
            min_fragment_size: 1,
            min_surface_size: 1,
            chunk_size: 8,
            chunk_overlap: 0.25,
            ..Default::default()
        }
    }

    #[test]
    fn whole_volume_recovers_a_flat_horizon() {
        let cube = FlatCube::new(16, 16, 12, 7);
        let surfaces =
            whole_volume(&cube, &Identity, CropShape::new(4, 4, 12), None, &params()).unwrap();

        assert_eq!(surfaces.len(), 1);
        assert_eq!(surfaces[0].len(), 16 * 16);
        for (_, _, h) in surfaces[0].iter() {
            assert_eq!(h, 7.0);
        }
    }

    #[test]
    fn chunked_stitches_chunks_into_one_surface() {
        let cube = FlatCube::new(24, 16, 12, 5);
        let surfaces = chunked(
            &cube,
            &Identity,
            CropShape::new(4, 8, 12),
            None,
            &params(),
            &AtomicBool::new(false),
        )
        .unwrap();

        assert_eq!(surfaces.len(), 1);
        assert_eq!(surfaces[0].len(), 24 * 16);
    }

    #[test]
    fn height_range_offsets_extracted_depths() {
        let cube = FlatCube::new(8, 8, 40, 25);
        let surfaces = whole_volume(
            &cube,
            &Identity,
            CropShape::new(4, 4, 16),
            Some([20, 35]),
            &params(),
        )
        .unwrap();

        assert_eq!(surfaces.len(), 1);
        for (_, _, h) in surfaces[0].iter() {
            assert_eq!(h, 25.0);
        }
    }

    #[test]
    fn misbehaving_predictor_is_reported() {
        let cube = FlatCube::new(8, 8, 8, 3);
        let err = whole_volume(&cube, &Truncating, CropShape::new(4, 4, 8), None, &params())
            .unwrap_err();
        assert!(matches!(err, Error::PredictionMismatch { .. }));
    }

    #[test]
    fn cancellation_returns_partial_surfaces() {
        let cube = FlatCube::new(24, 16, 12, 5);
        let cancel = AtomicBool::new(true);
        let surfaces = chunked(
            &cube,
            &Identity,
            CropShape::new(4, 8, 12),
            None,
            &params(),
            &cancel,
        )
        .unwrap();
        assert!(surfaces.is_empty());
    }
}
