//! Sparse surfaces and their extraction from thresholded predictions.
//!
//! A surface maps each lateral location to one height value. Fragments are
//! extracted per crop by thresholding the prediction, reducing each
//! foreground trace to a single height and grouping 8-connected lateral
//! components; the merge engine then stitches fragments from different
//! crops into global surfaces.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::volume::{LateralMap, Volume};

/// How the foreground height indices of one trace reduce to a single value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeightReduce {
    /// Mean of the foreground indices.
    #[default]
    Mean,
    /// Middle foreground index.
    Median,
    /// Shallowest foreground index.
    Min,
    /// Deepest foreground index.
    Max,
}

impl HeightReduce {
    fn reduce(&self, indices: &[usize]) -> f32 {
        debug_assert!(!indices.is_empty());
        match self {
            HeightReduce::Mean => {
                indices.iter().sum::<usize>() as f32 / indices.len() as f32
            }
            HeightReduce::Median => indices[indices.len() / 2] as f32,
            HeightReduce::Min => indices[0] as f32,
            HeightReduce::Max => indices[indices.len() - 1] as f32,
        }
    }
}

/// Lateral bounding region of a surface, inclusive on both ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LateralBounds {
    pub i_min: usize,
    pub i_max: usize,
    pub x_min: usize,
    pub x_max: usize,
}

impl LateralBounds {
    fn around(i: usize, x: usize) -> Self {
        Self {
            i_min: i,
            i_max: i,
            x_min: x,
            x_max: x,
        }
    }

    fn include(&mut self, i: usize, x: usize) {
        self.i_min = self.i_min.min(i);
        self.i_max = self.i_max.max(i);
        self.x_min = self.x_min.min(x);
        self.x_max = self.x_max.max(x);
    }

    /// Whether the regions meet when each is grown by `pad` cells.
    pub fn intersects_padded(&self, other: &LateralBounds, pad: usize) -> bool {
        self.i_min <= other.i_max + pad
            && other.i_min <= self.i_max + pad
            && self.x_min <= other.x_max + pad
            && other.x_min <= self.x_max + pad
    }
}

/// A sparse height-per-lateral-location surface (a horizon, or a fragment
/// of one pending merge). Locations with no height are absent, not zero.
///
/// Grows monotonically during merge: locations are only added or updated,
/// never removed.
#[derive(Clone, Debug, Default)]
pub struct Surface {
    points: HashMap<(usize, usize), f32>,
    bounds: Option<LateralBounds>,
}

impl Surface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct lateral locations.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn bounds(&self) -> Option<LateralBounds> {
        self.bounds
    }

    pub fn get(&self, i: usize, x: usize) -> Option<f32> {
        self.points.get(&(i, x)).copied()
    }

    pub fn contains(&self, i: usize, x: usize) -> bool {
        self.points.contains_key(&(i, x))
    }

    pub fn insert(&mut self, i: usize, x: usize, height: f32) {
        self.points.insert((i, x), height);
        match &mut self.bounds {
            Some(b) => b.include(i, x),
            None => self.bounds = Some(LateralBounds::around(i, x)),
        }
    }

    /// Insert only if the location is absent; the existing height wins.
    pub fn insert_if_absent(&mut self, i: usize, x: usize, height: f32) {
        if !self.contains(i, x) {
            self.insert(i, x, height);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        self.points.iter().map(|(&(i, x), &h)| (i, x, h))
    }

    /// Serializable snapshot with points in deterministic order.
    pub fn dump(&self) -> SurfaceDump {
        let mut points: Vec<(usize, usize, f32)> = self.iter().collect();
        points.sort_by_key(|&(i, x, _)| (i, x));
        SurfaceDump {
            points,
            bounds: self.bounds,
        }
    }

    pub fn from_dump(dump: SurfaceDump) -> Self {
        let mut s = Surface::new();
        for (i, x, h) in dump.points {
            s.insert(i, x, h);
        }
        s
    }
}

/// The literal exchange format for surfaces: a sorted point list plus the
/// lateral bounding region.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurfaceDump {
    pub points: Vec<(usize, usize, f32)>,
    pub bounds: Option<LateralBounds>,
}

/// Extract surface fragments from one thresholded prediction sub-volume.
///
/// Voxels with `value > threshold` are foreground. Every lateral location
/// with at least one foreground voxel gets one representative height via
/// `reduce`; foreground locations group into 8-connected lateral components
/// and components smaller than `min_size` locations are discarded. The
/// crop's absolute `offset` anchors fragments to volume coordinates.
pub fn extract_fragments(
    volume: &Volume<f32>,
    offset: [usize; 3],
    threshold: f32,
    reduce: HeightReduce,
    min_size: usize,
) -> Vec<Surface> {
    let [ni, nx, nh] = volume.shape();

    // Reduce each trace to a single height, NaN marking background.
    let mut heights = LateralMap::new_with(ni, nx, f32::NAN);
    for i in 0..ni {
        for x in 0..nx {
            let fg: Vec<usize> = (0..nh)
                .filter(|&h| *volume.get(i, x, h) > threshold)
                .collect();
            if !fg.is_empty() {
                heights.set(i, x, reduce.reduce(&fg));
            }
        }
    }

    // 8-connected component grouping over the foreground mask.
    let mut visited = LateralMap::new_with(ni, nx, false);
    let mut fragments = Vec::new();
    for si in 0..ni {
        for sx in 0..nx {
            if heights.get(si, sx).is_nan() || *visited.get(si, sx) {
                continue;
            }

            let mut fragment = Surface::new();
            let mut queue = VecDeque::new();
            queue.push_back((si, sx));
            visited.set(si, sx, true);

            while let Some((i, x)) = queue.pop_front() {
                fragment.insert(
                    i + offset[0],
                    x + offset[1],
                    *heights.get(i, x) + offset[2] as f32,
                );
                for di in -1i64..=1 {
                    for dx in -1i64..=1 {
                        if di == 0 && dx == 0 {
                            continue;
                        }
                        let (qi, qx) = (i as i64 + di, x as i64 + dx);
                        if qi < 0 || qx < 0 || qi >= ni as i64 || qx >= nx as i64 {
                            continue;
                        }
                        let (qi, qx) = (qi as usize, qx as usize);
                        if !heights.get(qi, qx).is_nan() && !*visited.get(qi, qx) {
                            visited.set(qi, qx, true);
                            queue.push_back((qi, qx));
                        }
                    }
                }
            }

            if fragment.len() >= min_size {
                fragments.push(fragment);
            }
        }
    }
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume_with_plane(shape: [usize; 3], h: usize, value: f32) -> Volume<f32> {
        let mut v = Volume::new_with(shape, 0.0f32);
        for i in 0..shape[0] {
            for x in 0..shape[1] {
                v.set(i, x, h, value);
            }
        }
        v
    }

    #[test]
    fn one_flat_plane_extracts_one_fragment() {
        let v = volume_with_plane([4, 4, 8], 5, 1.0);
        let frags = extract_fragments(&v, [10, 20, 100], 0.5, HeightReduce::Mean, 1);
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].len(), 16);
        assert_eq!(frags[0].get(10, 20), Some(105.0));
        assert_eq!(frags[0].get(13, 23), Some(105.0));
        assert_eq!(frags[0].get(14, 20), None);
    }

    #[test]
    fn mean_reduce_averages_foreground_indices() {
        let mut v = Volume::new_with([1, 1, 10], 0.0f32);
        v.set(0, 0, 3, 1.0);
        v.set(0, 0, 5, 1.0);
        let frags = extract_fragments(&v, [0, 0, 0], 0.5, HeightReduce::Mean, 1);
        assert_eq!(frags[0].get(0, 0), Some(4.0));

        let frags = extract_fragments(&v, [0, 0, 0], 0.5, HeightReduce::Min, 1);
        assert_eq!(frags[0].get(0, 0), Some(3.0));
        let frags = extract_fragments(&v, [0, 0, 0], 0.5, HeightReduce::Max, 1);
        assert_eq!(frags[0].get(0, 0), Some(5.0));
    }

    #[test]
    fn disconnected_regions_become_separate_fragments() {
        let mut v = Volume::new_with([5, 5, 4], 0.0f32);
        v.set(0, 0, 1, 1.0);
        v.set(4, 4, 2, 1.0);
        let frags = extract_fragments(&v, [0, 0, 0], 0.5, HeightReduce::Mean, 1);
        assert_eq!(frags.len(), 2);
    }

    #[test]
    fn diagonal_touch_is_connected() {
        let mut v = Volume::new_with([3, 3, 2], 0.0f32);
        v.set(0, 0, 0, 1.0);
        v.set(1, 1, 0, 1.0);
        let frags = extract_fragments(&v, [0, 0, 0], 0.5, HeightReduce::Mean, 1);
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].len(), 2);
    }

    #[test]
    fn min_size_discards_small_components() {
        let mut v = Volume::new_with([5, 5, 2], 0.0f32);
        v.set(0, 0, 0, 1.0); // lone voxel
        for x in 0..5 {
            v.set(3, x, 1, 1.0); // 5-wide strip, not touching (0, 0)
        }
        let frags = extract_fragments(&v, [0, 0, 0], 0.5, HeightReduce::Mean, 3);
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].len(), 5);
    }

    #[test]
    fn dump_round_trips_through_json() {
        let mut s = Surface::new();
        s.insert(2, 3, 10.5);
        s.insert(1, 1, 7.0);
        let dump = s.dump();

        let json = serde_json::to_string(&dump).unwrap();
        let back: SurfaceDump = serde_json::from_str(&json).unwrap();
        assert_eq!(back, dump);

        let restored = Surface::from_dump(back);
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.get(2, 3), Some(10.5));
        assert_eq!(restored.bounds(), s.bounds());
    }

    #[test]
    fn bounds_track_inserts() {
        let mut s = Surface::new();
        assert!(s.bounds().is_none());
        s.insert(5, 7, 1.0);
        s.insert(2, 9, 1.0);
        let b = s.bounds().unwrap();
        assert_eq!((b.i_min, b.i_max, b.x_min, b.x_max), (2, 5, 7, 9));
    }
}
