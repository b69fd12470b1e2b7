//! Stitching surface fragments into a minimal set of global surfaces.
//!
//! Classification is three-way per (surface, fragment) pair: disjoint,
//! overlapping (shared lateral locations with close heights) or adjacent
//! (no shared locations but close borders with a compatible height trend).
//! Folding is greedy and order dependent: a fragment merges into the first
//! surface that accepts it, mutating that surface in place. That greediness
//! is a documented property, not a bug; the strategy sits behind a trait so
//! an exact global strategy can replace it without touching callers.

use serde::{Deserialize, Serialize};

use crate::surface::Surface;

/// Merge tolerances.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MergeParams {
    /// Maximum mean absolute height difference for a merge.
    pub mean_threshold: f32,
    /// Maximum lateral Chebyshev distance for borders to count as adjacent.
    /// Zero disables adjacent merging entirely.
    pub adjacency: usize,
}

impl Default for MergeParams {
    fn default() -> Self {
        Self {
            mean_threshold: 2.0,
            adjacency: 1,
        }
    }
}

/// Relationship between an accumulated surface and a new fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeClass {
    /// No mergeable relationship; also covers overlapping pairs whose
    /// heights diverge past the threshold.
    Disjoint,
    /// Shared lateral locations with mean |dh| within the threshold.
    Overlap,
    /// No shared locations, but borders within the adjacency distance and
    /// a compatible height trend across the gap.
    Adjacent,
}

/// Classify a (surface, fragment) pair. Overlap takes priority over
/// adjacency when both would apply.
pub fn classify(target: &Surface, candidate: &Surface, params: &MergeParams) -> MergeClass {
    let (Some(tb), Some(cb)) = (target.bounds(), candidate.bounds()) else {
        return MergeClass::Disjoint;
    };
    if !tb.intersects_padded(&cb, params.adjacency) {
        return MergeClass::Disjoint;
    }

    // Shared locations first: iterate the smaller side.
    let (small, large) = if target.len() <= candidate.len() {
        (target, candidate)
    } else {
        (candidate, target)
    };
    let mut shared = 0usize;
    let mut diff_sum = 0.0f32;
    for (i, x, h) in small.iter() {
        if let Some(other) = large.get(i, x) {
            shared += 1;
            diff_sum += (h - other).abs();
        }
    }
    if shared > 0 {
        return if diff_sum / shared as f32 <= params.mean_threshold {
            MergeClass::Overlap
        } else {
            MergeClass::Disjoint
        };
    }

    if params.adjacency == 0 {
        return MergeClass::Disjoint;
    }

    // Adjacent: cross pairs within the Chebyshev window, compared by height.
    let pad = params.adjacency as i64;
    let mut close = 0usize;
    let mut close_diff = 0.0f32;
    for (i, x, h) in small.iter() {
        for di in -pad..=pad {
            for dx in -pad..=pad {
                let (qi, qx) = (i as i64 + di, x as i64 + dx);
                if qi < 0 || qx < 0 {
                    continue;
                }
                if let Some(other) = large.get(qi as usize, qx as usize) {
                    close += 1;
                    close_diff += (h - other).abs();
                }
            }
        }
    }
    if close > 0 && close_diff / close as f32 <= params.mean_threshold {
        MergeClass::Adjacent
    } else {
        MergeClass::Disjoint
    }
}

/// Union of locations; at shared locations the existing surface's height
/// wins. Deterministic by construction.
pub fn overlap_merge(target: &mut Surface, fragment: &Surface) {
    for (i, x, h) in fragment.iter() {
        target.insert_if_absent(i, x, h);
    }
}

/// Union of locations; the pair shares none, so there is no height
/// conflict to resolve.
pub fn adjacent_merge(target: &mut Surface, fragment: &Surface) {
    for (i, x, h) in fragment.iter() {
        target.insert(i, x, h);
    }
}

/// What happened to a folded fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Absorbed into the surface at this index.
    MergedInto(usize),
    /// No surface accepted it; appended as a new surface.
    Appended,
}

/// Policy for folding one fragment into the accumulated surface set.
pub trait MergeStrategy {
    fn fold(
        &self,
        surfaces: &mut Vec<Surface>,
        fragment: Surface,
        params: &MergeParams,
    ) -> MergeOutcome;
}

/// The greedy first-match policy: test surfaces in insertion order and
/// merge into the first that classifies as mergeable. Results depend on
/// processing order.
#[derive(Clone, Copy, Debug, Default)]
pub struct GreedyFirstMatch;

impl MergeStrategy for GreedyFirstMatch {
    fn fold(
        &self,
        surfaces: &mut Vec<Surface>,
        fragment: Surface,
        params: &MergeParams,
    ) -> MergeOutcome {
        for (k, target) in surfaces.iter_mut().enumerate() {
            match classify(target, &fragment, params) {
                MergeClass::Overlap => {
                    overlap_merge(target, &fragment);
                    return MergeOutcome::MergedInto(k);
                }
                MergeClass::Adjacent => {
                    adjacent_merge(target, &fragment);
                    return MergeOutcome::MergedInto(k);
                }
                MergeClass::Disjoint => {}
            }
        }
        surfaces.push(fragment);
        MergeOutcome::Appended
    }
}

/// Fold a batch of fragments into surfaces. With `skip_merge` every
/// fragment becomes its own surface, for callers that merge globally
/// afterwards. Surfaces smaller than `min_size` are dropped at the end.
pub fn merge_list(
    fragments: Vec<Surface>,
    params: &MergeParams,
    skip_merge: bool,
    min_size: usize,
) -> Vec<Surface> {
    let total = fragments.len();
    let mut surfaces: Vec<Surface> = Vec::new();
    if skip_merge {
        surfaces = fragments;
    } else {
        let strategy = GreedyFirstMatch;
        for fragment in fragments {
            strategy.fold(&mut surfaces, fragment, params);
        }
    }
    surfaces.retain(|s| s.len() >= min_size);
    log::debug!(
        "merged {total} fragments into {} surfaces (min size {min_size})",
        surfaces.len()
    );
    surfaces
}
