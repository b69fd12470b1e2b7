//! Dense array storage for sub-volumes and lateral maps.
//!
//! `Volume<T>` is a 3D array over (inline, crossline, height) and is the
//! exchange type for loaded crops, masks and predictions. `LateralMap<T>`
//! covers the two lateral axes only and backs quality maps and per-trace
//! bookkeeping during assembly.

/// A dense 3D array in (inline, crossline, height) order, height fastest.
#[derive(Clone, Debug, PartialEq)]
pub struct Volume<T> {
    shape: [usize; 3],
    data: Vec<T>,
}

impl<T: Clone + Default> Volume<T> {
    pub fn new(shape: [usize; 3]) -> Self {
        Self {
            shape,
            data: vec![T::default(); shape[0] * shape[1] * shape[2]],
        }
    }
}

impl<T: Clone> Volume<T> {
    pub fn new_with(shape: [usize; 3], value: T) -> Self {
        Self {
            shape,
            data: vec![value; shape[0] * shape[1] * shape[2]],
        }
    }

    /// Wrap a flat buffer laid out in (inline, crossline, height) order.
    ///
    /// A trailing channel axis of size one (a `[i, x, h, 1]` tensor) has the
    /// same flat layout, so squeezing it is just this shape check.
    pub fn from_flat(shape: [usize; 3], data: Vec<T>) -> Option<Self> {
        if data.len() != shape[0] * shape[1] * shape[2] {
            return None;
        }
        Some(Self { shape, data })
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    /// Number of lateral locations (traces) in the volume.
    pub fn lateral_cells(&self) -> usize {
        self.shape[0] * self.shape[1]
    }

    fn index(&self, i: usize, x: usize, h: usize) -> usize {
        debug_assert!(i < self.shape[0] && x < self.shape[1] && h < self.shape[2]);
        (i * self.shape[1] + x) * self.shape[2] + h
    }

    pub fn get(&self, i: usize, x: usize, h: usize) -> &T {
        &self.data[self.index(i, x, h)]
    }

    pub fn set(&mut self, i: usize, x: usize, h: usize, value: T) {
        let idx = self.index(i, x, h);
        self.data[idx] = value;
    }

    /// The column of values along the height axis at one lateral location.
    pub fn trace(&self, i: usize, x: usize) -> &[T] {
        let start = self.index(i, x, 0);
        &self.data[start..start + self.shape[2]]
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Reorder axes so that destination axis `k` takes its extent and data
    /// from source axis `order[k]` (numpy `transpose` semantics). The
    /// identity order returns a plain clone.
    pub fn permuted(&self, order: [usize; 3]) -> Volume<T> {
        if order == [0, 1, 2] {
            return self.clone();
        }
        let shape = [
            self.shape[order[0]],
            self.shape[order[1]],
            self.shape[order[2]],
        ];
        let mut data = Vec::with_capacity(self.data.len());
        for a in 0..shape[0] {
            for b in 0..shape[1] {
                for c in 0..shape[2] {
                    let mut src = [0usize; 3];
                    src[order[0]] = a;
                    src[order[1]] = b;
                    src[order[2]] = c;
                    data.push(self.get(src[0], src[1], src[2]).clone());
                }
            }
        }
        Volume { shape, data }
    }
}

impl Volume<f32> {
    /// Maximum value along the height axis at one lateral location.
    pub fn trace_max(&self, i: usize, x: usize) -> f32 {
        self.trace(i, x).iter().copied().fold(f32::MIN, f32::max)
    }
}

/// A dense 2D array over the lateral (inline, crossline) axes.
#[derive(Clone, Debug, PartialEq)]
pub struct LateralMap<T> {
    pub inlines: usize,
    pub crosslines: usize,
    data: Vec<T>,
}

impl<T: Clone> LateralMap<T> {
    pub fn new_with(inlines: usize, crosslines: usize, value: T) -> Self {
        Self {
            inlines,
            crosslines,
            data: vec![value; inlines * crosslines],
        }
    }

    /// Wrap a flat row-major buffer (crossline fastest).
    pub fn from_flat(inlines: usize, crosslines: usize, data: Vec<T>) -> Option<Self> {
        if data.len() != inlines * crosslines {
            return None;
        }
        Some(Self {
            inlines,
            crosslines,
            data,
        })
    }

    fn index(&self, i: usize, x: usize) -> usize {
        debug_assert!(i < self.inlines && x < self.crosslines);
        i * self.crosslines + x
    }

    pub fn get(&self, i: usize, x: usize) -> &T {
        &self.data[self.index(i, x)]
    }

    pub fn set(&mut self, i: usize, x: usize, value: T) {
        let idx = self.index(i, x);
        self.data[idx] = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &T)> {
        self.data.iter().enumerate().map(move |(idx, val)| {
            let i = idx / self.crosslines;
            let x = idx % self.crosslines;
            (i, x, val)
        })
    }
}
