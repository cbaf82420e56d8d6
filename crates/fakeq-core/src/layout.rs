use std::ops::Range;

use crate::error::{Error, Result};
use crate::shape::Shape;

// Layout — Memory layout of a tensor (shape + strides + offset)
//
// The Layout decouples the logical shape of a tensor from how its elements
// sit in the flat storage buffer. The fake-quantize kernels never assume a
// dense buffer: they receive (storage, layout) pairs and the element-wise
// driver walks them.
//
// THREE KINDS OF LAYOUT THE DRIVER SEES:
//
// 1. Contiguous: strides are the row-major strides of the shape. The data is
//    one dense range of storage starting at `offset`. Per-channel slices
//    along dim 0 of a contiguous tensor are contiguous with a non-zero offset.
//
// 2. Strided: transposed or narrowed along an inner dimension. Elements are
//    reached through `offset + sum(index[i] * stride[i])`.
//
// 3. Broadcast: a dimension of size 1 (or a missing leading dimension) is
//    stretched to the output size by giving it stride 0, so every output
//    position along it reads the same input element.

/// Layout describes how a tensor's logical shape maps to flat storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    shape: Shape,
    strides: Vec<usize>,
    /// Offset into the storage buffer where this view's data starts.
    offset: usize,
}

impl Layout {
    /// Create a new contiguous layout for the given shape.
    pub fn contiguous(shape: Shape) -> Self {
        let strides = shape.stride_contiguous();
        Layout {
            shape,
            strides,
            offset: 0,
        }
    }

    /// Create a layout with explicit strides and offset (for views).
    pub fn new(shape: Shape, strides: Vec<usize>, offset: usize) -> Self {
        Layout {
            shape,
            strides,
            offset,
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn elem_count(&self) -> usize {
        self.shape.elem_count()
    }

    /// Contiguous and starting at the beginning of storage.
    pub fn is_contiguous(&self) -> bool {
        self.offset == 0 && self.has_contiguous_strides()
    }

    /// Row-major strides, wherever the view starts.
    fn has_contiguous_strides(&self) -> bool {
        self.strides
            .iter()
            .zip(self.shape.stride_contiguous())
            .zip(self.shape.dims())
            .all(|((&s, c), &d)| d <= 1 || s == c)
    }

    /// The dense storage range covered by this view, if it is one.
    ///
    /// Unlike [`Layout::is_contiguous`] this accepts a non-zero offset, so a
    /// `narrow` along the outermost dimension still takes the fast path.
    pub fn contiguous_range(&self) -> Option<Range<usize>> {
        if self.has_contiguous_strides() {
            Some(self.offset..self.offset + self.elem_count())
        } else {
            None
        }
    }

    /// Transpose two dimensions. No data is copied.
    ///
    /// [2, 3, 4] transpose(0, 2) → [4, 3, 2], strides [12, 4, 1] → [1, 4, 12]
    pub fn transpose(&self, dim0: usize, dim1: usize) -> Result<Layout> {
        let rank = self.rank();
        if dim0 >= rank || dim1 >= rank {
            return Err(Error::DimOutOfRange {
                dim: dim0.max(dim1),
                rank,
            });
        }
        let mut new_dims = self.shape.dims().to_vec();
        let mut new_strides = self.strides.clone();
        new_dims.swap(dim0, dim1);
        new_strides.swap(dim0, dim1);
        Ok(Layout::new(Shape::new(new_dims), new_strides, self.offset))
    }

    /// Narrow (slice) along a dimension: same strides, shifted offset.
    ///
    /// [4, 6] narrow(dim=1, start=2, len=3) → [4, 3], offset += 2 * stride[1]
    pub fn narrow(&self, dim: usize, start: usize, len: usize) -> Result<Layout> {
        let rank = self.rank();
        if dim >= rank {
            return Err(Error::DimOutOfRange { dim, rank });
        }
        let dim_size = self.shape.dims()[dim];
        if start + len > dim_size {
            return Err(Error::NarrowOutOfBounds {
                dim,
                start,
                len,
                dim_size,
            });
        }
        let mut new_dims = self.shape.dims().to_vec();
        new_dims[dim] = len;
        let new_offset = self.offset + start * self.strides[dim];
        Ok(Layout::new(
            Shape::new(new_dims),
            self.strides.clone(),
            new_offset,
        ))
    }

    /// Broadcast this view to `target` by zeroing the stride of every
    /// stretched dimension. Missing leading dimensions get stride 0 too.
    ///
    /// [3] with strides [1] → target [4, 3] → strides [0, 1]
    pub fn broadcast_as(&self, target: &Shape) -> Result<Layout> {
        if !self.shape.broadcasts_to(target) {
            return Err(Error::ShapeMismatch {
                expected: target.clone(),
                got: self.shape.clone(),
            });
        }
        let target_dims = target.dims();
        let lead = target_dims.len() - self.rank();
        let mut strides = vec![0usize; target_dims.len()];
        for (i, (&d, &s)) in self.dims().iter().zip(&self.strides).enumerate() {
            if d == target_dims[i + lead] {
                strides[i + lead] = s;
            }
        }
        Ok(Layout::new(target.clone(), strides, self.offset))
    }

    /// Iterator over all flat storage indices of this layout, in logical
    /// (row-major) order.
    pub fn strided_indices(&self) -> StridedIter {
        StridedIter::new(self)
    }

    /// One past the largest storage index this view can touch.
    /// Storage shorter than this cannot back the view.
    pub fn storage_extent(&self) -> usize {
        if self.elem_count() == 0 {
            return self.offset;
        }
        let last: usize = self
            .dims()
            .iter()
            .zip(&self.strides)
            .map(|(&d, &s)| (d - 1) * s)
            .sum();
        self.offset + last + 1
    }
}

// StridedIter — storage index of each logical element, in row-major order.
// A contiguous layout yields offset, offset+1, ...; a transposed or broadcast
// layout jumps around (or stands still on stride-0 dimensions).

/// Iterator that yields flat storage indices for each element of a Layout.
pub struct StridedIter {
    current: Vec<usize>,
    dims: Vec<usize>,
    strides: Vec<usize>,
    offset: usize,
    remaining: usize,
    started: bool,
}

impl StridedIter {
    fn new(layout: &Layout) -> Self {
        StridedIter {
            current: vec![0; layout.rank()],
            dims: layout.dims().to_vec(),
            strides: layout.strides().to_vec(),
            offset: layout.offset(),
            remaining: layout.elem_count(),
            started: false,
        }
    }

    fn flat_index(&self) -> usize {
        let mut idx = self.offset;
        for i in 0..self.current.len() {
            idx += self.current[i] * self.strides[i];
        }
        idx
    }

    /// Advance the multi-dimensional index by one (rightmost dimension first).
    fn advance(&mut self) {
        for i in (0..self.dims.len()).rev() {
            self.current[i] += 1;
            if self.current[i] < self.dims[i] {
                return;
            }
            self.current[i] = 0;
        }
    }
}

impl Iterator for StridedIter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        if self.started {
            self.advance();
        }
        self.started = true;
        self.remaining -= 1;
        Some(self.flat_index())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for StridedIter {}
