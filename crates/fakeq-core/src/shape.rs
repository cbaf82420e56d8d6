use std::fmt;

// Shape — N-dimensional shape representation
//
// A Shape is the size of each dimension of a tensor:
//   - Scalar: Shape([])        — 0 dimensions, 1 element
//   - Vector: Shape([5])       — 1 dimension, 5 elements
//   - Weight: Shape([64, 3, 3, 3]) — per-channel quantization runs along dim 0
//
// For fake quantization the shape matters in two places: the element-wise
// driver needs it to pair output positions with (possibly broadcast) input
// positions, and per-channel quantization needs the size of the channel axis.

/// N-dimensional shape of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// Create a new shape from a vector of dimension sizes.
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    /// The dimension sizes as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements (product of all dimensions).
    /// A scalar shape [] has 1 element; any zero-sized dimension gives 0.
    pub fn elem_count(&self) -> usize {
        self.0.iter().product::<usize>()
    }

    /// Contiguous (row-major) strides: [2, 3, 4] → [12, 4, 1].
    pub fn stride_contiguous(&self) -> Vec<usize> {
        let mut strides = vec![0usize; self.rank()];
        if self.rank() > 0 {
            strides[self.rank() - 1] = 1;
            for i in (0..self.rank() - 1).rev() {
                strides[i] = strides[i + 1] * self.0[i + 1];
            }
        }
        strides
    }

    /// Size of a specific dimension.
    pub fn dim(&self, d: usize) -> crate::Result<usize> {
        self.0.get(d).copied().ok_or(crate::Error::DimOutOfRange {
            dim: d,
            rank: self.rank(),
        })
    }

    // Broadcasting

    /// Compute the broadcast output shape from two input shapes.
    ///
    /// NumPy-style rules: align from the right, dimensions must be equal or
    /// one of them 1, missing leading dimensions count as 1.
    ///
    ///   [3, 4] and [4]       → [3, 4]
    ///   [2, 1] and [1, 3]    → [2, 3]
    ///   [3] and [4]          → Error
    pub fn broadcast_shape(lhs: &Shape, rhs: &Shape) -> crate::Result<Shape> {
        let l = lhs.dims();
        let r = rhs.dims();
        let max_rank = l.len().max(r.len());
        let mut result = Vec::with_capacity(max_rank);

        for i in 0..max_rank {
            let ld = if i < l.len() { l[l.len() - 1 - i] } else { 1 };
            let rd = if i < r.len() { r[r.len() - 1 - i] } else { 1 };

            if ld == rd || rd == 1 {
                result.push(ld);
            } else if ld == 1 {
                result.push(rd);
            } else {
                return Err(crate::Error::msg(format!(
                    "shapes {} and {} are not broadcast-compatible (dim {} from right: {} vs {})",
                    lhs, rhs, i, ld, rd
                )));
            }
        }

        result.reverse();
        Ok(Shape::new(result))
    }

    /// Whether this shape can be broadcast to `target` without changing
    /// `target` (the output of a kernel never grows to fit its inputs).
    pub fn broadcasts_to(&self, target: &Shape) -> bool {
        let s = self.dims();
        let t = target.dims();
        if s.len() > t.len() {
            return false;
        }
        let offset = t.len() - s.len();
        s.iter()
            .enumerate()
            .all(|(i, &d)| d == t[i + offset] || d == 1)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

impl From<()> for Shape {
    /// Scalar shape (0 dimensions).
    fn from(_: ()) -> Self {
        Shape(vec![])
    }
}

impl From<usize> for Shape {
    fn from(d: usize) -> Self {
        Shape(vec![d])
    }
}

impl From<(usize, usize)> for Shape {
    fn from((d0, d1): (usize, usize)) -> Self {
        Shape(vec![d0, d1])
    }
}

impl From<(usize, usize, usize)> for Shape {
    fn from((d0, d1, d2): (usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2])
    }
}

impl From<(usize, usize, usize, usize)> for Shape {
    fn from((d0, d1, d2, d3): (usize, usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2, d3])
    }
}

impl From<Vec<usize>> for Shape {
    fn from(v: Vec<usize>) -> Self {
        Shape(v)
    }
}

impl From<&[usize]> for Shape {
    fn from(s: &[usize]) -> Self {
        Shape(s.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_shape() {
        let s = Shape::from(());
        assert_eq!(s.rank(), 0);
        assert_eq!(s.elem_count(), 1);
        assert!(s.stride_contiguous().is_empty());
    }

    #[test]
    fn test_empty_dim_has_no_elements() {
        assert_eq!(Shape::from((3, 0)).elem_count(), 0);
    }

    #[test]
    fn test_weight_strides() {
        let s = Shape::from((8, 3, 3, 3));
        assert_eq!(s.stride_contiguous(), vec![27, 9, 3, 1]);
        assert_eq!(s.elem_count(), 216);
    }

    #[test]
    fn test_broadcast_shape() {
        let a = Shape::from((2, 1));
        let b = Shape::from((1, 3));
        assert_eq!(Shape::broadcast_shape(&a, &b).unwrap(), Shape::from((2, 3)));
        assert!(Shape::broadcast_shape(&Shape::from(3), &Shape::from(4)).is_err());
    }

    #[test]
    fn test_broadcasts_to() {
        let out = Shape::from((4, 3));
        assert!(Shape::from(3).broadcasts_to(&out));
        assert!(Shape::from((1, 3)).broadcasts_to(&out));
        assert!(Shape::from(()).broadcasts_to(&out));
        assert!(!Shape::from((4, 1, 3)).broadcasts_to(&out));
        assert!(!Shape::from(4).broadcasts_to(&out));
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Shape::from((3, 4))), "[3, 4]");
    }
}
