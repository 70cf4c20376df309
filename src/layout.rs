//! Strided tensor layouts.

use std::fmt;
use std::ops::Index;

use crate::dtype::DType;

/// Shape, per-axis element stride and dtype of a tensor.
///
/// A layout with `ndim() == 0` denotes an absent optional tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorLayout {
    pub shape: Vec<usize>,
    pub stride: Vec<isize>,
    pub dtype: DType,
}

/// Element range touched by a layout, `high_elem` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorSpan {
    pub low_elem: isize,
    pub high_elem: isize,
    pub elem_size: usize,
}

impl TensorSpan {
    pub fn dist_elem(&self) -> usize {
        (self.high_elem - self.low_elem) as usize
    }

    pub fn dist_byte(&self) -> usize {
        self.dist_elem() * self.elem_size
    }
}

impl TensorLayout {
    /// Contiguous layout.
    pub fn new(shape: &[usize], dtype: DType) -> Self {
        let mut layout = Self {
            shape: shape.to_vec(),
            stride: vec![0; shape.len()],
            dtype,
        };
        layout.init_contiguous_stride();
        layout
    }

    pub fn with_stride(shape: &[usize], stride: &[isize], dtype: DType) -> Self {
        debug_assert_eq!(shape.len(), stride.len());
        Self {
            shape: shape.to_vec(),
            stride: stride.to_vec(),
            dtype,
        }
    }

    /// Absent tensor of the given dtype.
    pub fn empty(dtype: DType) -> Self {
        Self {
            shape: Vec::new(),
            stride: Vec::new(),
            dtype,
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shape.is_empty()
    }

    /// Reset strides to row-major contiguous; returns the element count.
    pub fn init_contiguous_stride(&mut self) -> usize {
        let mut acc = 1usize;
        for (dim, stride) in self.shape.iter().zip(self.stride.iter_mut()).rev() {
            *stride = acc as isize;
            acc *= *dim;
        }
        acc
    }

    pub fn total_nr_elems(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        self.shape.iter().product()
    }


    pub fn span(&self) -> TensorSpan {
        let elem_size = self.dtype.size_in_bytes();
        if self.is_empty() || self.shape.contains(&0) {
            return TensorSpan {
                low_elem: 0,
                high_elem: 0,
                elem_size,
            };
        }
        let (mut low, mut high) = (0isize, 0isize);
        for (dim, stride) in self.shape.iter().zip(self.stride.iter()) {
            let reach = stride * (*dim as isize - 1);
            if reach < 0 {
                low += reach;
            } else {
                high += reach;
            }
        }
        TensorSpan {
            low_elem: low,
            high_elem: high + 1,
            elem_size,
        }
    }

    /// Element offset of `index` relative to the lowest touched element.
    pub fn offset_of(&self, index: &[usize]) -> usize {
        let raw: isize = index
            .iter()
            .zip(self.stride.iter())
            .map(|(i, s)| *i as isize * s)
            .sum();
        (raw - self.span().low_elem) as usize
    }

    pub fn eq_shape(&self, other: &TensorLayout) -> bool {
        self.shape == other.shape
    }

    /// Shape, strides and dtype category; scales and zero points are left out.
    pub fn shape_key(&self) -> String {
        format!("{:?}{:?}:{:?}", self.shape, self.stride, self.dtype.enumv())
    }
}

impl Index<usize> for TensorLayout {
    type Output = usize;

    fn index(&self, axis: usize) -> &usize {
        &self.shape[axis]
    }
}

impl fmt::Display for TensorLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}{:?}:{}", self.shape, self.stride, self.dtype)
    }
}

/// Visit every multi-index of `shape` in row-major order.
pub fn for_each_index(shape: &[usize], mut f: impl FnMut(&[usize])) {
    if shape.is_empty() || shape.contains(&0) {
        return;
    }
    let mut index = vec![0usize; shape.len()];
    loop {
        f(&index);
        let mut axis = shape.len();
        loop {
            if axis == 0 {
                return;
            }
            axis -= 1;
            index[axis] += 1;
            if index[axis] < shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_stride_and_span() {
        let layout = TensorLayout::new(&[2, 3, 4], DType::Int32);
        assert_eq!(layout.stride, vec![12, 4, 1]);
        assert_eq!(layout.span().dist_elem(), 24);
        assert_eq!(layout.span().dist_byte(), 96);
    }

    #[test]
    fn test_transposed_span() {
        // chwn32-style restride of a (co=2, c=1, fh=1, fw=1, 32) filter
        let layout = TensorLayout::with_stride(&[2, 1, 1, 1, 32], &[32, 64, 64, 64, 1], DType::Int8);
        assert_eq!(layout.span().dist_byte(), 64);
        assert_eq!(layout.offset_of(&[1, 0, 0, 0, 5]), 37);
    }

    #[test]
    fn test_negative_stride() {
        let layout = TensorLayout::with_stride(&[4], &[-1], DType::Int8);
        let span = layout.span();
        assert_eq!(span.low_elem, -3);
        assert_eq!(span.dist_elem(), 4);
        assert_eq!(layout.offset_of(&[0]), 3);
        assert_eq!(layout.offset_of(&[3]), 0);
    }

    #[test]
    fn test_empty_layout() {
        let layout = TensorLayout::empty(DType::Int8);
        assert!(layout.is_empty());
        assert_eq!(layout.total_nr_elems(), 0);
        assert_eq!(layout.span().dist_byte(), 0);
    }

    #[test]
    fn test_for_each_index_order() {
        let mut seen = Vec::new();
        for_each_index(&[2, 2], |idx| seen.push(idx.to_vec()));
        assert_eq!(seen, vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]);
    }
}
