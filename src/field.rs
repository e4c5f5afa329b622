//! The field-container contract and a reference
//! implementation used by tests and by the default `fieldspec`.

use std::collections::BTreeMap;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::tag::Tag;

/// Opaque arithmetic container a physics solver fills in and the
/// remote interface reduces across workers. Implementors only need to
/// support the handful of operations the collectives in §4.B rely on;
/// everything else about the container's shape is up to the caller.
pub trait FieldContainer: Clone + Send + Sync + 'static {
    /// Elementwise sum, used by `reduce`.
    fn add(&self, other: &Self) -> Self;
    /// Elementwise product, used by `reduceMul` and `remoteApplySrc`.
    fn mul(&self, other: &Self) -> Self;
    /// Elementwise difference, used by `remoteDifference` and
    /// `remoteOpGatherFirst`.
    fn sub(&self, other: &Self) -> Self;
    /// Elementwise division, used by `remoteSrcEst`. Not exercised by
    /// any other collective, but required for it to be expressible
    /// without assuming a concrete container.
    fn div(&self, other: &Self) -> Self;
    /// Complex conjugate, used by `remoteSrcEst` and
    /// `normFromDifference`.
    fn conj(&self) -> Self;
    /// Sum along the given axis, `None` sums over all axes into a
    /// scalar-shaped container.
    fn sum_axis(&self, axis: Option<usize>) -> Self;
    /// The real part of every element.
    fn real(&self) -> Self;
    /// Square root, applied elementwise (used by `normFromDifference`).
    fn sqrt(&self) -> Self;
    /// An empty container of this same kind (what a `fieldspec`
    /// constructor produces).
    fn empty_like(&self) -> Self;

    /// Fuses per-tag results into a single keyed aggregate — the
    /// analogue of the externally-provided `CommonReducer`, used by
    /// `normFromDifference` to return its result keyed by subproblem
    /// identity rather than as a bare value.
    fn merge(items: impl IntoIterator<Item = (Tag, Self)>) -> MergedField<Self>
    where
        Self: Sized,
    {
        let mut merged = MergedField::new();
        for (tag, value) in items {
            merged.insert(tag, value);
        }
        merged
    }
}

/// A dense, shaped array of complex doubles: the reference
/// `FieldContainer` implementation good enough for tests and for
/// simple scalar/vector fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseField {
    pub shape: Vec<usize>,
    pub data: Vec<Complex64>,
}

impl DenseField {
    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![Complex64::new(0.0, 0.0); len],
        }
    }

    pub fn scalar(value: Complex64) -> Self {
        Self {
            shape: vec![],
            data: vec![value],
        }
    }

    pub fn from_vec(data: Vec<Complex64>) -> Self {
        let len = data.len();
        Self {
            shape: vec![len],
            data,
        }
    }

    fn zip_with(&self, other: &Self, f: impl Fn(Complex64, Complex64) -> Complex64) -> Self {
        assert_eq!(
            self.data.len(),
            other.data.len(),
            "field containers must have matching element counts"
        );
        Self {
            shape: self.shape.clone(),
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(a, b)| f(*a, *b))
                .collect(),
        }
    }

    fn map(&self, f: impl Fn(Complex64) -> Complex64) -> Self {
        Self {
            shape: self.shape.clone(),
            data: self.data.iter().map(|v| f(*v)).collect(),
        }
    }
}

impl FieldContainer for DenseField {
    fn add(&self, other: &Self) -> Self {
        self.zip_with(other, |a, b| a + b)
    }

    fn mul(&self, other: &Self) -> Self {
        if other.data.len() == 1 {
            let scalar = other.data[0];
            return self.map(|a| a * scalar);
        }
        self.zip_with(other, |a, b| a * b)
    }

    fn sub(&self, other: &Self) -> Self {
        self.zip_with(other, |a, b| a - b)
    }

    fn div(&self, other: &Self) -> Self {
        if other.data.len() == 1 {
            let scalar = other.data[0];
            return self.map(|a| a / scalar);
        }
        self.zip_with(other, |a, b| a / b)
    }

    fn conj(&self) -> Self {
        self.map(|a| a.conj())
    }

    fn sum_axis(&self, axis: Option<usize>) -> Self {
        match axis {
            None => {
                let total: Complex64 = self.data.iter().copied().sum();
                Self::scalar(total)
            }
            Some(ax) => {
                // Only the leading-axis collapse is needed by the
                // collectives in this crate; shapes are assumed to be
                // at most 2-D for this reference implementation.
                if self.shape.len() < 2 || ax != 0 {
                    let total: Complex64 = self.data.iter().copied().sum();
                    return Self::scalar(total);
                }
                let rows = self.shape[0];
                let cols: usize = self.shape[1..].iter().product();
                let mut out = vec![Complex64::new(0.0, 0.0); cols];
                for r in 0..rows {
                    for c in 0..cols {
                        out[c] += self.data[r * cols + c];
                    }
                }
                Self {
                    shape: self.shape[1..].to_vec(),
                    data: out,
                }
            }
        }
    }

    fn real(&self) -> Self {
        self.map(|a| Complex64::new(a.re, 0.0))
    }

    fn sqrt(&self) -> Self {
        self.map(|a| a.sqrt())
    }

    fn empty_like(&self) -> Self {
        Self::zeros(self.shape.clone())
    }
}

/// The result of [`FieldContainer::merge`]: per-tag results from
/// multiple workers or subproblems fused into a single keyed
/// aggregate — the Rust analogue of an externally-provided
/// `CommonReducer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedField<F> {
    values: BTreeMap<Tag, F>,
}

impl<F> MergedField<F> {
    pub fn new() -> Self {
        Self { values: BTreeMap::new() }
    }

    pub fn insert(&mut self, tag: Tag, value: F) {
        self.values.insert(tag, value);
    }

    pub fn get(&self, tag: &Tag) -> Option<&F> {
        self.values.get(tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Tag, &F)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<F> Default for MergedField<F> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_elementwise() {
        let a = DenseField::from_vec(vec![Complex64::new(1.0, 0.0), Complex64::new(2.0, 0.0)]);
        let b = DenseField::from_vec(vec![Complex64::new(3.0, 0.0), Complex64::new(4.0, 0.0)]);
        let c = a.add(&b);
        assert_eq!(c.data, vec![Complex64::new(4.0, 0.0), Complex64::new(6.0, 0.0)]);
    }

    #[test]
    fn conj_flips_imaginary_part() {
        let a = DenseField::from_vec(vec![Complex64::new(1.0, 2.0)]);
        assert_eq!(a.conj().data[0], Complex64::new(1.0, -2.0));
    }

    #[test]
    fn sum_axis_none_collapses_to_scalar() {
        let a = DenseField::from_vec(vec![
            Complex64::new(1.0, 0.0),
            Complex64::new(2.0, 0.0),
            Complex64::new(3.0, 0.0),
        ]);
        let s = a.sum_axis(None);
        assert_eq!(s.data, vec![Complex64::new(6.0, 0.0)]);
    }

    #[test]
    fn merged_field_roundtrips_by_tag() {
        let mut merged = MergedField::new();
        let tag = Tag::new(1, 0);
        merged.insert(tag, DenseField::scalar(Complex64::new(5.0, 0.0)));
        assert_eq!(merged.get(&tag).unwrap().data[0], Complex64::new(5.0, 0.0));
        assert!(merged.get(&Tag::new(2, 0)).is_none());
    }

    #[test]
    fn merge_collects_one_entry_per_tag() {
        let a = Tag::new(0, 0);
        let b = Tag::new(1, 0);
        let merged = DenseField::merge([
            (a, DenseField::scalar(Complex64::new(1.0, 0.0))),
            (b, DenseField::scalar(Complex64::new(2.0, 0.0))),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get(&a).unwrap().data[0], Complex64::new(1.0, 0.0));
        assert_eq!(merged.get(&b).unwrap().data[0], Complex64::new(2.0, 0.0));
    }
}
