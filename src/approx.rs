//! Utilities to approximate equality of floating point values and tensors.
//!
//! Gradients and optimizer results are compared through a graded
//! [`ApproxEquality`] instead of raw `==`.

use crate::tensors::Tensor;

/// The max epsilon accepted.
pub const MAX_ERROR: f64 = 1e-3;

/// The expected epsilon for values that went through a few float ops.
pub const AVG_ERROR: f64 = 1e-6;

/// The best expected epsilon.
pub const MIN_ERROR: f64 = 1e-12;

/// The approximated equality enumerated, best first.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApproxEquality {
    /// Within [`MIN_ERROR`].
    Precise = 0,

    /// Within [`AVG_ERROR`].
    Partial = 1,

    /// Within [`MAX_ERROR`].
    Relative = 2,

    /// No relative equality.
    Scarce = 3,
}

/// Grades the distance between two values.
pub trait RelativeEq<Rhs: ?Sized = Self> {
    /// Enumerates the equality of `self` and `rhs`.
    fn approx_eq(&self, rhs: &Rhs) -> ApproxEquality;
}

impl RelativeEq for f64 {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        let dif = (self - rhs).abs();

        if dif < MIN_ERROR {
            ApproxEquality::Precise
        } else if dif < AVG_ERROR {
            ApproxEquality::Partial
        } else if dif < MAX_ERROR {
            ApproxEquality::Relative
        } else {
            // NaN lands here too
            ApproxEquality::Scarce
        }
    }
}

impl RelativeEq for [f64] {
    /// The worst grade over all element pairs; differing lengths are `Scarce`.
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        if self.len() != rhs.len() {
            return ApproxEquality::Scarce;
        }
        self.iter()
            .zip(rhs)
            .map(|(a, b)| a.approx_eq(b))
            .max()
            .unwrap_or(ApproxEquality::Precise)
    }
}

impl RelativeEq for Tensor<f64> {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        if self.shape != rhs.shape {
            return ApproxEquality::Scarce;
        }
        self.data.as_slice().approx_eq(rhs.data.as_slice())
    }
}

/// Whether `a` and `b` are equal within the `Precise` epsilon.
pub fn approx_eq<A: RelativeEq<B> + ?Sized, B: ?Sized>(a: &A, b: &B) -> bool {
    a.approx_eq(b) == ApproxEquality::Precise
}

/// Whether `a` and `b` are at least as close as `level`.
pub fn within<A: RelativeEq<B> + ?Sized, B: ?Sized>(a: &A, b: &B, level: ApproxEquality) -> bool {
    a.approx_eq(b) <= level
}

/// Asserts that two tensors agree to the `Partial` epsilon.
///
/// # Panics
/// Panics with both tensors printed when they do not.
#[track_caller]
pub fn assert_close(actual: &Tensor<f64>, expected: &Tensor<f64>) {
    assert!(
        within(actual, expected, ApproxEquality::Partial),
        "tensors differ: actual {:?} {:?}, expected {:?} {:?}",
        actual.shape,
        actual.data,
        expected.shape,
        expected.data
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grades_scalar_distances() {
        assert_eq!(1.0_f64.approx_eq(&1.0), ApproxEquality::Precise);
        assert_eq!(1.0_f64.approx_eq(&(1.0 + 1e-8)), ApproxEquality::Partial);
        assert_eq!(1.0_f64.approx_eq(&1.0001), ApproxEquality::Relative);
        assert_eq!(1.0_f64.approx_eq(&1.1), ApproxEquality::Scarce);
        assert_eq!(f64::NAN.approx_eq(&f64::NAN), ApproxEquality::Scarce);
    }

    #[test]
    fn slices_take_the_worst_grade() {
        let a: [f64; 3] = [1.0, 2.0, 3.0];
        let b: [f64; 3] = [1.0, 2.0 + 1e-8, 3.0001];
        assert_eq!(a[..].approx_eq(&b[..]), ApproxEquality::Relative);
        assert_eq!(a[..].approx_eq(&a[..2]), ApproxEquality::Scarce);
    }

    #[test]
    fn tensors_compare_shapes_first() {
        let v = Tensor::vector(vec![1.0, 2.0]);
        let m = Tensor::new(vec![1, 2], vec![1.0, 2.0]);
        assert!(approx_eq(&v, &v.clone()));
        assert!(!within(&v, &m, ApproxEquality::Relative));
    }
}
