use na::DMatrix;

use crate::types::Float;

/// Ratio of the smallest to the largest singular value. 0 for a singular (or
/// empty) matrix, 1 for a perfectly conditioned one.
pub fn reciprocal_condition(m: &DMatrix<Float>) -> Float {
    if m.is_empty() {
        return 0.;
    }
    let singular_values = m.singular_values();
    let max = singular_values.max();
    if !(max > 0.) {
        return 0.;
    }
    singular_values.min() / max
}

/// Largest absolute entry, i.e. the infinity norm of a vector
pub fn max_abs(values: impl IntoIterator<Item = Float>) -> Float {
    values.into_iter().fold(0., |acc, v| acc.max(v.abs()))
}

/// n evenly spaced samples from start to stop, both included
pub fn linspace(start: Float, stop: Float, n: usize) -> Vec<Float> {
    match n {
        0 => vec![],
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as Float;
            (0..n)
                .map(|i| {
                    if i == n - 1 {
                        stop
                    } else {
                        start + step * i as Float
                    }
                })
                .collect()
        }
    }
}

#[macro_export]
macro_rules! assert_close {
    ($left:expr, $right:expr, $tolerance:expr) => {
        let left = $left;
        let right = $right;
        let tol = $tolerance;
        let diff = (left - right).abs();
        if !(diff <= tol) {
            panic!(
                "assertion failed: {} ~= {} \
                (tolerance: {}, difference: {})",
                left, right, tol, diff
            );
        }
    };
}

#[macro_export]
macro_rules! assert_vec_close {
    ($left:expr, $right:expr, $tolerance:expr) => {
        let left = $left;
        let right = $right;
        let tol = $tolerance;
        assert_eq!(left.len(), right.len(), "length mismatch");
        for (a, b) in left.iter().zip(right.iter()) {
            $crate::assert_close!(a, b, tol);
        }
    };
}
