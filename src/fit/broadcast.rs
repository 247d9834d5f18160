//! Broadcasting of shared inputs to per-unit columns.
//!
//! Callers may pass a single initial-parameter column or a single weight
//! column for the whole batch. We expand those here, once, so the workers
//! only ever see full `rows × units` matrices.
//!
//! - initial parameters: 1 column → replicated; `units` columns → copied
//!   (the copy becomes the output parameter matrix, fitted in place)
//! - weights: 1 column → replicated into a new matrix; `units` columns →
//!   borrowed as-is, no copy

use std::borrow::Cow;

use nalgebra::DMatrix;

use crate::error::{FitError, Result};

/// Replicate one column `units` times (column-major).
pub fn replicate_column(column: &[f64], units: usize) -> DMatrix<f64> {
    let rows = column.len();
    let mut data = Vec::with_capacity(rows * units);
    for _ in 0..units {
        data.extend_from_slice(column);
    }
    DMatrix::from_vec(rows, units, data)
}

/// Expand initial parameters to `param_count × units`.
pub fn broadcast_initial(initial: &DMatrix<f64>, param_count: usize, units: usize) -> Result<DMatrix<f64>> {
    if initial.nrows() != param_count {
        return Err(FitError::shape(format!(
            "Initial parameters have {} rows, expected {param_count} (one per parameter).",
            initial.nrows()
        )));
    }
    match initial.ncols() {
        1 => Ok(replicate_column(initial.as_slice(), units)),
        n if n == units => Ok(initial.clone()),
        n => Err(FitError::shape(format!(
            "Initial parameters have {n} columns; expected 1 (shared) or {units} (one per unit)."
        ))),
    }
}

/// Expand weights to `frames × units`, borrowing when already per-unit.
pub fn broadcast_weights(weights: &DMatrix<f64>, frames: usize, units: usize) -> Result<Cow<'_, DMatrix<f64>>> {
    if weights.nrows() != frames {
        return Err(FitError::shape(format!(
            "Weights have {} rows, expected {frames} (one per frame).",
            weights.nrows()
        )));
    }
    match weights.ncols() {
        1 => Ok(Cow::Owned(replicate_column(weights.as_slice(), units))),
        n if n == units => Ok(Cow::Borrowed(weights)),
        n => Err(FitError::shape(format!(
            "Weights have {n} columns; expected 1 (shared) or {units} (one per unit)."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_initial_column_is_replicated() {
        let init = DMatrix::from_column_slice(3, 1, &[0.1, 0.2, 0.3]);
        let p = broadcast_initial(&init, 3, 4).unwrap();
        assert_eq!(p.shape(), (3, 4));
        for j in 0..4 {
            assert_eq!(p.column(j).as_slice(), &[0.1, 0.2, 0.3]);
        }
    }

    #[test]
    fn per_unit_initial_is_copied_one_to_one() {
        let init = DMatrix::from_column_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let p = broadcast_initial(&init, 2, 3).unwrap();
        assert_eq!(p, init);
    }

    #[test]
    fn unsupported_initial_column_count_is_rejected() {
        let init = DMatrix::zeros(3, 2);
        let err = broadcast_initial(&init, 3, 5).unwrap_err();
        assert!(matches!(err, FitError::ShapeMismatch(_)));
        assert!(broadcast_initial(&DMatrix::zeros(2, 1), 3, 5).is_err());
    }

    #[test]
    fn shared_weights_are_owned_copies() {
        let w = DMatrix::from_column_slice(2, 1, &[1.0, 0.5]);
        let full = broadcast_weights(&w, 2, 3).unwrap();
        assert!(matches!(full, Cow::Owned(_)));
        assert_eq!(full.shape(), (2, 3));
        assert_eq!(full.column(2).as_slice(), &[1.0, 0.5]);
    }

    #[test]
    fn per_unit_weights_are_borrowed() {
        let w = DMatrix::from_element(4, 3, 1.0);
        let full = broadcast_weights(&w, 4, 3).unwrap();
        assert!(matches!(full, Cow::Borrowed(_)));
    }

    #[test]
    fn zero_units_broadcast_to_empty() {
        let init = DMatrix::from_column_slice(3, 1, &[0.1, 0.2, 0.3]);
        assert_eq!(broadcast_initial(&init, 3, 0).unwrap().shape(), (3, 0));
    }
}
