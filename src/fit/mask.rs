//! Sensitivity mask: which parameters the solver may move.

use crate::error::{FitError, Result};

/// Fixed/free flag per parameter, shared by every unit of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensitivityMask {
    free: Vec<bool>,
}

impl SensitivityMask {
    /// Build a mask from raw numeric flags (any nonzero value means free).
    ///
    /// The flag vector must have exactly one entry per parameter; a short
    /// vector is rejected rather than padded.
    pub fn from_flags(flags: &[f64], param_count: usize) -> Result<Self> {
        if flags.len() != param_count {
            return Err(FitError::SensitivityLength {
                expected: param_count,
                got: flags.len(),
            });
        }
        let free = flags
            .iter()
            .enumerate()
            .map(|(index, &value)| {
                if value.is_finite() {
                    Ok(value != 0.0)
                } else {
                    Err(FitError::InvalidFlag { index, value })
                }
            })
            .collect::<Result<Vec<bool>>>()?;
        Ok(Self { free })
    }

    pub fn all_free(param_count: usize) -> Self {
        Self {
            free: vec![true; param_count],
        }
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.free
    }

    pub fn free_count(&self) -> usize {
        self.free.iter().filter(|f| **f).count()
    }
}
