//! Column-major matrix (de)serialization.
//!
//! Matrices are stored as `{ "rows": r, "cols": c, "data": [...] }` with
//! `data` in column-major order (column `j` is `data[j*r .. (j+1)*r]`), the
//! same layout the fitter uses in memory.
//!
//! The module doubles as a `#[serde(with = "crate::io::matrix")]` adapter for
//! `DMatrix<f64>` fields.

use nalgebra::DMatrix;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixFile {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl MatrixFile {
    pub fn from_matrix(m: &DMatrix<f64>) -> Self {
        Self {
            rows: m.nrows(),
            cols: m.ncols(),
            data: m.as_slice().to_vec(),
        }
    }

    pub fn into_matrix(self) -> Result<DMatrix<f64>, String> {
        let expected = self.rows.checked_mul(self.cols);
        if expected != Some(self.data.len()) {
            return Err(format!(
                "matrix declares {}x{} but has {} values",
                self.rows,
                self.cols,
                self.data.len()
            ));
        }
        Ok(DMatrix::from_vec(self.rows, self.cols, self.data))
    }
}

pub fn serialize<S: Serializer>(m: &DMatrix<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    MatrixFile::from_matrix(m).serialize(serializer)
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DMatrix<f64>, D::Error> {
    MatrixFile::deserialize(deserializer)?
        .into_matrix()
        .map_err(D::Error::custom)
}
