//! Read/write JSON request and result files.
//!
//! - batch requests (`domain::BatchRequest`) in and out (the `simulate`
//!   command writes them, `fit` reads them)
//! - batch results: fitted parameters, curves and per-unit reports
//! - evaluation requests/results for `kfit eval`

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use nalgebra::DMatrix;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::{BatchOutput, BatchRequest, FrameTiming, ModelKind, UnitReport};
use crate::error::Result;
use crate::io::matrix::MatrixFile;

const TOOL: &str = "kfit";

/// Saved result of a batch fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultFile {
    pub tool: String,
    pub generated: DateTime<Utc>,
    pub model: ModelKind,
    pub param_names: Vec<String>,
    pub threads_used: usize,
    #[serde(with = "crate::io::matrix")]
    pub params: DMatrix<f64>,
    #[serde(with = "crate::io::matrix")]
    pub curves: DMatrix<f64>,
    pub reports: Vec<UnitReport>,
}

impl ResultFile {
    pub fn new(model: ModelKind, output: &BatchOutput) -> Self {
        Self {
            tool: TOOL.to_string(),
            generated: Utc::now(),
            model,
            param_names: model.param_names().iter().map(|s| s.to_string()).collect(),
            threads_used: output.threads_used,
            params: output.params.clone(),
            curves: output.curves.clone(),
            reports: output.reports.clone(),
        }
    }
}

/// Input of `kfit eval`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalRequest {
    pub model: ModelKind,
    pub frames: Vec<FrameTiming>,
    pub plasma: Vec<f64>,
    pub whole_blood: Vec<f64>,
    #[serde(default)]
    pub decay: f64,
    pub step: f64,
    /// Parameters, params × units.
    #[serde(with = "crate::io::matrix")]
    pub params: DMatrix<f64>,
    /// Also return the Jacobian of the first unit.
    #[serde(default)]
    pub jacobian: bool,
}

/// Output of `kfit eval`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalFile {
    pub tool: String,
    pub generated: DateTime<Utc>,
    pub model: ModelKind,
    #[serde(with = "crate::io::matrix")]
    pub curves: DMatrix<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jacobian: Option<MatrixFile>,
}

impl EvalFile {
    pub fn new(model: ModelKind, curves: DMatrix<f64>, jacobian: Option<&DMatrix<f64>>) -> Self {
        Self {
            tool: TOOL.to_string(),
            generated: Utc::now(),
            model,
            curves,
            jacobian: jacobian.map(MatrixFile::from_matrix),
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

pub fn read_request(path: &Path) -> Result<BatchRequest> {
    read_json(path)
}

pub fn write_request(path: &Path, request: &BatchRequest) -> Result<()> {
    write_json(path, request)
}

pub fn write_result(path: &Path, result: &ResultFile) -> Result<()> {
    write_json(path, result)
}

pub fn read_eval_request(path: &Path) -> Result<EvalRequest> {
    read_json(path)
}

pub fn write_eval(path: &Path, eval: &EvalFile) -> Result<()> {
    write_json(path, eval)
}

/// Write a bare column-major matrix (e.g. simulation ground truth).
pub fn write_matrix(path: &Path, m: &DMatrix<f64>) -> Result<()> {
    write_json(path, &MatrixFile::from_matrix(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StopReason;

    #[test]
    fn result_file_round_trips_through_disk() {
        let output = BatchOutput {
            params: DMatrix::from_column_slice(3, 1, &[0.05, 0.3, 0.2]),
            curves: DMatrix::from_column_slice(2, 1, &[1.0, 2.0]),
            reports: vec![UnitReport {
                unit: 0,
                worker: 0,
                iterations: 4,
                converged: true,
                cost: 1e-20,
                stop: StopReason::StepTolerance,
            }],
            threads_used: 1,
        };
        let path = std::env::temp_dir().join(format!("kfit_result_{}.json", std::process::id()));
        write_result(&path, &ResultFile::new(ModelKind::OneTissue, &output)).unwrap();
        let back: ResultFile = read_json(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(back.model, ModelKind::OneTissue);
        assert_eq!(back.param_names, vec!["vb", "K1", "k2"]);
        assert_eq!(back.params, output.params);
        assert_eq!(back.reports, output.reports);
    }

    #[test]
    fn eval_request_defaults() {
        let json = r#"{
            "model": "1tcm",
            "frames": [{"start": 0.0, "end": 1.0}],
            "plasma": [1.0],
            "whole_blood": [1.0],
            "step": 0.1,
            "params": {"rows": 3, "cols": 1, "data": [0.05, 0.3, 0.2]}
        }"#;
        let req: EvalRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.decay, 0.0);
        assert!(!req.jacobian);
        assert_eq!(req.params.shape(), (3, 1));
    }
}
