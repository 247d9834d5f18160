//! Export batch results to CSV.
//!
//! The exports are meant to be easy to consume in spreadsheets or downstream
//! scripts: one row per unit for parameters, one row per frame for curves.

use std::path::Path;

use crate::domain::{BatchOutput, FrameTiming, ModelKind};
use crate::error::Result;

/// Write fitted parameters plus the per-unit solver diagnostics.
pub fn write_params_csv(path: &Path, model: ModelKind, output: &BatchOutput) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec!["unit".to_string()];
    header.extend(model.param_names().iter().map(|s| s.to_string()));
    header.extend(["iterations", "converged", "cost", "stop"].map(String::from));
    writer.write_record(&header)?;

    for report in &output.reports {
        let mut row = vec![report.unit.to_string()];
        row.extend(output.params.column(report.unit).iter().map(|v| format!("{v:.10}")));
        row.push(report.iterations.to_string());
        row.push(report.converged.to_string());
        row.push(format!("{:.6e}", report.cost));
        row.push(report.stop.label().to_string());
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}

/// Write model curves, one column per unit.
pub fn write_curves_csv(path: &Path, frames: &[FrameTiming], output: &BatchOutput) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    let units = output.curves.ncols();

    let mut header = vec!["frame".to_string(), "start".to_string(), "end".to_string()];
    header.extend((0..units).map(|u| format!("unit_{u}")));
    writer.write_record(&header)?;

    for (i, frame) in frames.iter().enumerate() {
        let mut row = vec![i.to_string(), frame.start.to_string(), frame.end.to_string()];
        row.extend(output.curves.row(i).iter().map(|v| format!("{v:.10}")));
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}
