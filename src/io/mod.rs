//! Input/output helpers.
//!
//! - column-major matrix serde adapter (`matrix`)
//! - JSON request/result files (`json`)
//! - TAC CSV ingest (`ingest`)
//! - parameter/curve CSV exports (`export`)

pub mod export;
pub mod ingest;
pub mod json;
pub mod matrix;

pub use export::*;
pub use ingest::*;
pub use json::*;
pub use matrix::MatrixFile;
