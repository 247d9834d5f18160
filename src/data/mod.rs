//! Data sources.
//!
//! - synthetic batches with known ground truth (`synthetic`)

pub mod synthetic;

pub use synthetic::*;
