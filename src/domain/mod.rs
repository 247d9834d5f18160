//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - model selection (`ModelKind`) and frame timing (`FrameTiming`)
//! - batch inputs (`BatchRequest`, `ParamBounds`, `DispatchOptions`)
//! - fit outputs (`BatchOutput`, `UnitReport`, `StopReason`)

pub mod types;

pub use types::*;
