//! Voxel-wise kinetic fitting.
//!
//! Responsibilities:
//!
//! - turn raw sensitivity flags into a fixed/free mask
//! - broadcast shared initial parameters / weights to every unit
//! - fit each unit with worker-owned scratch
//! - spread units across worker threads (parallel, lock-free writes)

pub mod batch;
pub mod broadcast;
pub mod dispatch;
pub mod mask;
pub mod worker;

pub use batch::*;
pub use broadcast::*;
pub use dispatch::*;
pub use mask::*;
pub use worker::*;
