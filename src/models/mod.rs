//! Compartmental kinetic models.
//!
//! Models are implemented as stateless evaluators behind the [`KineticModel`]
//! trait so that fitting code stays generic over which model is used.

pub mod config;
pub mod evaluate;
pub mod liver;
pub mod model;
pub mod one_tissue;

pub use config::*;
pub use evaluate::*;
pub use liver::*;
pub use model::*;
pub use one_tissue::*;
