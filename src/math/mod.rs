//! Numerical kernels: grid convolution and the bounded least-squares solver.

pub mod conv;
pub mod levmar;

pub use conv::*;
pub use levmar::*;
