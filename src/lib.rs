//! `kinfit` library crate.
//!
//! The binary (`kfit`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the batch fitter can be embedded by other tools that already hold
//!   TACs in memory

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
