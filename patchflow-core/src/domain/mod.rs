//! Core domain types
//!
//! These types represent the records the runner reads from the run table.
//! They are shared between the store backends (which decode them) and the
//! runner (which executes them).

pub mod payload;
pub mod run;
