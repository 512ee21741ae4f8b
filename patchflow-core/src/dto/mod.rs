//! Data Transfer Objects for store writes
//!
//! This module contains the write-side representation of a run. Store
//! backends translate it into their own update statement or request body.

pub mod run;
