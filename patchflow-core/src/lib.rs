//! Patchflow Core
//!
//! Core types shared by the patchflow runner and its store clients.
//!
//! This crate contains:
//! - Domain types: the run record and its status/visibility enums
//! - DTOs: the write-side update applied to a run
//! - Output normalization for text captured from external processes

pub mod ansi;
pub mod domain;
pub mod dto;
