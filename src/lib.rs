//! Trip segmenter library
//!
//! Turns noisy per-vehicle telemetry into discrete trip records.
//! Exposes modules for integration testing and binary reuse.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
