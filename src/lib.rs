//! Before/after ridership analysis around a service cutover.
//!
//! The pipeline loads ridership observations ([`loader`]), scans them for
//! coverage gaps ([`quality`]), splits them at the cutover ([`partition`]),
//! rolls them up per line and per stop and compares the two periods
//! ([`analyzers`]). [`pipeline::run_analysis`] wires the steps together.

pub mod analyzers;
pub mod cleaning;
pub mod config;
pub mod error;
pub mod loader;
pub mod model;
pub mod output;
pub mod partition;
pub mod pipeline;
pub mod quality;
pub mod timestamps;

pub use error::{AnalysisError, Result};
