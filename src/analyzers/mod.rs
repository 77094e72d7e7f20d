//! Ridership aggregation and before/after comparison.
//!
//! Period subsets are rolled up into [`types::AggregateBucket`]s per scope,
//! then paired across the cutover into [`types::ChangeResult`]s.

pub mod aggregate;
pub mod change;
pub mod snapshot;
pub mod types;
pub mod utility;
