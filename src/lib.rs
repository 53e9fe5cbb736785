//! Analysis core for battery-cycler logs.
//!
//! The crate turns a cycler time series into a step table (every
//! (cycle, step) described and typed), a per-cycle summary, and
//! incremental-capacity (dQ/dV) curves.
//!
//! ```text
//! TimeSeries -> steps::build_step_table -> StepTable
//!            -> summary::build_summary  -> CycleSummary
//!            -> ica::dqdv_split         -> charge / discharge WideIcaTables
//! ```

pub mod config;
pub mod cycles;
pub mod error;
pub mod ica;
pub mod schema;
pub mod steps;
pub mod summary;

#[cfg(test)]
mod testdata;

pub use config::CoreConfig;
pub use cycles::Direction;
pub use error::{CoreError, CoreResult};
pub use ica::{dqdv, dqdv_split, Converter, SplitIca};
pub use schema::{ColumnMap, RawTable, Sample, StepKey, TimeSeries};
pub use steps::{build_step_table, StepTable, StepType};
pub use summary::{build_summary, CycleSummary};
