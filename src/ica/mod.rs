// src/ica/mod.rs
pub mod assembler;
pub mod converter;
pub mod numeric;

pub use assembler::{
    dqdv_combined, dqdv_cycle, dqdv_cycles, dqdv_direction, dqdv_split, CycleIca, FailedCurve,
    IcaRow, LongIcaTable, SplitIca, WideIcaTable,
};
pub use converter::{
    dqdv, inspect, Converter, CurveData, DataQualityWarning, Incremented, Inspected, Inspection,
    Postprocessed, Preprocessed, Stage,
};
pub use numeric::Interpolator;
