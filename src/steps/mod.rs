// src/steps/mod.rs
pub mod classifier;
pub mod features;
pub mod table;

pub use classifier::{classify, classify_detailed, Classification, Rule, StepType, RULES};
pub use features::{
    extract_features, fractional_change, percentage_change, QuantityStats, StepFeatures,
};
pub use table::{
    build_step_table, find_c_rates, CRate, FailedStep, StepSelector, StepTable, StepTableRow,
    DEFAULT_NOMINAL_CAPACITY,
};

pub use crate::schema::StepKey;

