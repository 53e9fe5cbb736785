pub mod builder;
pub mod datetime;

pub use builder::{
    build_summary, to_mah_per_g, CycleSummary, CycleSummaryRow, DateTimeValue, SummaryBuilder,
    VoltageBounds,
};
pub use datetime::{day_count_to_datetime, day_count_to_string, day_count_to_unix_seconds};
