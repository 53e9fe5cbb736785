// src/main.rs
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use log::info;
use serde::Serialize;

use cellcore::config::{CoreConfig, RowSelection};
use cellcore::ica::{dqdv_split, SplitIca};
use cellcore::steps::build_step_table;
use cellcore::summary::SummaryBuilder;
use cellcore::{CycleSummary, RawTable, StepTable, TimeSeries};

/// Data points the tester flagged as per-cycle statistics rows, when the
/// export carries them.
const STATISTICS_COLUMN: &str = "Statistics_Data_Point";

#[derive(Serialize)]
struct Report {
    steps: StepTable,
    summary: CycleSummary,
    ica: SplitIca,
}

fn usage() -> String {
    "usage: cellcore <raw.json> <mass_mg> [config.json]".to_string()
}

fn statistics_points(raw: &RawTable) -> Option<Vec<u64>> {
    let column = raw.get(STATISTICS_COLUMN)?;
    Some(
        column
            .iter()
            .filter(|v| v.is_finite() && **v >= 0.0)
            .map(|&v| v as u64)
            .collect(),
    )
}

fn main() -> Result<()> {
    env_logger::init();
    let mut args = std::env::args().skip(1);
    let (Some(raw_path), Some(mass)) = (args.next(), args.next()) else {
        bail!(usage());
    };
    let raw_path = PathBuf::from(raw_path);
    let mass: f64 = mass
        .parse()
        .with_context(|| format!("mass '{mass}' is not a number"))?;
    let mut config = match args.next() {
        Some(path) => CoreConfig::from_path(&path)
            .with_context(|| format!("failed to load config from {path}"))?,
        None => CoreConfig::default(),
    };

    let text = fs::read_to_string(&raw_path)
        .with_context(|| format!("failed to read {}", raw_path.display()))?;
    let raw: RawTable = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a table of numeric columns", raw_path.display()))?;
    let series = TimeSeries::from_columns(&raw, &config.columns)?;
    info!("{} samples in {} cycles", series.len(), series.cycle_numbers().len());

    let points = statistics_points(&raw);
    if points.is_none() && config.summary.row_selection == RowSelection::TesterStatistics {
        info!("no {STATISTICS_COLUMN} column, summarising the last sample of each cycle");
        config.summary.row_selection = RowSelection::LastPerCycle;
    }

    let steps = build_step_table(&series, &config.extractor, &config.classifier);
    let mut builder = SummaryBuilder::new(&config.summary).with_step_table(&steps);
    if let Some(points) = &points {
        builder = builder.with_statistics_points(points);
    }
    let summary = builder.build(&series, Some(mass))?;
    let ica = dqdv_split(&series, &steps, mass, &config.assembler)?;

    let report = Report {
        steps,
        summary,
        ica,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
