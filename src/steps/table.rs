use std::collections::BTreeMap;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{ClassifierThresholds, ExtractorConfig};
use crate::error::{CoreError, CoreResult};
use crate::schema::TimeSeries;
use crate::steps::{classify_detailed, extract_features, StepFeatures, StepType};

/// One classified (cycle, step).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepTableRow {
    pub cycle: u32,
    pub step: u32,
    #[serde(flatten)]
    pub features: StepFeatures,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub info: String,
}

/// A (cycle, step) that could not be described.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailedStep {
    pub cycle: u32,
    pub step: u32,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StepTable {
    pub rows: Vec<StepTableRow>,
    pub failures: Vec<FailedStep>,
}

/// Step-type query used by [`StepTable::step_numbers`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepSelector {
    Type(StepType),
    /// Both relaxation directions.
    Ocv,
    /// Plain charge and discharge.
    ChargeDischarge,
}

impl StepSelector {
    pub fn parse(name: &str) -> Option<StepSelector> {
        match name.to_ascii_lowercase().as_str() {
            "ocv" => Some(StepSelector::Ocv),
            "charge_discharge" => Some(StepSelector::ChargeDischarge),
            other => StepType::from_name(other).map(StepSelector::Type),
        }
    }

    fn types(&self, all_c_types: bool) -> Vec<StepType> {
        let mut types = match self {
            StepSelector::Type(t) => vec![*t],
            StepSelector::Ocv => vec![StepType::OcvRelaxUp, StepType::OcvRelaxDown],
            StepSelector::ChargeDischarge => vec![StepType::Charge, StepType::Discharge],
        };
        if all_c_types {
            let mut extra = Vec::new();
            for t in &types {
                match t {
                    StepType::Charge => extra.extend([StepType::ChargeCv, StepType::CvCharge]),
                    StepType::Discharge => {
                        extra.extend([StepType::DischargeCv, StepType::CvDischarge])
                    }
                    _ => {}
                }
            }
            types.extend(extra);
        }
        types
    }
}

/// C-rate of the step used for one cycle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CRate {
    pub step: u32,
    pub c_rate: f64,
}

/// Nominal specific capacity (mAh/g) used when none is given.
pub const DEFAULT_NOMINAL_CAPACITY: f64 = 3579.0;

/// Group the series by (cycle, step), describe and classify every group.
///
/// Groups come out in ascending (cycle, step) order. A group that fails is
/// logged and listed in [`StepTable::failures`]; the rest still get rows.
pub fn build_step_table(
    series: &TimeSeries,
    extractor: &ExtractorConfig,
    thresholds: &ClassifierThresholds,
) -> StepTable {
    if series.is_empty() {
        info!("empty time series, step table left empty");
        return StepTable::default();
    }
    let ir_changes = series.ir_pct_change();
    let groups = series.group_by_step();
    debug!("building step table for {} steps", groups.len());

    let mut table = StepTable::default();
    for (key, rows) in groups {
        let samples: Vec<_> = rows.iter().map(|&r| series.samples()[r]).collect();
        let changes: Vec<f64> = rows.iter().map(|&r| ir_changes[r]).collect();
        match extract_features(key, &samples, &changes, extractor) {
            Ok(features) => {
                let outcome = classify_detailed(&features, thresholds);
                let info = if outcome.overridden.is_empty() {
                    String::new()
                } else {
                    let names: Vec<&str> = outcome.overridden.iter().map(|t| t.as_str()).collect();
                    format!("overrides {}", names.join(","))
                };
                table.rows.push(StepTableRow {
                    cycle: key.cycle,
                    step: key.step,
                    features,
                    step_type: outcome.label,
                    info,
                });
            }
            Err(err) => {
                if err.is_fatal() {
                    error!("cycle {} step {}: {err}", key.cycle, key.step);
                } else {
                    warn!("cycle {} step {}: {err}", key.cycle, key.step);
                }
                table.failures.push(FailedStep {
                    cycle: key.cycle,
                    step: key.step,
                    reason: err.to_string(),
                });
            }
        }
    }
    table
}

impl StepTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, cycle: u32, step: u32) -> Option<&StepTableRow> {
        self.rows.iter().find(|r| r.cycle == cycle && r.step == step)
    }

    /// Cycle numbers present in the table, ascending.
    pub fn cycle_numbers(&self) -> Vec<u32> {
        let mut cycles: Vec<u32> = self.rows.iter().map(|r| r.cycle).collect();
        cycles.dedup();
        cycles
    }

    /// Step numbers matching `selector`, per cycle.
    ///
    /// With `all_c_types`, charge and discharge also match their
    /// constant-voltage variants. Every requested cycle gets an entry, empty
    /// when nothing matches.
    pub fn step_numbers(
        &self,
        selector: StepSelector,
        all_c_types: bool,
        cycle: Option<u32>,
    ) -> BTreeMap<u32, Vec<u32>> {
        let types = selector.types(all_c_types);
        let cycles = match cycle {
            Some(c) => vec![c],
            None => self.cycle_numbers(),
        };
        let mut out = BTreeMap::new();
        for c in cycles {
            let mut steps = Vec::new();
            for t in &types {
                steps.extend(
                    self.rows
                        .iter()
                        .filter(|r| r.cycle == c && r.step_type == *t)
                        .map(|r| r.step),
                );
            }
            out.insert(c, steps);
        }
        out
    }
}

/// C-rate for the first listed step of every cycle:
/// `|1e6 * mean current / (nominal_capacity * mass)|` with mass in mg and
/// nominal capacity in mAh/g.
pub fn find_c_rates(
    series: &TimeSeries,
    steps: &BTreeMap<u32, Vec<u32>>,
    mass: f64,
    nominal_capacity: f64,
) -> CoreResult<BTreeMap<u32, CRate>> {
    if !(mass > 0.0) {
        return Err(CoreError::InvalidMass(Some(mass)));
    }
    let mut rates = BTreeMap::new();
    for (&cycle, cycle_steps) in steps {
        let Some(&step) = cycle_steps.first() else {
            continue;
        };
        let rows = series.step_samples(cycle, step);
        if rows.is_empty() {
            debug!("no samples for cycle {cycle} step {step}, skipping c-rate");
            continue;
        }
        let current = rows.iter().map(|s| s.current).sum::<f64>() / rows.len() as f64;
        let c_rate = (1_000_000.0 * current / (nominal_capacity * mass)).abs();
        debug!("cycle {cycle} (step {step}) runs at {c_rate:.3}C");
        rates.insert(cycle, CRate { step, c_rate });
    }
    Ok(rates)
}
