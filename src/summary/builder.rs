use std::collections::{BTreeMap, HashSet};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{CycleMode, RowSelection, SummaryConfig};
use crate::error::{CoreError, CoreResult};
use crate::schema::{Sample, StepKey, TimeSeries};
use crate::steps::{StepSelector, StepTable, StepType};
use crate::summary::datetime::day_count_to_string;

/// Raw capacity (Ah) to specific capacity (mAh/g) for a mass in mg.
pub fn to_mah_per_g(capacity_ah: f64, mass_mg: f64) -> f64 {
    capacity_ah * 1_000_000.0 / mass_mg
}

/// Timestamp column: a formatted string, or the raw day count when
/// conversion is disabled.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DateTimeValue {
    Text(String),
    DayCount(f64),
}

/// Min/max voltage seen during one relaxation window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VoltageBounds {
    pub min: f64,
    pub max: f64,
}

/// One cycle of the summary. Field order is the column order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CycleSummaryRow {
    pub date_time: DateTimeValue,
    pub test_time: f64,
    pub data_point: u64,
    pub cycle: u32,
    pub step: u32,
    pub current: f64,
    pub voltage: f64,
    pub charge_capacity: f64,
    pub discharge_capacity: f64,
    pub charge_energy: f64,
    pub discharge_energy: f64,
    pub internal_resistance: f64,
    pub discharge_capacity_mahg: f64,
    pub charge_capacity_mahg: f64,
    pub cumulated_charge_capacity: f64,
    pub coulombic_efficiency: f64,
    pub coulombic_difference: f64,
    pub cumulated_coulombic_difference: f64,
    pub discharge_capacity_loss: f64,
    pub cumulated_discharge_capacity_loss: f64,
    pub charge_capacity_loss: f64,
    pub cumulated_charge_capacity_loss: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocv_first: Option<VoltageBounds>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocv_second: Option<VoltageBounds>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_voltage_discharge: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_voltage_charge: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ir_discharge: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ir_charge: Option<f64>,
}

const LEADING_COLUMNS: [&str; 4] = ["date_time", "test_time", "data_point", "cycle"];

const CORE_COLUMNS: [&str; 18] = [
    "step",
    "current",
    "voltage",
    "charge_capacity",
    "discharge_capacity",
    "charge_energy",
    "discharge_energy",
    "internal_resistance",
    "discharge_capacity_mahg",
    "charge_capacity_mahg",
    "cumulated_charge_capacity",
    "coulombic_efficiency",
    "coulombic_difference",
    "cumulated_coulombic_difference",
    "discharge_capacity_loss",
    "cumulated_discharge_capacity_loss",
    "charge_capacity_loss",
    "cumulated_charge_capacity_loss",
];

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub rows: Vec<CycleSummaryRow>,
    /// Data-quality notes collected while building (skipped extractions,
    /// cycles without the requested steps).
    pub warnings: Vec<String>,
}

impl CycleSummary {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, cycle: u32) -> Option<&CycleSummaryRow> {
        self.rows.iter().find(|r| r.cycle == cycle)
    }

    /// Column names in output order; optional extractions only appear when
    /// they were filled.
    pub fn column_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = LEADING_COLUMNS.to_vec();
        names.extend(CORE_COLUMNS);
        let Some(first) = self.rows.first() else {
            return names;
        };
        if first.ocv_first.is_some() {
            names.extend(["ocv_first_min", "ocv_first_max", "ocv_second_min", "ocv_second_max"]);
        }
        if first.end_voltage_discharge.is_some() {
            names.extend(["end_voltage_discharge", "end_voltage_charge"]);
        }
        if first.ir_discharge.is_some() {
            names.extend(["ir_discharge", "ir_charge"]);
        }
        names
    }
}

/// Builds a [`CycleSummary`] from a time series.
///
/// The step table is only consulted for the OCV, end-voltage and IR
/// extractions; without it those are skipped with a warning.
pub struct SummaryBuilder<'a> {
    config: &'a SummaryConfig,
    step_table: Option<&'a StepTable>,
    statistics_points: Option<&'a [u64]>,
}

impl<'a> SummaryBuilder<'a> {
    pub fn new(config: &'a SummaryConfig) -> Self {
        Self {
            config,
            step_table: None,
            statistics_points: None,
        }
    }

    pub fn with_step_table(mut self, step_table: &'a StepTable) -> Self {
        self.step_table = Some(step_table);
        self
    }

    /// Data points the tester flagged as per-cycle statistics rows.
    pub fn with_statistics_points(mut self, points: &'a [u64]) -> Self {
        self.statistics_points = Some(points);
        self
    }

    pub fn build(&self, series: &TimeSeries, mass: Option<f64>) -> CoreResult<CycleSummary> {
        let mass = match mass {
            Some(m) if m > 0.0 => m,
            other => return Err(CoreError::InvalidMass(other)),
        };
        let mut warnings = Vec::new();
        let selected = self.select_rows(series, &mut warnings);
        debug!("summarising {} cycles (mass {mass} mg)", selected.len());

        let mut rows: Vec<CycleSummaryRow> = selected
            .iter()
            .map(|s| self.base_row(s, mass))
            .collect();
        add_derived_columns(&mut rows);

        let wants_steps =
            self.config.find_ocv || self.config.find_end_voltage || self.config.find_ir;
        match (wants_steps, self.step_table) {
            (false, _) => {}
            (true, None) => {
                let note = "step table missing, skipping ocv/end-voltage/ir extraction";
                warn!("{note}");
                warnings.push(note.to_string());
            }
            (true, Some(table)) => {
                let groups = series.group_by_step();
                let extractor = StepExtractor {
                    series,
                    table,
                    groups: &groups,
                };
                for row in &mut rows {
                    if self.config.find_ocv {
                        let (first, second) = match self.config.cycle_mode {
                            CycleMode::Anode => (StepType::OcvRelaxUp, StepType::OcvRelaxDown),
                            CycleMode::Cathode => (StepType::OcvRelaxDown, StepType::OcvRelaxUp),
                        };
                        row.ocv_first = Some(extractor.ocv_bounds(row.cycle, first, &mut warnings));
                        row.ocv_second =
                            Some(extractor.ocv_bounds(row.cycle, second, &mut warnings));
                    }
                    if self.config.find_end_voltage {
                        row.end_voltage_discharge = Some(extractor.end_voltage(
                            row.cycle,
                            StepType::Discharge,
                            &mut warnings,
                        ));
                        row.end_voltage_charge = Some(extractor.end_voltage(
                            row.cycle,
                            StepType::Charge,
                            &mut warnings,
                        ));
                    }
                    if self.config.find_ir {
                        row.ir_discharge =
                            Some(extractor.first_ir(row.cycle, StepType::Discharge, &mut warnings));
                        row.ir_charge =
                            Some(extractor.first_ir(row.cycle, StepType::Charge, &mut warnings));
                    }
                }
            }
        }
        if !warnings.is_empty() {
            info!("summary built with {} data-quality notes", warnings.len());
        }
        Ok(CycleSummary { rows, warnings })
    }

    fn select_rows(&self, series: &TimeSeries, warnings: &mut Vec<String>) -> Vec<Sample> {
        match (self.config.row_selection, self.statistics_points) {
            (RowSelection::TesterStatistics, Some(points)) => {
                let wanted: HashSet<u64> = points.iter().copied().collect();
                let mut rows: Vec<Sample> = series
                    .samples()
                    .iter()
                    .filter(|s| wanted.contains(&s.data_point))
                    .copied()
                    .collect();
                rows.sort_by_key(|s| s.cycle);
                rows
            }
            (RowSelection::TesterStatistics, None) => {
                let note = "no tester statistics rows given, using last sample per cycle";
                warn!("{note}");
                warnings.push(note.to_string());
                last_per_cycle(series)
            }
            (RowSelection::LastPerCycle, _) => last_per_cycle(series),
        }
    }

    fn base_row(&self, s: &Sample, mass: f64) -> CycleSummaryRow {
        let date_time = if self.config.convert_date {
            match day_count_to_string(s.date_time, self.config.datemode) {
                Some(text) => DateTimeValue::Text(text),
                None => DateTimeValue::DayCount(s.date_time),
            }
        } else {
            DateTimeValue::DayCount(s.date_time)
        };
        CycleSummaryRow {
            date_time,
            test_time: s.test_time,
            data_point: s.data_point,
            cycle: s.cycle,
            step: s.step,
            current: s.current,
            voltage: s.voltage,
            charge_capacity: s.charge_capacity,
            discharge_capacity: s.discharge_capacity,
            charge_energy: s.charge_energy,
            discharge_energy: s.discharge_energy,
            internal_resistance: s.internal_resistance,
            discharge_capacity_mahg: to_mah_per_g(s.discharge_capacity, mass),
            charge_capacity_mahg: to_mah_per_g(s.charge_capacity, mass),
            cumulated_charge_capacity: 0.0,
            coulombic_efficiency: 0.0,
            coulombic_difference: 0.0,
            cumulated_coulombic_difference: 0.0,
            discharge_capacity_loss: 0.0,
            cumulated_discharge_capacity_loss: 0.0,
            charge_capacity_loss: 0.0,
            cumulated_charge_capacity_loss: 0.0,
            ocv_first: None,
            ocv_second: None,
            end_voltage_discharge: None,
            end_voltage_charge: None,
            ir_discharge: None,
            ir_charge: None,
        }
    }
}

/// Shorthand for `SummaryBuilder` with an optional step table.
pub fn build_summary(
    series: &TimeSeries,
    step_table: Option<&StepTable>,
    mass: Option<f64>,
    config: &SummaryConfig,
) -> CoreResult<CycleSummary> {
    let mut builder = SummaryBuilder::new(config);
    if let Some(table) = step_table {
        builder = builder.with_step_table(table);
    }
    builder.build(series, mass)
}

fn last_per_cycle(series: &TimeSeries) -> Vec<Sample> {
    let mut last: BTreeMap<u32, Sample> = BTreeMap::new();
    for s in series.samples() {
        match last.get(&s.cycle) {
            Some(kept) if kept.data_point > s.data_point => {}
            _ => {
                last.insert(s.cycle, *s);
            }
        }
    }
    last.into_values().collect()
}

fn add_derived_columns(rows: &mut [CycleSummaryRow]) {
    let mut cumulated_charge = 0.0;
    let mut cumulated_difference = 0.0;
    let mut cumulated_discharge_loss = 0.0;
    let mut cumulated_charge_loss = 0.0;
    let mut previous: Option<(f64, f64)> = None;
    for row in rows.iter_mut() {
        cumulated_charge += row.charge_capacity_mahg;
        row.cumulated_charge_capacity = cumulated_charge;
        row.coulombic_efficiency = 100.0 * row.charge_capacity / row.discharge_capacity;
        row.coulombic_difference = row.charge_capacity_mahg - row.discharge_capacity_mahg;
        cumulated_difference += row.coulombic_difference;
        row.cumulated_coulombic_difference = cumulated_difference;

        let (discharge_loss, charge_loss) = match previous {
            Some((discharge, charge)) => (
                discharge - row.discharge_capacity_mahg,
                charge - row.charge_capacity_mahg,
            ),
            None => (0.0, 0.0),
        };
        row.discharge_capacity_loss = discharge_loss;
        cumulated_discharge_loss += discharge_loss;
        row.cumulated_discharge_capacity_loss = cumulated_discharge_loss;
        row.charge_capacity_loss = charge_loss;
        cumulated_charge_loss += charge_loss;
        row.cumulated_charge_capacity_loss = cumulated_charge_loss;

        previous = Some((row.discharge_capacity_mahg, row.charge_capacity_mahg));
    }
}

/// Per-cycle lookups that need both the step table and the raw rows.
struct StepExtractor<'a> {
    series: &'a TimeSeries,
    table: &'a StepTable,
    groups: &'a BTreeMap<StepKey, Vec<usize>>,
}

impl StepExtractor<'_> {
    fn steps(&self, cycle: u32, step_type: StepType) -> Vec<u32> {
        self.table
            .step_numbers(StepSelector::Type(step_type), false, Some(cycle))
            .remove(&cycle)
            .unwrap_or_default()
    }

    fn rows(&self, cycle: u32, step: u32) -> impl Iterator<Item = &Sample> + '_ {
        self.groups
            .get(&StepKey { cycle, step })
            .into_iter()
            .flatten()
            .map(|&r| &self.series.samples()[r])
    }

    /// Voltage range of the last `step_type` relaxation in `cycle`, zeros when absent.
    fn ocv_bounds(
        &self,
        cycle: u32,
        step_type: StepType,
        warnings: &mut Vec<String>,
    ) -> VoltageBounds {
        let mut bounds = None;
        for step in self.steps(cycle, step_type) {
            let (min, max) = self.rows(cycle, step).fold(
                (f64::INFINITY, f64::NEG_INFINITY),
                |(lo, hi), s| (lo.min(s.voltage), hi.max(s.voltage)),
            );
            if min <= max {
                bounds = Some(VoltageBounds { min, max });
            }
        }
        bounds.unwrap_or_else(|| {
            note_missing(warnings, cycle, step_type);
            VoltageBounds::default()
        })
    }

    /// Voltage of the last sample of the last `step_type` step, 0 when absent.
    fn end_voltage(&self, cycle: u32, step_type: StepType, warnings: &mut Vec<String>) -> f64 {
        let value = self
            .steps(cycle, step_type)
            .last()
            .and_then(|&step| self.rows(cycle, step).last())
            .map(|s| s.voltage);
        value.unwrap_or_else(|| {
            note_missing(warnings, cycle, step_type);
            0.0
        })
    }

    // Takes the first sample of the step; testers that log the IR pulse at
    // the end of the previous cycle shift the value by one cycle.
    fn first_ir(&self, cycle: u32, step_type: StepType, warnings: &mut Vec<String>) -> f64 {
        let value = self
            .steps(cycle, step_type)
            .first()
            .and_then(|&step| self.rows(cycle, step).next())
            .map(|s| s.internal_resistance);
        value.unwrap_or_else(|| {
            note_missing(warnings, cycle, step_type);
            0.0
        })
    }
}

fn note_missing(warnings: &mut Vec<String>, cycle: u32, step_type: StepType) {
    let note = format!("cycle {cycle}: no {step_type} step");
    debug!("{note}");
    warnings.push(note);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClassifierThresholds, ExtractorConfig};
    use crate::steps::build_step_table;
    use crate::testdata::{charge_capacity, discharge_capacity, resistance, synthetic_cell};

    const MASS: f64 = 0.5;
    const N: usize = 30;

    fn last_per_cycle_config() -> SummaryConfig {
        SummaryConfig {
            row_selection: RowSelection::LastPerCycle,
            ..SummaryConfig::default()
        }
    }

    fn steps(series: &TimeSeries) -> StepTable {
        build_step_table(
            series,
            &ExtractorConfig::default(),
            &ClassifierThresholds::default(),
        )
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9 * b.abs().max(1.0)
    }

    #[test]
    fn non_positive_or_missing_mass_is_rejected() {
        let series = synthetic_cell(2, N);
        let config = SummaryConfig::default();
        for mass in [Some(0.0), Some(-5.0), None, Some(f64::NAN)] {
            assert!(matches!(
                build_summary(&series, None, mass, &config),
                Err(CoreError::InvalidMass(_))
            ));
        }
    }

    #[test]
    fn one_row_per_cycle_with_normalised_capacity() {
        let series = synthetic_cell(4, N);
        let summary = build_summary(&series, None, Some(MASS), &last_per_cycle_config()).unwrap();
        assert_eq!(summary.len(), 4);
        let cycles: Vec<u32> = summary.rows.iter().map(|r| r.cycle).collect();
        assert_eq!(cycles, vec![1, 2, 3, 4]);
        let row = summary.row(2).unwrap();
        assert_eq!(row.step, 5);
        assert!(close(row.discharge_capacity_mahg, discharge_capacity(2) * 1e6 / MASS));
        assert!(close(row.charge_capacity_mahg, charge_capacity(2) * 1e6 / MASS));
        assert!(close(row.coulombic_efficiency, 102.0));
        assert!(summary.warnings.is_empty());
    }

    #[test]
    fn capacity_loss_is_cycle_over_cycle() {
        let series = synthetic_cell(5, N);
        let summary = build_summary(&series, None, Some(MASS), &last_per_cycle_config()).unwrap();
        let rows = &summary.rows;
        assert_eq!(rows[0].discharge_capacity_loss, 0.0);
        assert_eq!(rows[0].charge_capacity_loss, 0.0);
        let mut cumulated = 0.0;
        for n in 1..rows.len() {
            let expected = rows[n - 1].discharge_capacity_mahg - rows[n].discharge_capacity_mahg;
            assert!(close(rows[n].discharge_capacity_loss, expected));
            cumulated += expected;
            assert!(close(rows[n].cumulated_discharge_capacity_loss, cumulated));
        }
        let total: f64 = rows.iter().map(|r| r.charge_capacity_mahg).sum();
        assert!(close(rows[4].cumulated_charge_capacity, total));
        let difference: f64 = rows.iter().map(|r| r.coulombic_difference).sum();
        assert!(close(rows[4].cumulated_coulombic_difference, difference));
    }

    #[test]
    fn statistics_rows_pick_the_flagged_samples() {
        let series = synthetic_cell(3, N);
        // Last charge sample of every cycle, listed out of order.
        let per_cycle = (4 * N + 1) as u64;
        let points = vec![2 * per_cycle + 3 * N as u64, 3 * N as u64, per_cycle + 3 * N as u64];
        let config = SummaryConfig::default();
        let summary = SummaryBuilder::new(&config)
            .with_statistics_points(&points)
            .build(&series, Some(MASS))
            .unwrap();
        let cycles: Vec<u32> = summary.rows.iter().map(|r| r.cycle).collect();
        assert_eq!(cycles, vec![1, 2, 3]);
        assert!(summary.rows.iter().all(|r| r.step == 3));
    }

    #[test]
    fn missing_statistics_fall_back_with_warning() {
        let series = synthetic_cell(2, N);
        let fallback = build_summary(&series, None, Some(MASS), &SummaryConfig::default()).unwrap();
        let explicit = build_summary(&series, None, Some(MASS), &last_per_cycle_config()).unwrap();
        assert_eq!(fallback.rows, explicit.rows);
        assert_eq!(fallback.warnings.len(), 1);
    }

    #[test]
    fn ocv_end_voltage_and_ir_from_step_table() {
        let series = synthetic_cell(3, N);
        let table = steps(&series);
        let config = SummaryConfig {
            find_ocv: true,
            find_end_voltage: true,
            find_ir: true,
            ..last_per_cycle_config()
        };
        let summary = build_summary(&series, Some(&table), Some(MASS), &config).unwrap();
        let row = summary.row(2).unwrap();

        let up = row.ocv_first.unwrap();
        assert!(close(up.min, 0.05 + 0.15 / N as f64));
        assert!(close(up.max, 0.2));
        let down = row.ocv_second.unwrap();
        assert!(close(down.min, 0.9));
        assert!(close(down.max, 1.0 - 0.1 / N as f64));

        assert!(close(row.end_voltage_discharge.unwrap(), 0.05));
        assert!(close(row.end_voltage_charge.unwrap(), 1.0));
        assert!(close(row.ir_discharge.unwrap(), resistance(2)));
        assert!(close(row.ir_charge.unwrap(), resistance(2)));
        assert!(summary.warnings.is_empty());
        assert!(summary.column_names().contains(&"ocv_second_max"));
    }

    #[test]
    fn cathode_mode_swaps_relaxation_order() {
        let series = synthetic_cell(2, N);
        let table = steps(&series);
        let config = SummaryConfig {
            find_ocv: true,
            cycle_mode: CycleMode::Cathode,
            ..last_per_cycle_config()
        };
        let summary = build_summary(&series, Some(&table), Some(MASS), &config).unwrap();
        let row = summary.row(1).unwrap();
        assert!(close(row.ocv_first.unwrap().min, 0.9));
        assert!(close(row.ocv_second.unwrap().max, 0.2));
    }

    #[test]
    fn missing_step_table_skips_extractions() {
        let series = synthetic_cell(2, N);
        let config = SummaryConfig {
            find_end_voltage: true,
            ..last_per_cycle_config()
        };
        let summary = build_summary(&series, None, Some(MASS), &config).unwrap();
        assert_eq!(summary.len(), 2);
        assert!(summary.rows.iter().all(|r| r.end_voltage_charge.is_none()));
        assert_eq!(summary.warnings.len(), 1);
    }

    #[test]
    fn cycle_without_relaxation_reports_zero() {
        let series = synthetic_cell(2, N);
        let mut table = steps(&series);
        table.rows.retain(|r| !(r.cycle == 2 && r.step_type == StepType::OcvRelaxUp));
        let config = SummaryConfig {
            find_ocv: true,
            ..last_per_cycle_config()
        };
        let summary = build_summary(&series, Some(&table), Some(MASS), &config).unwrap();
        assert_eq!(summary.row(2).unwrap().ocv_first, Some(VoltageBounds::default()));
        assert_eq!(summary.warnings, vec!["cycle 2: no ocvrlx_up step".to_string()]);
    }

    #[test]
    fn leading_columns_and_date_format() {
        let series = synthetic_cell(1, N);
        let summary = build_summary(&series, None, Some(MASS), &last_per_cycle_config()).unwrap();
        assert_eq!(
            &summary.column_names()[..4],
            &["date_time", "test_time", "data_point", "cycle"]
        );
        match &summary.rows[0].date_time {
            DateTimeValue::Text(text) => assert!(text.starts_with("2014-12-27 ")),
            other => panic!("expected formatted date, got {other:?}"),
        }

        let raw = SummaryConfig {
            convert_date: false,
            ..last_per_cycle_config()
        };
        let summary = build_summary(&series, None, Some(MASS), &raw).unwrap();
        assert!(matches!(summary.rows[0].date_time, DateTimeValue::DayCount(_)));
    }
}
