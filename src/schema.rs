//! Typed view of a cycler time series.
//!
//! Testers name their columns differently. [`ColumnMap`] maps each semantic
//! field onto the physical column identifier, and [`TimeSeries::from_columns`]
//! turns a loosely typed [`RawTable`] into rows of [`Sample`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Named numeric columns as delivered by an ingestion layer.
pub type RawTable = BTreeMap<String, Vec<f64>>;

/// One data point of the cycler log.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub data_point: u64,
    /// Day count since the tester epoch (spreadsheet style), NaN when unknown.
    pub date_time: f64,
    pub test_time: f64,
    pub step_time: f64,
    pub cycle: u32,
    pub step: u32,
    pub current: f64,
    pub voltage: f64,
    pub charge_capacity: f64,
    pub discharge_capacity: f64,
    pub charge_energy: f64,
    pub discharge_energy: f64,
    pub internal_resistance: f64,
}

/// Physical column names for each semantic field. Defaults follow the
/// Arbin export naming.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMap {
    pub data_point: String,
    pub date_time: String,
    pub test_time: String,
    pub step_time: String,
    pub cycle_index: String,
    pub step_index: String,
    pub current: String,
    pub voltage: String,
    pub charge_capacity: String,
    pub discharge_capacity: String,
    pub charge_energy: String,
    pub discharge_energy: String,
    pub internal_resistance: String,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            data_point: "Data_Point".into(),
            date_time: "DateTime".into(),
            test_time: "Test_Time".into(),
            step_time: "Step_Time".into(),
            cycle_index: "Cycle_Index".into(),
            step_index: "Step_Index".into(),
            current: "Current".into(),
            voltage: "Voltage".into(),
            charge_capacity: "Charge_Capacity".into(),
            discharge_capacity: "Discharge_Capacity".into(),
            charge_energy: "Charge_Energy".into(),
            discharge_energy: "Discharge_Energy".into(),
            internal_resistance: "Internal_Resistance".into(),
        }
    }
}

/// Identifies one step of one cycle. Orders by cycle, then step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepKey {
    pub cycle: u32,
    pub step: u32,
}

/// Ordered samples of one test. Rows of a (cycle, step) pair are contiguous
/// and ordered by step time.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    samples: Vec<Sample>,
}

impl TimeSeries {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn from_columns(table: &RawTable, columns: &ColumnMap) -> CoreResult<Self> {
        let cycle = required(table, "cycle index", &columns.cycle_index)?;
        let len = cycle.len();
        let step = required_len(table, "step index", &columns.step_index, len)?;
        let step_time = required_len(table, "step time", &columns.step_time, len)?;
        let test_time = required_len(table, "test time", &columns.test_time, len)?;
        let current = required_len(table, "current", &columns.current, len)?;
        let voltage = required_len(table, "voltage", &columns.voltage, len)?;
        let charge = required_len(table, "charge capacity", &columns.charge_capacity, len)?;
        let discharge =
            required_len(table, "discharge capacity", &columns.discharge_capacity, len)?;
        let data_point = optional(table, &columns.data_point, len)?;
        let date_time = optional(table, &columns.date_time, len)?;
        let charge_energy = optional(table, &columns.charge_energy, len)?;
        let discharge_energy = optional(table, &columns.discharge_energy, len)?;
        let resistance = optional(table, &columns.internal_resistance, len)?;

        let mut samples = Vec::with_capacity(len);
        for row in 0..len {
            let data_point = match data_point {
                Some(values) => as_index(values[row], &columns.data_point, row)?,
                None => row as u64 + 1,
            };
            samples.push(Sample {
                data_point,
                date_time: pick(date_time, row),
                test_time: test_time[row],
                step_time: step_time[row],
                cycle: as_index(cycle[row], &columns.cycle_index, row)? as u32,
                step: as_index(step[row], &columns.step_index, row)? as u32,
                current: current[row],
                voltage: voltage[row],
                charge_capacity: charge[row],
                discharge_capacity: discharge[row],
                charge_energy: pick(charge_energy, row),
                discharge_energy: pick(discharge_energy, row),
                internal_resistance: pick(resistance, row),
            });
        }
        Ok(Self { samples })
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Unique cycle numbers in ascending order.
    pub fn cycle_numbers(&self) -> Vec<u32> {
        let mut cycles: Vec<u32> = self.samples.iter().map(|s| s.cycle).collect();
        cycles.sort_unstable();
        cycles.dedup();
        cycles
    }

    /// Row indices of every (cycle, step) pair, keys ascending, rows in log order.
    pub fn group_by_step(&self) -> BTreeMap<StepKey, Vec<usize>> {
        let mut groups: BTreeMap<StepKey, Vec<usize>> = BTreeMap::new();
        for (row, sample) in self.samples.iter().enumerate() {
            groups
                .entry(StepKey {
                    cycle: sample.cycle,
                    step: sample.step,
                })
                .or_default()
                .push(row);
        }
        groups
    }

    /// Rows belonging to one (cycle, step) pair, in log order.
    pub fn step_samples(&self, cycle: u32, step: u32) -> Vec<Sample> {
        self.samples
            .iter()
            .filter(|s| s.cycle == cycle && s.step == step)
            .copied()
            .collect()
    }

    /// Successive-row fractional change of the internal resistance
    /// (`(r[i] - r[i-1]) / r[i-1]`). The first row has no predecessor and is NaN.
    pub fn ir_pct_change(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.samples.len());
        for (i, sample) in self.samples.iter().enumerate() {
            if i == 0 {
                out.push(f64::NAN);
                continue;
            }
            let previous = self.samples[i - 1].internal_resistance;
            out.push((sample.internal_resistance - previous) / previous);
        }
        out
    }
}

fn required<'a>(
    table: &'a RawTable,
    field: &'static str,
    column: &str,
) -> CoreResult<&'a Vec<f64>> {
    table.get(column).ok_or_else(|| CoreError::MissingColumn {
        field,
        column: column.to_string(),
    })
}

fn required_len<'a>(
    table: &'a RawTable,
    field: &'static str,
    column: &str,
    len: usize,
) -> CoreResult<&'a Vec<f64>> {
    let values = required(table, field, column)?;
    check_len(column, values, len)?;
    Ok(values)
}

fn optional<'a>(
    table: &'a RawTable,
    column: &str,
    len: usize,
) -> CoreResult<Option<&'a Vec<f64>>> {
    match table.get(column) {
        Some(values) => {
            check_len(column, values, len)?;
            Ok(Some(values))
        }
        None => Ok(None),
    }
}

fn check_len(column: &str, values: &[f64], expected: usize) -> CoreResult<()> {
    if values.len() != expected {
        return Err(CoreError::ColumnLengthMismatch {
            column: column.to_string(),
            expected,
            actual: values.len(),
        });
    }
    Ok(())
}

fn pick(values: Option<&Vec<f64>>, row: usize) -> f64 {
    values.map(|v| v[row]).unwrap_or(f64::NAN)
}

fn as_index(value: f64, column: &str, row: usize) -> CoreResult<u64> {
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value > u32::MAX as f64 {
        return Err(CoreError::InvalidColumnValue {
            column: column.to_string(),
            row,
            value,
        });
    }
    Ok(value as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_table() -> RawTable {
        let mut table = RawTable::new();
        table.insert("Cycle_Index".into(), vec![1.0, 1.0, 2.0]);
        table.insert("Step_Index".into(), vec![1.0, 1.0, 3.0]);
        table.insert("Step_Time".into(), vec![0.0, 10.0, 0.0]);
        table.insert("Test_Time".into(), vec![0.0, 10.0, 20.0]);
        table.insert("Current".into(), vec![0.1, 0.1, -0.1]);
        table.insert("Voltage".into(), vec![3.0, 3.1, 3.0]);
        table.insert("Charge_Capacity".into(), vec![0.0, 0.001, 0.001]);
        table.insert("Discharge_Capacity".into(), vec![0.0, 0.0, 0.0]);
        table
    }

    #[test]
    fn maps_columns_and_fills_optional_fields() {
        let series = TimeSeries::from_columns(&minimal_table(), &ColumnMap::default()).unwrap();
        assert_eq!(series.len(), 3);
        let last = series.samples()[2];
        assert_eq!(last.cycle, 2);
        assert_eq!(last.step, 3);
        assert_eq!(last.data_point, 3);
        assert!(last.internal_resistance.is_nan());
        assert_eq!(series.cycle_numbers(), vec![1, 2]);
    }

    #[test]
    fn custom_column_names_are_honoured() {
        let mut table = minimal_table();
        let cycles = table.remove("Cycle_Index").unwrap();
        table.insert("cycle".into(), cycles);
        let columns = ColumnMap {
            cycle_index: "cycle".into(),
            ..ColumnMap::default()
        };
        assert!(TimeSeries::from_columns(&table, &columns).is_ok());
        assert!(matches!(
            TimeSeries::from_columns(&table, &ColumnMap::default()),
            Err(CoreError::MissingColumn { field: "cycle index", .. })
        ));
    }

    #[test]
    fn rejects_fractional_step_index_and_ragged_columns() {
        let mut table = minimal_table();
        table.insert("Step_Index".into(), vec![1.0, 1.5, 3.0]);
        assert!(matches!(
            TimeSeries::from_columns(&table, &ColumnMap::default()),
            Err(CoreError::InvalidColumnValue { row: 1, .. })
        ));

        let mut table = minimal_table();
        table.insert("Voltage".into(), vec![3.0]);
        assert!(matches!(
            TimeSeries::from_columns(&table, &ColumnMap::default()),
            Err(CoreError::ColumnLengthMismatch { expected: 3, actual: 1, .. })
        ));
    }

    #[test]
    fn ir_pct_change_is_successive_ratio() {
        let mut table = minimal_table();
        table.insert("Internal_Resistance".into(), vec![2.0, 3.0, 3.0]);
        let series = TimeSeries::from_columns(&table, &ColumnMap::default()).unwrap();
        let change = series.ir_pct_change();
        assert!(change[0].is_nan());
        assert!((change[1] - 0.5).abs() < 1e-12);
        assert_eq!(change[2], 0.0);
    }
}
