use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{AssemblerConfig, ConverterConfig, FixedVoltageRange};
use crate::cycles::{
    collect_capacity_curves, cycle_curves, CapacityCurve, CollectedCurves, CycleCurves, Direction,
};
use crate::error::{CoreError, CoreResult};
use crate::ica::converter::{dqdv, Postprocessed};
use crate::ica::numeric::linspace;
use crate::schema::TimeSeries;
use crate::steps::StepTable;

/// One (cycle, voltage, dq) record of a long table.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IcaRow {
    pub cycle: u32,
    pub voltage: f64,
    pub dq: f64,
}

/// A (cycle, direction) curve that could not be converted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailedCurve {
    pub cycle: u32,
    pub direction: Direction,
    pub reason: String,
}

/// dQ/dV of one full cycle: discharge, optional NaN splitter, then charge
/// with its voltage axis reversed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CycleIca {
    pub cycle: u32,
    pub voltage: Vec<f64>,
    pub dq: Vec<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LongIcaTable {
    pub rows: Vec<IcaRow>,
    pub failures: Vec<FailedCurve>,
}

/// One direction of every cycle on a shared voltage grid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WideIcaTable {
    pub direction: Direction,
    pub voltage: Vec<f64>,
    /// Cycle number of each `dq` column.
    pub cycles: Vec<u32>,
    pub dq: Vec<Vec<f64>>,
    pub failures: Vec<FailedCurve>,
}

impl WideIcaTable {
    fn empty(direction: Direction) -> Self {
        Self {
            direction,
            voltage: Vec::new(),
            cycles: Vec::new(),
            dq: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn column(&self, cycle: u32) -> Option<&[f64]> {
        let idx = self.cycles.iter().position(|&c| c == cycle)?;
        Some(&self.dq[idx])
    }

    /// Melt into (cycle, voltage, dq) rows, cycle by cycle.
    pub fn to_long(&self) -> Vec<IcaRow> {
        self.cycles
            .iter()
            .zip(&self.dq)
            .flat_map(|(&cycle, column)| {
                self.voltage
                    .iter()
                    .zip(column)
                    .map(move |(&voltage, &dq)| IcaRow { cycle, voltage, dq })
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitIca {
    pub charge: WideIcaTable,
    pub discharge: WideIcaTable,
}

/// `None` for an empty curve, which is only logged.
fn convert(curve: &CapacityCurve, config: &ConverterConfig) -> CoreResult<Option<Postprocessed>> {
    if curve.is_empty() {
        info!("cycle {} {} curve is empty, skipped", curve.cycle, curve.direction.as_str());
        return Ok(None);
    }
    dqdv(&curve.voltage, &curve.capacity, config).map(Some)
}

fn assemble_cycle(
    curves: &CycleCurves,
    config: &AssemblerConfig,
) -> Result<CycleIca, (Direction, CoreError)> {
    let discharge = convert(&curves.discharge, &config.converter)
        .map_err(|err| (Direction::Discharge, err))?;
    let charge =
        convert(&curves.charge, &config.converter).map_err(|err| (Direction::Charge, err))?;

    let mut voltage = Vec::new();
    let mut dq = Vec::new();
    if let Some(first) = &discharge {
        voltage.extend(first.voltage.iter());
        dq.extend(first.incremental_capacity.iter());
    }
    if let Some(last) = &charge {
        if config.splitter && discharge.is_some() {
            voltage.push(f64::NAN);
            dq.push(f64::NAN);
        }
        voltage.extend(last.voltage.iter().rev());
        dq.extend(last.incremental_capacity.iter().rev());
    }
    Ok(CycleIca {
        cycle: curves.cycle,
        voltage,
        dq,
    })
}

/// dQ/dV of one cycle (discharge first, then charge reversed).
pub fn dqdv_cycle(curves: &CycleCurves, config: &AssemblerConfig) -> CoreResult<CycleIca> {
    assemble_cycle(curves, config).map_err(|(_, err)| err)
}

/// Long table over many cycles. A cycle whose conversion fails is logged,
/// listed in `failures` and left out.
pub fn dqdv_cycles(cycles: &[CycleCurves], config: &AssemblerConfig) -> LongIcaTable {
    let mut table = LongIcaTable::default();
    for curves in cycles {
        match assemble_cycle(curves, config) {
            Ok(ica) if ica.voltage.is_empty() => {
                info!("cycle {} has no curves, skipped", curves.cycle);
            }
            Ok(ica) => {
                let cycle = ica.cycle;
                table.rows.extend(
                    ica.voltage
                        .iter()
                        .zip(&ica.dq)
                        .map(|(&voltage, &dq)| IcaRow { cycle, voltage, dq }),
                );
            }
            Err((direction, err)) => {
                warn!("cycle {} {}: {err}", curves.cycle, direction.as_str());
                table.failures.push(FailedCurve {
                    cycle: curves.cycle,
                    direction,
                    reason: err.to_string(),
                });
            }
        }
    }
    table
}

/// Every cycle of one direction on the grid spanning all of them.
pub fn dqdv_direction(collected: &CollectedCurves, config: &AssemblerConfig) -> WideIcaTable {
    let direction = collected.direction;
    let mut table = WideIcaTable::empty(direction);
    if !(collected.v_min < collected.v_max) {
        info!(
            "no usable {} curves (voltage span {}..{})",
            direction.as_str(),
            collected.v_min,
            collected.v_max
        );
        return table;
    }
    let range = FixedVoltageRange {
        v_min: collected.v_min,
        v_max: collected.v_max,
        n_points: config.shared_grid_points,
    };
    let converter = ConverterConfig {
        fixed_voltage_range: Some(range),
        ..config.converter.clone()
    };
    table.voltage = linspace(range.v_min, range.v_max, range.n_points).to_vec();
    debug!(
        "{} grid {:.4}..{:.4} V, {} points",
        direction.as_str(),
        range.v_min,
        range.v_max,
        range.n_points
    );

    for curve in &collected.curves {
        match convert(curve, &converter) {
            Ok(Some(out)) => {
                table.cycles.push(curve.cycle);
                table.dq.push(out.incremental_capacity.to_vec());
            }
            Ok(None) => {}
            Err(err) => {
                warn!("cycle {} {}: {err}", curve.cycle, direction.as_str());
                table.failures.push(FailedCurve {
                    cycle: curve.cycle,
                    direction,
                    reason: err.to_string(),
                });
            }
        }
    }
    table
}

/// Wide charge and discharge tables for a whole cell.
pub fn dqdv_split(
    series: &TimeSeries,
    steps: &StepTable,
    mass: f64,
    config: &AssemblerConfig,
) -> CoreResult<SplitIca> {
    config.validate()?;
    let charge = collect_capacity_curves(series, steps, Direction::Charge, mass)?;
    let discharge = collect_capacity_curves(series, steps, Direction::Discharge, mass)?;
    Ok(SplitIca {
        charge: dqdv_direction(&charge, config),
        discharge: dqdv_direction(&discharge, config),
    })
}

/// Long table of whole cycles for a cell.
pub fn dqdv_combined(
    series: &TimeSeries,
    steps: &StepTable,
    mass: f64,
    config: &AssemblerConfig,
) -> CoreResult<LongIcaTable> {
    config.validate()?;
    let cycles = cycle_curves(series, steps, mass)?;
    Ok(dqdv_cycles(&cycles, config))
}
