//! Per-cycle curves cut out of the time series with the help of the step
//! table: capacity/voltage curves for the dQ/dV assembler and voltage/time
//! relaxation curves.

use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::schema::{Sample, StepKey, TimeSeries};
use crate::steps::{StepSelector, StepTable, StepType};
use crate::summary::to_mah_per_g;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Charge,
    Discharge,
}

impl Direction {
    /// +1 for charge, -1 for discharge.
    pub fn sign(&self) -> i8 {
        match self {
            Direction::Charge => 1,
            Direction::Discharge => -1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Charge => "charge",
            Direction::Discharge => "discharge",
        }
    }

    fn step_type(&self) -> StepType {
        match self {
            Direction::Charge => StepType::Charge,
            Direction::Discharge => StepType::Discharge,
        }
    }

    fn capacity(&self, sample: &Sample) -> f64 {
        match self {
            Direction::Charge => sample.charge_capacity,
            Direction::Discharge => sample.discharge_capacity,
        }
    }
}

/// Capacity (mAh/g) against voltage for one direction of one cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapacityCurve {
    pub cycle: u32,
    pub direction: Direction,
    pub capacity: Vec<f64>,
    pub voltage: Vec<f64>,
}

impl CapacityCurve {
    pub fn len(&self) -> usize {
        self.capacity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capacity.is_empty()
    }

    /// Lowest and highest finite voltage, `None` for an empty curve.
    pub fn voltage_bounds(&self) -> Option<(f64, f64)> {
        let (lo, hi) = self
            .voltage
            .iter()
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        (lo <= hi).then_some((lo, hi))
    }
}

/// Curves of every cycle for one direction plus their overall voltage span.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectedCurves {
    pub direction: Direction,
    pub curves: Vec<CapacityCurve>,
    /// NaN when every curve is empty.
    pub v_min: f64,
    pub v_max: f64,
}

fn check_mass(mass: f64) -> CoreResult<f64> {
    if mass > 0.0 {
        Ok(mass)
    } else {
        Err(CoreError::InvalidMass(Some(mass)))
    }
}

fn curve_from_groups(
    series: &TimeSeries,
    groups: &BTreeMap<StepKey, Vec<usize>>,
    table: &StepTable,
    cycle: u32,
    direction: Direction,
    mass: f64,
) -> CapacityCurve {
    let step = table
        .step_numbers(StepSelector::Type(direction.step_type()), false, Some(cycle))
        .remove(&cycle)
        .and_then(|steps| steps.first().copied());
    let mut curve = CapacityCurve {
        cycle,
        direction,
        capacity: Vec::new(),
        voltage: Vec::new(),
    };
    let Some(rows) = step.and_then(|step| groups.get(&StepKey { cycle, step })) else {
        debug!("cycle {cycle} has no {} step", direction.as_str());
        return curve;
    };
    for &row in rows {
        let sample = &series.samples()[row];
        curve
            .capacity
            .push(to_mah_per_g(direction.capacity(sample), mass));
        curve.voltage.push(sample.voltage);
    }
    curve
}

/// Capacity curve from the first `direction` step of `cycle`. Empty when the
/// cycle has no such step.
pub fn capacity_curve(
    series: &TimeSeries,
    table: &StepTable,
    cycle: u32,
    direction: Direction,
    mass: f64,
) -> CoreResult<CapacityCurve> {
    let mass = check_mass(mass)?;
    let groups = series.group_by_step();
    Ok(curve_from_groups(series, &groups, table, cycle, direction, mass))
}

/// One curve per cycle of the series for `direction`, with the voltage span
/// over all of them.
pub fn collect_capacity_curves(
    series: &TimeSeries,
    table: &StepTable,
    direction: Direction,
    mass: f64,
) -> CoreResult<CollectedCurves> {
    let mass = check_mass(mass)?;
    let groups = series.group_by_step();
    let curves: Vec<CapacityCurve> = series
        .cycle_numbers()
        .into_iter()
        .map(|cycle| curve_from_groups(series, &groups, table, cycle, direction, mass))
        .collect();
    let (v_min, v_max) = curves
        .iter()
        .filter_map(CapacityCurve::voltage_bounds)
        .fold((f64::NAN, f64::NAN), |(lo, hi), (a, b)| (lo.min(a), hi.max(b)));
    debug!(
        "collected {} {} curves spanning {v_min}..{v_max} V",
        curves.len(),
        direction.as_str()
    );
    Ok(CollectedCurves {
        direction,
        curves,
        v_min,
        v_max,
    })
}

/// Discharge and charge curve of one cycle, each in its own capacity scale.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CycleCurves {
    pub cycle: u32,
    pub discharge: CapacityCurve,
    pub charge: CapacityCurve,
}

/// Every cycle as a discharge curve followed by a charge curve, both starting
/// from zero capacity ("forth-and-forth").
pub fn cycle_curves(
    series: &TimeSeries,
    table: &StepTable,
    mass: f64,
) -> CoreResult<Vec<CycleCurves>> {
    let mass = check_mass(mass)?;
    let groups = series.group_by_step();
    Ok(series
        .cycle_numbers()
        .into_iter()
        .map(|cycle| CycleCurves {
            cycle,
            discharge: curve_from_groups(series, &groups, table, cycle, Direction::Discharge, mass),
            charge: curve_from_groups(series, &groups, table, cycle, Direction::Charge, mass),
        })
        .collect())
}

/// Voltage against step time for one relaxation step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OcvCurve {
    pub cycle: u32,
    pub step: u32,
    pub step_type: StepType,
    pub step_time: Vec<f64>,
    pub voltage: Vec<f64>,
}

/// Relaxation curves of type `step_type`, the last matching step of every
/// cycle (or of `cycle` only). Cycles without one are left out.
pub fn ocv_curves(
    series: &TimeSeries,
    table: &StepTable,
    step_type: StepType,
    cycle: Option<u32>,
) -> CoreResult<Vec<OcvCurve>> {
    if !matches!(step_type, StepType::OcvRelaxUp | StepType::OcvRelaxDown) {
        return Err(CoreError::InvalidParameter(format!(
            "{step_type} is not a relaxation step type"
        )));
    }
    let groups = series.group_by_step();
    let cycles = match cycle {
        Some(c) => vec![c],
        None => series.cycle_numbers(),
    };
    let mut curves = Vec::new();
    for c in cycles {
        let steps = table
            .step_numbers(StepSelector::Type(step_type), false, Some(c))
            .remove(&c)
            .unwrap_or_default();
        let Some(&step) = steps.last() else {
            debug!("cycle {c} has no {step_type} step");
            continue;
        };
        let Some(rows) = groups.get(&StepKey { cycle: c, step }) else {
            continue;
        };
        let samples = rows.iter().map(|&r| &series.samples()[r]);
        let (step_time, voltage): (Vec<f64>, Vec<f64>) =
            samples.map(|s| (s.step_time, s.voltage)).unzip();
        curves.push(OcvCurve {
            cycle: c,
            step,
            step_type,
            step_time,
            voltage,
        });
    }
    Ok(curves)
}
