//! Synthetic cycler logs shared by the unit tests.

use crate::schema::{Sample, TimeSeries};

pub const DISCHARGE_CURRENT: f64 = -0.001;
pub const CHARGE_CURRENT: f64 = 0.001;

/// Bare sample with the fields the step logic looks at.
pub fn sample(
    cycle: u32,
    step: u32,
    step_time: f64,
    current: f64,
    voltage: f64,
    charge_capacity: f64,
    discharge_capacity: f64,
) -> Sample {
    Sample {
        data_point: 0,
        date_time: f64::NAN,
        test_time: step_time,
        step_time,
        cycle,
        step,
        current,
        voltage,
        charge_capacity,
        discharge_capacity,
        charge_energy: 0.0,
        discharge_energy: 0.0,
        internal_resistance: 0.0,
    }
}

/// Discharge capacity (Ah) reached in `cycle`; fades 1 % per cycle.
pub fn discharge_capacity(cycle: u32) -> f64 {
    0.0005 * (1.0 - 0.01 * (cycle - 1) as f64)
}

/// Charge capacity (Ah) reached in `cycle`.
pub fn charge_capacity(cycle: u32) -> f64 {
    discharge_capacity(cycle) * 1.02
}

/// Internal resistance logged throughout `cycle`.
pub fn resistance(cycle: u32) -> f64 {
    0.1 + 0.01 * cycle as f64
}

/// Anode-style cell: every cycle is discharge, relaxation up, charge,
/// relaxation down, and a single-row resistance pulse (steps 1 to 5).
/// Capacities reset at the start of each cycle.
pub fn synthetic_cell(cycles: u32, points_per_step: usize) -> TimeSeries {
    let n = points_per_step;
    let dt = 30.0;
    let mut rows = Vec::new();
    let mut test_time = 0.0;
    let mut data_point = 0u64;
    let mut push = |mut s: Sample, rows: &mut Vec<Sample>| {
        data_point += 1;
        test_time += dt;
        s.data_point = data_point;
        s.test_time = test_time;
        s.date_time = 42_000.0 + test_time / 86_400.0;
        s.internal_resistance = resistance(s.cycle);
        s.charge_energy = s.charge_capacity * 0.6;
        s.discharge_energy = s.discharge_capacity * 0.5;
        rows.push(s);
    };
    for cycle in 1..=cycles {
        let dq = discharge_capacity(cycle);
        let cq = charge_capacity(cycle);
        for i in 1..=n {
            let x = i as f64 / n as f64;
            let s = sample(cycle, 1, i as f64 * dt, DISCHARGE_CURRENT, 0.9 - 0.85 * x, 0.0, dq * x);
            push(s, &mut rows);
        }
        for i in 1..=n {
            let x = i as f64 / n as f64;
            let s = sample(cycle, 2, i as f64 * dt, 0.0, 0.05 + 0.15 * x, 0.0, dq);
            push(s, &mut rows);
        }
        for i in 1..=n {
            let x = i as f64 / n as f64;
            let s = sample(cycle, 3, i as f64 * dt, CHARGE_CURRENT, 0.2 + 0.8 * x, cq * x, dq);
            push(s, &mut rows);
        }
        for i in 1..=n {
            let x = i as f64 / n as f64;
            let s = sample(cycle, 4, i as f64 * dt, 0.0, 1.0 - 0.1 * x, cq, dq);
            push(s, &mut rows);
        }
        push(sample(cycle, 5, dt, 0.0, 0.9, cq, dq), &mut rows);
    }
    TimeSeries::new(rows)
}
