use log::trace;
use serde::{Deserialize, Serialize};

use crate::config::ExtractorConfig;
use crate::error::{CoreError, CoreResult};
use crate::schema::Sample;
use crate::steps::StepKey;

/// Descriptor set for one quantity over one step.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantityStats {
    pub average: f64,
    pub stdev: f64,
    pub max: f64,
    pub min: f64,
    pub start: f64,
    pub end: f64,
    /// Change from start to end in percent of the start value.
    pub delta: f64,
    /// `delta` per second of step time.
    pub rate: f64,
}

/// Everything the classifier looks at for one (cycle, step).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepFeatures {
    pub current: QuantityStats,
    pub voltage: QuantityStats,
    pub charge: QuantityStats,
    pub discharge: QuantityStats,
    /// Internal resistance of the first sample.
    pub ir: f64,
    pub ir_pct_change: f64,
}

/// Change from `x0` to `x1` in percent of `x0`.
///
/// A zero start value cannot be divided by: equal values give 0, otherwise
/// the raw difference is returned, or 0 when `default_zero` is set.
pub fn percentage_change(x0: f64, x1: f64, default_zero: bool) -> f64 {
    if x0 == 0.0 {
        let difference = x1 - x0;
        if difference == 0.0 || default_zero {
            return 0.0;
        }
        return difference;
    }
    (x1 - x0) * 100.0 / x0
}

/// `x0 / x1`, with a zero denominator mapped to NaN (or 0 when `default_zero`).
pub fn fractional_change(x0: f64, x1: f64, default_zero: bool) -> f64 {
    if x1 == 0.0 {
        return if default_zero { 0.0 } else { f64::NAN };
    }
    x0 / x1
}

/// Reduce one step's samples to its feature vector.
///
/// `ir_pct_change` runs parallel to `samples`; only its first value is used.
pub fn extract_features(
    key: StepKey,
    samples: &[Sample],
    ir_pct_change: &[f64],
    config: &ExtractorConfig,
) -> CoreResult<StepFeatures> {
    let (first, last) = match (samples.first(), samples.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => {
            return Err(CoreError::InsufficientData {
                cycle: key.cycle,
                step: key.step,
            })
        }
    };
    let duration = last.step_time - first.step_time;
    trace!(
        "extracting cycle {} step {}: {} rows over {duration} s",
        key.cycle,
        key.step,
        samples.len()
    );
    let stats = |value: fn(&Sample) -> f64| describe(samples, value, duration, config);

    Ok(StepFeatures {
        current: stats(|s| s.current),
        voltage: stats(|s| s.voltage),
        charge: stats(|s| s.charge_capacity),
        discharge: stats(|s| s.discharge_capacity),
        ir: first.internal_resistance,
        ir_pct_change: ir_pct_change.first().copied().unwrap_or(f64::NAN),
    })
}

fn describe(
    samples: &[Sample],
    value: fn(&Sample) -> f64,
    duration: f64,
    config: &ExtractorConfig,
) -> QuantityStats {
    let n = samples.len() as f64;
    let mut sum = 0.0;
    let mut max = f64::NEG_INFINITY;
    let mut min = f64::INFINITY;
    for sample in samples {
        let v = value(sample);
        sum += v;
        max = max.max(v);
        min = min.min(v);
    }
    let average = sum / n;
    let variance = samples
        .iter()
        .map(|s| {
            let d = value(s) - average;
            d * d
        })
        .sum::<f64>()
        / n;
    let start = value(&samples[0]);
    let end = value(&samples[samples.len() - 1]);
    let delta = percentage_change(start, end, config.delta_default_zero);
    QuantityStats {
        average,
        stdev: variance.sqrt(),
        max,
        min,
        start,
        end,
        delta,
        rate: fractional_change(delta, duration, config.rate_default_zero),
    }
}
