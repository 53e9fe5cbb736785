//! Capacity/voltage curve to incremental capacity (dQ/dV).
//!
//! The work is split in four stages, each a pure function of the previous
//! stage's output:
//!
//! ```text
//! CurveData -> Inspected -> Preprocessed -> Incremented -> Postprocessed
//!   set_data    inspect     pre_process    increment      post_process
//! ```
//!
//! [`Converter`] wraps the chain for callers that want to drive the stages
//! one by one; it refuses to run a stage before its predecessor.

use log::{debug, info, warn};
use ndarray::{s, Array1};
use serde::{Deserialize, Serialize};

use crate::config::ConverterConfig;
use crate::error::{CoreError, CoreResult};
use crate::ica::numeric::{
    diff, gaussian_filter1d, linregress_stderr, linspace, mean, median, savgol_filter,
    savgol_window, simpson, Interpolator,
};

/// Non-fatal findings collected along the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQualityWarning {
    /// Not enough points for the chunked fit-error diagnostics.
    TooFewPointsForSplitting { points: usize, splits: usize },
    /// First capacity sample is not the smallest.
    StartNotMinimum,
    /// Last capacity sample is not the largest.
    EndNotMaximum,
    /// The derivative integrates to zero, normalisation skipped.
    ZeroArea,
    /// Too few derivative points to resample onto the fixed voltage range.
    TooFewPointsForFixedRange { points: usize },
}

/// Where a [`Converter`] stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Empty,
    Inspected,
    Preprocessed,
    Incremented,
    Postprocessed,
}

/// Validated capacity/voltage pairs.
#[derive(Clone, Debug, PartialEq)]
pub struct CurveData {
    capacity: Array1<f64>,
    voltage: Array1<f64>,
}

impl CurveData {
    pub fn new(capacity: &[f64], voltage: &[f64]) -> CoreResult<Self> {
        let len = capacity.len().min(voltage.len());
        if len <= 1 {
            return Err(CoreError::NullData { len });
        }
        if capacity.len() != voltage.len() {
            return Err(CoreError::LengthMismatch {
                capacity: capacity.len(),
                voltage: voltage.len(),
            });
        }
        Ok(Self {
            capacity: Array1::from_vec(capacity.to_vec()),
            voltage: Array1::from_vec(voltage.to_vec()),
        })
    }

    pub fn len(&self) -> usize {
        self.capacity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capacity.is_empty()
    }

    pub fn capacity(&self) -> &Array1<f64> {
        &self.capacity
    }

    pub fn voltage(&self) -> &Array1<f64> {
        &self.voltage
    }
}

/// Scalar diagnostics of the raw curve.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Inspection {
    pub number_of_points: usize,
    pub min_capacity: f64,
    pub max_capacity: f64,
    pub start_capacity: f64,
    pub end_capacity: f64,
    pub d_capacity_mean: f64,
    pub d_voltage_mean: f64,
    /// Median and mean slope standard error over the fitted chunks.
    pub std_err_median: Option<f64>,
    pub std_err_mean: Option<f64>,
    /// Area the normalised derivative integrates to (end capacity).
    pub normalising_factor: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Inspected {
    pub data: CurveData,
    pub inspection: Inspection,
    pub warnings: Vec<DataQualityWarning>,
}

/// Curve resampled onto an even capacity grid.
#[derive(Clone, Debug, PartialEq)]
pub struct Preprocessed {
    pub inspection: Inspection,
    pub capacity: Array1<f64>,
    pub voltage: Array1<f64>,
    pub warnings: Vec<DataQualityWarning>,
}

/// Raw derivative on the midpoint-shifted voltage grid.
#[derive(Clone, Debug, PartialEq)]
pub struct Incremented {
    pub inspection: Inspection,
    /// Even voltage grid and the capacity interpolated onto it.
    pub voltage_inverted: Array1<f64>,
    pub capacity_inverted: Array1<f64>,
    pub voltage_step: f64,
    /// `voltage_inverted[..n - 1] + step / 2`: each value sits midway between
    /// the two grid points its derivative was taken over.
    pub voltage: Array1<f64>,
    pub incremental_capacity: Array1<f64>,
    pub warnings: Vec<DataQualityWarning>,
}

/// Final dQ/dV curve.
#[derive(Clone, Debug, PartialEq)]
pub struct Postprocessed {
    pub inspection: Inspection,
    pub voltage: Array1<f64>,
    pub incremental_capacity: Array1<f64>,
    pub warnings: Vec<DataQualityWarning>,
}

pub fn inspect(data: CurveData, config: &ConverterConfig) -> Inspected {
    let capacity = &data.capacity;
    let voltage = &data.voltage;
    let n = data.len();
    let mut warnings = Vec::new();

    let (min_capacity, max_capacity) = capacity
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &c| {
            (lo.min(c), hi.max(c))
        });
    let start_capacity = capacity[0];
    let end_capacity = capacity[n - 1];
    let d_capacity_mean = diff(capacity.view()).mean().unwrap_or(f64::NAN);
    let d_voltage_mean = diff(voltage.view()).mean().unwrap_or(f64::NAN);

    let splits = n.checked_div(config.points_per_split).unwrap_or(0);
    let (std_err_median, std_err_mean) = if splits < config.minimum_splits {
        info!("{n} points give {splits} chunks, skipping fit-error diagnostics");
        warnings.push(DataQualityWarning::TooFewPointsForSplitting { points: n, splits });
        (None, None)
    } else {
        // Trailing points that do not fill a chunk are left out.
        let errors: Vec<f64> = (0..splits)
            .filter_map(|k| {
                let range = k * config.points_per_split..(k + 1) * config.points_per_split;
                linregress_stderr(capacity.slice(s![range.clone()]), voltage.slice(s![range]))
            })
            .collect();
        (median(&errors), mean(&errors))
    };

    if start_capacity != min_capacity {
        warnings.push(DataQualityWarning::StartNotMinimum);
    }
    if end_capacity != max_capacity {
        warnings.push(DataQualityWarning::EndNotMaximum);
    }
    if !warnings.is_empty() {
        debug!("inspection warnings: {warnings:?}");
    }

    let inspection = Inspection {
        number_of_points: n,
        min_capacity,
        max_capacity,
        start_capacity,
        end_capacity,
        d_capacity_mean,
        d_voltage_mean,
        std_err_median,
        std_err_mean,
        normalising_factor: end_capacity,
    };
    Inspected {
        data,
        inspection,
        warnings,
    }
}

impl Inspected {
    /// Resample voltage onto evenly spaced capacity between the capacity
    /// bounds (same point count), then optionally smooth it.
    pub fn pre_process(&self, config: &ConverterConfig) -> CoreResult<Preprocessed> {
        let n = self.data.len();
        let (c1, c2) = (self.inspection.min_capacity, self.inspection.max_capacity);
        if !varies(c1, c2) {
            return Err(CoreError::DegenerateCurve("capacity does not vary"));
        }
        let f = Interpolator::new(
            self.data.capacity.view(),
            self.data.voltage.view(),
            config.interpolation,
        )?;
        let capacity = linspace(c1, c2, n);
        let mut voltage = f.eval_grid(capacity.view());
        if config.pre_smoothing {
            let window = savgol_window(n, config.savgol_window_divisor);
            voltage = savgol_filter(voltage.view(), window, config.savgol_order);
        }
        Ok(Preprocessed {
            inspection: self.inspection.clone(),
            capacity,
            voltage,
            warnings: self.warnings.clone(),
        })
    }
}

impl Preprocessed {
    /// Swap the axes onto an even voltage grid and differentiate.
    pub fn increment(&self, config: &ConverterConfig) -> CoreResult<Incremented> {
        let n = self.voltage.len();
        let (v1, v2) = self
            .voltage
            .iter()
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        if !varies(v1, v2) {
            return Err(CoreError::DegenerateCurve("voltage does not vary"));
        }
        let f = Interpolator::new(self.voltage.view(), self.capacity.view(), config.interpolation)?;
        let voltage_inverted = linspace(v1, v2, n);
        let voltage_step = (v2 - v1) / (n - 1) as f64;
        let mut capacity_inverted = f.eval_grid(voltage_inverted.view());
        if config.smoothing {
            let window = savgol_window(n, config.savgol_window_divisor);
            capacity_inverted =
                savgol_filter(capacity_inverted.view(), window, config.savgol_order);
        }

        let incremental_capacity = diff(capacity_inverted.view()) / voltage_step;
        let voltage = voltage_inverted
            .slice(s![..n - 1])
            .mapv(|v| v + 0.5 * voltage_step);
        debug!("differentiated {n} points, voltage step {voltage_step:.3e} V");
        Ok(Incremented {
            inspection: self.inspection.clone(),
            voltage_inverted,
            capacity_inverted,
            voltage_step,
            voltage,
            incremental_capacity,
            warnings: self.warnings.clone(),
        })
    }
}

impl Incremented {
    /// Smooth, normalise and optionally resample onto the fixed voltage range.
    pub fn post_process(&self, config: &ConverterConfig) -> CoreResult<Postprocessed> {
        let mut warnings = self.warnings.clone();
        let mut dqdv = self.incremental_capacity.clone();

        if config.post_smoothing {
            let points_fwhm = (config.voltage_fwhm / self.voltage_step) as usize;
            let sigma = (points_fwhm as f64 / 2.0).max(2.0);
            dqdv = gaussian_filter1d(dqdv.view(), sigma, config.gaussian_truncate);
        }

        if config.normalise {
            let area = simpson(dqdv.view(), self.voltage.view());
            if area == 0.0 || !area.is_finite() {
                warn!("dq/dv integrates to {area}, skipping normalisation");
                warnings.push(DataQualityWarning::ZeroArea);
            } else {
                let scale = self.inspection.normalising_factor / area.abs();
                dqdv.mapv_inplace(|v| v * scale);
            }
        }

        let (voltage, incremental_capacity) = match config.fixed_voltage_range {
            None => (self.voltage.clone(), dqdv),
            Some(range) => {
                let grid = linspace(range.v_min, range.v_max, range.n_points);
                if self.voltage.len() < 2 {
                    warnings.push(DataQualityWarning::TooFewPointsForFixedRange {
                        points: self.voltage.len(),
                    });
                    let missing = Array1::from_elem(grid.len(), f64::NAN);
                    (grid, missing)
                } else {
                    let f = Interpolator::new(
                        self.voltage.view(),
                        dqdv.view(),
                        config.interpolation,
                    )?;
                    let resampled = f.eval_grid(grid.view());
                    (grid, resampled)
                }
            }
        };
        Ok(Postprocessed {
            inspection: self.inspection.clone(),
            voltage,
            incremental_capacity,
            warnings,
        })
    }
}

/// A span lost in rounding noise counts as flat.
fn varies(lo: f64, hi: f64) -> bool {
    lo < hi && hi - lo > 1e-9 * lo.abs().max(hi.abs())
}

/// Run the whole chain on one curve.
pub fn dqdv(
    voltage: &[f64],
    capacity: &[f64],
    config: &ConverterConfig,
) -> CoreResult<Postprocessed> {
    config.validate()?;
    let data = CurveData::new(capacity, voltage)?;
    inspect(data, config)
        .pre_process(config)?
        .increment(config)?
        .post_process(config)
}

/// Stage-by-stage driver around the typed pipeline.
///
/// Every stage needs its predecessor's result; calling one early fails with
/// [`CoreError::StateOrder`]. Re-running a stage drops the results of the
/// stages after it.
#[derive(Debug)]
pub struct Converter {
    config: ConverterConfig,
    data: Option<CurveData>,
    inspected: Option<Inspected>,
    preprocessed: Option<Preprocessed>,
    incremented: Option<Incremented>,
    postprocessed: Option<Postprocessed>,
}

impl Default for Converter {
    fn default() -> Self {
        Self::new(ConverterConfig::default())
    }
}

impl Converter {
    pub fn new(config: ConverterConfig) -> Self {
        Self {
            config,
            data: None,
            inspected: None,
            preprocessed: None,
            incremented: None,
            postprocessed: None,
        }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    pub fn stage(&self) -> Stage {
        if self.postprocessed.is_some() {
            Stage::Postprocessed
        } else if self.incremented.is_some() {
            Stage::Incremented
        } else if self.preprocessed.is_some() {
            Stage::Preprocessed
        } else if self.inspected.is_some() {
            Stage::Inspected
        } else {
            Stage::Empty
        }
    }

    /// Load a new curve and forget everything computed for the previous one.
    /// Fails with `InvalidParameter` when the configuration is unusable.
    pub fn set_data(&mut self, capacity: &[f64], voltage: &[f64]) -> CoreResult<()> {
        self.config.validate()?;
        let data = CurveData::new(capacity, voltage)?;
        *self = Self::new(self.config.clone());
        self.data = Some(data);
        Ok(())
    }

    pub fn inspect(&mut self) -> CoreResult<&Inspection> {
        let data = match (&self.data, &self.inspected) {
            (Some(data), _) => data.clone(),
            (None, Some(inspected)) => inspected.data.clone(),
            (None, None) => return Err(CoreError::NullData { len: 0 }),
        };
        self.clear_after(Stage::Empty);
        let inspected = self.inspected.insert(inspect(data, &self.config));
        Ok(&inspected.inspection)
    }

    pub fn pre_process(&mut self) -> CoreResult<()> {
        let inspected = self
            .inspected
            .as_ref()
            .ok_or_else(|| self.order_error(Stage::Preprocessed))?;
        let next = inspected.pre_process(&self.config)?;
        self.clear_after(Stage::Inspected);
        self.preprocessed = Some(next);
        Ok(())
    }

    pub fn increment(&mut self) -> CoreResult<()> {
        let preprocessed = self
            .preprocessed
            .as_ref()
            .ok_or_else(|| self.order_error(Stage::Incremented))?;
        let next = preprocessed.increment(&self.config)?;
        self.clear_after(Stage::Preprocessed);
        self.incremented = Some(next);
        Ok(())
    }

    pub fn post_process(&mut self) -> CoreResult<&Postprocessed> {
        let incremented = self
            .incremented
            .as_ref()
            .ok_or_else(|| self.order_error(Stage::Postprocessed))?;
        let next = incremented.post_process(&self.config)?;
        Ok(self.postprocessed.insert(next))
    }

    /// Every stage in sequence on the loaded curve.
    pub fn run(&mut self) -> CoreResult<&Postprocessed> {
        self.inspect()?;
        self.pre_process()?;
        self.increment()?;
        self.post_process()
    }

    pub fn inspection(&self) -> Option<&Inspection> {
        self.inspected.as_ref().map(|i| &i.inspection)
    }

    pub fn preprocessed(&self) -> Option<&Preprocessed> {
        self.preprocessed.as_ref()
    }

    pub fn incremented(&self) -> Option<&Incremented> {
        self.incremented.as_ref()
    }

    pub fn postprocessed(&self) -> Option<&Postprocessed> {
        self.postprocessed.as_ref()
    }

    /// Warnings of the most advanced stage reached.
    pub fn warnings(&self) -> &[DataQualityWarning] {
        if let Some(p) = &self.postprocessed {
            &p.warnings
        } else if let Some(i) = &self.incremented {
            &i.warnings
        } else if let Some(p) = &self.preprocessed {
            &p.warnings
        } else if let Some(i) = &self.inspected {
            &i.warnings
        } else {
            &[]
        }
    }

    fn order_error(&self, requested: Stage) -> CoreError {
        CoreError::StateOrder {
            requested,
            current: self.stage(),
        }
    }

    fn clear_after(&mut self, stage: Stage) {
        if stage == Stage::Empty {
            self.inspected = None;
        }
        if matches!(stage, Stage::Empty | Stage::Inspected) {
            self.preprocessed = None;
        }
        if matches!(stage, Stage::Empty | Stage::Inspected | Stage::Preprocessed) {
            self.incremented = None;
        }
        self.postprocessed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FixedVoltageRange, InterpolationKind};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const SLOPE: f64 = 2.5;

    fn ramp(points: usize) -> (Vec<f64>, Vec<f64>) {
        let voltage: Vec<f64> = linspace(0.1, 1.0, points).to_vec();
        let capacity = voltage.iter().map(|v| SLOPE * (v - 0.1)).collect();
        (voltage, capacity)
    }

    fn plain() -> ConverterConfig {
        ConverterConfig {
            normalise: false,
            ..ConverterConfig::default().without_smoothing()
        }
    }

    #[test]
    fn linear_ramp_gives_constant_derivative() {
        let (voltage, capacity) = ramp(200);
        let out = dqdv(&voltage, &capacity, &plain()).unwrap();
        assert_eq!(out.voltage.len(), 199);
        for value in out.incremental_capacity.iter() {
            assert!((value - SLOPE).abs() < 0.02 * SLOPE, "got {value}");
        }
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn smoothing_keeps_the_ramp_slope() {
        let (voltage, capacity) = ramp(300);
        let config = ConverterConfig {
            normalise: false,
            ..ConverterConfig::default()
        };
        let out = dqdv(&voltage, &capacity, &config).unwrap();
        for value in out.incremental_capacity.iter() {
            assert!((value - SLOPE).abs() < 0.02 * SLOPE, "got {value}");
        }
    }

    #[test]
    fn normalised_area_matches_end_capacity() {
        let voltage: Vec<f64> = linspace(0.05, 1.0, 400).to_vec();
        // Two plateaus, so the derivative has two peaks.
        let capacity: Vec<f64> = voltage
            .iter()
            .map(|v| {
                300.0 / (1.0 + (-(v - 0.3) / 0.02).exp())
                    + 200.0 / (1.0 + (-(v - 0.7) / 0.03).exp())
            })
            .collect();
        let out = dqdv(&voltage, &capacity, &ConverterConfig::default()).unwrap();
        let area = simpson(out.incremental_capacity.view(), out.voltage.view());
        let end = *capacity.last().unwrap();
        assert!((area - end).abs() < 0.01 * end, "area {area} vs {end}");
    }

    #[test]
    fn short_and_empty_curves_are_null_data() {
        let mut converter = Converter::default();
        assert!(matches!(
            converter.set_data(&[], &[]),
            Err(CoreError::NullData { len: 0 })
        ));
        assert!(matches!(
            converter.set_data(&[1.0], &[2.0]),
            Err(CoreError::NullData { len: 1 })
        ));
        assert!(matches!(
            converter.set_data(&[1.0, 2.0, 3.0], &[2.0, 3.0]),
            Err(CoreError::LengthMismatch { .. })
        ));
        assert!(matches!(converter.inspect(), Err(CoreError::NullData { .. })));
    }

    #[test]
    fn stages_out_of_order_fail_fast() {
        let (voltage, capacity) = ramp(50);
        let mut converter = Converter::new(plain());
        converter.set_data(&capacity, &voltage).unwrap();
        assert!(matches!(
            converter.increment(),
            Err(CoreError::StateOrder {
                requested: Stage::Incremented,
                current: Stage::Empty
            })
        ));
        converter.inspect().unwrap();
        assert!(matches!(
            converter.post_process(),
            Err(CoreError::StateOrder {
                requested: Stage::Postprocessed,
                current: Stage::Inspected
            })
        ));
        converter.pre_process().unwrap();
        converter.increment().unwrap();
        assert_eq!(converter.stage(), Stage::Incremented);
        converter.post_process().unwrap();
        assert_eq!(converter.stage(), Stage::Postprocessed);

        // Re-inspecting drops the later stages.
        converter.inspect().unwrap();
        assert_eq!(converter.stage(), Stage::Inspected);
        assert!(converter.postprocessed().is_none());
    }

    #[test]
    fn converter_matches_typed_pipeline_and_is_repeatable() {
        let (voltage, capacity) = ramp(120);
        let config = ConverterConfig::default();
        let mut converter = Converter::new(config.clone());
        converter.set_data(&capacity, &voltage).unwrap();
        let first = converter.run().unwrap().clone();
        let second = dqdv(&voltage, &capacity, &config).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn inspection_reports_bounds_and_chunk_errors() {
        let (voltage, mut capacity) = ramp(95);
        capacity[40] = capacity[60];
        let data = CurveData::new(&capacity, &voltage).unwrap();
        let inspected = inspect(data, &ConverterConfig::default());
        let report = &inspected.inspection;
        assert_eq!(report.number_of_points, 95);
        assert_eq!(report.normalising_factor, *capacity.last().unwrap());
        assert!(report.std_err_median.is_some());
        assert!(report.std_err_mean.unwrap() > 0.0);
        assert!(inspected.warnings.is_empty());

        let reversed: Vec<f64> = capacity.iter().rev().copied().collect();
        let data = CurveData::new(&reversed, &voltage).unwrap();
        let warnings = inspect(data, &ConverterConfig::default()).warnings;
        assert!(warnings.contains(&DataQualityWarning::StartNotMinimum));
        assert!(warnings.contains(&DataQualityWarning::EndNotMaximum));
    }

    #[test]
    fn two_points_are_enough() {
        let out = dqdv(&[0.1, 0.2], &[0.0, 1.0], &ConverterConfig::default()).unwrap();
        assert_eq!(out.incremental_capacity.len(), 1);
        assert!(out
            .warnings
            .contains(&DataQualityWarning::TooFewPointsForSplitting { points: 2, splits: 0 }));
        assert!(out.warnings.contains(&DataQualityWarning::ZeroArea));
    }

    #[test]
    fn flat_voltage_is_degenerate() {
        assert!(matches!(
            dqdv(&[0.5, 0.5, 0.5], &[0.0, 1.0, 2.0], &plain()),
            Err(CoreError::DegenerateCurve(_))
        ));
    }

    #[test]
    fn fixed_range_fills_outside_with_nan() {
        let (voltage, capacity) = ramp(100);
        let config = ConverterConfig {
            fixed_voltage_range: Some(FixedVoltageRange {
                v_min: 0.0,
                v_max: 1.2,
                n_points: 61,
            }),
            ..plain()
        };
        let out = dqdv(&voltage, &capacity, &config).unwrap();
        assert_eq!(out.voltage.len(), 61);
        assert!(out.incremental_capacity[0].is_nan());
        assert!(out.incremental_capacity[60].is_nan());
        assert!((out.incremental_capacity[30] - SLOPE).abs() < 1e-9);
    }

    #[test]
    fn ramps_on_awkward_bounds_stay_finite() {
        for n in [2usize, 3, 11, 37, 101] {
            for i in 1..30 {
                let a = i as f64 / 7.0 + 0.1;
                let b = a + 0.3 + i as f64 / 3.0 * 0.37;
                let voltage = linspace(a, b, n).to_vec();
                let capacity: Vec<f64> = voltage.iter().map(|v| 3.0 * (v - a)).collect();
                let out = dqdv(&voltage, &capacity, &ConverterConfig::default()).unwrap();
                assert_eq!(out.voltage.len(), n - 1);
                assert!(
                    out.incremental_capacity.iter().all(|v| v.is_finite()),
                    "n={n} a={a} b={b}: {:?}",
                    out.incremental_capacity
                );
                if n > 2 {
                    assert!(
                        !out.warnings.contains(&DataQualityWarning::ZeroArea),
                        "n={n} a={a} b={b}"
                    );
                }
            }
        }
    }

    #[test]
    fn derivative_sits_between_its_grid_points() {
        let voltage = linspace(0.0, 1.0, 11).to_vec();
        let capacity: Vec<f64> = voltage.iter().map(|v| 2.0 * v).collect();
        let config = plain();
        let data = CurveData::new(&capacity, &voltage).unwrap();
        let incremented = inspect(data, &config)
            .pre_process(&config)
            .unwrap()
            .increment(&config)
            .unwrap();
        let step = incremented.voltage_step;
        assert!((step - 0.1).abs() < 1e-12);
        let v = &incremented.voltage;
        assert_eq!(v.len(), 10);
        assert!((v[0] - 0.05).abs() < 1e-12, "first {}", v[0]);
        assert!((v[9] - 0.95).abs() < 1e-12, "last {}", v[9]);
        let grid = &incremented.voltage_inverted;
        for i in 0..v.len() {
            assert!(grid[i] < v[i] && v[i] < grid[i + 1]);
        }
    }

    #[test]
    fn unusable_config_is_rejected_not_a_panic() {
        let config = ConverterConfig {
            points_per_split: 0,
            ..ConverterConfig::default()
        };
        assert!(matches!(
            dqdv(&[0.1, 0.2, 0.3], &[0.0, 1.0, 2.0], &config),
            Err(CoreError::InvalidParameter(_))
        ));
        let mut converter = Converter::new(config.clone());
        assert!(matches!(
            converter.set_data(&[0.0, 1.0, 2.0], &[0.1, 0.2, 0.3]),
            Err(CoreError::InvalidParameter(_))
        ));
        assert_eq!(converter.stage(), Stage::Empty);

        // The bare stage still runs, just without chunk diagnostics.
        let data = CurveData::new(&[0.0, 1.0, 2.0], &[0.1, 0.2, 0.3]).unwrap();
        let inspected = inspect(data, &config);
        assert!(inspected.inspection.std_err_median.is_none());
    }

    #[test]
    fn noisy_curve_survives_every_interpolation_kind() {
        let mut rng = StdRng::seed_from_u64(7);
        let voltage: Vec<f64> = linspace(0.05, 1.0, 500)
            .iter()
            .map(|v| v + rng.gen_range(-5e-4..5e-4))
            .collect();
        let capacity: Vec<f64> = linspace(0.0, 400.0, 500).to_vec();
        for kind in [
            InterpolationKind::Linear,
            InterpolationKind::Nearest,
            InterpolationKind::Zero,
            InterpolationKind::Slinear,
            InterpolationKind::Quadratic,
            InterpolationKind::Cubic,
        ] {
            let config = ConverterConfig {
                interpolation: kind,
                ..ConverterConfig::default()
            };
            let out = dqdv(&voltage, &capacity, &config).unwrap();
            assert_eq!(out.voltage.len(), 499);
            assert!(
                out.incremental_capacity.iter().all(|v| v.is_finite()),
                "{kind:?} produced non-finite values"
            );
        }
    }
}
