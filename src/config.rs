use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::schema::ColumnMap;

/// Thresholds used by the step classifier. Percent limits apply to the
/// `delta` features, current limits are in amperes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierThresholds {
    pub current_hard: f64,
    pub current_soft: f64,
    pub stable_current_hard: f64,
    pub stable_current_soft: f64,
    pub stable_voltage_hard: f64,
    pub stable_voltage_soft: f64,
    pub stable_charge_hard: f64,
    pub stable_charge_soft: f64,
    pub ir_change: f64,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            current_hard: 1e-13,
            current_soft: 1e-5,
            stable_current_hard: 2.0,
            stable_current_soft: 4.0,
            stable_voltage_hard: 2.0,
            stable_voltage_soft: 4.0,
            stable_charge_hard: 2.0,
            stable_charge_soft: 5.0,
            ir_change: 1e-5,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Report a rate of 0 instead of NaN for zero-duration steps.
    pub rate_default_zero: bool,
    /// Report a delta of 0 instead of the raw difference when the start value is 0.
    pub delta_default_zero: bool,
}

/// Which sample of a cycle stands in for the whole cycle in the summary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowSelection {
    /// Rows flagged by the tester's own statistics table.
    TesterStatistics,
    /// Last sample (highest data point) of each cycle.
    LastPerCycle,
}

impl Default for RowSelection {
    fn default() -> Self {
        RowSelection::TesterStatistics
    }
}

/// Electrode being cycled. Decides which relaxation direction is reported first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleMode {
    Anode,
    Cathode,
}

impl Default for CycleMode {
    fn default() -> Self {
        CycleMode::Anode
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub row_selection: RowSelection,
    pub find_ocv: bool,
    pub find_end_voltage: bool,
    pub find_ir: bool,
    pub cycle_mode: CycleMode,
    pub convert_date: bool,
    /// 0 for 1900-based day counts, 1 for 1904-based.
    pub datemode: u8,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            row_selection: RowSelection::default(),
            find_ocv: false,
            find_end_voltage: false,
            find_ir: false,
            cycle_mode: CycleMode::default(),
            convert_date: true,
            datemode: 0,
        }
    }
}

/// Interpolation kinds understood by the dQ/dV converter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationKind {
    Linear,
    Nearest,
    Zero,
    Slinear,
    Quadratic,
    Cubic,
}

impl Default for InterpolationKind {
    fn default() -> Self {
        InterpolationKind::Linear
    }
}

/// Explicit output grid for the post-processed dQ/dV curve.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FixedVoltageRange {
    pub v_min: f64,
    pub v_max: f64,
    pub n_points: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    pub points_per_split: usize,
    pub minimum_splits: usize,
    pub interpolation: InterpolationKind,
    pub pre_smoothing: bool,
    pub smoothing: bool,
    pub post_smoothing: bool,
    pub savgol_window_divisor: f64,
    pub savgol_order: usize,
    /// Peak width in volts used to size the Gaussian filter.
    pub voltage_fwhm: f64,
    pub gaussian_truncate: f64,
    pub normalise: bool,
    pub fixed_voltage_range: Option<FixedVoltageRange>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            points_per_split: 10,
            minimum_splits: 3,
            interpolation: InterpolationKind::Linear,
            pre_smoothing: true,
            smoothing: true,
            post_smoothing: true,
            savgol_window_divisor: 50.0,
            savgol_order: 3,
            voltage_fwhm: 0.01,
            gaussian_truncate: 4.0,
            normalise: true,
            fixed_voltage_range: None,
        }
    }
}

impl ConverterConfig {
    /// Same settings with every smoothing pass switched off.
    pub fn without_smoothing(mut self) -> Self {
        self.pre_smoothing = false;
        self.smoothing = false;
        self.post_smoothing = false;
        self
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.points_per_split == 0 {
            return Err(CoreError::InvalidParameter(
                "points_per_split must be at least 1".into(),
            ));
        }
        if !(self.savgol_window_divisor > 0.0) {
            return Err(CoreError::InvalidParameter(format!(
                "savgol_window_divisor must be positive, got {}",
                self.savgol_window_divisor
            )));
        }
        if self.post_smoothing && !(self.voltage_fwhm > 0.0) {
            return Err(CoreError::InvalidParameter(format!(
                "voltage_fwhm must be positive, got {}",
                self.voltage_fwhm
            )));
        }
        if !(self.gaussian_truncate > 0.0) {
            return Err(CoreError::InvalidParameter(format!(
                "gaussian_truncate must be positive, got {}",
                self.gaussian_truncate
            )));
        }
        if let Some(range) = self.fixed_voltage_range {
            if range.n_points < 2 || !(range.v_min < range.v_max) {
                return Err(CoreError::InvalidParameter(format!(
                    "fixed voltage range {range:?} needs v_min < v_max and at least two points"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    /// Insert an all-NaN row between a cycle's discharge and charge segments.
    pub splitter: bool,
    /// Grid size for the shared voltage axis of the split tables.
    pub shared_grid_points: usize,
    pub converter: ConverterConfig,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            splitter: true,
            shared_grid_points: 100,
            converter: ConverterConfig::default(),
        }
    }
}

impl AssemblerConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if self.shared_grid_points < 2 {
            return Err(CoreError::InvalidParameter(format!(
                "shared_grid_points must be at least 2, got {}",
                self.shared_grid_points
            )));
        }
        self.converter.validate()
    }
}

/// Every tunable of the core in one document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub columns: ColumnMap,
    pub extractor: ExtractorConfig,
    pub classifier: ClassifierThresholds,
    pub summary: SummaryConfig,
    pub assembler: AssemblerConfig,
}

impl CoreConfig {
    pub fn from_json_str(text: &str) -> CoreResult<Self> {
        let config: CoreConfig = serde_json::from_str(text)?;
        config.assembler.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
