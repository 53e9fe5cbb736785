//! Heuristic step typing.
//!
//! Rules are evaluated independently in the order of [`RULES`]. When several
//! match, the last one wins. Reordering the table changes results.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ClassifierThresholds;
use crate::steps::StepFeatures;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Charge,
    Discharge,
    CvCharge,
    CvDischarge,
    ChargeCv,
    DischargeCv,
    #[serde(rename = "ocvrlx_up")]
    OcvRelaxUp,
    #[serde(rename = "ocvrlx_down")]
    OcvRelaxDown,
    Ir,
    Rest,
    NotKnown,
}

impl StepType {
    pub const ALL: [StepType; 11] = [
        StepType::Charge,
        StepType::Discharge,
        StepType::CvCharge,
        StepType::CvDischarge,
        StepType::ChargeCv,
        StepType::DischargeCv,
        StepType::OcvRelaxUp,
        StepType::OcvRelaxDown,
        StepType::Ir,
        StepType::Rest,
        StepType::NotKnown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Charge => "charge",
            StepType::Discharge => "discharge",
            StepType::CvCharge => "cv_charge",
            StepType::CvDischarge => "cv_discharge",
            StepType::ChargeCv => "charge_cv",
            StepType::DischargeCv => "discharge_cv",
            StepType::OcvRelaxUp => "ocvrlx_up",
            StepType::OcvRelaxDown => "ocvrlx_down",
            StepType::Ir => "ir",
            StepType::Rest => "rest",
            StepType::NotKnown => "not_known",
        }
    }

    pub fn from_name(name: &str) -> Option<StepType> {
        let name = name.to_ascii_lowercase();
        StepType::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the overwrite sequence.
pub struct Rule {
    pub label: StepType,
    pub matches: fn(&StepFeatures, &ClassifierThresholds) -> bool,
}

fn no_current(f: &StepFeatures, t: &ClassifierThresholds) -> bool {
    f.current.max.abs() + f.current.min.abs() < t.current_hard
}

fn current_negative(f: &StepFeatures, t: &ClassifierThresholds) -> bool {
    f.current.average < -t.current_hard
}

fn current_positive(f: &StepFeatures, t: &ClassifierThresholds) -> bool {
    f.current.average > t.current_hard
}

fn current_down(f: &StepFeatures, t: &ClassifierThresholds) -> bool {
    f.current.delta < -t.stable_current_soft
}

fn voltage_stable(f: &StepFeatures, t: &ClassifierThresholds) -> bool {
    f.voltage.delta.abs() < t.stable_voltage_hard
}

pub const RULES: [Rule; 7] = [
    Rule {
        label: StepType::OcvRelaxUp,
        matches: |f, t| no_current(f, t) && f.voltage.delta > t.stable_voltage_hard,
    },
    Rule {
        label: StepType::OcvRelaxDown,
        matches: |f, t| no_current(f, t) && f.voltage.delta < -t.stable_voltage_hard,
    },
    Rule {
        label: StepType::Discharge,
        matches: |f, t| f.discharge.delta.abs() > t.stable_charge_hard && current_negative(f, t),
    },
    Rule {
        label: StepType::Charge,
        matches: |f, t| f.charge.delta.abs() > t.stable_charge_hard && current_positive(f, t),
    },
    Rule {
        label: StepType::CvDischarge,
        matches: |f, t| voltage_stable(f, t) && current_negative(f, t) && current_down(f, t),
    },
    Rule {
        label: StepType::CvCharge,
        matches: |f, t| voltage_stable(f, t) && current_positive(f, t) && current_down(f, t),
    },
    // Resistance pulses are logged as single rows, so nothing changes.
    Rule {
        label: StepType::Ir,
        matches: |f, _| {
            f.voltage.delta == 0.0
                && f.current.delta == 0.0
                && f.charge.delta == 0.0
                && f.discharge.delta == 0.0
        },
    },
];

/// Outcome of classifying one step.
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub label: StepType,
    /// Earlier matches that were overwritten by `label`.
    pub overridden: Vec<StepType>,
}

pub fn classify(features: &StepFeatures, thresholds: &ClassifierThresholds) -> StepType {
    classify_detailed(features, thresholds).label
}

pub fn classify_detailed(
    features: &StepFeatures,
    thresholds: &ClassifierThresholds,
) -> Classification {
    let mut matched: Vec<StepType> = RULES
        .iter()
        .filter(|rule| (rule.matches)(features, thresholds))
        .map(|rule| rule.label)
        .collect();
    let label = matched.pop().unwrap_or(StepType::NotKnown);
    Classification {
        label,
        overridden: matched,
    }
}
