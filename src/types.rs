//! Shared types for the REGMARGIN dashboard.
//!
//! These types form the data model used across all modules: the plant
//! layout, the operator inputs, the derived margins and the candidate
//! values returned by image extraction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Plant constants
// ---------------------------------------------------------------------------

/// Disposable power of a unit running at 100% load (MW).
pub const MAX_MW_PER_UNIT: f64 = 18.4;
/// Default primary frequency regulation reserve (%).
pub const DEFAULT_RPF_PERCENT: f64 = 3.0;
/// Default secondary frequency regulation reserve (%).
pub const DEFAULT_RSF_PERCENT: f64 = 14.3;
/// Default programmed availability target (MW).
pub const DEFAULT_PROGRAMMED_MW: f64 = 80.0;
/// Gross power is "in range" when it deviates at most this much from target.
pub const IN_RANGE_TOLERANCE_PCT: f64 = 10.0;

// ---------------------------------------------------------------------------
// Plant layout
// ---------------------------------------------------------------------------

/// Identity of a generating unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitSpec {
    /// Stable identifier used in API paths ("g1").
    pub id: String,
    /// Display name as it appears on the paper log ("G1").
    pub name: String,
    /// Per-unit override of the plant-wide maximum.
    #[serde(default)]
    pub max_mw: Option<f64>,
}

impl UnitSpec {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            max_mw: None,
        }
    }

    /// Case-insensitive match against either the display name or the id.
    pub fn matches(&self, label: &str) -> bool {
        let label = label.trim().to_lowercase();
        label == self.name.to_lowercase() || label == self.id.to_lowercase()
    }
}

/// The set of units on the dashboard and their shared ratings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plant {
    #[serde(default = "default_units")]
    pub units: Vec<UnitSpec>,
    #[serde(default = "default_max_mw")]
    pub max_mw_per_unit: f64,
    #[serde(default = "default_tolerance")]
    pub in_range_tolerance_pct: f64,
}

impl Default for Plant {
    fn default() -> Self {
        Self {
            units: default_units(),
            max_mw_per_unit: MAX_MW_PER_UNIT,
            in_range_tolerance_pct: IN_RANGE_TOLERANCE_PCT,
        }
    }
}

impl Plant {
    /// Maximum disposable power of a unit, honouring per-unit overrides.
    pub fn max_mw_for(&self, unit: &UnitSpec) -> f64 {
        unit.max_mw.unwrap_or(self.max_mw_per_unit)
    }

    /// Resolve a free-text label (e.g. from image extraction) to a unit.
    pub fn find_by_label(&self, label: &str) -> Option<&UnitSpec> {
        self.units.iter().find(|u| u.matches(label))
    }
}

/// The five units G1..G5.
pub fn default_units() -> Vec<UnitSpec> {
    (1..=5)
        .map(|n| UnitSpec::new(&format!("g{n}"), &format!("G{n}")))
        .collect()
}

fn default_max_mw() -> f64 {
    MAX_MW_PER_UNIT
}

fn default_tolerance() -> f64 {
    IN_RANGE_TOLERANCE_PCT
}

// ---------------------------------------------------------------------------
// Operator inputs
// ---------------------------------------------------------------------------

/// Per-unit values entered by the operator.
///
/// The default is what a missing entry means to the calculator: zero load
/// and no participation in either regulation band.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct UnitInput {
    pub load_percent: f64,
    pub in_rpf: bool,
    pub in_rsf: bool,
}

impl UnitInput {
    /// A unit at the given load participating in both regulation bands.
    pub fn regulating(load_percent: f64) -> Self {
        Self {
            load_percent,
            in_rpf: true,
            in_rsf: true,
        }
    }
}

/// Settings shared by all units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GlobalSettings {
    /// Primary regulation reserve as a percentage of disposable power.
    pub rpf_percent: f64,
    /// Secondary regulation reserve as a percentage of disposable power.
    pub rsf_percent: f64,
    /// Programmed availability target (MW).
    pub programmed_mw: f64,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            rpf_percent: DEFAULT_RPF_PERCENT,
            rsf_percent: DEFAULT_RSF_PERCENT,
            programmed_mw: DEFAULT_PROGRAMMED_MW,
        }
    }
}

// ---------------------------------------------------------------------------
// Derived values
// ---------------------------------------------------------------------------

/// A unit's inputs together with everything derived from them.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UnitMargins {
    pub id: String,
    pub name: String,
    pub load_percent: f64,
    pub real_disp_mw: f64,
    pub in_rpf: bool,
    pub rpf_margin_mw: f64,
    pub in_rsf: bool,
    pub rsf_margin_mw: f64,
    pub total_margin_mw: f64,
}

/// Sums over all units plus the deviation from the programmed target.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct AggregateTotals {
    pub gross_power_mw: f64,
    pub total_rpf_mw: f64,
    pub total_rsf_mw: f64,
    pub total_margin_mw: f64,
    /// Percent deviation of gross power from the programmed target.
    /// Non-finite when the target is zero.
    pub deviation_pct: f64,
    pub in_range: bool,
    /// Gross power as a share of the target, capped at 100.
    /// Non-finite when the target is zero.
    pub fill_pct: f64,
}

impl fmt::Display for AggregateTotals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.deviation_pct >= 0.0 { "+" } else { "" };
        write!(
            f,
            "gross {:.2} MW ({sign}{}% dev, {}) | RPF {:.3} | RSF {:.3} | margin {:.3}",
            self.gross_power_mw,
            self.deviation_pct,
            if self.in_range { "in range" } else { "OUT OF RANGE" },
            self.total_rpf_mw,
            self.total_rsf_mw,
            self.total_margin_mw,
        )
    }
}

/// Full output of one calculator pass.
#[derive(Debug, Clone, Serialize)]
pub struct MarginReport {
    pub units: Vec<UnitMargins>,
    pub totals: AggregateTotals,
    pub globals: GlobalSettings,
    pub max_mw_per_unit: f64,
    pub computed_at: DateTime<Utc>,
}

impl MarginReport {
    pub fn unit(&self, id: &str) -> Option<&UnitMargins> {
        self.units.iter().find(|u| u.id == id)
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// One row read off the uploaded sheet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedUnit {
    pub name: String,
    #[serde(rename = "loadPercent")]
    pub load_percent: f64,
}

/// Candidate values read from an image, matching the model's response schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionResult {
    pub units: Vec<ExtractedUnit>,
    #[serde(rename = "globalRPF")]
    pub global_rpf: f64,
    #[serde(rename = "globalRSF")]
    pub global_rsf: f64,
    #[serde(rename = "programmedMW")]
    pub programmed_mw: f64,
}

impl ExtractionResult {
    /// Sample result for tests.
    #[cfg(test)]
    pub fn sample() -> Self {
        Self {
            units: vec![
                ExtractedUnit { name: "G1".into(), load_percent: 80.0 },
                ExtractedUnit { name: "g3".into(), load_percent: 75.5 },
            ],
            global_rpf: 5.0,
            global_rsf: 10.0,
            programmed_mw: 70.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
