//! Regulation margin calculator.
//!
//! Pure functions from the current operator inputs to per-unit margins
//! and plant totals. Recomputed from scratch on every input change.

use chrono::Utc;
use std::collections::HashMap;
use tracing::debug;

use crate::types::{
    AggregateTotals, GlobalSettings, MarginReport, Plant, UnitInput, UnitMargins, UnitSpec,
};

// ---------------------------------------------------------------------------
// Numeric helpers
// ---------------------------------------------------------------------------

/// Round to `decimals` places, halves toward +∞.
///
/// The epsilon nudge keeps values such as 1.005 from falling just below
/// the half step after binary conversion.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    ((value + f64::EPSILON) * factor + 0.5).floor() / factor
}

/// Coerce free-form operator input to a number.
///
/// Reads the longest numeric prefix of the trimmed text ("12.5 MW" → 12.5).
/// Empty, unparseable or non-finite input becomes 0.
pub fn coerce_number(text: &str) -> f64 {
    let text = text.trim_start();
    let bytes = text.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end += 1;
    }
    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;
    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        if digits > 0 {
            end = frac_end;
        }
    }
    if digits == 0 {
        return 0.0;
    }
    // Exponent only counts if at least one digit follows it.
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+') | Some(b'-')) {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }

    match text[..end].parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

/// Percent deviation of `actual` from `programmed`.
///
/// A zero target yields a non-finite result.
pub fn deviation_pct(actual: f64, programmed: f64) -> f64 {
    round_to((actual - programmed) / programmed * 100.0, 2)
}

// ---------------------------------------------------------------------------
// Calculator
// ---------------------------------------------------------------------------

pub struct MarginCalculator {
    plant: Plant,
}

impl MarginCalculator {
    pub fn new(plant: Plant) -> Self {
        Self { plant }
    }

    pub fn plant(&self) -> &Plant {
        &self.plant
    }

    /// Derive one unit's disposable power and regulation margins.
    pub fn unit_margins(
        &self,
        unit: &UnitSpec,
        input: &UnitInput,
        globals: &GlobalSettings,
    ) -> UnitMargins {
        let load = if input.load_percent.is_finite() {
            input.load_percent
        } else {
            0.0
        };
        let real = round_to(load / 100.0 * self.plant.max_mw_for(unit), 3);
        let rpf = if input.in_rpf {
            round_to(real * (globals.rpf_percent / 100.0), 3)
        } else {
            0.0
        };
        let rsf = if input.in_rsf {
            round_to(real * (globals.rsf_percent / 100.0), 3)
        } else {
            0.0
        };

        UnitMargins {
            id: unit.id.clone(),
            name: unit.name.clone(),
            load_percent: load,
            real_disp_mw: real,
            in_rpf: input.in_rpf,
            rpf_margin_mw: rpf,
            in_rsf: input.in_rsf,
            rsf_margin_mw: rsf,
            total_margin_mw: round_to(rpf + rsf, 3),
        }
    }

    /// Sum the per-unit values and compare gross power with the target.
    pub fn totals(&self, units: &[UnitMargins], globals: &GlobalSettings) -> AggregateTotals {
        let gross = round_to(units.iter().map(|u| u.real_disp_mw).sum(), 2);
        let total_rpf = round_to(units.iter().map(|u| u.rpf_margin_mw).sum(), 3);
        let total_rsf = round_to(units.iter().map(|u| u.rsf_margin_mw).sum(), 3);
        let deviation = deviation_pct(gross, globals.programmed_mw);
        let fill = gross / globals.programmed_mw * 100.0;
        // A zero target leaves the ratio non-finite; only finite ratios are capped.
        let fill = if fill.is_finite() { fill.min(100.0) } else { fill };

        AggregateTotals {
            gross_power_mw: gross,
            total_rpf_mw: total_rpf,
            total_rsf_mw: total_rsf,
            total_margin_mw: round_to(total_rpf + total_rsf, 3),
            deviation_pct: deviation,
            // NaN and ±∞ compare false, so a zero target is never in range.
            in_range: deviation.abs() <= self.plant.in_range_tolerance_pct,
            fill_pct: fill,
        }
    }

    /// Run a full pass over every configured unit.
    ///
    /// Units without an entry in `inputs` are treated as idle.
    pub fn calculate(
        &self,
        inputs: &HashMap<String, UnitInput>,
        globals: &GlobalSettings,
    ) -> MarginReport {
        let units: Vec<UnitMargins> = self
            .plant
            .units
            .iter()
            .map(|u| {
                let input = inputs.get(&u.id).copied().unwrap_or_default();
                self.unit_margins(u, &input, globals)
            })
            .collect();

        let totals = self.totals(&units, globals);

        debug!(
            gross_mw = totals.gross_power_mw,
            deviation_pct = totals.deviation_pct,
            in_range = totals.in_range,
            "Margins recomputed"
        );

        MarginReport {
            units,
            totals,
            globals: *globals,
            max_mw_per_unit: self.plant.max_mw_per_unit,
            computed_at: Utc::now(),
        }
    }
}

impl Default for MarginCalculator {
    fn default() -> Self {
        Self::new(Plant::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
