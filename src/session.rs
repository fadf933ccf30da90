//! In-memory operator session.
//!
//! Holds the values the operator edits on the dashboard and runs the
//! calculator over them on demand. Nothing here is persisted; the session
//! lives as long as the process.

use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::calc::{coerce_number, MarginCalculator};
use crate::types::{ExtractionResult, GlobalSettings, MarginReport, Plant, UnitInput};

#[derive(Debug, Error, PartialEq)]
pub enum SessionError {
    #[error("Unknown unit: {0}")]
    UnitNotFound(String),
}

/// Which units an extraction result touched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplySummary {
    /// Ids of units whose load was overwritten.
    pub matched: Vec<String>,
    /// Extracted names that matched no configured unit.
    pub unmatched: Vec<String>,
}

/// Partial update of the global settings. `None` leaves a value unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalsUpdate {
    pub rpf_percent: Option<f64>,
    pub rsf_percent: Option<f64>,
    pub programmed_mw: Option<f64>,
}

pub struct Session {
    calculator: MarginCalculator,
    inputs: HashMap<String, UnitInput>,
    globals: GlobalSettings,
}

impl Session {
    /// Start a session with the given initial loads. Every configured unit
    /// starts in both regulation bands; units missing from `loads` start at 0%.
    pub fn new(plant: Plant, loads: &HashMap<String, f64>, globals: GlobalSettings) -> Self {
        let inputs = plant
            .units
            .iter()
            .map(|u| {
                let load = loads.get(&u.id).copied().unwrap_or(0.0);
                (u.id.clone(), UnitInput::regulating(load))
            })
            .collect();

        Self {
            calculator: MarginCalculator::new(plant),
            inputs,
            globals,
        }
    }

    pub fn globals(&self) -> GlobalSettings {
        self.globals
    }

    pub fn input(&self, unit_id: &str) -> Option<UnitInput> {
        self.inputs.get(unit_id).copied()
    }

    fn input_mut(&mut self, unit_id: &str) -> Result<&mut UnitInput, SessionError> {
        self.inputs
            .get_mut(unit_id)
            .ok_or_else(|| SessionError::UnitNotFound(unit_id.to_string()))
    }

    pub fn set_load(&mut self, unit_id: &str, load_percent: f64) -> Result<(), SessionError> {
        let load = if load_percent.is_finite() { load_percent } else { 0.0 };
        self.input_mut(unit_id)?.load_percent = load;
        debug!(unit = unit_id, load, "Load updated");
        Ok(())
    }

    /// Set a load from raw form text, coercing anything unparseable to 0.
    pub fn set_load_text(&mut self, unit_id: &str, text: &str) -> Result<(), SessionError> {
        self.set_load(unit_id, coerce_number(text))
    }

    pub fn set_regulation(
        &mut self,
        unit_id: &str,
        primary: Option<bool>,
        secondary: Option<bool>,
    ) -> Result<(), SessionError> {
        let input = self.input_mut(unit_id)?;
        if let Some(p) = primary {
            input.in_rpf = p;
        }
        if let Some(s) = secondary {
            input.in_rsf = s;
        }
        debug!(unit = unit_id, in_rpf = input.in_rpf, in_rsf = input.in_rsf, "Regulation flags updated");
        Ok(())
    }

    pub fn set_globals(&mut self, update: GlobalsUpdate) {
        let finite = |v: f64| if v.is_finite() { v } else { 0.0 };
        if let Some(v) = update.rpf_percent {
            self.globals.rpf_percent = finite(v);
        }
        if let Some(v) = update.rsf_percent {
            self.globals.rsf_percent = finite(v);
        }
        if let Some(v) = update.programmed_mw {
            self.globals.programmed_mw = finite(v);
        }
        debug!(
            rpf = self.globals.rpf_percent,
            rsf = self.globals.rsf_percent,
            programmed_mw = self.globals.programmed_mw,
            "Global settings updated"
        );
    }

    /// Recompute margins over the current inputs.
    pub fn report(&self) -> MarginReport {
        self.calculator.calculate(&self.inputs, &self.globals)
    }

    /// Overwrite inputs with values read from an image.
    ///
    /// Only units whose extracted name matches a configured unit have their
    /// load replaced; the three global values are always replaced. When a
    /// name appears twice the later row wins.
    pub fn apply_extraction(&mut self, result: &ExtractionResult) -> ApplySummary {
        let mut summary = ApplySummary::default();

        for row in &result.units {
            let unit_id = match self.calculator.plant().find_by_label(&row.name) {
                Some(u) => u.id.clone(),
                None => {
                    warn!(name = %row.name, "Extracted unit does not match any configured unit");
                    summary.unmatched.push(row.name.clone());
                    continue;
                }
            };
            if let Some(input) = self.inputs.get_mut(&unit_id) {
                input.load_percent = if row.load_percent.is_finite() { row.load_percent } else { 0.0 };
            }
            if !summary.matched.contains(&unit_id) {
                summary.matched.push(unit_id);
            }
        }

        self.set_globals(GlobalsUpdate {
            rpf_percent: Some(result.global_rpf),
            rsf_percent: Some(result.global_rsf),
            programmed_mw: Some(result.programmed_mw),
        });

        info!(
            matched = summary.matched.len(),
            unmatched = summary.unmatched.len(),
            rpf = self.globals.rpf_percent,
            rsf = self.globals.rsf_percent,
            programmed_mw = self.globals.programmed_mw,
            "Extraction applied"
        );

        summary
    }
}

impl Default for Session {
    /// The five-unit plant at its usual operating point.
    fn default() -> Self {
        let loads: HashMap<String, f64> = [
            ("g1", 100.0),
            ("g2", 92.0),
            ("g3", 95.0),
            ("g4", 90.0),
            ("g5", 100.0),
        ]
        .into_iter()
        .map(|(id, load)| (id.to_string(), load))
        .collect();

        Self::new(Plant::default(), &loads, GlobalSettings::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
