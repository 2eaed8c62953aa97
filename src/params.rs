//! Walk-forward configuration and parameter metadata
//!
//! [`BacktestParams`] holds every recognized option. It deserializes from TOML
//! (missing keys take their defaults) and is validated against the
//! [`ParamMeta`] table, which also drives parameter sweeps.
//!
//! # Example
//!
//! ```rust
//! use harmonix::params::BacktestParams;
//!
//! let params = BacktestParams::from_toml_str(
//!     r#"
//!     extremum_window = 3
//!     max_leg_span = 40
//!     min_pattern_score = 0.25
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(params.extremum_window.get(), 3);
//! for meta in BacktestParams::param_meta() {
//!     println!("{}: {:?} (default: {})", meta.name, meta.param_type, meta.default);
//! }
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::matcher::{LegSpan, MatchOptions};
use crate::{HarmonicError, Period, Ratio, Result};

// ============================================================
// PARAMETER TYPES
// ============================================================

/// Type of parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// Fraction in 0.0..=1.0
    Ratio,
    /// Positive bar count
    Period,
    /// Non-negative integer
    Count,
    /// Positive amount of money
    Amount,
}

/// Metadata for a single numeric parameter
#[derive(Debug, Clone)]
pub struct ParamMeta {
    pub name: &'static str,
    pub param_type: ParamType,
    pub default: f64,
    /// Accepted range and sweep step: (min, max, step)
    pub range: (f64, f64, f64),
    pub description: &'static str,
}

impl ParamMeta {
    pub const fn ratio(name: &'static str, default: f64, range: (f64, f64, f64), description: &'static str) -> Self {
        Self { name, param_type: ParamType::Ratio, default, range, description }
    }

    pub const fn period(name: &'static str, default: f64, range: (f64, f64, f64), description: &'static str) -> Self {
        Self { name, param_type: ParamType::Period, default, range, description }
    }

    pub const fn count(name: &'static str, default: f64, range: (f64, f64, f64), description: &'static str) -> Self {
        Self { name, param_type: ParamType::Count, default, range, description }
    }

    pub const fn amount(name: &'static str, default: f64, range: (f64, f64, f64), description: &'static str) -> Self {
        Self { name, param_type: ParamType::Amount, default, range, description }
    }

    /// All values from min to max by step, for grid search
    pub fn generate_grid(&self) -> Vec<f64> {
        let (min, max, step) = self.range;
        let mut values = Vec::new();
        let mut v = min;
        while v <= max + f64::EPSILON {
            values.push(v);
            v += step;
        }
        values
    }

    pub fn validate(&self, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(HarmonicError::InvalidValue("parameter must be finite"));
        }
        let (min, max, _) = self.range;
        if value < min || value > max {
            return Err(HarmonicError::OutOfRange { field: self.name, value, min, max });
        }
        match self.param_type {
            ParamType::Period | ParamType::Count if value.fract() != 0.0 => {
                Err(HarmonicError::InvalidValue("count parameters must be integers"))
            }
            _ => Ok(()),
        }
    }
}

// ============================================================
// BACKTEST PARAMETERS
// ============================================================

static PARAM_META: [ParamMeta; 10] = [
    ParamMeta::period("extremum_window", 5.0, (1.0, 50.0, 1.0), "Bars on each side a swing must dominate"),
    ParamMeta::period("detection_interval", 1.0, (1.0, 100.0, 1.0), "Bars between pattern detection runs"),
    ParamMeta::count("future_buffer", 0.0, (0.0, 100.0, 1.0), "Most recent bars withheld from detection"),
    ParamMeta::count("max_leg_span", 0.0, (0.0, 10_000.0, 10.0), "Maximum bars per leg; 0 means unbounded"),
    ParamMeta::ratio("min_pattern_score", 0.0, (0.0, 1.0, 0.1), "Minimum ratio fit for a pattern to signal"),
    ParamMeta::count("max_open_trades", 3.0, (1.0, 100.0, 1.0), "Concurrent open trade cap"),
    ParamMeta::amount("initial_capital", 10_000.0, (1e-6, 1e15, 1_000.0), "Starting equity"),
    ParamMeta::ratio("position_size_fraction", 0.1, (0.0, 1.0, 0.05), "Share of equity committed per trade"),
    ParamMeta::ratio("stop_loss_fraction", 0.02, (0.001, 0.5, 0.005), "Stop distance as a fraction of entry"),
    ParamMeta::ratio("take_profit_fraction", 0.04, (0.001, 5.0, 0.01), "Target distance as a fraction of entry"),
];

/// Options of one walk-forward run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BacktestParams {
    pub extremum_window: Period,
    pub detection_interval: Period,
    pub future_buffer: usize,
    pub max_leg_span: LegSpan,
    pub strict_price_containment: bool,
    #[serde(alias = "validate_D_not_crossed")]
    pub validate_d_not_crossed: bool,
    pub min_pattern_score: Ratio,
    pub max_open_trades: usize,
    pub initial_capital: f64,
    pub position_size_fraction: Ratio,
    pub stop_loss_fraction: f64,
    pub take_profit_fraction: f64,
}

impl Default for BacktestParams {
    fn default() -> Self {
        Self {
            extremum_window: Period::new_const(5),
            detection_interval: Period::new_const(1),
            future_buffer: 0,
            max_leg_span: LegSpan::Unbounded,
            strict_price_containment: true,
            validate_d_not_crossed: true,
            min_pattern_score: Ratio::new_const(0.0),
            max_open_trades: 3,
            initial_capital: 10_000.0,
            position_size_fraction: Ratio::new_const(0.1),
            stop_loss_fraction: 0.02,
            take_profit_fraction: 0.04,
        }
    }
}

impl BacktestParams {
    pub fn param_meta() -> &'static [ParamMeta] {
        &PARAM_META
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let params: Self =
            toml::from_str(input).map_err(|e| HarmonicError::InvalidConfig(e.message().to_string()))?;
        params.validate()?;
        Ok(params)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| HarmonicError::InvalidConfig(e.to_string()))
    }

    /// Check every numeric option against its [`ParamMeta`] range
    pub fn validate(&self) -> Result<()> {
        for meta in Self::param_meta() {
            meta.validate(self.numeric(meta.name))?;
        }
        if let LegSpan::Bounded(0) = self.max_leg_span {
            return Err(HarmonicError::InvalidConfig("max_leg_span must be at least 1".into()));
        }
        Ok(())
    }

    /// Copy with the named numeric options replaced; unknown names are an error.
    ///
    /// `max_leg_span = 0` selects an unbounded span.
    pub fn with_overrides(&self, overrides: &HashMap<&str, f64>) -> Result<Self> {
        let mut next = self.clone();
        for (&name, &value) in overrides {
            let meta = Self::param_meta()
                .iter()
                .find(|m| m.name == name)
                .ok_or_else(|| HarmonicError::InvalidConfig(format!("unknown parameter {name}")))?;
            meta.validate(value)?;
            match name {
                "extremum_window" => next.extremum_window = Period::new(value as usize)?,
                "detection_interval" => next.detection_interval = Period::new(value as usize)?,
                "future_buffer" => next.future_buffer = value as usize,
                "max_leg_span" => {
                    next.max_leg_span = match value as usize {
                        0 => LegSpan::Unbounded,
                        n => LegSpan::Bounded(n),
                    }
                }
                "min_pattern_score" => next.min_pattern_score = Ratio::new(value)?,
                "max_open_trades" => next.max_open_trades = value as usize,
                "initial_capital" => next.initial_capital = value,
                "position_size_fraction" => next.position_size_fraction = Ratio::new(value)?,
                "stop_loss_fraction" => next.stop_loss_fraction = value,
                "take_profit_fraction" => next.take_profit_fraction = value,
                _ => return Err(HarmonicError::InvalidConfig(format!("parameter {name} cannot be overridden"))),
            }
        }
        Ok(next)
    }

    /// Matcher switches carried by these parameters
    pub fn match_options(&self) -> MatchOptions {
        MatchOptions {
            strict_price_containment: self.strict_price_containment,
            max_leg_span: self.max_leg_span,
            validate_d_not_crossed: self.validate_d_not_crossed,
        }
    }

    fn numeric(&self, name: &str) -> f64 {
        match name {
            "extremum_window" => self.extremum_window.get() as f64,
            "detection_interval" => self.detection_interval.get() as f64,
            "future_buffer" => self.future_buffer as f64,
            "max_leg_span" => match self.max_leg_span {
                LegSpan::Unbounded => 0.0,
                LegSpan::Bounded(n) => n as f64,
            },
            "min_pattern_score" => self.min_pattern_score.get(),
            "max_open_trades" => self.max_open_trades as f64,
            "initial_capital" => self.initial_capital,
            "position_size_fraction" => self.position_size_fraction.get(),
            "stop_loss_fraction" => self.stop_loss_fraction,
            "take_profit_fraction" => self.take_profit_fraction,
            _ => f64::NAN,
        }
    }
}

// ============================================================
// TESTS
// ============================================================
