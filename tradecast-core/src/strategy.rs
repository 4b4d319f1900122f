//! Strategy parameter validation.
//!
//! The set of runnable strategies is closed; each kind declares the
//! parameters it cannot run without. Validation happens on session
//! create and on any update that touches the parameter map, before
//! anything is persisted.

use crate::error::ControlError;
use std::collections::HashMap;

/// Known strategy kinds and their required parameters.
const STRATEGIES: &[(&str, &[&str])] = &[
    ("momentum", &["lookback", "threshold"]),
    ("mean_reversion", &["lookback", "entry_z", "exit_z"]),
    ("breakout", &["channel_period"]),
    ("grid", &["grid_levels", "grid_spacing"]),
];

/// The required parameter names for a strategy kind, or `None` when
/// the kind is unknown.
pub fn required_params(strategy: &str) -> Option<&'static [&'static str]> {
    STRATEGIES
        .iter()
        .find(|(name, _)| *name == strategy)
        .map(|(_, params)| *params)
}

/// Fail-fast check that `params` carries every parameter the strategy
/// requires. A `null` value counts as missing.
pub fn validate_params(
    strategy: &str,
    params: &HashMap<String, serde_json::Value>,
) -> Result<(), ControlError> {
    let Some(required) = required_params(strategy) else {
        return Err(ControlError::Validation(format!(
            "unknown strategy '{strategy}'"
        )));
    };
    for name in required {
        match params.get(*name) {
            Some(value) if !value.is_null() => {}
            _ => {
                return Err(ControlError::Validation(format!(
                    "strategy '{strategy}' requires parameter '{name}'"
                )));
            }
        }
    }
    Ok(())
}
