//! Confidence floor handling.
//!
//! Every persisted confidence is at least [`CONFIDENCE_FLOOR`]. Values that
//! land within [`CLAMP_TOLERANCE`] below the floor are rounding noise from the
//! weighted similarity average and are clamped up; anything lower is rejected.

use crate::error::{ColetorError, ColetorResult, ValidationError};

/// Absolute floor for persisted confidences.
pub const CONFIDENCE_FLOOR: f64 = 0.70;

/// Distance below the floor that is still clamped instead of rejected.
pub const CLAMP_TOLERANCE: f64 = 0.001;

/// Checks that `value` lies in [0, 1].
///
/// # Errors
/// Returns `ConfidenceOutOfRange` for values outside [0, 1] or NaN.
pub fn validate_unit(value: f64) -> Result<f64, ValidationError> {
    if value.is_nan() || !(0.0..=1.0).contains(&value) {
        return Err(ValidationError::ConfidenceOutOfRange { value });
    }
    Ok(value)
}

/// Applies the persistence floor to `value`.
///
/// # Errors
/// Returns `BelowThreshold` when `value` is more than the tolerance below the floor.
pub fn enforce_floor(context: &'static str, value: f64) -> ColetorResult<f64> {
    let value = validate_unit(value)?;
    if value >= CONFIDENCE_FLOOR {
        return Ok(value);
    }
    if CONFIDENCE_FLOOR - value <= CLAMP_TOLERANCE {
        return Ok(CONFIDENCE_FLOOR);
    }
    Err(ColetorError::below_threshold(context, value, CONFIDENCE_FLOOR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_accepts_values_above() {
        assert!((enforce_floor("t", 0.82).unwrap() - 0.82).abs() < f64::EPSILON);
        assert!((enforce_floor("t", 1.0).unwrap() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_floor_clamps_rounding_noise() {
        let v = enforce_floor("t", 0.6995).unwrap();
        assert!((v - CONFIDENCE_FLOOR).abs() < f64::EPSILON);
    }

    #[test]
    fn test_floor_rejects_low_values() {
        let err = enforce_floor("grouping", 0.65).unwrap_err();
        assert!(err.is_below_threshold());
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(validate_unit(1.2).is_err());
        assert!(validate_unit(-0.1).is_err());
        assert!(validate_unit(f64::NAN).is_err());
    }
}
