//! Weight to item count inference.

use serde::{Deserialize, Serialize};

use cabinet_core::{DomainError, DomainResult};

/// Infer how many items a weight reading represents.
///
/// Whole items are `weight / unit_weight`; the leftover weight counts as one
/// more item when it falls inside the calibration band `lower..=come_up`.
/// Readings at or below zero mean an empty slot. A non-positive `unit_weight`
/// has no meaningful count and also yields zero.
pub fn infer(weight: i64, unit_weight: i64, lower: i64, come_up: i64) -> i64 {
    if weight <= 0 || unit_weight <= 0 {
        return 0;
    }
    let whole = weight / unit_weight;
    let remainder = weight - whole * unit_weight;
    if lower <= remainder && remainder <= come_up {
        whole + 1
    } else {
        whole
    }
}

/// Per material/sensor calibration.
///
/// Wire form is the sensor binding's params blob:
/// `{"weight": 100, "lower": 10, "comeUp": 20}`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCalibration", into = "RawCalibration")]
pub struct CalibrationParams {
    unit_weight: i64,
    lower: i64,
    come_up: i64,
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
struct RawCalibration {
    weight: i64,
    #[serde(default)]
    lower: i64,
    #[serde(default, rename = "comeUp")]
    come_up: i64,
}

impl TryFrom<RawCalibration> for CalibrationParams {
    type Error = DomainError;

    fn try_from(raw: RawCalibration) -> Result<Self, Self::Error> {
        Self::new(raw.weight, raw.lower, raw.come_up)
    }
}

impl From<CalibrationParams> for RawCalibration {
    fn from(p: CalibrationParams) -> Self {
        Self {
            weight: p.unit_weight,
            lower: p.lower,
            come_up: p.come_up,
        }
    }
}

impl CalibrationParams {
    pub fn new(unit_weight: i64, lower: i64, come_up: i64) -> DomainResult<Self> {
        if unit_weight <= 0 {
            return Err(DomainError::validation(format!(
                "unit weight must be positive, got {unit_weight}"
            )));
        }
        Ok(Self {
            unit_weight,
            lower,
            come_up,
        })
    }

    /// Parse the params blob stored on a material/sensor binding.
    pub fn from_json(blob: &str) -> DomainResult<Self> {
        serde_json::from_str(blob)
            .map_err(|e| DomainError::validation(format!("calibration params: {e}")))
    }

    pub fn unit_weight(&self) -> i64 {
        self.unit_weight
    }

    pub fn lower(&self) -> i64 {
        self.lower
    }

    pub fn come_up(&self) -> i64 {
        self.come_up
    }

    pub fn infer(&self, weight: i64) -> i64 {
        infer(weight, self.unit_weight, self.lower, self.come_up)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn remainder_inside_band_adds_one_item() {
        assert_eq!(infer(215, 100, 10, 20), 3);
        assert_eq!(infer(205, 100, 10, 20), 2);
        assert_eq!(infer(300, 100, 10, 20), 3);
    }

    #[test]
    fn empty_or_negative_reading_is_zero() {
        assert_eq!(infer(0, 100, 10, 20), 0);
        assert_eq!(infer(-40, 100, 0, 99), 0);
    }

    #[test]
    fn band_closing_inside_the_span_is_not_monotone() {
        // The band lifts 215 to three items while 250 falls back to two.
        assert_eq!(infer(215, 100, 10, 20), 3);
        assert_eq!(infer(250, 100, 10, 20), 2);
    }

    #[test]
    fn params_blob_parses_camel_case() {
        let params = CalibrationParams::from_json(r#"{"weight":100,"lower":10,"comeUp":20}"#).unwrap();
        assert_eq!(params, CalibrationParams::new(100, 10, 20).unwrap());
        assert_eq!(params.infer(215), 3);
    }

    #[test]
    fn zero_unit_weight_is_rejected() {
        assert!(matches!(CalibrationParams::new(0, 1, 2), Err(DomainError::Validation(_))));
        assert!(CalibrationParams::from_json(r#"{"weight":0,"lower":1,"comeUp":2}"#).is_err());
    }

    /// Calibrations whose band is empty or runs to the end of the item span.
    fn monotone_calibration() -> impl Strategy<Value = (i64, i64, i64)> {
        (2i64..1_000).prop_flat_map(|unit| {
            let empty_band = (1..unit)
                .prop_flat_map(|lower| (Just(lower), 0..lower))
                .boxed();
            let open_band = (0..unit, (unit - 1)..(unit * 2)).boxed();
            prop_oneof![empty_band, open_band]
                .prop_map(move |(lower, come_up)| (unit, lower, come_up))
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: more weight never yields fewer items for these calibrations.
        #[test]
        fn infer_is_non_decreasing(
            (unit, lower, come_up) in monotone_calibration(),
            w1 in -1_000i64..100_000,
            step in 0i64..10_000,
        ) {
            let w2 = w1 + step;
            prop_assert!(infer(w1, unit, lower, come_up) <= infer(w2, unit, lower, come_up));
        }

        /// Property: the count never exceeds one more than the whole items.
        #[test]
        fn infer_stays_near_whole_items(
            weight in 1i64..1_000_000,
            unit in 1i64..5_000,
            lower in 0i64..5_000,
            come_up in 0i64..5_000,
        ) {
            let qty = infer(weight, unit, lower, come_up);
            let whole = weight / unit;
            prop_assert!(qty == whole || qty == whole + 1);
        }
    }
}
