//! Strongly-typed identifiers used across the domain.
//!
//! Catalog rows (materials, grids, sensors, cabinets) are keyed by positive
//! integers owned by the catalog collaborator. Operation ids are issued by the
//! operation store and double as the correlation token sent to the hardware
//! gateway, so they round-trip through their decimal string form.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of a material (the kind of item stored in a grid).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaterialId(i64);

/// Identifier of a grid (logical slot id, not the hardware channel).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GridId(i64);

/// Identifier of a weight sensor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorId(i64);

/// Identifier of a cabinet (box) row in the catalog.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoxId(i64);

/// Identifier of the account that initiated an operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(i64);

/// Identifier of a stock operation; also the correlation token.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(i64);

macro_rules! impl_int_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            pub const fn get(self) -> i64 {
                self.0
            }

            /// Build an identifier from untrusted input; ids must be positive.
            pub fn parse_positive(value: i64) -> Result<Self, DomainError> {
                if value <= 0 {
                    return Err(DomainError::invalid_id(format!(
                        "{}: must be positive, got {}",
                        $name, value
                    )));
                }
                Ok(Self(value))
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value = s
                    .trim()
                    .parse::<i64>()
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Self::parse_positive(value)
            }
        }
    };
}

impl_int_newtype!(MaterialId, "MaterialId");
impl_int_newtype!(GridId, "GridId");
impl_int_newtype!(SensorId, "SensorId");
impl_int_newtype!(BoxId, "BoxId");
impl_int_newtype!(AccountId, "AccountId");
impl_int_newtype!(OperationId, "OperationId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_id_round_trips_through_token_string() {
        let id = OperationId::new(42);
        let token = id.to_string();
        assert_eq!(token, "42");
        assert_eq!(token.parse::<OperationId>().unwrap(), id);
    }

    #[test]
    fn non_numeric_and_non_positive_ids_are_rejected() {
        assert!(matches!("undefined".parse::<OperationId>(), Err(DomainError::InvalidId(_))));
        assert!(matches!("0".parse::<GridId>(), Err(DomainError::InvalidId(_))));
        assert!(matches!(MaterialId::parse_positive(-3), Err(DomainError::InvalidId(_))));
    }
}
