use serde::{Deserialize, Serialize};

use cabinet_core::{BoxId, Entity, GridId, MaterialId};

/// A lockable compartment inside a cabinet, as seen by allocation.
///
/// `current_qty` is a snapshot taken by the catalog: stock on the grid plus
/// in-flight inbound reservations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grid {
    pub id: GridId,
    pub box_id: BoxId,
    /// Bus address of the cabinet board.
    pub box_addr: i64,
    /// Hardware channel of this grid on the board.
    pub channel: i64,
    /// Capacity; `0` means unlimited.
    #[serde(default)]
    pub max_qty: i64,
    #[serde(default)]
    pub material: Option<MaterialId>,
    #[serde(default)]
    pub current_qty: i64,
}

impl Grid {
    /// Current quantity, never negative.
    pub fn current_total(&self) -> i64 {
        self.current_qty.max(0)
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_qty == 0
    }

    pub fn is_full(&self) -> bool {
        self.max_qty > 0 && self.current_total() >= self.max_qty
    }
}

impl Entity for Grid {
    type Id = GridId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(max_qty: i64, current_qty: i64) -> Grid {
        Grid {
            id: GridId::new(1),
            box_id: BoxId::new(1),
            box_addr: 1,
            channel: 0,
            max_qty,
            material: None,
            current_qty,
        }
    }

    #[test]
    fn negative_totals_are_clamped() {
        assert_eq!(grid(5, -2).current_total(), 0);
        assert!(!grid(5, -2).is_full());
    }

    #[test]
    fn unlimited_grid_is_never_full() {
        assert!(!grid(0, 1_000).is_full());
        assert!(grid(5, 5).is_full());
        assert!(!grid(5, 4).is_full());
    }
}
