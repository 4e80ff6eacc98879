//! Slot allocation.
//!
//! Greedy and order-sensitive: the first acceptable candidate wins, nothing is
//! rebalanced. Allocation only chooses; capacity is reserved separately by the
//! catalog so two concurrent inbound operations cannot both take the last slot.

use std::cmp::Reverse;

use thiserror::Error;

use cabinet_core::{GridId, MaterialId};

use crate::grid::Grid;
use crate::operation::OperationKind;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("no slot available for material {0}")]
    NoSlotAvailable(MaterialId),

    #[error("{0} operations are not allocated to a single slot")]
    UnsupportedKind(OperationKind),
}

#[derive(Debug, Default, Copy, Clone)]
pub struct SlotAllocator;

impl SlotAllocator {
    /// Choose the grid for a stock operation.
    ///
    /// Inbound kinds take the first grid in catalog order with room left.
    /// Stock-out takes the first candidate; callers pass candidates ordered by
    /// [`sort_outbound_candidates`].
    pub fn allocate<'g>(
        material: MaterialId,
        kind: OperationKind,
        candidates: &'g [Grid],
    ) -> Result<&'g Grid, AllocationError> {
        let chosen = match kind {
            OperationKind::In | OperationKind::Recycle => {
                candidates.iter().find(|g| !g.is_full())
            }
            OperationKind::Out => candidates.first(),
            OperationKind::Check => return Err(AllocationError::UnsupportedKind(kind)),
        };
        chosen.ok_or(AllocationError::NoSlotAvailable(material))
    }
}

/// Order stock-out candidates by how much of the material each grid holds,
/// most first. `held` looks up the material's stock in a grid; a grid's
/// `current_qty` is not used, since it also counts other materials and
/// in-flight reservations. Stable, so equal grids keep catalog order.
pub fn sort_outbound_candidates(grids: &mut [Grid], held: impl Fn(GridId) -> i64) {
    grids.sort_by_cached_key(|g| Reverse(held(g.id).max(0)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use cabinet_core::{BoxId, GridId};

    fn grid(id: i64, max_qty: i64, current_qty: i64) -> Grid {
        Grid {
            id: GridId::new(id),
            box_id: BoxId::new(1),
            box_addr: 1,
            channel: id,
            max_qty,
            material: Some(MaterialId::new(9)),
            current_qty,
        }
    }

    #[test]
    fn inbound_skips_full_grids_in_catalog_order() {
        let grids = vec![grid(1, 5, 5), grid(2, 5, 3), grid(3, 0, 100)];
        let chosen = SlotAllocator::allocate(MaterialId::new(9), OperationKind::In, &grids).unwrap();
        assert_eq!(chosen.id, GridId::new(2));
    }

    #[test]
    fn recycle_allocates_like_stock_in() {
        let grids = vec![grid(1, 5, 5), grid(2, 0, 100)];
        let chosen =
            SlotAllocator::allocate(MaterialId::new(9), OperationKind::Recycle, &grids).unwrap();
        assert_eq!(chosen.id, GridId::new(2));
    }

    #[test]
    fn inbound_with_every_grid_full_fails() {
        let grids = vec![grid(1, 5, 5), grid(2, 1, 3)];
        assert_eq!(
            SlotAllocator::allocate(MaterialId::new(9), OperationKind::In, &grids),
            Err(AllocationError::NoSlotAvailable(MaterialId::new(9)))
        );
    }

    #[test]
    fn empty_candidate_list_fails_for_every_allocated_kind() {
        for kind in [OperationKind::In, OperationKind::Out, OperationKind::Recycle] {
            assert!(matches!(
                SlotAllocator::allocate(MaterialId::new(9), kind, &[]),
                Err(AllocationError::NoSlotAvailable(_))
            ));
        }
    }

    #[test]
    fn outbound_takes_fullest_grid_after_sorting() {
        let held = [(1, 2), (2, 7), (3, 7), (4, 1)];
        let mut grids = vec![grid(1, 0, 0), grid(2, 0, 0), grid(3, 0, 0), grid(4, 0, 0)];
        sort_outbound_candidates(&mut grids, |id| {
            held.iter().find(|(g, _)| *g == id.get()).map_or(0, |(_, q)| *q)
        });
        let ids: Vec<_> = grids.iter().map(|g| g.id.get()).collect();
        assert_eq!(ids, vec![2, 3, 1, 4]);

        let chosen = SlotAllocator::allocate(MaterialId::new(9), OperationKind::Out, &grids).unwrap();
        assert_eq!(chosen.id, GridId::new(2));
    }

    #[test]
    fn outbound_ignores_reservations_and_other_materials() {
        // Grid 1 reads busier, but only grid 2 holds the material.
        let mut grids = vec![grid(1, 0, 9), grid(2, 0, 3)];
        sort_outbound_candidates(&mut grids, |id| if id == GridId::new(2) { 3 } else { 0 });
        let chosen = SlotAllocator::allocate(MaterialId::new(9), OperationKind::Out, &grids).unwrap();
        assert_eq!(chosen.id, GridId::new(2));
    }

    #[test]
    fn check_is_not_allocated() {
        let grids = vec![grid(1, 0, 0)];
        assert_eq!(
            SlotAllocator::allocate(MaterialId::new(9), OperationKind::Check, &grids),
            Err(AllocationError::UnsupportedKind(OperationKind::Check))
        );
    }
}
