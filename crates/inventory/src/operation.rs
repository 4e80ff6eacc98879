//! Stock operations and their lifecycle.
//!
//! An operation is created `pending` together with its correlation entry, goes
//! `dispatched` once the hardware gateway accepted the command, and ends
//! `reconciled` when the matching webhook is applied. Dispatch errors and
//! stock-policy rejections end it `failed`; correlations that never see a
//! webhook end it `expired`. Terminal states never change again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cabinet_core::{
    AccountId, BoxId, DomainError, DomainResult, Entity, GridId, MaterialId, OperationId, SensorId,
};

use crate::stock::StockTransition;

/// Gateway operation code: open without weighing.
pub const HW_OP_UNWEIGHED: i64 = 0;
/// Gateway operation code: weigh only, nothing to reconcile.
pub const HW_OP_WEIGH: i64 = 1;
/// Gateway operation code for a counted weighing.
pub const HW_OP_COUNT: i64 = 2;
/// Gateway operation code for an inventory check weighing.
pub const HW_OP_CHECK: i64 = 3;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    In,
    Out,
    Recycle,
    Check,
}

impl OperationKind {
    /// Kinds that add items to a grid and therefore reserve capacity.
    pub fn is_inbound(self) -> bool {
        matches!(self, Self::In | Self::Recycle)
    }

    /// Operation code sent with the hardware command.
    pub fn hardware_code(self) -> i64 {
        match self {
            Self::Check => HW_OP_CHECK,
            Self::In | Self::Out | Self::Recycle => HW_OP_COUNT,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
            Self::Recycle => "recycle",
            Self::Check => "check",
        }
    }
}

impl core::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Dispatched,
    Reconciled,
    Failed,
    Expired,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Reconciled | Self::Failed | Self::Expired)
    }
}

/// Everything known about an operation before the store assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDraft {
    pub kind: OperationKind,
    pub material: MaterialId,
    pub sensor: SensorId,
    pub grid: GridId,
    pub box_id: BoxId,
    pub box_addr: i64,
    pub channel: i64,
    pub account: Option<AccountId>,
    pub requested_qty: i64,
    /// Stock on the grid when the operation was opened (check operations).
    pub qty_before: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub material: MaterialId,
    pub sensor: SensorId,
    pub grid: GridId,
    pub box_id: BoxId,
    pub box_addr: i64,
    pub channel: i64,
    pub account: Option<AccountId>,
    pub requested_qty: i64,
    pub qty_before: i64,
    /// Signed change applied to stock (or the measured count for checks).
    pub qty: i64,
    pub qty_after: i64,
    pub status: OperationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Operation {
    pub fn new(id: OperationId, draft: OperationDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            kind: draft.kind,
            material: draft.material,
            sensor: draft.sensor,
            grid: draft.grid,
            box_id: draft.box_id,
            box_addr: draft.box_addr,
            channel: draft.channel,
            account: draft.account,
            requested_qty: draft.requested_qty,
            qty_before: draft.qty_before,
            qty: 0,
            qty_after: 0,
            status: OperationStatus::Pending,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Correlation token carried by the hardware command.
    pub fn token(&self) -> String {
        self.id.to_string()
    }

    pub fn mark_dispatched(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != OperationStatus::Pending {
            return Err(self.bad_transition(OperationStatus::Dispatched));
        }
        self.status = OperationStatus::Dispatched;
        self.updated_at = now;
        Ok(())
    }

    /// Record the stock change computed from a webhook.
    pub fn mark_reconciled(
        &mut self,
        transition: &StockTransition,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_open(OperationStatus::Reconciled)?;
        self.qty_before = transition.before;
        self.qty = transition.delta;
        self.qty_after = transition.after;
        self.status = OperationStatus::Reconciled;
        self.updated_at = now;
        Ok(())
    }

    /// Record the count measured by an inventory check. Only the measured
    /// quantity is kept; `qty_before` stays what was on the books.
    pub fn record_check(&mut self, measured: i64, now: DateTime<Utc>) -> DomainResult<()> {
        if self.kind != OperationKind::Check {
            return Err(DomainError::invariant(format!(
                "operation {} is {}, not a check",
                self.id, self.kind
            )));
        }
        self.ensure_open(OperationStatus::Reconciled)?;
        self.qty = measured;
        self.qty_after = measured;
        self.status = OperationStatus::Reconciled;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_open(OperationStatus::Failed)?;
        self.status = OperationStatus::Failed;
        self.failure = Some(reason.into());
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_expired(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_open(OperationStatus::Expired)?;
        self.status = OperationStatus::Expired;
        self.updated_at = now;
        Ok(())
    }

    fn ensure_open(&self, next: OperationStatus) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(self.bad_transition(next));
        }
        Ok(())
    }

    fn bad_transition(&self, next: OperationStatus) -> DomainError {
        DomainError::invariant(format!(
            "operation {} cannot go from {:?} to {:?}",
            self.id, self.status, next
        ))
    }
}

impl Entity for Operation {
    type Id = OperationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stock::StockWrite;

    fn draft(kind: OperationKind) -> OperationDraft {
        OperationDraft {
            kind,
            material: MaterialId::new(1),
            sensor: SensorId::new(2),
            grid: GridId::new(3),
            box_id: BoxId::new(4),
            box_addr: 5,
            channel: 6,
            account: Some(AccountId::new(7)),
            requested_qty: 2,
            qty_before: 0,
        }
    }

    #[test]
    fn lifecycle_runs_pending_dispatched_reconciled() {
        let now = Utc::now();
        let mut op = Operation::new(OperationId::new(1), draft(OperationKind::In), now);
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.token(), "1");

        op.mark_dispatched(now).unwrap();
        let transition = StockTransition {
            before: 1,
            delta: 2,
            after: 3,
            write: StockWrite::Upsert(3),
        };
        op.mark_reconciled(&transition, now).unwrap();
        assert_eq!((op.qty_before, op.qty, op.qty_after), (1, 2, 3));
        assert_eq!(op.status, OperationStatus::Reconciled);
    }

    #[test]
    fn terminal_operations_do_not_move() {
        let now = Utc::now();
        let mut op = Operation::new(OperationId::new(1), draft(OperationKind::Out), now);
        op.mark_expired(now).unwrap();
        assert!(matches!(op.mark_failed("late", now), Err(DomainError::InvariantViolation(_))));
        assert!(op.mark_dispatched(now).is_err());
        assert_eq!(op.status, OperationStatus::Expired);
    }

    #[test]
    fn only_check_operations_record_checks() {
        let now = Utc::now();
        let mut op = Operation::new(OperationId::new(1), draft(OperationKind::In), now);
        assert!(op.record_check(4, now).is_err());

        let mut check = Operation::new(OperationId::new(2), draft(OperationKind::Check), now);
        check.record_check(4, now).unwrap();
        assert_eq!(check.qty, 4);
    }

    #[test]
    fn kinds_map_to_hardware_codes() {
        assert_eq!(OperationKind::In.hardware_code(), 2);
        assert_eq!(OperationKind::Check.hardware_code(), 3);
        assert!(OperationKind::Recycle.is_inbound());
        assert!(!OperationKind::Out.is_inbound());
    }
}
