//! Laboratory result service.
//!
//! Result milestones drive the parent order: recording a result completes the order,
//! validating it marks the order validated, and attaching the report marks it reported. The
//! order is written first with its observed revision, so concurrent result writers for the same
//! order are serialized by the order's compare-and-swap.

use crate::access::ResourceKind;
use crate::audit::AuditAction;
use crate::decision::Decision;
use crate::lifecycle::lab_order::{LabOrder, LabOrderStatus};
use crate::lifecycle::lab_result::{
    one_result_per_order_guard, Amendment, LabReport, LabResult, LabResultStatus, TestValue,
};
use crate::lifecycle::{check_transition, LifecycleStatus};
use crate::principal::{require_principal, Principal};
use crate::services::{load, precheck, CareContext, Plan};
use crate::store::{RecordStore, Write};
use crate::{CareError, CareResult};
use careflow_registry::Permission;
use careflow_types::{NonEmptyText, RecordId};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LabResultAction {
    Create {
        order: RecordId,
        values: Vec<TestValue>,
        comments: Option<NonEmptyText>,
    },
    Edit {
        id: RecordId,
        values: Option<Vec<TestValue>>,
        comments: Option<NonEmptyText>,
    },
    Validate {
        id: RecordId,
        notes: Option<NonEmptyText>,
    },
    UploadReport {
        id: RecordId,
        file_name: NonEmptyText,
    },
    Amend {
        id: RecordId,
        values: Vec<TestValue>,
        reason: NonEmptyText,
    },
}

impl LabResultAction {
    pub fn target(&self) -> Option<RecordId> {
        match self {
            Self::Create { .. } => None,
            Self::Edit { id, .. }
            | Self::Validate { id, .. }
            | Self::UploadReport { id, .. }
            | Self::Amend { id, .. } => Some(*id),
        }
    }

    fn audit_action(&self) -> AuditAction {
        match self {
            Self::Create { .. } => AuditAction::Create,
            Self::Edit { .. } | Self::UploadReport { .. } => AuditAction::Update,
            Self::Validate { .. } => AuditAction::StatusChange,
            Self::Amend { .. } => AuditAction::Amend,
        }
    }
}

/// Writes for a result action: an optional order update, then the result itself.
#[derive(Debug)]
pub struct LabResultPlan {
    order: Option<Write<LabOrder>>,
    result: Plan<LabResult>,
}

impl LabResultPlan {
    pub fn next_state(&self) -> Option<&'static str> {
        self.result.next_state()
    }

    /// Status the parent order will hold, if the action writes it.
    pub fn order_status(&self) -> Option<LabOrderStatus> {
        self.order.as_ref().map(|w| w.record().status)
    }

    fn execute(
        self,
        orders: &dyn RecordStore<LabOrder>,
        results: &dyn RecordStore<LabResult>,
    ) -> CareResult<LabResult> {
        if let Some(order) = self.order {
            orders.apply(order)?;
        }
        self.result.execute(results)
    }
}

#[derive(Clone)]
pub struct LabResultService {
    ctx: CareContext,
    orders: Arc<dyn RecordStore<LabOrder>>,
    results: Arc<dyn RecordStore<LabResult>>,
}

impl LabResultService {
    pub fn new(
        ctx: CareContext,
        orders: Arc<dyn RecordStore<LabOrder>>,
        results: Arc<dyn RecordStore<LabResult>>,
    ) -> Self {
        Self {
            ctx,
            orders,
            results,
        }
    }

    pub fn decide(&self, principal: Option<&Principal>, action: &LabResultAction) -> Decision {
        Decision::from_plan(&self.plan(principal, action), LabResultPlan::next_state)
    }

    pub fn apply(
        &self,
        principal: Option<&Principal>,
        action: LabResultAction,
    ) -> CareResult<LabResult> {
        self.ctx.audited(
            principal,
            action.audit_action(),
            ResourceKind::LabResult,
            action.target(),
            || {
                let plan = self.plan(principal, &action)?;
                let order_status = plan.order_status();
                let stored = plan.execute(self.orders.as_ref(), self.results.as_ref())?;
                tracing::info!(
                    lab_result = %stored.id,
                    lab_order = %stored.order,
                    status = stored.status.as_str(),
                    order_status = order_status.map(|s| s.as_str()),
                    "lab result written"
                );
                Ok(stored)
            },
        )
    }

    pub fn plan(
        &self,
        principal: Option<&Principal>,
        action: &LabResultAction,
    ) -> CareResult<LabResultPlan> {
        let principal = require_principal(principal)?;
        let engine = self.ctx.engine();
        let now = self.ctx.now();
        match action {
            LabResultAction::Create {
                order,
                values,
                comments,
            } => {
                engine.require_permission(principal, Permission::CreateLabResults)?;
                let order = load(self.orders.as_ref(), ResourceKind::LabOrder, *order)?;
                engine.require_access(&order, &self.ctx.subject(principal))?;
                if !matches!(
                    order.status,
                    LabOrderStatus::InProgress | LabOrderStatus::Completed
                ) {
                    return Err(CareError::InvalidTransition(format!(
                        "results cannot be recorded for a lab order in status {}",
                        order.status.as_str()
                    )));
                }
                require_values(values)?;

                let result = LabResult {
                    id: RecordId::new(),
                    revision: 0,
                    order: order.id,
                    patient: order.patient.clone(),
                    doctor: order.doctor.clone(),
                    performed_by: principal.user_id,
                    values: values.clone(),
                    comments: comments.clone(),
                    status: LabResultStatus::Preliminary,
                    validated_by: None,
                    validated_at: None,
                    report: None,
                    amendments: Vec::new(),
                    created_at: now,
                    updated_at: now,
                };
                let write = Write::create(result).unless(one_result_per_order_guard(order.id));
                precheck(self.results.as_ref(), &write)?;

                // The order is always rewritten so that its revision orders concurrent creates.
                let mut order = order;
                if order.status == LabOrderStatus::InProgress {
                    order.status = check_transition(order.status, LabOrderStatus::Completed)?;
                    order.completed_at = Some(now);
                }
                order.updated_at = now;

                Ok(LabResultPlan {
                    order: Some(Write::update(order)),
                    result: Plan::new(write, Some(LabResultStatus::Preliminary.as_str())),
                })
            }
            LabResultAction::Edit {
                id,
                values,
                comments,
            } => {
                engine.require_permission(principal, Permission::EditLabResults)?;
                let current = self.load_accessible(principal, *id)?;
                engine.require_modify(&current, &self.ctx.subject(principal))?;

                let mut next = current;
                if let Some(values) = values {
                    require_values(values)?;
                    next.values = values.clone();
                }
                if let Some(comments) = comments {
                    next.comments = Some(comments.clone());
                }
                next.updated_at = now;
                Ok(self.result_only(next))
            }
            LabResultAction::Validate { id, notes } => {
                engine.require_permission(principal, Permission::ValidateLabResults)?;
                let current = self.load_accessible(principal, *id)?;
                let status = check_transition(current.status, LabResultStatus::Final)?;

                let mut next = current;
                next.status = status;
                next.validated_by = Some(principal.user_id);
                next.validated_at = Some(now);
                if let Some(notes) = notes {
                    next.comments = Some(NonEmptyText::append_section(
                        next.comments.as_ref(),
                        "Validation notes",
                        notes,
                    ));
                }
                next.updated_at = now;

                let order = self.advance_order(
                    next.order,
                    LabOrderStatus::Completed,
                    LabOrderStatus::Validated,
                )?;
                Ok(LabResultPlan {
                    order,
                    result: Plan::new(Write::update(next), Some(status.as_str())),
                })
            }
            LabResultAction::UploadReport { id, file_name } => {
                engine.require_permission(principal, Permission::UploadLabReports)?;
                let current = self.load_accessible(principal, *id)?;
                if current.status == LabResultStatus::Preliminary {
                    return Err(CareError::InvalidTransition(
                        "a report can only be attached to a validated lab result".into(),
                    ));
                }

                let mut next = current;
                next.report = Some(LabReport {
                    file_name: file_name.clone(),
                    uploaded_by: principal.user_id,
                    uploaded_at: now,
                });
                next.updated_at = now;

                let order = self.advance_order(
                    next.order,
                    LabOrderStatus::Validated,
                    LabOrderStatus::Reported,
                )?;
                let status = next.status.as_str();
                Ok(LabResultPlan {
                    order,
                    result: Plan::new(Write::update(next), Some(status)),
                })
            }
            LabResultAction::Amend { id, values, reason } => {
                engine.require_permission(principal, Permission::EditLabResults)?;
                let current = self.load_accessible(principal, *id)?;
                let status = check_transition(current.status, LabResultStatus::Amended)?;
                require_values(values)?;

                let mut next = current;
                let previous_values = std::mem::replace(&mut next.values, values.clone());
                next.amendments.push(Amendment {
                    amended_by: principal.user_id,
                    amended_at: now,
                    reason: reason.clone(),
                    previous_values,
                });
                next.status = status;
                next.updated_at = now;
                Ok(self.result_only(next))
            }
        }
    }

    pub fn get(&self, principal: Option<&Principal>, id: RecordId) -> CareResult<LabResult> {
        let principal = require_principal(principal)?;
        self.ctx
            .engine()
            .require_permission(principal, Permission::ViewLabResults)?;
        self.load_accessible(principal, id)
    }

    /// The result recorded for a lab order, if any.
    pub fn for_order(
        &self,
        principal: Option<&Principal>,
        order: RecordId,
    ) -> CareResult<Option<LabResult>> {
        let principal = require_principal(principal)?;
        self.ctx
            .engine()
            .require_permission(principal, Permission::ViewLabResults)?;
        let subject = self.ctx.subject(principal);
        let found = self.results.find(&|r: &LabResult| r.order == order)?;
        match found.into_iter().next() {
            Some(result) => {
                self.ctx.engine().require_access(&result, &subject)?;
                Ok(Some(result))
            }
            None => Ok(None),
        }
    }

    fn load_accessible(&self, principal: &Principal, id: RecordId) -> CareResult<LabResult> {
        let result = load(self.results.as_ref(), ResourceKind::LabResult, id)?;
        self.ctx
            .engine()
            .require_access(&result, &self.ctx.subject(principal))?;
        Ok(result)
    }

    fn result_only(&self, next: LabResult) -> LabResultPlan {
        let status = next.status.as_str();
        LabResultPlan {
            order: None,
            result: Plan::new(Write::update(next), Some(status)),
        }
    }

    /// Moves the order from `from` to `to` if it is currently at `from`.
    fn advance_order(
        &self,
        order: RecordId,
        from: LabOrderStatus,
        to: LabOrderStatus,
    ) -> CareResult<Option<Write<LabOrder>>> {
        let mut order = load(self.orders.as_ref(), ResourceKind::LabOrder, order)?;
        if order.status != from {
            return Ok(None);
        }
        order.status = check_transition(from, to)?;
        order.updated_at = self.ctx.now();
        Ok(Some(Write::update(order)))
    }
}

fn require_values(values: &[TestValue]) -> CareResult<()> {
    if values.is_empty() {
        return Err(CareError::InvalidInput(
            "a lab result needs at least one value".into(),
        ));
    }
    Ok(())
}
