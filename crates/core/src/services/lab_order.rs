//! Laboratory order service.

use crate::access::ResourceKind;
use crate::audit::AuditAction;
use crate::constants::LAB_ORDER_NUMBER_PREFIX;
use crate::decision::Decision;
use crate::lifecycle::lab_order::{
    order_number_guard, LabOrder, LabOrderStatus, LabPriority, LabTest, SpecimenCollection,
    SpecimenReception,
};
use crate::lifecycle::{check_transition, sequence_number, Cancellation, LifecycleStatus};
use crate::principal::{require_principal, Principal};
use crate::reference::Ref;
use crate::services::{load, precheck, CareContext, Plan};
use crate::store::{RecordStore, Write};
use crate::{CareError, CareResult};
use careflow_registry::Permission;
use careflow_types::{NonEmptyText, PatientId, RecordId};
use chrono::Datelike;
use std::sync::Arc;

const VIEW: &[Permission] = &[Permission::ViewAllLabOrders, Permission::ViewLabOrders];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LabOrderAction {
    Create {
        patient: PatientId,
        tests: Vec<LabTest>,
        priority: LabPriority,
        clinical_notes: Option<NonEmptyText>,
    },
    Edit {
        id: RecordId,
        tests: Option<Vec<LabTest>>,
        priority: Option<LabPriority>,
        clinical_notes: Option<NonEmptyText>,
    },
    CollectSpecimen {
        id: RecordId,
        specimen_type: NonEmptyText,
        notes: Option<NonEmptyText>,
    },
    ReceiveSpecimen {
        id: RecordId,
        condition: Option<NonEmptyText>,
    },
    UpdateStatus {
        id: RecordId,
        status: LabOrderStatus,
    },
    Cancel {
        id: RecordId,
        reason: Option<NonEmptyText>,
    },
}

impl LabOrderAction {
    pub fn target(&self) -> Option<RecordId> {
        match self {
            Self::Create { .. } => None,
            Self::Edit { id, .. }
            | Self::CollectSpecimen { id, .. }
            | Self::ReceiveSpecimen { id, .. }
            | Self::UpdateStatus { id, .. }
            | Self::Cancel { id, .. } => Some(*id),
        }
    }

    fn audit_action(&self) -> AuditAction {
        match self {
            Self::Create { .. } => AuditAction::Create,
            Self::Edit { .. } => AuditAction::Update,
            _ => AuditAction::StatusChange,
        }
    }
}

#[derive(Clone)]
pub struct LabOrderService {
    ctx: CareContext,
    store: Arc<dyn RecordStore<LabOrder>>,
}

impl LabOrderService {
    pub fn new(ctx: CareContext, store: Arc<dyn RecordStore<LabOrder>>) -> Self {
        Self { ctx, store }
    }

    pub fn decide(&self, principal: Option<&Principal>, action: &LabOrderAction) -> Decision {
        Decision::from_plan(&self.plan(principal, action), Plan::next_state)
    }

    pub fn apply(
        &self,
        principal: Option<&Principal>,
        action: LabOrderAction,
    ) -> CareResult<LabOrder> {
        self.ctx.audited(
            principal,
            action.audit_action(),
            ResourceKind::LabOrder,
            action.target(),
            || {
                let stored = self.plan(principal, &action)?.execute(self.store.as_ref())?;
                tracing::info!(
                    lab_order = %stored.id,
                    number = %stored.order_number,
                    status = stored.status.as_str(),
                    "lab order written"
                );
                Ok(stored)
            },
        )
    }

    pub fn plan(
        &self,
        principal: Option<&Principal>,
        action: &LabOrderAction,
    ) -> CareResult<Plan<LabOrder>> {
        let principal = require_principal(principal)?;
        let engine = self.ctx.engine();
        match action {
            LabOrderAction::Create {
                patient,
                tests,
                priority,
                clinical_notes,
            } => {
                engine.require_permission(principal, Permission::CreateLabOrders)?;
                self.plan_create(principal, *patient, tests, *priority, clinical_notes)
            }
            LabOrderAction::Edit {
                id,
                tests,
                priority,
                clinical_notes,
            } => {
                engine.require_permission(principal, Permission::EditLabOrders)?;
                let current = load(self.store.as_ref(), ResourceKind::LabOrder, *id)?;
                engine.require_modify(&current, &self.ctx.subject(principal))?;

                let mut next = current;
                if let Some(tests) = tests {
                    require_tests(tests)?;
                    next.tests = tests.clone();
                }
                if let Some(priority) = priority {
                    next.priority = *priority;
                    next.expected_completion = next.created_at + priority.turnaround();
                }
                if let Some(notes) = clinical_notes {
                    next.clinical_notes = Some(notes.clone());
                }
                next.updated_at = self.ctx.now();
                let status = next.status.as_str();
                Ok(Plan::new(Write::update(next), Some(status)))
            }
            LabOrderAction::CollectSpecimen {
                id,
                specimen_type,
                notes,
            } => {
                engine.require_permission(principal, Permission::CollectSpecimens)?;
                let current = self.load_accessible(principal, *id)?;
                let now = self.ctx.now();
                self.transition(current, LabOrderStatus::Collected, |order| {
                    order.specimen = Some(SpecimenCollection {
                        collected_by: principal.user_id,
                        collected_at: now,
                        specimen_type: specimen_type.clone(),
                        notes: notes.clone(),
                    });
                })
            }
            LabOrderAction::ReceiveSpecimen { id, condition } => {
                engine.require_permission(principal, Permission::ReceiveSpecimens)?;
                let current = self.load_accessible(principal, *id)?;
                let now = self.ctx.now();
                self.transition(current, LabOrderStatus::Received, |order| {
                    order.reception = Some(SpecimenReception {
                        received_by: principal.user_id,
                        received_at: now,
                        condition: condition.clone(),
                    });
                })
            }
            LabOrderAction::UpdateStatus { id, status } => {
                engine.require_permission(principal, Permission::UpdateLabOrderStatus)?;
                let current = if *status == LabOrderStatus::Cancelled {
                    engine.require_permission(principal, Permission::CancelLabOrders)?;
                    self.load_cancellable(principal, *id)?
                } else {
                    self.load_accessible(principal, *id)?
                };
                let now = self.ctx.now();
                self.transition(current, *status, |order| {
                    if order.status == LabOrderStatus::Completed {
                        order.completed_at = Some(now);
                    }
                })
            }
            LabOrderAction::Cancel { id, reason } => {
                engine.require_permission(principal, Permission::CancelLabOrders)?;
                let current = self.load_cancellable(principal, *id)?;
                let now = self.ctx.now();
                self.transition(current, LabOrderStatus::Cancelled, |order| {
                    order.cancellation = Some(Cancellation {
                        cancelled_by: principal.user_id,
                        cancelled_at: now,
                        reason: reason.clone(),
                    });
                })
            }
        }
    }

    pub fn get(&self, principal: Option<&Principal>, id: RecordId) -> CareResult<LabOrder> {
        let principal = require_principal(principal)?;
        self.ctx.engine().require_any(principal, VIEW)?;
        self.load_accessible(principal, id)
    }

    pub fn list_visible(&self, principal: Option<&Principal>) -> CareResult<Vec<LabOrder>> {
        self.visible(principal, |_| true)
    }

    /// Open orders past their expected completion time.
    pub fn overdue(&self, principal: Option<&Principal>) -> CareResult<Vec<LabOrder>> {
        let now = self.ctx.now();
        self.visible(principal, |order| order.is_overdue(now))
    }

    fn visible(
        &self,
        principal: Option<&Principal>,
        keep: impl Fn(&LabOrder) -> bool,
    ) -> CareResult<Vec<LabOrder>> {
        let principal = require_principal(principal)?;
        self.ctx.engine().require_any(principal, VIEW)?;
        let subject = self.ctx.subject(principal);
        let engine = self.ctx.engine();
        let mut orders = self
            .store
            .find(&|o: &LabOrder| keep(o) && engine.can_access(o, &subject))?;
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    fn plan_create(
        &self,
        principal: &Principal,
        patient: PatientId,
        tests: &[LabTest],
        priority: LabPriority,
        clinical_notes: &Option<NonEmptyText>,
    ) -> CareResult<Plan<LabOrder>> {
        if !self.ctx.directory().patient_exists(patient) {
            return Err(CareError::InvalidInput(format!(
                "patient {patient} does not exist"
            )));
        }
        require_tests(tests)?;

        let now = self.ctx.now();
        let prefix = format!("{LAB_ORDER_NUMBER_PREFIX}-{}-", now.year());
        let issued = self
            .store
            .find(&|o: &LabOrder| o.order_number.starts_with(&prefix))?
            .len();
        let order_number = sequence_number(LAB_ORDER_NUMBER_PREFIX, now.year(), issued + 1);

        let order = LabOrder {
            id: RecordId::new(),
            revision: 0,
            order_number: order_number.clone(),
            patient: Ref::Id(patient),
            doctor: Ref::Id(principal.user_id),
            tests: tests.to_vec(),
            priority,
            clinical_notes: clinical_notes.clone(),
            status: LabOrderStatus::Ordered,
            specimen: None,
            reception: None,
            cancellation: None,
            expected_completion: now + priority.turnaround(),
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        let write = Write::create(order).unless(order_number_guard(order_number));
        precheck(self.store.as_ref(), &write)?;
        Ok(Plan::new(write, Some(LabOrderStatus::Ordered.as_str())))
    }

    fn load_accessible(&self, principal: &Principal, id: RecordId) -> CareResult<LabOrder> {
        let order = load(self.store.as_ref(), ResourceKind::LabOrder, id)?;
        self.ctx
            .engine()
            .require_access(&order, &self.ctx.subject(principal))?;
        Ok(order)
    }

    fn load_cancellable(&self, principal: &Principal, id: RecordId) -> CareResult<LabOrder> {
        let order = load(self.store.as_ref(), ResourceKind::LabOrder, id)?;
        self.ctx
            .engine()
            .require_cancel(&order, &self.ctx.subject(principal))?;
        Ok(order)
    }

    fn transition(
        &self,
        current: LabOrder,
        to: LabOrderStatus,
        annotate: impl FnOnce(&mut LabOrder),
    ) -> CareResult<Plan<LabOrder>> {
        let status = check_transition(current.status, to)?;
        let mut next = current;
        next.status = status;
        annotate(&mut next);
        next.updated_at = self.ctx.now();
        Ok(Plan::new(Write::update(next), Some(status.as_str())))
    }
}

fn require_tests(tests: &[LabTest]) -> CareResult<()> {
    if tests.is_empty() {
        return Err(CareError::InvalidInput(
            "a lab order needs at least one test".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{text, Fixture};
    use crate::store::InMemoryStore;
    use chrono::Duration;

    fn service(f: &Fixture) -> LabOrderService {
        LabOrderService::new(f.ctx.clone(), Arc::new(InMemoryStore::<LabOrder>::new()))
    }

    fn panel() -> Vec<LabTest> {
        vec![LabTest {
            code: text("CBC"),
            name: text("Complete blood count"),
        }]
    }

    fn ordered(f: &Fixture, svc: &LabOrderService) -> LabOrder {
        svc.apply(
            Some(&f.doctor),
            LabOrderAction::Create {
                patient: f.patient_id,
                tests: panel(),
                priority: LabPriority::Urgent,
                clinical_notes: None,
            },
        )
        .expect("order created")
    }

    fn advance(f: &Fixture, svc: &LabOrderService, id: RecordId, to: &[LabOrderStatus]) {
        for status in to {
            svc.apply(
                Some(&f.lab_tech),
                LabOrderAction::UpdateStatus {
                    id,
                    status: *status,
                },
            )
            .expect("advance");
        }
    }

    #[test]
    fn test_create_numbers_orders_sequentially() {
        let f = Fixture::new();
        let svc = service(&f);
        let first = ordered(&f, &svc);
        let second = ordered(&f, &svc);

        assert_eq!(first.order_number, "LAB-2026-000001");
        assert_eq!(second.order_number, "LAB-2026-000002");
        assert_eq!(first.status, LabOrderStatus::Ordered);
        assert_eq!(
            first.expected_completion,
            first.created_at + Duration::hours(24)
        );
        assert!(first.doctor.is(f.doctor.user_id));
    }

    #[test]
    fn test_create_requires_permission_and_tests() {
        let f = Fixture::new();
        let svc = service(&f);
        let create = |tests: Vec<LabTest>| LabOrderAction::Create {
            patient: f.patient_id,
            tests,
            priority: LabPriority::Routine,
            clinical_notes: None,
        };

        assert!(matches!(
            svc.apply(Some(&f.nurse), create(panel())),
            Err(CareError::PermissionDenied {
                permission: "create_lab_orders"
            })
        ));
        assert!(matches!(
            svc.apply(Some(&f.doctor), create(Vec::new())),
            Err(CareError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_specimen_workflow_records_details() {
        let f = Fixture::new();
        let svc = service(&f);
        let order = ordered(&f, &svc);

        let collect = LabOrderAction::CollectSpecimen {
            id: order.id,
            specimen_type: text("Venous blood"),
            notes: None,
        };
        let collected = svc
            .apply(Some(&f.lab_tech), collect)
            .expect("collected");
        assert_eq!(collected.status, LabOrderStatus::Collected);
        assert_eq!(
            collected.specimen.as_ref().map(|s| s.collected_by),
            Some(f.lab_tech.user_id)
        );

        // The ordering doctor may see the order but not receive specimens.
        let receive = LabOrderAction::ReceiveSpecimen {
            id: order.id,
            condition: Some(text("Adequate")),
        };
        assert!(matches!(
            svc.apply(Some(&f.doctor), receive.clone()),
            Err(CareError::PermissionDenied { .. })
        ));
        let received = svc.apply(Some(&f.lab_tech), receive).expect("received");
        assert_eq!(received.status, LabOrderStatus::Received);
        assert!(received.reception.is_some());
    }

    #[test]
    fn test_transitions_outside_table_are_rejected() {
        let f = Fixture::new();
        let svc = service(&f);
        let order = ordered(&f, &svc);

        let skip = LabOrderAction::UpdateStatus {
            id: order.id,
            status: LabOrderStatus::InProgress,
        };
        assert!(matches!(
            svc.apply(Some(&f.lab_tech), skip),
            Err(CareError::InvalidTransition(msg)) if msg == "lab_order cannot move from ordered to in_progress"
        ));
    }

    #[test]
    fn test_reported_order_rejects_test_list_update() {
        let f = Fixture::new();
        let svc = service(&f);
        let order = ordered(&f, &svc);
        use crate::lifecycle::lab_order::LabOrderStatus::*;
        advance(
            &f,
            &svc,
            order.id,
            &[Collected, Received, InProgress, Completed, Validated, Reported],
        );

        let edit = LabOrderAction::Edit {
            id: order.id,
            tests: Some(panel()),
            priority: None,
            clinical_notes: None,
        };
        for who in [&f.doctor, &f.admin] {
            assert!(matches!(
                svc.apply(Some(who), edit.clone()),
                Err(CareError::InvalidTransition(_))
            ));
        }
    }

    #[test]
    fn test_admin_overrides_content_lock_before_terminal_status() {
        let f = Fixture::new();
        let svc = service(&f);
        let order = ordered(&f, &svc);
        use crate::lifecycle::lab_order::LabOrderStatus::*;
        advance(&f, &svc, order.id, &[Collected, Received, InProgress]);

        let edit = LabOrderAction::Edit {
            id: order.id,
            tests: None,
            priority: Some(LabPriority::Stat),
            clinical_notes: None,
        };
        assert!(matches!(
            svc.apply(Some(&f.doctor), edit.clone()),
            Err(CareError::InvalidTransition(_))
        ));
        let edited = svc.apply(Some(&f.admin), edit).expect("admin override");
        assert_eq!(edited.priority, LabPriority::Stat);
        assert_eq!(edited.expected_completion, edited.created_at + Duration::hours(2));
    }

    #[test]
    fn test_edit_and_cancel_on_open_order() {
        let f = Fixture::new();
        let svc = service(&f);
        let order = ordered(&f, &svc);

        let edited = svc
            .apply(
                Some(&f.doctor),
                LabOrderAction::Edit {
                    id: order.id,
                    tests: None,
                    priority: None,
                    clinical_notes: Some(text("Fasting sample")),
                },
            )
            .expect("edit");
        assert_eq!(edited.revision, 2);

        let cancelled = svc
            .apply(
                Some(&f.doctor),
                LabOrderAction::Cancel {
                    id: order.id,
                    reason: Some(text("Duplicate order")),
                },
            )
            .expect("cancel");
        assert_eq!(cancelled.status, LabOrderStatus::Cancelled);
        assert_eq!(
            cancelled.cancellation.as_ref().map(|c| c.cancelled_by),
            Some(f.doctor.user_id)
        );
        assert!(matches!(
            svc.apply(
                Some(&f.doctor),
                LabOrderAction::Cancel {
                    id: order.id,
                    reason: None
                }
            ),
            Err(CareError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_cancel_through_status_update_needs_cancel_permission() {
        let f = Fixture::new();
        let svc = service(&f);
        let order = ordered(&f, &svc);
        let action = LabOrderAction::UpdateStatus {
            id: order.id,
            status: LabOrderStatus::Cancelled,
        };
        assert!(matches!(
            svc.apply(Some(&f.lab_tech), action),
            Err(CareError::PermissionDenied {
                permission: "cancel_lab_orders"
            })
        ));
    }

    #[test]
    fn test_visibility_and_overdue() {
        let f = Fixture::new();
        let svc = service(&f);
        let order = ordered(&f, &svc);

        assert!(svc.get(Some(&f.lab_tech), order.id).is_ok());
        assert!(matches!(
            svc.get(Some(&f.nurse), order.id),
            Err(CareError::ResourceAccessDenied { .. })
        ));
        assert!(matches!(
            svc.get(Some(&f.other_doctor), order.id),
            Err(CareError::ResourceAccessDenied { .. })
        ));

        assert!(svc.overdue(Some(&f.lab_tech)).expect("overdue").is_empty());
        f.clock.advance(Duration::hours(25));
        let late = svc.overdue(Some(&f.lab_tech)).expect("overdue");
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].id, order.id);
    }

    #[test]
    fn test_decide_reports_next_state() {
        let f = Fixture::new();
        let svc = service(&f);
        let order = ordered(&f, &svc);
        let decision = svc.decide(
            Some(&f.lab_tech),
            &LabOrderAction::CollectSpecimen {
                id: order.id,
                specimen_type: text("Urine"),
                notes: None,
            },
        );
        assert!(decision.allowed);
        assert_eq!(decision.next_state.as_deref(), Some("collected"));
        assert_eq!(
            svc.get(Some(&f.doctor), order.id).expect("get").status,
            LabOrderStatus::Ordered
        );
    }

    #[test]
    fn test_nurse_outside_the_order_cannot_collect() {
        let f = Fixture::new();
        let svc = service(&f);
        let order = ordered(&f, &svc);
        let collect = LabOrderAction::CollectSpecimen {
            id: order.id,
            specimen_type: text("Venous blood"),
            notes: None,
        };

        assert!(matches!(
            svc.apply(Some(&f.nurse), collect.clone()),
            Err(CareError::ResourceAccessDenied {
                kind: ResourceKind::LabOrder
            })
        ));
        assert!(!svc.decide(Some(&f.nurse), &collect).allowed);
        assert!(svc
            .list_visible(Some(&f.nurse))
            .expect("list")
            .is_empty());
        assert_eq!(
            svc.get(Some(&f.doctor), order.id).expect("get").status,
            LabOrderStatus::Ordered
        );
    }

    #[test]
    fn test_engine_modify_and_cancel_rules_follow_status() {
        let f = Fixture::new();
        let svc = service(&f);
        let order = ordered(&f, &svc);
        let engine = f.ctx.engine();
        let doctor = f.ctx.subject(&f.doctor);
        let admin = f.ctx.subject(&f.admin);
        let stranger = f.ctx.subject(&f.other_doctor);
        use crate::lifecycle::lab_order::LabOrderStatus::*;

        let open = svc.get(Some(&f.doctor), order.id).expect("get");
        assert!(engine.can_modify(&open, &doctor));
        assert!(engine.can_cancel(&open, &doctor));
        assert!(!engine.can_modify(&open, &stranger));
        assert!(!engine.can_cancel(&open, &stranger));

        advance(&f, &svc, order.id, &[Collected, Received, InProgress]);
        let running = svc.get(Some(&f.doctor), order.id).expect("get");
        assert!(!engine.can_modify(&running, &doctor));
        assert!(engine.can_modify(&running, &admin));
        assert!(engine.can_cancel(&running, &doctor));

        advance(&f, &svc, order.id, &[Completed]);
        let completed = svc.get(Some(&f.doctor), order.id).expect("get");
        assert!(!engine.can_cancel(&completed, &doctor));
        assert!(!engine.can_cancel(&completed, &admin));
        assert!(matches!(
            svc.apply(
                Some(&f.admin),
                LabOrderAction::Cancel {
                    id: order.id,
                    reason: None
                }
            ),
            Err(CareError::InvalidTransition(msg)) if msg == "lab_order in status completed cannot be cancelled"
        ));

        advance(&f, &svc, order.id, &[Validated, Reported]);
        let reported = svc.get(Some(&f.doctor), order.id).expect("get");
        assert!(!engine.can_modify(&reported, &admin));
        assert!(matches!(
            engine.require_modify(&reported, &stranger),
            Err(CareError::ResourceAccessDenied { .. })
        ));
        assert!(matches!(
            engine.require_modify(&reported, &admin),
            Err(CareError::InvalidTransition(msg)) if msg == "lab_order in status reported can no longer be modified"
        ));
    }
}
