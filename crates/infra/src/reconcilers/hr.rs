//! HR service: owns employee records, starts the lifecycle choreography, and
//! links employees to the accounts identity provisions for them.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info, warn};

use async_trait::async_trait;
use tessera_core::{AccountId, DepartmentId, DomainError, EmployeeId, ResignationRequestId};
use tessera_events::contracts::{
    BonusLine, CompensationBonusesIssued, CompensationDeductionsIssued, CompensationProvisioned, DeductionLine,
    EmployeeCreated, EmployeeExited, EmployeeResignationApproved, EmployeeTerminated, UserProvisioned,
};
use tessera_events::{EventHandler, EventKind, EventPublisher, HandlerError, IntegrationEvent, PublishError};

use super::{Announcements, Announcing, announce};
use crate::read_model::RecordStore;

/// Currency compensation is provisioned in.
pub const COMPENSATION_CURRENCY: &str = "USD";

#[derive(Debug, Error)]
pub enum HrError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmploymentStatus {
    Active,
    Exited,
    Terminated,
    Resigned,
}

/// Input to [`HrReconciler::hire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHire {
    pub employee_id: EmployeeId,
    pub full_name: String,
    pub work_email: String,
    pub personal_email: Option<String>,
    pub phone_number: Option<String>,
    pub position: String,
    pub department_id: DepartmentId,
    pub department_name: String,
    pub hire_date: NaiveDate,
    pub salary: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmployeeRecord {
    pub id: EmployeeId,
    pub full_name: String,
    pub work_email: String,
    pub personal_email: Option<String>,
    pub phone_number: Option<String>,
    pub position: String,
    pub department_id: DepartmentId,
    pub department_name: String,
    pub hire_date: NaiveDate,
    pub salary: Decimal,
    pub status: EmploymentStatus,
    /// Identity account, once `auth.user.provisioned` has been seen.
    pub account_id: Option<AccountId>,
    announcements: Announcements,
}

impl Announcing for EmployeeRecord {
    fn announcements(&self) -> &Announcements {
        &self.announcements
    }

    fn announcements_mut(&mut self) -> &mut Announcements {
        &mut self.announcements
    }
}

impl EmployeeRecord {
    fn compensation(&self, now: DateTime<Utc>) -> CompensationProvisioned {
        CompensationProvisioned {
            employee_id: self.id.clone(),
            full_name: self.full_name.clone(),
            work_email: self.work_email.clone(),
            phone_number: self.phone_number.clone(),
            position: self.position.clone(),
            department_id: self.department_id.clone(),
            department_name: self.department_name.clone(),
            base_salary: self.salary,
            currency: COMPENSATION_CURRENCY.to_owned(),
            effective_from: now,
        }
    }
}

enum Link {
    Linked,
    AlreadyLinked,
    LinkedElsewhere(AccountId),
    UnknownEmployee,
}

pub struct HrReconciler<S, P: ?Sized> {
    employees: S,
    publisher: Arc<P>,
}

impl<S, P> HrReconciler<S, P>
where
    S: RecordStore<EmployeeId, EmployeeRecord>,
    P: EventPublisher + ?Sized,
{
    pub fn new(employees: S, publisher: Arc<P>) -> Self {
        Self { employees, publisher }
    }

    pub fn employee(&self, id: &EmployeeId) -> Option<EmployeeRecord> {
        self.employees.get(id)
    }

    /// Record a new employee and announce `hr.employee.created`.
    ///
    /// The record is kept even when the announcement cannot be published; it
    /// stays pending until [`HrReconciler::publish_pending`] succeeds.
    pub async fn hire(&self, hire: NewHire) -> Result<EmployeeRecord, DomainError> {
        if hire.full_name.trim().is_empty() {
            return Err(DomainError::validation("full name is required"));
        }
        if hire.work_email.trim().is_empty() {
            return Err(DomainError::validation("work email is required"));
        }
        if hire.salary.is_sign_negative() {
            return Err(DomainError::validation("salary must not be negative"));
        }

        let id = hire.employee_id.clone();
        let record = self.employees.modify(id.clone(), |slot| {
            if slot.is_some() {
                return Err(DomainError::conflict(format!("employee {id} already exists")));
            }
            let record = new_record(hire);
            *slot = Some(record.clone());
            Ok(record)
        })?;
        info!(employee_id = %id, "employee hired");

        if announce(self.publisher.as_ref(), &self.employees, &id, EventKind::EmployeeCreated)
            .await
            .is_err()
        {
            warn!(employee_id = %id, "employee kept; creation announcement pending");
        }
        Ok(record)
    }

    /// Retry every pending HR announcement. Returns how many were published.
    pub async fn publish_pending(&self) -> Result<usize, PublishError> {
        const KINDS: [EventKind; 5] = [
            EventKind::EmployeeCreated,
            EventKind::EmployeeExited,
            EventKind::EmployeeTerminated,
            EventKind::EmployeeResignationApproved,
            EventKind::CompensationProvisioned,
        ];

        let mut published = 0;
        for record in self.employees.list() {
            for kind in KINDS {
                if record.announcements.pending(kind).is_some() {
                    announce(self.publisher.as_ref(), &self.employees, &record.id, kind).await?;
                    published += 1;
                }
            }
        }
        Ok(published)
    }

    pub async fn record_exit(
        &self,
        employee_id: &EmployeeId,
        exit_status: impl Into<String>,
        reason: Option<String>,
        eligible_for_rehire: Option<bool>,
    ) -> Result<(), HrError> {
        let exit_status = exit_status.into();
        self.leave(employee_id, EmploymentStatus::Exited, |record| {
            EmployeeExited {
                employee_id: record.id.clone(),
                user_id: record.account_id.clone(),
                exit_date: Utc::now(),
                reason,
                eligible_for_rehire,
                exit_status,
            }
            .into()
        })?;
        Ok(announce(self.publisher.as_ref(), &self.employees, employee_id, EventKind::EmployeeExited).await?)
    }

    pub async fn terminate(
        &self,
        employee_id: &EmployeeId,
        reason: Option<String>,
        eligible_for_rehire: bool,
    ) -> Result<(), HrError> {
        self.leave(employee_id, EmploymentStatus::Terminated, |record| {
            EmployeeTerminated {
                employee_id: record.id.clone(),
                user_id: record.account_id.clone(),
                terminated_at: Utc::now(),
                reason,
                eligible_for_rehire,
            }
            .into()
        })?;
        Ok(announce(self.publisher.as_ref(), &self.employees, employee_id, EventKind::EmployeeTerminated).await?)
    }

    pub async fn approve_resignation(
        &self,
        employee_id: &EmployeeId,
        request_id: ResignationRequestId,
        effective_date: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<(), HrError> {
        self.leave(employee_id, EmploymentStatus::Resigned, |record| {
            EmployeeResignationApproved {
                resignation_request_id: request_id,
                employee_id: record.id.clone(),
                user_id: record.account_id.clone(),
                effective_date,
                reason,
                approved_at: Utc::now(),
            }
            .into()
        })?;
        Ok(announce(
            self.publisher.as_ref(),
            &self.employees,
            employee_id,
            EventKind::EmployeeResignationApproved,
        )
        .await?)
    }

    /// Publish bonuses for an employee. Nothing is stored locally, so a
    /// publish failure is returned to the caller.
    pub async fn issue_bonuses(
        &self,
        employee_id: &EmployeeId,
        bonuses: Vec<BonusLine>,
        issued_by: Option<String>,
    ) -> Result<(), HrError> {
        let record = self.require(employee_id)?;
        let event = CompensationBonusesIssued {
            employee_id: record.id,
            employee_name: record.full_name,
            bonuses,
            issued_at: Utc::now(),
            issued_by,
        };
        Ok(self.publisher.publish(&event.into()).await?)
    }

    pub async fn issue_deductions(
        &self,
        employee_id: &EmployeeId,
        deductions: Vec<DeductionLine>,
        issued_by: Option<String>,
    ) -> Result<(), HrError> {
        let record = self.require(employee_id)?;
        let event = CompensationDeductionsIssued {
            employee_id: record.id,
            employee_name: record.full_name,
            deductions,
            issued_at: Utc::now(),
            issued_by,
        };
        Ok(self.publisher.publish(&event.into()).await?)
    }

    fn require(&self, employee_id: &EmployeeId) -> Result<EmployeeRecord, DomainError> {
        self.employees
            .get(employee_id)
            .ok_or_else(|| DomainError::not_found(format!("employee {employee_id}")))
    }

    /// Move an active employee to `status`, recording the departure event.
    /// Repeating the same departure is a no-op.
    fn leave<F>(&self, employee_id: &EmployeeId, status: EmploymentStatus, departure: F) -> Result<(), DomainError>
    where
        F: FnOnce(&EmployeeRecord) -> IntegrationEvent,
    {
        self.employees.modify(employee_id.clone(), |slot| {
            let Some(record) = slot.as_mut() else {
                return Err(DomainError::not_found(format!("employee {employee_id}")));
            };
            if record.status == status {
                return Ok(());
            }
            if record.status != EmploymentStatus::Active {
                return Err(DomainError::conflict(format!(
                    "employee {employee_id} is no longer active ({:?})",
                    record.status
                )));
            }
            let event = departure(record);
            record.status = status;
            record.announcements.record(event);
            info!(employee_id = %employee_id, ?status, "employee left");
            Ok(())
        })
    }

    async fn on_user_provisioned(&self, event: &UserProvisioned) -> Result<(), HandlerError> {
        let link = self.employees.modify(event.employee_id.clone(), |slot| {
            let Some(record) = slot.as_mut() else {
                return Link::UnknownEmployee;
            };
            match &record.account_id {
                Some(existing) if *existing == event.user_id => Link::AlreadyLinked,
                Some(existing) => Link::LinkedElsewhere(existing.clone()),
                None => {
                    record.account_id = Some(event.user_id.clone());
                    let compensation = record.compensation(Utc::now());
                    record.announcements.record(compensation.into());
                    Link::Linked
                }
            }
        });

        match link {
            Link::Linked => {
                info!(employee_id = %event.employee_id, account_id = %event.user_id, "employee linked to account");
            }
            Link::AlreadyLinked => {
                debug!(employee_id = %event.employee_id, "employee already linked");
            }
            Link::LinkedElsewhere(existing) => {
                warn!(
                    employee_id = %event.employee_id,
                    account_id = %event.user_id,
                    linked_account_id = %existing,
                    "employee already linked to another account; ignoring"
                );
                return Ok(());
            }
            Link::UnknownEmployee => {
                warn!(employee_id = %event.employee_id, "no employee record for provisioned account");
                return Ok(());
            }
        }

        Ok(announce(
            self.publisher.as_ref(),
            &self.employees,
            &event.employee_id,
            EventKind::CompensationProvisioned,
        )
        .await?)
    }
}

fn new_record(hire: NewHire) -> EmployeeRecord {
    let mut announcements = Announcements::default();
    announcements.record(
        EmployeeCreated {
            employee_id: hire.employee_id.clone(),
            full_name: hire.full_name.clone(),
            work_email: hire.work_email.clone(),
            personal_email: hire.personal_email.clone(),
            position: hire.position.clone(),
            department_id: hire.department_id.clone(),
            department_name: hire.department_name.clone(),
            hire_date: hire.hire_date,
        }
        .into(),
    );

    EmployeeRecord {
        id: hire.employee_id,
        full_name: hire.full_name,
        work_email: hire.work_email,
        personal_email: hire.personal_email,
        phone_number: hire.phone_number,
        position: hire.position,
        department_id: hire.department_id,
        department_name: hire.department_name,
        hire_date: hire.hire_date,
        salary: hire.salary,
        status: EmploymentStatus::Active,
        account_id: None,
        announcements,
    }
}

#[async_trait]
impl<S, P> EventHandler for HrReconciler<S, P>
where
    S: RecordStore<EmployeeId, EmployeeRecord>,
    P: EventPublisher + ?Sized,
{
    fn name(&self) -> &'static str {
        "hr"
    }

    async fn handle(&self, event: &IntegrationEvent) -> Result<(), HandlerError> {
        match event {
            IntegrationEvent::UserProvisioned(e) => self.on_user_provisioned(e).await,
            other => {
                debug!(event_kind = %other.kind(), "ignored by hr");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryRecordStore;
    use tessera_events::{InMemoryBroker, RoutingTable};

    type Reconciler = HrReconciler<Arc<InMemoryRecordStore<EmployeeId, EmployeeRecord>>, InMemoryBroker>;

    fn setup() -> (Reconciler, Arc<InMemoryBroker>) {
        let broker = Arc::new(InMemoryBroker::new(RoutingTable::defaults()));
        (HrReconciler::new(Arc::new(InMemoryRecordStore::new()), broker.clone()), broker)
    }

    fn ada() -> NewHire {
        NewHire {
            employee_id: EmployeeId::parse("E1").unwrap(),
            full_name: "Ada Lovelace".into(),
            work_email: "ada@x".into(),
            personal_email: None,
            phone_number: Some("+44 20 0000".into()),
            position: "Engineer".into(),
            department_id: DepartmentId::parse("D1").unwrap(),
            department_name: "R&D".into(),
            hire_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            salary: Decimal::new(8_500_000, 2),
        }
    }

    fn provisioned(user: &str) -> IntegrationEvent {
        UserProvisioned {
            user_id: AccountId::parse(user).unwrap(),
            employee_id: EmployeeId::parse("E1").unwrap(),
            work_email: "ada@x".into(),
            full_name: "Ada Lovelace".into(),
            roles: vec!["Employee".into()],
            provisioned_at: Utc::now(),
        }
        .into()
    }

    #[tokio::test]
    async fn hire_announces_employee_created() {
        let (hr, broker) = setup();
        hr.hire(ada()).await.unwrap();

        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].routing_key().as_str(), "hr.employee.created");
    }

    #[tokio::test]
    async fn duplicate_hire_is_a_conflict() {
        let (hr, _broker) = setup();
        hr.hire(ada()).await.unwrap();
        assert!(matches!(hr.hire(ada()).await, Err(DomainError::Conflict(_))));
    }

    #[tokio::test]
    async fn hire_survives_a_broker_outage_and_publishes_later() {
        let (hr, broker) = setup();
        broker.set_available(false);
        hr.hire(ada()).await.unwrap();
        assert!(hr.employee(&EmployeeId::parse("E1").unwrap()).is_some());
        assert!(broker.published().is_empty());

        broker.set_available(true);
        assert_eq!(hr.publish_pending().await.unwrap(), 1);
        assert_eq!(hr.publish_pending().await.unwrap(), 0);
        assert_eq!(broker.published().len(), 1);
    }

    #[tokio::test]
    async fn provisioning_links_once_and_hands_salary_to_finance() {
        let (hr, broker) = setup();
        hr.hire(ada()).await.unwrap();

        hr.handle(&provisioned("u-1")).await.unwrap();
        hr.handle(&provisioned("u-1")).await.unwrap();

        let compensation: Vec<_> = broker
            .published_events()
            .into_iter()
            .filter_map(|event| match event {
                IntegrationEvent::CompensationProvisioned(c) => Some(c),
                _ => None,
            })
            .collect();
        assert_eq!(compensation.len(), 1);
        assert_eq!(compensation[0].currency, "USD");
        assert_eq!(compensation[0].base_salary, Decimal::new(8_500_000, 2));

        let record = hr.employee(&EmployeeId::parse("E1").unwrap()).unwrap();
        assert_eq!(record.account_id.unwrap().as_str(), "u-1");
    }

    #[tokio::test]
    async fn a_second_account_for_the_same_employee_is_ignored() {
        let (hr, broker) = setup();
        hr.hire(ada()).await.unwrap();
        hr.handle(&provisioned("u-1")).await.unwrap();
        hr.handle(&provisioned("u-2")).await.unwrap();

        assert_eq!(broker.published().len(), 2);
        let record = hr.employee(&EmployeeId::parse("E1").unwrap()).unwrap();
        assert_eq!(record.account_id.unwrap().as_str(), "u-1");
    }

    #[tokio::test]
    async fn provisioning_for_an_unknown_employee_is_acknowledged() {
        let (hr, broker) = setup();
        hr.handle(&provisioned("u-1")).await.unwrap();
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn termination_carries_the_linked_account_and_is_not_repeated() {
        let (hr, broker) = setup();
        let id = EmployeeId::parse("E1").unwrap();
        hr.hire(ada()).await.unwrap();
        hr.handle(&provisioned("u-1")).await.unwrap();

        hr.terminate(&id, Some("policy".into()), false).await.unwrap();
        hr.terminate(&id, Some("policy".into()), false).await.unwrap();

        let terminations: Vec<_> = broker
            .published_events()
            .into_iter()
            .filter_map(|event| match event {
                IntegrationEvent::EmployeeTerminated(t) => Some(t),
                _ => None,
            })
            .collect();
        assert_eq!(terminations.len(), 1);
        assert_eq!(terminations[0].user_id.as_ref().map(AccountId::as_str), Some("u-1"));

        let resign = hr
            .approve_resignation(&id, ResignationRequestId::parse("R1").unwrap(), Utc::now(), None)
            .await;
        assert!(matches!(resign, Err(HrError::Domain(DomainError::Conflict(_)))));
    }

    #[tokio::test]
    async fn bonuses_for_unknown_employees_are_refused() {
        let (hr, broker) = setup();
        let result = hr.issue_bonuses(&EmployeeId::parse("E9").unwrap(), Vec::new(), None).await;
        assert!(matches!(result, Err(HrError::Domain(DomainError::NotFound(_)))));
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn deductions_are_published_for_known_employees() {
        let (hr, broker) = setup();
        hr.hire(ada()).await.unwrap();

        let line = DeductionLine {
            deduction_type: "Advance".into(),
            amount: Decimal::new(25_000, 2),
            applied_on: Utc::now(),
            period: Some("2025-03".into()),
            reference: Some("ADV-7".into()),
            applied_by: None,
            notes: None,
            source_system: None,
            is_recurring: false,
        };
        hr.issue_deductions(&EmployeeId::parse("E1").unwrap(), vec![line], Some("payroll".into()))
            .await
            .unwrap();

        let events = broker.published_events();
        let IntegrationEvent::CompensationDeductionsIssued(issued) = &events[1] else {
            panic!("expected finance.compensation.deductions, got {:?}", events[1]);
        };
        assert_eq!(issued.employee_name, "Ada Lovelace");
        assert_eq!(issued.deductions.len(), 1);
        assert_eq!(issued.issued_by.as_deref(), Some("payroll"));
    }
}
