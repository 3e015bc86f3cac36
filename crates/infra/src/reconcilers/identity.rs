//! Identity service: provisions and retires accounts from HR lifecycle events.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use async_trait::async_trait;
use tessera_auth::Role;
use tessera_core::{AccountId, EmployeeId};
use tessera_events::contracts::{
    EmployeeCreated, EmployeeExited, EmployeeResignationApproved, EmployeeTerminated, UserDeactivated,
    UserProvisioned, UserResigned, UserTerminated,
};
use tessera_events::{EventHandler, EventKind, EventPublisher, HandlerError, IntegrationEvent};

use super::{Announcements, Announcing, announce};
use crate::read_model::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    Active,
    /// Employee left; sign-in refused, record kept.
    Locked,
    /// Account deleted after termination or resignation. Kept as a tombstone
    /// so a redelivered event cannot recreate or re-announce it.
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub employee_id: EmployeeId,
    pub email: String,
    pub full_name: String,
    pub roles: Vec<String>,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    announcements: Announcements,
}

impl Announcing for Account {
    fn announcements(&self) -> &Announcements {
        &self.announcements
    }

    fn announcements_mut(&mut self) -> &mut Announcements {
        &mut self.announcements
    }
}

/// Accounts are keyed by normalized (trimmed, lowercase) email.
pub fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

pub struct IdentityReconciler<S, P: ?Sized> {
    accounts: S,
    publisher: Arc<P>,
}

impl<S, P> IdentityReconciler<S, P>
where
    S: RecordStore<String, Account>,
    P: EventPublisher + ?Sized,
{
    pub fn new(accounts: S, publisher: Arc<P>) -> Self {
        Self { accounts, publisher }
    }

    pub fn account_by_email(&self, email: &str) -> Option<Account> {
        self.accounts.get(&email_key(email))
    }

    pub fn account_by_employee(&self, employee_id: &EmployeeId) -> Option<Account> {
        self.accounts
            .find(|account| &account.employee_id == employee_id)
            .map(|(_, account)| account)
    }

    async fn on_employee_created(&self, event: &EmployeeCreated) -> Result<(), HandlerError> {
        let key = email_key(&event.work_email);
        if key.is_empty() {
            warn!(employee_id = %event.employee_id, "employee has no work email; not provisioning");
            return Ok(());
        }

        let created = self.accounts.modify(key.clone(), |slot| {
            if slot.is_some() {
                return None;
            }
            let account = new_account(event, Utc::now());
            let id = account.id.clone();
            *slot = Some(account);
            Some(id)
        });

        match created {
            Some(id) => info!(account_id = %id, employee_id = %event.employee_id, "account provisioned"),
            None => debug!(email = %key, "account already exists; skipping provisioning"),
        }
        Ok(announce(self.publisher.as_ref(), &self.accounts, &key, EventKind::UserProvisioned).await?)
    }

    async fn on_employee_exited(&self, event: &EmployeeExited) -> Result<(), HandlerError> {
        let Some(key) = self.locate(event.user_id.as_ref(), &event.employee_id) else {
            warn!(employee_id = %event.employee_id, "no account for exited employee");
            return Ok(());
        };

        self.accounts.modify(key.clone(), |slot| {
            let Some(account) = slot.as_mut() else { return };
            if account.status != AccountStatus::Active {
                return;
            }
            account.status = AccountStatus::Locked;
            account.announcements.record(
                UserDeactivated {
                    user_id: account.id.clone(),
                    employee_id: event.employee_id.clone(),
                    deactivated_at: Utc::now(),
                    reason: event.reason.clone(),
                }
                .into(),
            );
            info!(account_id = %account.id, employee_id = %event.employee_id, "account locked");
        });
        Ok(announce(self.publisher.as_ref(), &self.accounts, &key, EventKind::UserDeactivated).await?)
    }

    async fn on_employee_terminated(&self, event: &EmployeeTerminated) -> Result<(), HandlerError> {
        let Some(key) = self.locate(event.user_id.as_ref(), &event.employee_id) else {
            warn!(employee_id = %event.employee_id, "no account for terminated employee");
            return Ok(());
        };

        self.remove(&key, |account| {
            UserTerminated {
                user_id: account.id.clone(),
                employee_id: event.employee_id.clone(),
                terminated_at: Utc::now(),
                reason: event.reason.clone(),
            }
            .into()
        });
        Ok(announce(self.publisher.as_ref(), &self.accounts, &key, EventKind::UserTerminated).await?)
    }

    async fn on_resignation_approved(&self, event: &EmployeeResignationApproved) -> Result<(), HandlerError> {
        let Some(key) = self.locate(event.user_id.as_ref(), &event.employee_id) else {
            warn!(employee_id = %event.employee_id, "no account for resigning employee");
            return Ok(());
        };

        self.remove(&key, |account| {
            UserResigned {
                user_id: account.id.clone(),
                employee_id: event.employee_id.clone(),
                resignation_request_id: event.resignation_request_id.clone(),
                resigned_at: Utc::now(),
            }
            .into()
        });
        Ok(announce(self.publisher.as_ref(), &self.accounts, &key, EventKind::UserResigned).await?)
    }

    /// Tombstone the account and record its removal event, once.
    fn remove<F>(&self, key: &str, removal: F)
    where
        F: FnOnce(&Account) -> IntegrationEvent,
    {
        self.accounts.modify(key.to_owned(), |slot| {
            let Some(account) = slot.as_mut() else { return };
            if account.status == AccountStatus::Removed {
                return;
            }
            let event = removal(account);
            account.status = AccountStatus::Removed;
            account.announcements.record(event);
            info!(account_id = %account.id, employee_id = %account.employee_id, "account removed");
        });
    }

    /// By account id when the event carries one, else by employee id.
    fn locate(&self, user_id: Option<&AccountId>, employee_id: &EmployeeId) -> Option<String> {
        user_id
            .and_then(|id| self.accounts.find(|account| &account.id == id))
            .or_else(|| self.accounts.find(|account| &account.employee_id == employee_id))
            .map(|(key, _)| key)
    }
}

fn new_account(event: &EmployeeCreated, now: DateTime<Utc>) -> Account {
    let id = AccountId::generate();
    let email = event.work_email.trim().to_owned();
    let roles = vec![Role::employee().as_str().to_owned()];

    let mut announcements = Announcements::default();
    announcements.record(
        UserProvisioned {
            user_id: id.clone(),
            employee_id: event.employee_id.clone(),
            work_email: email.clone(),
            full_name: event.full_name.clone(),
            roles: roles.clone(),
            provisioned_at: now,
        }
        .into(),
    );

    Account {
        id,
        employee_id: event.employee_id.clone(),
        email,
        full_name: event.full_name.clone(),
        roles,
        status: AccountStatus::Active,
        created_at: now,
        announcements,
    }
}

#[async_trait]
impl<S, P> EventHandler for IdentityReconciler<S, P>
where
    S: RecordStore<String, Account>,
    P: EventPublisher + ?Sized,
{
    fn name(&self) -> &'static str {
        "identity"
    }

    async fn handle(&self, event: &IntegrationEvent) -> Result<(), HandlerError> {
        match event {
            IntegrationEvent::EmployeeCreated(e) => self.on_employee_created(e).await,
            IntegrationEvent::EmployeeExited(e) => self.on_employee_exited(e).await,
            IntegrationEvent::EmployeeTerminated(e) => self.on_employee_terminated(e).await,
            IntegrationEvent::EmployeeResignationApproved(e) => self.on_resignation_approved(e).await,
            other => {
                debug!(event_kind = %other.kind(), "ignored by identity");
                Ok(())
            }
        }
    }
}
