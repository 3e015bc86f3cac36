//! User-management service: mirrors identity accounts into the directory.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use async_trait::async_trait;
use tessera_auth::Role;
use tessera_core::{AccountId, EmployeeId};
use tessera_events::contracts::{UserDeactivated, UserProvisioned, UserResigned, UserTerminated};
use tessera_events::{EventHandler, HandlerError, IntegrationEvent};

use crate::read_model::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryStatus {
    Active,
    Inactive,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub user_id: AccountId,
    pub employee_id: EmployeeId,
    pub email: String,
    pub full_name: String,
    pub primary_role: String,
    pub status: DirectoryStatus,
    pub locked: bool,
    pub deleted: bool,
    pub termination_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

pub struct UserDirectoryReconciler<S> {
    entries: S,
}

impl<S> UserDirectoryReconciler<S>
where
    S: RecordStore<AccountId, DirectoryEntry>,
{
    pub fn new(entries: S) -> Self {
        Self { entries }
    }

    pub fn entry(&self, user_id: &AccountId) -> Option<DirectoryEntry> {
        self.entries.get(user_id)
    }

    fn on_provisioned(&self, event: &UserProvisioned) {
        let primary_role = event
            .roles
            .iter()
            .map(|role| role.trim())
            .find(|role| !role.is_empty())
            .map_or_else(|| Role::employee().as_str().to_owned(), str::to_owned);

        self.entries.modify(event.user_id.clone(), |slot| match slot {
            Some(entry) => {
                entry.email = event.work_email.clone();
                entry.full_name = event.full_name.clone();
                entry.primary_role = primary_role;
                entry.updated_at = event.provisioned_at;
            }
            None => {
                *slot = Some(DirectoryEntry {
                    user_id: event.user_id.clone(),
                    employee_id: event.employee_id.clone(),
                    email: event.work_email.clone(),
                    full_name: event.full_name.clone(),
                    primary_role,
                    status: DirectoryStatus::Active,
                    locked: false,
                    deleted: false,
                    termination_reason: None,
                    updated_at: event.provisioned_at,
                });
            }
        });
        info!(user_id = %event.user_id, "directory entry upserted");
    }

    fn on_deactivated(&self, event: &UserDeactivated) {
        self.update(&event.user_id, "deactivation", |entry| {
            entry.status = DirectoryStatus::Inactive;
            entry.locked = true;
            entry.updated_at = event.deactivated_at;
        });
    }

    fn on_resigned(&self, event: &UserResigned) {
        self.update(&event.user_id, "resignation", |entry| {
            entry.deleted = true;
            entry.updated_at = event.resigned_at;
        });
    }

    fn on_terminated(&self, event: &UserTerminated) {
        self.update(&event.user_id, "termination", |entry| {
            entry.status = DirectoryStatus::Terminated;
            entry.locked = true;
            entry.termination_reason = event.reason.clone();
            entry.updated_at = event.terminated_at;
        });
    }

    fn update<F>(&self, user_id: &AccountId, cause: &'static str, change: F)
    where
        F: FnOnce(&mut DirectoryEntry),
    {
        let found = self.entries.modify(user_id.clone(), |slot| match slot.as_mut() {
            Some(entry) => {
                change(entry);
                true
            }
            None => false,
        });
        if found {
            info!(%user_id, cause, "directory entry updated");
        } else {
            warn!(%user_id, cause, "no directory entry for user");
        }
    }
}

#[async_trait]
impl<S> EventHandler for UserDirectoryReconciler<S>
where
    S: RecordStore<AccountId, DirectoryEntry>,
{
    fn name(&self) -> &'static str {
        "user-directory"
    }

    async fn handle(&self, event: &IntegrationEvent) -> Result<(), HandlerError> {
        match event {
            IntegrationEvent::UserProvisioned(e) => self.on_provisioned(e),
            IntegrationEvent::UserDeactivated(e) => self.on_deactivated(e),
            IntegrationEvent::UserResigned(e) => self.on_resigned(e),
            IntegrationEvent::UserTerminated(e) => self.on_terminated(e),
            other => debug!(event_kind = %other.kind(), "ignored by user directory"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryRecordStore;

    fn directory() -> UserDirectoryReconciler<InMemoryRecordStore<AccountId, DirectoryEntry>> {
        UserDirectoryReconciler::new(InMemoryRecordStore::new())
    }

    fn user() -> AccountId {
        AccountId::parse("u-1").unwrap()
    }

    fn provisioned(roles: &[&str]) -> IntegrationEvent {
        UserProvisioned {
            user_id: user(),
            employee_id: EmployeeId::parse("E1").unwrap(),
            work_email: "ada@x".into(),
            full_name: "Ada Lovelace".into(),
            roles: roles.iter().map(|r| (*r).to_owned()).collect(),
            provisioned_at: Utc::now(),
        }
        .into()
    }

    #[tokio::test]
    async fn provisioning_is_an_idempotent_upsert() {
        let directory = directory();
        directory.handle(&provisioned(&["Manager", "Employee"])).await.unwrap();
        directory.handle(&provisioned(&["Manager", "Employee"])).await.unwrap();

        let entry = directory.entry(&user()).unwrap();
        assert_eq!(entry.primary_role, "Manager");
        assert_eq!(entry.status, DirectoryStatus::Active);
        assert_eq!(directory.entries.list().len(), 1);
    }

    #[tokio::test]
    async fn primary_role_defaults_to_employee() {
        let directory = directory();
        directory.handle(&provisioned(&[" "])).await.unwrap();
        assert_eq!(directory.entry(&user()).unwrap().primary_role, "Employee");
    }

    #[tokio::test]
    async fn deactivation_marks_inactive_and_locked() {
        let directory = directory();
        directory.handle(&provisioned(&[])).await.unwrap();

        let event: IntegrationEvent = UserDeactivated {
            user_id: user(),
            employee_id: EmployeeId::parse("E1").unwrap(),
            deactivated_at: Utc::now(),
            reason: None,
        }
        .into();
        directory.handle(&event).await.unwrap();
        directory.handle(&event).await.unwrap();

        let entry = directory.entry(&user()).unwrap();
        assert_eq!(entry.status, DirectoryStatus::Inactive);
        assert!(entry.locked);
        assert!(!entry.deleted);
    }

    #[tokio::test]
    async fn termination_of_unknown_user_is_acknowledged() {
        let directory = directory();
        let event: IntegrationEvent = UserTerminated {
            user_id: user(),
            employee_id: EmployeeId::parse("E1").unwrap(),
            terminated_at: Utc::now(),
            reason: Some("policy".into()),
        }
        .into();
        directory.handle(&event).await.unwrap();
        assert!(directory.entry(&user()).is_none());
    }
}
