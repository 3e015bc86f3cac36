//! Per-service event reconcilers.
//!
//! Each reconciler owns a local record store, consumes one queue, and may
//! publish derived events. Derived events are written into the record they
//! belong to (as [`Announcements`]) in the same state change that produces
//! them, then published. A failed publish leaves the announcement pending and
//! fails the delivery, so the broker redelivers and the retry publishes it;
//! committed local state is never rolled back.

pub mod finance;
pub mod hr;
pub mod identity;
pub mod user_directory;

use std::collections::BTreeMap;

use tracing::{info, warn};

use tessera_events::{
    BindingPattern, EventKind, EventPublisher, IntegrationEvent, PublishError, RoutingTable, SubscriptionSpec,
};

use crate::config::{QueueConfig, ServiceRole};
use crate::read_model::RecordStore;

pub use finance::{CompensationAccount, FinanceReconciler};
pub use hr::{EmployeeRecord, HrReconciler, NewHire};
pub use identity::{Account, AccountStatus, IdentityReconciler};
pub use user_directory::{DirectoryEntry, DirectoryStatus, UserDirectoryReconciler};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Announcement {
    event: IntegrationEvent,
    published: bool,
}

/// Derived events recorded against one local record, at most one per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Announcements {
    entries: BTreeMap<EventKind, Announcement>,
}

impl Announcements {
    /// Record `event` unless one of its kind is already recorded.
    pub fn record(&mut self, event: IntegrationEvent) -> bool {
        let kind = event.kind();
        if self.entries.contains_key(&kind) {
            return false;
        }
        self.entries.insert(
            kind,
            Announcement {
                event,
                published: false,
            },
        );
        true
    }

    pub fn is_published(&self, kind: EventKind) -> bool {
        self.entries.get(&kind).is_some_and(|entry| entry.published)
    }

    /// Recorded but not yet accepted by the broker.
    pub fn pending(&self, kind: EventKind) -> Option<&IntegrationEvent> {
        self.entries
            .get(&kind)
            .filter(|entry| !entry.published)
            .map(|entry| &entry.event)
    }

    fn mark_published(&mut self, kind: EventKind) {
        if let Some(entry) = self.entries.get_mut(&kind) {
            entry.published = true;
        }
    }
}

/// A record type that carries its own derived events.
pub trait Announcing {
    fn announcements(&self) -> &Announcements;
    fn announcements_mut(&mut self) -> &mut Announcements;
}

/// Publish the pending announcement of `kind` on the record at `key`, if any.
pub(crate) async fn announce<P, S, K, V>(publisher: &P, store: &S, key: &K, kind: EventKind) -> Result<(), PublishError>
where
    P: EventPublisher + ?Sized,
    S: RecordStore<K, V>,
    K: Clone,
    V: Announcing,
{
    let Some(event) = store
        .get(key)
        .and_then(|record| record.announcements().pending(kind).cloned())
    else {
        return Ok(());
    };

    if let Err(err) = publisher.publish(&event).await {
        warn!(
            event_kind = %kind,
            employee_id = %event.employee_id(),
            error = %err,
            "derived event not published; left pending"
        );
        return Err(err);
    }

    store.modify(key.clone(), |slot| {
        if let Some(record) = slot {
            record.announcements_mut().mark_published(kind);
        }
    });
    info!(event_kind = %kind, employee_id = %event.employee_id(), "derived event published");
    Ok(())
}

/// Queue and bindings a service consumes.
pub fn subscription_for(role: ServiceRole, queues: &QueueConfig, routes: &RoutingTable) -> SubscriptionSpec {
    let queue = queues.for_role(role);
    match role {
        ServiceRole::Identity => exact(
            queue,
            routes,
            &[
                EventKind::EmployeeCreated,
                EventKind::EmployeeExited,
                EventKind::EmployeeTerminated,
                EventKind::EmployeeResignationApproved,
            ],
        ),
        ServiceRole::Hr => exact(queue, routes, &[EventKind::UserProvisioned]),
        ServiceRole::UserManagement => wildcard(
            queue,
            "auth.user.*",
            routes,
            &[
                EventKind::UserProvisioned,
                EventKind::UserDeactivated,
                EventKind::UserResigned,
                EventKind::UserTerminated,
            ],
        ),
        ServiceRole::Finance => wildcard(
            queue,
            "finance.compensation.*",
            routes,
            &[
                EventKind::CompensationProvisioned,
                EventKind::CompensationBonusesIssued,
                EventKind::CompensationDeductionsIssued,
            ],
        ),
    }
}

fn exact(queue: &str, routes: &RoutingTable, kinds: &[EventKind]) -> SubscriptionSpec {
    SubscriptionSpec::new(
        queue,
        kinds.iter().map(|kind| BindingPattern::exact(routes.key_for(*kind))),
    )
}

/// `pattern`, plus an exact binding for any configured key it does not cover.
fn wildcard(queue: &str, pattern: &'static str, routes: &RoutingTable, kinds: &[EventKind]) -> SubscriptionSpec {
    let mut patterns = Vec::with_capacity(kinds.len() + 1);
    if let Ok(wildcard) = BindingPattern::parse(pattern) {
        patterns.push(wildcard);
    }
    for kind in kinds {
        let key = routes.key_for(*kind);
        if !patterns.iter().any(|p| p.matches(key)) {
            patterns.push(BindingPattern::exact(key));
        }
    }
    SubscriptionSpec::new(queue, patterns)
}
