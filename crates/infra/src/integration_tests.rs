//! End-to-end choreography over the in-memory broker.
//!
//! HR → identity → (HR, user management) → finance, each reconciler consuming
//! its own durable queue exactly as it would over AMQP.
//!
//! Verifies:
//! - `hr.employee.created` provisions an account and announces it
//! - derived events reach every bound queue
//! - redelivery and broker outages never duplicate derived events
//! - poison messages are dead-lettered, unknown keys acknowledged

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use serde_json::json;

    use tessera_core::{DepartmentId, EmployeeId};
    use tessera_events::{DeliveryReport, EventKind, InMemoryBroker, IntegrationEvent, RoutingKey, RoutingTable};

    use crate::config::{QueueConfig, ServiceRole};
    use crate::read_model::InMemoryRecordStore;
    use crate::reconcilers::{
        Account, AccountStatus, CompensationAccount, DirectoryEntry, DirectoryStatus, EmployeeRecord,
        FinanceReconciler, HrReconciler, IdentityReconciler, NewHire, UserDirectoryReconciler, subscription_for,
    };

    type Store<K, V> = Arc<InMemoryRecordStore<K, V>>;

    struct World {
        broker: Arc<InMemoryBroker>,
        queues: QueueConfig,
        identity: IdentityReconciler<Store<String, Account>, InMemoryBroker>,
        hr: HrReconciler<Store<EmployeeId, EmployeeRecord>, InMemoryBroker>,
        directory: UserDirectoryReconciler<Store<tessera_core::AccountId, DirectoryEntry>>,
        finance: FinanceReconciler<Store<EmployeeId, CompensationAccount>>,
    }

    impl World {
        fn new() -> Self {
            let routes = RoutingTable::defaults();
            let broker = Arc::new(InMemoryBroker::new(routes.clone()));
            let queues = QueueConfig::default();
            for role in [
                ServiceRole::Identity,
                ServiceRole::Hr,
                ServiceRole::UserManagement,
                ServiceRole::Finance,
            ] {
                broker.declare_queue(&subscription_for(role, &queues, &routes));
            }

            Self {
                identity: IdentityReconciler::new(Arc::new(InMemoryRecordStore::new()), broker.clone()),
                hr: HrReconciler::new(Arc::new(InMemoryRecordStore::new()), broker.clone()),
                directory: UserDirectoryReconciler::new(Arc::new(InMemoryRecordStore::new())),
                finance: FinanceReconciler::new(Arc::new(InMemoryRecordStore::new())),
                broker,
                queues,
            }
        }

        async fn run_identity(&self) -> DeliveryReport {
            self.broker.deliver_ready(&self.queues.identity, &self.identity).await
        }

        async fn run_hr(&self) -> DeliveryReport {
            self.broker.deliver_ready(&self.queues.hr, &self.hr).await
        }

        async fn run_directory(&self) -> DeliveryReport {
            self.broker
                .deliver_ready(&self.queues.user_management, &self.directory)
                .await
        }

        async fn run_finance(&self) -> DeliveryReport {
            self.broker.deliver_ready(&self.queues.finance, &self.finance).await
        }

        async fn run_all(&self) {
            self.run_identity().await;
            self.run_hr().await;
            self.run_directory().await;
            self.run_finance().await;
        }

        fn published_kinds(&self) -> Vec<EventKind> {
            self.broker.published().iter().map(|m| m.kind()).collect()
        }
    }

    fn employee_created_body() -> Vec<u8> {
        json!({
            "employeeId": "E1",
            "fullName": "Ada Lovelace",
            "workEmail": "ada@x",
            "position": "Engineer",
            "departmentId": "D1",
            "departmentName": "R&D",
            "hireDate": "2025-01-01"
        })
        .to_string()
        .into_bytes()
    }

    fn publish_employee_created(world: &World) {
        let key = RoutingKey::parse("hr.employee.created").unwrap();
        assert_eq!(world.broker.publish_raw(key, employee_created_body()), 1);
    }

    fn e1() -> EmployeeId {
        EmployeeId::parse("E1").unwrap()
    }

    #[tokio::test]
    async fn employee_created_provisions_a_user() {
        let world = World::new();
        publish_employee_created(&world);

        let report = world.run_identity().await;
        assert_eq!(report.acked, 1);

        let events = world.broker.published_events();
        assert_eq!(events.len(), 1);
        let IntegrationEvent::UserProvisioned(provisioned) = &events[0] else {
            panic!("expected auth.user.provisioned, got {:?}", events[0]);
        };
        assert_eq!(provisioned.employee_id, e1());
        assert_eq!(provisioned.work_email, "ada@x");
        assert_eq!(provisioned.full_name, "Ada Lovelace");
        assert_eq!(provisioned.roles, vec!["Employee".to_owned()]);
        assert_eq!(world.broker.published()[0].routing_key().as_str(), "auth.user.provisioned");

        // Both HR and user management are bound to the provisioned key.
        assert_eq!(world.broker.ready_count(&world.queues.hr), 1);
        assert_eq!(world.broker.ready_count(&world.queues.user_management), 1);
    }

    #[tokio::test]
    async fn lifecycle_watcher_receives_the_exact_payload() {
        use tessera_auth::{IssuerSettings, SigningKeyConfig, SigningKeyStore, TokenIssuer, TokenRequest};
        use tessera_events::{BindingPattern, SubscriptionSpec};

        let keys = SigningKeyStore::from_config(&[SigningKeyConfig {
            id: "k1".into(),
            current: true,
            private_key_pem: Some(include_str!("../../auth/tests/fixtures/k1_private.pem").into()),
            ..Default::default()
        }])
        .unwrap();
        let issued = TokenIssuer::new(Arc::new(keys), IssuerSettings::default())
            .unwrap()
            .issue(&TokenRequest::new(tessera_core::AccountId::parse("hr-admin").unwrap(), "HR Admin"))
            .unwrap();
        assert_eq!(issued.key_id, "k1");

        let world = World::new();
        world.broker.declare_queue(&SubscriptionSpec::new(
            "audit.employee-lifecycle",
            [BindingPattern::parse("hr.employee.*").unwrap()],
        ));

        let body = json!({
            "employeeId": "E1",
            "fullName": "Jane Doe",
            "workEmail": "jane@corp.test",
            "position": "Analyst",
            "departmentId": "D1",
            "departmentName": "Finance",
            "hireDate": "2025-01-01"
        })
        .to_string()
        .into_bytes();
        let key = RoutingKey::parse("hr.employee.created").unwrap();
        assert_eq!(world.broker.publish_raw(key, body.clone()), 2);

        let delivery = world.broker.next_delivery("audit.employee-lifecycle").unwrap();
        assert_eq!(delivery.routing_key.as_str(), "hr.employee.created");
        assert_eq!(delivery.body, body);
        assert_eq!(world.broker.ready_count(&world.queues.user_management), 0);

        world.run_identity().await;
        let events = world.broker.published_events();
        let IntegrationEvent::UserProvisioned(provisioned) = &events[0] else {
            panic!("expected auth.user.provisioned");
        };
        assert_eq!(provisioned.employee_id, e1());
        assert_eq!(provisioned.work_email, "jane@corp.test");
        assert_eq!(provisioned.full_name, "Jane Doe");
        assert_eq!(provisioned.roles, vec!["Employee".to_owned()]);
    }

    #[tokio::test]
    async fn hire_flows_through_to_finance() {
        let world = World::new();
        world
            .hr
            .hire(NewHire {
                employee_id: e1(),
                full_name: "Ada Lovelace".into(),
                work_email: "ada@x".into(),
                personal_email: Some("ada@home".into()),
                phone_number: None,
                position: "Engineer".into(),
                department_id: DepartmentId::parse("D1").unwrap(),
                department_name: "R&D".into(),
                hire_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                salary: Decimal::new(9_000_000, 2),
            })
            .await
            .unwrap();

        world.run_all().await;

        assert_eq!(
            world.published_kinds(),
            vec![
                EventKind::EmployeeCreated,
                EventKind::UserProvisioned,
                EventKind::CompensationProvisioned,
            ]
        );

        let account = world.identity.account_by_email("ada@x").unwrap();
        let record = world.hr.employee(&e1()).unwrap();
        assert_eq!(record.account_id.as_ref(), Some(&account.id));

        let entry = world.directory.entry(&account.id).unwrap();
        assert_eq!(entry.primary_role, "Employee");
        assert_eq!(entry.status, DirectoryStatus::Active);

        let compensation = world.finance.account(&e1()).unwrap();
        assert_eq!(compensation.base_salary, Decimal::new(90_000, 0));
        assert_eq!(compensation.currency, "USD");
    }

    #[tokio::test]
    async fn redelivered_employee_created_is_provisioned_once() {
        let world = World::new();
        publish_employee_created(&world);
        publish_employee_created(&world);

        let report = world.run_identity().await;
        assert_eq!(report.acked, 2);
        assert_eq!(world.published_kinds(), vec![EventKind::UserProvisioned]);
    }

    #[tokio::test]
    async fn broker_outage_requeues_and_publishes_exactly_once_after_recovery() {
        let world = World::new();
        publish_employee_created(&world);

        world.broker.set_available(false);
        let report = world.run_identity().await;
        assert_eq!(report.requeued, 1);
        assert_eq!(world.broker.ready_count(&world.queues.identity), 1);
        assert!(world.identity.account_by_email("ada@x").is_some());

        world.broker.set_available(true);
        let report = world.run_identity().await;
        assert_eq!(report.acked, 1);
        assert_eq!(world.broker.ready_count(&world.queues.identity), 0);
        assert_eq!(world.published_kinds(), vec![EventKind::UserProvisioned]);
    }

    #[tokio::test]
    async fn termination_propagates_to_the_directory() {
        let world = World::new();
        publish_employee_created(&world);
        world.run_identity().await;
        world.run_directory().await;

        // HR never hired E1 locally here; identity finds the account by employee id.
        let key = RoutingKey::parse("hr.employee.terminated").unwrap();
        let body = json!({
            "employeeId": "E1",
            "terminatedAt": "2025-06-30T17:00:00Z",
            "reason": "policy",
            "eligibleForRehire": false
        });
        world.broker.publish_raw(key, body.to_string().into_bytes());

        world.run_identity().await;
        world.run_directory().await;

        let account = world.identity.account_by_employee(&e1()).unwrap();
        assert_eq!(account.status, AccountStatus::Removed);
        let entry = world.directory.entry(&account.id).unwrap();
        assert_eq!(entry.status, DirectoryStatus::Terminated);
        assert_eq!(entry.termination_reason.as_deref(), Some("policy"));
    }

    #[tokio::test]
    async fn poison_messages_are_dead_lettered() {
        let world = World::new();
        let key = RoutingKey::parse("hr.employee.created").unwrap();
        world.broker.publish_raw(key, b"{\"employeeId\":".to_vec());

        let report = world.run_identity().await;
        assert_eq!(report.rejected, 1);
        assert_eq!(world.broker.dead_letter_count(&world.queues.identity), 1);
        assert!(world.broker.published().is_empty());
    }

    #[tokio::test]
    async fn unknown_keys_matching_a_wildcard_are_acknowledged() {
        let world = World::new();
        let key = RoutingKey::parse("auth.user.renamed").unwrap();
        assert_eq!(world.broker.publish_raw(key, b"{}".to_vec()), 1);

        let report = world.run_directory().await;
        assert_eq!(report.acked, 1);
        assert_eq!(world.broker.ready_count(&world.queues.user_management), 0);
        assert_eq!(world.broker.dead_letter_count(&world.queues.user_management), 0);
    }
}
