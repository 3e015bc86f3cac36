//! Integration event contracts shared by every service.
//!
//! Each event is a flat, immutable record carrying only the fields other
//! services need. Field names travel as camelCase JSON. There is no version
//! field: a contract only ever gains optional fields, and a breaking change
//! gets a new routing key.
//!
//! The set is closed. [`IntegrationEvent`] is the sum of all contracts and
//! [`EventKind`] is its payload-free discriminant, used to pick a routing key
//! on publish and a decoder on consume.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tessera_core::{AccountId, DepartmentId, EmployeeId, ResignationRequestId};

/// HR hired someone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeCreated {
    pub employee_id: EmployeeId,
    pub full_name: String,
    pub work_email: String,
    #[serde(default)]
    pub personal_email: Option<String>,
    pub position: String,
    pub department_id: DepartmentId,
    pub department_name: String,
    pub hire_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeExited {
    pub employee_id: EmployeeId,
    #[serde(default)]
    pub user_id: Option<AccountId>,
    pub exit_date: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub eligible_for_rehire: Option<bool>,
    pub exit_status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeTerminated {
    pub employee_id: EmployeeId,
    #[serde(default)]
    pub user_id: Option<AccountId>,
    pub terminated_at: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<String>,
    pub eligible_for_rehire: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeResignationApproved {
    pub resignation_request_id: ResignationRequestId,
    pub employee_id: EmployeeId,
    #[serde(default)]
    pub user_id: Option<AccountId>,
    pub effective_date: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<String>,
    pub approved_at: DateTime<Utc>,
}

/// Identity created an account for an employee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProvisioned {
    pub user_id: AccountId,
    pub employee_id: EmployeeId,
    pub work_email: String,
    pub full_name: String,
    pub roles: Vec<String>,
    pub provisioned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDeactivated {
    pub user_id: AccountId,
    pub employee_id: EmployeeId,
    pub deactivated_at: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResigned {
    pub user_id: AccountId,
    pub employee_id: EmployeeId,
    pub resignation_request_id: ResignationRequestId,
    pub resigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTerminated {
    pub user_id: AccountId,
    pub employee_id: EmployeeId,
    pub terminated_at: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// HR linked an employee to an account and handed its salary to finance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationProvisioned {
    pub employee_id: EmployeeId,
    pub full_name: String,
    pub work_email: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    pub position: String,
    pub department_id: DepartmentId,
    pub department_name: String,
    pub base_salary: Decimal,
    pub currency: String,
    pub effective_from: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BonusLine {
    pub bonus_type: String,
    pub amount: Decimal,
    pub awarded_on: DateTime<Utc>,
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub awarded_by: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub source_system: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationBonusesIssued {
    pub employee_id: EmployeeId,
    pub employee_name: String,
    pub bonuses: Vec<BonusLine>,
    pub issued_at: DateTime<Utc>,
    #[serde(default)]
    pub issued_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeductionLine {
    pub deduction_type: String,
    pub amount: Decimal,
    pub applied_on: DateTime<Utc>,
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub applied_by: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub source_system: Option<String>,
    #[serde(default)]
    pub is_recurring: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationDeductionsIssued {
    pub employee_id: EmployeeId,
    pub employee_name: String,
    pub deductions: Vec<DeductionLine>,
    pub issued_at: DateTime<Utc>,
    #[serde(default)]
    pub issued_by: Option<String>,
}

macro_rules! integration_events {
    ($( $variant:ident { route: $route:literal, key: $key:literal } ),+ $(,)?) => {
        /// Discriminant of [`IntegrationEvent`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum EventKind {
            $($variant),+
        }

        impl EventKind {
            pub const ALL: &'static [EventKind] = &[$(EventKind::$variant),+];

            /// Stable event-type name, stamped on outgoing messages.
            pub fn name(self) -> &'static str {
                match self {
                    $(EventKind::$variant => stringify!($variant)),+
                }
            }

            /// Name used for this kind under the `[routes]` configuration table.
            pub fn route_name(self) -> &'static str {
                match self {
                    $(EventKind::$variant => $route),+
                }
            }

            pub fn default_routing_key(self) -> &'static str {
                match self {
                    $(EventKind::$variant => $key),+
                }
            }

            pub fn from_route_name(name: &str) -> Option<Self> {
                match name {
                    $($route => Some(EventKind::$variant),)+
                    _ => None,
                }
            }
        }

        /// Every event that crosses a service boundary.
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum IntegrationEvent {
            $($variant($variant)),+
        }

        impl IntegrationEvent {
            pub fn kind(&self) -> EventKind {
                match self {
                    $(Self::$variant(_) => EventKind::$variant),+
                }
            }

            /// Employee the event concerns; every contract carries one.
            pub fn employee_id(&self) -> &EmployeeId {
                match self {
                    $(Self::$variant(payload) => &payload.employee_id),+
                }
            }

            /// Serialize the bare payload (the kind travels in the routing key).
            pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
                match self {
                    $(Self::$variant(payload) => serde_json::to_vec(payload)),+
                }
            }

            pub fn from_json(kind: EventKind, body: &[u8]) -> Result<Self, serde_json::Error> {
                match kind {
                    $(EventKind::$variant => serde_json::from_slice(body).map(Self::$variant)),+
                }
            }
        }

        $(
            impl From<$variant> for IntegrationEvent {
                fn from(payload: $variant) -> Self {
                    Self::$variant(payload)
                }
            }
        )+
    };
}

integration_events! {
    EmployeeCreated { route: "employee_created", key: "hr.employee.created" },
    EmployeeExited { route: "employee_exited", key: "hr.employee.exited" },
    EmployeeTerminated { route: "employee_terminated", key: "hr.employee.terminated" },
    EmployeeResignationApproved {
        route: "employee_resignation_approved",
        key: "hr.employee.resignation.approved"
    },
    UserProvisioned { route: "user_provisioned", key: "auth.user.provisioned" },
    UserDeactivated { route: "user_deactivated", key: "auth.user.deactivated" },
    UserResigned { route: "user_resigned", key: "auth.user.resigned" },
    UserTerminated { route: "user_terminated", key: "auth.user.terminated" },
    CompensationProvisioned {
        route: "compensation_provisioned",
        key: "finance.compensation.provisioned"
    },
    CompensationBonusesIssued {
        route: "compensation_bonuses",
        key: "finance.compensation.bonuses"
    },
    CompensationDeductionsIssued {
        route: "compensation_deductions",
        key: "finance.compensation.deductions"
    },
}

impl core::fmt::Display for EventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_uses_camel_case_field_names() {
        let event = IntegrationEvent::from(UserProvisioned {
            user_id: AccountId::parse("u-1").unwrap(),
            employee_id: EmployeeId::parse("E1").unwrap(),
            work_email: "ada@x".into(),
            full_name: "Ada Lovelace".into(),
            roles: vec!["Employee".into()],
            provisioned_at: "2025-01-01T09:00:00Z".parse().unwrap(),
        });

        let value: serde_json::Value = serde_json::from_slice(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["userId"], "u-1");
        assert_eq!(value["employeeId"], "E1");
        assert_eq!(value["workEmail"], "ada@x");
        assert_eq!(value["roles"], json!(["Employee"]));
        assert!(value.get("kind").is_none());
    }

    #[test]
    fn decodes_employee_created_with_missing_optionals() {
        let body = json!({
            "employeeId": "E1",
            "fullName": "Ada Lovelace",
            "workEmail": "ada@x",
            "position": "Engineer",
            "departmentId": "D1",
            "departmentName": "R&D",
            "hireDate": "2025-01-01"
        });
        let event =
            IntegrationEvent::from_json(EventKind::EmployeeCreated, body.to_string().as_bytes()).unwrap();

        let IntegrationEvent::EmployeeCreated(payload) = event else {
            panic!("wrong variant");
        };
        assert_eq!(payload.employee_id.as_str(), "E1");
        assert_eq!(payload.personal_email, None);
        assert_eq!(payload.hire_date, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    }

    #[test]
    fn decoding_against_the_wrong_kind_fails() {
        let body = json!({ "employeeId": "E1", "fullName": "Ada" });
        assert!(IntegrationEvent::from_json(EventKind::UserProvisioned, body.to_string().as_bytes()).is_err());
    }

    #[test]
    fn amounts_accept_numbers_and_strings() {
        let body = json!({
            "employeeId": "E1",
            "employeeName": "Ada",
            "bonuses": [
                { "bonusType": "Spot", "amount": 100.5, "awardedOn": "2025-03-01T00:00:00Z" },
                { "bonusType": "Annual", "amount": "2500.00", "awardedOn": "2025-03-01T00:00:00Z" }
            ],
            "issuedAt": "2025-03-02T00:00:00Z"
        });
        let event = IntegrationEvent::from_json(
            EventKind::CompensationBonusesIssued,
            body.to_string().as_bytes(),
        )
        .unwrap();
        let IntegrationEvent::CompensationBonusesIssued(payload) = event else {
            panic!("wrong variant");
        };
        assert_eq!(payload.bonuses[0].amount, Decimal::new(1005, 1));
        assert_eq!(payload.bonuses[1].amount, Decimal::new(250000, 2));
    }

    #[test]
    fn route_names_round_trip_and_keys_are_distinct() {
        let mut keys: Vec<&str> = EventKind::ALL.iter().map(|k| k.default_routing_key()).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), EventKind::ALL.len());

        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_route_name(kind.route_name()), Some(*kind));
        }
        assert_eq!(EventKind::from_route_name("nope"), None);
    }
}
