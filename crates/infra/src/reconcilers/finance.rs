//! Finance service: compensation accounts plus the bonuses and deductions
//! booked against them.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, info, warn};

use async_trait::async_trait;
use tessera_core::{DepartmentId, EmployeeId};
use tessera_events::contracts::{
    BonusLine, CompensationBonusesIssued, CompensationDeductionsIssued, CompensationProvisioned, DeductionLine,
};
use tessera_events::{EventHandler, HandlerError, IntegrationEvent};

use crate::read_model::RecordStore;

/// Money is kept to cents, midpoint away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Identity of a bonus or deduction line within one account.
///
/// A line with a reference is the same line wherever it shows up again. A
/// line without one is tied to the event that issued it and its position in
/// that event, so a redelivery matches it but a second line of the same type
/// and day does not.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryKey {
    Referenced {
        kind: String,
        on: NaiveDate,
        reference: String,
    },
    Unreferenced {
        kind: String,
        on: NaiveDate,
        issued_at: DateTime<Utc>,
        line: usize,
    },
}

impl EntryKey {
    fn new(kind: &str, on: DateTime<Utc>, reference: Option<&str>, issued_at: DateTime<Utc>, line: usize) -> Self {
        let kind = kind.trim().to_lowercase();
        let on = on.date_naive();
        match reference.map(str::trim).filter(|r| !r.is_empty()) {
            Some(reference) => Self::Referenced {
                kind,
                on,
                reference: reference.to_owned(),
            },
            None => Self::Unreferenced {
                kind,
                on,
                issued_at,
                line,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bonus {
    pub bonus_type: String,
    pub amount: Decimal,
    pub awarded_on: DateTime<Utc>,
    pub period: Option<String>,
    pub reference: Option<String>,
    pub awarded_by: Option<String>,
    pub notes: Option<String>,
    pub source_system: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deduction {
    pub deduction_type: String,
    pub amount: Decimal,
    pub applied_on: DateTime<Utc>,
    pub period: Option<String>,
    pub reference: Option<String>,
    pub applied_by: Option<String>,
    pub notes: Option<String>,
    pub source_system: Option<String>,
    pub is_recurring: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensationAccount {
    pub employee_id: EmployeeId,
    pub employee_name: String,
    pub department_id: Option<DepartmentId>,
    pub department: String,
    pub job_title: String,
    pub base_salary: Decimal,
    pub currency: String,
    pub effective_from: Option<DateTime<Utc>>,
    pub bonuses: BTreeMap<EntryKey, Bonus>,
    pub deductions: BTreeMap<EntryKey, Deduction>,
}

impl CompensationAccount {
    /// Placeholder for entries that arrive before provisioning.
    fn unprovisioned(employee_id: EmployeeId, employee_name: &str) -> Self {
        Self {
            employee_id,
            employee_name: employee_name.to_owned(),
            department_id: None,
            department: String::new(),
            job_title: String::new(),
            base_salary: Decimal::ZERO,
            currency: String::new(),
            effective_from: None,
            bonuses: BTreeMap::new(),
            deductions: BTreeMap::new(),
        }
    }

    pub fn total_bonuses(&self) -> Decimal {
        self.bonuses.values().map(|b| b.amount).sum()
    }

    pub fn total_deductions(&self) -> Decimal {
        self.deductions.values().map(|d| d.amount).sum()
    }
}

/// Insert lines whose key is not booked yet; returns how many were added.
///
/// Keys already on the account are replays. Two lines of one event sharing a
/// reference are a producer mistake: the first wins and the rest are logged.
fn book<T>(
    entries: &mut BTreeMap<EntryKey, T>,
    lines: impl IntoIterator<Item = (EntryKey, T)>,
    employee_id: &EmployeeId,
) -> usize {
    let mut booked_now = BTreeSet::new();
    let mut added = 0;
    for (key, entry) in lines {
        match entries.entry(key) {
            Entry::Vacant(vacant) => {
                booked_now.insert(vacant.key().clone());
                vacant.insert(entry);
                added += 1;
            }
            Entry::Occupied(occupied) if booked_now.contains(occupied.key()) => {
                warn!(%employee_id, key = ?occupied.key(), "duplicate line in one event ignored");
            }
            Entry::Occupied(_) => {}
        }
    }
    added
}

impl From<&BonusLine> for Bonus {
    fn from(line: &BonusLine) -> Self {
        Self {
            bonus_type: line.bonus_type.clone(),
            amount: round_money(line.amount),
            awarded_on: line.awarded_on,
            period: line.period.clone(),
            reference: line.reference.clone(),
            awarded_by: line.awarded_by.clone(),
            notes: line.notes.clone(),
            source_system: line.source_system.clone(),
        }
    }
}

impl From<&DeductionLine> for Deduction {
    fn from(line: &DeductionLine) -> Self {
        Self {
            deduction_type: line.deduction_type.clone(),
            amount: round_money(line.amount),
            applied_on: line.applied_on,
            period: line.period.clone(),
            reference: line.reference.clone(),
            applied_by: line.applied_by.clone(),
            notes: line.notes.clone(),
            source_system: line.source_system.clone(),
            is_recurring: line.is_recurring,
        }
    }
}

pub struct FinanceReconciler<S> {
    accounts: S,
}

impl<S> FinanceReconciler<S>
where
    S: RecordStore<EmployeeId, CompensationAccount>,
{
    pub fn new(accounts: S) -> Self {
        Self { accounts }
    }

    pub fn account(&self, employee_id: &EmployeeId) -> Option<CompensationAccount> {
        self.accounts.get(employee_id)
    }

    fn on_provisioned(&self, event: &CompensationProvisioned) {
        self.accounts.modify(event.employee_id.clone(), |slot| {
            let account = slot.get_or_insert_with(|| {
                CompensationAccount::unprovisioned(event.employee_id.clone(), &event.full_name)
            });
            account.employee_name = event.full_name.clone();
            account.department_id = Some(event.department_id.clone());
            account.department = event.department_name.clone();
            account.job_title = event.position.clone();
            account.base_salary = round_money(event.base_salary);
            account.currency = event.currency.clone();
            account.effective_from = Some(event.effective_from);
        });
        info!(employee_id = %event.employee_id, "compensation account provisioned");
    }

    fn on_bonuses(&self, event: &CompensationBonusesIssued) {
        if event.bonuses.is_empty() {
            info!(employee_id = %event.employee_id, "no bonus entries present");
            return;
        }
        let added = self.accounts.modify(event.employee_id.clone(), |slot| {
            let account = slot.get_or_insert_with(|| {
                warn!(employee_id = %event.employee_id, "bonuses for an unprovisioned account");
                CompensationAccount::unprovisioned(event.employee_id.clone(), &event.employee_name)
            });
            let lines = event.bonuses.iter().enumerate().map(|(index, line)| {
                let key = EntryKey::new(
                    &line.bonus_type,
                    line.awarded_on,
                    line.reference.as_deref(),
                    event.issued_at,
                    index,
                );
                (key, Bonus::from(line))
            });
            book(&mut account.bonuses, lines, &event.employee_id)
        });
        info!(
            employee_id = %event.employee_id,
            received = event.bonuses.len(),
            added,
            "bonuses processed"
        );
    }

    fn on_deductions(&self, event: &CompensationDeductionsIssued) {
        if event.deductions.is_empty() {
            info!(employee_id = %event.employee_id, "no deduction entries present");
            return;
        }
        let added = self.accounts.modify(event.employee_id.clone(), |slot| {
            let account = slot.get_or_insert_with(|| {
                warn!(employee_id = %event.employee_id, "deductions for an unprovisioned account");
                CompensationAccount::unprovisioned(event.employee_id.clone(), &event.employee_name)
            });
            let lines = event.deductions.iter().enumerate().map(|(index, line)| {
                let key = EntryKey::new(
                    &line.deduction_type,
                    line.applied_on,
                    line.reference.as_deref(),
                    event.issued_at,
                    index,
                );
                (key, Deduction::from(line))
            });
            book(&mut account.deductions, lines, &event.employee_id)
        });
        info!(
            employee_id = %event.employee_id,
            received = event.deductions.len(),
            added,
            "deductions processed"
        );
    }
}

#[async_trait]
impl<S> EventHandler for FinanceReconciler<S>
where
    S: RecordStore<EmployeeId, CompensationAccount>,
{
    fn name(&self) -> &'static str {
        "finance"
    }

    async fn handle(&self, event: &IntegrationEvent) -> Result<(), HandlerError> {
        match event {
            IntegrationEvent::CompensationProvisioned(e) => self.on_provisioned(e),
            IntegrationEvent::CompensationBonusesIssued(e) => self.on_bonuses(e),
            IntegrationEvent::CompensationDeductionsIssued(e) => self.on_deductions(e),
            other => debug!(event_kind = %other.kind(), "ignored by finance"),
        }
        Ok(())
    }
}
