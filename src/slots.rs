//! Slot and outstanding-amount tracking against department policy
use super::kasbon::{KasbonRequest, KasbonType};
use super::policy::DepartmentPolicies;
use super::resolver::RequesterContext;
use super::types::Amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotScope<'a> {
    Requester(&'a str),
    Department(&'a str),
}

impl SlotScope<'_> {
    fn matches(&self, request: &KasbonRequest) -> bool {
        match self {
            SlotScope::Requester(name) => request.requestor == *name,
            SlotScope::Department(dept) => request.department == *dept,
        }
    }
}

/// Outcome of checking a prospective submission against the quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotAssessment {
    /// Ordinal the new request would occupy.
    pub slot: u32,
    pub max_slots: u32,
    pub kasbon_type: KasbonType,
    /// Department outstanding total including the new amount.
    pub department_outstanding: Amount,
    pub exceeds_outstanding_limit: bool,
}

impl SlotAssessment {
    pub fn is_over_slot(&self) -> bool {
        self.kasbon_type == KasbonType::OverSlot
    }
}

fn active<'r>(
    requests: &'r [KasbonRequest],
    scope: SlotScope<'r>,
) -> impl Iterator<Item = &'r KasbonRequest> {
    requests
        .iter()
        .filter(move |r| !r.status.is_terminal() && scope.matches(r))
}

/// Non-terminal requests in scope.
pub fn active_count(requests: &[KasbonRequest], scope: SlotScope<'_>) -> u32 {
    active(requests, scope).count() as u32
}

/// Sum of amounts still owed on non-terminal requests in scope.
pub fn outstanding_amount(requests: &[KasbonRequest], scope: SlotScope<'_>) -> Amount {
    active(requests, scope).fold(0, |acc: Amount, r| acc.saturating_add(r.amount))
}

pub fn assess(
    requests: &[KasbonRequest],
    requester: &RequesterContext,
    policies: &DepartmentPolicies,
    amount: Amount,
) -> SlotAssessment {
    let setting = policies.effective(&requester.department);
    let slot = active_count(requests, SlotScope::Requester(&requester.name)) + 1;
    let kasbon_type = if slot > setting.max_slots {
        KasbonType::OverSlot
    } else {
        KasbonType::Regular
    };

    let department_outstanding =
        outstanding_amount(requests, SlotScope::Department(&requester.department))
            .saturating_add(amount);

    SlotAssessment {
        slot,
        max_slots: setting.max_slots,
        kasbon_type,
        department_outstanding,
        exceeds_outstanding_limit: setting.exceeds_outstanding_limit(department_outstanding),
    }
}

/// The department has used every slot; a slot-exception request is warranted.
pub fn slot_exception_required(
    requests: &[KasbonRequest],
    dept_name: &str,
    policies: &DepartmentPolicies,
) -> bool {
    let max_slots = policies.effective(dept_name).max_slots;
    active_count(requests, SlotScope::Department(dept_name)) >= max_slots
}
