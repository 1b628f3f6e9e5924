//! Kasbon request lifecycle: submission and every later transition
//!
//! ```text
//! Pending --approve last step--> Approved --disburse--> Disbursed
//!    |                              |                      |
//!    |--reject step--> Rejected     +------realize---------+--> Settled
//!    +--revoke--> Revoked <--revoke-- Approved
//! ```
//!
//! Each transition mutates the approval path and status together in one call,
//! so a request is never observed with a signed step and a stale status.
use super::activity::{ActivityEntry, ActivityType};
use super::approval::PathProgress;
use super::builder::{PathRules, build_approval_path};
use super::error::{KasbonError, ValidationError};
use super::kasbon::{
    KasbonDraft, KasbonItem, KasbonRequest, KasbonStatus, KasbonType, Realization, validate_items,
};
use super::matrix::MatrixSet;
use super::policy::DepartmentPolicies;
use super::resolver::{ApproverResolver, RequesterContext};
use super::slots::{SlotAssessment, assess};
use super::types::TimeStamp;

/// The routing configuration a submission is evaluated against.
pub struct Routing<'a, R: ?Sized> {
    pub matrix: &'a MatrixSet,
    pub policies: &'a DepartmentPolicies,
    pub rules: &'a PathRules,
    pub resolver: &'a R,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub request: KasbonRequest,
    pub assessment: SlotAssessment,
}

/// Validate a draft, classify it against the requester's slots and
/// materialise its approval chain.
pub fn submit_kasbon<R>(
    id: String,
    draft: &KasbonDraft,
    requester: &RequesterContext,
    existing: &[KasbonRequest],
    routing: &Routing<'_, R>,
) -> Result<Submission, KasbonError>
where
    R: ApproverResolver + ?Sized,
{
    let valid = draft.validate()?;
    let assessment = assess(existing, requester, routing.policies, valid.amount);

    if assessment.is_over_slot() && valid.slot_justification.is_none() {
        return Err(ValidationError::MissingSlotJustification {
            slot: assessment.slot,
            max_slots: assessment.max_slots,
        }
        .into());
    }

    let approval_path = build_approval_path(
        valid.amount,
        assessment.is_over_slot(),
        routing.matrix,
        requester,
        routing.resolver,
        routing.rules,
    )?;

    // a chain with nothing left to sign is approved on arrival
    let status = if approval_path.is_complete() {
        KasbonStatus::Approved
    } else {
        KasbonStatus::Pending
    };

    let request = KasbonRequest {
        id,
        requestor: requester.name.clone(),
        department: requester.department.clone(),
        amount: valid.amount,
        date: TimeStamp::new(),
        date_needed: valid.date_needed,
        bank_name: valid.bank_name,
        bank_account: valid.bank_account,
        status,
        is_overdue: false,
        slot: assessment.slot,
        purpose: valid.purpose,
        items: valid.items,
        kasbon_type: assessment.kasbon_type,
        approval_path,
        realization: None,
        // only over-slot requests carry the justification
        slot_justification: match assessment.kasbon_type {
            KasbonType::OverSlot => valid.slot_justification,
            KasbonType::Regular => None,
        },
        revoke_reason: None,
        matrix_digest: None,
    };

    Ok(Submission {
        request,
        assessment,
    })
}

impl KasbonRequest {
    fn require(&self, action: &'static str, allowed: &[KasbonStatus]) -> Result<(), KasbonError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(KasbonError::invalid_state(action, self.status))
        }
    }

    /// Approve the step at `step_index`, which must be the current step.
    /// Returns the resulting request status.
    pub fn approve_step(&mut self, step_index: usize) -> Result<KasbonStatus, KasbonError> {
        self.require("approve", &[KasbonStatus::Pending])?;

        if self.approval_path.approve(step_index)? == PathProgress::Completed {
            self.status = KasbonStatus::Approved;
        }
        Ok(self.status)
    }

    pub fn reject_step(&mut self, step_index: usize) -> Result<(), KasbonError> {
        self.require("reject", &[KasbonStatus::Pending])?;

        self.approval_path.reject(step_index)?;
        self.status = KasbonStatus::Rejected;
        Ok(())
    }

    /// Administrative override. Bypasses the step machinery.
    pub fn revoke(&mut self, reason: &str, actor: &str) -> Result<ActivityEntry, KasbonError> {
        self.require("revoke", &[KasbonStatus::Pending, KasbonStatus::Approved])?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ValidationError::EmptyRevokeReason.into());
        }

        self.status = KasbonStatus::Revoked;
        self.revoke_reason = Some(reason.to_string());

        Ok(ActivityEntry::new(
            actor,
            "Revoked Kasbon",
            format!("KB: {} revoked. Reason: {}", self.id, reason),
            ActivityType::Kasbon,
        ))
    }

    pub fn disburse(&mut self) -> Result<(), KasbonError> {
        self.require("disburse", &[KasbonStatus::Approved])?;
        self.status = KasbonStatus::Disbursed;
        Ok(())
    }

    /// Record actual spend against the advance and close it.
    pub fn realize(&mut self, items: Vec<KasbonItem>) -> Result<(), KasbonError> {
        self.require("realize", &[KasbonStatus::Approved, KasbonStatus::Disbursed])?;
        if items.is_empty() {
            return Err(ValidationError::EmptyRealization.into());
        }
        let total = validate_items(&items)?;

        self.realization = Some(Realization { items, total });
        self.status = KasbonStatus::Settled;
        Ok(())
    }

    pub fn set_overdue(&mut self, overdue: bool) {
        self.is_overdue = overdue;
    }
}
