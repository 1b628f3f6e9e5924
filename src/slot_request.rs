//! Requests to raise a department's slot quota by one
use super::activity::{ActivityEntry, ActivityType};
use super::approval::{ApprovalPath, PathProgress};
use super::builder::materialize_layers;
use super::error::{KasbonError, ValidationError};
use super::policy::DepartmentPolicies;
use super::resolver::{ApproverResolver, REQUESTOR_LAYER, RequesterContext};
use super::types::TimeStamp;
use chrono::Utc;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct SlotRequest {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub requestor: String,
    #[n(2)]
    pub department: String,
    #[n(3)]
    pub reason: String,
    #[n(4)]
    pub current_slots: u32,
    #[n(5)]
    pub requested_slots: u32,
    #[n(6)]
    pub status: SlotStatus,
    #[n(7)]
    pub date: TimeStamp<Utc>,
    #[n(8)]
    pub approval_path: ApprovalPath,
}

/// A usable exception chain needs at least one layer besides the requester.
pub fn validate_slot_layers(layers: &[String]) -> Result<(), ValidationError> {
    let has_approver = layers
        .iter()
        .map(|l| l.trim())
        .any(|l| !l.is_empty() && l != REQUESTOR_LAYER);
    if has_approver {
        Ok(())
    } else {
        Err(ValidationError::EmptyLayerList)
    }
}

pub fn open_slot_request<R>(
    id: String,
    requester: &RequesterContext,
    reason: &str,
    current_slots: u32,
    requested_slots: u32,
    layers: &[String],
    resolver: &R,
) -> Result<SlotRequest, KasbonError>
where
    R: ApproverResolver + ?Sized,
{
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(ValidationError::EmptySlotReason.into());
    }
    if current_slots.checked_add(1) != Some(requested_slots) {
        return Err(ValidationError::InvalidSlotDelta {
            current: current_slots,
            requested: requested_slots,
        }
        .into());
    }
    validate_slot_layers(layers)?;

    let steps = materialize_layers(layers, requester, resolver, str::to_string);

    Ok(SlotRequest {
        id,
        requestor: requester.name.clone(),
        department: requester.department.clone(),
        reason: reason.to_string(),
        current_slots,
        requested_slots,
        status: SlotStatus::Pending,
        date: TimeStamp::new(),
        approval_path: ApprovalPath::from_steps(steps),
    })
}

impl SlotRequest {
    fn require_pending(&self, action: &'static str) -> Result<(), KasbonError> {
        if self.status == SlotStatus::Pending {
            Ok(())
        } else {
            Err(KasbonError::invalid_state(action, self.status))
        }
    }

    /// The quota must still be the one the request was opened against.
    fn require_current_quota(&self, policies: &DepartmentPolicies) -> Result<(), KasbonError> {
        let quota = policies.effective(&self.department).max_slots;
        if quota == self.current_slots {
            Ok(())
        } else {
            Err(KasbonError::InvalidStateTransition {
                action: "approve stale slot request",
                state: format!("quota {quota}, opened at {}", self.current_slots),
            })
        }
    }

    /// Approve the current step. On the final step the department quota in
    /// `policies` is raised and the SLOT activity entry is returned; the caller
    /// persists the request and the policies together.
    pub fn approve_step(
        &mut self,
        step_index: usize,
        policies: &mut DepartmentPolicies,
        actor: &str,
    ) -> Result<Option<ActivityEntry>, KasbonError> {
        self.require_pending("approve slot request")?;
        self.require_current_quota(policies)?;

        let mut path = self.approval_path.clone();
        if let PathProgress::Advanced { .. } = path.approve(step_index)? {
            self.approval_path = path;
            return Ok(None);
        }

        policies.set_max_slots(&self.department, self.requested_slots)?;
        self.approval_path = path;
        self.status = SlotStatus::Approved;

        Ok(Some(ActivityEntry::new(
            actor,
            "Approved Slot Exception",
            format!(
                "Dept: {} | {} -> {} Slots",
                self.department, self.current_slots, self.requested_slots
            ),
            ActivityType::Slot,
        )))
    }

    pub fn reject_step(
        &mut self,
        step_index: usize,
        actor: &str,
    ) -> Result<ActivityEntry, KasbonError> {
        self.require_pending("reject slot request")?;

        self.approval_path.reject(step_index)?;
        self.status = SlotStatus::Rejected;

        Ok(ActivityEntry::new(
            actor,
            "Rejected Slot Exception",
            format!("Request {} by {} was rejected", self.id, self.requestor),
            ActivityType::Slot,
        ))
    }
}
