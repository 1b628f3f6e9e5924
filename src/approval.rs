//! Ordered approval steps and their progression
use super::error::KasbonError;
use super::types::TimeStamp;
use chrono::Utc;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
    #[n(3)]
    Skipped,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ApprovalStep {
    #[n(0)]
    pub approver_name: String,
    #[n(1)]
    pub role: String, // display label, may carry an annotation
    #[n(2)]
    pub status: StepStatus,
    #[n(3)]
    pub step_order: u32, // 1-based
    #[n(4)]
    pub approved_at: Option<TimeStamp<Utc>>,
}

/// A materialised chain. Built once, then mutated one step at a time.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct ApprovalPath {
    #[n(0)]
    steps: Vec<ApprovalStep>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathProgress {
    Advanced { next: usize },
    Completed,
}

impl ApprovalStep {
    pub fn pending(approver_name: String, role: String, step_order: u32) -> Self {
        Self {
            approver_name,
            role,
            status: StepStatus::Pending,
            step_order,
            approved_at: None,
        }
    }

    pub fn pre_approved(approver_name: String, role: String, step_order: u32) -> Self {
        Self {
            approver_name,
            role,
            status: StepStatus::Approved,
            step_order,
            approved_at: Some(TimeStamp::new()),
        }
    }
}

impl ApprovalPath {
    pub fn from_steps(steps: Vec<ApprovalStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[ApprovalStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Count of leading approved steps; equals `len()` once everything is signed off.
    pub fn current_step_index(&self) -> usize {
        self.steps
            .iter()
            .take_while(|s| s.status == StepStatus::Approved)
            .count()
    }

    pub fn current_step(&self) -> Option<&ApprovalStep> {
        self.steps.get(self.current_step_index())
    }

    pub fn is_complete(&self) -> bool {
        self.current_step_index() == self.steps.len()
    }

    pub fn is_rejected(&self) -> bool {
        self.steps.iter().any(|s| s.status == StepStatus::Rejected)
    }

    fn check_actionable(&self, action: &'static str, index: usize) -> Result<(), KasbonError> {
        if self.is_rejected() {
            return Err(KasbonError::invalid_state(action, StepStatus::Rejected));
        }
        let current = self.current_step_index();
        if current == self.steps.len() {
            return Err(KasbonError::InvalidStateTransition {
                action,
                state: "path complete".into(),
            });
        }
        if index != current {
            return Err(KasbonError::NotCurrentStep {
                requested: index,
                current,
            });
        }
        Ok(())
    }

    /// Sign off the step at `index`, which must be the current one.
    pub fn approve(&mut self, index: usize) -> Result<PathProgress, KasbonError> {
        self.check_actionable("approve step", index)?;

        let step = &mut self.steps[index];
        step.status = StepStatus::Approved;
        step.approved_at = Some(TimeStamp::new());

        if self.is_complete() {
            Ok(PathProgress::Completed)
        } else {
            Ok(PathProgress::Advanced {
                next: self.current_step_index(),
            })
        }
    }

    /// Refuse the step at `index`. Later steps are left untouched.
    pub fn reject(&mut self, index: usize) -> Result<(), KasbonError> {
        self.check_actionable("reject step", index)?;
        self.steps[index].status = StepStatus::Rejected;
        Ok(())
    }

    pub fn pending_for(&self, approver_name: &str) -> bool {
        !self.is_rejected()
            && self
                .current_step()
                .is_some_and(|s| s.approver_name == approver_name)
    }
}
