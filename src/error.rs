//! Error taxonomy for the routing engine and request lifecycle

/// Malformed input handed to the core. Never corrected silently.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Requested amount must be greater than zero")]
    ZeroAmount,
    #[error("A kasbon needs at least one item")]
    EmptyItems,
    #[error("Item {index} has an empty description")]
    EmptyItemDescription { index: usize },
    #[error("Item {index} has a zero amount")]
    ZeroItemAmount { index: usize },
    #[error("Requested amount {amount} does not match the item total {items_total}")]
    AmountMismatch { amount: u64, items_total: u64 },
    #[error("Over-slot request (slot {slot} of {max_slots}) requires a justification")]
    MissingSlotJustification { slot: u32, max_slots: u32 },
    #[error("Slot exception must raise the quota by exactly one ({current} -> {requested})")]
    InvalidSlotDelta { current: u32, requested: u32 },
    #[error("Slot exception request requires a reason")]
    EmptySlotReason,
    #[error("Realization requires at least one item")]
    EmptyRealization,
    #[error("Revocation requires a reason")]
    EmptyRevokeReason,
    #[error("Matrix tier {id} has min {min} greater than max {max}")]
    InvertedTier { id: String, min: u64, max: u64 },
    #[error("Matrix tier {id} has no layers")]
    EmptyTierLayers { id: String },
    #[error("Layer list must not be empty")]
    EmptyLayerList,
    #[error("Department setting {dept_id} must allow at least one slot")]
    ZeroMaxSlots { dept_id: String },
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum KasbonError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Cannot {action} while in state {state}")]
    InvalidStateTransition { action: &'static str, state: String },
    #[error("Step {requested} is not the current step (current: {current})")]
    NotCurrentStep { requested: usize, current: usize },
    #[error("No matrix tier covers amount {amount}")]
    ConfigurationGap { amount: u64 },
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
}

impl KasbonError {
    pub fn invalid_state(action: &'static str, state: impl std::fmt::Debug) -> Self {
        Self::InvalidStateTransition {
            action,
            state: format!("{state:?}"),
        }
    }

    /// True for both flavours of refused transition.
    pub fn is_invalid_transition(&self) -> bool {
        matches!(
            self,
            Self::InvalidStateTransition { .. } | Self::NotCurrentStep { .. }
        )
    }
}
