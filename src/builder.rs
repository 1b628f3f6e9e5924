//! Approval path construction from the amount matrix
//!
//! Building a path is a pure computation over the matrix snapshot and the
//! requester context; callers may invoke it on every draft edit for preview.
//! The only non-determinism is the sign-off timestamp on the `Requestor` step.
use super::approval::{ApprovalPath, ApprovalStep};
use super::error::KasbonError;
use super::matrix::{MatrixConfig, MatrixSet};
use super::resolver::{ApproverResolver, DEPT_HEAD_LAYER, REQUESTOR_LAYER, RequesterContext};
use super::types::Amount;
use tracing::{debug, warn};

pub const DEFAULT_FINANCE_THRESHOLD: Amount = 10_000_000;
pub const DEFAULT_FINANCE_LAYER: &str = "Finance";
pub const DEFAULT_SLOT_APPROVAL_SUFFIX: &str = " (Slot Approval)";

/// What to do when no tier covers the amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierFallback {
    /// Surface a `ConfigurationGap`.
    #[default]
    Reject,
    /// Route through the first configured tier.
    FirstTier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRules {
    /// Amounts strictly above this always end with a finance review.
    pub finance_threshold: Amount,
    pub finance_layer: String,
    pub tier_fallback: TierFallback,
    pub slot_approval_suffix: String,
}

impl Default for PathRules {
    fn default() -> Self {
        Self {
            finance_threshold: DEFAULT_FINANCE_THRESHOLD,
            finance_layer: DEFAULT_FINANCE_LAYER.to_string(),
            tier_fallback: TierFallback::Reject,
            slot_approval_suffix: DEFAULT_SLOT_APPROVAL_SUFFIX.to_string(),
        }
    }
}

impl PathRules {
    pub fn is_finance_layer(&self, layer: &str) -> bool {
        layer.trim().eq_ignore_ascii_case(self.finance_layer.trim())
    }
}

fn select_tier<'m>(
    amount: Amount,
    matrix: &'m MatrixSet,
    rules: &PathRules,
) -> Result<&'m MatrixConfig, KasbonError> {
    if let Some(tier) = matrix.select(amount) {
        debug!(amount, tier = %tier.id, "matrix tier selected");
        return Ok(tier);
    }

    match (rules.tier_fallback, matrix.first()) {
        (TierFallback::FirstTier, Some(first)) => {
            warn!(
                event_name = "kasbon.routing.tier_fallback",
                amount,
                tier = %first.id,
                "no matrix tier covers amount, falling back to first tier"
            );
            Ok(first)
        }
        _ => Err(KasbonError::ConfigurationGap { amount }),
    }
}

/// Turn layer labels into steps. Blank labels are dropped and `step_order`
/// counts emitted steps only, so the sequence is always `1..=n`.
pub fn materialize_layers<R, F>(
    layers: &[String],
    requester: &RequesterContext,
    resolver: &R,
    mut role_label: F,
) -> Vec<ApprovalStep>
where
    R: ApproverResolver + ?Sized,
    F: FnMut(&str) -> String,
{
    let mut steps: Vec<ApprovalStep> = Vec::with_capacity(layers.len() + 1);

    for layer in layers.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
        let step_order = steps.len() as u32 + 1;
        let approver = resolver.resolve_approver(layer, requester);
        let role = role_label(layer);

        let step = if layer == REQUESTOR_LAYER {
            ApprovalStep::pre_approved(approver, role, step_order)
        } else {
            ApprovalStep::pending(approver, role, step_order)
        };
        steps.push(step);
    }
    steps
}

pub fn build_approval_path<R>(
    amount: Amount,
    is_over_slot_exception: bool,
    matrix: &MatrixSet,
    requester: &RequesterContext,
    resolver: &R,
    rules: &PathRules,
) -> Result<ApprovalPath, KasbonError>
where
    R: ApproverResolver + ?Sized,
{
    let tier = select_tier(amount, matrix, rules)?;

    let mut steps = materialize_layers(&tier.layers, requester, resolver, |layer| {
        if is_over_slot_exception && layer == DEPT_HEAD_LAYER {
            format!("{layer}{}", rules.slot_approval_suffix)
        } else {
            layer.to_string()
        }
    });

    let has_finance = tier.layers.iter().any(|l| rules.is_finance_layer(l));
    if amount > rules.finance_threshold && !has_finance {
        debug!(
            amount,
            tier = %tier.id,
            "tier lacks finance review above threshold, appending one"
        );
        let finance = rules.finance_layer.clone();
        steps.push(ApprovalStep::pending(
            resolver.resolve_approver(&finance, requester),
            finance,
            steps.len() as u32 + 1,
        ));
    }

    Ok(ApprovalPath::from_steps(steps))
}
