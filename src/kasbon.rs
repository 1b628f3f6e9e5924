//! Kasbon request records and the draft used to compose them
use super::approval::ApprovalPath;
use super::error::ValidationError;
use super::types::{Amount, TimeStamp};
use chrono::Utc;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KasbonStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
    #[n(3)]
    Disbursed,
    #[n(4)]
    Settled,
    #[n(5)]
    Revoked,
}

impl KasbonStatus {
    /// Terminal requests no longer occupy a slot.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Settled | Self::Revoked)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KasbonType {
    #[n(0)]
    Regular,
    #[n(1)]
    OverSlot,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct KasbonItem {
    #[n(0)]
    pub description: String,
    #[n(1)]
    pub amount: Amount,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Realization {
    #[n(0)]
    pub items: Vec<KasbonItem>,
    #[n(1)]
    pub total: Amount,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct KasbonRequest {
    #[n(0)]
    pub id: String, // bech32 encoded uuid7
    #[n(1)]
    pub requestor: String,
    #[n(2)]
    pub department: String,
    #[n(3)]
    pub amount: Amount,
    #[n(4)]
    pub date: TimeStamp<Utc>,
    #[n(5)]
    pub date_needed: TimeStamp<Utc>,
    #[n(6)]
    pub bank_name: String,
    #[n(7)]
    pub bank_account: String,
    #[n(8)]
    pub status: KasbonStatus,
    #[n(9)]
    pub is_overdue: bool,
    #[n(10)]
    pub slot: u32, // requester's active-request ordinal at submission
    #[n(11)]
    pub purpose: String,
    #[n(12)]
    pub items: Vec<KasbonItem>,
    #[n(13)]
    pub kasbon_type: KasbonType,
    #[n(14)]
    pub approval_path: ApprovalPath,
    #[n(15)]
    pub realization: Option<Realization>,
    #[n(16)]
    pub slot_justification: Option<String>,
    #[n(17)]
    pub revoke_reason: Option<String>,
    #[n(18)]
    pub matrix_digest: Option<String>,
}

impl KasbonRequest {
    pub fn current_step_index(&self) -> usize {
        self.approval_path.current_step_index()
    }

    /// Settled is the only realized state.
    pub fn is_realized(&self) -> bool {
        self.status == KasbonStatus::Settled
    }

    pub fn realization_total(&self) -> Option<Amount> {
        self.realization.as_ref().map(|r| r.total)
    }

    /// Advance minus actual spend. Positive: cash to return; negative: to reimburse.
    pub fn settlement_balance(&self) -> Option<i128> {
        self.realization_total()
            .map(|spent| self.amount as i128 - spent as i128)
    }
}

/// Draft composed by the requester before submission.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KasbonDraft {
    amount: Option<Amount>,
    date_needed: Option<TimeStamp<Utc>>,
    bank_name: Option<String>,
    bank_account: Option<String>,
    purpose: Option<String>,
    items: Vec<KasbonItem>,
    slot_justification: Option<String>,
}

/// A draft that passed validation; `amount` equals the item total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidDraft {
    pub amount: Amount,
    pub date_needed: TimeStamp<Utc>,
    pub bank_name: String,
    pub bank_account: String,
    pub purpose: String,
    pub items: Vec<KasbonItem>,
    pub slot_justification: Option<String>,
}

pub(crate) fn validate_items(items: &[KasbonItem]) -> Result<Amount, ValidationError> {
    let mut total: Amount = 0;
    for (index, item) in items.iter().enumerate() {
        if item.description.trim().is_empty() {
            return Err(ValidationError::EmptyItemDescription { index });
        }
        if item.amount == 0 {
            return Err(ValidationError::ZeroItemAmount { index });
        }
        total = total.saturating_add(item.amount);
    }
    Ok(total)
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl KasbonDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_amount(mut self, amount: Amount) -> Self {
        self.amount = Some(amount);
        self
    }
    pub fn set_date_needed(mut self, date: TimeStamp<Utc>) -> Self {
        self.date_needed = Some(date);
        self
    }
    pub fn set_bank(mut self, bank_name: &str, bank_account: &str) -> Self {
        self.bank_name = Some(bank_name.to_string());
        self.bank_account = Some(bank_account.to_string());
        self
    }
    pub fn set_purpose(mut self, purpose: &str) -> Self {
        self.purpose = Some(purpose.to_string());
        self
    }
    pub fn add_item(mut self, description: &str, amount: Amount) -> Self {
        self.items.push(KasbonItem {
            description: description.to_string(),
            amount,
        });
        self
    }
    pub fn set_slot_justification(mut self, justification: &str) -> Self {
        self.slot_justification = Some(justification.to_string());
        self
    }

    pub fn has_slot_justification(&self) -> bool {
        non_blank(&self.slot_justification).is_some()
    }

    /// Sum of the item amounts; the figure a preview should route on.
    pub fn items_total(&self) -> Amount {
        self.items
            .iter()
            .fold(0, |acc: Amount, item| acc.saturating_add(item.amount))
    }

    /// The item total, refused when there is nothing yet to route.
    pub fn routable_amount(&self) -> Result<Amount, ValidationError> {
        if self.items.is_empty() {
            return Err(ValidationError::EmptyItems);
        }
        match self.items_total() {
            0 => Err(ValidationError::ZeroAmount),
            total => Ok(total),
        }
    }

    pub fn validate(&self) -> Result<ValidDraft, ValidationError> {
        if self.items.is_empty() {
            return Err(ValidationError::EmptyItems);
        }
        let items_total = validate_items(&self.items)?;
        let amount = self.amount.unwrap_or(items_total);
        if amount == 0 {
            return Err(ValidationError::ZeroAmount);
        }
        if amount != items_total {
            return Err(ValidationError::AmountMismatch {
                amount,
                items_total,
            });
        }

        let purpose = non_blank(&self.purpose).ok_or(ValidationError::MissingField("purpose"))?;
        let bank_account =
            non_blank(&self.bank_account).ok_or(ValidationError::MissingField("bank_account"))?;
        let date_needed = self
            .date_needed
            .clone()
            .ok_or(ValidationError::MissingField("date_needed"))?;

        Ok(ValidDraft {
            amount,
            date_needed,
            bank_name: non_blank(&self.bank_name).unwrap_or_default(),
            bank_account,
            purpose,
            items: self.items.clone(),
            slot_justification: non_blank(&self.slot_justification),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> KasbonDraft {
        KasbonDraft::new()
            .set_purpose("Beli Server Part")
            .set_bank("BCA", "1234567890")
            .set_date_needed(TimeStamp::new())
            .add_item("Sparepart urgent AC", 1_500_000)
            .add_item("Transport teknisi", 500_000)
    }

    #[test]
    fn amount_defaults_to_item_total() {
        let valid = draft().validate().unwrap();
        assert_eq!(valid.amount, 2_000_000);
        assert_eq!(valid.items.len(), 2);
    }

    #[test]
    fn explicit_amount_must_match_items() {
        let err = draft().set_amount(2_500_000).validate().unwrap_err();
        assert_eq!(
            err,
            ValidationError::AmountMismatch {
                amount: 2_500_000,
                items_total: 2_000_000
            }
        );
    }

    #[test]
    fn empty_items_are_rejected() {
        let err = KasbonDraft::new()
            .set_purpose("x")
            .set_bank("BCA", "1")
            .set_date_needed(TimeStamp::new())
            .validate()
            .unwrap_err();
        assert_eq!(err, ValidationError::EmptyItems);
    }

    #[test]
    fn unfinished_draft_has_nothing_to_route() {
        assert_eq!(
            KasbonDraft::new().routable_amount(),
            Err(ValidationError::EmptyItems)
        );
        assert_eq!(
            KasbonDraft::new().add_item("Parkir", 0).routable_amount(),
            Err(ValidationError::ZeroAmount)
        );
        assert_eq!(draft().routable_amount(), Ok(2_000_000));
    }

    #[test]
    fn zero_amount_items_are_rejected() {
        let err = draft().add_item("Parkir", 0).validate().unwrap_err();
        assert_eq!(err, ValidationError::ZeroItemAmount { index: 2 });
    }

    #[test]
    fn blank_justification_counts_as_missing() {
        let d = draft().set_slot_justification("   ");
        assert!(!d.has_slot_justification());
        assert_eq!(d.validate().unwrap().slot_justification, None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(KasbonStatus::Rejected.is_terminal());
        assert!(KasbonStatus::Settled.is_terminal());
        assert!(KasbonStatus::Revoked.is_terminal());
        assert!(!KasbonStatus::Pending.is_terminal());
        assert!(!KasbonStatus::Approved.is_terminal());
        assert!(!KasbonStatus::Disbursed.is_terminal());
    }
}
