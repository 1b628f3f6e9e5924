//! Amount-tier approval matrix
use super::error::{KasbonError, ValidationError};
use super::types::Amount;

/// One amount tier and the layers that must sign off on it.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct MatrixConfig {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub min_amount: Amount,
    #[n(2)]
    pub max_amount: Option<Amount>, // None = unbounded
    #[n(3)]
    pub layers: Vec<String>,
}

/// Ordered tier set. Order matters: selection takes the first match.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct MatrixSet {
    #[n(0)]
    tiers: Vec<MatrixConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverageIssue {
    /// Amounts in `from..=to` (or `from..` when `to` is None) match no tier.
    Gap { from: Amount, to: Option<Amount> },
    /// Two tiers both claim some amount; the earlier one in the set wins.
    Overlap { lower: String, upper: String },
}

impl MatrixConfig {
    pub fn new(
        id: impl Into<String>,
        min_amount: Amount,
        max_amount: Option<Amount>,
        layers: &[&str],
    ) -> Self {
        Self {
            id: id.into(),
            min_amount,
            max_amount,
            layers: layers.iter().map(|l| l.to_string()).collect(),
        }
    }

    pub fn covers(&self, amount: Amount) -> bool {
        amount >= self.min_amount && self.max_amount.is_none_or(|max| amount <= max)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(max) = self.max_amount {
            if self.min_amount > max {
                return Err(ValidationError::InvertedTier {
                    id: self.id.clone(),
                    min: self.min_amount,
                    max,
                });
            }
        }
        if self.layers.iter().all(|l| l.trim().is_empty()) {
            return Err(ValidationError::EmptyTierLayers {
                id: self.id.clone(),
            });
        }
        Ok(())
    }
}

impl MatrixSet {
    pub fn new(tiers: Vec<MatrixConfig>) -> Result<Self, ValidationError> {
        for tier in &tiers {
            tier.validate()?;
        }
        Ok(Self { tiers })
    }

    pub fn tiers(&self) -> &[MatrixConfig] {
        &self.tiers
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// First tier whose range contains `amount`. Boundaries are inclusive on both ends.
    pub fn select(&self, amount: Amount) -> Option<&MatrixConfig> {
        self.tiers.iter().find(|tier| tier.covers(amount))
    }

    pub fn first(&self) -> Option<&MatrixConfig> {
        self.tiers.first()
    }

    /// Replace the tier carrying the same id, keeping its position.
    pub fn replace_tier(&mut self, tier: MatrixConfig) -> Result<(), KasbonError> {
        tier.validate()?;
        let slot = self
            .tiers
            .iter_mut()
            .find(|t| t.id == tier.id)
            .ok_or_else(|| KasbonError::NotFound {
                kind: "matrix tier",
                id: tier.id.clone(),
            })?;
        *slot = tier;
        Ok(())
    }

    /// Holes and overlaps in the tier ranges, starting from 1.
    /// Coverage starts at 1. Submission and preview both refuse a zero total
    /// before a tier is looked up.
    pub fn coverage_gaps(&self) -> Vec<CoverageIssue> {
        let mut sorted: Vec<&MatrixConfig> = self.tiers.iter().collect();
        sorted.sort_by_key(|t| t.min_amount);

        let mut issues = vec![];
        let mut next_uncovered: Option<Amount> = Some(1);
        let mut previous: Option<&MatrixConfig> = None;

        for tier in sorted {
            match next_uncovered {
                Some(expected) if tier.min_amount > expected => issues.push(CoverageIssue::Gap {
                    from: expected,
                    to: Some(tier.min_amount - 1),
                }),
                Some(expected) if tier.min_amount < expected => {
                    if let Some(prev) = previous {
                        issues.push(CoverageIssue::Overlap {
                            lower: prev.id.clone(),
                            upper: tier.id.clone(),
                        });
                    }
                }
                None => {
                    if let Some(prev) = previous {
                        issues.push(CoverageIssue::Overlap {
                            lower: prev.id.clone(),
                            upper: tier.id.clone(),
                        });
                    }
                }
                _ => {}
            }

            let tier_end = tier.max_amount.map(|max| max.saturating_add(1));
            next_uncovered = match (next_uncovered, tier_end) {
                (None, _) | (_, None) => None,
                (Some(a), Some(b)) => Some(a.max(b)),
            };
            previous = Some(tier);
        }

        if let Some(from) = next_uncovered {
            issues.push(CoverageIssue::Gap { from, to: None });
        }
        issues
    }

    /// sha256 of the CBOR encoding; identifies the snapshot a chain was built from.
    pub fn digest(&self) -> anyhow::Result<String> {
        let contents = minicbor::to_vec(self)?;
        Ok(sha256::digest(&contents))
    }
}
