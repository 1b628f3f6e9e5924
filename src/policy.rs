//! Per-department slot quota and outstanding limit
use super::error::{KasbonError, ValidationError};
use super::types::Amount;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct DeptSetting {
    #[n(0)]
    pub dept_id: String,
    #[n(1)]
    pub dept_name: String,
    #[n(2)]
    pub max_slots: u32,
    #[n(3)]
    pub outstanding_limit: Amount, // 0 = no limit
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct DepartmentPolicies {
    #[n(0)]
    settings: Vec<DeptSetting>,
    #[n(1)]
    default_max_slots: u32,
    #[n(2)]
    default_outstanding_limit: Amount,
}

impl DeptSetting {
    pub fn new(
        dept_id: impl Into<String>,
        dept_name: impl Into<String>,
        max_slots: u32,
        outstanding_limit: Amount,
    ) -> Self {
        Self {
            dept_id: dept_id.into(),
            dept_name: dept_name.into(),
            max_slots,
            outstanding_limit,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.dept_id.trim().is_empty() {
            return Err(ValidationError::MissingField("dept_id"));
        }
        if self.max_slots == 0 {
            return Err(ValidationError::ZeroMaxSlots {
                dept_id: self.dept_id.clone(),
            });
        }
        Ok(())
    }

    pub fn exceeds_outstanding_limit(&self, outstanding: Amount) -> bool {
        self.outstanding_limit > 0 && outstanding > self.outstanding_limit
    }
}

impl DepartmentPolicies {
    pub fn new(default_max_slots: u32, default_outstanding_limit: Amount) -> Self {
        Self {
            settings: vec![],
            default_max_slots: default_max_slots.max(1),
            default_outstanding_limit,
        }
    }

    pub fn settings(&self) -> &[DeptSetting] {
        &self.settings
    }

    pub fn by_id(&self, dept_id: &str) -> Option<&DeptSetting> {
        self.settings.iter().find(|s| s.dept_id == dept_id)
    }

    pub fn by_name(&self, dept_name: &str) -> Option<&DeptSetting> {
        self.settings.iter().find(|s| s.dept_name == dept_name)
    }

    /// The department's setting, or the configured defaults for unlisted departments.
    pub fn effective(&self, dept_name: &str) -> DeptSetting {
        self.by_name(dept_name).cloned().unwrap_or_else(|| {
            DeptSetting::new(
                dept_name,
                dept_name,
                self.default_max_slots,
                self.default_outstanding_limit,
            )
        })
    }

    /// Insert or replace by `dept_id`.
    pub fn upsert(&mut self, setting: DeptSetting) -> Result<(), ValidationError> {
        setting.validate()?;
        match self.settings.iter_mut().find(|s| s.dept_id == setting.dept_id) {
            Some(existing) => *existing = setting,
            None => self.settings.push(setting),
        }
        Ok(())
    }

    /// Raise (or set) a department's quota; unlisted departments are materialised from defaults.
    pub fn set_max_slots(&mut self, dept_name: &str, max_slots: u32) -> Result<(), KasbonError> {
        let mut setting = self.effective(dept_name);
        setting.max_slots = max_slots;
        self.upsert(setting)?;
        Ok(())
    }
}
