//! Runtime configuration: TOML file, then `KASBON_*` environment overrides
use super::builder::{
    DEFAULT_FINANCE_LAYER, DEFAULT_FINANCE_THRESHOLD, DEFAULT_SLOT_APPROVAL_SUFFIX, PathRules,
    TierFallback,
};
use super::matrix::{MatrixConfig, MatrixSet};
use super::policy::{DepartmentPolicies, DeptSetting};
use super::resolver::{DEPT_HEAD_LAYER, DIV_HEAD_LAYER, OrgChartResolver, REQUESTOR_LAYER};
use super::slot_request::validate_slot_layers;
use super::types::Amount;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "kasbon.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KasbonConfig {
    pub storage: StorageConfig,
    pub routing: RoutingConfig,
    pub slots: SlotConfig,
    pub teams: BTreeMap<String, String>,
    pub matrix: Vec<TierConfig>,
    pub departments: Vec<DepartmentConfig>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub finance_threshold: Amount,
    pub finance_layer: String,
    pub tier_fallback: TierFallback,
    pub slot_approval_suffix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotConfig {
    pub default_max_slots: u32,
    pub default_outstanding_limit: Amount,
    pub exception_layers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    pub id: String,
    pub min_amount: Amount,
    pub max_amount: Option<Amount>,
    pub layers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartmentConfig {
    pub dept_id: String,
    pub dept_name: String,
    pub max_slots: u32,
    #[serde(default)]
    pub outstanding_limit: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("kasbon.db"),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            finance_threshold: DEFAULT_FINANCE_THRESHOLD,
            finance_layer: DEFAULT_FINANCE_LAYER.to_string(),
            tier_fallback: TierFallback::Reject,
            slot_approval_suffix: DEFAULT_SLOT_APPROVAL_SUFFIX.to_string(),
        }
    }
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            default_max_slots: 2,
            default_outstanding_limit: 0,
            exception_layers: vec![DEPT_HEAD_LAYER.to_string()],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

fn tier(id: &str, min: Amount, max: Option<Amount>, layers: &[&str]) -> TierConfig {
    TierConfig {
        id: id.to_string(),
        min_amount: min,
        max_amount: max,
        layers: layers.iter().map(|l| l.to_string()).collect(),
    }
}

impl Default for KasbonConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            routing: RoutingConfig::default(),
            slots: SlotConfig::default(),
            teams: BTreeMap::from([
                (DEFAULT_FINANCE_LAYER.to_string(), "Admin Finance".to_string()),
                ("COO".to_string(), "COO".to_string()),
            ]),
            matrix: vec![
                tier("1", 1, Some(2_000_000), &[REQUESTOR_LAYER, DEPT_HEAD_LAYER]),
                tier(
                    "2",
                    2_000_001,
                    Some(5_000_000),
                    &[REQUESTOR_LAYER, DEPT_HEAD_LAYER, DIV_HEAD_LAYER],
                ),
                tier(
                    "3",
                    5_000_001,
                    Some(10_000_000),
                    &[REQUESTOR_LAYER, DEPT_HEAD_LAYER, DIV_HEAD_LAYER, "COO"],
                ),
                tier(
                    "4",
                    10_000_001,
                    None,
                    &[
                        REQUESTOR_LAYER,
                        DEPT_HEAD_LAYER,
                        DIV_HEAD_LAYER,
                        "COO",
                        DEFAULT_FINANCE_LAYER,
                    ],
                ),
            ],
            departments: vec![],
            logging: LoggingConfig::default(),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl KasbonConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        let mut config = match maybe_path {
            Some(path) => read_file(&path)?,
            None if options.require_file => {
                let expected = options
                    .config_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
                return Err(ConfigError::MissingConfigFile(expected));
            }
            None => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|source| ConfigError::ParseFile {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// `lookup` stands in for the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(value) = read("KASBON_DB_PATH") {
            self.storage.path = PathBuf::from(value);
        }
        if let Some(value) = read("KASBON_LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = read("KASBON_LOG_FORMAT") {
            self.logging.format = value.parse()?;
        }
        if let Some(value) = read("KASBON_FINANCE_THRESHOLD") {
            self.routing.finance_threshold =
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidEnvOverride {
                        key: "KASBON_FINANCE_THRESHOLD".to_string(),
                        value,
                    })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slots.default_max_slots == 0 {
            return Err(ConfigError::Validation(
                "slots.default_max_slots must be at least 1".to_string(),
            ));
        }
        if self.routing.finance_layer.trim().is_empty() {
            return Err(ConfigError::Validation(
                "routing.finance_layer must not be empty".to_string(),
            ));
        }
        validate_slot_layers(&self.slots.exception_layers)
            .map_err(|e| ConfigError::Validation(format!("slots.exception_layers: {e}")))?;
        self.matrix_set()?;
        self.department_policies()?;
        Ok(())
    }

    pub fn path_rules(&self) -> PathRules {
        PathRules {
            finance_threshold: self.routing.finance_threshold,
            finance_layer: self.routing.finance_layer.clone(),
            tier_fallback: self.routing.tier_fallback,
            slot_approval_suffix: self.routing.slot_approval_suffix.clone(),
        }
    }

    pub fn matrix_set(&self) -> Result<MatrixSet, ConfigError> {
        let tiers = self
            .matrix
            .iter()
            .map(|t| MatrixConfig {
                id: t.id.clone(),
                min_amount: t.min_amount,
                max_amount: t.max_amount,
                layers: t.layers.clone(),
            })
            .collect();
        MatrixSet::new(tiers).map_err(|e| ConfigError::Validation(format!("matrix: {e}")))
    }

    pub fn department_policies(&self) -> Result<DepartmentPolicies, ConfigError> {
        let mut policies = DepartmentPolicies::new(
            self.slots.default_max_slots,
            self.slots.default_outstanding_limit,
        );
        for dept in &self.departments {
            policies
                .upsert(DeptSetting::new(
                    dept.dept_id.clone(),
                    dept.dept_name.clone(),
                    dept.max_slots,
                    dept.outstanding_limit,
                ))
                .map_err(|e| ConfigError::Validation(format!("departments: {e}")))?;
        }
        Ok(policies)
    }

    pub fn resolver(&self) -> OrgChartResolver {
        OrgChartResolver::new(self.teams.clone())
    }
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }
    if let Ok(path) = std::env::var("KASBON_CONFIG") {
        let path = PathBuf::from(path);
        return path.exists().then_some(path);
    }
    let default = PathBuf::from(DEFAULT_CONFIG_FILE);
    default.exists().then_some(default)
}

fn read_file(path: &Path) -> Result<KasbonConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::ParseFile {
        path: path.to_path_buf(),
        source,
    })
}
