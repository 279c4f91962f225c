//! lightwatch.toml configuration parser.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

static REGION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]{2}(-[a-z]+)+-\d$").expect("static regex"));
static ACCOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{12}$").expect("static regex"));
static STACK_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]{0,127}$").expect("static regex"));
static MODULE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("static regex"));
static SECRET_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9/_+=.@-]{1,512}$").expect("static regex"));
static PARAMETER_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-/]{1,2048}$").expect("static regex"));
static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]{0,62}$").expect("static regex"));

/// Root of `lightwatch.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightwatchConfig {
    pub stack: StackConfig,
    #[serde(default)]
    pub templates: BTreeMap<String, TemplateConfig>,
    #[serde(default)]
    pub data_collection: DataCollectionConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    pub name: String,
    pub region: String,
    pub account: String,
    /// Directory holding one build context per function module.
    #[serde(default = "default_module_root")]
    pub module_root: PathBuf,
}

/// Per-deployment template: the light bridge it talks to and the
/// function modules it ships.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub hue_address: String,
    pub hue_api_key: String,
    pub light_group: String,
    pub lambda_functions: LambdaFunctions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LambdaFunctions {
    pub model_generator_fn_module_name: String,
    pub temperature_cycle_fn_module_name: String,
    pub updater_fn_module_name: String,
    /// Data collection is only assembled when a writer module is named.
    pub db_writer_fn_module_name: Option<String>,
}

/// Knobs for the data-collection graph. Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataCollectionConfig {
    pub initializer_module: String,
    pub secret_name: String,
    pub parameter_name: String,
    pub db_username: String,
    pub db_port: u16,
    pub backup_retention_days: u32,
    pub allocated_storage_gib: u32,
    pub max_allocated_storage_gib: u32,
    pub nat_gateways: u32,
    pub subnet_cidr_mask: u8,
    pub bootstrap_identity: String,
    pub bootstrap_timeout_secs: u64,
    pub provider_log_retention_days: u32,
}

impl Default for DataCollectionConfig {
    fn default() -> Self {
        Self {
            initializer_module: "dbInitializerFn".to_string(),
            secret_name: "usage-db-credentials".to_string(),
            parameter_name: "usage-credentials-arn".to_string(),
            db_username: "postgres".to_string(),
            db_port: 54600,
            backup_retention_days: 2,
            allocated_storage_gib: 20,
            max_allocated_storage_gib: 20,
            nat_gateways: 1,
            subnet_cidr_mask: 24,
            bootstrap_identity: "invocation upon creation".to_string(),
            bootstrap_timeout_secs: 300,
            provider_log_retention_days: 1,
        }
    }
}

/// Optional wiring of the failure notification channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Let the writer publish to the failure topic.
    pub writer_failures: bool,
}

fn default_module_root() -> PathBuf {
    PathBuf::from("lambda")
}

impl LightwatchConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        debug!(?path, templates = config.templates.len(), "config loaded");
        Ok(config)
    }

    /// Parse and validate a config document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: LightwatchConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Look up a template by name.
    pub fn template(&self, name: &str) -> Result<&TemplateConfig, ConfigError> {
        self.templates
            .get(name)
            .ok_or_else(|| ConfigError::UnknownTemplate(name.to_string()))
    }

    /// Check every field that would otherwise only fail at provisioning time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.stack.validate()?;
        for (name, template) in &self.templates {
            template.validate(name)?;
        }
        self.data_collection.validate()
    }

    /// Scaffold a minimal lightwatch.toml with one template.
    pub fn scaffold(stack_name: &str, template: &str) -> Self {
        let mut templates = BTreeMap::new();
        templates.insert(
            template.to_string(),
            TemplateConfig {
                hue_address: "192.168.1.2".to_string(),
                hue_api_key: "replace-me".to_string(),
                light_group: "1".to_string(),
                lambda_functions: LambdaFunctions {
                    model_generator_fn_module_name: "modelGeneratorFn".to_string(),
                    temperature_cycle_fn_module_name: "temperatureCycleFn".to_string(),
                    updater_fn_module_name: "updaterFn".to_string(),
                    db_writer_fn_module_name: Some("dbWriterFn".to_string()),
                },
            },
        );
        LightwatchConfig {
            stack: StackConfig {
                name: stack_name.to_string(),
                region: "us-east-1".to_string(),
                account: "123456789012".to_string(),
                module_root: default_module_root(),
            },
            templates,
            data_collection: DataCollectionConfig::default(),
            alerts: AlertsConfig::default(),
        }
    }
}

impl StackConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        require("stack.name", &self.name)?;
        if !STACK_NAME_RE.is_match(&self.name) {
            return Err(ConfigError::invalid(
                "stack.name",
                "must start with a letter and contain only letters, digits and '-'",
            ));
        }
        require("stack.region", &self.region)?;
        if !REGION_RE.is_match(&self.region) {
            return Err(ConfigError::invalid("stack.region", format!("`{}` is not a region", self.region)));
        }
        require("stack.account", &self.account)?;
        if !ACCOUNT_RE.is_match(&self.account) {
            return Err(ConfigError::invalid("stack.account", "must be 12 digits"));
        }
        Ok(())
    }
}

impl TemplateConfig {
    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let field = |f: &str| format!("templates.{name}.{f}");
        require(&field("hue_address"), &self.hue_address)?;
        require(&field("hue_api_key"), &self.hue_api_key)?;
        require(&field("light_group"), &self.light_group)?;

        let fns = &self.lambda_functions;
        let mut modules = vec![
            (
                "lambda_functions.model_generator_fn_module_name",
                fns.model_generator_fn_module_name.as_str(),
            ),
            (
                "lambda_functions.temperature_cycle_fn_module_name",
                fns.temperature_cycle_fn_module_name.as_str(),
            ),
            (
                "lambda_functions.updater_fn_module_name",
                fns.updater_fn_module_name.as_str(),
            ),
        ];
        if let Some(writer) = &fns.db_writer_fn_module_name {
            modules.push(("lambda_functions.db_writer_fn_module_name", writer.as_str()));
        }
        for (f, module) in modules {
            validate_module_name(&field(f), module)?;
        }
        Ok(())
    }

    /// The writer module, if this template collects usage data.
    pub fn writer_module(&self) -> Option<&str> {
        self.lambda_functions.db_writer_fn_module_name.as_deref()
    }
}

impl DataCollectionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        validate_module_name("data_collection.initializer_module", &self.initializer_module)?;

        require("data_collection.secret_name", &self.secret_name)?;
        if !SECRET_NAME_RE.is_match(&self.secret_name) {
            return Err(ConfigError::invalid(
                "data_collection.secret_name",
                "allowed characters are letters, digits and /_+=.@-",
            ));
        }
        require("data_collection.parameter_name", &self.parameter_name)?;
        if !PARAMETER_NAME_RE.is_match(&self.parameter_name) {
            return Err(ConfigError::invalid(
                "data_collection.parameter_name",
                "allowed characters are letters, digits and _.-/",
            ));
        }
        require("data_collection.db_username", &self.db_username)?;
        if !USERNAME_RE.is_match(&self.db_username) {
            return Err(ConfigError::invalid(
                "data_collection.db_username",
                "must start with a letter; letters, digits and '_' only",
            ));
        }
        if self.db_port < 1150 {
            return Err(ConfigError::invalid(
                "data_collection.db_port",
                "must be in 1150..=65535",
            ));
        }
        if self.backup_retention_days > 35 {
            return Err(ConfigError::invalid(
                "data_collection.backup_retention_days",
                "must be at most 35",
            ));
        }
        if self.allocated_storage_gib == 0 {
            return Err(ConfigError::invalid(
                "data_collection.allocated_storage_gib",
                "must be positive",
            ));
        }
        if self.max_allocated_storage_gib < self.allocated_storage_gib {
            return Err(ConfigError::invalid(
                "data_collection.max_allocated_storage_gib",
                format!(
                    "storage ceiling {} GiB is below allocated storage {} GiB",
                    self.max_allocated_storage_gib, self.allocated_storage_gib
                ),
            ));
        }
        if self.nat_gateways == 0 {
            return Err(ConfigError::invalid(
                "data_collection.nat_gateways",
                "the public tier needs at least one NAT gateway",
            ));
        }
        if !(16..=28).contains(&self.subnet_cidr_mask) {
            return Err(ConfigError::invalid(
                "data_collection.subnet_cidr_mask",
                "must be in 16..=28",
            ));
        }
        require("data_collection.bootstrap_identity", &self.bootstrap_identity)?;
        if self.bootstrap_timeout_secs == 0 || self.bootstrap_timeout_secs > 3600 {
            return Err(ConfigError::invalid(
                "data_collection.bootstrap_timeout_secs",
                "must be in 1..=3600",
            ));
        }
        Ok(())
    }
}

fn require(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(field.to_string()));
    }
    Ok(())
}

fn validate_module_name(field: &str, module: &str) -> Result<(), ConfigError> {
    require(field, module)?;
    if !MODULE_RE.is_match(module) || module.contains("..") {
        return Err(ConfigError::invalid(
            field,
            format!("`{module}` is not a valid module name"),
        ));
    }
    Ok(())
}
