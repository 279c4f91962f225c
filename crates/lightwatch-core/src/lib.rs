pub mod config;
pub mod error;
pub mod ids;
pub mod module;

pub use config::{
    AlertsConfig, DataCollectionConfig, LambdaFunctions, LightwatchConfig, StackConfig,
    TemplateConfig,
};
pub use error::ConfigError;
pub use ids::{Arn, AwsEnv, ConstructPath, LogicalId};
pub use module::{DirectoryResolver, ModuleError, ModuleResolver};
