//! Identifiers: construct paths, logical ids, and ARNs.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hierarchical construct path such as `DataCollection/UsageDBCredentialsSecret`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConstructPath(Vec<String>);

impl ConstructPath {
    pub fn root(scope: &str) -> Self {
        Self(vec![scope.to_string()])
    }

    pub fn child(&self, id: &str) -> Self {
        let mut parts = self.0.clone();
        parts.push(id.to_string());
        Self(parts)
    }

    pub fn components(&self) -> &[String] {
        &self.0
    }

    /// Last path component.
    pub fn leaf(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }
}

impl fmt::Display for ConstructPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// Stable template-level identifier of a resource.
///
/// Derived from the construct path: the alphanumeric characters of each
/// component concatenated, followed by the first 8 hex digits (upper case)
/// of the SHA-256 of the full path. Same path, same id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalId(String);

impl LogicalId {
    const MAX_HUMAN_LEN: usize = 240;

    pub fn from_path(path: &ConstructPath) -> Self {
        let mut human: String = path
            .components()
            .iter()
            .flat_map(|c| c.chars().filter(char::is_ascii_alphanumeric))
            .collect();
        human.truncate(Self::MAX_HUMAN_LEN);

        let digest = Sha256::digest(path.to_string().as_bytes());
        let suffix = hex::encode_upper(&digest[..4]);
        Self(format!("{human}{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Target account and region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsEnv {
    pub region: String,
    pub account: String,
}

impl AwsEnv {
    pub fn new(region: &str, account: &str) -> Self {
        Self {
            region: region.to_string(),
            account: account.to_string(),
        }
    }

    /// ARN for a regional resource in this account.
    pub fn arn(&self, service: &str, resource: &str) -> Arn {
        Arn {
            partition: "aws".to_string(),
            service: service.to_string(),
            region: self.region.clone(),
            account: self.account.clone(),
            resource: resource.to_string(),
        }
    }

    /// ARN for a global service (no region component), e.g. IAM.
    pub fn global_arn(&self, service: &str, resource: &str) -> Arn {
        Arn {
            partition: "aws".to_string(),
            service: service.to_string(),
            region: String::new(),
            account: self.account.clone(),
            resource: resource.to_string(),
        }
    }
}

/// Amazon Resource Name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Arn {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account: String,
    pub resource: String,
}

impl Arn {
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.splitn(6, ':');
        if parts.next()? != "arn" {
            return None;
        }
        let partition = parts.next()?.to_string();
        let service = parts.next()?.to_string();
        let region = parts.next()?.to_string();
        let account = parts.next()?.to_string();
        let resource = parts.next()?.to_string();
        if partition.is_empty() || service.is_empty() || resource.is_empty() {
            return None;
        }
        Some(Self {
            partition,
            service,
            region,
            account,
            resource,
        })
    }

    /// True if any component matches more than one resource.
    pub fn is_wildcard(&self) -> bool {
        [&self.service, &self.region, &self.account, &self.resource]
            .iter()
            .any(|part| part.contains('*') || part.contains('?'))
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account, self.resource
        )
    }
}

impl TryFrom<String> for Arn {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Arn::parse(&value).ok_or_else(|| format!("not an ARN: {value}"))
    }
}

impl From<Arn> for String {
    fn from(arn: Arn) -> Self {
        arn.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_id_is_stable_and_path_sensitive() {
        let root = ConstructPath::root("DataCollection");
        let a = LogicalId::from_path(&root.child("LightBehaviorQueue"));
        let b = LogicalId::from_path(&root.child("LightBehaviorQueue"));
        let c = LogicalId::from_path(&ConstructPath::root("Other").child("LightBehaviorQueue"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().starts_with("DataCollectionLightBehaviorQueue"));
        assert_eq!(a.as_str().len(), "DataCollectionLightBehaviorQueue".len() + 8);
    }

    #[test]
    fn logical_id_strips_non_alphanumerics() {
        let path = ConstructPath::root("Data-Collection").child("CustomResource-Initializer");
        let id = LogicalId::from_path(&path);
        assert!(id.as_str().starts_with("DataCollectionCustomResourceInitializer"));
    }

    #[test]
    fn arn_display_and_parse() {
        let env = AwsEnv::new("us-east-1", "123456789012");
        let arn = env.arn("sqs", "LightBehaviorQueue");
        assert_eq!(arn.to_string(), "arn:aws:sqs:us-east-1:123456789012:LightBehaviorQueue");
        assert_eq!(Arn::parse(&arn.to_string()), Some(arn));
    }

    #[test]
    fn arn_resource_may_contain_colons() {
        let arn = Arn::parse("arn:aws:secretsmanager:us-east-1:123456789012:secret:usage-AbC123").unwrap();
        assert_eq!(arn.resource, "secret:usage-AbC123");
    }

    #[test]
    fn global_arn_has_no_region() {
        let env = AwsEnv::new("us-east-1", "123456789012");
        assert_eq!(
            env.global_arn("iam", "role/Writer").to_string(),
            "arn:aws:iam::123456789012:role/Writer"
        );
    }

    #[test]
    fn wildcard_detection() {
        assert!(Arn::parse("arn:aws:sqs:us-east-1:123456789012:*").unwrap().is_wildcard());
        assert!(Arn::parse("arn:aws:ssm:*:123456789012:parameter/x").unwrap().is_wildcard());
        assert!(!Arn::parse("arn:aws:sqs:us-east-1:123456789012:q").unwrap().is_wildcard());
        assert!(Arn::parse("not-an-arn").is_none());
    }
}
