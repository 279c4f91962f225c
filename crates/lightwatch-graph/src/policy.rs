//! Least-privilege permission statements for execution roles.
//!
//! Each compute unit declares what it talks to (`Interaction`); the
//! builder turns that into exactly the statements needed, each scoped to
//! the one resource instance in this graph.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use lightwatch_core::{Arn, LogicalId};
use serde::{Deserialize, Serialize};

use crate::graph::{AttrRef, Attribute};

/// A single IAM action, `service:Operation`. Never a wildcard.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(String);

impl Action {
    pub const SQS_RECEIVE_MESSAGE: &'static str = "sqs:ReceiveMessage";
    pub const SQS_DELETE_MESSAGE: &'static str = "sqs:DeleteMessage";
    pub const SQS_GET_QUEUE_URL: &'static str = "sqs:GetQueueUrl";
    pub const SSM_GET_PARAMETER: &'static str = "ssm:GetParameter";
    pub const SNS_PUBLISH: &'static str = "sns:Publish";
    pub const LAMBDA_INVOKE_FUNCTION: &'static str = "lambda:InvokeFunction";

    /// Parse `service:Operation`; wildcards and malformed names yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        let (service, op) = s.split_once(':')?;
        let valid = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        (valid(service) && valid(op)).then(|| Self(s.to_string()))
    }

    fn known(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a statement is scoped to: a graph reference before provisioning,
/// a concrete ARN after.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyResource {
    Ref(AttrRef),
    Arn(Arn),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStatement {
    pub actions: BTreeSet<Action>,
    pub resources: BTreeSet<PolicyResource>,
}

impl PolicyStatement {
    pub fn grants(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a.as_str() == action)
    }
}

/// Service principal allowed to assume a role.
pub const LAMBDA_PRINCIPAL: &str = "lambda.amazonaws.com";

/// Identity a compute unit runs as, owned by exactly one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRole {
    pub assumed_by: String,
    pub statements: Vec<PolicyStatement>,
}

impl ExecutionRole {
    pub fn for_lambda(statements: Vec<PolicyStatement>) -> Self {
        Self {
            assumed_by: LAMBDA_PRINCIPAL.to_string(),
            statements,
        }
    }

    /// Every (action, resource) pair this role grants.
    pub fn grants(&self) -> BTreeSet<(Action, PolicyResource)> {
        self.statements
            .iter()
            .flat_map(|s| {
                s.actions
                    .iter()
                    .flat_map(move |a| s.resources.iter().map(move |r| (a.clone(), r.clone())))
            })
            .collect()
    }

    /// Graph references named by this role's statements.
    pub fn references(&self) -> impl Iterator<Item = &AttrRef> {
        self.statements.iter().flat_map(|s| {
            s.resources.iter().filter_map(|r| match r {
                PolicyResource::Ref(attr) => Some(attr),
                PolicyResource::Arn(_) => None,
            })
        })
    }
}

/// Something a compute unit does that needs a permission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interaction {
    /// Poll, delete from, and look up a queue.
    ConsumeQueue(LogicalId),
    /// Read the credentials pointer.
    ReadParameter(LogicalId),
    /// Publish to a notification topic.
    PublishAlerts(LogicalId),
    /// Invoke a function synchronously.
    InvokeFunction(LogicalId),
}

impl Interaction {
    fn actions(&self) -> BTreeSet<Action> {
        let names: &[&'static str] = match self {
            Interaction::ConsumeQueue(_) => &[
                Action::SQS_RECEIVE_MESSAGE,
                Action::SQS_DELETE_MESSAGE,
                Action::SQS_GET_QUEUE_URL,
            ],
            Interaction::ReadParameter(_) => &[Action::SSM_GET_PARAMETER],
            Interaction::PublishAlerts(_) => &[Action::SNS_PUBLISH],
            Interaction::InvokeFunction(_) => &[Action::LAMBDA_INVOKE_FUNCTION],
        };
        names.iter().map(|n| Action::known(n)).collect()
    }

    fn resource(&self) -> PolicyResource {
        let target = match self {
            Interaction::ConsumeQueue(id)
            | Interaction::ReadParameter(id)
            | Interaction::PublishAlerts(id)
            | Interaction::InvokeFunction(id) => id.clone(),
        };
        PolicyResource::Ref(AttrRef::new(target, Attribute::Arn))
    }
}

/// Collects interactions and emits one statement per distinct action set.
#[derive(Debug, Default)]
pub struct PolicyBuilder {
    interactions: Vec<Interaction>,
}

impl PolicyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, interaction: Interaction) -> Self {
        if !self.interactions.contains(&interaction) {
            self.interactions.push(interaction);
        }
        self
    }

    /// Interactions sharing an action set collapse into one statement
    /// whose resources are the union of their targets.
    pub fn build(self) -> Vec<PolicyStatement> {
        let mut grouped: BTreeMap<BTreeSet<Action>, BTreeSet<PolicyResource>> = BTreeMap::new();
        let mut order: Vec<BTreeSet<Action>> = Vec::new();
        for interaction in &self.interactions {
            let actions = interaction.actions();
            if !grouped.contains_key(&actions) {
                order.push(actions.clone());
            }
            grouped.entry(actions).or_default().insert(interaction.resource());
        }
        order
            .into_iter()
            .filter_map(|actions| {
                let resources = grouped.remove(&actions)?;
                Some(PolicyStatement { actions, resources })
            })
            .collect()
    }

    pub fn build_role(self) -> ExecutionRole {
        ExecutionRole::for_lambda(self.build())
    }
}
