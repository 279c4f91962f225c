//! Walking a validated graph against a provisioning engine.
//!
//! The engine is an external collaborator; [`ProvisioningEngine`] is the
//! seam. [`Provisioner`] creates resources strictly in dependency order,
//! feeding each one the already-provisioned values of everything it
//! references. There is no rollback: a failure stops the walk and leaves
//! whatever was created in place.

use std::collections::{BTreeMap, BTreeSet};

use lightwatch_core::{Arn, AwsEnv, ConstructPath, LogicalId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::credentials::{CredentialManager, GeneratedCredential, ParameterHandle, SecretHandle};
use crate::error::{EngineError, GraphError, GraphResult};
use crate::graph::{AttrRef, Attribute, Resource, ResourceGraph, ResourceKind, ResourceSpec};
use crate::policy::{ExecutionRole, PolicyResource, PolicyStatement};

/// Everything an engine needs to create one resource.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub stack: String,
    pub env: AwsEnv,
    pub logical_id: LogicalId,
    pub path: ConstructPath,
    pub spec: ResourceSpec,
    /// Provisioned values of every reference the resource carries.
    pub inputs: BTreeMap<AttrRef, String>,
    /// Generated credential, for secrets only.
    pub credential: Option<GeneratedCredential>,
}

impl CreateRequest {
    pub fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }

    pub fn input(&self, attr: &AttrRef) -> Option<&str> {
        self.inputs.get(attr).map(String::as_str)
    }
}

/// What the engine reports back for a created resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedResource {
    pub logical_id: LogicalId,
    pub kind: ResourceKind,
    pub attributes: BTreeMap<Attribute, String>,
}

impl ProvisionedResource {
    pub fn get(&self, attribute: Attribute) -> Option<&str> {
        self.attributes.get(&attribute).map(String::as_str)
    }
}

/// The provisioning API. One call per resource, in creation order.
pub trait ProvisioningEngine {
    fn create(&mut self, request: &CreateRequest) -> Result<ProvisionedResource, EngineError>;
}

/// Deterministic engine that keeps everything in memory.
///
/// Identifiers are derived from the logical id, so the same graph always
/// provisions to the same ARNs. Secrets and parameters are stored so they
/// can be read back the way a compute unit would.
#[derive(Debug, Default)]
pub struct InMemoryEngine {
    created: Vec<ProvisionedResource>,
    secrets: BTreeMap<String, String>,
    parameters: BTreeMap<String, String>,
    names: BTreeSet<(ResourceKind, String)>,
    quotas: BTreeMap<ResourceKind, usize>,
    failures: BTreeMap<LogicalId, String>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse more than `limit` resources of `kind`.
    pub fn with_quota(mut self, kind: ResourceKind, limit: usize) -> Self {
        self.quotas.insert(kind, limit);
        self
    }

    /// Reject creation of `logical_id` with `reason`.
    pub fn fail_on(mut self, logical_id: LogicalId, reason: &str) -> Self {
        self.failures.insert(logical_id, reason.to_string());
        self
    }

    pub fn created(&self) -> &[ProvisionedResource] {
        &self.created
    }

    /// Secret document stored under `arn`.
    pub fn secret_value(&self, arn: &str) -> Option<&str> {
        self.secrets.get(arn).map(String::as_str)
    }

    pub fn parameter_value(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    fn claim_name(&mut self, kind: ResourceKind, name: &str) -> Result<(), EngineError> {
        if !self.names.insert((kind, name.to_string())) {
            return Err(EngineError::NameConflict(name.to_string()));
        }
        Ok(())
    }

    fn required_input(request: &CreateRequest, attr: &AttrRef) -> Result<String, EngineError> {
        request
            .input(attr)
            .map(str::to_string)
            .ok_or_else(|| EngineError::Rejected {
                logical_id: request.logical_id.clone(),
                reason: format!("no value supplied for {attr}"),
            })
    }
}

/// Hex digest of `seed`, truncated to `len` characters.
fn fingerprint(seed: &str, len: usize) -> String {
    let mut hex = hex::encode(Sha256::digest(seed.as_bytes()));
    hex.truncate(len);
    hex
}

/// `<stack>-<id>-<suffix>`, trimmed to the service's name limit.
fn generated_name(stack: &str, id: &LogicalId, max: usize) -> String {
    let suffix = fingerprint(id.as_str(), 12).to_uppercase();
    let mut head = format!("{stack}-{id}");
    head.truncate(max.saturating_sub(suffix.len() + 1));
    format!("{head}-{suffix}")
}

impl ProvisioningEngine for InMemoryEngine {
    fn create(&mut self, request: &CreateRequest) -> Result<ProvisionedResource, EngineError> {
        let kind = request.kind();
        let id = &request.logical_id;
        if let Some(reason) = self.failures.get(id) {
            return Err(EngineError::Rejected {
                logical_id: id.clone(),
                reason: reason.clone(),
            });
        }
        if let Some(&limit) = self.quotas.get(&kind) {
            if self.created.iter().filter(|r| r.kind == kind).count() >= limit {
                return Err(EngineError::QuotaExceeded(kind));
            }
        }

        let env = &request.env;
        let stack = request.stack.as_str();
        let mut attributes = BTreeMap::new();
        match &request.spec {
            ResourceSpec::Network(_) => {
                attributes.insert(Attribute::Id, format!("vpc-{}", fingerprint(id.as_str(), 17)));
            }
            ResourceSpec::Secret(secret) => {
                let credential = request.credential.as_ref().ok_or_else(|| EngineError::Rejected {
                    logical_id: id.clone(),
                    reason: "secret created without a credential".to_string(),
                })?;
                self.claim_name(kind, &secret.name)?;
                let arn = env.arn(
                    "secretsmanager",
                    &format!("secret:{}-{}", secret.name, fingerprint(id.as_str(), 6)),
                );
                self.secrets
                    .insert(arn.to_string(), credential.secret_string(&secret.password_key));
                attributes.insert(Attribute::Arn, arn.to_string());
                attributes.insert(Attribute::Name, secret.name.clone());
            }
            ResourceSpec::Parameter(pointer) => {
                let value = Self::required_input(request, &pointer.value)?;
                self.claim_name(kind, &pointer.name)?;
                let arn = env.arn("ssm", &format!("parameter/{}", pointer.name.trim_start_matches('/')));
                self.parameters.insert(pointer.name.clone(), value);
                attributes.insert(Attribute::Arn, arn.to_string());
                attributes.insert(Attribute::Name, pointer.name.clone());
            }
            ResourceSpec::AccessBoundary(_) => {
                attributes.insert(Attribute::Id, format!("sg-{}", fingerprint(id.as_str(), 17)));
            }
            ResourceSpec::Database(db) => {
                let identifier = id.as_str().to_lowercase();
                attributes.insert(Attribute::Id, identifier.clone());
                attributes.insert(Attribute::Arn, env.arn("rds", &format!("db:{identifier}")).to_string());
                attributes.insert(
                    Attribute::Url,
                    format!(
                        "{identifier}.{}.{}.rds.amazonaws.com:{}",
                        fingerprint(id.as_str(), 12),
                        env.region,
                        db.port
                    ),
                );
            }
            ResourceSpec::Queue(_) => {
                let name = generated_name(stack, id, 80);
                self.claim_name(kind, &name)?;
                attributes.insert(Attribute::Arn, env.arn("sqs", &name).to_string());
                attributes.insert(
                    Attribute::Url,
                    format!("https://sqs.{}.amazonaws.com/{}/{name}", env.region, env.account),
                );
                attributes.insert(Attribute::Name, name);
            }
            ResourceSpec::Topic(_) => {
                let name = generated_name(stack, id, 256);
                self.claim_name(kind, &name)?;
                attributes.insert(Attribute::Arn, env.arn("sns", &name).to_string());
                attributes.insert(Attribute::Name, name);
            }
            ResourceSpec::Role(_) => {
                let name = generated_name(stack, id, 64);
                self.claim_name(kind, &name)?;
                attributes.insert(Attribute::Arn, env.global_arn("iam", &format!("role/{name}")).to_string());
                attributes.insert(Attribute::Name, name);
            }
            ResourceSpec::Function(_) => {
                let name = generated_name(stack, id, 64);
                self.claim_name(kind, &name)?;
                attributes.insert(Attribute::Arn, env.arn("lambda", &format!("function:{name}")).to_string());
                attributes.insert(Attribute::Name, name);
            }
            ResourceSpec::EventBinding(binding) => {
                // Both ends must already exist.
                Self::required_input(request, &binding.queue)?;
                Self::required_input(request, &binding.function)?;
                attributes.insert(Attribute::Id, fingerprint(id.as_str(), 32));
            }
            ResourceSpec::Provider(_) => {
                let name = generated_name(stack, id, 64);
                attributes.insert(Attribute::Arn, env.arn("lambda", &format!("function:{name}")).to_string());
            }
            ResourceSpec::Bootstrap(bootstrap) => {
                attributes.insert(Attribute::Id, bootstrap.physical_resource_id.clone());
            }
        }

        let provisioned = ProvisionedResource {
            logical_id: id.clone(),
            kind,
            attributes,
        };
        debug!(logical_id = %id, %kind, "in-memory resource created");
        self.created.push(provisioned.clone());
        Ok(provisioned)
    }
}

/// Where the bootstrap handler sends its one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapTarget {
    pub logical_id: LogicalId,
    pub identity: String,
    pub function_name: String,
    pub function_arn: String,
    pub timeout_secs: u64,
}

/// Result of a completed provisioning pass.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionedGraph {
    pub stack: String,
    pub template: String,
    pub graph_digest: String,
    pub creation_order: Vec<LogicalId>,
    pub outputs: BTreeMap<LogicalId, ProvisionedResource>,
    pub secret: SecretHandle,
    pub parameter: ParameterHandle,
    /// Role statements with every scope resolved to a concrete ARN.
    pub roles: BTreeMap<LogicalId, ExecutionRole>,
    pub bootstrap: Option<BootstrapTarget>,
}

impl ProvisionedGraph {
    pub fn output(&self, logical_id: &LogicalId, attribute: Attribute) -> Option<&str> {
        self.outputs.get(logical_id)?.get(attribute)
    }

    /// Outputs keyed by plain strings, for persistence and display.
    pub fn output_table(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.outputs
            .iter()
            .map(|(id, resource)| {
                let attrs = resource
                    .attributes
                    .iter()
                    .map(|(attr, value)| (attr.to_string(), value.clone()))
                    .collect();
                (id.to_string(), attrs)
            })
            .collect()
    }
}

/// Drives a [`ProvisioningEngine`] over a graph.
pub struct Provisioner<E> {
    engine: E,
    credentials: CredentialManager,
}

impl<E: ProvisioningEngine> Provisioner<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            credentials: CredentialManager,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn into_engine(self) -> E {
        self.engine
    }

    /// Validate, then create every resource in dependency order.
    pub fn provision(&mut self, graph: &ResourceGraph) -> GraphResult<ProvisionedGraph> {
        graph.validate()?;
        let order = graph.creation_order()?;
        let mut outputs: BTreeMap<LogicalId, ProvisionedResource> = BTreeMap::new();

        for id in &order {
            let Some(resource) = graph.get(id) else {
                continue;
            };
            let request = self.request_for(graph, resource, &outputs)?;
            match self.engine.create(&request) {
                Ok(created) => {
                    info!(logical_id = %id, kind = %created.kind, "resource created");
                    outputs.insert(id.clone(), created);
                }
                Err(err) => {
                    warn!(
                        logical_id = %id,
                        created = outputs.len(),
                        error = %err,
                        "provisioning stopped; created resources are left in place"
                    );
                    return Err(err.into());
                }
            }
        }

        let (secret, parameter) = self.link_credentials(graph, &outputs)?;
        let roles = resolve_roles(graph, &outputs)?;
        let bootstrap = bootstrap_target(graph, &outputs)?;
        info!(stack = %graph.stack, resources = outputs.len(), "graph provisioned");

        Ok(ProvisionedGraph {
            stack: graph.stack.clone(),
            template: graph.template.clone(),
            graph_digest: graph.digest()?,
            creation_order: order,
            outputs,
            secret,
            parameter,
            roles,
            bootstrap,
        })
    }

    fn request_for(
        &self,
        graph: &ResourceGraph,
        resource: &Resource,
        outputs: &BTreeMap<LogicalId, ProvisionedResource>,
    ) -> GraphResult<CreateRequest> {
        let mut inputs = BTreeMap::new();
        for attr in resource.references() {
            inputs.insert(attr.clone(), resolve(outputs, attr)?.to_string());
        }
        let credential = match &resource.spec {
            ResourceSpec::Secret(secret) => Some(self.credentials.issue(secret)?),
            _ => None,
        };
        Ok(CreateRequest {
            stack: graph.stack.clone(),
            env: graph.env.clone(),
            logical_id: resource.logical_id.clone(),
            path: resource.path.clone(),
            spec: resource.spec.clone(),
            inputs,
            credential,
        })
    }

    fn link_credentials(
        &self,
        graph: &ResourceGraph,
        outputs: &BTreeMap<LogicalId, ProvisionedResource>,
    ) -> GraphResult<(SecretHandle, ParameterHandle)> {
        let mut secret = None;
        let mut parameter = None;
        for resource in graph.iter() {
            let id = &resource.logical_id;
            match &resource.spec {
                ResourceSpec::Secret(s) => {
                    secret = Some(SecretHandle {
                        logical_id: id.clone(),
                        name: s.name.clone(),
                        arn: resolve_arn(outputs, &resource.attr(Attribute::Arn))?,
                    });
                }
                ResourceSpec::Parameter(p) => {
                    parameter = Some(ParameterHandle {
                        logical_id: id.clone(),
                        name: p.name.clone(),
                        arn: resolve_arn(outputs, &resource.attr(Attribute::Arn))?,
                        target: resolve_arn(outputs, &p.value)?,
                    });
                }
                _ => {}
            }
        }
        let cardinality = |kind| GraphError::Cardinality {
            kind,
            expected: 1,
            found: 0,
        };
        let secret = secret.ok_or_else(|| cardinality(ResourceKind::Secret))?;
        let parameter = parameter.ok_or_else(|| cardinality(ResourceKind::Parameter))?;
        Ok(self.credentials.link(secret, parameter)?)
    }
}

fn resolve<'a>(outputs: &'a BTreeMap<LogicalId, ProvisionedResource>, attr: &AttrRef) -> GraphResult<&'a str> {
    outputs
        .get(&attr.target)
        .and_then(|r| r.get(attr.attribute))
        .ok_or_else(|| GraphError::MissingOutput {
            logical_id: attr.target.clone(),
            attribute: attr.attribute,
        })
}

fn resolve_arn(outputs: &BTreeMap<LogicalId, ProvisionedResource>, attr: &AttrRef) -> GraphResult<Arn> {
    let value = resolve(outputs, attr)?;
    Arn::parse(value).ok_or_else(|| GraphError::InvalidResource {
        resource: attr.target.clone(),
        reason: format!("engine reported `{value}` as {}", attr.attribute),
    })
}

/// Replace every graph reference in role statements with the ARN it
/// provisioned to. A wildcard coming back from the engine is still refused.
fn resolve_roles(
    graph: &ResourceGraph,
    outputs: &BTreeMap<LogicalId, ProvisionedResource>,
) -> GraphResult<BTreeMap<LogicalId, ExecutionRole>> {
    let mut roles = BTreeMap::new();
    for resource in graph.of_kind(ResourceKind::Role) {
        let ResourceSpec::Role(role) = &resource.spec else {
            continue;
        };
        let mut statements = Vec::with_capacity(role.statements.len());
        for statement in &role.statements {
            let mut resources = BTreeSet::new();
            for scope in &statement.resources {
                let arn = match scope {
                    PolicyResource::Ref(attr) => resolve_arn(outputs, attr)?,
                    PolicyResource::Arn(arn) => arn.clone(),
                };
                if arn.is_wildcard() {
                    return Err(GraphError::WildcardScope {
                        role: resource.logical_id.clone(),
                        resource: arn.to_string(),
                    });
                }
                resources.insert(PolicyResource::Arn(arn));
            }
            statements.push(PolicyStatement {
                actions: statement.actions.clone(),
                resources,
            });
        }
        roles.insert(
            resource.logical_id.clone(),
            ExecutionRole {
                assumed_by: role.assumed_by.clone(),
                statements,
            },
        );
    }
    Ok(roles)
}

fn bootstrap_target(
    graph: &ResourceGraph,
    outputs: &BTreeMap<LogicalId, ProvisionedResource>,
) -> GraphResult<Option<BootstrapTarget>> {
    let Some(resource) = graph.of_kind(ResourceKind::Bootstrap).next() else {
        return Ok(None);
    };
    let ResourceSpec::Bootstrap(bootstrap) = &resource.spec else {
        return Ok(None);
    };
    let Some(ResourceSpec::Provider(provider)) = graph.get(&bootstrap.service_token.target).map(|r| &r.spec)
    else {
        return Err(GraphError::InvalidResource {
            resource: resource.logical_id.clone(),
            reason: "service token does not name a provider".to_string(),
        });
    };
    let function = AttrRef::new(provider.target.target.clone(), Attribute::Name);
    Ok(Some(BootstrapTarget {
        logical_id: resource.logical_id.clone(),
        identity: bootstrap.physical_resource_id.clone(),
        function_name: resolve(outputs, &function)?.to_string(),
        function_arn: resolve(outputs, &provider.target)?.to_string(),
        timeout_secs: provider.timeout_secs,
    }))
}
