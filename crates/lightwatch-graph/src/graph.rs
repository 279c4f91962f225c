//! The resource graph: typed resources, cross-resource references,
//! validation, and dependency-ordered creation.
//!
//! Resources are added in any order and refer to each other through
//! [`AttrRef`]s (a logical id plus the attribute wanted from it). Nothing
//! is resolved at insertion time; [`ResourceGraph::validate`] checks the
//! whole graph at once and [`ResourceGraph::creation_order`] derives the
//! order in which a provisioning engine must create it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use lightwatch_core::{AwsEnv, ConstructPath, LogicalId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::boundary::{AccessBoundary, Peer};
use crate::credentials::{CredentialSecret, ParameterPointer};
use crate::error::{GraphError, GraphResult};
use crate::network::{NetworkTopology, SubnetKind, SubnetSelection};
use crate::policy::{Action, ExecutionRole, PolicyResource};
use crate::resources::{
    AlertRoute, BootstrapProvider, BootstrapResource, ComputeUnit, EventBinding, ManagedDatabase,
    NotificationChannel, Queue,
};

/// An attribute a resource exposes once it exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    Arn,
    Name,
    Url,
    Id,
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Attribute::Arn => "arn",
            Attribute::Name => "name",
            Attribute::Url => "url",
            Attribute::Id => "id",
        };
        f.write_str(s)
    }
}

/// Reference to an attribute of another resource in the same graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttrRef {
    pub target: LogicalId,
    pub attribute: Attribute,
}

impl AttrRef {
    pub fn new(target: LogicalId, attribute: Attribute) -> Self {
        Self { target, attribute }
    }
}

impl fmt::Display for AttrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target, self.attribute)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    Secret,
    Parameter,
    AccessBoundary,
    Database,
    Queue,
    Topic,
    Role,
    Function,
    EventBinding,
    Provider,
    Bootstrap,
}

impl ResourceKind {
    /// Whether resources of this kind have `attribute` to hand out.
    pub fn exposes(self, attribute: Attribute) -> bool {
        let exposed: &[Attribute] = match self {
            ResourceKind::Network
            | ResourceKind::AccessBoundary
            | ResourceKind::EventBinding
            | ResourceKind::Bootstrap => &[Attribute::Id],
            ResourceKind::Secret
            | ResourceKind::Parameter
            | ResourceKind::Topic
            | ResourceKind::Role
            | ResourceKind::Function => &[Attribute::Arn, Attribute::Name],
            ResourceKind::Database => &[Attribute::Arn, Attribute::Id, Attribute::Url],
            ResourceKind::Queue => &[Attribute::Arn, Attribute::Name, Attribute::Url],
            ResourceKind::Provider => &[Attribute::Arn],
        };
        exposed.contains(&attribute)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Network => "network",
            ResourceKind::Secret => "secret",
            ResourceKind::Parameter => "parameter",
            ResourceKind::AccessBoundary => "access boundary",
            ResourceKind::Database => "database",
            ResourceKind::Queue => "queue",
            ResourceKind::Topic => "topic",
            ResourceKind::Role => "role",
            ResourceKind::Function => "function",
            ResourceKind::EventBinding => "event binding",
            ResourceKind::Provider => "bootstrap provider",
            ResourceKind::Bootstrap => "bootstrap resource",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    Network(NetworkTopology),
    Secret(CredentialSecret),
    Parameter(ParameterPointer),
    AccessBoundary(AccessBoundary),
    Database(ManagedDatabase),
    Queue(Queue),
    Topic(NotificationChannel),
    Role(ExecutionRole),
    Function(ComputeUnit),
    EventBinding(EventBinding),
    Provider(BootstrapProvider),
    Bootstrap(BootstrapResource),
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::Network(_) => ResourceKind::Network,
            ResourceSpec::Secret(_) => ResourceKind::Secret,
            ResourceSpec::Parameter(_) => ResourceKind::Parameter,
            ResourceSpec::AccessBoundary(_) => ResourceKind::AccessBoundary,
            ResourceSpec::Database(_) => ResourceKind::Database,
            ResourceSpec::Queue(_) => ResourceKind::Queue,
            ResourceSpec::Topic(_) => ResourceKind::Topic,
            ResourceSpec::Role(_) => ResourceKind::Role,
            ResourceSpec::Function(_) => ResourceKind::Function,
            ResourceSpec::EventBinding(_) => ResourceKind::EventBinding,
            ResourceSpec::Provider(_) => ResourceKind::Provider,
            ResourceSpec::Bootstrap(_) => ResourceKind::Bootstrap,
        }
    }

    /// Every cross-resource reference carried by this spec.
    pub fn references(&self) -> Vec<&AttrRef> {
        match self {
            ResourceSpec::Network(_)
            | ResourceSpec::Secret(_)
            | ResourceSpec::Queue(_)
            | ResourceSpec::Topic(_) => Vec::new(),
            ResourceSpec::Parameter(p) => vec![&p.value],
            ResourceSpec::AccessBoundary(b) => {
                let mut refs = vec![&b.network];
                let peers = b.ingress.iter().map(|rule| &rule.peer);
                refs.extend(
                    peers
                        .chain(b.egress.iter().map(|rule| &rule.peer))
                        .filter_map(|peer| match peer {
                            Peer::Boundary(group) => Some(group),
                            Peer::AnyIpv4 | Peer::Cidr { .. } => None,
                        }),
                );
                refs
            }
            ResourceSpec::Database(db) => {
                let mut refs = vec![&db.placement.network, &db.credentials];
                refs.extend(&db.boundaries);
                refs
            }
            ResourceSpec::Role(role) => role.references().collect(),
            ResourceSpec::Function(unit) => {
                let mut refs: Vec<&AttrRef> = unit.env_refs().map(|(_, r)| r).collect();
                refs.push(&unit.placement.network);
                refs.extend(&unit.boundaries);
                refs.push(&unit.execution_role);
                refs
            }
            ResourceSpec::EventBinding(binding) => vec![&binding.queue, &binding.function],
            ResourceSpec::Provider(provider) => vec![&provider.target, &provider.role],
            ResourceSpec::Bootstrap(bootstrap) => vec![&bootstrap.service_token],
        }
    }
}

/// One node of the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub logical_id: LogicalId,
    pub path: ConstructPath,
    pub spec: ResourceSpec,
    /// Ordering edges not implied by any reference.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<LogicalId>,
}

impl Resource {
    pub fn new(path: ConstructPath, spec: ResourceSpec) -> Self {
        Self {
            logical_id: LogicalId::from_path(&path),
            path,
            spec,
            depends_on: Vec::new(),
        }
    }

    pub fn with_dependency(mut self, id: LogicalId) -> Self {
        if !self.depends_on.contains(&id) {
            self.depends_on.push(id);
        }
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }

    pub fn references(&self) -> Vec<&AttrRef> {
        self.spec.references()
    }

    /// Reference to one of this resource's attributes.
    pub fn attr(&self, attribute: Attribute) -> AttrRef {
        AttrRef::new(self.logical_id.clone(), attribute)
    }

    /// Resources that must exist before this one.
    pub fn dependencies(&self) -> BTreeSet<&LogicalId> {
        self.references()
            .into_iter()
            .map(|r| &r.target)
            .chain(&self.depends_on)
            .collect()
    }
}

/// A complete, stack-scoped set of resources.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceGraph {
    pub stack: String,
    pub template: String,
    pub env: AwsEnv,
    resources: Vec<Resource>,
    alert_routes: Vec<AlertRoute>,
    #[serde(skip)]
    index: HashMap<LogicalId, usize>,
}

impl ResourceGraph {
    pub fn new(stack: &str, template: &str, env: AwsEnv) -> Self {
        Self {
            stack: stack.to_string(),
            template: template.to_string(),
            env,
            resources: Vec::new(),
            alert_routes: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Insert a resource. Its references are checked by `validate`, not here.
    pub fn add(&mut self, resource: Resource) -> GraphResult<LogicalId> {
        let id = resource.logical_id.clone();
        if self.index.contains_key(&id) {
            return Err(GraphError::DuplicateResource(id));
        }
        debug!(logical_id = %id, kind = %resource.kind(), path = %resource.path, "resource added");
        self.index.insert(id.clone(), self.resources.len());
        self.resources.push(resource);
        Ok(id)
    }

    pub fn add_alert_route(&mut self, route: AlertRoute) {
        if !self.alert_routes.contains(&route) {
            self.alert_routes.push(route);
        }
    }

    pub fn get(&self, id: &LogicalId) -> Option<&Resource> {
        self.index.get(id).map(|&i| &self.resources[i])
    }

    /// Mutable access to a resource's spec. Identity stays fixed.
    pub fn spec_mut(&mut self, id: &LogicalId) -> Option<&mut ResourceSpec> {
        let i = *self.index.get(id)?;
        Some(&mut self.resources[i].spec)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &Resource> {
        self.resources.iter().filter(move |r| r.kind() == kind)
    }

    pub fn alert_routes(&self) -> &[AlertRoute] {
        &self.alert_routes
    }

    /// Notification channels nothing publishes to.
    pub fn unwired_channels(&self) -> Vec<&LogicalId> {
        self.of_kind(ResourceKind::Topic)
            .map(|r| &r.logical_id)
            .filter(|id| !self.alert_routes.iter().any(|route| &route.channel == *id))
            .collect()
    }

    /// Every (referrer, reference) edge in the graph.
    pub fn references(&self) -> Vec<(&LogicalId, &AttrRef)> {
        self.resources
            .iter()
            .flat_map(|r| r.references().into_iter().map(move |attr| (&r.logical_id, attr)))
            .collect()
    }

    fn kind_of(&self, id: &LogicalId) -> Option<ResourceKind> {
        self.get(id).map(Resource::kind)
    }

    /// Check the whole graph. Any error means nothing may be provisioned.
    pub fn validate(&self) -> GraphResult<()> {
        self.check_references()?;
        for resource in &self.resources {
            if let ResourceSpec::Network(topology) = &resource.spec {
                topology.validate()?;
            }
        }
        self.check_credentials()?;
        self.check_placement()?;
        self.check_roles()?;
        self.check_bindings()?;
        self.check_alert_routes()?;
        self.creation_order()?;
        debug!(stack = %self.stack, resources = self.resources.len(), "graph validated");
        Ok(())
    }

    fn check_references(&self) -> GraphResult<()> {
        for resource in &self.resources {
            for attr in resource.references() {
                let kind = self
                    .kind_of(&attr.target)
                    .ok_or_else(|| GraphError::DanglingReference {
                        from: resource.logical_id.clone(),
                        target: attr.target.clone(),
                        attribute: attr.attribute,
                    })?;
                if !kind.exposes(attr.attribute) {
                    return Err(GraphError::UnsupportedAttribute {
                        from: resource.logical_id.clone(),
                        target: attr.target.clone(),
                        kind,
                        attribute: attr.attribute,
                    });
                }
            }
            for dep in &resource.depends_on {
                if self.get(dep).is_none() {
                    return Err(GraphError::DanglingReference {
                        from: resource.logical_id.clone(),
                        target: dep.clone(),
                        attribute: Attribute::Id,
                    });
                }
            }
        }
        Ok(())
    }

    fn expect_kind(&self, owner: &LogicalId, attr: &AttrRef, kind: ResourceKind) -> GraphResult<()> {
        match self.kind_of(&attr.target) {
            Some(found) if found == kind => Ok(()),
            found => Err(GraphError::InvalidResource {
                resource: owner.clone(),
                reason: format!(
                    "{} must name a {kind}, found {}",
                    attr,
                    found.map_or_else(|| "nothing".to_string(), |k| k.to_string())
                ),
            }),
        }
    }

    fn check_credentials(&self) -> GraphResult<()> {
        for kind in [ResourceKind::Secret, ResourceKind::Parameter] {
            let found = self.of_kind(kind).count();
            if found != 1 {
                return Err(GraphError::Cardinality {
                    kind,
                    expected: 1,
                    found,
                });
            }
        }

        for resource in &self.resources {
            match &resource.spec {
                ResourceSpec::Parameter(pointer) => {
                    self.expect_kind(&resource.logical_id, &pointer.value, ResourceKind::Secret)?;
                    if pointer.value.attribute != Attribute::Arn {
                        return Err(GraphError::InvalidResource {
                            resource: resource.logical_id.clone(),
                            reason: "parameter must hold the secret's ARN".to_string(),
                        });
                    }
                }
                ResourceSpec::Database(db) => {
                    self.expect_kind(&resource.logical_id, &db.credentials, ResourceKind::Secret)?;
                }
                ResourceSpec::Function(unit) => {
                    for (variable, attr) in unit.env_refs() {
                        if self.kind_of(&attr.target) == Some(ResourceKind::Secret) {
                            return Err(GraphError::EmbeddedSecret {
                                function: resource.logical_id.clone(),
                                variable: variable.to_string(),
                            });
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn check_selection(&self, owner: &LogicalId, selection: &SubnetSelection) -> GraphResult<()> {
        let placement = |reason: String| GraphError::Placement {
            resource: owner.clone(),
            reason,
        };
        if selection.kind == SubnetKind::Public {
            return Err(placement(format!("tier `{}` is public", selection.tier)));
        }
        let Some(ResourceSpec::Network(topology)) = self.get(&selection.network.target).map(|r| &r.spec) else {
            return Err(placement(format!("{} is not a network", selection.network.target)));
        };
        if !topology
            .tiers
            .iter()
            .any(|t| t.name == selection.tier && t.kind == selection.kind)
        {
            return Err(placement(format!(
                "network has no {} tier named `{}`",
                selection.kind, selection.tier
            )));
        }
        Ok(())
    }

    fn boundary(&self, owner: &LogicalId, attr: &AttrRef) -> GraphResult<&AccessBoundary> {
        match self.get(&attr.target).map(|r| &r.spec) {
            Some(ResourceSpec::AccessBoundary(boundary)) => Ok(boundary),
            _ => Err(GraphError::InvalidResource {
                resource: owner.clone(),
                reason: format!("{} is not an access boundary", attr.target),
            }),
        }
    }

    fn check_placement(&self) -> GraphResult<()> {
        for resource in &self.resources {
            let id = &resource.logical_id;
            match &resource.spec {
                ResourceSpec::Database(db) => {
                    if db.publicly_accessible {
                        return Err(GraphError::Placement {
                            resource: id.clone(),
                            reason: "database must not be publicly accessible".to_string(),
                        });
                    }
                    self.check_selection(id, &db.placement)?;
                    for attr in &db.boundaries {
                        let boundary = self.boundary(id, attr)?;
                        if boundary.network.target != db.placement.network.target {
                            return Err(GraphError::Placement {
                                resource: id.clone(),
                                reason: format!("boundary {} belongs to another network", attr.target),
                            });
                        }
                    }
                }
                ResourceSpec::Function(unit) => {
                    self.check_selection(id, &unit.placement)?;
                    if unit.boundaries.is_empty() {
                        return Err(GraphError::Placement {
                            resource: id.clone(),
                            reason: "function has no access boundary".to_string(),
                        });
                    }
                    for attr in &unit.boundaries {
                        let boundary = self.boundary(id, attr)?;
                        if !boundary.egress.iter().all(|rule| rule.is_scoped()) {
                            return Err(GraphError::OpenEgress {
                                resource: id.clone(),
                                boundary: attr.target.clone(),
                            });
                        }
                        if boundary.network.target != unit.placement.network.target {
                            return Err(GraphError::Placement {
                                resource: id.clone(),
                                reason: format!("boundary {} belongs to another network", attr.target),
                            });
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn check_roles(&self) -> GraphResult<()> {
        let mut owners: BTreeMap<&LogicalId, usize> = self
            .of_kind(ResourceKind::Role)
            .map(|r| (&r.logical_id, 0))
            .collect();

        for resource in &self.resources {
            let role = match &resource.spec {
                ResourceSpec::Function(unit) => &unit.execution_role,
                ResourceSpec::Provider(provider) => &provider.role,
                _ => continue,
            };
            match owners.get_mut(&role.target) {
                Some(count) => *count += 1,
                None => {
                    return Err(GraphError::InvalidResource {
                        resource: resource.logical_id.clone(),
                        reason: format!("{} is not a role", role.target),
                    });
                }
            }
        }

        for resource in self.of_kind(ResourceKind::Role) {
            let id = &resource.logical_id;
            match owners.get(id).copied().unwrap_or_default() {
                0 => {
                    return Err(GraphError::InvalidResource {
                        resource: id.clone(),
                        reason: "role has no owner".to_string(),
                    });
                }
                1 => {}
                count => {
                    return Err(GraphError::SharedRole {
                        role: id.clone(),
                        count,
                    });
                }
            }

            let ResourceSpec::Role(role) = &resource.spec else {
                continue;
            };
            for statement in &role.statements {
                if let Some(action) = statement.actions.iter().find(|a| Action::parse(a.as_str()).is_none()) {
                    return Err(GraphError::WildcardScope {
                        role: id.clone(),
                        resource: format!("action {action}"),
                    });
                }
                if statement.actions.is_empty() || statement.resources.is_empty() {
                    return Err(GraphError::InvalidResource {
                        resource: id.clone(),
                        reason: "empty policy statement".to_string(),
                    });
                }
                for scope in &statement.resources {
                    match scope {
                        PolicyResource::Ref(attr) if attr.attribute == Attribute::Arn => {}
                        PolicyResource::Ref(attr) => {
                            return Err(GraphError::InvalidResource {
                                resource: id.clone(),
                                reason: format!("statement scoped to {attr}; scopes must be ARNs"),
                            });
                        }
                        PolicyResource::Arn(arn) if arn.is_wildcard() => {
                            return Err(GraphError::WildcardScope {
                                role: id.clone(),
                                resource: arn.to_string(),
                            });
                        }
                        PolicyResource::Arn(arn) => {
                            return Err(GraphError::InvalidResource {
                                resource: id.clone(),
                                reason: format!("statement names {arn}, which is outside this graph"),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn check_bindings(&self) -> GraphResult<()> {
        for resource in &self.resources {
            let id = &resource.logical_id;
            match &resource.spec {
                ResourceSpec::EventBinding(binding) => {
                    self.expect_kind(id, &binding.queue, ResourceKind::Queue)?;
                    self.expect_kind(id, &binding.function, ResourceKind::Function)?;
                    if !(1..=10).contains(&binding.batch_size) {
                        return Err(GraphError::InvalidResource {
                            resource: id.clone(),
                            reason: format!("batch size {} outside 1..=10", binding.batch_size),
                        });
                    }
                    let queue = self.get(&binding.queue.target).map(|r| &r.spec);
                    let function = self.get(&binding.function.target).map(|r| &r.spec);
                    if let (Some(ResourceSpec::Queue(queue)), Some(ResourceSpec::Function(unit))) = (queue, function)
                    {
                        if queue.visibility_timeout_secs < unit.timeout_secs {
                            return Err(GraphError::InvalidResource {
                                resource: id.clone(),
                                reason: format!(
                                    "queue visibility timeout {}s is shorter than consumer timeout {}s",
                                    queue.visibility_timeout_secs, unit.timeout_secs
                                ),
                            });
                        }
                    }
                }
                ResourceSpec::Provider(provider) => {
                    self.expect_kind(id, &provider.target, ResourceKind::Function)?;
                    if provider.timeout_secs == 0 {
                        return Err(GraphError::InvalidResource {
                            resource: id.clone(),
                            reason: "provider timeout must be positive".to_string(),
                        });
                    }
                }
                ResourceSpec::Bootstrap(bootstrap) => {
                    self.expect_kind(id, &bootstrap.service_token, ResourceKind::Provider)?;
                    if bootstrap.physical_resource_id.trim().is_empty() {
                        return Err(GraphError::InvalidResource {
                            resource: id.clone(),
                            reason: "bootstrap physical id must not be empty".to_string(),
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn check_alert_routes(&self) -> GraphResult<()> {
        for route in &self.alert_routes {
            let source = AttrRef::new(route.source.clone(), Attribute::Arn);
            let channel = AttrRef::new(route.channel.clone(), Attribute::Arn);
            self.expect_kind(&route.source, &source, ResourceKind::Function)?;
            self.expect_kind(&route.source, &channel, ResourceKind::Topic)?;
        }
        Ok(())
    }

    /// Topological creation order. Among resources whose dependencies are
    /// satisfied, insertion order wins, so the same graph always yields the
    /// same order.
    pub fn creation_order(&self) -> GraphResult<Vec<LogicalId>> {
        let n = self.resources.len();
        let mut indegree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, resource) in self.resources.iter().enumerate() {
            for dep in resource.dependencies() {
                if let Some(&j) = self.index.get(dep) {
                    dependents[j].push(i);
                    indegree[i] += 1;
                }
            }
        }

        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(i) = ready.pop_first() {
            order.push(self.resources[i].logical_id.clone());
            for &k in &dependents[i] {
                indegree[k] -= 1;
                if indegree[k] == 0 {
                    ready.insert(k);
                }
            }
        }

        if order.len() < n {
            let stuck = (0..n)
                .filter(|&i| indegree[i] > 0)
                .map(|i| self.resources[i].logical_id.clone())
                .collect();
            return Err(GraphError::Cycle(stuck));
        }
        Ok(order)
    }

    /// SHA-256 over the serialized resources, hex encoded.
    pub fn digest(&self) -> GraphResult<String> {
        let bytes = serde_json::to_vec(&self.resources)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}
