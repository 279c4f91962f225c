//! End-to-end assembly and provisioning of the data-collection graph.

use std::collections::BTreeSet;
use std::fs;
use std::net::Ipv4Addr;

use lightwatch_core::{Arn, DirectoryResolver, LightwatchConfig};
use lightwatch_graph::assembler::ENV_DB_CREDENTIALS;
use lightwatch_graph::boundary::{
    evaluate_access, AccessBoundary, AccessDecision, AccessRequest, EgressRule, Endpoint, Peer, Port,
};
use lightwatch_graph::credentials::GeneratedCredential;
use lightwatch_graph::graph::{AttrRef, Attribute};
use lightwatch_graph::network::SubnetKind;
use lightwatch_graph::policy::{Action, PolicyResource, PolicyStatement};
use lightwatch_graph::resources::{EnvValue, UnitRole};
use lightwatch_graph::{
    Assembler, EngineError, GraphError, InMemoryEngine, ProvisionedGraph, Provisioner, Resource, ResourceGraph,
    ResourceKind, ResourceSpec,
};
use tempfile::TempDir;

fn module_root(modules: &[&str]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for module in modules {
        let path = dir.path().join(module);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("Dockerfile"), "FROM public.ecr.aws/lambda/python:3.12\n").unwrap();
    }
    dir
}

fn config(writer: &str) -> LightwatchConfig {
    let mut config = LightwatchConfig::scaffold("LightsStack", "home");
    config
        .templates
        .get_mut("home")
        .unwrap()
        .lambda_functions
        .db_writer_fn_module_name = Some(writer.to_string());
    config
}

fn assemble(config: &LightwatchConfig) -> (TempDir, ResourceGraph) {
    let writer = config.templates["home"].writer_module().unwrap().to_string();
    let root = module_root(&[writer.as_str(), "dbInitializerFn"]);
    let graph = Assembler::assemble(config, "home", &DirectoryResolver::new(root.path())).unwrap();
    (root, graph)
}

fn find<'a>(graph: &'a ResourceGraph, leaf: &str) -> &'a Resource {
    graph.iter().find(|r| r.path.leaf() == leaf).unwrap()
}

fn provision(graph: &ResourceGraph) -> (ProvisionedGraph, InMemoryEngine) {
    let mut provisioner = Provisioner::new(InMemoryEngine::new());
    let provisioned = provisioner.provision(graph).unwrap();
    (provisioned, provisioner.into_engine())
}

fn writer_unit(graph: &ResourceGraph) -> &lightwatch_graph::resources::ComputeUnit {
    graph
        .of_kind(ResourceKind::Function)
        .find_map(|r| match &r.spec {
            ResourceSpec::Function(unit) if unit.unit == UnitRole::Writer => Some(unit),
            _ => None,
        })
        .unwrap()
}

#[test]
fn writer_a_is_bound_to_queue_with_exactly_four_permissions() {
    let (_root, graph) = assemble(&config("writer-a"));
    let (provisioned, _) = provision(&graph);

    let writer = writer_unit(&graph);
    assert_eq!(writer.module, "writer-a");
    assert!(writer.build_path.ends_with("writer-a"));

    let queue = find(&graph, "LightBehaviorQueue");
    let parameter = find(&graph, "UsageDBCredentialsArn");
    assert_eq!(
        writer.environment["WRITE_QUEUE_URL"],
        EnvValue::Ref(queue.attr(Attribute::Name))
    );

    let binding = graph
        .iter()
        .find_map(|r| match &r.spec {
            ResourceSpec::EventBinding(b) => Some(b),
            _ => None,
        })
        .unwrap();
    assert_eq!(binding.queue, queue.attr(Attribute::Arn));

    let role = &provisioned.roles[&writer.execution_role.target];
    let queue_arn = Arn::parse(provisioned.output(&queue.logical_id, Attribute::Arn).unwrap()).unwrap();
    let parameter_arn = Arn::parse(provisioned.output(&parameter.logical_id, Attribute::Arn).unwrap()).unwrap();
    let expected: BTreeSet<(String, Arn)> = [
        ("sqs:ReceiveMessage", queue_arn.clone()),
        ("sqs:DeleteMessage", queue_arn.clone()),
        ("sqs:GetQueueUrl", queue_arn),
        ("ssm:GetParameter", parameter_arn),
    ]
    .into_iter()
    .map(|(a, arn)| (a.to_string(), arn))
    .collect();
    let granted: BTreeSet<(String, Arn)> = role
        .grants()
        .into_iter()
        .map(|(action, scope)| match scope {
            PolicyResource::Arn(arn) => (action.as_str().to_string(), arn),
            PolicyResource::Ref(attr) => panic!("unresolved scope {attr}"),
        })
        .collect();
    assert_eq!(granted, expected);
}

#[test]
fn initializer_owns_a_parameter_only_role() {
    let (_root, graph) = assemble(&config("dbWriterFn"));
    let (provisioned, _) = provision(&graph);

    let initializer = find(&graph, "DBInitializerFn");
    let ResourceSpec::Function(unit) = &initializer.spec else {
        panic!("initializer is not a function");
    };
    let role = &provisioned.roles[&unit.execution_role.target];
    assert_eq!(role.grants().len(), 1);
    assert!(role.statements[0].grants(Action::SSM_GET_PARAMETER));
    assert_ne!(unit.execution_role, writer_unit(&graph).execution_role);

    let provider_role = &provisioned.roles[&find(&graph, "CustomeResourceProvider-Initializer")
        .references()
        .into_iter()
        .find(|attr| graph.get(&attr.target).unwrap().kind() == ResourceKind::Role)
        .unwrap()
        .target];
    assert!(provider_role.statements[0].grants(Action::LAMBDA_INVOKE_FUNCTION));
    let initializer_arn = Arn::parse(provisioned.output(&initializer.logical_id, Attribute::Arn).unwrap()).unwrap();
    assert!(provider_role.statements[0].resources.contains(&PolicyResource::Arn(initializer_arn)));
}

#[test]
fn every_reference_resolves_before_and_after_provisioning() {
    let (_root, graph) = assemble(&config("dbWriterFn"));
    for (from, attr) in graph.references() {
        let target = graph
            .get(&attr.target)
            .unwrap_or_else(|| panic!("{from} dangles at {attr}"));
        assert!(target.kind().exposes(attr.attribute));
    }

    let (provisioned, _) = provision(&graph);
    for (_, attr) in graph.references() {
        assert!(provisioned.output(&attr.target, attr.attribute).is_some(), "{attr} unresolved");
    }
    assert_eq!(provisioned.creation_order.len(), graph.len());
}

#[test]
fn role_scopes_are_exact_graph_identifiers() {
    let mut config = config("dbWriterFn");
    config.alerts.writer_failures = true;
    let (_root, graph) = assemble(&config);
    let (provisioned, _) = provision(&graph);

    let arns: BTreeSet<&str> = provisioned
        .outputs
        .values()
        .filter_map(|r| r.get(Attribute::Arn))
        .collect();
    for role in provisioned.roles.values() {
        for (action, scope) in role.grants() {
            assert!(Action::parse(action.as_str()).is_some());
            let PolicyResource::Arn(arn) = scope else {
                panic!("unresolved scope");
            };
            assert!(!arn.is_wildcard());
            assert!(arns.contains(arn.to_string().as_str()), "{arn} is not in the graph");
        }
    }
}

#[test]
fn one_nat_gateway_places_database_in_isolated_tier() {
    let (_root, graph) = assemble(&config("dbWriterFn"));
    let ResourceSpec::Network(topology) = &find(&graph, "AuxiliaryComponentsVPC").spec else {
        panic!("no network");
    };
    assert_eq!(topology.nat_gateways, 1);
    assert_eq!(topology.tiers.len(), 2);

    let ResourceSpec::Database(db) = &find(&graph, "lightUsageDB").spec else {
        panic!("no database");
    };
    assert_eq!(db.placement.kind, SubnetKind::PrivateIsolated);
    assert_eq!(db.placement.tier, "Private");
    assert!(!db.publicly_accessible);
}

#[test]
fn credentials_flow_only_through_the_pointer() {
    let (_root, graph) = assemble(&config("dbWriterFn"));
    let (provisioned, engine) = provision(&graph);

    assert_eq!(provisioned.parameter.target, provisioned.secret.arn);
    assert_eq!(
        engine.parameter_value(&provisioned.parameter.name),
        Some(provisioned.secret.arn.to_string().as_str())
    );

    let parameter = find(&graph, "UsageDBCredentialsArn");
    for unit in graph.iter().filter_map(|r| match &r.spec {
        ResourceSpec::Function(unit) => Some(unit),
        _ => None,
    }) {
        assert_eq!(
            unit.environment[ENV_DB_CREDENTIALS],
            EnvValue::Ref(parameter.attr(Attribute::Name))
        );
    }
}

#[test]
fn provisioned_database_requires_both_gates() {
    let (_root, graph) = assemble(&config("dbWriterFn"));
    let (provisioned, engine) = provision(&graph);

    let document: serde_json::Value =
        serde_json::from_str(engine.secret_value(&provisioned.secret.arn.to_string()).unwrap()).unwrap();
    let username = document["username"].as_str().unwrap();
    let password = document["password"].as_str().unwrap();
    assert_eq!(username, "postgres");
    assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    let credential = GeneratedCredential::new(username, password.to_string());

    let db_group = find(&graph, "UsageDBSecGroup");
    let ResourceSpec::AccessBoundary(db_boundary) = &db_group.spec else {
        panic!("no database boundary");
    };
    let compute_group = find(&graph, "DBWriterSecurityGroup");
    let ResourceSpec::AccessBoundary(compute_boundary) = &compute_group.spec else {
        panic!("no compute boundary");
    };

    // The writer sits in the compute boundary and connects to the database.
    let attempt = |port: u16, password: &str| AccessRequest {
        source: Endpoint {
            address: Ipv4Addr::new(10, 0, 2, 40),
            boundaries: vec![compute_group.logical_id.clone()],
        },
        destination: Endpoint {
            address: Ipv4Addr::new(10, 0, 3, 20),
            boundaries: vec![db_group.logical_id.clone()],
        },
        port,
        username: "postgres".to_string(),
        password: password.to_string(),
    };
    let decide = |request: &AccessRequest| evaluate_access(compute_boundary, db_boundary, &credential, request);

    assert_eq!(decide(&attempt(54600, password)), AccessDecision::Allowed);
    assert_eq!(decide(&attempt(54600, "guess")), AccessDecision::DeniedByCredentials);
    assert_eq!(decide(&attempt(5432, password)), AccessDecision::DeniedByNetwork);

    // Without the egress grant the compute side blocks the connection even
    // though the database admits the port from anywhere.
    let closed = AccessBoundary {
        egress: Vec::new(),
        ..compute_boundary.clone()
    };
    assert_eq!(
        evaluate_access(&closed, db_boundary, &credential, &attempt(54600, password)),
        AccessDecision::DeniedByNetwork
    );

    // A client outside the network with open egress still needs the secret.
    let outside = AccessBoundary {
        egress: vec![EgressRule::allow_all()],
        ..compute_boundary.clone()
    };
    let mut stranger = attempt(54600, "guess");
    stranger.source = Endpoint {
        address: Ipv4Addr::new(203, 0, 113, 50),
        boundaries: Vec::new(),
    };
    assert_eq!(
        evaluate_access(&outside, db_boundary, &credential, &stranger),
        AccessDecision::DeniedByCredentials
    );
}

#[test]
fn compute_boundary_grants_only_database_egress() {
    let (_root, graph) = assemble(&config("dbWriterFn"));
    let db_group = find(&graph, "UsageDBSecGroup").logical_id.clone();
    let compute = find(&graph, "DBWriterSecurityGroup");
    let ResourceSpec::AccessBoundary(boundary) = &compute.spec else {
        panic!("no compute boundary");
    };

    assert!(boundary.ingress.is_empty());
    assert_eq!(boundary.egress.len(), 1);
    assert_eq!(boundary.egress[0].port, Port::Tcp(54600));
    assert!(matches!(&boundary.egress[0].peer, Peer::Boundary(group) if group.target == db_group));

    // The grant is a dependency: the database boundary exists first.
    let order = graph.creation_order().unwrap();
    let position = |id: &lightwatch_core::LogicalId| order.iter().position(|r| r == id).unwrap();
    assert!(position(&db_group) < position(&compute.logical_id));
}

#[test]
fn bootstrap_target_names_the_initializer() {
    let (_root, graph) = assemble(&config("dbWriterFn"));
    let (provisioned, _) = provision(&graph);
    let target = provisioned.bootstrap.as_ref().unwrap();
    let initializer = find(&graph, "DBInitializerFn");

    assert_eq!(target.identity, "invocation upon creation");
    assert_eq!(target.timeout_secs, 300);
    assert_eq!(
        Some(target.function_arn.as_str()),
        provisioned.output(&initializer.logical_id, Attribute::Arn)
    );
}

#[test]
fn secret_material_in_environment_is_rejected() {
    let (_root, mut graph) = assemble(&config("dbWriterFn"));
    let secret = find(&graph, "UsageDBCredentialsSecret").attr(Attribute::Arn);
    let writer = find(&graph, "DBWriterFn").logical_id.clone();
    if let Some(ResourceSpec::Function(unit)) = graph.spec_mut(&writer) {
        unit.environment.insert("DB_SECRET".to_string(), EnvValue::Ref(secret));
    }
    assert!(matches!(
        graph.validate(),
        Err(GraphError::EmbeddedSecret { variable, .. }) if variable == "DB_SECRET"
    ));
}

#[test]
fn shared_roles_are_rejected() {
    let (_root, mut graph) = assemble(&config("dbWriterFn"));
    let writer_role = writer_unit(&graph).execution_role.clone();
    let initializer = find(&graph, "DBInitializerFn").logical_id.clone();
    if let Some(ResourceSpec::Function(unit)) = graph.spec_mut(&initializer) {
        unit.execution_role = writer_role;
    }
    assert!(matches!(graph.validate(), Err(GraphError::SharedRole { count: 2, .. })));
}

#[test]
fn open_compute_egress_is_rejected() {
    let (_root, mut graph) = assemble(&config("dbWriterFn"));
    let boundary = find(&graph, "DBWriterSecurityGroup").logical_id.clone();
    if let Some(ResourceSpec::AccessBoundary(b)) = graph.spec_mut(&boundary) {
        b.egress.push(EgressRule::allow_all());
    }
    assert!(matches!(graph.validate(), Err(GraphError::OpenEgress { .. })));
}

#[test]
fn compute_egress_to_every_port_is_rejected() {
    let (_root, mut graph) = assemble(&config("dbWriterFn"));
    let boundary = find(&graph, "DBWriterSecurityGroup").logical_id.clone();
    if let Some(ResourceSpec::AccessBoundary(b)) = graph.spec_mut(&boundary) {
        b.egress[0].port = Port::AllTraffic;
    }
    assert!(matches!(graph.validate(), Err(GraphError::OpenEgress { .. })));
}

#[test]
fn public_placement_is_rejected() {
    let (_root, mut graph) = assemble(&config("dbWriterFn"));
    let database = find(&graph, "lightUsageDB").logical_id.clone();
    if let Some(ResourceSpec::Database(db)) = graph.spec_mut(&database) {
        db.placement.kind = SubnetKind::Public;
        db.placement.tier = "public".to_string();
    }
    assert!(matches!(graph.validate(), Err(GraphError::Placement { .. })));
}

#[test]
fn wildcard_statements_are_rejected() {
    let (_root, mut graph) = assemble(&config("dbWriterFn"));
    let role = writer_unit(&graph).execution_role.target.clone();
    if let Some(ResourceSpec::Role(r)) = graph.spec_mut(&role) {
        r.statements.push(PolicyStatement {
            actions: [Action::parse("sqs:SendMessage").unwrap()].into(),
            resources: [PolicyResource::Arn(
                Arn::parse("arn:aws:sqs:us-east-1:123456789012:*").unwrap(),
            )]
            .into(),
        });
    }
    assert!(matches!(graph.validate(), Err(GraphError::WildcardScope { .. })));
}

#[test]
fn dangling_reference_is_rejected() {
    let (_root, mut graph) = assemble(&config("dbWriterFn"));
    let writer = find(&graph, "DBWriterFn").logical_id.clone();
    let ghost = AttrRef::new(
        lightwatch_core::LogicalId::from_path(&lightwatch_core::ConstructPath::root("Ghost")),
        Attribute::Name,
    );
    if let Some(ResourceSpec::Function(unit)) = graph.spec_mut(&writer) {
        unit.environment.insert("GHOST".to_string(), EnvValue::Ref(ghost));
    }
    assert!(matches!(graph.validate(), Err(GraphError::DanglingReference { .. })));
}

#[test]
fn engine_failure_stops_the_walk_without_rollback() {
    let (_root, graph) = assemble(&config("dbWriterFn"));
    let database = find(&graph, "lightUsageDB").logical_id.clone();
    let order = graph.creation_order().unwrap();
    let before = order.iter().position(|id| *id == database).unwrap();

    let mut provisioner = Provisioner::new(InMemoryEngine::new().fail_on(database, "insufficient capacity"));
    let err = provisioner.provision(&graph).unwrap_err();
    assert!(matches!(err, GraphError::Engine(EngineError::Rejected { .. })));
    assert_eq!(provisioner.engine().created().len(), before);
}
