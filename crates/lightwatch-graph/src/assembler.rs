//! Builds the data-collection resource graph from configuration.
//!
//! Assembly is all-or-nothing: configuration, module paths, and every
//! cross-resource reference are checked before a graph is returned, so a
//! bad template never reaches the provisioning engine.

use std::collections::BTreeMap;

use lightwatch_core::{AwsEnv, ConstructPath, LightwatchConfig, ModuleResolver};
use tracing::info;

use crate::boundary::{AccessBoundary, Peer, Port};
use crate::credentials::{CredentialSecret, ParameterPointer};
use crate::error::{GraphError, GraphResult};
use crate::graph::{Attribute, Resource, ResourceGraph, ResourceSpec};
use crate::network::{NetworkTopology, SubnetKind};
use crate::policy::{Interaction, PolicyBuilder};
use crate::resources::{
    AlertRoute, Architecture, BootstrapProvider, BootstrapResource, ComputeUnit, DatabaseEngine,
    EnvValue, EventBinding, ManagedDatabase, NotificationChannel, Queue, UnitRole,
};

/// Construct scope every data-collection resource lives under.
pub const DATA_COLLECTION_SCOPE: &str = "DataCollection";

/// Environment variable names handed to the compute units.
pub const ENV_DB_CREDENTIALS: &str = "DB_CREDENTIALS";
pub const ENV_WRITE_QUEUE_URL: &str = "WRITE_QUEUE_URL";
pub const ENV_ALERT_TOPIC_ARN: &str = "ALERT_TOPIC_ARN";

const DB_INSTANCE_CLASS: &str = "db.t4g.micro";
const WRITER_MEMORY_MB: u32 = 128;
const WRITER_TIMEOUT_SECS: u32 = 30;
const INITIALIZER_TIMEOUT_SECS: u32 = 60;
const QUEUE_BATCH_SIZE: u32 = 10;

#[derive(Debug, Default)]
pub struct Assembler;

impl Assembler {
    /// Assemble the graph for `template`.
    ///
    /// Fails with [`GraphError::DataCollectionDisabled`] when the template
    /// names no writer module.
    pub fn assemble(
        config: &LightwatchConfig,
        template: &str,
        resolver: &dyn ModuleResolver,
    ) -> GraphResult<ResourceGraph> {
        config.validate()?;
        let tpl = config.template(template)?;
        let writer_module = tpl
            .writer_module()
            .ok_or_else(|| GraphError::DataCollectionDisabled(template.to_string()))?;
        let dc = &config.data_collection;

        let writer_build = resolver.resolve(writer_module)?;
        let initializer_build = resolver.resolve(&dc.initializer_module)?;

        let env = AwsEnv::new(&config.stack.region, &config.stack.account);
        let mut graph = ResourceGraph::new(&config.stack.name, template, env);
        let scope = ConstructPath::root(DATA_COLLECTION_SCOPE);

        // Network and credentials.
        let topology = NetworkTopology::public_and_isolated(dc.nat_gateways, dc.subnet_cidr_mask);
        let vpc = Resource::new(scope.child("AuxiliaryComponentsVPC"), ResourceSpec::Network(topology.clone()));
        let vpc_id = vpc.attr(Attribute::Id);
        let isolated = topology.select(vpc_id.clone(), SubnetKind::PrivateIsolated)?;
        graph.add(vpc)?;

        let secret = Resource::new(
            scope.child("UsageDBCredentialsSecret"),
            ResourceSpec::Secret(CredentialSecret::new(&dc.secret_name, &dc.db_username)),
        );
        let secret_arn = secret.attr(Attribute::Arn);
        graph.add(secret)?;

        let parameter = Resource::new(
            scope.child("UsageDBCredentialsArn"),
            ResourceSpec::Parameter(ParameterPointer {
                name: dc.parameter_name.clone(),
                value: secret_arn.clone(),
            }),
        );
        let parameter_id = parameter.logical_id.clone();
        let parameter_name = parameter.attr(Attribute::Name);
        graph.add(parameter)?;

        // Database behind its own boundary.
        let db_boundary = Resource::new(
            scope.child("UsageDBSecGroup"),
            ResourceSpec::AccessBoundary(AccessBoundary::database(vpc_id.clone(), dc.db_port)),
        );
        let db_boundary_id = db_boundary.attr(Attribute::Id);
        graph.add(db_boundary)?;

        // Created in the stack's own scope, outside DataCollection.
        let database = Resource::new(
            ConstructPath::root("lightUsageDB"),
            ResourceSpec::Database(ManagedDatabase {
                engine: DatabaseEngine::Postgres,
                engine_version: None,
                instance_class: DB_INSTANCE_CLASS.to_string(),
                multi_az: false,
                allow_major_version_upgrade: true,
                backup_retention_days: dc.backup_retention_days,
                allocated_storage_gib: dc.allocated_storage_gib,
                max_allocated_storage_gib: dc.max_allocated_storage_gib,
                port: dc.db_port,
                publicly_accessible: false,
                placement: isolated.clone(),
                boundaries: vec![db_boundary_id.clone()],
                credentials: secret_arn,
            }),
        );
        let database_id = database.logical_id.clone();
        graph.add(database)?;

        // Queue and alert channel.
        let queue = Resource::new(scope.child("LightBehaviorQueue"), ResourceSpec::Queue(Queue::default()));
        let queue_id = queue.logical_id.clone();
        let queue_name = queue.attr(Attribute::Name);
        let queue_arn = queue.attr(Attribute::Arn);
        graph.add(queue)?;

        let topic = Resource::new(
            scope.child("dbFailNotifier"),
            ResourceSpec::Topic(NotificationChannel {
                display_name: "dbFailNotifier".to_string(),
            }),
        );
        let topic_id = topic.logical_id.clone();
        let topic_arn = topic.attr(Attribute::Arn);
        graph.add(topic)?;

        let compute_boundary = Resource::new(
            scope.child("DBWriterSecurityGroup"),
            ResourceSpec::AccessBoundary(AccessBoundary::compute(vpc_id).allow_egress(
                Peer::Boundary(db_boundary_id),
                Port::Tcp(dc.db_port),
                format!("to light usage db:{}", dc.db_port),
            )),
        );
        let compute_boundary_id = compute_boundary.attr(Attribute::Id);
        graph.add(compute_boundary)?;

        // Writer.
        let alerts = config.alerts.writer_failures;
        let writer_path = scope.child("DBWriterFn");
        let mut writer_policy = PolicyBuilder::new()
            .allow(Interaction::ConsumeQueue(queue_id))
            .allow(Interaction::ReadParameter(parameter_id.clone()));
        if alerts {
            writer_policy = writer_policy.allow(Interaction::PublishAlerts(topic_id.clone()));
        }
        let writer_role = Resource::new(
            writer_path.child("ServiceRole"),
            ResourceSpec::Role(writer_policy.build_role()),
        );
        let writer_role_arn = writer_role.attr(Attribute::Arn);
        graph.add(writer_role)?;

        let mut writer_env = BTreeMap::from([
            (ENV_DB_CREDENTIALS.to_string(), EnvValue::Ref(parameter_name.clone())),
            (ENV_WRITE_QUEUE_URL.to_string(), EnvValue::Ref(queue_name)),
        ]);
        if alerts {
            writer_env.insert(ENV_ALERT_TOPIC_ARN.to_string(), EnvValue::Ref(topic_arn));
        }
        let writer = Resource::new(
            writer_path.clone(),
            ResourceSpec::Function(ComputeUnit {
                unit: UnitRole::Writer,
                description: "Writes light trigger action and time to Postgres db".to_string(),
                module: writer_module.to_string(),
                build_path: writer_build,
                architecture: Architecture::Arm64,
                memory_mb: WRITER_MEMORY_MB,
                timeout_secs: WRITER_TIMEOUT_SECS,
                environment: writer_env,
                placement: isolated.clone(),
                boundaries: vec![compute_boundary_id.clone()],
                execution_role: writer_role_arn,
            }),
        );
        let writer_id = writer.logical_id.clone();
        let writer_arn = writer.attr(Attribute::Arn);
        graph.add(writer)?;

        graph.add(Resource::new(
            writer_path.child("SqsEventSource"),
            ResourceSpec::EventBinding(EventBinding {
                queue: queue_arn,
                function: writer_arn,
                batch_size: QUEUE_BATCH_SIZE,
                enabled: true,
            }),
        ))?;

        if alerts {
            graph.add_alert_route(AlertRoute {
                source: writer_id,
                channel: topic_id,
            });
        }

        // Initializer with its own role. Schema creation needs the database up.
        let initializer_path = scope.child("DBInitializerFn");
        let initializer_role = Resource::new(
            initializer_path.child("ServiceRole"),
            ResourceSpec::Role(
                PolicyBuilder::new()
                    .allow(Interaction::ReadParameter(parameter_id))
                    .build_role(),
            ),
        );
        let initializer_role_arn = initializer_role.attr(Attribute::Arn);
        graph.add(initializer_role)?;

        let initializer = Resource::new(
            initializer_path,
            ResourceSpec::Function(ComputeUnit {
                unit: UnitRole::Initializer,
                description: "Creates table in db upon deployment, then stays dormant".to_string(),
                module: dc.initializer_module.clone(),
                build_path: initializer_build,
                architecture: Architecture::Arm64,
                memory_mb: WRITER_MEMORY_MB,
                timeout_secs: INITIALIZER_TIMEOUT_SECS,
                environment: BTreeMap::from([(ENV_DB_CREDENTIALS.to_string(), EnvValue::Ref(parameter_name))]),
                placement: isolated,
                boundaries: vec![compute_boundary_id],
                execution_role: initializer_role_arn,
            }),
        )
        .with_dependency(database_id);
        let initializer_id = initializer.logical_id.clone();
        let initializer_arn = initializer.attr(Attribute::Arn);
        graph.add(initializer)?;

        // Bootstrap provider and the invocation record.
        let provider_path = scope.child("CustomeResourceProvider-Initializer");
        let provider_role = Resource::new(
            provider_path.child("ServiceRole"),
            ResourceSpec::Role(
                PolicyBuilder::new()
                    .allow(Interaction::InvokeFunction(initializer_id))
                    .build_role(),
            ),
        );
        let provider_role_arn = provider_role.attr(Attribute::Arn);
        graph.add(provider_role)?;

        let provider = Resource::new(
            provider_path,
            ResourceSpec::Provider(BootstrapProvider {
                target: initializer_arn,
                role: provider_role_arn,
                log_retention_days: dc.provider_log_retention_days,
                timeout_secs: dc.bootstrap_timeout_secs,
            }),
        );
        let service_token = provider.attr(Attribute::Arn);
        graph.add(provider)?;

        graph.add(Resource::new(
            scope.child("CustomResource-Initializer"),
            ResourceSpec::Bootstrap(BootstrapResource {
                service_token,
                physical_resource_id: dc.bootstrap_identity.clone(),
            }),
        ))?;

        graph.validate()?;
        info!(
            stack = %graph.stack,
            template,
            resources = graph.len(),
            alerts,
            "data collection graph assembled"
        );
        Ok(graph)
    }
}
