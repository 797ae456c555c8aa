//! Synthesizes the Kubernetes objects of a [`v1alpha1::AirflowCluster`]: per role group a
//! ConfigMap, a StatefulSet and its Services, per role a PodDisruptionBudget.
use const_format::concatcp;
use snafu::{ResultExt, Snafu, ensure};
use stackable_operator::{
    builder::{
        self,
        configmap::ConfigMapBuilder,
        meta::ObjectMetaBuilder,
        pod::{
            PodBuilder, container::ContainerBuilder, resources::ResourceRequirementsBuilder,
            security::PodSecurityContextBuilder, volume::VolumeBuilder,
        },
    },
    commons::product_image_selection::ResolvedProductImage,
    k8s_openapi::{
        self, DeepMerge,
        api::{
            apps::v1::{StatefulSet, StatefulSetSpec},
            core::v1::{
                ConfigMap, ContainerPort, EmptyDirVolumeSource, EnvVar, Probe, TCPSocketAction,
                VolumeMount,
            },
        },
        apimachinery::pkg::{apis::meta::v1::LabelSelector, util::intstr::IntOrString},
    },
    kube::ResourceExt,
    kvp::{Label, LabelError, Labels},
    product_logging::{
        self,
        framework::LoggingError,
        spec::ContainerLogConfig,
    },
    role_utils::RoleGroupRef,
    utils::COMMON_BASH_TRAP_FUNCTIONS,
};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    config,
    controller_commons::{self, CONFIG_VOLUME_NAME, LOG_CONFIG_VOLUME_NAME, LOG_VOLUME_NAME},
    crd::{
        self, AIRFLOW_CONFIG_FILENAME, AIRFLOW_UID, APP_NAME, AirflowConfig, AirflowExecutor,
        AirflowRole, CONFIG_PATH, Container, HTTP_PORT_NAME, LOG_CONFIG_DIR, METRICS_PORT_NAME,
        OPERATOR_NAME, RoleGroupOverrides, STACKABLE_LOG_DIR,
        authentication::{
            AirflowClientAuthenticationDetailsResolved, AuthenticationClassLookup, Authenticator,
        },
        build_recommended_labels,
        git_sync::{GIT_SYNC_CONTENT, GIT_SYNC_NAME, GIT_SYNC_ROOT, GitSync},
        v1alpha1,
    },
    env_vars::{build_airflow_statefulset_envs, build_gitsync_statefulset_envs},
    operations::graceful_shutdown::{self, add_airflow_graceful_shutdown_config},
    product_logging::{VectorConfigGenerator, extend_config_map_with_log_config},
    service::stateful_set_service_name,
};

pub use self::{
    apply::write_cluster_resources,
    types::{BuiltClusterResource, FailurePolicy, SynthesisOptions},
};

mod apply;
mod build;
mod fetch;
mod types;

pub const AIRFLOW_CONTROLLER_NAME: &str = "airflowcluster";
pub const DOCKER_IMAGE_BASE_NAME: &str = "airflow";
pub const AIRFLOW_FULL_CONTROLLER_NAME: &str =
    concatcp!(AIRFLOW_CONTROLLER_NAME, '.', OPERATOR_NAME);

const METRICS_CONTAINER_NAME: &str = "metrics";

/// Failures while building the objects of a single role group.
#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("the cluster references no credentials secret"))]
    MissingCredentials,

    #[snafu(display("failed to resolve and merge config for role and role group"))]
    FailedToResolveConfig { source: crd::Error },

    #[snafu(display("object is missing metadata to build owner reference"))]
    ObjectMissingMetadataForOwnerRef {
        source: stackable_operator::builder::meta::Error,
    },

    #[snafu(display("failed to build object meta data"))]
    ObjectMeta {
        source: stackable_operator::builder::meta::Error,
    },

    #[snafu(display("failed to build label"))]
    BuildLabel { source: LabelError },

    #[snafu(display("failed to build {AIRFLOW_CONFIG_FILENAME} for {rolegroup}"))]
    BuildRoleGroupConfigFile {
        source: config::Error,
        rolegroup: RoleGroupRef<v1alpha1::AirflowCluster>,
    },

    #[snafu(display("failed to build ConfigMap for {rolegroup}"))]
    BuildRoleGroupConfig {
        source: stackable_operator::builder::configmap::Error,
        rolegroup: RoleGroupRef<v1alpha1::AirflowCluster>,
    },

    #[snafu(display("failed to generate the Vector configuration for {rolegroup}"))]
    GenerateVectorConfig {
        source: Box<dyn std::error::Error + Send + Sync>,
        rolegroup: RoleGroupRef<v1alpha1::AirflowCluster>,
    },

    #[snafu(display("failed to configure logging"))]
    ConfigureLogging { source: LoggingError },

    #[snafu(display("invalid container name"))]
    InvalidContainerName {
        source: stackable_operator::builder::pod::container::Error,
    },

    #[snafu(display("failed to add needed volume"))]
    AddVolume { source: builder::pod::Error },

    #[snafu(display("failed to add needed volumeMount"))]
    AddVolumeMount {
        source: builder::pod::container::Error,
    },

    #[snafu(display("failed to add the volumes of the authentication classes"))]
    AddAuthenticationVolumes {
        source: crd::authentication::Error,
    },

    #[snafu(display("failed to configure graceful shutdown"))]
    GracefulShutdown { source: graceful_shutdown::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum SynthesisError {
    #[snafu(display("failed to fetch the referenced objects"))]
    FetchAdditionalData { source: fetch::Error },

    #[snafu(display("failed to build the cluster resources"))]
    BuildClusterResources { source: build::Error },
}

impl SynthesisError {
    pub fn category(&self) -> &'static str {
        SynthesisErrorDiscriminants::from(self).into()
    }
}

/// Builds every object of the cluster. Authentication is resolved once up front, everything after
/// that is pure.
pub async fn synthesize_airflow<L, G>(
    airflow: &v1alpha1::AirflowCluster,
    lookup: &L,
    vector_config_generator: &G,
    options: &SynthesisOptions,
) -> Result<Vec<BuiltClusterResource>, SynthesisError>
where
    L: AuthenticationClassLookup + Sync,
    G: VectorConfigGenerator,
{
    tracing::info!(cluster = %airflow.name_any(), "Starting synthesis");

    let additional_data = fetch::fetch_additional_data(airflow, lookup, options)
        .await
        .context(FetchAdditionalDataSnafu)?;

    build::build_cluster_resources(
        airflow,
        &additional_data,
        vector_config_generator,
        options.failure_policy,
    )
    .context(BuildClusterResourcesSnafu)
}

/// The rolegroup [`ConfigMap`] configures the rolegroup based on the configuration given by the administrator
#[allow(clippy::too_many_arguments)]
fn build_rolegroup_config_map<G: VectorConfigGenerator>(
    airflow: &v1alpha1::AirflowCluster,
    resolved_product_image: &ResolvedProductImage,
    airflow_role: &AirflowRole,
    rolegroup: &RoleGroupRef<v1alpha1::AirflowCluster>,
    authentication_config: &AirflowClientAuthenticationDetailsResolved,
    merged_airflow_config: &AirflowConfig,
    overrides: &RoleGroupOverrides,
    vector_config_generator: &G,
) -> Result<ConfigMap> {
    tracing::debug!(
        "Config overrides for {}: {:?}",
        rolegroup.object_name(),
        overrides.config_overrides
    );

    let webserver_config =
        config::build_webserver_config(authentication_config, &overrides.config_overrides)
            .with_context(|_| BuildRoleGroupConfigFileSnafu {
                rolegroup: rolegroup.clone(),
            })?;

    let mut cm_builder = ConfigMapBuilder::new();

    cm_builder
        .metadata(
            ObjectMetaBuilder::new()
                .name_and_namespace(airflow)
                .name(rolegroup.object_name())
                .ownerreference_from_resource(airflow, None, Some(true))
                .context(ObjectMissingMetadataForOwnerRefSnafu)?
                .with_recommended_labels(build_recommended_labels(
                    airflow,
                    AIRFLOW_CONTROLLER_NAME,
                    &resolved_product_image.app_version_label,
                    &rolegroup.role,
                    &rolegroup.role_group,
                ))
                .context(ObjectMetaSnafu)?
                .build(),
        )
        .add_data(AIRFLOW_CONFIG_FILENAME, webserver_config);

    extend_config_map_with_log_config(
        airflow,
        airflow_role,
        rolegroup,
        &merged_airflow_config.logging,
        vector_config_generator,
        &mut cm_builder,
    )
    .map_err(|source| Error::GenerateVectorConfig {
        source: source.into(),
        rolegroup: rolegroup.clone(),
    })?;

    cm_builder
        .build()
        .with_context(|_| BuildRoleGroupConfigSnafu {
            rolegroup: rolegroup.clone(),
        })
}

/// The rolegroup [`StatefulSet`] runs the rolegroup, as configured by the administrator.
///
/// Replicas are taken from the role group and set to 0 while the cluster is stopped.
#[allow(clippy::too_many_arguments)]
fn build_server_rolegroup_statefulset(
    airflow: &v1alpha1::AirflowCluster,
    resolved_product_image: &ResolvedProductImage,
    airflow_role: &AirflowRole,
    rolegroup_ref: &RoleGroupRef<v1alpha1::AirflowCluster>,
    replicas: u16,
    authentication_config: &AirflowClientAuthenticationDetailsResolved,
    merged_airflow_config: &AirflowConfig,
    overrides: &RoleGroupOverrides,
) -> Result<StatefulSet> {
    let credentials_secret = &airflow.spec.cluster_config.credentials_secret;
    ensure!(!credentials_secret.is_empty(), MissingCredentialsSnafu);

    let executor = airflow.spec.executor();
    let main_container = airflow_role.container();

    let mut pb = PodBuilder::new();

    let pb_metadata = ObjectMetaBuilder::new()
        .with_recommended_labels(build_recommended_labels(
            airflow,
            AIRFLOW_CONTROLLER_NAME,
            &resolved_product_image.app_version_label,
            &rolegroup_ref.role,
            &rolegroup_ref.role_group,
        ))
        .context(ObjectMetaSnafu)?
        .build();

    pb.metadata(pb_metadata)
        .image_pull_secrets_from_product_image(resolved_product_image)
        .affinity(&merged_airflow_config.affinity)
        .security_context(
            PodSecurityContextBuilder::new()
                .run_as_user(AIRFLOW_UID)
                .run_as_group(0)
                .fs_group(1000)
                .build(),
        );

    let mut airflow_container = ContainerBuilder::new(&main_container.to_string())
        .context(InvalidContainerNameSnafu)?;

    authentication_config
        .add_volumes_and_mounts(&mut pb, &mut airflow_container)
        .context(AddAuthenticationVolumesSnafu)?;

    add_airflow_graceful_shutdown_config(merged_airflow_config, &mut pb)
        .context(GracefulShutdownSnafu)?;

    let airflow_container_args = airflow_role.get_commands(authentication_config);

    airflow_container
        .image_from_product_image(resolved_product_image)
        .resources(merged_airflow_config.resources.clone().into())
        .command(bash_command())
        .args(vec![airflow_container_args.join("\n")])
        .add_env_vars(build_airflow_statefulset_envs(
            airflow,
            airflow_role,
            credentials_secret,
            authentication_config,
            &overrides.env_overrides,
        ));

    airflow_container
        .add_volume_mounts(airflow.volume_mounts())
        .context(AddVolumeMountSnafu)?
        .add_volume_mount(CONFIG_VOLUME_NAME, CONFIG_PATH)
        .context(AddVolumeMountSnafu)?
        .add_volume_mount(LOG_CONFIG_VOLUME_NAME, LOG_CONFIG_DIR)
        .context(AddVolumeMountSnafu)?
        .add_volume_mount(LOG_VOLUME_NAME, STACKABLE_LOG_DIR)
        .context(AddVolumeMountSnafu)?;

    if let Some(resolved_port) = airflow_role.get_http_port() {
        let probe = Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(resolved_port.into()),
                ..TCPSocketAction::default()
            }),
            initial_delay_seconds: Some(60),
            period_seconds: Some(10),
            failure_threshold: Some(6),
            ..Probe::default()
        };
        airflow_container.readiness_probe(probe.clone());
        airflow_container.liveness_probe(probe);
        airflow_container.add_container_port(HTTP_PORT_NAME, resolved_port.into());
    }

    pb.add_container(airflow_container.build());
    pb.add_container(build_metrics_container(resolved_product_image, airflow_role)?);

    pb.add_volumes(airflow.volumes().clone())
        .context(AddVolumeSnafu)?;
    pb.add_volumes(controller_commons::create_volumes(
        &rolegroup_ref.object_name(),
        merged_airflow_config
            .logging
            .containers
            .get(&main_container),
    ))
    .context(AddVolumeSnafu)?;

    if let Some(gitsync) = airflow.git_sync() {
        let gitsync_container = build_gitsync_container(
            resolved_product_image,
            gitsync,
            false,
            &format!("{GIT_SYNC_NAME}-1"),
            build_gitsync_statefulset_envs(gitsync),
            airflow.volume_mounts(),
        )?;

        pb.add_volume(
            VolumeBuilder::new(GIT_SYNC_CONTENT)
                .empty_dir(EmptyDirVolumeSource::default())
                .build(),
        )
        .context(AddVolumeSnafu)?;

        pb.add_container(gitsync_container);

        if executor == AirflowExecutor::CeleryExecutor {
            // If the DAG is modularized the celery worker may start before git-sync has fetched
            // all modules the DAG refers to. A one-off sync in an init container avoids the
            // resulting ModuleNotFoundErrors, the sidecar keeps the checkout up to date.
            pb.add_init_container(build_gitsync_container(
                resolved_product_image,
                gitsync,
                true,
                &format!("{GIT_SYNC_NAME}-0"),
                build_gitsync_statefulset_envs(gitsync),
                airflow.volume_mounts(),
            )?);
        }
    }

    if let Some(vector_aggregator_config_map_name) = &airflow
        .spec
        .cluster_config
        .vector_aggregator_config_map_name
    {
        pb.add_container(build_logging_container(
            resolved_product_image,
            merged_airflow_config
                .logging
                .containers
                .get(&Container::Vector),
            vector_aggregator_config_map_name,
        )?);
    }

    let mut pod_template = pb.build_template();
    // role first, then the role group
    for pod_overrides in &overrides.pod_overrides {
        pod_template.merge_from(pod_overrides.clone());
    }

    let restarter_label =
        Label::try_from(("restarter.stackable.tech/enabled", "true")).context(BuildLabelSnafu)?;

    let metadata = ObjectMetaBuilder::new()
        .name_and_namespace(airflow)
        .name(rolegroup_ref.object_name())
        .ownerreference_from_resource(airflow, None, Some(true))
        .context(ObjectMissingMetadataForOwnerRefSnafu)?
        .with_recommended_labels(build_recommended_labels(
            airflow,
            AIRFLOW_CONTROLLER_NAME,
            &resolved_product_image.app_version_label,
            &rolegroup_ref.role,
            &rolegroup_ref.role_group,
        ))
        .context(ObjectMetaSnafu)?
        .with_label(restarter_label)
        .build();

    let statefulset_match_labels = Labels::role_group_selector(
        airflow,
        APP_NAME,
        &rolegroup_ref.role,
        &rolegroup_ref.role_group,
    )
    .context(BuildLabelSnafu)?;

    let statefulset_spec = StatefulSetSpec {
        pod_management_policy: Some(
            match airflow_role {
                // Scheduler pods start one after another, their startup initializes the database
                AirflowRole::Scheduler => "OrderedReady",
                AirflowRole::Webserver | AirflowRole::Worker => "Parallel",
            }
            .to_string(),
        ),
        replicas: Some(if airflow.spec.cluster_operation.stopped {
            0
        } else {
            replicas.into()
        }),
        selector: LabelSelector {
            match_labels: Some(statefulset_match_labels.into()),
            ..LabelSelector::default()
        },
        service_name: stateful_set_service_name(rolegroup_ref),
        template: pod_template,
        ..StatefulSetSpec::default()
    };

    Ok(StatefulSet {
        metadata,
        spec: Some(statefulset_spec),
        status: None,
    })
}

/// All container ports declared in the pod template of a StatefulSet.
fn statefulset_container_ports(statefulset: &StatefulSet) -> Vec<ContainerPort> {
    statefulset
        .spec
        .iter()
        .filter_map(|spec| spec.template.spec.as_ref())
        .flat_map(|pod_spec| &pod_spec.containers)
        .flat_map(|container| container.ports.iter().flatten())
        .cloned()
        .collect()
}

fn build_metrics_container(
    resolved_product_image: &ResolvedProductImage,
    airflow_role: &AirflowRole,
) -> Result<k8s_openapi::api::core::v1::Container> {
    let mut metrics_container =
        ContainerBuilder::new(METRICS_CONTAINER_NAME).context(InvalidContainerNameSnafu)?;

    metrics_container
        .image_from_product_image(resolved_product_image)
        .command(bash_command())
        .args(vec![
            [
                COMMON_BASH_TRAP_FUNCTIONS.to_string(),
                "prepare_signal_handlers".to_string(),
                "/stackable/statsd_exporter &".to_string(),
                "wait_for_termination $!".to_string(),
            ]
            .join("\n"),
        ])
        .resources(
            ResourceRequirementsBuilder::new()
                .with_cpu_request("100m")
                .with_cpu_limit("200m")
                .with_memory_request("64Mi")
                .with_memory_limit("64Mi")
                .build(),
        );

    if let Some(metrics_port) = airflow_role.get_metrics_port() {
        metrics_container.add_container_port(METRICS_PORT_NAME, metrics_port.into());
    }

    Ok(metrics_container.build())
}

fn build_logging_container(
    resolved_product_image: &ResolvedProductImage,
    log_config: Option<&ContainerLogConfig>,
    vector_aggregator_config_map_name: &str,
) -> Result<k8s_openapi::api::core::v1::Container> {
    product_logging::framework::vector_container(
        resolved_product_image,
        CONFIG_VOLUME_NAME,
        LOG_VOLUME_NAME,
        log_config,
        ResourceRequirementsBuilder::new()
            .with_cpu_request("250m")
            .with_cpu_limit("500m")
            .with_memory_request("128Mi")
            .with_memory_limit("128Mi")
            .build(),
        vector_aggregator_config_map_name,
    )
    .context(ConfigureLoggingSnafu)
}

fn build_gitsync_container(
    resolved_product_image: &ResolvedProductImage,
    gitsync: &GitSync,
    one_time: bool,
    name: &str,
    env_vars: Vec<EnvVar>,
    volume_mounts: Vec<VolumeMount>,
) -> Result<k8s_openapi::api::core::v1::Container> {
    let gitsync_container = ContainerBuilder::new(name)
        .context(InvalidContainerNameSnafu)?
        .add_env_vars(env_vars)
        .image_from_product_image(resolved_product_image)
        .command(bash_command())
        .args(vec![gitsync.get_args(one_time).join("\n")])
        .add_volume_mount(GIT_SYNC_CONTENT, GIT_SYNC_ROOT)
        .context(AddVolumeMountSnafu)?
        .add_volume_mounts(volume_mounts)
        .context(AddVolumeMountSnafu)?
        .resources(
            ResourceRequirementsBuilder::new()
                .with_cpu_request("100m")
                .with_cpu_limit("200m")
                .with_memory_request("64Mi")
                .with_memory_limit("64Mi")
                .build(),
        )
        .build();
    Ok(gitsync_container)
}

fn bash_command() -> Vec<String> {
    vec![
        "/bin/bash".to_string(),
        "-x".to_string(),
        "-euo".to_string(),
        "pipefail".to_string(),
        "-c".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use strum::IntoEnumIterator;
    use stackable_operator::{
        k8s_openapi::api::core::v1::{Container as K8sContainer, PodSpec},
        product_logging::framework::VECTOR_CONFIG_FILE,
    };

    use super::*;
    use crate::{
        crd::authentication::AuthenticationClassStore,
        product_logging::{DefaultVectorConfigGenerator, LOG_CONFIG_FILE},
    };

    const AUTHENTICATION_CLASSES: &str = indoc! {"
        apiVersion: authentication.stackable.tech/v1alpha1
        kind: AuthenticationClass
        metadata:
          name: ldap
        spec:
          provider:
            ldap:
              hostname: openldap
              port: 1389
              searchBase: ou=users,dc=example,dc=org
              bindCredentials:
                secretClass: airflow-ldap-bind
        ---
        apiVersion: authentication.stackable.tech/v1alpha1
        kind: AuthenticationClass
        metadata:
          name: keycloak
        spec:
          provider:
            oidc:
              hostname: keycloak
              port: 8080
              rootPath: /realms/test/
              principalClaim: preferred_username
              scopes:
                - openid
                - email
    "};

    const SCHEDULER_ONLY: &str = "
        apiVersion: airflow.stackable.tech/v1alpha1
        kind: AirflowCluster
        metadata:
          name: airflow
          namespace: default
          uid: 12345678-1234-1234-1234-123456789012
        spec:
          image:
            productVersion: 2.10.4
          clusterConfig:
            credentialsSecret: creds
          schedulers:
            roleGroups:
              default:
                replicas: 1
        ";

    fn cluster(yaml: &str) -> v1alpha1::AirflowCluster {
        let deserializer = serde_yaml::Deserializer::from_str(yaml);
        serde_yaml::with::singleton_map_recursive::deserialize(deserializer)
            .expect("valid AirflowCluster")
    }

    async fn synthesize(
        airflow: &v1alpha1::AirflowCluster,
        options: &SynthesisOptions,
    ) -> Result<Vec<BuiltClusterResource>, SynthesisError> {
        let store = AuthenticationClassStore::from_yaml(AUTHENTICATION_CLASSES)
            .expect("valid AuthenticationClasses");
        synthesize_airflow(airflow, &store, &DefaultVectorConfigGenerator, options).await
    }

    fn statefulsets(resources: &[BuiltClusterResource]) -> Vec<&StatefulSet> {
        resources
            .iter()
            .filter_map(|resource| match resource {
                BuiltClusterResource::RolegroupStatefulSet(statefulset, _) => Some(statefulset),
                _ => None,
            })
            .collect()
    }

    fn config_maps(resources: &[BuiltClusterResource]) -> Vec<&ConfigMap> {
        resources
            .iter()
            .filter_map(|resource| match resource {
                BuiltClusterResource::RolegroupConfigMap(config_map, _) => Some(config_map),
                _ => None,
            })
            .collect()
    }

    fn service_names(resources: &[BuiltClusterResource]) -> Vec<&str> {
        resources
            .iter()
            .filter(|resource| matches!(resource, BuiltClusterResource::RolegroupService(..)))
            .filter_map(BuiltClusterResource::name)
            .collect()
    }

    fn pod_spec(statefulset: &StatefulSet) -> &PodSpec {
        statefulset
            .spec
            .as_ref()
            .and_then(|spec| spec.template.spec.as_ref())
            .expect("a pod spec")
    }

    fn main_container(statefulset: &StatefulSet) -> &K8sContainer {
        pod_spec(statefulset)
            .containers
            .iter()
            .find(|container| AirflowRole::iter().any(|role| container.name == role.to_string()))
            .expect("the main container")
    }

    fn env_names(container: &K8sContainer) -> Vec<&str> {
        container
            .env
            .iter()
            .flatten()
            .map(|env| env.name.as_str())
            .collect()
    }

    #[tokio::test]
    async fn test_scheduler_without_authentication() {
        let resources = synthesize(&cluster(SCHEDULER_ONLY), &SynthesisOptions::default())
            .await
            .unwrap();

        let config_maps = config_maps(&resources);
        assert_eq!(config_maps.len(), 1);
        assert_eq!(
            config_maps[0].metadata.name.as_deref(),
            Some("airflow-schedulers-default")
        );
        let data = config_maps[0].data.as_ref().unwrap();
        assert_eq!(data.len(), 3);
        assert!(data[AIRFLOW_CONFIG_FILENAME].contains("AUTH_TYPE = 'AUTH_DB'"));
        assert!(data.contains_key(LOG_CONFIG_FILE));
        assert_eq!(data[VECTOR_CONFIG_FILE], "");

        let statefulsets = statefulsets(&resources);
        assert_eq!(statefulsets.len(), 1);
        let spec = statefulsets[0].spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(spec.pod_management_policy.as_deref(), Some("OrderedReady"));

        let env = env_names(main_container(statefulsets[0]));
        assert!(env.contains(&"ADMIN_USERNAME"));
        assert!(!env.contains(&"OIDC_CLIENT_ID"));
        assert!(!env.contains(&"AIRFLOW__CELERY__BROKER_URL"));

        // the metrics sidecar is always present, but schedulers declare no metrics port
        let containers: Vec<_> = pod_spec(statefulsets[0])
            .containers
            .iter()
            .map(|container| container.name.as_str())
            .collect();
        assert_eq!(containers, vec!["schedulers", "metrics"]);
        assert!(service_names(&resources).is_empty());

        let pdbs: Vec<_> = resources
            .iter()
            .filter(|resource| matches!(resource, BuiltClusterResource::RolePdb(_)))
            .filter_map(BuiltClusterResource::name)
            .collect();
        assert_eq!(pdbs, vec!["airflow-schedulers"]);
    }

    #[tokio::test]
    async fn test_stopped_cluster_has_no_replicas() {
        let running = synthesize(&cluster(SCHEDULER_ONLY), &SynthesisOptions::default())
            .await
            .unwrap();

        let mut stopped_cluster = cluster(SCHEDULER_ONLY);
        stopped_cluster.spec.cluster_operation.stopped = true;
        let stopped = synthesize(&stopped_cluster, &SynthesisOptions::default())
            .await
            .unwrap();

        assert_eq!(
            statefulsets(&stopped)[0].spec.as_ref().unwrap().replicas,
            Some(0)
        );

        // everything else is identical
        let mut expected = statefulsets(&running)[0].clone();
        if let Some(spec) = expected.spec.as_mut() {
            spec.replicas = Some(0);
        }
        assert_eq!(statefulsets(&stopped)[0], &expected);
        assert_eq!(config_maps(&running), config_maps(&stopped));
    }

    #[tokio::test]
    async fn test_webserver_with_ldap_and_oidc() {
        let airflow = cluster(
            "
            apiVersion: airflow.stackable.tech/v1alpha1
            kind: AirflowCluster
            metadata:
              name: airflow
              namespace: default
              uid: 12345678-1234-1234-1234-123456789012
            spec:
              image:
                productVersion: 2.10.4
              clusterConfig:
                credentialsSecret: creds
                authentication:
                  - authenticationClass: ldap
                    syncRolesAt: Login
                  - authenticationClass: keycloak
                    oidc:
                      clientCredentialsSecret: airflow-oidc
                    syncRolesAt: Login
              webservers:
                roleGroups:
                  default:
                    replicas: 2
            ",
        );
        let resources = synthesize(&airflow, &SynthesisOptions::default())
            .await
            .unwrap();

        let config_maps = config_maps(&resources);
        let webserver_config = &config_maps[0].data.as_ref().unwrap()[AIRFLOW_CONFIG_FILENAME];
        let ldap = webserver_config
            .find("AUTH_TYPE = 'AUTH_LDAP'")
            .expect("an LDAP block");
        let oidc = webserver_config
            .find("OAUTH_PROVIDERS")
            .expect("an OIDC block");
        assert!(ldap < oidc);
        assert!(webserver_config.contains("AUTH_ROLES_SYNC_AT_LOGIN = True"));
        assert!(!webserver_config.contains("airflow-oidc"));

        let statefulset = statefulsets(&resources)[0];
        assert_eq!(statefulset.spec.as_ref().unwrap().replicas, Some(2));
        let airflow_container = main_container(statefulset);
        let env = env_names(airflow_container);
        assert!(env.contains(&"OIDC_CLIENT_ID"));
        assert!(env.contains(&"OIDC_CLIENT_SECRET"));
        assert!(!env.contains(&"ADMIN_USERNAME"));
        assert!(airflow_container.readiness_probe.is_some());
        assert!(airflow_container
            .volume_mounts
            .iter()
            .flatten()
            .any(|mount| mount.mount_path == "/stackable/secrets/airflow-ldap-bind"));

        assert_eq!(
            service_names(&resources),
            vec![
                "airflow-webservers-default-headless",
                "airflow-webservers-default-metrics"
            ]
        );
    }

    #[tokio::test]
    async fn test_vector_sidecar_is_attached_once() {
        let airflow = cluster(
            "
            apiVersion: airflow.stackable.tech/v1alpha1
            kind: AirflowCluster
            metadata:
              name: airflow
              namespace: default
              uid: 12345678-1234-1234-1234-123456789012
            spec:
              image:
                productVersion: 2.10.4
              clusterConfig:
                credentialsSecret: creds
                vectorAggregatorConfigMapName: vector-aggregator-discovery
              celeryExecutors:
                roleGroups:
                  default: {}
              schedulers:
                roleGroups:
                  default: {}
            ",
        );
        let resources = synthesize(&airflow, &SynthesisOptions::default())
            .await
            .unwrap();

        for statefulset in statefulsets(&resources) {
            let containers = &pod_spec(statefulset).containers;
            let vector: Vec<_> = containers
                .iter()
                .filter(|container| container.name == "vector")
                .collect();
            assert_eq!(vector.len(), 1);
            assert_eq!(containers.last().map(|c| c.name.as_str()), Some("vector"));
            assert!(env_names(main_container(statefulset)).contains(&"AIRFLOW__CELERY__BROKER_URL"));
        }
        for config_map in config_maps(&resources) {
            assert!(!config_map.data.as_ref().unwrap()[VECTOR_CONFIG_FILE].is_empty());
        }
    }

    #[tokio::test]
    async fn test_git_sync_init_container_for_celery_workers() {
        let airflow = cluster(
            "
            apiVersion: airflow.stackable.tech/v1alpha1
            kind: AirflowCluster
            metadata:
              name: airflow
              namespace: default
              uid: 12345678-1234-1234-1234-123456789012
            spec:
              image:
                productVersion: 2.10.4
              clusterConfig:
                credentialsSecret: creds
                dagsGitSync:
                  - repo: https://github.com/stackabletech/airflow-operator
                    gitFolder: tests/templates/kuttl/mount-dags-gitsync/dags
              celeryExecutors:
                roleGroups:
                  default: {}
            ",
        );
        let resources = synthesize(&airflow, &SynthesisOptions::default())
            .await
            .unwrap();

        let pod_spec = pod_spec(statefulsets(&resources)[0]);
        let init_containers: Vec<_> = pod_spec
            .init_containers
            .iter()
            .flatten()
            .map(|container| container.name.as_str())
            .collect();
        assert_eq!(init_containers, vec!["gitsync-0"]);
        assert!(pod_spec
            .containers
            .iter()
            .any(|container| container.name == "gitsync-1"));
        assert!(pod_spec
            .volumes
            .iter()
            .flatten()
            .any(|volume| volume.name == GIT_SYNC_CONTENT));
    }

    const BROKEN_GROUPS: &str = "
        apiVersion: airflow.stackable.tech/v1alpha1
        kind: AirflowCluster
        metadata:
          name: airflow
          namespace: default
          uid: 12345678-1234-1234-1234-123456789012
        spec:
          image:
            productVersion: 2.10.4
          clusterConfig:
            credentialsSecret: creds
          schedulers:
            roleGroups:
              # role group names end up in label values, which must end alphanumerically
              broken-a-: {}
              broken-b-: {}
              default: {}
        ";

    #[tokio::test]
    async fn test_first_error_policy() {
        let err = synthesize(&cluster(BROKEN_GROUPS), &SynthesisOptions::default())
            .await
            .unwrap_err();

        match err {
            SynthesisError::BuildClusterResources {
                source: build::Error::BuildRoleGroup { source, rolegroup },
            } => {
                assert_eq!(rolegroup.role_group, "broken-a-");
                assert_eq!(source.category(), "ObjectMeta");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_aggregate_policy() {
        let options = SynthesisOptions {
            failure_policy: FailurePolicy::Aggregate,
            ..SynthesisOptions::default()
        };
        let err = synthesize(&cluster(BROKEN_GROUPS), &options)
            .await
            .unwrap_err();

        match err {
            SynthesisError::BuildClusterResources {
                source: build::Error::RoleGroupsFailed { failures },
            } => assert_eq!(failures.len(), 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let mut airflow = cluster(SCHEDULER_ONLY);
        airflow.spec.cluster_config.credentials_secret = String::new();

        let err = synthesize(&airflow, &SynthesisOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SynthesisError::BuildClusterResources {
                source: build::Error::BuildRoleGroup {
                    source: Error::MissingCredentials,
                    ..
                }
            }
        ));
    }

    #[tokio::test]
    async fn test_kubernetes_executors_fail_the_whole_pass() {
        let airflow = cluster(
            "
            apiVersion: airflow.stackable.tech/v1alpha1
            kind: AirflowCluster
            metadata:
              name: airflow
              namespace: default
              uid: 12345678-1234-1234-1234-123456789012
            spec:
              image:
                productVersion: 2.10.4
              clusterConfig:
                credentialsSecret: creds
              kubernetesExecutors:
                config: {}
              schedulers:
                roleGroups:
                  default: {}
            ",
        );
        let options = SynthesisOptions {
            failure_policy: FailurePolicy::Aggregate,
            ..SynthesisOptions::default()
        };
        let err = synthesize(&airflow, &options).await.unwrap_err();

        match err {
            SynthesisError::BuildClusterResources {
                source: build::Error::UnsupportedRole { role },
            } => assert_eq!(role, "kubernetesExecutors"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_authentication_class_fails_the_pass() {
        let mut airflow = cluster(SCHEDULER_ONLY);
        airflow.spec.cluster_config.authentication =
            serde_yaml::with::singleton_map_recursive::deserialize(
                serde_yaml::Deserializer::from_str("- authenticationClass: does-not-exist"),
            )
            .unwrap();

        let err = synthesize(&airflow, &SynthesisOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.category(), "FetchAdditionalData");
    }

    #[tokio::test]
    async fn test_pod_overrides_group_over_role() {
        let airflow = cluster(
            "
            apiVersion: airflow.stackable.tech/v1alpha1
            kind: AirflowCluster
            metadata:
              name: airflow
              namespace: default
              uid: 12345678-1234-1234-1234-123456789012
            spec:
              image:
                productVersion: 2.10.4
              clusterConfig:
                credentialsSecret: creds
              schedulers:
                podOverrides:
                  metadata:
                    labels:
                      from-role: role
                      shared: role
                roleGroups:
                  default:
                    podOverrides:
                      metadata:
                        labels:
                          shared: group
            ",
        );
        let resources = synthesize(&airflow, &SynthesisOptions::default())
            .await
            .unwrap();

        let labels = statefulsets(&resources)[0]
            .spec
            .as_ref()
            .and_then(|spec| spec.template.metadata.as_ref())
            .and_then(|metadata| metadata.labels.clone())
            .unwrap();
        assert_eq!(labels["from-role"], "role");
        assert_eq!(labels["shared"], "group");
        assert_eq!(labels["app.kubernetes.io/role-group"], "default");
    }
}
