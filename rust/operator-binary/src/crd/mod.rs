use std::collections::BTreeMap;

use product_config::flask_app_config_writer::{FlaskAppConfigOptions, PythonType};
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::{
    commons::{
        affinity::StackableAffinity,
        cluster_operation::ClusterOperation,
        product_image_selection::ProductImage,
        resources::{
            CpuLimitsFragment, MemoryLimitsFragment, NoRuntimeLimits, NoRuntimeLimitsFragment,
            Resources, ResourcesFragment,
        },
    },
    config::{
        fragment::{self, Fragment, ValidationError},
        merge::Merge,
    },
    k8s_openapi::{
        api::core::v1::{PodTemplateSpec, Volume, VolumeMount},
        apimachinery::pkg::api::resource::Quantity,
    },
    kube::{CustomResource, ResourceExt, runtime::reflector::ObjectRef},
    kvp::ObjectLabels,
    memory::{BinaryMultiple, MemoryQuantity},
    product_logging::{
        self,
        framework::{create_vector_shutdown_file_command, remove_vector_shutdown_file_command},
        spec::Logging,
    },
    role_utils::{
        CommonConfiguration, GenericProductSpecificCommonConfig, Role, RoleGroupRef,
    },
    schemars::{self, JsonSchema},
    time::Duration,
    utils::{COMMON_BASH_TRAP_FUNCTIONS, crds::raw_object_list_schema},
    versioned::versioned,
};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

use crate::crd::{
    affinity::get_affinity,
    authentication::{AirflowClientAuthenticationDetails, Authenticator},
    git_sync::{GIT_SYNC_CONTENT, GIT_SYNC_DIR, GitSync},
};

pub mod affinity;
pub mod authentication;
pub mod git_sync;

pub const AIRFLOW_UID: i64 = 1000;
pub const APP_NAME: &str = "airflow";
pub const OPERATOR_NAME: &str = "airflow.stackable.tech";
pub const CONFIG_PATH: &str = "/stackable/app/config";
pub const STACKABLE_LOG_DIR: &str = "/stackable/log";
pub const LOG_CONFIG_DIR: &str = "/stackable/app/log_config";
pub const AIRFLOW_HOME: &str = "/stackable/airflow";
pub const AIRFLOW_CONFIG_FILENAME: &str = "webserver_config.py";

pub const HTTP_PORT_NAME: &str = "http";
pub const HTTP_PORT: u16 = 8080;
pub const METRICS_PORT_NAME: &str = "metrics";
pub const METRICS_PORT: u16 = 9102;

const DEFAULT_AIRFLOW_GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_minutes_unchecked(2);
const DEFAULT_WORKER_GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_minutes_unchecked(5);

pub const MAX_LOG_FILES_SIZE: MemoryQuantity = MemoryQuantity {
    value: 10.0,
    unit: BinaryMultiple::Mebi,
};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Unknown Airflow role found {role}. Should be one of {roles:?}"))]
    UnknownAirflowRole { role: String, roles: Vec<String> },

    #[snafu(display("fragment validation failure"))]
    FragmentValidationFailure { source: ValidationError },
}

#[derive(Display, EnumIter, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AirflowConfigOptions {
    AuthType,
    OauthProviders,
    AuthLdapSearch,
    AuthLdapSearchFilter,
    AuthLdapServer,
    AuthLdapUidField,
    AuthLdapBindUser,
    AuthLdapBindPassword,
    AuthUserRegistration,
    AuthUserRegistrationRole,
    AuthLdapFirstnameField,
    AuthLdapLastnameField,
    AuthLdapEmailField,
    AuthLdapGroupField,
    AuthRolesSyncAtLogin,
    AuthLdapTlsDemand,
    AuthLdapTlsCacertfile,
    AuthLdapAllowSelfSigned,
}

impl FlaskAppConfigOptions for AirflowConfigOptions {
    fn python_type(&self) -> PythonType {
        match self {
            // rendered as quoted names, e.g. 'AUTH_LDAP'
            AirflowConfigOptions::AuthType => PythonType::Expression,
            AirflowConfigOptions::OauthProviders => PythonType::Expression,
            AirflowConfigOptions::AuthUserRegistration => PythonType::BoolLiteral,
            AirflowConfigOptions::AuthUserRegistrationRole => PythonType::StringLiteral,
            AirflowConfigOptions::AuthRolesSyncAtLogin => PythonType::BoolLiteral,
            AirflowConfigOptions::AuthLdapServer => PythonType::StringLiteral,
            AirflowConfigOptions::AuthLdapBindUser => PythonType::Expression,
            AirflowConfigOptions::AuthLdapBindPassword => PythonType::Expression,
            AirflowConfigOptions::AuthLdapSearch => PythonType::StringLiteral,
            AirflowConfigOptions::AuthLdapSearchFilter => PythonType::StringLiteral,
            AirflowConfigOptions::AuthLdapUidField => PythonType::StringLiteral,
            AirflowConfigOptions::AuthLdapGroupField => PythonType::StringLiteral,
            AirflowConfigOptions::AuthLdapFirstnameField => PythonType::StringLiteral,
            AirflowConfigOptions::AuthLdapLastnameField => PythonType::StringLiteral,
            AirflowConfigOptions::AuthLdapEmailField => PythonType::StringLiteral,
            AirflowConfigOptions::AuthLdapTlsDemand => PythonType::BoolLiteral,
            AirflowConfigOptions::AuthLdapTlsCacertfile => PythonType::StringLiteral,
            AirflowConfigOptions::AuthLdapAllowSelfSigned => PythonType::BoolLiteral,
        }
    }
}

#[versioned(version(name = "v1alpha1"))]
pub mod versioned {
    /// An Airflow cluster stacklet: the long running roles webservers, schedulers and celery
    /// executors, each partitioned into role groups.
    #[versioned(k8s(
        group = "airflow.stackable.tech",
        kind = "AirflowCluster",
        plural = "airflowclusters",
        shortname = "airflow",
        namespaced,
        crates(
            kube_core = "stackable_operator::kube::core",
            k8s_openapi = "stackable_operator::k8s_openapi",
            schemars = "stackable_operator::schemars"
        )
    ))]
    #[derive(Clone, CustomResource, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AirflowClusterSpec {
        // no doc string - See ProductImage struct
        pub image: ProductImage,

        /// Configuration that applies to all roles and role groups.
        pub cluster_config: v1alpha1::AirflowClusterConfig,

        // no doc string - See ClusterOperation struct
        #[serde(default)]
        pub cluster_operation: ClusterOperation,

        /// The `webserver` role provides the main UI for user interaction.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub webservers: Option<Role<AirflowConfigFragment>>,

        /// The `scheduler` is responsible for triggering jobs and persisting their metadata to the
        /// backend database.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub schedulers: Option<Role<AirflowConfigFragment>>,

        /// Celery workers, deployed with an explicit number of replicas.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub celery_executors: Option<Role<AirflowConfigFragment>>,

        /// With the Kubernetes executor, executor Pods are created on demand. Rendering clusters
        /// using it is not supported.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub kubernetes_executors:
            Option<CommonConfiguration<AirflowConfigFragment, GenericProductSpecificCommonConfig>>,
    }

    #[derive(Clone, Deserialize, Debug, JsonSchema, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AirflowClusterConfig {
        #[serde(default)]
        pub authentication: Vec<AirflowClientAuthenticationDetails>,

        /// The name of the Secret object containing the admin user credentials and database
        /// connection details.
        pub credentials_secret: String,

        /// Only the first entry is used.
        #[serde(default)]
        pub dags_git_sync: Vec<GitSync>,

        /// for internal use only - not for production use.
        #[serde(default)]
        pub expose_config: bool,

        #[serde(default)]
        pub load_examples: bool,

        /// Name of the Vector aggregator discovery ConfigMap.
        /// It must contain the key `ADDRESS` with the address of the Vector aggregator.
        #[serde(skip_serializing_if = "Option::is_none")]
        pub vector_aggregator_config_map_name: Option<String>,

        /// Additional volumes to define. Use together with `volumeMounts` to mount the volumes.
        #[serde(default)]
        #[schemars(schema_with = "raw_object_list_schema")]
        pub volumes: Vec<Volume>,

        /// Additional volumes to mount. Use together with `volumes` to define volumes.
        #[serde(default)]
        #[schemars(schema_with = "raw_object_list_schema")]
        pub volume_mounts: Vec<VolumeMount>,
    }
}

impl v1alpha1::AirflowClusterSpec {
    /// The executor is derived from the executor role the cluster declares.
    pub fn executor(&self) -> AirflowExecutor {
        if self.celery_executors.is_some() {
            AirflowExecutor::CeleryExecutor
        } else if self.kubernetes_executors.is_some() {
            AirflowExecutor::KubernetesExecutor
        } else {
            AirflowExecutor::LocalExecutor
        }
    }
}

impl v1alpha1::AirflowCluster {
    pub fn get_role(&self, role: &AirflowRole) -> Option<&Role<AirflowConfigFragment>> {
        match role {
            AirflowRole::Webserver => self.spec.webservers.as_ref(),
            AirflowRole::Scheduler => self.spec.schedulers.as_ref(),
            AirflowRole::Worker => self.spec.celery_executors.as_ref(),
        }
    }

    fn role_or_error(&self, role: &AirflowRole) -> Result<&Role<AirflowConfigFragment>, Error> {
        self.get_role(role).context(UnknownAirflowRoleSnafu {
            role: role.to_string(),
            roles: AirflowRole::roles(),
        })
    }

    pub fn volumes(&self) -> &Vec<Volume> {
        &self.spec.cluster_config.volumes
    }

    pub fn volume_mounts(&self) -> Vec<VolumeMount> {
        let mut mounts = self.spec.cluster_config.volume_mounts.clone();
        if self.git_sync().is_some() {
            mounts.push(VolumeMount {
                name: GIT_SYNC_CONTENT.into(),
                mount_path: GIT_SYNC_DIR.into(),
                ..VolumeMount::default()
            });
        }
        mounts
    }

    pub fn git_sync(&self) -> Option<&GitSync> {
        let dags_git_sync = &self.spec.cluster_config.dags_git_sync;
        // dags_git_sync is a list but only the first element is considered
        if dags_git_sync.len() > 1 {
            tracing::warn!(
                "{:?} git-sync elements: only first will be considered...",
                dags_git_sync.len()
            );
        }
        dags_git_sync.first()
    }

    /// Retrieve and merge resource configs for role and role groups
    pub fn merged_config(
        &self,
        role: &AirflowRole,
        rolegroup_ref: &RoleGroupRef<v1alpha1::AirflowCluster>,
    ) -> Result<AirflowConfig, Error> {
        // Initialize the result with all default values as baseline
        let conf_defaults = AirflowConfig::default_config(&self.name_any(), role);

        let role = self.role_or_error(role)?;

        // Retrieve role resource config
        let mut conf_role = role.config.config.to_owned();

        // Retrieve rolegroup specific resource config
        let mut conf_rolegroup = role
            .role_groups
            .get(&rolegroup_ref.role_group)
            .map(|rg| rg.config.config.clone())
            .unwrap_or_default();

        // Merge more specific configs into default config
        // Hierarchy is:
        // 1. RoleGroup
        // 2. Role
        // 3. Default
        conf_role.merge(&conf_defaults);
        conf_rolegroup.merge(&conf_role);

        tracing::debug!("Merged config: {:?}", conf_rolegroup);
        fragment::validate(conf_rolegroup).context(FragmentValidationFailureSnafu)
    }

    /// The overrides of a role group on top of the ones of its role.
    ///
    /// Env and config overrides set on the role group replace the role's map as a whole. Pod
    /// overrides are returned in the order they are applied, role first.
    pub fn merged_overrides(
        &self,
        role: &AirflowRole,
        rolegroup_ref: &RoleGroupRef<v1alpha1::AirflowCluster>,
    ) -> Result<RoleGroupOverrides, Error> {
        let role = self.role_or_error(role)?;
        let role_overrides = &role.config;
        let rolegroup_overrides = role
            .role_groups
            .get(&rolegroup_ref.role_group)
            .map(|rg| &rg.config);

        let env_overrides = rolegroup_overrides
            .map(|rg| &rg.env_overrides)
            .filter(|env| !env.is_empty())
            .unwrap_or(&role_overrides.env_overrides);

        let config_overrides = rolegroup_overrides
            .and_then(|rg| rg.config_overrides.get(AIRFLOW_CONFIG_FILENAME))
            .or_else(|| role_overrides.config_overrides.get(AIRFLOW_CONFIG_FILENAME));

        let mut pod_overrides = vec![role_overrides.pod_overrides.clone()];
        pod_overrides.extend(rolegroup_overrides.map(|rg| rg.pod_overrides.clone()));

        Ok(RoleGroupOverrides {
            env_overrides: env_overrides
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            config_overrides: config_overrides
                .into_iter()
                .flatten()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            pod_overrides,
        })
    }

    pub fn rolegroup_ref(
        &self,
        role_name: impl Into<String>,
        group_name: impl Into<String>,
    ) -> RoleGroupRef<v1alpha1::AirflowCluster> {
        RoleGroupRef {
            cluster: ObjectRef::from_obj(self),
            role: role_name.into(),
            role_group: group_name.into(),
        }
    }

    /// The role groups of a role with their replicas, ordered by name.
    pub fn rolegroup_ref_and_replicas(
        &self,
        role: &AirflowRole,
    ) -> Vec<(RoleGroupRef<v1alpha1::AirflowCluster>, u16)> {
        self.get_role(role)
            .iter()
            .flat_map(|role| &role.role_groups)
            // Order rolegroups consistently, to avoid spurious downstream rewrites
            .collect::<BTreeMap<_, _>>()
            .into_iter()
            .map(|(rolegroup_name, role_group)| {
                (
                    self.rolegroup_ref(role.to_string(), rolegroup_name),
                    role_group.replicas.unwrap_or(1),
                )
            })
            .collect()
    }
}

/// The overrides that apply to one role group.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoleGroupOverrides {
    /// Settings appended to `webserver_config.py`.
    pub config_overrides: BTreeMap<String, String>,
    pub env_overrides: BTreeMap<String, String>,
    pub pod_overrides: Vec<PodTemplateSpec>,
}

#[derive(
    Clone, Copy, Debug, Deserialize, Display, EnumIter, EnumString, Eq, Hash, PartialEq, Serialize,
)]
pub enum AirflowRole {
    #[strum(serialize = "webservers")]
    Webserver,

    #[strum(serialize = "schedulers")]
    Scheduler,

    #[strum(serialize = "celeryexecutors")]
    Worker,
}

impl AirflowRole {
    /// Returns the start commands for the different airflow components. Airflow expects all
    /// components to have the same image/configuration (e.g. DAG folder location), even if not all
    /// configuration settings are used everywhere. For this reason we ensure that the webserver
    /// config file is in the Airflow home directory on all pods.
    pub fn get_commands(&self, authenticator: &impl Authenticator) -> Vec<String> {
        let mut command = vec![
            format!(
                "cp -RL {CONFIG_PATH}/{AIRFLOW_CONFIG_FILENAME} {AIRFLOW_HOME}/{AIRFLOW_CONFIG_FILENAME}"
            ),
            // graceful shutdown part
            COMMON_BASH_TRAP_FUNCTIONS.to_string(),
            remove_vector_shutdown_file_command(STACKABLE_LOG_DIR),
        ];

        match &self {
            AirflowRole::Webserver => {
                command.extend(authenticator.start_commands());
                command.extend(vec![
                    "prepare_signal_handlers".to_string(),
                    "airflow webserver &".to_string(),
                ]);
            }
            AirflowRole::Scheduler => command.extend(vec![
                // Database initialization is limited to the scheduler
                "airflow db init".to_string(),
                "airflow db upgrade".to_string(),
                "airflow users create \
                    --username \"$ADMIN_USERNAME\" \
                    --firstname \"$ADMIN_FIRSTNAME\" \
                    --lastname \"$ADMIN_LASTNAME\" \
                    --email \"$ADMIN_EMAIL\" \
                    --password \"$ADMIN_PASSWORD\" \
                    --role \"Admin\""
                    .to_string(),
                "prepare_signal_handlers".to_string(),
                "airflow scheduler &".to_string(),
            ]),
            AirflowRole::Worker => command.extend(vec![
                "prepare_signal_handlers".to_string(),
                "airflow celery worker &".to_string(),
            ]),
        }
        // graceful shutdown part
        command.extend(vec![
            "wait_for_termination $!".to_string(),
            create_vector_shutdown_file_command(STACKABLE_LOG_DIR),
        ]);

        command
    }

    /// Will be used to expose service ports and - by extension - which roles should be
    /// created as services.
    pub fn get_http_port(&self) -> Option<u16> {
        match &self {
            AirflowRole::Webserver => Some(HTTP_PORT),
            AirflowRole::Scheduler | AirflowRole::Worker => None,
        }
    }

    /// The statsd exporter port the role declares for scraping.
    pub fn get_metrics_port(&self) -> Option<u16> {
        match &self {
            AirflowRole::Webserver => Some(METRICS_PORT),
            AirflowRole::Scheduler | AirflowRole::Worker => None,
        }
    }

    /// The main container of the role, which is named after the role.
    pub fn container(&self) -> Container {
        match self {
            AirflowRole::Webserver => Container::Webservers,
            AirflowRole::Scheduler => Container::Schedulers,
            AirflowRole::Worker => Container::Celeryexecutors,
        }
    }

    pub fn roles() -> Vec<String> {
        Self::iter().map(|role| role.to_string()).collect()
    }
}

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum AirflowExecutor {
    LocalExecutor,
    CeleryExecutor,
    KubernetesExecutor,
}

#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, Debug, Default, JsonSchema, PartialEq, Fragment)]
#[fragment_attrs(
    allow(clippy::derive_partial_eq_without_eq),
    derive(
        Clone,
        Debug,
        Default,
        Deserialize,
        Merge,
        JsonSchema,
        PartialEq,
        Serialize
    ),
    serde(rename_all = "camelCase")
)]
pub struct AirflowStorageConfig {}

/// The containers logging can be configured for. The main containers are named after their role.
#[derive(
    Clone,
    Debug,
    Deserialize,
    Display,
    Eq,
    EnumIter,
    JsonSchema,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Container {
    Webservers,
    Schedulers,
    Celeryexecutors,
    Vector,
}

#[derive(Clone, Debug, Default, Fragment, JsonSchema, PartialEq)]
#[fragment_attrs(
    derive(
        Clone,
        Debug,
        Default,
        Deserialize,
        Merge,
        JsonSchema,
        PartialEq,
        Serialize
    ),
    serde(rename_all = "camelCase")
)]
pub struct AirflowConfig {
    #[fragment_attrs(serde(default))]
    pub resources: Resources<AirflowStorageConfig, NoRuntimeLimits>,

    #[fragment_attrs(serde(default))]
    pub logging: Logging<Container>,

    #[fragment_attrs(serde(default))]
    pub affinity: StackableAffinity,

    /// Time period Pods have to gracefully shut down, e.g. `30m`, `1h` or `2d`.
    #[fragment_attrs(serde(default))]
    pub graceful_shutdown_timeout: Option<Duration>,
}

impl AirflowConfig {
    fn default_config(cluster_name: &str, role: &AirflowRole) -> AirflowConfigFragment {
        AirflowConfigFragment {
            resources: default_resources(role),
            logging: product_logging::spec::default_logging(),
            affinity: get_affinity(cluster_name, role),
            graceful_shutdown_timeout: Some(match role {
                AirflowRole::Webserver | AirflowRole::Scheduler => {
                    DEFAULT_AIRFLOW_GRACEFUL_SHUTDOWN_TIMEOUT
                }
                AirflowRole::Worker => DEFAULT_WORKER_GRACEFUL_SHUTDOWN_TIMEOUT,
            }),
        }
    }
}

fn default_resources(role: &AirflowRole) -> ResourcesFragment<AirflowStorageConfig> {
    let (cpu, memory) = match role {
        AirflowRole::Worker => (
            CpuLimitsFragment {
                min: Some(Quantity("500m".into())),
                max: Some(Quantity("2".into())),
            },
            MemoryLimitsFragment {
                limit: Some(Quantity("2Gi".into())),
                runtime_limits: NoRuntimeLimitsFragment {},
            },
        ),
        AirflowRole::Webserver => (
            CpuLimitsFragment {
                min: Some(Quantity("500m".into())),
                max: Some(Quantity("2".into())),
            },
            MemoryLimitsFragment {
                limit: Some(Quantity("3Gi".into())),
                runtime_limits: NoRuntimeLimitsFragment {},
            },
        ),
        AirflowRole::Scheduler => (
            CpuLimitsFragment {
                min: Some(Quantity("500m".to_owned())),
                max: Some(Quantity("2".to_owned())),
            },
            MemoryLimitsFragment {
                limit: Some(Quantity("512Mi".to_owned())),
                runtime_limits: NoRuntimeLimitsFragment {},
            },
        ),
    };

    ResourcesFragment {
        cpu,
        memory,
        storage: AirflowStorageConfigFragment {},
    }
}

/// Creates recommended `ObjectLabels` to be used in deployed resources
pub fn build_recommended_labels<'a, T>(
    owner: &'a T,
    controller_name: &'a str,
    app_version: &'a str,
    role: &'a str,
    role_group: &'a str,
) -> ObjectLabels<'a, T> {
    ObjectLabels {
        owner,
        app_name: APP_NAME,
        app_version,
        operator_name: OPERATOR_NAME,
        controller_name,
        role,
        role_group,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use stackable_operator::commons::product_image_selection::ResolvedProductImage;

    use super::*;

    fn parse_cluster(cluster: &str) -> v1alpha1::AirflowCluster {
        let deserializer = serde_yaml::Deserializer::from_str(cluster);
        serde_yaml::with::singleton_map_recursive::deserialize(deserializer).unwrap()
    }

    #[test]
    fn test_cluster_config() {
        let cluster = parse_cluster(
            "
        apiVersion: airflow.stackable.tech/v1alpha1
        kind: AirflowCluster
        metadata:
          name: airflow
        spec:
          image:
            productVersion: 2.10.4
          clusterConfig:
            loadExamples: true
            exposeConfig: true
            credentialsSecret: simple-airflow-credentials
          webservers:
            roleGroups:
              default:
                config: {}
          kubernetesExecutors:
            config: {}
          schedulers:
            roleGroups:
              default:
                config: {}
          ",
        );

        let resolved_airflow_image: ResolvedProductImage =
            cluster.spec.image.resolve("airflow", "0.0.0-dev");

        assert_eq!("2.10.4", &resolved_airflow_image.product_version);

        assert_eq!("KubernetesExecutor", cluster.spec.executor().to_string());
        assert!(cluster.spec.cluster_config.load_examples);
        assert!(cluster.spec.cluster_config.expose_config);
        assert!(!cluster.spec.cluster_operation.stopped);
    }

    #[rstest]
    #[case("celeryExecutors: {roleGroups: {}}", AirflowExecutor::CeleryExecutor)]
    #[case("kubernetesExecutors: {config: {}}", AirflowExecutor::KubernetesExecutor)]
    #[case("", AirflowExecutor::LocalExecutor)]
    fn test_executor_kind(#[case] executor: &str, #[case] expected: AirflowExecutor) {
        let cluster = parse_cluster(&format!(
            "
        apiVersion: airflow.stackable.tech/v1alpha1
        kind: AirflowCluster
        metadata:
          name: airflow
        spec:
          image:
            productVersion: 2.10.4
          clusterConfig:
            credentialsSecret: creds
          {executor}
        "
        ));
        assert_eq!(cluster.spec.executor(), expected);
    }

    const MERGE_CLUSTER: &str = "
        apiVersion: airflow.stackable.tech/v1alpha1
        kind: AirflowCluster
        metadata:
          name: airflow
        spec:
          image:
            productVersion: 2.10.4
          clusterConfig:
            credentialsSecret: creds
          schedulers:
            config:
              resources:
                cpu:
                  max: '4'
              gracefulShutdownTimeout: 10m
            envOverrides:
              FROM_ROLE: role
              SHARED: role
            configOverrides:
              webserver_config.py:
                FROM_ROLE: 'True'
            roleGroups:
              default:
                replicas: 2
                config:
                  resources:
                    memory:
                      limit: 1Gi
                envOverrides:
                  SHARED: group
              plain:
                config: {}
        ";

    #[test]
    fn test_merged_config_precedence() {
        let airflow = parse_cluster(MERGE_CLUSTER);
        let rolegroup_ref = airflow.rolegroup_ref(AirflowRole::Scheduler.to_string(), "default");

        let config = airflow
            .merged_config(&AirflowRole::Scheduler, &rolegroup_ref)
            .unwrap();

        // group wins, role wins over defaults, defaults fill the rest
        assert_eq!(config.resources.memory.limit, Some(Quantity("1Gi".to_string())));
        assert_eq!(config.resources.cpu.max, Some(Quantity("4".to_string())));
        assert_eq!(config.resources.cpu.min, Some(Quantity("500m".to_string())));
        assert_eq!(
            config.graceful_shutdown_timeout,
            Some(Duration::from_minutes_unchecked(10))
        );
    }

    #[test]
    fn test_merged_overrides_replace_maps_wholesale() {
        let airflow = parse_cluster(MERGE_CLUSTER);
        let rolegroup_ref = airflow.rolegroup_ref(AirflowRole::Scheduler.to_string(), "default");

        let overrides = airflow
            .merged_overrides(&AirflowRole::Scheduler, &rolegroup_ref)
            .unwrap();

        assert_eq!(
            overrides.env_overrides,
            BTreeMap::from([("SHARED".to_string(), "group".to_string())])
        );
        assert_eq!(
            overrides.config_overrides,
            BTreeMap::from([("FROM_ROLE".to_string(), "True".to_string())])
        );
        assert_eq!(overrides.pod_overrides.len(), 2);

        let rolegroup_ref = airflow.rolegroup_ref(AirflowRole::Scheduler.to_string(), "plain");
        let overrides = airflow
            .merged_overrides(&AirflowRole::Scheduler, &rolegroup_ref)
            .unwrap();
        assert_eq!(overrides.env_overrides.len(), 2);
    }

    #[test]
    fn test_rolegroups_are_ordered_by_name() {
        let airflow = parse_cluster(MERGE_CLUSTER);

        let rolegroups = airflow
            .rolegroup_ref_and_replicas(&AirflowRole::Scheduler)
            .into_iter()
            .map(|(rolegroup_ref, replicas)| (rolegroup_ref.role_group, replicas))
            .collect::<Vec<_>>();

        assert_eq!(
            rolegroups,
            vec![("default".to_string(), 2), ("plain".to_string(), 1)]
        );
        assert!(
            airflow
                .rolegroup_ref_and_replicas(&AirflowRole::Webserver)
                .is_empty()
        );
    }

    #[test]
    fn test_unparsable_graceful_shutdown_timeout() {
        let cluster = MERGE_CLUSTER.replace("gracefulShutdownTimeout: 10m", "gracefulShutdownTimeout: soon");
        let deserializer = serde_yaml::Deserializer::from_str(&cluster);
        let result: Result<v1alpha1::AirflowCluster, _> =
            serde_yaml::with::singleton_map_recursive::deserialize(deserializer);

        assert!(result.is_err());
    }

    #[test]
    fn test_undeclared_role() {
        let airflow = parse_cluster(MERGE_CLUSTER);
        let rolegroup_ref = airflow.rolegroup_ref(AirflowRole::Webserver.to_string(), "default");

        let err = airflow
            .merged_config(&AirflowRole::Webserver, &rolegroup_ref)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownAirflowRole { .. }));
    }

    #[test]
    fn test_main_containers_are_named_after_their_role() {
        for role in AirflowRole::iter() {
            assert_eq!(role.container().to_string(), role.to_string());
        }
    }
}
