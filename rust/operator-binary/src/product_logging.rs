use std::{convert::Infallible, fmt::Write};

use stackable_operator::{
    builder::configmap::ConfigMapBuilder,
    product_logging::{
        self,
        spec::{
            AutomaticContainerLogConfig, ContainerLogConfig, ContainerLogConfigChoice, Logging,
        },
    },
    role_utils::RoleGroupRef,
};

use crate::crd::{AirflowRole, Container, STACKABLE_LOG_DIR, v1alpha1};

pub const LOG_CONFIG_FILE: &str = "log_config.py";
const LOG_FILE: &str = "airflow.py.json";
const ROOT_LOGGER: &str = "root";

/// Everything the Vector agent configuration of a role group is derived from.
pub struct VectorConfigContext<'a> {
    pub rolegroup_ref: &'a RoleGroupRef<v1alpha1::AirflowCluster>,
    pub aggregator_config_map_name: &'a str,
    pub vector_log_config: Option<&'a AutomaticContainerLogConfig>,
}

/// Renders the `vector.yaml` of a role group.
pub trait VectorConfigGenerator {
    type Error: std::error::Error + Send + Sync + 'static;

    fn generate(&self, context: &VectorConfigContext<'_>) -> Result<String, Self::Error>;
}

/// Ships the log files of all containers to the aggregator named in the discovery ConfigMap.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultVectorConfigGenerator;

impl VectorConfigGenerator for DefaultVectorConfigGenerator {
    type Error = Infallible;

    fn generate(&self, context: &VectorConfigContext<'_>) -> Result<String, Self::Error> {
        tracing::debug!(
            aggregator = context.aggregator_config_map_name,
            "Rendering Vector config for {}",
            context.rolegroup_ref.object_name()
        );
        Ok(product_logging::framework::create_vector_config(
            context.rolegroup_ref,
            context.vector_log_config,
        ))
    }
}

fn automatic_log_config<'a>(
    logging: &'a Logging<Container>,
    container: &Container,
) -> Option<&'a AutomaticContainerLogConfig> {
    if let Some(ContainerLogConfig {
        choice: Some(ContainerLogConfigChoice::Automatic(log_config)),
    }) = logging.containers.get(container)
    {
        Some(log_config)
    } else {
        None
    }
}

/// Extend the ConfigMap with logging and Vector configurations
///
/// `vector.yaml` is always present and only rendered by the generator if an aggregator is
/// configured.
pub fn extend_config_map_with_log_config<G: VectorConfigGenerator>(
    cluster: &v1alpha1::AirflowCluster,
    role: &AirflowRole,
    rolegroup_ref: &RoleGroupRef<v1alpha1::AirflowCluster>,
    logging: &Logging<Container>,
    vector_config_generator: &G,
    cm_builder: &mut ConfigMapBuilder,
) -> Result<(), G::Error> {
    let main_container = role.container();
    if let Some(log_config) = automatic_log_config(logging, &main_container) {
        let log_dir = format!("{STACKABLE_LOG_DIR}/{main_container}");
        cm_builder.add_data(LOG_CONFIG_FILE, create_airflow_config(log_config, &log_dir));
    }

    let vector_config = match &cluster.spec.cluster_config.vector_aggregator_config_map_name {
        Some(aggregator_config_map_name) => {
            vector_config_generator.generate(&VectorConfigContext {
                rolegroup_ref,
                aggregator_config_map_name,
                vector_log_config: automatic_log_config(logging, &Container::Vector),
            })?
        }
        None => String::new(),
    };
    cm_builder.add_data(product_logging::framework::VECTOR_CONFIG_FILE, vector_config);

    Ok(())
}

/// A logger name as the content of a single quoted Python string.
fn escape_python_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn create_airflow_config(log_config: &AutomaticContainerLogConfig, log_dir: &str) -> String {
    let root_log_level = log_config
        .loggers
        .get(ROOT_LOGGER)
        .or_else(|| {
            log_config
                .loggers
                .get(AutomaticContainerLogConfig::ROOT_LOGGER)
        })
        .map(|logger| logger.level)
        .unwrap_or_default();

    let loggers_config = log_config
        .loggers
        .iter()
        .filter(|(name, _)| {
            name.as_str() != ROOT_LOGGER
                && name.as_str() != AutomaticContainerLogConfig::ROOT_LOGGER
        })
        .fold(String::new(), |mut output, (name, config)| {
            let _ = writeln!(
                output,
                "
LOGGING_CONFIG['loggers'].setdefault('{name}', {{ 'propagate': True }})
LOGGING_CONFIG['loggers']['{name}']['level'] = {level}
",
                name = escape_python_string(name),
                level = config.level.to_python_expression()
            );
            output
        });

    format!(
        "\
import logging
import os
from copy import deepcopy
from airflow.config_templates.airflow_local_settings import DEFAULT_LOGGING_CONFIG

os.makedirs('{log_dir}', exist_ok=True)

LOGGING_CONFIG = deepcopy(DEFAULT_LOGGING_CONFIG)

REMOTE_TASK_LOG = None

LOGGING_CONFIG.setdefault('loggers', {{}})
for logger_name, logger_config in LOGGING_CONFIG['loggers'].items():
    logger_config['level'] = logging.NOTSET
    # Do not change the setting of the airflow.task logger because
    # otherwise DAGs cannot be loaded anymore.
    if logger_name != 'airflow.task':
        logger_config['propagate'] = True
    # Airflow enforces the log level 'INFO' on tasks.
    if 'handlers' in logger_config and 'task' in logger_config['handlers']:
        logger_config['level'] = logging.INFO

LOGGING_CONFIG.setdefault('formatters', {{}})
LOGGING_CONFIG['formatters']['json'] = {{
    '()': 'airflow.utils.log.json_formatter.JSONFormatter',
    'json_fields': ['asctime', 'levelname', 'message', 'name']
}}

LOGGING_CONFIG.setdefault('handlers', {{}})
LOGGING_CONFIG['handlers'].setdefault('console', {{}})
LOGGING_CONFIG['handlers']['console']['level'] = {console_log_level}
LOGGING_CONFIG['handlers']['file'] = {{
    'class': 'logging.handlers.RotatingFileHandler',
    'level': {file_log_level},
    'formatter': 'json',
    'filename': '{log_dir}/{LOG_FILE}',
    'maxBytes': 1048576,
    'backupCount': 1,
}}

LOGGING_CONFIG['root'] = {{
    'level': {root_log_level},
    'filters': ['mask_secrets'],
    'handlers': ['console', 'file'],
}}
{loggers_config}",
        root_log_level = root_log_level.to_python_expression(),
        console_log_level = log_config
            .console
            .as_ref()
            .and_then(|console| console.level)
            .unwrap_or_default()
            .to_python_expression(),
        file_log_level = log_config
            .file
            .as_ref()
            .and_then(|file| file.level)
            .unwrap_or_default()
            .to_python_expression(),
    )
}
