use std::collections::BTreeMap;

use stackable_operator::k8s_openapi::api::core::v1::EnvVar;

use crate::{
    crd::{
        AirflowExecutor, AirflowRole, LOG_CONFIG_DIR, authentication::Authenticator,
        git_sync::GitSync, v1alpha1,
    },
    util::{env_var, env_var_from_secret},
};

const AIRFLOW__LOGGING__LOGGING_CONFIG_CLASS: &str = "AIRFLOW__LOGGING__LOGGING_CONFIG_CLASS";
const AIRFLOW__METRICS__STATSD_ON: &str = "AIRFLOW__METRICS__STATSD_ON";
const AIRFLOW__METRICS__STATSD_HOST: &str = "AIRFLOW__METRICS__STATSD_HOST";
const AIRFLOW__METRICS__STATSD_PORT: &str = "AIRFLOW__METRICS__STATSD_PORT";
const GITSYNC_USERNAME: &str = "GITSYNC_USERNAME";
const GITSYNC_PASSWORD: &str = "GITSYNC_PASSWORD";
const AIRFLOW__API__AUTH_BACKEND: &str = "AIRFLOW__API__AUTH_BACKEND";
const AIRFLOW__WEBSERVER__SECRET_KEY: &str = "AIRFLOW__WEBSERVER__SECRET_KEY";
const AIRFLOW__CORE__SQL_ALCHEMY_CONN: &str = "AIRFLOW__CORE__SQL_ALCHEMY_CONN";
const AIRFLOW__CELERY__RESULT_BACKEND: &str = "AIRFLOW__CELERY__RESULT_BACKEND";
const AIRFLOW__CELERY__BROKER_URL: &str = "AIRFLOW__CELERY__BROKER_URL";
const AIRFLOW__CORE__DAGS_FOLDER: &str = "AIRFLOW__CORE__DAGS_FOLDER";
const PYTHONPATH: &str = "PYTHONPATH";
const AIRFLOW__CORE__LOAD_EXAMPLES: &str = "AIRFLOW__CORE__LOAD_EXAMPLES";
const AIRFLOW__WEBSERVER__EXPOSE_CONFIG: &str = "AIRFLOW__WEBSERVER__EXPOSE_CONFIG";
const AIRFLOW__CORE__EXECUTOR: &str = "AIRFLOW__CORE__EXECUTOR";
const ADMIN_USERNAME: &str = "ADMIN_USERNAME";
const ADMIN_FIRSTNAME: &str = "ADMIN_FIRSTNAME";
const ADMIN_LASTNAME: &str = "ADMIN_LASTNAME";
const ADMIN_EMAIL: &str = "ADMIN_EMAIL";
const ADMIN_PASSWORD: &str = "ADMIN_PASSWORD";

pub const STATSD_PORT: u16 = 9125;

/// The environment of the main container of a role group. `env_overrides` are applied last and
/// replace generated variables of the same name.
pub fn build_airflow_statefulset_envs(
    airflow: &v1alpha1::AirflowCluster,
    airflow_role: &AirflowRole,
    credentials_secret: &str,
    authenticator: &impl Authenticator,
    env_overrides: &BTreeMap<String, String>,
) -> Vec<EnvVar> {
    let executor = airflow.spec.executor();
    let mut env = vec![];

    env.extend(static_envs());

    // The secret key is used to run the webserver flask app and also used to authorize
    // requests to Celery workers when logs are retrieved.
    env.push(env_var_from_secret(
        AIRFLOW__WEBSERVER__SECRET_KEY,
        credentials_secret,
        "connections.secretKey",
    ));
    env.push(env_var_from_secret(
        AIRFLOW__CORE__SQL_ALCHEMY_CONN,
        credentials_secret,
        "connections.sqlalchemyDatabaseUri",
    ));

    if executor == AirflowExecutor::CeleryExecutor {
        env.push(env_var_from_secret(
            AIRFLOW__CELERY__RESULT_BACKEND,
            credentials_secret,
            "connections.celeryResultBackend",
        ));
        env.push(env_var_from_secret(
            AIRFLOW__CELERY__BROKER_URL,
            credentials_secret,
            "connections.celeryBrokerUrl",
        ));
    }

    match airflow.git_sync() {
        Some(git_sync) => env.push(env_var(AIRFLOW__CORE__DAGS_FOLDER, git_sync.dags_folder())),
        // PYTHONPATH refers to the DAGs folder, so it needs a value in any case
        None => env.push(env_var(AIRFLOW__CORE__DAGS_FOLDER, "$AIRFLOW_HOME/dags")),
    }

    env.push(env_var(
        AIRFLOW__CORE__LOAD_EXAMPLES,
        python_bool(airflow.spec.cluster_config.load_examples),
    ));
    env.push(env_var(
        AIRFLOW__WEBSERVER__EXPOSE_CONFIG,
        python_bool(airflow.spec.cluster_config.expose_config),
    ));

    env.push(env_var(AIRFLOW__CORE__EXECUTOR, executor.to_string()));

    match airflow_role {
        // Database initialization and the admin user are limited to the scheduler
        AirflowRole::Scheduler => {
            env.extend([
                env_var_from_secret(ADMIN_USERNAME, credentials_secret, "adminUser.username"),
                env_var_from_secret(
                    ADMIN_FIRSTNAME,
                    credentials_secret,
                    "adminUser.firstusername",
                ),
                env_var_from_secret(ADMIN_LASTNAME, credentials_secret, "adminUser.lastname"),
                env_var_from_secret(ADMIN_EMAIL, credentials_secret, "adminUser.email"),
                env_var_from_secret(ADMIN_PASSWORD, credentials_secret, "adminUser.password"),
            ]);
        }
        AirflowRole::Webserver => env.extend(authenticator.env_vars()),
        AirflowRole::Worker => {}
    }

    apply_env_overrides(&mut env, env_overrides);
    env
}

fn static_envs() -> Vec<EnvVar> {
    vec![
        // PYTHONPATH must be extended to include the dags folder so that dag
        // dependencies can be found.
        env_var(
            PYTHONPATH,
            format!("{LOG_CONFIG_DIR}:${AIRFLOW__CORE__DAGS_FOLDER}"),
        ),
        env_var(
            AIRFLOW__LOGGING__LOGGING_CONFIG_CLASS,
            "log_config.LOGGING_CONFIG",
        ),
        env_var(AIRFLOW__METRICS__STATSD_ON, "True"),
        env_var(AIRFLOW__METRICS__STATSD_HOST, "0.0.0.0"),
        env_var(AIRFLOW__METRICS__STATSD_PORT, STATSD_PORT.to_string()),
        // Authentication for the API is handled separately to the Web Authentication.
        // Basic authentication is used by the integration tests.
        // The default is to deny all requests to the API.
        env_var(
            AIRFLOW__API__AUTH_BACKEND,
            "airflow.api.auth.backend.basic_auth",
        ),
    ]
}

/// Credentials of the git-sync containers, if the repository needs any.
pub fn build_gitsync_statefulset_envs(git_sync: &GitSync) -> Vec<EnvVar> {
    let mut env = vec![];

    if let Some(git_secret) = &git_sync.credentials_secret {
        env.push(env_var_from_secret(GITSYNC_USERNAME, git_secret, "user"));
        env.push(env_var_from_secret(GITSYNC_PASSWORD, git_secret, "password"));
    }

    env
}

fn apply_env_overrides(env: &mut Vec<EnvVar>, env_overrides: &BTreeMap<String, String>) {
    // iterate over a BTreeMap to ensure the vars are written in a predictable order
    for (name, value) in env_overrides {
        let env_override = env_var(name, value.as_str());
        match env.iter_mut().find(|existing| &existing.name == name) {
            Some(existing) => *existing = env_override,
            None => env.push(env_override),
        }
    }
}

fn python_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}
