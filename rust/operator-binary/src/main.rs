mod airflow_controller;
mod config;
mod controller_commons;
mod crd;
mod env_vars;
mod operations;
mod product_logging;
mod service;
mod util;

use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use clap::{crate_description, crate_version, Parser};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
    airflow_controller::{
        synthesize_airflow, write_cluster_resources, FailurePolicy, SynthesisOptions,
        AIRFLOW_FULL_CONTROLLER_NAME,
    },
    crd::{
        authentication::{AuthenticationClassStore, MissingAuthenticationClassPolicy},
        v1alpha1,
    },
    product_logging::DefaultVectorConfigGenerator,
};

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

const LOG_ENV_VAR: &str = "AIRFLOW_OPERATOR_LOG";

#[derive(Parser)]
#[command(about, author, version)]
struct Opts {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Render the Kubernetes objects of an AirflowCluster as a multi-document YAML stream on stdout.
    Render(RenderArgs),
}

#[derive(clap::Args)]
struct RenderArgs {
    /// File containing the AirflowCluster.
    #[arg(long, env = "AIRFLOW_CLUSTER")]
    cluster: PathBuf,

    /// Files containing the AuthenticationClasses the cluster may reference. Each file may hold
    /// several YAML documents.
    #[arg(long, env = "AIRFLOW_AUTHENTICATION_CLASSES", value_delimiter = ',')]
    authentication_classes: Vec<PathBuf>,

    /// Deadline of a single AuthenticationClass lookup, in seconds.
    #[arg(long, env = "AIRFLOW_LOOKUP_TIMEOUT", default_value_t = 10)]
    lookup_timeout: u64,

    #[arg(
        long,
        env = "AIRFLOW_ON_MISSING_AUTHENTICATION_CLASS",
        value_enum,
        default_value_t = MissingAuthenticationClassPolicy::Fail
    )]
    on_missing_authentication_class: MissingAuthenticationClassPolicy,

    #[arg(
        long,
        env = "AIRFLOW_FAILURE_POLICY",
        value_enum,
        default_value_t = FailurePolicy::FirstError
    )]
    failure_policy: FailurePolicy,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting {}", crate_description!());
    tracing::info!(
        "This is version {} of {}, built for {} by {} at {}",
        crate_version!(),
        AIRFLOW_FULL_CONTROLLER_NAME,
        built_info::TARGET,
        built_info::RUSTC_VERSION,
        built_info::BUILT_TIME_UTC,
    );

    match opts.cmd {
        Command::Render(args) => render(args).await?,
    }

    Ok(())
}

async fn render(args: RenderArgs) -> anyhow::Result<()> {
    let cluster = tokio::fs::read_to_string(&args.cluster)
        .await
        .with_context(|| format!("failed to read {}", args.cluster.display()))?;
    let deserializer = serde_yaml::Deserializer::from_str(&cluster);
    let airflow: v1alpha1::AirflowCluster =
        serde_yaml::with::singleton_map_recursive::deserialize(deserializer).with_context(|| {
            format!("{} is not a valid AirflowCluster", args.cluster.display())
        })?;

    let mut authentication_classes = AuthenticationClassStore::default();
    for path in &args.authentication_classes {
        let documents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        authentication_classes
            .extend_from_yaml(&documents)
            .with_context(|| format!("failed to load AuthenticationClasses from {}", path.display()))?;
    }

    let options = SynthesisOptions {
        lookup_timeout: Duration::from_secs(args.lookup_timeout),
        on_missing_authentication_class: args.on_missing_authentication_class,
        failure_policy: args.failure_policy,
    };

    let resources = synthesize_airflow(
        &airflow,
        &authentication_classes,
        &DefaultVectorConfigGenerator,
        &options,
    )
    .await
    .inspect_err(|err| tracing::error!(category = err.category(), "Synthesis failed"))?;

    tracing::info!("Rendering {} objects", resources.len());
    write_cluster_resources(&resources, std::io::stdout().lock())?;

    Ok(())
}
