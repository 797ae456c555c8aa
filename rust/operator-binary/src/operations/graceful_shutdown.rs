use snafu::{ResultExt, Snafu};
use stackable_operator::builder::pod::PodBuilder;

use crate::crd::AirflowConfig;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to set terminationGracePeriod"))]
    SetTerminationGracePeriod {
        source: stackable_operator::builder::pod::Error,
    },
}

pub fn add_airflow_graceful_shutdown_config(
    merged_config: &AirflowConfig,
    pod_builder: &mut PodBuilder,
) -> Result<(), Error> {
    // This must be always set by the merge mechanism, as we provide a default value,
    // users can not disable graceful shutdown.
    if let Some(graceful_shutdown_timeout) = merged_config.graceful_shutdown_timeout {
        pod_builder
            .termination_grace_period(&graceful_shutdown_timeout)
            .context(SetTerminationGracePeriodSnafu)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use stackable_operator::{builder::pod::container::ContainerBuilder, time::Duration};

    use super::*;

    fn pod_builder() -> PodBuilder {
        let mut pb = PodBuilder::new();
        pb.metadata_default()
            .add_container(ContainerBuilder::new("airflow").unwrap().build());
        pb
    }

    #[test]
    fn test_timeout_becomes_termination_grace_period() {
        let config = AirflowConfig {
            graceful_shutdown_timeout: Some(Duration::from_minutes_unchecked(5)),
            ..AirflowConfig::default()
        };
        let mut pb = pod_builder();
        add_airflow_graceful_shutdown_config(&config, &mut pb).unwrap();

        let pod = pb.build().unwrap();
        assert_eq!(
            pod.spec.and_then(|spec| spec.termination_grace_period_seconds),
            Some(300)
        );
    }
}
