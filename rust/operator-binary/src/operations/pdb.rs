use snafu::{ResultExt, Snafu};
use stackable_operator::{
    builder::pdb::PodDisruptionBudgetBuilder, commons::pdb::PdbConfig,
    k8s_openapi::api::policy::v1::PodDisruptionBudget,
};

use crate::{
    airflow_controller::AIRFLOW_CONTROLLER_NAME,
    crd::{APP_NAME, AirflowRole, OPERATOR_NAME, v1alpha1},
};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Cannot create PodDisruptionBudget for role [{role}]"))]
    CreatePdb {
        source: stackable_operator::builder::pdb::Error,
        role: String,
    },
}

/// The PodDisruptionBudget of a role, unless it is disabled.
pub fn build_pdb(
    pdb: &PdbConfig,
    airflow: &v1alpha1::AirflowCluster,
    role: &AirflowRole,
) -> Result<Option<PodDisruptionBudget>, Error> {
    if !pdb.enabled {
        return Ok(None);
    }

    let max_unavailable = pdb.max_unavailable.unwrap_or(match role {
        AirflowRole::Scheduler => max_unavailable_schedulers(),
        AirflowRole::Webserver => max_unavailable_webservers(),
        AirflowRole::Worker => max_unavailable_workers(),
    });
    let pdb = PodDisruptionBudgetBuilder::new_with_role(
        airflow,
        APP_NAME,
        &role.to_string(),
        OPERATOR_NAME,
        AIRFLOW_CONTROLLER_NAME,
    )
    .with_context(|_| CreatePdbSnafu {
        role: role.to_string(),
    })?
    .with_max_unavailable(max_unavailable)
    .build();

    Ok(Some(pdb))
}

fn max_unavailable_schedulers() -> u16 {
    1
}

fn max_unavailable_workers() -> u16 {
    1
}

fn max_unavailable_webservers() -> u16 {
    1
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use stackable_operator::k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

    use super::*;

    fn airflow() -> v1alpha1::AirflowCluster {
        let deserializer = serde_yaml::Deserializer::from_str(
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
            ",
        );
        serde_yaml::with::singleton_map_recursive::deserialize(deserializer).unwrap()
    }

    #[rstest]
    #[case("{}", AirflowRole::Scheduler, Some(1))]
    #[case("{maxUnavailable: 3}", AirflowRole::Worker, Some(3))]
    #[case("{enabled: false}", AirflowRole::Webserver, None)]
    fn test_pdb(
        #[case] pdb: &str,
        #[case] role: AirflowRole,
        #[case] max_unavailable: Option<i32>,
    ) {
        let pdb: PdbConfig = serde_yaml::from_str(pdb).unwrap();
        let built = build_pdb(&pdb, &airflow(), &role).unwrap();

        assert_eq!(
            built.and_then(|pdb| pdb.spec?.max_unavailable),
            max_unavailable.map(IntOrString::Int)
        );
    }

    #[test]
    fn test_pdb_selects_the_role() {
        let pdb: PdbConfig = serde_yaml::from_str("{}").unwrap();
        let pdb = build_pdb(&pdb, &airflow(), &AirflowRole::Webserver)
            .unwrap()
            .expect("an enabled PodDisruptionBudget");

        assert_eq!(pdb.metadata.name.as_deref(), Some("airflow-webservers"));
        let match_labels = pdb
            .spec
            .and_then(|spec| spec.selector)
            .and_then(|selector| selector.match_labels)
            .unwrap();
        assert_eq!(match_labels["app.kubernetes.io/component"], "webservers");
        assert_eq!(match_labels["app.kubernetes.io/instance"], "airflow");
    }
}
