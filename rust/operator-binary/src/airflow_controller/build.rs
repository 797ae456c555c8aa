use snafu::{ResultExt, Snafu, ensure};
use stackable_operator::{
    commons::product_image_selection::ResolvedProductImage, kvp::Labels, role_utils::RoleGroupRef,
};
use strum::{EnumDiscriminants, IntoEnumIterator, IntoStaticStr};

use super::{
    AIRFLOW_CONTROLLER_NAME, BuildLabelSnafu, DOCKER_IMAGE_BASE_NAME, FailedToResolveConfigSnafu,
    build_rolegroup_config_map, build_server_rolegroup_statefulset, statefulset_container_ports,
    types::{BuiltClusterResource, FailurePolicy, FetchedAdditionalData},
};
use crate::{
    crd::{
        APP_NAME, AirflowRole, authentication::AirflowClientAuthenticationDetailsResolved,
        build_recommended_labels, v1alpha1,
    },
    operations::pdb::{self, build_pdb},
    product_logging::VectorConfigGenerator,
    service::{self, build_rolegroup_headless_service, build_rolegroup_metrics_service},
};

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("the {role} role is not supported"))]
    UnsupportedRole { role: String },

    #[snafu(display("failed to build {rolegroup}"))]
    BuildRoleGroup {
        source: super::Error,
        rolegroup: RoleGroupRef<v1alpha1::AirflowCluster>,
    },

    #[snafu(display("failed to build Service for {rolegroup}"))]
    BuildService {
        source: service::Error,
        rolegroup: RoleGroupRef<v1alpha1::AirflowCluster>,
    },

    #[snafu(display("failed to create PodDisruptionBudget"))]
    FailedToCreatePdb { source: pdb::Error },

    #[snafu(display(
        "{} role groups failed to build: {}",
        failures.len(),
        failures.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    ))]
    RoleGroupsFailed { failures: Vec<Error> },
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

/// Builds all role groups of all declared roles, in role order and then role group name order.
///
/// A failing role group contributes nothing, its siblings are built regardless. The failures are
/// reported according to the `failure_policy`.
pub fn build_cluster_resources<G: VectorConfigGenerator>(
    airflow: &v1alpha1::AirflowCluster,
    additional_data: &FetchedAdditionalData,
    vector_config_generator: &G,
    failure_policy: FailurePolicy,
) -> Result<Vec<BuiltClusterResource>> {
    // Executor Pods would be created by Airflow itself
    ensure!(
        airflow.spec.kubernetes_executors.is_none(),
        UnsupportedRoleSnafu {
            role: "kubernetesExecutors"
        }
    );

    let resolved_product_image = airflow
        .spec
        .image
        .resolve(DOCKER_IMAGE_BASE_NAME, crate::built_info::PKG_VERSION);

    let mut built_cluster_resources = Vec::new();
    let mut failures = Vec::new();

    for airflow_role in AirflowRole::iter() {
        let Some(role) = airflow.get_role(&airflow_role) else {
            continue;
        };

        for (rolegroup_ref, replicas) in airflow.rolegroup_ref_and_replicas(&airflow_role) {
            match build_rolegroup_resources(
                airflow,
                &resolved_product_image,
                &airflow_role,
                &rolegroup_ref,
                replicas,
                &additional_data.authentication_config,
                vector_config_generator,
            ) {
                Ok(resources) => built_cluster_resources.extend(resources),
                Err(source) => {
                    tracing::warn!(
                        rolegroup = %rolegroup_ref,
                        category = source.category(),
                        "Failed to build role group: {source}"
                    );
                    failures.push(source);
                }
            }
        }

        if let Some(pdb) = build_pdb(
            &role.role_config.pod_disruption_budget,
            airflow,
            &airflow_role,
        )
        .context(FailedToCreatePdbSnafu)?
        {
            built_cluster_resources.push(BuiltClusterResource::RolePdb(pdb));
        }
    }

    let mut failures = failures.into_iter();
    match (failure_policy, failures.next()) {
        (_, None) => Ok(built_cluster_resources),
        (FailurePolicy::FirstError, Some(first)) => Err(first),
        (FailurePolicy::Aggregate, Some(first)) => RoleGroupsFailedSnafu {
            failures: std::iter::once(first).chain(failures).collect::<Vec<_>>(),
        }
        .fail(),
    }
}

/// ConfigMap, StatefulSet and Services of one role group, in that order.
fn build_rolegroup_resources<G: VectorConfigGenerator>(
    airflow: &v1alpha1::AirflowCluster,
    resolved_product_image: &ResolvedProductImage,
    airflow_role: &AirflowRole,
    rolegroup_ref: &RoleGroupRef<v1alpha1::AirflowCluster>,
    replicas: u16,
    authentication_config: &AirflowClientAuthenticationDetailsResolved,
    vector_config_generator: &G,
) -> Result<Vec<BuiltClusterResource>> {
    let in_rolegroup = |source: super::Error| Error::BuildRoleGroup {
        source,
        rolegroup: rolegroup_ref.clone(),
    };

    let merged_airflow_config = airflow
        .merged_config(airflow_role, rolegroup_ref)
        .context(FailedToResolveConfigSnafu)
        .map_err(in_rolegroup)?;
    let overrides = airflow
        .merged_overrides(airflow_role, rolegroup_ref)
        .context(FailedToResolveConfigSnafu)
        .map_err(in_rolegroup)?;

    let config_map = build_rolegroup_config_map(
        airflow,
        resolved_product_image,
        airflow_role,
        rolegroup_ref,
        authentication_config,
        &merged_airflow_config,
        &overrides,
        vector_config_generator,
    )
    .map_err(in_rolegroup)?;

    let statefulset = build_server_rolegroup_statefulset(
        airflow,
        resolved_product_image,
        airflow_role,
        rolegroup_ref,
        replicas,
        authentication_config,
        &merged_airflow_config,
        &overrides,
    )
    .map_err(in_rolegroup)?;

    let selector = Labels::role_group_selector(
        airflow,
        APP_NAME,
        &rolegroup_ref.role,
        &rolegroup_ref.role_group,
    )
    .context(BuildLabelSnafu)
    .map_err(in_rolegroup)?;
    let object_labels = || {
        build_recommended_labels(
            airflow,
            AIRFLOW_CONTROLLER_NAME,
            &resolved_product_image.app_version_label,
            &rolegroup_ref.role,
            &rolegroup_ref.role_group,
        )
    };
    let container_ports = statefulset_container_ports(&statefulset);

    let mut resources = vec![
        BuiltClusterResource::RolegroupConfigMap(config_map, rolegroup_ref.clone()),
        BuiltClusterResource::RolegroupStatefulSet(statefulset, rolegroup_ref.clone()),
    ];

    // some roles will only run "internally" and do not need to be created as services
    if airflow_role.get_http_port().is_some() {
        let headless_service = build_rolegroup_headless_service(
            airflow,
            rolegroup_ref,
            object_labels(),
            selector.clone().into(),
        )
        .with_context(|_| BuildServiceSnafu {
            rolegroup: rolegroup_ref.clone(),
        })?;
        resources.push(BuiltClusterResource::RolegroupService(
            headless_service,
            rolegroup_ref.clone(),
        ));
    }

    if let Some(metrics_service) = build_rolegroup_metrics_service(
        airflow,
        rolegroup_ref,
        &container_ports,
        object_labels(),
        selector.into(),
    )
    .with_context(|_| BuildServiceSnafu {
        rolegroup: rolegroup_ref.clone(),
    })? {
        resources.push(BuiltClusterResource::RolegroupService(
            metrics_service,
            rolegroup_ref.clone(),
        ));
    }

    Ok(resources)
}
