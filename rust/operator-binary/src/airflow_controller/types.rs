use std::time::Duration;

use serde::Serialize;
use stackable_operator::{
    k8s_openapi::api::{
        apps::v1::StatefulSet,
        core::v1::{ConfigMap, Service},
        policy::v1::PodDisruptionBudget,
    },
    role_utils::RoleGroupRef,
};

use crate::crd::{
    authentication::{AirflowClientAuthenticationDetailsResolved, MissingAuthenticationClassPolicy},
    v1alpha1,
};

#[derive(Debug, Default)]
pub struct FetchedAdditionalData {
    pub authentication_config: AirflowClientAuthenticationDetailsResolved,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BuiltClusterResource {
    RolegroupConfigMap(ConfigMap, RoleGroupRef<v1alpha1::AirflowCluster>),
    RolegroupStatefulSet(StatefulSet, RoleGroupRef<v1alpha1::AirflowCluster>),
    RolegroupService(Service, RoleGroupRef<v1alpha1::AirflowCluster>),
    RolePdb(PodDisruptionBudget),
}

impl BuiltClusterResource {
    pub fn kind(&self) -> &'static str {
        match self {
            BuiltClusterResource::RolegroupConfigMap(..) => "ConfigMap",
            BuiltClusterResource::RolegroupStatefulSet(..) => "StatefulSet",
            BuiltClusterResource::RolegroupService(..) => "Service",
            BuiltClusterResource::RolePdb(..) => "PodDisruptionBudget",
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            BuiltClusterResource::RolegroupConfigMap(config_map, _) => {
                config_map.metadata.name.as_deref()
            }
            BuiltClusterResource::RolegroupStatefulSet(stateful_set, _) => {
                stateful_set.metadata.name.as_deref()
            }
            BuiltClusterResource::RolegroupService(service, _) => service.metadata.name.as_deref(),
            BuiltClusterResource::RolePdb(pdb) => pdb.metadata.name.as_deref(),
        }
    }

    pub fn rolegroup(&self) -> Option<&RoleGroupRef<v1alpha1::AirflowCluster>> {
        match self {
            BuiltClusterResource::RolegroupConfigMap(_, rolegroup)
            | BuiltClusterResource::RolegroupStatefulSet(_, rolegroup)
            | BuiltClusterResource::RolegroupService(_, rolegroup) => Some(rolegroup),
            BuiltClusterResource::RolePdb(_) => None,
        }
    }

    /// The object as a complete Kubernetes manifest, including `apiVersion` and `kind`.
    pub fn to_manifest(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            BuiltClusterResource::RolegroupConfigMap(config_map, _) => manifest(config_map),
            BuiltClusterResource::RolegroupStatefulSet(stateful_set, _) => manifest(stateful_set),
            BuiltClusterResource::RolegroupService(service, _) => manifest(service),
            BuiltClusterResource::RolePdb(pdb) => manifest(pdb),
        }
    }
}

// The `Serialize` implementations of k8s-openapi resources already write `apiVersion` and `kind`.
fn manifest<T: Serialize>(resource: &T) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(resource)
}

/// How failing role groups are reported.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, clap::ValueEnum)]
pub enum FailurePolicy {
    /// Report the first failing role group.
    #[default]
    FirstError,
    /// Build all role groups and report every failure.
    Aggregate,
}

#[derive(Clone, Debug)]
pub struct SynthesisOptions {
    /// Deadline of a single AuthenticationClass lookup.
    pub lookup_timeout: Duration,
    pub on_missing_authentication_class: MissingAuthenticationClassPolicy,
    pub failure_policy: FailurePolicy,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(10),
            on_missing_authentication_class: MissingAuthenticationClassPolicy::default(),
            failure_policy: FailurePolicy::default(),
        }
    }
}
