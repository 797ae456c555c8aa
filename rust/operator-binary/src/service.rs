use std::collections::BTreeMap;

use snafu::{ResultExt, Snafu};
use stackable_operator::{
    builder::meta::ObjectMetaBuilder,
    k8s_openapi::api::core::v1::{ContainerPort, Service, ServicePort, ServiceSpec},
    kvp::{Annotations, Labels, ObjectLabels},
    role_utils::RoleGroupRef,
};

use crate::crd::{HTTP_PORT, HTTP_PORT_NAME, METRICS_PORT_NAME, v1alpha1};

pub const METRICS_SERVICE_SUFFIX: &str = "metrics";
pub const HEADLESS_SERVICE_SUFFIX: &str = "headless";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("object is missing metadata to build owner reference"))]
    ObjectMissingMetadataForOwnerRef {
        source: stackable_operator::builder::meta::Error,
    },

    #[snafu(display("failed to build Metadata"))]
    MetadataBuild {
        source: stackable_operator::builder::meta::Error,
    },

    #[snafu(display("failed to build Labels"))]
    LabelBuild {
        source: stackable_operator::kvp::LabelError,
    },

    #[snafu(display("failed to build Annotations"))]
    AnnotationBuild {
        source: stackable_operator::kvp::AnnotationError,
    },
}

/// The rolegroup headless [`Service`] is a service that allows direct access to the instances of a certain rolegroup
/// This is mostly useful for internal communication between peers, or for clients that perform client-side load balancing.
pub fn build_rolegroup_headless_service(
    airflow: &v1alpha1::AirflowCluster,
    rolegroup_ref: &RoleGroupRef<v1alpha1::AirflowCluster>,
    object_labels: ObjectLabels<v1alpha1::AirflowCluster>,
    selector: BTreeMap<String, String>,
) -> Result<Service, Error> {
    let metadata = ObjectMetaBuilder::new()
        .name_and_namespace(airflow)
        .name(rolegroup_headless_service_name(
            &rolegroup_ref.object_name(),
        ))
        .ownerreference_from_resource(airflow, None, Some(true))
        .context(ObjectMissingMetadataForOwnerRefSnafu)?
        .with_recommended_labels(object_labels)
        .context(MetadataBuildSnafu)?
        .build();

    let service_spec = ServiceSpec {
        // Internal communication does not need to be exposed
        type_: Some("ClusterIP".to_string()),
        cluster_ip: Some("None".to_string()),
        ports: Some(headless_service_ports()),
        selector: Some(selector),
        publish_not_ready_addresses: Some(true),
        ..ServiceSpec::default()
    };

    Ok(Service {
        metadata,
        spec: Some(service_spec),
        status: None,
    })
}

/// The rolegroup metrics [`Service`] exposes the container port named `metrics` together with the
/// Prometheus scraping label and annotations. Without such a port there is nothing to scrape and
/// no Service.
pub fn build_rolegroup_metrics_service(
    airflow: &v1alpha1::AirflowCluster,
    rolegroup_ref: &RoleGroupRef<v1alpha1::AirflowCluster>,
    container_ports: &[ContainerPort],
    object_labels: ObjectLabels<v1alpha1::AirflowCluster>,
    selector: BTreeMap<String, String>,
) -> Result<Option<Service>, Error> {
    let Some(metrics_port) = container_ports
        .iter()
        .find(|port| port.name.as_deref() == Some(METRICS_PORT_NAME))
    else {
        return Ok(None);
    };

    let metadata = ObjectMetaBuilder::new()
        .name_and_namespace(airflow)
        .name(rolegroup_metrics_service_name(&rolegroup_ref.object_name()))
        .ownerreference_from_resource(airflow, None, Some(true))
        .context(ObjectMissingMetadataForOwnerRefSnafu)?
        .with_recommended_labels(object_labels)
        .context(MetadataBuildSnafu)?
        .with_labels(prometheus_labels()?)
        .with_annotations(prometheus_annotations(metrics_port.container_port)?)
        .build();

    let service_spec = ServiceSpec {
        // Internal communication does not need to be exposed
        type_: Some("ClusterIP".to_string()),
        cluster_ip: Some("None".to_string()),
        ports: Some(vec![ServicePort {
            name: Some(METRICS_PORT_NAME.to_string()),
            port: metrics_port.container_port,
            protocol: Some(
                metrics_port
                    .protocol
                    .clone()
                    .unwrap_or_else(|| "TCP".to_string()),
            ),
            ..ServicePort::default()
        }]),
        selector: Some(selector),
        publish_not_ready_addresses: Some(true),
        ..ServiceSpec::default()
    };

    Ok(Some(Service {
        metadata,
        spec: Some(service_spec),
        status: None,
    }))
}

pub fn stateful_set_service_name(
    rolegroup_ref: &RoleGroupRef<v1alpha1::AirflowCluster>,
) -> Option<String> {
    Some(rolegroup_headless_service_name(
        &rolegroup_ref.object_name(),
    ))
}

/// Returns the metrics rolegroup service name `<cluster>-<role>-<rolegroup>-<METRICS_SERVICE_SUFFIX>`.
fn rolegroup_metrics_service_name(role_group_ref_object_name: &str) -> String {
    format!("{role_group_ref_object_name}-{METRICS_SERVICE_SUFFIX}")
}

/// Returns the headless rolegroup service name `<cluster>-<role>-<rolegroup>-<HEADLESS_SERVICE_SUFFIX>`.
fn rolegroup_headless_service_name(role_group_ref_object_name: &str) -> String {
    format!("{role_group_ref_object_name}-{HEADLESS_SERVICE_SUFFIX}")
}

fn headless_service_ports() -> Vec<ServicePort> {
    vec![ServicePort {
        name: Some(HTTP_PORT_NAME.to_string()),
        port: HTTP_PORT.into(),
        protocol: Some("TCP".to_string()),
        ..ServicePort::default()
    }]
}

/// Common labels for Prometheus
fn prometheus_labels() -> Result<Labels, Error> {
    Labels::try_from([("prometheus.io/scrape", "true")]).context(LabelBuildSnafu)
}

/// Common annotations for Prometheus
///
/// These annotations can be used in a ServiceMonitor.
///
/// see also <https://github.com/prometheus-community/helm-charts/blob/prometheus-27.32.0/charts/prometheus/values.yaml#L983-L1036>
fn prometheus_annotations(metrics_port: i32) -> Result<Annotations, Error> {
    Annotations::try_from([
        ("prometheus.io/path".to_owned(), "/metrics".to_owned()),
        ("prometheus.io/port".to_owned(), metrics_port.to_string()),
        ("prometheus.io/scheme".to_owned(), "http".to_owned()),
        ("prometheus.io/scrape".to_owned(), "true".to_owned()),
    ])
    .context(AnnotationBuildSnafu)
}
