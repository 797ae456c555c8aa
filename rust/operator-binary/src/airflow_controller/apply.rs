use std::io::Write;

use snafu::{ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};

use super::types::BuiltClusterResource;

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to serialize {kind} {name:?}"))]
    SerializeResource {
        source: serde_json::Error,
        kind: &'static str,
        name: Option<String>,
    },

    #[snafu(display("failed to render {kind} {name:?} as YAML"))]
    RenderResource {
        source: serde_yaml::Error,
        kind: &'static str,
        name: Option<String>,
    },

    #[snafu(display("failed to write the cluster resources"))]
    WriteOutput { source: std::io::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Writes the resources as one multi-document YAML stream, in the order they were built.
pub fn write_cluster_resources(
    built_cluster_resources: &[BuiltClusterResource],
    mut out: impl Write,
) -> Result<()> {
    for resource in built_cluster_resources {
        let kind = resource.kind();
        let name = resource.name().map(str::to_string);
        match resource.rolegroup() {
            Some(rolegroup) => tracing::debug!("Writing {kind} {name:?} of {rolegroup}"),
            None => tracing::debug!("Writing {kind} {name:?}"),
        }
        let manifest = resource
            .to_manifest()
            .with_context(|_| SerializeResourceSnafu {
                kind,
                name: name.clone(),
            })?;
        let document =
            serde_yaml::to_string(&manifest).context(RenderResourceSnafu { kind, name })?;
        write!(out, "---\n{document}").context(WriteOutputSnafu)?;
    }
    out.flush().context(WriteOutputSnafu)
}
