use snafu::{ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};

use super::types::{FetchedAdditionalData, SynthesisOptions};
use crate::crd::{
    authentication::{self, AirflowClientAuthenticationDetailsResolved, AuthenticationClassLookup},
    v1alpha1,
};

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to apply authentication configuration"))]
    InvalidAuthenticationConfig { source: authentication::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Resolves everything the cluster references by name. This is the only step that does I/O.
pub async fn fetch_additional_data<L>(
    airflow: &v1alpha1::AirflowCluster,
    lookup: &L,
    options: &SynthesisOptions,
) -> Result<FetchedAdditionalData>
where
    L: AuthenticationClassLookup + Sync,
{
    let authentication = &airflow.spec.cluster_config.authentication;
    if authentication.is_empty() {
        return Ok(FetchedAdditionalData::default());
    }

    let authentication_config = AirflowClientAuthenticationDetailsResolved::from(
        authentication,
        lookup,
        options.lookup_timeout,
        options.on_missing_authentication_class,
    )
    .await
    .context(InvalidAuthenticationConfigSnafu)?;

    tracing::debug!(
        "Resolved {} authentication classes",
        authentication_config.authentication_classes_resolved.len()
    );

    Ok(FetchedAdditionalData {
        authentication_config,
    })
}
