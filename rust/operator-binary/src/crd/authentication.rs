use std::{collections::BTreeSet, future::Future, time};

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu, ensure};
use stackable_operator::{
    builder::pod::{PodBuilder, container::ContainerBuilder},
    commons::tls_verification::TlsClientDetailsError,
    crd::authentication::{core as auth_core, ldap, oidc},
    k8s_openapi::api::core::v1::EnvVar,
    kube::ResourceExt,
    schemars::{self, JsonSchema},
};
use tracing::info;

use crate::util::{SecretKeyRef, add_cert_to_python_certifi_command};

const SUPPORTED_AUTHENTICATION_CLASS_PROVIDERS: [&str; 2] = ["LDAP", "OIDC"];
// The assumed OIDC provider if no hint is given in the AuthClass
pub const DEFAULT_OIDC_PROVIDER: oidc::v1alpha1::IdentityProviderHint =
    oidc::v1alpha1::IdentityProviderHint::Keycloak;
const SUPPORTED_PRINCIPAL_CLAIM: &str = "preferred_username";

pub const OIDC_CLIENT_ID_ENV: &str = "OIDC_CLIENT_ID";
pub const OIDC_CLIENT_SECRET_ENV: &str = "OIDC_CLIENT_SECRET";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display(
        "The AuthenticationClass {auth_class_name:?} is referenced several times which is not allowed."
    ))]
    DuplicateAuthenticationClassReferencesNotAllowed { auth_class_name: String },

    #[snafu(display("Failed to retrieve AuthenticationClass {auth_class_name:?}"))]
    AuthenticationClassRetrievalFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
        auth_class_name: String,
    },

    #[snafu(display(
        "Timed out after {timeout:?} while retrieving AuthenticationClass {auth_class_name:?}"
    ))]
    AuthenticationClassRetrievalTimedOut {
        auth_class_name: String,
        timeout: time::Duration,
    },

    #[snafu(display("The AuthenticationClass {auth_class_name:?} does not exist"))]
    AuthenticationClassNotFound { auth_class_name: String },

    #[snafu(display(
        "Failed to use authentication provider [{provider}] for authentication class [{auth_class_name}] - supported providers: {SUPPORTED_AUTHENTICATION_CLASS_PROVIDERS:?}",
    ))]
    AuthenticationProviderNotSupported {
        auth_class_name: String,
        provider: String,
    },

    #[snafu(display("Invalid OIDC configuration"))]
    OidcConfigurationInvalid {
        source: auth_core::v1alpha1::Error,
        auth_class_name: String,
    },

    #[snafu(display(
        "{configured:?} is not a supported principalClaim in Airflow for the Keycloak OIDC provider. Please use {supported:?} in the AuthenticationClass {auth_class_name:?}"
    ))]
    OidcPrincipalClaimNotSupported {
        configured: String,
        supported: String,
        auth_class_name: String,
    },

    #[snafu(display(
        "TLS verification cannot be disabled in Airflow (AuthenticationClass {auth_class_name:?})."
    ))]
    TlsVerificationCannotBeDisabled { auth_class_name: String },

    #[snafu(display(
        "The userRegistrationRole settings must not differ between the authentication entries (AuthenticationClass {auth_class_name:?})."
    ))]
    DifferentUserRegistrationRoleSettingsNotAllowed { auth_class_name: String },

    #[snafu(display(
        "The userRegistration settings must not differ between the authentication entries (AuthenticationClass {auth_class_name:?})."
    ))]
    DifferentUserRegistrationSettingsNotAllowed { auth_class_name: String },

    #[snafu(display(
        "The syncRolesAt settings must not differ between the authentication entries (AuthenticationClass {auth_class_name:?})."
    ))]
    DifferentSyncRolesAtSettingsNotAllowed { auth_class_name: String },

    #[snafu(display("failed to add LDAP Volumes and VolumeMounts"))]
    AddLdapVolumes { source: ldap::v1alpha1::Error },

    #[snafu(display("failed to add TLS Volumes and VolumeMounts"))]
    AddTlsVolumes { source: TlsClientDetailsError },
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Snafu, Debug)]
pub enum LoadError {
    #[snafu(display("failed to parse AuthenticationClass document"))]
    ParseAuthenticationClass { source: serde_yaml::Error },
}

#[derive(Clone, Deserialize, Debug, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AirflowClientAuthenticationDetails {
    #[serde(flatten)]
    pub common: auth_core::v1alpha1::ClientAuthenticationDetails<()>,

    /// Allow users who are not already in the FAB DB.
    /// Gets mapped to `AUTH_USER_REGISTRATION`
    #[serde(default = "default_user_registration")]
    pub user_registration: bool,

    /// This role will be given in addition to any AUTH_ROLES_MAPPING.
    /// Gets mapped to `AUTH_USER_REGISTRATION_ROLE`
    #[serde(default = "default_user_registration_role")]
    pub user_registration_role: String,

    /// If we should replace ALL the user's roles each login, or only on registration.
    /// Gets mapped to `AUTH_ROLES_SYNC_AT_LOGIN`
    #[serde(default)]
    pub sync_roles_at: FlaskRolesSyncMoment,
}

pub fn default_user_registration() -> bool {
    true
}

pub fn default_user_registration_role() -> String {
    "Public".to_string()
}

/// Matches Flask's default mode of syncing at registration
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub enum FlaskRolesSyncMoment {
    #[default]
    Registration,
    Login,
}

/// How a reference to an AuthenticationClass that does not exist is handled.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, clap::ValueEnum)]
pub enum MissingAuthenticationClassPolicy {
    #[default]
    Fail,
    Skip,
}

/// Looks up AuthenticationClasses by name.
pub trait AuthenticationClassLookup {
    type Error: std::error::Error + Send + Sync + 'static;

    fn lookup(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<auth_core::v1alpha1::AuthenticationClass>, Self::Error>>
    + Send;
}

/// AuthenticationClasses loaded up front, e.g. from YAML files.
#[derive(Clone, Debug, Default)]
pub struct AuthenticationClassStore {
    classes: Vec<auth_core::v1alpha1::AuthenticationClass>,
}

impl AuthenticationClassStore {
    /// Loads all documents of a (multi-document) YAML stream.
    pub fn from_yaml(documents: &str) -> Result<Self, LoadError> {
        let mut store = Self::default();
        store.extend_from_yaml(documents)?;
        Ok(store)
    }

    pub fn extend_from_yaml(&mut self, documents: &str) -> Result<(), LoadError> {
        for document in serde_yaml::Deserializer::from_str(documents) {
            let class: auth_core::v1alpha1::AuthenticationClass =
                serde_yaml::with::singleton_map_recursive::deserialize(document)
                    .context(ParseAuthenticationClassSnafu)?;
            self.insert(class);
        }
        Ok(())
    }

    /// A class replaces an earlier one of the same name.
    pub fn insert(&mut self, class: auth_core::v1alpha1::AuthenticationClass) {
        self.classes
            .retain(|existing| existing.name_any() != class.name_any());
        self.classes.push(class);
    }
}

impl AuthenticationClassLookup for AuthenticationClassStore {
    type Error = std::convert::Infallible;

    async fn lookup(
        &self,
        name: &str,
    ) -> Result<Option<auth_core::v1alpha1::AuthenticationClass>, Self::Error> {
        Ok(self
            .classes
            .iter()
            .find(|class| class.name_any() == name)
            .cloned())
    }
}

/// What an authenticator contributes to the Pods of the role groups that use it.
pub trait Authenticator {
    fn env_vars(&self) -> Vec<EnvVar>;

    fn add_volumes_and_mounts(&self, pb: &mut PodBuilder, cb: &mut ContainerBuilder)
    -> Result<()>;

    fn start_commands(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Resolved and validated counter part for `AirflowClientAuthenticationDetails`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AirflowClientAuthenticationDetailsResolved {
    pub authentication_classes_resolved: Vec<AirflowAuthenticationClassResolved>,
    pub user_registration: bool,
    pub user_registration_role: String,
    pub sync_roles_at: FlaskRolesSyncMoment,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AirflowAuthenticationClassResolved {
    Ldap {
        auth_class_name: String,
        provider: ldap::v1alpha1::AuthenticationProvider,
    },
    Oidc {
        auth_class_name: String,
        provider: oidc::v1alpha1::AuthenticationProvider,
        oidc: oidc::v1alpha1::ClientAuthenticationOptions<()>,
    },
}

impl Authenticator for AirflowClientAuthenticationDetailsResolved {
    /// Variables of all authenticators in insertion order, the first one wins on duplicate names.
    fn env_vars(&self) -> Vec<EnvVar> {
        let mut names = BTreeSet::new();
        self.authentication_classes_resolved
            .iter()
            .flat_map(|auth_class_resolved| match auth_class_resolved {
                AirflowAuthenticationClassResolved::Ldap { .. } => vec![],
                AirflowAuthenticationClassResolved::Oidc { oidc, .. } => vec![
                    SecretKeyRef::new(&oidc.client_credentials_secret_ref, "CLIENT_ID")
                        .to_env_var(OIDC_CLIENT_ID_ENV),
                    SecretKeyRef::new(&oidc.client_credentials_secret_ref, "CLIENT_SECRET")
                        .to_env_var(OIDC_CLIENT_SECRET_ENV),
                ],
            })
            .filter(|env| names.insert(env.name.clone()))
            .collect()
    }

    fn add_volumes_and_mounts(
        &self,
        pb: &mut PodBuilder,
        cb: &mut ContainerBuilder,
    ) -> Result<()> {
        // Different authentication entries can reference the same secret
        // class or TLS certificate. It must be ensured that the volumes
        // and volume mounts are only added once in such a case.
        let mut ldap_authentication_providers = BTreeSet::new();
        let mut tls_client_credentials = BTreeSet::new();

        for auth_class_resolved in &self.authentication_classes_resolved {
            match auth_class_resolved {
                AirflowAuthenticationClassResolved::Ldap { provider, .. } => {
                    ldap_authentication_providers.insert(provider);
                }
                AirflowAuthenticationClassResolved::Oidc { provider, .. } => {
                    tls_client_credentials.insert(&provider.tls);
                }
            }
        }

        for provider in ldap_authentication_providers {
            provider
                .add_volumes_and_mounts(pb, vec![cb])
                .context(AddLdapVolumesSnafu)?;
        }

        for tls in tls_client_credentials {
            tls.add_volumes_and_mounts(pb, vec![cb])
                .context(AddTlsVolumesSnafu)?;
        }
        Ok(())
    }

    /// The OIDC providers' CA certificates are added to the certifi bundle Python uses.
    fn start_commands(&self) -> Vec<String> {
        let mut tls_ca_cert_mount_paths = BTreeSet::new();
        for auth_class_resolved in &self.authentication_classes_resolved {
            if let AirflowAuthenticationClassResolved::Oidc { provider, .. } = auth_class_resolved
            {
                tls_ca_cert_mount_paths.extend(provider.tls.tls_ca_cert_mount_path());
            }
        }

        tls_ca_cert_mount_paths
            .into_iter()
            .map(|tls_ca_cert_mount_path| add_cert_to_python_certifi_command(&tls_ca_cert_mount_path))
            .collect()
    }
}

impl AirflowClientAuthenticationDetailsResolved {
    pub fn ldap_authenticators(
        &self,
    ) -> impl Iterator<Item = (&str, &ldap::v1alpha1::AuthenticationProvider)> + '_ {
        self.authentication_classes_resolved
            .iter()
            .filter_map(|resolved| match resolved {
                AirflowAuthenticationClassResolved::Ldap {
                    auth_class_name,
                    provider,
                } => Some((auth_class_name.as_str(), provider)),
                AirflowAuthenticationClassResolved::Oidc { .. } => None,
            })
    }

    pub fn oidc_authenticators(
        &self,
    ) -> impl Iterator<
        Item = (
            &oidc::v1alpha1::AuthenticationProvider,
            &oidc::v1alpha1::ClientAuthenticationOptions<()>,
        ),
    > + '_ {
        self.authentication_classes_resolved
            .iter()
            .filter_map(|resolved| match resolved {
                AirflowAuthenticationClassResolved::Oidc { provider, oidc, .. } => {
                    Some((provider, oidc))
                }
                AirflowAuthenticationClassResolved::Ldap { .. } => None,
            })
    }

    /// Resolves the referenced AuthenticationClasses through `lookup`, giving up on a single
    /// lookup after `timeout`.
    pub async fn from<L>(
        auth_details: &[AirflowClientAuthenticationDetails],
        lookup: &L,
        timeout: time::Duration,
        on_missing: MissingAuthenticationClassPolicy,
    ) -> Result<AirflowClientAuthenticationDetailsResolved>
    where
        L: AuthenticationClassLookup + Sync,
    {
        let resolve_auth_class = |auth_class_name: String| async move {
            let result = tokio::time::timeout(timeout, lookup.lookup(&auth_class_name)).await;
            match result {
                Ok(lookup_result) => lookup_result.map_err(|err| {
                    Error::AuthenticationClassRetrievalFailed {
                        source: Box::new(err),
                        auth_class_name,
                    }
                }),
                Err(_elapsed) => AuthenticationClassRetrievalTimedOutSnafu {
                    auth_class_name,
                    timeout,
                }
                .fail(),
            }
        };
        AirflowClientAuthenticationDetailsResolved::resolve(
            auth_details,
            resolve_auth_class,
            on_missing,
        )
        .await
    }

    pub async fn resolve<R>(
        auth_details: &[AirflowClientAuthenticationDetails],
        resolve_auth_class: impl Fn(String) -> R,
        on_missing: MissingAuthenticationClassPolicy,
    ) -> Result<AirflowClientAuthenticationDetailsResolved>
    where
        R: Future<Output = Result<Option<auth_core::v1alpha1::AuthenticationClass>>>,
    {
        let mut resolved_auth_classes: Vec<AirflowAuthenticationClassResolved> = Vec::new();
        let mut user_registration = None;
        let mut user_registration_role = None;
        let mut sync_roles_at = None;

        let mut auth_class_names = BTreeSet::new();

        for entry in auth_details {
            let auth_class_name = entry.common.authentication_class_name();

            let is_new_auth_class = auth_class_names.insert(auth_class_name);
            ensure!(
                is_new_auth_class,
                DuplicateAuthenticationClassReferencesNotAllowedSnafu { auth_class_name }
            );

            let Some(auth_class) = resolve_auth_class(auth_class_name.to_owned()).await? else {
                match on_missing {
                    MissingAuthenticationClassPolicy::Fail => {
                        return AuthenticationClassNotFoundSnafu { auth_class_name }.fail();
                    }
                    MissingAuthenticationClassPolicy::Skip => {
                        info!("AuthenticationClass {auth_class_name} not found, ignoring it");
                        continue;
                    }
                }
            };

            let resolved_auth_class = match &auth_class.spec.provider {
                auth_core::v1alpha1::AuthenticationClassProvider::Ldap(provider) => {
                    AirflowAuthenticationClassResolved::Ldap {
                        auth_class_name: auth_class_name.to_owned(),
                        provider: provider.to_owned(),
                    }
                }
                auth_core::v1alpha1::AuthenticationClassProvider::Oidc(provider) => {
                    Self::from_oidc(auth_class_name, provider, entry)?
                }
                _ => {
                    return AuthenticationProviderNotSupportedSnafu {
                        auth_class_name,
                        provider: auth_class.spec.provider.to_string(),
                    }
                    .fail();
                }
            };
            resolved_auth_classes.push(resolved_auth_class);

            match user_registration {
                Some(user_registration) => {
                    ensure!(
                        user_registration == entry.user_registration,
                        DifferentUserRegistrationSettingsNotAllowedSnafu { auth_class_name }
                    );
                }
                None => user_registration = Some(entry.user_registration),
            }
            match &user_registration_role {
                Some(user_registration_role) => {
                    ensure!(
                        user_registration_role == &entry.user_registration_role,
                        DifferentUserRegistrationRoleSettingsNotAllowedSnafu { auth_class_name }
                    );
                }
                None => user_registration_role = Some(entry.user_registration_role.to_owned()),
            }
            match &sync_roles_at {
                Some(sync_roles_at) => {
                    ensure!(
                        sync_roles_at == &entry.sync_roles_at,
                        DifferentSyncRolesAtSettingsNotAllowedSnafu { auth_class_name }
                    );
                }
                None => sync_roles_at = Some(entry.sync_roles_at.to_owned()),
            }
        }
        Ok(AirflowClientAuthenticationDetailsResolved {
            authentication_classes_resolved: resolved_auth_classes,
            user_registration: user_registration.unwrap_or_else(default_user_registration),
            user_registration_role: user_registration_role
                .unwrap_or_else(default_user_registration_role),
            sync_roles_at: sync_roles_at.unwrap_or_default(),
        })
    }

    fn from_oidc(
        auth_class_name: &str,
        provider: &oidc::v1alpha1::AuthenticationProvider,
        auth_details: &AirflowClientAuthenticationDetails,
    ) -> Result<AirflowAuthenticationClassResolved> {
        if provider.provider_hint.is_none() {
            info!(
                "No OIDC provider hint given in AuthClass {auth_class_name}, assuming {DEFAULT_OIDC_PROVIDER:?}"
            );
        }

        ensure!(
            provider.principal_claim == SUPPORTED_PRINCIPAL_CLAIM,
            OidcPrincipalClaimNotSupportedSnafu {
                configured: provider.principal_claim.clone(),
                supported: SUPPORTED_PRINCIPAL_CLAIM,
                auth_class_name,
            }
        );

        ensure!(
            !provider.tls.uses_tls() || provider.tls.uses_tls_verification(),
            TlsVerificationCannotBeDisabledSnafu { auth_class_name }
        );

        Ok(AirflowAuthenticationClassResolved::Oidc {
            auth_class_name: auth_class_name.to_owned(),
            provider: provider.to_owned(),
            oidc: auth_details
                .common
                .oidc_or_error(auth_class_name)
                .context(OidcConfigurationInvalidSnafu { auth_class_name })?
                .clone(),
        })
    }
}
