use indoc::formatdoc;
use product_config::flask_app_config_writer::{self, FlaskAppConfigWriterError};
use snafu::{ResultExt, Snafu};
use stackable_operator::crd::authentication::{ldap, oidc};

use crate::crd::{
    AIRFLOW_CONFIG_FILENAME, AirflowConfigOptions,
    authentication::{
        AirflowClientAuthenticationDetailsResolved, FlaskRolesSyncMoment, OIDC_CLIENT_ID_ENV,
        OIDC_CLIENT_SECRET_ENV,
    },
};

pub const PYTHON_IMPORTS: &[&str] = &[
    "import os",
    "from flask_appbuilder.security.manager import (AUTH_DB, AUTH_LDAP, AUTH_OAUTH, AUTH_OID, AUTH_REMOTE_USER)",
];

const PREAMBLE_SETTINGS: &[(&str, &str)] = &[
    ("basedir", "os.path.abspath(os.path.dirname(__file__))"),
    ("WTF_CSRF_ENABLED", "True"),
];

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to write {AIRFLOW_CONFIG_FILENAME}"))]
    WriteConfigFile { source: FlaskAppConfigWriterError },

    #[snafu(display("{AIRFLOW_CONFIG_FILENAME} is not valid UTF-8"))]
    ConfigFileEncoding { source: std::string::FromUtf8Error },
}

type Settings = Vec<(String, String)>;

/// Renders the complete `webserver_config.py`.
///
/// The `config_overrides` are appended after the generated settings, so they win.
pub fn build_webserver_config<'a>(
    authentication: &AirflowClientAuthenticationDetailsResolved,
    config_overrides: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> Result<String, Error> {
    let mut config_file = Vec::new();

    let preamble: Settings = PREAMBLE_SETTINGS
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    flask_app_config_writer::write::<AirflowConfigOptions, _, _>(
        &mut config_file,
        preamble.iter().map(|(key, value)| (key, value)),
        PYTHON_IMPORTS,
    )
    .context(WriteConfigFileSnafu)?;

    for fragment in authentication_fragments(authentication) {
        config_file.push(b'\n');
        flask_app_config_writer::write::<AirflowConfigOptions, _, _>(
            &mut config_file,
            fragment.iter().map(|(key, value)| (key, value)),
            &[],
        )
        .context(WriteConfigFileSnafu)?;
    }

    let mut config_overrides = config_overrides.into_iter().peekable();
    if config_overrides.peek().is_some() {
        config_file.push(b'\n');
        flask_app_config_writer::write::<AirflowConfigOptions, _, _>(
            &mut config_file,
            config_overrides,
            &[],
        )
        .context(WriteConfigFileSnafu)?;
    }

    String::from_utf8(config_file).context(ConfigFileEncodingSnafu)
}

/// One fragment per authentication mechanism, LDAP before OIDC.
fn authentication_fragments(
    authentication: &AirflowClientAuthenticationDetailsResolved,
) -> Vec<Settings> {
    let mut fragments = Vec::new();

    let mut ldap_authenticators = authentication.ldap_authenticators();
    if let Some((auth_class_name, ldap)) = ldap_authenticators.next() {
        for (ignored, _) in ldap_authenticators {
            tracing::info!(
                "Only one LDAP AuthenticationClass is supported, using {auth_class_name} and ignoring {ignored}"
            );
        }
        fragments.push(ldap_settings(authentication, ldap));
    }

    let oidc_authenticators = authentication.oidc_authenticators().collect::<Vec<_>>();
    if !oidc_authenticators.is_empty() {
        fragments.push(oidc_settings(authentication, &oidc_authenticators));
    }

    if fragments.is_empty() {
        fragments.push(vec![setting(AirflowConfigOptions::AuthType, "'AUTH_DB'")]);
    }

    fragments
}

fn setting(option: AirflowConfigOptions, value: impl Into<String>) -> (String, String) {
    (option.to_string(), value.into())
}

fn ldap_settings(
    authentication: &AirflowClientAuthenticationDetailsResolved,
    ldap: &ldap::v1alpha1::AuthenticationProvider,
) -> Settings {
    let mut settings = vec![setting(AirflowConfigOptions::AuthType, "'AUTH_LDAP'")];
    settings.extend(policy_settings(authentication));
    settings.extend([
        setting(
            AirflowConfigOptions::AuthLdapServer,
            format!(
                "{protocol}{server_hostname}:{server_port}",
                protocol = if ldap.tls.uses_tls() {
                    "ldaps://"
                } else {
                    "ldap://"
                },
                server_hostname = ldap.hostname,
                server_port = ldap.port.unwrap_or_else(|| ldap.default_port()),
            ),
        ),
        setting(AirflowConfigOptions::AuthLdapSearch, &ldap.search_base),
        setting(
            AirflowConfigOptions::AuthLdapSearchFilter,
            &ldap.search_filter,
        ),
        setting(
            AirflowConfigOptions::AuthLdapUidField,
            &ldap.ldap_field_names.uid,
        ),
        setting(
            AirflowConfigOptions::AuthLdapGroupField,
            &ldap.ldap_field_names.group,
        ),
        setting(
            AirflowConfigOptions::AuthLdapFirstnameField,
            &ldap.ldap_field_names.given_name,
        ),
        setting(
            AirflowConfigOptions::AuthLdapLastnameField,
            &ldap.ldap_field_names.surname,
        ),
        setting(
            AirflowConfigOptions::AuthLdapEmailField,
            &ldap.ldap_field_names.email,
        ),
    ]);

    // Possible TLS options, see https://github.com/dpgaspar/Flask-AppBuilder/blob/f6f66fc1bcc0163a213e4a2e6f960e91082d201f/flask_appbuilder/security/manager.py#L243-L250
    settings.push(setting(
        AirflowConfigOptions::AuthLdapTlsDemand,
        ldap.tls.uses_tls().to_string(),
    ));
    if ldap.tls.uses_tls() {
        settings.push(setting(
            AirflowConfigOptions::AuthLdapAllowSelfSigned,
            (!ldap.tls.uses_tls_verification()).to_string(),
        ));
    }
    if let Some(ca_path) = ldap.tls.tls_ca_cert_mount_path() {
        settings.push(setting(AirflowConfigOptions::AuthLdapTlsCacertfile, ca_path));
    }

    if let Some((username_path, password_path)) = ldap.bind_credentials_mount_paths() {
        settings.push(setting(
            AirflowConfigOptions::AuthLdapBindUser,
            format!("open('{username_path}').read().strip()"),
        ));
        settings.push(setting(
            AirflowConfigOptions::AuthLdapBindPassword,
            format!("open('{password_path}').read().strip()"),
        ));
    }

    settings
}

/// All OIDC entries are served by one provider entry. The endpoints are taken from the first
/// entry, the scopes are the union of all entries.
fn oidc_settings(
    authentication: &AirflowClientAuthenticationDetailsResolved,
    oidc_authenticators: &[(
        &oidc::v1alpha1::AuthenticationProvider,
        &oidc::v1alpha1::ClientAuthenticationOptions<()>,
    )],
) -> Settings {
    let mut settings = vec![setting(AirflowConfigOptions::AuthType, "'AUTH_OAUTH'")];
    settings.extend(policy_settings(authentication));

    let Some((provider, _)) = oidc_authenticators.first() else {
        return settings;
    };

    let mut scopes: Vec<&str> = Vec::new();
    for (provider, client_options) in oidc_authenticators {
        for scope in provider.scopes.iter().chain(&client_options.extra_scopes) {
            if !scopes.contains(&scope.as_str()) {
                scopes.push(scope);
            }
        }
    }

    let issuer = issuer_url(provider);
    let oidc_provider = match provider.provider_hint {
        None | Some(oidc::v1alpha1::IdentityProviderHint::Keycloak) => "keycloak",
    };

    settings.push(setting(
        AirflowConfigOptions::OauthProviders,
        formatdoc! {"
            [
              {{ 'name': '{oidc_provider}',
                'icon': 'fa-key',
                'token_key': 'access_token',
                'remote_app': {{
                  'client_id': os.environ.get('{OIDC_CLIENT_ID_ENV}'),
                  'client_secret': os.environ.get('{OIDC_CLIENT_SECRET_ENV}'),
                  'client_kwargs': {{
                    'scope': '{scopes}'
                  }},
                  'api_base_url': '{issuer}/protocol/',
                  'server_metadata_url': '{issuer}/.well-known/openid-configuration',
                }},
              }}
            ]",
            scopes = scopes.join(" "),
        },
    ));

    settings
}

/// The issuer URL without a trailing slash.
fn issuer_url(provider: &oidc::v1alpha1::AuthenticationProvider) -> String {
    let scheme = if provider.tls.uses_tls() {
        "https"
    } else {
        "http"
    };
    let port = provider
        .port
        .map(|port| format!(":{port}"))
        .unwrap_or_default();
    let root_path = provider.root_path.trim_matches('/');
    if root_path.is_empty() {
        format!("{scheme}://{hostname}{port}", hostname = provider.hostname)
    } else {
        format!(
            "{scheme}://{hostname}{port}/{root_path}",
            hostname = provider.hostname
        )
    }
}

fn policy_settings(authentication: &AirflowClientAuthenticationDetailsResolved) -> Settings {
    vec![
        setting(
            AirflowConfigOptions::AuthUserRegistration,
            authentication.user_registration.to_string(),
        ),
        setting(
            AirflowConfigOptions::AuthUserRegistrationRole,
            &authentication.user_registration_role,
        ),
        setting(
            AirflowConfigOptions::AuthRolesSyncAtLogin,
            (authentication.sync_roles_at == FlaskRolesSyncMoment::Login).to_string(),
        ),
    ]
}
