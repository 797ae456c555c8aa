use stackable_operator::k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, SecretKeySelector};

/// A reference to one key of a Secret. The value itself never leaves the Secret.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SecretKeyRef {
    pub secret: String,
    pub key: String,
}

impl SecretKeyRef {
    pub fn new(secret: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            key: key.into(),
        }
    }

    /// An environment variable resolved by the kubelet via `valueFrom.secretKeyRef`.
    pub fn to_env_var(&self, var_name: &str) -> EnvVar {
        EnvVar {
            name: String::from(var_name),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: self.secret.clone(),
                    key: self.key.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

pub fn env_var_from_secret(var_name: &str, secret: &str, secret_key: &str) -> EnvVar {
    SecretKeyRef::new(secret, secret_key).to_env_var(var_name)
}

pub fn env_var(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

/// Adds a CA file from `cert_file` to the root certificates of Python Certifi
pub fn add_cert_to_python_certifi_command(cert_file: &str) -> String {
    format!("cat {cert_file} >> \"$(python -c 'import certifi; print(certifi.where())')\"")
}
