use stackable_operator::{
    builder::pod::volume::VolumeBuilder,
    k8s_openapi::api::core::v1::Volume,
    product_logging::{
        self,
        spec::{
            ConfigMapLogConfig, ContainerLogConfig, ContainerLogConfigChoice,
            CustomContainerLogConfig,
        },
    },
};

use crate::crd::MAX_LOG_FILES_SIZE;

pub const CONFIG_VOLUME_NAME: &str = "config";
pub const LOG_CONFIG_VOLUME_NAME: &str = "log-config";
pub const LOG_VOLUME_NAME: &str = "log";

/// The role group ConfigMap, the shared log directory and the logging configuration, which is
/// taken from the user's ConfigMap if the main container has a custom log config.
pub fn create_volumes(
    config_map_name: &str,
    log_config: Option<&ContainerLogConfig>,
) -> Vec<Volume> {
    let mut volumes = Vec::new();

    volumes.push(
        VolumeBuilder::new(CONFIG_VOLUME_NAME)
            .with_config_map(config_map_name)
            .build(),
    );

    volumes.push(
        VolumeBuilder::new(LOG_VOLUME_NAME)
            .with_empty_dir(
                None::<String>,
                Some(product_logging::framework::calculate_log_volume_size_limit(
                    &[MAX_LOG_FILES_SIZE],
                )),
            )
            .build(),
    );

    if let Some(ContainerLogConfig {
        choice:
            Some(ContainerLogConfigChoice::Custom(CustomContainerLogConfig {
                custom: ConfigMapLogConfig { config_map },
            })),
    }) = log_config
    {
        volumes.push(
            VolumeBuilder::new(LOG_CONFIG_VOLUME_NAME)
                .with_config_map(config_map)
                .build(),
        );
    } else {
        volumes.push(
            VolumeBuilder::new(LOG_CONFIG_VOLUME_NAME)
                .with_config_map(config_map_name)
                .build(),
        );
    }

    volumes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_map_of(volumes: &[Volume], name: &str) -> Option<String> {
        volumes
            .iter()
            .find(|volume| volume.name == name)
            .and_then(|volume| volume.config_map.as_ref())
            .map(|config_map| config_map.name.clone())
    }

    #[test]
    fn test_automatic_log_config_uses_rolegroup_config_map() {
        let volumes = create_volumes("airflow-webservers-default", None);

        assert_eq!(
            config_map_of(&volumes, LOG_CONFIG_VOLUME_NAME).as_deref(),
            Some("airflow-webservers-default")
        );
        assert!(volumes
            .iter()
            .find(|volume| volume.name == LOG_VOLUME_NAME)
            .and_then(|volume| volume.empty_dir.as_ref())
            .and_then(|empty_dir| empty_dir.size_limit.as_ref())
            .is_some());
    }

    #[test]
    fn test_custom_log_config_uses_its_config_map() {
        let log_config: ContainerLogConfig =
            serde_yaml::from_str("custom:\n  configMap: my-log-config").unwrap();
        let volumes = create_volumes("airflow-webservers-default", Some(&log_config));

        assert_eq!(
            config_map_of(&volumes, CONFIG_VOLUME_NAME).as_deref(),
            Some("airflow-webservers-default")
        );
        assert_eq!(
            config_map_of(&volumes, LOG_CONFIG_VOLUME_NAME).as_deref(),
            Some("my-log-config")
        );
    }
}
