use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stackable_operator::{
    schemars::{self, JsonSchema},
    time::Duration,
    utils::COMMON_BASH_TRAP_FUNCTIONS,
};

pub const GIT_SYNC_CONTENT: &str = "content-from-git";
pub const GIT_SYNC_SAFE_DIR: &str = "safe.directory";
pub const GIT_SYNC_DIR: &str = "/stackable/app/git";
pub const GIT_SYNC_ROOT: &str = "/tmp/git";
pub const GIT_SYNC_LINK: &str = "current";
pub const GIT_SYNC_NAME: &str = "gitsync";

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSync {
    /// The git repository URL that will be cloned.
    pub repo: String,

    /// The branch to clone. Defaults to `main`.
    #[serde(default = "GitSync::default_branch")]
    pub branch: String,

    /// The location of the DAG folder, relative to the synced repository root.
    #[serde(default = "GitSync::default_git_folder")]
    pub git_folder: String,

    /// The number of commits to clone; defaults to 1.
    #[serde(default = "GitSync::default_depth")]
    pub depth: u32,

    /// The synchronization interval, e.g. `20s` or `5m`, defaults to `30s`.
    #[serde(default = "GitSync::default_wait")]
    pub wait: Duration,

    /// The name of the Secret with the `user` and `password` used to access the repository.
    #[serde(default, alias = "credentialsSecretName")]
    pub credentials_secret: Option<String>,

    /// Additional git-sync command line flags.
    #[serde(default)]
    pub git_sync_conf: BTreeMap<String, String>,
}

impl GitSync {
    fn default_branch() -> String {
        "main".to_string()
    }

    fn default_git_folder() -> String {
        "/".to_string()
    }

    fn default_depth() -> u32 {
        1
    }

    fn default_wait() -> Duration {
        Duration::from_secs(30)
    }

    /// The folder the DAGs are read from once synced.
    pub fn dags_folder(&self) -> String {
        format!(
            "{GIT_SYNC_DIR}/{GIT_SYNC_LINK}/{}",
            self.git_folder.trim_start_matches('/')
        )
    }

    /// Returns the command arguments for calling git-sync. A `one_time` call runs in the
    /// foreground and terminates after the first sync, which is what init containers need.
    pub fn get_args(&self, one_time: bool) -> Vec<String> {
        let mut git_config = format!("{GIT_SYNC_SAFE_DIR}:{GIT_SYNC_ROOT}");
        let mut git_sync_command = vec![
            "/stackable/git-sync".to_string(),
            format!("--repo={}", self.repo),
            format!("--ref={}", self.branch),
            format!("--depth={}", self.depth),
            format!("--period={}s", self.wait.as_secs()),
            format!("--link={GIT_SYNC_LINK}"),
            format!("--root={GIT_SYNC_ROOT}"),
        ];
        if !self.git_sync_conf.is_empty() {
            for (key, value) in &self.git_sync_conf {
                // the destination of the checkout is fixed
                if key.eq_ignore_ascii_case("--dest") || key.eq_ignore_ascii_case("--root") {
                    tracing::warn!("Config option {:?} will be ignored...", key);
                } else if key.to_lowercase().ends_with("-git-config") {
                    if value.to_lowercase().contains(GIT_SYNC_SAFE_DIR) {
                        tracing::warn!(
                            "Config option {value:?} contains a value for {GIT_SYNC_SAFE_DIR}, \
                            git-sync will probably not work as expected"
                        );
                    }
                    git_config = format!("{git_config},{value}");
                } else {
                    git_sync_command.push(format!("{key}={value}"));
                }
            }
            git_sync_command.push(format!("--git-config='{git_config}'"));
        }

        let mut args = vec![];
        if one_time {
            git_sync_command.push("--one-time=true".to_string());
            args.push(git_sync_command.join(" "));
        } else {
            git_sync_command.push("&".to_string());
            args.push(COMMON_BASH_TRAP_FUNCTIONS.to_string());
            args.push("prepare_signal_handlers".to_string());
            args.push(git_sync_command.join(" "));
            args.push("wait_for_termination $!".to_string());
        }
        args
    }
}
