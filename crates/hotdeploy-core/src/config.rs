//! Daemon configuration, read once at startup from a YAML file.
//!
//! ```yaml
//! port: 8080
//! repositories:
//!   app:
//!     relative_build_dir: svc
//!     run_args: "--env dev"
//! ```

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::error::{HotDeployError, Result};

/// Where `go build` writes the binary that `air` then runs.
pub const BUILD_OUTPUT: &str = "./tmp/main";

fn default_build_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_work_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_assets_dir() -> PathBuf {
    PathBuf::from("assets")
}

fn default_webhook_path() -> String {
    "/".to_string()
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

/// Build and run settings for one deployable repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Package directory handed to `go build`, relative to the repository root.
    #[serde(default = "default_build_dir", alias = "build_relative_dir")]
    pub relative_build_dir: PathBuf,

    /// Arguments passed to the built binary when `air` runs it.
    #[serde(default, alias = "build_args_bin")]
    pub run_args: String,

    /// Kill and relaunch a running supervisor after every successful sync.
    #[serde(default)]
    pub restart_on_push: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            relative_build_dir: default_build_dir(),
            run_args: String::new(),
            restart_on_push: false,
        }
    }
}

impl RepositoryConfig {
    /// The `-build.cmd` value handed to the supervisor.
    pub fn build_command(&self) -> String {
        format!(
            "go build -o {} {}",
            BUILD_OUTPUT,
            self.relative_build_dir.display()
        )
    }

    /// Full argument list for the supervisor binary.
    pub fn supervisor_args(&self) -> Vec<String> {
        vec![
            format!("-build.cmd={}", self.build_command()),
            format!("-build.args_bin={}", self.run_args),
        ]
    }
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,

    #[serde(default)]
    pub repositories: BTreeMap<String, RepositoryConfig>,

    /// Directory that holds one working copy per repository.
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,

    /// Directory the bundled `air.tar.gz` is read from at startup.
    #[serde(default = "default_assets_dir")]
    pub assets_dir: PathBuf,

    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,

    /// Upper bound on draining in-flight HTTP requests at shutdown.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    /// Read, parse and validate the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|source| HotDeployError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml_str(&data)?;
        debug!(
            path = %path.display(),
            repositories = config.repositories.len(),
            "loaded config"
        );
        Ok(config)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(data: &str) -> Result<Self> {
        let mut config: ServerConfig = serde_yaml::from_str(data)?;
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    fn apply_defaults(&mut self) {
        for repo in self.repositories.values_mut() {
            if repo.relative_build_dir.as_os_str().is_empty() {
                repo.relative_build_dir = default_build_dir();
            }
        }
        if self.webhook_path.is_empty() {
            self.webhook_path = default_webhook_path();
        }
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(HotDeployError::InvalidConfig(
                "port must be non-zero".to_string(),
            ));
        }
        if !self.webhook_path.starts_with('/') {
            return Err(HotDeployError::InvalidConfig(format!(
                "webhook_path must start with '/': {}",
                self.webhook_path
            )));
        }
        for name in self.repositories.keys() {
            // The name becomes a directory under work_root.
            if name.is_empty()
                || name == "."
                || name == ".."
                || name.contains('/')
                || name.contains('\\')
            {
                return Err(HotDeployError::InvalidConfig(format!(
                    "repository name {name:?} cannot be used as a directory name"
                )));
            }
        }
        Ok(())
    }

    /// Address the webhook listener binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = ServerConfig::from_yaml_str(
            r#"
port: 8080
work_root: /srv/deploy
repositories:
  app:
    relative_build_dir: svc
    run_args: "--env dev"
  worker:
    run_args: "-q"
    restart_on_push: true
"#,
        )
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.work_root, PathBuf::from("/srv/deploy"));
        assert_eq!(config.assets_dir, PathBuf::from("assets"));
        assert_eq!(config.webhook_path, "/");
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));

        let app = &config.repositories["app"];
        assert_eq!(app.relative_build_dir, PathBuf::from("svc"));
        assert_eq!(app.run_args, "--env dev");
        assert!(!app.restart_on_push);

        let worker = &config.repositories["worker"];
        assert_eq!(worker.relative_build_dir, PathBuf::from("."));
        assert!(worker.restart_on_push);
    }

    #[test]
    fn test_accepts_legacy_field_names() {
        let config = ServerConfig::from_yaml_str(
            r#"
port: 9000
repositories:
  app:
    build_relative_dir: cmd/server
    build_args_bin: "-c conf.yml"
"#,
        )
        .unwrap();
        let app = &config.repositories["app"];
        assert_eq!(app.relative_build_dir, PathBuf::from("cmd/server"));
        assert_eq!(app.run_args, "-c conf.yml");
    }

    #[test]
    fn test_empty_build_dir_defaults_to_dot() {
        let config = ServerConfig::from_yaml_str(
            r#"
port: 9000
repositories:
  app:
    relative_build_dir: ""
"#,
        )
        .unwrap();
        assert_eq!(
            config.repositories["app"].relative_build_dir,
            PathBuf::from(".")
        );
    }

    #[test]
    fn test_build_command_and_supervisor_args() {
        let repo = RepositoryConfig {
            relative_build_dir: PathBuf::from("svc"),
            run_args: "--env dev".to_string(),
            restart_on_push: false,
        };
        assert_eq!(repo.build_command(), "go build -o ./tmp/main svc");
        assert_eq!(
            repo.supervisor_args(),
            vec![
                "-build.cmd=go build -o ./tmp/main svc".to_string(),
                "-build.args_bin=--env dev".to_string(),
            ]
        );
        assert_eq!(
            RepositoryConfig::default().build_command(),
            "go build -o ./tmp/main ."
        );
    }

    #[test]
    fn test_rejects_zero_port() {
        let err = ServerConfig::from_yaml_str("port: 0\n").unwrap_err();
        assert!(matches!(err, HotDeployError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_path_like_repository_names() {
        for name in ["..", "a/b", "\".\""] {
            let yaml = format!("port: 80\nrepositories:\n  {name}:\n    run_args: x\n");
            let err = ServerConfig::from_yaml_str(&yaml).unwrap_err();
            assert!(
                matches!(err, HotDeployError::InvalidConfig(_)),
                "expected rejection for {name}"
            );
        }
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let err = ServerConfig::from_yaml_str("port: [not, a, number]").unwrap_err();
        assert!(matches!(err, HotDeployError::ConfigParse(_)));
    }

    #[test]
    fn test_load_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ServerConfig::load(&dir.path().join("config.yml")).unwrap_err();
        assert!(matches!(err, HotDeployError::ConfigRead { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "port: 7000\nrepositories: {}\n").unwrap();
        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.listen_addr().port(), 7000);
        assert!(config.repositories.is_empty());
    }
}
