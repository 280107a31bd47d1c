//! The `deploy.yml` file a repository ships

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::WorkerError;

pub const CONFIG_FILE_NAMES: [&str; 2] = ["deploy.yml", "deploy.yaml"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployConfig {
    /// Where the checked-out tree is promoted to
    pub clone: PathBuf,
    /// Scripts run before promotion, relative to `clone`
    pub build: Vec<String>,
    /// Scripts run after promotion, relative to `clone`
    pub deploy: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawDeployConfig {
    clone: Option<String>,
    build: Option<Vec<String>>,
    deploy: Option<Vec<String>>,
}

/// Find the single deploy config at the root of `dir`
pub fn locate(dir: &Path) -> Result<PathBuf, WorkerError> {
    let mut found: Vec<PathBuf> = CONFIG_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .filter(|path| path.is_file())
        .collect();

    match found.len() {
        0 => Err(WorkerError::ConfigNotFound {
            dir: dir.to_path_buf(),
        }),
        1 => Ok(found.remove(0)),
        _ => Err(WorkerError::ConfigAmbiguous {
            dir: dir.to_path_buf(),
        }),
    }
}

impl DeployConfig {
    pub async fn load(path: &Path) -> Result<Self, WorkerError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| WorkerError::io(path, e))?;
        Self::parse(path, &contents)
    }

    /// `path` is only used in error messages
    pub fn parse(path: &Path, contents: &str) -> Result<Self, WorkerError> {
        let empty = || WorkerError::ConfigEmpty {
            path: path.to_path_buf(),
        };

        if contents.trim().is_empty() {
            return Err(empty());
        }

        let value: serde_yaml::Value = serde_yaml::from_str(contents).map_err(|_| empty())?;
        match &value {
            serde_yaml::Value::Null => return Err(empty()),
            serde_yaml::Value::Mapping(m) if m.is_empty() => return Err(empty()),
            serde_yaml::Value::Mapping(_) => {}
            _ => {
                return Err(WorkerError::ConfigInvalid {
                    path: path.to_path_buf(),
                    message: "expected a mapping at the top level".to_string(),
                });
            }
        }

        let raw: RawDeployConfig =
            serde_yaml::from_value(value).map_err(|e| WorkerError::ConfigInvalid {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let clone = raw
            .clone
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| WorkerError::ConfigMissingClone {
                path: path.to_path_buf(),
            })?;

        Ok(DeployConfig {
            clone: PathBuf::from(clone),
            build: raw.build.unwrap_or_default(),
            deploy: raw.deploy.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(contents: &str) -> Result<DeployConfig, WorkerError> {
        DeployConfig::parse(Path::new("deploy.yml"), contents)
    }

    #[test]
    fn parses_full_config_in_order() {
        let config = parse(
            "clone: /srv/site\nbuild:\n  - scripts/one.sh\n  - scripts/two.sh\ndeploy:\n  - scripts/restart.sh\n",
        )
        .expect("valid config");
        assert_eq!(config.clone, PathBuf::from("/srv/site"));
        assert_eq!(config.build, vec!["scripts/one.sh", "scripts/two.sh"]);
        assert_eq!(config.deploy, vec!["scripts/restart.sh"]);
    }

    #[test]
    fn build_and_deploy_default_to_empty() {
        let config = parse("clone: /srv/site\n").expect("valid config");
        assert!(config.build.is_empty());
        assert!(config.deploy.is_empty());

        let config = parse("clone: /srv/site\nbuild:\n").expect("null build");
        assert!(config.build.is_empty());
    }

    #[test]
    fn empty_documents_are_config_empty() {
        for contents in ["", "   \n", "# just a comment\n", "{}", "~"] {
            assert!(
                matches!(parse(contents), Err(WorkerError::ConfigEmpty { .. })),
                "{:?}",
                contents
            );
        }
    }

    #[test]
    fn unparseable_yaml_is_config_empty() {
        assert!(matches!(
            parse("clone: [unterminated"),
            Err(WorkerError::ConfigEmpty { .. })
        ));
    }

    #[test]
    fn missing_clone_is_reported() {
        assert!(matches!(
            parse("build:\n  - a.sh\n"),
            Err(WorkerError::ConfigMissingClone { .. })
        ));
        assert!(matches!(
            parse("clone: ''\n"),
            Err(WorkerError::ConfigMissingClone { .. })
        ));
    }

    #[test]
    fn wrong_shapes_are_invalid() {
        assert!(matches!(
            parse("- clone\n- build\n"),
            Err(WorkerError::ConfigInvalid { .. })
        ));
        assert!(matches!(
            parse("clone: /srv/site\nbuild: {a: b}\n"),
            Err(WorkerError::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn locate_distinguishes_none_one_and_two() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            locate(dir.path()),
            Err(WorkerError::ConfigNotFound { .. })
        ));

        std::fs::write(dir.path().join("deploy.yaml"), "clone: /srv\n").expect("write");
        assert_eq!(
            locate(dir.path()).expect("one config"),
            dir.path().join("deploy.yaml")
        );

        std::fs::write(dir.path().join("deploy.yml"), "clone: /srv\n").expect("write");
        assert!(matches!(
            locate(dir.path()),
            Err(WorkerError::ConfigAmbiguous { .. })
        ));
    }

    #[test]
    fn locate_is_case_sensitive() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("Deploy.yml"), "clone: /srv\n").expect("write");
        // case-insensitive filesystems would see Deploy.yml as deploy.yml
        let probe = dir.path().join("deploy.yml");
        if !probe.exists() {
            assert!(matches!(
                locate(dir.path()),
                Err(WorkerError::ConfigNotFound { .. })
            ));
        }
    }
}
